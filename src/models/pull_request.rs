//! Pull request model.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// Lifecycle state of a pull request. Only ever moves from `Open` to `Merged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PullRequestStatus {
    Open,
    Merged,
}

impl PullRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
        }
    }
}

impl FromStr for PullRequestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "MERGED" => Ok(Self::Merged),
            other => Err(AppError::internal(format!(
                "unknown pull request status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pull request with its assigned reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: PullRequestStatus,

    /// Reviewer user ids. Never contains the author, never contains duplicates.
    pub assigned_reviewers: Vec<String>,

    pub created_at: DateTime<Utc>,

    /// `None` until the pull request is merged.
    pub merged_at: Option<DateTime<Utc>>,
}

impl PullRequest {
    pub fn is_merged(&self) -> bool {
        self.status == PullRequestStatus::Merged
    }

    pub fn has_reviewer(&self, user_id: &str) -> bool {
        self.assigned_reviewers.iter().any(|id| id == user_id)
    }

    /// Swap one reviewer id for another, keeping its position.
    ///
    /// Returns false if `old_id` was not assigned.
    pub fn swap_reviewer(&mut self, old_id: &str, new_id: &str) -> bool {
        match self.assigned_reviewers.iter_mut().find(|id| *id == old_id) {
            Some(slot) => {
                *slot = new_id.to_string();
                true
            }
            None => false,
        }
    }
}

/// A pull request row as stored in SQLite.
///
/// Note: timestamps are stored as Unix milliseconds and `reviewers` is a JSON
/// array produced by `json_group_array` in the query.
#[derive(Debug, Clone, FromRow)]
pub struct PullRequestRow {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: String,
    pub created_at: i64,
    pub merged_at: Option<i64>,
    pub reviewers: String,
}

impl PullRequestRow {
    /// Parse reviewers from JSON string.
    pub fn reviewers_vec(&self) -> Result<Vec<String>, AppError> {
        serde_json::from_str(&self.reviewers)
            .map_err(|e| AppError::internal(format!("invalid reviewer list: {}", e)))
    }

    pub fn into_pull_request(self) -> Result<PullRequest, AppError> {
        let assigned_reviewers = self.reviewers_vec()?;
        Ok(PullRequest {
            status: self.status.parse()?,
            created_at: timestamp_from_millis(self.created_at)?,
            merged_at: self.merged_at.map(timestamp_from_millis).transpose()?,
            pull_request_id: self.pull_request_id,
            pull_request_name: self.pull_request_name,
            author_id: self.author_id,
            assigned_reviewers,
        })
    }
}

fn timestamp_from_millis(millis: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::internal(format!("timestamp out of range: {}", millis)))
}
