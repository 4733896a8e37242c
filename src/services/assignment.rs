//! Assignment service: team, user and pull request operations.
//!
//! Every mutating pull request operation runs in one transaction. Merge and
//! reassignment start with a locked read of the pull request, so concurrent
//! calls for the same id are serialized and the second one observes the
//! first one's result.
//!
//! Each public operation has an `*_in` counterpart that runs on a session the
//! caller already holds, for composing several operations in one transaction.

use crate::error::AppError;
use crate::models::{PullRequest, PullRequestStatus, Team, User};
use crate::services::reviewer_selection::{exclude_candidates, sample_reviewers};
use crate::storage::{run_in_session, run_in_transaction, Storage};
use chrono::{DateTime, SubsecRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Number of reviewers assigned to a new pull request.
pub const REVIEWERS_PER_PULL_REQUEST: i64 = 2;

/// Result of a successful reviewer reassignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reassignment {
    pub pull_request: PullRequest,
    pub replaced_by: String,
}

/// Current time at millisecond precision, the resolution timestamps are stored at.
fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn require_non_empty(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::invalid_input_field(
            format!("{} must not be empty", field),
            field,
        ));
    }
    Ok(())
}

/// Stateless orchestrator over a storage adapter and a random source.
pub struct AssignmentService<S, R = StdRng> {
    store: Arc<S>,
    rng: Arc<Mutex<R>>,
}

impl<S, R> Clone for AssignmentService<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            rng: Arc::clone(&self.rng),
        }
    }
}

impl<S: Storage + 'static> AssignmentService<S, StdRng> {
    /// Create a service with an entropy-seeded random source.
    pub fn new(store: S) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }
}

impl<S, R> AssignmentService<S, R>
where
    S: Storage + 'static,
    R: Rng + Send + 'static,
{
    /// Create a service with an explicit random source (e.g. a seeded one in tests).
    pub fn with_rng(store: S, rng: R) -> Self {
        Self {
            store: Arc::new(store),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn pick_reviewers(&self, candidates: &[User], quantity: i64) -> Vec<String> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        sample_reviewers(candidates, quantity, &mut *rng)
    }

    // ── Teams ──────────────────────────────────────────────────────────────

    /// Create a team with all of its members and return it as stored.
    pub async fn create_team(&self, team: Team, cancel: &CancellationToken) -> Result<Team, AppError> {
        require_non_empty(&team.team_name, "team_name")?;
        for member in &team.members {
            require_non_empty(&member.user_id, "user_id")?;
        }
        log::debug!("Creating team {}", team.team_name);

        let team = Team::new(team.team_name, team.members);
        let this = self.clone();
        run_in_transaction(&*self.store, None, cancel, move |session| {
            Box::pin(async move { this.create_team_in(session, &team).await })
        })
        .await
    }

    pub async fn create_team_in(&self, session: &mut S::Session, team: &Team) -> Result<Team, AppError> {
        if self.store.team_exists(session, &team.team_name).await? {
            return Err(AppError::already_exists("team", &team.team_name));
        }

        self.store.create_team_with_members(session, team).await?;
        let created = self.store.get_team_with_members(session, &team.team_name).await?;

        log::info!(
            "Created team {} with {} members",
            created.team_name,
            created.members.len()
        );
        Ok(created)
    }

    pub async fn get_team(&self, team_name: &str, cancel: &CancellationToken) -> Result<Team, AppError> {
        require_non_empty(team_name, "team_name")?;

        let store = Arc::clone(&self.store);
        let team_name = team_name.to_string();
        run_in_session(&*self.store, cancel, move |session| {
            Box::pin(async move { store.get_team_with_members(session, &team_name).await })
        })
        .await
    }

    // ── Users ──────────────────────────────────────────────────────────────

    /// Toggle a user's activity flag and return the updated user.
    pub async fn set_user_active(
        &self,
        user_id: &str,
        is_active: bool,
        cancel: &CancellationToken,
    ) -> Result<User, AppError> {
        require_non_empty(user_id, "user_id")?;

        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        let user = run_in_session(&*self.store, cancel, move |session| {
            Box::pin(async move {
                store.set_user_active(session, &user_id, is_active).await?;
                store.get_user(session, &user_id).await
            })
        })
        .await?;

        log::info!("User {} is_active={}", user.user_id, user.is_active);
        Ok(user)
    }

    /// Pull requests on which `user_id` is an assigned reviewer.
    pub async fn list_user_reviews(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PullRequest>, AppError> {
        require_non_empty(user_id, "user_id")?;

        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();
        run_in_session(&*self.store, cancel, move |session| {
            Box::pin(async move {
                store.get_user(session, &user_id).await?;
                store.list_by_reviewer(session, &user_id).await
            })
        })
        .await
    }

    // ── Pull requests ──────────────────────────────────────────────────────

    /// Create an open pull request and assign up to two reviewers from the
    /// author's team.
    pub async fn create_pull_request(
        &self,
        pull_request_id: &str,
        pull_request_name: &str,
        author_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, AppError> {
        require_non_empty(pull_request_id, "pull_request_id")?;
        require_non_empty(pull_request_name, "pull_request_name")?;
        require_non_empty(author_id, "author_id")?;
        log::debug!("Creating pull request {} by {}", pull_request_id, author_id);

        let this = self.clone();
        let (id, name, author) = (
            pull_request_id.to_string(),
            pull_request_name.to_string(),
            author_id.to_string(),
        );
        run_in_transaction(&*self.store, None, cancel, move |session| {
            Box::pin(async move { this.create_pull_request_in(session, &id, &name, &author).await })
        })
        .await
    }

    pub async fn create_pull_request_in(
        &self,
        session: &mut S::Session,
        pull_request_id: &str,
        pull_request_name: &str,
        author_id: &str,
    ) -> Result<PullRequest, AppError> {
        match self.store.get_pull_request(session, pull_request_id).await {
            Ok(_) => return Err(AppError::already_exists("pull_request", pull_request_id)),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let author = self.store.get_user(session, author_id).await?;
        let candidates = self.store.list_active_by_team(session, &author.team_name).await?;
        let candidates = exclude_candidates(candidates, &[author_id]);
        let assigned_reviewers = self.pick_reviewers(&candidates, REVIEWERS_PER_PULL_REQUEST);

        let pull_request = PullRequest {
            pull_request_id: pull_request_id.to_string(),
            pull_request_name: pull_request_name.to_string(),
            author_id: author_id.to_string(),
            status: PullRequestStatus::Open,
            assigned_reviewers,
            created_at: utc_now(),
            merged_at: None,
        };
        self.store.create_pull_request(session, &pull_request).await?;

        log::info!(
            "Created pull request {} with reviewers {:?}",
            pull_request.pull_request_id,
            pull_request.assigned_reviewers
        );
        Ok(pull_request)
    }

    /// Merge a pull request. Merging an already merged one returns it unchanged.
    pub async fn merge_pull_request(
        &self,
        pull_request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, AppError> {
        require_non_empty(pull_request_id, "pull_request_id")?;

        let this = self.clone();
        let id = pull_request_id.to_string();
        run_in_transaction(&*self.store, None, cancel, move |session| {
            Box::pin(async move { this.merge_pull_request_in(session, &id).await })
        })
        .await
    }

    pub async fn merge_pull_request_in(
        &self,
        session: &mut S::Session,
        pull_request_id: &str,
    ) -> Result<PullRequest, AppError> {
        let mut pull_request = self.store.get_pull_request_locked(session, pull_request_id).await?;

        if pull_request.is_merged() {
            log::debug!("Pull request {} already merged", pull_request_id);
            return Ok(pull_request);
        }

        let merged_at = utc_now();
        self.store.mark_merged(session, pull_request_id, merged_at).await?;

        pull_request.status = PullRequestStatus::Merged;
        pull_request.merged_at = Some(merged_at);

        log::info!("Merged pull request {}", pull_request_id);
        Ok(pull_request)
    }

    /// Replace `old_reviewer_id` with a random active member of that
    /// reviewer's team who is neither the author nor already assigned.
    pub async fn reassign_reviewer(
        &self,
        pull_request_id: &str,
        old_reviewer_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Reassignment, AppError> {
        require_non_empty(pull_request_id, "pull_request_id")?;
        require_non_empty(old_reviewer_id, "old_user_id")?;

        let this = self.clone();
        let (id, old) = (pull_request_id.to_string(), old_reviewer_id.to_string());
        run_in_transaction(&*self.store, None, cancel, move |session| {
            Box::pin(async move { this.reassign_reviewer_in(session, &id, &old).await })
        })
        .await
    }

    pub async fn reassign_reviewer_in(
        &self,
        session: &mut S::Session,
        pull_request_id: &str,
        old_reviewer_id: &str,
    ) -> Result<Reassignment, AppError> {
        let mut pull_request = self.store.get_pull_request_locked(session, pull_request_id).await?;

        if pull_request.is_merged() {
            return Err(AppError::already_merged(pull_request_id));
        }
        if !pull_request.has_reviewer(old_reviewer_id) {
            return Err(AppError::reviewer_not_assigned(pull_request_id, old_reviewer_id));
        }

        let old_reviewer = self.store.get_user(session, old_reviewer_id).await?;
        let candidates = self
            .store
            .list_active_by_team(session, &old_reviewer.team_name)
            .await?;

        let mut exclude: Vec<&str> = vec![old_reviewer_id, pull_request.author_id.as_str()];
        exclude.extend(pull_request.assigned_reviewers.iter().map(String::as_str));
        let candidates = exclude_candidates(candidates, &exclude);

        let replaced_by = self
            .pick_reviewers(&candidates, 1)
            .into_iter()
            .next()
            .ok_or_else(|| AppError::no_candidate(pull_request_id))?;

        self.store
            .replace_reviewer(session, pull_request_id, old_reviewer_id, &replaced_by)
            .await?;
        pull_request.swap_reviewer(old_reviewer_id, &replaced_by);

        log::info!(
            "Reassigned pull request {}: {} -> {}",
            pull_request_id,
            old_reviewer_id,
            replaced_by
        );
        Ok(Reassignment {
            pull_request,
            replaced_by,
        })
    }
}
