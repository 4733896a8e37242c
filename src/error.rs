//! Application error types.
//!
//! One taxonomy is shared by the assignment service, the storage adapter and
//! the HTTP transport. Domain conditions get their own variants so callers can
//! map them onto distinct machine-readable codes; everything else is carried
//! as `Database` or `Internal` with the underlying message unchanged.

use serde::Serialize;
use thiserror::Error;

/// Application-level errors returned from service operations.
///
/// All variants serialize to a structured JSON object.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// A team, user or pull request with this identifier already exists.
    #[error("{resource} already exists: {id}")]
    AlreadyExists { resource: String, id: String },

    /// Mutating operation attempted on a merged pull request.
    #[error("Pull request already merged: {pull_request_id}")]
    AlreadyMerged { pull_request_id: String },

    /// The reviewer to replace is not assigned to the pull request.
    #[error("Reviewer {user_id} is not assigned to pull request {pull_request_id}")]
    ReviewerNotAssigned {
        pull_request_id: String,
        user_id: String,
    },

    /// No active team member is eligible as a replacement reviewer.
    #[error("No replacement candidate for pull request {pull_request_id}")]
    NoCandidate { pull_request_id: String },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// The caller's cancellation signal fired before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn already_exists(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn already_merged(pull_request_id: impl Into<String>) -> Self {
        Self::AlreadyMerged {
            pull_request_id: pull_request_id.into(),
        }
    }

    pub fn reviewer_not_assigned(
        pull_request_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::ReviewerNotAssigned {
            pull_request_id: pull_request_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn no_candidate(pull_request_id: impl Into<String>) -> Self {
        Self::NoCandidate {
            pull_request_id: pull_request_id.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create a database error with optional operation context.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Machine-readable code for the transport boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists { resource, .. } => match resource.as_str() {
                "team" => "TEAM_EXISTS",
                "pull_request" => "PR_EXISTS",
                "user" => "USER_EXISTS",
                _ => "ALREADY_EXISTS",
            },
            Self::AlreadyMerged { .. } => "PR_MERGED",
            Self::ReviewerNotAssigned { .. } => "NOT_ASSIGNED",
            Self::NoCandidate { .. } => "NO_CANDIDATE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidInput { .. } => "BAD_REQUEST",
            Self::Cancelled => "CANCELLED",
            Self::Database { .. } | Self::Internal { .. } => "INTERNAL",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = AppError::already_merged("pr-1");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"AlreadyMerged\""));
        assert!(json.contains("\"pull_request_id\":\"pr-1\""));
    }

    #[test]
    fn test_not_found_with_id() {
        let err = AppError::not_found_with_id("user", "u1");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"resource\":\"user\""));
        assert!(json.contains("\"id\":\"u1\""));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_optional_fields_not_serialized() {
        let err = AppError::database("error");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("operation"));
    }

    #[test]
    fn test_already_exists_codes_depend_on_resource() {
        assert_eq!(AppError::already_exists("team", "backend").code(), "TEAM_EXISTS");
        assert_eq!(AppError::already_exists("pull_request", "pr-1").code(), "PR_EXISTS");
        assert_eq!(AppError::already_exists("user", "u1").code(), "USER_EXISTS");
    }

    #[test]
    fn test_domain_codes_are_distinct() {
        let codes = [
            AppError::already_merged("p").code(),
            AppError::reviewer_not_assigned("p", "u").code(),
            AppError::no_candidate("p").code(),
            AppError::not_found("pull_request").code(),
            AppError::Cancelled.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_display_impl() {
        let err = AppError::reviewer_not_assigned("pr-1", "u2");
        assert_eq!(
            format!("{}", err),
            "Reviewer u2 is not assigned to pull request pr-1"
        );
    }
}
