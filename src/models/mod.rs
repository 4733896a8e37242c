//! Data models for the application.
//!
//! These models represent the core entities stored in the SQLite database
//! and passed between the assignment service and its collaborators.
//!
//! Row types derive FromRow for SQLx queries; domain types derive Serialize.

pub mod pull_request;
pub mod team;
pub mod user;

// Re-exports for convenient access
pub use pull_request::{PullRequest, PullRequestRow, PullRequestStatus};
pub use team::Team;
pub use user::User;
