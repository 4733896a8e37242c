//! Reviewer Roster - pull request reviewer assignment service.
//!
//! Teams and their members are registered once; each new pull request gets
//! up to two active teammates of its author as reviewers. Reviewers can be
//! swapped while the pull request is open, and merging is idempotent.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use config::{Config, ConfigError};
pub use error::AppError;
