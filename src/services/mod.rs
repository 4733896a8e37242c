//! Business logic services.
//!
//! `assignment` owns the domain rules and is independent of HTTP; the
//! `http_*` modules expose it over REST.

pub mod assignment;
pub mod http_api;
pub mod http_server;
pub mod reviewer_selection;

pub use assignment::{AssignmentService, Reassignment};
pub use http_api::ApiState;
