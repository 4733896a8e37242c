//! Storage capabilities consumed by the assignment service.
//!
//! Each store is a separate trait so the service depends only on the
//! operations it uses. Every call takes an explicit session: either a plain
//! pooled connection (autocommit) or an open transaction. A single adapter
//! ([`sqlite::SqliteStorage`]) implements all of them plus [`TxManager`].

pub mod sqlite;

use crate::error::AppError;
use crate::models::{PullRequest, Team, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Names the session type shared by all stores of one adapter.
pub trait SessionProvider: Send + Sync {
    type Session: Send + 'static;

    /// Whether the session is an open transaction.
    fn in_transaction(session: &Self::Session) -> bool;
}

#[async_trait]
pub trait TeamStore: SessionProvider {
    async fn team_exists(&self, session: &mut Self::Session, team_name: &str)
        -> Result<bool, AppError>;

    /// Insert the team and every member. A duplicate team or user id yields
    /// `AlreadyExists`.
    async fn create_team_with_members(
        &self,
        session: &mut Self::Session,
        team: &Team,
    ) -> Result<(), AppError>;

    async fn get_team_with_members(
        &self,
        session: &mut Self::Session,
        team_name: &str,
    ) -> Result<Team, AppError>;
}

#[async_trait]
pub trait UserStore: SessionProvider {
    async fn get_user(&self, session: &mut Self::Session, user_id: &str) -> Result<User, AppError>;

    async fn set_user_active(
        &self,
        session: &mut Self::Session,
        user_id: &str,
        is_active: bool,
    ) -> Result<(), AppError>;

    async fn list_active_by_team(
        &self,
        session: &mut Self::Session,
        team_name: &str,
    ) -> Result<Vec<User>, AppError>;
}

#[async_trait]
pub trait PullRequestStore: SessionProvider {
    async fn get_pull_request(
        &self,
        session: &mut Self::Session,
        pull_request_id: &str,
    ) -> Result<PullRequest, AppError>;

    /// Read a pull request and lock its row until the transaction ends.
    async fn get_pull_request_locked(
        &self,
        session: &mut Self::Session,
        pull_request_id: &str,
    ) -> Result<PullRequest, AppError>;

    async fn create_pull_request(
        &self,
        session: &mut Self::Session,
        pull_request: &PullRequest,
    ) -> Result<(), AppError>;

    async fn mark_merged(
        &self,
        session: &mut Self::Session,
        pull_request_id: &str,
        merged_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Swap `old_id` for `new_id`. Fails with `ReviewerNotAssigned` if
    /// `old_id` is no longer assigned.
    async fn replace_reviewer(
        &self,
        session: &mut Self::Session,
        pull_request_id: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<(), AppError>;

    async fn list_by_reviewer(
        &self,
        session: &mut Self::Session,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError>;
}

/// Opens and finishes sessions.
#[async_trait]
pub trait TxManager: SessionProvider {
    /// Borrow an autocommit session.
    async fn acquire(&self) -> Result<Self::Session, AppError>;

    /// Start a transaction with at least repeatable-read isolation.
    async fn begin(&self) -> Result<Self::Session, AppError>;

    async fn commit(&self, session: Self::Session) -> Result<(), AppError>;

    async fn rollback(&self, session: Self::Session) -> Result<(), AppError>;
}

/// Everything the assignment service needs from its storage adapter.
pub trait Storage: TeamStore + UserStore + PullRequestStore + TxManager {}

impl<T> Storage for T where T: TeamStore + UserStore + PullRequestStore + TxManager {}

/// Race `work` against the cancellation signal.
///
/// On cancellation the work future is dropped before returning.
pub async fn cancellable<T, F>(cancel: &CancellationToken, work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = work => result,
    }
}

/// Run `f` inside a transaction and commit if it succeeds.
///
/// If `outer` is an already-open transaction, `f` runs on it directly and
/// the caller stays responsible for committing. Otherwise a new transaction
/// is started; any error from `f`, including cancellation, rolls it back.
pub async fn run_in_transaction<S, T, F>(
    store: &S,
    outer: Option<&mut S::Session>,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, AppError>
where
    S: TxManager,
    T: Send,
    F: for<'s> FnOnce(&'s mut S::Session) -> BoxFuture<'s, Result<T, AppError>>,
{
    if let Some(session) = outer {
        if S::in_transaction(session) {
            return cancellable(cancel, f(session)).await;
        }
    }

    let mut session = cancellable(cancel, store.begin()).await?;
    let outcome = cancellable(cancel, f(&mut session)).await;

    match outcome {
        Ok(value) => {
            store.commit(session).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback(session).await {
                log::warn!("Rollback failed after {}: {}", err, rollback_err);
            }
            Err(err)
        }
    }
}

/// Run `f` on an autocommit session.
pub async fn run_in_session<S, T, F>(store: &S, cancel: &CancellationToken, f: F) -> Result<T, AppError>
where
    S: TxManager,
    T: Send,
    F: for<'s> FnOnce(&'s mut S::Session) -> BoxFuture<'s, Result<T, AppError>>,
{
    let mut session = cancellable(cancel, store.acquire()).await?;
    cancellable(cancel, f(&mut session)).await
}
