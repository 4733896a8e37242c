//! SQLite storage adapter.
//!
//! Implements every store trait plus [`TxManager`] on top of a sqlx pool.
//! Transactions are opened with `BEGIN IMMEDIATE`, so the database write lock
//! is taken before the first read. SQLite transactions are serializable;
//! a locked read therefore excludes every other mutator until commit or
//! rollback, and concurrent writers wait up to the pool's busy timeout.

mod pull_request;
mod team;
mod user;

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::storage::{SessionProvider, TxManager};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, Transaction};

/// A connection or open transaction owned by one request.
pub enum SqliteSession {
    Conn(PoolConnection<Sqlite>),
    Tx(Transaction<'static, Sqlite>),
}

impl SqliteSession {
    /// The connection to run statements on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        match self {
            Self::Conn(conn) => &mut **conn,
            Self::Tx(tx) => &mut **tx,
        }
    }
}

/// Storage adapter backed by a SQLite pool.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: DbPool,
}

impl SqliteStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl SessionProvider for SqliteStorage {
    type Session = SqliteSession;

    fn in_transaction(session: &Self::Session) -> bool {
        matches!(session, SqliteSession::Tx(_))
    }
}

#[async_trait]
impl TxManager for SqliteStorage {
    async fn acquire(&self) -> Result<SqliteSession, AppError> {
        let conn = self.pool.acquire().await?;
        Ok(SqliteSession::Conn(conn))
    }

    async fn begin(&self) -> Result<SqliteSession, AppError> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| AppError::database_with_op(e.to_string(), "begin"))?;
        Ok(SqliteSession::Tx(tx))
    }

    async fn commit(&self, session: SqliteSession) -> Result<(), AppError> {
        match session {
            SqliteSession::Tx(tx) => tx
                .commit()
                .await
                .map_err(|e| AppError::database_with_op(e.to_string(), "commit")),
            SqliteSession::Conn(_) => Ok(()),
        }
    }

    async fn rollback(&self, session: SqliteSession) -> Result<(), AppError> {
        match session {
            SqliteSession::Tx(tx) => tx
                .rollback()
                .await
                .map_err(|e| AppError::database_with_op(e.to_string(), "rollback")),
            SqliteSession::Conn(_) => Ok(()),
        }
    }
}

/// Whether a sqlx error is a UNIQUE or PRIMARY KEY constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}


#[cfg(test)]
mod tests {
    use super::test_support::temp_storage;
    use super::*;
    use crate::models::{Team, User};
    use crate::storage::{run_in_transaction, TeamStore};
    use tokio_util::sync::CancellationToken;

    fn team(name: &str) -> Team {
        Team::new(name, vec![User::new(format!("{}-u1", name), "Alice", name, true)])
    }

    #[tokio::test]
    async fn test_commit_persists_and_rollback_discards() {
        let (_dir, storage) = temp_storage().await;

        let mut session = storage.begin().await.unwrap();
        storage.create_team_with_members(&mut session, &team("kept")).await.unwrap();
        storage.commit(session).await.unwrap();

        let mut session = storage.begin().await.unwrap();
        storage.create_team_with_members(&mut session, &team("dropped")).await.unwrap();
        storage.rollback(session).await.unwrap();

        let mut session = storage.acquire().await.unwrap();
        assert!(storage.team_exists(&mut session, "kept").await.unwrap());
        assert!(!storage.team_exists(&mut session, "dropped").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_in_transaction_rolls_back_on_error() {
        let (_dir, storage) = temp_storage().await;
        let cancel = CancellationToken::new();

        let result: Result<(), AppError> = run_in_transaction(&storage, None, &cancel, |session| {
            let storage = storage.clone();
            Box::pin(async move {
                storage.create_team_with_members(session, &team("partial")).await?;
                Err(AppError::internal("boom"))
            })
        })
        .await;
        assert!(matches!(result, Err(AppError::Internal { .. })));

        let mut session = storage.acquire().await.unwrap();
        assert!(!storage.team_exists(&mut session, "partial").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_in_transaction_reuses_outer_transaction() {
        let (_dir, storage) = temp_storage().await;
        let cancel = CancellationToken::new();

        let mut outer = storage.begin().await.unwrap();
        run_in_transaction(&storage, Some(&mut outer), &cancel, |session| {
            let storage = storage.clone();
            Box::pin(async move { storage.create_team_with_members(session, &team("inner")).await })
        })
        .await
        .unwrap();

        // The inner call must not have committed on its own
        storage.rollback(outer).await.unwrap();

        let mut session = storage.acquire().await.unwrap();
        assert!(!storage.team_exists(&mut session, "inner").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_in_transaction_honours_cancellation() {
        let (_dir, storage) = temp_storage().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_in_transaction(&storage, None, &cancel, |session| {
            let storage = storage.clone();
            Box::pin(async move { storage.create_team_with_members(session, &team("late")).await })
        })
        .await;
        assert!(matches!(result, Err(AppError::Cancelled)));

        let mut session = storage.acquire().await.unwrap();
        assert!(!storage.team_exists(&mut session, "late").await.unwrap());
    }
}
