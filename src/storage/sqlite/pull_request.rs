//! Pull request and reviewer queries.

use super::{is_unique_violation, SqliteSession, SqliteStorage};
use crate::error::AppError;
use crate::models::{PullRequest, PullRequestRow, PullRequestStatus};
use crate::storage::{PullRequestStore, SessionProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Pull request columns plus the reviewer ids as a JSON array.
const SELECT_PULL_REQUEST: &str = r#"
    SELECT
        p.pull_request_id, p.pull_request_name, p.author_id, p.status,
        p.created_at, p.merged_at,
        (SELECT json_group_array(r.user_id)
           FROM pull_request_reviewers r
          WHERE r.pull_request_id = p.pull_request_id) AS reviewers
    FROM pull_requests p
"#;

async fn fetch_pull_request(
    session: &mut SqliteSession,
    pull_request_id: &str,
) -> Result<PullRequest, AppError> {
    let query = format!("{} WHERE p.pull_request_id = ?", SELECT_PULL_REQUEST);
    sqlx::query_as::<_, PullRequestRow>(&query)
        .bind(pull_request_id)
        .fetch_optional(session.conn())
        .await?
        .ok_or_else(|| AppError::not_found_with_id("pull_request", pull_request_id))?
        .into_pull_request()
}

#[async_trait]
impl PullRequestStore for SqliteStorage {
    async fn get_pull_request(
        &self,
        session: &mut SqliteSession,
        pull_request_id: &str,
    ) -> Result<PullRequest, AppError> {
        fetch_pull_request(session, pull_request_id).await
    }

    /// The transaction already holds the database write lock, taken by
    /// `BEGIN IMMEDIATE`; the read is only valid inside one.
    async fn get_pull_request_locked(
        &self,
        session: &mut SqliteSession,
        pull_request_id: &str,
    ) -> Result<PullRequest, AppError> {
        if !Self::in_transaction(session) {
            return Err(AppError::internal("locked read requires an open transaction"));
        }
        fetch_pull_request(session, pull_request_id).await
    }

    async fn create_pull_request(
        &self,
        session: &mut SqliteSession,
        pull_request: &PullRequest,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO pull_requests (
                pull_request_id, pull_request_name, author_id, status, created_at, merged_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pull_request.pull_request_id)
        .bind(&pull_request.pull_request_name)
        .bind(&pull_request.author_id)
        .bind(pull_request.status.as_str())
        .bind(pull_request.created_at.timestamp_millis())
        .bind(pull_request.merged_at.map(|t| t.timestamp_millis()))
        .execute(session.conn())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::already_exists("pull_request", &pull_request.pull_request_id)
            } else {
                AppError::from(e)
            }
        })?;

        for reviewer_id in &pull_request.assigned_reviewers {
            sqlx::query("INSERT INTO pull_request_reviewers (pull_request_id, user_id) VALUES (?, ?)")
                .bind(&pull_request.pull_request_id)
                .bind(reviewer_id)
                .execute(session.conn())
                .await?;
        }

        Ok(())
    }

    async fn mark_merged(
        &self,
        session: &mut SqliteSession,
        pull_request_id: &str,
        merged_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE pull_requests SET status = ?, merged_at = ? WHERE pull_request_id = ?",
        )
        .bind(PullRequestStatus::Merged.as_str())
        .bind(merged_at.timestamp_millis())
        .bind(pull_request_id)
        .execute(session.conn())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found_with_id("pull_request", pull_request_id));
        }

        Ok(())
    }

    async fn replace_reviewer(
        &self,
        session: &mut SqliteSession,
        pull_request_id: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<(), AppError> {
        let deleted = sqlx::query(
            "DELETE FROM pull_request_reviewers WHERE pull_request_id = ? AND user_id = ?",
        )
        .bind(pull_request_id)
        .bind(old_id)
        .execute(session.conn())
        .await?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::reviewer_not_assigned(pull_request_id, old_id));
        }

        sqlx::query("INSERT INTO pull_request_reviewers (pull_request_id, user_id) VALUES (?, ?)")
            .bind(pull_request_id)
            .bind(new_id)
            .execute(session.conn())
            .await?;

        Ok(())
    }

    /// Pull requests reviewed by `user_id`, oldest first.
    async fn list_by_reviewer(
        &self,
        session: &mut SqliteSession,
        user_id: &str,
    ) -> Result<Vec<PullRequest>, AppError> {
        let query = format!(
            r#"{}
            WHERE p.pull_request_id IN (
                SELECT pull_request_id FROM pull_request_reviewers WHERE user_id = ?
            )
            ORDER BY p.created_at, p.pull_request_id
            "#,
            SELECT_PULL_REQUEST
        );

        let rows = sqlx::query_as::<_, PullRequestRow>(&query)
            .bind(user_id)
            .fetch_all(session.conn())
            .await?;

        rows.into_iter().map(PullRequestRow::into_pull_request).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::models::{PullRequest, PullRequestStatus, Team, User};
    use crate::storage::sqlite::test_support::temp_storage;
    use crate::storage::sqlite::SqliteStorage;
    use crate::storage::{PullRequestStore, TeamStore, TxManager};
    use chrono::{DateTime, Utc};

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn open_pr(id: &str, reviewers: &[&str], created_millis: i64) -> PullRequest {
        PullRequest {
            pull_request_id: id.to_string(),
            pull_request_name: format!("Change {}", id),
            author_id: "a1".to_string(),
            status: PullRequestStatus::Open,
            assigned_reviewers: reviewers.iter().map(|r| r.to_string()).collect(),
            created_at: at(created_millis),
            merged_at: None,
        }
    }

    async fn seeded() -> (tempfile::TempDir, SqliteStorage) {
        let (dir, storage) = temp_storage().await;
        let mut session = storage.acquire().await.unwrap();
        let team = Team::new(
            "t",
            ["a1", "a2", "a3", "a4"]
                .iter()
                .map(|id| User::new(*id, id.to_uppercase(), "t", true))
                .collect(),
        );
        storage.create_team_with_members(&mut session, &team).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_create_and_get_pull_request() {
        let (_dir, storage) = seeded().await;
        let mut session = storage.acquire().await.unwrap();

        storage
            .create_pull_request(&mut session, &open_pr("p1", &["a2", "a3"], 1_000))
            .await
            .unwrap();

        let pr = storage.get_pull_request(&mut session, "p1").await.unwrap();
        assert_eq!(pr.status, PullRequestStatus::Open);
        assert_eq!(pr.created_at, at(1_000));
        assert_eq!(pr.merged_at, None);
        let mut reviewers = pr.assigned_reviewers.clone();
        reviewers.sort();
        assert_eq!(reviewers, vec!["a2", "a3"]);
    }

    #[tokio::test]
    async fn test_pull_request_without_reviewers_reads_empty_list() {
        let (_dir, storage) = seeded().await;
        let mut session = storage.acquire().await.unwrap();

        storage
            .create_pull_request(&mut session, &open_pr("p0", &[], 1_000))
            .await
            .unwrap();
        let pr = storage.get_pull_request(&mut session, "p0").await.unwrap();
        assert!(pr.assigned_reviewers.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_pull_request_is_already_exists() {
        let (_dir, storage) = seeded().await;
        let mut session = storage.acquire().await.unwrap();

        let pr = open_pr("p1", &[], 1_000);
        storage.create_pull_request(&mut session, &pr).await.unwrap();
        let err = storage.create_pull_request(&mut session, &pr).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists { ref resource, .. } if resource == "pull_request"));
    }

    #[tokio::test]
    async fn test_locked_read_requires_transaction() {
        let (_dir, storage) = seeded().await;

        let mut session = storage.acquire().await.unwrap();
        storage
            .create_pull_request(&mut session, &open_pr("p1", &[], 1_000))
            .await
            .unwrap();
        let err = storage.get_pull_request_locked(&mut session, "p1").await.unwrap_err();
        assert!(matches!(err, AppError::Internal { .. }));

        let mut tx = storage.begin().await.unwrap();
        let pr = storage.get_pull_request_locked(&mut tx, "p1").await.unwrap();
        assert_eq!(pr.pull_request_id, "p1");
        assert!(storage
            .get_pull_request_locked(&mut tx, "missing")
            .await
            .unwrap_err()
            .is_not_found());
        storage.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_mark_merged_sets_status_and_timestamp() {
        let (_dir, storage) = seeded().await;
        let mut session = storage.acquire().await.unwrap();

        storage
            .create_pull_request(&mut session, &open_pr("p1", &["a2"], 1_000))
            .await
            .unwrap();
        storage.mark_merged(&mut session, "p1", at(5_123)).await.unwrap();

        let pr = storage.get_pull_request(&mut session, "p1").await.unwrap();
        assert!(pr.is_merged());
        assert_eq!(pr.merged_at, Some(at(5_123)));

        assert!(storage
            .mark_merged(&mut session, "missing", at(1))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_replace_reviewer() {
        let (_dir, storage) = seeded().await;
        let mut session = storage.acquire().await.unwrap();

        storage
            .create_pull_request(&mut session, &open_pr("p1", &["a2", "a3"], 1_000))
            .await
            .unwrap();
        storage.replace_reviewer(&mut session, "p1", "a2", "a4").await.unwrap();

        let pr = storage.get_pull_request(&mut session, "p1").await.unwrap();
        assert!(pr.has_reviewer("a4"));
        assert!(pr.has_reviewer("a3"));
        assert!(!pr.has_reviewer("a2"));

        let err = storage
            .replace_reviewer(&mut session, "p1", "a2", "a1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ReviewerNotAssigned { .. }));
    }

    #[tokio::test]
    async fn test_list_by_reviewer_orders_by_creation() {
        let (_dir, storage) = seeded().await;
        let mut session = storage.acquire().await.unwrap();

        storage
            .create_pull_request(&mut session, &open_pr("late", &["a2"], 2_000))
            .await
            .unwrap();
        storage
            .create_pull_request(&mut session, &open_pr("early", &["a2", "a3"], 1_000))
            .await
            .unwrap();
        storage
            .create_pull_request(&mut session, &open_pr("other", &["a3"], 1_500))
            .await
            .unwrap();

        let prs = storage.list_by_reviewer(&mut session, "a2").await.unwrap();
        let ids: Vec<&str> = prs.iter().map(|p| p.pull_request_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        // Full reviewer set is returned, not only the matching row
        assert_eq!(prs[0].assigned_reviewers.len(), 2);

        assert!(storage.list_by_reviewer(&mut session, "a4").await.unwrap().is_empty());
    }
}
