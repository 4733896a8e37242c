//! User queries.

use super::{SqliteSession, SqliteStorage};
use crate::error::AppError;
use crate::models::User;
use crate::storage::UserStore;
use async_trait::async_trait;

#[async_trait]
impl UserStore for SqliteStorage {
    async fn get_user(&self, session: &mut SqliteSession, user_id: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            "SELECT user_id, username, team_name, is_active FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(session.conn())
        .await?
        .ok_or_else(|| AppError::not_found_with_id("user", user_id))
    }

    async fn set_user_active(
        &self,
        session: &mut SqliteSession,
        user_id: &str,
        is_active: bool,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE user_id = ?")
            .bind(is_active)
            .bind(user_id)
            .execute(session.conn())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found_with_id("user", user_id));
        }

        Ok(())
    }

    /// Active members of a team, ordered by user id.
    async fn list_active_by_team(
        &self,
        session: &mut SqliteSession,
        team_name: &str,
    ) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, username, team_name, is_active
            FROM users
            WHERE team_name = ? AND is_active = 1
            ORDER BY user_id
            "#,
        )
        .bind(team_name)
        .fetch_all(session.conn())
        .await?;

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{Team, User};
    use crate::storage::sqlite::test_support::temp_storage;
    use crate::storage::{TeamStore, TxManager, UserStore};

    #[tokio::test]
    async fn test_set_active_and_list_active() {
        let (_dir, storage) = temp_storage().await;
        let mut session = storage.acquire().await.unwrap();

        let team = Team::new(
            "web",
            vec![
                User::new("w1", "Ann", "web", true),
                User::new("w2", "Ben", "web", true),
                User::new("w3", "Cat", "web", false),
            ],
        );
        storage.create_team_with_members(&mut session, &team).await.unwrap();

        storage.set_user_active(&mut session, "w2", false).await.unwrap();
        storage.set_user_active(&mut session, "w3", true).await.unwrap();

        let active = storage.list_active_by_team(&mut session, "web").await.unwrap();
        let ids: Vec<&str> = active.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "w3"]);

        let user = storage.get_user(&mut session, "w2").await.unwrap();
        assert_eq!(user.team_name, "web");
        assert!(!user.is_active);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let (_dir, storage) = temp_storage().await;
        let mut session = storage.acquire().await.unwrap();

        assert!(storage.get_user(&mut session, "nobody").await.unwrap_err().is_not_found());
        assert!(storage
            .set_user_active(&mut session, "nobody", true)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(storage.list_active_by_team(&mut session, "none").await.unwrap().is_empty());
    }
}
