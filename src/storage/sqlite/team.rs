//! Team queries.

use super::{is_unique_violation, SqliteSession, SqliteStorage};
use crate::error::AppError;
use crate::models::{Team, User};
use crate::storage::TeamStore;
use async_trait::async_trait;

#[async_trait]
impl TeamStore for SqliteStorage {
    async fn team_exists(
        &self,
        session: &mut SqliteSession,
        team_name: &str,
    ) -> Result<bool, AppError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT team_name FROM teams WHERE team_name = ?")
            .bind(team_name)
            .fetch_optional(session.conn())
            .await?;

        Ok(row.is_some())
    }

    /// Only call inside a transaction; a failure halfway leaves a partial team.
    async fn create_team_with_members(
        &self,
        session: &mut SqliteSession,
        team: &Team,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO teams (team_name) VALUES (?)")
            .bind(&team.team_name)
            .execute(session.conn())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::already_exists("team", &team.team_name)
                } else {
                    AppError::from(e)
                }
            })?;

        for member in &team.members {
            sqlx::query(
                r#"
                INSERT INTO users (user_id, username, team_name, is_active)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&member.user_id)
            .bind(&member.username)
            .bind(&team.team_name)
            .bind(member.is_active)
            .execute(session.conn())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::already_exists("user", &member.user_id)
                } else {
                    AppError::from(e)
                }
            })?;
        }

        Ok(())
    }

    async fn get_team_with_members(
        &self,
        session: &mut SqliteSession,
        team_name: &str,
    ) -> Result<Team, AppError> {
        if !self.team_exists(session, team_name).await? {
            return Err(AppError::not_found_with_id("team", team_name));
        }

        let members: Vec<User> = sqlx::query_as(
            r#"
            SELECT user_id, username, team_name, is_active
            FROM users
            WHERE team_name = ?
            ORDER BY user_id
            "#,
        )
        .bind(team_name)
        .fetch_all(session.conn())
        .await?;

        Ok(Team {
            team_name: team_name.to_string(),
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::models::{Team, User};
    use crate::storage::sqlite::test_support::temp_storage;
    use crate::storage::{TeamStore, TxManager};

    #[tokio::test]
    async fn test_create_and_read_team() {
        let (_dir, storage) = temp_storage().await;
        let mut session = storage.acquire().await.unwrap();

        let team = Team::new(
            "payments",
            vec![
                User::new("u2", "Bob", "payments", false),
                User::new("u1", "Alice", "payments", true),
            ],
        );
        storage.create_team_with_members(&mut session, &team).await.unwrap();

        let read = storage.get_team_with_members(&mut session, "payments").await.unwrap();
        assert_eq!(read.team_name, "payments");
        let ids: Vec<&str> = read.members.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
        assert!(!read.members[1].is_active);
    }

    #[tokio::test]
    async fn test_duplicate_team_is_already_exists() {
        let (_dir, storage) = temp_storage().await;
        let mut session = storage.acquire().await.unwrap();

        let team = Team::new("core", vec![]);
        storage.create_team_with_members(&mut session, &team).await.unwrap();
        let err = storage.create_team_with_members(&mut session, &team).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists { ref resource, .. } if resource == "team"));
    }

    #[tokio::test]
    async fn test_member_in_another_team_is_already_exists() {
        let (_dir, storage) = temp_storage().await;
        let mut session = storage.acquire().await.unwrap();

        let first = Team::new("a", vec![User::new("shared", "Sam", "a", true)]);
        storage.create_team_with_members(&mut session, &first).await.unwrap();

        let second = Team::new("b", vec![User::new("shared", "Sam", "b", true)]);
        let err = storage.create_team_with_members(&mut session, &second).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists { ref resource, ref id } if resource == "user" && id == "shared"));
    }

    #[tokio::test]
    async fn test_unknown_team_is_not_found() {
        let (_dir, storage) = temp_storage().await;
        let mut session = storage.acquire().await.unwrap();

        let err = storage.get_team_with_members(&mut session, "ghost").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage.team_exists(&mut session, "ghost").await.unwrap());
    }
}
