//! User rows and implicit registration

use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, SqliteConnection};
use tracing::{debug, info};

use crate::error::{LadderError, Result};
use crate::store::ledger;
use crate::types::{Identity, Rating, User, UserId};

#[derive(Debug, Clone, FromRow)]
pub(crate) struct UserRow {
    id: i64,
    external_id: String,
    display_name: String,
    current_rating: i32,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            external_id: row.external_id,
            display_name: row.display_name,
            current_rating: row.current_rating,
            created_at: row.created_at,
        }
    }
}

pub async fn fetch_user(user_id: UserId, conn: &mut SqliteConnection) -> Result<Option<User>> {
    let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(User::from))
}

/// Like [`fetch_user`], but a missing row is a `NotFound`
pub async fn require_user(user_id: UserId, conn: &mut SqliteConnection) -> Result<User> {
    fetch_user(user_id, conn)
        .await?
        .ok_or_else(|| LadderError::not_found(format!("User {} does not exist", user_id)))
}

pub async fn fetch_user_by_external_id(
    external_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<User>> {
    let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE external_id = $1")
        .bind(external_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(User::from))
}

/// Insert a user together with the seed entry on their rating ledger
pub async fn register_user(
    identity: &Identity,
    initial_rating: Rating,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<User> {
    let mut tx = conn.begin().await?;

    let row: UserRow = sqlx::query_as(
        r#"
            INSERT INTO users (external_id, display_name, current_rating, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(&identity.external_id)
    .bind(&identity.display_name)
    .bind(initial_rating)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| LadderError::from_write(e, "User"))?;

    let (user, _seed) = ledger::push_entry(row.id, initial_rating, None, now, &mut tx).await?;
    tx.commit().await?;

    info!(
        "Registered user {} ('{}') with initial rating {}",
        user.id, user.display_name, user.current_rating
    );
    Ok(user)
}

/// Resolve an external identity, registering first-time users and refreshing renamed ones
pub async fn get_or_register(
    identity: &Identity,
    initial_rating: Rating,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<User> {
    match fetch_user_by_external_id(&identity.external_id, conn).await? {
        Some(user) if user.display_name != identity.display_name => {
            debug!(
                "User {} renamed from '{}' to '{}'",
                user.id, user.display_name, identity.display_name
            );
            sqlx::query("UPDATE users SET display_name = $1 WHERE id = $2")
                .bind(&identity.display_name)
                .bind(user.id)
                .execute(conn)
                .await?;
            Ok(User {
                display_name: identity.display_name.clone(),
                ..user
            })
        }
        Some(user) => Ok(user),
        None => register_user(identity, initial_rating, now, conn).await,
    }
}

pub async fn count_users(conn: &mut SqliteConnection) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(conn)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_pool;

    #[tokio::test]
    async fn test_register_creates_seed_entry() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let identity = Identity::new("1001", "alice");

        let user = get_or_register(&identity, 1200, Utc::now(), &mut conn)
            .await
            .unwrap();
        assert_eq!(user.current_rating, 1200);
        assert_eq!(user.display_name, "alice");

        let entries = ledger::fetch_ledger(user.id, &mut conn).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].match_id, None);
        assert_eq!(entries[0].rating, 1200);
    }

    #[tokio::test]
    async fn test_get_or_register_is_stable_and_renames() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let first = get_or_register(&Identity::new("1001", "alice"), 1200, Utc::now(), &mut conn)
            .await
            .unwrap();
        let second = get_or_register(&Identity::new("1001", "alice2"), 1500, Utc::now(), &mut conn)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name, "alice2");
        assert_eq!(second.current_rating, 1200);
        assert_eq!(count_users(&mut conn).await.unwrap(), 1);

        let stored = require_user(first.id, &mut conn).await.unwrap();
        assert_eq!(stored.display_name, "alice2");
    }

    #[tokio::test]
    async fn test_require_missing_user() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let err = require_user(42, &mut conn).await.unwrap_err();
        assert!(matches!(err, LadderError::NotFound { .. }));
    }
}
