//! Rating ledger rows
//!
//! A user's entries form a stack ordered by id. The top non-tombstoned entry is
//! authoritative and `users.current_rating` is only ever written here, in the
//! same transaction as the ledger row that produced it.

use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, SqliteConnection};

use crate::error::{LadderError, Result};
use crate::store::users::UserRow;
use crate::types::{LedgerEntryId, MatchId, Rating, RatingLedgerEntry, User, UserId};

#[derive(Debug, Clone, FromRow)]
struct LedgerRow {
    id: i64,
    user_id: i64,
    rating: i32,
    match_id: Option<i64>,
    is_tombstoned: bool,
    created_at: DateTime<Utc>,
}

impl From<LedgerRow> for RatingLedgerEntry {
    fn from(row: LedgerRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            rating: row.rating,
            match_id: row.match_id,
            is_tombstoned: row.is_tombstoned,
            created_at: row.created_at,
        }
    }
}

async fn set_current_rating(
    user_id: UserId,
    rating: Rating,
    conn: &mut SqliteConnection,
) -> Result<User> {
    let row: Option<UserRow> =
        sqlx::query_as("UPDATE users SET current_rating = $1 WHERE id = $2 RETURNING *")
            .bind(rating)
            .bind(user_id)
            .fetch_optional(conn)
            .await?;
    row.map(User::from)
        .ok_or_else(|| LadderError::not_found(format!("User {} does not exist", user_id)))
}

/// Push a new entry and refresh the rating cache, atomically
pub async fn push_entry(
    user_id: UserId,
    rating: Rating,
    match_id: Option<MatchId>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(User, RatingLedgerEntry)> {
    let mut tx = conn.begin().await?;

    let entry: LedgerRow = sqlx::query_as(
        r#"
            INSERT INTO rating_ledger (user_id, rating, match_id, is_tombstoned, created_at)
            VALUES ($1, $2, $3, FALSE, $4)
            RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(rating)
    .bind(match_id)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;
    let user = set_current_rating(user_id, rating, &mut tx).await?;

    tx.commit().await?;
    Ok((user, entry.into()))
}

/// The newest `limit` live entries, newest first
pub async fn fetch_top_entries(
    user_id: UserId,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<RatingLedgerEntry>> {
    let rows: Vec<LedgerRow> = sqlx::query_as(
        r#"
            SELECT * FROM rating_ledger
            WHERE user_id = $1 AND is_tombstoned = FALSE
            ORDER BY id DESC
            LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(RatingLedgerEntry::from).collect())
}

/// Tombstone `top` and restore the cache from `beneath`, atomically
pub async fn tombstone_top(
    user_id: UserId,
    top: LedgerEntryId,
    restored: Rating,
    conn: &mut SqliteConnection,
) -> Result<User> {
    let mut tx = conn.begin().await?;

    let updated = sqlx::query(
        "UPDATE rating_ledger SET is_tombstoned = TRUE WHERE id = $1 AND user_id = $2 AND is_tombstoned = FALSE",
    )
    .bind(top)
    .bind(user_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if updated != 1 {
        return Err(LadderError::stale(format!(
            "Ledger entry {} of user {} is no longer the live top entry",
            top, user_id
        )));
    }
    let user = set_current_rating(user_id, restored, &mut tx).await?;

    tx.commit().await?;
    Ok(user)
}

/// Live entries produced by matches, i.e. rated games played
pub async fn count_rated_entries(user_id: UserId, conn: &mut SqliteConnection) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
            SELECT COUNT(*) FROM rating_ledger
            WHERE user_id = $1 AND is_tombstoned = FALSE AND match_id IS NOT NULL
        "#,
    )
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

/// Full audit trail including tombstoned entries, newest first
pub async fn fetch_ledger(
    user_id: UserId,
    conn: &mut SqliteConnection,
) -> Result<Vec<RatingLedgerEntry>> {
    let rows: Vec<LedgerRow> =
        sqlx::query_as("SELECT * FROM rating_ledger WHERE user_id = $1 ORDER BY id DESC")
            .bind(user_id)
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().map(RatingLedgerEntry::from).collect())
}
