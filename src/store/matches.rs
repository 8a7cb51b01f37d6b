//! Matches and their append-only snapshot history

use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, SqliteConnection};
use tracing::debug;

use crate::error::{LadderError, Result};
use crate::store::requests;
use crate::types::{
    GameMode, Match, MatchHistoryEntry, MatchId, MatchRequest, MatchState, UserId, WhoWon,
};

#[derive(Debug, Clone, FromRow)]
struct MatchRow {
    id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    match_state: String,
    game_mode: String,
    p1_user_id: i64,
    p2_user_id: i64,
    p1_request_id: i64,
    p2_request_id: i64,
    winner: String,
}

impl TryFrom<MatchRow> for Match {
    type Error = LadderError;

    fn try_from(row: MatchRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            state: row.match_state.parse()?,
            game_mode: row.game_mode.parse()?,
            p1_user_id: row.p1_user_id,
            p2_user_id: row.p2_user_id,
            p1_request_id: row.p1_request_id,
            p2_request_id: row.p2_request_id,
            winner: row.winner.parse()?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct MatchHistoryRow {
    id: i64,
    match_id: i64,
    match_state: String,
    game_mode: String,
    p1_user_id: i64,
    p2_user_id: i64,
    winner: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<MatchHistoryRow> for MatchHistoryEntry {
    type Error = LadderError;

    fn try_from(row: MatchHistoryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            match_id: row.match_id,
            state: row.match_state.parse()?,
            game_mode: row.game_mode.parse()?,
            p1_user_id: row.p1_user_id,
            p2_user_id: row.p2_user_id,
            winner: row.winner.parse()?,
            recorded_at: row.recorded_at,
        })
    }
}

async fn append_history(m: &Match, conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
            INSERT INTO match_history (
                match_id,
                match_state,
                game_mode,
                p1_user_id,
                p2_user_id,
                winner,
                recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(m.id)
    .bind(m.state.as_str())
    .bind(m.game_mode.as_str())
    .bind(m.p1_user_id)
    .bind(m.p2_user_id)
    .bind(m.winner.as_str())
    .bind(m.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Pair two queued requests.
///
/// In one transaction: refuse if either player already sits in a `Matched`
/// match, insert the match with its first history row, and complete both
/// requests. `p1` is the waiting candidate, `p2` the requester.
pub async fn create_from_requests(
    p1_request: &MatchRequest,
    p2_request: &MatchRequest,
    game_mode: GameMode,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Match> {
    if p1_request.requesting_user_id == p2_request.requesting_user_id {
        return Err(LadderError::invariant("A player cannot be paired against themselves"));
    }

    let mut tx = conn.begin().await?;

    for user_id in [p1_request.requesting_user_id, p2_request.requesting_user_id] {
        if let Some(current) = fetch_current_match(user_id, &mut tx).await? {
            return Err(LadderError::invariant(format!(
                "User {} is already in open match {}",
                user_id, current.id
            )));
        }
    }

    let row: MatchRow = sqlx::query_as(
        r#"
            INSERT INTO matches (
                created_at,
                updated_at,
                match_state,
                game_mode,
                p1_user_id,
                p2_user_id,
                p1_request_id,
                p2_request_id,
                winner
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(MatchState::Matched.as_str())
    .bind(game_mode.as_str())
    .bind(p1_request.requesting_user_id)
    .bind(p2_request.requesting_user_id)
    .bind(p1_request.id)
    .bind(p2_request.id)
    .bind(WhoWon::Undefined.as_str())
    .fetch_one(&mut *tx)
    .await?;
    let created = Match::try_from(row)?;
    append_history(&created, &mut tx).await?;

    requests::complete(p1_request.id, now, &mut tx).await?;
    requests::complete(p2_request.id, now, &mut tx).await?;

    tx.commit().await?;
    debug!(
        "Created match {} ({}) between users {} and {}",
        created.id, created.game_mode, created.p1_user_id, created.p2_user_id
    );
    Ok(created)
}

/// The user's match in state `Matched`, if any
pub async fn fetch_current_match(
    user_id: UserId,
    conn: &mut SqliteConnection,
) -> Result<Option<Match>> {
    let row: Option<MatchRow> = sqlx::query_as(
        r#"
            SELECT * FROM matches
            WHERE match_state = 'matched' AND (p1_user_id = $1 OR p2_user_id = $2)
            ORDER BY id DESC
            LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    row.map(Match::try_from).transpose()
}

/// The user's latest match in any state
pub async fn fetch_most_recent_match(
    user_id: UserId,
    conn: &mut SqliteConnection,
) -> Result<Option<Match>> {
    let row: Option<MatchRow> = sqlx::query_as(
        r#"
            SELECT * FROM matches
            WHERE p1_user_id = $1 OR p2_user_id = $2
            ORDER BY id DESC
            LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    row.map(Match::try_from).transpose()
}

pub async fn fetch_match(match_id: MatchId, conn: &mut SqliteConnection) -> Result<Option<Match>> {
    let row: Option<MatchRow> = sqlx::query_as("SELECT * FROM matches WHERE id = $1")
        .bind(match_id)
        .fetch_optional(conn)
        .await?;
    row.map(Match::try_from).transpose()
}

/// Set state and winner and append a snapshot, returning the persisted match
pub async fn update_state(
    match_id: MatchId,
    state: MatchState,
    winner: WhoWon,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Match> {
    let mut tx = conn.begin().await?;

    let row: Option<MatchRow> = sqlx::query_as(
        r#"
            UPDATE matches
            SET match_state = $1, winner = $2, updated_at = $3
            WHERE id = $4
            RETURNING *;
        "#,
    )
    .bind(state.as_str())
    .bind(winner.as_str())
    .bind(now)
    .bind(match_id)
    .fetch_optional(&mut *tx)
    .await?;
    let updated = match row {
        Some(row) => Match::try_from(row)?,
        None => {
            return Err(LadderError::not_found(format!(
                "Match {} does not exist",
                match_id
            )))
        }
    };
    append_history(&updated, &mut tx).await?;

    tx.commit().await?;
    Ok(updated)
}

/// Every snapshot of one match, oldest first
pub async fn fetch_history(
    match_id: MatchId,
    conn: &mut SqliteConnection,
) -> Result<Vec<MatchHistoryEntry>> {
    let rows: Vec<MatchHistoryRow> =
        sqlx::query_as("SELECT * FROM match_history WHERE match_id = $1 ORDER BY id ASC")
            .bind(match_id)
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(MatchHistoryEntry::try_from).collect()
}

pub async fn count_in_state(state: MatchState, conn: &mut SqliteConnection) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matches WHERE match_state = $1")
        .bind(state.as_str())
        .fetch_one(conn)
        .await?;
    Ok(count)
}
