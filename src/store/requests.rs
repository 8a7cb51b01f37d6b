//! Queue entries and their audit history
//!
//! Only `Queued` rows live in `match_requests`. Cancelling, expiring or pairing
//! a request deletes the active row and appends a terminal history row.

use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, SqliteConnection};
use tracing::debug;

use crate::error::{LadderError, Result};
use crate::store::matches;
use crate::types::{
    Candidate, GameMode, MatchRequest, MatchRequestHistoryEntry, Rating, RequestId, RequestState,
    UserId,
};

#[derive(Debug, Clone, FromRow)]
struct RequestRow {
    id: i64,
    requesting_user_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    request_range: i32,
    requested_game_mode: String,
    match_request_state: String,
}

impl TryFrom<RequestRow> for MatchRequest {
    type Error = LadderError;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            requesting_user_id: row.requesting_user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            request_range: row.request_range,
            requested_game_mode: row.requested_game_mode.parse()?,
            state: row.match_request_state.parse()?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    request: RequestRow,
    opponent_rating: i32,
}

#[derive(Debug, Clone, FromRow)]
struct HistoryRow {
    id: i64,
    match_request_id: i64,
    requesting_user_id: i64,
    request_range: i32,
    requested_game_mode: String,
    match_request_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for MatchRequestHistoryEntry {
    type Error = LadderError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            match_request_id: row.match_request_id,
            requesting_user_id: row.requesting_user_id,
            request_range: row.request_range,
            requested_game_mode: row.requested_game_mode.parse()?,
            state: row.match_request_state.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// The user's `Queued` request, if any
pub async fn fetch_active(
    user_id: UserId,
    conn: &mut SqliteConnection,
) -> Result<Option<MatchRequest>> {
    let row: Option<RequestRow> =
        sqlx::query_as("SELECT * FROM match_requests WHERE requesting_user_id = $1")
            .bind(user_id)
            .fetch_optional(conn)
            .await?;
    row.map(MatchRequest::try_from).transpose()
}

async fn fetch_active_by_id(
    request_id: RequestId,
    conn: &mut SqliteConnection,
) -> Result<Option<MatchRequest>> {
    let row: Option<RequestRow> = sqlx::query_as("SELECT * FROM match_requests WHERE id = $1")
        .bind(request_id)
        .fetch_optional(conn)
        .await?;
    row.map(MatchRequest::try_from).transpose()
}

async fn append_history(request: &MatchRequest, conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
            INSERT INTO match_request_history (
                match_request_id,
                requesting_user_id,
                request_range,
                requested_game_mode,
                match_request_state,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(request.id)
    .bind(request.requesting_user_id)
    .bind(request.request_range)
    .bind(request.requested_game_mode.as_str())
    .bind(request.state.as_str())
    .bind(request.created_at)
    .bind(request.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Queue a request for `user_id`.
///
/// Fails with `InvariantViolation` if the user already has a queued request or
/// is still seated in a `Matched` match. The checks and the insert share one
/// transaction.
pub async fn enqueue(
    user_id: UserId,
    range: Rating,
    mode: GameMode,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<MatchRequest> {
    let mut tx = conn.begin().await?;

    if fetch_active(user_id, &mut tx).await?.is_some() {
        return Err(LadderError::invariant(
            "Found existing queued match request - if you want to change your elo range dequeue and requeue at the new range, otherwise stand by and you will be paired when a matching player joins!",
        ));
    }
    if matches::fetch_current_match(user_id, &mut tx).await?.is_some() {
        return Err(LadderError::invariant(
            "You appear to have a still open match - please report results for that before queuing again.",
        ));
    }

    let row: RequestRow = sqlx::query_as(
        r#"
            INSERT INTO match_requests (
                requesting_user_id,
                created_at,
                updated_at,
                request_range,
                requested_game_mode,
                match_request_state
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(now)
    .bind(now)
    .bind(range)
    .bind(mode.as_str())
    .bind(RequestState::Queued.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| LadderError::from_write(e, "Queued match request"))?;
    let request = MatchRequest::try_from(row)?;
    append_history(&request, &mut tx).await?;

    tx.commit().await?;
    debug!(
        "Persisted request {} for user {} (range {}, mode {})",
        request.id, user_id, range, mode
    );
    Ok(request)
}

/// Move an active request to a terminal state: history row first, then the active row goes
async fn finish(
    request: MatchRequest,
    state: RequestState,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<MatchRequest> {
    let finished = MatchRequest {
        state,
        updated_at: now,
        ..request
    };
    append_history(&finished, conn).await?;
    sqlx::query("DELETE FROM match_requests WHERE id = $1")
        .bind(finished.id)
        .execute(conn)
        .await?;
    Ok(finished)
}

/// Cancel the user's queued request
pub async fn cancel(
    user_id: UserId,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<MatchRequest> {
    let mut tx = conn.begin().await?;
    let request = fetch_active(user_id, &mut tx)
        .await?
        .ok_or_else(|| LadderError::not_found("You are not currently queued - nothing to do!"))?;
    let cancelled = finish(request, RequestState::Cancelled, now, &mut tx).await?;
    tx.commit().await?;
    Ok(cancelled)
}

/// Mark a queued request as paired. Fails with `NotFound` if it is no longer queued.
pub async fn complete(
    request_id: RequestId,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<MatchRequest> {
    let mut tx = conn.begin().await?;
    let request = fetch_active_by_id(request_id, &mut tx)
        .await?
        .ok_or_else(|| {
            LadderError::not_found(format!("Match request {} is no longer queued", request_id))
        })?;
    let completed = finish(request, RequestState::Completed, now, &mut tx).await?;
    tx.commit().await?;
    Ok(completed)
}

/// Cancel one request if it is still queued and older than `cutoff`.
///
/// Returns `None` when another actor already dequeued, paired or expired it,
/// which keeps repeated sweeps free of side effects.
pub async fn expire_if_stale(
    request_id: RequestId,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<MatchRequest>> {
    let mut tx = conn.begin().await?;
    let request = match fetch_active_by_id(request_id, &mut tx).await? {
        Some(request) if request.created_at < cutoff => request,
        _ => return Ok(None),
    };
    let cancelled = finish(request, RequestState::Cancelled, now, &mut tx).await?;
    tx.commit().await?;
    Ok(Some(cancelled))
}

/// Other users' open requests that are compatible in mode and whose rating gap
/// fits inside both declared ranges, oldest first
pub async fn find_candidates(
    request: &MatchRequest,
    requester_rating: Rating,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Candidate>> {
    let rows: Vec<CandidateRow> = sqlx::query_as(
        r#"
            SELECT mr.*, u.current_rating AS opponent_rating
            FROM match_requests mr
            JOIN users u ON u.id = mr.requesting_user_id
            WHERE mr.requesting_user_id != $1
              AND (mr.requested_game_mode = $2 OR mr.requested_game_mode = 'all' OR $3 = 'all')
              AND ABS(u.current_rating - $4) <= mr.request_range
              AND ABS(u.current_rating - $5) <= $6
            ORDER BY mr.created_at ASC, mr.id ASC
            LIMIT $7
        "#,
    )
    .bind(request.requesting_user_id)
    .bind(request.requested_game_mode.as_str())
    .bind(request.requested_game_mode.as_str())
    .bind(requester_rating)
    .bind(requester_rating)
    .bind(request.request_range)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(Candidate {
                request: MatchRequest::try_from(row.request)?,
                rating: row.opponent_rating,
            })
        })
        .collect()
}

/// Queued requests created before `cutoff`, oldest first
pub async fn fetch_stale(
    cutoff: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<MatchRequest>> {
    let rows: Vec<RequestRow> = sqlx::query_as(
        "SELECT * FROM match_requests WHERE created_at < $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(MatchRequest::try_from).collect()
}

/// Every recorded transition of one request, in order
pub async fn fetch_history(
    request_id: RequestId,
    conn: &mut SqliteConnection,
) -> Result<Vec<MatchRequestHistoryEntry>> {
    let rows: Vec<HistoryRow> = sqlx::query_as(
        "SELECT * FROM match_request_history WHERE match_request_id = $1 ORDER BY updated_at ASC, id ASC",
    )
    .bind(request_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter()
        .map(MatchRequestHistoryEntry::try_from)
        .collect()
}

pub async fn count_queued(conn: &mut SqliteConnection) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM match_requests")
        .fetch_one(conn)
        .await?;
    Ok(count)
}
