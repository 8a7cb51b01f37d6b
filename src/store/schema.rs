//! Table definitions, applied idempotently on startup

use sqlx::SqlitePool;
use tracing::debug;

/// `match_requests` holds active (queued) rows only; the unique index on the
/// owner backs the one-queued-request-per-user rule at the storage level.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        current_rating INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS match_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        requesting_user_id INTEGER NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        request_range INTEGER NOT NULL,
        requested_game_mode TEXT NOT NULL,
        match_request_state TEXT NOT NULL
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS match_requests_one_per_user ON match_requests(requesting_user_id)",
    r#"CREATE TABLE IF NOT EXISTS match_request_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        match_request_id INTEGER NOT NULL,
        requesting_user_id INTEGER NOT NULL REFERENCES users(id),
        request_range INTEGER NOT NULL,
        requested_game_mode TEXT NOT NULL,
        match_request_state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS match_request_history_request ON match_request_history(match_request_id)",
    r#"CREATE TABLE IF NOT EXISTS matches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        match_state TEXT NOT NULL,
        game_mode TEXT NOT NULL,
        p1_user_id INTEGER NOT NULL REFERENCES users(id),
        p2_user_id INTEGER NOT NULL REFERENCES users(id),
        p1_request_id INTEGER NOT NULL,
        p2_request_id INTEGER NOT NULL,
        winner TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS matches_p1 ON matches(p1_user_id, match_state)",
    "CREATE INDEX IF NOT EXISTS matches_p2 ON matches(p2_user_id, match_state)",
    r#"CREATE TABLE IF NOT EXISTS match_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        match_id INTEGER NOT NULL REFERENCES matches(id),
        match_state TEXT NOT NULL,
        game_mode TEXT NOT NULL,
        p1_user_id INTEGER NOT NULL,
        p2_user_id INTEGER NOT NULL,
        winner TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS match_history_match ON match_history(match_id)",
    r#"CREATE TABLE IF NOT EXISTS rating_ledger (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        rating INTEGER NOT NULL,
        match_id INTEGER,
        is_tombstoned BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS rating_ledger_user ON rating_ledger(user_id, is_tombstoned, id)",
    r#"CREATE TABLE IF NOT EXISTS map_sets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        game_mode TEXT NOT NULL,
        maps TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS write_gate (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        taken_at TEXT
    )"#,
    "INSERT OR IGNORE INTO write_gate (id) VALUES (1)",
];

/// Create any missing tables and indexes
pub async fn bootstrap(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!("Schema bootstrap applied {} statements", SCHEMA.len());
    Ok(())
}
