//! # Persistent store
//!
//! Low-level SQLite access for users, queue entries, matches, the rating
//! ledger, map sets and leaderboards.
//!
//! Every function takes a `&mut SqliteConnection`. Callers pass a pooled
//! connection or `&mut *tx` from an open transaction, so several calls can be
//! composed into one atomic unit. Functions that perform more than one write
//! open their own (nested) transaction, which SQLite turns into a savepoint
//! when the connection is already inside one.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Error as SqlxError, Sqlite, SqlitePool, Transaction};
use tracing::info;

pub mod leaderboard;
pub mod ledger;
pub mod map_sets;
pub mod matches;
pub mod requests;
pub mod schema;
pub mod users;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/ladder.db";

/// Database URL from `DATABASE_URL`, or the default file location
pub fn db_url() -> String {
    let result = env::var("DATABASE_URL").unwrap_or_else(|_| {
        info!("DATABASE_URL is not set. Using the default.");
        DEFAULT_DATABASE_URL.to_string()
    });
    info!("Using database URL: {}", result);
    result
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Open a pool and make sure the schema exists.
///
/// In-memory databases live and die with a single connection, so the pool is
/// pinned to one connection that never idles out.
pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let in_memory = is_in_memory(url);
    let mut options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections)
    };

    let pool = pool_options.connect_with(options).await?;
    schema::bootstrap(&pool).await?;
    Ok(pool)
}

/// Begin a transaction that takes the write lock with its first statement.
///
/// A deferred transaction that reads first and writes later cannot wait for
/// the lock in WAL mode: SQLite fails the upgrade with SQLITE_BUSY without
/// consulting the busy timeout. Writing to `write_gate` up front makes
/// concurrent writers queue on the busy timeout instead.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, SqlxError> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE write_gate SET taken_at = CURRENT_TIMESTAMP WHERE id = 1")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// A fresh in-memory store, used by tests and dry runs
pub async fn memory_pool() -> Result<SqlitePool, SqlxError> {
    new_pool("sqlite::memory:", 1).await
}
