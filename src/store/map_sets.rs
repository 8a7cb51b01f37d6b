//! Map pools per game mode, stored as JSON lists

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::error::{LadderError, Result};
use crate::types::{GameMode, MapSet};

#[derive(Debug, Clone, FromRow)]
struct MapSetRow {
    id: i64,
    game_mode: String,
    maps: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MapSetRow> for MapSet {
    type Error = LadderError;

    fn try_from(row: MapSetRow) -> Result<Self> {
        let maps = serde_json::from_str(&row.maps).map_err(|e| LadderError::CorruptState {
            message: format!("Map set {} is not a JSON list: {}", row.id, e),
        })?;
        Ok(Self {
            id: row.id,
            game_mode: row.game_mode.parse()?,
            maps,
            created_at: row.created_at,
        })
    }
}

/// Store a new map pool; the newest pool per mode wins
pub async fn insert_map_set(
    game_mode: GameMode,
    maps: &[String],
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<MapSet> {
    if game_mode == GameMode::All {
        return Err(LadderError::InvalidCommand {
            reason: "Map sets belong to a concrete game mode".to_string(),
        });
    }
    let encoded = serde_json::to_string(maps).map_err(|e| LadderError::InternalError {
        message: format!("Failed to encode map set: {}", e),
    })?;
    let row: MapSetRow = sqlx::query_as(
        "INSERT INTO map_sets (game_mode, maps, created_at) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(game_mode.as_str())
    .bind(encoded)
    .bind(now)
    .fetch_one(conn)
    .await?;
    MapSet::try_from(row)
}

pub async fn fetch_latest_map_set(
    game_mode: GameMode,
    conn: &mut SqliteConnection,
) -> Result<Option<MapSet>> {
    let row: Option<MapSetRow> =
        sqlx::query_as("SELECT * FROM map_sets WHERE game_mode = $1 ORDER BY id DESC LIMIT 1")
            .bind(game_mode.as_str())
            .fetch_optional(conn)
            .await?;
    row.map(MapSet::try_from).transpose()
}
