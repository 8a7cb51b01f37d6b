//! Win/loss aggregation over completed matches

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::error::Result;
use crate::types::Standing;

#[derive(Debug, Clone, FromRow)]
struct StandingRow {
    user_id: i64,
    display_name: String,
    current_rating: i32,
    wins: i64,
    losses: i64,
}

impl From<StandingRow> for Standing {
    fn from(row: StandingRow) -> Self {
        Self {
            user_id: row.user_id,
            display_name: row.display_name,
            current_rating: row.current_rating,
            wins: row.wins,
            losses: row.losses,
        }
    }
}

/// All users by rating, with all-time record
pub async fn elo_standings(conn: &mut SqliteConnection) -> Result<Vec<Standing>> {
    let rows: Vec<StandingRow> = sqlx::query_as(
        r#"
            SELECT
                u.id AS user_id,
                u.display_name,
                u.current_rating,
                (SELECT COUNT(*) FROM matches m
                    WHERE m.match_state = 'completed'
                      AND ((m.p1_user_id = u.id AND m.winner = 'p1')
                        OR (m.p2_user_id = u.id AND m.winner = 'p2'))) AS wins,
                (SELECT COUNT(*) FROM matches m
                    WHERE m.match_state = 'completed'
                      AND ((m.p1_user_id = u.id AND m.winner = 'p2')
                        OR (m.p2_user_id = u.id AND m.winner = 'p1'))) AS losses
            FROM users u
            ORDER BY u.current_rating DESC, u.id ASC
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(Standing::from).collect())
}

/// All users by wins in matches created since `since`
pub async fn win_standings_since(
    since: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Standing>> {
    let rows: Vec<StandingRow> = sqlx::query_as(
        r#"
            SELECT
                u.id AS user_id,
                u.display_name,
                u.current_rating,
                (SELECT COUNT(*) FROM matches m
                    WHERE m.match_state = 'completed' AND m.created_at >= $1
                      AND ((m.p1_user_id = u.id AND m.winner = 'p1')
                        OR (m.p2_user_id = u.id AND m.winner = 'p2'))) AS wins,
                (SELECT COUNT(*) FROM matches m
                    WHERE m.match_state = 'completed' AND m.created_at >= $2
                      AND ((m.p1_user_id = u.id AND m.winner = 'p2')
                        OR (m.p2_user_id = u.id AND m.winner = 'p1'))) AS losses
            FROM users u
            ORDER BY wins DESC, u.current_rating DESC, u.id ASC
        "#,
    )
    .bind(since)
    .bind(since)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(Standing::from).collect())
}
