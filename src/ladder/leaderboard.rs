//! Leaderboard queries and text rendering

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::Result;
use crate::store::leaderboard;
use crate::types::Standing;
use crate::utils::start_of_month;

/// All-time standings ordered by rating
pub async fn elo_leaderboard(conn: &mut SqliteConnection) -> Result<Vec<Standing>> {
    leaderboard::elo_standings(conn).await
}

/// Standings for the current UTC month ordered by wins
pub async fn monthly_leaderboard(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Standing>> {
    leaderboard::win_standings_since(start_of_month(now), conn).await
}

pub fn render_elo_standings(standings: &[Standing]) -> Vec<String> {
    let mut lines = vec!["All time top Elo Ratings: \n".to_string()];
    lines.extend(standings.iter().enumerate().map(|(i, s)| {
        format!(
            "{} - {} - Elo {} - {}W / {}L",
            i + 1,
            s.display_name,
            s.current_rating,
            s.wins,
            s.losses
        )
    }));
    lines
}

pub fn render_monthly_standings(standings: &[Standing]) -> Vec<String> {
    let mut lines = vec!["Total wins this month: \n".to_string()];
    lines.extend(
        standings
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{} - {} - {}W / {}L", i + 1, s.display_name, s.wins, s.losses)),
    );
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendering() {
        let standings = vec![
            Standing {
                user_id: 1,
                display_name: "alice".to_string(),
                current_rating: 1216,
                wins: 1,
                losses: 0,
            },
            Standing {
                user_id: 2,
                display_name: "bob".to_string(),
                current_rating: 1184,
                wins: 0,
                losses: 1,
            },
        ];
        let elo = render_elo_standings(&standings);
        assert_eq!(elo.len(), 3);
        assert_eq!(elo[1], "1 - alice - Elo 1216 - 1W / 0L");
        let monthly = render_monthly_standings(&standings);
        assert_eq!(monthly[2], "2 - bob - 0W / 1L");
    }
}
