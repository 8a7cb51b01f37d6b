//! Rating ledger: apply and revert rating changes
//!
//! Each user's ledger is an append-only stack. Applying pushes a new entry,
//! reverting tombstones the top entry and restores the one beneath it. The
//! user's cached `current_rating` is refreshed in the same transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info};

use crate::error::{LadderError, Result};
use crate::rating::RatingCalculator;
use crate::store::ledger;
use crate::types::{GameMode, MatchId, Rating, User, UserId};

/// Ledger operations over a connection or an open transaction
#[derive(Clone)]
pub struct RatingLedger {
    calculator: Arc<dyn RatingCalculator>,
}

impl RatingLedger {
    pub fn new(calculator: Arc<dyn RatingCalculator>) -> Self {
        Self { calculator }
    }

    pub fn calculator(&self) -> &Arc<dyn RatingCalculator> {
        &self.calculator
    }

    /// K-factor from the user's live rated-game count and the game mode
    pub async fn k_factor_for(
        &self,
        user_id: UserId,
        mode: GameMode,
        conn: &mut SqliteConnection,
    ) -> Result<f64> {
        let rated_games = ledger::count_rated_entries(user_id, conn).await?;
        Ok(self.calculator.k_factor(rated_games, mode))
    }

    /// Record `new_rating` for `user_id` as the result of `match_id`
    pub async fn apply(
        &self,
        user_id: UserId,
        new_rating: Rating,
        match_id: MatchId,
        now: DateTime<Utc>,
        conn: &mut SqliteConnection,
    ) -> Result<User> {
        let (user, entry) = ledger::push_entry(user_id, new_rating, Some(match_id), now, conn).await?;
        debug!(
            "Ledger entry {} for user {}: rating {} from match {}",
            entry.id, user_id, new_rating, match_id
        );
        Ok(user)
    }

    /// Undo the user's most recent rating change.
    ///
    /// Needs at least two live entries; the seed entry is never reverted.
    pub async fn revert(&self, user_id: UserId, conn: &mut SqliteConnection) -> Result<User> {
        let mut tx = conn.begin().await?;
        let top = ledger::fetch_top_entries(user_id, 2, &mut tx).await?;
        let (current, previous) = match top.as_slice() {
            [current, previous] => (current, previous),
            _ => return Err(LadderError::InsufficientHistory { user_id }),
        };

        let user = ledger::tombstone_top(user_id, current.id, previous.rating, &mut tx).await?;
        tx.commit().await?;
        info!(
            "Reverted rating of user {}: {} -> {} (tombstoned entry {})",
            user_id, current.rating, previous.rating, current.id
        );
        Ok(user)
    }
}
