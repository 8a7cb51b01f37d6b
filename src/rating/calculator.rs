//! Rating calculator trait
//!
//! This module defines the interface for two-player rating updates.

use crate::types::{GameMode, Rating};

/// Trait for calculating rating changes after a 1v1 result
pub trait RatingCalculator: Send + Sync {
    /// K-factor for a player with `rated_games` live results playing in `mode`
    fn k_factor(&self, rated_games: i64, mode: GameMode) -> f64;

    /// Expected score of `rating` against `opponent`, in `[0, 1]`
    fn expected_score(&self, rating: Rating, opponent: Rating) -> f64;

    /// New ratings for A and B after a decisive result
    ///
    /// # Arguments
    /// * `rating_a`, `rating_b` - ratings before the game
    /// * `a_won` - whether A won
    /// * `k_a`, `k_b` - each player's K-factor
    fn compute_new_ratings(
        &self,
        rating_a: Rating,
        rating_b: Rating,
        a_won: bool,
        k_a: f64,
        k_b: f64,
    ) -> (Rating, Rating);

    /// Rating given to newly registered players
    fn initial_rating(&self) -> Rating;
}
