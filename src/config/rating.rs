//! Rating system configuration

use serde::{Deserialize, Serialize};

use crate::types::Rating;

/// Elo parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Rating assigned on registration
    pub default_rating: Rating,
    /// K-factor for established players
    pub base_k_factor: f64,
    /// K-factor while a player is provisional
    pub provisional_k_factor: f64,
    /// Rated games a player stays provisional for
    pub provisional_games: i64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            default_rating: 1200,
            base_k_factor: 32.0,
            provisional_k_factor: 64.0,
            provisional_games: 10,
        }
    }
}
