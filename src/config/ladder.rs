//! Queue, pairing and announcement configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::Rating;

/// Tunables for the queue lifecycle and the pairing score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    /// Age after which a queued request is expired by the sweeper
    pub queue_expiry_seconds: u64,
    /// How often the sweeper runs
    pub sweep_interval_seconds: u64,
    /// Range used when the trigger does not supply one
    pub default_request_range: Rating,
    /// Rating gap at which the rating component of the score reaches zero
    pub rating_delta_floor: f64,
    pub rating_weight: f64,
    pub queue_weight: f64,
    /// Upper bound on candidates scanned per enqueue
    pub candidate_limit: i64,
    /// Role held by queued players
    pub queue_role: String,
    /// Channel receiving pairing, result and expiry announcements
    pub feed_channel: String,
    /// Maximum length of a collated announcement
    pub announcement_chunk_size: usize,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            queue_expiry_seconds: 1800, // 30 minutes
            sweep_interval_seconds: 60,
            default_request_range: 300,
            rating_delta_floor: 600.0,
            rating_weight: 0.3,
            queue_weight: 0.7,
            candidate_limit: 100,
            queue_role: "ladder queue".to_string(),
            feed_channel: "ladder feed".to_string(),
            announcement_chunk_size: 1900,
        }
    }
}

impl LadderConfig {
    pub fn queue_expiry(&self) -> Duration {
        Duration::from_secs(self.queue_expiry_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Expiry threshold in whole minutes, as shown to players
    pub fn queue_expiry_minutes(&self) -> u64 {
        self.queue_expiry_seconds / 60
    }
}
