//! Pairing engine for selecting an opponent from open requests
//!
//! Scoring is a pure function of the requester's rating, each candidate's
//! rating and how long the candidate has been waiting. Callers supply `now`.

use chrono::{DateTime, Utc};

use crate::config::LadderConfig;
use crate::types::{Candidate, GameMode, MatchRequest, Rating};
use crate::utils::rating_difference;

/// Outcome of pairing a requester against the candidate pool
#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    pub candidate: Candidate,
    /// Concrete (or agreed) format of the resulting match
    pub game_mode: GameMode,
    pub priority: f64,
}

/// Weights of the pairing score
#[derive(Debug, Clone, PartialEq)]
pub struct PairingConfig {
    /// Rating gap at which the rating component reaches zero
    pub rating_delta_floor: f64,
    /// Wait time at which the queue component reaches 1.0 (it keeps growing past it)
    pub max_seconds_in_queue: f64,
    pub rating_weight: f64,
    pub queue_weight: f64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            rating_delta_floor: 600.0,
            max_seconds_in_queue: 1800.0,
            rating_weight: 0.3,
            queue_weight: 0.7,
        }
    }
}

impl From<&LadderConfig> for PairingConfig {
    fn from(config: &LadderConfig) -> Self {
        Self {
            rating_delta_floor: config.rating_delta_floor,
            max_seconds_in_queue: config.queue_expiry_seconds as f64,
            rating_weight: config.rating_weight,
            queue_weight: config.queue_weight,
        }
    }
}

/// Trait for opponent selection algorithms
pub trait PairingStrategy: Send + Sync {
    /// Score one candidate for the requester (higher = better)
    fn priority(&self, requester_rating: Rating, candidate: &Candidate, now: DateTime<Utc>) -> f64;

    /// Pick the best candidate, if any
    fn select_best_pairing(
        &self,
        request: &MatchRequest,
        requester_rating: Rating,
        candidates: &[Candidate],
        now: DateTime<Utc>,
    ) -> Option<Pairing>;
}

/// Weighted rating-closeness and wait-time scorer
#[derive(Debug, Clone, Default)]
pub struct WeightedPairingEngine {
    config: PairingConfig,
}

impl WeightedPairingEngine {
    pub fn new(config: PairingConfig) -> Self {
        Self { config }
    }

    /// 1.0 at equal rating, falling linearly to 0.0 at the delta floor
    pub fn rating_fraction(&self, requester_rating: Rating, candidate_rating: Rating) -> f64 {
        let delta = rating_difference(requester_rating, candidate_rating) as f64;
        (1.0 - delta / self.config.rating_delta_floor).max(0.0)
    }

    /// Seconds waited over the queue horizon, uncapped
    pub fn queue_fraction(&self, candidate: &MatchRequest, now: DateTime<Utc>) -> f64 {
        candidate.seconds_waited(now) / self.config.max_seconds_in_queue
    }
}

impl PairingStrategy for WeightedPairingEngine {
    fn priority(&self, requester_rating: Rating, candidate: &Candidate, now: DateTime<Utc>) -> f64 {
        self.config.rating_weight * self.rating_fraction(requester_rating, candidate.rating)
            + self.config.queue_weight * self.queue_fraction(&candidate.request, now)
    }

    fn select_best_pairing(
        &self,
        request: &MatchRequest,
        requester_rating: Rating,
        candidates: &[Candidate],
        now: DateTime<Utc>,
    ) -> Option<Pairing> {
        let mut best: Option<(&Candidate, f64)> = None;

        // `>=` lets a later candidate with an equal score replace the running best.
        for candidate in candidates {
            let priority = self.priority(requester_rating, candidate, now);
            if best.map_or(true, |(_, best_priority)| priority >= best_priority) {
                best = Some((candidate, priority));
            }
        }

        best.map(|(candidate, priority)| Pairing {
            candidate: candidate.clone(),
            game_mode: GameMode::resolve(
                request.requested_game_mode,
                candidate.request.requested_game_mode,
            ),
            priority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestState;
    use chrono::Duration;
    use proptest::prelude::*;

    fn request(id: i64, mode: GameMode, created_at: DateTime<Utc>) -> MatchRequest {
        MatchRequest {
            id,
            requesting_user_id: id,
            created_at,
            updated_at: created_at,
            request_range: 600,
            requested_game_mode: mode,
            state: RequestState::Queued,
        }
    }

    fn candidate(id: i64, rating: Rating, mode: GameMode, created_at: DateTime<Utc>) -> Candidate {
        Candidate {
            request: request(id, mode, created_at),
            rating,
        }
    }

    #[test]
    fn test_sole_equal_rated_candidate_is_selected() {
        let engine = WeightedPairingEngine::default();
        let now = Utc::now();
        let me = request(100, GameMode::Bo1, now);
        let pool = vec![candidate(1, 1500, GameMode::Bo1, now)];

        let pairing = engine.select_best_pairing(&me, 1500, &pool, now).unwrap();
        assert_eq!(pairing.candidate.request.id, 1);
        assert!((pairing.priority - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_wait_time_dominates_rating() {
        let engine = WeightedPairingEngine::default();
        let now = Utc::now();
        let me = request(100, GameMode::All, now);
        let pool = vec![
            candidate(1, 1200, GameMode::All, now - Duration::minutes(20)),
            candidate(2, 800, GameMode::All, now),
            candidate(3, 1200, GameMode::All, now),
        ];

        let pairing = engine.select_best_pairing(&me, 800, &pool, now).unwrap();
        assert_eq!(pairing.candidate.request.id, 1);
    }

    #[test]
    fn test_ties_go_to_later_candidate() {
        let engine = WeightedPairingEngine::default();
        let now = Utc::now();
        let created = now - Duration::minutes(5);
        let me = request(100, GameMode::Bo3, now);
        let pool = vec![
            candidate(1, 1400, GameMode::Bo3, created),
            candidate(2, 1400, GameMode::Bo3, created),
        ];

        let pairing = engine.select_best_pairing(&me, 1400, &pool, now).unwrap();
        assert_eq!(pairing.candidate.request.id, 2);
    }

    #[test]
    fn test_empty_pool() {
        let engine = WeightedPairingEngine::default();
        let now = Utc::now();
        let me = request(100, GameMode::Bo1, now);
        assert!(engine.select_best_pairing(&me, 1200, &[], now).is_none());
    }

    #[test]
    fn test_mode_resolution_on_selected_pairing() {
        let engine = WeightedPairingEngine::default();
        let now = Utc::now();

        let me = request(100, GameMode::All, now);
        let pool = vec![candidate(1, 1200, GameMode::All, now)];
        let pairing = engine.select_best_pairing(&me, 1200, &pool, now).unwrap();
        assert_eq!(pairing.game_mode, GameMode::Bo3);

        let pool = vec![candidate(1, 1200, GameMode::Bo1, now)];
        let pairing = engine.select_best_pairing(&me, 1200, &pool, now).unwrap();
        assert_eq!(pairing.game_mode, GameMode::Bo1);

        let me = request(100, GameMode::Bo1, now);
        let pool = vec![candidate(1, 1200, GameMode::All, now)];
        let pairing = engine.select_best_pairing(&me, 1200, &pool, now).unwrap();
        assert_eq!(pairing.game_mode, GameMode::Bo1);
    }

    #[test]
    fn test_score_components() {
        let engine = WeightedPairingEngine::default();
        let now = Utc::now();
        assert_eq!(engine.rating_fraction(1200, 1200), 1.0);
        assert!((engine.rating_fraction(1200, 1500) - 0.5).abs() < 1e-9);
        assert_eq!(engine.rating_fraction(1200, 2000), 0.0);

        let waited_an_hour = request(1, GameMode::Bo1, now - Duration::hours(1));
        assert!((engine.queue_fraction(&waited_an_hour, now) - 2.0).abs() < 1e-6);
        let future = request(2, GameMode::Bo1, now + Duration::minutes(1));
        assert_eq!(engine.queue_fraction(&future, now), 0.0);
    }

    #[test]
    fn test_config_follows_ladder_settings() {
        let ladder = LadderConfig {
            queue_expiry_seconds: 900,
            ..LadderConfig::default()
        };
        let config = PairingConfig::from(&ladder);
        assert_eq!(config.max_seconds_in_queue, 900.0);
        assert_eq!(config.rating_weight, 0.3);
    }

    proptest! {
        #[test]
        fn selected_candidate_has_maximal_priority(
            ratings in proptest::collection::vec(400i32..2400, 1..20),
            waits in proptest::collection::vec(0i64..7200, 20),
            requester_rating in 400i32..2400,
        ) {
            let engine = WeightedPairingEngine::default();
            let now = Utc::now();
            let me = request(1000, GameMode::All, now);
            let pool: Vec<Candidate> = ratings
                .iter()
                .enumerate()
                .map(|(i, r)| candidate(i as i64, *r, GameMode::All, now - Duration::seconds(waits[i])))
                .collect();

            let best = engine.select_best_pairing(&me, requester_rating, &pool, now).unwrap();
            for c in &pool {
                prop_assert!(engine.priority(requester_rating, c, now) <= best.priority);
            }
        }
    }
}
