//! Elo implementation backed by skillratings
//!
//! Expected score is the standard logistic curve
//! `E = 1 / (1 + 10^((other - self) / 400))`. New ratings are
//! `old + k * (actual - expected)` truncated toward zero.

use skillratings::elo::{expected_score, EloRating};

use crate::config::RatingConfig;
use crate::rating::calculator::RatingCalculator;
use crate::types::{GameMode, Rating};

/// Elo calculator with provisional and Bo1 K-factor adjustments
#[derive(Debug, Clone, Default)]
pub struct EloCalculator {
    config: RatingConfig,
}

impl EloCalculator {
    pub fn new(config: RatingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    fn updated(old: Rating, k: f64, actual: f64, expected: f64) -> Rating {
        (old as f64 + k * (actual - expected)).trunc() as Rating
    }
}

impl RatingCalculator for EloCalculator {
    fn k_factor(&self, rated_games: i64, mode: GameMode) -> f64 {
        let k = if rated_games < self.config.provisional_games {
            self.config.provisional_k_factor
        } else {
            self.config.base_k_factor
        };
        match mode {
            GameMode::Bo1 => k / 2.0,
            GameMode::Bo3 | GameMode::All => k,
        }
    }

    fn expected_score(&self, rating: Rating, opponent: Rating) -> f64 {
        let (expected, _) = expected_score(
            &EloRating {
                rating: rating as f64,
            },
            &EloRating {
                rating: opponent as f64,
            },
        );
        expected
    }

    fn compute_new_ratings(
        &self,
        rating_a: Rating,
        rating_b: Rating,
        a_won: bool,
        k_a: f64,
        k_b: f64,
    ) -> (Rating, Rating) {
        let expected_a = self.expected_score(rating_a, rating_b);
        let expected_b = self.expected_score(rating_b, rating_a);
        let (actual_a, actual_b) = if a_won { (1.0, 0.0) } else { (0.0, 1.0) };

        (
            Self::updated(rating_a, k_a, actual_a, expected_a),
            Self::updated(rating_b, k_b, actual_b, expected_b),
        )
    }

    fn initial_rating(&self) -> Rating {
        self.config.default_rating
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn calculator() -> EloCalculator {
        EloCalculator::default()
    }

    #[test]
    fn test_reference_vectors() {
        let calc = calculator();
        assert_eq!(calc.compute_new_ratings(2600, 2300, true, 32.0, 32.0), (2604, 2295));
        assert_eq!(calc.compute_new_ratings(2600, 2300, false, 32.0, 32.0), (2572, 2327));
    }

    #[test]
    fn test_truncation_with_fractional_k() {
        let calc = calculator();
        // The loss rounds away from the old rating, the gain toward it
        assert_eq!(calc.compute_new_ratings(2706, 100, false, 61.0546, 61.0546), (2644, 161));
    }

    #[test]
    fn test_equal_ratings_split_k() {
        let calc = calculator();
        assert_eq!(calc.compute_new_ratings(1200, 1200, true, 32.0, 32.0), (1216, 1184));
        assert_eq!(calc.compute_new_ratings(1200, 1200, false, 32.0, 32.0), (1184, 1216));
    }

    #[test]
    fn test_expected_score_curve() {
        let calc = calculator();
        assert!((calc.expected_score(1500, 1500) - 0.5).abs() < 1e-9);
        let favourite = calc.expected_score(1900, 1500);
        assert!((favourite - 1.0 / 11.0 * 10.0).abs() < 1e-9);
        assert!((favourite + calc.expected_score(1500, 1900) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_k_factor_policy() {
        let calc = calculator();
        assert_eq!(calc.k_factor(0, GameMode::Bo3), 64.0);
        assert_eq!(calc.k_factor(9, GameMode::Bo3), 64.0);
        assert_eq!(calc.k_factor(10, GameMode::Bo3), 32.0);
        assert_eq!(calc.k_factor(0, GameMode::Bo1), 32.0);
        assert_eq!(calc.k_factor(25, GameMode::Bo1), 16.0);
    }

    #[test]
    fn test_initial_rating_from_config() {
        let calc = EloCalculator::new(RatingConfig {
            default_rating: 1000,
            ..RatingConfig::default()
        });
        assert_eq!(calc.initial_rating(), 1000);
    }

    proptest! {
        #[test]
        fn winner_never_loses_points(a in 100i32..3000, b in 100i32..3000, a_won: bool) {
            let calc = calculator();
            let (new_a, new_b) = calc.compute_new_ratings(a, b, a_won, 32.0, 32.0);
            if a_won {
                prop_assert!(new_a >= a);
                prop_assert!(new_b <= b);
            } else {
                prop_assert!(new_a <= a);
                prop_assert!(new_b >= b);
            }
        }

        #[test]
        fn swing_never_exceeds_k_rounded_up(a in 100i32..3000, b in 100i32..3000, a_won: bool, k in 1.0f64..64.0) {
            let calc = calculator();
            let (new_a, new_b) = calc.compute_new_ratings(a, b, a_won, k, k);
            // Truncating a loss can round it one point past a fractional K
            prop_assert!(((new_a - a).abs() as f64) <= k.ceil());
            prop_assert!(((new_b - b).abs() as f64) <= k.ceil());
        }
    }
}
