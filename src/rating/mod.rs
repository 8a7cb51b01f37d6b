//! Elo rating system with an undoable per-user ledger
//!
//! This module provides the rating calculator (expected score, K-factor policy)
//! on top of the skillratings crate, and the ledger that applies and reverts
//! rating changes against the persistent store.

pub mod calculator;
pub mod elo;
pub mod ledger;

// Re-export commonly used types
pub use calculator::RatingCalculator;
pub use elo::EloCalculator;
pub use ledger::RatingLedger;
