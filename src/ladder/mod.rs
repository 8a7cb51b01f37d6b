//! Ladder domain logic
//!
//! Pairing, the command coordinator, the expiry sweeper, map assignment and
//! leaderboard rendering.

pub mod coordinator;
pub mod expiry;
pub mod leaderboard;
pub mod maps;
pub mod pairing;

pub use coordinator::{ExpiredRequest, LadderCoordinator};
pub use expiry::ExpirySweeper;
pub use pairing::{Pairing, PairingConfig, PairingStrategy, WeightedPairingEngine};
