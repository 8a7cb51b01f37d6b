//! Ladder Queue - 1v1 ranked matchmaking ladder
//!
//! This crate pairs queued players by rating and wait time, records match
//! results as Elo changes in an append-only ledger that supports corrections
//! and cancellations, and expires stale queue entries. Commands arrive over
//! AMQP; announcements and role removals go out through a notification
//! gateway.

pub mod amqp;
pub mod config;
pub mod error;
pub mod ladder;
pub mod metrics;
pub mod rating;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LadderError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::NotificationGateway;
pub use ladder::{ExpirySweeper, LadderCoordinator};
pub use rating::RatingLedger;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
