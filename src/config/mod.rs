//! Configuration management for the ladder service
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values.

pub mod app;
pub mod ladder;
pub mod rating;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, DatabaseSettings, ServiceSettings};
pub use ladder::LadderConfig;
pub use rating::RatingConfig;
