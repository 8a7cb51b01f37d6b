//! Metrics and monitoring for the ladder service
//!
//! Prometheus metric groups plus the HTTP server exposing them alongside the
//! health probes and leaderboards.

pub mod collector;
pub mod health;

pub use collector::{
    MatchMetrics, MetricsCollector, MetricsTimer, QueueMetrics, RatingMetrics, ServiceMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
