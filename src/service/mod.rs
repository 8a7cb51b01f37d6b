//! Service layer for the ladder
//!
//! Application state, start-up and shutdown of the service components, and
//! the health checks behind the HTTP probes.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthContext, HealthStatus, LadderStats};
