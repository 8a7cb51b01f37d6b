//! Health checks for the ladder service
//!
//! Readiness depends on the store answering a ping; liveness only on the
//! service having been started.

use crate::amqp::AmqpConnection;
use crate::store::{matches, requests, users};
use crate::types::MatchState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Value exported on the health gauge
    pub fn as_gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Everything the health checks need to look at
#[derive(Clone)]
pub struct HealthContext {
    service_name: String,
    pool: SqlitePool,
    running: Arc<RwLock<bool>>,
    amqp: Option<Arc<AmqpConnection>>,
}

impl HealthContext {
    pub fn new(service_name: impl Into<String>, pool: SqlitePool, running: Arc<RwLock<bool>>) -> Self {
        Self {
            service_name: service_name.into(),
            pool,
            running,
            amqp: None,
        }
    }

    /// Also report on the broker connection
    pub fn with_amqp(mut self, connection: Arc<AmqpConnection>) -> Self {
        self.amqp = Some(connection);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: LadderStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Snapshot of the ladder's stored state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderStats {
    pub queued_requests: i64,
    pub matches_in_progress: i64,
    pub matches_completed: i64,
    pub matches_cancelled: i64,
    pub registered_users: i64,
}

impl HealthCheck {
    /// Perform a full health check of the service
    pub async fn check(ctx: &HealthContext) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(ctx).await,
            Self::check_database(ctx).await,
            Self::check_amqp(ctx),
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        let stats = match Self::gather_stats(ctx.pool()).await {
            Ok(stats) => stats,
            Err(e) => {
                debug!("Failed to gather ladder stats for health check: {}", e);
                LadderStats::default()
            }
        };

        Ok(HealthCheck {
            status,
            service: ctx.service_name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(ctx: &HealthContext) -> Result<HealthStatus> {
        if ctx.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the service is running and the store answers
    pub async fn readiness_check(ctx: &HealthContext) -> Result<HealthStatus> {
        if !ctx.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(Self::check_database(ctx).await.status)
    }

    async fn check_service_running(ctx: &HealthContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if ctx.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_database(ctx: &HealthContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match sqlx::query("SELECT 1").execute(ctx.pool()).await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Database ping failed: {}", e);
                (HealthStatus::Unhealthy, Some(format!("Ping failed: {}", e)))
            }
        };

        ComponentCheck {
            name: "database".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp(ctx: &HealthContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match &ctx.amqp {
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Degraded,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Healthy,
                Some("AMQP disabled, notifications are logged".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Count queue entries, matches per state and users
    pub async fn gather_stats(pool: &SqlitePool) -> crate::error::Result<LadderStats> {
        let mut conn = pool.acquire().await?;
        Ok(LadderStats {
            queued_requests: requests::count_queued(&mut conn).await?,
            matches_in_progress: matches::count_in_state(MatchState::Matched, &mut conn).await?,
            matches_completed: matches::count_in_state(MatchState::Completed, &mut conn).await?,
            matches_cancelled: matches::count_in_state(MatchState::Cancelled, &mut conn).await?,
            registered_users: users::count_users(&mut conn).await?,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
