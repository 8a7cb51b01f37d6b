//! Health check endpoints and Prometheus metrics server
//!
//! Serves probes, the Prometheus scrape endpoint, a JSON stats page and the
//! two leaderboards over HTTP using Axum.

use crate::ladder::leaderboard::{elo_leaderboard, monthly_leaderboard};
use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use crate::types::Standing;
use crate::utils::current_timestamp;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub context: Option<Arc<HealthContext>>,
}

/// HTTP server for probes, metrics and leaderboards
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                context: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the service state the probes inspect
    pub fn with_context(mut self, context: Arc<HealthContext>) -> Self {
        self.state.context = Some(context);
        self
    }

    /// Bind and serve until [`HealthServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("Serving probes, metrics and leaderboards on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("Health server failed")?;

        info!("Health server on {} stopped", addr);
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .route("/leaderboard/{board}", get(leaderboard_handler))
            .with_state(self.state.clone())
    }

    /// Ask a running [`HealthServer::start`] to finish in-flight requests and return
    pub fn stop(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Health server was not running");
        }
    }
}

/// Paths served, listed by `/`
const ENDPOINTS: [&str; 7] = [
    "/health",
    "/ready",
    "/alive",
    "/metrics",
    "/stats",
    "/leaderboard/elo",
    "/leaderboard/monthly",
];

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": HealthStatus::Unhealthy,
            "version": env!("CARGO_PKG_VERSION"),
            "error": "Ladder not started yet"
        })),
    )
        .into_response()
}

/// Plain-text probe answer: 503 only when the check failed or reported unhealthy
fn probe(name: &str, result: Result<HealthStatus>) -> Response {
    let status = result.unwrap_or_else(|e| {
        error!("{} probe failed: {}", name, e);
        HealthStatus::Unhealthy
    });
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, format!("{}: {}", name, status)).into_response()
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "ladder-queue",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> Response {
    let Some(ctx) = &state.context else {
        return not_initialized();
    };

    let status = HealthCheck::liveness_check(ctx)
        .await
        .unwrap_or(HealthStatus::Unhealthy);
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": ctx.service_name(),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

async fn ready_handler(State(state): State<HealthServerState>) -> Response {
    match &state.context {
        Some(ctx) => probe("ready", HealthCheck::readiness_check(ctx).await),
        None => not_initialized(),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> Response {
    match &state.context {
        Some(ctx) => probe("alive", HealthCheck::liveness_check(ctx).await),
        None => not_initialized(),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    match encode_metrics(&state.metrics_collector) {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Metrics scrape failed: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

/// Render every registered metric family in the Prometheus text format
pub fn encode_metrics(collector: &MetricsCollector) -> Result<String> {
    let families = collector.registry().gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output was not UTF-8")
}

async fn stats_handler(State(state): State<HealthServerState>) -> Response {
    let Some(ctx) = &state.context else {
        return not_initialized();
    };

    match HealthCheck::check(ctx).await {
        Ok(health) => Json(json!({
            "service": {
                "name": health.service,
                "version": health.version,
                "status": health.status
            },
            "queue": {
                "waiting": health.stats.queued_requests
            },
            "matches": {
                "in_progress": health.stats.matches_in_progress,
                "completed": health.stats.matches_completed,
                "cancelled": health.stats.matches_cancelled
            },
            "users": health.stats.registered_users,
            "components": health.checks,
            "timestamp": health.timestamp
        }))
        .into_response(),
        Err(e) => {
            error!("Stats unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Ladder statistics unavailable",
                    "timestamp": current_timestamp()
                })),
            )
                .into_response()
        }
    }
}

/// Which standings `/leaderboard/{board}` serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Board {
    Elo,
    Monthly,
}

async fn leaderboard_handler(
    State(state): State<HealthServerState>,
    Path(board): Path<String>,
) -> Response {
    let board = match board.as_str() {
        "elo" => Board::Elo,
        "monthly" => Board::Monthly,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    let Some(ctx) = &state.context else {
        return not_initialized();
    };
    debug!("Leaderboard {:?} requested", board);

    let standings: crate::error::Result<Vec<Standing>> = async {
        let mut conn = ctx.pool().acquire().await?;
        match board {
            Board::Elo => elo_leaderboard(&mut conn).await,
            Board::Monthly => monthly_leaderboard(current_timestamp(), &mut conn).await,
        }
    }
    .await;

    match standings {
        Ok(standings) => Json(standings).into_response(),
        Err(e) => {
            error!("Failed to load {:?} leaderboard: {}", board, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Leaderboard unavailable" })),
            )
                .into_response()
        }
    }
}
