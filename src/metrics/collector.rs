//! Metrics collection using Prometheus
//!
//! Metric groups for the ladder: queue traffic, match lifecycle, rating
//! ledger activity and service health.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::{GameMode, ReportOutcome};

/// Main metrics collector for the ladder service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
    match_metrics: MatchMetrics,
    rating_metrics: RatingMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Commands handled by kind and outcome
    pub commands_total: IntCounterVec,

    /// Failed commands by error kind
    pub errors_total: IntCounterVec,

    /// Notifications that could not be delivered
    pub notification_failures_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Command handling time
    pub operation_duration: HistogramVec,
}

/// Queue traffic
#[derive(Clone)]
pub struct QueueMetrics {
    pub enqueued_total: IntCounterVec,
    pub dequeued_total: IntCounter,
    pub expired_total: IntCounter,
    /// Active requests as of the last observation
    pub queue_depth: IntGauge,
    /// How long the chosen candidate had been waiting when paired
    pub pairing_wait_seconds: Histogram,
}

/// Match lifecycle
#[derive(Clone)]
pub struct MatchMetrics {
    pub created_total: IntCounterVec,
    pub completed_total: IntCounter,
    pub cancelled_total: IntCounter,
    /// Reports that overwrote an already recorded result
    pub corrections_total: IntCounterVec,
    pub stale_conflicts_total: IntCounter,
}

/// Rating ledger activity
#[derive(Clone)]
pub struct RatingMetrics {
    pub ledger_applies_total: IntCounter,
    pub ledger_reverts_total: IntCounter,
    /// Absolute rating change per applied result
    pub rating_delta: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let rating_metrics = RatingMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            rating_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn rating(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    pub fn record_enqueued(&self, mode: GameMode) {
        self.queue_metrics
            .enqueued_total
            .with_label_values(&[mode.as_str()])
            .inc();
    }

    pub fn record_dequeued(&self) {
        self.queue_metrics.dequeued_total.inc();
    }

    pub fn record_expired(&self, count: usize) {
        self.queue_metrics.expired_total.inc_by(count as u64);
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_metrics.queue_depth.set(depth);
    }

    /// Record a new match and how long the waiting side had been queued
    pub fn record_match_created(&self, mode: GameMode, waited_seconds: f64) {
        self.match_metrics
            .created_total
            .with_label_values(&[mode.as_str()])
            .inc();
        self.queue_metrics
            .pairing_wait_seconds
            .observe(waited_seconds.max(0.0));
    }

    pub fn record_match_completed(&self) {
        self.match_metrics.completed_total.inc();
    }

    pub fn record_match_cancelled(&self) {
        self.match_metrics.cancelled_total.inc();
    }

    pub fn record_correction(&self, outcome: ReportOutcome) {
        self.match_metrics
            .corrections_total
            .with_label_values(&[&outcome.to_string()])
            .inc();
    }

    pub fn record_stale_conflict(&self) {
        self.match_metrics.stale_conflicts_total.inc();
    }

    pub fn record_rating_applied(&self, old_rating: i32, new_rating: i32) {
        self.rating_metrics.ledger_applies_total.inc();
        self.rating_metrics
            .rating_delta
            .observe((new_rating - old_rating).abs() as f64);
    }

    pub fn record_rating_reverted(&self) {
        self.rating_metrics.ledger_reverts_total.inc();
    }

    /// Record a handled command with its outcome and duration
    pub fn record_command(&self, command: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "rejected" };
        self.service_metrics
            .commands_total
            .with_label_values(&[command, status])
            .inc();
        self.service_metrics
            .operation_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    pub fn record_error(&self, command: &str, kind: &str) {
        self.service_metrics
            .errors_total
            .with_label_values(&[command, kind])
            .inc();
    }

    pub fn record_notification_failure(&self, notification: &str) {
        self.service_metrics
            .notification_failures_total
            .with_label_values(&[notification])
            .inc();
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("ladder_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new("ladder_commands_total", "Total ladder commands handled"),
            &["command", "status"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("ladder_errors_total", "Ladder command errors by kind"),
            &["command", "kind"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let notification_failures_total = IntCounterVec::new(
            Opts::new(
                "ladder_notification_failures_total",
                "Notifications that could not be delivered",
            ),
            &["notification"],
        )?;
        registry.register(Box::new(notification_failures_total.clone()))?;

        let health_status = IntGauge::new(
            "ladder_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("ladder_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ladder_operation_duration_seconds",
                "Ladder command handling time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["command"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            uptime_seconds,
            commands_total,
            errors_total,
            notification_failures_total,
            health_status,
            component_health,
            operation_duration,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let enqueued_total = IntCounterVec::new(
            Opts::new("ladder_requests_enqueued_total", "Match requests enqueued"),
            &["game_mode"],
        )?;
        registry.register(Box::new(enqueued_total.clone()))?;

        let dequeued_total =
            IntCounter::new("ladder_requests_dequeued_total", "Match requests dequeued")?;
        registry.register(Box::new(dequeued_total.clone()))?;

        let expired_total =
            IntCounter::new("ladder_requests_expired_total", "Match requests expired")?;
        registry.register(Box::new(expired_total.clone()))?;

        let queue_depth = IntGauge::new("ladder_queue_depth", "Active match requests")?;
        registry.register(Box::new(queue_depth.clone()))?;

        let pairing_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ladder_pairing_wait_seconds",
                "Queue time of the waiting side at pairing",
            )
            .buckets(vec![5.0, 30.0, 60.0, 300.0, 600.0, 900.0, 1800.0]),
        )?;
        registry.register(Box::new(pairing_wait_seconds.clone()))?;

        Ok(Self {
            enqueued_total,
            dequeued_total,
            expired_total,
            queue_depth,
            pairing_wait_seconds,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let created_total = IntCounterVec::new(
            Opts::new("ladder_matches_created_total", "Matches created"),
            &["game_mode"],
        )?;
        registry.register(Box::new(created_total.clone()))?;

        let completed_total =
            IntCounter::new("ladder_matches_completed_total", "Results recorded")?;
        registry.register(Box::new(completed_total.clone()))?;

        let cancelled_total =
            IntCounter::new("ladder_matches_cancelled_total", "Matches cancelled")?;
        registry.register(Box::new(cancelled_total.clone()))?;

        let corrections_total = IntCounterVec::new(
            Opts::new(
                "ladder_match_corrections_total",
                "Reports that overwrote a recorded result",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(corrections_total.clone()))?;

        let stale_conflicts_total = IntCounter::new(
            "ladder_stale_conflicts_total",
            "Corrections refused because a player already moved on",
        )?;
        registry.register(Box::new(stale_conflicts_total.clone()))?;

        Ok(Self {
            created_total,
            completed_total,
            cancelled_total,
            corrections_total,
            stale_conflicts_total,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let ledger_applies_total =
            IntCounter::new("ladder_ledger_applies_total", "Rating ledger entries pushed")?;
        registry.register(Box::new(ledger_applies_total.clone()))?;

        let ledger_reverts_total = IntCounter::new(
            "ladder_ledger_reverts_total",
            "Rating ledger entries tombstoned",
        )?;
        registry.register(Box::new(ledger_reverts_total.clone()))?;

        let rating_delta = Histogram::with_opts(
            HistogramOpts::new("ladder_rating_delta", "Absolute rating change per result")
                .buckets(vec![1.0, 4.0, 8.0, 16.0, 24.0, 32.0, 48.0, 64.0]),
        )?;
        registry.register(Box::new(rating_delta.clone()))?;

        Ok(Self {
            ledger_applies_total,
            ledger_reverts_total,
            rating_delta,
        })
    }
}
