//! Main application state and service coordination
//!
//! `AppState` owns the store pool, the coordinator, the AMQP wiring, the
//! health server and the background tasks, and drives their start-up and
//! shutdown order.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::CommandConsumer;
use crate::amqp::publisher::{
    AmqpNotificationGateway, LoggingNotificationGateway, NotificationGateway, PublisherConfig,
    ReplyPublisher,
};
use crate::config::AppConfig;
use crate::ladder::{ExpirySweeper, LadderCoordinator};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use crate::store;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    pool: SqlitePool,
    metrics: Arc<MetricsCollector>,
    coordinator: Arc<LadderCoordinator>,

    /// `None` when AMQP is disabled
    amqp_connection: Option<Arc<AmqpConnection>>,
    replies: Arc<dyn ReplyPublisher>,
    consumer: Option<CommandConsumer>,

    health_context: Arc<HealthContext>,
    health_server: Arc<HealthServer>,

    background_tasks: Vec<JoinHandle<()>>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing ladder service '{}'", config.service.name);

        let pool = Self::initialize_store(&config).await?;
        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let (amqp_connection, notifier, replies) = if config.amqp.enabled {
            let connection = Self::initialize_amqp(&config).await?;
            let gateway = Self::initialize_gateway(&config, &connection).await?;
            (
                Some(connection),
                gateway.clone() as Arc<dyn NotificationGateway>,
                gateway as Arc<dyn ReplyPublisher>,
            )
        } else {
            warn!("AMQP disabled - notifications and replies will only be logged");
            let gateway = Arc::new(LoggingNotificationGateway);
            (
                None,
                gateway.clone() as Arc<dyn NotificationGateway>,
                gateway as Arc<dyn ReplyPublisher>,
            )
        };

        let coordinator = Arc::new(
            LadderCoordinator::new(
                pool.clone(),
                config.ladder.clone(),
                config.rating.clone(),
                notifier,
            )
            .with_metrics(metrics.clone()),
        );

        let is_running = Arc::new(RwLock::new(false));
        let mut health_context =
            HealthContext::new(config.service.name.clone(), pool.clone(), is_running.clone());
        if let Some(connection) = &amqp_connection {
            health_context = health_context.with_amqp(connection.clone());
        }
        let health_context = Arc::new(health_context);

        let health_server = Arc::new(
            HealthServer::new(
                HealthServerConfig {
                    port: config.service.health_port,
                    host: "0.0.0.0".to_string(),
                },
                metrics.clone(),
            )
            .with_context(health_context.clone()),
        );

        Ok(Self {
            config,
            pool,
            metrics,
            coordinator,
            amqp_connection,
            replies,
            consumer: None,
            health_context,
            health_server,
            background_tasks: Vec::new(),
            is_running,
        })
    }

    /// Start the health server, command consumption and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting ladder service");

        *self.is_running.write().await = true;

        self.start_health_server();
        self.start_command_consumption().await?;
        self.start_background_tasks();

        info!("✅ Ladder service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of ladder service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop command consumer: {}", e);
            } else {
                info!("✅ Command consumption stopped");
            }
        }

        self.health_server.stop();
        self.stop_background_tasks().await;

        match HealthCheck::gather_stats(&self.pool).await {
            Ok(stats) => info!("Final ladder statistics: {:?}", stats),
            Err(e) => warn!("Failed to gather final statistics: {}", e),
        }

        if let Some(connection) = self.amqp_connection.take() {
            if let Err(e) = connection.connection().clone().close().await {
                warn!("Failed to close AMQP connection: {}", e);
            }
        }
        self.pool.close().await;

        info!("✅ Ladder service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn coordinator(&self) -> Arc<LadderCoordinator> {
        self.coordinator.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn health_context(&self) -> Arc<HealthContext> {
        self.health_context.clone()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_store(config: &AppConfig) -> Result<SqlitePool, ServiceError> {
        info!("Opening ladder store at {}", config.database.url);

        store::new_pool(&config.database.url, config.database.max_connections)
            .await
            .map_err(|e| ServiceError::Storage {
                message: format!("Failed to open database {}: {}", config.database.url, e),
            })
    }

    /// Connect to the broker with the configured retry policy
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        let amqp_config = Self::parse_amqp_url(config)?;
        info!(
            "Connecting to AMQP broker {}:{}{}",
            amqp_config.host, amqp_config.port, amqp_config.vhost
        );

        let connection = tokio::time::timeout(
            config.amqp_connection_timeout() * (config.amqp.max_retry_attempts + 1),
            AmqpConnection::new(amqp_config),
        )
        .await
        .map_err(|_| ServiceError::AmqpConnection {
            message: "Timed out connecting to AMQP".to_string(),
        })?
        .map_err(|e| ServiceError::AmqpConnection {
            message: format!("Failed to connect to AMQP: {}", e),
        })?;

        Ok(Arc::new(connection))
    }

    fn parse_amqp_url(config: &AppConfig) -> Result<AmqpConfig, ServiceError> {
        AmqpConfig::from_url(&config.amqp.url)
            .map(|c| c.with_retries(config.amqp.max_retry_attempts, config.amqp.retry_delay_ms))
            .map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })
    }

    async fn initialize_gateway(
        config: &AppConfig,
        connection: &AmqpConnection,
    ) -> Result<Arc<AmqpNotificationGateway>, ServiceError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };
        let gateway = AmqpNotificationGateway::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize notification gateway: {}", e),
            })?;

        Ok(Arc::new(gateway))
    }

    fn start_health_server(&mut self) {
        let health_server = self.health_server.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = health_server.start().await {
                error!("Health server failed: {}", e);
            }
        });
        self.background_tasks.push(handle);

        info!("✅ Health server starting on port {}", port);
    }

    async fn start_command_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            info!("AMQP disabled - not consuming ladder commands");
            return Ok(());
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let consumer = CommandConsumer::new(self.coordinator.clone(), self.replies.clone(), channel);
        consumer
            .start_consuming(&self.config.amqp.queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming commands: {}", e),
            })?;
        self.consumer = Some(consumer);

        info!(
            "Listening for ladder commands on queue '{}'",
            self.config.amqp.queue_name
        );
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let sweeper = Arc::new(ExpirySweeper::from_config(self.coordinator.clone()));
        info!(
            "Starting expiry sweeper ({}s interval, {}s expiry)",
            sweeper.period().as_secs(),
            self.config.ladder.queue_expiry_seconds
        );
        self.background_tasks.push(sweeper.start());

        let health_metrics_task = {
            let metrics = self.metrics.clone();
            let context = self.health_context.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
                let start_time = Instant::now();

                while *is_running.read().await {
                    interval.tick().await;
                    metrics.update_uptime(start_time.elapsed());

                    match HealthCheck::check(&context).await {
                        Ok(health) => {
                            metrics.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics.update_component_health(
                                    &check.name,
                                    check.status != HealthStatus::Unhealthy,
                                );
                            }
                            debug!(
                                "Health: {} - {} queued, {} in progress",
                                health.status,
                                health.stats.queued_requests,
                                health.stats.matches_in_progress
                            );
                        }
                        Err(e) => warn!("Health check failed: {}", e),
                    }
                }
            })
        };
        self.background_tasks.push(health_metrics_task);

        info!("{} background tasks running", self.background_tasks.len());
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in self.background_tasks.drain(..) {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Background task ended abnormally: {}", e);
                }
            }
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
