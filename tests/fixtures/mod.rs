//! Test fixtures shared by the integration tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ladder_queue::amqp::publisher::{NotificationGateway, RecordingNotificationGateway};
use ladder_queue::config::{LadderConfig, RatingConfig};
use ladder_queue::error::{LadderError, Result};
use ladder_queue::ladder::LadderCoordinator;
use ladder_queue::metrics::MetricsCollector;
use ladder_queue::store::{memory_pool, new_pool, requests, users};
use ladder_queue::types::{GameMode, Identity, MatchRequest, Rating, User};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A coordinator over a fresh store, with its gateway and metrics
pub struct TestLadder {
    pub coordinator: Arc<LadderCoordinator>,
    pub gateway: Arc<RecordingNotificationGateway>,
    pub metrics: Arc<MetricsCollector>,
    db_file: Option<PathBuf>,
}

impl TestLadder {
    pub async fn new() -> Self {
        Self::with_config(LadderConfig::default()).await
    }

    pub async fn with_config(config: LadderConfig) -> Self {
        let pool = memory_pool().await.expect("in-memory store");
        Self::build(pool, config, None)
    }

    /// A ladder over a temporary database file served by several connections
    pub async fn on_file(max_connections: u32) -> Self {
        let path = std::env::temp_dir().join(format!("ladder-test-{}.db", uuid::Uuid::new_v4()));
        let pool = new_pool(&format!("sqlite://{}", path.display()), max_connections)
            .await
            .expect("file store");
        Self::build(pool, LadderConfig::default(), Some(path))
    }

    fn build(pool: SqlitePool, config: LadderConfig, db_file: Option<PathBuf>) -> Self {
        let gateway = Arc::new(RecordingNotificationGateway::new());
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let coordinator =
            LadderCoordinator::new(pool, config, RatingConfig::default(), gateway.clone())
                .with_metrics(metrics.clone());

        Self {
            coordinator: Arc::new(coordinator),
            gateway,
            metrics,
            db_file,
        }
    }

    pub async fn user(&self, identity: &Identity) -> User {
        let mut conn = self.coordinator.pool().acquire().await.unwrap();
        users::fetch_user_by_external_id(&identity.external_id, &mut conn)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{} is not registered", identity.display_name))
    }

    pub async fn rating_of(&self, identity: &Identity) -> Rating {
        self.user(identity).await.current_rating
    }

    /// Put a request in the queue through the store, skipping the pairing attempt
    pub async fn queue_directly(
        &self,
        identity: &Identity,
        mode: GameMode,
        at: DateTime<Utc>,
    ) -> MatchRequest {
        let mut conn = self.coordinator.pool().acquire().await.unwrap();
        let user = users::get_or_register(identity, 1200, at, &mut conn)
            .await
            .unwrap();
        requests::enqueue(user.id, 300, mode, at, &mut conn)
            .await
            .unwrap()
    }

    /// Queue `first` then `second` in `mode` and assert they were paired
    pub async fn pair(&self, first: &Identity, second: &Identity, mode: GameMode, now: DateTime<Utc>) {
        let queued = self
            .coordinator
            .enqueue(first, None, Some(mode), now)
            .await
            .unwrap();
        assert!(queued.success, "{}", queued.message);

        let paired = self
            .coordinator
            .enqueue(second, None, Some(mode), now)
            .await
            .unwrap();
        assert!(
            paired
                .message
                .contains(&format!("was paired against {}", first.display_name)),
            "expected a pairing, got: {}",
            paired.message
        );
    }
}

impl Drop for TestLadder {
    fn drop(&mut self) {
        if let Some(path) = &self.db_file {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
            }
        }
    }
}

/// Identity for the n-th test player
pub fn player(n: usize) -> Identity {
    Identity::new(format!("{}", 5000 + n), format!("player{}", n))
}

/// Gateway whose every delivery fails, counting attempts
#[derive(Debug, Default)]
pub struct FailingGateway {
    pub attempts: AtomicUsize,
}

impl FailingGateway {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(LadderError::Notification {
            message: "chat is unreachable".to_string(),
        })
    }
}

#[async_trait]
impl NotificationGateway for FailingGateway {
    async fn announce(&self, _channel: &str, _text: &str) -> Result<()> {
        self.fail()
    }

    async fn remove_role(&self, _role: &str, _external_id: &str) -> Result<()> {
        self.fail()
    }
}
