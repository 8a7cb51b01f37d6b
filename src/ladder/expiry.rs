//! Periodic expiry of stale match requests

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::ladder::coordinator::LadderCoordinator;
use crate::utils::current_timestamp;

/// Runs the coordinator's expiry pass on a fixed interval
pub struct ExpirySweeper {
    coordinator: Arc<LadderCoordinator>,
    period: Duration,
}

impl ExpirySweeper {
    pub fn new(coordinator: Arc<LadderCoordinator>, period: Duration) -> Self {
        Self {
            coordinator,
            period,
        }
    }

    /// Sweeper using the coordinator's configured interval
    pub fn from_config(coordinator: Arc<LadderCoordinator>) -> Self {
        let period = coordinator.config().sweep_interval();
        Self::new(coordinator, period)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one expiry pass now; returns how many requests were expired
    pub async fn sweep_once(&self) -> Result<usize> {
        let expired = self.coordinator.expire_stale(current_timestamp()).await?;
        if let Err(e) = self.coordinator.observe_queue_depth().await {
            debug!("Could not refresh queue depth: {}", e);
        }
        Ok(expired.len())
    }

    /// Spawn the sweep loop; abort the handle to stop it
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let sweeper = Arc::clone(&self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(sweeper.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks = IntervalStream::new(ticker);

            while ticks.next().await.is_some() {
                match sweeper.sweep_once().await {
                    Ok(0) => {}
                    Ok(count) => debug!("Sweep expired {} request(s)", count),
                    Err(e) if e.is_fatal() => {
                        error!("Expiry sweep hit corrupt state: {}", e);
                    }
                    Err(e) => warn!("Expiry sweep failed, retrying next tick: {}", e),
                }
            }
        });

        info!("Started expiry sweeper (every {:?})", self.period);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::RecordingNotificationGateway;
    use crate::config::{LadderConfig, RatingConfig};
    use crate::store::memory_pool;
    use crate::types::{GameMode, Identity};
    use chrono::Duration as ChronoDuration;

    async fn coordinator(expiry_seconds: u64) -> (Arc<LadderCoordinator>, Arc<RecordingNotificationGateway>) {
        let gateway = Arc::new(RecordingNotificationGateway::new());
        let config = LadderConfig {
            queue_expiry_seconds: expiry_seconds,
            ..LadderConfig::default()
        };
        let coordinator = LadderCoordinator::new(
            memory_pool().await.unwrap(),
            config,
            RatingConfig::default(),
            gateway.clone(),
        );
        (Arc::new(coordinator), gateway)
    }

    #[tokio::test]
    async fn test_sweep_once_expires_old_requests() {
        let (coordinator, gateway) = coordinator(60).await;
        let old = current_timestamp() - ChronoDuration::minutes(5);
        coordinator
            .enqueue(&Identity::new("1", "old"), None, Some(GameMode::Bo1), old)
            .await
            .unwrap();
        coordinator
            .enqueue(&Identity::new("2", "fresh"), None, Some(GameMode::Bo3), current_timestamp())
            .await
            .unwrap();

        let sweeper = ExpirySweeper::from_config(coordinator.clone());
        assert_eq!(sweeper.period(), Duration::from_secs(60));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        assert_eq!(gateway.role_removals().len(), 1);
        assert_eq!(gateway.role_removals()[0].external_id, "1");
    }

    #[tokio::test]
    async fn test_started_sweeper_runs_on_interval() {
        let (coordinator, gateway) = coordinator(60).await;
        let old = current_timestamp() - ChronoDuration::minutes(5);
        coordinator
            .enqueue(&Identity::new("1", "old"), None, None, old)
            .await
            .unwrap();

        let sweeper = Arc::new(ExpirySweeper::new(
            coordinator.clone(),
            Duration::from_millis(20),
        ));
        let handle = sweeper.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert_eq!(gateway.announcements().len(), 1);
        assert_eq!(coordinator.observe_queue_depth().await.unwrap(), 0);
    }
}
