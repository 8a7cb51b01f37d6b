//! Outbound notifications and command replies
//!
//! The coordinator talks to chat through [`NotificationGateway`]. The AMQP
//! implementation publishes JSON envelopes to the ladder events exchange; a
//! chat bridge on the other side posts the text and removes the role.

use crate::amqp::messages::{
    Announcement, CommandReply, MessageEnvelope, RoleRemoval, ANNOUNCE_ROUTING_KEY,
    LADDER_EVENTS_EXCHANGE, REPLY_ROUTING_KEY, ROLE_REMOVED_ROUTING_KEY,
};
use crate::error::{LadderError, Result};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Side effects in the chat system
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Post `text` on `channel`
    async fn announce(&self, channel: &str, text: &str) -> Result<()>;

    /// Take `role` away from the chat user `external_id`
    async fn remove_role(&self, role: &str, external_id: &str) -> Result<()>;
}

/// Sink for `(success, message)` replies to commands
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    async fn publish_reply(&self, reply: &CommandReply) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: LADDER_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-backed gateway and reply publisher
pub struct AmqpNotificationGateway {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpNotificationGateway {
    /// Create a publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let mut args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        args.durable(true);
        self.channel
            .exchange_declare(args)
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to declare exchange {}: {}", self.config.exchange, e),
            })?;

        info!("Declared AMQP exchange {}", self.config.exchange);
        Ok(())
    }

    /// Publish with retry and exponential backoff
    async fn publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    debug!(
                        "Published message {} with routing key {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_correlation_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| LadderError::Notification {
                message: format!("Failed to publish message: {}", e),
            })
    }
}

#[async_trait]
impl NotificationGateway for AmqpNotificationGateway {
    async fn announce(&self, channel: &str, text: &str) -> Result<()> {
        let announcement = Announcement {
            channel: channel.to_string(),
            text: text.to_string(),
        };
        self.publish(&MessageEnvelope::new(announcement, ANNOUNCE_ROUTING_KEY))
            .await
    }

    async fn remove_role(&self, role: &str, external_id: &str) -> Result<()> {
        let removal = RoleRemoval {
            role: role.to_string(),
            external_id: external_id.to_string(),
        };
        self.publish(&MessageEnvelope::new(removal, ROLE_REMOVED_ROUTING_KEY))
            .await
    }
}

#[async_trait]
impl ReplyPublisher for AmqpNotificationGateway {
    async fn publish_reply(&self, reply: &CommandReply) -> Result<()> {
        let envelope = MessageEnvelope::new(reply.clone(), REPLY_ROUTING_KEY)
            .with_correlation_id(reply.correlation_id.clone());
        self.publish(&envelope).await
    }
}

/// Gateway that only logs, for running without a broker
#[derive(Debug, Default, Clone)]
pub struct LoggingNotificationGateway;

#[async_trait]
impl NotificationGateway for LoggingNotificationGateway {
    async fn announce(&self, channel: &str, text: &str) -> Result<()> {
        info!("[{}] {}", channel, text.trim_end());
        Ok(())
    }

    async fn remove_role(&self, role: &str, external_id: &str) -> Result<()> {
        info!("Removing role '{}' from {}", role, external_id);
        Ok(())
    }
}

#[async_trait]
impl ReplyPublisher for LoggingNotificationGateway {
    async fn publish_reply(&self, reply: &CommandReply) -> Result<()> {
        info!(
            "Reply {} (success={}): {}",
            reply.correlation_id, reply.success, reply.message
        );
        Ok(())
    }
}

/// One side effect captured by [`RecordingNotificationGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Announcement(Announcement),
    RoleRemoval(RoleRemoval),
    Reply(CommandReply),
}

/// Gateway that records everything it is asked to do (for testing)
#[derive(Debug, Default)]
pub struct RecordingNotificationGateway {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, notification: Notification) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push(notification);
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn announcements(&self) -> Vec<Announcement> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Announcement(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn role_removals(&self) -> Vec<RoleRemoval> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::RoleRemoval(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn replies(&self) -> Vec<CommandReply> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Reply(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.clear();
        }
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotificationGateway {
    async fn announce(&self, channel: &str, text: &str) -> Result<()> {
        self.record(Notification::Announcement(Announcement {
            channel: channel.to_string(),
            text: text.to_string(),
        }));
        Ok(())
    }

    async fn remove_role(&self, role: &str, external_id: &str) -> Result<()> {
        self.record(Notification::RoleRemoval(RoleRemoval {
            role: role.to_string(),
            external_id: external_id.to_string(),
        }));
        Ok(())
    }
}

#[async_trait]
impl ReplyPublisher for RecordingNotificationGateway {
    async fn publish_reply(&self, reply: &CommandReply) -> Result<()> {
        self.record(Notification::Reply(reply.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.exchange, LADDER_EVENTS_EXCHANGE);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 500);
    }

    #[tokio::test]
    async fn test_recording_gateway_keeps_order() {
        let gateway = RecordingNotificationGateway::new();
        gateway.remove_role("ladder queue", "1001").await.unwrap();
        gateway.announce("ladder feed", "hello").await.unwrap();

        let all = gateway.notifications();
        assert_eq!(all.len(), 2);
        assert!(matches!(all[0], Notification::RoleRemoval(_)));
        assert_eq!(gateway.announcements()[0].text, "hello");
        assert_eq!(gateway.role_removals()[0].external_id, "1001");

        gateway.clear();
        assert!(gateway.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_logging_gateway_never_fails() {
        let gateway = LoggingNotificationGateway;
        assert!(gateway.announce("feed", "text\n").await.is_ok());
        assert!(gateway.remove_role("role", "1").await.is_ok());
    }
}
