//! AMQP integration for the ladder service
//!
//! Commands arrive on a queue; replies, announcements and role removals go
//! out on a topic exchange.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{CommandConsumer, CommandHandler};
pub use messages::*;
pub use publisher::{
    AmqpNotificationGateway, LoggingNotificationGateway, NotificationGateway,
    RecordingNotificationGateway, ReplyPublisher,
};
