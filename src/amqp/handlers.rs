//! AMQP command consumer
//!
//! Each delivery on the command queue is decoded, dispatched to a
//! [`CommandHandler`] and answered with a [`CommandReply`] carrying the
//! command's correlation id.

use crate::amqp::messages::{CommandReply, LadderCommand, MessageEnvelope, MessageUtils};
use crate::amqp::publisher::ReplyPublisher;
use crate::error::{LadderError, Result};
use crate::ladder::LadderCoordinator;
use crate::types::CommandOutcome;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel,
        QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const RETRY_MESSAGE: &str =
    "The ladder is busy right now - please try that command again in a moment.";
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Something went wrong while handling your command. The admins have been notified.";

/// Trait defining the interface for handling ladder commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run one command and produce the `(success, message)` pair
    async fn handle_command(&self, command: LadderCommand) -> Result<CommandOutcome>;
}

#[async_trait]
impl CommandHandler for LadderCoordinator {
    async fn handle_command(&self, command: LadderCommand) -> Result<CommandOutcome> {
        self.handle(command).await
    }
}

/// Turn a handler result into the reply sent back to the front end
pub fn reply_for(correlation_id: &str, result: Result<CommandOutcome>) -> CommandReply {
    let (success, message) = match result {
        Ok(outcome) => (outcome.success, outcome.message),
        Err(e) if e.is_user_facing() => (false, e.user_message()),
        Err(e) if e.is_retryable() => {
            warn!("Command {} failed with a retryable error: {}", correlation_id, e);
            (false, RETRY_MESSAGE.to_string())
        }
        Err(e) => {
            error!("Command {} failed: {}", correlation_id, e);
            (false, GENERIC_FAILURE_MESSAGE.to_string())
        }
    };

    CommandReply {
        correlation_id: correlation_id.to_string(),
        success,
        message,
    }
}

/// Decode one delivery, run it and publish the reply
pub async fn dispatch(
    handler: &dyn CommandHandler,
    replies: &dyn ReplyPublisher,
    content: &[u8],
) -> Result<CommandReply> {
    let envelope: MessageEnvelope<LadderCommand> = MessageUtils::deserialize_command(content)?;
    info!(
        "Command received - correlation_id: '{}', command: {}",
        envelope.correlation_id,
        envelope.payload.name()
    );

    let result = handler.handle_command(envelope.payload).await;
    let reply = reply_for(&envelope.correlation_id, result);
    replies.publish_reply(&reply).await?;
    Ok(reply)
}

/// Consumer for the command queue
pub struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
    replies: Arc<dyn ReplyPublisher>,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    pub fn new(
        handler: Arc<dyn CommandHandler>,
        replies: Arc<dyn ReplyPublisher>,
        channel: Channel,
    ) -> Self {
        let consumer_tag = format!("ladder-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            replies,
            channel,
            consumer_tag,
        }
    }

    /// Declare the command queue and start consuming it
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let mut declare = QueueDeclareArguments::new(queue_name);
        declare.durable(true);
        self.channel
            .queue_declare(declare)
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        self.channel
            .basic_consume(
                DeliveryConsumer::new(self.handler.clone(), self.replies.clone()),
                args,
            )
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| LadderError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming commands");
        Ok(())
    }
}

struct DeliveryConsumer {
    handler: Arc<dyn CommandHandler>,
    replies: Arc<dyn ReplyPublisher>,
}

impl DeliveryConsumer {
    fn new(handler: Arc<dyn CommandHandler>, replies: Arc<dyn ReplyPublisher>) -> Self {
        Self { handler, replies }
    }
}

#[async_trait]
impl AsyncConsumer for DeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, size: {} bytes",
            delivery_tag,
            content.len()
        );

        let start_time = std::time::Instant::now();
        match dispatch(self.handler.as_ref(), self.replies.as_ref(), &content).await {
            Ok(reply) => info!(
                "Command {} handled (success={}) in {:.2}ms",
                reply.correlation_id,
                reply.success,
                start_time.elapsed().as_secs_f64() * 1000.0
            ),
            Err(e) => error!(
                "Dropping delivery {} after {:.2}ms: {}",
                delivery_tag,
                start_time.elapsed().as_secs_f64() * 1000.0,
                e
            ),
        }

        // Commands are answered, never redelivered.
        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Handler that records commands and answers with a fixed outcome (for testing)
pub struct MockCommandHandler {
    pub received: Arc<tokio::sync::Mutex<Vec<LadderCommand>>>,
    outcome: CommandOutcome,
}

impl Default for MockCommandHandler {
    fn default() -> Self {
        Self::new(CommandOutcome::success("ok"))
    }
}

impl MockCommandHandler {
    pub fn new(outcome: CommandOutcome) -> Self {
        Self {
            received: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            outcome,
        }
    }
}

#[async_trait]
impl CommandHandler for MockCommandHandler {
    async fn handle_command(&self, command: LadderCommand) -> Result<CommandOutcome> {
        self.received.lock().await.push(command);
        Ok(self.outcome.clone())
    }
}
