//! AMQP message definitions and serialization

use crate::error::{LadderError, Result};
use crate::types::{GameMode, Identity, Rating, ReportOutcome};
use serde::{Deserialize, Serialize};
use serde_json;

/// Queue the service consumes commands from
pub const COMMAND_QUEUE: &str = "ladder.commands";

/// Exchange for replies and notifications
pub const LADDER_EVENTS_EXCHANGE: &str = "ladder.events";

/// Routing keys for events
pub const REPLY_ROUTING_KEY: &str = "ladder.reply";
pub const ANNOUNCE_ROUTING_KEY: &str = "ladder.announce";
pub const ROLE_REMOVED_ROUTING_KEY: &str = "ladder.role_removed";

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key: routing_key.into(),
        }
    }

    /// Reuse the correlation id of the message being answered
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LadderError::InternalError {
            message: format!("Failed to serialize message: {}", e),
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| LadderError::InvalidCommand {
            reason: format!("Failed to deserialize message: {}", e),
        })
    }
}

/// A command issued by the chat front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LadderCommand {
    Enqueue {
        identity: Identity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<Rating>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<GameMode>,
    },
    Dequeue {
        identity: Identity,
    },
    Report {
        identity: Identity,
        outcome: ReportOutcome,
    },
    ExpireStale,
    EloLeaderboard,
    MonthlyLeaderboard,
}

impl LadderCommand {
    /// Short name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            LadderCommand::Enqueue { .. } => "enqueue",
            LadderCommand::Dequeue { .. } => "dequeue",
            LadderCommand::Report { .. } => "report",
            LadderCommand::ExpireStale => "expire_stale",
            LadderCommand::EloLeaderboard => "elo_leaderboard",
            LadderCommand::MonthlyLeaderboard => "monthly_leaderboard",
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            LadderCommand::Enqueue { identity, .. }
            | LadderCommand::Dequeue { identity }
            | LadderCommand::Report { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

/// Reply to a command, correlated with the command envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub correlation_id: String,
    pub success: bool,
    pub message: String,
}

/// Text to post on a chat channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub channel: String,
    pub text: String,
}

/// Request to take a role away from a chat user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRemoval {
    pub role: String,
    pub external_id: String,
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Deserialize and validate a command envelope
    pub fn deserialize_command(bytes: &[u8]) -> Result<MessageEnvelope<LadderCommand>> {
        let envelope = MessageEnvelope::<LadderCommand>::from_bytes(bytes)?;
        Self::validate_command(&envelope.payload)?;
        Ok(envelope)
    }

    /// Validate a command before it reaches the coordinator
    pub fn validate_command(command: &LadderCommand) -> Result<()> {
        if let Some(identity) = command.identity() {
            if identity.external_id.trim().is_empty() {
                return Err(LadderError::InvalidCommand {
                    reason: "External user id cannot be empty".to_string(),
                });
            }
            if identity.display_name.trim().is_empty() {
                return Err(LadderError::InvalidCommand {
                    reason: "Display name cannot be empty".to_string(),
                });
            }
        }

        if let LadderCommand::Enqueue {
            range: Some(range), ..
        } = command
        {
            if *range < 0 {
                return Err(LadderError::InvalidCommand {
                    reason: format!("Range cannot be negative: {}", range),
                });
            }
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| LadderError::InternalError {
            message: format!("Failed to serialize message: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue_command() -> LadderCommand {
        LadderCommand::Enqueue {
            identity: Identity::new("1001", "alice"),
            range: Some(200),
            mode: Some(GameMode::Bo1),
        }
    }

    #[test]
    fn test_message_envelope_creation() {
        let envelope = MessageEnvelope::new(enqueue_command(), COMMAND_QUEUE);

        assert_eq!(envelope.routing_key, COMMAND_QUEUE);
        assert!(!envelope.correlation_id.is_empty());

        let reply = MessageEnvelope::new(
            CommandReply {
                correlation_id: envelope.correlation_id.clone(),
                success: true,
                message: "ok".to_string(),
            },
            REPLY_ROUTING_KEY,
        )
        .with_correlation_id(envelope.correlation_id.clone());
        assert_eq!(reply.correlation_id, envelope.correlation_id);
    }

    #[test]
    fn test_command_wire_format() {
        let raw = br#"{
            "payload": {"command": "report", "identity": {"external_id": "7", "display_name": "bob"}, "outcome": "Loss"},
            "correlation_id": "abc",
            "timestamp": "2024-05-01T12:00:00Z",
            "routing_key": "ladder.commands"
        }"#;
        let envelope = MessageUtils::deserialize_command(raw).unwrap();
        assert_eq!(envelope.correlation_id, "abc");
        assert_eq!(
            envelope.payload,
            LadderCommand::Report {
                identity: Identity::new("7", "bob"),
                outcome: ReportOutcome::Loss,
            }
        );

        let raw = br#"{
            "payload": {"command": "enqueue", "identity": {"external_id": "7", "display_name": "bob"}},
            "correlation_id": "def",
            "timestamp": "2024-05-01T12:00:00Z",
            "routing_key": "ladder.commands"
        }"#;
        let envelope = MessageUtils::deserialize_command(raw).unwrap();
        assert!(matches!(
            envelope.payload,
            LadderCommand::Enqueue {
                range: None,
                mode: None,
                ..
            }
        ));
    }

    #[test]
    fn test_command_validation() {
        assert!(MessageUtils::validate_command(&enqueue_command()).is_ok());
        assert!(MessageUtils::validate_command(&LadderCommand::ExpireStale).is_ok());

        let negative = LadderCommand::Enqueue {
            identity: Identity::new("1", "a"),
            range: Some(-5),
            mode: None,
        };
        assert!(matches!(
            MessageUtils::validate_command(&negative),
            Err(LadderError::InvalidCommand { .. })
        ));

        let anonymous = LadderCommand::Dequeue {
            identity: Identity::new(" ", "a"),
        };
        assert!(MessageUtils::validate_command(&anonymous).is_err());
    }

    #[test]
    fn test_garbage_is_invalid_command() {
        let err = MessageUtils::deserialize_command(b"not json").unwrap_err();
        assert!(matches!(err, LadderError::InvalidCommand { .. }));
    }
}
