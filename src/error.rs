//! Error types for the ladder service
//!
//! The first four variants are expected outcomes that end up as a
//! `(success=false, message)` reply. `PersistenceFailure` is retryable and
//! `CorruptState` is fatal.

use crate::types::{ParseEnumError, UserId};

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, LadderError>;

/// Error taxonomy of the ladder core
#[derive(Debug, thiserror::Error)]
pub enum LadderError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("Stale state conflict: {message}")]
    StaleStateConflict { message: String },

    #[error("Insufficient rating history for user {user_id}")]
    InsufficientHistory { user_id: UserId },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] sqlx::Error),

    #[error("Corrupt state: {message}")]
    CorruptState { message: String },

    #[error("Notification delivery failed: {message}")]
    Notification { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl LadderError {
    pub fn not_found(message: impl Into<String>) -> Self {
        LadderError::NotFound {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        LadderError::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn stale(message: impl Into<String>) -> Self {
        LadderError::StaleStateConflict {
            message: message.into(),
        }
    }

    /// Expected outcomes reported back to the user rather than raised
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            LadderError::NotFound { .. }
                | LadderError::InvariantViolation { .. }
                | LadderError::StaleStateConflict { .. }
                | LadderError::InsufficientHistory { .. }
                | LadderError::InvalidCommand { .. }
        )
    }

    /// The store aborted the transaction; the whole operation may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, LadderError::PersistenceFailure(_))
    }

    /// A stored value violated a closed enumeration
    pub fn is_fatal(&self) -> bool {
        matches!(self, LadderError::CorruptState { .. })
    }

    /// Text handed back to the player for a user-facing error
    pub fn user_message(&self) -> String {
        match self {
            LadderError::NotFound { message }
            | LadderError::InvariantViolation { message }
            | LadderError::StaleStateConflict { message } => message.clone(),
            LadderError::InsufficientHistory { .. } => {
                "There is no earlier rating to restore for this match - contact the admins if the result is wrong.".to_string()
            }
            LadderError::InvalidCommand { reason } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            LadderError::NotFound { .. } => "not_found",
            LadderError::InvariantViolation { .. } => "invariant_violation",
            LadderError::StaleStateConflict { .. } => "stale_state_conflict",
            LadderError::InsufficientHistory { .. } => "insufficient_history",
            LadderError::PersistenceFailure(_) => "persistence_failure",
            LadderError::CorruptState { .. } => "corrupt_state",
            LadderError::Notification { .. } => "notification",
            LadderError::AmqpConnectionFailed { .. } => "amqp_connection_failed",
            LadderError::InvalidCommand { .. } => "invalid_command",
            LadderError::ConfigurationError { .. } => "configuration_error",
            LadderError::InternalError { .. } => "internal_error",
        }
    }

    /// Map a unique-constraint violation onto `InvariantViolation`, leaving other store errors alone
    pub fn from_write(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                LadderError::invariant(format!("{} already exists", what))
            }
            _ => LadderError::PersistenceFailure(err),
        }
    }
}

impl From<ParseEnumError> for LadderError {
    fn from(err: ParseEnumError) -> Self {
        LadderError::CorruptState {
            message: err.to_string(),
        }
    }
}
