//! Error types for psgate.

use thiserror::Error;

/// Result type for psgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for psgate.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Credential resolution failed. Fatal to opening any channel.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Channel could not be established. Retryable by the caller.
    #[error("Connection error: {0}")]
    Connect(String),

    /// Message submission or acknowledgment wait failed. Retryable by the
    /// caller; psgate performs no automatic retry.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Subscriber could not begin receiving. State remains unchanged.
    #[error("Subscriber start failed: {0}")]
    SubscriberStart(String),

    /// Requested subscriber lifecycle action is not legal from the current state.
    #[error("Invalid subscriber transition: cannot {action} while {from}")]
    InvalidTransition {
        /// State the subscriber was in.
        from: &'static str,
        /// Action that was requested.
        action: &'static str,
    },

    /// Acknowledgment handle misuse.
    #[error("Acknowledgment error: {0}")]
    Ack(#[from] AckError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the immediate caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connect(_) | Error::Publish(_) | Error::SubscriberStart(_)
        )
    }
}

/// Validation error types.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid topic ID.
    #[error("Invalid topic ID: {0}")]
    InvalidTopicId(String),

    /// Invalid subscription ID.
    #[error("Invalid subscription ID: {0}")]
    InvalidSubscriptionId(String),

    /// Invalid project ID.
    #[error("Invalid project ID: {0}")]
    InvalidProjectId(String),

    /// Message too large.
    #[error("Message too large: {size} bytes (max: {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

}

/// Acknowledgment handle errors.
///
/// These are logged by the delivery loop, never propagated into it: a spent
/// or expired handle cannot affect the broker beyond the redelivery it
/// already implies.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckError {
    /// The delivery was already acked or nacked.
    #[error("delivery already resolved")]
    AlreadyResolved,

    /// The broker no longer recognizes the acknowledgment ID.
    #[error("acknowledgment deadline expired")]
    Expired,
}
