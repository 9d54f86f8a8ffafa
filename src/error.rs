//! Engine error types

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the consumption and production paths
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Missing or contradictory configuration; the engine does not start
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Reader or writer could not be set up against the brokers
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport-level read error; terminates the loop that hit it
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Payload could not be parsed into the topic's event type
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// Business handler rejected the event
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    /// Broker refused to record the consumer group position
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Event could not be serialized for publishing
    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    /// Broker did not acknowledge a published batch
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl EngineError {
    /// Get error severity
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EngineError::ConfigInvalid(_)
            | EngineError::Connection(_)
            | EngineError::FetchFailed(_) => ErrorSeverity::Fatal,
            EngineError::DecodeFailed(_) | EngineError::CommitFailed(_) => ErrorSeverity::Warning,
            EngineError::HandlerFailed(_)
            | EngineError::EncodeFailed(_)
            | EngineError::DeliveryFailed(_) => ErrorSeverity::Error,
        }
    }

    /// Whether the error ends the loop or start-up that produced it
    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Absorbed locally, processing continues
    Warning,
    /// Reported, the current message or call fails
    Error,
    /// Stops the loop or prevents start-up
    Fatal,
}
