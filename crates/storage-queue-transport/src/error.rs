//! Error types for queue service calls and transport operations.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a queue service implementation
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message '{message_id}' not found or pop receipt '{pop_receipt}' no longer valid")]
    MessageNotFound {
        message_id: String,
        pop_receipt: String,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Service error ({status}): {code} - {message}")]
    ServiceError {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unexpected response: {message}")]
    InvalidResponse { message: String },

    #[error("Operation was cancelled")]
    Cancelled,
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::ServiceError { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidResponse { .. } => false,
            Self::Cancelled => false,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(5)),
            Self::ServiceError { status: 429, .. } => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

/// Errors surfaced by the transport to the message-bus runtime
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Could not create queue '{queue_name}'")]
    QueueCreationFailed {
        queue_name: String,
        #[source]
        source: QueueError,
    },

    #[error("Could not receive message from queue '{queue_name}'")]
    ReceiveFailed {
        queue_name: String,
        #[source]
        source: QueueError,
    },

    #[error("Could not send message '{message_id}' to '{destination}'")]
    SendFailed {
        message_id: String,
        destination: String,
        #[source]
        source: QueueError,
    },

    #[error("{} of the outgoing messages could not be sent", failures.len())]
    SendBatchFailed { failures: Vec<TransportError> },

    #[error("Could not delete message '{message_id}' with pop receipt '{pop_receipt}'")]
    CompleteFailed {
        message_id: String,
        pop_receipt: String,
        #[source]
        source: QueueError,
    },

    #[error("Could not purge queue '{queue_name}'")]
    PurgeFailed {
        queue_name: String,
        #[source]
        source: QueueError,
    },

    #[error("Unit of work is already {state}")]
    TransactionFinished { state: String },
}

impl TransportError {
    /// Check if the underlying queue fault is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueCreationFailed { source, .. }
            | Self::ReceiveFailed { source, .. }
            | Self::SendFailed { source, .. }
            | Self::CompleteFailed { source, .. }
            | Self::PurgeFailed { source, .. } => source.is_transient(),
            Self::SendBatchFailed { failures } => failures.iter().all(|f| f.is_transient()),
            _ => false,
        }
    }
}

/// Errors during message encoding/decoding and header interpretation
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Header '{key}' has invalid value '{value}': {message}")]
    InvalidHeader {
        key: String,
        value: String,
        message: String,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field} '{value}': {message}")]
    InvalidFormat {
        field: String,
        value: String,
        message: String,
    },

    #[error("Value out of range for {field} '{value}': {message}")]
    OutOfRange {
        field: String,
        value: String,
        message: String,
    },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
