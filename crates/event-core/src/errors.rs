//! Error types for event-core
//!
//! The engines distinguish a small number of error categories:
//!
//! - **NetworkFailure**: the transport could not send a request or response
//! - **ProtocolViolation**: a received message is missing a mandatory header
//!   or carries a value we do not understand
//! - **AuthenticationFailure**: a 401/407 challenge could not be resolved
//! - **RemoteRejection**: the peer answered with a final non-success status
//! - **InvalidState**: the caller asked for something the current
//!   subscription table does not allow
//!
//! Only errors detected synchronously inside a public operation
//! (`subscribe`, `unsubscribe`, `notify`, ...) are returned to the caller.
//! Errors found while processing asynchronous messages are logged and
//! absorbed by the engines.

use thiserror::Error;

use crate::types::StatusCode;

/// Result type for event-core operations
pub type EventResult<T> = Result<T, EventError>;

/// Errors raised by the subscriber and notifier engines
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    /// Sending a message through the transport failed
    #[error("Network failure: {message}")]
    NetworkFailure { message: String },

    /// A received message broke the event notification protocol
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// An authentication challenge could not be answered
    #[error("Authentication failure: {message}")]
    AuthenticationFailure { message: String },

    /// The remote party rejected the request
    #[error("Rejected by remote party with status {status}")]
    RemoteRejection { status: StatusCode },

    /// The operation is not valid for the current subscription state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Invalid engine configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal error, e.g. an event package failed to build its payload
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EventError {
    /// Create a network failure error
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create an authentication failure error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::AuthenticationFailure {
            message: message.into(),
        }
    }

    /// Create a remote rejection error
    pub fn rejected(status: StatusCode) -> Self {
        Self::RemoteRejection { status }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error came from the transport layer
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. })
    }

    /// Whether retrying the same operation later may succeed
    ///
    /// Network failures are usually transient. A rejection is recoverable
    /// only for the "try again later" class of statuses (408, 480, 486, 5xx).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NetworkFailure { .. } => true,
            Self::RemoteRejection { status } => {
                matches!(status.as_u16(), 408 | 480 | 486) || status.is_server_error()
            }
            _ => false,
        }
    }
}

/// Error reported by a transport or dialog collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<TransportError> for EventError {
    fn from(err: TransportError) -> Self {
        EventError::network(err.message)
    }
}
