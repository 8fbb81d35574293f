//! Error types for broker client operations.
//!
//! Broker failures are classified along one axis that matters to the
//! pipeline: did the session die (connection-level), did the broker fail to
//! answer in time (timeout), or neither. The publisher maps this onto
//! [`ErrorClass`] and only connection-level errors tear down the
//! connection state.

use courier_core::ErrorClass;
use thiserror::Error;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors returned by broker clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Transport or session failure; the broker is unreachable.
    #[error("broker connection failed: {message}")]
    Connection {
        /// Error message describing the transport failure
        message: String,
    },

    /// Operation attempted on a client with no live session.
    #[error("broker session is not connected")]
    NotConnected,

    /// Broker did not answer within the allotted time.
    #[error("broker {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// Subscribing to a topic failed.
    #[error("subscription to {topic} failed: {message}")]
    Subscription {
        /// Topic that could not be subscribed
        topic: String,
        /// Broker error message
        message: String,
    },

    /// Broker rejected the request for a reason other than transport.
    #[error("broker client error: {message}")]
    Client {
        /// Broker error message
        message: String,
    },

    /// Client could not be constructed from the given configuration.
    #[error("invalid broker configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl BrokerError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), timeout_ms }
    }

    /// Creates a subscription error.
    pub fn subscription(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscription { topic: topic.into(), message: message.into() }
    }

    /// Creates a generic client error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Returns `true` if the session should be considered lost.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::NotConnected)
    }

    /// Classification used for publish metrics.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::from(self)
    }
}

impl From<&BrokerError> for ErrorClass {
    fn from(error: &BrokerError) -> Self {
        match error {
            BrokerError::Connection { .. } | BrokerError::NotConnected => Self::Connection,
            BrokerError::Timeout { .. } => Self::Timeout,
            BrokerError::Subscription { .. }
            | BrokerError::Client { .. }
            | BrokerError::Configuration { .. } => Self::Unknown,
        }
    }
}
