//! Error types for pipeline lifecycle operations.
//!
//! None of these reach the publish caller: publishing reports a
//! [`courier_core::PublishOutcome`] instead. They surface from lifecycle
//! calls such as starting the supervisor or building the metrics registry.

use courier_broker::BrokerError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by pipeline lifecycle operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Broker client failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// `start` was called twice on the same supervisor.
    #[error("connection supervisor already started")]
    AlreadyStarted,

    /// Metric could not be created or registered.
    #[error("metrics error: {message}")]
    Metrics {
        /// Registry error message
        message: String,
    },
}

impl PipelineError {
    /// Creates a metrics error.
    pub fn metrics(message: impl Into<String>) -> Self {
        Self::Metrics { message: message.into() }
    }
}

impl From<prometheus::Error> for PipelineError {
    fn from(error: prometheus::Error) -> Self {
        Self::metrics(error.to_string())
    }
}
