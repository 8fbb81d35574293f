//! Courier HTTP API.
//!
//! Exposes health, metrics, and an event intake endpoint on top of the
//! publish pipeline, plus the service configuration loader.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use courier_core::Clock;
use courier_pipeline::{ConnectionSupervisor, PrometheusMetrics, Publisher};

pub mod config;
pub mod handlers;
pub mod server;

pub use config::{BrokerBackend, Config};
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Connection supervisor, read for health.
    pub supervisor: ConnectionSupervisor,
    /// Publisher used by the event intake endpoint.
    pub publisher: Publisher,
    /// Registry rendered by `/metrics`.
    pub metrics: Arc<PrometheusMetrics>,
    /// Clock for response timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates state sharing the supervisor's clock.
    pub fn new(
        supervisor: ConnectionSupervisor,
        publisher: Publisher,
        metrics: Arc<PrometheusMetrics>,
    ) -> Self {
        let clock = Arc::clone(supervisor.clock());
        Self { supervisor, publisher, metrics, clock }
    }
}
