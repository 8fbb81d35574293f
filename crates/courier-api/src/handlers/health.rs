//! Health check handlers for service monitoring.
//!
//! The broker is a best-effort dependency: the service keeps running and
//! skips publishes while it is unreachable. Health therefore reports
//! `degraded` rather than failing the probe when the connection is down.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use courier_core::{Clock, ConnectionState};
use courier_pipeline::ConnectionSupervisor;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Broker connection is ready
    Healthy,
    /// Serving, but publishes are being skipped
    Degraded,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Broker connection state
    pub broker: BrokerHealth,
}

/// Broker connection health.
#[derive(Debug, Serialize)]
pub struct BrokerHealth {
    /// Connection state machine position
    pub state: ConnectionState,
    /// Whether publishes are currently attempted
    pub ready: bool,
    /// Number of `Ready` transitions so far
    pub epoch: u64,
}

/// Builds health responses from the supervisor's state.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Reports broker connection health. Performs no I/O.
    pub fn health_check(&self, supervisor: &ConnectionSupervisor) -> HealthResponse {
        let status = supervisor.status();
        let ready = status.state == ConnectionState::Ready;

        HealthResponse {
            status: if ready { HealthStatus::Healthy } else { HealthStatus::Degraded },
            timestamp: DateTime::<Utc>::from(self.clock.now_system()),
            checks: HealthChecks {
                broker: BrokerHealth { state: status.state, ready, epoch: status.epoch },
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check endpoint handler.
///
/// Always answers 200; the body says whether publishing is live.
#[instrument(name = "health_check", skip(app_state))]
pub async fn health_check(State(app_state): State<AppState>) -> Response {
    let response = HealthService::new(app_state.clock.clone()).health_check(&app_state.supervisor);

    debug!(
        status = ?response.status,
        broker_state = %response.checks.broker.state,
        "health check completed"
    );

    (StatusCode::OK, Json(response)).into_response()
}

/// Liveness check endpoint for orchestration probes.
///
/// Only proves the HTTP server is responding.
#[instrument(name = "liveness_check", skip(app_state))]
pub async fn liveness_check(State(app_state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": DateTime::<Utc>::from(app_state.clock.now_system()),
        "service": "courier"
    });

    (StatusCode::OK, Json(response)).into_response()
}
