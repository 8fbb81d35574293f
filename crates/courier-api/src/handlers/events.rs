//! Event intake handler.
//!
//! Accepts a JSON document and publishes it keyed by the path segment.
//! The publish runs on a detached task, so the response never waits on the
//! broker; its outcome is visible only through metrics and logs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use courier_core::{ConnectionState, OutboundMessage, HEADER_CONTENT_TYPE};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::AppState;

/// Origin header value stamped on messages accepted over HTTP.
pub const API_ORIGIN: &str = "courier-api";

/// Largest accepted request body.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Response for an accepted event.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    /// Identifier stamped on the outbound message
    pub message_id: String,
    /// Connection state when the event was accepted
    pub connection: ConnectionState,
}

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable error code
    pub code: &'static str,
    /// Human-readable error description
    pub message: String,
}

/// Publishes a JSON event keyed by `key`.
///
/// Returns 202 once the event is handed to the publisher, whether or not
/// the broker is reachable.
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 400: Body is not valid JSON
/// - 413: Payload too large
#[instrument(name = "publish_event", skip(app_state, body), fields(key = %key, bytes = body.len()))]
pub async fn publish_event(
    Path(key): Path<String>,
    State(app_state): State<AppState>,
    body: Bytes,
) -> Response {
    if body.len() > MAX_PAYLOAD_SIZE {
        warn!(payload_size = body.len(), limit = MAX_PAYLOAD_SIZE, "payload exceeds size limit");
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            format!("payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}", body.len()),
        );
    }

    if let Err(e) = serde_json::from_slice::<serde_json::Value>(&body) {
        debug!(error = %e, "rejecting non-JSON event body");
        return error_response(StatusCode::BAD_REQUEST, "invalid_json", e.to_string());
    }

    let message = OutboundMessage::new(key, body)
        .with_header(HEADER_CONTENT_TYPE, "application/json")
        .with_origin(API_ORIGIN);
    let message_id = message.id().to_string();

    // Detached: the outcome is recorded by the publisher itself.
    drop(app_state.publisher.spawn_publish(message));

    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { message_id, connection: app_state.supervisor.state() }),
    )
        .into_response()
}

fn error_response(status: StatusCode, code: &'static str, message: String) -> Response {
    (status, Json(ErrorResponse { error: ErrorDetail { code, message } })).into_response()
}
