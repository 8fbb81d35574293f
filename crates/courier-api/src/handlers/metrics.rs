//! Prometheus scrape endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::AppState;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders every pipeline metric in the text exposition format.
pub async fn metrics(State(app_state): State<AppState>) -> Response {
    match app_state.metrics.encode() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}
