//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! The server never blocks on the broker: `/health` reads the connection
//! state without I/O and `/events/{key}` hands messages to the publisher
//! on a detached task.

use std::{future::Future, net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{handlers, AppState};

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    create_router_with_timeout(state, DEFAULT_REQUEST_TIMEOUT)
}

/// Creates the router with an explicit request timeout.
pub fn create_router_with_timeout(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check))
        .route("/metrics", get(handlers::metrics));

    let api_routes = Router::new().route("/events/{key}", post(handlers::publish_event));

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject request ID into all responses.
///
/// Adds X-Request-Id header for tracing requests across services.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Serves the API on `addr` until `shutdown` resolves.
///
/// In-flight requests finish before the returned future completes.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = create_router_with_timeout(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!(addr = %actual_addr, "http server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("http server stopped");
    Ok(())
}
