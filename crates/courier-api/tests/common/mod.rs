//! Shared setup for HTTP handler tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use courier_api::{create_router, AppState};
use courier_broker::MemoryBroker;
use courier_pipeline::{
    ConnectionSupervisor, LoggingRecordHandler, PrometheusMetrics, Publisher, SupervisorConfig,
};
use serde_json::Value;
use tower::ServiceExt;

pub struct TestApp {
    pub broker: MemoryBroker,
    pub metrics: Arc<PrometheusMetrics>,
    pub supervisor: ConnectionSupervisor,
    pub router: Router,
}

impl TestApp {
    /// App wired to `broker`, not yet connected.
    pub fn new(broker: MemoryBroker) -> Self {
        let metrics = Arc::new(PrometheusMetrics::new().expect("metrics registry"));
        let supervisor = ConnectionSupervisor::new(
            SupervisorConfig::default(),
            Arc::new(broker.clone()),
            metrics.clone(),
            Arc::new(LoggingRecordHandler),
        );
        let publisher = Publisher::new(supervisor.clone(), Duration::from_secs(1));
        let router = create_router(AppState::new(supervisor.clone(), publisher, metrics.clone()));

        Self { broker, metrics, supervisor, router }
    }

    /// App whose broker connection is already `Ready`.
    pub async fn connected() -> Self {
        let app = Self::new(MemoryBroker::new());
        app.supervisor.attempt_connect().await;
        assert!(app.supervisor.is_ready(), "memory broker should accept the handshake");
        app
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.expect("failed to make request")
    }

    pub async fn post(&self, uri: &str, body: impl Into<Body>) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap();
        self.router.clone().oneshot(request).await.expect("failed to make request")
    }

    /// Polls until the publisher has recorded `count` outcomes labelled `outcome`.
    pub async fn wait_for_published(&self, outcome: &str, count: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.metrics.published_count(outcome) < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} {outcome} publishes, got {}",
                self.metrics.published_count(outcome)
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    String::from_utf8(bytes.to_vec()).expect("response body should be UTF-8")
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).expect("response should be valid JSON")
}
