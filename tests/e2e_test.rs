//! End-to-end tests for the assembled service.
//!
//! Wires configuration, supervisor, publisher, HTTP router, and shutdown
//! exactly as the binary does, over the in-memory broker and real timers,
//! and walks through an outage and recovery.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{body::Body, http::Request, Router};
use courier_api::{create_router, AppState, Config};
use courier_broker::MemoryBroker;
use courier_core::ConnectionState;
use courier_pipeline::{
    ConnectionSupervisor, LoggingRecordHandler, PrometheusMetrics, Publisher, ShutdownCoordinator,
    ShutdownOutcome,
};
use tower::ServiceExt;

struct Service {
    broker: MemoryBroker,
    metrics: Arc<PrometheusMetrics>,
    supervisor: ConnectionSupervisor,
    coordinator: ShutdownCoordinator,
    router: Router,
}

fn service(broker: MemoryBroker) -> Result<Service> {
    let config = Config {
        retry_interval_ms: 50,
        connect_timeout_ms: 500,
        send_timeout_ms: 500,
        shutdown_timeout_ms: 500,
        ..Config::default()
    };

    let metrics = Arc::new(PrometheusMetrics::new()?);
    let supervisor = ConnectionSupervisor::new(
        config.to_supervisor_config(),
        Arc::new(broker.clone()),
        metrics.clone(),
        Arc::new(LoggingRecordHandler),
    );
    let publisher = Publisher::new(supervisor.clone(), config.send_timeout());
    let router = create_router(AppState::new(supervisor.clone(), publisher, metrics.clone()));
    let coordinator = ShutdownCoordinator::new(supervisor.clone(), config.shutdown_timeout());

    Ok(Service { broker, metrics, supervisor, coordinator, router })
}

async fn post_event(router: &Router, key: &str, body: &'static str) -> Result<u16> {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/events/{key}"))
        .header("content-type", "application/json")
        .body(Body::from(body))?;
    Ok(router.clone().oneshot(request).await?.status().as_u16())
}

async fn wait_for(read: impl Fn() -> u64, expected: u64) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while read() < expected {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "timed out waiting for {expected}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

#[tokio::test]
async fn outage_then_recovery_through_http() -> Result<()> {
    let svc = service(MemoryBroker::unreachable())?;
    svc.supervisor.start()?;

    // Broker down: intake still answers, publishes are skipped.
    for n in 0..3 {
        assert_eq!(post_event(&svc.router, &format!("user-{n}"), r#"{"n":1}"#).await?, 202);
    }
    wait_for(|| svc.metrics.published_count("skipped"), 3).await?;
    assert_eq!(svc.metrics.connection_status(), 0);
    assert!(svc.broker.published().is_empty());

    // Broker back: the next tick reconnects.
    svc.broker.set_reachable(true);
    assert!(svc.supervisor.wait_until_ready(Duration::from_secs(2)).await);
    assert_eq!(svc.metrics.connection_status(), 1);

    assert_eq!(post_event(&svc.router, "user-9", r#"{"n":9}"#).await?, 202);
    wait_for(|| svc.metrics.published_count("success"), 1).await?;
    wait_for(|| svc.metrics.consumed_count("processed"), 1).await?;

    let outcome = svc.coordinator.shutdown().await;
    assert_eq!(outcome, ShutdownOutcome::Clean);
    assert_eq!(svc.supervisor.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn connection_loss_is_recovered_automatically() -> Result<()> {
    let svc = service(MemoryBroker::new())?;
    svc.supervisor.start()?;
    assert!(svc.supervisor.wait_until_ready(Duration::from_secs(2)).await);

    svc.broker.set_reachable(false);
    assert!(
        svc.supervisor.wait_for_state(ConnectionState::Disconnected, Duration::from_secs(2)).await
    );

    svc.broker.set_reachable(true);
    assert!(svc.supervisor.wait_until_ready(Duration::from_secs(2)).await);
    assert!(svc.supervisor.status().epoch >= 2);

    svc.coordinator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_is_bounded_when_broker_hangs() -> Result<()> {
    let svc = service(MemoryBroker::new())?;
    svc.supervisor.start()?;
    assert!(svc.supervisor.wait_until_ready(Duration::from_secs(2)).await);
    svc.broker.set_disconnect_delay(Duration::from_secs(60));

    let started = std::time::Instant::now();
    let outcome = svc.coordinator.shutdown().await;

    assert_eq!(outcome, ShutdownOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(svc.metrics.connection_status(), 0);
    Ok(())
}
