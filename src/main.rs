//! Courier event-publish service.
//!
//! Main entry point. Starts the broker connection supervisor in the
//! background, serves the HTTP API, and on SIGINT or SIGTERM stops the
//! server and releases the broker session within the configured budget.

use std::sync::Arc;

use anyhow::{Context, Result};
use courier_api::{AppState, Config};
use courier_pipeline::{
    ConnectionSupervisor, LoggingRecordHandler, PrometheusMetrics, Publisher, ShutdownCoordinator,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!(
        brokers = %config.kafka_brokers,
        topic = %config.kafka_topic,
        client_id = %config.kafka_client_id,
        group_id = %config.kafka_group_id,
        backend = ?config.broker_backend,
        retry_interval_ms = config.retry_interval_ms,
        "configuration loaded"
    );

    let metrics = Arc::new(PrometheusMetrics::new().context("Failed to create metrics registry")?);
    let supervisor = ConnectionSupervisor::new(
        config.to_supervisor_config(),
        config.client_factory()?,
        metrics.clone(),
        Arc::new(LoggingRecordHandler),
    );
    supervisor.start().context("Failed to start connection supervisor")?;

    let publisher = Publisher::new(supervisor.clone(), config.send_timeout());
    let state = AppState::new(supervisor.clone(), publisher, metrics);
    let coordinator = ShutdownCoordinator::new(supervisor, config.shutdown_timeout());

    let addr = config.parse_server_addr()?;
    let request_timeout = std::time::Duration::from_secs(config.request_timeout);
    let stop = CancellationToken::new();

    let server = tokio::spawn({
        let stop = stop.clone();
        async move {
            let shutdown = async move { stop.cancelled().await };
            if let Err(e) = courier_api::start_server(state, addr, request_timeout, shutdown).await {
                error!(error = %e, "http server failed");
            }
        }
    });

    info!(addr = %addr, "courier is ready to accept events");

    coordinator.wait_for_signal().await;
    stop.cancel();

    if tokio::time::timeout(coordinator.timeout(), server).await.is_err() {
        error!("http server did not stop in time");
    }

    let outcome = coordinator.shutdown().await;
    info!(outcome = ?outcome, "courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{default_filter},courier=debug,tower_http=debug")))
        .context("Invalid RUST_LOG filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
    Ok(())
}
