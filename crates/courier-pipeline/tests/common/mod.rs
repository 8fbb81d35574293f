//! Shared harness for pipeline integration tests.
//!
//! Wires a supervisor and publisher to an in-memory broker, a controllable
//! clock, and a real Prometheus registry, so tests can drive retry ticks
//! explicitly and assert on the exported series.

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use courier_broker::{BrokerConfig, MemoryBroker};
use courier_core::{Clock, TestClock};
use courier_pipeline::{
    ConnectionSupervisor, HandlerError, InboundEvent, PrometheusMetrics, Publisher, RecordHandler,
    RetryPolicy, ShutdownCoordinator, SupervisorConfig,
};

/// Retry interval used by the harness.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Real-time bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(2);

/// Handler that remembers every event it was given.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<InboundEvent>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<InboundEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Polls until at least `count` events arrived.
    pub async fn wait_for(&self, count: usize) -> Result<Vec<InboundEvent>> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let events = self.events();
            if events.len() >= count {
                return Ok(events);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("expected {count} events, got {}", events.len());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl RecordHandler for RecordingHandler {
    async fn handle(&self, event: InboundEvent) -> Result<(), HandlerError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Pipeline wired to a [`MemoryBroker`] and a [`TestClock`].
pub struct Harness {
    pub broker: MemoryBroker,
    pub clock: TestClock,
    pub metrics: Arc<PrometheusMetrics>,
    pub handler: Arc<RecordingHandler>,
    pub supervisor: ConnectionSupervisor,
    pub publisher: Publisher,
}

impl Harness {
    pub fn new(broker: MemoryBroker) -> Result<Self> {
        Self::with_send_timeout(broker, Duration::from_secs(1))
    }

    pub fn with_send_timeout(broker: MemoryBroker, send_timeout: Duration) -> Result<Self> {
        let clock = TestClock::new();
        let metrics = Arc::new(PrometheusMetrics::new()?);
        let handler = Arc::new(RecordingHandler::default());

        let config = SupervisorConfig {
            broker: BrokerConfig::default(),
            retry: RetryPolicy::flat(RETRY_INTERVAL),
            connect_timeout: Duration::from_secs(1),
            consumer_backoff: Duration::from_millis(10),
        };

        let supervisor = ConnectionSupervisor::with_clock(
            config,
            Arc::new(broker.clone()),
            metrics.clone(),
            handler.clone(),
            Arc::new(clock.clone()) as Arc<dyn Clock>,
        );
        let publisher = Publisher::new(supervisor.clone(), send_timeout);

        Ok(Self { broker, clock, metrics, handler, supervisor, publisher })
    }

    /// Connects once without the retry loop and asserts success.
    pub async fn connect(&self) -> Result<()> {
        self.supervisor.attempt_connect().await;
        if !self.supervisor.is_ready() {
            bail!("expected Ready, got {}", self.supervisor.state());
        }
        Ok(())
    }

    /// Starts the retry loop and waits until it parks on the clock.
    pub async fn start(&self) -> Result<()> {
        self.supervisor.start()?;
        self.wait_for_retry_sleep().await
    }

    /// Waits until the retry loop is parked on the clock.
    pub async fn wait_for_retry_sleep(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.clock.sleepers() == 0 {
            if tokio::time::Instant::now() >= deadline {
                bail!("retry loop never slept");
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    /// Fires the next retry tick and waits for the loop to park again.
    pub async fn tick(&self) -> Result<()> {
        self.wait_for_retry_sleep().await?;
        let attempts_before = self.total_attempts();
        self.clock.advance(RETRY_INTERVAL);

        let deadline = tokio::time::Instant::now() + WAIT;
        while self.total_attempts() == attempts_before {
            if tokio::time::Instant::now() >= deadline {
                bail!("retry tick did not attempt a connection");
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.wait_for_retry_sleep().await
    }

    pub fn total_attempts(&self) -> u64 {
        self.metrics.attempt_count("success") + self.metrics.attempt_count("failure")
    }

    pub fn shutdown_coordinator(&self, timeout: Duration) -> ShutdownCoordinator {
        ShutdownCoordinator::new(self.supervisor.clone(), timeout)
    }
}
