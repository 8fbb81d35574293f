//! Non-blocking publisher.
//!
//! Publishing never fails from the caller's point of view. When the
//! connection is not `Ready` the call returns `Skipped(NotReady)` right away
//! without touching the network. Otherwise it sends once, bounded by the
//! send timeout, and classifies what happened:
//!
//! - acknowledged: `Sent(duration)`
//! - connection-level error: `Failed(ConnectionError)`, and the connection
//!   is reported lost so the next retry tick reconnects
//! - timeout (broker-reported or local bound): `Failed(Timeout)`, state
//!   unchanged
//! - anything else: `Failed(Unknown)`
//!
//! Every outcome is recorded to the metrics sink before it is returned.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, ErrorClass, OutboundMessage, PublishOutcome};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use crate::{metrics::MetricsSink, supervisor::ConnectionSupervisor};

/// Default upper bound for one send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes outbound messages through the supervised connection.
#[derive(Debug, Clone)]
pub struct Publisher {
    supervisor: ConnectionSupervisor,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    topic: String,
    send_timeout: Duration,
}

impl Publisher {
    /// Creates a publisher that sends to the supervisor's configured topic.
    pub fn new(supervisor: ConnectionSupervisor, send_timeout: Duration) -> Self {
        Self {
            metrics: Arc::clone(supervisor.metrics()),
            clock: Arc::clone(supervisor.clock()),
            topic: supervisor.config().broker.topic.clone(),
            supervisor,
            send_timeout,
        }
    }

    /// Topic messages are published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes `message` and reports what happened. Never returns an
    /// error and never waits on the network when the connection is down.
    pub async fn publish(&self, message: OutboundMessage) -> PublishOutcome {
        let outcome = self.try_publish(&message).await;
        self.metrics.record_publish(&outcome);
        outcome
    }

    /// Publishes on a detached task.
    ///
    /// The returned handle may be dropped; the outcome is still recorded.
    pub fn spawn_publish(&self, message: OutboundMessage) -> JoinHandle<PublishOutcome> {
        let publisher = self.clone();
        tokio::spawn(async move { publisher.publish(message).await })
    }

    async fn try_publish(&self, message: &OutboundMessage) -> PublishOutcome {
        if self.supervisor.ensure_initialized().is_err() {
            return PublishOutcome::not_ready();
        }

        let Some((client, epoch)) = self.supervisor.ready_connection() else {
            debug!(
                key = message.key(),
                state = %self.supervisor.state(),
                "broker not ready, publish skipped"
            );
            return PublishOutcome::not_ready();
        };

        let span = info_span!(
            "publish",
            topic = %self.topic,
            key = message.key(),
            message_id = %message.id(),
            bytes = message.payload_size()
        );

        let started = self.clock.now();
        let sent = tokio::time::timeout(self.send_timeout, client.send(&self.topic, message))
            .instrument(span)
            .await;
        let duration = self.clock.now().saturating_duration_since(started);

        match sent {
            Ok(Ok(())) => {
                debug!(key = message.key(), duration = ?duration, "message published");
                PublishOutcome::Sent { duration }
            },
            Ok(Err(e)) => {
                let error_class = e.class();
                warn!(
                    key = message.key(),
                    error = %e,
                    error_class = %error_class,
                    "publish failed"
                );
                if e.is_connection_level() {
                    self.supervisor.report_connection_lost(epoch, &e);
                }
                PublishOutcome::Failed { error_class, duration }
            },
            Err(_elapsed) => {
                warn!(
                    key = message.key(),
                    timeout = ?self.send_timeout,
                    "publish timed out"
                );
                PublishOutcome::Failed { error_class: ErrorClass::Timeout, duration }
            },
        }
    }
}
