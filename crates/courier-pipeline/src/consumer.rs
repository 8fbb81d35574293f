//! Inbound consumer loop.
//!
//! One loop runs per live connection. It receives records, decodes each
//! payload as JSON, and hands the result to a pluggable [`RecordHandler`].
//! Failures are isolated per record: a payload that does not decode, a
//! handler that returns an error, and a handler that panics are all logged
//! and counted, and the loop moves on to the next record.
//!
//! The loop stops when its connection's cancellation token fires (shutdown
//! or a newer connection) or when a receive fails at the connection level,
//! which it reports to the supervisor with its own epoch.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_broker::BrokerClient;
use courier_core::{Clock, InboundRecord};
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{metrics::MetricsSink, supervisor::ConnectionSupervisor};

/// Decoded inbound record handed to a [`RecordHandler`].
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Record as received from the broker.
    pub record: InboundRecord,
    /// Payload decoded as JSON.
    pub document: serde_json::Value,
}

/// Error returned by a [`RecordHandler`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Application callback for inbound events.
///
/// Errors and panics are contained by the consumer loop; a failing handler
/// never stops consumption.
#[async_trait]
pub trait RecordHandler: Send + Sync + std::fmt::Debug {
    /// Processes one decoded event.
    async fn handle(&self, event: InboundEvent) -> Result<(), HandlerError>;
}

/// Handler that logs each event and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRecordHandler;

#[async_trait]
impl RecordHandler for LoggingRecordHandler {
    async fn handle(&self, event: InboundEvent) -> Result<(), HandlerError> {
        info!(
            topic = %event.record.topic,
            partition = event.record.partition,
            offset = event.record.offset,
            key = event.record.key.as_deref().unwrap_or_default(),
            "inbound event received"
        );
        Ok(())
    }
}

/// What happened to one inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordOutcome {
    /// Decoded and handled.
    Processed,
    /// Payload was not valid JSON.
    DecodeError,
    /// Handler returned an error or panicked.
    HandlerError,
}

impl RecordOutcome {
    /// Metric label for `records_consumed_total{outcome}`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::DecodeError => "decode_error",
            Self::HandlerError => "handler_error",
        }
    }
}

/// Decodes `record` and runs `handler` on it, containing every failure.
pub async fn process_record(handler: &dyn RecordHandler, record: InboundRecord) -> RecordOutcome {
    let topic = record.topic.clone();
    let partition = record.partition;
    let offset = record.offset;

    let document = match record.decode_json() {
        Ok(document) => document,
        Err(e) => {
            warn!(topic = %topic, partition, offset, error = %e, "skipping undecodable record");
            return RecordOutcome::DecodeError;
        },
    };

    let handled = AssertUnwindSafe(handler.handle(InboundEvent { record, document }))
        .catch_unwind()
        .await;

    match handled {
        Ok(Ok(())) => {
            debug!(topic = %topic, partition, offset, "record processed");
            RecordOutcome::Processed
        },
        Ok(Err(e)) => {
            warn!(topic = %topic, partition, offset, error = %e, "record handler failed");
            RecordOutcome::HandlerError
        },
        Err(_panic) => {
            error!(topic = %topic, partition, offset, "record handler panicked");
            RecordOutcome::HandlerError
        },
    }
}

/// Consumer loop bound to one connection epoch.
pub(crate) struct ConsumerLoop {
    pub(crate) client: Arc<dyn BrokerClient>,
    pub(crate) supervisor: ConnectionSupervisor,
    pub(crate) handler: Arc<dyn RecordHandler>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) epoch: u64,
    pub(crate) token: CancellationToken,
    pub(crate) backoff: Duration,
}

impl ConsumerLoop {
    /// Receives and processes records until cancelled or disconnected.
    pub(crate) async fn run(self) {
        info!(epoch = self.epoch, "inbound consumer loop starting");

        loop {
            let received = tokio::select! {
                received = self.client.recv() => received,
                () = self.token.cancelled() => break,
            };

            match received {
                Ok(record) => {
                    let outcome = process_record(self.handler.as_ref(), record).await;
                    self.metrics.record_consumed(outcome);
                },
                Err(e) if e.is_connection_level() => {
                    self.supervisor.report_connection_lost(self.epoch, &e);
                    break;
                },
                Err(e) => {
                    warn!(
                        epoch = self.epoch,
                        error = %e,
                        backoff = ?self.backoff,
                        "inbound receive failed, retrying"
                    );
                    tokio::select! {
                        () = self.clock.sleep(self.backoff) => {},
                        () = self.token.cancelled() => break,
                    }
                },
            }
        }

        info!(epoch = self.epoch, "inbound consumer loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bytes::Bytes;

    use super::*;

    #[derive(Debug)]
    struct PanickingHandler;

    #[async_trait]
    impl RecordHandler for PanickingHandler {
        async fn handle(&self, _event: InboundEvent) -> Result<(), HandlerError> {
            panic!("handler bug");
        }
    }

    #[derive(Debug)]
    struct RejectingHandler;

    #[async_trait]
    impl RecordHandler for RejectingHandler {
        async fn handle(&self, _event: InboundEvent) -> Result<(), HandlerError> {
            Err(HandlerError::new("rejected"))
        }
    }

    fn record(payload: &'static str) -> InboundRecord {
        InboundRecord {
            topic: "events".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: Bytes::from_static(payload.as_bytes()),
            headers: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn valid_record_is_processed() {
        let outcome = process_record(&LoggingRecordHandler, record(r#"{"a":1}"#)).await;
        assert_eq!(outcome, RecordOutcome::Processed);
    }

    #[tokio::test]
    async fn malformed_payload_is_contained() {
        let outcome = process_record(&LoggingRecordHandler, record("not-json")).await;
        assert_eq!(outcome, RecordOutcome::DecodeError);
    }

    #[tokio::test]
    async fn handler_errors_and_panics_are_contained() {
        assert_eq!(
            process_record(&RejectingHandler, record("{}")).await,
            RecordOutcome::HandlerError
        );
        assert_eq!(
            process_record(&PanickingHandler, record("{}")).await,
            RecordOutcome::HandlerError
        );
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(RecordOutcome::Processed.label(), "processed");
        assert_eq!(RecordOutcome::DecodeError.label(), "decode_error");
        assert_eq!(RecordOutcome::HandlerError.label(), "handler_error");
    }
}
