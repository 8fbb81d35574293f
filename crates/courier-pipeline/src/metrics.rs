//! Observability sink for publish outcomes and connection state.
//!
//! The pipeline reports through the [`MetricsSink`] trait so tests and
//! embedders can swap the backend. [`PrometheusMetrics`] is the production
//! implementation and owns its own registry, so several pipelines (or
//! several tests) in one process never collide.
//!
//! Exposed series:
//!
//! | name | type | labels |
//! |---|---|---|
//! | `messages_published_total` | counter | `outcome` = success, skipped, failure |
//! | `publish_duration_seconds` | histogram | `outcome` = success, failure |
//! | `publish_errors_total` | counter | `error_class` = connection_error, timeout, unknown |
//! | `connection_status` | gauge | 1 when ready, else 0 |
//! | `connection_attempts_total` | counter | `result` = success, failure |
//! | `records_consumed_total` | counter | `outcome` = processed, decode_error, handler_error |

use std::fmt;

use courier_core::{ConnectionState, PublishOutcome};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tracing::debug;

use crate::{
    consumer::RecordOutcome,
    error::{PipelineError, Result},
};

/// Destination for pipeline measurements.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// Records the outcome of one publish call.
    fn record_publish(&self, outcome: &PublishOutcome);

    /// Publishes the current connection state.
    fn set_connection_state(&self, state: ConnectionState);

    /// Records the result of one connection attempt.
    fn record_connection_attempt(&self, success: bool);

    /// Records the outcome of processing one inbound record.
    fn record_consumed(&self, outcome: RecordOutcome);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_publish(&self, _outcome: &PublishOutcome) {}

    fn set_connection_state(&self, _state: ConnectionState) {}

    fn record_connection_attempt(&self, _success: bool) {}

    fn record_consumed(&self, _outcome: RecordOutcome) {}
}

const DURATION_BUCKETS: &[f64] =
    &[0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Prometheus-backed metrics with a private registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    published: IntCounterVec,
    duration: HistogramVec,
    errors: IntCounterVec,
    status: IntGauge,
    attempts: IntCounterVec,
    consumed: IntCounterVec,
}

impl PrometheusMetrics {
    /// Creates and registers every pipeline metric.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Metrics`] if a metric definition is invalid.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let published = IntCounterVec::new(
            Opts::new("messages_published_total", "Publish calls by outcome"),
            &["outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("publish_duration_seconds", "Broker send latency by outcome")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["outcome"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("publish_errors_total", "Failed publishes by error class"),
            &["error_class"],
        )?;
        let status =
            IntGauge::new("connection_status", "Broker connection status (1 = ready, 0 = not)")?;
        let attempts = IntCounterVec::new(
            Opts::new("connection_attempts_total", "Broker connection attempts by result"),
            &["result"],
        )?;
        let consumed = IntCounterVec::new(
            Opts::new("records_consumed_total", "Inbound records by processing outcome"),
            &["outcome"],
        )?;

        register(&registry, Box::new(published.clone()), "messages_published_total")?;
        register(&registry, Box::new(duration.clone()), "publish_duration_seconds")?;
        register(&registry, Box::new(errors.clone()), "publish_errors_total")?;
        register(&registry, Box::new(status.clone()), "connection_status")?;
        register(&registry, Box::new(attempts.clone()), "connection_attempts_total")?;
        register(&registry, Box::new(consumed.clone()), "records_consumed_total")?;

        Ok(Self { registry, published, duration, errors, status, attempts, consumed })
    }

    /// Underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every metric in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Metrics`] if encoding fails.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| PipelineError::metrics(e.to_string()))
    }

    /// Current value of `messages_published_total{outcome}`.
    pub fn published_count(&self, outcome: &str) -> u64 {
        self.published.with_label_values(&[outcome]).get()
    }

    /// Current value of `publish_errors_total{error_class}`.
    pub fn error_count(&self, error_class: &str) -> u64 {
        self.errors.with_label_values(&[error_class]).get()
    }

    /// Number of observations in `publish_duration_seconds{outcome}`.
    pub fn duration_sample_count(&self, outcome: &str) -> u64 {
        self.duration.with_label_values(&[outcome]).get_sample_count()
    }

    /// Current value of `connection_status`.
    pub fn connection_status(&self) -> i64 {
        self.status.get()
    }

    /// Current value of `connection_attempts_total{result}`.
    pub fn attempt_count(&self, result: &str) -> u64 {
        self.attempts.with_label_values(&[result]).get()
    }

    /// Current value of `records_consumed_total{outcome}`.
    pub fn consumed_count(&self, outcome: &str) -> u64 {
        self.consumed.with_label_values(&[outcome]).get()
    }
}

impl fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusMetrics")
            .field("connection_status", &self.status.get())
            .finish_non_exhaustive()
    }
}

fn register(
    registry: &Registry,
    collector: Box<dyn prometheus::core::Collector>,
    name: &str,
) -> Result<()> {
    match registry.register(collector) {
        Ok(()) => Ok(()),
        Err(prometheus::Error::AlreadyReg) => {
            debug!(metric = name, "metric already registered; continuing");
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_publish(&self, outcome: &PublishOutcome) {
        let label = outcome.label();
        self.published.with_label_values(&[label]).inc();

        if let Some(duration) = outcome.duration() {
            self.duration.with_label_values(&[label]).observe(duration.as_secs_f64());
        }
        if let Some(error_class) = outcome.error_class() {
            let error_class = error_class.to_string();
            self.errors.with_label_values(&[error_class.as_str()]).inc();
        }
    }

    fn set_connection_state(&self, state: ConnectionState) {
        self.status.set(state.gauge_value());
    }

    fn record_connection_attempt(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.attempts.with_label_values(&[result]).inc();
    }

    fn record_consumed(&self, outcome: RecordOutcome) {
        self.consumed.with_label_values(&[outcome.label()]).inc();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_core::ErrorClass;

    use super::*;

    #[test]
    fn publish_outcomes_update_counters_and_histogram() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_publish(&PublishOutcome::Sent { duration: Duration::from_millis(4) });
        metrics.record_publish(&PublishOutcome::not_ready());
        metrics.record_publish(&PublishOutcome::Failed {
            error_class: ErrorClass::Timeout,
            duration: Duration::from_millis(9),
        });

        assert_eq!(metrics.published_count("success"), 1);
        assert_eq!(metrics.published_count("skipped"), 1);
        assert_eq!(metrics.published_count("failure"), 1);
        assert_eq!(metrics.error_count("timeout"), 1);
        assert_eq!(metrics.error_count("connection_error"), 0);
        assert_eq!(metrics.duration_sample_count("success"), 1);
        assert_eq!(metrics.duration_sample_count("skipped"), 0);
    }

    #[test]
    fn connection_gauge_tracks_state() {
        let metrics = PrometheusMetrics::new().unwrap();
        assert_eq!(metrics.connection_status(), 0);

        metrics.set_connection_state(ConnectionState::Ready);
        assert_eq!(metrics.connection_status(), 1);

        metrics.set_connection_state(ConnectionState::Connecting);
        assert_eq!(metrics.connection_status(), 0);
    }

    #[test]
    fn encode_renders_text_format() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_publish(&PublishOutcome::not_ready());
        metrics.record_connection_attempt(false);

        let text = metrics.encode().unwrap();
        assert!(text.contains("messages_published_total{outcome=\"skipped\"} 1"));
        assert!(text.contains("connection_attempts_total{result=\"failure\"} 1"));
        assert!(text.contains("# TYPE connection_status gauge"));
    }

    #[test]
    fn registries_are_independent() {
        let a = PrometheusMetrics::new().unwrap();
        let b = PrometheusMetrics::new().unwrap();

        a.record_consumed(RecordOutcome::Processed);
        assert_eq!(a.consumed_count("processed"), 1);
        assert_eq!(b.consumed_count("processed"), 0);
    }
}
