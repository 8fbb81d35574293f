//! Resilient event-publish pipeline.
//!
//! Keeps a broker connection alive in the background and lets the
//! application publish without ever blocking on, or failing because of, the
//! broker. When the broker is unreachable, publishes are skipped and
//! counted; when it comes back, the next retry tick reconnects.
//!
//! # Architecture
//!
//! - **Connection Supervisor** - owns the client and the
//!   `Disconnected -> Connecting -> Ready` state machine, retrying on a flat
//!   interval
//! - **Publisher** - sends when `Ready`, otherwise returns
//!   `Skipped(NotReady)` immediately; classifies failures into outcomes
//! - **Consumer Loop** - one per connection, decodes inbound JSON and hands
//!   it to a [`RecordHandler`], isolating failures per record
//! - **Shutdown Coordinator** - bounded disconnect on SIGINT or SIGTERM
//! - **Metrics** - outcome counters, publish latency, and a connection gauge
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use courier_broker::MemoryBroker;
//! use courier_core::OutboundMessage;
//! use courier_pipeline::{
//!     ConnectionSupervisor, LoggingRecordHandler, PrometheusMetrics, Publisher,
//!     ShutdownCoordinator, SupervisorConfig,
//! };
//!
//! # async fn example() -> courier_pipeline::Result<()> {
//! let metrics = Arc::new(PrometheusMetrics::new()?);
//! let supervisor = ConnectionSupervisor::new(
//!     SupervisorConfig::default(),
//!     Arc::new(MemoryBroker::new()),
//!     metrics,
//!     Arc::new(LoggingRecordHandler),
//! );
//! supervisor.start()?;
//!
//! let publisher = Publisher::new(supervisor.clone(), Duration::from_secs(5));
//! let outcome = publisher.publish(OutboundMessage::new("user-1", r#"{"price":10}"#)).await;
//! println!("publish outcome: {}", outcome.label());
//!
//! ShutdownCoordinator::new(supervisor, Duration::from_secs(5)).shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod error;
pub mod metrics;
pub mod publisher;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod supervisor;

pub use consumer::{
    process_record, HandlerError, InboundEvent, LoggingRecordHandler, RecordHandler, RecordOutcome,
};
pub use error::{PipelineError, Result};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use publisher::{Publisher, DEFAULT_SEND_TIMEOUT};
pub use retry::{RetryPolicy, DEFAULT_RETRY_INTERVAL};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, DEFAULT_SHUTDOWN_TIMEOUT};
pub use state::{ConnectionStateCell, ConnectionStatus};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
