//! HTTP request handlers for the courier API.
//!
//! Handlers are grouped by functionality:
//! - `health` - health and liveness probes
//! - `metrics` - Prometheus scrape endpoint
//! - `events` - event intake feeding the publisher
//!
//! No handler waits on the broker. Health reads the connection state
//! without I/O, and intake answers before the publish completes.

pub mod events;
pub mod health;
pub mod metrics;

pub use events::publish_event;
pub use health::{health_check, liveness_check};
pub use metrics::metrics;
