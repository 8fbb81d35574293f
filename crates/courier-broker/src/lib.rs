//! Broker client boundary for the courier pipeline.
//!
//! The rest of the workspace talks to the message broker only through the
//! [`BrokerClient`] trait, and constructs clients only through a
//! [`ClientFactory`]. Two implementations ship here:
//!
//! - [`MemoryBroker`] - in-process broker with fault injection, used by the
//!   `memory` backend and by every test in the workspace
//! - `KafkaClientFactory` - rdkafka producer and consumer pair, available
//!   with the `kafka` feature
//!
//! Every client error is a [`BrokerError`], which knows whether it means
//! the session is gone, the broker was slow, or something else went wrong.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

pub use client::{BrokerClient, ClientFactory};
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaClient, KafkaClientFactory};
pub use memory::{MemoryBroker, MemoryClient, PublishedMessage};
