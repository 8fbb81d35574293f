//! Broker client and factory traits.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use courier_core::{InboundRecord, OutboundMessage};

use crate::{config::BrokerConfig, error::Result};

/// One producer and consumer session against a broker.
///
/// A client is created once per process and reused across reconnects:
/// `connect` and `subscribe` may be called again after a lost session.
/// Implementations must be safe to share between the publisher and the
/// consumer loop.
#[async_trait]
pub trait BrokerClient: Send + Sync + fmt::Debug {
    /// Performs the network handshake for producer and consumer.
    async fn connect(&self) -> Result<()>;

    /// Subscribes the consumer to `topic`, replacing any previous
    /// subscription.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Sends one message and waits for the broker acknowledgement.
    async fn send(&self, topic: &str, message: &OutboundMessage) -> Result<()>;

    /// Waits for the next record on the subscribed topic.
    async fn recv(&self) -> Result<InboundRecord>;

    /// Flushes the producer and releases the session.
    async fn disconnect(&self) -> Result<()>;
}

/// Builds broker clients from configuration.
///
/// Construction must not perform network I/O; the first network round trip
/// happens in [`BrokerClient::connect`].
pub trait ClientFactory: Send + Sync + fmt::Debug {
    /// Constructs a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BrokerError::Configuration`] if the configuration
    /// cannot produce a client.
    fn build(&self, config: &BrokerConfig) -> Result<Arc<dyn BrokerClient>>;
}
