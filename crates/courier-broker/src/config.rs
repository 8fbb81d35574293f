//! Broker endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the broker lives and who this process is to it.
///
/// Read once at process start and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Bootstrap broker addresses (`host:port`).
    pub brokers: Vec<String>,
    /// Topic to publish to and consume from.
    pub topic: String,
    /// Client identity announced to the broker.
    pub client_id: String,
    /// Consumer group identity.
    pub group_id: String,
    /// Upper bound for the blocking metadata handshake.
    pub handshake_timeout: Duration,
    /// Delivery timeout handed to the producer.
    pub send_timeout: Duration,
}

impl BrokerConfig {
    /// Comma-separated bootstrap list as expected by Kafka clients.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "events".to_string(),
            client_id: "courier".to_string(),
            group_id: "courier-group".to_string(),
            handshake_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
        }
    }
}
