//! Configuration management for the courier service.

use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_broker::{BrokerConfig, ClientFactory, MemoryBroker};
use courier_pipeline::{RetryPolicy, SupervisorConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "courier.toml";

/// Broker client implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// In-process broker; no external dependency.
    Memory,
    /// Apache Kafka via librdkafka. Requires the `kafka` feature.
    Kafka,
}

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`courier.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use courier_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Publishing to {} via {}", config.kafka_topic, config.kafka_brokers);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Broker
    /// Comma-separated bootstrap broker list.
    ///
    /// Environment variable: `KAFKA_BROKERS`
    #[serde(default = "default_brokers", alias = "KAFKA_BROKERS")]
    pub kafka_brokers: String,
    /// Topic to publish to and consume from.
    ///
    /// Environment variable: `KAFKA_TOPIC`
    #[serde(default = "default_topic", alias = "KAFKA_TOPIC")]
    pub kafka_topic: String,
    /// Client identity announced to the broker.
    ///
    /// Environment variable: `KAFKA_CLIENT_ID`
    #[serde(default = "default_client_id", alias = "KAFKA_CLIENT_ID")]
    pub kafka_client_id: String,
    /// Consumer group identity.
    ///
    /// Environment variable: `KAFKA_GROUP_ID`
    #[serde(default = "default_group_id", alias = "KAFKA_GROUP_ID")]
    pub kafka_group_id: String,
    /// Broker client implementation.
    ///
    /// Environment variable: `BROKER_BACKEND`
    #[serde(default = "default_backend", alias = "BROKER_BACKEND")]
    pub broker_backend: BrokerBackend,

    // Supervision
    /// Time between connection attempts in milliseconds.
    ///
    /// Environment variable: `RETRY_INTERVAL_MS`
    #[serde(default = "default_retry_interval_ms", alias = "RETRY_INTERVAL_MS")]
    pub retry_interval_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor", alias = "RETRY_JITTER_FACTOR")]
    pub retry_jitter_factor: f64,
    /// Upper bound for handshake plus subscription in milliseconds.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_MS`
    #[serde(default = "default_connect_timeout_ms", alias = "CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,
    /// Upper bound for one send in milliseconds.
    ///
    /// Environment variable: `SEND_TIMEOUT_MS`
    #[serde(default = "default_send_timeout_ms", alias = "SEND_TIMEOUT_MS")]
    pub send_timeout_ms: u64,
    /// Budget for disconnecting at shutdown in milliseconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_MS`
    #[serde(default = "default_shutdown_timeout_ms", alias = "SHUTDOWN_TIMEOUT_MS")]
    pub shutdown_timeout_ms: u64,

    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be parsed or the merged values are invalid.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Bootstrap brokers split on commas, trimmed, empties dropped.
    pub fn broker_list(&self) -> Vec<String> {
        self.kafka_brokers
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Convert to the broker crate's endpoint configuration.
    pub fn to_broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            brokers: self.broker_list(),
            topic: self.kafka_topic.clone(),
            client_id: self.kafka_client_id.clone(),
            group_id: self.kafka_group_id.clone(),
            handshake_timeout: self.connect_timeout(),
            send_timeout: self.send_timeout(),
        }
    }

    /// Convert to the connection supervisor's configuration.
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            broker: self.to_broker_config(),
            retry: RetryPolicy::flat(Duration::from_millis(self.retry_interval_ms))
                .with_jitter(self.retry_jitter_factor),
            connect_timeout: self.connect_timeout(),
            ..SupervisorConfig::default()
        }
    }

    /// Handshake bound.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-send bound.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Shutdown budget.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Creates the client factory for the configured backend.
    ///
    /// # Errors
    ///
    /// Fails if the backend is not compiled into this build.
    pub fn client_factory(&self) -> Result<Arc<dyn ClientFactory>> {
        match self.broker_backend {
            BrokerBackend::Memory => Ok(Arc::new(MemoryBroker::new())),
            #[cfg(feature = "kafka")]
            BrokerBackend::Kafka => Ok(Arc::new(courier_broker::KafkaClientFactory::new())),
            #[cfg(not(feature = "kafka"))]
            BrokerBackend::Kafka => {
                anyhow::bail!("broker_backend = kafka requires building with the `kafka` feature")
            },
        }
    }

    /// Parse server socket address from host and port configuration.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.broker_list().is_empty() {
            anyhow::bail!("kafka_brokers must name at least one broker");
        }

        if self.kafka_topic.trim().is_empty() {
            anyhow::bail!("kafka_topic must not be empty");
        }

        if self.kafka_client_id.trim().is_empty() || self.kafka_group_id.trim().is_empty() {
            anyhow::bail!("kafka_client_id and kafka_group_id must not be empty");
        }

        if self.retry_interval_ms == 0 {
            anyhow::bail!("retry_interval_ms must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.connect_timeout_ms == 0 || self.send_timeout_ms == 0 {
            anyhow::bail!("connect_timeout_ms and send_timeout_ms must be greater than 0");
        }

        if self.shutdown_timeout_ms == 0 {
            anyhow::bail!("shutdown_timeout_ms must be greater than 0");
        }

        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if cfg!(not(feature = "kafka")) && self.broker_backend == BrokerBackend::Kafka {
            anyhow::bail!("broker_backend = kafka requires building with the `kafka` feature");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kafka_brokers: default_brokers(),
            kafka_topic: default_topic(),
            kafka_client_id: default_client_id(),
            kafka_group_id: default_group_id(),
            broker_backend: default_backend(),
            retry_interval_ms: default_retry_interval_ms(),
            retry_jitter_factor: default_jitter_factor(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            rust_log: default_log_level(),
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "events".to_string()
}

fn default_client_id() -> String {
    "courier".to_string()
}

fn default_group_id() -> String {
    "courier-group".to_string()
}

fn default_backend() -> BrokerBackend {
    BrokerBackend::Memory
}

fn default_retry_interval_ms() -> u64 {
    10_000
}

fn default_jitter_factor() -> f64 {
    0.0
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}
