//! Kafka broker client built on rdkafka.
//!
//! One `FutureProducer` and one `StreamConsumer` are created per client and
//! kept for the life of the process. Construction only parses configuration;
//! the metadata fetch in [`BrokerClient::connect`] is the first network
//! round trip. librdkafka reconnects internally, so a reconnect here means
//! another metadata handshake and a fresh subscription on the same handles.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::{InboundRecord, OutboundMessage};
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    message::{Header, Headers, Message, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use tracing::{debug, warn};

use crate::{
    client::{BrokerClient, ClientFactory},
    config::BrokerConfig,
    error::{BrokerError, Result},
};

/// Builds [`KafkaClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaClientFactory;

impl KafkaClientFactory {
    /// Creates a new factory.
    pub fn new() -> Self {
        Self
    }
}

impl ClientFactory for KafkaClientFactory {
    fn build(&self, config: &BrokerConfig) -> Result<Arc<dyn BrokerClient>> {
        Ok(Arc::new(KafkaClient::new(config)?))
    }
}

/// Kafka producer and consumer pair.
pub struct KafkaClient {
    producer: FutureProducer,
    consumer: StreamConsumer,
    config: BrokerConfig,
}

impl std::fmt::Debug for KafkaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaClient")
            .field("bootstrap_servers", &self.config.bootstrap_servers())
            .field("client_id", &self.config.client_id)
            .field("group_id", &self.config.group_id)
            .finish()
    }
}

impl KafkaClient {
    /// Creates producer and consumer handles without contacting the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Configuration`] if librdkafka rejects the
    /// configuration.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        if config.brokers.is_empty() {
            return Err(BrokerError::configuration("broker list is empty"));
        }

        let send_timeout_ms = duration_ms(config.send_timeout).to_string();

        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", config.bootstrap_servers())
            .set("client.id", &config.client_id);

        let producer: FutureProducer = base
            .clone()
            .set("message.timeout.ms", &send_timeout_ms)
            .set("acks", "1")
            .create()
            .map_err(|e| BrokerError::configuration(format!("producer: {e}")))?;

        let consumer: StreamConsumer = base
            .clone()
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BrokerError::configuration(format!("consumer: {e}")))?;

        Ok(Self { producer, consumer, config: config.clone() })
    }
}

#[async_trait]
impl BrokerClient for KafkaClient {
    async fn connect(&self) -> Result<()> {
        let producer = self.producer.clone();
        let timeout = self.config.handshake_timeout;

        // fetch_metadata blocks the calling thread
        let metadata = tokio::task::spawn_blocking(move || {
            producer.client().fetch_metadata(None, timeout).map(|m| m.brokers().len())
        })
        .await
        .map_err(|e| BrokerError::client(format!("handshake task failed: {e}")))?;

        match metadata {
            Ok(0) => Err(BrokerError::connection("metadata returned no brokers")),
            Ok(brokers) => {
                debug!(brokers, "kafka metadata handshake succeeded");
                Ok(())
            },
            Err(e) => Err(classify(e, "handshake", timeout)),
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::subscription(topic, e.to_string()))
    }

    async fn send(&self, topic: &str, message: &OutboundMessage) -> Result<()> {
        let headers = message.headers().iter().fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header { key: key.as_str(), value: Some(value.as_bytes()) })
        });

        let record = FutureRecord::to(topic)
            .key(message.key())
            .payload(message.payload().as_ref())
            .headers(headers);

        self.producer
            .send(record, Timeout::After(self.config.send_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| classify(e, "send", self.config.send_timeout))
    }

    async fn recv(&self) -> Result<InboundRecord> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| classify(e, "receive", self.config.handshake_timeout))?;

        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .map(|h| {
                        let value = h.value.map(String::from_utf8_lossy).unwrap_or_default();
                        (h.key.to_string(), value.into_owned())
                    })
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        Ok(InboundRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
            headers,
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.consumer.unsubscribe();

        let producer = self.producer.clone();
        let timeout = self.config.send_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::client(format!("flush task failed: {e}")))?
            .map_err(|e| {
                warn!(error = %e, "producer flush failed during disconnect");
                classify(e, "flush", timeout)
            })
    }
}

/// Maps an rdkafka error onto the broker error taxonomy.
fn classify(error: KafkaError, operation: &str, timeout: Duration) -> BrokerError {
    match error.rdkafka_error_code() {
        Some(code) if is_timeout_code(code) => BrokerError::timeout(operation, duration_ms(timeout)),
        Some(code) if is_connection_code(code) => BrokerError::connection(error.to_string()),
        _ => BrokerError::client(error.to_string()),
    }
}

fn is_timeout_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::OperationTimedOut
    )
}

fn is_connection_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::BrokerNotAvailable
            | RDKafkaErrorCode::Resolve
    )
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_codes_classify_as_timeout() {
        let error = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert!(matches!(
            classify(error, "send", Duration::from_secs(5)),
            BrokerError::Timeout { timeout_ms: 5000, .. }
        ));
    }

    #[test]
    fn transport_codes_classify_as_connection() {
        let error = KafkaError::MessageProduction(RDKafkaErrorCode::AllBrokersDown);
        assert!(classify(error, "send", Duration::from_secs(5)).is_connection_level());
    }

    #[test]
    fn other_codes_classify_as_client_errors() {
        let error = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert!(matches!(
            classify(error, "send", Duration::from_secs(5)),
            BrokerError::Client { .. }
        ));
    }

    #[test]
    fn construction_does_not_contact_broker() {
        let config =
            BrokerConfig { brokers: vec!["127.0.0.1:1".to_string()], ..Default::default() };
        assert!(KafkaClient::new(&config).is_ok());
    }

    #[test]
    fn empty_broker_list_is_rejected() {
        let config = BrokerConfig { brokers: Vec::new(), ..Default::default() };
        assert!(matches!(KafkaClient::new(&config), Err(BrokerError::Configuration { .. })));
    }
}
