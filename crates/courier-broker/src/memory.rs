//! In-process broker with fault injection.
//!
//! `MemoryBroker` stands in for a real broker when running locally and in
//! tests. Every client built from it shares one set of topics, so a message
//! sent by one client is delivered to every subscriber of that topic,
//! including the sender's own consumer.
//!
//! Faults are injected on the broker handle and affect every client:
//!
//! - [`MemoryBroker::set_reachable`] - handshakes and sends fail with a
//!   connection error; going unreachable also drops every live
//!   subscription so consumers observe the outage
//! - [`MemoryBroker::fail_next_send`] - scripts the result of upcoming sends
//! - `set_*_delay` - slows down connect, send, or disconnect
//! - [`MemoryBroker::fail_next_build`] - makes the next client construction
//!   fail

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::{InboundRecord, OutboundMessage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    client::{BrokerClient, ClientFactory},
    config::BrokerConfig,
    error::{BrokerError, Result},
};

/// Message accepted by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic the message was sent to.
    pub topic: String,
    /// Message as handed to the client.
    pub message: OutboundMessage,
}

/// Shared in-process broker.
///
/// Cloning the handle shares the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerState>,
}

#[derive(Debug)]
struct BrokerState {
    reachable: AtomicBool,
    connect_delay: Mutex<Duration>,
    send_delay: Mutex<Duration>,
    disconnect_delay: Mutex<Duration>,
    send_script: Mutex<VecDeque<BrokerError>>,
    build_failure: Mutex<Option<BrokerError>>,
    handshakes: AtomicUsize,
    builds: AtomicUsize,
    next_session: AtomicU64,
    published: Mutex<Vec<PublishedMessage>>,
    topics: Mutex<HashMap<String, TopicState>>,
}

#[derive(Debug, Default)]
struct TopicState {
    next_offset: i64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<InboundRecord>)>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            connect_delay: Mutex::new(Duration::ZERO),
            send_delay: Mutex::new(Duration::ZERO),
            disconnect_delay: Mutex::new(Duration::ZERO),
            send_script: Mutex::new(VecDeque::new()),
            build_failure: Mutex::new(None),
            handshakes: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
            next_session: AtomicU64::new(1),
            published: Mutex::new(Vec::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBroker {
    /// Creates a reachable broker with no injected faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker that refuses every handshake until made reachable.
    pub fn unreachable() -> Self {
        let broker = Self::new();
        broker.set_reachable(false);
        broker
    }

    /// Makes the broker reachable or unreachable.
    ///
    /// Going unreachable closes every subscription, so blocked consumers
    /// observe a connection-level receive error.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::Release);
        if !reachable {
            for topic in lock(&self.inner.topics).values_mut() {
                topic.subscribers.clear();
            }
        }
        debug!(reachable, "memory broker reachability changed");
    }

    /// Returns whether the broker currently accepts connections.
    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::Acquire)
    }

    /// Delays every handshake by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.inner.connect_delay) = delay;
    }

    /// Delays every send by `delay`.
    pub fn set_send_delay(&self, delay: Duration) {
        *lock(&self.inner.send_delay) = delay;
    }

    /// Delays every disconnect by `delay`.
    pub fn set_disconnect_delay(&self, delay: Duration) {
        *lock(&self.inner.disconnect_delay) = delay;
    }

    /// Makes the next send fail with `error`. Calls queue up in order.
    pub fn fail_next_send(&self, error: BrokerError) {
        lock(&self.inner.send_script).push_back(error);
    }

    /// Makes the next client construction fail with `error`.
    pub fn fail_next_build(&self, error: BrokerError) {
        *lock(&self.inner.build_failure) = Some(error);
    }

    /// Number of handshakes attempted against this broker.
    pub fn handshake_count(&self) -> usize {
        self.inner.handshakes.load(Ordering::Acquire)
    }

    /// Number of clients constructed from this broker.
    pub fn build_count(&self) -> usize {
        self.inner.builds.load(Ordering::Acquire)
    }

    /// Every message accepted so far, in acceptance order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.inner.published).clone()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.inner.topics).get(topic).map_or(0, |t| t.subscribers.len())
    }

    /// Delivers a raw record to every subscriber of `topic`, bypassing the
    /// producer path. Returns the number of subscribers reached.
    pub fn inject(&self, topic: &str, key: Option<&str>, payload: impl Into<Bytes>) -> usize {
        self.deliver(topic, key.map(str::to_string), payload.into(), Default::default())
    }

    /// Creates a standalone client session against this broker.
    pub fn client(&self, config: &BrokerConfig) -> MemoryClient {
        MemoryClient {
            broker: self.clone(),
            session: self.inner.next_session.fetch_add(1, Ordering::AcqRel),
            topic_hint: config.topic.clone(),
            connected: AtomicBool::new(false),
            subscription: tokio::sync::Mutex::new(None),
        }
    }

    fn deliver(
        &self,
        topic: &str,
        key: Option<String>,
        payload: Bytes,
        headers: std::collections::BTreeMap<String, String>,
    ) -> usize {
        let mut topics = lock(&self.inner.topics);
        let state = topics.entry(topic.to_string()).or_default();
        let offset = state.next_offset;
        state.next_offset += 1;

        let record = InboundRecord {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key,
            payload,
            headers,
        };

        state.subscribers.retain(|(_, tx)| tx.send(record.clone()).is_ok());
        state.subscribers.len()
    }

    fn register(&self, topic: &str, session: u64) -> mpsc::UnboundedReceiver<InboundRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = lock(&self.inner.topics);
        for state in topics.values_mut() {
            state.subscribers.retain(|(id, _)| *id != session);
        }
        topics.entry(topic.to_string()).or_default().subscribers.push((session, tx));
        rx
    }

    fn unregister(&self, session: u64) {
        for state in lock(&self.inner.topics).values_mut() {
            state.subscribers.retain(|(id, _)| *id != session);
        }
    }
}

impl ClientFactory for MemoryBroker {
    fn build(&self, config: &BrokerConfig) -> Result<Arc<dyn BrokerClient>> {
        self.inner.builds.fetch_add(1, Ordering::AcqRel);
        if let Some(error) = lock(&self.inner.build_failure).take() {
            return Err(error);
        }
        if config.brokers.is_empty() {
            return Err(BrokerError::configuration("broker list is empty"));
        }
        Ok(Arc::new(self.client(config)))
    }
}

/// Client session against a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryClient {
    broker: MemoryBroker,
    session: u64,
    topic_hint: String,
    connected: AtomicBool,
    subscription: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<InboundRecord>>>,
}

impl MemoryClient {
    /// Returns whether the last handshake succeeded and no disconnect
    /// happened since.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn ensure_session(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if !self.broker.is_reachable() {
            self.connected.store(false, Ordering::Release);
            return Err(BrokerError::connection("broker unreachable"));
        }
        Ok(())
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl BrokerClient for MemoryClient {
    async fn connect(&self) -> Result<()> {
        let delay = *lock(&self.broker.inner.connect_delay);
        pause(delay).await;

        self.broker.inner.handshakes.fetch_add(1, Ordering::AcqRel);
        if !self.broker.is_reachable() {
            return Err(BrokerError::connection("broker unreachable"));
        }

        self.connected.store(true, Ordering::Release);
        debug!(session = self.session, "memory client connected");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.ensure_session()?;
        let receiver = self.broker.register(topic, self.session);
        *self.subscription.lock().await = Some(receiver);
        debug!(session = self.session, topic, "memory client subscribed");
        Ok(())
    }

    async fn send(&self, topic: &str, message: &OutboundMessage) -> Result<()> {
        self.ensure_session()?;

        let delay = *lock(&self.broker.inner.send_delay);
        pause(delay).await;

        if let Some(error) = lock(&self.broker.inner.send_script).pop_front() {
            if error.is_connection_level() {
                self.connected.store(false, Ordering::Release);
            }
            return Err(error);
        }
        self.ensure_session()?;

        lock(&self.broker.inner.published)
            .push(PublishedMessage { topic: topic.to_string(), message: message.clone() });
        self.broker.deliver(
            topic,
            Some(message.key().to_string()),
            message.payload().clone(),
            message.headers().clone(),
        );
        Ok(())
    }

    async fn recv(&self) -> Result<InboundRecord> {
        let mut subscription = self.subscription.lock().await;
        let Some(receiver) = subscription.as_mut() else {
            return Err(BrokerError::subscription(&self.topic_hint, "not subscribed"));
        };

        match receiver.recv().await {
            Some(record) => Ok(record),
            None => {
                *subscription = None;
                Err(BrokerError::connection("subscription closed by broker"))
            },
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let delay = *lock(&self.broker.inner.disconnect_delay);
        pause(delay).await;

        self.connected.store(false, Ordering::Release);
        self.broker.unregister(self.session);
        debug!(session = self.session, "memory client disconnected");
        Ok(())
    }
}
