//! Connection supervisor.
//!
//! Owns the broker client and the connection state machine, and keeps
//! trying to reach `Ready` for as long as the process lives:
//!
//! ```text
//!   start() ──▶ attempt ──▶ sleep(interval) ──▶ attempt ──▶ ...
//!                  │
//!                  ├─ guard: Disconnected -> Connecting, else no-op
//!                  ├─ lazily build client (no network I/O)
//!                  ├─ handshake + subscribe, bounded by connect_timeout
//!                  ├─ ok:   Ready (new epoch), gauge 1, spawn consumer loop
//!                  └─ fail: warn, release session, Disconnected, gauge 0
//! ```
//!
//! An attempt dropped before it settles (for example by a caller's timeout)
//! returns the state to `Disconnected`, so the next tick can try again.
//!
//! Client construction failures are remembered for one retry interval.
//! Within that window `ensure_initialized` returns the remembered error
//! instead of rebuilding, so a broken configuration costs one build per
//! tick rather than one per publish.
//!
//! Startup never waits on the broker: `start` returns immediately and the
//! first attempt runs in the background. Nothing here blocks the publish
//! path; readiness is a lock-free read of the state cell.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};

use courier_broker::{BrokerClient, BrokerConfig, BrokerError, ClientFactory};
use courier_core::{Clock, ConnectionState, RealClock};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    consumer::{ConsumerLoop, RecordHandler},
    error::{PipelineError, Result},
    metrics::MetricsSink,
    retry::RetryPolicy,
    state::{ConnectionStateCell, ConnectionStatus},
};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Broker endpoint and identity.
    pub broker: BrokerConfig,
    /// Reconnect schedule.
    pub retry: RetryPolicy,
    /// Upper bound for handshake plus subscription.
    pub connect_timeout: Duration,
    /// Pause after a non-fatal receive error in the consumer loop.
    pub consumer_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            consumer_backoff: Duration::from_secs(1),
        }
    }
}

/// Handle to the connection supervisor.
///
/// Cheap to clone; every clone drives the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
}

#[derive(Debug)]
struct SupervisorInner {
    config: SupervisorConfig,
    factory: Arc<dyn ClientFactory>,
    client: Mutex<Option<Arc<dyn BrokerClient>>>,
    build_failure: Mutex<Option<(Instant, BrokerError)>>,
    state: ConnectionStateCell,
    metrics: Arc<dyn MetricsSink>,
    handler: Arc<dyn RecordHandler>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    session: Mutex<Option<Session>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

/// Resets `Connecting` to `Disconnected` unless the attempt settles first.
struct ConnectAttempt<'a> {
    state: &'a ConnectionStateCell,
    armed: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn begin(state: &'a ConnectionStateCell) -> Option<Self> {
        state.begin_connect().then_some(Self { state, armed: true })
    }

    fn settle(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.armed && self.state.abort_connect() {
            debug!("abandoned connection attempt reset to disconnected");
        }
    }
}

/// Consumer bookkeeping for the live connection.
#[derive(Debug)]
struct Session {
    epoch: u64,
    token: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionSupervisor {
    /// Creates a supervisor using the real clock.
    pub fn new(
        config: SupervisorConfig,
        factory: Arc<dyn ClientFactory>,
        metrics: Arc<dyn MetricsSink>,
        handler: Arc<dyn RecordHandler>,
    ) -> Self {
        Self::with_clock(config, factory, metrics, handler, Arc::new(RealClock::new()))
    }

    /// Creates a supervisor with an injected clock.
    pub fn with_clock(
        config: SupervisorConfig,
        factory: Arc<dyn ClientFactory>,
        metrics: Arc<dyn MetricsSink>,
        handler: Arc<dyn RecordHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                factory,
                client: Mutex::new(None),
                build_failure: Mutex::new(None),
                state: ConnectionStateCell::with_metrics(Arc::clone(&metrics)),
                metrics,
                handler,
                clock,
                shutdown: CancellationToken::new(),
                session: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Supervisor configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Metrics sink shared with the publisher and consumer.
    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.inner.metrics
    }

    /// Clock used for retry ticks and publish timing.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Returns the broker client, constructing it on first use.
    ///
    /// Construction performs no network I/O. A failed construction is logged
    /// and remembered; calls within the next retry interval return the same
    /// error without rebuilding.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Broker`] if the factory rejects the
    /// configuration.
    pub fn ensure_initialized(&self) -> Result<Arc<dyn BrokerClient>> {
        self.initialize(false)
    }

    fn initialize(&self, rebuild_now: bool) -> Result<Arc<dyn BrokerClient>> {
        let mut slot = lock(&self.inner.client);
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }

        let now = self.inner.clock.now();
        let mut last_failure = lock(&self.inner.build_failure);
        if !rebuild_now {
            if let Some((failed_at, error)) = last_failure.as_ref() {
                if now.saturating_duration_since(*failed_at) < self.inner.config.retry.interval {
                    return Err(error.clone().into());
                }
            }
        }

        match self.inner.factory.build(&self.inner.config.broker) {
            Ok(client) => {
                info!(
                    brokers = %self.inner.config.broker.bootstrap_servers(),
                    client_id = %self.inner.config.broker.client_id,
                    "broker client initialized"
                );
                *slot = Some(Arc::clone(&client));
                *last_failure = None;
                Ok(client)
            },
            Err(e) => {
                warn!(error = %e, "broker client construction failed");
                *last_failure = Some((now, e.clone()));
                Err(e.into())
            },
        }
    }

    /// Tries once to move from `Disconnected` to `Ready`.
    ///
    /// A no-op while `Connecting` or `Ready`, or after shutdown. Failures
    /// are logged and leave the state `Disconnected`; success is observable
    /// only through [`Self::state`].
    ///
    /// Cancel-safe: dropping the future before it completes returns the
    /// state to `Disconnected`.
    pub async fn attempt_connect(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let Some(mut attempt) = ConnectAttempt::begin(&self.inner.state) else {
            debug!(state = %self.state(), "connection attempt skipped");
            return;
        };

        let client = match self.initialize(true) {
            Ok(client) => client,
            Err(e) => {
                self.fail_attempt(&mut attempt, None, &e.to_string()).await;
                return;
            },
        };

        let topic = self.inner.config.broker.topic.as_str();
        let timeout = self.inner.config.connect_timeout;
        let handshake = async {
            client.connect().await?;
            client.subscribe(topic).await
        };

        let result = match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_elapsed) => Err(BrokerError::timeout("connect", duration_ms(timeout))),
        };

        if let Err(e) = result {
            self.fail_attempt(&mut attempt, Some(&client), &e.to_string()).await;
            return;
        }

        let ready = self.inner.state.mark_ready();
        attempt.settle();
        let Some(epoch) = ready else {
            debug!("connection established after shutdown, releasing session");
            release(&client, timeout).await;
            return;
        };

        self.inner.metrics.record_connection_attempt(true);
        info!(epoch, topic, "broker connection ready");

        self.spawn_consumer(client, epoch);
    }

    async fn fail_attempt(
        &self,
        attempt: &mut ConnectAttempt<'_>,
        client: Option<&Arc<dyn BrokerClient>>,
        reason: &str,
    ) {
        warn!(
            error = %reason,
            retry_in = ?self.inner.config.retry.interval,
            "broker connection attempt failed"
        );
        self.inner.metrics.record_connection_attempt(false);

        if let Some(client) = client {
            release(client, self.inner.config.connect_timeout).await;
        }

        attempt.settle();
        self.inner.state.abort_connect();
    }

    fn spawn_consumer(&self, client: Arc<dyn BrokerClient>, epoch: u64) {
        let token = self.inner.shutdown.child_token();
        if let Some(previous) =
            lock(&self.inner.session).replace(Session { epoch, token: token.clone() })
        {
            previous.token.cancel();
        }

        let consumer = ConsumerLoop {
            client,
            supervisor: self.clone(),
            handler: Arc::clone(&self.inner.handler),
            metrics: Arc::clone(&self.inner.metrics),
            clock: Arc::clone(&self.inner.clock),
            epoch,
            token,
            backoff: self.inner.config.consumer_backoff,
        };
        self.track(tokio::spawn(consumer.run()));
    }

    /// Starts the background retry loop.
    ///
    /// Returns immediately. The first attempt runs right away; later ones
    /// run every retry interval until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::AlreadyStarted);
        }

        info!(
            interval = ?self.inner.config.retry.interval,
            jitter_factor = self.inner.config.retry.jitter_factor,
            topic = %self.inner.config.broker.topic,
            "connection supervisor starting"
        );

        let supervisor = self.clone();
        self.track(tokio::spawn(async move { supervisor.run_retry_loop().await }));
        Ok(())
    }

    async fn run_retry_loop(self) {
        let token = self.inner.shutdown.clone();

        loop {
            let tick_started = self.inner.clock.now();

            tokio::select! {
                () = self.attempt_connect() => {},
                () = token.cancelled() => break,
            }

            let elapsed = self.inner.clock.now().saturating_duration_since(tick_started);
            let delay = self.inner.config.retry.next_delay().saturating_sub(elapsed);

            tokio::select! {
                () = self.inner.clock.sleep(delay) => {},
                () = token.cancelled() => break,
            }
        }

        debug!("connection retry loop stopped");
    }

    /// Returns the client and epoch of the live connection, if `Ready`.
    pub fn ready_connection(&self) -> Option<(Arc<dyn BrokerClient>, u64)> {
        let status = self.inner.state.snapshot();
        if status.state != ConnectionState::Ready {
            return None;
        }
        lock(&self.inner.client).as_ref().map(|client| (Arc::clone(client), status.epoch))
    }

    /// Reports that the connection of `epoch` failed at the transport level.
    ///
    /// Moves `Ready -> Disconnected` and stops that connection's consumer.
    /// Reports for an older epoch are ignored. Returns `true` if the state
    /// changed.
    pub fn report_connection_lost(&self, epoch: u64, error: &BrokerError) -> bool {
        if !self.inner.state.mark_lost(epoch) {
            debug!(epoch, error = %error, "stale connection loss report ignored");
            return false;
        }

        warn!(epoch, error = %error, "broker connection lost");

        let mut session = lock(&self.inner.session);
        if session.as_ref().is_some_and(|s| s.epoch == epoch) {
            if let Some(session) = session.take() {
                session.token.cancel();
            }
        }
        true
    }

    /// Returns `true` if the connection is `Ready`. Never blocks.
    pub fn is_ready(&self) -> bool {
        self.inner.state.is_ready()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.state()
    }

    /// Current state plus connection epoch.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.snapshot()
    }

    /// Subscribes to connection status changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.state.subscribe()
    }

    /// Waits until the state equals `state`, up to `timeout`. Returns
    /// whether it did.
    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        let reached = tokio::time::timeout(timeout, async {
            rx.wait_for(|status| status.state == state).await.is_ok()
        })
        .await;
        matches!(reached, Ok(true))
    }

    /// Waits until the connection is `Ready`, up to `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.wait_for_state(ConnectionState::Ready, timeout).await
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Stops the retry loop and every consumer loop.
    pub(crate) fn cancel_background(&self) {
        self.inner.shutdown.cancel();
    }

    /// The constructed client, if any, without constructing one.
    pub(crate) fn existing_client(&self) -> Option<Arc<dyn BrokerClient>> {
        lock(&self.inner.client).clone()
    }

    /// Forces `Disconnected` permanently. Returns the status before closing.
    pub(crate) fn close(&self) -> ConnectionStatus {
        let previous = self.inner.state.close();
        lock(&self.inner.session).take();
        previous
    }

    /// Takes every background task handle for joining.
    pub(crate) fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *lock(&self.inner.tasks))
    }

    #[cfg(test)]
    pub(crate) fn tracked_tasks(&self) -> usize {
        lock(&self.inner.tasks).len()
    }
}

async fn release(client: &Arc<dyn BrokerClient>, timeout: Duration) {
    match tokio::time::timeout(timeout, client.disconnect()).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => debug!(error = %e, "releasing half-open session failed"),
        Err(_elapsed) => debug!(timeout = ?timeout, "releasing half-open session timed out"),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
