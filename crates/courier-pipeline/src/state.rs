//! Single-writer connection state cell.
//!
//! All transitions of the connection state machine go through one
//! `tokio::sync::watch` channel. Each transition is a compare-and-set
//! closure run under the channel's lock, so two triggers racing for
//! `Disconnected -> Connecting` cannot both win, and readers never block
//! writers.
//!
//! Every `Ready` transition starts a new epoch. Components that observed a
//! connection remember its epoch, and a loss report carrying an old epoch
//! is ignored, so a consumer that outlived its session cannot tear down a
//! newer one.
//!
//! The `connection_status` gauge is written inside the same closure as the
//! transition, so it always matches the last state that won.

use std::sync::Arc;

use courier_core::ConnectionState;
use tokio::sync::watch;

use crate::metrics::MetricsSink;

/// Connection state plus the epoch of the most recent `Ready` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Incremented on every transition into `Ready`.
    pub epoch: u64,
    /// Set at shutdown; no further connection attempts may begin.
    pub closed: bool,
}

/// Owner of the connection state.
#[derive(Debug)]
pub struct ConnectionStateCell {
    tx: watch::Sender<ConnectionStatus>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateCell {
    /// Creates a cell in `Disconnected`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus::default());
        Self { tx, metrics: None }
    }

    /// Creates a cell in `Disconnected` that mirrors every transition into
    /// `metrics`.
    pub fn with_metrics(metrics: Arc<dyn MetricsSink>) -> Self {
        metrics.set_connection_state(ConnectionState::Disconnected);
        let (tx, _rx) = watch::channel(ConnectionStatus::default());
        Self { tx, metrics: Some(metrics) }
    }

    fn publish_state(&self, state: ConnectionState) {
        if let Some(metrics) = &self.metrics {
            metrics.set_connection_state(state);
        }
    }

    /// `Disconnected -> Connecting`. Returns `false` if the state was
    /// anything else or the cell is closed.
    pub fn begin_connect(&self) -> bool {
        self.tx.send_if_modified(|status| {
            if status.closed || status.state != ConnectionState::Disconnected {
                return false;
            }
            status.state = ConnectionState::Connecting;
            self.publish_state(status.state);
            true
        })
    }

    /// `Connecting -> Ready`. Returns the new epoch, or `None` if the
    /// attempt was overtaken (for example by shutdown).
    pub fn mark_ready(&self) -> Option<u64> {
        let mut epoch = None;
        self.tx.send_if_modified(|status| {
            if status.closed || status.state != ConnectionState::Connecting {
                return false;
            }
            status.state = ConnectionState::Ready;
            status.epoch += 1;
            epoch = Some(status.epoch);
            self.publish_state(status.state);
            true
        });
        epoch
    }

    /// `Connecting -> Disconnected` after a failed handshake.
    pub fn abort_connect(&self) -> bool {
        self.tx.send_if_modified(|status| {
            if status.state != ConnectionState::Connecting {
                return false;
            }
            status.state = ConnectionState::Disconnected;
            self.publish_state(status.state);
            true
        })
    }

    /// `Ready -> Disconnected` if `epoch` is still the live connection.
    pub fn mark_lost(&self, epoch: u64) -> bool {
        self.tx.send_if_modified(|status| {
            if status.state != ConnectionState::Ready || status.epoch != epoch {
                return false;
            }
            status.state = ConnectionState::Disconnected;
            self.publish_state(status.state);
            true
        })
    }

    /// Moves to `Disconnected` and refuses any further connection attempt.
    /// Returns the status held before closing.
    pub fn close(&self) -> ConnectionStatus {
        let mut previous = ConnectionStatus::default();
        self.tx.send_modify(|status| {
            previous = *status;
            status.state = ConnectionState::Disconnected;
            status.closed = true;
            self.publish_state(status.state);
        });
        previous
    }

    /// Current status.
    pub fn snapshot(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.tx.borrow().state
    }

    /// Returns `true` if the state is `Ready`.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PrometheusMetrics;

    #[test]
    fn full_lifecycle_increments_epoch() {
        let cell = ConnectionStateCell::new();
        assert_eq!(cell.state(), ConnectionState::Disconnected);

        assert!(cell.begin_connect());
        assert_eq!(cell.mark_ready(), Some(1));
        assert!(cell.is_ready());

        assert!(cell.mark_lost(1));
        assert!(cell.begin_connect());
        assert_eq!(cell.mark_ready(), Some(2));
    }

    #[test]
    fn begin_connect_is_exclusive() {
        let cell = ConnectionStateCell::new();

        assert!(cell.begin_connect());
        assert!(!cell.begin_connect());

        cell.mark_ready();
        assert!(!cell.begin_connect());
        assert_eq!(cell.state(), ConnectionState::Ready);
    }

    #[test]
    fn abort_returns_to_disconnected() {
        let cell = ConnectionStateCell::new();
        cell.begin_connect();

        assert!(cell.abort_connect());
        assert_eq!(cell.state(), ConnectionState::Disconnected);
        assert!(!cell.abort_connect());
    }

    #[test]
    fn stale_loss_report_is_ignored() {
        let cell = ConnectionStateCell::new();
        cell.begin_connect();
        cell.mark_ready();
        cell.mark_lost(1);
        cell.begin_connect();
        cell.mark_ready();

        assert!(!cell.mark_lost(1));
        assert!(cell.is_ready());
        assert_eq!(cell.snapshot().epoch, 2);
    }

    #[test]
    fn closed_cell_refuses_new_attempts() {
        let cell = ConnectionStateCell::new();
        cell.begin_connect();

        let previous = cell.close();
        assert_eq!(previous.state, ConnectionState::Connecting);
        assert_eq!(cell.mark_ready(), None);
        assert!(!cell.begin_connect());
        assert_eq!(cell.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn gauge_follows_the_winning_transition() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        let cell = ConnectionStateCell::with_metrics(metrics.clone());
        assert_eq!(metrics.connection_status(), 0);

        cell.begin_connect();
        cell.mark_ready();
        assert_eq!(metrics.connection_status(), 1);

        cell.mark_lost(1);
        cell.begin_connect();
        cell.mark_ready();
        assert!(!cell.mark_lost(1));
        assert_eq!(metrics.connection_status(), 1);

        cell.close();
        assert_eq!(metrics.connection_status(), 0);
    }

    #[test]
    fn gauge_matches_state_under_concurrent_loss_and_reconnect() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        let cell = Arc::new(ConnectionStateCell::with_metrics(metrics.clone()));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        if cell.begin_connect() {
                            cell.mark_ready();
                        }
                        let epoch = cell.snapshot().epoch;
                        cell.mark_lost(epoch);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(metrics.connection_status(), cell.state().gauge_value());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let cell = ConnectionStateCell::new();
        let mut rx = cell.subscribe();

        cell.begin_connect();
        cell.mark_ready();

        let status = rx.wait_for(|s| s.state == ConnectionState::Ready).await.unwrap();
        assert_eq!(status.epoch, 1);
    }
}
