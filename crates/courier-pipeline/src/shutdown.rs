//! Bounded shutdown of the broker connection.
//!
//! On SIGINT or SIGTERM the coordinator stops the retry loop and every
//! consumer loop, disconnects the producer and consumer if a connection was
//! live, and finally pins the state to `Disconnected`. Each step that waits
//! on the broker is bounded, so shutdown finishes within the configured
//! timeout (plus a short grace for joining tasks) even when the broker has
//! stopped answering.

use std::time::{Duration, Instant};

use courier_core::ConnectionState;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::supervisor::ConnectionSupervisor;

/// Default budget for a graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum time granted to background tasks to observe cancellation.
const JOIN_GRACE: Duration = Duration::from_millis(100);

/// How shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Live connection was disconnected cleanly.
    Clean,
    /// No connection was live; nothing to disconnect.
    NotConnected,
    /// Disconnect returned an error.
    DisconnectFailed,
    /// Disconnect or task join exceeded the budget and was abandoned.
    TimedOut,
}

/// Drives shutdown of a [`ConnectionSupervisor`].
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    supervisor: ConnectionSupervisor,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with the given shutdown budget.
    pub fn new(supervisor: ConnectionSupervisor, timeout: Duration) -> Self {
        Self { supervisor, timeout }
    }

    /// Shutdown budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for CTRL+C or SIGTERM.
    pub async fn wait_for_signal(&self) {
        shutdown_signal().await;
    }

    /// Waits for a signal, then shuts down.
    pub async fn run_until_signal(&self) -> ShutdownOutcome {
        self.wait_for_signal().await;
        self.shutdown().await
    }

    /// Stops background work and releases the broker session.
    ///
    /// Safe to call more than once; later calls find nothing connected.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        let started = Instant::now();
        let was = self.supervisor.status();
        info!(
            state = %was.state,
            epoch = was.epoch,
            timeout = ?self.timeout,
            "shutting down broker connection"
        );

        self.supervisor.cancel_background();

        let mut outcome = match (was.state, self.supervisor.existing_client()) {
            (ConnectionState::Ready, Some(client)) => {
                match tokio::time::timeout(self.timeout, client.disconnect()).await {
                    Ok(Ok(())) => {
                        info!("broker session disconnected");
                        ShutdownOutcome::Clean
                    },
                    Ok(Err(e)) => {
                        warn!(error = %e, "broker disconnect failed");
                        ShutdownOutcome::DisconnectFailed
                    },
                    Err(_elapsed) => {
                        error!(timeout = ?self.timeout, "broker disconnect timed out, abandoning");
                        ShutdownOutcome::TimedOut
                    },
                }
            },
            _ => ShutdownOutcome::NotConnected,
        };

        self.supervisor.close();

        let remaining = self.timeout.saturating_sub(started.elapsed()).max(JOIN_GRACE);
        if !join_bounded(self.supervisor.take_tasks(), remaining).await {
            outcome = ShutdownOutcome::TimedOut;
        }

        info!(outcome = ?outcome, elapsed = ?started.elapsed(), "broker shutdown complete");
        outcome
    }
}

/// Joins `handles` within `budget`, aborting whatever is still running
/// afterwards. Returns `true` if every task finished in time.
async fn join_bounded(handles: Vec<JoinHandle<()>>, budget: Duration) -> bool {
    let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

    match tokio::time::timeout(budget, join_all(handles)).await {
        Ok(results) => {
            let panicked = results.iter().filter(|r| r.as_ref().is_err_and(|e| e.is_panic())).count();
            if panicked > 0 {
                warn!(panicked, "background tasks panicked before shutdown");
            }
            true
        },
        Err(_elapsed) => {
            error!(
                tasks = aborts.len(),
                budget = ?budget,
                "background tasks did not stop in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
            false
        },
    }
}

/// Resolves on CTRL+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
