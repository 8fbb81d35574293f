//! Reconnect scheduling.
//!
//! The supervisor retries on a flat interval forever. There is no backoff
//! growth and no circuit breaker: a misconfigured broker and a broker that is
//! briefly down are retried the same way. Jitter is off by default and can
//! be enabled to spread reconnects of many replicas.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default time between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Retry schedule for the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Time between connection attempts.
    pub interval: Duration,

    /// Jitter percentage (0.0 to 1.0) applied to each interval.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { interval: DEFAULT_RETRY_INTERVAL, jitter_factor: 0.0 }
    }
}

impl RetryPolicy {
    /// Flat interval with no jitter.
    pub fn flat(interval: Duration) -> Self {
        Self { interval, jitter_factor: 0.0 }
    }

    /// Returns the policy with the given jitter factor.
    #[must_use]
    pub fn with_jitter(self, jitter_factor: f64) -> Self {
        Self { jitter_factor, ..self }
    }

    /// Delay until the next connection attempt.
    pub fn next_delay(&self) -> Duration {
        apply_jitter(self.interval, self.jitter_factor)
    }
}

/// Randomizes `duration` by up to ±`jitter_factor`.
///
/// With `jitter_factor = 0.25`, a 10s interval becomes anything from 7.5s
/// to 12.5s. Factors outside `0.0..=1.0` are clamped.
pub fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.min(1.0);
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((duration.as_secs_f64() + jitter_offset).max(0.0))
}
