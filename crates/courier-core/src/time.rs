//! Time abstractions for testable timing.
//!
//! The connection supervisor sleeps between retry ticks and the consumer
//! loop sleeps between failed receives. Both go through [`Clock`] so tests
//! can drive ticks by hand with [`TestClock`] instead of waiting on real
//! timers.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tokio::sync::Notify;

/// Clock abstraction for time operations.
///
/// Production code uses [`RealClock`]; tests inject [`TestClock`].
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current system time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real clock backed by the system clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock.
///
/// Unlike a real clock, sleeping on a `TestClock` parks the caller until a
/// test calls [`TestClock::advance`] far enough to pass the deadline. This
/// turns every retry tick into an explicit step of the test.
///
/// ```
/// use std::time::Duration;
///
/// use courier_core::{Clock, TestClock};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let clock = TestClock::new();
/// let sleeper = {
///     let clock = clock.clone();
///     tokio::spawn(async move { clock.sleep(Duration::from_secs(10)).await })
/// };
///
/// while clock.sleepers() == 0 {
///     tokio::task::yield_now().await;
/// }
/// clock.advance(Duration::from_secs(10));
/// sleeper.await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TestClock {
    inner: Arc<TestClockInner>,
}

#[derive(Debug)]
struct TestClockInner {
    /// Monotonic time in nanoseconds since creation
    monotonic_ns: AtomicU64,
    /// System time as nanoseconds since UNIX_EPOCH
    system_ns: AtomicU64,
    /// Base instant for monotonic time calculations
    base_instant: Instant,
    /// Number of sleep futures currently parked
    sleepers: AtomicUsize,
    advanced: Notify,
}

impl TestClock {
    /// Creates a new test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock whose system time starts at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            inner: Arc::new(TestClockInner {
                monotonic_ns: AtomicU64::new(0),
                system_ns: AtomicU64::new(saturating_nanos(since_epoch)),
                base_instant: Instant::now(),
                sleepers: AtomicUsize::new(0),
                advanced: Notify::new(),
            }),
        }
    }

    /// Advances both clocks and wakes every sleeper whose deadline passed.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = saturating_nanos(duration);
        self.inner.monotonic_ns.fetch_add(duration_ns, Ordering::AcqRel);
        self.inner.system_ns.fetch_add(duration_ns, Ordering::AcqRel);
        self.inner.advanced.notify_waiters();
    }

    /// Returns elapsed virtual time since clock creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.inner.monotonic_ns.load(Ordering::Acquire))
    }

    /// Number of sleep futures currently waiting on this clock.
    pub fn sleepers(&self) -> usize {
        self.inner.sleepers.load(Ordering::Acquire)
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.inner.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.inner.system_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let deadline = self.elapsed().saturating_add(duration);
        let inner = &self.inner;

        Box::pin(async move {
            let _parked = SleeperGuard::new(&inner.sleepers);
            loop {
                let notified = inner.advanced.notified();
                tokio::pin!(notified);
                // Register before checking so an advance between the check and
                // the await is not lost.
                notified.as_mut().enable();

                if Duration::from_nanos(inner.monotonic_ns.load(Ordering::Acquire)) >= deadline {
                    return;
                }
                notified.await;
            }
        })
    }
}

struct SleeperGuard<'a>(&'a AtomicUsize);

impl<'a> SleeperGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for SleeperGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
