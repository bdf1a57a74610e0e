//! Monotonic/wall-time abstraction
//!
//! The scheduler, retry executor, and circuit breaker all need "now" to
//! compute deadlines and backoff delays. Reading `chrono::Utc::now()` or
//! `tokio::time::Instant::now()` directly makes those paths unobservable in
//! tests — a retry test would need to actually sleep for the backoff delay.
//! Injecting a [`Clock`] lets tests substitute a [`FakeClock`] that advances
//! only when told to.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of wall-clock time and the ability to sleep.
///
/// Production code uses [`SystemClock`]; tests use [`FakeClock`] so that
/// retry backoff and circuit-breaker timeouts can be exercised without
/// real delays.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration`, honoring the clock's notion of
    /// time. On [`SystemClock`] this is `tokio::time::sleep`; on
    /// [`FakeClock`] this blocks until a matching `advance` call lands.
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock, backed by `chrono::Utc::now()` and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock for tests.
///
/// Time only moves when [`FakeClock::advance`] is called. `sleep` resolves
/// as soon as the accumulated advance covers the requested duration,
/// polling at a short interval so it never requires the caller to
/// coordinate on an exact tick.
#[derive(Clone)]
pub struct FakeClock {
    epoch: DateTime<Utc>,
    elapsed_millis: Arc<AtomicI64>,
}

impl FakeClock {
    /// Create a fake clock starting at `epoch`.
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            elapsed_millis: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Advance the clock by `duration`. Any in-flight `sleep` calls whose
    /// deadline has now been reached will wake on their next poll.
    pub fn advance(&self, duration: Duration) {
        self.elapsed_millis
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_millis.load(Ordering::SeqCst).max(0) as u64)
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait::async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.epoch + chrono::Duration::from_std(self.elapsed()).unwrap_or_default()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.elapsed() + duration;
        while self.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_now_is_recent() {
        let clock = SystemClock;
        let now = clock.now();
        assert!((Utc::now() - now).num_seconds().abs() < 5);
    }

    #[tokio::test]
    async fn fake_clock_does_not_advance_on_its_own() {
        let clock = FakeClock::new(Utc::now());
        let start = clock.now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(clock.now(), start);
    }

    #[tokio::test]
    async fn fake_clock_advance_moves_now() {
        let clock = FakeClock::new(Utc::now());
        let start = clock.now();
        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn fake_clock_sleep_resolves_after_matching_advance() {
        let clock = FakeClock::new(Utc::now());
        let waiter = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep(Duration::from_millis(50)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        clock.advance(Duration::from_millis(50));

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("sleep should resolve after advance")
            .unwrap();
    }
}
