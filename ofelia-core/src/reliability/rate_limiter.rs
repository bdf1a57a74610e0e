//! Token-bucket rate limiter
//!
//! Bounds the rate of a class of operations (for example, Docker API calls)
//! independent of how many are concurrently in flight — that's
//! [`super::bulkhead::Bulkhead`]'s job. Refill is lazy: tokens accrue based
//! on elapsed time read through the injected [`Clock`] the moment a permit
//! is requested, rather than via a background ticker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};

/// Configuration for a token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum tokens the bucket can hold.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
}

impl RateLimiterConfig {
    /// Construct a configuration allowing `capacity` burst and
    /// `refill_per_second` sustained rate.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }
}

struct Inner {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// A token-bucket rate limiter.
pub struct RateLimiter {
    config: RateLimiterConfig,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Build a limiter starting with a full bucket, using the system clock.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a limiter with an injected clock for deterministic tests.
    pub fn with_clock(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            config,
            inner: Mutex::new(Inner {
                tokens: config.capacity as f64,
                last_refill: now,
            }),
            clock,
        }
    }

    fn refill(&self, inner: &mut Inner) {
        let now = self.clock.now();
        let elapsed = (now - inner.last_refill).to_std().unwrap_or_default().as_secs_f64();
        if elapsed > 0.0 {
            inner.tokens = (inner.tokens + elapsed * self.config.refill_per_second)
                .min(self.config.capacity as f64);
            inner.last_refill = now;
        }
    }

    /// Try to take one token. Returns `true` if the call is admitted.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(1.0)
    }

    /// Try to take `n` tokens atomically.
    pub fn try_acquire_n(&self, n: f64) -> bool {
        let mut inner = self.inner.lock();
        self.refill(&mut inner);
        if inner.tokens >= n {
            inner.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after applying refill.
    pub fn available(&self) -> f64 {
        let mut inner = self.inner.lock();
        self.refill(&mut inner);
        inner.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::time::Duration;

    #[test]
    fn starts_full() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(5, 1.0));
        assert_eq!(limiter.available(), 5.0);
    }

    #[test]
    fn denies_once_exhausted() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(2, 0.0));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let clock = Arc::new(FakeClock::default());
        let limiter = RateLimiter::with_clock(RateLimiterConfig::new(2, 1.0), clock.clone());

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn never_exceeds_capacity() {
        let clock = Arc::new(FakeClock::default());
        let limiter = RateLimiter::with_clock(RateLimiterConfig::new(2, 10.0), clock.clone());
        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.available(), 2.0);
    }
}
