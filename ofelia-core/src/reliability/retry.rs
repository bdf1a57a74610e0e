//! Retry policy and executor
//!
//! [`RetryConfig`] is data; [`RetryExecutor`] is the loop that applies it to
//! a fallible async operation with exponential backoff and jitter, wrapping
//! a single job attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::metrics::{noop, SharedMetrics};

/// Configuration for job retries: exponential backoff with jitter.
///
/// # Example
///
/// ```
/// use ofelia_core::reliability::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::exponential()
///     .with_max_attempts(5)
///     .with_initial_delay(Duration::from_secs(1))
///     .with_max_delay(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Ceiling on the backoff delay.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_factor: f64,
    /// Fraction of the delay randomized away from the computed value.
    pub jitter_factor: f64,
    /// Error types that should never be retried, by name.
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryConfig {
    /// Exponential backoff with sensible defaults: 5 attempts, 1s initial
    /// delay, 60s ceiling, 2x backoff factor, 10% jitter.
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            non_retryable_errors: vec![],
        }
    }

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter_factor: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Fixed-interval retries with no backoff growth.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: interval,
            max_delay: interval,
            backoff_factor: 1.0,
            jitter_factor: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial retry delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum retry delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the jitter fraction, clamped to `[0, 1]`.
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Mark an error type as non-retryable by name.
    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Delay before retrying after `attempt` (1-based) has just failed.
    ///
    /// `delay := min(max(initial_delay * backoff_factor^k, initial_delay), max_delay)`
    /// followed by `± jitter_factor * delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32 - 1);
        let capped = base.max(self.initial_delay.as_secs_f64()).min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter_factor > 0.0 {
            let jitter_range = capped * self.jitter_factor;
            let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether an error of this type should be retried.
    pub fn should_retry(&self, error_type: Option<&str>) -> bool {
        match error_type {
            Some(kind) => !self.non_retryable_errors.iter().any(|e| e == kind),
            None => true,
        }
    }

    /// Whether `current_attempt` (1-based, already made) leaves attempts.
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Outcome of an attempt, used by [`RetryExecutor`] to decide whether to
/// retry. Implement this for the error type passed to
/// [`RetryExecutor::execute`].
pub trait RetryableError {
    /// Stable type name checked against [`RetryConfig::non_retryable_errors`].
    fn error_type(&self) -> Option<&str> {
        None
    }
}

/// Error returned once [`RetryExecutor::execute`] exhausts its attempts.
#[derive(Debug, thiserror::Error)]
#[error("max retry attempts exceeded after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E: std::fmt::Display> {
    /// Number of attempts made.
    pub attempts: u32,
    /// The error from the final attempt.
    pub last_error: E,
}

/// Wraps a fallible async operation with [`RetryConfig`]'s backoff policy.
pub struct RetryExecutor {
    clock: Arc<dyn Clock>,
    metrics: SharedMetrics,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            metrics: noop(),
        }
    }
}

impl RetryExecutor {
    /// Build an executor using the real system clock and no metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an executor with an injected clock and metrics sink.
    pub fn with_clock_and_metrics(clock: Arc<dyn Clock>, metrics: SharedMetrics) -> Self {
        Self { clock, metrics }
    }

    /// Run `operation` up to `config.max_attempts` times, sleeping between
    /// attempts according to the backoff policy. `job_name` is used only for
    /// metrics. Returns the first success, or [`RetryExhausted`] wrapping
    /// the last error once attempts run out or a non-retryable error is hit.
    pub async fn execute<T, E, F, Fut>(
        &self,
        job_name: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: RetryableError + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    self.metrics.record_retry_attempt(job_name, attempt, true);
                    return Ok(value);
                }
                Err(err) => {
                    self.metrics.record_retry_attempt(job_name, attempt, false);

                    let retryable = config.should_retry(err.error_type());
                    if !retryable || !config.has_attempts_remaining(attempt) {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    let delay = config.delay_for_attempt(attempt);
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl RetryableError for TestError {
        fn error_type(&self) -> Option<&str> {
            Some(self.0)
        }
    }

    #[test]
    fn delay_for_attempt_matches_spec_formula() {
        let config = RetryConfig::exponential().with_jitter_factor(0.0);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let config = RetryConfig::exponential()
            .with_max_delay(Duration::from_secs(5))
            .with_jitter_factor(0.0);
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn non_retryable_errors_are_respected() {
        let config = RetryConfig::exponential().with_non_retryable_error("FATAL");
        assert!(!config.should_retry(Some("FATAL")));
        assert!(config.should_retry(Some("TRANSIENT")));
        assert!(config.should_retry(None));
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts_always_failing() {
        let executor = RetryExecutor::new();
        let config = RetryConfig::fixed(Duration::from_millis(1), 3);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("job-a", &config, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError("boom")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_on_kth_attempt() {
        let executor = RetryExecutor::new();
        let config = RetryConfig::fixed(Duration::from_millis(1), 5);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("job-a", &config, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TestError("transient"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let executor = RetryExecutor::new();
        let config = RetryConfig::exponential().with_non_retryable_error("FATAL");
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("job-a", &config, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError("FATAL")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serialization_roundtrip() {
        let config = RetryConfig::exponential()
            .with_max_attempts(10)
            .with_non_retryable_error("TEST");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RetryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
