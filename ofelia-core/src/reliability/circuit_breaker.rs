//! In-process circuit breaker
//!
//! Protects a call behind a three-state gate: `Closed` (normal operation),
//! `Open` (failing fast), `HalfOpen` (probing for recovery). State lives in
//! memory, scoped to a single process — there is no distributed coordinator
//! here, unlike a store-backed breaker would need.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation — all calls allowed.
    Closed,
    /// Failure threshold exceeded — all calls rejected.
    Open,
    /// Testing if the downstream recovered — limited calls allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration.
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure threshold  ┌─────────┐  reset timeout  ┌──────────┐
/// │ Closed  │ ─────────────────► │  Open   │ ──────────────► │ HalfOpen │
/// └─────────┘                     └─────────┘                 └──────────┘
///      ▲                                                            │
///      │                       success threshold                    │
///      └────────────────────────────────────────────────────────────┘
///      first failure reopens ◄───────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes required to close the circuit from half-open.
    pub success_threshold: u32,
    /// Time to wait before transitioning from open to half-open.
    #[serde(with = "duration_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold that opens the circuit.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold that closes the circuit from half-open.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open before probing again.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
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

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Permit handed out by [`CircuitBreaker::before_call`]; the caller must
/// report the outcome exactly once via [`Permit::success`] or
/// [`Permit::failure`] to drive the state machine forward.
#[must_use = "a circuit breaker permit must be resolved with success() or failure()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
}

impl Permit<'_> {
    /// Report that the protected call succeeded.
    pub fn success(self) {
        self.breaker.after_call(true);
    }

    /// Report that the protected call failed.
    pub fn failure(self) {
        self.breaker.after_call(false);
    }
}

/// A failure gate for a single protected resource.
///
/// Identified by name for logging; callers typically keep one instance per
/// resource (one per Docker daemon endpoint, for example) for the lifetime
/// of the process.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    concurrent_count: AtomicU32,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a circuit breaker using the real system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a circuit breaker with an injected clock, for deterministic
    /// tests of the reset-timeout transition.
    pub fn with_clock(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
            concurrent_count: AtomicU32::new(0),
            clock,
        }
    }

    /// Name this breaker was constructed with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, transitioning Open → HalfOpen first if the reset
    /// timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Number of calls currently in flight through this breaker.
    pub fn concurrent_count(&self) -> u32 {
        self.concurrent_count.load(Ordering::SeqCst)
    }

    /// Ask whether a call should proceed. Returns `None` (and does not
    /// increment the concurrent counter) when the circuit is open.
    pub fn before_call(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Open => None,
            CircuitState::Closed | CircuitState::HalfOpen => {
                self.concurrent_count.fetch_add(1, Ordering::SeqCst);
                Some(Permit { breaker: self })
            }
        }
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                let elapsed = (self.clock.now() - opened_at).to_std().unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                }
            }
        }
    }

    fn after_call(&self, success: bool) {
        self.concurrent_count.fetch_sub(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();

        match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.failure_count = 0;
            }
            (CircuitState::Closed, false) => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(self.clock.now());
                    inner.failure_count = 0;
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            (CircuitState::HalfOpen, false) => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                inner.success_count = 0;
            }
            (CircuitState::Open, _) => {
                // A permit can't be outstanding while open; ignore.
            }
        }
    }
}
