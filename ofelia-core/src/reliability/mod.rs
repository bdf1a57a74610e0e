//! Resilience primitives
//!
//! - [`RetryConfig`] / [`RetryExecutor`] — retry with exponential backoff.
//! - [`CircuitBreaker`] — three-state failure gate.
//! - [`RateLimiter`] — token bucket.
//! - [`Bulkhead`] — bounded concurrency island.

mod bulkhead;
mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use bulkhead::{Bulkhead, BulkheadFull, BulkheadPermit};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryConfig, RetryExecutor, RetryExhausted, RetryableError};
