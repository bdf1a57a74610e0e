//! Metrics recording seam
//!
//! Metrics exporters are treated as an external collaborator, out of scope
//! for this crate, but several components — the retry executor, the
//! container monitor, the resilient Docker client — notify a metrics
//! recorder as they work. This module defines that narrow seam as a trait
//! so the core never depends on a concrete exporter; a binary wires in
//! whatever it wants (or the [`NoopMetrics`] default).

use std::sync::Arc;
use std::time::Duration;

/// Receives point-in-time observations from the orchestration core.
///
/// Every method has a default no-op body so implementors only override what
/// they care about.
pub trait MetricsRecorder: Send + Sync {
    /// A retry attempt was made for `job`.
    fn record_retry_attempt(&self, _job: &str, _attempt: u32, _succeeded: bool) {}

    /// The container monitor finished waiting for a container.
    fn record_container_wait(&self, _method: &str, _event_count: u64, _fell_back: bool, _duration: Duration) {}

    /// A Docker provider call completed.
    fn record_docker_call(&self, _operation: &str, _succeeded: bool, _duration: Duration) {}
}

/// Discards every observation. The default recorder when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {}

/// Convenience alias used throughout the core for a shared recorder handle.
pub type SharedMetrics = Arc<dyn MetricsRecorder>;

/// Build a default, no-op metrics handle.
pub fn noop() -> SharedMetrics {
    Arc::new(NoopMetrics)
}
