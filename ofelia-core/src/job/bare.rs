//! Shared job state, composed into every concrete backend
//!
//! `BareJob` is plain data plus the synchronization its fields need; it
//! implements no backend-specific `run` logic of its own; backends embed
//! it and delegate every `Job` method except `run`.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::execution::Execution;
use crate::middleware::Middleware;
use crate::reliability::RetryConfig;

/// Default history retention if a backend doesn't override it.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Declarative dependency wiring consumed by the workflow orchestrator.
#[derive(Debug, Clone)]
pub struct DependencyConfig {
    /// Jobs that must complete successfully before this one may fire.
    pub depends_on: Vec<String>,
    /// Jobs to trigger after this one succeeds.
    pub on_success: Vec<String>,
    /// Jobs to trigger after this one fails.
    pub on_failure: Vec<String>,
    /// Whether overlapping executions of this job are permitted.
    pub allow_parallel: bool,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            depends_on: Vec::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
            allow_parallel: true,
        }
    }
}

/// State shared by every job backend: name, schedule, bounded history,
/// retry policy, dependency wiring, and middlewares.
pub struct BareJob {
    name: String,
    schedule: String,
    command: String,
    history_limit: usize,
    history: RwLock<Vec<Arc<Execution>>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    running_count: AtomicI32,
    cron_job_id: AtomicU64,
    retry_config: Option<RetryConfig>,
    dependencies: DependencyConfig,
    run_on_startup: bool,
}

impl BareJob {
    /// Build the shared state for a job named `name` on `schedule`,
    /// described for logs by `command`.
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            command: command.into(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            history: RwLock::new(Vec::new()),
            middlewares: RwLock::new(Vec::new()),
            running_count: AtomicI32::new(0),
            cron_job_id: AtomicU64::new(0),
            retry_config: None,
            dependencies: DependencyConfig::default(),
            run_on_startup: false,
        }
    }

    /// Override the default history retention.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Attach a retry policy overriding the scheduler default.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    /// Attach dependency wiring (`depends-on`/`on-success`/`on-failure`/
    /// `allow-parallel`).
    pub fn with_dependencies(mut self, dependencies: DependencyConfig) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Mark this job to fire once at scheduler startup (only meaningful
    /// for triggered-only jobs).
    pub fn with_run_on_startup(mut self, run_on_startup: bool) -> Self {
        self.run_on_startup = run_on_startup;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.read().clone()
    }

    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares.write().push(middleware);
    }

    pub fn notify_start(&self) {
        self.running_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn notify_stop(&self) {
        self.running_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn running(&self) -> i32 {
        self.running_count.load(Ordering::SeqCst)
    }

    pub fn cron_job_id(&self) -> Option<u64> {
        match self.cron_job_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn set_cron_job_id(&self, id: u64) {
        self.cron_job_id.store(id, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<Arc<Execution>> {
        self.history.read().clone()
    }

    /// Append an execution, evicting the oldest entry (FIFO) once the
    /// configured history limit is reached.
    pub fn record_execution(&self, execution: Execution) {
        let mut history = self.history.write();
        if history.len() >= self.history_limit {
            history.remove(0);
        }
        history.push(Arc::new(execution));
    }

    pub fn should_run_on_startup(&self) -> bool {
        self.run_on_startup
    }

    pub fn retry_config(&self) -> Option<RetryConfig> {
        self.retry_config.clone()
    }

    pub fn allow_parallel(&self) -> bool {
        self.dependencies.allow_parallel
    }

    pub fn depends_on(&self) -> Vec<String> {
        self.dependencies.depends_on.clone()
    }

    pub fn on_success(&self) -> Vec<String> {
        self.dependencies.on_success.clone()
    }

    pub fn on_failure(&self) -> Vec<String> {
        self.dependencies.on_failure.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;

    #[test]
    fn history_evicts_oldest_once_at_limit() {
        let bare = BareJob::new("job", "@manual", "echo hi").with_history_limit(2);
        let pool = BufferPool::new();

        for _ in 0..3 {
            bare.record_execution(Execution::new(&pool));
        }

        assert_eq!(bare.history().len(), 2);
    }

    #[test]
    fn cron_job_id_starts_unset() {
        let bare = BareJob::new("job", "@manual", "echo hi");
        assert_eq!(bare.cron_job_id(), None);
        bare.set_cron_job_id(7);
        assert_eq!(bare.cron_job_id(), Some(7));
    }

    #[test]
    fn running_count_tracks_start_stop() {
        let bare = BareJob::new("job", "@manual", "echo hi");
        assert_eq!(bare.running(), 0);
        bare.notify_start();
        bare.notify_start();
        assert_eq!(bare.running(), 2);
        bare.notify_stop();
        assert_eq!(bare.running(), 1);
    }
}
