//! The job contract and its shared state
//!
//! `Job` is a capability contract, not a base class: each backend
//! (`Local`, `ContainerRun`, `ContainerExec`, `SwarmService`) composes a
//! [`BareJob`] for the state every backend needs (name, schedule, history,
//! retry config, middlewares) and supplies its own `run`.

mod bare;
mod container_exec;
mod container_run;
mod local;
mod swarm_service;

pub use bare::BareJob;
pub use container_exec::ContainerExecJob;
pub use container_run::ContainerRunJob;
pub use local::LocalJob;
pub use swarm_service::SwarmServiceJob;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::OfeliaError;
use crate::execution::{Context, Execution};
use crate::middleware::Middleware;
use crate::reliability::RetryConfig;

/// A schedulable unit of work.
///
/// Implementations own their specific execution mechanics in `run`; every
/// other method is typically delegated straight to an embedded
/// [`BareJob`].
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique name within the scheduler.
    fn name(&self) -> &str;

    /// Raw schedule string: standard cron, `@every <dur>`, `@hourly`, or one
    /// of the triggered-only sentinels `@triggered`/`@manual`/`@none`.
    fn schedule(&self) -> &str;

    /// Human-readable description of what this job runs, for logs.
    fn command(&self) -> &str;

    /// Run one attempt. Implementations must write output to
    /// `ctx.execution_mut()`'s stdout/stderr rather than returning it.
    async fn run(&self, ctx: &mut Context) -> Result<(), OfeliaError>;

    /// Middlewares installed at job scope, appended after scheduler-scope
    /// ones so they win on a `kind()` collision.
    fn middlewares(&self) -> Vec<Arc<dyn Middleware>>;

    /// Install additional job-scope middlewares.
    fn use_middleware(&self, middleware: Arc<dyn Middleware>);

    /// Called when an execution transitions to running.
    fn notify_start(&self);

    /// Called when an execution transitions out of running.
    fn notify_stop(&self);

    /// Number of executions of this job currently running.
    fn running(&self) -> i32;

    /// Cron engine entry id, set once this job is registered with the
    /// cron engine (never, for triggered-only jobs).
    fn cron_job_id(&self) -> Option<u64>;

    /// Record the cron engine entry id assigned at registration.
    fn set_cron_job_id(&self, id: u64);

    /// Bounded, FIFO-truncated history of past executions, oldest first.
    fn history(&self) -> Vec<Arc<Execution>>;

    /// Append an execution to history, evicting the oldest entry if the
    /// history is at capacity.
    fn record_execution(&self, execution: Execution);

    /// Whether this job should fire once at scheduler startup, in addition
    /// to its normal schedule (only meaningful for triggered-only jobs;
    /// the cron engine itself handles startup firing for scheduled jobs).
    fn should_run_on_startup(&self) -> bool;

    /// Retry policy for this job's executions, if it overrides the
    /// scheduler default.
    fn retry_config(&self) -> Option<RetryConfig> {
        None
    }

    /// Whether overlapping executions of this job are permitted.
    fn allow_parallel(&self) -> bool {
        true
    }

    /// Names of jobs this job depends on (`depends-on`).
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of jobs to trigger after this one succeeds (`on-success`).
    fn on_success(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of jobs to trigger after this one fails (`on-failure`).
    fn on_failure(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Whether `schedule` is one of the triggered-only sentinels: stored in
/// the registry but never registered with the cron engine.
pub fn is_triggered_only(schedule: &str) -> bool {
    matches!(schedule, "@triggered" | "@manual" | "@none")
}
