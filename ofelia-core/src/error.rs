//! Error kinds surfaced by the orchestration core
//!
//! These map directly onto the catalog in the external interface docs:
//! configuration errors, registry errors, workflow errors, runtime errors,
//! infrastructure errors, and lifecycle errors. Worker-local failures flow
//! into an [`crate::execution::Execution`] rather than propagating as
//! `Result::Err` up through the scheduler — only construction-time and
//! shutdown-time failures use this type directly.

use thiserror::Error;

/// Sentinel marking an execution that was deliberately skipped rather than
/// failed (for example, `WorkflowOrchestrator::can_execute` returning
/// false). Carried as the `error` field of a skipped [`crate::execution::Execution`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("execution skipped: {0}")]
pub struct SkippedExecution(pub String);

/// Top-level error type for the scheduler and its collaborators.
#[derive(Debug, Error)]
pub enum OfeliaError {
    /// `AddJob` called with a blank schedule string.
    #[error("job schedule must not be empty")]
    EmptySchedule,

    /// Scheduler constructed with zero concurrency.
    #[error("scheduler concurrency must be at least 1")]
    EmptyScheduler,

    /// Lookup by name found nothing.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// `AddJob` called with a name already registered.
    #[error("job already exists: {0}")]
    JobAlreadyExists(String),

    /// Cron engine rejected a registration or trigger.
    #[error("cron engine error: {0}")]
    CronEngine(String),

    /// `BuildDependencyGraph` found a cycle.
    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    /// `RunJob`/`CanExecute` refused because a parent has not resolved.
    #[error("dependency not met for job {job}: waiting on {parent}")]
    DependencyNotMet {
        /// Job that was asked to run.
        job: String,
        /// Parent job it depends on.
        parent: String,
    },

    /// A dependency edge names a job that does not exist, or the graph is
    /// otherwise structurally invalid.
    #[error("invalid workflow: {0}")]
    WorkflowInvalid(String),

    /// Execution was deliberately skipped, not failed.
    #[error(transparent)]
    Skipped(#[from] SkippedExecution),

    /// A job-level `MaxRuntime` elapsed before the container terminated.
    #[error("job {0} exceeded its maximum runtime")]
    MaxTimeRunning(String),

    /// The underlying container/daemon reported exit code -1 (killed, OOM,
    /// or otherwise indeterminate).
    #[error("unexpected termination of job {0}")]
    Unexpected(String),

    /// The job's command exited with a non-zero status.
    #[error("job {job} exited with status {code}")]
    NonZeroExit {
        /// Job name.
        job: String,
        /// Process/container exit code.
        code: i64,
    },

    /// Raised by the resilient Docker client when the circuit is open.
    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    /// A Docker/container-engine operation failed.
    #[error("container operation {operation} failed for {identifier}: {source}")]
    Container {
        /// Operation name (e.g. "inspect", "wait", "exec").
        operation: &'static str,
        /// Container or job identifier involved.
        identifier: String,
        /// Underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// Image pull/inspect failed.
    #[error("image operation {operation} failed for {image}: {source}")]
    Image {
        /// Operation name.
        operation: &'static str,
        /// Image reference.
        image: String,
        /// Underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// Swarm service create/inspect/remove failed.
    #[error("service operation {operation} failed for {service}: {source}")]
    Service {
        /// Operation name.
        operation: &'static str,
        /// Service name.
        service: String,
        /// Underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// `Shutdown` called while a previous shutdown was already running.
    #[error("shutdown already in progress")]
    ShutdownInProgress,

    /// Shutdown hooks did not all complete within the configured timeout.
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(std::time::Duration),

    /// One or more shutdown hooks returned an error; the process still
    /// terminated, these are reported for diagnostics.
    #[error("shutdown hooks failed: {0}")]
    ShutdownFailed(String),

    /// `StopWithTimeout` did not observe quiescence before its deadline.
    #[error("scheduler stop timed out after {0:?}")]
    SchedulerTimeout(std::time::Duration),

    /// A running job was cancelled (shutdown, context cancellation).
    #[error("job {0} was canceled")]
    JobCanceled(String),

    /// A job could not be admitted to run at all (e.g. backend refused).
    #[error("cannot start job {0}: {1}")]
    CannotStartJob(String, String),

    /// A bounded wait (container wait, shutdown wait) elapsed.
    #[error("wait timed out after {0:?}")]
    WaitTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, OfeliaError>;

impl crate::reliability::RetryableError for OfeliaError {
    fn error_type(&self) -> Option<&str> {
        Some(match self {
            OfeliaError::EmptySchedule => "EmptySchedule",
            OfeliaError::EmptyScheduler => "EmptyScheduler",
            OfeliaError::JobNotFound(_) => "JobNotFound",
            OfeliaError::JobAlreadyExists(_) => "JobAlreadyExists",
            OfeliaError::CronEngine(_) => "CronEngine",
            OfeliaError::CircularDependency(_) => "CircularDependency",
            OfeliaError::DependencyNotMet { .. } => "DependencyNotMet",
            OfeliaError::WorkflowInvalid(_) => "WorkflowInvalid",
            OfeliaError::Skipped(_) => "SkippedExecution",
            OfeliaError::MaxTimeRunning(_) => "MaxTimeRunning",
            OfeliaError::Unexpected(_) => "Unexpected",
            OfeliaError::NonZeroExit { .. } => "NonZeroExit",
            OfeliaError::CircuitOpen(_) => "CircuitOpen",
            OfeliaError::Container { .. } => "Container",
            OfeliaError::Image { .. } => "Image",
            OfeliaError::Service { .. } => "Service",
            OfeliaError::ShutdownInProgress => "ShutdownInProgress",
            OfeliaError::ShutdownTimeout(_) => "ShutdownTimeout",
            OfeliaError::ShutdownFailed(_) => "ShutdownFailed",
            OfeliaError::SchedulerTimeout(_) => "SchedulerTimeout",
            OfeliaError::JobCanceled(_) => "JobCanceled",
            OfeliaError::CannotStartJob(_, _) => "CannotStartJob",
            OfeliaError::WaitTimeout(_) => "WaitTimeout",
        })
    }
}
