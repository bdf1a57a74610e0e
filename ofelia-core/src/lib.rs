//! # Ofelia orchestration core
//!
//! A container-aware cron scheduler: evaluates cron and `@every` schedules,
//! dispatches job backends (local process, container run/exec, Swarm
//! service) through a resilient Docker client, cascades dependent jobs via
//! a `depends-on`/`on-success`/`on-failure` workflow graph, and drains
//! cleanly on shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Scheduler                             │
//! │  (cron evaluation, concurrency admission, retry, dispatch)   │
//! └─────────────────────────────────────────────────────────────┘
//!            │                         │
//!            ▼                         ▼
//! ┌───────────────────────┐  ┌─────────────────────────────────┐
//! │  WorkflowOrchestrator  │  │               Job                │
//! │  (dependency DAG,      │  │  LocalJob / ContainerRunJob /    │
//! │   readiness, cascade)  │  │  ContainerExecJob / SwarmServiceJob │
//! └───────────────────────┘  └─────────────────────────────────┘
//!                                         │
//!                                         ▼
//!                          ┌─────────────────────────────────┐
//!                          │      ResilientDockerClient        │
//!                          │  (circuit breaker + concurrency   │
//!                          │   ceiling + metrics over bollard) │
//!                          └─────────────────────────────────┘
//! ```

pub mod annotations;
pub mod buffer_pool;
pub mod clock;
pub mod container_monitor;
pub mod docker;
pub mod error;
pub mod execution;
pub mod job;
pub mod metrics;
pub mod middleware;
pub mod reliability;
pub mod scheduler;
pub mod shutdown;
pub mod workflow;

/// Common imports for wiring a scheduler together.
pub mod prelude {
    pub use crate::clock::{Clock, FakeClock, SystemClock};
    pub use crate::container_monitor::ContainerMonitor;
    pub use crate::docker::{DockerClientConfig, DockerProvider, ResilientDockerClient};
    pub use crate::error::{OfeliaError, Result};
    pub use crate::execution::{Context, Execution};
    pub use crate::job::{BareJob, ContainerExecJob, ContainerRunJob, Job, LocalJob, SwarmServiceJob};
    pub use crate::metrics::{MetricsRecorder, SharedMetrics};
    pub use crate::middleware::Middleware;
    pub use crate::reliability::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryExecutor};
    pub use crate::scheduler::{Scheduler, SchedulerConfig};
    pub use crate::shutdown::{ShutdownChan, ShutdownManager};
    pub use crate::workflow::{DependencyGraph, WorkflowOrchestrator, WorkflowScheduler};
}

pub use error::{OfeliaError, Result};
pub use scheduler::{Scheduler, SchedulerConfig};
