//! Dependency-driven job wiring
//!
//! - [`graph`] builds the `depends-on`/`on-success`/`on-failure` DAG and
//!   rejects cycles.
//! - [`orchestrator`] tracks in-flight correlated firings and cascades
//!   dependent jobs once their prerequisites clear.

mod graph;
mod orchestrator;

pub use graph::{DependencyEdge, DependencyGraph, EdgeCondition};
pub use orchestrator::{WorkflowExecution, WorkflowOrchestrator, WorkflowScheduler, DEFAULT_RETENTION};
