//! The narrow interface the core depends on over the container engine
//!
//! The Docker daemon wire protocol is treated as an external collaborator;
//! this trait is the seam the core actually calls through, so job backends
//! and the container monitor never depend on `bollard` directly.
//! [`crate::docker::ResilientDockerClient`] is the one implementation the
//! binary crate wires in; tests use an in-memory fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::OfeliaError;

/// Final state of a container once it stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    /// Whether the container is still reported running.
    pub running: bool,
    /// Process exit code, if the container has stopped.
    pub exit_code: Option<i64>,
    /// Human-readable status string from the daemon (`"exited"`, `"oom"`, …).
    pub status: String,
}

/// A single event from the daemon's event stream, filtered to one
/// container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    /// Event action: `"die"`, `"kill"`, `"stop"`, `"oom"`, etc.
    pub action: String,
    /// Container id the event refers to.
    pub container_id: String,
}

/// Result of creating and starting an exec session.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Process exit code.
    pub exit_code: i64,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

/// Options for creating a one-shot container (the `ContainerRun` backend).
#[derive(Debug, Clone)]
pub struct ContainerRunOptions {
    /// Image reference, pulled if not already present.
    pub image: String,
    /// Command and arguments to run inside the container.
    pub command: Vec<String>,
    /// Environment variables, `KEY=VALUE`.
    pub env: Vec<String>,
    /// Labels/annotations to attach to the container.
    pub labels: std::collections::HashMap<String, String>,
    /// Whether to remove the container once it exits.
    pub auto_remove: bool,
}

/// Options for a swarm service deployment (the `SwarmService` backend).
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Service name (must be unique within the swarm).
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Environment variables, `KEY=VALUE`.
    pub env: Vec<String>,
}

/// The container engine operations the orchestration core consumes.
///
/// Every implementation is expected to enforce its own resilience (circuit
/// breaker, concurrency limiting) internally — callers treat this as a
/// plain async contract.
#[async_trait]
pub trait DockerProvider: Send + Sync {
    /// Pull `image` unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<(), OfeliaError>;

    /// Create and start a one-shot container, returning its id.
    async fn run_container(&self, options: &ContainerRunOptions) -> Result<String, OfeliaError>;

    /// Inspect a container's current state.
    async fn inspect_container(&self, id: &str) -> Result<ContainerState, OfeliaError>;

    /// Remove a container (used after a `ContainerRun` job finishes if
    /// `auto_remove` was not set).
    async fn remove_container(&self, id: &str) -> Result<(), OfeliaError>;

    /// Create, start, and wait for an exec session inside `container_id`,
    /// capturing its output.
    async fn exec(&self, container_id: &str, command: &[String]) -> Result<ExecResult, OfeliaError>;

    /// Subscribe to the daemon's event stream, filtered to one container and
    /// the termination-relevant actions (`die`, `kill`, `stop`, `oom`).
    async fn subscribe_events(
        &self,
        container_id: &str,
    ) -> Result<BoxStream<'static, Result<ContainerEvent, OfeliaError>>, OfeliaError>;

    /// Create (or update, if already present) a swarm service.
    async fn deploy_service(&self, spec: &ServiceSpec) -> Result<String, OfeliaError>;

    /// Wait for every task of a service to reach a terminal state.
    async fn wait_for_service_tasks(&self, service_id: &str) -> Result<ContainerState, OfeliaError>;

    /// Remove a swarm service.
    async fn remove_service(&self, service_id: &str) -> Result<(), OfeliaError>;

    /// Ping the daemon to confirm connectivity.
    async fn ping(&self) -> Result<(), OfeliaError>;

    /// Release any pooled connections.
    async fn close(&self);
}
