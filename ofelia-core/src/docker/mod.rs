//! Container engine integration
//!
//! [`provider`] defines the narrow async contract job backends and the
//! container monitor depend on; [`client`] is the one production
//! implementation, backed by `bollard` and hardened with a circuit breaker
//! and a concurrency ceiling.

mod client;
mod provider;

pub use client::{DockerClientConfig, ResilientDockerClient};
pub use provider::{
    ContainerEvent, ContainerRunOptions, ContainerState, DockerProvider, ExecResult, ServiceSpec,
};
