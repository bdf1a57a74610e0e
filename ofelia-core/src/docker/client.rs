//! Resilient wrapper around the Docker daemon client
//!
//! Every call funnels through [`ResilientDockerClient::protected`], which
//! enforces the circuit breaker and a [`Bulkhead`] concurrency ceiling
//! before ever reaching `bollard`.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::container::Config as ContainerConfig;
use bollard::Docker;
use futures::stream::{BoxStream, StreamExt};
use tracing::warn;

use crate::error::OfeliaError;
use crate::metrics::{noop, SharedMetrics};
use crate::reliability::{Bulkhead, CircuitBreaker, CircuitBreakerConfig};

use super::provider::{
    ContainerEvent, ContainerRunOptions, ContainerState, DockerProvider, ExecResult, ServiceSpec,
};

/// Configuration for [`ResilientDockerClient`].
#[derive(Debug, Clone)]
pub struct DockerClientConfig {
    /// Circuit breaker applied around every daemon call.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Maximum number of daemon calls allowed in flight at once.
    pub max_concurrent_requests: u32,
    /// Connect timeout for the underlying HTTP client.
    pub connect_timeout: Duration,
}

impl Default for DockerClientConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            max_concurrent_requests: 32,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

const DEFAULT_SOCKET: &str = "unix:///var/run/docker.sock";

fn tls_verify_enabled() -> bool {
    matches!(std::env::var("DOCKER_TLS_VERIFY"), Ok(v) if !v.is_empty() && v != "0")
}

fn tls_cert_paths() -> (PathBuf, PathBuf, PathBuf) {
    let dir = std::env::var("DOCKER_CERT_PATH").unwrap_or_else(|_| ".".to_string());
    let dir = Path::new(&dir);
    (dir.join("key.pem"), dir.join("cert.pem"), dir.join("ca.pem"))
}

/// A `DockerProvider` backed by a real daemon connection, with a circuit
/// breaker and a [`Bulkhead`] enforced around every call.
pub struct ResilientDockerClient {
    docker: Docker,
    config: DockerClientConfig,
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    metrics: SharedMetrics,
}

impl ResilientDockerClient {
    /// Connect to the daemon named by `DOCKER_HOST` (the Linux/macOS unix
    /// socket by default), applying `config.connect_timeout` to the
    /// handshake. TCP endpoints negotiate HTTP/2 only when `DOCKER_TLS_VERIFY`
    /// selects the TLS transport; the plain socket and plaintext HTTP
    /// transports stay on HTTP/1.1.
    pub fn connect_default(config: DockerClientConfig) -> Result<Self, OfeliaError> {
        let docker = Self::connect_from_env(&config)?;
        Ok(Self::new(docker, config, noop()))
    }

    fn connect_from_env(config: &DockerClientConfig) -> Result<Docker, OfeliaError> {
        let timeout = config.connect_timeout.as_secs().max(1);
        let host = std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_SOCKET.to_string());

        let result = if host.starts_with("tcp://") || host.starts_with("http://") {
            if tls_verify_enabled() {
                let (key, cert, ca) = tls_cert_paths();
                Docker::connect_with_ssl(&host, &key, &cert, &ca, timeout, &bollard::API_DEFAULT_VERSION)
            } else {
                Docker::connect_with_http(&host, timeout, &bollard::API_DEFAULT_VERSION)
            }
        } else {
            Docker::connect_with_socket(&host, timeout, &bollard::API_DEFAULT_VERSION)
        };

        result.map_err(|e| OfeliaError::Container {
            operation: "connect",
            identifier: "daemon".into(),
            source: e.into(),
        })
    }

    /// Wrap an already-connected `bollard::Docker` handle.
    pub fn new(docker: Docker, config: DockerClientConfig, metrics: SharedMetrics) -> Self {
        let breaker = CircuitBreaker::new("docker", config.circuit_breaker.clone());
        let bulkhead = Bulkhead::new("docker", config.max_concurrent_requests as usize);
        Self {
            docker,
            config,
            breaker,
            bulkhead,
            metrics,
        }
    }

    /// Run `f` behind the circuit breaker and the concurrency bulkhead,
    /// recording latency and outcome metrics under `operation`.
    async fn protected<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, OfeliaError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, OfeliaError>>,
    {
        let _permit = self.bulkhead.try_enter().map_err(|_| OfeliaError::Container {
            operation,
            identifier: "concurrency-limit".into(),
            source: anyhow::anyhow!(
                "max concurrent docker requests ({}) reached",
                self.config.max_concurrent_requests
            ),
        })?;

        self.call_with_breaker(operation, f).await
    }

    async fn call_with_breaker<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, OfeliaError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, OfeliaError>>,
    {
        let permit = self
            .breaker
            .before_call()
            .ok_or_else(|| OfeliaError::CircuitOpen("docker".to_string()))?;

        let start = std::time::Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                permit.success();
                self.metrics.record_docker_call(operation, true, elapsed);
            }
            Err(_) => {
                permit.failure();
                self.metrics.record_docker_call(operation, false, elapsed);
            }
        }

        result
    }
}

#[async_trait]
impl DockerProvider for ResilientDockerClient {
    async fn ensure_image(&self, image: &str) -> Result<(), OfeliaError> {
        self.protected("ensure_image", || async {
            let mut stream = self.docker.create_image(
                Some(CreateImageOptions {
                    from_image: Some(image.to_string()),
                    ..Default::default()
                }),
                None,
                None,
            );
            while let Some(item) = stream.next().await {
                item.map_err(|e| OfeliaError::Image {
                    operation: "pull",
                    image: image.to_string(),
                    source: e.into(),
                })?;
            }
            Ok(())
        })
        .await
    }

    async fn run_container(&self, options: &ContainerRunOptions) -> Result<String, OfeliaError> {
        self.protected("run_container", || async {
            let config = ContainerConfig {
                image: Some(options.image.clone()),
                cmd: Some(options.command.clone()),
                env: Some(options.env.clone()),
                labels: Some(options.labels.clone()),
                ..Default::default()
            };

            let created = self
                .docker
                .create_container(None::<CreateContainerOptions>, config)
                .await
                .map_err(|e| OfeliaError::Container {
                    operation: "create",
                    identifier: options.image.clone(),
                    source: e.into(),
                })?;

            self.docker
                .start_container(&created.id, None::<StartContainerOptions>)
                .await
                .map_err(|e| OfeliaError::Container {
                    operation: "start",
                    identifier: created.id.clone(),
                    source: e.into(),
                })?;

            Ok(created.id)
        })
        .await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, OfeliaError> {
        self.protected("inspect_container", || async {
            let inspect = self
                .docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await
                .map_err(|e| OfeliaError::Container {
                    operation: "inspect",
                    identifier: id.to_string(),
                    source: e.into(),
                })?;

            let state = inspect.state.unwrap_or_default();
            Ok(ContainerState {
                running: state.running.unwrap_or(false),
                exit_code: state.exit_code,
                status: state
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            })
        })
        .await
    }

    async fn remove_container(&self, id: &str) -> Result<(), OfeliaError> {
        self.protected("remove_container", || async {
            self.docker
                .remove_container(
                    id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(|e| OfeliaError::Container {
                    operation: "remove",
                    identifier: id.to_string(),
                    source: e.into(),
                })
        })
        .await
    }

    async fn exec(&self, container_id: &str, command: &[String]) -> Result<ExecResult, OfeliaError> {
        self.protected("exec", || async {
            let created = self
                .docker
                .create_exec(
                    container_id,
                    CreateExecOptions {
                        cmd: Some(command.to_vec()),
                        attach_stdout: Some(true),
                        attach_stderr: Some(true),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| OfeliaError::Container {
                    operation: "exec_create",
                    identifier: container_id.to_string(),
                    source: e.into(),
                })?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();

            if let StartExecResults::Attached { mut output, .. } = self
                .docker
                .start_exec(&created.id, None)
                .await
                .map_err(|e| OfeliaError::Container {
                    operation: "exec_start",
                    identifier: container_id.to_string(),
                    source: e.into(),
                })?
            {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.extend_from_slice(&message)
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.extend_from_slice(&message)
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(OfeliaError::Container {
                                operation: "exec_stream",
                                identifier: container_id.to_string(),
                                source: e.into(),
                            })
                        }
                    }
                }
            }

            let inspect = self
                .docker
                .inspect_exec(&created.id)
                .await
                .map_err(|e| OfeliaError::Container {
                    operation: "exec_inspect",
                    identifier: container_id.to_string(),
                    source: e.into(),
                })?;

            Ok(ExecResult {
                exit_code: inspect.exit_code.unwrap_or(-1),
                stdout,
                stderr,
            })
        })
        .await
    }

    async fn subscribe_events(
        &self,
        container_id: &str,
    ) -> Result<BoxStream<'static, Result<ContainerEvent, OfeliaError>>, OfeliaError> {
        let mut filters = HashMap::new();
        filters.insert("container".to_string(), vec![container_id.to_string()]);
        filters.insert(
            "event".to_string(),
            vec!["die".into(), "kill".into(), "stop".into(), "oom".into()],
        );

        let options = bollard::system::EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let container_id = container_id.to_string();
        let stream = self.docker.events(Some(options)).map(move |item| {
            item.map(|event| ContainerEvent {
                action: event.action.unwrap_or_default(),
                container_id: container_id.clone(),
            })
            .map_err(|e| OfeliaError::Container {
                operation: "events",
                identifier: container_id.clone(),
                source: e.into(),
            })
        });

        Ok(stream.boxed())
    }

    async fn deploy_service(&self, spec: &ServiceSpec) -> Result<String, OfeliaError> {
        warn!(service = %spec.name, "swarm service deployment is a thin stub in this core");
        self.protected("deploy_service", || async {
            Err(OfeliaError::Service {
                operation: "create",
                service: spec.name.clone(),
                source: anyhow::anyhow!("swarm orchestration is not implemented by this provider"),
            })
        })
        .await
    }

    async fn wait_for_service_tasks(&self, service_id: &str) -> Result<ContainerState, OfeliaError> {
        Err(OfeliaError::Service {
            operation: "wait",
            service: service_id.to_string(),
            source: anyhow::anyhow!("swarm orchestration is not implemented by this provider"),
        })
    }

    async fn remove_service(&self, service_id: &str) -> Result<(), OfeliaError> {
        Err(OfeliaError::Service {
            operation: "remove",
            service: service_id.to_string(),
            source: anyhow::anyhow!("swarm orchestration is not implemented by this provider"),
        })
    }

    async fn ping(&self) -> Result<(), OfeliaError> {
        self.protected("ping", || async {
            self.docker
                .ping()
                .await
                .map(|_| ())
                .map_err(|e| OfeliaError::Container {
                    operation: "ping",
                    identifier: "daemon".into(),
                    source: e.into(),
                })
        })
        .await
    }

    async fn close(&self) {
        // bollard's Docker handle has no explicit close; dropping it drains
        // the connection pool.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_concurrency_ceiling() {
        let config = DockerClientConfig::default();
        assert!(config.max_concurrent_requests > 0);
    }
}
