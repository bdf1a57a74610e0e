//! Container termination waiting
//!
//! Prefers the daemon's event stream (cheap, immediate) and falls back to
//! polling `inspect_container` on a fixed tick when events are disabled or
//! the stream itself fails to establish. Either path is bounded by an
//! optional deadline derived from a job's `MaxRuntime`.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::{interval, timeout, Instant};

use crate::docker::{ContainerState, DockerProvider};
use crate::error::OfeliaError;
use crate::metrics::SharedMetrics;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

const TERMINAL_ACTIONS: &[&str] = &["die", "kill", "stop", "oom"];

/// Waits for a container to reach a terminal state.
pub struct ContainerMonitor {
    provider: std::sync::Arc<dyn DockerProvider>,
    use_events: bool,
    metrics: SharedMetrics,
}

impl ContainerMonitor {
    /// Build a monitor over `provider`. `use_events` mirrors
    /// `OFELIA_USE_DOCKER_EVENTS`: when false, event-driven waiting is
    /// skipped entirely and polling is used from the start.
    pub fn new(provider: std::sync::Arc<dyn DockerProvider>, use_events: bool, metrics: SharedMetrics) -> Self {
        Self {
            provider,
            use_events,
            metrics,
        }
    }

    /// Wait for `container_id` to stop, honoring `max_runtime` as a hard
    /// deadline. Returns `OfeliaError::MaxTimeRunning` if the deadline
    /// elapses first.
    pub async fn wait(
        &self,
        container_id: &str,
        max_runtime: Option<Duration>,
    ) -> Result<ContainerState, OfeliaError> {
        let wait_fut = self.wait_unbounded(container_id);

        match max_runtime {
            None => wait_fut.await,
            Some(limit) => timeout(limit, wait_fut)
                .await
                .map_err(|_| OfeliaError::MaxTimeRunning(container_id.to_string()))?,
        }
    }

    async fn wait_unbounded(&self, container_id: &str) -> Result<ContainerState, OfeliaError> {
        let state = self.provider.inspect_container(container_id).await?;
        if !state.running {
            return Ok(state);
        }

        let started = Instant::now();

        if self.use_events {
            match self.wait_via_events(container_id).await {
                Ok(state) => {
                    self.metrics
                        .record_container_wait("events", 1, false, started.elapsed());
                    return Ok(state);
                }
                Err(err) => {
                    tracing::warn!(container_id, error = %err, "falling back to polling after event stream failure");
                }
            }
        }

        let state = self.wait_via_polling(container_id).await?;
        self.metrics
            .record_container_wait("poll", 0, true, started.elapsed());
        Ok(state)
    }

    async fn wait_via_events(&self, container_id: &str) -> Result<ContainerState, OfeliaError> {
        let mut events = self.provider.subscribe_events(container_id).await?;

        while let Some(event) = events.next().await {
            let event = event?;
            if TERMINAL_ACTIONS.contains(&event.action.as_str()) {
                return self.provider.inspect_container(container_id).await;
            }
        }

        Err(OfeliaError::Unexpected(format!(
            "event stream for container {container_id} ended without a terminal event"
        )))
    }

    async fn wait_via_polling(&self, container_id: &str) -> Result<ContainerState, OfeliaError> {
        let mut ticker = interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            let state = self.provider.inspect_container(container_id).await?;
            if !state.running {
                return Ok(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{ContainerEvent, ContainerRunOptions, ExecResult, ServiceSpec};
    use crate::metrics::noop;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FakeProvider {
        states: Mutex<Vec<ContainerState>>,
    }

    #[async_trait]
    impl DockerProvider for FakeProvider {
        async fn ensure_image(&self, _image: &str) -> Result<(), OfeliaError> {
            Ok(())
        }
        async fn run_container(&self, _options: &ContainerRunOptions) -> Result<String, OfeliaError> {
            Ok("container".into())
        }
        async fn inspect_container(&self, _id: &str) -> Result<ContainerState, OfeliaError> {
            let mut states = self.states.lock();
            if states.len() > 1 {
                Ok(states.remove(0))
            } else {
                Ok(states[0].clone())
            }
        }
        async fn remove_container(&self, _id: &str) -> Result<(), OfeliaError> {
            Ok(())
        }
        async fn exec(&self, _container_id: &str, _command: &[String]) -> Result<ExecResult, OfeliaError> {
            unimplemented!()
        }
        async fn subscribe_events(
            &self,
            _container_id: &str,
        ) -> Result<BoxStream<'static, Result<ContainerEvent, OfeliaError>>, OfeliaError> {
            Ok(stream::empty().boxed())
        }
        async fn deploy_service(&self, _spec: &ServiceSpec) -> Result<String, OfeliaError> {
            unimplemented!()
        }
        async fn wait_for_service_tasks(&self, _service_id: &str) -> Result<ContainerState, OfeliaError> {
            unimplemented!()
        }
        async fn remove_service(&self, _service_id: &str) -> Result<(), OfeliaError> {
            Ok(())
        }
        async fn ping(&self) -> Result<(), OfeliaError> {
            Ok(())
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn returns_immediately_if_already_stopped() {
        let provider = Arc::new(FakeProvider {
            states: Mutex::new(vec![ContainerState {
                running: false,
                exit_code: Some(0),
                status: "exited".into(),
            }]),
        });
        let monitor = ContainerMonitor::new(provider, true, noop());
        let state = monitor.wait("c1", None).await.unwrap();
        assert!(!state.running);
    }

    #[tokio::test]
    async fn falls_back_to_polling_when_events_unavailable() {
        let provider = Arc::new(FakeProvider {
            states: Mutex::new(vec![
                ContainerState {
                    running: true,
                    exit_code: None,
                    status: "running".into(),
                },
                ContainerState {
                    running: false,
                    exit_code: Some(0),
                    status: "exited".into(),
                },
            ]),
        });
        let monitor = ContainerMonitor::new(provider, true, noop());
        let state = monitor.wait("c1", Some(Duration::from_secs(5))).await.unwrap();
        assert!(!state.running);
    }

    #[tokio::test]
    async fn max_runtime_deadline_surfaces_max_time_running() {
        let provider = Arc::new(FakeProvider {
            states: Mutex::new(vec![ContainerState {
                running: true,
                exit_code: None,
                status: "running".into(),
            }]),
        });
        let monitor = ContainerMonitor::new(provider, false, noop());
        let err = monitor.wait("c1", Some(Duration::from_millis(50))).await.unwrap_err();
        assert!(matches!(err, OfeliaError::MaxTimeRunning(_)));
    }
}
