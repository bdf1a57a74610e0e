//! Container-run job backend: a one-shot container per execution

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::container_monitor::ContainerMonitor;
use crate::docker::{ContainerRunOptions, DockerProvider};
use crate::error::OfeliaError;
use crate::execution::{Context, Execution};
use crate::middleware::Middleware;
use crate::reliability::RetryConfig;

use super::bare::BareJob;
use super::Job;

/// Creates, starts, and waits for a fresh container on every execution.
pub struct ContainerRunJob {
    bare: BareJob,
    provider: Arc<dyn DockerProvider>,
    monitor: ContainerMonitor,
    image: String,
    command: Vec<String>,
    env: Vec<String>,
    auto_remove: bool,
    max_runtime: Option<Duration>,
}

impl ContainerRunJob {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        image: impl Into<String>,
        command: Vec<String>,
        provider: Arc<dyn DockerProvider>,
        monitor: ContainerMonitor,
    ) -> Self {
        let image = image.into();
        let description = format!("{image} {}", command.join(" "));
        Self {
            bare: BareJob::new(name, schedule, description),
            provider,
            monitor,
            image,
            command,
            env: Vec::new(),
            auto_remove: true,
            max_runtime: None,
        }
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.max_runtime = Some(max_runtime);
        self
    }

    pub fn bare(&self) -> &BareJob {
        &self.bare
    }
}

#[async_trait]
impl Job for ContainerRunJob {
    fn name(&self) -> &str {
        self.bare.name()
    }

    fn schedule(&self) -> &str {
        self.bare.schedule()
    }

    fn command(&self) -> &str {
        self.bare.command()
    }

    async fn run(&self, ctx: &mut Context) -> Result<(), OfeliaError> {
        self.provider.ensure_image(&self.image).await?;

        let mut labels = HashMap::new();
        labels.insert("ofelia.job.name".to_string(), self.bare.name().to_string());

        let options = ContainerRunOptions {
            image: self.image.clone(),
            command: self.command.clone(),
            env: self.env.clone(),
            labels,
            auto_remove: self.auto_remove,
        };

        let container_id = self.provider.run_container(&options).await?;
        let state = self.monitor.wait(&container_id, self.max_runtime).await;

        if !self.auto_remove {
            let _ = self.provider.remove_container(&container_id).await;
        }

        let state = state.map_err(|err| {
            ctx.execution_mut()
                .write_stderr(format!("container {container_id} wait failed: {err}").as_bytes());
            err
        })?;

        match state.exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(OfeliaError::NonZeroExit {
                job: self.bare.name().to_string(),
                code,
            }),
            None => Err(OfeliaError::Unexpected(format!(
                "container {container_id} has no exit code"
            ))),
        }
    }

    fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        self.bare.middlewares()
    }

    fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.bare.use_middleware(middleware);
    }

    fn notify_start(&self) {
        self.bare.notify_start();
    }

    fn notify_stop(&self) {
        self.bare.notify_stop();
    }

    fn running(&self) -> i32 {
        self.bare.running()
    }

    fn cron_job_id(&self) -> Option<u64> {
        self.bare.cron_job_id()
    }

    fn set_cron_job_id(&self, id: u64) {
        self.bare.set_cron_job_id(id);
    }

    fn history(&self) -> Vec<Arc<Execution>> {
        self.bare.history()
    }

    fn record_execution(&self, execution: Execution) {
        self.bare.record_execution(execution);
    }

    fn should_run_on_startup(&self) -> bool {
        self.bare.should_run_on_startup()
    }

    fn retry_config(&self) -> Option<RetryConfig> {
        self.bare.retry_config()
    }

    fn allow_parallel(&self) -> bool {
        self.bare.allow_parallel()
    }

    fn depends_on(&self) -> Vec<String> {
        self.bare.depends_on()
    }

    fn on_success(&self) -> Vec<String> {
        self.bare.on_success()
    }

    fn on_failure(&self) -> Vec<String> {
        self.bare.on_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::docker::{ContainerEvent, ContainerState, ExecResult, ServiceSpec};
    use crate::metrics::noop;
    use futures::stream::{self, BoxStream, StreamExt};

    struct FakeProvider {
        exit_code: i64,
    }

    #[async_trait]
    impl DockerProvider for FakeProvider {
        async fn ensure_image(&self, _image: &str) -> Result<(), OfeliaError> {
            Ok(())
        }
        async fn run_container(&self, _options: &ContainerRunOptions) -> Result<String, OfeliaError> {
            Ok("container-1".into())
        }
        async fn inspect_container(&self, _id: &str) -> Result<ContainerState, OfeliaError> {
            Ok(ContainerState {
                running: false,
                exit_code: Some(self.exit_code),
                status: "exited".into(),
            })
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
    async fn zero_exit_succeeds() {
        let provider: Arc<dyn DockerProvider> = Arc::new(FakeProvider { exit_code: 0 });
        let monitor = ContainerMonitor::new(provider.clone(), true, noop());
        let job: Arc<dyn Job> = Arc::new(ContainerRunJob::new(
            "run",
            "@manual",
            "alpine",
            vec!["true".into()],
            provider,
            monitor,
        ));
        let pool = BufferPool::new();
        let mut ctx = Context::new(job, Execution::new(&pool), Vec::new());
        ctx.next().await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_error() {
        let provider: Arc<dyn DockerProvider> = Arc::new(FakeProvider { exit_code: 7 });
        let monitor = ContainerMonitor::new(provider.clone(), true, noop());
        let job: Arc<dyn Job> = Arc::new(ContainerRunJob::new(
            "run",
            "@manual",
            "alpine",
            vec!["false".into()],
            provider,
            monitor,
        ));
        let pool = BufferPool::new();
        let mut ctx = Context::new(job, Execution::new(&pool), Vec::new());
        let err = ctx.next().await.unwrap_err();
        assert!(matches!(err, OfeliaError::NonZeroExit { code: 7, .. }));
    }
}
