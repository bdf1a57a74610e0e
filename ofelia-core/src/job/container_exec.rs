//! Container-exec job backend: runs a command inside an already-running
//! container

use std::sync::Arc;

use async_trait::async_trait;

use crate::docker::DockerProvider;
use crate::error::OfeliaError;
use crate::execution::{Context, Execution};
use crate::middleware::Middleware;
use crate::reliability::RetryConfig;

use super::bare::BareJob;
use super::Job;

/// Execs `command` inside `container_name`, which must already be running.
pub struct ContainerExecJob {
    bare: BareJob,
    provider: Arc<dyn DockerProvider>,
    container_name: String,
    command: Vec<String>,
}

impl ContainerExecJob {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        container_name: impl Into<String>,
        command: Vec<String>,
        provider: Arc<dyn DockerProvider>,
    ) -> Self {
        let container_name = container_name.into();
        let description = format!("exec in {container_name}: {}", command.join(" "));
        Self {
            bare: BareJob::new(name, schedule, description),
            provider,
            container_name,
            command,
        }
    }

    pub fn bare(&self) -> &BareJob {
        &self.bare
    }
}

#[async_trait]
impl Job for ContainerExecJob {
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
        let result = self.provider.exec(&self.container_name, &self.command).await?;

        ctx.execution_mut().write_stdout(&result.stdout);
        ctx.execution_mut().write_stderr(&result.stderr);

        if result.exit_code == 0 {
            Ok(())
        } else {
            Err(OfeliaError::NonZeroExit {
                job: self.bare.name().to_string(),
                code: result.exit_code,
            })
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
