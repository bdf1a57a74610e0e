//! Swarm-service job backend: deploys a one-shot service and waits for its
//! tasks to finish

use std::sync::Arc;

use async_trait::async_trait;

use crate::docker::{DockerProvider, ServiceSpec};
use crate::error::OfeliaError;
use crate::execution::{Context, Execution};
use crate::middleware::Middleware;
use crate::reliability::RetryConfig;

use super::bare::BareJob;
use super::Job;

/// Deploys a swarm service per execution, waits for its tasks to finish,
/// then removes it.
pub struct SwarmServiceJob {
    bare: BareJob,
    provider: Arc<dyn DockerProvider>,
    image: String,
    command: Vec<String>,
    env: Vec<String>,
}

impl SwarmServiceJob {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        image: impl Into<String>,
        command: Vec<String>,
        provider: Arc<dyn DockerProvider>,
    ) -> Self {
        let image = image.into();
        let description = format!("service {image} {}", command.join(" "));
        Self {
            bare: BareJob::new(name, schedule, description),
            provider,
            image,
            command,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn bare(&self) -> &BareJob {
        &self.bare
    }
}

#[async_trait]
impl Job for SwarmServiceJob {
    fn name(&self) -> &str {
        self.bare.name()
    }

    fn schedule(&self) -> &str {
        self.bare.schedule()
    }

    fn command(&self) -> &str {
        self.bare.command()
    }

    async fn run(&self, _ctx: &mut Context) -> Result<(), OfeliaError> {
        let spec = ServiceSpec {
            name: format!("{}-{}", self.bare.name(), crate::execution::random_execution_id()),
            image: self.image.clone(),
            command: self.command.clone(),
            env: self.env.clone(),
        };

        let service_id = self.provider.deploy_service(&spec).await?;
        let result = self.provider.wait_for_service_tasks(&service_id).await;
        let _ = self.provider.remove_service(&service_id).await;

        let state = result?;
        match state.exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(OfeliaError::NonZeroExit {
                job: self.bare.name().to_string(),
                code,
            }),
            None => Err(OfeliaError::Unexpected(format!(
                "service {service_id} has no exit code"
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
