//! Local-exec job backend: runs a shell command on the scheduler host

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::OfeliaError;
use crate::execution::{Context, Execution};
use crate::middleware::Middleware;
use crate::reliability::RetryConfig;

use super::bare::BareJob;
use super::Job;

/// Runs `command` through `/bin/sh -c` on the host the scheduler runs on.
pub struct LocalJob {
    bare: BareJob,
}

impl LocalJob {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            bare: BareJob::new(name, schedule, command),
        }
    }

    pub fn bare(&self) -> &BareJob {
        &self.bare
    }
}

#[async_trait]
impl Job for LocalJob {
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
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(self.bare.command())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OfeliaError::Unexpected(format!("spawn failed: {e}")))?;

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let (stdout_res, stderr_res, status) = tokio::join!(
            stdout.read_to_end(&mut stdout_buf),
            stderr.read_to_end(&mut stderr_buf),
            child.wait(),
        );
        stdout_res.map_err(|e| OfeliaError::Unexpected(e.to_string()))?;
        stderr_res.map_err(|e| OfeliaError::Unexpected(e.to_string()))?;
        let status = status.map_err(|e| OfeliaError::Unexpected(e.to_string()))?;

        ctx.execution_mut().write_stdout(&stdout_buf);
        ctx.execution_mut().write_stderr(&stderr_buf);

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(OfeliaError::NonZeroExit {
                job: self.bare.name().to_string(),
                code: code as i64,
            }),
            None => Err(OfeliaError::Unexpected(format!(
                "{} terminated by signal",
                self.bare.name()
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

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let job: Arc<dyn Job> = Arc::new(LocalJob::new("echo", "@manual", "echo -n hello"));
        let pool = BufferPool::new();
        let mut ctx = Context::new(job.clone(), Execution::new(&pool), Vec::new());
        ctx.next().await.unwrap();
        assert_eq!(ctx.execution().stdout(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_job_error() {
        let job: Arc<dyn Job> = Arc::new(LocalJob::new("fail", "@manual", "exit 3"));
        let pool = BufferPool::new();
        let mut ctx = Context::new(job.clone(), Execution::new(&pool), Vec::new());
        let err = ctx.next().await.unwrap_err();
        assert!(matches!(err, OfeliaError::NonZeroExit { code: 3, .. }));
    }
}
