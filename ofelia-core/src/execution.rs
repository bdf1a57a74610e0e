//! Per-run state and the middleware chain controller
//!
//! [`Execution`] is a single attempt of a [`crate::job::Job`]; [`Context`]
//! is the per-attempt dispatch state threaded through the middleware chain
//! down to `Job::run`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::clock::Clock;
use crate::error::OfeliaError;
use crate::job::Job;
use crate::middleware::Middleware;

/// A single attempt of a job.
///
/// Owned exclusively by its wrapper task while running; once stopped it is
/// handed to the job's bounded history by reference.
pub struct Execution {
    /// Random 48-bit hex identifier, unique enough for log correlation.
    pub id: String,
    start_time: Option<DateTime<Utc>>,
    duration: Duration,
    is_running: AtomicBool,
    failed: bool,
    skipped: bool,
    error: Option<String>,
    stdout_buf: Option<PooledBuffer>,
    stderr_buf: Option<PooledBuffer>,
    captured_stdout: String,
    captured_stderr: String,
}

/// Mint a random 48-bit hex identifier, e.g. `"3f2a1c9b8d4e"`.
pub fn random_execution_id() -> String {
    let bits: u64 = rand::thread_rng().gen_range(0..(1u64 << 48));
    format!("{bits:012x}")
}

impl Execution {
    /// Allocate a new execution: a fresh id and two pooled buffers
    /// (stdout, stderr) borrowed from `pool`.
    pub fn new(pool: &BufferPool) -> Self {
        Self {
            id: random_execution_id(),
            start_time: None,
            duration: Duration::ZERO,
            is_running: AtomicBool::new(false),
            failed: false,
            skipped: false,
            error: None,
            stdout_buf: Some(pool.get()),
            stderr_buf: Some(pool.get()),
            captured_stdout: String::new(),
            captured_stderr: String::new(),
        }
    }

    /// Mark the execution running and record its start time.
    pub fn start(&mut self, clock: &dyn Clock) {
        self.start_time = Some(clock.now());
        self.is_running.store(true, Ordering::SeqCst);
    }

    /// Whether the execution is currently running. Transitions true→false
    /// exactly once, at [`Execution::stop`].
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Finalize timing and outcome flags. `duration` is always at least
    /// 1ns, even if `start` and `stop` land in the same clock tick.
    /// `err` being [`OfeliaError::Skipped`] marks the run skipped, not
    /// failed; any other `Some` error marks it failed.
    pub fn stop(&mut self, clock: &dyn Clock, err: Option<&OfeliaError>) {
        let start = self.start_time.unwrap_or_else(|| clock.now());
        let elapsed = (clock.now() - start).to_std().unwrap_or(Duration::ZERO);
        self.duration = elapsed.max(Duration::from_nanos(1));
        self.is_running.store(false, Ordering::SeqCst);

        match err {
            None => {}
            Some(OfeliaError::Skipped(skipped)) => {
                self.skipped = true;
                self.error = Some(skipped.to_string());
            }
            Some(other) => {
                self.failed = true;
                self.error = Some(other.to_string());
            }
        }
    }

    /// Copy buffer contents into captured strings, release the buffers
    /// back to `pool`, and null out the buffer references. Calling this a
    /// second time is a no-op.
    pub fn cleanup(&mut self, pool: &BufferPool) {
        if let Some(buf) = self.stdout_buf.take() {
            self.captured_stdout = buf.contents_string();
            pool.put(buf);
        }
        if let Some(buf) = self.stderr_buf.take() {
            self.captured_stderr = buf.contents_string();
            pool.put(buf);
        }
    }

    /// Live buffer contents before [`Execution::cleanup`], captured string
    /// after.
    pub fn stdout(&self) -> String {
        match &self.stdout_buf {
            Some(buf) => buf.contents_string(),
            None => self.captured_stdout.clone(),
        }
    }

    /// Live buffer contents before [`Execution::cleanup`], captured string
    /// after.
    pub fn stderr(&self) -> String {
        match &self.stderr_buf {
            Some(buf) => buf.contents_string(),
            None => self.captured_stderr.clone(),
        }
    }

    /// Write bytes to the stdout buffer, if still live.
    pub fn write_stdout(&mut self, bytes: &[u8]) {
        if let Some(buf) = self.stdout_buf.as_mut() {
            buf.write(bytes);
        }
    }

    /// Write bytes to the stderr buffer, if still live.
    pub fn write_stderr(&mut self, bytes: &[u8]) {
        if let Some(buf) = self.stderr_buf.as_mut() {
            buf.write(bytes);
        }
    }

    /// Duration recorded at [`Execution::stop`]; zero before then.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the attempt failed (as opposed to succeeded or was skipped).
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Whether the attempt was deliberately skipped.
    pub fn skipped(&self) -> bool {
        self.skipped
    }

    /// Error message recorded at [`Execution::stop`], if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Start time recorded at [`Execution::start`].
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }
}

/// Per-execution dispatch state threaded through the middleware chain.
///
/// `next()` advances through `middlewares` in registration order; once
/// every middleware has run (or chosen not to short-circuit), it invokes
/// `Job::run` exactly once, latched by `executed`.
pub struct Context {
    job: Arc<dyn Job>,
    execution: Execution,
    middlewares: Vec<Arc<dyn Middleware>>,
    index: usize,
    executed: bool,
}

impl Context {
    /// Build a context for one firing of `job`, wrapping `execution`.
    pub fn new(job: Arc<dyn Job>, execution: Execution, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            job,
            execution,
            middlewares,
            index: 0,
            executed: false,
        }
    }

    /// The job this context is dispatching for.
    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    /// Shared read access to the in-flight execution.
    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    /// Mutable access to the in-flight execution (for writing output, or
    /// for the scheduler to call `start`/`stop`/`cleanup`).
    pub fn execution_mut(&mut self) -> &mut Execution {
        &mut self.execution
    }

    /// Consume the context, handing back its execution (used once the
    /// pipeline has finished and the scheduler wants to file it into
    /// history).
    pub fn into_execution(self) -> Execution {
        self.execution
    }

    /// Whether `Job::run` has already been invoked for this context.
    pub fn executed(&self) -> bool {
        self.executed
    }

    /// Advance the middleware chain by one step. Each middleware decides
    /// whether to continue when the execution is no longer running, via
    /// its `continue_on_stop` flag; once the chain is exhausted this calls
    /// `Job::run` exactly once.
    pub async fn next(&mut self) -> Result<(), OfeliaError> {
        if self.index >= self.middlewares.len() {
            if self.executed {
                return Ok(());
            }
            self.executed = true;
            let job = self.job.clone();
            return job.run(self).await;
        }

        let middleware = self.middlewares[self.index].clone();
        self.index += 1;

        if !self.execution.is_running() && !middleware.continue_on_stop() {
            return Ok(());
        }

        middleware.run(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn execution_id_is_twelve_hex_chars() {
        let id = random_execution_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn start_then_stop_transitions_running_exactly_once() {
        let pool = BufferPool::new();
        let mut exec = Execution::new(&pool);
        let clock = SystemClock;

        assert!(!exec.is_running());
        exec.start(&clock);
        assert!(exec.is_running());
        exec.stop(&clock, None);
        assert!(!exec.is_running());
    }

    #[test]
    fn stop_duration_is_never_zero() {
        let pool = BufferPool::new();
        let mut exec = Execution::new(&pool);
        let clock = SystemClock;
        exec.start(&clock);
        exec.stop(&clock, None);
        assert!(exec.duration() > Duration::ZERO);
    }

    #[test]
    fn stop_with_skipped_error_sets_skipped_not_failed() {
        let pool = BufferPool::new();
        let mut exec = Execution::new(&pool);
        let clock = SystemClock;
        exec.start(&clock);
        exec.stop(
            &clock,
            Some(&OfeliaError::Skipped(crate::error::SkippedExecution(
                "dependency not met".into(),
            ))),
        );
        assert!(exec.skipped());
        assert!(!exec.failed());
    }

    #[test]
    fn stop_with_other_error_sets_failed() {
        let pool = BufferPool::new();
        let mut exec = Execution::new(&pool);
        let clock = SystemClock;
        exec.start(&clock);
        exec.stop(&clock, Some(&OfeliaError::JobNotFound("x".into())));
        assert!(exec.failed());
        assert!(!exec.skipped());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let pool = BufferPool::new();
        let mut exec = Execution::new(&pool);
        exec.write_stdout(b"hello");
        exec.cleanup(&pool);
        assert_eq!(exec.stdout(), "hello");
        exec.cleanup(&pool);
        assert_eq!(exec.stdout(), "hello");
    }

    #[test]
    fn stdout_reflects_live_buffer_then_captured_string() {
        let pool = BufferPool::new();
        let mut exec = Execution::new(&pool);
        exec.write_stdout(b"partial");
        assert_eq!(exec.stdout(), "partial");
        exec.cleanup(&pool);
        assert_eq!(exec.stdout(), "partial");
    }
}
