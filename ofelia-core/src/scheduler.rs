//! Owns the job registry, the cron engine, concurrency control, workflow
//! orchestration, and the start/stop lifecycle.
//!
//! One background task per actively-scheduled job computes its next fire
//! time and sleeps until then through the injected [`Clock`]; triggered-
//! only jobs (`@triggered`/`@manual`/`@none`) never get such a task and
//! fire only through [`Scheduler::run_job`] or a workflow cascade.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule as CronSchedule;
use parking_lot::RwLock;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer_pool::BufferPool;
use crate::clock::{Clock, SystemClock};
use crate::error::OfeliaError;
use crate::execution::{Context, Execution};
use crate::job::{is_triggered_only, Job};
use crate::metrics::{noop, SharedMetrics};
use crate::middleware::{dedupe_by_kind, Middleware};
use crate::reliability::{RetryConfig, RetryExecutor};
use crate::workflow::{WorkflowOrchestrator, WorkflowScheduler};

/// Translate a schedule string into the next fire time after `after`.
///
/// Accepts standard 6-field cron expressions, the aliases `@hourly`,
/// `@daily`/`@midnight`, `@weekly`, `@monthly`, `@yearly`/`@annually`, and
/// `@every <duration>` (parsed with `humantime`).
fn next_fire_after(schedule: &str, after: chrono::DateTime<Utc>) -> Result<chrono::DateTime<Utc>, OfeliaError> {
    if let Some(duration_str) = schedule.strip_prefix("@every ") {
        let duration = humantime::parse_duration(duration_str.trim())
            .map_err(|e| OfeliaError::CronEngine(format!("invalid @every duration: {e}")))?;
        let duration = chrono::Duration::from_std(duration)
            .map_err(|e| OfeliaError::CronEngine(format!("duration out of range: {e}")))?;
        return Ok(after + duration);
    }

    let expr = match schedule {
        "@hourly" => "0 0 * * * *",
        "@daily" | "@midnight" => "0 0 0 * * *",
        "@weekly" => "0 0 0 * * SUN",
        "@monthly" => "0 0 0 1 * *",
        "@yearly" | "@annually" => "0 0 0 1 1 *",
        other => other,
    };

    let parsed = CronSchedule::from_str(expr).map_err(|e| OfeliaError::CronEngine(format!("{e}")))?;
    parsed
        .after(&after)
        .next()
        .ok_or_else(|| OfeliaError::CronEngine(format!("schedule {schedule} yields no future occurrence")))
}

/// Tunables for [`Scheduler`]; mirrors the environment knobs
/// (`OFELIA_WORKFLOW_CLEANUP_INTERVAL`, `OFELIA_WORKFLOW_RETENTION`).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    pub default_retry: RetryConfig,
    pub workflow_cleanup_interval: Duration,
    pub workflow_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            default_retry: RetryConfig::no_retry(),
            workflow_cleanup_interval: Duration::from_secs(60 * 60),
            workflow_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

struct Entry {
    job: Arc<dyn Job>,
    tags: Vec<String>,
}

/// Owns the job registry, admission control, and lifecycle for a single
/// scheduling process.
pub struct Scheduler {
    config: SchedulerConfig,
    active: RwLock<HashMap<String, Entry>>,
    disabled: RwLock<HashMap<String, Entry>>,
    removed: RwLock<Vec<Arc<dyn Job>>>,
    scheduler_middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    semaphore: RwLock<Arc<Semaphore>>,
    workflow: Arc<WorkflowOrchestrator>,
    retry_executor: RetryExecutor,
    buffer_pool: Arc<BufferPool>,
    clock: Arc<dyn Clock>,
    metrics: SharedMetrics,
    running: AtomicBool,
    in_flight: AtomicUsize,
    drain_notify: Notify,
    cancel: CancellationToken,
    tasks: RwLock<Vec<JoinHandle<()>>>,
    self_weak: RwLock<std::sync::Weak<Scheduler>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::with_clock_and_metrics(config, clock, noop())
    }

    /// Build a scheduler with an injected clock and metrics sink.
    pub fn with_clock_and_metrics(config: SchedulerConfig, clock: Arc<dyn Clock>, metrics: SharedMetrics) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let scheduler = Arc::new(Self {
            config,
            active: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashMap::new()),
            removed: RwLock::new(Vec::new()),
            scheduler_middlewares: RwLock::new(Vec::new()),
            semaphore: RwLock::new(semaphore),
            workflow: Arc::new(WorkflowOrchestrator::with_clock(clock.clone())),
            retry_executor: RetryExecutor::with_clock_and_metrics(clock.clone(), metrics.clone()),
            buffer_pool: Arc::new(BufferPool::new()),
            clock,
            metrics,
            running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drain_notify: Notify::new(),
            cancel: CancellationToken::new(),
            tasks: RwLock::new(Vec::new()),
            self_weak: RwLock::new(std::sync::Weak::new()),
        });
        *scheduler.self_weak.write() = Arc::downgrade(&scheduler);
        scheduler
    }

    /// Install a scheduler-scope middleware, applied to every job before
    /// its own job-scope middlewares (job-scope wins on a `kind()` tie).
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.scheduler_middlewares.write().push(middleware);
    }

    /// Register `job` under `tags`. Triggered-only schedules
    /// (`@triggered`/`@manual`/`@none`) are stored without starting a
    /// cron task.
    pub fn add_job(self: &Arc<Self>, job: Arc<dyn Job>, tags: Vec<String>) -> Result<(), OfeliaError> {
        if job.schedule().trim().is_empty() {
            return Err(OfeliaError::EmptySchedule);
        }

        let name = job.name().to_string();
        if self.active.read().contains_key(&name) || self.disabled.read().contains_key(&name) {
            return Err(OfeliaError::JobAlreadyExists(name));
        }

        for middleware in self.scheduler_middlewares.read().iter() {
            job.use_middleware(middleware.clone());
        }

        self.active.write().insert(name.clone(), Entry { job: job.clone(), tags });

        if !is_triggered_only(job.schedule()) && self.running.load(Ordering::SeqCst) {
            self.spawn_cron_task(name, job);
        }

        Ok(())
    }

    fn spawn_cron_task(self: &Arc<Self>, name: String, job: Arc<dyn Job>) {
        let scheduler = self.clone();
        let cancel = self.cancel.clone();
        let schedule = job.schedule().to_string();

        let handle = tokio::spawn(async move {
            loop {
                let now = scheduler.clock.now();
                let next = match next_fire_after(&schedule, now) {
                    Ok(next) => next,
                    Err(err) => {
                        error!(job = %name, error = %err, "cannot compute next fire time");
                        return;
                    }
                };
                let sleep_for = (next - now).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = scheduler.clock.sleep(sleep_for) => {}
                }

                if cancel.is_cancelled() {
                    return;
                }

                if let Err(err) = scheduler.dispatch(&name, None).await {
                    debug!(job = %name, error = %err, "scheduled firing did not run");
                }
            }
        });

        self.tasks.write().push(handle);
    }

    /// Remove a single job by reference, moving it to the removed list.
    pub fn remove_job(&self, job: &Arc<dyn Job>) {
        let name = job.name().to_string();
        self.active.write().remove(&name);
        self.disabled.write().remove(&name);
        self.removed.write().push(job.clone());
    }

    /// Remove every active or disabled job carrying `tag`.
    pub fn remove_jobs_by_tag(&self, tag: &str) {
        let removed: Vec<Arc<dyn Job>> = {
            let mut active = self.active.write();
            let matching: Vec<String> = active
                .iter()
                .filter(|(_, e)| e.tags.iter().any(|t| t == tag))
                .map(|(name, _)| name.clone())
                .collect();
            matching.into_iter().filter_map(|name| active.remove(&name)).map(|e| e.job).collect()
        };
        self.removed.write().extend(removed);
    }

    /// Move `name` from active to disabled.
    pub fn disable_job(&self, name: &str) -> Result<(), OfeliaError> {
        let entry = self
            .active
            .write()
            .remove(name)
            .ok_or_else(|| OfeliaError::JobNotFound(name.to_string()))?;
        self.disabled.write().insert(name.to_string(), entry);
        Ok(())
    }

    /// Move `name` from disabled back to active, re-spawning its cron
    /// task if the scheduler is running.
    pub fn enable_job(self: &Arc<Self>, name: &str) -> Result<(), OfeliaError> {
        let entry = self
            .disabled
            .write()
            .remove(name)
            .ok_or_else(|| OfeliaError::JobNotFound(name.to_string()))?;

        let job = entry.job.clone();
        self.active.write().insert(name.to_string(), entry);

        if !is_triggered_only(job.schedule()) && self.running.load(Ordering::SeqCst) {
            self.spawn_cron_task(name.to_string(), job);
        }
        Ok(())
    }

    /// Manually trigger `name`. Fails with `JobNotFound` if unregistered,
    /// `DependencyNotMet` if workflow readiness refuses it, or a skip
    /// sentinel if the concurrency ceiling is full.
    pub async fn run_job(self: &Arc<Self>, name: &str) -> Result<(), OfeliaError> {
        self.dispatch(name, None).await
    }

    async fn dispatch(self: &Arc<Self>, name: &str, exec_id: Option<String>) -> Result<(), OfeliaError> {
        let job = self
            .active
            .read()
            .get(name)
            .map(|e| e.job.clone())
            .ok_or_else(|| OfeliaError::JobNotFound(name.to_string()))?;

        let exec_id = exec_id.unwrap_or_else(|| format!("sched-{}-{}", self.clock.now().timestamp(), name));

        if !self.workflow.can_execute(name, &exec_id, job.allow_parallel()) {
            warn!(job = name, "dependency not satisfied, skipping firing");
            return Err(OfeliaError::DependencyNotMet {
                job: name.to_string(),
                parent: "unresolved".to_string(),
            });
        }

        let semaphore = self.semaphore.read().clone();
        let permit = match semaphore.try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job = name, "max concurrent jobs reached");
                return Err(OfeliaError::Skipped(crate::error::SkippedExecution(
                    "max concurrent jobs reached".to_string(),
                )));
            }
        };

        if !self.running.load(Ordering::SeqCst) {
            return Err(OfeliaError::ShutdownInProgress);
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.workflow.job_started(name, &exec_id);

        let result = self.run_attempt(job.clone()).await;

        let success = result.is_ok();
        self.workflow.job_completed(name, &exec_id, success, self.as_ref());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.drain_notify.notify_waiters();
        drop(permit);

        result
    }

    async fn run_attempt(&self, job: Arc<dyn Job>) -> Result<(), OfeliaError> {
        let retry_config = job.retry_config().unwrap_or_else(|| self.config.default_retry.clone());
        let job_name = job.name().to_string();

        let outcome = self
            .retry_executor
            .execute(&job_name, &retry_config, || self.dispatch_one_execution(job.clone()))
            .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(exhausted) => Err(exhausted.last_error),
        }
    }

    async fn dispatch_one_execution(&self, job: Arc<dyn Job>) -> Result<(), OfeliaError> {
        let execution = Execution::new(&self.buffer_pool);
        let middlewares = dedupe_by_kind(
            self.scheduler_middlewares
                .read()
                .iter()
                .cloned()
                .chain(job.middlewares())
                .collect(),
        );

        let mut ctx = Context::new(job.clone(), execution, middlewares);
        job.notify_start();
        ctx.execution_mut().start(self.clock.as_ref());

        let result = ctx.next().await;

        job.notify_stop();
        ctx.execution_mut().stop(self.clock.as_ref(), result.as_ref().err());
        ctx.execution_mut().cleanup(&self.buffer_pool);
        job.record_execution(ctx.into_execution());

        result
    }

    /// Build the workflow graph, start cron tasks for every active
    /// schedulable job, fire `run-on-startup` triggered-only jobs, and
    /// start the workflow cleanup ticker.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let jobs: HashMap<String, Arc<dyn Job>> = self
            .active
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.job.clone()))
            .collect();

        if let Err(err) = self.workflow.build_dependency_graph(&jobs) {
            error!(error = %err, "failed to build workflow dependency graph; standalone jobs still run");
        }

        for (name, job) in &jobs {
            if is_triggered_only(job.schedule()) {
                if job.should_run_on_startup() {
                    let scheduler = self.clone();
                    let name = name.clone();
                    tokio::spawn(async move {
                        if let Err(err) = scheduler.dispatch(&name, None).await {
                            debug!(job = %name, error = %err, "run-on-startup firing did not run");
                        }
                    });
                }
            } else {
                self.spawn_cron_task(name.clone(), job.clone());
            }
        }

        self.spawn_cleanup_ticker();
        info!(jobs = jobs.len(), "scheduler started");
    }

    fn spawn_cleanup_ticker(self: &Arc<Self>) {
        let workflow = self.workflow.clone();
        let cancel = self.cancel.clone();
        let interval = self.config.workflow_cleanup_interval;
        let retention = self.config.workflow_retention;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        workflow.cleanup_old_executions(retention);
                    }
                }
            }
        });
        self.tasks.write().push(handle);
    }

    /// Stop accepting triggers and wait indefinitely for in-flight
    /// executions to drain.
    pub async fn stop_and_wait(self: &Arc<Self>) {
        self.stop_accepting();
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.drain_notify.notified().await;
        }
    }

    /// Stop accepting triggers and wait up to `timeout` for in-flight
    /// executions to drain, returning `SchedulerTimeout` if it elapses
    /// first.
    pub async fn stop_with_timeout(self: &Arc<Self>, timeout: Duration) -> Result<(), OfeliaError> {
        self.stop_accepting();
        let deadline = Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(OfeliaError::SchedulerTimeout(timeout));
            }
            let _ = tokio::time::timeout(remaining, self.drain_notify.notified()).await;
        }
    }

    /// Stop accepting triggers without waiting for drains.
    pub fn stop(self: &Arc<Self>) {
        self.stop_accepting();
    }

    fn stop_accepting(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        for handle in self.tasks.write().drain(..) {
            handle.abort();
        }
    }

    /// Resize the concurrency ceiling, clamped to at least 1.
    pub fn set_max_concurrent_jobs(&self, n: usize) {
        *self.semaphore.write() = Arc::new(Semaphore::new(n.max(1)));
    }

    pub fn get_job(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.active.read().get(name).map(|e| e.job.clone())
    }

    pub fn get_disabled_job(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.disabled.read().get(name).map(|e| e.job.clone())
    }

    pub fn get_removed_jobs(&self) -> Vec<Arc<dyn Job>> {
        self.removed.read().clone()
    }

    pub fn get_disabled_jobs(&self) -> Vec<Arc<dyn Job>> {
        self.disabled.read().values().map(|e| e.job.clone()).collect()
    }

    pub fn get_jobs_by_tag(&self, tag: &str) -> Vec<Arc<dyn Job>> {
        self.active
            .read()
            .values()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .map(|e| e.job.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<Arc<dyn Job>> {
        self.active.read().values().map(|e| e.job.clone()).collect()
    }
}

impl WorkflowScheduler for Scheduler {
    fn schedule_manual_run(&self, job_name: &str, exec_id: &str) {
        if !self.active.read().contains_key(job_name) {
            return;
        }
        let Some(scheduler) = self.self_weak.read().upgrade() else {
            return;
        };
        let name = job_name.to_string();
        let exec_id = exec_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = scheduler.dispatch(&name, Some(exec_id)).await {
                debug!(job = %name, error = %err, "cascaded firing did not run");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Execution as Exec;
    use crate::job::BareJob;
    use crate::middleware::Middleware as MiddlewareTrait;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration as StdDuration;

    struct SleepJob {
        bare: BareJob,
        sleep_for: StdDuration,
    }

    #[async_trait::async_trait]
    impl Job for SleepJob {
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
            tokio::time::sleep(self.sleep_for).await;
            Ok(())
        }
        fn middlewares(&self) -> Vec<Arc<dyn MiddlewareTrait>> {
            self.bare.middlewares()
        }
        fn use_middleware(&self, m: Arc<dyn MiddlewareTrait>) {
            self.bare.use_middleware(m)
        }
        fn notify_start(&self) {
            self.bare.notify_start()
        }
        fn notify_stop(&self) {
            self.bare.notify_stop()
        }
        fn running(&self) -> i32 {
            self.bare.running()
        }
        fn cron_job_id(&self) -> Option<u64> {
            self.bare.cron_job_id()
        }
        fn set_cron_job_id(&self, id: u64) {
            self.bare.set_cron_job_id(id)
        }
        fn history(&self) -> Vec<Arc<Exec>> {
            self.bare.history()
        }
        fn record_execution(&self, e: Exec) {
            self.bare.record_execution(e)
        }
        fn should_run_on_startup(&self) -> bool {
            false
        }
    }

    fn sleep_job(name: &str, sleep_for: StdDuration) -> Arc<dyn Job> {
        Arc::new(SleepJob {
            bare: BareJob::new(name, "@manual", "sleep"),
            sleep_for,
        })
    }

    #[test]
    fn next_fire_after_handles_every_alias() {
        let now = Utc::now();
        let next = next_fire_after("@every 1m", now).unwrap();
        assert_eq!((next - now).num_seconds(), 60);
    }

    #[test]
    fn next_fire_after_rejects_garbage_schedule() {
        assert!(next_fire_after("not a schedule", Utc::now()).is_err());
    }

    #[tokio::test]
    async fn concurrency_cap_admits_exactly_max_concurrent_jobs() {
        let scheduler = Scheduler::new(SchedulerConfig {
            max_concurrent_jobs: 3,
            ..Default::default()
        });

        for i in 0..10 {
            scheduler
                .add_job(sleep_job(&format!("job-{i}"), StdDuration::from_millis(100)), vec![])
                .unwrap();
        }
        scheduler.start();

        let started = Arc::new(StdAtomicUsize::new(0));
        let skipped = Arc::new(StdAtomicUsize::new(0));
        let mut handles = Vec::new();

        for i in 0..10 {
            let scheduler = scheduler.clone();
            let started = started.clone();
            let skipped = skipped.clone();
            handles.push(tokio::spawn(async move {
                match scheduler.run_job(&format!("job-{i}")).await {
                    Ok(()) => {
                        started.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(_) => {
                        skipped.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(skipped.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn stop_with_timeout_succeeds_when_execution_finishes_in_time() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler
            .add_job(sleep_job("short", StdDuration::from_millis(50)), vec![])
            .unwrap();
        scheduler.start();

        let running = scheduler.clone();
        tokio::spawn(async move {
            let _ = running.run_job("short").await;
        });

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        let result = scheduler.stop_with_timeout(StdDuration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stop_with_timeout_times_out_on_a_slow_execution() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler
            .add_job(sleep_job("slow", StdDuration::from_millis(500)), vec![])
            .unwrap();
        scheduler.start();

        let running = scheduler.clone();
        tokio::spawn(async move {
            let _ = running.run_job("slow").await;
        });

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        let result = scheduler.stop_with_timeout(StdDuration::from_millis(50)).await;
        assert!(matches!(result, Err(OfeliaError::SchedulerTimeout(_))));
    }

    #[tokio::test]
    async fn disable_then_enable_restores_job_to_active_set() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler
            .add_job(sleep_job("toggle", StdDuration::from_millis(1)), vec![])
            .unwrap();

        scheduler.disable_job("toggle").unwrap();
        assert!(scheduler.get_job("toggle").is_none());
        assert!(scheduler.get_disabled_job("toggle").is_some());

        scheduler.enable_job("toggle").unwrap();
        assert!(scheduler.get_job("toggle").is_some());
        assert!(scheduler.get_disabled_job("toggle").is_none());
    }
}
