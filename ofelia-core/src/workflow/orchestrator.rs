//! Readiness and completion tracking for dependency-driven job firings
//!
//! A [`WorkflowExecution`] groups every job firing caused by one root
//! trigger under a shared execution id; [`WorkflowOrchestrator`] tracks
//! which jobs in that group have completed, failed, or are still running,
//! and cascades `on-success`/`on-failure` targets back through a
//! scheduler callback once their prerequisites clear.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::error::OfeliaError;
use crate::job::Job;

use super::graph::{prerequisites_satisfied, DependencyGraph, EdgeCondition};

/// Default retention for workflow executions before periodic cleanup
/// evicts them, matching `OFELIA_WORKFLOW_RETENTION`'s default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Callback the orchestrator uses to cascade a dependent firing. The
/// scheduler implements this to avoid a circular module dependency
/// between `workflow` and `scheduler`.
pub trait WorkflowScheduler: Send + Sync {
    /// Trigger a manual run of `job_name`, correlated under `exec_id`.
    fn schedule_manual_run(&self, job_name: &str, exec_id: &str);
}

/// One in-flight grouping of correlated firings, keyed by the triggering
/// execution id. A job name appears in at most one of
/// `{running, completed, failed}` at a time.
#[derive(Debug, Clone)]
pub struct WorkflowExecution {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub completed: HashSet<String>,
    pub failed: HashSet<String>,
    pub running: HashSet<String>,
}

impl WorkflowExecution {
    fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            start_time: now,
            completed: HashSet::new(),
            failed: HashSet::new(),
            running: HashSet::new(),
        }
    }
}

/// Translates per-job dependency configuration into a DAG and exposes
/// readiness/completion hooks.
pub struct WorkflowOrchestrator {
    graph: RwLock<DependencyGraph>,
    executions: Mutex<HashMap<String, WorkflowExecution>>,
    clock: Arc<dyn Clock>,
}

impl WorkflowOrchestrator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            graph: RwLock::new(DependencyGraph::default()),
            executions: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// (Re)build the dependency graph from the current job registry.
    /// Called at scheduler `Start`; failures are logged and leave
    /// standalone jobs (with no dependency edges) still schedulable.
    pub fn build_dependency_graph(&self, jobs: &HashMap<String, Arc<dyn Job>>) -> Result<(), OfeliaError> {
        let graph = DependencyGraph::build(jobs)?;
        *self.graph.write() = graph;
        Ok(())
    }

    /// Whether `name` may fire under the workflow correlated by `exec_id`:
    /// true if it has no prerequisites, or every prerequisite is in the
    /// execution's completed set and none is in the failed set; also false
    /// if `name` is already running and `allow_parallel` is false.
    pub fn can_execute(&self, name: &str, exec_id: &str, allow_parallel: bool) -> bool {
        let graph = self.graph.read();
        let prerequisites = graph.prerequisites_of(name);

        let executions = self.executions.lock();
        let Some(execution) = executions.get(exec_id) else {
            return prerequisites.is_empty();
        };

        if !allow_parallel && execution.running.contains(name) {
            return false;
        }

        prerequisites_satisfied(prerequisites, &execution.completed, &execution.failed)
    }

    /// Record that `name` has started under `exec_id`, creating the
    /// workflow execution record if this is its first job.
    pub fn job_started(&self, name: &str, exec_id: &str) {
        let mut executions = self.executions.lock();
        let execution = executions
            .entry(exec_id.to_string())
            .or_insert_with(|| WorkflowExecution::new(exec_id.to_string(), self.clock.now()));
        execution.running.insert(name.to_string());
    }

    /// Record that `name` finished under `exec_id`, then cascade any
    /// `on-success`/`on-failure` targets whose prerequisites are now
    /// satisfied back through `scheduler`.
    pub fn job_completed(&self, name: &str, exec_id: &str, success: bool, scheduler: &dyn WorkflowScheduler) {
        {
            let mut executions = self.executions.lock();
            let execution = executions
                .entry(exec_id.to_string())
                .or_insert_with(|| WorkflowExecution::new(exec_id.to_string(), self.clock.now()));
            execution.running.remove(name);
            if success {
                execution.completed.insert(name.to_string());
            } else {
                execution.failed.insert(name.to_string());
            }
        }

        let condition = if success {
            EdgeCondition::OnSuccess
        } else {
            EdgeCondition::OnFailure
        };

        let targets = self.graph.read().targets_of(name, condition);
        for target in targets {
            if self.can_execute(&target, exec_id, true) {
                scheduler.schedule_manual_run(&target, exec_id);
            }
        }
    }

    /// Evict workflow executions whose start time is older than `max_age`.
    pub fn cleanup_old_executions(&self, max_age: Duration) {
        let now = self.clock.now();
        self.executions.lock().retain(|_, execution| {
            now.signed_duration_since(execution.start_time)
                .to_std()
                .map(|age| age <= max_age)
                .unwrap_or(true)
        });
    }

    /// Snapshot a workflow execution, mainly for tests and diagnostics.
    pub fn execution(&self, exec_id: &str) -> Option<WorkflowExecution> {
        self.executions.lock().get(exec_id).cloned()
    }
}

impl Default for WorkflowOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::job::LocalJob;
    use parking_lot::Mutex as StdMutex;

    struct RecordingScheduler {
        scheduled: StdMutex<Vec<String>>,
    }

    impl WorkflowScheduler for RecordingScheduler {
        fn schedule_manual_run(&self, job_name: &str, _exec_id: &str) {
            self.scheduled.lock().push(job_name.to_string());
        }
    }

    fn make_job(name: &str) -> Arc<dyn Job> {
        Arc::new(LocalJob::new(name, "@manual", "true"))
    }

    #[test]
    fn job_with_no_prerequisites_can_always_execute() {
        let orchestrator = WorkflowOrchestrator::new();
        assert!(orchestrator.can_execute("solo", "exec-1", true));
    }

    #[test]
    fn on_success_chain_fires_target_once() {
        let orchestrator = WorkflowOrchestrator::new();

        struct Chained {
            inner: LocalJob,
            on_success: Vec<String>,
            on_failure: Vec<String>,
        }

        #[async_trait::async_trait]
        impl Job for Chained {
            fn name(&self) -> &str {
                self.inner.name()
            }
            fn schedule(&self) -> &str {
                self.inner.schedule()
            }
            fn command(&self) -> &str {
                self.inner.command()
            }
            async fn run(&self, ctx: &mut crate::execution::Context) -> Result<(), OfeliaError> {
                self.inner.run(ctx).await
            }
            fn middlewares(&self) -> Vec<Arc<dyn crate::middleware::Middleware>> {
                self.inner.middlewares()
            }
            fn use_middleware(&self, m: Arc<dyn crate::middleware::Middleware>) {
                self.inner.use_middleware(m)
            }
            fn notify_start(&self) {}
            fn notify_stop(&self) {}
            fn running(&self) -> i32 {
                0
            }
            fn cron_job_id(&self) -> Option<u64> {
                None
            }
            fn set_cron_job_id(&self, _id: u64) {}
            fn history(&self) -> Vec<Arc<crate::execution::Execution>> {
                Vec::new()
            }
            fn record_execution(&self, _e: crate::execution::Execution) {}
            fn should_run_on_startup(&self) -> bool {
                false
            }
            fn on_success(&self) -> Vec<String> {
                self.on_success.clone()
            }
            fn on_failure(&self) -> Vec<String> {
                self.on_failure.clone()
            }
        }

        let m: Arc<dyn Job> = Arc::new(Chained {
            inner: LocalJob::new("m", "@manual", "true"),
            on_success: vec!["s".into()],
            on_failure: vec!["f".into()],
        });

        let mut jobs: HashMap<String, Arc<dyn Job>> = HashMap::new();
        jobs.insert("m".into(), m);
        jobs.insert("s".into(), make_job("s"));
        jobs.insert("f".into(), make_job("f"));
        orchestrator.build_dependency_graph(&jobs).unwrap();

        let scheduler = RecordingScheduler {
            scheduled: StdMutex::new(Vec::new()),
        };

        orchestrator.job_started("m", "exec-1");
        orchestrator.job_completed("m", "exec-1", true, &scheduler);
        assert_eq!(scheduler.scheduled.lock().clone(), vec!["s".to_string()]);

        orchestrator.job_started("m", "exec-2");
        orchestrator.job_completed("m", "exec-2", false, &scheduler);
        assert_eq!(
            scheduler.scheduled.lock().clone(),
            vec!["s".to_string(), "f".to_string()]
        );
    }

    #[test]
    fn cleanup_evicts_executions_older_than_max_age() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let orchestrator = WorkflowOrchestrator::with_clock(clock.clone());

        orchestrator.job_started("j", "exec-old");
        clock.advance(Duration::from_secs(120));
        assert!(orchestrator.execution("exec-old").is_some());

        orchestrator.cleanup_old_executions(Duration::from_secs(60));
        assert!(orchestrator.execution("exec-old").is_none());
    }
}
