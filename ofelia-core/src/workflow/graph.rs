//! Dependency graph construction and cycle detection
//!
//! Edges come from three per-job declarations: `depends-on` (this job
//! waits on listed parents), `on-success`/`on-failure` (targets fired
//! after this job finishes). [`DependencyGraph::build`] folds all three
//! into one graph and rejects cycles with a three-color DFS.

use std::collections::{HashMap, HashSet};

use crate::error::OfeliaError;
use crate::job::Job;

/// The condition under which a dependency edge fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeCondition {
    OnSuccess,
    OnFailure,
}

/// A directed edge from `parent` to `child`, active under `condition`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub parent: String,
    pub child: String,
    pub condition: EdgeCondition,
}

/// The dependency graph built from every registered job's declared
/// relationships.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// `depends-on`: a child must see every listed parent succeed before
    /// it is eligible to run.
    pub prerequisites: HashMap<String, Vec<String>>,
    /// All edges, `depends-on` and `on-success`/`on-failure` alike, wired
    /// as parent → child with the firing condition.
    pub edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    /// Build and validate the graph from a job registry snapshot.
    ///
    /// Every name referenced by `depends-on`/`on-success`/`on-failure`
    /// must resolve to a known job, and the implied `depends-on` graph
    /// must be acyclic.
    pub fn build(jobs: &HashMap<String, std::sync::Arc<dyn Job>>) -> Result<Self, OfeliaError> {
        let mut graph = DependencyGraph::default();

        for job in jobs.values() {
            graph.prerequisites.insert(job.name().to_string(), job.depends_on());

            for parent in job.depends_on() {
                if !jobs.contains_key(&parent) {
                    return Err(OfeliaError::JobNotFound(parent));
                }
                graph.edges.push(DependencyEdge {
                    parent,
                    child: job.name().to_string(),
                    condition: EdgeCondition::OnSuccess,
                });
            }

            for target in job.on_success() {
                if !jobs.contains_key(&target) {
                    return Err(OfeliaError::JobNotFound(target));
                }
                graph.edges.push(DependencyEdge {
                    parent: job.name().to_string(),
                    child: target,
                    condition: EdgeCondition::OnSuccess,
                });
            }

            for target in job.on_failure() {
                if !jobs.contains_key(&target) {
                    return Err(OfeliaError::JobNotFound(target));
                }
                graph.edges.push(DependencyEdge {
                    parent: job.name().to_string(),
                    child: target,
                    condition: EdgeCondition::OnFailure,
                });
            }
        }

        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Parents `name` depends on via `depends-on`.
    pub fn prerequisites_of(&self, name: &str) -> &[String] {
        self.prerequisites.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Children wired to fire when `name` finishes under `condition`.
    pub fn targets_of(&self, name: &str, condition: EdgeCondition) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.parent == name && e.condition == condition)
            .map(|e| e.child.clone())
            .collect()
    }

    /// Three-color DFS over the `depends-on` adjacency: a back-edge to a
    /// gray node means a cycle.
    fn check_acyclic(&self) -> Result<(), OfeliaError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<&str, Color> = self
            .prerequisites
            .keys()
            .map(|k| (k.as_str(), Color::White))
            .collect();

        fn visit<'a>(
            node: &'a str,
            prerequisites: &'a HashMap<String, Vec<String>>,
            color: &mut HashMap<&'a str, Color>,
            stack: &mut Vec<String>,
        ) -> Result<(), OfeliaError> {
            color.insert(node, Color::Gray);
            stack.push(node.to_string());

            if let Some(parents) = prerequisites.get(node) {
                for parent in parents {
                    match color.get(parent.as_str()).copied().unwrap_or(Color::White) {
                        Color::Gray => {
                            return Err(OfeliaError::CircularDependency(format!(
                                "{} -> {}",
                                stack.join(" -> "),
                                parent
                            )))
                        }
                        Color::White => visit(parent, prerequisites, color, stack)?,
                        Color::Black => {}
                    }
                }
            }

            stack.pop();
            color.insert(node, Color::Black);
            Ok(())
        }

        let nodes: Vec<String> = self.prerequisites.keys().cloned().collect();
        for node in &nodes {
            if color.get(node.as_str()).copied().unwrap_or(Color::White) == Color::White {
                visit(node, &self.prerequisites, &mut color, &mut Vec::new())?;
            }
        }

        Ok(())
    }
}

/// Prerequisites are satisfied when every parent is in `completed` and
/// none is in `failed`.
pub fn prerequisites_satisfied(parents: &[String], completed: &HashSet<String>, failed: &HashSet<String>) -> bool {
    parents.iter().all(|p| completed.contains(p)) && parents.iter().all(|p| !failed.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::LocalJob;
    use std::sync::Arc;

    fn job_with_deps(name: &str, depends_on: Vec<&str>) -> Arc<dyn Job> {
        struct Wired {
            inner: LocalJob,
            deps: Vec<String>,
        }

        #[async_trait::async_trait]
        impl Job for Wired {
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
            fn notify_start(&self) {
                self.inner.notify_start()
            }
            fn notify_stop(&self) {
                self.inner.notify_stop()
            }
            fn running(&self) -> i32 {
                self.inner.running()
            }
            fn cron_job_id(&self) -> Option<u64> {
                self.inner.cron_job_id()
            }
            fn set_cron_job_id(&self, id: u64) {
                self.inner.set_cron_job_id(id)
            }
            fn history(&self) -> Vec<Arc<crate::execution::Execution>> {
                self.inner.history()
            }
            fn record_execution(&self, e: crate::execution::Execution) {
                self.inner.record_execution(e)
            }
            fn should_run_on_startup(&self) -> bool {
                self.inner.should_run_on_startup()
            }
            fn depends_on(&self) -> Vec<String> {
                self.deps.clone()
            }
        }

        Arc::new(Wired {
            inner: LocalJob::new(name, "@manual", "true"),
            deps: depends_on.into_iter().map(String::from).collect(),
        })
    }

    #[test]
    fn detects_three_node_cycle() {
        let mut jobs: HashMap<String, Arc<dyn Job>> = HashMap::new();
        jobs.insert("a".into(), job_with_deps("a", vec!["c"]));
        jobs.insert("b".into(), job_with_deps("b", vec!["a"]));
        jobs.insert("c".into(), job_with_deps("c", vec!["b"]));

        let err = DependencyGraph::build(&jobs).unwrap_err();
        assert!(matches!(err, OfeliaError::CircularDependency(_)));
    }

    #[test]
    fn accepts_a_dag() {
        let mut jobs: HashMap<String, Arc<dyn Job>> = HashMap::new();
        jobs.insert("a".into(), job_with_deps("a", vec![]));
        jobs.insert("b".into(), job_with_deps("b", vec!["a"]));

        assert!(DependencyGraph::build(&jobs).is_ok());
    }

    #[test]
    fn unknown_dependency_target_is_rejected() {
        let mut jobs: HashMap<String, Arc<dyn Job>> = HashMap::new();
        jobs.insert("a".into(), job_with_deps("a", vec!["ghost"]));

        let err = DependencyGraph::build(&jobs).unwrap_err();
        assert!(matches!(err, OfeliaError::JobNotFound(_)));
    }
}
