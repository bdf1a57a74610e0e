//! Priority-ordered graceful shutdown
//!
//! Hooks register with a priority (lower runs first) and a name used in
//! error reporting. [`ShutdownManager::listen_for_shutdown`] installs OS
//! signal handlers; either that or a direct call to
//! [`ShutdownManager::shutdown`] runs every hook, grouped by priority and
//! run concurrently within a group, inside a single overall deadline. The
//! [`ShutdownChan`] lets in-flight job wrappers observe that shutdown has
//! started without polling a flag.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::OfeliaError;

type HookFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;
type HookFn = Arc<dyn Fn() -> HookFuture + Send + Sync>;

struct Hook {
    priority: i32,
    name: String,
    run: HookFn,
}

/// Closed the instant shutdown begins; clone it into job wrappers so they
/// can race their work against `cancelled()`.
#[derive(Clone)]
pub struct ShutdownChan(CancellationToken);

impl ShutdownChan {
    fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Resolves once shutdown has started.
    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }

    /// True once shutdown has started, without waiting.
    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }

    fn close(&self) {
        self.0.cancel();
    }
}

/// Coordinates orderly process shutdown across registered hooks.
pub struct ShutdownManager {
    hooks: Mutex<Vec<Hook>>,
    chan: ShutdownChan,
    in_progress: AtomicBool,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            chan: ShutdownChan::new(),
            in_progress: AtomicBool::new(false),
        }
    }

    /// Register a hook to run during shutdown. Lower `priority` values run
    /// first; hooks sharing a priority run concurrently with each other.
    pub fn register_hook<F, Fut>(&self, priority: i32, name: impl Into<String>, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.hooks.lock().push(Hook {
            priority,
            name: name.into(),
            run: Arc::new(move || Box::pin(hook())),
        });
    }

    /// A handle other components can clone to observe shutdown starting.
    pub fn chan(&self) -> ShutdownChan {
        self.chan.clone()
    }

    /// Install signal handlers for interrupt/terminate/quit; the first one
    /// received triggers [`Self::shutdown`] with `timeout`.
    #[cfg(unix)]
    pub fn listen_for_shutdown(self: Arc<Self>, timeout: Duration) {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let mut interrupt = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            };
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            let mut quit = match signal(SignalKind::quit()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGQUIT handler");
                    return;
                }
            };

            tokio::select! {
                _ = interrupt.recv() => info!(signal = "SIGINT", "shutdown signal received"),
                _ = terminate.recv() => info!(signal = "SIGTERM", "shutdown signal received"),
                _ = quit.recv() => info!(signal = "SIGQUIT", "shutdown signal received"),
            }

            if let Err(e) = self.shutdown(timeout).await {
                error!(error = %e, "shutdown did not complete cleanly");
            }
        });
    }

    /// Run every registered hook, grouped by ascending priority and
    /// concurrent within a group, bounded by `timeout` overall. Errors from
    /// individual hooks are aggregated rather than short-circuiting the
    /// rest. Calling this a second time while shutdown is already running
    /// returns [`OfeliaError::ShutdownInProgress`] immediately.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), OfeliaError> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(OfeliaError::ShutdownInProgress);
        }
        self.chan.close();

        let mut hooks = self.hooks.lock().drain(..).collect::<Vec<_>>();
        hooks.sort_by_key(|h| h.priority);

        let run_all = async {
            let mut errors = Vec::new();
            let mut i = 0;
            while i < hooks.len() {
                let priority = hooks[i].priority;
                let mut batch = Vec::new();
                while i < hooks.len() && hooks[i].priority == priority {
                    batch.push(hooks.remove(i));
                }
                let results = join_all(batch.iter().map(|h| (h.run)())).await;
                for (hook, result) in batch.iter().zip(results) {
                    if let Err(e) = result {
                        warn!(hook = %hook.name, error = %e, "shutdown hook failed");
                        errors.push(format!("{}: {e}", hook.name));
                    }
                }
            }
            errors
        };

        let outcome = tokio::time::timeout(timeout, run_all).await;
        match outcome {
            Err(_) => Err(OfeliaError::ShutdownTimeout(timeout)),
            Ok(errors) if errors.is_empty() => Ok(()),
            Ok(errors) => Err(OfeliaError::ShutdownFailed(errors.join("; "))),
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::sleep;

    #[tokio::test]
    async fn hooks_run_in_priority_order() {
        let manager = ShutdownManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        manager.register_hook(10, "second", move || {
            let o1 = o1.clone();
            async move {
                o1.lock().push("second");
                Ok(())
            }
        });

        let o2 = order.clone();
        manager.register_hook(0, "first", move || {
            let o2 = o2.clone();
            async move {
                o2.lock().push("first");
                Ok(())
            }
        });

        manager.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn chan_closes_when_shutdown_starts() {
        let manager = ShutdownManager::new();
        let chan = manager.chan();
        assert!(!chan.is_closed());

        manager.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(chan.is_closed());
    }

    #[tokio::test]
    async fn second_concurrent_shutdown_call_is_rejected() {
        let manager = Arc::new(ShutdownManager::new());
        manager.register_hook(0, "slow", || async {
            sleep(Duration::from_millis(50)).await;
            Ok(())
        });

        let m2 = manager.clone();
        let first = tokio::spawn(async move { m2.shutdown(Duration::from_secs(1)).await });
        sleep(Duration::from_millis(5)).await;

        let second = manager.shutdown(Duration::from_secs(1)).await;
        assert!(matches!(second, Err(OfeliaError::ShutdownInProgress)));
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn slow_hook_past_deadline_surfaces_shutdown_timeout() {
        let manager = ShutdownManager::new();
        manager.register_hook(0, "never-finishes", || async {
            sleep(Duration::from_secs(10)).await;
            Ok(())
        });

        let result = manager.shutdown(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(OfeliaError::ShutdownTimeout(_))));
    }

    #[tokio::test]
    async fn hook_errors_are_aggregated_not_short_circuited() {
        let manager = ShutdownManager::new();
        let ran = Arc::new(AtomicU32::new(0));

        let r1 = ran.clone();
        manager.register_hook(0, "fails", move || {
            let r1 = r1.clone();
            async move {
                r1.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("boom"))
            }
        });
        let r2 = ran.clone();
        manager.register_hook(0, "succeeds", move || {
            let r2 = r2.clone();
            async move {
                r2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let result = manager.shutdown(Duration::from_secs(1)).await;
        assert!(result.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
