//! Entry point: wires the orchestration core to a real Docker daemon and
//! the OS, then blocks until a shutdown signal is received.
//!
//! Job definitions normally come from an INI file or container labels;
//! that loader lives outside this crate's scope, so this binary registers
//! a couple of jobs read from the environment to prove the wiring works
//! end to end against a real daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use ofelia_core::container_monitor::ContainerMonitor;
use ofelia_core::docker::{DockerClientConfig, DockerProvider, ResilientDockerClient};
use ofelia_core::job::{ContainerRunJob, LocalJob};
use ofelia_core::metrics;
use ofelia_core::reliability::{RateLimiter, RateLimiterConfig, RetryConfig};
use ofelia_core::scheduler::{Scheduler, SchedulerConfig};
use ofelia_core::shutdown::ShutdownManager;
use tracing_subscriber::EnvFilter;

/// Tunables read from the environment at startup.
struct EnvConfig {
    max_concurrent_jobs: usize,
    workflow_cleanup_interval: Duration,
    workflow_retention: Duration,
    shutdown_timeout: Duration,
    use_docker_events: bool,
}

impl EnvConfig {
    fn from_env() -> Self {
        Self {
            max_concurrent_jobs: env_usize("OFELIA_MAX_CONCURRENT_JOBS", 10),
            workflow_cleanup_interval: env_duration("OFELIA_WORKFLOW_CLEANUP_INTERVAL", Duration::from_secs(3600)),
            workflow_retention: env_duration("OFELIA_WORKFLOW_RETENTION", Duration::from_secs(24 * 3600)),
            shutdown_timeout: env_duration("OFELIA_SHUTDOWN_TIMEOUT", Duration::from_secs(30)),
            use_docker_events: env_bool("OFELIA_USE_DOCKER_EVENTS", true),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| humantime::parse_duration(&v).ok())
        .unwrap_or(default)
}

/// `false|0|no` (case-insensitive) disables; anything else, including an
/// unset variable, keeps `default`.
fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) if matches!(v.to_lowercase().as_str(), "false" | "0" | "no") => false,
        Ok(_) => true,
        Err(_) => default,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ofelia=info")))
        .json()
        .init();

    let env = EnvConfig::from_env();

    let metrics = metrics::noop();
    let docker = ResilientDockerClient::connect_default(DockerClientConfig::default())
        .context("failed to connect to the Docker daemon")?;
    let provider: Arc<dyn DockerProvider> = Arc::new(docker);
    provider.ping().await.context("Docker daemon did not respond to ping")?;

    let scheduler_config = SchedulerConfig {
        max_concurrent_jobs: env.max_concurrent_jobs,
        default_retry: RetryConfig::default(),
        workflow_cleanup_interval: env.workflow_cleanup_interval,
        workflow_retention: env.workflow_retention,
    };
    let scheduler = Scheduler::with_clock_and_metrics(
        scheduler_config,
        Arc::new(ofelia_core::clock::SystemClock),
        metrics.clone(),
    );

    scheduler
        .add_job(
            Arc::new(LocalJob::new("heartbeat", "@every 1m", "echo ofelia heartbeat")),
            vec!["builtin".into()],
        )
        .context("failed to register the heartbeat job")?;

    let monitor = ContainerMonitor::new(provider.clone(), env.use_docker_events, metrics.clone());
    scheduler
        .add_job(
            Arc::new(ContainerRunJob::new(
                "prune",
                "@every 1h",
                "alpine",
                vec!["true".into()],
                provider.clone(),
                monitor,
            )),
            vec!["builtin".into()],
        )
        .context("failed to register the container prune job")?;

    scheduler.start();
    tracing::info!(
        max_concurrent_jobs = env.max_concurrent_jobs,
        use_docker_events = env.use_docker_events,
        "scheduler started"
    );

    // SIGHUP re-runs the heartbeat job on demand, rate limited so a stuck
    // sender can't flood the scheduler with manual triggers.
    #[cfg(unix)]
    {
        let scheduler = scheduler.clone();
        let limiter = RateLimiter::new(RateLimiterConfig::new(3, 1.0 / 30.0));
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(hangup) => hangup,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGHUP handler");
                    return;
                }
            };
            loop {
                hangup.recv().await;
                if !limiter.try_acquire() {
                    tracing::warn!("manual trigger rate limit exceeded, ignoring SIGHUP");
                    continue;
                }
                if let Err(e) = scheduler.run_job("heartbeat").await {
                    tracing::warn!(error = %e, "manual trigger failed");
                }
            }
        });
    }

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.clone().listen_for_shutdown(env.shutdown_timeout);

    let scheduler_for_hook = scheduler.clone();
    shutdown.register_hook(0, "scheduler-drain", move || {
        let scheduler = scheduler_for_hook.clone();
        async move {
            scheduler.stop();
            scheduler.stop_and_wait().await;
            Ok(())
        }
    });

    let provider_for_hook = provider.clone();
    shutdown.register_hook(10, "docker-client-close", move || {
        let provider = provider_for_hook.clone();
        async move {
            provider.close().await;
            Ok(())
        }
    });

    shutdown.chan().cancelled().await;
    tracing::info!("shutdown complete");
    Ok(())
}
