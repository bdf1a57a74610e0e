//! Cross-cutting behavior wrapping `Job::run`
//!
//! A middleware wraps the rest of the chain: it decides whether to call
//! [`crate::execution::Context::next`] to continue, or return early (with
//! or without an error) to short-circuit. Identity is the explicit `kind()`
//! string rather than a reflected type name, so the scheduler can dedupe
//! job-scope middlewares against scheduler-scope ones of the same kind.

use async_trait::async_trait;

use crate::error::OfeliaError;
use crate::execution::Context;

/// Cross-cutting behavior installed at scheduler and/or job scope.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable identifier used for deduplication: a job-scope middleware of
    /// a given kind overrides a scheduler-scope middleware of the same
    /// kind.
    fn kind(&self) -> &'static str;

    /// Whether this middleware should still run once the execution has
    /// already stopped (for example, a notifier that wants to report
    /// cancellation). Most middlewares should leave this `false`.
    fn continue_on_stop(&self) -> bool {
        false
    }

    /// Run this middleware's behavior. Implementations that want the
    /// chain to continue must call `ctx.next().await`; returning without
    /// doing so short-circuits the remaining chain (including `Job::run`
    /// if it hasn't executed yet).
    async fn run(&self, ctx: &mut Context) -> Result<(), OfeliaError>;
}

/// Dedupe a list of middlewares by [`Middleware::kind`], letting later
/// entries (job-scope, appended after scheduler-scope) win, while keeping
/// the position of each kind's first occurrence.
pub fn dedupe_by_kind(middlewares: Vec<std::sync::Arc<dyn Middleware>>) -> Vec<std::sync::Arc<dyn Middleware>> {
    let mut order: Vec<&'static str> = Vec::new();
    let mut by_kind: std::collections::HashMap<&'static str, std::sync::Arc<dyn Middleware>> =
        std::collections::HashMap::new();

    for mw in middlewares {
        let kind = mw.kind();
        if !by_kind.contains_key(kind) {
            order.push(kind);
        }
        by_kind.insert(kind, mw);
    }

    order
        .into_iter()
        .map(|kind| by_kind.remove(kind).expect("kind was just inserted"))
        .collect()
}
