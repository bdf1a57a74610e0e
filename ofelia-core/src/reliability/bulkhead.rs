//! Bulkhead: a bounded concurrency island
//!
//! Isolates one class of work (say, container-exec calls) so it cannot
//! exhaust resources shared by another class. Built on `tokio::sync::Semaphore`,
//! the same primitive `WorkerPool` uses to bound its active task count — the
//! non-blocking `try_acquire` path mirrors the scheduler wrapper's
//! "non-blocking permit acquisition; skip, don't queue" admission rule.

use std::sync::Arc;

use tokio::sync::{Semaphore, TryAcquireError};

/// Error returned when a bulkhead has no free slots.
#[derive(Debug, thiserror::Error)]
#[error("bulkhead {0} is full")]
pub struct BulkheadFull(pub String);

/// A named, bounded concurrency island.
pub struct Bulkhead {
    name: String,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

/// Held while work is in flight; releases its slot on drop.
pub struct BulkheadPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Bulkhead {
    /// Create a bulkhead admitting at most `max_concurrency` callers at once.
    pub fn new(name: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Name this bulkhead was constructed with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured concurrency ceiling.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of slots currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Try to enter without waiting. Returns [`BulkheadFull`] if every slot
    /// is taken — callers should skip the work rather than queue it, the
    /// same non-blocking discipline the scheduler wrapper uses for its
    /// global concurrency semaphore.
    pub fn try_enter(&self) -> Result<BulkheadPermit, BulkheadFull> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(BulkheadPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(BulkheadFull(self.name.clone())),
            Err(TryAcquireError::Closed) => Err(BulkheadFull(self.name.clone())),
        }
    }

    /// Wait for a slot to become free.
    pub async fn enter(&self) -> BulkheadPermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("bulkhead semaphore is never closed");
        BulkheadPermit { _permit: permit }
    }
}
