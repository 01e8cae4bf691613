//! Bounded worker pool for CPU-bound stages.
//!
//! Jobs run on tokio's blocking threads, never on the async workers that
//! drive the control plane. A semaphore bounds how many run at once and a
//! counter bounds how many may wait for a slot; anything beyond that is
//! rejected with [`PoolError::Saturated`].
//!
//! A caller that stops awaiting a job (timeout, shutdown) abandons it: the
//! thread keeps running until the job returns and only then frees its slot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, warn};

/// Errors raised by [`WorkerPool::submit`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every worker is busy and the wait queue is full.
    #[error("Worker pool saturated: {queued} request(s) already waiting")]
    Saturated {
        /// Requests waiting when this one was rejected.
        queued: usize,
    },

    /// The job panicked on its worker thread.
    #[error("Worker panicked: {0}")]
    Panicked(String),

    /// The pool was closed.
    #[error("Worker pool closed")]
    Closed,
}

/// Point-in-time pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured worker count.
    pub max_workers: usize,
    /// Configured queue bound.
    pub max_queued: usize,
    /// Jobs currently executing.
    pub busy: usize,
    /// Requests waiting for a worker.
    pub queued: usize,
    /// Jobs whose caller stopped waiting before they finished.
    pub abandoned: u64,
}

/// A bounded pool of isolated worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
    max_queued: usize,
    queued: AtomicUsize,
    busy: Arc<AtomicUsize>,
    abandoned: AtomicU64,
}

impl WorkerPool {
    /// Creates a pool. Both bounds are raised to at least 1 worker / 0 queue slots.
    #[must_use]
    pub fn new(max_workers: usize, max_queued: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            max_queued,
            queued: AtomicUsize::new(0),
            busy: Arc::new(AtomicUsize::new(0)),
            abandoned: AtomicU64::new(0),
        }
    }

    /// Creates a pool with one worker per available CPU.
    #[must_use]
    pub fn with_available_parallelism(max_queued: usize) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self::new(cpus, max_queued)
    }

    /// Runs `job` on a worker and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Saturated`] when no worker is free and the queue
    /// is full, [`PoolError::Panicked`] if the job panics, and
    /// [`PoolError::Closed`] after [`close`](Self::close).
    pub async fn submit<T, F>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
            Err(TryAcquireError::NoPermits) => {
                let _slot = QueueSlot::reserve(&self.queued, self.max_queued).ok_or_else(|| {
                    PoolError::Saturated {
                        queued: self.queued.load(Ordering::SeqCst),
                    }
                })?;
                debug!(queued = self.queued.load(Ordering::SeqCst), "Waiting for a free worker");
                self.permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| PoolError::Closed)?
            }
        };

        let busy = self.busy.clone();
        busy.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _busy = BusyGuard(busy);
            job()
        });

        let mut watch = AbandonWatch {
            counter: &self.abandoned,
            armed: true,
        };
        let result = handle.await;
        watch.armed = false;

        result.map_err(|e| {
            warn!(error = %e, "Worker job did not complete");
            PoolError::Panicked(e.to_string())
        })
    }

    /// Stops accepting jobs. Running jobs finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Returns current usage.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.max_workers,
            max_queued: self.max_queued,
            busy: self.busy.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            abandoned: self.abandoned.load(Ordering::SeqCst),
        }
    }
}

struct QueueSlot<'a>(&'a AtomicUsize);

impl<'a> QueueSlot<'a> {
    fn reserve(counter: &'a AtomicUsize, limit: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Self(counter))
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct BusyGuard(Arc<AtomicUsize>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct AbandonWatch<'a> {
    counter: &'a AtomicU64,
    armed: bool,
}

impl Drop for AbandonWatch<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}
