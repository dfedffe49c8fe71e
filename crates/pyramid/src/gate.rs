//! Bounded tile scheduling.
//!
//! A [`ConcurrencyGate`] hands out permits; every tile task holds one for its
//! whole run on the blocking pool. Work is grouped in [`Batch`]es which the
//! driver joins completely before starting anything that depends on them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use dzi_common::{DziError, DziResult};

/// Log batch progress every this many finished tasks.
const PROGRESS_INTERVAL: usize = 100;

/// Counting permit shared by all batches of one run.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    /// Create a gate admitting `capacity` tasks at once (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a task.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Start a new batch of tasks.
    pub fn batch<T: Send + 'static>(&self, label: impl Into<String>) -> Batch<T> {
        Batch {
            semaphore: self.semaphore.clone(),
            label: label.into(),
            tasks: JoinSet::new(),
            failed: Arc::new(AtomicBool::new(false)),
            dispatched: 0,
            started: Instant::now(),
        }
    }
}

/// A group of tile tasks joined together.
pub struct Batch<T> {
    semaphore: Arc<Semaphore>,
    label: String,
    tasks: JoinSet<DziResult<T>>,
    failed: Arc<AtomicBool>,
    dispatched: usize,
    started: Instant,
}

impl<T: Send + 'static> Batch<T> {
    /// Whether a task of this batch has already failed.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Wait for a permit, then run `work` on the blocking pool.
    ///
    /// Returns `Ok(false)` without running `work` once any task of the batch
    /// has failed; the caller should stop dispatching and join.
    pub async fn dispatch<F>(&mut self, work: F) -> DziResult<bool>
    where
        F: FnOnce() -> DziResult<T> + Send + 'static,
    {
        if self.has_failed() {
            return Ok(false);
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DziError::Task("concurrency gate closed".to_string()))?;

        // A task may have failed while we waited.
        if self.has_failed() {
            return Ok(false);
        }

        let failed = self.failed.clone();
        self.tasks.spawn_blocking(move || {
            let result = work();
            if result.is_err() {
                failed.store(true, Ordering::Release);
            }
            drop(permit);
            result
        });
        self.dispatched += 1;
        Ok(true)
    }

    /// Wait for every dispatched task.
    ///
    /// Results come back in completion order. If any task failed, the first
    /// error observed is returned once all tasks have finished.
    pub async fn join(mut self) -> DziResult<Vec<T>> {
        let total = self.dispatched;
        let mut results = Vec::with_capacity(total);
        let mut first_error: Option<DziError> = None;
        let mut completed = 0usize;

        while let Some(joined) = self.tasks.join_next().await {
            completed += 1;
            match joined {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(e)) => {
                    warn!(batch = %self.label, error = %e, "Tile task failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!(batch = %self.label, error = %e, "Tile task panicked");
                    first_error.get_or_insert(DziError::Task(e.to_string()));
                }
            }

            if completed % PROGRESS_INTERVAL == 0 {
                info!(
                    batch = %self.label,
                    progress = format!("{}/{}", completed, total),
                    "Batch progress"
                );
            }
        }

        let elapsed = self.started.elapsed();
        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(
                    batch = %self.label,
                    tasks = total,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Batch complete"
                );
                Ok(results)
            }
        }
    }
}
