use std::future::Future;
use std::sync::{Arc, Mutex};
use std::thread;

use strata_model::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{DeserializeError, DeserializeResult};

/// Result of one pooled decode task. Errors are shared behind an `Arc` so
/// every resolver awaiting the same task can observe them.
pub type TaskOutcome = Result<Value, Arc<DeserializeError>>;

/// Receiver side of a pooled task: holds `None` until the task publishes.
pub type TaskReceiver = watch::Receiver<Option<TaskOutcome>>;

/// Cap on pool size regardless of how many cores the host reports.
const MAX_WORKERS: usize = 6;

/// Default pool capacity: available parallelism, capped.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
        .min(MAX_WORKERS)
}

/// Bounded decode pool, built per root document and torn down with it.
///
/// Admission is try-only: [`try_submit`](WorkerPool::try_submit) spawns the
/// task when a permit is free and otherwise returns `None`, telling the
/// caller to decode inline. That keeps a full pool from deadlocking on
/// tasks whose decode needs the result of another task still queued behind
/// them. Completion order is unconstrained; only submission order is.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            capacity: capacity.max(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Spawn `task` if a worker permit is free.
    ///
    /// Returns a receiver that resolves to the task's outcome, or `None`
    /// when the pool is saturated and the caller must decode inline.
    pub fn try_submit<F>(&self, task: F) -> Option<TaskReceiver>
    where
        F: Future<Output = DeserializeResult<Value>> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let outcome = task.await.map_err(Arc::new);
            // Receivers may all be gone if the root walk errored first.
            let _ = tx.send(Some(outcome));
            drop(permit);
        });
        self.handles.lock().expect("lock poisoned").push(handle);
        Some(rx)
    }

    /// Await every spawned task. Called once the root walk finished so the
    /// pool never outlives its document.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .expect("lock poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "decode worker terminated abnormally");
            }
        }
    }
}
