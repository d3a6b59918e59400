//! The per-entity serial task queue.

use crate::error::{ErrorKind, PersistResult};
use crate::task::{CancellableTask, TaskState};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// Runs one entity's operations one at a time, in submission order.
///
/// Tasks are tracked from the moment they are enqueued until they finish,
/// so [`cancel_all`](Self::cancel_all) reaches queued and running tasks
/// alike. The slot itself is a FIFO async mutex; waiting for it never blocks
/// a runtime thread.
#[derive(Debug, Default)]
pub struct TaskQueue {
    slot: tokio::sync::Mutex<()>,
    outstanding: Mutex<Vec<Arc<CancellableTask>>>,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `task` as outstanding. Call before [`run`](Self::run) is
    /// spawned so the task can be cancelled while still queued.
    pub fn enqueue(&self, task: &Arc<CancellableTask>) {
        self.outstanding.lock().push(Arc::clone(task));
    }

    /// Waits for the slot, then runs `work` as `task`.
    ///
    /// A task cancelled while waiting gives up its place without running.
    /// Returns the kind of outcome the task's handle received.
    pub async fn run<F>(&self, task: Arc<CancellableTask>, work: F) -> Result<(), ErrorKind>
    where
        F: Future<Output = PersistResult<()>>,
    {
        let slot = tokio::select! {
            biased;
            () = task.cancellation_token().cancelled() => None,
            guard = self.slot.lock() => Some(guard),
        };

        let outcome = match slot {
            Some(_guard) => {
                trace!(task = %task.label(), "slot acquired");
                task.run(work).await
            }
            None => {
                trace!(task = %task.label(), "cancelled while queued");
                None
            }
        };

        self.outstanding.lock().retain(|t| t.id() != task.id());
        outcome.unwrap_or(Err(ErrorKind::Cancelled))
    }

    /// Cancels every outstanding task. Returns how many were cancelled.
    ///
    /// Waiting tasks are cancelled newest first, and only then the task
    /// holding the slot, so no waiting task can take the slot released by
    /// a cancelled one and run to completion.
    pub fn cancel_all(&self) -> usize {
        let tasks: Vec<_> = self.outstanding.lock().clone();
        let (running, waiting): (Vec<_>, Vec<_>) = tasks
            .iter()
            .partition(|task| task.state() == TaskState::Executing);
        for task in waiting.iter().rev().chain(running.iter()) {
            task.cancel();
        }
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "cancelled outstanding tasks");
        }
        tasks.len()
    }

    /// Returns the number of outstanding tasks.
    pub fn len(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Returns true if no task is outstanding.
    pub fn is_empty(&self) -> bool {
        self.outstanding.lock().is_empty()
    }
}
