//! Handles returned by the engine.

use crate::error::PersistResult;
use crate::signal::{ReadySignal, Readiness};
use crate::task::{CancellableTask, TaskHandle};
use std::future::IntoFuture;
use std::sync::Arc;

/// Observes a retrieve: an optional early ready signal, then completion.
///
/// Awaiting the handle directly waits for completion. Whole retrieves never
/// become ready; their signal resolves to [`Readiness::Abandoned`] when they
/// complete.
#[derive(Debug)]
pub struct RetrieveHandle {
    pub(crate) ready: ReadySignal,
    pub(crate) done: TaskHandle,
}

impl RetrieveHandle {
    /// Returns the task performing the retrieve.
    pub fn task(&self) -> &Arc<CancellableTask> {
        self.done.task()
    }

    /// Requests cancellation of the retrieve.
    pub fn cancel(&self) {
        self.done.cancel();
    }

    /// Waits until the entity tree is usable or the retrieve ends without
    /// becoming ready.
    pub async fn ready(&mut self) -> Readiness {
        (&mut self.ready).await
    }

    /// Splits into the ready signal and the completion handle.
    pub fn split(self) -> (ReadySignal, TaskHandle) {
        (self.ready, self.done)
    }
}

impl IntoFuture for RetrieveHandle {
    type Output = PersistResult<()>;
    type IntoFuture = TaskHandle;

    fn into_future(self) -> TaskHandle {
        self.done
    }
}
