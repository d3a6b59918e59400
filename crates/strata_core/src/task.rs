//! Cancellable units of work.
//!
//! Every dispatched operation is represented by a [`CancellableTask`] and
//! observed through a [`TaskHandle`]. A task moves from `Pending` to exactly
//! one terminal state, and its handle resolves exactly once.
//!
//! ```text
//! Pending ──run──> Executing ──work done──> Finished | Cancelled
//!    │
//!    └──cancel──> Cancelled
//! ```
//!
//! Cancelling a pending task resolves its handle immediately. Cancelling an
//! executing task first cancels every registered child, depth-first, then
//! fires the task's [`CancellationToken`] so in-flight work can abort at its
//! next suspension point. Unless the task has [committed](CancellableTask::commit),
//! its result is then reported as [`PersistError::Cancelled`].

use crate::error::{ErrorKind, PersistError, PersistResult};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};
use uuid::Uuid;

/// Unique identifier of a task.
pub type TaskId = Uuid;

const PENDING: u8 = 0;
const EXECUTING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

/// Lifecycle state of a [`CancellableTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Dispatched, waiting for its entity's queue.
    Pending,
    /// Running.
    Executing,
    /// Completed with a result other than cancellation.
    Finished,
    /// Completed by cancellation.
    Cancelled,
}

impl TaskState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => TaskState::Pending,
            EXECUTING => TaskState::Executing,
            FINISHED => TaskState::Finished,
            _ => TaskState::Cancelled,
        }
    }

    /// Returns true for `Finished` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Cancelled)
    }
}

#[derive(Debug, Default)]
struct Children {
    tasks: Vec<Arc<CancellableTask>>,
    sealed: bool,
}

/// A unit of work that can be cancelled and owns its child tasks.
pub struct CancellableTask {
    id: TaskId,
    label: String,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    committed: AtomicBool,
    token: CancellationToken,
    children: Mutex<Children>,
    done_tx: Mutex<Option<oneshot::Sender<PersistResult<()>>>>,
}

impl CancellableTask {
    /// Creates a pending task and the handle observing it.
    pub fn new(label: impl Into<String>) -> (Arc<Self>, TaskHandle) {
        let (done_tx, done_rx) = oneshot::channel();
        let task = Arc::new(Self {
            id: Uuid::new_v4(),
            label: label.into(),
            state: AtomicU8::new(PENDING),
            cancel_requested: AtomicBool::new(false),
            committed: AtomicBool::new(false),
            token: CancellationToken::new(),
            children: Mutex::new(Children::default()),
            done_tx: Mutex::new(Some(done_tx)),
        });
        let handle = TaskHandle {
            task: Arc::clone(&task),
            done_rx: Some(done_rx),
        };
        (task, handle)
    }

    /// Returns the task id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the label given at creation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the current state.
    pub fn state(&self) -> TaskState {
        TaskState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Returns true once the task has passed its point of no return.
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    /// Marks the point of no return.
    ///
    /// After this, a cancel still propagates to children and fires the
    /// token, but the task's own result is delivered unchanged.
    pub fn commit(&self) {
        self.committed.store(true, Ordering::SeqCst);
    }

    /// Token fired when the task is cancelled.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `Err(Cancelled)` if cancellation was requested before the
    /// task committed. Work calls this at its safe points.
    pub fn check_cancelled(&self) -> PersistResult<()> {
        if self.is_cancel_requested() && !self.is_committed() {
            trace!(task = %self.label, "cancellation observed");
            return Err(PersistError::Cancelled);
        }
        Ok(())
    }

    /// Returns the number of registered children.
    pub fn child_count(&self) -> usize {
        self.children.lock().tasks.len()
    }

    /// Registers a child task.
    ///
    /// A child added after this task was cancelled is cancelled at once and
    /// `Err(Cancelled)` is returned. Adding to a finished task is an
    /// [`PersistError::InconsistentState`].
    pub fn add(&self, child: Arc<CancellableTask>) -> PersistResult<()> {
        let mut children = self.children.lock();
        if !children.sealed {
            children.tasks.push(child);
            return Ok(());
        }
        drop(children);

        if self.is_cancel_requested() {
            debug!(parent = %self.label, child = %child.label, "cancelling child of cancelled parent");
            child.cancel();
            Err(PersistError::Cancelled)
        } else {
            Err(PersistError::inconsistent(format!(
                "{} registered under finished {}",
                child.label, self.label
            )))
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        if self.cancel_requested.swap(true, Ordering::SeqCst) {
            trace!(task = %self.label, "cancel already requested");
            return;
        }

        match self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                debug!(task = %self.label, "cancelled before start");
                self.cancel_children();
                self.token.cancel();
                self.deliver(Err(PersistError::Cancelled));
            }
            Err(EXECUTING) => {
                debug!(task = %self.label, "cancelling executing task");
                self.cancel_children();
                self.token.cancel();
            }
            Err(_) => trace!(task = %self.label, "cancel after completion ignored"),
        }
    }

    fn cancel_children(&self) {
        let detached = {
            let mut children = self.children.lock();
            children.sealed = true;
            std::mem::take(&mut children.tasks)
        };
        for child in detached {
            child.cancel();
        }
    }

    /// Runs `work` and delivers its result.
    ///
    /// Returns the kind of the delivered outcome, or `None` if the task was
    /// cancelled while pending and nothing ran.
    pub async fn run<F>(&self, work: F) -> Option<Result<(), ErrorKind>>
    where
        F: Future<Output = PersistResult<()>>,
    {
        match self
            .state
            .compare_exchange(PENDING, EXECUTING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(CANCELLED) => {
                trace!(task = %self.label, "skipping cancelled task");
                return None;
            }
            Err(_) => {
                error!(task = %self.label, "inconsistent state: task started twice");
                return Some(Err(ErrorKind::InconsistentState));
            }
        }

        let result = work.await;

        let result = if self.is_cancel_requested() && !self.is_committed() {
            match result {
                Err(PersistError::InconsistentState(message)) => {
                    Err(PersistError::InconsistentState(message))
                }
                Err(e) if !e.is_cancelled() => {
                    debug!(task = %self.label, error = %e, "failure reported as cancellation");
                    Err(PersistError::Cancelled)
                }
                _ => Err(PersistError::Cancelled),
            }
        } else {
            result
        };

        {
            let mut children = self.children.lock();
            children.sealed = true;
            children.tasks.clear();
        }

        let terminal = if matches!(result, Err(PersistError::Cancelled)) {
            CANCELLED
        } else {
            FINISHED
        };
        self.state.store(terminal, Ordering::SeqCst);
        let outcome = result.as_ref().map(|_| ()).map_err(PersistError::kind);
        self.deliver(result);
        Some(outcome)
    }

    fn deliver(&self, result: PersistResult<()>) {
        let Some(done_tx) = self.done_tx.lock().take() else {
            error!(task = %self.label, "inconsistent state: task completed twice");
            return;
        };
        if done_tx.send(result).is_err() {
            trace!(task = %self.label, "handle dropped before completion");
        }
    }
}

impl fmt::Debug for CancellableTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableTask")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state())
            .field("cancel_requested", &self.is_cancel_requested())
            .finish_non_exhaustive()
    }
}

impl Drop for CancellableTask {
    fn drop(&mut self) {
        if self.done_tx.get_mut().is_some() {
            error!(task = %self.label, "task dropped before delivering a result");
        }
    }
}

/// Awaits the completion of a [`CancellableTask`].
#[derive(Debug)]
pub struct TaskHandle {
    task: Arc<CancellableTask>,
    done_rx: Option<oneshot::Receiver<PersistResult<()>>>,
}

impl TaskHandle {
    /// Returns the observed task.
    pub fn task(&self) -> &Arc<CancellableTask> {
        &self.task
    }

    /// Returns the task id.
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Requests cancellation of the task.
    pub fn cancel(&self) {
        self.task.cancel();
    }
}

impl Future for TaskHandle {
    type Output = PersistResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(done_rx) = self.done_rx.as_mut() else {
            return Poll::Ready(Err(PersistError::inconsistent(
                "task handle polled after completion",
            )));
        };
        let result = match Pin::new(done_rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(PersistError::inconsistent(format!(
                "{} dropped without a result",
                self.task.label
            ))),
        };
        self.done_rx = None;
        Poll::Ready(result)
    }
}
