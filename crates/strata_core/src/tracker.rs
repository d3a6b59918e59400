//! Fan-in of child operation results.
//!
//! Each entity owns one [`ChildOperationTracker`]. An operation arms it with
//! the number of participants it is about to dispatch, every participant
//! reports exactly once through [`ChildOperationTracker::child_completed`],
//! and the [`FanIn`] returned by `arm` resolves once all have reported. The
//! first failure wins; later failures are logged and dropped.
//!
//! Recursive retrieves also count readiness: once every participant has
//! called [`ChildOperationTracker::child_ready`], the parent's own
//! [`ReadyNotifier`] fires.

use crate::error::{PersistError, PersistResult};
use crate::signal::ReadyNotifier;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{trace, warn};

#[derive(Debug)]
struct Armed {
    outstanding: usize,
    unready: usize,
    first_error: Option<PersistError>,
    done_tx: oneshot::Sender<PersistResult<()>>,
    ready: Option<ReadyNotifier>,
}

#[derive(Debug, Default)]
enum TrackerState {
    #[default]
    Idle,
    Armed(Armed),
}

/// Counts outstanding child operations of one entity.
#[derive(Debug, Default)]
pub struct ChildOperationTracker {
    state: Mutex<TrackerState>,
}

impl ChildOperationTracker {
    /// Creates an idle tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the tracker for `count` participants.
    ///
    /// Arming with zero participants, or while a previous fan-in is still
    /// outstanding, is an [`PersistError::InconsistentState`].
    pub fn arm(&self, count: usize) -> PersistResult<FanIn> {
        self.arm_inner(count, None)
    }

    /// Arms the tracker and fires `ready` once all `count` participants have
    /// reported ready.
    pub fn arm_with_ready(&self, count: usize, ready: ReadyNotifier) -> PersistResult<FanIn> {
        self.arm_inner(count, Some(ready))
    }

    fn arm_inner(&self, count: usize, ready: Option<ReadyNotifier>) -> PersistResult<FanIn> {
        if count == 0 {
            return Err(PersistError::inconsistent("tracker armed with no participants"));
        }
        let mut state = self.state.lock();
        if let TrackerState::Armed(armed) = &*state {
            return Err(PersistError::inconsistent(format!(
                "tracker re-armed with {} participants outstanding",
                armed.outstanding
            )));
        }
        let (done_tx, done_rx) = oneshot::channel();
        let unready = if ready.is_some() { count } else { 0 };
        *state = TrackerState::Armed(Armed {
            outstanding: count,
            unready,
            first_error: None,
            done_tx,
            ready,
        });
        trace!(count, "tracker armed");
        Ok(FanIn { done_rx: Some(done_rx) })
    }

    /// Returns true while a fan-in is outstanding.
    pub fn is_armed(&self) -> bool {
        matches!(*self.state.lock(), TrackerState::Armed(_))
    }

    /// Returns the number of participants that have not completed.
    pub fn outstanding(&self) -> usize {
        match &*self.state.lock() {
            TrackerState::Armed(armed) => armed.outstanding,
            TrackerState::Idle => 0,
        }
    }

    /// Records that one participant is ready.
    pub fn child_ready(&self) -> PersistResult<()> {
        let notifier = {
            let mut state = self.state.lock();
            let TrackerState::Armed(armed) = &mut *state else {
                return Err(PersistError::inconsistent("child ready on an idle tracker"));
            };
            if armed.unready == 0 {
                return Err(PersistError::inconsistent("more children ready than armed"));
            }
            armed.unready -= 1;
            if armed.unready == 0 {
                armed.ready.take()
            } else {
                None
            }
        };
        if let Some(notifier) = notifier {
            trace!("all children ready");
            notifier.notify();
        }
        Ok(())
    }

    /// Records one participant's result.
    ///
    /// The last participant releases the tracker and resolves the [`FanIn`]
    /// with the first failure seen, if any.
    pub fn child_completed(&self, result: PersistResult<()>) -> PersistResult<()> {
        let finished = {
            let mut state = self.state.lock();
            let TrackerState::Armed(armed) = &mut *state else {
                return Err(PersistError::inconsistent("child completed on an idle tracker"));
            };
            if let Err(e) = result {
                if armed.first_error.is_none() {
                    armed.first_error = Some(e);
                } else if !e.is_cancelled() {
                    warn!(error = %e, "additional child failure");
                }
            }
            armed.outstanding -= 1;
            if armed.outstanding > 0 {
                return Ok(());
            }
            let TrackerState::Armed(finished) = std::mem::take(&mut *state) else {
                return Err(PersistError::inconsistent("tracker released twice"));
            };
            finished
        };

        let result = finished.first_error.map_or(Ok(()), Err);
        trace!(ok = result.is_ok(), "all children completed");
        // A dropped fan-in means the parent stopped waiting; nothing to do.
        let _ = finished.done_tx.send(result);
        Ok(())
    }
}

/// Resolves once every participant of an armed [`ChildOperationTracker`]
/// has completed.
#[derive(Debug)]
pub struct FanIn {
    done_rx: Option<oneshot::Receiver<PersistResult<()>>>,
}

impl Future for FanIn {
    type Output = PersistResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(done_rx) = self.done_rx.as_mut() else {
            return Poll::Ready(Err(PersistError::inconsistent(
                "fan-in polled after completion",
            )));
        };
        let result = match Pin::new(done_rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(PersistError::inconsistent(
                "tracker released without a result",
            )),
        };
        self.done_rx = None;
        Poll::Ready(result)
    }
}
