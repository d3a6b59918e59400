//! One-shot ready signals for recursive retrieves.
//!
//! A recursive retrieve reports "ready" once its own entity and every
//! descendant are usable in memory, which may be before trailing work (cache
//! writes) finishes. The notifier is consumed by [`ReadyNotifier::notify`],
//! so ready fires at most once per operation. If the operation ends without
//! notifying, the signal resolves to [`Readiness::Abandoned`].

use crate::task::CancellableTask;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Outcome of waiting on a [`ReadySignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The tree is usable. The operation will not report cancellation or a
    /// remote failure afterwards.
    Ready,
    /// The operation ended without becoming ready.
    Abandoned,
}

impl Readiness {
    /// Returns true for [`Readiness::Ready`].
    pub fn is_ready(self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Creates a connected notifier and signal.
///
/// When `task` is given, notifying also commits it, so a later cancel can no
/// longer turn its completion into a cancellation.
pub fn ready_channel(task: Option<Arc<CancellableTask>>) -> (ReadyNotifier, ReadySignal) {
    let (tx, rx) = oneshot::channel();
    (
        ReadyNotifier { tx, task },
        ReadySignal {
            rx: Some(rx),
            resolved: None,
        },
    )
}

/// The sending half of a ready signal.
#[derive(Debug)]
pub struct ReadyNotifier {
    tx: oneshot::Sender<()>,
    task: Option<Arc<CancellableTask>>,
}

impl ReadyNotifier {
    /// Fires the signal.
    pub fn notify(self) {
        if let Some(task) = &self.task {
            task.commit();
        }
        // The receiver may have been dropped by a caller that only awaits
        // completion.
        let _ = self.tx.send(());
    }
}

/// The receiving half of a ready signal.
///
/// Can be polled again after it resolves and keeps returning the same value.
#[derive(Debug)]
pub struct ReadySignal {
    rx: Option<oneshot::Receiver<()>>,
    resolved: Option<Readiness>,
}

impl ReadySignal {
    /// A signal that is already abandoned.
    pub fn abandoned() -> Self {
        Self {
            rx: None,
            resolved: Some(Readiness::Abandoned),
        }
    }
}

impl Future for ReadySignal {
    type Output = Readiness;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Readiness> {
        if let Some(readiness) = self.resolved {
            return Poll::Ready(readiness);
        }
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Readiness::Abandoned);
        };
        let readiness = match Pin::new(rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(())) => Readiness::Ready,
            Poll::Ready(Err(_)) => Readiness::Abandoned,
        };
        self.rx = None;
        self.resolved = Some(readiness);
        Poll::Ready(readiness)
    }
}
