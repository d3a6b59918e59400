//! Engine statistics.
//!
//! Counts every operation the engine dispatches and how it ended.
//!
//! # Usage
//!
//! ```rust,ignore
//! engine.save(&moment, options, None).await?;
//!
//! let stats = engine.stats();
//! println!("Saves: {}", stats.saves.succeeded);
//! println!("Retries: {}", stats.retries);
//! ```

use crate::error::ErrorKind;
use crate::types::OperationKind;

/// Counters for one kind of operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    /// Operations handed to an entity queue.
    pub dispatched: u64,
    /// Operations that completed successfully.
    pub succeeded: u64,
    /// Operations that completed with a failure other than cancellation.
    pub failed: u64,
    /// Operations that completed cancelled.
    pub cancelled: u64,
}

impl OperationCounts {
    /// Returns the number of completed operations.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled
    }

    /// Returns the number of dispatched operations not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.dispatched.saturating_sub(self.completed())
    }
}

/// Statistics about the operations an [`Engine`](crate::Engine) has run.
///
/// Parent and child operations are counted alike: saving a moment with two
/// media completes three save operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Retrieve operations.
    pub retrieves: OperationCounts,
    /// Save operations.
    pub saves: OperationCounts,
    /// Delete operations.
    pub deletes: OperationCounts,
    /// Remote-tier attempts beyond the first, across all operations.
    pub retries: u64,
    /// Kind of the most recent failure.
    pub last_error: Option<ErrorKind>,
}

impl EngineStats {
    /// Returns the counters for `kind`.
    pub fn for_kind(&self, kind: OperationKind) -> &OperationCounts {
        match kind {
            OperationKind::Retrieve => &self.retrieves,
            OperationKind::Save => &self.saves,
            OperationKind::Delete => &self.deletes,
        }
    }

    fn for_kind_mut(&mut self, kind: OperationKind) -> &mut OperationCounts {
        match kind {
            OperationKind::Retrieve => &mut self.retrieves,
            OperationKind::Save => &mut self.saves,
            OperationKind::Delete => &mut self.deletes,
        }
    }

    /// Returns the number of completed operations of every kind.
    pub fn completed(&self) -> u64 {
        self.retrieves.completed() + self.saves.completed() + self.deletes.completed()
    }

    /// Returns the number of operations of every kind still in flight.
    pub fn in_flight(&self) -> u64 {
        self.retrieves.in_flight() + self.saves.in_flight() + self.deletes.in_flight()
    }

    pub(crate) fn record_dispatch(&mut self, kind: OperationKind) {
        self.for_kind_mut(kind).dispatched += 1;
    }

    pub(crate) fn record_outcome(&mut self, kind: OperationKind, outcome: Result<(), ErrorKind>) {
        let counts = self.for_kind_mut(kind);
        match outcome {
            Ok(()) => counts.succeeded += 1,
            Err(ErrorKind::Cancelled) => counts.cancelled += 1,
            Err(error) => {
                counts.failed += 1;
                self.last_error = Some(error);
            }
        }
    }

    pub(crate) fn record_retries(&mut self, attempts: u32) {
        self.retries += u64::from(attempts.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_counted_per_kind() {
        let mut stats = EngineStats::default();
        for _ in 0..3 {
            stats.record_dispatch(OperationKind::Save);
        }
        stats.record_dispatch(OperationKind::Delete);

        stats.record_outcome(OperationKind::Save, Ok(()));
        stats.record_outcome(OperationKind::Save, Err(ErrorKind::RemoteFailure));
        stats.record_outcome(OperationKind::Delete, Err(ErrorKind::Cancelled));

        assert_eq!(stats.saves.completed(), 2);
        assert_eq!(stats.saves.in_flight(), 1);
        assert_eq!(stats.deletes.cancelled, 1);
        assert_eq!(stats.completed(), 3);
        assert_eq!(stats.in_flight(), 1);
        assert_eq!(stats.last_error, Some(ErrorKind::RemoteFailure));
    }

    #[test]
    fn cancellation_is_not_an_error() {
        let mut stats = EngineStats::default();
        stats.record_dispatch(OperationKind::Retrieve);
        stats.record_outcome(OperationKind::Retrieve, Err(ErrorKind::Cancelled));
        assert_eq!(stats.last_error, None);
        assert_eq!(stats.for_kind(OperationKind::Retrieve).failed, 0);
    }

    #[test]
    fn retries_exclude_first_attempt() {
        let mut stats = EngineStats::default();
        stats.record_retries(1);
        stats.record_retries(3);
        stats.record_retries(0);
        assert_eq!(stats.retries, 2);
    }
}
