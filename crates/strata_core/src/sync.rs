//! The critical-section mutex guarding each entity's mutable state.
//!
//! A thin wrapper around [`parking_lot::Mutex`] that reports critical sections
//! held for too long. Recursive locking is not supported: locking the same
//! mutex twice from one critical section deadlocks. Callers must never
//! perform storage or network I/O while holding the guard, and must never
//! hold two entities' guards at once.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::time::{Duration, Instant};
use tracing::warn;

/// Mutual exclusion for one entity's state.
pub struct EntityMutex<T> {
    inner: Mutex<T>,
    hold_warning: Duration,
}

impl<T> EntityMutex<T> {
    /// Creates a mutex that warns when held longer than `hold_warning`.
    pub fn new(value: T, hold_warning: Duration) -> Self {
        Self {
            inner: Mutex::new(value),
            hold_warning,
        }
    }

    /// Blocks until the calling thread holds exclusive access.
    ///
    /// Access is released when the returned guard is dropped.
    #[track_caller]
    pub fn lock(&self) -> EntityMutexGuard<'_, T> {
        let location = Location::caller();
        let requested = Instant::now();
        let guard = self.inner.lock();
        let waited = requested.elapsed();
        if waited > self.hold_warning {
            warn!(%location, ?waited, "blocked by entity mutex for too long");
        }
        EntityMutexGuard {
            guard,
            acquired: Instant::now(),
            hold_warning: self.hold_warning,
            location,
        }
    }

    /// Returns true if some thread currently holds the mutex.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(guard) => f.debug_tuple("EntityMutex").field(&*guard).finish(),
            None => f.write_str("EntityMutex(<locked>)"),
        }
    }
}

/// Exclusive access to the value behind an [`EntityMutex`].
pub struct EntityMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    acquired: Instant,
    hold_warning: Duration,
    location: &'static Location<'static>,
}

impl<T> Deref for EntityMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for EntityMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for EntityMutexGuard<'_, T> {
    fn drop(&mut self) {
        let held = self.acquired.elapsed();
        if held > self.hold_warning {
            warn!(location = %self.location, ?held, "held entity mutex for too long");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tracing_test::traced_test;

    #[test]
    fn lock_gives_exclusive_access() {
        let mutex = Arc::new(EntityMutex::new(0u64, Duration::from_secs(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*mutex.lock(), 8000);
    }

    #[test]
    fn is_locked_reflects_guard() {
        let mutex = EntityMutex::new((), Duration::from_secs(1));
        assert!(!mutex.is_locked());
        let guard = mutex.lock();
        assert!(mutex.is_locked());
        drop(guard);
        assert!(!mutex.is_locked());
    }

    #[test]
    #[traced_test]
    fn long_hold_is_reported() {
        let mutex = EntityMutex::new((), Duration::from_millis(1));
        {
            let _guard = mutex.lock();
            thread::sleep(Duration::from_millis(20));
        }
        assert!(logs_contain("held entity mutex for too long"));
    }
}
