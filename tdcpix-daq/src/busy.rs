//! Coalescing guard for long-running task classes.

use std::sync::{Arc, Mutex};

use tdcpix_core::pixels::lock_unpoisoned;

/// Busy flag checked and set under a short lock.
///
/// A second acquisition while the flag is held fails instead of waiting, so
/// overlapping refreshes are dropped rather than queued.
#[derive(Debug, Default)]
pub struct BusyFlag {
    busy: Mutex<bool>,
}

impl BusyFlag {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the flag, or `None` if a task already holds it.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<BusyGuard> {
        let mut busy = lock_unpoisoned(&self.busy);
        if *busy {
            return None;
        }
        *busy = true;
        Some(BusyGuard {
            flag: Arc::clone(self),
        })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        *lock_unpoisoned(&self.busy)
    }
}

/// Releases its flag on drop, including during unwinding.
#[derive(Debug)]
pub struct BusyGuard {
    flag: Arc<BusyFlag>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        *lock_unpoisoned(&self.flag.busy) = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_second_acquire_dropped() {
        let flag = BusyFlag::new();
        let guard = flag.try_acquire();
        assert!(guard.is_some());
        assert!(flag.try_acquire().is_none());
        drop(guard);
        assert!(!flag.is_busy());
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let flag = BusyFlag::new();
        let cloned = Arc::clone(&flag);
        let result = panic::catch_unwind(move || {
            let _guard = cloned.try_acquire();
            panic!("task failed");
        });
        assert!(result.is_err());
        assert!(!flag.is_busy());
    }
}
