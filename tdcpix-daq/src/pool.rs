//! Small worker pool for attribute writes, projections and saves.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::error;
use tdcpix_core::pixels::lock_unpoisoned;

use crate::error::Result;

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn finish(&self) {
        let mut count = lock_unpoisoned(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Bounded rayon pool that tracks how many tasks are still running.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    in_flight: Arc<InFlight>,
}

impl WorkerPool {
    /// Build a pool with `threads` workers.
    ///
    /// # Errors
    /// `Pool` if rayon cannot start the threads.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("tdcpix-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// Run `task` on a worker. A panicking task is logged and swallowed.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *lock_unpoisoned(&self.in_flight.count) += 1;
        let in_flight = Arc::clone(&self.in_flight);
        self.pool.spawn(move || {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!("worker task {name} panicked");
            }
            in_flight.finish();
        });
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        *lock_unpoisoned(&self.in_flight.count)
    }

    /// Block until every submitted task has finished.
    pub fn wait_idle(&self) {
        let mut count = lock_unpoisoned(&self.in_flight.count);
        while *count > 0 {
            count = self
                .in_flight
                .idle
                .wait(count)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Like [`WorkerPool::wait_idle`] with a deadline. Returns whether the
    /// pool went idle in time.
    #[must_use]
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = lock_unpoisoned(&self.in_flight.count);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = match self.in_flight.idle.wait_timeout(count, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}
