//! Periodic ticker thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

/// Sleep slice used so a stop request is noticed quickly.
const STOP_POLL: Duration = Duration::from_millis(20);

/// Calls a function every `period` on its own thread until stopped.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    period_ms: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Start ticking. `tick` runs on the ticker thread.
    pub fn start<F>(period_ms: u64, tick: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let period = Arc::new(AtomicU64::new(period_ms.max(1)));
        let thread_stop = Arc::clone(&stop);
        let thread_period = Arc::clone(&period);
        let handle = thread::Builder::new()
            .name("tdcpix-ticker".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    let mut remaining = Duration::from_millis(thread_period.load(Ordering::SeqCst));
                    while !remaining.is_zero() && !thread_stop.load(Ordering::SeqCst) {
                        let step = remaining.min(STOP_POLL);
                        thread::sleep(step);
                        remaining = remaining.saturating_sub(step);
                    }
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    tick();
                }
                debug!("ticker stopped");
            })
            .ok();
        Self {
            stop,
            period_ms: period,
            handle,
        }
    }

    /// Change the period; takes effect from the next tick.
    pub fn set_period(&self, period_ms: u64) {
        self.period_ms.store(period_ms.max(1), Ordering::SeqCst);
    }

    #[must_use]
    pub fn period_ms(&self) -> u64 {
        self.period_ms.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.stop.load(Ordering::SeqCst)
    }

    /// Stop and join the thread. Must not be called from inside `tick`.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
