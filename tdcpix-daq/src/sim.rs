//! In-process simulated driver.
//!
//! In auto mode each measurement runs on its own thread, deposits
//! pseudo-random events into every open pipe and reports completion when the
//! exposure has elapsed or an interrupt arrives. In manual mode nothing
//! happens on its own: tests inject events and fire completions explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tdcpix_core::pixels::{add_u32, lock_unpoisoned};
use tdcpix_core::{
    BufferAllocator, DeviceHandle, Error, HistogramVariant, ParamRecord, PipeDriver, PipeHandle,
    Result,
};

use crate::driver::{
    CompletionCallback, CompletionReason, DeviceProperties, Driver, DriverStatistics,
};

/// Events deposited per simulated measurement in auto mode.
pub const DEFAULT_EVENTS_PER_MEASUREMENT: usize = 20_000;

/// Calibration reported by the simulated device.
pub const SIM_PIXEL_SIZE_T_PS: f64 = 6.858_710_562_41;

/// Largest raw x/y coordinate produced by the simulator.
const RAW_XY_RANGE: u64 = 1024;
/// Raw time values span `0..2^32`.
const RAW_T_RANGE: u64 = 1 << 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Auto,
    Manual,
}

struct SimPipe {
    params: ParamRecord,
    allocator: Arc<dyn BufferAllocator>,
}

#[derive(Default)]
struct SimState {
    device: Option<DeviceHandle>,
    next_device: i32,
    next_pipe: i32,
    callback: Option<CompletionCallback>,
    pipes: HashMap<PipeHandle, SimPipe>,
    opened: HashMap<HistogramVariant, usize>,
    closed: HashMap<HistogramVariant, usize>,
    pipe_variants: HashMap<PipeHandle, HistogramVariant>,
    running: bool,
    interrupted: bool,
    starts: usize,
    interrupts: usize,
    rng: u64,
    common_shift: i64,
    stats: DriverStatistics,
}

struct Shared {
    mode: Mode,
    events_per_measurement: usize,
    state: Mutex<SimState>,
    wake: Condvar,
    fail_next_open: AtomicBool,
    fail_next_close: AtomicBool,
}

/// Simulated acquisition driver.
#[derive(Clone)]
pub struct SimDriver {
    shared: Arc<Shared>,
}

impl SimDriver {
    /// Auto mode with a deterministic event generator.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_mode(Mode::Auto, seed, DEFAULT_EVENTS_PER_MEASUREMENT)
    }

    /// Auto mode with a custom event count per measurement.
    #[must_use]
    pub fn with_events(seed: u64, events_per_measurement: usize) -> Self {
        Self::with_mode(Mode::Auto, seed, events_per_measurement)
    }

    /// Manual mode: completions only happen through [`SimDriver::complete`].
    #[must_use]
    pub fn manual() -> Self {
        Self::with_mode(Mode::Manual, 1, 0)
    }

    fn with_mode(mode: Mode, seed: u64, events_per_measurement: usize) -> Self {
        let state = SimState {
            next_device: 1,
            next_pipe: 1,
            rng: seed.max(1),
            ..SimState::default()
        };
        Self {
            shared: Arc::new(Shared {
                mode,
                events_per_measurement,
                state: Mutex::new(state),
                wake: Condvar::new(),
                fail_next_open: AtomicBool::new(false),
                fail_next_close: AtomicBool::new(false),
            }),
        }
    }

    /// Make the next `open_pipe` call fail.
    pub fn fail_next_open(&self) {
        self.shared.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Make the next `close_pipe` call fail and leave the pipe open.
    pub fn fail_next_close(&self) {
        self.shared.fail_next_close.store(true, Ordering::SeqCst);
    }

    /// Number of pipes opened for `variant` so far.
    #[must_use]
    pub fn opened(&self, variant: HistogramVariant) -> usize {
        self.lock().opened.get(&variant).copied().unwrap_or(0)
    }

    /// Number of pipes closed for `variant` so far.
    #[must_use]
    pub fn closed(&self, variant: HistogramVariant) -> usize {
        self.lock().closed.get(&variant).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn open_pipes(&self) -> usize {
        self.lock().pipes.len()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lock().device.is_some()
    }

    /// Number of `start_measure` calls.
    #[must_use]
    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    /// Number of `interrupt` calls.
    #[must_use]
    pub fn interrupts(&self) -> usize {
        self.lock().interrupts
    }

    /// Time shift applied to deposited events.
    #[must_use]
    pub fn common_shift(&self) -> i64 {
        self.lock().common_shift
    }

    /// Deposit raw `(x, y, t)` events into every open pipe.
    pub fn inject(&self, events: &[(i64, i64, i64)]) {
        deposit(&self.shared, events);
    }

    /// Finish the running measurement and invoke the completion callback on
    /// the calling thread.
    pub fn complete(&self, reason: CompletionReason) {
        let callback = {
            let mut st = self.lock();
            st.running = false;
            st.interrupted = false;
            st.stats.measurements += 1;
            st.callback.clone()
        };
        if let Some(callback) = callback {
            callback(reason);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        lock_unpoisoned(&self.shared.state)
    }
}

fn next_random(state: &mut u64) -> u64 {
    // xorshift64*
    let mut x = *state;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    *state = x;
    x.wrapping_mul(0x2545_F491_4F6C_DD1D)
}

#[allow(clippy::cast_possible_wrap)]
fn random_events(shared: &Shared) -> Vec<(i64, i64, i64)> {
    let mut st = lock_unpoisoned(&shared.state);
    let n = shared.events_per_measurement;
    let mut events = Vec::with_capacity(n);
    for _ in 0..n {
        // squared draw biases towards the detector centre
        let a = next_random(&mut st.rng) % RAW_XY_RANGE;
        let b = next_random(&mut st.rng) % RAW_XY_RANGE;
        let x = (a + b) / 2;
        let c = next_random(&mut st.rng) % RAW_XY_RANGE;
        let d = next_random(&mut st.rng) % RAW_XY_RANGE;
        let y = (c + d) / 2;
        let t = next_random(&mut st.rng) % RAW_T_RANGE;
        events.push((x as i64, y as i64, t as i64));
    }
    events
}

fn deposit(shared: &Shared, events: &[(i64, i64, i64)]) {
    let (shift, targets): (i64, Vec<(ParamRecord, Arc<dyn BufferAllocator>)>) = {
        let mut st = lock_unpoisoned(&shared.state);
        st.stats.events_received += events.len() as u64;
        let targets = st
            .pipes
            .values()
            .map(|p| (p.params, Arc::clone(&p.allocator)))
            .collect();
        (st.common_shift, targets)
    };
    for (params, allocator) in targets {
        if params.depth() != 32 {
            debug!("simulator skips {}-bit pipe", params.depth());
            continue;
        }
        allocator.with_buffer(&mut |buf| {
            for &(x, y, t) in events {
                if let Some(i) = params.bin_index(x, y, t + shift) {
                    if (i + 1) * 4 <= buf.len() {
                        add_u32(buf, i, 1);
                    }
                }
            }
        });
    }
}

fn run_measurement(shared: &Arc<Shared>, duration: Duration) {
    let deadline = Instant::now() + duration;
    let mut st = lock_unpoisoned(&shared.state);
    while !st.interrupted {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        st = match shared.wake.wait_timeout(st, deadline - now) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
    let reason = if st.interrupted {
        CompletionReason::UserInterrupt
    } else {
        CompletionReason::TimeElapsed
    };
    drop(st);

    let events = random_events(shared);
    deposit(shared, &events);

    let callback = {
        let mut st = lock_unpoisoned(&shared.state);
        st.running = false;
        st.interrupted = false;
        st.stats.measurements += 1;
        st.callback.clone()
    };
    if let Some(callback) = callback {
        callback(reason);
    }
}

impl PipeDriver for SimDriver {
    fn open_pipe(
        &self,
        device: DeviceHandle,
        params: &ParamRecord,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Result<PipeHandle> {
        if self.shared.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(Error::driver(-7, "simulated pipe open failure"));
        }
        let mut st = self.lock();
        if st.device != Some(device) {
            return Err(Error::driver(-1, format!("{device} is not initialized")));
        }
        let pipe = PipeHandle(st.next_pipe);
        st.next_pipe += 1;
        let variant = params.variant();
        *st.opened.entry(variant).or_default() += 1;
        st.pipe_variants.insert(pipe, variant);
        st.pipes.insert(
            pipe,
            SimPipe {
                params: *params,
                allocator,
            },
        );
        Ok(pipe)
    }

    fn close_pipe(&self, _device: DeviceHandle, pipe: PipeHandle) -> Result<()> {
        if self.shared.fail_next_close.swap(false, Ordering::SeqCst) {
            return Err(Error::driver(-8, "simulated pipe close failure"));
        }
        let mut st = self.lock();
        if st.pipes.remove(&pipe).is_none() {
            return Err(Error::driver(-2, format!("{pipe} is not open")));
        }
        if let Some(variant) = st.pipe_variants.remove(&pipe) {
            *st.closed.entry(variant).or_default() += 1;
        }
        Ok(())
    }
}

impl Driver for SimDriver {
    fn init(&self) -> Result<DeviceHandle> {
        let mut st = self.lock();
        if st.device.is_some() {
            return Err(Error::driver(-3, "device already initialized"));
        }
        let device = DeviceHandle(st.next_device);
        st.next_device += 1;
        st.device = Some(device);
        Ok(device)
    }

    fn deinit(&self, device: DeviceHandle) -> Result<()> {
        let mut st = self.lock();
        if st.device != Some(device) {
            return Err(Error::driver(-1, format!("{device} is not initialized")));
        }
        if st.running {
            return Err(Error::driver(-4, "measurement still running"));
        }
        if !st.pipes.is_empty() {
            warn!("deinit with {} pipes still open", st.pipes.len());
            st.pipes.clear();
            st.pipe_variants.clear();
        }
        st.device = None;
        st.callback = None;
        Ok(())
    }

    fn set_completion_callback(&self, device: DeviceHandle, callback: CompletionCallback) -> Result<()> {
        let mut st = self.lock();
        if st.device != Some(device) {
            return Err(Error::driver(-1, format!("{device} is not initialized")));
        }
        st.callback = Some(callback);
        Ok(())
    }

    fn start_measure(&self, device: DeviceHandle, duration_ms: u64) -> Result<()> {
        {
            let mut st = self.lock();
            if st.device != Some(device) {
                return Err(Error::driver(-1, format!("{device} is not initialized")));
            }
            if st.running {
                return Err(Error::driver(-5, "measurement already running"));
            }
            st.running = true;
            st.interrupted = false;
            st.starts += 1;
        }
        if self.shared.mode == Mode::Auto {
            let shared = Arc::clone(&self.shared);
            let duration = Duration::from_millis(duration_ms);
            thread::spawn(move || run_measurement(&shared, duration));
        }
        Ok(())
    }

    fn interrupt(&self, device: DeviceHandle) -> Result<()> {
        let mut st = self.lock();
        if st.device != Some(device) {
            return Err(Error::driver(-1, format!("{device} is not initialized")));
        }
        st.interrupts += 1;
        if st.running {
            st.interrupted = true;
            self.shared.wake.notify_all();
        }
        Ok(())
    }

    fn device_properties(&self, device: DeviceHandle) -> Result<DeviceProperties> {
        if self.lock().device != Some(device) {
            return Err(Error::driver(-1, format!("{device} is not initialized")));
        }
        Ok(DeviceProperties {
            pixel_size_t_ps: SIM_PIXEL_SIZE_T_PS,
            pixel_size_x_um: 0.0,
            pixel_size_y_um: 0.0,
        })
    }

    fn set_common_shift(&self, device: DeviceHandle, shift: i64) -> Result<()> {
        let mut st = self.lock();
        if st.device != Some(device) {
            return Err(Error::driver(-1, format!("{device} is not initialized")));
        }
        debug!("common shift {shift}");
        st.common_shift = shift;
        Ok(())
    }

    fn read_statistics(&self, device: DeviceHandle) -> Result<DriverStatistics> {
        let st = self.lock();
        if st.device != Some(device) {
            return Err(Error::driver(-1, format!("{device} is not initialized")));
        }
        Ok(st.stats)
    }
}
