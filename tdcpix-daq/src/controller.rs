//! Acquisition and accumulation lifecycle controller.
//!
//! The controller owns the histogram registry and drives it against a
//! [`Driver`]. Conflicting requests made while the hardware is measuring are
//! parked in [`PendingActions`] and resolved by the completion callback.
//!
//! Lock order: controller state, accumulation buffers, histograms, pixels.
//! Worker tasks never take the state lock while holding a histogram.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, error, info, warn};
use tdcpix_algorithms::{project_time, project_x, project_xy, project_y};
use tdcpix_core::pixels::{lock_unpoisoned, read_u32, write_u32};
use tdcpix_core::{
    Attribute, DeviceBinding, DeviceHandle, HistogramBuffer, PipeDriver, TimeUnit,
};
use tdcpix_io::{
    format_bytesize, save_cube_tiff, save_spectrum_text, save_xy_text, save_xy_tiff,
    write_measurement_info, ActiveOutputs, FileCounter, MeasurementInfo, SaveKind, SaveNaming,
    SpectrumHeader,
};
#[cfg(feature = "hdf5")]
use tdcpix_io::save_cube_hdf5;

use crate::busy::BusyFlag;
use crate::config::ControllerConfig;
use crate::driver::{CompletionCallback, CompletionReason, Driver, DriverStatistics};
use crate::error::{Error, Result};
use crate::pending::{AttributeWrite, PendingAction, PendingActions};
use crate::pool::WorkerPool;
use crate::registry::{
    linked_views, HistogramKind, HistogramRegistry, RegisteredHistogram, ACCU_T, ACCU_VIEWS,
    ACCU_XT, ACCU_XY, ACCU_XYT, ACCU_YT, FULL_COUNTS, FULL_T, LIVE_CYCLE, LIVE_XT, LIVE_XY, LIVE_YT,
    USER_T,
};
use crate::ticker::Ticker;

/// Count-rate evaluation period.
const COUNT_RATE_PERIOD: Duration = Duration::from_secs(1);

/// Quantile reported next to the maximum for images.
const IMAGE_QUANTILE: f64 = 0.998;

/// Driver session health as shown to operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Off,
    On,
    Fault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Unbound,
    Idle,
    Acquiring,
    Accumulating,
}

/// Notifications for subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum ControllerEvent {
    FrameUpdated {
        name: String,
        width: u64,
        height: u64,
    },
    AccumulationStopped,
    Saved {
        path: PathBuf,
    },
    Message(String),
    StateChanged(ControllerState),
}

/// What happened to an attribute write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Submitted to the worker pool.
    Scheduled,
    /// Queued until the running measurement completes.
    Deferred,
    /// Dropped because accumulation is running.
    Rejected,
    /// Attribute is not writable on that histogram.
    Ignored,
}

/// Accumulation saves that run on a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveMode {
    CubeTiff,
    XyTiff,
    XyText,
    /// `[t][y][x]` dataset of the whole cube.
    #[cfg(feature = "hdf5")]
    CubeHdf5,
}

impl SaveMode {
    #[must_use]
    pub fn kind(self) -> SaveKind {
        match self {
            SaveMode::CubeTiff => SaveKind::CubeTiff,
            SaveMode::XyTiff => SaveKind::XyTiff,
            SaveMode::XyText => SaveKind::XyText,
            #[cfg(feature = "hdf5")]
            SaveMode::CubeHdf5 => SaveKind::CubeHdf5,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageStatistics {
    pub max: u32,
    pub q998: u32,
}

/// Helper values tying the user spectrum's offset to its binning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserSpectrumLinks {
    /// Time offset in unbinned units.
    pub raw_toff: i64,
    /// Modulo in binned units.
    pub modulo_binned: i64,
    /// Keep `raw_toff` when the binning changes.
    pub raw_toff_fixed: bool,
}

struct TickTimers {
    live: Instant,
    rate: Instant,
    accu_preview: Instant,
}

impl TickTimers {
    fn new(now: Instant) -> Self {
        Self {
            live: now,
            rate: now,
            accu_preview: now,
        }
    }
}

struct ControlState {
    device: Option<DeviceHandle>,
    device_state: DeviceState,
    acquisition_running: bool,
    accumulation_running: bool,
    accumulating_visible: bool,
    user_acq: bool,
    user_accu: bool,
    pending: PendingActions,
    save_after: Option<SaveMode>,
    accumulated: Duration,
    single: Duration,
    accumulation_last: Instant,
    time_axes_initialized: bool,
    time_axis_unit: TimeUnit,
    pixel_size_t_ps: f64,
    last_statistics: Option<DriverStatistics>,
    file_counter: FileCounter,
    counts_per_sec: f64,
    exposure_live_ms: u64,
    exposure_accu_ms: u64,
    accu_preview_refresh_ms: u64,
    ticker_period_ms: u64,
    integration_duration: Duration,
    image_stats: HashMap<&'static str, ImageStatistics>,
    timers: TickTimers,
}

impl ControlState {
    fn controller_state(&self) -> ControllerState {
        if self.device.is_none() {
            ControllerState::Unbound
        } else if self.accumulation_running {
            ControllerState::Accumulating
        } else if self.acquisition_running || self.user_acq {
            ControllerState::Acquiring
        } else {
            ControllerState::Idle
        }
    }
}

/// Orchestrates the named histograms against the acquisition driver.
pub struct AcquisitionController {
    config: ControllerConfig,
    driver: Arc<dyn Driver>,
    pipes: Arc<dyn PipeDriver>,
    state: Mutex<ControlState>,
    registry: HistogramRegistry,
    accu_lock: Mutex<()>,
    user_links: Mutex<UserSpectrumLinks>,
    cube_bytes: AtomicU64,
    pool: WorkerPool,
    live_busy: Arc<BusyFlag>,
    accu_busy: Arc<BusyFlag>,
    save_busy: Arc<BusyFlag>,
    subscribers: Mutex<Vec<Sender<ControllerEvent>>>,
    ticker: Mutex<Option<Ticker>>,
    self_ref: Weak<Self>,
}

impl AcquisitionController {
    /// Build the controller and its histograms.
    ///
    /// # Errors
    /// Invalid configuration or a worker pool that cannot start.
    pub fn new<D: Driver + 'static>(config: ControllerConfig, driver: Arc<D>) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = WorkerPool::new(config.worker_threads)?;
        let registry = HistogramRegistry::new(&config);
        let cube_bytes = registry
            .lock(ACCU_XYT)
            .and_then(|cube| cube.required_bytes().ok())
            .unwrap_or(0) as u64;
        let pipes: Arc<dyn PipeDriver> = driver.clone();
        let driver: Arc<dyn Driver> = driver;
        let now = Instant::now();
        let state = ControlState {
            device: None,
            device_state: DeviceState::Off,
            acquisition_running: false,
            accumulation_running: false,
            accumulating_visible: false,
            user_acq: false,
            user_accu: false,
            pending: PendingActions::new(),
            save_after: None,
            accumulated: Duration::ZERO,
            single: Duration::ZERO,
            accumulation_last: now,
            time_axes_initialized: false,
            time_axis_unit: config.time_axis_unit,
            pixel_size_t_ps: config.pixel_size_t_ps,
            last_statistics: None,
            file_counter: FileCounter::new(config.file_counter),
            counts_per_sec: 0.0,
            exposure_live_ms: config.exposure_live_ms,
            exposure_accu_ms: config.exposure_accu_ms,
            accu_preview_refresh_ms: config.accu_preview_refresh_ms,
            ticker_period_ms: config.ticker_period_ms.max(1),
            integration_duration: Duration::ZERO,
            image_stats: HashMap::new(),
            timers: TickTimers::new(now),
        };
        Ok(Arc::new_cyclic(|weak| Self {
            config,
            driver,
            pipes,
            state: Mutex::new(state),
            registry,
            accu_lock: Mutex::new(()),
            user_links: Mutex::new(UserSpectrumLinks::default()),
            cube_bytes: AtomicU64::new(cube_bytes),
            pool,
            live_busy: BusyFlag::new(),
            accu_busy: BusyFlag::new(),
            save_busy: BusyFlag::new(),
            subscribers: Mutex::new(Vec::new()),
            ticker: Mutex::new(None),
            self_ref: weak.clone(),
        }))
    }

    fn lock_state(&self) -> MutexGuard<'_, ControlState> {
        lock_unpoisoned(&self.state)
    }

    fn emit(&self, event: &ControllerEvent) {
        lock_unpoisoned(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_state(&self, st: &ControlState) {
        self.emit(&ControllerEvent::StateChanged(st.controller_state()));
    }

    /// Receive controller events from now on.
    pub fn subscribe(&self) -> Receiver<ControllerEvent> {
        let (tx, rx) = channel();
        lock_unpoisoned(&self.subscribers).push(tx);
        rx
    }

    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &HistogramRegistry {
        &self.registry
    }

    fn entry(&self, name: &str) -> Result<&RegisteredHistogram> {
        self.registry
            .get(name)
            .ok_or_else(|| Error::UnknownHistogram(name.to_string()))
    }

    // ---------------------------------------------------------------------
    // Binding
    // ---------------------------------------------------------------------

    /// Open the driver session and attach every histogram to it.
    ///
    /// # Errors
    /// `AlreadyBound`, or the driver error; the device state is then `Fault`.
    pub fn bind(&self) -> Result<()> {
        let mut st = self.lock_state();
        if st.device.is_some() {
            return Err(Error::AlreadyBound);
        }
        let device = match self.driver.init() {
            Ok(device) => device,
            Err(e) => {
                error!("driver init failed: {e}");
                st.device_state = DeviceState::Fault;
                return Err(e.into());
            }
        };
        let weak = self.self_ref.clone();
        let callback: CompletionCallback = Arc::new(move |reason| {
            if let Some(controller) = weak.upgrade() {
                controller.handle_completion(reason);
            }
        });
        if let Err(e) = self.driver.set_completion_callback(device, callback) {
            error!("registering completion callback failed: {e}");
            let _ = self.driver.deinit(device);
            st.device_state = DeviceState::Fault;
            return Err(e.into());
        }

        let binding = DeviceBinding::new(device, Arc::clone(&self.pipes));
        for entry in self.registry.iter() {
            let mut hist = entry.lock();
            if let Err(e) = hist.set_device(Some(binding.clone())) {
                error!("{}: binding failed: {e}", entry.name());
                continue;
            }
            let active = !entry.is_pipeless() && entry.kind() != HistogramKind::AccumulationCube;
            if let Err(e) = hist.set_active(active) {
                error!("{}: activating pipe failed: {e}", entry.name());
            }
        }

        match self.driver.device_properties(device) {
            Ok(props) if props.pixel_size_t_ps > 0.0 => st.pixel_size_t_ps = props.pixel_size_t_ps,
            Ok(_) => st.pixel_size_t_ps = self.config.pixel_size_t_ps,
            Err(e) => warn!("reading device properties failed: {e}"),
        }
        st.device = Some(device);
        st.device_state = DeviceState::On;
        st.time_axes_initialized = false;
        st.timers = TickTimers::new(Instant::now());
        info!("bound to {device}");
        self.emit_state(&st);
        Ok(())
    }

    /// Detach every histogram and close the driver session.
    ///
    /// While a measurement is running the session is only released once the
    /// driver reports completion.
    ///
    /// # Errors
    /// `NotBound`.
    pub fn unbind(&self) -> Result<()> {
        let mut st = self.lock_state();
        let Some(device) = st.device else {
            return Err(Error::NotBound);
        };
        if st.pending.unbind_pending() {
            return Ok(());
        }
        for entry in self.registry.iter() {
            let mut hist = entry.lock();
            if let Err(e) = hist.set_active(false) {
                warn!("{}: closing pipe failed: {e}", entry.name());
            }
            if let Err(e) = hist.set_device(None) {
                warn!("{}: unbinding failed: {e}", entry.name());
            }
        }
        st.user_acq = false;
        st.user_accu = false;
        st.accumulation_running = false;
        st.accumulating_visible = false;
        if st.acquisition_running {
            info!("unbind deferred until the measurement completes");
            st.pending.request_unbind();
            self.interrupt(device);
            return Ok(());
        }
        self.release_device(&mut st, device);
        Ok(())
    }

    fn release_device(&self, st: &mut ControlState, device: DeviceHandle) {
        match self.driver.deinit(device) {
            Ok(()) => {
                info!("released {device}");
                st.device_state = DeviceState::Off;
            }
            Err(e) => {
                error!("driver deinit failed: {e}");
                st.device_state = DeviceState::Fault;
            }
        }
        st.device = None;
        st.acquisition_running = false;
        st.accumulation_running = false;
        st.accumulating_visible = false;
        st.user_acq = false;
        st.user_accu = false;
        self.emit_state(st);
    }

    fn interrupt(&self, device: DeviceHandle) {
        if let Err(e) = self.driver.interrupt(device) {
            error!("driver interrupt failed: {e}");
        }
    }

    fn bound_device(st: &ControlState) -> Result<DeviceHandle> {
        match st.device {
            Some(device) if !st.pending.unbind_pending() => Ok(device),
            _ => Err(Error::NotBound),
        }
    }

    fn start_measurement(&self, st: &mut ControlState) {
        let Some(device) = st.device else {
            return;
        };
        match self
            .driver
            .start_measure(device, self.config.measurement_quantum_ms)
        {
            Ok(()) => st.acquisition_running = true,
            Err(e) => {
                error!("starting measurement failed: {e}");
                st.acquisition_running = false;
                st.device_state = DeviceState::Fault;
                self.emit(&ControllerEvent::Message(format!("measurement failed: {e}")));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Acquisition and accumulation
    // ---------------------------------------------------------------------

    /// Start the live measurement loop.
    ///
    /// # Errors
    /// `NotBound`.
    pub fn acquisition_start(&self) -> Result<()> {
        let mut st = self.lock_state();
        Self::bound_device(&st)?;
        st.user_acq = true;
        if !st.acquisition_running {
            self.start_measurement(&mut st);
        }
        info!("acquisition started");
        self.emit_state(&st);
        Ok(())
    }

    /// Stop the live loop unless accumulation still needs the hardware.
    pub fn acquisition_stop(&self) {
        let mut st = self.lock_state();
        st.user_acq = false;
        if st.acquisition_running && !st.user_accu {
            if let Some(device) = st.device {
                self.interrupt(device);
            }
        }
        info!("acquisition stop requested");
        self.emit_state(&st);
    }

    /// Clear the accumulation buffers and start integrating.
    ///
    /// # Errors
    /// `NotBound`.
    pub fn accumulation_start(&self) -> Result<()> {
        self.request_accumulation(true)
    }

    /// Resume integrating into the existing accumulation buffers.
    ///
    /// # Errors
    /// `NotBound`.
    pub fn accumulation_continue(&self) -> Result<()> {
        self.request_accumulation(false)
    }

    /// Start a fresh accumulation and save it once the target time is reached.
    ///
    /// # Errors
    /// `NotBound`.
    pub fn accumulation_start_and_save(&self, mode: SaveMode) -> Result<()> {
        self.lock_state().save_after = Some(mode);
        self.accumulation_start()
    }

    fn request_accumulation(&self, clear: bool) -> Result<()> {
        let mut st = self.lock_state();
        let device = Self::bound_device(&st)?;
        st.accumulating_visible = true;
        st.user_acq = false;
        st.user_accu = true;
        if st.acquisition_running {
            if clear {
                st.pending.request_start_accumulation();
            } else {
                st.pending.request_continue_accumulation();
            }
            self.interrupt(device);
            return Ok(());
        }
        self.begin_accumulation(&mut st, clear);
        Ok(())
    }

    fn begin_accumulation(&self, st: &mut ControlState, clear: bool) {
        if let Some(mut cube) = self.registry.lock(ACCU_XYT) {
            if let Err(e) = cube.set_active(true) {
                error!("activating the accumulation cube failed: {e}");
                st.accumulating_visible = false;
                st.user_accu = false;
                self.emit(&ControllerEvent::Message(format!("accumulation failed: {e}")));
                self.emit_state(st);
                return;
            }
            if clear {
                cube.clear_buffer();
            }
            self.cube_bytes
                .store(cube.required_bytes().unwrap_or(0) as u64, Ordering::Relaxed);
        }
        if clear {
            for name in [FULL_T, USER_T] {
                if let Some(mut hist) = self.registry.lock(name) {
                    hist.zero_accumulation();
                }
            }
            st.accumulated = Duration::ZERO;
        }
        st.single = Duration::ZERO;
        st.accumulation_last = Instant::now();
        st.file_counter.advance();
        st.accumulation_running = true;
        st.accumulating_visible = true;
        self.start_measurement(st);
        info!(
            "accumulation {} (file counter {:03})",
            if clear { "started" } else { "continued" },
            st.file_counter.value()
        );
        self.emit_state(st);
    }

    /// Stop accumulating; the cube pipe closes once the driver is idle.
    pub fn accumulation_stop(&self) {
        let mut st = self.lock_state();
        if st.acquisition_running {
            st.pending.request_close_pipe();
        } else if let Some(mut cube) = self.registry.lock(ACCU_XYT) {
            if let Err(e) = cube.set_active(false) {
                warn!("{ACCU_XYT}: closing pipe failed: {e}");
            }
        }
        st.pending.cancel_accumulation();
        st.accumulation_running = false;
        st.accumulating_visible = false;
        st.user_accu = false;
        st.user_acq = false;
        if st.acquisition_running {
            if let Some(device) = st.device {
                self.interrupt(device);
            }
        }
        info!(
            "accumulation stopped after {} ms",
            st.accumulated.as_millis()
        );
        self.emit(&ControllerEvent::AccumulationStopped);
        self.emit_state(&st);
    }

    // ---------------------------------------------------------------------
    // Completion
    // ---------------------------------------------------------------------

    /// Driver completion entry point.
    ///
    /// Resolves deferred actions in priority order and restarts the
    /// measurement when the user still wants live data or accumulation.
    pub fn handle_completion(&self, reason: CompletionReason) {
        match reason {
            CompletionReason::EarlyNotification => return,
            CompletionReason::BufferFull => warn!("driver buffer full"),
            CompletionReason::TimeElapsed | CompletionReason::UserInterrupt => {}
        }
        debug!("measurement completed: {reason}");
        let mut st = self.lock_state();
        st.acquisition_running = false;
        st.pending.request_statistics();
        for action in st.pending.take_batch() {
            match action {
                PendingAction::ClosePipe => {
                    if let Some(mut cube) = self.registry.lock(ACCU_XYT) {
                        if let Err(e) = cube.set_active(false) {
                            warn!("{ACCU_XYT}: closing pipe failed: {e}");
                        }
                    }
                }
                PendingAction::Unbind => {
                    if let Some(device) = st.device {
                        self.release_device(&mut st, device);
                    }
                    return;
                }
                PendingAction::ReadStatistics => {
                    if let Some(device) = st.device {
                        match self.driver.read_statistics(device) {
                            Ok(stats) => st.last_statistics = Some(stats),
                            Err(e) => warn!("reading driver statistics failed: {e}"),
                        }
                    }
                }
                PendingAction::Write(write) => self.apply_write(&write),
                PendingAction::StartAccumulation => {
                    self.begin_accumulation(&mut st, true);
                    return;
                }
                PendingAction::ContinueAccumulation => {
                    self.begin_accumulation(&mut st, false);
                    return;
                }
            }
        }
        if st.device.is_some() && (st.user_acq || st.user_accu) {
            self.start_measurement(&mut st);
        } else {
            self.emit_state(&st);
        }
    }

    // ---------------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------------

    /// Write a ROI, binning or modulo attribute.
    ///
    /// Driver-backed histograms refuse writes while accumulating and defer
    /// them while a measurement runs. Everything else is applied on a worker.
    ///
    /// # Errors
    /// `UnknownHistogram`.
    pub fn write_attribute(&self, name: &str, attr: Attribute, value: i64) -> Result<WriteOutcome> {
        let entry = self.entry(name)?;
        if !entry.is_exposed(attr) {
            debug!("{name}: {attr} is not writable");
            return Ok(WriteOutcome::Ignored);
        }
        let write = AttributeWrite::new(entry.name(), attr, value);
        if !entry.is_pipeless() {
            let mut st = self.lock_state();
            if st.accumulation_running {
                debug!("{name}: {attr}={value} rejected during accumulation");
                return Ok(WriteOutcome::Rejected);
            }
            if st.acquisition_running {
                st.pending.push_write(write);
                if let Some(device) = st.device {
                    self.interrupt(device);
                }
                return Ok(WriteOutcome::Deferred);
            }
        }
        let Some(this) = self.self_ref.upgrade() else {
            return Ok(WriteOutcome::Ignored);
        };
        self.pool.spawn("attribute write", move || this.apply_write(&write));
        Ok(WriteOutcome::Scheduled)
    }

    /// Write by string identifiers; unknown attributes are ignored.
    ///
    /// # Errors
    /// `UnknownHistogram`.
    pub fn write_attribute_by_name(&self, name: &str, id: &str, value: i64) -> Result<WriteOutcome> {
        match Attribute::parse(id) {
            Some(attr) => self.write_attribute(name, attr, value),
            None => {
                self.entry(name)?;
                debug!("{name}: unknown attribute {id}");
                Ok(WriteOutcome::Ignored)
            }
        }
    }

    /// Current value of an attribute.
    ///
    /// # Errors
    /// `UnknownHistogram`.
    pub fn read_attribute(&self, name: &str, attr: Attribute) -> Result<i64> {
        Ok(self.entry(name)?.lock().get(attr))
    }

    fn apply_write(&self, write: &AttributeWrite) {
        let Some(entry) = self.registry.get(&write.histogram) else {
            return;
        };
        let _accu = entry
            .is_accumulation()
            .then(|| lock_unpoisoned(&self.accu_lock));
        let (attr, value) = (write.attribute, write.value);
        let mut hist = entry.lock();
        if entry.name() == USER_T {
            self.apply_user_write(&mut hist, attr, value);
            return;
        }
        if let Err(e) = hist.set(attr, value) {
            error!("{}: {attr}={value} failed: {e}", entry.name());
        }
        if entry.name() != ACCU_XYT {
            return;
        }
        let (t1, t2) = (hist.get(Attribute::RoiT1), hist.get(Attribute::RoiT2));
        self.cube_bytes
            .store(hist.required_bytes().unwrap_or(0) as u64, Ordering::Relaxed);
        drop(hist);
        for name in linked_views(attr) {
            let Some(mut view) = self.registry.lock(name) else {
                continue;
            };
            let result = match attr {
                Attribute::RoiTOffset | Attribute::RoiTSize => view
                    .set(Attribute::RoiT1, t1)
                    .and_then(|()| view.set(Attribute::RoiT2, t2)),
                _ => view.set(attr, value),
            };
            if let Err(e) = result {
                warn!("{name}: linked {attr} failed: {e}");
            }
        }
    }

    fn apply_user_write(&self, hist: &mut HistogramBuffer, attr: Attribute, value: i64) {
        let mut links = lock_unpoisoned(&self.user_links);
        let result = match attr {
            Attribute::BinT if value >= 1 => {
                if links.raw_toff_fixed {
                    hist.set(Attribute::BinT, value)
                        .and_then(|()| hist.set(Attribute::RoiTOffset, links.raw_toff / value))
                } else {
                    links.raw_toff = hist.get(Attribute::RoiT1).saturating_mul(value);
                    hist.set(Attribute::BinT, value)
                }
            }
            _ => hist.set(attr, value),
        };
        if let Err(e) = result {
            error!("{USER_T}: {attr}={value} failed: {e}");
        }
        let bint = hist.binning().t.max(1);
        match attr {
            Attribute::RoiTOffset => links.raw_toff = bint.saturating_mul(hist.get(Attribute::RoiT1)),
            Attribute::Modulo => links.modulo_binned = hist.modulo() / bint,
            _ => {}
        }
    }

    #[must_use]
    pub fn user_spectrum_links(&self) -> UserSpectrumLinks {
        *lock_unpoisoned(&self.user_links)
    }

    /// Keep the user spectrum's unbinned offset fixed across binning changes.
    pub fn set_user_raw_toff_fixed(&self, fixed: bool) {
        lock_unpoisoned(&self.user_links).raw_toff_fixed = fixed;
    }

    /// Byte size of the accumulation cube, raw and formatted.
    #[must_use]
    pub fn accumulation_cube_size(&self) -> (u64, String) {
        let bytes = self.cube_bytes.load(Ordering::Relaxed);
        (bytes, format_bytesize(bytes, 2))
    }

    // ---------------------------------------------------------------------
    // Ticker
    // ---------------------------------------------------------------------

    /// Start the periodic ticker thread if it is not running.
    pub fn start_ticker(&self) {
        let mut ticker = lock_unpoisoned(&self.ticker);
        if ticker.is_some() {
            return;
        }
        let period = self.lock_state().ticker_period_ms;
        let weak = self.self_ref.clone();
        *ticker = Some(Ticker::start(period, move || {
            if let Some(controller) = weak.upgrade() {
                controller.tick_at(Instant::now());
            }
        }));
    }

    pub fn stop_ticker(&self) {
        let ticker = lock_unpoisoned(&self.ticker).take();
        drop(ticker);
    }

    pub fn set_ticker_period(&self, period_ms: u64) {
        let period_ms = period_ms.max(1);
        self.lock_state().ticker_period_ms = period_ms;
        if let Some(ticker) = lock_unpoisoned(&self.ticker).as_ref() {
            ticker.set_period(period_ms);
        }
    }

    /// One ticker pass at `now`. Each sub-task checks its own due time.
    pub fn tick_at(&self, now: Instant) {
        self.live_tick(now);
        self.count_rate_tick(now);
        self.accu_preview_tick(now);
        self.accumulated_time_tick(now);
    }

    fn live_tick(&self, now: Instant) {
        let mut st = self.lock_state();
        if st.device.is_none() {
            return;
        }
        if now.saturating_duration_since(st.timers.live) < Duration::from_millis(st.exposure_live_ms) {
            return;
        }
        st.timers.live = now;
        let Some(guard) = self.live_busy.try_acquire() else {
            debug!("live refresh busy, tick dropped");
            return;
        };
        let axes = (!st.time_axes_initialized).then_some(st.pixel_size_t_ps);
        st.time_axes_initialized = true;
        let accumulating = st.accumulation_running;
        drop(st);
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        self.pool.spawn("live refresh", move || {
            let _guard = guard;
            this.live_refresh(axes, accumulating);
        });
    }

    fn live_refresh(&self, init_axes: Option<f64>, accumulating: bool) {
        if let Some(pixel_size_ps) = init_axes {
            // ordered with set_time_axis_unit through the state lock
            let st = self.lock_state();
            self.registry.init_time_axes(pixel_size_ps, st.time_axis_unit);
        }
        let mut stats = Vec::new();
        for name in LIVE_CYCLE.iter().chain(std::iter::once(&USER_T)) {
            let Some(mut hist) = self.registry.lock(name) else {
                continue;
            };
            hist.perform_active_outputs();
            if matches!(*name, LIVE_XY | LIVE_XT | LIVE_YT) {
                let q998 = hist.stat_quantile(IMAGE_QUANTILE);
                stats.push((
                    *name,
                    ImageStatistics {
                        max: hist.stat_max(),
                        q998,
                    },
                ));
            }
            if accumulating {
                hist.add_to_accumulation();
            }
            let (width, height) = (hist.width(), hist.height());
            hist.clear_buffer();
            drop(hist);
            self.emit(&ControllerEvent::FrameUpdated {
                name: (*name).to_string(),
                width,
                height,
            });
        }
        self.write_timestamp("live");
        self.lock_state().image_stats.extend(stats);
    }

    fn write_timestamp(&self, sub: &str) {
        let Some(dir) = &self.config.preview_dir else {
            return;
        };
        let path = dir.join(sub).join("timestamp");
        let millis = Local::now().timestamp_millis();
        let result = fs::create_dir_all(dir.join(sub)).and_then(|()| fs::write(&path, millis.to_ne_bytes()));
        if let Err(e) = result {
            warn!("writing {} failed: {e}", path.display());
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn count_rate_tick(&self, now: Instant) {
        let mut st = self.lock_state();
        let delta = now.saturating_duration_since(st.timers.rate);
        if delta < COUNT_RATE_PERIOD {
            return;
        }
        st.timers.rate = now;
        let counts = self.registry.lock(FULL_COUNTS).map_or(0, |hist| {
            let mut pixels = hist.lock_pixels();
            if pixels.len() < 4 {
                return 0;
            }
            let v = read_u32(&pixels, 0);
            write_u32(&mut pixels, 0, 0);
            v
        });
        st.counts_per_sec = f64::from(counts) * 1000.0 / delta.as_millis() as f64;
    }

    fn accu_preview_tick(&self, now: Instant) {
        let mut st = self.lock_state();
        let period = st.accu_preview_refresh_ms;
        if period == 0 {
            return;
        }
        if now.saturating_duration_since(st.timers.accu_preview) < Duration::from_millis(period) {
            return;
        }
        st.timers.accu_preview = now;
        if !self.registry.lock(ACCU_XYT).is_some_and(|cube| cube.has_buffer()) {
            return;
        }
        let Some(guard) = self.accu_busy.try_acquire() else {
            debug!("accumulation preview busy, tick dropped");
            return;
        };
        drop(st);
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        self.pool.spawn("accumulation preview", move || {
            let _guard = guard;
            this.refresh_accumulation_views();
        });
    }

    /// Project the accumulation cube into its four views.
    ///
    /// Each view integrates over its own exposed range, taken relative to
    /// the cube's ROI and converted to half-open bounds.
    pub fn refresh_accumulation_views(&self) {
        let started = Instant::now();
        let mut frames = Vec::new();
        let mut stats = Vec::new();
        {
            let _accu = lock_unpoisoned(&self.accu_lock);
            let Some(cube) = self.registry.lock(ACCU_XYT) else {
                return;
            };
            if !cube.has_buffer() {
                return;
            }
            let base_x = cube.abscissa_offset();
            let base_y = cube.ordinate_offset();
            let base_t = cube.z_offset();
            let half_open = |lo: i64, hi: i64, base: i64| {
                (lo.saturating_sub(base), hi.saturating_sub(base).saturating_add(1))
            };

            for name in ACCU_VIEWS {
                let Some(mut view) = self.registry.lock(name) else {
                    continue;
                };
                let result = match name {
                    ACCU_XY => {
                        let (t1, t2) = half_open(view.get(Attribute::RoiT1), view.get(Attribute::RoiT2), base_t);
                        project_time(&cube, &mut view, t1, t2)
                    }
                    ACCU_XT => {
                        let (y1, y2) = half_open(view.get(Attribute::RoiY1), view.get(Attribute::RoiY2), base_y);
                        project_y(&cube, &mut view, y1, y2)
                    }
                    ACCU_YT => {
                        let (x1, x2) = half_open(view.get(Attribute::RoiX1), view.get(Attribute::RoiX2), base_x);
                        project_x(&cube, &mut view, x1, x2)
                    }
                    _ => {
                        let xs = half_open(view.get(Attribute::RoiX1), view.get(Attribute::RoiX2), base_x);
                        let ys = half_open(view.get(Attribute::RoiY1), view.get(Attribute::RoiY2), base_y);
                        project_xy(&cube, &mut view, xs, ys)
                    }
                };
                if let Err(e) = result {
                    warn!("{name}: projection failed: {e}");
                    continue;
                }
                if let Err(e) = view.write_file() {
                    warn!("{name}: preview file failed: {e}");
                }
                view.write_output();
                if name != ACCU_T {
                    view.update_statistics();
                    let q998 = view.stat_quantile(IMAGE_QUANTILE);
                    stats.push((
                        name,
                        ImageStatistics {
                            max: view.stat_max(),
                            q998,
                        },
                    ));
                }
                frames.push((name, view.width(), view.height()));
            }
        }
        self.write_timestamp("accu");
        for (name, width, height) in frames {
            self.emit(&ControllerEvent::FrameUpdated {
                name: name.to_string(),
                width,
                height,
            });
        }
        let mut st = self.lock_state();
        st.image_stats.extend(stats);
        st.integration_duration = started.elapsed();
    }

    fn accumulated_time_tick(&self, now: Instant) {
        let mut st = self.lock_state();
        let delta = now.saturating_duration_since(st.accumulation_last);
        st.accumulation_last = now;
        if !st.accumulation_running {
            return;
        }
        st.accumulated += delta;
        st.single += delta;
        if st.single < Duration::from_millis(st.exposure_accu_ms) {
            return;
        }
        info!("accumulation target of {} ms reached", st.exposure_accu_ms);
        let save = st.save_after.take();
        drop(st);
        self.accumulation_stop();
        if let Some(mode) = save {
            self.save(mode);
        }
    }

    // ---------------------------------------------------------------------
    // Saving
    // ---------------------------------------------------------------------

    fn naming(&self) -> SaveNaming {
        SaveNaming::new(&self.config.save_dir, self.config.save_filename.clone())
    }

    /// Save the accumulation cube as a float TIFF stack on a worker.
    /// Returns `false` if another save is still running.
    pub fn save_cube_tiff(&self) -> bool {
        self.save(SaveMode::CubeTiff)
    }

    /// Save the accumulated XY image as a single-page TIFF on a worker.
    pub fn save_xy_tiff(&self) -> bool {
        self.save(SaveMode::XyTiff)
    }

    /// Save the accumulated XY image as a text matrix on a worker.
    pub fn save_xy_text(&self) -> bool {
        self.save(SaveMode::XyText)
    }

    /// Save the accumulation cube as an HDF5 dataset on a worker.
    #[cfg(feature = "hdf5")]
    pub fn save_cube_hdf5(&self) -> bool {
        self.save(SaveMode::CubeHdf5)
    }

    fn save(&self, mode: SaveMode) -> bool {
        let Some(guard) = self.save_busy.try_acquire() else {
            debug!("save busy, {mode:?} dropped");
            return false;
        };
        let Some(this) = self.self_ref.upgrade() else {
            return false;
        };
        self.pool.spawn("save", move || {
            let _guard = guard;
            match this.run_save(mode) {
                Ok(path) => {
                    info!("saved {}", path.display());
                    this.emit(&ControllerEvent::Saved { path });
                }
                Err(e) => {
                    error!("{mode:?} save failed: {e}");
                    this.emit(&ControllerEvent::Message(format!("save failed: {e}")));
                }
            }
        });
        true
    }

    fn save_target(&self, kind: SaveKind) -> Result<(PathBuf, String, u64)> {
        let naming = self.naming();
        let dir = naming.today_directory();
        fs::create_dir_all(&dir)?;
        let st = self.lock_state();
        let file_name = naming.file_name(st.file_counter.value(), kind);
        Ok((dir, file_name, st.accumulated.as_millis() as u64))
    }

    fn run_save(&self, mode: SaveMode) -> Result<PathBuf> {
        let kind = mode.kind();
        let (dir, file_name, accumulated_ms) = self.save_target(kind)?;
        let path = {
            let _accu = lock_unpoisoned(&self.accu_lock);
            match mode {
                SaveMode::CubeTiff => {
                    let cube = self.entry(ACCU_XYT)?.lock();
                    save_cube_tiff(&dir, &file_name, &cube, None)?
                }
                SaveMode::XyTiff => save_xy_tiff(&dir, &file_name, &self.entry(ACCU_XY)?.lock())?,
                SaveMode::XyText => save_xy_text(&dir, &file_name, &self.entry(ACCU_XY)?.lock())?,
                #[cfg(feature = "hdf5")]
                SaveMode::CubeHdf5 => {
                    let path = dir.join(&file_name);
                    save_cube_hdf5(&path, &self.entry(ACCU_XYT)?.lock())?;
                    path
                }
            }
        };
        let info = {
            let cube = self.entry(ACCU_XYT)?.lock();
            MeasurementInfo {
                file_name,
                directory: dir,
                accumulated_ms,
                binning: cube.binning(),
                roi: cube.roi(),
                modulo: cube.modulo(),
            }
        };
        write_measurement_info(&info)?;
        self.lock_state().file_counter.mark_saved(kind);
        Ok(path)
    }

    /// Save the accumulated spectrum (`_t1.txt`).
    ///
    /// # Errors
    /// Export errors, e.g. the file already exists.
    pub fn save_spectrum(&self) -> Result<PathBuf> {
        let (dir, file_name, accumulated_ms) = self.save_target(SaveKind::Spectrum)?;
        let pixel_size = self.pixel_size_t_ps();
        let path = {
            let _accu = lock_unpoisoned(&self.accu_lock);
            let hist = self.entry(ACCU_T)?.lock();
            let values: Vec<i64> = hist
                .snapshot_u32()?
                .into_iter()
                .map(i64::from)
                .collect();
            let header = SpectrumHeader::from_histogram(&hist, accumulated_ms, 0, pixel_size);
            save_spectrum_text(&dir, &file_name, &header, &values)?
        };
        self.finish_sync_save(SaveKind::Spectrum, &path);
        Ok(path)
    }

    /// Save the user spectrum's accumulation array (`_t2.txt`).
    ///
    /// # Errors
    /// Export errors, e.g. the file already exists.
    pub fn save_user_spectrum(&self) -> Result<PathBuf> {
        let (dir, file_name, accumulated_ms) = self.save_target(SaveKind::UserSpectrum)?;
        let pixel_size = self.pixel_size_t_ps();
        let shift = self.user_spectrum_links().raw_toff;
        let path = {
            let hist = self.entry(USER_T)?.lock();
            let width = usize::try_from(hist.width()).unwrap_or(usize::MAX);
            let values: Vec<i64> = hist
                .output()
                .map(|mirror| mirror.accumulation().iter().take(width).copied().collect())
                .unwrap_or_default();
            let header = SpectrumHeader::from_histogram(&hist, accumulated_ms, shift, pixel_size);
            save_spectrum_text(&dir, &file_name, &header, &values)?
        };
        self.finish_sync_save(SaveKind::UserSpectrum, &path);
        Ok(path)
    }

    fn finish_sync_save(&self, kind: SaveKind, path: &Path) {
        self.lock_state().file_counter.mark_saved(kind);
        info!("saved {}", path.display());
        self.emit(&ControllerEvent::Saved {
            path: path.to_path_buf(),
        });
    }

    // ---------------------------------------------------------------------
    // Maintenance and status
    // ---------------------------------------------------------------------

    /// Free every histogram buffer and reallocate the active ones at their
    /// current size. Refused while acquiring or accumulating.
    pub fn shrink_buffers(&self) -> bool {
        let st = self.lock_state();
        if st.acquisition_running || st.accumulation_running {
            debug!("shrink refused while measuring");
            return false;
        }
        let _accu = lock_unpoisoned(&self.accu_lock);
        for entry in self.registry.iter() {
            let mut hist = entry.lock();
            let was_active = hist.is_active();
            if let Err(e) = hist.set_active(false) {
                warn!("{}: closing pipe failed: {e}", entry.name());
            }
            if let Err(e) = hist.release_buffer() {
                warn!("{}: release failed: {e}", entry.name());
            }
            if was_active {
                if let Err(e) = hist.set_active(true) {
                    error!("{}: reactivation failed: {e}", entry.name());
                }
            }
        }
        drop(st);
        info!("histogram buffers shrunk");
        true
    }

    /// Block until queued worker tasks have finished.
    pub fn wait_idle(&self) {
        self.pool.wait_idle();
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.lock_state().controller_state()
    }

    #[must_use]
    pub fn device_state(&self) -> DeviceState {
        self.lock_state().device_state
    }

    #[must_use]
    pub fn is_acquiring(&self) -> bool {
        self.lock_state().acquisition_running
    }

    /// Accumulation as requested by the user, updated immediately on stop.
    #[must_use]
    pub fn is_accumulating(&self) -> bool {
        self.lock_state().accumulating_visible
    }

    #[must_use]
    pub fn counts_per_second(&self) -> f64 {
        self.lock_state().counts_per_sec
    }

    #[must_use]
    pub fn image_statistics(&self, name: &str) -> Option<ImageStatistics> {
        self.lock_state().image_stats.get(name).copied()
    }

    #[must_use]
    pub fn accumulated_time_ms(&self) -> u64 {
        self.lock_state().accumulated.as_millis() as u64
    }

    #[must_use]
    pub fn last_statistics(&self) -> Option<DriverStatistics> {
        self.lock_state().last_statistics
    }

    #[must_use]
    pub fn file_counter(&self) -> u32 {
        self.lock_state().file_counter.value()
    }

    /// Number used by the next save. Values wrap at 1000.
    pub fn set_file_counter(&self, value: u32) {
        let mut st = self.lock_state();
        st.file_counter = FileCounter::new(value);
        info!("file counter set to {:03}", st.file_counter.value());
    }

    #[must_use]
    pub fn time_axis_unit(&self) -> TimeUnit {
        self.lock_state().time_axis_unit
    }

    /// Change the unit of every time axis. Axes that are already set up
    /// are recomputed immediately, the others on the next live refresh.
    pub fn set_time_axis_unit(&self, unit: TimeUnit) {
        let mut st = self.lock_state();
        st.time_axis_unit = unit;
        if st.time_axes_initialized {
            self.registry.init_time_axes(st.pixel_size_t_ps, unit);
        }
        debug!("time axis unit {unit}");
    }

    /// [`Self::set_time_axis_unit`] by unit name; unknown names select pixels.
    pub fn set_time_axis_unit_by_name(&self, name: &str) -> TimeUnit {
        let unit: TimeUnit = name.parse().unwrap_or_else(|e| {
            warn!("{e}, using pixels");
            TimeUnit::Pixels
        });
        self.set_time_axis_unit(unit);
        unit
    }

    /// Shift the driver adds to the time of every event.
    ///
    /// # Errors
    /// `NotBound`, or the driver error.
    pub fn set_common_shift(&self, shift: i64) -> Result<()> {
        let st = self.lock_state();
        let Some(device) = st.device else {
            return Err(Error::NotBound);
        };
        if let Err(e) = self.driver.set_common_shift(device, shift) {
            error!("setting common shift failed: {e}");
            return Err(e.into());
        }
        info!("common shift {shift}");
        Ok(())
    }

    #[must_use]
    pub fn pixel_size_t_ps(&self) -> f64 {
        self.lock_state().pixel_size_t_ps
    }

    #[must_use]
    pub fn integration_duration(&self) -> Duration {
        self.lock_state().integration_duration
    }

    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.lock_state().pending.write_count()
    }

    pub fn set_exposure_live_ms(&self, ms: u64) {
        self.lock_state().exposure_live_ms = ms;
    }

    pub fn set_exposure_accu_ms(&self, ms: u64) {
        self.lock_state().exposure_accu_ms = ms;
    }

    /// Accumulation preview period, 0 disables the preview.
    pub fn set_accu_preview_refresh_ms(&self, ms: u64) {
        self.lock_state().accu_preview_refresh_ms = ms;
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        if let Some(ticker) = lock_unpoisoned(&self.ticker).as_mut() {
            ticker.stop();
        }
        let st = lock_unpoisoned(&self.state);
        let Some(device) = st.device else {
            return;
        };
        for entry in self.registry.iter() {
            let mut hist = entry.lock();
            let _ = hist.set_active(false);
            let _ = hist.set_device(None);
        }
        if st.acquisition_running {
            let _ = self.driver.interrupt(device);
        }
        if let Err(e) = self.driver.deinit(device) {
            debug!("deinit on drop failed: {e}");
        }
    }
}
