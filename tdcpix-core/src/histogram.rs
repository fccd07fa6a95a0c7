//! One histogram: shape, ROI and binning state, pixel storage and pipe binding.
//!
//! The driver writes into the pixel buffer through the [`PixelSink`]
//! capability handed over when the pipe is opened. Every mutation of the
//! ROI/binning state rewrites the [`ParamRecord`], so the record the driver
//! receives always matches the logical state.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::attribute::{Attribute, MODULO_FACTOR, NOT_APPLICABLE};
use crate::axis::{AxisRange, Xyt};
use crate::error::{Error, Result};
use crate::output::OutputMirror;
use crate::params::{ParamRecord, SpectrumParams, WindowParams};
use crate::pipe::{DeviceBinding, PipeHandle, PixelSink};
use crate::pixels::{lock_unpoisoned, to_u32_vec, SharedPixels};
use crate::stats::{QuantileHistogram, DEFAULT_STAT_BINS};
use crate::timeaxis::{TimeAxis, TimeUnit};
use crate::variant::HistogramVariant;

/// Default PGM preview size.
pub const DEFAULT_PGM_WIDTH: usize = 256;
pub const DEFAULT_PGM_HEIGHT: usize = 128;

const FULL_RANGE_T: i64 = i64::MAX;
const MAX_SIZE_XY: i64 = 1023;

/// Raw binary file target.
#[derive(Debug)]
pub struct FileTarget {
    path: Option<PathBuf>,
    file: Option<File>,
    big_endian: bool,
}

impl Default for FileTarget {
    fn default() -> Self {
        Self {
            path: None,
            file: None,
            big_endian: true,
        }
    }
}

/// PGM preview target.
#[derive(Clone, Debug)]
pub struct PgmTarget {
    pub path: Option<PathBuf>,
    pub active: bool,
    pub width: usize,
    pub height: usize,
}

impl Default for PgmTarget {
    fn default() -> Self {
        Self {
            path: None,
            active: false,
            width: DEFAULT_PGM_WIDTH,
            height: DEFAULT_PGM_HEIGHT,
        }
    }
}

/// A histogram of one [`HistogramVariant`] and everything attached to it.
#[derive(Debug)]
pub struct HistogramBuffer {
    variant: HistogramVariant,
    roi: Xyt<AxisRange>,
    binning: Xyt<i64>,
    modulo: i64,
    depth: u32,
    record: ParamRecord,
    pixels: SharedPixels,
    device: Option<DeviceBinding>,
    pipe: Option<PipeHandle>,
    active: bool,
    stats: Option<QuantileHistogram>,
    file: FileTarget,
    pgm: PgmTarget,
    output: Option<OutputMirror>,
    time_axis: Option<TimeAxis>,
}

impl HistogramBuffer {
    /// Create a histogram with the variant's default ROI and binning.
    #[must_use]
    pub fn new(variant: HistogramVariant) -> Self {
        let mut binning = Xyt::new(2, 2, 1024);
        let mut roi = Xyt::new(
            AxisRange::new(0, 511),
            AxisRange::new(0, 511),
            AxisRange::new(0, FULL_RANGE_T),
        );
        match variant {
            HistogramVariant::ImageXY => binning.t = 1,
            HistogramVariant::ImageXT => {
                binning.t = 1 << 24;
                roi.t = AxisRange::new(0, 512);
                binning.y = 1;
                roi.y = AxisRange::new(0, MAX_SIZE_XY);
            }
            HistogramVariant::ImageYT => {
                binning.t = 1 << 24;
                roi.t = AxisRange::new(0, 512);
                binning.x = 1;
                roi.x = AxisRange::new(0, MAX_SIZE_XY);
            }
            HistogramVariant::Cube3D => {
                binning.t = 1 << 24;
                roi.t = AxisRange::new(0, 512);
            }
            HistogramVariant::Spectrum1D => {
                binning.t = 4_194_304;
                roi.t = AxisRange::new(0, 600);
            }
        }
        let mut hist = Self {
            variant,
            roi,
            binning,
            modulo: 0,
            depth: 32,
            record: ParamRecord::Spectrum(SpectrumParams {
                depth: 32,
                modulo: 0,
                bin_t: 1,
                offset_t: 0,
                size_t: 1,
            }),
            pixels: Arc::new(Mutex::new(Vec::new())),
            device: None,
            pipe: None,
            active: false,
            stats: None,
            file: FileTarget::default(),
            pgm: PgmTarget::default(),
            output: None,
            time_axis: None,
        };
        hist.rebuild_record();
        hist
    }

    #[must_use]
    pub fn variant(&self) -> HistogramVariant {
        self.variant
    }

    /// Parameter record as it would be handed to the driver.
    #[must_use]
    pub fn record(&self) -> &ParamRecord {
        &self.record
    }

    fn rebuild_record(&mut self) {
        let window = WindowParams {
            depth: self.depth,
            modulo: self.modulo.saturating_mul(MODULO_FACTOR),
            binning: self.binning,
            offset: Xyt::new(self.roi.x.offset(), self.roi.y.offset(), self.roi.t.offset()),
            size: Xyt::new(self.roi.x.size(), self.roi.y.size(), self.roi.t.size()),
        };
        self.record = match self.variant {
            HistogramVariant::ImageXY => ParamRecord::ImageXY(window),
            HistogramVariant::ImageXT => ParamRecord::ImageXT(window),
            HistogramVariant::ImageYT => ParamRecord::ImageYT(window),
            HistogramVariant::Cube3D => ParamRecord::Cube(window),
            HistogramVariant::Spectrum1D => ParamRecord::Spectrum(SpectrumParams {
                depth: self.depth,
                modulo: window.modulo,
                bin_t: self.binning.t,
                offset_t: self.roi.t.offset(),
                size_t: self.roi.t.size(),
            }),
        };
    }

    // ---------------------------------------------------------------------
    // Named attributes
    // ---------------------------------------------------------------------

    /// Current value of `attr`, normalized (`T1 <= T2`).
    #[must_use]
    pub fn get(&self, attr: Attribute) -> i64 {
        match attr {
            Attribute::RoiX1 => self.roi.x.offset(),
            Attribute::RoiX2 => self.roi.x.end(),
            Attribute::RoiY1 => self.roi.y.offset(),
            Attribute::RoiY2 => self.roi.y.end(),
            Attribute::RoiT1 | Attribute::RoiTOffset => self.roi.t.offset(),
            Attribute::RoiT2 => self.roi.t.end(),
            Attribute::RoiTSize => self.roi.t.size_i64(),
            Attribute::BinX => self.binning.x,
            Attribute::BinY => self.binning.y,
            Attribute::BinT => self.binning.t,
            Attribute::Modulo => self.modulo,
        }
    }

    /// Lookup by identifier; `-1` for unknown identifiers.
    #[must_use]
    pub fn get_by_name(&self, id: &str) -> i64 {
        Attribute::parse(id).map_or(NOT_APPLICABLE, |a| self.get(a))
    }

    /// Apply `value` to `attr` and reconfigure the pipe.
    ///
    /// Binning and `ROI_TSIZE` below one and negative modulo values leave the
    /// state untouched. The value is kept even when the pipe reconfiguration
    /// fails.
    ///
    /// # Errors
    /// Returns allocation or driver errors from the pipe reconfiguration.
    pub fn set(&mut self, attr: Attribute, value: i64) -> Result<()> {
        match attr {
            Attribute::RoiX1 => self.roi.x.lo = value,
            Attribute::RoiX2 => self.roi.x.hi = value,
            Attribute::RoiY1 => self.roi.y.lo = value,
            Attribute::RoiY2 => self.roi.y.hi = value,
            Attribute::RoiT1 => self.roi.t.lo = value,
            Attribute::RoiT2 => self.roi.t.hi = value,
            Attribute::RoiTOffset => self.roi.t = self.roi.t.with_offset(value),
            Attribute::RoiTSize => match u64::try_from(value) {
                Ok(size) if size >= 1 => self.roi.t = self.roi.t.with_size(size),
                _ => {
                    debug!("ignoring {attr}={value}");
                    return Ok(());
                }
            },
            Attribute::BinX | Attribute::BinY | Attribute::BinT if value < 1 => {
                debug!("ignoring {attr}={value}");
                return Ok(());
            }
            Attribute::BinX => self.binning.x = value,
            Attribute::BinY => self.binning.y = value,
            Attribute::BinT => self.binning.t = value,
            Attribute::Modulo if value < 0 => {
                debug!("ignoring {attr}={value}");
                return Ok(());
            }
            Attribute::Modulo => self.modulo = value,
        }
        self.rebuild_record();
        self.update_pipe()
    }

    /// Set by identifier. Unknown identifiers are a no-op.
    ///
    /// # Errors
    /// See [`HistogramBuffer::set`].
    pub fn set_by_name(&mut self, id: &str, value: i64) -> Result<()> {
        match Attribute::parse(id) {
            Some(attr) => self.set(attr, value),
            None => {
                debug!("ignoring unknown attribute {id}");
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn roi(&self) -> Xyt<AxisRange> {
        self.roi
    }

    #[must_use]
    pub fn binning(&self) -> Xyt<i64> {
        self.binning
    }

    #[must_use]
    pub fn modulo(&self) -> i64 {
        self.modulo
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Change the bit depth. Only 8/16/32/64 are valid.
    ///
    /// # Errors
    /// `UnsupportedDepth` for other values, otherwise pipe reconfiguration errors.
    pub fn set_depth(&mut self, depth: u32) -> Result<()> {
        if !matches!(depth, 8 | 16 | 32 | 64) {
            return Err(Error::UnsupportedDepth(depth));
        }
        self.depth = depth;
        self.rebuild_record();
        self.update_pipe()
    }

    // ---------------------------------------------------------------------
    // Shape accessors
    // ---------------------------------------------------------------------

    fn abscissa_axis(&self) -> AxisRange {
        match self.variant {
            HistogramVariant::ImageXY | HistogramVariant::ImageXT | HistogramVariant::Cube3D => {
                self.roi.x
            }
            HistogramVariant::ImageYT => self.roi.y,
            HistogramVariant::Spectrum1D => self.roi.t,
        }
    }

    fn abscissa_axis_mut(&mut self) -> &mut AxisRange {
        match self.variant {
            HistogramVariant::ImageXY | HistogramVariant::ImageXT | HistogramVariant::Cube3D => {
                &mut self.roi.x
            }
            HistogramVariant::ImageYT => &mut self.roi.y,
            HistogramVariant::Spectrum1D => &mut self.roi.t,
        }
    }

    fn ordinate_axis_mut(&mut self) -> Option<&mut AxisRange> {
        match self.variant {
            HistogramVariant::ImageXY | HistogramVariant::Cube3D => Some(&mut self.roi.y),
            HistogramVariant::ImageXT | HistogramVariant::ImageYT => Some(&mut self.roi.t),
            HistogramVariant::Spectrum1D => None,
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> u64 {
        self.abscissa_axis().size()
    }

    /// Number of rows, 1 for spectra.
    #[must_use]
    pub fn height(&self) -> u64 {
        match self.variant {
            HistogramVariant::ImageXY | HistogramVariant::Cube3D => self.roi.y.size(),
            HistogramVariant::ImageXT | HistogramVariant::ImageYT => self.roi.t.size(),
            HistogramVariant::Spectrum1D => 1,
        }
    }

    /// Number of t-slices, 1 for everything but the cube.
    #[must_use]
    pub fn zsize(&self) -> u64 {
        match self.variant {
            HistogramVariant::Cube3D => self.roi.t.size(),
            _ => 1,
        }
    }

    #[must_use]
    pub fn abscissa_offset(&self) -> i64 {
        self.abscissa_axis().offset()
    }

    #[must_use]
    pub fn ordinate_offset(&self) -> i64 {
        match self.variant {
            HistogramVariant::ImageXY | HistogramVariant::Cube3D => self.roi.y.offset(),
            HistogramVariant::ImageXT | HistogramVariant::ImageYT => self.roi.t.offset(),
            HistogramVariant::Spectrum1D => 0,
        }
    }

    #[must_use]
    pub fn z_offset(&self) -> i64 {
        match self.variant {
            HistogramVariant::Cube3D => self.roi.t.offset(),
            _ => 0,
        }
    }

    pub fn set_width(&mut self, width: u64) {
        if width < 1 {
            return;
        }
        let axis = self.abscissa_axis_mut();
        *axis = axis.with_size(width);
        self.rebuild_record();
    }

    pub fn set_height(&mut self, height: u64) {
        if height < 1 {
            return;
        }
        if let Some(axis) = self.ordinate_axis_mut() {
            *axis = axis.with_size(height);
            self.rebuild_record();
        }
    }

    pub fn set_zsize(&mut self, zsize: u64) {
        if zsize >= 1 && self.variant == HistogramVariant::Cube3D {
            self.roi.t = self.roi.t.with_size(zsize);
            self.rebuild_record();
        }
    }

    pub fn set_abscissa_offset(&mut self, offset: i64) {
        let axis = self.abscissa_axis_mut();
        *axis = axis.with_offset(offset);
        self.rebuild_record();
    }

    pub fn set_ordinate_offset(&mut self, offset: i64) {
        if let Some(axis) = self.ordinate_axis_mut() {
            *axis = axis.with_offset(offset);
            self.rebuild_record();
        }
    }

    pub fn set_z_offset(&mut self, offset: i64) {
        if self.variant == HistogramVariant::Cube3D {
            self.roi.t = self.roi.t.with_offset(offset);
            self.rebuild_record();
        }
    }

    /// Number of pixels, `width * height * zsize`.
    ///
    /// # Errors
    /// `Allocation` if the product does not fit into memory addressing.
    pub fn element_count(&self) -> Result<usize> {
        let n = self
            .width()
            .checked_mul(self.height())
            .and_then(|n| n.checked_mul(self.zsize()))
            .ok_or(Error::Allocation { bytes: u64::MAX })?;
        usize::try_from(n).map_err(|_| Error::Allocation { bytes: n })
    }

    /// Byte size the current shape needs.
    ///
    /// # Errors
    /// `Allocation` on overflow.
    pub fn required_bytes(&self) -> Result<usize> {
        let bytes_per_pixel = (self.depth / 8) as usize;
        self.element_count()?
            .checked_mul(bytes_per_pixel)
            .ok_or(Error::Allocation { bytes: u64::MAX })
    }

    // ---------------------------------------------------------------------
    // Pixel storage
    // ---------------------------------------------------------------------

    /// Grow the buffer to the required size; zero it if `zero` is set.
    ///
    /// A reallocation always yields an all-zero buffer. A buffer that is
    /// already large enough keeps its capacity.
    ///
    /// # Errors
    /// `Allocation` if the bytes cannot be reserved. The old buffer is kept.
    pub fn accommodate_buffer(&mut self, zero: bool) -> Result<()> {
        let required = self.required_bytes()?;
        let mut pixels = lock_unpoisoned(&self.pixels);
        if pixels.len() < required {
            let mut fresh = Vec::new();
            fresh
                .try_reserve_exact(required)
                .map_err(|_| Error::Allocation {
                    bytes: required as u64,
                })?;
            fresh.resize(required, 0);
            *pixels = fresh;
        } else if zero {
            pixels.fill(0);
        }
        Ok(())
    }

    /// Free the pixel buffer.
    ///
    /// # Errors
    /// `PipeOpen` while the driver may still write into it.
    pub fn release_buffer(&mut self) -> Result<()> {
        if self.pipe.is_some() {
            return Err(Error::PipeOpen);
        }
        *lock_unpoisoned(&self.pixels) = Vec::new();
        Ok(())
    }

    /// Zero the whole buffer.
    pub fn clear_buffer(&self) {
        lock_unpoisoned(&self.pixels).fill(0);
    }

    /// Current buffer capacity in bytes, 0 when unallocated.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        lock_unpoisoned(&self.pixels).len()
    }

    #[must_use]
    pub fn has_buffer(&self) -> bool {
        self.buffer_size() > 0
    }

    /// Shared storage, for code that writes pixels directly.
    #[must_use]
    pub fn pixels(&self) -> &SharedPixels {
        &self.pixels
    }

    /// Lock the pixel bytes.
    pub fn lock_pixels(&self) -> MutexGuard<'_, Vec<u8>> {
        lock_unpoisoned(&self.pixels)
    }

    /// Copy of the pixels covered by the current shape.
    ///
    /// # Errors
    /// `UnsupportedDepth` unless 32-bit, `EmptyBuffer` when unallocated.
    pub fn snapshot_u32(&self) -> Result<Vec<u32>> {
        if self.depth != 32 {
            return Err(Error::UnsupportedDepth(self.depth));
        }
        let count = self.element_count()?;
        let pixels = lock_unpoisoned(&self.pixels);
        if pixels.is_empty() {
            return Err(Error::EmptyBuffer);
        }
        Ok(to_u32_vec(&pixels, count))
    }

    // ---------------------------------------------------------------------
    // Device and pipe
    // ---------------------------------------------------------------------

    /// Bind or unbind the driver session.
    ///
    /// # Errors
    /// `PipeOpen` while a pipe is open; the binding is unchanged.
    pub fn set_device(&mut self, device: Option<DeviceBinding>) -> Result<()> {
        if self.pipe.is_some() {
            warn!("refusing to change device binding while a pipe is open");
            return Err(Error::PipeOpen);
        }
        self.device = device;
        Ok(())
    }

    #[must_use]
    pub fn device(&self) -> Option<&DeviceBinding> {
        self.device.as_ref()
    }

    #[must_use]
    pub fn pipe(&self) -> Option<PipeHandle> {
        self.pipe
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Activate or deactivate the pipe.
    ///
    /// Deactivation closes an open pipe. Activation needs a bound device and
    /// a closed pipe; a failed open leaves the histogram inactive.
    ///
    /// # Errors
    /// `NoDevice` or `PipeOpen` when activation is not possible, driver or
    /// allocation errors otherwise.
    pub fn set_active(&mut self, active: bool) -> Result<()> {
        if active == self.active {
            return Ok(());
        }
        if !active {
            self.close_pipe();
            self.active = false;
            return Ok(());
        }
        if self.device.is_none() {
            warn!("cannot activate {} pipe: no device bound", self.variant);
            return Err(Error::NoDevice);
        }
        if self.pipe.is_some() {
            warn!("cannot activate {} pipe: pipe already open", self.variant);
            return Err(Error::PipeOpen);
        }
        self.active = true;
        self.update_pipe()
    }

    fn close_pipe(&mut self) {
        if let (Some(device), Some(pipe)) = (&self.device, self.pipe.take()) {
            if let Err(e) = device.driver.close_pipe(device.handle, pipe) {
                warn!("closing {pipe} failed: {e}");
            }
        }
    }

    /// Close an open pipe, size the buffer and reopen if active.
    ///
    /// Without a bound device this does nothing.
    ///
    /// # Errors
    /// Allocation errors, or the driver error of a failed open. A failed
    /// open marks the histogram inactive.
    pub fn update_pipe(&mut self) -> Result<()> {
        let Some(device) = self.device.clone() else {
            return Ok(());
        };
        self.close_pipe();
        self.accommodate_buffer(false)?;
        if !self.active {
            return Ok(());
        }
        let sink = Arc::new(PixelSink::new(&self.pixels));
        match device.driver.open_pipe(device.handle, &self.record, sink) {
            Ok(pipe) => {
                debug!("opened {pipe} for {}", self.variant);
                self.pipe = Some(pipe);
                Ok(())
            }
            Err(e) => {
                self.active = false;
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Statistics
    // ---------------------------------------------------------------------

    /// Feed the current buffer into the statistics histogram.
    pub fn update_statistics(&mut self) {
        let Ok(values) = self.snapshot_u32() else {
            return;
        };
        self.stats
            .get_or_insert_with(|| QuantileHistogram::new(DEFAULT_STAT_BINS))
            .update(&values);
    }

    #[must_use]
    pub fn stat_max(&self) -> u32 {
        self.stats.as_ref().map_or(0, QuantileHistogram::max)
    }

    pub fn stat_quantile(&mut self, p: f64) -> u32 {
        self.stats.as_mut().map_or(0, |s| s.quantile(p))
    }

    // ---------------------------------------------------------------------
    // File and PGM targets
    // ---------------------------------------------------------------------

    /// Change the raw file path, reopening the file if output is active.
    ///
    /// # Errors
    /// I/O errors from reopening; output is then inactive.
    pub fn set_file_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let was_active = self.file_output_active();
        self.file.file = None;
        self.file.path = Some(path.into());
        if was_active {
            self.set_file_output_active(true)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        self.file.path.as_deref()
    }

    /// Open (creating parent directories) or close the raw file target.
    ///
    /// Without a path this is a no-op.
    ///
    /// # Errors
    /// I/O errors while creating the directory or file.
    pub fn set_file_output_active(&mut self, active: bool) -> Result<()> {
        self.file.file = None;
        if !active {
            return Ok(());
        }
        let Some(path) = self.file.path.clone() else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        self.file.file = Some(File::create(&path)?);
        Ok(())
    }

    #[must_use]
    pub fn file_output_active(&self) -> bool {
        self.file.file.is_some()
    }

    /// Open raw file handle while output is active.
    pub fn file_output_mut(&mut self) -> Option<&mut File> {
        self.file.file.as_mut()
    }

    pub fn set_file_output_big_endian(&mut self, big_endian: bool) {
        self.file.big_endian = big_endian;
    }

    #[must_use]
    pub fn file_output_big_endian(&self) -> bool {
        self.file.big_endian
    }

    /// Set the PGM path; `.pgm` is appended when missing. An empty path clears it.
    pub fn set_pgm_path(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.pgm.path = if path.as_os_str().is_empty() {
            None
        } else if path.extension().is_some_and(|e| e == "pgm") {
            Some(path.to_path_buf())
        } else {
            let mut s = path.as_os_str().to_os_string();
            s.push(".pgm");
            Some(PathBuf::from(s))
        };
    }

    pub fn set_pgm_output_active(&mut self, active: bool, width: usize, height: usize) {
        self.pgm.active = active;
        self.pgm.width = width;
        self.pgm.height = height;
    }

    /// Resize the preview; zero sizes are ignored.
    pub fn set_pgm_size(&mut self, width: usize, height: usize) {
        if width > 0 {
            self.pgm.width = width;
        }
        if height > 0 {
            self.pgm.height = height;
        }
    }

    #[must_use]
    pub fn pgm_target(&self) -> &PgmTarget {
        &self.pgm
    }

    // ---------------------------------------------------------------------
    // Output arrays and time axis
    // ---------------------------------------------------------------------

    /// Enable the output arrays with the given capacity.
    pub fn set_output_capacity(&mut self, max_width: usize, max_height: usize) {
        let accu_active = self.output.as_ref().is_some_and(OutputMirror::accumulation_active);
        let mut mirror = OutputMirror::new(max_width, max_height);
        mirror.set_accumulation_active(accu_active);
        self.output = Some(mirror);
    }

    #[must_use]
    pub fn output(&self) -> Option<&OutputMirror> {
        self.output.as_ref()
    }

    pub fn set_accumulation_active(&mut self, active: bool) {
        if let Some(mirror) = self.output.as_mut() {
            mirror.set_accumulation_active(active);
        }
    }

    /// Enable the time axis.
    pub fn set_time_axis(&mut self, pixel_size_ps: f64, unit: TimeUnit) {
        self.time_axis = Some(TimeAxis::new(pixel_size_ps, unit));
    }

    #[must_use]
    pub fn time_axis(&self) -> Option<TimeAxis> {
        self.time_axis
    }

    fn mirror_input(&self) -> Option<(Vec<u32>, usize, usize)> {
        let values = self.snapshot_u32().ok()?;
        let width = usize::try_from(self.width()).ok()?;
        let height = usize::try_from(self.height()).ok()?;
        Some((values, width, height))
    }

    fn refresh_time_axis(&mut self) {
        let (Some(axis), Some(mirror)) = (self.time_axis, self.output.as_mut()) else {
            return;
        };
        let (w, _) = mirror.data_shape();
        axis.fill(mirror.time_axis_mut(w), self.roi.t.offset(), self.binning.t);
    }

    /// Copy the live buffer into the output array.
    pub fn write_output(&mut self) {
        if self.output.is_none() {
            return;
        }
        let Some((values, width, height)) = self.mirror_input() else {
            return;
        };
        if let Some(mirror) = self.output.as_mut() {
            mirror.copy_live(&values, width, width, height);
        }
        self.refresh_time_axis();
    }

    /// Add the live buffer to the accumulation array while accumulation is active.
    pub fn add_to_accumulation(&mut self) {
        if !self.output.as_ref().is_some_and(OutputMirror::accumulation_active) {
            return;
        }
        let Some((values, width, height)) = self.mirror_input() else {
            return;
        };
        if let Some(mirror) = self.output.as_mut() {
            mirror.add_accumulated(&values, width, width, height);
        }
        self.refresh_time_axis();
    }

    pub fn zero_accumulation(&mut self) {
        if let Some(mirror) = self.output.as_mut() {
            mirror.zero_accumulation();
        }
    }
}

impl Drop for HistogramBuffer {
    fn drop(&mut self) {
        self.close_pipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{BufferAllocator, DeviceHandle, PipeDriver};
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    #[derive(Default)]
    struct CountingDriver {
        opened: AtomicI32,
        closed: AtomicI32,
        fail: AtomicBool,
    }

    impl PipeDriver for CountingDriver {
        fn open_pipe(
            &self,
            _device: DeviceHandle,
            _params: &ParamRecord,
            _allocator: Arc<dyn BufferAllocator>,
        ) -> Result<PipeHandle> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::driver(-4, "simulated open failure"));
            }
            Ok(PipeHandle(self.opened.fetch_add(1, Ordering::SeqCst)))
        }

        fn close_pipe(&self, _device: DeviceHandle, _pipe: PipeHandle) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bound(variant: HistogramVariant) -> (HistogramBuffer, Arc<CountingDriver>) {
        let driver = Arc::new(CountingDriver::default());
        let mut hist = HistogramBuffer::new(variant);
        let binding = DeviceBinding::new(DeviceHandle(0), driver.clone());
        hist.set_device(Some(binding)).unwrap();
        (hist, driver)
    }

    #[test]
    fn test_roi_normalization_any_order() {
        for (a, b) in [(10, 50), (50, 10), (7, 7), (0, 4096)] {
            for first_x1 in [true, false] {
                let mut h = HistogramBuffer::new(HistogramVariant::ImageXY);
                if first_x1 {
                    h.set(Attribute::RoiX1, a).unwrap();
                    h.set(Attribute::RoiX2, b).unwrap();
                } else {
                    h.set(Attribute::RoiX2, b).unwrap();
                    h.set(Attribute::RoiX1, a).unwrap();
                }
                assert_eq!(h.abscissa_offset(), a.min(b));
                assert_eq!(h.width(), a.abs_diff(b) + 1);
                assert_eq!(h.get(Attribute::RoiX1), a.min(b));
                let ParamRecord::ImageXY(w) = h.record() else {
                    panic!("wrong record variant");
                };
                assert_eq!(w.offset.x, a.min(b));
                assert_eq!(w.size.x, a.abs_diff(b) + 1);
            }
        }
    }

    #[test]
    fn test_toff_tsize_consistency() {
        let mut h = HistogramBuffer::new(HistogramVariant::Cube3D);
        h.set(Attribute::RoiTOffset, 40).unwrap();
        h.set(Attribute::RoiTSize, 25).unwrap();
        assert_eq!(h.get(Attribute::RoiT1), 40);
        assert_eq!(h.get(Attribute::RoiT2), 64);
        assert_eq!(h.get(Attribute::RoiTOffset), 40);
        assert_eq!(h.get(Attribute::RoiTSize), 25);
        assert_eq!(h.zsize(), 25);

        // moving the offset keeps the size
        h.set(Attribute::RoiTOffset, -3).unwrap();
        assert_eq!((h.get(Attribute::RoiT1), h.get(Attribute::RoiT2)), (-3, 21));
    }

    #[test]
    fn test_unknown_and_invalid_values_are_noops() {
        let mut h = HistogramBuffer::new(HistogramVariant::ImageXT);
        let before = *h.record();
        h.set_by_name("ROI_Q1", 5).unwrap();
        h.set(Attribute::BinX, 0).unwrap();
        h.set(Attribute::RoiTSize, 0).unwrap();
        h.set(Attribute::Modulo, -1).unwrap();
        assert_eq!(*h.record(), before);
        assert_eq!(h.get_by_name("ROI_Q1"), -1);
        assert_eq!(h.get_by_name("BIN_T"), 1 << 24);
    }

    #[test]
    fn test_variant_defaults_and_shape() {
        let xy = HistogramBuffer::new(HistogramVariant::ImageXY);
        assert_eq!((xy.width(), xy.height(), xy.zsize()), (512, 512, 1));
        assert_eq!(xy.get(Attribute::BinT), 1);

        let xt = HistogramBuffer::new(HistogramVariant::ImageXT);
        assert_eq!((xt.width(), xt.height()), (512, 513));
        assert_eq!(xt.get(Attribute::BinY), 1);
        assert_eq!(xt.get(Attribute::RoiY2), 1023);

        let yt = HistogramBuffer::new(HistogramVariant::ImageYT);
        assert_eq!((yt.width(), yt.height()), (512, 513));
        assert_eq!(yt.get(Attribute::RoiX2), 1023);

        let cube = HistogramBuffer::new(HistogramVariant::Cube3D);
        assert_eq!((cube.width(), cube.height(), cube.zsize()), (512, 512, 513));

        let t = HistogramBuffer::new(HistogramVariant::Spectrum1D);
        assert_eq!((t.width(), t.height(), t.zsize()), (601, 1, 1));
        assert_eq!(t.ordinate_offset(), 0);
        assert!(matches!(t.record(), ParamRecord::Spectrum(s) if s.bin_t == 4_194_304));
    }

    #[test]
    fn test_shape_setters_follow_variant() {
        let mut yt = HistogramBuffer::new(HistogramVariant::ImageYT);
        yt.set_abscissa_offset(5);
        yt.set_width(10);
        yt.set_ordinate_offset(100);
        yt.set_height(7);
        assert_eq!((yt.get(Attribute::RoiY1), yt.get(Attribute::RoiY2)), (5, 14));
        assert_eq!((yt.get(Attribute::RoiT1), yt.get(Attribute::RoiT2)), (100, 106));

        let mut t = HistogramBuffer::new(HistogramVariant::Spectrum1D);
        let before = *t.record();
        t.set_height(30);
        t.set_zsize(30);
        assert_eq!(*t.record(), before);
        t.set_width(30);
        assert_eq!(t.get(Attribute::RoiTSize), 30);
    }

    #[test]
    fn test_accommodate_zeroes() {
        let mut h = HistogramBuffer::new(HistogramVariant::ImageXY);
        h.set(Attribute::RoiX2, 3).unwrap();
        h.set(Attribute::RoiY2, 3).unwrap();
        h.accommodate_buffer(false).unwrap();
        assert_eq!(h.buffer_size(), 64);

        h.lock_pixels().fill(0xAB);
        h.accommodate_buffer(true).unwrap();
        assert!(h.lock_pixels().iter().all(|&b| b == 0));

        // shrink keeps capacity, regrow past it reallocates zeroed
        h.set(Attribute::RoiX2, 1).unwrap();
        h.accommodate_buffer(false).unwrap();
        assert_eq!(h.buffer_size(), 64);
        h.lock_pixels().fill(0xCD);
        h.set(Attribute::RoiX2, 7).unwrap();
        h.accommodate_buffer(false).unwrap();
        assert_eq!(h.buffer_size(), 128);
        assert!(h.lock_pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_activation_requires_device() {
        let mut h = HistogramBuffer::new(HistogramVariant::ImageXY);
        assert!(matches!(h.set_active(true), Err(Error::NoDevice)));
        assert!(!h.is_active());
    }

    #[test]
    fn test_set_reopens_active_pipe() {
        let (mut h, driver) = bound(HistogramVariant::ImageXY);
        h.set_active(true).unwrap();
        assert!(h.pipe().is_some());
        assert!(h.has_buffer());
        h.set(Attribute::BinX, 4).unwrap();
        assert_eq!(driver.opened.load(Ordering::SeqCst), 2);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);

        assert!(matches!(h.set_device(None), Err(Error::PipeOpen)));
        assert!(matches!(h.release_buffer(), Err(Error::PipeOpen)));

        h.set_active(false).unwrap();
        assert!(h.pipe().is_none());
        assert_eq!(driver.closed.load(Ordering::SeqCst), 2);
        h.release_buffer().unwrap();
        assert!(!h.has_buffer());
    }

    #[test]
    fn test_failed_open_deactivates() {
        let (mut h, driver) = bound(HistogramVariant::Spectrum1D);
        driver.fail.store(true, Ordering::SeqCst);
        assert!(matches!(h.set_active(true), Err(Error::Driver { .. })));
        assert!(!h.is_active());
        assert!(h.pipe().is_none());
    }

    #[test]
    fn test_drop_closes_pipe() {
        let (mut h, driver) = bound(HistogramVariant::ImageXT);
        h.set_active(true).unwrap();
        drop(h);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_statistics_and_output_mirror() {
        let mut h = HistogramBuffer::new(HistogramVariant::Spectrum1D);
        h.set(Attribute::RoiTSize, 4).unwrap();
        h.set(Attribute::RoiTOffset, 10).unwrap();
        h.accommodate_buffer(true).unwrap();
        {
            let mut px = h.lock_pixels();
            for (i, v) in [1u32, 5, 2, 8].iter().enumerate() {
                crate::pixels::write_u32(&mut px, i, *v);
            }
        }
        h.update_statistics();
        assert_eq!(h.stat_max(), 8);

        h.set_output_capacity(3, 1);
        h.set_time_axis(1.0, TimeUnit::Pixels);
        h.write_output();
        let out = h.output().unwrap();
        assert_eq!(out.live(), &[1, 5, 2]);
        assert_eq!(out.time_axis(), &[10.0, 11.0, 12.0]);

        h.set_accumulation_active(true);
        h.add_to_accumulation();
        h.add_to_accumulation();
        assert_eq!(h.output().unwrap().accumulation(), &[2, 10, 4]);
        h.zero_accumulation();
        assert_eq!(h.output().unwrap().accumulation(), &[0, 0, 0]);
    }

    #[test]
    fn test_pgm_path_extension() {
        let mut h = HistogramBuffer::new(HistogramVariant::ImageXY);
        h.set_pgm_path("live/xy");
        assert_eq!(h.pgm_target().path.as_deref(), Some(Path::new("live/xy.pgm")));
        h.set_pgm_path("live/xy.pgm");
        assert_eq!(h.pgm_target().path.as_deref(), Some(Path::new("live/xy.pgm")));
        h.set_pgm_size(0, 50);
        assert_eq!((h.pgm_target().width, h.pgm_target().height), (256, 50));
    }

    #[test]
    fn test_file_output_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = HistogramBuffer::new(HistogramVariant::ImageXY);
        h.set_file_output_active(true).unwrap();
        assert!(!h.file_output_active());

        h.set_file_path(dir.path().join("live").join("xy.bin")).unwrap();
        h.set_file_output_active(true).unwrap();
        assert!(h.file_output_active());
        assert!(dir.path().join("live").join("xy.bin").exists());
        assert!(h.file_output_big_endian());
    }
}
