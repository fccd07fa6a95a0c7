//! Controller configuration.
//!
//! The JSON schema groups the settings into sections; every section and
//! every field is optional and falls back to its default.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tdcpix_core::TimeUnit;

use crate::error::{Error, Result};

/// Calibrated time bin of the delay-line TDC in picoseconds.
pub const DEFAULT_PIXEL_SIZE_T_PS: f64 = 6.858_710_562_41;

/// Settings of the acquisition controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Ticker period in milliseconds.
    pub ticker_period_ms: u64,
    /// Live refresh period.
    pub exposure_live_ms: u64,
    /// Accumulation target; accumulation stops once reached.
    pub exposure_accu_ms: u64,
    /// Accumulation preview period, 0 disables the preview.
    pub accu_preview_refresh_ms: u64,
    /// Duration of one hardware measurement.
    pub measurement_quantum_ms: u64,
    pub worker_threads: usize,
    pub full_hist_bin_xy: i64,
    pub full_hist_bin_t: i64,
    pub full_hist_toff: i64,
    pub full_hist_tsize: i64,
    pub full_hist_pgm_width: usize,
    pub pixel_size_t_ps: f64,
    pub time_axis_unit: TimeUnit,
    /// Root of the `live/` and `accu/` preview files, `None` disables them.
    pub preview_dir: Option<PathBuf>,
    pub save_dir: PathBuf,
    pub save_filename: String,
    /// Counter of the first save, kept across runs by the caller.
    pub file_counter: u32,
    pub output_max_width: usize,
    pub output_max_height: usize,
    pub spectrum_output_max: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ticker_period_ms: 200,
            exposure_live_ms: 1000,
            exposure_accu_ms: 10_000,
            accu_preview_refresh_ms: 1000,
            measurement_quantum_ms: 1000,
            worker_threads: 2,
            full_hist_bin_xy: 8,
            full_hist_bin_t: 4_194_304,
            full_hist_toff: 0,
            full_hist_tsize: 600,
            full_hist_pgm_width: 600,
            pixel_size_t_ps: DEFAULT_PIXEL_SIZE_T_PS,
            time_axis_unit: TimeUnit::Pixels,
            preview_dir: None,
            save_dir: PathBuf::from("."),
            save_filename: "measurement".to_string(),
            file_counter: 0,
            output_max_width: 1024,
            output_max_height: 1024,
            spectrum_output_max: 65_536,
        }
    }
}

// Sectioned JSON schema
#[derive(Deserialize, Serialize, Default)]
#[serde(default)]
struct JsonConfig {
    controller: JsonController,
}

#[derive(Deserialize, Serialize, Default)]
#[serde(default)]
struct JsonController {
    timing: JsonTiming,
    workers: JsonWorkers,
    full_range: JsonFullRange,
    calibration: JsonCalibration,
    files: JsonFiles,
    output: JsonOutput,
}

#[derive(Deserialize, Serialize)]
#[serde(default)]
struct JsonTiming {
    ticker_period_ms: u64,
    exposure_live_ms: u64,
    exposure_accu_ms: u64,
    accu_preview_refresh_ms: u64,
    measurement_quantum_ms: u64,
}

impl Default for JsonTiming {
    fn default() -> Self {
        Self {
            ticker_period_ms: 200,
            exposure_live_ms: 1000,
            exposure_accu_ms: 10_000,
            accu_preview_refresh_ms: 1000,
            measurement_quantum_ms: 1000,
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(default)]
struct JsonWorkers {
    threads: usize,
}

impl Default for JsonWorkers {
    fn default() -> Self {
        Self { threads: 2 }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(default)]
struct JsonFullRange {
    bin_xy: i64,
    bin_t: i64,
    toff: i64,
    tsize: i64,
    pgm_width: usize,
}

impl Default for JsonFullRange {
    fn default() -> Self {
        Self {
            bin_xy: 8,
            bin_t: 4_194_304,
            toff: 0,
            tsize: 600,
            pgm_width: 600,
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(default)]
struct JsonCalibration {
    pixel_size_t_ps: f64,
    time_axis_unit: TimeUnit,
}

impl Default for JsonCalibration {
    fn default() -> Self {
        Self {
            pixel_size_t_ps: DEFAULT_PIXEL_SIZE_T_PS,
            time_axis_unit: TimeUnit::Pixels,
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(default)]
struct JsonFiles {
    preview_dir: Option<PathBuf>,
    save_dir: PathBuf,
    save_filename: String,
    file_counter: u32,
}

impl Default for JsonFiles {
    fn default() -> Self {
        Self {
            preview_dir: None,
            save_dir: PathBuf::from("."),
            save_filename: "measurement".to_string(),
            file_counter: 0,
        }
    }
}

#[derive(Deserialize, Serialize)]
#[serde(default)]
struct JsonOutput {
    max_width: usize,
    max_height: usize,
    spectrum_max: usize,
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 1024,
            spectrum_max: 65_536,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// File, parse and validation errors.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Parse and validation errors.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    /// Render the configuration in the sectioned file schema.
    ///
    /// # Errors
    /// Serialization errors.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json_config())?)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let c = config.controller;
        let config = Self {
            ticker_period_ms: c.timing.ticker_period_ms.max(1),
            exposure_live_ms: c.timing.exposure_live_ms,
            exposure_accu_ms: c.timing.exposure_accu_ms,
            accu_preview_refresh_ms: c.timing.accu_preview_refresh_ms,
            measurement_quantum_ms: c.timing.measurement_quantum_ms,
            worker_threads: c.workers.threads,
            full_hist_bin_xy: c.full_range.bin_xy,
            full_hist_bin_t: c.full_range.bin_t,
            full_hist_toff: c.full_range.toff,
            full_hist_tsize: c.full_range.tsize,
            full_hist_pgm_width: c.full_range.pgm_width,
            pixel_size_t_ps: c.calibration.pixel_size_t_ps,
            time_axis_unit: c.calibration.time_axis_unit,
            preview_dir: c.files.preview_dir,
            save_dir: c.files.save_dir,
            save_filename: c.files.save_filename,
            file_counter: c.files.file_counter,
            output_max_width: c.output.max_width,
            output_max_height: c.output.max_height,
            spectrum_output_max: c.output.spectrum_max,
        };
        config.validate()?;
        Ok(config)
    }

    fn to_json_config(&self) -> JsonConfig {
        JsonConfig {
            controller: JsonController {
                timing: JsonTiming {
                    ticker_period_ms: self.ticker_period_ms,
                    exposure_live_ms: self.exposure_live_ms,
                    exposure_accu_ms: self.exposure_accu_ms,
                    accu_preview_refresh_ms: self.accu_preview_refresh_ms,
                    measurement_quantum_ms: self.measurement_quantum_ms,
                },
                workers: JsonWorkers {
                    threads: self.worker_threads,
                },
                full_range: JsonFullRange {
                    bin_xy: self.full_hist_bin_xy,
                    bin_t: self.full_hist_bin_t,
                    toff: self.full_hist_toff,
                    tsize: self.full_hist_tsize,
                    pgm_width: self.full_hist_pgm_width,
                },
                calibration: JsonCalibration {
                    pixel_size_t_ps: self.pixel_size_t_ps,
                    time_axis_unit: self.time_axis_unit,
                },
                files: JsonFiles {
                    preview_dir: self.preview_dir.clone(),
                    save_dir: self.save_dir.clone(),
                    save_filename: self.save_filename.clone(),
                    file_counter: self.file_counter,
                },
                output: JsonOutput {
                    max_width: self.output_max_width,
                    max_height: self.output_max_height,
                    spectrum_max: self.spectrum_output_max,
                },
            },
        }
    }

    /// Check values the controller cannot run with.
    ///
    /// # Errors
    /// `Config` for zero worker threads, a file counter past 999 or an
    /// empty full-range spectrum.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be at least 1".into()));
        }
        if self.file_counter > 999 {
            return Err(Error::Config(format!(
                "file_counter must be at most 999, got {}",
                self.file_counter
            )));
        }
        if self.full_hist_tsize < 1 {
            return Err(Error::Config(format!(
                "full_hist_tsize must be at least 1, got {}",
                self.full_hist_tsize
            )));
        }
        Ok(())
    }
}
