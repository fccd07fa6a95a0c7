//! Companion info file describing a saved data set.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tdcpix_core::{AxisRange, Xyt};

use crate::Result;

/// Settings recorded next to a saved data file.
#[derive(Clone, Debug)]
pub struct MeasurementInfo {
    pub file_name: String,
    pub directory: PathBuf,
    pub accumulated_ms: u64,
    pub binning: Xyt<i64>,
    pub roi: Xyt<AxisRange>,
    pub modulo: i64,
}

/// Info file name for a data file: the name without its extension,
/// followed by `_info.txt`. Names without a short extension lose their
/// last 4 characters.
#[must_use]
pub fn info_file_name(file_name: &str) -> String {
    let four_back = file_name
        .char_indices()
        .rev()
        .nth(3)
        .map_or(0, |(i, _)| i);
    let cut = match file_name.rfind('.') {
        Some(dot) if dot >= four_back => dot,
        _ => four_back,
    };
    format!("{}_info.txt", &file_name[..cut])
}

/// Write the info file for `info` into its directory.
///
/// # Errors
/// I/O errors.
pub fn write_measurement_info(info: &MeasurementInfo) -> Result<PathBuf> {
    let path = info.directory.join(info_file_name(&info.file_name));
    fs::write(&path, render(info, &info.directory))?;
    Ok(path)
}

fn render(info: &MeasurementInfo, dir: &Path) -> String {
    let now = Local::now();
    let mut out = String::new();
    let _ = writeln!(out, "Information for File {}", info.file_name);
    let _ = writeln!(out, "Originally saved in {}", dir.display());
    let _ = writeln!(out, "Date: {}", now.format("%Y-%m-%d"));
    let _ = writeln!(out, "Time: {}", now.format("%H:%M:%S"));
    let _ = writeln!(out, "Accumulated Time: {} ms", info.accumulated_ms);
    let _ = writeln!(out, "XYT data set: ");
    for (name, bin) in [("x", info.binning.x), ("y", info.binning.y), ("t", info.binning.t)] {
        let _ = writeln!(out, "    binning {name}: {bin}");
    }
    for (name, r) in [("x", info.roi.x), ("y", info.roi.y), ("t", info.roi.t)] {
        let _ = writeln!(out, "    region of interest {name}: {} to {}", r.offset(), r.end());
    }
    let _ = writeln!(out, "    modulo: {}", info.modulo);
    out
}
