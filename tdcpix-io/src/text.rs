//! Delimited text exports for images and spectra.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tdcpix_core::{AxisRange, HistogramBuffer, Xyt};

use crate::error::ensure_absent;
use crate::{Error, Result};

/// Copy a histogram's pixels, mapping core failures to export errors.
pub(crate) fn export_values(hist: &HistogramBuffer) -> Result<Vec<u32>> {
    hist.snapshot_u32().map_err(|e| match e {
        tdcpix_core::Error::UnsupportedDepth(d) => Error::UnsupportedDepth(d),
        tdcpix_core::Error::EmptyBuffer => Error::EmptyBuffer,
        other => Error::Core(other),
    })
}

/// Save a 2-D histogram as a whitespace-aligned text matrix.
///
/// # Errors
/// `AlreadyExists`, `UnsupportedDepth`, `EmptyBuffer` or I/O errors.
pub fn save_xy_text(dir: &Path, name: &str, hist: &HistogramBuffer) -> Result<PathBuf> {
    let path = dir.join(name);
    ensure_absent(&path)?;
    let values = export_values(hist)?;
    let w = usize::try_from(hist.width()).map_err(|_| Error::InvalidFormat("width".into()))?;

    let mut out = String::with_capacity(values.len() * 11 + values.len() / w.max(1));
    for row in values.chunks(w.max(1)) {
        for v in row {
            let _ = write!(out, "{v:>11}");
        }
        out.push('\n');
    }
    fs::write(&path, out)?;
    Ok(path)
}

/// Parameters printed in a spectrum file header.
#[derive(Clone, Debug)]
pub struct SpectrumHeader {
    pub accumulated_ms: u64,
    pub binning: Xyt<i64>,
    pub roi: Xyt<AxisRange>,
    pub modulo: i64,
    /// Shift applied to raw times before the modulo.
    pub time_shift: i64,
    pub pixel_size_ps: f64,
}

impl SpectrumHeader {
    #[must_use]
    pub fn from_histogram(
        hist: &HistogramBuffer,
        accumulated_ms: u64,
        time_shift: i64,
        pixel_size_ps: f64,
    ) -> Self {
        Self {
            accumulated_ms,
            binning: hist.binning(),
            roi: hist.roi(),
            modulo: hist.modulo(),
            time_shift,
            pixel_size_ps,
        }
    }
}

/// Save a time spectrum as tab-separated columns with a commented header.
///
/// Columns are binned pixel, unbinned pixel, time in seconds and intensity.
///
/// # Errors
/// `AlreadyExists` or I/O errors.
#[allow(clippy::cast_precision_loss)]
pub fn save_spectrum_text(dir: &Path, name: &str, header: &SpectrumHeader, values: &[i64]) -> Result<PathBuf> {
    let path = dir.join(name);
    ensure_absent(&path)?;
    let now = Local::now();
    let h = header;
    let mut out = String::new();
    let _ = writeln!(out, "# Accumulated time spectrum");
    let _ = writeln!(out, "# Date: {}", now.format("%Y-%m-%d"));
    let _ = writeln!(out, "# Time: {}", now.format("%H:%M:%S"));
    let _ = writeln!(out, "# Accumulated Time: {} ms", h.accumulated_ms);
    let _ = writeln!(out, "# Parameters: ");
    let _ = writeln!(out, "#     binning x: {}", h.binning.x);
    let _ = writeln!(out, "#     binning y: {}", h.binning.y);
    let _ = writeln!(out, "#     binning t: {}", h.binning.t);
    let _ = writeln!(out, "#     selected x range: {} to {}", h.roi.x.offset(), h.roi.x.end());
    let _ = writeln!(out, "#     selected y range: {} to {}", h.roi.y.offset(), h.roi.y.end());
    let _ = writeln!(
        out,
        "#     region of interest t (binned units): {} to {}",
        h.roi.t.offset(),
        h.roi.t.end()
    );
    let _ = writeln!(out, "#     modulo: {}", h.modulo);
    let _ = writeln!(out, "#     pre-modulo time shift: {}", h.time_shift);
    let _ = writeln!(out, "### Column1: binned pixels");
    let _ = writeln!(out, "### Column2: unbinned pixels");
    let _ = writeln!(out, "### Column3: time (s)");
    let _ = writeln!(out, "### Column4: intensity");
    let _ = writeln!(out, "### ");
    let _ = writeln!(out, "### START OF DATA");

    let t0 = h.roi.t.offset();
    for (x, v) in (0i64..).zip(values) {
        let binned = x + t0;
        let unbinned = binned.saturating_mul(h.binning.t);
        let seconds = unbinned as f64 * h.pixel_size_ps * 1e-12;
        let _ = writeln!(out, "{binned}\t{unbinned}\t{seconds}\t{v}");
    }
    fs::write(&path, out)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdcpix_core::pixels::write_u32;
    use tdcpix_core::{Attribute, HistogramVariant};
    use tempfile::tempdir;

    fn small_xy() -> HistogramBuffer {
        let mut h = HistogramBuffer::new(HistogramVariant::ImageXY);
        h.set(Attribute::RoiX2, 2).unwrap();
        h.set(Attribute::RoiY2, 1).unwrap();
        h.accommodate_buffer(true).unwrap();
        {
            let mut px = h.lock_pixels();
            for i in 0..6 {
                write_u32(&mut px, i, i as u32 * 10);
            }
        }
        h
    }

    #[test]
    fn test_xy_text_matrix() {
        let dir = tempdir().unwrap();
        let path = save_xy_text(dir.path(), "img_XY.dat", &small_xy()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("{:>11}{:>11}{:>11}", 0, 10, 20));
        assert_eq!(lines[1].split_whitespace().collect::<Vec<_>>(), ["30", "40", "50"]);
    }

    #[test]
    fn test_refuses_existing_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("img_XY.dat"), "x").unwrap();
        let err = save_xy_text(dir.path(), "img_XY.dat", &small_xy()).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_refuses_empty_buffer() {
        let dir = tempdir().unwrap();
        let h = HistogramBuffer::new(HistogramVariant::ImageXY);
        let err = save_xy_text(dir.path(), "a.dat", &h).unwrap_err();
        assert!(matches!(err, Error::EmptyBuffer));
    }

    #[test]
    fn test_spectrum_columns_use_time_offset() {
        let dir = tempdir().unwrap();
        let mut hist = HistogramBuffer::new(HistogramVariant::Spectrum1D);
        hist.set(Attribute::BinT, 4).unwrap();
        hist.set(Attribute::RoiTOffset, 10).unwrap();
        hist.set(Attribute::RoiTSize, 3).unwrap();
        let header = SpectrumHeader::from_histogram(&hist, 1500, 0, 2.0);
        let path = save_spectrum_text(dir.path(), "s_t1.txt", &header, &[5, 6, 7]).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("# Accumulated Time: 1500 ms"));
        assert!(text.contains("#     region of interest t (binned units): 10 to 12"));
        let data: Vec<&str> = text
            .lines()
            .skip_while(|l| *l != "### START OF DATA")
            .skip(1)
            .collect();
        assert_eq!(data.len(), 3);
        let cols: Vec<&str> = data[1].split('\t').collect();
        assert_eq!(cols[0], "11");
        assert_eq!(cols[1], "44");
        assert_eq!(cols[3], "6");
        let seconds: f64 = cols[2].parse().unwrap();
        assert!((seconds - 88e-12).abs() < 1e-20);
    }
}
