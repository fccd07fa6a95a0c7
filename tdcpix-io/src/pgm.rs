//! 8-bit binary grey-map (P5) previews.

use std::fs;
use std::path::Path;

use crate::{Error, Result};

const BORDER: u8 = 127;
const BACKGROUND: u8 = 250;
const MARK: u8 = 0;

fn write_p5(path: &Path, width: usize, height: usize, pixels: &[u8]) -> Result<()> {
    let mut out = format!("P5 {width} {height}  255 ").into_bytes();
    out.extend_from_slice(pixels);
    fs::write(path, out)?;
    Ok(())
}

/// Linear image scaled so the maximum maps to white.
///
/// # Errors
/// `InvalidFormat` if `values` is shorter than `width * height`, or I/O errors.
pub fn write_pgm_auto_contrast(path: &Path, values: &[u32], width: usize, height: usize) -> Result<()> {
    let n = width * height;
    let values = values
        .get(..n)
        .ok_or_else(|| Error::InvalidFormat(format!("need {n} pixels, got {}", values.len())))?;
    let white = u64::from(values.iter().copied().max().unwrap_or(0).max(1));
    let pixels: Vec<u8> = values
        .iter()
        .map(|&v| u8::try_from(u64::from(v) * 255 / white).unwrap_or(u8::MAX))
        .collect();
    write_p5(path, width, height, &pixels)
}

/// Log-scale line plot of a spectrum inside a one-pixel border.
///
/// Each sample is drawn as a five-pixel cross. Long spectra are strided so
/// at most about ten samples land on one column.
///
/// # Errors
/// `InvalidFormat` for plots smaller than 3x3 or an empty spectrum, or I/O errors.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn write_pgm_plot(
    path: &Path,
    values: &[u32],
    pgm_width: usize,
    pgm_height: usize,
    max_value: u32,
) -> Result<()> {
    if pgm_width < 3 || pgm_height < 3 {
        return Err(Error::InvalidFormat(format!(
            "plot of {pgm_width}x{pgm_height} is too small"
        )));
    }
    if values.is_empty() {
        return Err(Error::InvalidFormat("empty spectrum".into()));
    }
    let mut pixels = vec![BACKGROUND; pgm_width * pgm_height];
    for y in 0..pgm_height {
        for x in 0..pgm_width {
            if x == 0 || y == 0 || x == pgm_width - 1 || y == pgm_height - 1 {
                pixels[y * pgm_width + x] = BORDER;
            }
        }
    }

    let w = values.len();
    let log_max = f64::from(max_value.max(1)).ln();
    let xf = pgm_width as f64 / w as f64;
    let yf = if log_max > 0.0 { pgm_height as f64 / log_max } else { 0.0 };
    let step = if w / pgm_width > 10 { (w / pgm_width) / 10 } else { 1 };

    for x in (0..w).step_by(step) {
        let v = f64::from(values[x].max(1)).ln();
        let py = ((v * yf).round() as usize).min(pgm_height - 3);
        let px = ((x as f64 * xf).round() as usize).min(pgm_width - 3);
        let row = |dy: usize| (pgm_height - py - dy) * pgm_width;
        pixels[px + 1 + row(2)] = MARK;
        pixels[px + row(2)] = MARK;
        pixels[px + 2 + row(2)] = MARK;
        pixels[px + 1 + row(1)] = MARK;
        pixels[px + 1 + row(3)] = MARK;
    }
    write_p5(path, pgm_width, pgm_height, &pixels)
}

/// Plot with the maximum taken from the data.
///
/// # Errors
/// See [`write_pgm_plot`].
pub fn write_pgm_plot_auto_max(path: &Path, values: &[u32], pgm_width: usize, pgm_height: usize) -> Result<()> {
    let max = values.iter().copied().max().unwrap_or(0);
    write_pgm_plot(path, values, pgm_width, pgm_height, max)
}
