//! Multi-page float TIFF export of cubes and images.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tdcpix_core::HistogramBuffer;
use tiff::encoder::{colortype, TiffEncoder};

use crate::error::ensure_absent;
use crate::text::export_values;
use crate::{Error, Result};

/// Save one greyscale float page per t-slice, at most `zsize_limit` pages.
///
/// # Errors
/// `AlreadyExists`, `UnsupportedDepth`, `EmptyBuffer`, TIFF or I/O errors.
#[allow(clippy::cast_precision_loss)]
pub fn save_cube_tiff(
    dir: &Path,
    name: &str,
    hist: &HistogramBuffer,
    zsize_limit: Option<u64>,
) -> Result<PathBuf> {
    let path = dir.join(name);
    ensure_absent(&path)?;
    let values = export_values(hist)?;
    let too_large = |_| Error::InvalidFormat("image dimensions exceed TIFF limits".into());
    let w = u32::try_from(hist.width()).map_err(too_large)?;
    let h = u32::try_from(hist.height()).map_err(too_large)?;
    let zs = zsize_limit.map_or(hist.zsize(), |limit| hist.zsize().min(limit.max(1)));
    let frame = w as usize * h as usize;

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(&path)?))?;
    for slice in values.chunks(frame).take(zs as usize) {
        let page: Vec<f32> = slice.iter().map(|&v| v as f32).collect();
        encoder.write_image::<colortype::Gray32Float>(w, h, &page)?;
    }
    Ok(path)
}

/// Save only the first slice, for 2-D images.
///
/// # Errors
/// See [`save_cube_tiff`].
pub fn save_xy_tiff(dir: &Path, name: &str, hist: &HistogramBuffer) -> Result<PathBuf> {
    save_cube_tiff(dir, name, hist, Some(1))
}
