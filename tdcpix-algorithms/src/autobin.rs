//! Rebinning of spectra to a fixed number of bins.

use tdcpix_core::{Error, Result};

/// Reduce `values` to `new_size` bins.
///
/// Each output sums `ceil(len / new_size)` consecutive inputs starting at the
/// rounded proportional position, shifted left so the window stays inside.
/// Outputs beyond the input length are zero.
///
/// # Errors
/// `Config` when `new_size` is zero.
pub fn autobin_spectrum(values: &[u32], new_size: usize) -> Result<Vec<u32>> {
    if new_size < 1 {
        return Err(Error::Config("auto-binning needs at least one bin".into()));
    }
    let size = values.len();
    let mut out = vec![0u32; new_size];
    let used = new_size.min(size);
    if used == 0 {
        return Ok(out);
    }
    let bin = size.div_ceil(used);
    #[allow(clippy::cast_precision_loss)]
    let step = size as f64 / used as f64;
    for (i, slot) in out.iter_mut().take(used).enumerate() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let off = ((step * i as f64 + 0.5) as usize).min(size - bin);
        *slot = values[off..off + bin]
            .iter()
            .fold(0u32, |acc, &v| acc.wrapping_add(v));
    }
    Ok(out)
}
