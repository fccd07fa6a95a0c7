//! Reductions of an x/y/t cube into images and spectra.
//!
//! All projections take half-open integration bounds `[lo, hi)` relative to
//! the cube's own axes, clip them to the axis, copy the kept axes' ROI from
//! the source into the target, clear the target and add into it. Sums wrap
//! on `u32` overflow.

use rayon::prelude::*;
use tdcpix_core::pixels::{add_u32, read_u32};
use tdcpix_core::{Error, HistogramBuffer, HistogramVariant, Result};

/// Clip a half-open bound pair to `[0, n]`, swapping reversed input.
#[must_use]
pub fn clamp_bounds(lo: i64, hi: i64, n: usize) -> (usize, usize) {
    let (mut lo, mut hi) = if lo > hi { (hi, lo) } else { (lo, hi) };
    let n = i64::try_from(n).unwrap_or(i64::MAX);
    if lo >= n {
        lo = n - 1;
    }
    if hi > n {
        hi = n;
    }
    let lo = usize::try_from(lo.max(0)).unwrap_or(0);
    let hi = usize::try_from(hi.max(0)).unwrap_or(0);
    (lo, hi)
}

#[derive(Clone, Copy)]
struct CubeDims {
    w: usize,
    h: usize,
    zs: usize,
}

impl CubeDims {
    #[inline]
    fn at(&self, x: usize, y: usize, t: usize) -> usize {
        (t * self.h + y) * self.w + x
    }
}

fn cube_dims(src: &HistogramBuffer) -> Result<CubeDims> {
    if src.variant() != HistogramVariant::Cube3D {
        return Err(Error::Config(format!(
            "projection source must be a cube, got {}",
            src.variant()
        )));
    }
    if src.depth() != 32 {
        return Err(Error::UnsupportedDepth(src.depth()));
    }
    let dim = |v: u64| usize::try_from(v).map_err(|_| Error::Allocation { bytes: v });
    Ok(CubeDims {
        w: dim(src.width())?,
        h: dim(src.height())?,
        zs: dim(src.zsize())?,
    })
}

fn check_target(dst: &HistogramBuffer, expected: HistogramVariant) -> Result<()> {
    if dst.variant() != expected {
        return Err(Error::Config(format!(
            "cannot project into {}, expected {expected}",
            dst.variant()
        )));
    }
    if dst.depth() != 32 {
        return Err(Error::UnsupportedDepth(dst.depth()));
    }
    Ok(())
}

/// Run `fill` over the target rows of `row_len` pixels, in parallel.
fn reduce_rows<F>(
    src: &HistogramBuffer,
    dst: &mut HistogramBuffer,
    dims: CubeDims,
    row_len: usize,
    fill: F,
) -> Result<()>
where
    F: Fn(&[u8], usize, &mut [u8]) + Sync,
{
    let src_bytes = src.lock_pixels();
    let needed = dims.w * dims.h * dims.zs * 4;
    if src_bytes.is_empty() || src_bytes.len() < needed {
        return Err(Error::EmptyBuffer);
    }
    dst.accommodate_buffer(true)?;
    let required = dst.required_bytes()?;
    let mut dst_bytes = dst.lock_pixels();
    let src_slice: &[u8] = &src_bytes[..needed];
    dst_bytes[..required]
        .par_chunks_mut(row_len * 4)
        .enumerate()
        .for_each(|(row, out)| fill(src_slice, row, out));
    Ok(())
}

/// Sum `t ∈ [t1, t2)` into an XY image.
///
/// # Errors
/// Wrong variants, non-32-bit buffers or an unallocated source.
pub fn project_time(src: &HistogramBuffer, dst: &mut HistogramBuffer, t1: i64, t2: i64) -> Result<()> {
    let dims = cube_dims(src)?;
    check_target(dst, HistogramVariant::ImageXY)?;
    let (t1, t2) = clamp_bounds(t1, t2, dims.zs);

    dst.set_abscissa_offset(src.abscissa_offset());
    dst.set_width(src.width());
    dst.set_ordinate_offset(src.ordinate_offset());
    dst.set_height(src.height());

    reduce_rows(src, dst, dims, dims.w, |cube, y, row| {
        for t in t1..t2 {
            for x in 0..dims.w {
                add_u32(row, x, read_u32(cube, dims.at(x, y, t)));
            }
        }
    })
}

/// Sum `y ∈ [y1, y2)` into an XT image.
///
/// # Errors
/// See [`project_time`].
pub fn project_y(src: &HistogramBuffer, dst: &mut HistogramBuffer, y1: i64, y2: i64) -> Result<()> {
    let dims = cube_dims(src)?;
    check_target(dst, HistogramVariant::ImageXT)?;
    let (y1, y2) = clamp_bounds(y1, y2, dims.h);

    dst.set_abscissa_offset(src.abscissa_offset());
    dst.set_width(src.width());
    dst.set_ordinate_offset(src.z_offset());
    dst.set_height(src.zsize());

    reduce_rows(src, dst, dims, dims.w, |cube, t, row| {
        for y in y1..y2 {
            for x in 0..dims.w {
                add_u32(row, x, read_u32(cube, dims.at(x, y, t)));
            }
        }
    })
}

/// Sum `x ∈ [x1, x2)` into a YT image.
///
/// The target's width is the source's y axis and its height the source's
/// t axis.
///
/// # Errors
/// See [`project_time`].
pub fn project_x(src: &HistogramBuffer, dst: &mut HistogramBuffer, x1: i64, x2: i64) -> Result<()> {
    let dims = cube_dims(src)?;
    check_target(dst, HistogramVariant::ImageYT)?;
    let (x1, x2) = clamp_bounds(x1, x2, dims.w);

    dst.set_abscissa_offset(src.ordinate_offset());
    dst.set_width(src.height());
    dst.set_ordinate_offset(src.z_offset());
    dst.set_height(src.zsize());

    reduce_rows(src, dst, dims, dims.h, |cube, t, row| {
        for y in 0..dims.h {
            for x in x1..x2 {
                add_u32(row, y, read_u32(cube, dims.at(x, y, t)));
            }
        }
    })
}

/// Sum `x ∈ [x1, x2)` and `y ∈ [y1, y2)` into a time spectrum.
///
/// # Errors
/// See [`project_time`].
pub fn project_xy(
    src: &HistogramBuffer,
    dst: &mut HistogramBuffer,
    (x1, x2): (i64, i64),
    (y1, y2): (i64, i64),
) -> Result<()> {
    let dims = cube_dims(src)?;
    check_target(dst, HistogramVariant::Spectrum1D)?;
    let (x1, x2) = clamp_bounds(x1, x2, dims.w);
    let (y1, y2) = clamp_bounds(y1, y2, dims.h);

    dst.set_abscissa_offset(src.z_offset());
    dst.set_width(src.zsize());

    // one "row" per time bin
    reduce_rows(src, dst, dims, 1, |cube, t, cell| {
        for y in y1..y2 {
            for x in x1..x2 {
                add_u32(cell, 0, read_u32(cube, dims.at(x, y, t)));
            }
        }
    })
}
