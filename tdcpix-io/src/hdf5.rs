//! HDF5 export of histogram cubes.
//!
//! Counts are stored as `entry/histogram/counts` with shape `[t][y][x]`,
//! next to the binning, ROI offsets and modulo that produced them.

use std::path::Path;
use std::str::FromStr;

use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use ndarray::{ArrayView, ArrayView1};
use tdcpix_core::HistogramBuffer;

use crate::error::ensure_absent;
use crate::text::export_values;
use crate::{Error, Result};

/// Counts read back from an HDF5 cube file.
#[derive(Clone, Debug)]
pub struct CubeData {
    pub counts: Vec<u32>,
    /// `[t, y, x]`.
    pub shape: [usize; 3],
    pub binning: Vec<i64>,
    pub roi_offset: Vec<i64>,
    pub modulo: i64,
}

/// Save the histogram as a `[t][y][x]` `u32` dataset.
///
/// # Errors
/// `AlreadyExists`, `UnsupportedDepth`, `EmptyBuffer` or HDF5 errors.
pub fn save_cube_hdf5<P: AsRef<Path>>(path: P, hist: &HistogramBuffer) -> Result<()> {
    let path = path.as_ref();
    ensure_absent(path)?;
    let values = export_values(hist)?;
    let dim = |v: u64| usize::try_from(v).map_err(|_| Error::InvalidFormat("shape".into()));
    let shape = (dim(hist.zsize())?, dim(hist.height())?, dim(hist.width())?);

    let file = File::create(path)?;
    let entry = file.create_group("entry")?;
    set_attr_str(&entry, "NX_class", "NXentry")?;
    let histogram = entry.create_group("histogram")?;
    set_attr_str(&histogram, "NX_class", "NXdata")?;
    set_attr_str(&histogram, "signal", "counts")?;
    set_attr_str(&histogram, "variant", hist.variant().as_str())?;

    let counts = histogram.new_dataset::<u32>().shape(shape).create("counts")?;
    let view = ArrayView::from_shape(shape, values.as_slice())
        .map_err(|e| Error::InvalidFormat(format!("counts shape mismatch: {e}")))?;
    counts.write(view)?;

    let binning = hist.binning();
    let roi = hist.roi();
    write_i64_list(&histogram, "binning", &[binning.x, binning.y, binning.t])?;
    write_i64_list(
        &histogram,
        "roi_offset",
        &[roi.x.offset(), roi.y.offset(), roi.t.offset()],
    )?;
    histogram
        .new_attr::<i64>()
        .create("modulo")?
        .write_scalar(&hist.modulo())?;
    Ok(())
}

/// Read a file written by [`save_cube_hdf5`].
///
/// # Errors
/// HDF5 errors or `InvalidFormat` for a non 3-D dataset.
pub fn read_cube_hdf5<P: AsRef<Path>>(path: P) -> Result<CubeData> {
    let file = File::open(path)?;
    let histogram = file.group("entry")?.group("histogram")?;
    let ds = histogram.dataset("counts")?;
    let shape: [usize; 3] = ds
        .shape()
        .try_into()
        .map_err(|_| Error::InvalidFormat("counts dataset must be 3-D (t, y, x)".into()))?;
    Ok(CubeData {
        counts: ds.read_raw::<u32>()?,
        shape,
        binning: histogram.attr("binning")?.read_raw::<i64>()?,
        roi_offset: histogram.attr("roi_offset")?.read_raw::<i64>()?,
        modulo: histogram.attr("modulo")?.read_scalar::<i64>()?,
    })
}

fn write_i64_list(group: &Group, name: &str, values: &[i64]) -> Result<()> {
    let attr = group
        .new_attr::<i64>()
        .shape((values.len(),))
        .create(name)?;
    attr.write(ArrayView1::from(values))?;
    Ok(())
}

fn set_attr_str(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}
