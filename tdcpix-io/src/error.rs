//! I/O error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Export target exists and is never overwritten.
    #[error("file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Bit depth not handled by the exporter.
    #[error("bit depth {0} is not supported, only 32-bit data can be exported")]
    UnsupportedDepth(u32),

    /// Histogram has no data to export.
    #[error("histogram buffer is not allocated")]
    EmptyBuffer,

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// TIFF encoder error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] tdcpix_core::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

/// Fail with `AlreadyExists` if `path` is present.
pub(crate) fn ensure_absent(path: &std::path::Path) -> Result<()> {
    if path.exists() {
        return Err(Error::AlreadyExists(path.to_path_buf()));
    }
    Ok(())
}
