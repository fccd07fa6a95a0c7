//! tdcpix-io: File outputs for tdcpix histograms.
//!
//! - **Raw** - header plus pixel payload, rewritten every cycle
//! - **PGM** - grey-map previews of images and spectra
//! - **Text/TIFF** - numbered saves of images, cubes and spectra
//! - **HDF5** - cube export behind the `hdf5` feature
//!

mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod info;
pub mod naming;
mod outputs;
pub mod pgm;
pub mod raw;
pub mod text;
pub mod tiff_stack;

pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{read_cube_hdf5, save_cube_hdf5, CubeData};
pub use info::{info_file_name, write_measurement_info, MeasurementInfo};
pub use naming::{format_bytesize, FileCounter, SaveKind, SaveNaming};
pub use outputs::ActiveOutputs;
pub use raw::{parse_raw, read_raw, write_raw_to, ByteOrder, RawImage};
pub use text::{save_spectrum_text, save_xy_text, SpectrumHeader};
pub use tiff_stack::{save_cube_tiff, save_xy_tiff};
