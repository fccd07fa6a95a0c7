//! tdcpix-core: Histogram buffers and driver contract for time-resolved detectors.
//!
//! This crate provides the histogram variants, ROI/binning attribute model,
//! driver parameter records, pixel storage and order statistics shared by
//! the projection, export and acquisition crates.
//!

pub mod attribute;
pub mod axis;
pub mod error;
pub mod histogram;
pub mod output;
pub mod params;
pub mod pipe;
pub mod pixels;
pub mod stats;
pub mod timeaxis;
pub mod variant;

pub use attribute::{attribute_format, attribute_max, attribute_min, Attribute};
pub use axis::{AxisRange, Xyt};
pub use error::{Error, Result};
pub use histogram::{HistogramBuffer, PgmTarget};
pub use output::OutputMirror;
pub use params::{ParamRecord, SpectrumParams, WindowParams};
pub use pipe::{BufferAllocator, DeviceBinding, DeviceHandle, PipeDriver, PipeHandle, PixelSink};
pub use pixels::{lock_unpoisoned, SharedPixels};
pub use stats::QuantileHistogram;
pub use timeaxis::{TimeAxis, TimeUnit};
pub use variant::HistogramVariant;
