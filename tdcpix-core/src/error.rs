//! Error types for tdcpix-core.

use thiserror::Error;

/// Result type alias for tdcpix operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for histogram and pipe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Attribute identifier not part of the histogram attribute table.
    #[error("unknown histogram attribute: {0}")]
    UnknownAttribute(String),

    /// Pixel buffer could not be reserved.
    #[error("unable to reserve {bytes} bytes for histogram buffer")]
    Allocation { bytes: u64 },

    /// Operation requires a bound device.
    #[error("no device bound to histogram")]
    NoDevice,

    /// Operation requires the pipe to be closed.
    #[error("pipe is already open")]
    PipeOpen,

    /// Driver returned a non-zero status.
    #[error("driver error {code}: {message}")]
    Driver { code: i32, message: String },

    /// Bit depth not supported by this code path.
    #[error("bit depth {0} is not supported, only 32-bit buffers are")]
    UnsupportedDepth(u32),

    /// Histogram has no allocated pixel buffer.
    #[error("histogram buffer is not allocated")]
    EmptyBuffer,

    /// Output target could not be prepared.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a driver error from a status code and message.
    pub fn driver(code: i32, message: impl Into<String>) -> Self {
        Self::Driver {
            code,
            message: message.into(),
        }
    }
}
