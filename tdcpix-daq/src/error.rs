//! Controller error types.

use thiserror::Error;

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Controller error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Histogram or driver error.
    #[error("core error: {0}")]
    Core(#[from] tdcpix_core::Error),

    /// Export error.
    #[error("export error: {0}")]
    Io(#[from] tdcpix_io::Error),

    /// Malformed configuration document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File access error.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A driver session is already open.
    #[error("device is already bound")]
    AlreadyBound,

    /// No driver session is open.
    #[error("no device is bound")]
    NotBound,

    /// No histogram with that name.
    #[error("unknown histogram: {0}")]
    UnknownHistogram(String),

    /// Worker pool could not be created.
    #[error("worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
