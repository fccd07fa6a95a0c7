//! tdcpix-daq: Acquisition and accumulation lifecycle for tdcpix.
//!
//! This crate drives the named histogram set against an acquisition driver:
//! binding and unbinding the device, the live measurement loop, timed
//! accumulation into the XYT cube with its projected views, deferred
//! attribute writes, periodic refresh and saving.
//!
//! # Key Components
//!
//! - [`AcquisitionController`] - State machine and completion handling
//! - [`HistogramRegistry`] - Named histograms and their write rules
//! - [`PendingActions`] - Deferred actions resolved on completion
//! - [`Driver`] / [`SimDriver`] - Driver contract and in-process simulator
//! - [`ControllerConfig`] - JSON-loadable settings

pub mod busy;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod pending;
pub mod pool;
pub mod registry;
pub mod sim;
pub mod ticker;

pub use busy::{BusyFlag, BusyGuard};
pub use config::ControllerConfig;
pub use controller::{
    AcquisitionController, ControllerEvent, ControllerState, DeviceState, ImageStatistics,
    SaveMode, UserSpectrumLinks, WriteOutcome,
};
pub use driver::{
    CompletionCallback, CompletionReason, DeviceProperties, Driver, DriverStatistics,
};
pub use error::{Error, Result};
pub use pending::{AttributeWrite, PendingAction, PendingActions};
pub use pool::WorkerPool;
pub use registry::{HistogramKind, HistogramRegistry, RegisteredHistogram};
pub use sim::SimDriver;
pub use ticker::Ticker;
