//! Acquisition driver contract beyond pipe management.

use std::fmt;
use std::sync::Arc;

use tdcpix_core::{DeviceHandle, PipeDriver, Result};

/// Why a measurement ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionReason {
    TimeElapsed,
    UserInterrupt,
    BufferFull,
    /// Hardware finished but data is still being transferred.
    EarlyNotification,
}

impl CompletionReason {
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::TimeElapsed),
            2 => Some(Self::UserInterrupt),
            3 => Some(Self::BufferFull),
            4 => Some(Self::EarlyNotification),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::TimeElapsed => 1,
            Self::UserInterrupt => 2,
            Self::BufferFull => 3,
            Self::EarlyNotification => 4,
        }
    }
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TimeElapsed => "time elapsed",
            Self::UserInterrupt => "user interrupt",
            Self::BufferFull => "buffer full",
            Self::EarlyNotification => "early notification",
        };
        f.write_str(s)
    }
}

/// Invoked by the driver, possibly on its own thread, when a measurement ends.
pub type CompletionCallback = Arc<dyn Fn(CompletionReason) + Send + Sync>;

/// Calibration reported by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeviceProperties {
    pub pixel_size_t_ps: f64,
    pub pixel_size_x_um: f64,
    pub pixel_size_y_um: f64,
}

/// Counters read from the driver after each measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverStatistics {
    pub events_received: u64,
    pub measurements: u64,
}

/// Session, measurement and statistics operations of the acquisition driver.
pub trait Driver: PipeDriver {
    /// Open a driver session.
    ///
    /// # Errors
    /// Driver error when the device cannot be initialised.
    fn init(&self) -> Result<DeviceHandle>;

    /// Close the session.
    ///
    /// # Errors
    /// Driver error when deinitialisation fails.
    fn deinit(&self, device: DeviceHandle) -> Result<()>;

    /// Register the completion callback for a session.
    ///
    /// # Errors
    /// Driver error for an unknown session.
    fn set_completion_callback(&self, device: DeviceHandle, callback: CompletionCallback) -> Result<()>;

    /// Start a timed measurement. Completion is reported through the callback.
    ///
    /// # Errors
    /// Driver error when the measurement cannot start.
    fn start_measure(&self, device: DeviceHandle, duration_ms: u64) -> Result<()>;

    /// Request early termination of the running measurement.
    ///
    /// # Errors
    /// Driver error when the request is rejected.
    fn interrupt(&self, device: DeviceHandle) -> Result<()>;

    /// # Errors
    /// Driver error for an unknown session.
    fn device_properties(&self, device: DeviceHandle) -> Result<DeviceProperties>;

    /// Shift added to the time of every event before it is binned.
    ///
    /// # Errors
    /// Driver error for an unknown session or a rejected value.
    fn set_common_shift(&self, device: DeviceHandle, shift: i64) -> Result<()>;

    /// # Errors
    /// Driver error for an unknown session.
    fn read_statistics(&self, device: DeviceHandle) -> Result<DriverStatistics>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_codes() {
        for reason in [
            CompletionReason::TimeElapsed,
            CompletionReason::UserInterrupt,
            CompletionReason::BufferFull,
            CompletionReason::EarlyNotification,
        ] {
            assert_eq!(CompletionReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(CompletionReason::from_code(0), None);
    }
}
