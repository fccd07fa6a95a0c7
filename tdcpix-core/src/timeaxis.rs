//! Time axis calibration for spectra and t-images.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Error;

/// Unit of the computed time axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TimeUnit {
    /// Binned pixel index.
    #[default]
    Pixels,
    /// Pixel index before time binning.
    Unbinned,
    Seconds,
    Millis,
    Micros,
    Nanos,
    Picos,
}

impl TimeUnit {
    /// Integer code used by the remote attribute surface.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            TimeUnit::Pixels => 0,
            TimeUnit::Unbinned => 1,
            TimeUnit::Seconds => 2,
            TimeUnit::Millis => 3,
            TimeUnit::Micros => 4,
            TimeUnit::Nanos => 5,
            TimeUnit::Picos => 6,
        }
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(TimeUnit::Pixels),
            1 => Some(TimeUnit::Unbinned),
            2 => Some(TimeUnit::Seconds),
            3 => Some(TimeUnit::Millis),
            4 => Some(TimeUnit::Micros),
            5 => Some(TimeUnit::Nanos),
            6 => Some(TimeUnit::Picos),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Pixels => "pixels",
            TimeUnit::Unbinned => "unbinned",
            TimeUnit::Seconds => "s",
            TimeUnit::Millis => "ms",
            TimeUnit::Micros => "us",
            TimeUnit::Nanos => "ns",
            TimeUnit::Picos => "ps",
        }
    }

    /// Picoseconds to this unit, `None` for the pixel units.
    const fn ps_factor(self) -> Option<f64> {
        match self {
            TimeUnit::Pixels | TimeUnit::Unbinned => None,
            TimeUnit::Seconds => Some(1e-12),
            TimeUnit::Millis => Some(1e-9),
            TimeUnit::Micros => Some(1e-6),
            TimeUnit::Nanos => Some(1e-3),
            TimeUnit::Picos => Some(1.0),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pixels" => Ok(TimeUnit::Pixels),
            "unbinned" => Ok(TimeUnit::Unbinned),
            "s" => Ok(TimeUnit::Seconds),
            "ms" => Ok(TimeUnit::Millis),
            "us" => Ok(TimeUnit::Micros),
            "ns" => Ok(TimeUnit::Nanos),
            "ps" => Ok(TimeUnit::Picos),
            other => Err(Error::Config(format!("unknown time unit '{other}'"))),
        }
    }
}

/// Calibration used to fill a time axis.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeAxis {
    /// Duration of one unbinned time pixel in picoseconds.
    pub pixel_size_ps: f64,
    pub unit: TimeUnit,
}

impl TimeAxis {
    #[must_use]
    pub const fn new(pixel_size_ps: f64, unit: TimeUnit) -> Self {
        Self { pixel_size_ps, unit }
    }

    /// Axis value of bin `index` for a t-range starting at `t1` with binning `bint`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self, index: usize, t1: i64, bint: i64) -> f64 {
        let binned = index as f64 + t1 as f64;
        match self.unit.ps_factor() {
            None if self.unit == TimeUnit::Pixels => binned,
            None => binned * bint as f64,
            Some(factor) => binned * self.pixel_size_ps * bint as f64 * factor,
        }
    }

    /// Fill `out` with consecutive axis values.
    pub fn fill(&self, out: &mut [f64], t1: i64, bint: i64) {
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.value(i, t1, bint);
        }
    }
}
