//! Named histogram attributes and their metadata tables.
//!
//! Every histogram exposes the same twelve integer attributes. Values are
//! raw integers; `-1` in the min/max tables means "no limit" and an unknown
//! identifier resolves to the `-1` / empty-string sentinels.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Scale applied to `MODULO` before it reaches the driver record.
pub const MODULO_FACTOR: i64 = 1;

/// Sentinel returned for unknown identifiers and unbounded limits.
pub const NOT_APPLICABLE: i64 = -1;

/// ROI, binning and modulo attribute identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    RoiX1,
    RoiX2,
    RoiY1,
    RoiY2,
    RoiT1,
    RoiT2,
    RoiTOffset,
    RoiTSize,
    BinX,
    BinY,
    BinT,
    Modulo,
}

impl Attribute {
    /// All attributes in table order.
    pub const ALL: [Attribute; 12] = [
        Attribute::RoiX1,
        Attribute::RoiX2,
        Attribute::RoiY1,
        Attribute::RoiY2,
        Attribute::RoiT1,
        Attribute::RoiT2,
        Attribute::RoiTOffset,
        Attribute::RoiTSize,
        Attribute::BinX,
        Attribute::BinY,
        Attribute::BinT,
        Attribute::Modulo,
    ];

    /// Wire identifier, e.g. `ROI_X1`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Attribute::RoiX1 => "ROI_X1",
            Attribute::RoiX2 => "ROI_X2",
            Attribute::RoiY1 => "ROI_Y1",
            Attribute::RoiY2 => "ROI_Y2",
            Attribute::RoiT1 => "ROI_T1",
            Attribute::RoiT2 => "ROI_T2",
            Attribute::RoiTOffset => "ROI_TOFF",
            Attribute::RoiTSize => "ROI_TSIZE",
            Attribute::BinX => "BIN_X",
            Attribute::BinY => "BIN_Y",
            Attribute::BinT => "BIN_T",
            Attribute::Modulo => "MODULO",
        }
    }

    /// Parse a wire identifier; unknown strings yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    /// Lower limit, or `-1` when unbounded.
    #[must_use]
    pub const fn min(self) -> i64 {
        match self {
            Attribute::RoiX1 | Attribute::RoiX2 | Attribute::RoiY1 | Attribute::RoiY2 => 0,
            Attribute::RoiT1 | Attribute::RoiT2 | Attribute::RoiTOffset => NOT_APPLICABLE,
            Attribute::RoiTSize | Attribute::BinX | Attribute::BinY | Attribute::BinT => 1,
            Attribute::Modulo => 0,
        }
    }

    /// Upper limit, or `-1` when unbounded.
    #[must_use]
    pub const fn max(self) -> i64 {
        match self {
            Attribute::RoiX1 | Attribute::RoiX2 | Attribute::RoiY1 | Attribute::RoiY2 => 4096,
            Attribute::BinX | Attribute::BinY => 1024,
            _ => NOT_APPLICABLE,
        }
    }

    /// printf-style display format.
    #[must_use]
    pub const fn format(self) -> &'static str {
        match self {
            Attribute::RoiX1
            | Attribute::RoiX2
            | Attribute::RoiY1
            | Attribute::RoiY2
            | Attribute::BinX
            | Attribute::BinY => "%4d",
            _ => "%18d",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::UnknownAttribute(s.to_string()))
    }
}

/// Minimum for a string identifier, `-1` if unknown.
#[must_use]
pub fn attribute_min(id: &str) -> i64 {
    Attribute::parse(id).map_or(NOT_APPLICABLE, Attribute::min)
}

/// Maximum for a string identifier, `-1` if unknown.
#[must_use]
pub fn attribute_max(id: &str) -> i64 {
    Attribute::parse(id).map_or(NOT_APPLICABLE, Attribute::max)
}

/// Format for a string identifier, empty if unknown.
#[must_use]
pub fn attribute_format(id: &str) -> &'static str {
    Attribute::parse(id).map_or("", Attribute::format)
}
