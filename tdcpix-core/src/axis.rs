//! Axis ranges, binning factors and per-axis triples.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Value triple over the three logical detector axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Xyt<T> {
    pub x: T,
    pub y: T,
    pub t: T,
}

impl<T> Xyt<T> {
    #[must_use]
    pub const fn new(x: T, y: T, t: T) -> Self {
        Self { x, y, t }
    }
}

/// Inclusive bound pair on one axis.
///
/// The bounds are stored as configured and may be out of order; `offset`
/// and `size` always normalize them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisRange {
    pub lo: i64,
    pub hi: i64,
}

impl AxisRange {
    #[must_use]
    pub const fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    /// Range covering `size` bins starting at `offset`.
    #[must_use]
    pub fn from_offset_size(offset: i64, size: u64) -> Self {
        let span = i64::try_from(size.saturating_sub(1)).unwrap_or(i64::MAX);
        Self::new(offset, offset.saturating_add(span))
    }

    /// Smaller of the two bounds.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.lo.min(self.hi)
    }

    /// Larger of the two bounds.
    #[inline]
    #[must_use]
    pub fn end(&self) -> i64 {
        self.lo.max(self.hi)
    }

    /// Number of bins covered, `|hi - lo| + 1`.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.lo.abs_diff(self.hi).saturating_add(1)
    }

    /// Size clamped into the signed attribute range.
    #[inline]
    #[must_use]
    pub fn size_i64(&self) -> i64 {
        i64::try_from(self.size()).unwrap_or(i64::MAX)
    }

    /// Keep the size, move the offset.
    #[must_use]
    pub fn with_offset(&self, offset: i64) -> Self {
        Self::from_offset_size(offset, self.size())
    }

    /// Keep the offset, change the size.
    #[must_use]
    pub fn with_size(&self, size: u64) -> Self {
        Self::from_offset_size(self.offset(), size.max(1))
    }

    /// Whether a binned coordinate falls inside the range.
    #[inline]
    #[must_use]
    pub fn contains(&self, v: i64) -> bool {
        v >= self.offset() && v <= self.end()
    }
}
