//! Histogram variants and their axis layout.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Closed set of histogram shapes produced by the driver.
///
/// Pixel layout is row-major with the time axis outermost:
/// `Cube3D` stores `[t][y][x]`, the t-images store `[t][x]` or `[t][y]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HistogramVariant {
    /// x by y image, gated on t.
    ImageXY,
    /// x by t image, gated on y.
    ImageXT,
    /// y by t image, gated on x.
    ImageYT,
    /// Full x, y, t cube.
    Cube3D,
    /// Time spectrum over the whole detector.
    Spectrum1D,
}

impl HistogramVariant {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            HistogramVariant::ImageXY => "Image2D_XY",
            HistogramVariant::ImageXT => "Image2D_XT",
            HistogramVariant::ImageYT => "Image2D_YT",
            HistogramVariant::Cube3D => "Cube3D_XYT",
            HistogramVariant::Spectrum1D => "Spectrum1D_T",
        }
    }

    /// Whether the variant is a two-dimensional image.
    #[must_use]
    pub const fn is_image(self) -> bool {
        matches!(
            self,
            HistogramVariant::ImageXY | HistogramVariant::ImageXT | HistogramVariant::ImageYT
        )
    }

    /// Whether the variant is the one-dimensional time spectrum.
    #[must_use]
    pub const fn is_spectrum(self) -> bool {
        matches!(self, HistogramVariant::Spectrum1D)
    }
}

impl fmt::Display for HistogramVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
