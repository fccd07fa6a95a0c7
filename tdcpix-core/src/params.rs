//! Driver parameter records, one payload per histogram variant.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::axis::Xyt;
use crate::variant::HistogramVariant;

/// Spatial binning the driver applies to a time spectrum.
pub const SPECTRUM_SPATIAL_BINNING: i64 = 2048;

/// Binning, ROI and modulo of a windowed (image or cube) histogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WindowParams {
    pub depth: u32,
    /// Time wraparound in raw units, 0 when disabled.
    pub modulo: i64,
    pub binning: Xyt<i64>,
    pub offset: Xyt<i64>,
    pub size: Xyt<u64>,
}

/// Time-only parameters of a spectrum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumParams {
    pub depth: u32,
    pub modulo: i64,
    pub bin_t: i64,
    pub offset_t: i64,
    pub size_t: u64,
}

/// Parameter record handed to the driver when a pipe is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParamRecord {
    ImageXY(WindowParams),
    ImageXT(WindowParams),
    ImageYT(WindowParams),
    Cube(WindowParams),
    Spectrum(SpectrumParams),
}

impl ParamRecord {
    #[must_use]
    pub const fn variant(&self) -> HistogramVariant {
        match self {
            ParamRecord::ImageXY(_) => HistogramVariant::ImageXY,
            ParamRecord::ImageXT(_) => HistogramVariant::ImageXT,
            ParamRecord::ImageYT(_) => HistogramVariant::ImageYT,
            ParamRecord::Cube(_) => HistogramVariant::Cube3D,
            ParamRecord::Spectrum(_) => HistogramVariant::Spectrum1D,
        }
    }

    #[must_use]
    pub const fn depth(&self) -> u32 {
        match self {
            ParamRecord::ImageXY(w)
            | ParamRecord::ImageXT(w)
            | ParamRecord::ImageYT(w)
            | ParamRecord::Cube(w) => w.depth,
            ParamRecord::Spectrum(s) => s.depth,
        }
    }

    #[must_use]
    pub const fn modulo(&self) -> i64 {
        match self {
            ParamRecord::ImageXY(w)
            | ParamRecord::ImageXT(w)
            | ParamRecord::ImageYT(w)
            | ParamRecord::Cube(w) => w.modulo,
            ParamRecord::Spectrum(s) => s.modulo,
        }
    }

    /// Effective binning, offset and size per axis as the driver sees them.
    #[must_use]
    pub fn window(&self) -> WindowParams {
        match *self {
            ParamRecord::ImageXY(w)
            | ParamRecord::ImageXT(w)
            | ParamRecord::ImageYT(w)
            | ParamRecord::Cube(w) => w,
            ParamRecord::Spectrum(s) => WindowParams {
                depth: s.depth,
                modulo: s.modulo,
                binning: Xyt::new(SPECTRUM_SPATIAL_BINNING, SPECTRUM_SPATIAL_BINNING, s.bin_t),
                offset: Xyt::new(0, 0, s.offset_t),
                size: Xyt::new(1, 1, s.size_t),
            },
        }
    }

    /// Element index of a raw `(x, y, t)` event, `None` when it falls outside the ROI.
    ///
    /// Time is wrapped by the modulo first, then every axis is binned and
    /// checked against its window.
    #[must_use]
    pub fn bin_index(&self, x: i64, y: i64, t: i64) -> Option<usize> {
        let w = self.window();
        let t = if w.modulo > 0 { t.rem_euclid(w.modulo) } else { t };
        let bx = local(x, w.binning.x, w.offset.x, w.size.x)?;
        let by = local(y, w.binning.y, w.offset.y, w.size.y)?;
        let bt = local(t, w.binning.t, w.offset.t, w.size.t)?;
        let (sx, sy) = (w.size.x, w.size.y);
        let idx = match self {
            ParamRecord::ImageXY(_) => by.checked_mul(sx)?.checked_add(bx)?,
            ParamRecord::ImageXT(_) => bt.checked_mul(sx)?.checked_add(bx)?,
            ParamRecord::ImageYT(_) => bt.checked_mul(sy)?.checked_add(by)?,
            ParamRecord::Cube(_) => bt
                .checked_mul(sy)?
                .checked_add(by)?
                .checked_mul(sx)?
                .checked_add(bx)?,
            ParamRecord::Spectrum(_) => bt,
        };
        usize::try_from(idx).ok()
    }

    /// Byte offset of a raw event inside the pixel buffer.
    #[must_use]
    pub fn byte_offset(&self, x: i64, y: i64, t: i64) -> Option<usize> {
        let bytes = (self.depth() / 8) as usize;
        self.bin_index(x, y, t)?.checked_mul(bytes)
    }
}

fn local(raw: i64, binning: i64, offset: i64, size: u64) -> Option<u64> {
    let binned = raw.div_euclid(binning.max(1));
    let rel = binned.checked_sub(offset)?;
    let rel = u64::try_from(rel).ok()?;
    (rel < size).then_some(rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> WindowParams {
        WindowParams {
            depth: 32,
            modulo: 0,
            binning: Xyt::new(2, 2, 10),
            offset: Xyt::new(1, 2, 3),
            size: Xyt::new(4, 5, 6),
        }
    }

    #[test]
    fn test_cube_index_layout() {
        let rec = ParamRecord::Cube(window());
        // x=2 -> bin 1 -> local 0; y=4 -> bin 2 -> local 0; t=30 -> bin 3 -> local 0
        assert_eq!(rec.bin_index(2, 4, 30), Some(0));
        // local (1, 1, 1) -> (1*5 + 1)*4 + 1
        assert_eq!(rec.bin_index(4, 6, 40), Some(25));
        assert_eq!(rec.byte_offset(4, 6, 40), Some(100));
        assert_eq!(rec.bin_index(0, 4, 30), None);
        assert_eq!(rec.bin_index(2, 4, 90), None);
    }

    #[test]
    fn test_image_layouts() {
        let w = window();
        assert_eq!(ParamRecord::ImageXY(w).bin_index(4, 6, 30), Some(5));
        assert_eq!(ParamRecord::ImageXT(w).bin_index(4, 4, 40), Some(5));
        assert_eq!(ParamRecord::ImageYT(w).bin_index(2, 6, 40), Some(6));
    }

    #[test]
    fn test_modulo_wraps_time() {
        let mut w = window();
        w.modulo = 100;
        let rec = ParamRecord::Cube(w);
        assert_eq!(rec.bin_index(2, 4, 130), rec.bin_index(2, 4, 30));
    }

    #[test]
    fn test_spectrum_uses_fixed_spatial_window() {
        let rec = ParamRecord::Spectrum(SpectrumParams {
            depth: 32,
            modulo: 0,
            bin_t: 4,
            offset_t: 10,
            size_t: 8,
        });
        assert_eq!(rec.variant(), HistogramVariant::Spectrum1D);
        assert_eq!(rec.bin_index(2047, 0, 44), Some(1));
        assert_eq!(rec.bin_index(2048, 0, 44), None);
        assert_eq!(rec.window().size, Xyt::new(1, 1, 8));
    }
}
