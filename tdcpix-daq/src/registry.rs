//! The fixed set of named histograms served by the controller.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::warn;
use tdcpix_core::pixels::lock_unpoisoned;
use tdcpix_core::{Attribute, HistogramBuffer, HistogramVariant, TimeUnit};

use crate::config::ControllerConfig;

pub const LIVE_XY: &str = "Hist_Live_XY";
pub const LIVE_XT: &str = "Hist_Live_XT";
pub const LIVE_YT: &str = "Hist_Live_YT";
pub const LIVE_T: &str = "Hist_Live_T";
pub const ACCU_XY: &str = "Hist_Accu_XY";
pub const ACCU_XT: &str = "Hist_Accu_XT";
pub const ACCU_YT: &str = "Hist_Accu_YT";
pub const ACCU_T: &str = "Hist_Accu_T";
pub const ACCU_XYT: &str = "Hist_Accu_XYT";
pub const FULL_XY: &str = "Hist_Full_XY";
pub const FULL_T: &str = "Hist_Full_T";
pub const FULL_COUNTS: &str = "Hist_Full_Counts";
pub const USER_T: &str = "Hist_User_T";

/// Height of the full-range spectrum plot.
pub const FULL_T_PGM_HEIGHT: usize = 128;

/// Histograms refreshed and cleared by every live cycle.
pub const LIVE_CYCLE: [&str; 6] = [LIVE_XY, LIVE_XT, LIVE_YT, LIVE_T, FULL_XY, FULL_T];

/// Projection views derived from the accumulation cube.
pub const ACCU_VIEWS: [&str; 4] = [ACCU_XY, ACCU_XT, ACCU_YT, ACCU_T];

/// How a histogram is fed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistogramKind {
    /// Driver-backed, cleared every live cycle.
    Live,
    /// Filled by projections of the accumulation cube.
    Pipeless,
    /// Driver-backed cube integrating over the accumulation.
    AccumulationCube,
    /// Driver-backed overview with a fixed range.
    FullRange,
    /// Single-bin event counter.
    Counter,
    /// Spectrum with its own binning and an accumulation array.
    UserSpectrum,
}

impl HistogramKind {
    #[must_use]
    pub const fn is_pipeless(self) -> bool {
        matches!(self, HistogramKind::Pipeless)
    }
}

const ALL: &[Attribute] = &Attribute::ALL;
const T_RANGE: &[Attribute] = &[
    Attribute::RoiT1,
    Attribute::RoiT2,
    Attribute::RoiTOffset,
    Attribute::RoiTSize,
];
const Y_RANGE: &[Attribute] = &[Attribute::RoiY1, Attribute::RoiY2];
const X_RANGE: &[Attribute] = &[Attribute::RoiX1, Attribute::RoiX2];
const XY_RANGE: &[Attribute] = &[
    Attribute::RoiX1,
    Attribute::RoiX2,
    Attribute::RoiY1,
    Attribute::RoiY2,
];
const FULL_XY_EXPOSED: &[Attribute] = &[
    Attribute::RoiX2,
    Attribute::RoiY2,
    Attribute::BinX,
    Attribute::BinY,
];

/// One named histogram and its access rules.
pub struct RegisteredHistogram {
    name: &'static str,
    kind: HistogramKind,
    exposed: &'static [Attribute],
    hist: Mutex<HistogramBuffer>,
}

impl RegisteredHistogram {
    fn new(
        name: &'static str,
        variant: HistogramVariant,
        kind: HistogramKind,
        exposed: &'static [Attribute],
    ) -> Self {
        Self {
            name,
            kind,
            exposed,
            hist: Mutex::new(HistogramBuffer::new(variant)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> HistogramKind {
        self.kind
    }

    #[must_use]
    pub fn is_pipeless(&self) -> bool {
        self.kind.is_pipeless()
    }

    /// Whether `attr` may be written remotely.
    #[must_use]
    pub fn is_exposed(&self, attr: Attribute) -> bool {
        self.exposed.contains(&attr)
    }

    /// Whether writes must hold the accumulation-buffers mutex.
    #[must_use]
    pub fn is_accumulation(&self) -> bool {
        self.name.contains("Accu")
    }

    pub fn lock(&self) -> MutexGuard<'_, HistogramBuffer> {
        lock_unpoisoned(&self.hist)
    }
}

/// Owned name to histogram table.
pub struct HistogramRegistry {
    entries: Vec<RegisteredHistogram>,
}

impl HistogramRegistry {
    /// Build every histogram with its full-range setup, output arrays and,
    /// when `config.preview_dir` is set, its preview file targets.
    #[must_use]
    pub fn new(config: &ControllerConfig) -> Self {
        use HistogramKind::{AccumulationCube, Counter, FullRange, Live, Pipeless, UserSpectrum};
        use HistogramVariant::{Cube3D, ImageXT, ImageXY, ImageYT, Spectrum1D};

        let entries = vec![
            RegisteredHistogram::new(LIVE_XY, ImageXY, Live, ALL),
            RegisteredHistogram::new(LIVE_XT, ImageXT, Live, ALL),
            RegisteredHistogram::new(LIVE_YT, ImageYT, Live, ALL),
            RegisteredHistogram::new(LIVE_T, Spectrum1D, Live, ALL),
            RegisteredHistogram::new(ACCU_XY, ImageXY, Pipeless, T_RANGE),
            RegisteredHistogram::new(ACCU_XT, ImageXT, Pipeless, Y_RANGE),
            RegisteredHistogram::new(ACCU_YT, ImageYT, Pipeless, X_RANGE),
            RegisteredHistogram::new(ACCU_T, Spectrum1D, Pipeless, XY_RANGE),
            RegisteredHistogram::new(ACCU_XYT, Cube3D, AccumulationCube, ALL),
            RegisteredHistogram::new(FULL_XY, ImageXY, FullRange, FULL_XY_EXPOSED),
            RegisteredHistogram::new(FULL_T, Spectrum1D, FullRange, &[]),
            RegisteredHistogram::new(FULL_COUNTS, Spectrum1D, Counter, &[]),
            RegisteredHistogram::new(USER_T, Spectrum1D, UserSpectrum, ALL),
        ];
        let registry = Self { entries };
        registry.setup_full_range(config);
        registry.setup_outputs(config);
        if let Some(dir) = &config.preview_dir {
            registry.setup_preview_files(dir, config);
        }
        registry
    }

    fn setup_full_range(&self, config: &ControllerConfig) {
        let apply = |name: &str, values: &[(Attribute, i64)]| {
            if let Some(entry) = self.get(name) {
                let mut hist = entry.lock();
                for &(attr, v) in values {
                    if let Err(e) = hist.set(attr, v) {
                        warn!("{name}: setting {attr} = {v} failed: {e}");
                    }
                }
            }
        };
        apply(
            FULL_XY,
            &[
                (Attribute::RoiX1, 0),
                (Attribute::RoiX2, 256),
                (Attribute::RoiY1, 0),
                (Attribute::RoiY2, 256),
                (Attribute::RoiT1, 0),
                (Attribute::RoiT2, i64::from(i32::MAX)),
                (Attribute::Modulo, 0),
                (Attribute::BinT, 1),
                (Attribute::BinX, config.full_hist_bin_xy),
                (Attribute::BinY, config.full_hist_bin_xy),
            ],
        );
        apply(
            FULL_COUNTS,
            &[
                (Attribute::BinT, 1 << 31),
                (Attribute::RoiT1, 0),
                (Attribute::RoiT2, 0),
            ],
        );
        apply(
            FULL_T,
            &[
                (Attribute::BinT, config.full_hist_bin_t),
                (Attribute::RoiTOffset, config.full_hist_toff),
                (Attribute::RoiTSize, config.full_hist_tsize),
            ],
        );
    }

    fn setup_outputs(&self, config: &ControllerConfig) {
        for entry in &self.entries {
            let mut hist = entry.lock();
            match hist.variant() {
                HistogramVariant::Cube3D => {}
                HistogramVariant::Spectrum1D => hist.set_output_capacity(config.spectrum_output_max, 1),
                _ => hist.set_output_capacity(config.output_max_width, config.output_max_height),
            }
            if matches!(entry.name, FULL_T | USER_T) {
                hist.set_accumulation_active(true);
            }
        }
    }

    fn setup_preview_files(&self, dir: &Path, config: &ControllerConfig) {
        let raw = [
            (LIVE_XY, "live/xy"),
            (LIVE_XT, "live/xt"),
            (LIVE_YT, "live/yt"),
            (LIVE_T, "live/t"),
            (ACCU_XY, "accu/xy"),
            (ACCU_XT, "accu/xt"),
            (ACCU_YT, "accu/yt"),
            (ACCU_T, "accu/t"),
        ];
        for (name, rel) in raw {
            let Some(entry) = self.get(name) else { continue };
            let mut hist = entry.lock();
            let result = hist
                .set_file_path(dir.join(rel))
                .and_then(|()| hist.set_file_output_active(true));
            if let Err(e) = result {
                warn!("{name}: preview file {} unavailable: {e}", dir.join(rel).display());
            }
        }
        let pgm = [
            (LIVE_T, "live/t", None),
            (FULL_XY, "live/xyfull", None),
            (
                FULL_T,
                "live/tfull",
                Some((config.full_hist_pgm_width, FULL_T_PGM_HEIGHT)),
            ),
        ];
        for (name, rel, size) in pgm {
            let Some(entry) = self.get(name) else { continue };
            let mut hist = entry.lock();
            hist.set_pgm_path(dir.join(rel));
            let (w, h) = size.unwrap_or((hist.pgm_target().width, hist.pgm_target().height));
            hist.set_pgm_output_active(true, w, h);
        }
    }

    /// Enable the time axis on every histogram with a time dimension.
    pub fn init_time_axes(&self, pixel_size_ps: f64, unit: TimeUnit) {
        for entry in &self.entries {
            let mut hist = entry.lock();
            if matches!(
                hist.variant(),
                HistogramVariant::ImageXT | HistogramVariant::ImageYT | HistogramVariant::Spectrum1D
            ) {
                hist.set_time_axis(pixel_size_ps, unit);
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredHistogram> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Lock a histogram by name.
    pub fn lock(&self, name: &str) -> Option<MutexGuard<'_, HistogramBuffer>> {
        self.get(name).map(RegisteredHistogram::lock)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredHistogram> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }
}

/// Accumulation views that follow a cube attribute write.
#[must_use]
pub fn linked_views(attr: Attribute) -> &'static [&'static str] {
    match attr {
        Attribute::RoiX1 | Attribute::RoiX2 => &[ACCU_XY, ACCU_XT],
        Attribute::RoiY1 | Attribute::RoiY2 => &[ACCU_XY, ACCU_YT],
        Attribute::RoiT1 | Attribute::RoiT2 | Attribute::RoiTOffset | Attribute::RoiTSize => {
            &[ACCU_XT, ACCU_YT, ACCU_T]
        }
        Attribute::Modulo | Attribute::BinX | Attribute::BinY | Attribute::BinT => {
            &[ACCU_XY, ACCU_XT, ACCU_YT, ACCU_T]
        }
    }
}
