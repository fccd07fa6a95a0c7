//! Save directories, numbered file names and size formatting.

use std::path::PathBuf;

use chrono::{Local, NaiveDate};

/// Counter values wrap at this bound.
pub const FILE_COUNTER_LIMIT: u32 = 1000;

/// What a save produces, each with its own file suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SaveKind {
    CubeTiff,
    XyTiff,
    XyText,
    Spectrum,
    UserSpectrum,
    #[cfg(feature = "hdf5")]
    CubeHdf5,
}

const SAVE_KINDS: usize = 6;

impl SaveKind {
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            SaveKind::CubeTiff => ".tif",
            SaveKind::XyTiff => "_XY.tif",
            SaveKind::XyText => "_XY.dat",
            SaveKind::Spectrum => "_t1.txt",
            SaveKind::UserSpectrum => "_t2.txt",
            #[cfg(feature = "hdf5")]
            SaveKind::CubeHdf5 => ".h5",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Base directory and file name stem for saves.
#[derive(Clone, Debug, Default)]
pub struct SaveNaming {
    pub save_dir: PathBuf,
    pub filename: String,
}

impl SaveNaming {
    #[must_use]
    pub fn new(save_dir: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            save_dir: save_dir.into(),
            filename: filename.into(),
        }
    }

    /// `save_dir/YYYY_MM_DD`.
    #[must_use]
    pub fn directory(&self, date: NaiveDate) -> PathBuf {
        self.save_dir.join(date.format("%Y_%m_%d").to_string())
    }

    #[must_use]
    pub fn today_directory(&self) -> PathBuf {
        self.directory(Local::now().date_naive())
    }

    /// `NNN_name` with spaces replaced, plus the kind's suffix.
    #[must_use]
    pub fn file_name(&self, counter: u32, kind: SaveKind) -> String {
        format!(
            "{counter:03}_{}{}",
            self.filename.replace(' ', "_"),
            kind.suffix()
        )
    }
}

/// Running save number, shared by all save kinds of one measurement.
#[derive(Clone, Debug, Default)]
pub struct FileCounter {
    value: u32,
    saved: [bool; SAVE_KINDS],
}

impl FileCounter {
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self {
            value: value % FILE_COUNTER_LIMIT,
            saved: [false; SAVE_KINDS],
        }
    }

    #[must_use]
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn mark_saved(&mut self, kind: SaveKind) {
        self.saved[kind.index()] = true;
    }

    #[must_use]
    pub fn any_saved(&self) -> bool {
        self.saved.iter().any(|s| *s)
    }

    /// Step to the next number if anything was saved under the current one.
    pub fn advance(&mut self) {
        if self.any_saved() {
            self.value = (self.value + 1) % FILE_COUNTER_LIMIT;
        }
        self.saved = [false; SAVE_KINDS];
    }
}

/// Human-readable byte count, e.g. `  1.50 MB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytesize(bytes: u64, precision: usize) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    let (value, unit) = if bytes >= GB {
        (bytes as f64 / GB as f64, "GB")
    } else if bytes >= MB {
        (bytes as f64 / MB as f64, "MB")
    } else if bytes >= KB {
        (bytes as f64 / KB as f64, "KB")
    } else {
        (bytes as f64, "Byte")
    };
    format!("{value:6.precision$} {unit}")
}
