//! Per-histogram outputs written after each acquisition cycle.

use std::sync::Arc;

use log::{debug, warn};
use tdcpix_algorithms::autobin_spectrum;
use tdcpix_core::pixels::lock_unpoisoned;
use tdcpix_core::HistogramBuffer;

use crate::pgm::{write_pgm_auto_contrast, write_pgm_plot_auto_max};
use crate::raw::{write_raw_to, ByteOrder};
use crate::text::export_values;
use crate::{Error, Result};

/// Writers for the targets configured on a [`HistogramBuffer`].
pub trait ActiveOutputs {
    /// Rewrite the raw file target with the current pixels.
    ///
    /// # Errors
    /// I/O errors or a shape too large for the raw header.
    fn write_file(&mut self) -> Result<()>;

    /// Rewrite the PGM preview.
    ///
    /// # Errors
    /// I/O errors or an unexportable buffer.
    fn write_pgm(&self) -> Result<()>;

    /// Run every enabled output, then refresh the mirror and statistics.
    /// Failures are logged and do not stop the remaining outputs.
    fn perform_active_outputs(&mut self);
}

impl ActiveOutputs for HistogramBuffer {
    fn write_file(&mut self) -> Result<()> {
        if !self.file_output_active() || !self.has_buffer() {
            return Ok(());
        }
        let too_large = |_| Error::InvalidFormat("image dimensions exceed raw header".into());
        let width = u32::try_from(self.width()).map_err(too_large)?;
        let height = u32::try_from(self.height()).map_err(too_large)?;
        let bytes_per_pixel = self.depth() / 8;
        let len = self.required_bytes()?;
        let order = if self.file_output_big_endian() {
            ByteOrder::BigEndian
        } else {
            ByteOrder::Native
        };

        let pixels = Arc::clone(self.pixels());
        let guard = lock_unpoisoned(&pixels);
        let payload = guard.get(..len).ok_or(Error::EmptyBuffer)?;
        let Some(file) = self.file_output_mut() else {
            return Ok(());
        };
        file.set_len(0)?;
        write_raw_to(file, width, height, bytes_per_pixel, payload, order)
    }

    fn write_pgm(&self) -> Result<()> {
        let target = self.pgm_target();
        let Some(path) = target.path.as_deref() else {
            return Ok(());
        };
        if !target.active || !self.has_buffer() {
            return Ok(());
        }
        let values = export_values(self)?;
        if self.variant().is_spectrum() {
            let binned = autobin_spectrum(&values, target.width)?;
            write_pgm_plot_auto_max(path, &binned, target.width, target.height)
        } else {
            let w = usize::try_from(self.width()).map_err(|_| Error::InvalidFormat("width".into()))?;
            let h = usize::try_from(self.height()).map_err(|_| Error::InvalidFormat("height".into()))?;
            write_pgm_auto_contrast(path, &values, w, h)
        }
    }

    fn perform_active_outputs(&mut self) {
        if let Err(e) = self.write_file() {
            warn!("{}: raw output failed: {e}", self.variant());
        }
        if let Err(e) = self.write_pgm() {
            warn!("{}: PGM output failed: {e}", self.variant());
        }
        self.write_output();
        self.update_statistics();
        debug!("{}: outputs written", self.variant());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::read_raw;
    use tdcpix_core::pixels::write_u32;
    use tdcpix_core::{Attribute, HistogramVariant};
    use tempfile::tempdir;

    fn filled(variant: HistogramVariant) -> HistogramBuffer {
        let mut h = HistogramBuffer::new(variant);
        if variant.is_spectrum() {
            h.set(Attribute::RoiTSize, 8).unwrap();
        } else {
            h.set(Attribute::RoiX2, 3).unwrap();
            h.set(Attribute::RoiY2, 1).unwrap();
        }
        h.accommodate_buffer(true).unwrap();
        let n = h.element_count().unwrap();
        {
            let mut px = h.lock_pixels();
            for i in 0..n {
                write_u32(&mut px, i, i as u32 + 1);
            }
        }
        h
    }

    #[test]
    fn test_raw_file_is_rewritten_each_cycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("live.raw");
        let mut h = filled(HistogramVariant::ImageXY);
        h.set_file_path(&path).unwrap();
        h.set_file_output_active(true).unwrap();
        h.write_file().unwrap();
        h.write_file().unwrap();

        let raw = read_raw(&path).unwrap();
        assert_eq!((raw.width, raw.height, raw.bytes_per_pixel), (4, 2, 4));
        assert_eq!(raw.values_u32().unwrap(), (1..=8).collect::<Vec<u32>>());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 12 + 32);
    }

    #[test]
    fn test_inactive_targets_write_nothing() {
        let dir = tempdir().unwrap();
        let mut h = filled(HistogramVariant::ImageXY);
        h.set_pgm_path(dir.path().join("preview"));
        h.perform_active_outputs();
        assert!(!dir.path().join("preview.pgm").exists());
    }

    #[test]
    fn test_pgm_preview_for_image_and_spectrum() {
        let dir = tempdir().unwrap();
        let mut img = filled(HistogramVariant::ImageXY);
        img.set_pgm_path(dir.path().join("img"));
        img.set_pgm_output_active(true, 16, 8);
        img.perform_active_outputs();
        let bytes = std::fs::read(dir.path().join("img.pgm")).unwrap();
        assert!(bytes.starts_with(b"P5 4 2"));
        assert_eq!(*bytes.last().unwrap(), 255);

        let mut spec = filled(HistogramVariant::Spectrum1D);
        spec.set_pgm_path(dir.path().join("spec"));
        spec.set_pgm_output_active(true, 4, 10);
        spec.perform_active_outputs();
        let bytes = std::fs::read(dir.path().join("spec.pgm")).unwrap();
        assert!(bytes.starts_with(b"P5 4 10"));
    }
}
