//! Approximate order statistics over 32-bit pixel buffers.

/// Default number of bins used for image statistics.
pub const DEFAULT_STAT_BINS: usize = 100;

/// Equal-width binned CDF over `[0, max]` of the last update.
///
/// `min`/`max` are exact; `quantile` resolves to `bin_size`.
#[derive(Clone, Debug)]
pub struct QuantileHistogram {
    counts: Vec<u64>,
    cdf: Vec<u64>,
    bin_size: u32,
    min: u32,
    max: u32,
    cdf_stale: bool,
}

impl Default for QuantileHistogram {
    fn default() -> Self {
        Self::new(DEFAULT_STAT_BINS)
    }
}

impl QuantileHistogram {
    /// Create a histogram with `nr_bins` bins. Zero bins yields a no-op instance.
    #[must_use]
    pub fn new(nr_bins: usize) -> Self {
        Self {
            counts: vec![0; nr_bins],
            cdf: vec![0; nr_bins],
            bin_size: 1,
            min: 0,
            max: 0,
            cdf_stale: false,
        }
    }

    /// Rebuild from `values`, computing exact extremes first.
    pub fn update(&mut self, values: &[u32]) {
        if self.counts.is_empty() {
            return;
        }
        let (min, max) = values
            .iter()
            .fold((u32::MAX, 0u32), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if values.is_empty() {
            self.min = 0;
            self.max = 0;
        } else {
            self.min = min;
            self.max = max;
        }
        self.update_with_max(values, self.max);
    }

    /// Rebuild with a caller-supplied maximum, leaving `min`/`max` untouched.
    pub fn update_with_max(&mut self, values: &[u32], max: u32) {
        let nr_bins = self.counts.len();
        if nr_bins == 0 {
            return;
        }
        self.counts.fill(0);
        let n = u32::try_from(nr_bins).unwrap_or(u32::MAX);
        self.bin_size = max.div_ceil(n).max(1);
        for &v in values {
            let bin = ((v / self.bin_size) as usize).min(nr_bins - 1);
            self.counts[bin] += 1;
        }
        self.cdf_stale = true;
    }

    /// Value below which a fraction `p` of the samples falls.
    pub fn quantile(&mut self, p: f64) -> u32 {
        if self.counts.is_empty() {
            return 0;
        }
        if self.cdf_stale {
            self.rebuild_cdf();
        }
        let total = self.cdf[self.cdf.len() - 1];
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target = (p * total as f64) as u64;
        self.cdf
            .iter()
            .position(|&c| target < c)
            .map_or(self.max, |i| {
                u32::try_from(i).unwrap_or(u32::MAX).saturating_mul(self.bin_size)
            })
    }

    fn rebuild_cdf(&mut self) {
        let mut cumulative = 0u64;
        for (c, &n) in self.cdf.iter_mut().zip(&self.counts) {
            cumulative += n;
            *c = cumulative;
        }
        self.cdf_stale = false;
    }

    #[must_use]
    pub fn max(&self) -> u32 {
        if self.counts.is_empty() { 0 } else { self.max }
    }

    #[must_use]
    pub fn min(&self) -> u32 {
        if self.counts.is_empty() { 0 } else { self.min }
    }

    #[must_use]
    pub fn bin_size(&self) -> u32 {
        if self.counts.is_empty() { 0 } else { self.bin_size }
    }

    #[must_use]
    pub fn nr_bins(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: u32) -> Vec<u32> {
        (0..n).map(|i| (i * 37) % 1013).collect()
    }

    #[test]
    fn test_extremes_exact() {
        let mut h = QuantileHistogram::default();
        h.update(&[5, 900, 17, 3, 44]);
        assert_eq!(h.min(), 3);
        assert_eq!(h.max(), 900);
        assert_eq!(h.bin_size(), 9);
    }

    #[test]
    fn test_quantile_monotonic() {
        let mut h = QuantileHistogram::new(100);
        h.update(&ramp(5000));
        let mut prev = 0;
        for step in 0..=100 {
            let q = h.quantile(f64::from(step) / 100.0);
            assert!(q >= prev, "quantile decreased at p={step}%");
            prev = q;
        }
    }

    #[test]
    fn test_quantile_one_near_max() {
        let mut h = QuantileHistogram::new(100);
        let values = ramp(4000);
        h.update(&values);
        let q = h.quantile(1.0);
        assert!(h.max() - q.min(h.max()) <= h.bin_size());
        assert!(q <= h.max());
    }

    #[test]
    fn test_zero_bins_noop() {
        let mut h = QuantileHistogram::new(0);
        h.update(&[1, 2, 3]);
        assert_eq!(h.max(), 0);
        assert_eq!(h.min(), 0);
        assert_eq!(h.quantile(0.5), 0);
        assert_eq!(h.nr_bins(), 0);
    }

    #[test]
    fn test_empty_input() {
        let mut h = QuantileHistogram::new(10);
        h.update(&[]);
        assert_eq!((h.min(), h.max()), (0, 0));
        assert_eq!(h.quantile(0.5), 0);
    }

    #[test]
    fn test_constant_buffer() {
        let mut h = QuantileHistogram::new(100);
        h.update(&[7; 64]);
        assert_eq!(h.quantile(0.0), 7);
        assert_eq!(h.quantile(0.998), 7);
        assert_eq!(h.max(), 7);
    }
}
