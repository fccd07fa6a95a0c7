//! Fixed-capacity output arrays mirroring a histogram for remote readers.

/// Live and accumulated copies of a histogram, clipped to a declared capacity.
#[derive(Clone, Debug, Default)]
pub struct OutputMirror {
    max_width: usize,
    max_height: usize,
    width: usize,
    height: usize,
    live: Vec<u32>,
    accu: Vec<i64>,
    accu_width: usize,
    accu_height: usize,
    accu_active: bool,
    time_axis: Vec<f64>,
}

impl OutputMirror {
    #[must_use]
    pub fn new(max_width: usize, max_height: usize) -> Self {
        Self {
            max_width,
            max_height,
            ..Self::default()
        }
    }

    /// Clip a histogram shape to the capacity. A height below two means a spectrum.
    #[must_use]
    pub fn clip(&self, width: usize, height: usize) -> (usize, usize) {
        let w = width.min(self.max_width);
        let h = height.min(self.max_height);
        (w, if h < 2 { 1 } else { h })
    }

    /// Replace the live array with the clipped view of `pixels` (row stride `stride`).
    pub fn copy_live(&mut self, pixels: &[u32], stride: usize, width: usize, height: usize) {
        let (w, h) = self.clip(width, height);
        self.live.clear();
        self.live.reserve(w * h);
        for y in 0..h {
            let row = y * stride;
            for x in 0..w {
                self.live.push(pixels.get(row + x).copied().unwrap_or(0));
            }
        }
        self.width = w;
        self.height = h;
    }

    /// Add the clipped view of `pixels` into the accumulation array.
    ///
    /// The array restarts from zero when the clipped shape changes.
    pub fn add_accumulated(&mut self, pixels: &[u32], stride: usize, width: usize, height: usize) {
        if !self.accu_active {
            return;
        }
        let (w, h) = self.clip(width, height);
        if (w, h) != (self.accu_width, self.accu_height) || self.accu.len() != w * h {
            self.accu = vec![0; w * h];
            self.accu_width = w;
            self.accu_height = h;
        }
        for y in 0..h {
            for x in 0..w {
                let v = pixels.get(y * stride + x).copied().unwrap_or(0);
                self.accu[y * w + x] += i64::from(v);
            }
        }
        self.width = w;
        self.height = h;
    }

    pub fn zero_accumulation(&mut self) {
        self.accu.fill(0);
    }

    pub fn set_accumulation_active(&mut self, active: bool) {
        self.accu_active = active;
    }

    #[must_use]
    pub fn accumulation_active(&self) -> bool {
        self.accu_active
    }

    pub fn time_axis_mut(&mut self, len: usize) -> &mut [f64] {
        self.time_axis.resize(len, 0.0);
        &mut self.time_axis
    }

    #[must_use]
    pub fn live(&self) -> &[u32] {
        &self.live
    }

    #[must_use]
    pub fn accumulation(&self) -> &[i64] {
        &self.accu
    }

    #[must_use]
    pub fn time_axis(&self) -> &[f64] {
        &self.time_axis
    }

    /// Width and height of the most recent copy.
    #[must_use]
    pub fn data_shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn capacity(&self) -> (usize, usize) {
        (self.max_width, self.max_height)
    }
}
