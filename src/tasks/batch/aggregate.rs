/// Incremental mean over successful items: `mean' = mean + (x - mean) / n`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct RunningMean {
    count: u32,
    mean: f64,
}

impl RunningMean {
    pub(crate) fn push(&mut self, value: f64) {
        self.count = self.count.saturating_add(1);
        self.mean += (value - self.mean) / f64::from(self.count);
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    /// 0 until the first value arrives.
    pub(crate) fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }
}
