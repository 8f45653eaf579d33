//! Streaming band statistics.

use pipeline_core::{BandStatistics, Error, Result};

/// Accumulates min, max, mean and population standard deviation for one
/// band in a single pass (Welford's update).
#[derive(Debug, Clone)]
pub struct BandAccumulator {
    nodata: Option<f64>,
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl BandAccumulator {
    pub fn new(nodata: Option<f64>) -> Self {
        Self {
            nodata,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Adds a sample. NaN and the nodata value are skipped.
    pub fn push(&mut self, value: f64) {
        if value.is_nan() || self.nodata == Some(value) {
            return;
        }

        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Number of valid samples seen.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Final statistics. A band without a single valid pixel has none.
    pub fn finish(&self, band_number: u32) -> Result<BandStatistics> {
        if self.count == 0 {
            return Err(Error::processing(format!(
                "band {band_number} has no valid pixels"
            )));
        }

        Ok(BandStatistics {
            min: self.min,
            max: self.max,
            mean: self.mean,
            std_dev: (self.m2 / self.count as f64).max(0.0).sqrt(),
        })
    }
}
