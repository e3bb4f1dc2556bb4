//! Calibration-pass tunables.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TARGET_BARS_PER_SWING: f64 = 24.0;
pub const DEFAULT_MIN_SAMPLES: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratorConfig {
    /// Desired aggregated-bar count across a typical swing of a scale;
    /// drives the aggregation-timeframe choice per quartile.
    pub target_bars_per_swing: f64,
    /// Minimum formed references required for a meaningful quartile split.
    pub min_samples: usize,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            target_bars_per_swing: DEFAULT_TARGET_BARS_PER_SWING,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

impl CalibratorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.target_bars_per_swing >= 1.0,
            "target_bars_per_swing must be >= 1, got {}",
            self.target_bars_per_swing
        );
        ensure!(
            self.min_samples >= 4,
            "min_samples must be >= 4 for a quartile split, got {}",
            self.min_samples
        );
        Ok(())
    }
}
