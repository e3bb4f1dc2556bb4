//! Leg-detector tunables.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::config::types::RangeFraction;

pub const DEFAULT_STALE_MULTIPLE: f64 = 3.0;
pub const DEFAULT_PROXIMITY_RANGE_FRACTION: f64 = 0.25;
pub const DEFAULT_PROXIMITY_TIME_FRACTION: f64 = 0.25;
pub const DEFAULT_MIN_DOMINATION_RATIO: f64 = 0.75;
pub const DEFAULT_PROTECTION_TOLERANCE: f64 = 0.002;

/// Sibling pruning among legs sharing a pivot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum TurnRatioMode {
    /// Keep every swing partner.
    #[default]
    Disabled,
    /// Discard partners whose counter-leg/leg range ratio falls below this.
    Threshold(f64),
    /// Keep only the K partners with the highest turn ratio.
    TopK(usize),
}

/// Knobs for the per-bar pruning pass. All named, all defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    /// Delete legs breached on both the origin and pivot sides.
    pub engulfed_enabled: bool,
    /// Delete legs sharing their pivot with their parent.
    pub inner_structure_enabled: bool,
    /// Flatten a dead leg once the opposite direction has moved this many
    /// multiples of its range past it.
    pub stale_extension_multiple: f64,
    /// Origin closeness as a fraction of the dominating partner's range.
    pub proximity_range_fraction: RangeFraction,
    /// Origin closeness as a fraction of the dominating partner's bar span.
    pub proximity_time_fraction: RangeFraction,
    /// Counter-trend magnitude floor, relative to the dominating partner's.
    pub min_domination_ratio: f64,
    pub turn_ratio: TurnRatioMode,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            engulfed_enabled: true,
            inner_structure_enabled: true,
            stale_extension_multiple: DEFAULT_STALE_MULTIPLE,
            proximity_range_fraction: RangeFraction::new(DEFAULT_PROXIMITY_RANGE_FRACTION),
            proximity_time_fraction: RangeFraction::new(DEFAULT_PROXIMITY_TIME_FRACTION),
            min_domination_ratio: DEFAULT_MIN_DOMINATION_RATIO,
            turn_ratio: TurnRatioMode::Disabled,
        }
    }
}

/// The full detector configuration for one scale instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DetectorConfig {
    pub pruning: PruningConfig,
    /// Relative price distance under which a leg origin sitting on a
    /// larger-scale defended level is exempt from pruning.
    pub protection_tolerance: RangeFraction,
}

impl DetectorConfig {
    pub fn with_defaults() -> Self {
        Self {
            pruning: PruningConfig::default(),
            protection_tolerance: RangeFraction::new(DEFAULT_PROTECTION_TOLERANCE),
        }
    }

    /// Out-of-range tunables are rejected at load time, never clamped.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pruning;
        ensure!(
            p.stale_extension_multiple >= 1.0,
            "stale_extension_multiple must be >= 1.0, got {}",
            p.stale_extension_multiple
        );
        ensure!(
            p.min_domination_ratio > 0.0 && p.min_domination_ratio <= 1.0,
            "min_domination_ratio must be in (0, 1], got {}",
            p.min_domination_ratio
        );
        match p.turn_ratio {
            TurnRatioMode::Disabled => {}
            TurnRatioMode::Threshold(t) => {
                ensure!(
                    t > 0.0,
                    "turn_ratio threshold must be positive, got {}",
                    t
                );
            }
            TurnRatioMode::TopK(k) => {
                ensure!(k >= 1, "turn_ratio top-K must keep at least one leg");
            }
        }
        Ok(())
    }
}
