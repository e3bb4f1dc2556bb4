//! Reference-layer tunables: formation, invalidation, separation.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FORMATION_RATIO: f64 = 0.236;
pub const DEFAULT_DEEP_WICK_RATIO: f64 = 0.15;
pub const DEFAULT_SOFT_CLOSE_RATIO: f64 = 0.10;
pub const DEFAULT_MIN_SEPARATION: f64 = 0.1;

/// Retracement ratio a leg must close past to become a candidate
/// reference, configurable per direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FormationConfig {
    pub bull_ratio: f64,
    pub bear_ratio: f64,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            bull_ratio: DEFAULT_FORMATION_RATIO,
            bear_ratio: DEFAULT_FORMATION_RATIO,
        }
    }
}

/// Invalidation thresholds for the soft (L/XL) scale group, as fractions
/// of the swing range beyond the defended pivot. The strict group (S/M)
/// has no knobs: any trade through the pivot invalidates.
///
/// Wicks are a larger share of total movement at small scales, which is
/// why the strict rule lives there and the two-threshold split lives here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InvalidationConfig {
    /// Intrabar trade-through depth that invalidates even when the bar
    /// closes back inside.
    pub deep_wick_ratio: f64,
    /// Close-through depth that invalidates on the close alone.
    pub soft_close_ratio: f64,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            deep_wick_ratio: DEFAULT_DEEP_WICK_RATIO,
            soft_close_ratio: DEFAULT_SOFT_CLOSE_RATIO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReferenceConfig {
    pub formation: FormationConfig,
    pub invalidation: InvalidationConfig,
    /// Minimum Fibonacci distance between a new candidate's endpoints and
    /// an established reference's, below which the candidate is a
    /// redundant restatement.
    pub min_separation: f64,
}

impl ReferenceConfig {
    pub fn with_defaults() -> Self {
        Self {
            formation: FormationConfig::default(),
            invalidation: InvalidationConfig::default(),
            min_separation: DEFAULT_MIN_SEPARATION,
        }
    }

    pub fn formation_ratio(&self, bull: bool) -> f64 {
        if bull {
            self.formation.bull_ratio
        } else {
            self.formation.bear_ratio
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (label, ratio) in [
            ("bull", self.formation.bull_ratio),
            ("bear", self.formation.bear_ratio),
        ] {
            ensure!(
                ratio > 0.0 && ratio < 1.0,
                "{} formation ratio must be in (0, 1), got {}",
                label,
                ratio
            );
        }
        ensure!(
            self.invalidation.soft_close_ratio > 0.0,
            "soft_close_ratio must be positive, got {}",
            self.invalidation.soft_close_ratio
        );
        ensure!(
            self.invalidation.deep_wick_ratio > self.invalidation.soft_close_ratio,
            "deep_wick_ratio {} must exceed soft_close_ratio {}",
            self.invalidation.deep_wick_ratio,
            self.invalidation.soft_close_ratio
        );
        ensure!(
            self.min_separation >= 0.0,
            "min_separation cannot be negative, got {}",
            self.min_separation
        );
        Ok(())
    }
}
