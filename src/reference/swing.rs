use serde::{Deserialize, Serialize};

use crate::detector::{Extremum, LegId};
use crate::domain::{Direction, Scale};

/// Opaque reference-swing key, monotonic per layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SwingId(u64);

impl SwingId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SwingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingStatus {
    Formed,
    Completed,
    Invalidated,
}

/// One recorded level crossing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelCrossing {
    pub bar: u64,
    pub level: f64,
    pub upward: bool,
}

/// A leg promoted to trading relevance.
///
/// The swing owns a direction-normalized coordinate frame anchored at the
/// defended pivot: `price(r) = pivot + d * r * range`. Ratio 0 is the
/// pivot, 2.0 the completion target, negative ratios stop-run territory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSwing {
    pub id: SwingId,
    pub leg_id: LegId,
    pub scale: Scale,
    pub direction: Direction,
    pub origin: Extremum,
    pub pivot: Extremum,
    pub formation_bar: u64,
    pub status: SwingStatus,
    /// Close ratio as of the last processed bar; the formation threshold
    /// at birth.
    pub last_close_ratio: f64,
    pub crossings: Vec<LevelCrossing>,
}

impl ReferenceSwing {
    #[inline]
    pub fn range(&self) -> f64 {
        (self.pivot.price - self.origin.price).abs()
    }

    /// Price at a frame coordinate.
    #[inline]
    pub fn price_at(&self, ratio: f64) -> f64 {
        self.pivot.price + self.direction.sign() * ratio * self.range()
    }

    /// Frame coordinate of a price. A degenerate zero-range swing maps
    /// everything to the pivot rather than dividing by zero.
    #[inline]
    pub fn ratio_of(&self, price: f64) -> f64 {
        let range = self.range();
        if range == 0.0 {
            return 0.0;
        }
        (price - self.pivot.price) * self.direction.sign() / range
    }
}
