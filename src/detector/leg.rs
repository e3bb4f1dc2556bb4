use serde::{Deserialize, Serialize};

use crate::domain::Direction;

/// Opaque arena key for a leg. Monotonic per detector; never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LegId(u32);

impl LegId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for LegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A price extremum anchored to the bar that printed it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    pub price: f64,
    pub bar: u64,
}

impl Extremum {
    pub const fn new(price: f64, bar: u64) -> Self {
        Self { price, bar }
    }
}

/// A directed price move between a defended origin and an extended pivot.
///
/// Legs are edges of the pivot tree; pivots are its nodes. Legs sharing a
/// pivot are swing partners. Breach maxima are tracked from creation,
/// unconditionally, never gated behind formation or any other
/// later-derived status.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub id: LegId,
    pub direction: Direction,
    pub origin: Extremum,
    pub pivot: Extremum,
    /// The leg whose pivot this leg's origin was confirmed at (creation-time
    /// invariant; pruning may later reparent to the nearest surviving
    /// ancestor).
    pub parent: Option<LegId>,
    pub children: Vec<LegId>,
    /// Running maximum excursion past the origin, against the leg direction.
    pub origin_breach: Option<f64>,
    /// Running maximum excursion past the pivot, along the leg direction.
    pub pivot_breach: Option<f64>,
    pub created_bar: u64,
}

impl Leg {
    /// Absolute price span. Always >= 0 by construction.
    #[inline]
    pub fn range(&self) -> f64 {
        (self.pivot.price - self.origin.price).abs()
    }

    /// Alive iff the origin has never been breached.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.origin_breach.is_none()
    }

    pub fn low(&self) -> f64 {
        self.origin.price.min(self.pivot.price)
    }

    pub fn high(&self) -> f64 {
        self.origin.price.max(self.pivot.price)
    }

    /// Bars spanned from origin to pivot, never zero.
    pub fn span_bars(&self) -> u64 {
        (self.pivot.bar.saturating_sub(self.origin.bar)).max(1)
    }

    /// How far `price` trades past the origin against this leg, if at all.
    pub fn origin_excursion(&self, price: f64) -> Option<f64> {
        let amount = match self.direction {
            Direction::Bull => self.origin.price - price,
            Direction::Bear => price - self.origin.price,
        };
        (amount > 0.0).then_some(amount)
    }

    /// How far `price` trades past the pivot along this leg, if at all.
    pub fn pivot_excursion(&self, price: f64) -> Option<f64> {
        let amount = match self.direction {
            Direction::Bull => price - self.pivot.price,
            Direction::Bear => self.pivot.price - price,
        };
        (amount > 0.0).then_some(amount)
    }
}

/// The derived mutate-style view of an alive branch: ancestor origin to
/// furthest pivot. Never primary state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedLeg {
    pub direction: Direction,
    pub origin: Extremum,
    pub pivot: Extremum,
    /// The arena leg carrying the projected pivot.
    pub tip: LegId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bull_leg() -> Leg {
        Leg {
            id: LegId::new(0),
            direction: Direction::Bull,
            origin: Extremum::new(100.0, 0),
            pivot: Extremum::new(150.0, 2),
            parent: None,
            children: Vec::new(),
            origin_breach: None,
            pivot_breach: None,
            created_bar: 2,
        }
    }

    #[test]
    fn range_is_non_negative() {
        let mut leg = bull_leg();
        assert_eq!(leg.range(), 50.0);
        leg.pivot = Extremum::new(100.0, 2);
        assert_eq!(leg.range(), 0.0);
    }

    #[test]
    fn alive_iff_origin_undefended() {
        let mut leg = bull_leg();
        assert!(leg.is_alive());
        leg.origin_breach = Some(1.0);
        assert!(!leg.is_alive());
    }

    #[test]
    fn excursions_are_directional() {
        let leg = bull_leg();
        assert_eq!(leg.origin_excursion(98.0), Some(2.0));
        assert_eq!(leg.origin_excursion(101.0), None);
        assert_eq!(leg.pivot_excursion(155.0), Some(5.0));
        assert_eq!(leg.pivot_excursion(149.0), None);
    }
}
