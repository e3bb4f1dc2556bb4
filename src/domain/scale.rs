use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// One of the four simultaneous magnitude bands.
///
/// Ordering follows magnitude: `S < M < L < XL`. Larger scales carry causal
/// priority: they are processed first within a coordinator step and win
/// event-stream ties.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
)]
pub enum Scale {
    S,
    M,
    L,
    XL,
}

impl Scale {
    /// All scales, largest first (coordinator processing order).
    pub const fn descending() -> [Scale; 4] {
        [Scale::XL, Scale::L, Scale::M, Scale::S]
    }

    /// All scales, smallest first.
    pub const fn ascending() -> [Scale; 4] {
        [Scale::S, Scale::M, Scale::L, Scale::XL]
    }

    /// Wicks dominate small-scale moves, so S/M invalidate strictly while
    /// L/XL tolerate intrabar noise via the two-threshold soft rule.
    pub fn uses_strict_invalidation(self) -> bool {
        matches!(self, Scale::S | Scale::M)
    }

    /// The scale with no larger-scale context above it.
    pub fn is_top(self) -> bool {
        self == Scale::XL
    }
}
