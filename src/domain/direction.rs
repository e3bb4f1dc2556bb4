use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Direction of a leg or swing.
///
/// A bull leg runs from a defended low (origin) to an extended high (pivot);
/// a bear leg is the mirror image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum Direction {
    #[strum(to_string = "bull")]
    Bull,
    #[strum(to_string = "bear")]
    Bear,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Bull => Direction::Bear,
            Direction::Bear => Direction::Bull,
        }
    }

    /// +1.0 for bull, -1.0 for bear. Used by the Fibonacci frame.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Bull => 1.0,
            Direction::Bear => -1.0,
        }
    }

    /// True when `a` lies beyond `b` in this direction.
    #[inline]
    pub fn is_beyond(self, a: f64, b: f64) -> bool {
        match self {
            Direction::Bull => a > b,
            Direction::Bear => a < b,
        }
    }
}
