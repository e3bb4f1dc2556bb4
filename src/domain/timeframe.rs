use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;

/// Natural aggregation widths, smallest to largest.
///
/// Aggregated bars align to multiples of the width from the epoch, so a 1h
/// bar always starts on the hour regardless of where the feed begins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumIter,
    Default,
)]
pub enum Timeframe {
    #[default]
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub const fn width_ms(self) -> i64 {
        const MS_IN_MIN: i64 = 60 * 1000;
        match self {
            Self::M1 => MS_IN_MIN,
            Self::M5 => 5 * MS_IN_MIN,
            Self::M15 => 15 * MS_IN_MIN,
            Self::H1 => 60 * MS_IN_MIN,
            Self::H4 => 4 * 60 * MS_IN_MIN,
            Self::D1 => 24 * 60 * MS_IN_MIN,
            Self::W1 => 7 * 24 * 60 * MS_IN_MIN,
        }
    }

    /// The ladder, smallest to largest.
    pub const fn ladder() -> &'static [Timeframe] {
        &[
            Self::M1,
            Self::M5,
            Self::M15,
            Self::H1,
            Self::H4,
            Self::D1,
            Self::W1,
        ]
    }

    /// Start of the natural bucket containing `timestamp_ms`.
    #[inline]
    pub fn bucket_start(self, timestamp_ms: i64) -> i64 {
        let width = self.width_ms();
        timestamp_ms - timestamp_ms.rem_euclid(width)
    }

    /// Largest ladder entry whose width does not exceed `target_ms`,
    /// never smaller than `floor`.
    pub fn snap_down(target_ms: i64, floor: Timeframe) -> Timeframe {
        let mut best = floor;
        for &tf in Self::ladder() {
            if tf.width_ms() <= target_ms && tf >= floor {
                best = tf;
            }
        }
        best
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::M1 => write!(f, "1m"),
            Self::M5 => write!(f, "5m"),
            Self::M15 => write!(f, "15m"),
            Self::H1 => write!(f, "1h"),
            Self::H4 => write!(f, "4h"),
            Self::D1 => write!(f, "1d"),
            Self::W1 => write!(f, "1w"),
        }
    }
}
