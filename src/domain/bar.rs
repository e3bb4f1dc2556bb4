use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::config::{ClosePrice, HighPrice, LowPrice, OpenPrice, PriceLike};

/// A single price bar at some resolution.
///
/// Immutable once constructed; ordered by `index`. The core assumes the
/// data-loading collaborator has already handled gaps and normalization,
/// but still rejects structurally impossible bars before touching state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub index: u64,
    pub timestamp_ms: i64,
    pub open: OpenPrice,
    pub high: HighPrice,
    pub low: LowPrice,
    pub close: ClosePrice,
}

impl Bar {
    pub fn new(index: u64, timestamp_ms: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Bar {
            index,
            timestamp_ms,
            open: OpenPrice::new(open),
            high: HighPrice::new(high),
            low: LowPrice::new(low),
            close: ClosePrice::new(close),
        }
    }

    /// True when the bar closed at or above its open.
    ///
    /// Doubles as the intrabar path heuristic: a bullish bar is assumed to
    /// have traded open -> low -> high -> close.
    pub fn is_bullish(&self) -> bool {
        self.close.value() >= self.open.value()
    }

    /// Structural sanity: low <= open/close <= high.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.low <= self.high,
            "bar {}: low {} above high {}",
            self.index,
            self.low,
            self.high
        );
        ensure!(
            self.low.value() <= self.open.value() && self.open.value() <= self.high.value(),
            "bar {}: open {} outside [{}, {}]",
            self.index,
            self.open,
            self.low,
            self.high
        );
        ensure!(
            self.low.value() <= self.close.value() && self.close.value() <= self.high.value(),
            "bar {}: close {} outside [{}, {}]",
            self.index,
            self.close,
            self.low,
            self.high
        );
        Ok(())
    }
}
