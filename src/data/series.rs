use serde::{Deserialize, Serialize};

use crate::config::{ClosePrice, HighPrice, LowPrice, OpenPrice};
use crate::domain::{Bar, Timeframe};

/// Column-major bar storage.
///
/// Keeping the four price columns in parallel vectors keeps the calibrator's
/// full-history scans cache-friendly; individual bars are materialized on
/// demand.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BarSeries {
    pub timeframe: Timeframe,
    pub timestamps: Vec<i64>,
    pub opens: Vec<OpenPrice>,
    pub highs: Vec<HighPrice>,
    pub lows: Vec<LowPrice>,
    pub closes: Vec<ClosePrice>,
}

impl BarSeries {
    pub fn with_capacity(timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            timeframe,
            timestamps: Vec::with_capacity(capacity),
            opens: Vec::with_capacity(capacity),
            highs: Vec::with_capacity(capacity),
            lows: Vec::with_capacity(capacity),
            closes: Vec::with_capacity(capacity),
        }
    }

    pub fn from_bars(timeframe: Timeframe, bars: &[Bar]) -> Self {
        let mut series = Self::with_capacity(timeframe, bars.len());
        for bar in bars {
            series.push(bar);
        }
        series
    }

    pub fn push(&mut self, bar: &Bar) {
        self.timestamps.push(bar.timestamp_ms);
        self.opens.push(bar.open);
        self.highs.push(bar.high);
        self.lows.push(bar.low);
        self.closes.push(bar.close);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn get_bar(&self, idx: usize) -> Bar {
        Bar {
            index: idx as u64,
            timestamp_ms: self.timestamps[idx],
            open: self.opens[idx],
            high: self.highs[idx],
            low: self.lows[idx],
            close: self.closes[idx],
        }
    }

    pub fn iter_bars(&self) -> impl Iterator<Item = Bar> + '_ {
        (0..self.len()).map(|i| self.get_bar(i))
    }
}
