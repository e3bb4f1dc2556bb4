//! Bar storage and multi-timeframe aggregation.

mod aggregator;
mod series;

pub use aggregator::{AggregationCursor, BarAggregator};
pub use series::BarSeries;
