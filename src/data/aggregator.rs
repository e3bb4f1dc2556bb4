//! Multi-timeframe bar aggregation.
//!
//! One O(N) precomputation per timeframe, then O(1) lookups from a source
//! index to the aggregated bar containing it. Buckets align to natural
//! timeframe boundaries, so the same history always aggregates the same
//! way regardless of where the feed starts.

use anyhow::{Result, bail, ensure};
use argminmax::ArgMinMax;
use itertools::Itertools;

use crate::config::PriceLike;
use crate::data::BarSeries;
use crate::domain::{Bar, Timeframe};

/// Incremental bucket builder.
///
/// Feeding base bars one at a time yields each aggregated bar exactly when
/// its bucket completes, byte-identical to the batch precomputation over
/// the same history.
#[derive(Debug, Clone, Default)]
pub struct AggregationCursor {
    timeframe: Timeframe,
    current: Option<Bar>,
    bucket_start: i64,
    emitted: u64,
}

impl AggregationCursor {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            current: None,
            bucket_start: 0,
            emitted: 0,
        }
    }

    /// Absorb one base bar; returns the previous aggregated bar when this
    /// base bar opens a new bucket.
    pub fn push(&mut self, bar: &Bar) -> Option<Bar> {
        let bucket = self.timeframe.bucket_start(bar.timestamp_ms);

        match self.current.as_mut() {
            Some(agg) if bucket == self.bucket_start => {
                if bar.high > agg.high {
                    agg.high = bar.high;
                }
                if bar.low < agg.low {
                    agg.low = bar.low;
                }
                agg.close = bar.close;
                None
            }
            Some(_) => {
                let finished = self.roll(bar, bucket);
                Some(finished)
            }
            None => {
                self.current = Some(self.fresh(bar, bucket));
                self.bucket_start = bucket;
                None
            }
        }
    }

    /// The bucket currently being built, if any. Read-only; partial buckets
    /// are never primary state downstream.
    pub fn partial(&self) -> Option<&Bar> {
        self.current.as_ref()
    }

    /// Hand out the trailing partial bucket at end of history.
    pub fn flush(&mut self) -> Option<Bar> {
        self.current.take()
    }

    fn roll(&mut self, bar: &Bar, bucket: i64) -> Bar {
        let finished = self.current.take().expect("roll without current bucket");
        self.emitted += 1;
        self.current = Some(self.fresh(bar, bucket));
        self.bucket_start = bucket;
        finished
    }

    fn fresh(&self, bar: &Bar, bucket: i64) -> Bar {
        Bar {
            index: self.emitted,
            timestamp_ms: bucket,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
        }
    }
}

/// Precomputed aggregation for one timeframe.
#[derive(Debug, Clone)]
struct AggregatedColumn {
    series: BarSeries,
    /// source index -> aggregated index
    index_map: Vec<u32>,
}

/// Batch aggregator over a full base-resolution history.
#[derive(Debug, Clone)]
pub struct BarAggregator {
    base: Timeframe,
    columns: Vec<(Timeframe, AggregatedColumn)>,
}

impl BarAggregator {
    /// Precompute aggregations for `timeframes` over `source`.
    /// Each requested timeframe must be at least as coarse as the base.
    pub fn precompute(source: &BarSeries, timeframes: &[Timeframe]) -> Result<Self> {
        let mut columns = Vec::with_capacity(timeframes.len());
        for &tf in timeframes {
            ensure!(
                tf.width_ms() >= source.timeframe.width_ms(),
                "cannot aggregate {} bars down to {}",
                source.timeframe,
                tf
            );
            columns.push((tf, Self::build_column(source, tf)));
        }
        Ok(Self {
            base: source.timeframe,
            columns,
        })
    }

    fn build_column(source: &BarSeries, tf: Timeframe) -> AggregatedColumn {
        let mut cursor = AggregationCursor::new(tf);
        let mut series = BarSeries::with_capacity(tf, source.len());
        let mut index_map = Vec::with_capacity(source.len());

        for bar in source.iter_bars() {
            if let Some(done) = cursor.push(&bar) {
                series.push(&done);
            }
            // The source bar belongs to whichever bucket is open now.
            index_map.push(series.len() as u32);
        }
        if let Some(tail) = cursor.flush() {
            series.push(&tail);
        }

        AggregatedColumn { series, index_map }
    }

    pub fn base_timeframe(&self) -> Timeframe {
        self.base
    }

    /// The aggregated bar containing `source_index`, O(1).
    pub fn get_bar(&self, timeframe: Timeframe, source_index: usize) -> Result<Bar> {
        let Some((_, column)) = self.columns.iter().find(|(tf, _)| *tf == timeframe) else {
            bail!("timeframe {} was not precomputed", timeframe);
        };
        ensure!(
            source_index < column.index_map.len(),
            "source index {} out of range ({} bars)",
            source_index,
            column.index_map.len()
        );
        let agg_idx = column.index_map[source_index] as usize;
        Ok(column.series.get_bar(agg_idx))
    }

    /// Full aggregated series for one timeframe.
    pub fn series(&self, timeframe: Timeframe) -> Result<&BarSeries> {
        self.columns
            .iter()
            .find(|(tf, _)| *tf == timeframe)
            .map(|(_, c)| &c.series)
            .ok_or_else(|| anyhow::anyhow!("timeframe {} was not precomputed", timeframe))
    }

    /// Cross-check each aggregated bar's extrema against the source rows it
    /// covers. Used by the batch validation path; the extremum scan runs on
    /// raw columns so it vectorizes.
    pub fn validate_extrema(&self, source: &BarSeries, timeframe: Timeframe) -> Result<()> {
        let Some((_, column)) = self.columns.iter().find(|(tf, _)| *tf == timeframe) else {
            bail!("timeframe {} was not precomputed", timeframe);
        };

        let highs: Vec<f64> = source.highs.iter().map(|h| h.value()).collect();
        let lows: Vec<f64> = source.lows.iter().map(|l| l.value()).collect();

        for (agg_idx, rows) in &column
            .index_map
            .iter()
            .enumerate()
            .chunk_by(|(_, agg_idx)| **agg_idx)
        {
            let rows: Vec<usize> = rows.map(|(row, _)| row).collect();
            let (start, end) = (rows[0], rows[rows.len() - 1] + 1);

            let agg = column.series.get_bar(agg_idx as usize);
            let (_, hi) = (&highs[start..end]).argminmax();
            let (lo, _) = (&lows[start..end]).argminmax();
            ensure!(
                agg.high.value() == highs[start + hi],
                "aggregated bar {} high {} disagrees with source extremum {}",
                agg_idx,
                agg.high,
                highs[start + hi]
            );
            ensure!(
                agg.low.value() == lows[start + lo],
                "aggregated bar {} low {} disagrees with source extremum {}",
                agg_idx,
                agg.low,
                lows[start + lo]
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    fn base_series(specs: &[(i64, f64, f64, f64, f64)]) -> BarSeries {
        let bars: Vec<Bar> = specs
            .iter()
            .enumerate()
            .map(|(i, &(ts, o, h, l, c))| Bar::new(i as u64, ts, o, h, l, c))
            .collect();
        BarSeries::from_bars(Timeframe::M1, &bars)
    }

    #[test]
    fn buckets_merge_ohlc() {
        let source = base_series(&[
            (0, 10.0, 12.0, 9.0, 11.0),
            (MIN, 11.0, 14.0, 10.0, 13.0),
            (2 * MIN, 13.0, 13.5, 12.0, 12.5),
            (3 * MIN, 12.5, 15.0, 12.0, 14.0),
            (4 * MIN, 14.0, 14.5, 13.0, 14.2),
            (5 * MIN, 14.2, 16.0, 14.0, 15.5),
        ]);
        let agg = BarAggregator::precompute(&source, &[Timeframe::M5]).unwrap();
        let first = agg.get_bar(Timeframe::M5, 2).unwrap();
        assert_eq!(first.open.value(), 10.0);
        assert_eq!(first.high.value(), 15.0);
        assert_eq!(first.low.value(), 9.0);
        assert_eq!(first.close.value(), 14.2);

        let second = agg.get_bar(Timeframe::M5, 5).unwrap();
        assert_eq!(second.open.value(), 14.2);
        assert_eq!(second.timestamp_ms, 5 * MIN);
    }

    #[test]
    fn cursor_matches_batch() {
        let source = base_series(&[
            (0, 1.0, 2.0, 0.5, 1.5),
            (MIN, 1.5, 3.0, 1.0, 2.5),
            (5 * MIN, 2.5, 4.0, 2.0, 3.0),
            (6 * MIN, 3.0, 3.5, 2.8, 3.2),
            (10 * MIN, 3.2, 5.0, 3.0, 4.5),
        ]);
        let agg = BarAggregator::precompute(&source, &[Timeframe::M5]).unwrap();
        let batch = agg.series(Timeframe::M5).unwrap();

        let mut cursor = AggregationCursor::new(Timeframe::M5);
        let mut streamed = BarSeries::with_capacity(Timeframe::M5, 4);
        for bar in source.iter_bars() {
            if let Some(done) = cursor.push(&bar) {
                streamed.push(&done);
            }
        }
        if let Some(tail) = cursor.flush() {
            streamed.push(&tail);
        }

        assert_eq!(batch.len(), streamed.len());
        for i in 0..batch.len() {
            let a = batch.get_bar(i);
            let b = streamed.get_bar(i);
            assert_eq!(a.timestamp_ms, b.timestamp_ms);
            assert_eq!(a.high.value(), b.high.value());
            assert_eq!(a.low.value(), b.low.value());
        }
    }

    #[test]
    fn extrema_validation_passes() {
        let source = base_series(&[
            (0, 1.0, 2.0, 0.5, 1.5),
            (MIN, 1.5, 3.0, 1.0, 2.5),
            (2 * MIN, 2.5, 2.8, 2.2, 2.6),
        ]);
        let agg = BarAggregator::precompute(&source, &[Timeframe::M5]).unwrap();
        agg.validate_extrema(&source, Timeframe::M5).unwrap();
    }

    #[test]
    fn refuses_finer_than_base() {
        let source = base_series(&[(0, 1.0, 2.0, 0.5, 1.5)]);
        let coarse = BarSeries::from_bars(Timeframe::H1, &source.iter_bars().collect::<Vec<_>>());
        assert!(BarAggregator::precompute(&coarse, &[Timeframe::M5]).is_err());
    }
}
