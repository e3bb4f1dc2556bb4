//! The scale coordinator: one detector + reference-layer pair per scale,
//! driven off naturally-aligned aggregated bars, merged into a single
//! time-ordered event stream.
//!
//! Scales are processed largest-first within a step; each larger scale's
//! committed state is snapshotted into a read-only context before any
//! smaller scale reads it. Nothing ever flows upward.

use anyhow::{Context, Result, ensure};
use log::debug;

use crate::calibrate::CalibrationArtifact;
use crate::config::{DetectorConfig, ReferenceConfig};
use crate::data::{AggregationCursor, BarAggregator, BarSeries};
use crate::detector::LegDetector;
use crate::domain::{Bar, Scale, Timeframe};
use crate::events::{StructuralEvent, sort_merged};
use crate::reference::{ReferenceLayer, ScaleContext};

struct ScalePair {
    scale: Scale,
    cursor: AggregationCursor,
    detector: LegDetector,
    layer: ReferenceLayer,
}

pub struct ScaleCoordinator {
    artifact: CalibrationArtifact,
    /// Largest scale first: processing order inside one step.
    pairs: Vec<ScalePair>,
    last_base: Option<(u64, i64)>,
}

impl ScaleCoordinator {
    pub fn new(
        artifact: CalibrationArtifact,
        detector_config: DetectorConfig,
        reference_config: ReferenceConfig,
    ) -> Result<Self> {
        detector_config.validate()?;
        reference_config.validate()?;

        let pairs = Scale::descending()
            .into_iter()
            .map(|scale| {
                let band = artifact.band(scale);
                let mut layer = ReferenceLayer::new(scale, reference_config.clone());
                layer.set_boundary(Some((band.min, band.max)));
                ScalePair {
                    scale,
                    cursor: AggregationCursor::new(artifact.aggregation(scale)),
                    detector: LegDetector::new(scale, detector_config.clone()),
                    layer,
                }
            })
            .collect();

        Ok(Self {
            artifact,
            pairs,
            last_base: None,
        })
    }

    pub fn artifact(&self) -> &CalibrationArtifact {
        &self.artifact
    }

    pub fn detector(&self, scale: Scale) -> &LegDetector {
        &self.find(scale).detector
    }

    pub fn layer(&self, scale: Scale) -> &ReferenceLayer {
        &self.find(scale).layer
    }

    fn find(&self, scale: Scale) -> &ScalePair {
        self.pairs
            .iter()
            .find(|p| p.scale == scale)
            .unwrap_or_else(|| panic!("invariant violation: no pair for scale {}", scale))
    }

    /// Drive one base-resolution bar through every scale.
    ///
    /// A scale is driven only when its aggregation bucket completes, so
    /// each per-scale detector sees exactly the bars a batch aggregation
    /// of the same history would produce.
    pub fn advance(&mut self, bar: &Bar) -> Result<Vec<StructuralEvent>> {
        bar.validate()?;
        if let Some((last_idx, last_ts)) = self.last_base {
            ensure!(
                bar.index > last_idx && bar.timestamp_ms > last_ts,
                "base bar {} does not advance past committed bar {}",
                bar.index,
                last_idx
            );
        }

        let mut events = Vec::new();
        let mut context = ScaleContext::default();

        for pair in self.pairs.iter_mut() {
            if let Some(completed) = pair.cursor.push(bar) {
                if !pair.scale.is_top() {
                    pair.detector
                        .set_protected_levels(context.defended_levels.clone());
                    pair.layer.set_context(Some(context.clone()));
                }
                let detector_events = pair
                    .detector
                    .advance(&completed)
                    .with_context(|| format!("scale {} detection", pair.scale))?;
                events.extend(detector_events);
                events.extend(pair.layer.update(&completed, pair.detector.arena()));
                debug!(
                    "{}: aggregated bar {} committed at base bar {}",
                    pair.scale, completed.index, bar.index
                );
            }
            // Committed state only; a scale contributes context whether or
            // not it was driven this step.
            context.merge(&pair.layer.context_snapshot());
        }

        sort_merged(&mut events);
        self.last_base = Some((bar.index, bar.timestamp_ms));
        Ok(events)
    }

    /// Full-history replay as a fold of `advance`: trivially equivalent to
    /// streaming the same bars one at a time.
    pub fn run_replay(&mut self, series: &BarSeries) -> Result<Vec<StructuralEvent>> {
        let mut events = Vec::new();
        for bar in series.iter_bars() {
            events.extend(self.advance(&bar)?);
        }
        Ok(events)
    }

    /// Batch-validation path, run once up front before a replay: precompute
    /// every scale's aggregation over the full history and cross-check the
    /// aggregated extrema against the source columns.
    pub fn validate_history(&self, series: &BarSeries) -> Result<()> {
        let mut timeframes: Vec<Timeframe> = Scale::ascending()
            .iter()
            .map(|&scale| self.artifact.aggregation(scale))
            .collect();
        timeframes.sort();
        timeframes.dedup();

        let aggregator = BarAggregator::precompute(series, &timeframes)?;
        for tf in timeframes {
            aggregator
                .validate_extrema(series, tf)
                .with_context(|| format!("validating {} aggregation", tf))?;
        }
        Ok(())
    }
}
