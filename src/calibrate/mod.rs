//! Scale calibration: one full-history batch pass that turns the observed
//! reference-size distribution into S/M/L/XL boundaries and per-scale
//! aggregation timeframes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail, ensure};
use chrono::Utc;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};
use tabled::{Table, Tabled};
use uuid::Uuid;

use crate::config::{CalibratorConfig, DetectorConfig, ReferenceConfig};
use crate::data::BarSeries;
use crate::detector::LegDetector;
use crate::domain::{Scale, Timeframe};
use crate::reference::ReferenceLayer;
use crate::trace_time;
use crate::utils::time_utils;

/// Size band assigned to one scale. The XL band is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleBand {
    pub min: f64,
    pub max: f64,
}

impl ScaleBand {
    pub fn contains(&self, range: f64) -> bool {
        range >= self.min && range < self.max
    }
}

/// One formed reference observed during the batch pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingSample {
    pub range: f64,
    pub duration_ms: i64,
}

/// The calibration output consumed at session start and exposed read-only
/// to operator tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub id: Uuid,
    pub created_ms: i64,
    pub base_timeframe: Timeframe,
    pub sample_count: usize,
    pub bands: BTreeMap<Scale, ScaleBand>,
    pub aggregations: BTreeMap<Scale, Timeframe>,
}

impl CalibrationArtifact {
    pub fn band(&self, scale: Scale) -> ScaleBand {
        *self
            .bands
            .get(&scale)
            .unwrap_or_else(|| panic!("invariant violation: artifact missing band for {}", scale))
    }

    pub fn aggregation(&self, scale: Scale) -> Timeframe {
        *self.aggregations.get(&scale).unwrap_or_else(|| {
            panic!("invariant violation: artifact missing aggregation for {}", scale)
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("creating calibration cache {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), self)
            .context("serializing calibration artifact")?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening calibration cache {}", path.display()))?;
        let artifact: Self = bincode::deserialize_from(BufReader::new(file))
            .context("deserializing calibration artifact")?;
        Ok(artifact)
    }

    /// Operator-facing summary table.
    pub fn report(&self) -> String {
        #[derive(Tabled)]
        struct Row {
            #[tabled(rename = "Scale")]
            scale: String,
            #[tabled(rename = "Min Range")]
            min: String,
            #[tabled(rename = "Max Range")]
            max: String,
            #[tabled(rename = "Aggregation")]
            aggregation: String,
        }

        let rows: Vec<Row> = Scale::ascending()
            .iter()
            .map(|&scale| {
                let band = self.band(scale);
                Row {
                    scale: scale.to_string(),
                    min: format!("{:.4}", band.min),
                    max: if band.max.is_finite() {
                        format!("{:.4}", band.max)
                    } else {
                        "open".to_string()
                    },
                    aggregation: self.aggregation(scale).to_string(),
                }
            })
            .collect();

        format!(
            "Calibration {} ({} samples, {})\n{}",
            self.id,
            self.sample_count,
            time_utils::epoch_ms_to_utc(self.created_ms),
            Table::new(rows)
        )
    }
}

pub struct ScaleCalibrator {
    detector_config: DetectorConfig,
    reference_config: ReferenceConfig,
    config: CalibratorConfig,
}

impl ScaleCalibrator {
    pub fn new(
        detector_config: DetectorConfig,
        reference_config: ReferenceConfig,
        config: CalibratorConfig,
    ) -> Result<Self> {
        detector_config.validate()?;
        reference_config.validate()?;
        config.validate()?;
        Ok(Self {
            detector_config,
            reference_config,
            config,
        })
    }

    /// Run the batch pass and derive the artifact.
    ///
    /// Abortable between bars: the abort flag is honored at bar boundaries
    /// only, so no partially-applied bar can leak into the samples, and an
    /// abort leaves no artifact at all.
    pub fn calibrate(
        &self,
        series: &BarSeries,
        abort: Option<&AtomicBool>,
    ) -> Result<CalibrationArtifact> {
        let samples = trace_time!("calibration batch pass", 30_000_000, {
            self.collect_samples(series, abort)
        })?;
        ensure!(
            samples.len() >= self.config.min_samples,
            "calibration needs at least {} formed references, found {}",
            self.config.min_samples,
            samples.len()
        );

        let bands = quartile_bands(&samples);
        let aggregations = self.assign_timeframes(&samples, &bands, series.timeframe);

        let artifact = CalibrationArtifact {
            id: Uuid::new_v4(),
            created_ms: Utc::now().timestamp_millis(),
            base_timeframe: series.timeframe,
            sample_count: samples.len(),
            bands,
            aggregations,
        };
        info!(
            "calibrated {} samples over {} bars",
            artifact.sample_count,
            series.len()
        );
        Ok(artifact)
    }

    /// Full-history detection with an unconstrained reference layer.
    fn collect_samples(
        &self,
        series: &BarSeries,
        abort: Option<&AtomicBool>,
    ) -> Result<Vec<SwingSample>> {
        let mut detector = LegDetector::new(Scale::XL, self.detector_config.clone());
        let mut layer = ReferenceLayer::new(Scale::XL, self.reference_config.clone());

        let base_width = series.timeframe.width_ms();
        for bar in series.iter_bars() {
            if let Some(flag) = abort
                && flag.load(Ordering::Relaxed)
            {
                bail!("calibration aborted at bar {}", bar.index);
            }
            detector
                .advance(&bar)
                .with_context(|| format!("batch detection stopped at bar {}", bar.index))?;
            layer.update(&bar, detector.arena());
        }

        Ok(layer
            .swings()
            .iter()
            .map(|swing| SwingSample {
                range: swing.range(),
                duration_ms: swing.pivot.bar.saturating_sub(swing.origin.bar).max(1) as i64
                    * base_width,
            })
            .collect())
    }

    /// Per-quartile aggregation timeframes from median swing durations.
    /// The four band scans are independent and run in parallel.
    fn assign_timeframes(
        &self,
        samples: &[SwingSample],
        bands: &BTreeMap<Scale, ScaleBand>,
        base: Timeframe,
    ) -> BTreeMap<Scale, Timeframe> {
        let target = self.config.target_bars_per_swing;

        let raw: Vec<(Scale, Timeframe)> = Scale::ascending()
            .par_iter()
            .map(|&scale| {
                if scale == Scale::S {
                    return (scale, base);
                }
                let band = bands[&scale];
                let durations: Vec<f64> = samples
                    .iter()
                    .filter(|s| band.contains(s.range))
                    .map(|s| s.duration_ms as f64)
                    .collect();
                if durations.is_empty() {
                    return (scale, base);
                }
                let median = Data::new(durations).median();
                let tf = Timeframe::snap_down((median / target) as i64, base);
                (scale, tf)
            })
            .collect();

        // Coarseness must not decrease with scale.
        let mut out = BTreeMap::new();
        let mut floor = base;
        for (scale, tf) in raw {
            let chosen = tf.max(floor);
            floor = chosen;
            out.insert(scale, chosen);
        }
        out
    }
}

/// Quartile split of the observed reference sizes.
fn quartile_bands(samples: &[SwingSample]) -> BTreeMap<Scale, ScaleBand> {
    let ranges: Vec<f64> = samples.iter().map(|s| s.range).collect();
    let mut data = Data::new(ranges);
    let q1 = data.lower_quartile();
    let q2 = data.median();
    let q3 = data.upper_quartile();

    let mut bands = BTreeMap::new();
    bands.insert(Scale::S, ScaleBand { min: 0.0, max: q1 });
    bands.insert(Scale::M, ScaleBand { min: q1, max: q2 });
    bands.insert(Scale::L, ScaleBand { min: q2, max: q3 });
    bands.insert(
        Scale::XL,
        ScaleBand {
            min: q3,
            max: f64::INFINITY,
        },
    );
    bands
}
