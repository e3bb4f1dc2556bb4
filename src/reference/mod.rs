//! The reference layer: formation, Fibonacci levels, completion and
//! invalidation on top of raw legs.
//!
//! `update` is idempotent for a given (bar, leg-snapshot) pair and owns
//! every trading-relevant concept the leg detector deliberately excludes.

mod levels;
mod swing;

pub use levels::{COMPLETION_RATIO, FIB_LEVELS, levels_between};
pub use swing::{LevelCrossing, ReferenceSwing, SwingId, SwingStatus};

use std::collections::HashSet;

use log::debug;

use crate::config::{PriceLike, ReferenceConfig};
use crate::detector::{LegArena, LegId};
use crate::domain::{Bar, Direction, Scale};
use crate::events::{EventKind, InvalidationRule, StructuralEvent};

/// An established reference as seen from a smaller scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstablishedRef {
    pub direction: Direction,
    pub origin: f64,
    pub pivot: f64,
}

impl EstablishedRef {
    fn range(&self) -> f64 {
        (self.pivot - self.origin).abs()
    }

    fn sign(&self) -> f64 {
        self.direction.sign()
    }

    /// A price in this reference's frame; zero-range guards to the pivot.
    fn ratio_of(&self, price: f64) -> f64 {
        let range = self.range();
        if range == 0.0 {
            return 0.0;
        }
        (price - self.pivot) * self.sign() / range
    }
}

/// Read-only snapshot of larger-scale state, fed downward only.
#[derive(Debug, Clone, Default)]
pub struct ScaleContext {
    /// Defended pivot prices; smaller-scale pruning leaves legs anchored
    /// on one of these alone.
    pub defended_levels: Vec<f64>,
    pub established: Vec<EstablishedRef>,
}

impl ScaleContext {
    pub fn merge(&mut self, other: &ScaleContext) {
        self.defended_levels.extend(other.defended_levels.iter().copied());
        self.established.extend(other.established.iter().copied());
    }
}

pub struct ReferenceLayer {
    scale: Scale,
    config: ReferenceConfig,
    /// Calibrated size band; `None` promotes regardless of range
    /// (calibration mode).
    boundary: Option<(f64, f64)>,
    /// Larger-scale context; `None` at the top scale.
    context: Option<ScaleContext>,
    swings: Vec<ReferenceSwing>,
    promoted: HashSet<LegId>,
    next_id: u64,
}

impl ReferenceLayer {
    pub fn new(scale: Scale, config: ReferenceConfig) -> Self {
        Self {
            scale,
            config,
            boundary: None,
            context: None,
            swings: Vec::new(),
            promoted: HashSet::new(),
            next_id: 0,
        }
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn set_boundary(&mut self, boundary: Option<(f64, f64)>) {
        self.boundary = boundary;
    }

    pub fn set_context(&mut self, context: Option<ScaleContext>) {
        self.context = context;
    }

    pub fn swings(&self) -> &[ReferenceSwing] {
        &self.swings
    }

    /// This scale's contribution to smaller scales' context.
    pub fn context_snapshot(&self) -> ScaleContext {
        let established: Vec<EstablishedRef> = self
            .swings
            .iter()
            .filter(|s| s.status == SwingStatus::Formed)
            .map(|s| EstablishedRef {
                direction: s.direction,
                origin: s.origin.price,
                pivot: s.pivot.price,
            })
            .collect();
        ScaleContext {
            defended_levels: established.iter().map(|e| e.pivot).collect(),
            established,
        }
    }

    /// Evaluate formation, level crossings and terminal transitions for
    /// one bar against the detector's current legs.
    pub fn update(&mut self, bar: &Bar, arena: &LegArena) -> Vec<StructuralEvent> {
        let mut events = Vec::new();

        self.run_formation(bar, arena, &mut events);
        self.run_crossings(bar, &mut events);
        self.run_terminals(bar, &mut events);

        debug!(
            "{}: bar {} -> {} reference events, {} tracked swings",
            self.scale,
            bar.index,
            events.len(),
            self.swings.len()
        );
        events.sort_by_key(|e| e.kind.order_rank());
        events
    }

    fn run_formation(
        &mut self,
        bar: &Bar,
        arena: &LegArena,
        events: &mut Vec<StructuralEvent>,
    ) {
        let close = bar.close.value();
        let established = self.established_for_separation();

        for leg in arena.iter() {
            if !leg.is_alive() || self.promoted.contains(&leg.id) {
                continue;
            }
            let range = leg.range();
            if range == 0.0 {
                continue;
            }
            if let Some((min, max)) = self.boundary
                && !(range >= min && range < max)
            {
                continue;
            }

            let threshold = self
                .config
                .formation_ratio(leg.direction == Direction::Bull);
            let close_ratio = (close - leg.pivot.price) * leg.direction.sign() / range;
            if close_ratio < threshold {
                continue;
            }

            if self.is_redundant(leg.direction, leg.origin.price, leg.pivot.price, &established) {
                debug!(
                    "{}: candidate {} [{} -> {}] rejected as restatement",
                    self.scale, leg.id, leg.origin.price, leg.pivot.price
                );
                continue;
            }

            let id = SwingId::new(self.next_id);
            self.next_id += 1;
            self.promoted.insert(leg.id);
            self.swings.push(ReferenceSwing {
                id,
                leg_id: leg.id,
                scale: self.scale,
                direction: leg.direction,
                origin: leg.origin,
                pivot: leg.pivot,
                formation_bar: bar.index,
                status: SwingStatus::Formed,
                last_close_ratio: threshold,
                crossings: Vec::new(),
            });
            events.push(StructuralEvent::new(
                bar.index,
                bar.timestamp_ms,
                self.scale,
                leg.direction,
                EventKind::SwingFormed {
                    swing_id: id,
                    origin: leg.origin.price,
                    pivot: leg.pivot.price,
                    formation_bar: bar.index,
                },
            ));
        }
    }

    fn run_crossings(&mut self, bar: &Bar, events: &mut Vec<StructuralEvent>) {
        let close = bar.close.value();
        let scale = self.scale;
        for swing in self
            .swings
            .iter_mut()
            .filter(|s| s.status == SwingStatus::Formed)
        {
            let new_ratio = swing.ratio_of(close);
            for (level, upward) in levels_between(swing.last_close_ratio, new_ratio) {
                swing.crossings.push(LevelCrossing {
                    bar: bar.index,
                    level,
                    upward,
                });
                events.push(StructuralEvent::new(
                    bar.index,
                    bar.timestamp_ms,
                    scale,
                    swing.direction,
                    EventKind::LevelCross {
                        swing_id: swing.id,
                        level_ratio: level,
                        upward,
                    },
                ));
            }
            swing.last_close_ratio = new_ratio;
        }
    }

    /// Wick-based invalidation first (the stop was hit on the way), then
    /// completion, then close-based soft invalidation.
    fn run_terminals(&mut self, bar: &Bar, events: &mut Vec<StructuralEvent>) {
        let close = bar.close.value();
        let low = bar.low.value();
        let high = bar.high.value();
        let strict = self.scale.uses_strict_invalidation();
        let deep = self.config.invalidation.deep_wick_ratio;
        let soft = self.config.invalidation.soft_close_ratio;
        let scale = self.scale;

        for swing in self
            .swings
            .iter_mut()
            .filter(|s| s.status == SwingStatus::Formed)
        {
            let adverse_price = match swing.direction {
                Direction::Bull => low,
                Direction::Bear => high,
            };
            let adverse_ratio = swing.ratio_of(adverse_price);
            let close_ratio = swing.ratio_of(close);

            let invalidation = if strict && adverse_ratio < 0.0 {
                Some((InvalidationRule::Strict, adverse_price))
            } else if !strict && adverse_ratio < -deep {
                Some((InvalidationRule::Deep, adverse_price))
            } else {
                None
            };

            if let Some((rule, violation_price)) = invalidation {
                swing.status = SwingStatus::Invalidated;
                events.push(StructuralEvent::new(
                    bar.index,
                    bar.timestamp_ms,
                    scale,
                    swing.direction,
                    EventKind::Invalidation {
                        swing_id: swing.id,
                        violation_price,
                        rule,
                    },
                ));
                continue;
            }

            if close_ratio > COMPLETION_RATIO {
                swing.status = SwingStatus::Completed;
                events.push(StructuralEvent::new(
                    bar.index,
                    bar.timestamp_ms,
                    scale,
                    swing.direction,
                    EventKind::Completion {
                        swing_id: swing.id,
                        completion_ratio: close_ratio,
                    },
                ));
                continue;
            }

            if !strict && close_ratio < -soft {
                swing.status = SwingStatus::Invalidated;
                events.push(StructuralEvent::new(
                    bar.index,
                    bar.timestamp_ms,
                    scale,
                    swing.direction,
                    EventKind::Invalidation {
                        swing_id: swing.id,
                        violation_price: close,
                        rule: InvalidationRule::SoftClose,
                    },
                ));
            }
        }
    }

    fn established_for_separation(&self) -> Vec<EstablishedRef> {
        match &self.context {
            Some(ctx) => ctx.established.clone(),
            None => self.context_snapshot().established,
        }
    }

    /// A candidate not separated from an established reference by the
    /// minimum Fibonacci distance on both endpoints restates it.
    fn is_redundant(
        &self,
        direction: Direction,
        origin: f64,
        pivot: f64,
        established: &[EstablishedRef],
    ) -> bool {
        let min_sep = self.config.min_separation;
        established.iter().any(|e| {
            if e.direction != direction {
                return false;
            }
            let pivot_distance = e.ratio_of(pivot).abs();
            let origin_distance = (e.ratio_of(origin) + 1.0).abs();
            pivot_distance < min_sep || origin_distance < min_sep
        })
    }
}
