//! The pivot-tree engine.
//!
//! `advance(bar)` drives one bar through origin tracking, greedy branching,
//! breach accounting, pruning and flattening, and returns the bar's events
//! in canonical order. Streaming one bar at a time and replaying a full
//! history from empty state produce identical final state and events: the
//! engine is a pure fold over bars.

use std::collections::HashSet;

use anyhow::{Result, ensure};
use log::debug;

use crate::config::{DetectorConfig, PriceLike};
use crate::detector::arena::LegArena;
use crate::detector::flatten::flatten_to_fixed_point;
use crate::detector::leg::{Extremum, Leg, LegId, ProjectedLeg};
use crate::detector::pruning::{self, PruneContext};
use crate::domain::{Bar, Direction, Scale};
use crate::events::{EventKind, StructuralEvent};

pub struct LegDetector {
    scale: Scale,
    config: DetectorConfig,
    arena: LegArena,
    /// Most recent confirmed high/low pivot. Both are set once seeded.
    inner_high: Option<Extremum>,
    inner_low: Option<Extremum>,
    /// True when the most recently confirmed extremum is the high.
    tip_is_high: bool,
    /// At most one unconfirmed extremum per direction.
    pending_low: Option<Extremum>,
    pending_high: Option<Extremum>,
    /// Larger-scale defended levels, read-only context for pruning.
    protected_levels: Vec<f64>,
    last_bar: Option<(u64, i64)>,
}

impl LegDetector {
    pub fn new(scale: Scale, config: DetectorConfig) -> Self {
        Self {
            scale,
            config,
            arena: LegArena::new(),
            inner_high: None,
            inner_low: None,
            tip_is_high: false,
            pending_low: None,
            pending_high: None,
            protected_levels: Vec::new(),
            last_bar: None,
        }
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn arena(&self) -> &LegArena {
        &self.arena
    }

    /// Replace the larger-scale context before the next `advance`.
    pub fn set_protected_levels(&mut self, levels: Vec<f64>) {
        self.protected_levels = levels;
    }

    /// All tracked legs, creation order.
    pub fn snapshot(&self) -> Vec<&Leg> {
        self.arena.iter().collect()
    }

    /// Drive one bar through the engine.
    ///
    /// A malformed or non-monotonic bar is rejected before any state
    /// mutation; the detector stays exactly where it was.
    pub fn advance(&mut self, bar: &Bar) -> Result<Vec<StructuralEvent>> {
        bar.validate()?;
        if let Some((last_idx, last_ts)) = self.last_bar {
            ensure!(
                bar.index > last_idx && bar.timestamp_ms > last_ts,
                "bar {} does not advance past committed bar {} ({} vs {})",
                bar.index,
                last_idx,
                bar.timestamp_ms,
                last_ts
            );
        }

        let mut events = Vec::new();

        if self.inner_high.is_none() {
            self.seed(bar);
            self.last_bar = Some((bar.index, bar.timestamp_ms));
            return Ok(events);
        }

        // Intrabar path heuristic: a bullish bar trades its low side first.
        if bar.is_bullish() {
            self.process_down(bar, &mut events);
            self.process_up(bar, &mut events);
        } else {
            self.process_up(bar, &mut events);
            self.process_down(bar, &mut events);
        }

        self.breach_pass(bar, &mut events);
        self.prune_pass(bar, &mut events);

        // Canonical within-bar order; the sort is stable, so creation order
        // survives inside each kind.
        events.sort_by_key(|e| e.kind.order_rank());

        self.last_bar = Some((bar.index, bar.timestamp_ms));
        Ok(events)
    }

    fn seed(&mut self, bar: &Bar) {
        self.inner_high = Some(Extremum::new(bar.high.value(), bar.index));
        self.inner_low = Some(Extremum::new(bar.low.value(), bar.index));
        // A bullish first bar leaves its high as the most recent extremum.
        self.tip_is_high = bar.is_bullish();
        debug!(
            "{}: seeded from bar {} [{} .. {}]",
            self.scale, bar.index, bar.low, bar.high
        );
    }

    fn process_up(&mut self, bar: &Bar, events: &mut Vec<StructuralEvent>) {
        let h = bar.high.value();
        let inner_high = self.inner_high.expect("processing before seed");
        if h > inner_high.price {
            self.break_up(bar, events);
            return;
        }

        if self.tip_is_high {
            // Falling phase: highs only matter as the bounce after a
            // recorded retrace low.
            if self.pending_low.is_some()
                && self.pending_high.is_none_or(|ph| h > ph.price)
            {
                self.pending_high = Some(Extremum::new(h, bar.index));
            }
        } else {
            // Rising phase: highs are the primary pending pivot candidate;
            // a new bounce high restarts its retrace.
            if self.pending_high.is_none_or(|ph| h > ph.price) {
                self.pending_high = Some(Extremum::new(h, bar.index));
                self.pending_low = None;
            }
        }
    }

    fn process_down(&mut self, bar: &Bar, events: &mut Vec<StructuralEvent>) {
        let l = bar.low.value();
        let inner_low = self.inner_low.expect("processing before seed");
        if l < inner_low.price {
            self.break_down(bar, events);
            return;
        }

        if self.tip_is_high {
            if self.pending_low.is_none_or(|pl| l < pl.price) {
                self.pending_low = Some(Extremum::new(l, bar.index));
                self.pending_high = None;
            }
        } else if self.pending_high.is_some()
            && self.pending_low.is_none_or(|pl| l < pl.price)
        {
            self.pending_low = Some(Extremum::new(l, bar.index));
        }
    }

    /// The bar's high broke the confirmed inner high: materialize the
    /// retrace structure greedily and move the tip.
    fn break_up(&mut self, bar: &Bar, events: &mut Vec<StructuralEvent>) {
        let h = Extremum::new(bar.high.value(), bar.index);
        let inner_high = self.inner_high.expect("break before seed");
        let inner_low = self.inner_low.expect("break before seed");

        if self.tip_is_high {
            // Reversal out of a falling phase: the deepest retrace low
            // becomes a confirmed pivot.
            if let Some(pl) = self.pending_low.filter(|pl| pl.price < inner_high.price) {
                self.create_leg(Direction::Bear, inner_high, pl, bar, events);
                self.create_leg(Direction::Bull, pl, h, bar, events);
                self.inner_low = Some(pl);
            } else {
                self.create_leg(Direction::Bull, inner_low, h, bar, events);
            }
        } else {
            match (self.pending_high, self.pending_low) {
                (Some(ph), Some(pl))
                    if pl.bar >= ph.bar
                        && ph.price > inner_low.price
                        && pl.price < ph.price =>
                {
                    // Full bounce/retrace pair recorded since the tip low.
                    self.create_leg(Direction::Bull, inner_low, ph, bar, events);
                    self.create_leg(Direction::Bear, ph, pl, bar, events);
                    self.create_leg(Direction::Bull, pl, h, bar, events);
                    self.inner_low = Some(pl);
                }
                _ => {
                    // Plain continuation from the confirmed low.
                    self.create_leg(Direction::Bull, inner_low, h, bar, events);
                }
            }
        }

        self.inner_high = Some(h);
        self.tip_is_high = true;
        self.pending_low = None;
        self.pending_high = None;
    }

    fn break_down(&mut self, bar: &Bar, events: &mut Vec<StructuralEvent>) {
        let l = Extremum::new(bar.low.value(), bar.index);
        let inner_high = self.inner_high.expect("break before seed");
        let inner_low = self.inner_low.expect("break before seed");

        if !self.tip_is_high {
            if let Some(ph) = self.pending_high.filter(|ph| ph.price > inner_low.price) {
                self.create_leg(Direction::Bull, inner_low, ph, bar, events);
                self.create_leg(Direction::Bear, ph, l, bar, events);
                self.inner_high = Some(ph);
            } else {
                self.create_leg(Direction::Bear, inner_high, l, bar, events);
            }
        } else {
            match (self.pending_low, self.pending_high) {
                (Some(pl), Some(ph))
                    if ph.bar >= pl.bar
                        && pl.price < inner_high.price
                        && ph.price > pl.price =>
                {
                    self.create_leg(Direction::Bear, inner_high, pl, bar, events);
                    self.create_leg(Direction::Bull, pl, ph, bar, events);
                    self.create_leg(Direction::Bear, ph, l, bar, events);
                    self.inner_high = Some(ph);
                }
                _ => {
                    self.create_leg(Direction::Bear, inner_high, l, bar, events);
                }
            }
        }

        self.inner_low = Some(l);
        self.tip_is_high = false;
        self.pending_low = None;
        self.pending_high = None;
    }

    /// Guarded creation: directional sanity, ordered bars, nonzero range,
    /// arena-level dedup. Parent is the newest leg whose pivot matches the
    /// new origin.
    fn create_leg(
        &mut self,
        direction: Direction,
        origin: Extremum,
        pivot: Extremum,
        bar: &Bar,
        events: &mut Vec<StructuralEvent>,
    ) -> Option<LegId> {
        if !direction.is_beyond(pivot.price, origin.price) || origin.bar > pivot.bar {
            return None;
        }
        let parent = self.arena.legs_with_pivot(&origin).into_iter().max();
        self.insert_with_parent(direction, origin, pivot, parent, bar, events)
    }

    fn insert_with_parent(
        &mut self,
        direction: Direction,
        origin: Extremum,
        pivot: Extremum,
        parent: Option<LegId>,
        bar: &Bar,
        events: &mut Vec<StructuralEvent>,
    ) -> Option<LegId> {
        let id = self
            .arena
            .insert(direction, origin, pivot, parent, bar.index)?;
        events.push(self.event(
            bar,
            direction,
            EventKind::LegCreated {
                leg_id: id,
                origin: origin.price,
                pivot: pivot.price,
                parent_leg_id: parent,
            },
        ));
        Some(id)
    }

    /// Unconditional breach accounting: every tracked leg, every bar,
    /// origin side first. The alive->dead transition spawns the counter-leg
    /// from the dead leg's pivot to the breaching extremum.
    fn breach_pass(&mut self, bar: &Bar, events: &mut Vec<StructuralEvent>) {
        let low = bar.low.value();
        let high = bar.high.value();

        let mut counters: Vec<(Direction, Extremum, Extremum, LegId)> = Vec::new();
        for id in self.arena.ids() {
            let Some(leg) = self.arena.get_mut(id) else {
                continue;
            };
            let probe = match leg.direction {
                Direction::Bull => low,
                Direction::Bear => high,
            };
            if let Some(amount) = leg.origin_excursion(probe) {
                match leg.origin_breach {
                    None => {
                        leg.origin_breach = Some(amount);
                        let direction = leg.direction;
                        let pivot = leg.pivot;
                        events.push(self.event(
                            bar,
                            direction,
                            EventKind::OriginBreached {
                                leg_id: id,
                                breach_amount: amount,
                            },
                        ));
                        let counter_dir = direction.opposite();
                        let target = match counter_dir {
                            Direction::Bull => Extremum::new(high, bar.index),
                            Direction::Bear => Extremum::new(low, bar.index),
                        };
                        counters.push((counter_dir, pivot, target, id));
                    }
                    Some(prev) if amount > prev => leg.origin_breach = Some(amount),
                    Some(_) => {}
                }
            }
        }

        // One round of counter-legs per bar; no cascading.
        for (direction, origin, target, parent) in counters {
            if !direction.is_beyond(target.price, origin.price) || origin.bar > target.bar {
                continue;
            }
            if let Some(new_id) =
                self.insert_with_parent(direction, origin, target, Some(parent), bar, events)
            {
                // A sweeping bar can breach the newborn's origin too.
                let probe = match direction {
                    Direction::Bull => low,
                    Direction::Bear => high,
                };
                let excursion = self
                    .arena
                    .get(new_id)
                    .and_then(|leg| leg.origin_excursion(probe));
                if let Some(amount) = excursion {
                    self.arena.get_mut(new_id).expect("just inserted").origin_breach =
                        Some(amount);
                    events.push(self.event(
                        bar,
                        direction,
                        EventKind::OriginBreached {
                            leg_id: new_id,
                            breach_amount: amount,
                        },
                    ));
                }
            }
        }

        for id in self.arena.ids() {
            let Some(leg) = self.arena.get_mut(id) else {
                continue;
            };
            let probe = match leg.direction {
                Direction::Bull => high,
                Direction::Bear => low,
            };
            if let Some(amount) = leg.pivot_excursion(probe) {
                match leg.pivot_breach {
                    None => {
                        leg.pivot_breach = Some(amount);
                        let direction = leg.direction;
                        events.push(self.event(
                            bar,
                            direction,
                            EventKind::PivotBreached {
                                leg_id: id,
                                breach_amount: amount,
                            },
                        ));
                    }
                    Some(prev) if amount > prev => leg.pivot_breach = Some(amount),
                    Some(_) => {}
                }
            }
        }
    }

    /// Ordered rule list, then containment flattening to a fixed point.
    /// Rules only remove; each rule's removals commit before the next rule
    /// evaluates.
    fn prune_pass(&mut self, bar: &Bar, events: &mut Vec<StructuralEvent>) {
        let pruning_config = self.config.pruning.clone();
        let tolerance = self.config.protection_tolerance.value();

        for rule in pruning::rule_list() {
            let mut victims: Vec<(LegId, crate::events::PruneReason, Direction)> = Vec::new();
            {
                let ctx = PruneContext {
                    arena: &self.arena,
                    config: &pruning_config,
                    protected_levels: &self.protected_levels,
                    protection_tolerance: tolerance,
                };
                for leg in self.arena.iter() {
                    if pruning::is_protected(leg, &ctx) {
                        continue;
                    }
                    if let Some(reason) = rule(leg, &ctx) {
                        victims.push((leg.id, reason, leg.direction));
                    }
                }
            }
            for (id, reason, direction) in victims {
                if self.arena.remove(id).is_some() {
                    events.push(self.event(
                        bar,
                        direction,
                        EventKind::LegPruned {
                            leg_id: id,
                            reason,
                        },
                    ));
                }
            }
        }

        for removed in flatten_to_fixed_point(&mut self.arena) {
            events.push(self.event(
                bar,
                removed.direction,
                EventKind::LegPruned {
                    leg_id: removed.id,
                    reason: crate::events::PruneReason::Engulfed,
                },
            ));
        }
    }

    /// The derived mutate-style projection of each alive branch tip:
    /// deepest same-direction ancestor origin to the tip's pivot. Never
    /// primary state.
    pub fn flattened_view(&self) -> Vec<ProjectedLeg> {
        let alive: Vec<&Leg> = self.arena.iter().filter(|l| l.is_alive()).collect();

        let mut interior: HashSet<LegId> = HashSet::new();
        for leg in &alive {
            let mut cursor = leg.parent;
            while let Some(pid) = cursor {
                let Some(parent) = self.arena.get(pid) else {
                    break;
                };
                interior.insert(pid);
                cursor = parent.parent;
            }
        }

        let mut out = Vec::new();
        for leg in alive {
            if interior.contains(&leg.id) {
                continue;
            }
            let mut origin = leg.origin;
            let mut cursor = leg.parent;
            while let Some(pid) = cursor {
                let Some(ancestor) = self.arena.get(pid) else {
                    break;
                };
                if ancestor.direction == leg.direction
                    && !leg.direction.is_beyond(ancestor.pivot.price, leg.pivot.price)
                    && leg
                        .direction
                        .opposite()
                        .is_beyond(ancestor.origin.price, origin.price)
                {
                    origin = ancestor.origin;
                }
                cursor = ancestor.parent;
            }
            out.push(ProjectedLeg {
                direction: leg.direction,
                origin,
                pivot: leg.pivot,
                tip: leg.id,
            });
        }
        out
    }

    fn event(&self, bar: &Bar, direction: Direction, kind: EventKind) -> StructuralEvent {
        StructuralEvent::new(bar.index, bar.timestamp_ms, self.scale, direction, kind)
    }
}
