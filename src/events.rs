//! The structural event stream consumed by downstream tooling.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::detector::LegId;
use crate::domain::{Direction, Scale};
use crate::reference::SwingId;

/// Why a leg was pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PruneReason {
    #[strum(to_string = "engulfed")]
    Engulfed,
    #[strum(to_string = "stale_extension")]
    StaleExtension,
    #[strum(to_string = "proximity")]
    Proximity,
    #[strum(to_string = "domination")]
    Domination,
    #[strum(to_string = "inner_structure")]
    InnerStructure,
    #[strum(to_string = "turn_ratio")]
    TurnRatio,
}

/// Which rule fired an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationRule {
    #[strum(to_string = "strict")]
    Strict,
    #[strum(to_string = "deep")]
    Deep,
    #[strum(to_string = "soft_close")]
    SoftClose,
}

/// Kind-specific payload of a structural event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    LegCreated {
        leg_id: LegId,
        origin: f64,
        pivot: f64,
        parent_leg_id: Option<LegId>,
    },
    OriginBreached {
        leg_id: LegId,
        breach_amount: f64,
    },
    PivotBreached {
        leg_id: LegId,
        breach_amount: f64,
    },
    LegPruned {
        leg_id: LegId,
        reason: PruneReason,
    },
    SwingFormed {
        swing_id: SwingId,
        origin: f64,
        pivot: f64,
        formation_bar: u64,
    },
    LevelCross {
        swing_id: SwingId,
        level_ratio: f64,
        upward: bool,
    },
    Completion {
        swing_id: SwingId,
        completion_ratio: f64,
    },
    Invalidation {
        swing_id: SwingId,
        violation_price: f64,
        rule: InvalidationRule,
    },
}

impl EventKind {
    /// Canonical within-bar ordering: creations first so consumers know a
    /// leg before its breaches, then breaches, pruning, and the reference
    /// lifecycle. Consumers never see a completion before the crossing
    /// that produced it.
    pub fn order_rank(&self) -> u8 {
        match self {
            EventKind::LegCreated { .. } => 0,
            EventKind::OriginBreached { .. } => 1,
            EventKind::PivotBreached { .. } => 2,
            EventKind::LegPruned { .. } => 3,
            EventKind::SwingFormed { .. } => 4,
            EventKind::LevelCross { .. } => 5,
            EventKind::Completion { .. } => 6,
            EventKind::Invalidation { .. } => 7,
        }
    }
}

/// One entry of the merged structural event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralEvent {
    /// Bar index at the scale that produced the event.
    pub bar_index: u64,
    pub timestamp_ms: i64,
    pub scale: Scale,
    pub direction: Direction,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl StructuralEvent {
    pub fn new(
        bar_index: u64,
        timestamp_ms: i64,
        scale: Scale,
        direction: Direction,
        kind: EventKind,
    ) -> Self {
        Self {
            bar_index,
            timestamp_ms,
            scale,
            direction,
            kind,
        }
    }

    /// One JSON line of the event log consumed downstream.
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Sort a batch of same-step events into the published order:
/// time, then scale (largest first), then canonical kind order.
pub fn sort_merged(events: &mut [StructuralEvent]) {
    events.sort_by(|a, b| {
        a.timestamp_ms
            .cmp(&b.timestamp_ms)
            .then(b.scale.cmp(&a.scale))
            .then(a.kind.order_rank().cmp(&b.kind.order_rank()))
    });
}
