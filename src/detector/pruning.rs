//! The per-bar pruning pass.
//!
//! Each rule is a pure function `(leg, context) -> Option<PruneReason>`;
//! the engine walks an ordered rule list instead of branching on rule
//! identity. Rules only remove, never create. Evaluation order is fixed:
//! engulfed, stale extension, proximity/domination, inner structure,
//! turn ratio.

use crate::config::{PruningConfig, TurnRatioMode};
use crate::detector::arena::LegArena;
use crate::detector::leg::{Leg, LegId};
use crate::events::PruneReason;

pub(crate) struct PruneContext<'a> {
    pub arena: &'a LegArena,
    pub config: &'a PruningConfig,
    /// Larger-scale defended levels; legs anchored on one are exempt.
    pub protected_levels: &'a [f64],
    pub protection_tolerance: f64,
}

pub(crate) type PruneRule = fn(&Leg, &PruneContext) -> Option<PruneReason>;

/// The ordered rule list. Containment flattening runs after these and is
/// owned by the flatten module.
pub(crate) fn rule_list() -> &'static [PruneRule] {
    &[
        rule_engulfed,
        rule_stale_extension,
        rule_proximity_domination,
        rule_inner_structure,
        rule_turn_ratio,
    ]
}

/// Counter-trend magnitude of a leg: the range of the retrace it sprang
/// from (its parent), zero for parentless legs.
fn counter_magnitude(leg: &Leg, arena: &LegArena) -> f64 {
    leg.parent
        .and_then(|p| arena.get(p))
        .map(|p| p.range())
        .unwrap_or(0.0)
}

/// A leg breached on both sides carries no structure worth keeping.
fn rule_engulfed(leg: &Leg, ctx: &PruneContext) -> Option<PruneReason> {
    if !ctx.config.engulfed_enabled {
        return None;
    }
    (leg.origin_breach.is_some() && leg.pivot_breach.is_some()).then_some(PruneReason::Engulfed)
}

/// A dead leg left `K x range` behind by the opposite direction is stale.
fn rule_stale_extension(leg: &Leg, ctx: &PruneContext) -> Option<PruneReason> {
    let breach = leg.origin_breach?;
    let range = leg.range();
    if range == 0.0 || breach >= ctx.config.stale_extension_multiple * range {
        Some(PruneReason::StaleExtension)
    } else {
        None
    }
}

/// Among swing partners, a smaller leg whose origin hugs a larger
/// partner's origin and whose counter-trend is comparatively shallow is a
/// restatement of the partner, not independent structure.
fn rule_proximity_domination(leg: &Leg, ctx: &PruneContext) -> Option<PruneReason> {
    let own_counter = counter_magnitude(leg, ctx.arena);

    for partner_id in ctx.arena.partners_sharing_pivot(leg) {
        let partner = ctx.arena.expect(partner_id);
        if partner.direction != leg.direction || !partner.is_alive() {
            continue;
        }
        if partner.range() <= leg.range() {
            continue;
        }

        let partner_counter = counter_magnitude(partner, ctx.arena);
        if partner_counter <= 0.0
            || own_counter >= ctx.config.min_domination_ratio * partner_counter
        {
            continue;
        }

        let origin_distance = (leg.origin.price - partner.origin.price).abs();
        let range_close =
            origin_distance <= ctx.config.proximity_range_fraction.value() * partner.range();
        let bar_distance = leg.origin.bar.abs_diff(partner.origin.bar) as f64;
        let time_close =
            bar_distance <= ctx.config.proximity_time_fraction.value() * partner.span_bars() as f64;

        if range_close {
            return Some(PruneReason::Proximity);
        }
        if time_close {
            return Some(PruneReason::Domination);
        }
    }
    None
}

/// A leg sharing its pivot with its own parent duplicates the node above.
fn rule_inner_structure(leg: &Leg, ctx: &PruneContext) -> Option<PruneReason> {
    if !ctx.config.inner_structure_enabled {
        return None;
    }
    let parent = leg.parent.and_then(|p| ctx.arena.get(p))?;
    (parent.pivot.price == leg.pivot.price && parent.pivot.bar == leg.pivot.bar)
        .then_some(PruneReason::InnerStructure)
}

/// Sibling pruning by counter-leg/leg range ratio, per configured mode.
fn rule_turn_ratio(leg: &Leg, ctx: &PruneContext) -> Option<PruneReason> {
    let turn_ratio = |l: &Leg| {
        let range = l.range();
        if range > 0.0 {
            counter_magnitude(l, ctx.arena) / range
        } else {
            0.0
        }
    };

    match ctx.config.turn_ratio {
        TurnRatioMode::Disabled => None,
        TurnRatioMode::Threshold(min) => {
            let siblings = same_direction_partners(leg, ctx);
            if siblings.is_empty() {
                return None;
            }
            (turn_ratio(leg) < min).then_some(PruneReason::TurnRatio)
        }
        TurnRatioMode::TopK(k) => {
            let mut group: Vec<(LegId, f64)> = same_direction_partners(leg, ctx)
                .into_iter()
                .map(|id| (id, turn_ratio(ctx.arena.expect(id))))
                .collect();
            group.push((leg.id, turn_ratio(leg)));
            if group.len() <= k {
                return None;
            }
            // Highest ratio first; ties go to the older leg.
            group.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            let kept = &group[..k];
            (!kept.iter().any(|(id, _)| *id == leg.id)).then_some(PruneReason::TurnRatio)
        }
    }
}

fn same_direction_partners(leg: &Leg, ctx: &PruneContext) -> Vec<LegId> {
    ctx.arena
        .partners_sharing_pivot(leg)
        .into_iter()
        .filter(|id| ctx.arena.expect(*id).direction == leg.direction)
        .collect()
}

/// True when pruning must leave this leg alone: the newest alive leg of
/// its direction (the tip of a live branch), or a leg anchored on a
/// larger-scale defended level.
pub(crate) fn is_protected(leg: &Leg, ctx: &PruneContext) -> bool {
    if leg.is_alive() && ctx.arena.newest_alive(leg.direction) == Some(leg.id) {
        return true;
    }
    if ctx.protection_tolerance > 0.0 {
        let origin = leg.origin.price;
        for level in ctx.protected_levels {
            if *level > 0.0 && (origin - level).abs() / level <= ctx.protection_tolerance {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PruningConfig;
    use crate::detector::leg::Extremum;
    use crate::domain::Direction;

    fn ext(price: f64, bar: u64) -> Extremum {
        Extremum::new(price, bar)
    }

    /// Scenario-2 shape: 200 -> 150 -> 190 -> 160 -> 210.
    fn scenario_two_arena() -> (LegArena, LegId, LegId) {
        let mut arena = LegArena::new();
        let root = arena
            .insert(Direction::Bear, ext(200.0, 0), ext(150.0, 1), None, 1)
            .unwrap();
        let a = arena
            .insert(Direction::Bull, ext(150.0, 1), ext(190.0, 2), Some(root), 4)
            .unwrap();
        let b = arena
            .insert(Direction::Bear, ext(190.0, 2), ext(160.0, 3), Some(a), 4)
            .unwrap();
        let inner = arena
            .insert(Direction::Bull, ext(160.0, 3), ext(210.0, 4), Some(b), 4)
            .unwrap();
        let outer = arena
            .insert(Direction::Bull, ext(150.0, 1), ext(210.0, 4), Some(root), 4)
            .unwrap();
        (arena, inner, outer)
    }

    #[test]
    fn proximity_prunes_shallow_partner() {
        let (arena, inner, outer) = scenario_two_arena();
        let config = PruningConfig::default();
        let ctx = PruneContext {
            arena: &arena,
            config: &config,
            protected_levels: &[],
            protection_tolerance: 0.0,
        };
        // inner (160->210, counter 30) vs outer (150->210, counter 50):
        // origin distance 10 <= 0.25 * 60, counter ratio 0.6 < 0.75.
        assert_eq!(
            rule_proximity_domination(arena.expect(inner), &ctx),
            Some(PruneReason::Proximity)
        );
        // The dominating partner itself is untouched.
        assert_eq!(rule_proximity_domination(arena.expect(outer), &ctx), None);
    }

    /// Origins far apart in price but adjacent in time report domination
    /// rather than proximity.
    #[test]
    fn time_closeness_reports_domination() {
        let mut arena = LegArena::new();
        let big_retrace = arena
            .insert(Direction::Bear, ext(155.0, 8), ext(100.0, 10), None, 10)
            .unwrap();
        let partner = arena
            .insert(
                Direction::Bull,
                ext(100.0, 10),
                ext(210.0, 14),
                Some(big_retrace),
                14,
            )
            .unwrap();
        let small_retrace = arena
            .insert(Direction::Bear, ext(180.0, 10), ext(160.0, 11), None, 11)
            .unwrap();
        let candidate = arena
            .insert(
                Direction::Bull,
                ext(160.0, 11),
                ext(210.0, 14),
                Some(small_retrace),
                14,
            )
            .unwrap();

        let config = PruningConfig::default();
        let ctx = PruneContext {
            arena: &arena,
            config: &config,
            protected_levels: &[],
            protection_tolerance: 0.0,
        };
        // |160 - 100| = 60 > 0.25 * 110 (not price-close), but the origins
        // are one bar apart against the partner's four-bar span; counter
        // 20 < 0.75 * 55.
        assert_eq!(
            rule_proximity_domination(arena.expect(candidate), &ctx),
            Some(PruneReason::Domination)
        );
        assert_eq!(rule_proximity_domination(arena.expect(partner), &ctx), None);
    }

    #[test]
    fn turn_ratio_threshold_discards_shallow_turns() {
        let (arena, inner, outer) = scenario_two_arena();
        let config = PruningConfig {
            turn_ratio: TurnRatioMode::Threshold(0.7),
            ..Default::default()
        };
        let ctx = PruneContext {
            arena: &arena,
            config: &config,
            protected_levels: &[],
            protection_tolerance: 0.0,
        };
        // inner turn ratio 30/50 = 0.6 < 0.7; outer 50/60 = 0.83.
        assert_eq!(
            rule_turn_ratio(arena.expect(inner), &ctx),
            Some(PruneReason::TurnRatio)
        );
        assert_eq!(rule_turn_ratio(arena.expect(outer), &ctx), None);
    }

    #[test]
    fn engulfed_requires_both_sides() {
        let mut arena = LegArena::new();
        let id = arena
            .insert(Direction::Bull, ext(100.0, 0), ext(150.0, 2), None, 2)
            .unwrap();
        let config = PruningConfig::default();
        {
            let ctx = PruneContext {
                arena: &arena,
                config: &config,
                protected_levels: &[],
                protection_tolerance: 0.0,
            };
            assert_eq!(rule_engulfed(arena.expect(id), &ctx), None);
        }

        arena.get_mut(id).unwrap().origin_breach = Some(2.0);
        {
            let ctx = PruneContext {
                arena: &arena,
                config: &config,
                protected_levels: &[],
                protection_tolerance: 0.0,
            };
            assert_eq!(rule_engulfed(arena.expect(id), &ctx), None);
        }

        arena.get_mut(id).unwrap().pivot_breach = Some(1.0);
        {
            let ctx = PruneContext {
                arena: &arena,
                config: &config,
                protected_levels: &[],
                protection_tolerance: 0.0,
            };
            assert_eq!(
                rule_engulfed(arena.expect(id), &ctx),
                Some(PruneReason::Engulfed)
            );
        }
    }

    #[test]
    fn stale_extension_needs_k_multiple() {
        let mut arena = LegArena::new();
        let id = arena
            .insert(Direction::Bear, ext(150.0, 1), ext(120.0, 2), None, 2)
            .unwrap();
        let config = PruningConfig::default();

        arena.get_mut(id).unwrap().origin_breach = Some(10.0);
        {
            let ctx = PruneContext {
                arena: &arena,
                config: &config,
                protected_levels: &[],
                protection_tolerance: 0.0,
            };
            assert_eq!(rule_stale_extension(arena.expect(id), &ctx), None);
        }

        // 3 x 30 = 90 past the origin.
        arena.get_mut(id).unwrap().origin_breach = Some(90.0);
        {
            let ctx = PruneContext {
                arena: &arena,
                config: &config,
                protected_levels: &[],
                protection_tolerance: 0.0,
            };
            assert_eq!(
                rule_stale_extension(arena.expect(id), &ctx),
                Some(PruneReason::StaleExtension)
            );
        }
    }

    #[test]
    fn turn_ratio_top_k_keeps_deepest_turns() {
        let (arena, inner, outer) = scenario_two_arena();
        let config = PruningConfig {
            turn_ratio: TurnRatioMode::TopK(1),
            ..Default::default()
        };
        let ctx = PruneContext {
            arena: &arena,
            config: &config,
            protected_levels: &[],
            protection_tolerance: 0.0,
        };
        // outer ratio 50/60 > inner ratio 30/50: inner loses the seat.
        assert_eq!(
            rule_turn_ratio(arena.expect(inner), &ctx),
            Some(PruneReason::TurnRatio)
        );
        assert_eq!(rule_turn_ratio(arena.expect(outer), &ctx), None);
    }

    #[test]
    fn newest_alive_is_protected() {
        let (arena, inner, _) = scenario_two_arena();
        let config = PruningConfig::default();
        let ctx = PruneContext {
            arena: &arena,
            config: &config,
            protected_levels: &[],
            protection_tolerance: 0.0,
        };
        // outer is the newest alive bull leg, inner is not.
        assert!(!is_protected(arena.expect(inner), &ctx));
        let newest = arena.newest_alive(Direction::Bull).unwrap();
        assert!(is_protected(arena.expect(newest), &ctx));
    }

    #[test]
    fn protected_levels_shield_origins() {
        let (arena, inner, _) = scenario_two_arena();
        let config = PruningConfig::default();
        let ctx = PruneContext {
            arena: &arena,
            config: &config,
            protected_levels: &[160.1],
            protection_tolerance: 0.002,
        };
        assert!(is_protected(arena.expect(inner), &ctx));
    }
}
