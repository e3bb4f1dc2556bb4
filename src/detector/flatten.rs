//! Recursive containment flattening.
//!
//! A dead subtree whose extrema do not project beyond its parent's extrema
//! is interior noise: the parent's own span already tells the whole story.
//! Applied bottom-up to a fixed point each bar, this general rule subsumes
//! the engulfment/containment special cases.

use crate::detector::arena::LegArena;
use crate::detector::leg::{Leg, LegId};

/// Collect and remove every flattenable subtree; returns the removed legs
/// in removal order (children first). Idempotent: a second pass over the
/// result removes nothing.
pub(crate) fn flatten_to_fixed_point(arena: &mut LegArena) -> Vec<Leg> {
    let mut removed = Vec::new();
    loop {
        let Some(root) = find_flattenable(arena) else {
            break;
        };
        for id in arena.subtree_ids(root) {
            if let Some(leg) = arena.remove(id) {
                removed.push(leg);
            }
        }
    }
    removed
}

fn find_flattenable(arena: &LegArena) -> Option<LegId> {
    for leg in arena.iter() {
        let Some(parent_id) = leg.parent else {
            continue;
        };
        let Some(parent) = arena.get(parent_id) else {
            continue;
        };
        if leg.is_alive() || !arena.subtree_all_dead(leg.id) {
            continue;
        }
        let (lo, hi) = arena.subtree_extrema(leg.id);
        if lo >= parent.low() && hi <= parent.high() {
            return Some(leg.id);
        }
    }
    None
}
