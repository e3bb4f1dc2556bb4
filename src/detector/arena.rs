use std::collections::HashMap;

use crate::detector::leg::{Extremum, Leg, LegId};
use crate::domain::Direction;

/// Endpoint identity used for duplicate rejection and pivot sharing.
fn endpoint_key(e: &Extremum) -> (u64, u64) {
    (e.price.to_bits(), e.bar)
}

/// Flat storage for legs, keyed by opaque IDs.
///
/// Parent/child links are IDs resolved through the arena, so the tree has
/// no owning back-references and no cycle risk. IDs are never reused.
#[derive(Debug, Clone, Default)]
pub struct LegArena {
    slots: Vec<Option<Leg>>,
    endpoints: HashMap<((u64, u64), (u64, u64)), LegId>,
    live_count: usize,
}

impl LegArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of legs currently tracked (alive or dead, not yet pruned).
    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    pub fn contains(&self, id: LegId) -> bool {
        self.slots
            .get(id.raw() as usize)
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, id: LegId) -> Option<&Leg> {
        self.slots.get(id.raw() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: LegId) -> Option<&mut Leg> {
        self.slots.get_mut(id.raw() as usize)?.as_mut()
    }

    /// The leg, or a loud failure: a dangling ID means the tree is
    /// structurally inconsistent and must not self-heal.
    pub fn expect(&self, id: LegId) -> &Leg {
        self.get(id)
            .unwrap_or_else(|| panic!("invariant violation: leg {} not in arena", id))
    }

    /// Insert a new leg. Returns `None` when a leg with identical origin
    /// and pivot already exists (duplicates are structurally meaningless).
    ///
    /// Panics on directional nonsense: a bull leg whose pivot is not above
    /// its origin indicates a corrupted caller, not bad input data.
    pub fn insert(
        &mut self,
        direction: Direction,
        origin: Extremum,
        pivot: Extremum,
        parent: Option<LegId>,
        created_bar: u64,
    ) -> Option<LegId> {
        assert!(
            direction.is_beyond(pivot.price, origin.price),
            "invariant violation: {} leg pivot {} not beyond origin {}",
            direction,
            pivot.price,
            origin.price
        );
        assert!(
            origin.bar <= pivot.bar,
            "invariant violation: leg origin bar {} after pivot bar {}",
            origin.bar,
            pivot.bar
        );

        let key = (endpoint_key(&origin), endpoint_key(&pivot));
        if self.endpoints.contains_key(&key) {
            return None;
        }

        let id = LegId::new(self.slots.len() as u32);
        self.slots.push(Some(Leg {
            id,
            direction,
            origin,
            pivot,
            parent,
            children: Vec::new(),
            origin_breach: None,
            pivot_breach: None,
            created_bar,
        }));
        self.endpoints.insert(key, id);
        self.live_count += 1;

        if let Some(pid) = parent {
            self.get_mut(pid)
                .unwrap_or_else(|| panic!("invariant violation: parent {} not in arena", pid))
                .children
                .push(id);
        }
        Some(id)
    }

    /// Remove a leg; its children reparent to the removed leg's parent.
    pub fn remove(&mut self, id: LegId) -> Option<Leg> {
        let leg = self.slots.get_mut(id.raw() as usize)?.take()?;
        self.live_count -= 1;
        self.endpoints
            .remove(&(endpoint_key(&leg.origin), endpoint_key(&leg.pivot)));

        if let Some(pid) = leg.parent
            && let Some(parent) = self.get_mut(pid)
        {
            parent.children.retain(|c| *c != id);
        }
        let children = leg.children.clone();
        for child in &children {
            if let Some(c) = self.get_mut(*child) {
                c.parent = leg.parent;
            }
        }
        if let Some(pid) = leg.parent
            && let Some(parent) = self.get_mut(pid)
        {
            parent.children.extend(children.iter().copied());
        }
        Some(leg)
    }

    /// All tracked legs in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Leg> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn ids(&self) -> Vec<LegId> {
        self.iter().map(|l| l.id).collect()
    }

    /// Legs whose pivot sits exactly at `point`, creation order.
    pub fn legs_with_pivot(&self, point: &Extremum) -> Vec<LegId> {
        let key = endpoint_key(point);
        self.iter()
            .filter(|l| endpoint_key(&l.pivot) == key)
            .map(|l| l.id)
            .collect()
    }

    /// Swing partners: other legs sharing this leg's pivot node.
    pub fn partners_sharing_pivot(&self, leg: &Leg) -> Vec<LegId> {
        let key = endpoint_key(&leg.pivot);
        self.iter()
            .filter(|l| l.id != leg.id && endpoint_key(&l.pivot) == key)
            .map(|l| l.id)
            .collect()
    }

    /// Newest alive leg of a direction; exempt from pruning.
    pub fn newest_alive(&self, direction: Direction) -> Option<LegId> {
        self.iter()
            .filter(|l| l.direction == direction && l.is_alive())
            .map(|l| l.id)
            .max()
    }

    /// Min/max prices over a leg and all its descendants.
    pub fn subtree_extrema(&self, id: LegId) -> (f64, f64) {
        let leg = self.expect(id);
        let mut lo = leg.low();
        let mut hi = leg.high();
        for child in leg.children.clone() {
            if self.contains(child) {
                let (clo, chi) = self.subtree_extrema(child);
                lo = lo.min(clo);
                hi = hi.max(chi);
            }
        }
        (lo, hi)
    }

    /// True when the leg and every descendant is dead.
    pub fn subtree_all_dead(&self, id: LegId) -> bool {
        let leg = self.expect(id);
        if leg.is_alive() {
            return false;
        }
        leg.children
            .iter()
            .filter(|c| self.contains(**c))
            .all(|c| self.subtree_all_dead(*c))
    }

    /// IDs of the leg and all its descendants, children first.
    pub fn subtree_ids(&self, id: LegId) -> Vec<LegId> {
        let mut out = Vec::new();
        let leg = self.expect(id);
        for child in &leg.children {
            if self.contains(*child) {
                out.extend(self.subtree_ids(*child));
            }
        }
        out.push(id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(price: f64, bar: u64) -> Extremum {
        Extremum::new(price, bar)
    }

    #[test]
    fn duplicate_endpoints_rejected() {
        let mut arena = LegArena::new();
        let a = arena.insert(Direction::Bull, ext(100.0, 0), ext(150.0, 2), None, 2);
        assert!(a.is_some());
        let dup = arena.insert(Direction::Bull, ext(100.0, 0), ext(150.0, 2), None, 3);
        assert!(dup.is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    #[should_panic(expected = "invariant violation")]
    fn inverted_bull_leg_panics() {
        let mut arena = LegArena::new();
        arena.insert(Direction::Bull, ext(150.0, 0), ext(100.0, 2), None, 2);
    }

    #[test]
    fn remove_reparents_children() {
        let mut arena = LegArena::new();
        let a = arena
            .insert(Direction::Bull, ext(100.0, 0), ext(150.0, 2), None, 2)
            .unwrap();
        let b = arena
            .insert(Direction::Bear, ext(150.0, 2), ext(120.0, 4), Some(a), 4)
            .unwrap();
        let c = arena
            .insert(Direction::Bull, ext(120.0, 4), ext(160.0, 6), Some(b), 6)
            .unwrap();

        arena.remove(b);
        assert_eq!(arena.get(c).unwrap().parent, Some(a));
        assert!(arena.get(a).unwrap().children.contains(&c));
        assert!(!arena.contains(b));
    }

    #[test]
    fn subtree_extrema_cover_descendants() {
        let mut arena = LegArena::new();
        let a = arena
            .insert(Direction::Bull, ext(100.0, 0), ext(150.0, 2), None, 2)
            .unwrap();
        let b = arena
            .insert(Direction::Bear, ext(150.0, 2), ext(120.0, 4), Some(a), 4)
            .unwrap();
        arena
            .insert(Direction::Bull, ext(120.0, 4), ext(160.0, 6), Some(b), 6)
            .unwrap();

        let (lo, hi) = arena.subtree_extrema(b);
        assert_eq!(lo, 120.0);
        assert_eq!(hi, 160.0);
    }

    #[test]
    fn newest_alive_per_direction() {
        let mut arena = LegArena::new();
        let a = arena
            .insert(Direction::Bull, ext(100.0, 0), ext(150.0, 2), None, 2)
            .unwrap();
        let b = arena
            .insert(Direction::Bull, ext(110.0, 3), ext(155.0, 5), None, 5)
            .unwrap();
        assert_eq!(arena.newest_alive(Direction::Bull), Some(b));
        arena.get_mut(b).unwrap().origin_breach = Some(2.0);
        assert_eq!(arena.newest_alive(Direction::Bull), Some(a));
    }
}
