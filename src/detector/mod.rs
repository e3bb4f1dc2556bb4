//! The pivot-tree leg detector.

mod arena;
mod engine;
mod flatten;
mod leg;
mod pruning;

pub use arena::LegArena;
pub use engine::LegDetector;
pub use leg::{Extremum, Leg, LegId, ProjectedLeg};
