//! The Fibonacci decision-level grid.

/// Tracked ratios in a swing's coordinate frame, ascending. 0 is the
/// defended pivot, 2.0 the completion target.
pub const FIB_LEVELS: [f64; 9] = [0.0, 0.382, 0.5, 0.618, 1.0, 1.382, 1.5, 1.618, 2.0];

/// Ratio a swing must close beyond to complete.
pub const COMPLETION_RATIO: f64 = 2.0;

/// Levels strictly between two close ratios, in path order.
///
/// Open on both ends: a close landing exactly on a level has not crossed
/// it, and the departure point was already accounted for.
pub fn levels_between(prev: f64, next: f64) -> Vec<(f64, bool)> {
    if next > prev {
        FIB_LEVELS
            .iter()
            .filter(|&&level| level > prev && level < next)
            .map(|&level| (level, true))
            .collect()
    } else {
        FIB_LEVELS
            .iter()
            .rev()
            .filter(|&&level| level < prev && level > next)
            .map(|&level| (level, false))
            .collect()
    }
}
