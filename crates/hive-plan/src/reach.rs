//! Geometric reachability filters.
//!
//! These bound model size: an agent only gets presence variables on cells it
//! could plausibly reach given its elapsed movement budget. The bound is
//! sound (Manhattan distance ignores obstacles, so no truly reachable cell
//! is excluded) but loose; the adjacency and occupancy constraints correct
//! the slack.

use std::collections::BTreeSet;

use hive_grid::{Bounds, Position};

/// All cells within Manhattan distance `radius` (inclusive), wrapped into
/// `bounds` and deduplicated.
pub fn ball(origin: Position, radius: i32, bounds: Bounds) -> BTreeSet<Position> {
    origin
        .neighbours_at_most(radius)
        .map(|p| p.into_bounds(bounds))
        .collect()
}

/// All cells strictly within Manhattan distance `radius`.
pub fn ball_strict(origin: Position, radius: i32, bounds: Bounds) -> BTreeSet<Position> {
    origin
        .neighbours_less(radius)
        .map(|p| p.into_bounds(bounds))
        .collect()
}

/// All cells at exactly Manhattan distance `radius`.
pub fn ring(origin: Position, radius: i32, bounds: Bounds) -> BTreeSet<Position> {
    origin
        .neighbours_exactly(radius)
        .map(|p| p.into_bounds(bounds))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_folds_the_ball_onto_small_maps() {
        let bounds = Bounds::new(Some(3), Some(3));
        // Radius 4 covers the whole 3x3 torus.
        let cells = ball(Position::new(0, 0), 4, bounds);
        assert_eq!(cells.len(), 9);
    }

    #[test]
    fn strict_ball_excludes_the_rim() {
        let cells = ball_strict(Position::new(0, 0), 2, Bounds::UNKNOWN);
        assert!(cells.contains(&Position::new(1, 0)));
        assert!(!cells.contains(&Position::new(2, 0)));
    }

    #[test]
    fn ring_on_flat_ground_has_four_times_radius_cells() {
        let cells = ring(Position::new(5, 5), 3, Bounds::UNKNOWN);
        assert_eq!(cells.len(), 12);
    }
}
