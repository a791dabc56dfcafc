//! Shortest-path distance fields for the delivery objective.
//!
//! A multi-source Dijkstra run backwards from the target cells over the
//! 4-connected traversable graph. Stepping onto a congested cell costs
//! [`CONGESTED_STEP`] instead of 1, which steers deliverers around crowded
//! construction sites.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use hive_grid::{Bounds, Position};

use crate::reach;

/// Step cost into a cell flagged as congested.
pub const CONGESTED_STEP: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    cost: u32,
    pos: Position,
    tie: u64,
}

impl OpenNode {
    fn key(&self) -> (u32, Position, u64) {
        (self.cost, self.pos, self.tie)
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap behave like a min-heap.
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// For every vertex reachable from some target, the cheapest cost of a walk
/// to its nearest target. Vertices of the graph are `vertices ∪ targets`;
/// unreachable vertices are absent from the result.
pub fn distances_to_targets(
    vertices: &BTreeSet<Position>,
    targets: &BTreeSet<Position>,
    congested: &BTreeSet<Position>,
    bounds: Bounds,
) -> BTreeMap<Position, u32> {
    let in_graph = |p: &Position| vertices.contains(p) || targets.contains(p);
    let step_cost = |p: &Position| {
        if congested.contains(p) {
            CONGESTED_STEP
        } else {
            1
        }
    };

    let mut dist: BTreeMap<Position, u32> = BTreeMap::new();
    let mut open = BinaryHeap::<OpenNode>::new();
    let mut tie: u64 = 0;

    for &target in targets {
        dist.insert(target, 0);
        open.push(OpenNode {
            cost: 0,
            pos: target,
            tie,
        });
        tie += 1;
    }

    while let Some(node) = open.pop() {
        if dist.get(&node.pos).copied() != Some(node.cost) {
            continue; // stale heap entry
        }
        // Entering `node.pos` from a neighbour costs the head cell's weight.
        let entering = node.cost.saturating_add(step_cost(&node.pos));
        for prev in reach::ring(node.pos, 1, bounds) {
            if !in_graph(&prev) {
                continue;
            }
            if dist.get(&prev).copied().unwrap_or(u32::MAX) <= entering {
                continue;
            }
            dist.insert(prev, entering);
            open.push(OpenNode {
                cost: entering,
                pos: prev,
                tie,
            });
            tie += 1;
        }
    }

    dist
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(cells: &[(i32, i32)]) -> BTreeSet<Position> {
        cells.iter().map(|&(x, y)| Position::new(x, y)).collect()
    }

    #[test]
    fn straight_corridor_counts_steps() {
        let vertices = set(&[(0, 0), (1, 0), (2, 0)]);
        let targets = set(&[(3, 0)]);
        let dist = distances_to_targets(&vertices, &targets, &BTreeSet::new(), Bounds::UNKNOWN);
        assert_eq!(dist.get(&Position::new(0, 0)), Some(&3));
        assert_eq!(dist.get(&Position::new(2, 0)), Some(&1));
        assert_eq!(dist.get(&Position::new(3, 0)), Some(&0));
    }

    #[test]
    fn congestion_makes_the_detour_cheaper() {
        // Two routes from (0,0) to the target at (2,0): straight through the
        // congested (1,0), or around via (0,1), (1,1), (2,1).
        let vertices = set(&[(0, 0), (1, 0), (0, 1), (1, 1), (2, 1)]);
        let targets = set(&[(2, 0)]);
        let congested = set(&[(1, 0)]);
        let dist = distances_to_targets(&vertices, &targets, &congested, Bounds::UNKNOWN);
        // Straight: 6 (enter congested) + 1 = 7. Around: 4.
        assert_eq!(dist.get(&Position::new(0, 0)), Some(&4));
    }

    #[test]
    fn disconnected_cells_are_absent() {
        let vertices = set(&[(0, 0), (5, 5)]);
        let targets = set(&[(1, 0)]);
        let dist = distances_to_targets(&vertices, &targets, &BTreeSet::new(), Bounds::UNKNOWN);
        assert!(dist.contains_key(&Position::new(0, 0)));
        assert!(!dist.contains_key(&Position::new(5, 5)));
    }

    #[test]
    fn wrapped_bounds_shorten_the_route() {
        let bounds = Bounds::new(Some(8), Some(1));
        let vertices: BTreeSet<Position> = (0..8).map(|x| Position::new(x, 0)).collect();
        let targets = set(&[(7, 0)]);
        let dist = distances_to_targets(&vertices, &targets, &BTreeSet::new(), bounds);
        assert_eq!(dist.get(&Position::new(0, 0)), Some(&1));
    }
}
