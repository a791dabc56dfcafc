use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Cardinal movement and attachment directions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Fixed order for determinism: N, E, S, W.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn offset(self) -> Position {
        match self {
            Direction::North => Position::new(0, -1),
            Direction::East => Position::new(1, 0),
            Direction::South => Position::new(0, 1),
            Direction::West => Position::new(-1, 0),
        }
    }

    pub fn from_offset(offset: Position) -> Option<Direction> {
        Direction::ALL.into_iter().find(|d| d.offset() == offset)
    }

    pub fn rotate(self, rotation: Rotation) -> Direction {
        match rotation {
            Rotation::Clockwise => match self {
                Direction::North => Direction::East,
                Direction::East => Direction::South,
                Direction::South => Direction::West,
                Direction::West => Direction::North,
            },
            Rotation::Anticlockwise => match self {
                Direction::North => Direction::West,
                Direction::East => Direction::North,
                Direction::South => Direction::East,
                Direction::West => Direction::South,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    Clockwise,
    Anticlockwise,
}

impl Rotation {
    pub const ALL: [Rotation; 2] = [Rotation::Clockwise, Rotation::Anticlockwise];
}

/// Cells traversable per coarse tick, indexed by carried-block count.
/// Loads past the end of the table use the last entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedProfile(pub Vec<u32>);

impl SpeedProfile {
    pub fn uniform(speed: u32) -> Self {
        Self(vec![speed])
    }

    pub fn for_load(&self, load: usize) -> u32 {
        let idx = load.min(self.0.len().saturating_sub(1));
        self.0.get(idx).copied().unwrap_or(0)
    }
}

/// Capability profile of a generic exploring agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorerInfo {
    pub vision: i32,
    pub speed: u32,
    pub clear_radius: i32,
    pub clear_prob: f64,
}

/// Gatherers seek a dispenser and load up; deliverers carry their blocks to
/// the assigned constructor. The world model flips the phase when the worker
/// reaches capacity or runs empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Gatherer,
    Deliverer,
}

/// Capability profile of a carrying worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub phase: WorkerPhase,
    pub vision: i32,
    pub speed: SpeedProfile,
    pub clear_radius: i32,
    pub clear_prob: f64,
    pub max_attached: usize,
    pub block_type: String,
    pub constructor_idx: usize,
    pub attached_sides: BTreeSet<Direction>,
    /// Pinned dispenser; when absent any dispenser of `block_type` qualifies.
    pub dispenser_idx: Option<usize>,
}

impl WorkerInfo {
    /// Current speed given the blocks already attached.
    pub fn step_dist(&self) -> u32 {
        self.speed.for_load(self.attached_sides.len())
    }
}

/// Capability profile of a digger: clears within its flock and never carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiggerInfo {
    pub vision: i32,
    pub speed: u32,
    pub clear_radius: i32,
    pub clear_prob: f64,
    pub flock: BTreeSet<Position>,
}

/// A mobile agent taking part in a tasking plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MobileAgent {
    Worker(WorkerInfo),
    Digger(DiggerInfo),
}

impl MobileAgent {
    pub fn step_dist(&self) -> u32 {
        match self {
            MobileAgent::Worker(w) => w.step_dist(),
            MobileAgent::Digger(d) => d.speed,
        }
    }

    pub fn clear_radius(&self) -> i32 {
        match self {
            MobileAgent::Worker(w) => w.clear_radius,
            MobileAgent::Digger(d) => d.clear_radius,
        }
    }

    pub fn clear_prob(&self) -> f64 {
        match self {
            MobileAgent::Worker(w) => w.clear_prob,
            MobileAgent::Digger(d) => d.clear_prob,
        }
    }

    pub fn as_worker(&self) -> Option<&WorkerInfo> {
        match self {
            MobileAgent::Worker(w) => Some(w),
            MobileAgent::Digger(_) => None,
        }
    }

    pub fn as_digger(&self) -> Option<&DiggerInfo> {
        match self {
            MobileAgent::Digger(d) => Some(d),
            MobileAgent::Worker(_) => None,
        }
    }

    /// Cells occupied by the agent's attached blocks, given its position.
    pub fn attached_positions(&self, position: Position) -> HashSet<Position> {
        match self {
            MobileAgent::Worker(w) => w
                .attached_sides
                .iter()
                .map(|d| position + d.offset())
                .collect(),
            MobileAgent::Digger(_) => HashSet::new(),
        }
    }
}
