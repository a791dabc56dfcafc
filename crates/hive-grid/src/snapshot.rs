use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::agent::{ExplorerInfo, MobileAgent};
use crate::cell::CellType;
use crate::position::{Bounds, Position};

/// A value pinned to a grid position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placed<T> {
    pub position: Position,
    pub info: T,
}

impl<T> Placed<T> {
    pub fn new(position: Position, info: T) -> Self {
        Self { position, info }
    }
}

/// A block source. `occupied` means a free block is currently sitting on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispenser {
    pub position: Position,
    pub block_type: String,
    pub occupied: bool,
}

/// One cell a constructor needs filled, and with what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredCell {
    pub position: Position,
    pub block_type: String,
    pub filled: bool,
}

/// A stationary constructor: its own footprint plus the set of adjacent
/// cells that must hold correctly-typed blocks before it can submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constructor {
    pub position: Position,
    pub clear_radius: i32,
    pub clear_prob: f64,
    pub cells: Vec<RequiredCell>,
}

/// Immutable per-tick input to the exploration planner, scoped to one
/// knowledge group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploreSnapshot {
    pub cells: BTreeMap<Position, CellType>,
    pub agents: Vec<Placed<ExplorerInfo>>,
    /// Marker cells treated as soft obstacles.
    pub markers: BTreeSet<Position>,
    pub bounds: Bounds,
}

/// Immutable per-tick input to the tasking planner, scoped to one knowledge
/// group's agents engaged on constructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub cells: BTreeMap<Position, CellType>,
    pub agents: Vec<Placed<MobileAgent>>,
    pub constructors: Vec<Constructor>,
    pub dispensers: Vec<Dispenser>,
    pub markers: BTreeSet<Position>,
    pub bounds: Bounds,
}

/// Offline debugging dump of a planning instance. Purely a side channel:
/// nothing reads it back at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum ProblemDump {
    Exploring {
        cells: Vec<Placed<CellType>>,
        agents: Vec<Placed<ExplorerInfo>>,
        markers: Vec<Position>,
        bounds: Bounds,
    },
    Tasking {
        cells: Vec<Placed<CellType>>,
        agents: Vec<Placed<MobileAgent>>,
        constructors: Vec<Constructor>,
        dispensers: Vec<Dispenser>,
        markers: Vec<Position>,
        bounds: Bounds,
    },
}

impl ProblemDump {
    pub fn from_explore(snapshot: &ExploreSnapshot) -> Self {
        ProblemDump::Exploring {
            cells: snapshot
                .cells
                .iter()
                .map(|(p, c)| Placed::new(*p, *c))
                .collect(),
            agents: snapshot.agents.clone(),
            markers: snapshot.markers.iter().copied().collect(),
            bounds: snapshot.bounds,
        }
    }

    pub fn from_task(snapshot: &TaskSnapshot) -> Self {
        ProblemDump::Tasking {
            cells: snapshot
                .cells
                .iter()
                .map(|(p, c)| Placed::new(*p, *c))
                .collect(),
            agents: snapshot.agents.clone(),
            constructors: snapshot.constructors.clone(),
            dispensers: snapshot.dispensers.clone(),
            markers: snapshot.markers.iter().copied().collect(),
            bounds: snapshot.bounds,
        }
    }

    pub fn write_json<W: Write>(&self, writer: W) -> io::Result<()> {
        serde_json::to_writer(writer, self).map_err(io::Error::from)
    }
}
