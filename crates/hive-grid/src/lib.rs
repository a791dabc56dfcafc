//! Grid-world primitives and per-tick planning snapshots.
//!
//! Everything in this crate is a plain value type: the planner rebuilds its
//! model from a fresh snapshot every tick, so nothing here carries state
//! across ticks or references a solver.

#![forbid(unsafe_code)]

pub mod action;
pub mod agent;
pub mod cell;
pub mod position;
pub mod snapshot;

pub use action::AgentAction;
pub use agent::{
    Direction, DiggerInfo, ExplorerInfo, MobileAgent, Rotation, SpeedProfile, WorkerInfo,
    WorkerPhase,
};
pub use cell::CellType;
pub use position::{distance_bounded, sub_closest, Bounds, Position};
pub use snapshot::{
    Constructor, Dispenser, ExploreSnapshot, Placed, ProblemDump, RequiredCell, TaskSnapshot,
};
