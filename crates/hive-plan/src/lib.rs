//! # hive-plan
//!
//! Receding-horizon joint action planning for grid agent teams.
//!
//! Each decision tick, a knowledge group's world snapshot is encoded as a
//! constraint model over (cell, agent, tick, sub-tick) variables, solved once
//! under a wall-clock budget, and the first coarse tick of the incumbent is
//! decoded into one discrete action per agent. Models are rebuilt from
//! scratch every tick; nothing persists across ticks or between groups.
//!
//! The [`explore`] problem maximizes newly observed terrain for generic
//! mobile agents; the [`task`] problem covers the full gather / deliver /
//! dig / construct / submit cycle. The [`driver`] apportions the tick budget
//! across groups and turns solver non-success into a fallback signal instead
//! of an error.

#![forbid(unsafe_code)]

pub mod distance;
pub mod driver;
pub mod explore;
pub mod keys;
pub mod reach;
pub mod task;

pub use driver::{apportion, plan_group, plan_tick, GroupActions, GroupOutcome, GroupSnapshot, PlanConfig};
pub use explore::{ExploreProblem, ExploreSolution};
pub use keys::{Horizon, SubTick};
pub use task::{TaskActions, TaskProblem, TaskSolution};

use hive_grid::Position;
use thiserror::Error;

/// Errors while turning a snapshot into a model: programmer or data errors,
/// fatal to the affected group's planning call only.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("planning horizon must span at least two coarse ticks, got {0}")]
    HorizonTooShort(u32),

    #[error("no cell classification for {0:?} referenced by the snapshot")]
    MissingCell(Position),

    #[error("dispenser at {0:?} sits on a clearable obstacle")]
    DispenserOnObstacle(Position),

    #[error("agent {agent} is pinned to dispenser {index} which is not in the snapshot")]
    MissingDispenser { agent: usize, index: usize },
}

/// Errors while reading the first tick back out of a solved model. These
/// indicate a modeling defect, not an environmental condition.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("solution carries no variable bindings")]
    NoBindings,

    #[error("agent {agent}: no {family} binding at tick 1")]
    MissingBinding { agent: usize, family: &'static str },
}

/// Per-group planning failure. Solver non-success is NOT represented here;
/// it is a normal [`hive_z3::SolveStatus`] outcome.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub type Result<T> = std::result::Result<T, PlanError>;
