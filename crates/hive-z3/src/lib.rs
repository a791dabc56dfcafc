//! # hive-z3
//!
//! Constraint model builder and solve driver over the Z3 optimizer.
//!
//! One planning tick builds one model: a [`CpEnv`] owns the Z3 context (and
//! the wall-clock budget, which Z3 reads from the context configuration), a
//! [`ModelBuilder`] accumulates variables and constraints, an [`Objective`]
//! accumulates ordered weighted terms, and a single `solve` call returns a
//! [`Solution`] whose status says whether any bindings are usable. Nothing is
//! shared between ticks or between concurrently planned groups; each group
//! builds its own environment.
//!
//! Solver non-success is a value, not an error: infeasible and unknown
//! results are expected outcomes under contention or tight horizons.

pub mod builder;
pub mod objective;
pub mod solve;

pub use builder::{CpEnv, ModelBuilder};
pub use objective::Objective;
pub use solve::{Solution, SolveStatus};

use thiserror::Error;

/// Errors raised while reading bindings back out of a solved model.
#[derive(Debug, Error)]
pub enum CpError {
    #[error("no model available for status {0:?}")]
    NoModel(SolveStatus),

    #[error("variable {0:?} has no value in the model")]
    Unbound(String),
}

pub type Result<T> = std::result::Result<T, CpError>;
