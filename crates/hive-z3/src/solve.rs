use std::time::Instant;

use z3::ast::{Bool, Int};
use z3::{Model, Optimize, SatResult};

/// Outcome of one solve call.
///
/// `Optimal` and `Feasible` carry decodable bindings; `Infeasible` and
/// `Unknown` mean the group falls back to its external policy. Timing out
/// with an incumbent still yields `Feasible`: the receding horizon only
/// ever executes the first tick, so any incumbent is worth decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unknown,
}

impl SolveStatus {
    /// Whether the solution carries bindings worth decoding.
    pub fn has_plan(self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

/// A solved (or failed) model: the status plus, when available, the variable
/// bindings of the incumbent.
pub struct Solution<'ctx> {
    pub status: SolveStatus,
    model: Option<Model<'ctx>>,
}

impl<'ctx> Solution<'ctx> {
    pub(crate) fn check(opt: &Optimize<'ctx>) -> Self {
        let started = Instant::now();
        let result = opt.check(&[]);
        let (status, model) = match result {
            SatResult::Sat => (SolveStatus::Optimal, opt.get_model()),
            SatResult::Unsat => (SolveStatus::Infeasible, None),
            // A timeout may still leave an incumbent behind; use it if so.
            SatResult::Unknown => match opt.get_model() {
                Some(model) => (SolveStatus::Feasible, Some(model)),
                None => (SolveStatus::Unknown, None),
            },
        };
        tracing::debug!(
            ?status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "solve finished"
        );
        Self { status, model }
    }

    /// The bound value of a boolean variable, or `None` when no bindings are
    /// available. Unconstrained variables complete to `false`.
    pub fn bool_value(&self, var: &Bool<'ctx>) -> Option<bool> {
        let model = self.model.as_ref()?;
        model.eval(var, true)?.as_bool()
    }

    /// The bound value of an integer variable, or `None` when no bindings
    /// are available.
    pub fn int_value(&self, var: &Int<'ctx>) -> Option<i64> {
        let model = self.model.as_ref()?;
        model.eval(var, true)?.as_i64()
    }
}
