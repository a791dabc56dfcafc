//! Per-tick group driver: apportion the wall-clock budget, build and solve
//! each knowledge group's model, and decode or signal fallback.
//!
//! Groups are independent (disjoint agents, disjoint variables), so they
//! are planned on separate threads, each with its own solver environment.
//! A group whose solve ends without a usable incumbent gets a `NoPlan`
//! outcome rather than an error; only model-construction and decode defects
//! surface as errors, and those stay isolated to their group.

use std::collections::BTreeSet;
use std::time::Duration;

use hive_grid::{AgentAction, ExploreSnapshot, Position, TaskSnapshot};
use hive_z3::{CpEnv, SolveStatus};

use crate::explore::ExploreProblem;
use crate::keys::Horizon;
use crate::task::{TaskActions, TaskProblem};
use crate::Result;

/// Caller-supplied planning parameters, fixed per invocation.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Coarse ticks to look ahead; only the first is ever executed.
    pub horizon: u32,
    /// Fixed-point scale of the clearing accumulator.
    pub unit_scale: i64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            horizon: 3,
            unit_scale: 10,
        }
    }
}

impl PlanConfig {
    pub fn with_horizon(mut self, horizon: u32) -> Self {
        self.horizon = horizon;
        self
    }
}

/// One knowledge group's planning request.
#[derive(Debug, Clone)]
pub enum GroupSnapshot {
    Explore {
        snapshot: ExploreSnapshot,
        /// Frontier cells near an undiscovered task zone; observing them
        /// counts double.
        priority_region: Option<BTreeSet<Position>>,
    },
    Task { snapshot: TaskSnapshot },
}

impl GroupSnapshot {
    pub fn agent_count(&self) -> usize {
        match self {
            GroupSnapshot::Explore { snapshot, .. } => snapshot.agents.len(),
            GroupSnapshot::Task { snapshot } => snapshot.agents.len(),
        }
    }
}

/// Decoded first-tick actions for one group.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupActions {
    Explore(Vec<AgentAction>),
    Task(TaskActions),
}

/// Outcome of one group's planning call. `actions` is `None` exactly when
/// the solver produced nothing decodable; the caller then runs its fallback
/// policy for every agent in the group.
#[derive(Debug)]
pub struct GroupOutcome {
    pub status: SolveStatus,
    pub actions: Option<GroupActions>,
}

/// Split a tick's total budget across groups in proportion to their agent
/// counts.
pub fn apportion(total: Duration, agent_counts: &[usize]) -> Vec<Duration> {
    let all: usize = agent_counts.iter().sum();
    agent_counts
        .iter()
        .map(|count| {
            if all == 0 {
                Duration::ZERO
            } else {
                total.mul_f64(*count as f64 / all as f64)
            }
        })
        .collect()
}

/// Plan a single group under an optional budget.
pub fn plan_group(
    group: &GroupSnapshot,
    budget: Option<Duration>,
    config: &PlanConfig,
) -> Result<GroupOutcome> {
    let horizon = Horizon::new(config.horizon);
    let env = CpEnv::with_budget(budget);

    match group {
        GroupSnapshot::Explore {
            snapshot,
            priority_region,
        } => {
            let problem = ExploreProblem::build(
                &env,
                snapshot,
                horizon,
                config.unit_scale,
                priority_region.as_ref(),
            )?;
            let solution = problem.solve();
            let status = solution.status();
            tracing::debug!(?status, agents = snapshot.agents.len(), "explore group solved");
            if !status.has_plan() {
                return Ok(GroupOutcome {
                    status,
                    actions: None,
                });
            }
            let actions = solution.agent_actions()?;
            Ok(GroupOutcome {
                status,
                actions: Some(GroupActions::Explore(actions)),
            })
        }
        GroupSnapshot::Task { snapshot } => {
            let problem = TaskProblem::build(&env, snapshot, horizon, config.unit_scale)?;
            let solution = problem.solve();
            let status = solution.status();
            tracing::debug!(?status, agents = snapshot.agents.len(), "task group solved");
            if !status.has_plan() {
                return Ok(GroupOutcome {
                    status,
                    actions: None,
                });
            }
            let actions = solution.actions()?;
            Ok(GroupOutcome {
                status,
                actions: Some(GroupActions::Task(actions)),
            })
        }
    }
}

/// Plan every group of one tick concurrently, splitting `total_budget`
/// proportionally to group size. One group's failure never blocks the
/// others; each slot carries its own result.
pub fn plan_tick(
    groups: &[GroupSnapshot],
    total_budget: Duration,
    config: &PlanConfig,
) -> Vec<Result<GroupOutcome>> {
    let counts: Vec<usize> = groups.iter().map(GroupSnapshot::agent_count).collect();
    let budgets = apportion(total_budget, &counts);

    std::thread::scope(|scope| {
        let handles: Vec<_> = groups
            .iter()
            .zip(&budgets)
            .map(|(group, budget)| {
                let budget = *budget;
                scope.spawn(move || plan_group(group, Some(budget), config))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_splits_proportionally() {
        let budgets = apportion(Duration::from_secs(4), &[3, 1]);
        assert_eq!(budgets[0], Duration::from_secs(3));
        assert_eq!(budgets[1], Duration::from_secs(1));
    }

    #[test]
    fn empty_groups_get_nothing() {
        let budgets = apportion(Duration::from_secs(4), &[0, 0]);
        assert!(budgets.iter().all(|b| b.is_zero()));
    }
}
