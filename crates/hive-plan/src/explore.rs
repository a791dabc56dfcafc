//! The exploration problem: a reduced model whose objective is to maximize
//! newly observed terrain for one knowledge group's generic mobile agents.
//!
//! Variables exist only on cells an agent could plausibly reach (the
//! [`crate::reach`] bound), which keeps the model near-linear in
//! horizon × agents. The first coarse tick of a solved model decodes into
//! `Clear`, `Move`, or `Skip` per agent.

use std::collections::{BTreeSet, HashMap};

use hive_grid::{
    sub_closest, AgentAction, Bounds, ExploreSnapshot, ExplorerInfo, Placed, Position,
};
use hive_z3::{CpEnv, ModelBuilder, Objective, Solution, SolveStatus};
use z3::ast::{Bool, Int};

use crate::keys::{AgentSubTick, AgentTick, CellAgentSubTick, CellAgentTick, CellTick, Horizon, SubTick};
use crate::reach;
use crate::{BuildError, DecodeError};

/// A built (not yet solved) exploration model.
pub struct ExploreProblem<'ctx> {
    m: ModelBuilder<'ctx>,
    agents: Vec<Placed<ExplorerInfo>>,
    obstacles: BTreeSet<Position>,
    bounds: Bounds,
    objective: Option<Objective<'ctx>>,
    is_on: HashMap<CellAgentSubTick, Bool<'ctx>>,
    clear: HashMap<CellAgentTick, Bool<'ctx>>,
    on_cells: HashMap<AgentSubTick, BTreeSet<Position>>,
}

impl<'ctx> ExploreProblem<'ctx> {
    /// Encode one group's exploration tick. `unit` is the fixed-point scale
    /// of the clearing accumulator; `priority_region` doubles the reward for
    /// observing the cells it contains.
    pub fn build(
        env: &'ctx CpEnv,
        snapshot: &ExploreSnapshot,
        horizon: Horizon,
        unit: i64,
        priority_region: Option<&BTreeSet<Position>>,
    ) -> Result<Self, BuildError> {
        if horizon.ticks < 2 {
            return Err(BuildError::HorizonTooShort(horizon.ticks));
        }

        let m = ModelBuilder::new(env);
        let seen = snapshot.cells.clone();
        let agents = snapshot.agents.clone();
        let markers = &snapshot.markers;
        let bounds = snapshot.bounds;

        let obstacles: BTreeSet<Position> = seen
            .iter()
            .filter(|(_, c)| c.is_obstacle())
            .map(|(p, _)| *p)
            .collect();

        // Frontier candidates: unseen cells some agent could observe.
        let max_vision = agents.iter().map(|a| a.info.vision).max().unwrap_or(0);
        let mut candidates: BTreeSet<Position> = BTreeSet::new();
        for pos in seen.keys() {
            candidates.extend(reach::ball(*pos, max_vision, bounds));
        }
        candidates.retain(|p| !seen.contains_key(p));

        // Presence: seeded at the start position, elsewhere bounded by the
        // elapsed movement budget over already-seen, traversable terrain.
        let mut is_on: HashMap<CellAgentSubTick, Bool<'ctx>> = HashMap::new();
        let mut on_cells: HashMap<AgentSubTick, BTreeSet<Position>> = HashMap::new();
        for (ag, placed) in agents.iter().enumerate() {
            let info = &placed.info;
            for at in horizon.sub_ticks(info.speed, false, false) {
                let ast = AgentSubTick::new(ag, at);
                if at.is_first() {
                    let key = ast.pos(placed.position);
                    is_on.insert(key, m.constant(true));
                    on_cells.insert(ast, BTreeSet::from([placed.position]));
                    continue;
                }

                let mut cells: BTreeSet<Position> =
                    reach::ball_strict(placed.position, at.full_index(info.speed) as i32, bounds)
                        .into_iter()
                        .filter(|p| seen.get(p).is_some_and(|c| c.is_traversable()))
                        .collect();
                // Soft obstacles are avoided unless the agent starts on one.
                if !markers.contains(&placed.position) {
                    cells.retain(|p| !markers.contains(p));
                }

                for p in &cells {
                    let key = ast.pos(*p);
                    is_on.insert(key, m.fresh_bool(&format!("is_on_{}", key.suffix())));
                }
                on_cells.insert(ast, cells);
            }
        }

        // Clearing targets: obstacles within reach of the agent by tick t.
        let mut clear: HashMap<CellAgentTick, Bool<'ctx>> = HashMap::new();
        for (ag, placed) in agents.iter().enumerate() {
            let info = &placed.info;
            for t in horizon.tick_range(false, true) {
                let dist = info.speed as i32 * (t as i32 - 1) + info.clear_radius;
                for pos in reach::ball(placed.position, dist, bounds) {
                    if !obstacles.contains(&pos) {
                        continue;
                    }
                    let key = CellAgentTick::new(pos, ag, t);
                    clear.insert(key, m.fresh_bool(&format!("clear_{}", key.suffix())));
                }
            }
        }

        // New observations: a candidate becomes seen iff some agent stands
        // within vision range of it at a later coarse tick.
        let mut new_seen: Vec<(Position, Bool<'ctx>)> = Vec::new();
        for cand in &candidates {
            let var = m.fresh_bool(&format!("new_{}_{}", cand.x, cand.y));
            let mut watchers: Vec<Bool<'ctx>> = Vec::new();
            for (ag, placed) in agents.iter().enumerate() {
                for pos in reach::ball(*cand, placed.info.vision, bounds) {
                    if !seen.contains_key(&pos) {
                        continue;
                    }
                    for t in horizon.tick_range(true, false) {
                        let key = CellAgentSubTick::new(pos, ag, SubTick::new(t, 1));
                        if let Some(on) = is_on.get(&key) {
                            watchers.push(on.clone());
                        }
                    }
                }
            }
            m.iff_any(&var, &watchers);
            new_seen.push((*cand, var));
        }

        // Movement between consecutive sub-ticks.
        let mut mv: HashMap<AgentSubTick, Bool<'ctx>> = HashMap::new();
        for (ag, placed) in agents.iter().enumerate() {
            for at in horizon.sub_ticks(placed.info.speed, false, true) {
                let key = AgentSubTick::new(ag, at);
                mv.insert(key, m.fresh_bool(&format!("move_{}", key.suffix())));
            }
        }
        for (ast, var_move) in &mv {
            let speed = agents[ast.agent].info.speed;
            let mut pairs: Vec<(Bool<'ctx>, Bool<'ctx>)> = Vec::new();
            for pos in &on_cells[ast] {
                let key = ast.pos(*pos);
                let Some(on_now) = is_on.get(&key) else { continue };
                let Some(on_next) = is_on.get(&key.next(speed)) else { continue };
                pairs.push((on_now.clone(), on_next.not()));
            }
            m.iff_any_pair(var_move, &pairs);
        }

        // At most one clear per agent and tick, flagged by clear_any.
        let mut clear_any: HashMap<AgentTick, Bool<'ctx>> = HashMap::new();
        for ag in 0..agents.len() {
            for t in horizon.tick_range(false, true) {
                let key = AgentTick::new(ag, t);
                clear_any.insert(key, m.fresh_bool(&format!("clear_any_{}", key.suffix())));
            }
        }
        for (at, var_any) in &clear_any {
            let mut lits = vec![var_any.not()];
            for pos in &obstacles {
                if let Some(c) = clear.get(&at.at(*pos)) {
                    lits.push(c.clone());
                }
            }
            m.exactly_one(&lits);
        }

        // Accumulated clear mass, fixed-point scaled by `unit`; a cell is
        // guaranteed traversable only at a full unit. The linear sum capped
        // at 2*unit - 1 approximates the joint success probability of
        // repeated attempts; it is a conservative determinization, not a
        // probability simulation.
        let mut clear_amount: HashMap<CellTick, Int<'ctx>> = HashMap::new();
        for pos in &obstacles {
            for t in horizon.tick_range(true, false) {
                let key = CellTick::new(*pos, t);
                let var = m.fresh_int(&format!("clear_amount_{}", key.suffix()), 0, 2 * unit - 1);
                let mut terms: Vec<Int<'ctx>> = Vec::new();
                for (ag, placed) in agents.iter().enumerate() {
                    let mass = (unit as f64 * placed.info.clear_prob).round() as i64;
                    for prev_t in 1..t {
                        if let Some(c) = clear.get(&CellAgentTick::new(*pos, ag, prev_t)) {
                            terms.push(m.weighted(c, mass));
                        }
                    }
                }
                let sum = m.sum(&terms);
                m.assert_eq_int(&var, &sum);
                clear_amount.insert(key, var);
            }
        }

        // Each agent occupies exactly one cell per sub-tick.
        for (ag, placed) in agents.iter().enumerate() {
            for at in horizon.sub_ticks(placed.info.speed, true, false) {
                let ast = AgentSubTick::new(ag, at);
                let lits: Vec<Bool<'ctx>> = on_cells[&ast]
                    .iter()
                    .filter_map(|p| is_on.get(&ast.pos(*p)).cloned())
                    .collect();
                m.exactly_one(&lits);
            }
        }

        // At most one occupant per cell per coarse tick.
        for pos in seen.keys() {
            for t in horizon.tick_range(true, false) {
                let lits: Vec<Bool<'ctx>> = (0..agents.len())
                    .filter_map(|ag| {
                        is_on
                            .get(&CellAgentSubTick::new(*pos, ag, SubTick::new(t, 1)))
                            .cloned()
                    })
                    .collect();
                m.at_most_one(&lits);
            }
        }

        // Clear-before-cross: presence on an obstacle needs a full unit of
        // accumulated mass beforehand.
        for pos in &obstacles {
            for (ag, placed) in agents.iter().enumerate() {
                for at in horizon.sub_ticks(placed.info.speed, true, false) {
                    let Some(on) = is_on.get(&CellAgentSubTick::new(*pos, ag, at)) else {
                        continue;
                    };
                    match clear_amount.get(&CellTick::new(*pos, at.tick)) {
                        Some(amount) => {
                            let lhs = m.weighted(on, unit);
                            m.assert_le(&lhs, amount);
                        }
                        None => m.assert(&on.not()),
                    }
                }
            }
        }

        // Motion continuity: one cardinally adjacent step (or staying put)
        // per sub-tick.
        for (key, on_now) in &is_on {
            if key.at.tick == horizon.ticks {
                continue;
            }
            let speed = agents[key.agent].info.speed;
            let next = key.next(speed);
            let nexts: Vec<Bool<'ctx>> = reach::ball(key.pos, 1, bounds)
                .iter()
                .filter_map(|p| is_on.get(&next.with_pos(*p)).cloned())
                .collect();
            m.implies_any(on_now, &nexts);
        }

        // An agent that moves late in a tick must have moved earlier in it.
        for (ag, placed) in agents.iter().enumerate() {
            let speed = placed.info.speed;
            for t in horizon.tick_range(false, true) {
                for s in 1..speed {
                    let earlier = mv[&AgentSubTick::new(ag, SubTick::new(t, s))].clone();
                    let later = mv[&AgentSubTick::new(ag, SubTick::new(t, s + 1))].clone();
                    m.assert_implies(&later, &earlier);
                }
            }
        }

        // Clearing consumes the whole tick.
        for ag in 0..agents.len() {
            for t in horizon.tick_range(false, true) {
                let var_any = &clear_any[&AgentTick::new(ag, t)];
                let var_move = &mv[&AgentSubTick::new(ag, SubTick::new(t, 1))];
                m.assert_implies(var_any, &var_move.not());
            }
        }

        // A clear needs the agent within clearing range that tick.
        for (key, var_clear) in &clear {
            if key.tick == 1 {
                // Tick-1 clear targets are within range of the start by
                // construction.
                continue;
            }
            let radius = agents[key.agent].info.clear_radius;
            let nearby: Vec<Bool<'ctx>> = reach::ball(key.pos, radius, bounds)
                .iter()
                .filter_map(|p| {
                    is_on
                        .get(&CellAgentSubTick::new(*p, key.agent, SubTick::new(key.tick, 1)))
                        .cloned()
                })
                .collect();
            m.implies_any(var_clear, &nearby);
        }

        // No clearing past the point where the cell is already guaranteed
        // clear, counting parallel attempts by other agents this tick.
        for (key, var_clear) in &clear {
            let lhs = m.weighted(var_clear, unit);
            let mut rhs_terms = vec![m.int(2 * unit)];
            if key.tick > 1 {
                if let Some(amount) = clear_amount.get(&CellTick::new(key.pos, key.tick)) {
                    rhs_terms.push(Int::sub(m.context(), &[&m.int(0), amount]));
                }
            }
            for (other, placed) in agents.iter().enumerate() {
                if other == key.agent {
                    continue;
                }
                let Some(other_clear) = clear.get(&CellAgentTick::new(key.pos, other, key.tick))
                else {
                    continue;
                };
                let mass = (unit as f64 * placed.info.clear_prob).round() as i64;
                rhs_terms.push(m.weighted(other_clear, -mass));
            }
            let rhs = m.sum(&rhs_terms);
            m.assert_lt(&lhs, &rhs);
        }

        // Objective: newly observed cells dominate; lateness of movement and
        // clearing breaks ties toward the earliest, cheapest plan.
        let full_factor: i64 = agents
            .iter()
            .map(|a| {
                let speed = a.info.speed as i64;
                let per_tick: i64 = (1..=speed).sum();
                (1..horizon.ticks as i64)
                    .map(|t| (t - 1) * speed * speed + per_tick)
                    .sum::<i64>()
            })
            .sum::<i64>()
            + agents.len() as i64 * (1..horizon.ticks as i64).sum::<i64>();

        let mut objective = Objective::new();
        for (pos, var) in &new_seen {
            let mut weight = full_factor;
            if priority_region.is_some_and(|region| region.contains(pos)) {
                weight *= 2;
            }
            objective.term(&m, var, weight);
        }
        for (ast, var) in &mv {
            let speed = agents[ast.agent].info.speed;
            objective.term_not(&m, var, ast.at.full_index(speed) as i64);
        }
        for (at, var) in &clear_any {
            objective.term_not(&m, var, at.tick as i64);
        }

        Ok(Self {
            m,
            agents,
            obstacles,
            bounds,
            objective: Some(objective),
            is_on,
            clear,
            on_cells,
        })
    }

    /// Run the solver once under the environment's budget.
    pub fn solve(mut self) -> ExploreSolution<'ctx> {
        let objective = self.objective.take().unwrap_or_default();
        let solution = self.m.solve(objective);
        ExploreSolution {
            problem: self,
            solution,
        }
    }
}

/// A solved exploration model, decodable into one action per agent.
pub struct ExploreSolution<'ctx> {
    problem: ExploreProblem<'ctx>,
    solution: Solution<'ctx>,
}

impl<'ctx> ExploreSolution<'ctx> {
    pub fn status(&self) -> SolveStatus {
        self.solution.status
    }

    /// Decode the first coarse tick: `Clear` wins over `Move`, agents that
    /// neither clear nor move get `Skip`.
    pub fn agent_actions(&self) -> Result<Vec<AgentAction>, DecodeError> {
        if !self.status().has_plan() {
            return Err(DecodeError::NoBindings);
        }
        let p = &self.problem;
        let mut actions = Vec::with_capacity(p.agents.len());

        'agents: for (ag, placed) in p.agents.iter().enumerate() {
            let init = placed.position;

            for pos in &p.obstacles {
                let key = CellAgentTick::new(*pos, ag, 1);
                if let Some(var) = p.clear.get(&key) {
                    if self.solution.bool_value(var) == Some(true) {
                        actions.push(AgentAction::Clear {
                            offset: sub_closest(*pos, init, p.bounds),
                        });
                        continue 'agents;
                    }
                }
            }

            let speed = placed.info.speed;
            let mut prev = init;
            let mut offsets = Vec::new();
            for s in 1..=speed {
                let next = AgentSubTick::new(ag, SubTick::new(1, s).next(speed));
                let here = p.on_cells.get(&next).and_then(|cells| {
                    cells.iter().find(|pos| {
                        p.is_on
                            .get(&next.pos(**pos))
                            .and_then(|v| self.solution.bool_value(v))
                            == Some(true)
                    })
                });
                let Some(&here) = here else {
                    return Err(DecodeError::MissingBinding {
                        agent: ag,
                        family: "is_on",
                    });
                };
                offsets.push(sub_closest(here, prev, p.bounds));
                prev = here;
            }

            if offsets.first().is_some_and(|o| !o.is_zero()) {
                offsets.truncate(
                    offsets
                        .iter()
                        .position(|o| o.is_zero())
                        .unwrap_or(offsets.len()),
                );
                actions.push(AgentAction::Move { offsets });
            } else {
                actions.push(AgentAction::Skip);
            }
        }

        debug_assert_eq!(actions.len(), p.agents.len());
        Ok(actions)
    }
}
