//! The tasking problem: the full gather / deliver / dig / construct / submit
//! model for one knowledge group's agents engaged on constructions.
//!
//! Beyond presence and clearing, the model tracks free blocks on dispensers,
//! directional block attachment on workers, and per-constructor cell fill
//! state, and exposes request / attach / join / detach / rotate / submit
//! actions. The objective is a single weighted sum approximating a strict
//! priority order: distance-to-resource tiers dominate attachment counts,
//! which dominate delivery counts, which dominate submissions. Each tier's
//! multiplier is at least the maximum possible total contribution of all
//! lower tiers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use hive_grid::{
    distance_bounded, sub_closest, AgentAction, Bounds, Direction, Dispenser, MobileAgent,
    Placed, Position, Rotation, TaskSnapshot, WorkerInfo, WorkerPhase,
};
use hive_z3::{CpEnv, ModelBuilder, Objective, Solution, SolveStatus};
use z3::ast::{Ast, Bool, Int};

use crate::distance::{distances_to_targets, CONGESTED_STEP};
use crate::keys::{
    AgentDirTick, AgentRotTick, AgentSubTick, AgentTick, CellAgentSubTick, CellAgentTick,
    CellConstructorTick, CellTick, ConstructorTick, Horizon, SubTick,
};
use crate::reach;
use crate::{BuildError, DecodeError};

/// Radius around a constructor scanned for congestion.
const PROBLEM_DISTANCE: i32 = 5;
/// Obstruction count past which the neighbourhood counts as congested.
const PROBLEM_CANDIDATE_LIMIT: usize = 8;

/// A constructor with its required-cell map, filled flags adjusted so cells
/// still held by an attached worker block are not double-counted.
#[derive(Debug, Clone)]
struct ConInfo {
    pos: Position,
    clear_radius: i32,
    clear_prob: f64,
    cells: BTreeMap<Position, (String, bool)>,
}

/// One decoded joint action set: one entry per mobile agent, one per
/// constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskActions {
    pub mobile: Vec<AgentAction>,
    pub constructors: Vec<AgentAction>,
}

/// A built (not yet solved) tasking model.
pub struct TaskProblem<'ctx> {
    m: ModelBuilder<'ctx>,
    agents: Vec<Placed<MobileAgent>>,
    steps: Vec<u32>,
    con_infos: Vec<ConInfo>,
    available_dispensers: Vec<(usize, Dispenser)>,
    bounds: Bounds,
    obstacles: BTreeSet<Position>,
    objective: Option<Objective<'ctx>>,

    agent_on: HashMap<CellAgentSubTick, Bool<'ctx>>,
    on_cells: HashMap<AgentSubTick, BTreeSet<Position>>,
    constructor_block_on: HashMap<CellConstructorTick, Bool<'ctx>>,
    move_clear: HashMap<CellAgentTick, Bool<'ctx>>,
    con_clear: HashMap<CellConstructorTick, Bool<'ctx>>,
    con_clear_cells: Vec<BTreeSet<Position>>,
    request: HashMap<CellAgentTick, Bool<'ctx>>,
    attach: HashMap<AgentDirTick, Bool<'ctx>>,
    join: HashMap<AgentDirTick, Bool<'ctx>>,
    detach: HashMap<AgentDirTick, Bool<'ctx>>,
    rotate: HashMap<AgentRotTick, Bool<'ctx>>,
    submit: HashMap<ConstructorTick, Bool<'ctx>>,
}

impl<'ctx> TaskProblem<'ctx> {
    /// Encode one group's tasking tick. `unit` is the fixed-point scale of
    /// the clearing accumulator.
    pub fn build(
        env: &'ctx CpEnv,
        snapshot: &TaskSnapshot,
        horizon: Horizon,
        unit: i64,
    ) -> Result<Self, BuildError> {
        if horizon.ticks < 2 {
            return Err(BuildError::HorizonTooShort(horizon.ticks));
        }

        let m = ModelBuilder::new(env);
        let bounds = snapshot.bounds;
        let seen = &snapshot.cells;
        let agents = snapshot.agents.clone();
        let markers = &snapshot.markers;

        let dist = |a: Position, b: Position| distance_bounded(a, b, bounds);
        let add_b = |p: Position, off: Position| (p + off).into_bounds(bounds);
        let sub_b = |p: Position, off: Position| (p - off).into_bounds(bounds);
        let mass_of = |prob: f64| (prob * unit as f64).round() as i64;

        let steps: Vec<u32> = agents.iter().map(|a| a.info.step_dist().max(1)).collect();

        let workers: Vec<(usize, Position, WorkerInfo)> = agents
            .iter()
            .enumerate()
            .filter_map(|(ag, placed)| {
                placed
                    .info
                    .as_worker()
                    .map(|w| (ag, placed.position, w.clone()))
            })
            .collect();

        // Constructor cells whose block is still attached to an adjacent
        // worker count as unfilled; the detach-after-join linkage puts them
        // back.
        let connected_cells: BTreeSet<Position> = snapshot
            .constructors
            .iter()
            .flat_map(|con| con.cells.iter())
            .filter(|cell| cell.filled)
            .filter(|cell| {
                workers.iter().any(|(_, wpos, winfo)| {
                    if dist(cell.position, *wpos) != 1 {
                        return false;
                    }
                    let offset = sub_closest(cell.position, *wpos, bounds);
                    winfo.attached_sides.iter().any(|d| offset == d.offset())
                })
            })
            .map(|cell| cell.position)
            .collect();

        let con_infos: Vec<ConInfo> = snapshot
            .constructors
            .iter()
            .map(|con| ConInfo {
                pos: con.position,
                clear_radius: con.clear_radius,
                clear_prob: con.clear_prob,
                cells: con
                    .cells
                    .iter()
                    .map(|cell| {
                        let filled = cell.filled && !connected_cells.contains(&cell.position);
                        (cell.position, (cell.block_type.clone(), filled))
                    })
                    .collect(),
            })
            .collect();

        let gatherers: BTreeSet<usize> = workers
            .iter()
            .filter(|(_, _, w)| w.phase == WorkerPhase::Gatherer)
            .map(|(ag, _, _)| *ag)
            .collect();
        let deliverers: BTreeSet<usize> = workers
            .iter()
            .filter(|(_, _, w)| {
                w.phase == WorkerPhase::Deliverer && w.constructor_idx < con_infos.len()
            })
            .map(|(ag, _, _)| *ag)
            .collect();

        let mut available_dispensers: Vec<(usize, Dispenser)> = Vec::new();
        for (idx, dis) in snapshot.dispensers.iter().enumerate() {
            match seen.get(&dis.position) {
                Some(cell) if cell.is_obstacle() => {
                    return Err(BuildError::DispenserOnObstacle(dis.position));
                }
                Some(cell) if cell.is_traversable() => {
                    available_dispensers.push((idx, dis.clone()));
                }
                Some(_) => {}
                None => return Err(BuildError::MissingCell(dis.position)),
            }
        }

        let con_footprints: BTreeSet<Position> = con_infos.iter().map(|c| c.pos).collect();
        let dis_footprints: BTreeSet<Position> =
            snapshot.dispensers.iter().map(|d| d.position).collect();
        let all_con_cells: BTreeSet<Position> = con_infos
            .iter()
            .flat_map(|c| c.cells.keys().copied())
            .collect();

        // Cells an agent body may stand on; blocks may additionally sit on
        // dispensers.
        let visitable: BTreeSet<Position> = seen
            .iter()
            .filter(|(p, c)| {
                c.is_traversable() && !con_footprints.contains(*p) && !dis_footprints.contains(*p)
            })
            .map(|(p, _)| *p)
            .collect();
        let blockable: BTreeSet<Position> = seen
            .iter()
            .filter(|(p, c)| c.is_traversable() && !con_footprints.contains(*p))
            .map(|(p, _)| *p)
            .collect();
        let obstacles: BTreeSet<Position> = visitable
            .iter()
            .filter(|p| seen.get(*p).is_some_and(|c| c.is_obstacle()))
            .copied()
            .collect();

        /*
         * Helper reachability sets
         */

        // tick -> cell -> agents whose body or attached blocks may be there.
        let mut any_on_time_cells: HashMap<u32, BTreeMap<Position, BTreeSet<usize>>> =
            HashMap::new();
        let mut worker_any_on_time_cells: HashMap<u32, BTreeMap<Position, BTreeSet<usize>>> =
            HashMap::new();
        for t in horizon.tick_range(false, false) {
            let mut per_cell: BTreeMap<Position, BTreeSet<usize>> = BTreeMap::new();
            let mut per_cell_workers: BTreeMap<Position, BTreeSet<usize>> = BTreeMap::new();
            for (ag, placed) in agents.iter().enumerate() {
                let radius = SubTick::new(t, 1).full_index(steps[ag]) as i32;
                for pos in reach::ball(placed.position, radius, bounds) {
                    if !blockable.contains(&pos) {
                        continue;
                    }
                    per_cell.entry(pos).or_default().insert(ag);
                    if agents[ag].info.as_worker().is_some() {
                        per_cell_workers.entry(pos).or_default().insert(ag);
                    }
                }
            }
            any_on_time_cells.insert(t, per_cell);
            worker_any_on_time_cells.insert(t, per_cell_workers);
        }

        // agent -> sub-tick -> cells its body or blocks may occupy by then.
        let mut any_on_sub_cells: HashMap<usize, HashMap<SubTick, BTreeSet<Position>>> =
            HashMap::new();
        for (ag, placed) in agents.iter().enumerate() {
            let mut per_sub = HashMap::new();
            for at in horizon.sub_ticks(steps[ag], false, false) {
                let cells: BTreeSet<Position> =
                    reach::ball(placed.position, at.full_index(steps[ag]) as i32, bounds)
                        .into_iter()
                        .filter(|p| blockable.contains(p))
                        .collect();
                per_sub.insert(at, cells);
            }
            any_on_sub_cells.insert(ag, per_sub);
        }

        /*
         * Main variables
         */

        let mut agent_on: HashMap<CellAgentSubTick, Bool<'ctx>> = HashMap::new();
        let mut on_cells: HashMap<AgentSubTick, BTreeSet<Position>> = HashMap::new();
        for (ag, placed) in agents.iter().enumerate() {
            for at in horizon.sub_ticks(steps[ag], false, false) {
                let ast = AgentSubTick::new(ag, at);
                let mut cells: BTreeSet<Position> =
                    reach::ball_strict(placed.position, at.full_index(steps[ag]) as i32, bounds)
                        .into_iter()
                        .filter(|p| visitable.contains(p))
                        .collect();
                if !markers.contains(&placed.position) {
                    cells.retain(|p| !markers.contains(p));
                }
                if at.is_first() {
                    cells.retain(|p| *p == placed.position);
                    if cells.contains(&placed.position) {
                        agent_on.insert(ast.pos(placed.position), m.constant(true));
                    }
                } else {
                    for p in &cells {
                        let key = ast.pos(*p);
                        agent_on
                            .insert(key, m.fresh_bool(&format!("agent_on_{}", key.suffix())));
                    }
                }
                on_cells.insert(ast, cells);
            }
        }

        let mut free_block_on: HashMap<CellTick, Bool<'ctx>> = HashMap::new();
        for (_, dis) in &available_dispensers {
            for t in horizon.tick_range(false, false) {
                let key = CellTick::new(dis.position, t);
                let reachable = worker_any_on_time_cells
                    .get(&t)
                    .is_some_and(|cells| cells.contains_key(&dis.position));
                if t != 1 && reachable {
                    free_block_on
                        .insert(key, m.fresh_bool(&format!("free_block_on_{}", key.suffix())));
                } else if dis.occupied {
                    free_block_on.insert(key, m.constant(true));
                }
            }
        }

        let mut attached_dir: HashMap<AgentDirTick, Bool<'ctx>> = HashMap::new();
        for (ag, _, winfo) in &workers {
            for d in Direction::ALL {
                for t in horizon.tick_range(false, false) {
                    let key = AgentDirTick::new(*ag, d, t);
                    if t != 1 {
                        attached_dir.insert(
                            key,
                            m.fresh_bool(&format!("attached_block_dir_{}", key.suffix())),
                        );
                    } else if winfo.attached_sides.contains(&d) {
                        attached_dir.insert(key, m.constant(true));
                    }
                }
            }
        }

        let mut constructor_block_on: HashMap<CellConstructorTick, Bool<'ctx>> = HashMap::new();
        for (con, info) in con_infos.iter().enumerate() {
            for (pos, (_, filled)) in &info.cells {
                for t in horizon.tick_range(false, false) {
                    let key = CellConstructorTick::new(*pos, con, t);
                    if t != 1 {
                        constructor_block_on.insert(
                            key,
                            m.fresh_bool(&format!("constructor_block_on_{}", key.suffix())),
                        );
                    } else if *filled {
                        constructor_block_on.insert(key, m.constant(true));
                    }
                }
            }
        }

        /*
         * Action variables
         */

        // tick -> cell -> agents able to clear it; tick -> agent -> cells.
        let mut move_clear_cells_pos: HashMap<u32, BTreeMap<Position, BTreeSet<usize>>> =
            HashMap::new();
        let mut move_clear_cells_agent: HashMap<u32, BTreeMap<usize, BTreeSet<Position>>> =
            HashMap::new();
        for t in horizon.tick_range(false, true) {
            let mut per_pos: BTreeMap<Position, BTreeSet<usize>> = BTreeMap::new();
            let mut per_agent: BTreeMap<usize, BTreeSet<Position>> = BTreeMap::new();
            for (ag, placed) in agents.iter().enumerate() {
                let radius = (t as i32 - 1) * steps[ag] as i32 + agents[ag].info.clear_radius();
                for pos in reach::ball(placed.position, radius, bounds) {
                    if !obstacles.contains(&pos) {
                        continue;
                    }
                    per_pos.entry(pos).or_default().insert(ag);
                    per_agent.entry(ag).or_default().insert(pos);
                }
            }
            move_clear_cells_pos.insert(t, per_pos);
            move_clear_cells_agent.insert(t, per_agent);
        }

        let mut move_clear: HashMap<CellAgentTick, Bool<'ctx>> = HashMap::new();
        for (t, per_pos) in &move_clear_cells_pos {
            for (pos, ags) in per_pos {
                for ag in ags {
                    // Deliverers carry blocks and must not clear.
                    if deliverers.contains(ag) {
                        continue;
                    }
                    let key = CellAgentTick::new(*pos, *ag, *t);
                    move_clear.insert(key, m.fresh_bool(&format!("move_clear_{}", key.suffix())));
                }
            }
        }

        let con_clear_cells: Vec<BTreeSet<Position>> = con_infos
            .iter()
            .map(|info| {
                reach::ball(info.pos, info.clear_radius, bounds)
                    .into_iter()
                    .filter(|p| obstacles.contains(p))
                    .collect()
            })
            .collect();
        let mut con_clear: HashMap<CellConstructorTick, Bool<'ctx>> = HashMap::new();
        for t in horizon.tick_range(false, true) {
            for (con, cells) in con_clear_cells.iter().enumerate() {
                for pos in cells {
                    let key = CellConstructorTick::new(*pos, con, t);
                    con_clear
                        .insert(key, m.fresh_bool(&format!("constructor_clear_{}", key.suffix())));
                }
            }
        }

        // tick -> all cells some agent or constructor might clear then.
        let mut all_clear_cells: HashMap<u32, BTreeSet<Position>> = HashMap::new();
        for t in horizon.tick_range(false, true) {
            let mut cells: BTreeSet<Position> = move_clear_cells_pos
                .get(&t)
                .map(|per| per.keys().copied().collect())
                .unwrap_or_default();
            for con_cells in &con_clear_cells {
                cells.extend(con_cells.iter().copied());
            }
            all_clear_cells.insert(t, cells);
        }

        // Gatherer -> candidate dispensers (pinned, or every one of its
        // block type), and the earliest tick one of them is reachable.
        let mut gatherer_dispensers: BTreeMap<usize, Vec<(usize, Dispenser)>> = BTreeMap::new();
        for ag in &gatherers {
            let winfo = agents[*ag].info.as_worker().map(|w| w.clone());
            let Some(winfo) = winfo else { continue };
            let candidates = match winfo.dispenser_idx {
                Some(idx) => {
                    let dis = snapshot.dispensers.get(idx).ok_or(
                        BuildError::MissingDispenser {
                            agent: *ag,
                            index: idx,
                        },
                    )?;
                    vec![(idx, dis.clone())]
                }
                None => available_dispensers
                    .iter()
                    .filter(|(_, d)| d.block_type == winfo.block_type)
                    .cloned()
                    .collect(),
            };
            gatherer_dispensers.insert(*ag, candidates);
        }
        let mut gatherer_dispenser_times: BTreeMap<usize, u32> = BTreeMap::new();
        for (ag, candidates) in &gatherer_dispensers {
            let first = candidates
                .iter()
                .map(|(_, d)| {
                    let gap = (dist(agents[*ag].position, d.position) - 1).max(0) as u32;
                    gap.div_ceil(steps[*ag]) + 1
                })
                .min();
            if let Some(first) = first {
                if first < horizon.ticks {
                    gatherer_dispenser_times.insert(*ag, first);
                }
            }
        }

        let mut request: HashMap<CellAgentTick, Bool<'ctx>> = HashMap::new();
        for (ag, start) in &gatherer_dispenser_times {
            for t in *start..horizon.ticks {
                for (_, dis) in &gatherer_dispensers[ag] {
                    let reachable = worker_any_on_time_cells
                        .get(&t)
                        .and_then(|cells| cells.get(&dis.position))
                        .is_some_and(|ags| ags.contains(ag));
                    if !reachable {
                        continue;
                    }
                    let key = CellAgentTick::new(dis.position, *ag, t);
                    request.insert(key, m.fresh_bool(&format!("request_{}", key.suffix())));
                }
            }
        }

        let mut attach: HashMap<AgentDirTick, Bool<'ctx>> = HashMap::new();
        for (ag, start) in &gatherer_dispenser_times {
            for t in *start..horizon.ticks {
                for d in Direction::ALL {
                    let key = AgentDirTick::new(*ag, d, t);
                    attach.insert(key, m.fresh_bool(&format!("attach_{}", key.suffix())));
                }
            }
        }

        let mut deliverer_constructor_times: BTreeMap<usize, u32> = BTreeMap::new();
        for ag in &deliverers {
            let Some(winfo) = agents[*ag].info.as_worker() else { continue };
            let first = con_infos[winfo.constructor_idx]
                .cells
                .keys()
                .map(|pos| {
                    let gap = (dist(agents[*ag].position, *pos) - 1).max(0) as u32;
                    gap.div_ceil(steps[*ag]) + 1
                })
                .min();
            if let Some(first) = first {
                if first < horizon.ticks {
                    deliverer_constructor_times.insert(*ag, first);
                }
            }
        }

        let mut join: HashMap<AgentDirTick, Bool<'ctx>> = HashMap::new();
        for (ag, start) in &deliverer_constructor_times {
            for t in *start..horizon.ticks {
                for d in Direction::ALL {
                    let key = AgentDirTick::new(*ag, d, t);
                    join.insert(key, m.fresh_bool(&format!("join_{}", key.suffix())));
                }
            }
        }

        // A detach is the tick after a successful join, so a worker never
        // appears both attached and freshly connected. At tick 1 it is
        // forced where the snapshot shows an attached block already
        // connected to a constructor cell.
        let mut detach: HashMap<AgentDirTick, Bool<'ctx>> = HashMap::new();
        for (ag, start) in &deliverer_constructor_times {
            let Some(winfo) = agents[*ag].info.as_worker() else { continue };
            for t in *start..horizon.ticks {
                for d in Direction::ALL {
                    let key = AgentDirTick::new(*ag, d, t);
                    if t == 1 {
                        let attached = winfo.attached_sides.contains(&d);
                        let connected =
                            connected_cells.contains(&add_b(agents[*ag].position, d.offset()));
                        if attached && connected {
                            detach.insert(key, m.constant(true));
                        }
                    } else if let Some(join_prev) = join.get(&key.prev()) {
                        detach.insert(key, join_prev.clone());
                    }
                }
            }
        }

        let mut rotate: HashMap<AgentRotTick, Bool<'ctx>> = HashMap::new();
        for (ag, _, _) in &workers {
            for r in Rotation::ALL {
                for t in horizon.tick_range(false, true) {
                    let key = AgentRotTick::new(*ag, r, t);
                    rotate.insert(key, m.fresh_bool(&format!("rotate_{}", key.suffix())));
                }
            }
        }

        let mut submit: HashMap<ConstructorTick, Bool<'ctx>> = HashMap::new();
        for con in 0..con_infos.len() {
            for t in horizon.tick_range(false, true) {
                let key = ConstructorTick::new(con, t);
                submit.insert(key, m.fresh_bool(&format!("submit_{}", key.suffix())));
            }
        }

        /*
         * Derived variables
         */

        let mut mv: HashMap<AgentSubTick, Bool<'ctx>> = HashMap::new();
        for (ag, _) in agents.iter().enumerate() {
            for at in horizon.sub_ticks(steps[ag], false, true) {
                let key = AgentSubTick::new(ag, at);
                mv.insert(key, m.fresh_bool(&format!("move_{}", key.suffix())));
            }
        }
        for (ast, var_move) in &mv {
            let mut pairs: Vec<(Bool<'ctx>, Bool<'ctx>)> = Vec::new();
            for pos in &on_cells[ast] {
                let key = ast.pos(*pos);
                let Some(on_now) = agent_on.get(&key) else { continue };
                let Some(on_next) = agent_on.get(&key.next(steps[ast.agent])) else { continue };
                pairs.push((on_now.clone(), on_next.not()));
            }
            m.iff_any_pair(var_move, &pairs);
        }

        let mut move_clear_any: HashMap<AgentTick, Bool<'ctx>> = HashMap::new();
        for ag in 0..agents.len() {
            for t in horizon.tick_range(false, true) {
                let key = AgentTick::new(ag, t);
                move_clear_any
                    .insert(key, m.fresh_bool(&format!("move_clear_any_{}", key.suffix())));
            }
        }
        for (at, var_any) in &move_clear_any {
            let mut lits = vec![var_any.not()];
            if let Some(cells) = move_clear_cells_agent
                .get(&at.tick)
                .and_then(|per| per.get(&at.agent))
            {
                for pos in cells {
                    if let Some(c) = move_clear.get(&at.at(*pos)) {
                        lits.push(c.clone());
                    }
                }
            }
            m.exactly_one(&lits);
        }

        let mut con_clear_any: HashMap<ConstructorTick, Bool<'ctx>> = HashMap::new();
        for con in 0..con_infos.len() {
            for t in horizon.tick_range(false, true) {
                let key = ConstructorTick::new(con, t);
                con_clear_any
                    .insert(key, m.fresh_bool(&format!("constructor_clear_any_{}", key.suffix())));
            }
        }
        for (ct, var_any) in &con_clear_any {
            let mut lits = vec![var_any.not()];
            for pos in &con_clear_cells[ct.constructor] {
                if let Some(c) = con_clear.get(&ct.at(*pos)) {
                    lits.push(c.clone());
                }
            }
            m.exactly_one(&lits);
        }

        // Accumulated clear mass per cell and tick: the linear sum of all
        // agents' and constructors' attempts so far, fixed-point scaled and
        // capped at 2*unit - 1. A conservative determinization of the
        // stochastic clearing process.
        let mut clear_amount: HashMap<CellTick, Int<'ctx>> = HashMap::new();
        for (t, cells) in &all_clear_cells {
            for pos in cells {
                let key = CellTick::new(*pos, t + 1);
                let var = m.fresh_int(&format!("clear_amount_{}", key.suffix()), 0, 2 * unit - 1);
                clear_amount.insert(key, var);
            }
        }
        for (key, var) in &clear_amount {
            let mut terms: Vec<Int<'ctx>> = Vec::new();
            for t in 1..key.tick {
                for (ag, placed) in agents.iter().enumerate() {
                    if let Some(c) = move_clear.get(&CellAgentTick::new(key.pos, ag, t)) {
                        terms.push(m.weighted(c, mass_of(placed.info.clear_prob())));
                    }
                }
                for (con, info) in con_infos.iter().enumerate() {
                    if let Some(c) = con_clear.get(&CellConstructorTick::new(key.pos, con, t)) {
                        terms.push(m.weighted(c, mass_of(info.clear_prob)));
                    }
                }
            }
            let sum = m.sum(&terms);
            m.assert_eq_int(var, &sum);
        }

        // Worker-carried block presence per cell, derived from the worker's
        // own position and attachment sides.
        let mut attached_block_on: HashMap<CellAgentSubTick, Bool<'ctx>> = HashMap::new();
        for (ag, _, _) in &workers {
            for at in horizon.sub_ticks(steps[*ag], false, false) {
                let ast = AgentSubTick::new(*ag, at);
                for pos in &any_on_sub_cells[ag][&at] {
                    let key = ast.pos(*pos);
                    attached_block_on
                        .insert(key, m.fresh_bool(&format!("attached_block_on_{}", key.suffix())));
                }
            }
        }
        for (key, var) in &attached_block_on {
            let mut pairs: Vec<(Bool<'ctx>, Bool<'ctx>)> = Vec::new();
            for d in Direction::ALL {
                let Some(on) = agent_on.get(&key.with_pos(sub_b(key.pos, d.offset()))) else {
                    continue;
                };
                let Some(side) = attached_dir.get(&AgentDirTick::new(key.agent, d, key.at.tick))
                else {
                    continue;
                };
                pairs.push((on.clone(), side.clone()));
            }
            m.iff_any_pair(var, &pairs);
        }

        // Anything of agent `ag` present at a cell: its body, and for
        // workers also a carried block.
        let any_on = |pos: Position, ag: usize, at: SubTick| -> Vec<Bool<'ctx>> {
            let key = CellAgentSubTick::new(pos, ag, at);
            let mut vars = Vec::new();
            if let Some(v) = agent_on.get(&key) {
                vars.push(v.clone());
            }
            if agents[ag].info.as_worker().is_some() {
                if let Some(v) = attached_block_on.get(&key) {
                    vars.push(v.clone());
                }
            }
            vars
        };

        // Every worker performs at most one exclusive action per tick.
        let mut any_worker_action: HashMap<AgentTick, Bool<'ctx>> = HashMap::new();
        for (ag, _, _) in &workers {
            for t in horizon.tick_range(false, true) {
                let key = AgentTick::new(*ag, t);
                any_worker_action
                    .insert(key, m.fresh_bool(&format!("any_worker_action_{}", key.suffix())));
            }
        }
        for (at, var_any) in &any_worker_action {
            let mut lits = vec![var_any.not(), move_clear_any[at].clone()];
            for (key, var) in &request {
                if key.agent == at.agent && key.tick == at.tick {
                    lits.push(var.clone());
                }
            }
            for d in Direction::ALL {
                let key = at.dir(d);
                if let Some(v) = attach.get(&key) {
                    lits.push(v.clone());
                }
                if let Some(v) = join.get(&key) {
                    lits.push(v.clone());
                }
                if let Some(v) = detach.get(&key) {
                    lits.push(v.clone());
                }
            }
            for r in Rotation::ALL {
                lits.push(rotate[&AgentRotTick::new(at.agent, r, at.tick)].clone());
            }
            m.exactly_one(&lits);
        }

        // Diggers' only exclusive action is clearing.
        let any_agent_action = |ag: usize, t: u32| -> Bool<'ctx> {
            let key = AgentTick::new(ag, t);
            match agents[ag].info {
                MobileAgent::Worker(_) => any_worker_action[&key].clone(),
                MobileAgent::Digger(_) => move_clear_any[&key].clone(),
            }
        };

        // Constructors: submit, clear, or serve one join/detach.
        for (con, _) in con_infos.iter().enumerate() {
            for t in horizon.tick_range(false, true) {
                let key = ConstructorTick::new(con, t);
                let var_any =
                    m.fresh_bool(&format!("any_constructor_action_{}", key.suffix()));
                let mut lits = vec![var_any.not(), submit[&key].clone(), con_clear_any[&key].clone()];
                for (ag, _, winfo) in &workers {
                    if winfo.constructor_idx != con {
                        continue;
                    }
                    for d in Direction::ALL {
                        let dir_key = AgentDirTick::new(*ag, d, t);
                        if let Some(v) = join.get(&dir_key) {
                            lits.push(v.clone());
                        }
                        if let Some(v) = detach.get(&dir_key) {
                            lits.push(v.clone());
                        }
                    }
                }
                m.exactly_one(&lits);
            }
        }

        // A gatherer is fully loaded once its attachment count reaches
        // capacity; the world model then flips it to deliverer.
        let mut fully_loaded: HashMap<AgentTick, Bool<'ctx>> = HashMap::new();
        for ag in &gatherers {
            let Some(winfo) = agents[*ag].info.as_worker() else { continue };
            for t in horizon.tick_range(false, false) {
                let key = AgentTick::new(*ag, t);
                let var = m.fresh_bool(&format!("fully_loaded_{}", key.suffix()));
                let mut terms: Vec<Int<'ctx>> = Vec::new();
                for d in Direction::ALL {
                    if let Some(side) = attached_dir.get(&key.dir(d)) {
                        terms.push(m.weighted(side, 1));
                    }
                }
                let sum = m.sum(&terms);
                let cap = m.int(winfo.max_attached as i64);
                m.assert(&var.implies(&sum._eq(&cap)));
                m.assert(&var.not().implies(&sum.lt(&cap)));
                fully_loaded.insert(key, var);
            }
        }

        let mut any_loaded: HashMap<AgentTick, Bool<'ctx>> = HashMap::new();
        for ag in &deliverers {
            for t in horizon.tick_range(false, false) {
                let key = AgentTick::new(*ag, t);
                let var = m.fresh_bool(&format!("any_loaded_{}", key.suffix()));
                let sides: Vec<Bool<'ctx>> = Direction::ALL
                    .iter()
                    .filter_map(|d| attached_dir.get(&key.dir(*d)).cloned())
                    .collect();
                m.iff_any(&var, &sides);
                any_loaded.insert(key, var);
            }
        }

        // Whether a gatherer takes the free block off a dispenser this tick.
        let mut dispenser_attach: HashMap<CellAgentTick, Bool<'ctx>> = HashMap::new();
        for (_, dis) in &available_dispensers {
            for (ag, _, winfo) in &workers {
                if winfo.phase != WorkerPhase::Gatherer || winfo.block_type != dis.block_type {
                    continue;
                }
                for t in horizon.tick_range(false, true) {
                    let key = CellAgentTick::new(dis.position, *ag, t);
                    let var = m.fresh_bool(&format!("dispenser_attach_{}", key.suffix()));
                    let mut pairs: Vec<(Bool<'ctx>, Bool<'ctx>)> = Vec::new();
                    for d in Direction::ALL {
                        let off = sub_b(dis.position, d.offset());
                        if !visitable.contains(&off) {
                            continue;
                        }
                        let Some(on) =
                            agent_on.get(&CellAgentSubTick::new(off, *ag, SubTick::new(t, 1)))
                        else {
                            continue;
                        };
                        let Some(a) = attach.get(&AgentDirTick::new(*ag, d, t)) else {
                            continue;
                        };
                        pairs.push((on.clone(), a.clone()));
                    }
                    m.iff_any_pair(&var, &pairs);
                    dispenser_attach.insert(key, var);
                }
            }
        }

        /*
         * Position constraints
         */

        // Each agent occupies exactly one cell per sub-tick.
        for (ag, _) in agents.iter().enumerate() {
            for at in horizon.sub_ticks(steps[ag], false, false) {
                let ast = AgentSubTick::new(ag, at);
                let lits: Vec<Bool<'ctx>> = on_cells[&ast]
                    .iter()
                    .filter_map(|p| agent_on.get(&ast.pos(*p)).cloned())
                    .collect();
                m.exactly_one(&lits);
            }
        }

        // At most one occupant per cell: agent body, carried block, free
        // block, or constructor-held block.
        for t in horizon.tick_range(false, false) {
            for (pos, ags) in &any_on_time_cells[&t] {
                let mut lits: Vec<Bool<'ctx>> = Vec::new();
                if let Some(fb) = free_block_on.get(&CellTick::new(*pos, t)) {
                    lits.push(fb.clone());
                }
                for ag in ags {
                    lits.extend(any_on(*pos, *ag, SubTick::new(t, 1)));
                }
                for con in 0..con_infos.len() {
                    if let Some(cb) =
                        constructor_block_on.get(&CellConstructorTick::new(*pos, con, t))
                    {
                        lits.push(cb.clone());
                    }
                }
                m.at_most_one(&lits);
            }
        }

        // Clear-before-cross: nothing stands on an obstacle until its
        // accumulated mass reached a full unit beforehand.
        for t in horizon.tick_range(false, false) {
            for (pos, ags) in &any_on_time_cells[&t] {
                if !obstacles.contains(pos) {
                    continue;
                }
                for ag in ags {
                    for s in horizon.subs_at(steps[*ag], t) {
                        let vars = any_on(*pos, *ag, SubTick::new(t, s));
                        if vars.is_empty() {
                            continue;
                        }
                        match clear_amount.get(&CellTick::new(*pos, t - 1)) {
                            Some(amount) => {
                                let terms: Vec<Int<'ctx>> =
                                    vars.iter().map(|v| m.weighted(v, unit)).collect();
                                let lhs = m.sum(&terms);
                                m.assert_le(&lhs, amount);
                            }
                            None => {
                                for v in &vars {
                                    m.assert(&v.not());
                                }
                            }
                        }
                    }
                }
            }
        }
        for (con, info) in con_infos.iter().enumerate() {
            for pos in info.cells.keys() {
                if !obstacles.contains(pos) {
                    continue;
                }
                for t in horizon.tick_range(false, false) {
                    let Some(cb) = constructor_block_on.get(&CellConstructorTick::new(*pos, con, t))
                    else {
                        continue;
                    };
                    match clear_amount.get(&CellTick::new(*pos, t - 1)) {
                        Some(amount) => {
                            let lhs = m.weighted(cb, unit);
                            m.assert_le(&lhs, amount);
                        }
                        None => m.assert(&cb.not()),
                    }
                }
            }
        }

        // A cell occupied this tick stays closed to every other agent next
        // tick, preventing swap conflicts.
        for t in horizon.tick_range(false, true) {
            for (pos, ags) in &any_on_time_cells[&t] {
                for ag in ags {
                    let mut lits = any_on(*pos, *ag, SubTick::new(t, 1));
                    if let Some(next_ags) =
                        any_on_time_cells.get(&(t + 1)).and_then(|c| c.get(pos))
                    {
                        for other in next_ags {
                            if other == ag {
                                continue;
                            }
                            lits.extend(any_on(*pos, *other, SubTick::new(t + 1, 1)));
                        }
                    }
                    m.at_most_one(&lits);
                }
            }
            for (con, info) in con_infos.iter().enumerate() {
                for pos in info.cells.keys() {
                    let Some(cb) = constructor_block_on.get(&CellConstructorTick::new(*pos, con, t))
                    else {
                        continue;
                    };
                    let Some(next_ags) = any_on_time_cells.get(&(t + 1)).and_then(|c| c.get(pos))
                    else {
                        continue;
                    };
                    let mut lits = vec![cb.clone()];
                    for ag in next_ags {
                        lits.extend(any_on(*pos, *ag, SubTick::new(t + 1, 1)));
                    }
                    m.at_most_one(&lits);
                }
            }
        }

        // Mid-tick positions must not cross other agents' tick positions
        // either side of the boundary.
        for (ag, per_sub) in &any_on_sub_cells {
            for (at, cells) in per_sub {
                if at.sub == 1 {
                    continue;
                }
                for pos in cells {
                    let here = any_on(*pos, *ag, *at);
                    for t in [at.tick, at.tick + 1] {
                        let mut lits = here.clone();
                        if let Some(t_ags) = any_on_time_cells.get(&t).and_then(|c| c.get(pos)) {
                            for other in t_ags {
                                if other == ag {
                                    continue;
                                }
                                lits.extend(any_on(*pos, *other, SubTick::new(t, 1)));
                            }
                        }
                        for con in 0..con_infos.len() {
                            if let Some(cb) =
                                constructor_block_on.get(&CellConstructorTick::new(*pos, con, t))
                            {
                                lits.push(cb.clone());
                            }
                        }
                        m.at_most_one(&lits);
                    }
                }
            }
        }

        /*
         * Move constraints
         */

        // One cardinally adjacent step (or staying put) per sub-tick.
        for (key, on_now) in &agent_on {
            if key.at.tick == horizon.ticks {
                continue;
            }
            let next = key.next(steps[key.agent]);
            let nexts: Vec<Bool<'ctx>> = reach::ball(key.pos, 1, bounds)
                .iter()
                .filter_map(|p| agent_on.get(&next.with_pos(*p)).cloned())
                .collect();
            m.implies_any(on_now, &nexts);
        }

        // Late movement within a tick implies earlier movement in it.
        for (ag, _) in agents.iter().enumerate() {
            for t in horizon.tick_range(false, true) {
                for s in 1..steps[ag] {
                    let earlier = mv[&AgentSubTick::new(ag, SubTick::new(t, s))].clone();
                    let later = mv[&AgentSubTick::new(ag, SubTick::new(t, s + 1))].clone();
                    m.assert_implies(&later, &earlier);
                }
            }
        }

        // Movement excludes every other action that tick.
        for (ag, _) in agents.iter().enumerate() {
            for at in horizon.sub_ticks(steps[ag], false, true) {
                let action = any_agent_action(ag, at.tick);
                let var_move = &mv[&AgentSubTick::new(ag, at)];
                m.assert_implies(&action, &var_move.not());
            }
        }

        /*
         * Clear constraints
         */

        for (key, var_clear) in &move_clear {
            // Within clearing range that tick.
            let radius = agents[key.agent].info.clear_radius();
            let nearby: Vec<Bool<'ctx>> = reach::ball(key.pos, radius, bounds)
                .iter()
                .filter_map(|p| {
                    agent_on
                        .get(&CellAgentSubTick::new(*p, key.agent, SubTick::new(key.tick, 1)))
                        .cloned()
                })
                .collect();
            m.implies_any(var_clear, &nearby);

            // Not past the guaranteed-clear threshold, counting parallel
            // attempts this tick.
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
                if let Some(c) = move_clear.get(&CellAgentTick::new(key.pos, other, key.tick)) {
                    rhs_terms.push(m.weighted(c, -mass_of(placed.info.clear_prob())));
                }
            }
            for (con, info) in con_infos.iter().enumerate() {
                if let Some(c) = con_clear.get(&CellConstructorTick::new(key.pos, con, key.tick)) {
                    rhs_terms.push(m.weighted(c, -mass_of(info.clear_prob)));
                }
            }
            let rhs = m.sum(&rhs_terms);
            m.assert_lt(&lhs, &rhs);
        }

        for (key, var_clear) in &con_clear {
            let lhs = m.weighted(var_clear, unit);
            let mut rhs_terms = vec![m.int(2 * unit)];
            if key.tick > 1 {
                if let Some(amount) = clear_amount.get(&key.cell_tick()) {
                    rhs_terms.push(Int::sub(m.context(), &[&m.int(0), amount]));
                }
            }
            for (ag, placed) in agents.iter().enumerate() {
                if let Some(c) = move_clear.get(&CellAgentTick::new(key.pos, ag, key.tick)) {
                    rhs_terms.push(m.weighted(c, -mass_of(placed.info.clear_prob())));
                }
            }
            for (con, info) in con_infos.iter().enumerate() {
                if con == key.constructor {
                    continue;
                }
                if let Some(c) = con_clear.get(&key.with_constructor(con)) {
                    rhs_terms.push(m.weighted(c, -mass_of(info.clear_prob)));
                }
            }
            let rhs = m.sum(&rhs_terms);
            m.assert_lt(&lhs, &rhs);
        }

        // Clearing requires empty hands (workers) or empty cells
        // (constructors).
        for (ag, _, _) in &workers {
            for d in Direction::ALL {
                for t in horizon.tick_range(false, true) {
                    let Some(side) = attached_dir.get(&AgentDirTick::new(*ag, d, t)) else {
                        continue;
                    };
                    m.assert_implies(&move_clear_any[&AgentTick::new(*ag, t)], &side.not());
                }
            }
        }
        for (con, info) in con_infos.iter().enumerate() {
            for pos in info.cells.keys() {
                for t in horizon.tick_range(false, true) {
                    let Some(cb) = constructor_block_on.get(&CellConstructorTick::new(*pos, con, t))
                    else {
                        continue;
                    };
                    m.assert_implies(&con_clear_any[&ConstructorTick::new(con, t)], &cb.not());
                }
            }
        }

        /*
         * Attach constraints
         */

        // An attachment side whose block would land outside blockable
        // terrain rules out standing there.
        for (ag, start_pos, _) in &workers {
            for at in horizon.sub_ticks(steps[*ag], false, false) {
                for pos in reach::ball_strict(*start_pos, at.full_index(steps[*ag]) as i32, bounds)
                {
                    if !visitable.contains(&pos) {
                        continue;
                    }
                    for d in Direction::ALL {
                        if blockable.contains(&add_b(pos, d.offset())) {
                            continue;
                        }
                        let Some(on) = agent_on.get(&CellAgentSubTick::new(pos, *ag, at)) else {
                            continue;
                        };
                        let Some(side) = attached_dir.get(&AgentDirTick::new(*ag, d, at.tick))
                        else {
                            continue;
                        };
                        m.assert_implies(on, &side.not());
                    }
                }
            }
        }

        // A request needs an adjacent worker, an empty dispenser cell, and
        // no block already waiting on it.
        for (key, var_req) in &request {
            if let Some(fb) = free_block_on.get(&CellTick::new(key.pos, key.tick)) {
                m.assert_implies(var_req, &fb.not());
            }
            for (other, _, _) in &workers {
                for v in any_on(key.pos, *other, SubTick::new(key.tick, 1)) {
                    m.assert_implies(var_req, &v.not());
                }
            }
            let adjacent: Vec<Bool<'ctx>> = reach::ring(key.pos, 1, bounds)
                .iter()
                .filter(|p| visitable.contains(*p))
                .filter_map(|p| {
                    agent_on
                        .get(&CellAgentSubTick::new(*p, key.agent, SubTick::new(key.tick, 1)))
                        .cloned()
                })
                .collect();
            m.implies_any(var_req, &adjacent);
        }

        // An attach needs an adjacent dispenser with a free block on it.
        for (key, var_attach) in &attach {
            let mut pairs: Vec<(Bool<'ctx>, Bool<'ctx>)> = Vec::new();
            for (_, dis) in &available_dispensers {
                let off = sub_b(dis.position, key.dir.offset());
                if !visitable.contains(&off) {
                    continue;
                }
                let Some(fb) = free_block_on.get(&CellTick::new(dis.position, key.tick)) else {
                    continue;
                };
                let Some(on) =
                    agent_on.get(&CellAgentSubTick::new(off, key.agent, SubTick::new(key.tick, 1)))
                else {
                    continue;
                };
                pairs.push((on.clone(), fb.clone()));
            }
            if pairs.is_empty() {
                m.assert(&var_attach.not());
            } else {
                m.implies_any_pair(var_attach, &pairs);
            }
        }

        /*
         * Constructor constraints
         */

        // Joining requires the block attached on that side, the worker on a
        // matching cell, and, when joining beyond the directly adjacent
        // ring, an already-filled neighbouring constructor cell to chain
        // through, so construction grows outward.
        for (ag, _, winfo) in &workers {
            for d in Direction::ALL {
                for t in horizon.tick_range(false, true) {
                    let key = AgentDirTick::new(*ag, d, t);
                    let Some(var_join) = join.get(&key) else { continue };
                    let Some(side) = attached_dir.get(&key) else {
                        m.assert(&var_join.not());
                        continue;
                    };

                    let con = &con_infos[winfo.constructor_idx];
                    let block_type = &winfo.block_type;

                    let mut direct: Vec<Bool<'ctx>> = Vec::new();
                    for cell in reach::ring(con.pos, 1, bounds) {
                        let Some((cell_type, _)) = con.cells.get(&cell) else { continue };
                        if cell_type != block_type {
                            continue;
                        }
                        let off = sub_b(cell, d.offset());
                        if !visitable.contains(&off) {
                            continue;
                        }
                        if let Some(on) =
                            agent_on.get(&CellAgentSubTick::new(off, *ag, SubTick::new(t, 1)))
                        {
                            direct.push(on.clone());
                        }
                    }

                    let mut chained: Vec<(Bool<'ctx>, Bool<'ctx>)> = Vec::new();
                    for (cell, (cell_type, _)) in &con.cells {
                        if cell_type != block_type || dist(con.pos, *cell) <= 1 {
                            continue;
                        }
                        let off = sub_b(*cell, d.offset());
                        if !visitable.contains(&off) {
                            continue;
                        }
                        let Some(on) =
                            agent_on.get(&CellAgentSubTick::new(off, *ag, SubTick::new(t, 1)))
                        else {
                            continue;
                        };
                        let through: Vec<Bool<'ctx>> = reach::ring(*cell, 1, bounds)
                            .iter()
                            .filter(|n| con.cells.contains_key(*n))
                            .filter_map(|n| {
                                constructor_block_on
                                    .get(&CellConstructorTick::new(
                                        *n,
                                        winfo.constructor_idx,
                                        t,
                                    ))
                                    .cloned()
                            })
                            .collect();
                        if through.is_empty() {
                            continue;
                        }
                        chained.push((on.clone(), m.any(&through)));
                    }

                    if direct.is_empty() && chained.is_empty() {
                        m.assert(&var_join.not());
                        continue;
                    }
                    m.assert_implies(var_join, side);
                    m.implies_any_or_chain(var_join, &direct, &chained);
                }
            }
        }

        // Submission exactly when every required cell shows its block that
        // same tick.
        for (con, info) in con_infos.iter().enumerate() {
            for t in horizon.tick_range(false, true) {
                let var_submit = &submit[&ConstructorTick::new(con, t)];
                let cells: Option<Vec<Bool<'ctx>>> = info
                    .cells
                    .keys()
                    .map(|p| constructor_block_on.get(&CellConstructorTick::new(*p, con, t)).cloned())
                    .collect();
                match cells {
                    Some(cells) => m.iff_all_under(var_submit, &cells, None),
                    None => m.assert(&var_submit.not()),
                }
            }
        }

        // A constructor block persists, appears through a detach after a
        // join, and vanishes the tick a submit consumes it.
        for (con, info) in con_infos.iter().enumerate() {
            for (pos, (cell_type, _)) in &info.cells {
                for t in horizon.tick_range(false, true) {
                    let cct = CellConstructorTick::new(*pos, con, t);
                    let var_submit = &submit[&cct.constructor_tick()];
                    let b0 = constructor_block_on.get(&cct);
                    let b1 = constructor_block_on.get(&cct.next());

                    let mut pairs: Vec<(Bool<'ctx>, Bool<'ctx>)> = Vec::new();
                    for (ag, _, winfo) in &workers {
                        if winfo.constructor_idx != con || &winfo.block_type != cell_type {
                            continue;
                        }
                        for dir in Direction::ALL {
                            let wpos = sub_b(*pos, dir.offset());
                            if !visitable.contains(&wpos) {
                                continue;
                            }
                            let Some(on) =
                                agent_on.get(&CellAgentSubTick::new(wpos, *ag, SubTick::new(t, 1)))
                            else {
                                continue;
                            };
                            let Some(det) = detach.get(&AgentDirTick::new(*ag, dir, t)) else {
                                continue;
                            };
                            pairs.push((on.clone(), det.clone()));
                        }
                    }

                    if let Some(b0) = b0 {
                        let mut lits = vec![b0.not()];
                        if let Some(b1) = b1 {
                            lits.push(b1.clone());
                        }
                        lits.push(var_submit.clone());
                        m.assert(&m.any(&lits));
                    }
                    if let (Some(b0), Some(b1)) = (b0, b1) {
                        m.assert(&m.any(&[b0.not(), b1.not(), var_submit.not()]));
                    }
                    let target = b1.cloned().unwrap_or_else(|| m.constant(false));
                    m.iff_any_pair_under(&target, &pairs, b0.map(|b| b.not()).as_ref());
                }
            }
        }

        /*
         * Dispenser constraints
         */

        for (_, dis) in &available_dispensers {
            let typed_workers: Vec<usize> = workers
                .iter()
                .filter(|(_, _, w)| w.block_type == dis.block_type)
                .map(|(ag, _, _)| *ag)
                .collect();
            let typed_gatherers: Vec<usize> = workers
                .iter()
                .filter(|(_, _, w)| {
                    w.phase == WorkerPhase::Gatherer && w.block_type == dis.block_type
                })
                .map(|(ag, _, _)| *ag)
                .collect();

            for t in horizon.tick_range(false, true) {
                let fb0 = free_block_on.get(&CellTick::new(dis.position, t));
                let fb1 = free_block_on.get(&CellTick::new(dis.position, t + 1));

                let requests: Vec<Bool<'ctx>> = typed_workers
                    .iter()
                    .filter_map(|ag| {
                        request.get(&CellAgentTick::new(dis.position, *ag, t)).cloned()
                    })
                    .collect();
                let attaches: Vec<Bool<'ctx>> = typed_gatherers
                    .iter()
                    .filter_map(|ag| {
                        dispenser_attach
                            .get(&CellAgentTick::new(dis.position, *ag, t))
                            .cloned()
                    })
                    .collect();

                // A free block persists unless some gatherer takes it.
                let untouched: Vec<Bool<'ctx>> = attaches.iter().map(|a| a.not()).collect();
                match (fb0, fb1) {
                    (Some(fb0), Some(fb1)) => m.iff_all_under(fb1, &untouched, Some(fb0)),
                    (Some(fb0), None) => m.assert_implies(fb0, &m.any(&attaches)),
                    _ => {}
                }

                // A fresh block appears exactly through a request.
                if !requests.is_empty() {
                    match fb1 {
                        Some(fb1) => {
                            m.iff_any_under(fb1, &requests, fb0.map(|b| b.not()).as_ref())
                        }
                        None => {
                            let none = m.all(&requests.iter().map(|r| r.not()).collect::<Vec<_>>());
                            match fb0 {
                                Some(fb0) => m.assert_implies(fb0, &none),
                                None => m.assert(&none),
                            }
                        }
                    }
                } else if let (Some(fb0), Some(fb1)) = (fb0, fb1) {
                    m.assert_implies(&fb0.not(), &fb1.not());
                } else if let (None, Some(fb1)) = (fb0, fb1) {
                    m.assert(&fb1.not());
                }

                // Dispenser exclusivity: one request, one take, per tick.
                m.at_most_one(&requests);
                m.at_most_one(&attaches);
            }
        }

        /*
         * Attached-block constraints
         */

        // Rotation permutes the four sides cyclically.
        for (ag, _, _) in &workers {
            for d in Direction::ALL {
                for r in Rotation::ALL {
                    for t in horizon.tick_range(false, true) {
                        let var_rot = &rotate[&AgentRotTick::new(*ag, r, t)];
                        let before = attached_dir.get(&AgentDirTick::new(*ag, d, t));
                        let after = attached_dir.get(&AgentDirTick::new(*ag, d.rotate(r), t + 1));
                        match (before, after) {
                            (Some(before), Some(after)) => {
                                m.assert(&m.any(&[var_rot.not(), after.not(), before.clone()]));
                                m.assert(&m.any(&[var_rot.not(), after.clone(), before.not()]));
                            }
                            (Some(before), None) => {
                                m.assert(&m.any(&[var_rot.not(), before.not()]));
                            }
                            (None, Some(after)) => {
                                m.assert(&m.any(&[var_rot.not(), after.not()]));
                            }
                            (None, None) => {}
                        }
                    }
                }
            }
        }

        // Without a rotation, a side keeps its block unless detached, and
        // gains one exactly through an attach.
        for (ag, _, _) in &workers {
            for d in Direction::ALL {
                for t in horizon.tick_range(false, true) {
                    let key = AgentDirTick::new(*ag, d, t);
                    let ab1 = attached_dir.get(&key);
                    let ab2 = attached_dir.get(&key.next());
                    let at1 = attach.get(&key);
                    let de1 = detach.get(&key);
                    let rots: Vec<Bool<'ctx>> = Rotation::ALL
                        .iter()
                        .map(|r| rotate[&AgentRotTick::new(*ag, *r, t)].clone())
                        .collect();

                    if let Some(ab1) = ab1 {
                        let mut lits = rots.clone();
                        lits.push(ab1.not());
                        if let Some(ab2) = ab2 {
                            lits.push(ab2.clone());
                        }
                        if let Some(de1) = de1 {
                            lits.push(de1.clone());
                        }
                        m.assert(&m.any(&lits));
                    }
                    if let (Some(ab1), Some(ab2), Some(de1)) = (ab1, ab2, de1) {
                        let mut lits = rots.clone();
                        lits.extend([ab1.not(), ab2.not(), de1.not()]);
                        m.assert(&m.any(&lits));
                    }
                    if let Some(at1) = at1 {
                        let mut lits = rots.clone();
                        if let Some(ab1) = ab1 {
                            lits.push(ab1.clone());
                        }
                        if let Some(ab2) = ab2 {
                            lits.push(ab2.clone());
                        }
                        lits.push(at1.not());
                        m.assert(&m.any(&lits));
                    }
                    if let Some(ab2) = ab2 {
                        let mut lits = rots.clone();
                        if let Some(ab1) = ab1 {
                            lits.push(ab1.clone());
                        }
                        lits.push(ab2.not());
                        if let Some(at1) = at1 {
                            lits.push(at1.clone());
                        }
                        m.assert(&m.any(&lits));
                    }
                }
            }
        }

        /*
         * Objective
         *
         * One weighted sum standing in for a strict priority order. Tier
         * multipliers are computed up front so that each tier dominates the
         * maximum possible total contribution of everything below it.
         */

        let mut objective = Objective::new();
        let ticks = horizon.ticks as i64;

        // Base lateness costs shared by all roles.
        for (ast, var_move) in &mv {
            objective.term_not(&m, var_move, ast.at.full_index(steps[ast.agent]) as i64);
        }
        let weight_move = ticks * (ticks - 1) / 2;
        for (ag, _) in agents.iter().enumerate() {
            for t in horizon.tick_range(false, true) {
                objective.term_not(&m, &any_agent_action(ag, t), t as i64);
            }
        }

        // Manhattan distance to the nearest dispenser per block type, over
        // the full dispenser list.
        let mut typed_dispenser_dists: HashMap<&str, BTreeMap<Position, i64>> = HashMap::new();
        for (_, _, winfo) in &workers {
            if winfo.phase != WorkerPhase::Gatherer {
                continue;
            }
            typed_dispenser_dists
                .entry(winfo.block_type.as_str())
                .or_insert_with(|| {
                    let typed: Vec<Position> = snapshot
                        .dispensers
                        .iter()
                        .filter(|d| d.block_type == winfo.block_type)
                        .map(|d| d.position)
                        .collect();
                    visitable
                        .iter()
                        .filter_map(|p| {
                            typed
                                .iter()
                                .map(|dp| dist(*p, *dp) as i64)
                                .min()
                                .map(|d| (*p, d))
                        })
                        .collect()
                });
        }

        // Congested neighbourhoods around constructors: route deliverers
        // around them.
        let congested: BTreeSet<Position> = {
            let mut candidates: BTreeSet<Position> = seen
                .iter()
                .filter(|(_, c)| **c != hive_grid::CellType::Empty)
                .map(|(p, _)| *p)
                .collect();
            for (ag, placed) in agents.iter().enumerate() {
                candidates.insert(placed.position);
                candidates.extend(agents[ag].info.attached_positions(placed.position));
            }
            let mut out = BTreeSet::new();
            for info in &con_infos {
                let nearby: BTreeSet<Position> = reach::ball(info.pos, PROBLEM_DISTANCE, bounds)
                    .into_iter()
                    .filter(|p| candidates.contains(p))
                    .collect();
                if nearby.len() >= PROBLEM_CANDIDATE_LIMIT {
                    out.extend(nearby);
                }
            }
            out
        };

        // Per (constructor, block type): congestion-weighted walking
        // distance from every cell a matching deliverer can reach to the
        // nearest appropriate required cell. Unfilled cells are preferred
        // targets; a relaxed graph that ignores obstacles is the fallback
        // when the strict graph is disconnected.
        let unreachable_cost = seen.len() as i64 * CONGESTED_STEP as i64;
        let mut con_distances: HashMap<(usize, String), BTreeMap<Position, i64>> = HashMap::new();
        for ag in &deliverers {
            let Some(winfo) = agents[*ag].info.as_worker() else { continue };
            let con_key = (winfo.constructor_idx, winfo.block_type.clone());
            if con_distances.contains_key(&con_key) {
                continue;
            }
            let info = &con_infos[winfo.constructor_idx];

            let mut sources: BTreeSet<Position> = BTreeSet::new();
            for other in &deliverers {
                let Some(other_info) = agents[*other].info.as_worker() else { continue };
                if other_info.constructor_idx != winfo.constructor_idx
                    || other_info.block_type != winfo.block_type
                {
                    continue;
                }
                sources.extend(
                    reach::ball(
                        agents[*other].position,
                        horizon.full_span(steps[*other]) as i32,
                        bounds,
                    )
                    .into_iter()
                    .filter(|p| visitable.contains(p)),
                );
            }

            let typed_cells: Vec<(&Position, &bool)> = info
                .cells
                .iter()
                .filter(|(_, (ct, _))| ct == &winfo.block_type)
                .map(|(p, (_, filled))| (p, filled))
                .collect();
            let unfilled: BTreeSet<Position> = typed_cells
                .iter()
                .filter(|(_, filled)| !**filled)
                .map(|(p, _)| **p)
                .collect();
            let targets: BTreeSet<Position> = if unfilled.is_empty() {
                typed_cells.iter().map(|(p, _)| **p).collect()
            } else {
                unfilled
            };

            let strict = distances_to_targets(&visitable, &targets, &congested, bounds);
            let complete = sources.iter().all(|p| strict.contains_key(p));
            let field = if complete {
                strict
            } else {
                let relaxed_vertices: BTreeSet<Position> = seen
                    .keys()
                    .filter(|p| {
                        !con_footprints.contains(*p)
                            && !dis_footprints.contains(*p)
                            && !all_con_cells.contains(*p)
                    })
                    .copied()
                    .collect();
                distances_to_targets(&relaxed_vertices, &targets, &congested, bounds)
            };
            let dists: BTreeMap<Position, i64> = sources
                .iter()
                .map(|p| {
                    (
                        *p,
                        field.get(p).map(|d| *d as i64).unwrap_or(unreachable_cost),
                    )
                })
                .collect();
            con_distances.insert(con_key, dists);
        }

        let mut weight_gather_tier = 0i64;
        let mut weight_deliver_tier = 0i64;
        let mut weight_dig_tier = 0i64;

        for (ag, _, winfo) in &workers {
            let step = steps[*ag] as i64;
            let full_span_ex = ticks * step;
            let weight_move_and_action = full_span_ex * (full_span_ex + 1) / 2 + weight_move;
            let worker_factor = ticks.pow(6);

            match winfo.phase {
                WorkerPhase::Gatherer => {
                    // Distance to an appropriate dispenser dominates the
                    // lateness costs.
                    let factor_dist = weight_move_and_action * worker_factor;
                    let mut sum_dist = 0i64;
                    for at in horizon.sub_ticks(steps[*ag], false, false) {
                        let mut sub_max = 0i64;
                        for pos in &visitable {
                            let key = CellAgentSubTick::new(*pos, *ag, at);
                            let Some(on) = agent_on.get(&key) else { continue };
                            let d = match winfo.dispenser_idx {
                                Some(idx) => snapshot
                                    .dispensers
                                    .get(idx)
                                    .map(|dis| dist(*pos, dis.position) as i64)
                                    .unwrap_or(0),
                                None => typed_dispenser_dists
                                    .get(winfo.block_type.as_str())
                                    .and_then(|dd| dd.get(pos))
                                    .copied()
                                    .unwrap_or(0),
                            };
                            let weight = factor_dist * d;
                            sub_max = sub_max.max(weight);
                            objective.term(&m, on, -weight);
                        }
                        sum_dist += sub_max;
                    }
                    let weight_dist = sum_dist.max(factor_dist);

                    // Requests and attached blocks outrank distance; full
                    // loads outrank both.
                    let weight_full = weight_dist
                        * ticks
                        * (available_dispensers.len() as i64 + Direction::ALL.len() as i64);
                    for t in horizon.tick_range(false, false) {
                        for (key, var) in &request {
                            if key.agent == *ag && key.tick == t {
                                objective.term(&m, var, weight_dist);
                            }
                        }
                        for d in Direction::ALL {
                            if let Some(side) = attached_dir.get(&AgentDirTick::new(*ag, d, t)) {
                                objective.term(&m, side, weight_dist);
                            }
                        }
                        if let Some(full) = fully_loaded.get(&AgentTick::new(*ag, t)) {
                            objective.term(&m, full, weight_full);
                        }
                    }
                    weight_gather_tier +=
                        weight_dist * ticks * Direction::ALL.len() as i64 * 2 * ticks;
                }

                WorkerPhase::Deliverer => {
                    if winfo.constructor_idx >= con_infos.len() {
                        continue;
                    }
                    let factor_dist = weight_move_and_action * worker_factor;
                    let empty = BTreeMap::new();
                    let con_dists = con_distances
                        .get(&(winfo.constructor_idx, winfo.block_type.clone()))
                        .unwrap_or(&empty);
                    let mut sum_dist = 0i64;
                    for at in horizon.sub_ticks(steps[*ag], false, false) {
                        let mut sub_max = 0i64;
                        for (pos, d) in con_dists {
                            let weight = factor_dist * (d - 1).max(0);
                            sub_max = sub_max.max(weight);
                            let key = CellAgentSubTick::new(*pos, *ag, at);
                            let Some(on) = agent_on.get(&key) else { continue };
                            objective.term(&m, on, -weight);
                        }
                        sum_dist += sub_max;
                    }
                    let weight_dist = sum_dist.max(factor_dist);

                    // Free sides beat distance; an empty rack beats free
                    // sides; completed hand-offs beat everything below.
                    for t in horizon.tick_range(false, false) {
                        for d in Direction::ALL {
                            if let Some(side) = attached_dir.get(&AgentDirTick::new(*ag, d, t)) {
                                objective.term_not(&m, side, weight_dist);
                            }
                        }
                    }
                    let weight_sides = weight_dist * ticks * Direction::ALL.len() as i64;

                    for t in horizon.tick_range(false, false) {
                        if let Some(loaded) = any_loaded.get(&AgentTick::new(*ag, t)) {
                            objective.term_not(&m, loaded, weight_sides);
                        }
                    }
                    let weight_unloaded = weight_sides * ticks;

                    for t in horizon.tick_range(false, true) {
                        for d in Direction::ALL {
                            let key = AgentDirTick::new(*ag, d, t);
                            if let Some(v) = join.get(&key) {
                                objective.term(&m, v, weight_unloaded);
                            }
                            if let Some(v) = detach.get(&key) {
                                objective.term(&m, v, weight_unloaded);
                            }
                        }
                    }
                    weight_deliver_tier +=
                        weight_unloaded * (ticks - 1) * Direction::ALL.len() as i64 * 3;
                }
            }
        }

        // Diggers: clears inside the flock dominate approaching its
        // obstacles, which dominates opportunistic clears elsewhere.
        for (ag, placed) in agents.iter().enumerate() {
            let Some(dinfo) = placed.info.as_digger() else { continue };
            let flock = &dinfo.flock;
            let obstacle_flock: Vec<Position> = flock
                .iter()
                .filter(|p| obstacles.contains(*p))
                .copied()
                .collect();
            let step = steps[ag] as i64;
            let full_span_ex = ticks * step;
            let weight_move_and_action = full_span_ex * (full_span_ex + 1) / 2 + weight_move;

            for t in horizon.tick_range(false, true) {
                if let Some(cells) = move_clear_cells_agent.get(&t).and_then(|per| per.get(&ag)) {
                    for pos in cells {
                        if flock.contains(pos) {
                            continue;
                        }
                        if let Some(c) = move_clear.get(&CellAgentTick::new(*pos, ag, t)) {
                            objective.term(&m, c, weight_move_and_action);
                        }
                    }
                }
            }
            let weight_outside = weight_move_and_action * (ticks - 1);

            let mut sum_approach = 0i64;
            for at in horizon.sub_ticks(steps[ag], false, false) {
                let mut sub_max = 0i64;
                for pos in &visitable {
                    let nearest = obstacle_flock.iter().map(|o| dist(*pos, *o)).min();
                    let Some(nearest) = nearest else { continue };
                    let weight = weight_outside
                        * at.tick as i64
                        * (nearest as i64 - dinfo.clear_radius as i64).max(0);
                    if weight == 0 {
                        continue;
                    }
                    sub_max = sub_max.max(weight);
                    let Some(on) = agent_on.get(&CellAgentSubTick::new(*pos, ag, at)) else {
                        continue;
                    };
                    objective.term(&m, on, -weight);
                }
                sum_approach += sub_max;
            }
            let weight_approach = sum_approach.max(weight_move_and_action);

            for t in horizon.tick_range(false, true) {
                if let Some(cells) = move_clear_cells_agent.get(&t).and_then(|per| per.get(&ag)) {
                    for pos in cells {
                        if !flock.contains(pos) {
                            continue;
                        }
                        if let Some(c) = move_clear.get(&CellAgentTick::new(*pos, ag, t)) {
                            objective.term(&m, c, weight_approach);
                        }
                    }
                }
            }
            weight_dig_tier += weight_approach * (ticks - 1);
        }

        // Constructors: clears are worth a token amount; submissions
        // dominate every mobile tier combined.
        for var in con_clear_any.values() {
            objective.term(&m, var, 1);
        }
        let weight_submit =
            ((weight_gather_tier + weight_deliver_tier + weight_dig_tier) * (ticks - 1)).max(1);
        for var in submit.values() {
            objective.term(&m, var, weight_submit);
        }

        Ok(Self {
            m,
            agents,
            steps,
            con_infos,
            available_dispensers,
            bounds,
            obstacles,
            objective: Some(objective),
            agent_on,
            on_cells,
            constructor_block_on,
            move_clear,
            con_clear,
            con_clear_cells,
            request,
            attach,
            join,
            detach,
            rotate,
            submit,
        })
    }

    /// Run the solver once under the environment's budget.
    pub fn solve(mut self) -> TaskSolution<'ctx> {
        let objective = self.objective.take().unwrap_or_default();
        let solution = self.m.solve(objective);
        TaskSolution {
            problem: self,
            solution,
        }
    }
}

/// A solved tasking model, decodable into one action per mobile agent and
/// per constructor.
pub struct TaskSolution<'ctx> {
    problem: TaskProblem<'ctx>,
    solution: Solution<'ctx>,
}

impl<'ctx> TaskSolution<'ctx> {
    pub fn status(&self) -> SolveStatus {
        self.solution.status
    }

    /// Decode the first coarse tick. Priority per agent: clear, then move,
    /// then rotate, then the role action (request/attach for gatherers,
    /// join/detach for deliverers); constructors decode submit, clear, then
    /// the attach/connect half of a hand-off.
    pub fn actions(&self) -> Result<TaskActions, DecodeError> {
        if !self.status().has_plan() {
            return Err(DecodeError::NoBindings);
        }
        let p = &self.problem;
        let bounds = p.bounds;
        let truthy = |var: &Bool<'ctx>| self.solution.bool_value(var) == Some(true);

        // Hand-offs are decoded from the worker side; these carry the
        // constructor half over.
        let mut con_attach: BTreeMap<usize, Position> = BTreeMap::new();
        let mut con_connect: BTreeMap<usize, (Position, usize, Position)> = BTreeMap::new();

        let mut mobile = Vec::with_capacity(p.agents.len());
        'agents: for (ag, placed) in p.agents.iter().enumerate() {
            let init = placed.position;

            for pos in &p.obstacles {
                if let Some(c) = p.move_clear.get(&CellAgentTick::new(*pos, ag, 1)) {
                    if truthy(c) {
                        mobile.push(AgentAction::Clear {
                            offset: sub_closest(*pos, init, bounds),
                        });
                        continue 'agents;
                    }
                }
            }

            let step = p.steps[ag];
            let mut prev = init;
            let mut offsets = Vec::new();
            for s in 1..=step {
                let next = AgentSubTick::new(ag, SubTick::new(1, s).next(step));
                let here = p.on_cells.get(&next).and_then(|cells| {
                    cells
                        .iter()
                        .find(|pos| p.agent_on.get(&next.pos(**pos)).is_some_and(&truthy))
                });
                let Some(&here) = here else {
                    return Err(DecodeError::MissingBinding {
                        agent: ag,
                        family: "agent_on",
                    });
                };
                offsets.push(sub_closest(here, prev, bounds));
                prev = here;
            }
            if offsets.first().is_some_and(|o| !o.is_zero()) {
                offsets.truncate(
                    offsets
                        .iter()
                        .position(|o| o.is_zero())
                        .unwrap_or(offsets.len()),
                );
                mobile.push(AgentAction::Move { offsets });
                continue 'agents;
            }

            let Some(winfo) = placed.info.as_worker() else {
                mobile.push(AgentAction::Skip);
                continue 'agents;
            };

            for r in Rotation::ALL {
                if let Some(var) = p.rotate.get(&AgentRotTick::new(ag, r, 1)) {
                    if truthy(var) {
                        mobile.push(AgentAction::Rotate { rotation: r });
                        continue 'agents;
                    }
                }
            }

            match winfo.phase {
                WorkerPhase::Gatherer => {
                    let mut requested: Vec<Position> = p
                        .request
                        .keys()
                        .filter(|k| k.agent == ag && k.tick == 1)
                        .map(|k| k.pos)
                        .collect();
                    requested.sort();
                    for pos in requested {
                        if truthy(&p.request[&CellAgentTick::new(pos, ag, 1)]) {
                            mobile.push(AgentAction::Request {
                                offset: sub_closest(pos, init, bounds),
                            });
                            continue 'agents;
                        }
                    }
                    for d in Direction::ALL {
                        if let Some(var) = p.attach.get(&AgentDirTick::new(ag, d, 1)) {
                            if truthy(var) {
                                mobile.push(AgentAction::Attach { offset: d.offset() });
                                continue 'agents;
                            }
                        }
                    }
                    mobile.push(AgentAction::Skip);
                }
                WorkerPhase::Deliverer => {
                    for d in Direction::ALL {
                        let key = AgentDirTick::new(ag, d, 1);
                        if !p.join.get(&key).is_some_and(&truthy) {
                            continue;
                        }
                        let con = winfo.constructor_idx;
                        let con_pos = p.con_infos[con].pos;
                        let block_pos = (init + d.offset()).into_bounds(bounds);
                        if distance_bounded(con_pos, block_pos, bounds) == 1 {
                            // The worker holds still; the constructor pulls
                            // the block over.
                            con_attach.insert(con, sub_closest(block_pos, con_pos, bounds));
                            mobile.push(AgentAction::Skip);
                        } else {
                            let held = reach::ring(block_pos, 1, bounds).into_iter().find(|n| {
                                p.constructor_block_on
                                    .get(&CellConstructorTick::new(*n, con, 1))
                                    .is_some_and(&truthy)
                            });
                            let Some(held) = held else {
                                return Err(DecodeError::MissingBinding {
                                    agent: ag,
                                    family: "constructor_block_on",
                                });
                            };
                            con_connect.insert(
                                con,
                                (
                                    sub_closest(held, con_pos, bounds),
                                    ag,
                                    sub_closest(block_pos, con_pos, bounds),
                                ),
                            );
                            mobile.push(AgentAction::Connect {
                                partner: con,
                                offset: d.offset(),
                                attached: None,
                            });
                        }
                        continue 'agents;
                    }
                    for d in Direction::ALL {
                        if p.detach.get(&AgentDirTick::new(ag, d, 1)).is_some_and(&truthy) {
                            mobile.push(AgentAction::Detach { offset: d.offset() });
                            continue 'agents;
                        }
                    }
                    mobile.push(AgentAction::Skip);
                }
            }
        }

        let mut constructors = Vec::with_capacity(p.con_infos.len());
        'cons: for (con, info) in p.con_infos.iter().enumerate() {
            if truthy(&p.submit[&ConstructorTick::new(con, 1)]) {
                constructors.push(AgentAction::Submit);
                continue 'cons;
            }
            for pos in &p.con_clear_cells[con] {
                if let Some(c) = p.con_clear.get(&CellConstructorTick::new(*pos, con, 1)) {
                    if truthy(c) {
                        constructors.push(AgentAction::Clear {
                            offset: sub_closest(*pos, info.pos, bounds),
                        });
                        continue 'cons;
                    }
                }
            }
            if let Some(offset) = con_attach.get(&con) {
                constructors.push(AgentAction::Attach { offset: *offset });
                continue 'cons;
            }
            if let Some((offset, worker, attached)) = con_connect.get(&con) {
                constructors.push(AgentAction::Connect {
                    partner: *worker,
                    offset: *offset,
                    attached: Some(*attached),
                });
                continue 'cons;
            }
            constructors.push(AgentAction::Skip);
        }

        debug_assert_eq!(mobile.len(), p.agents.len());
        debug_assert_eq!(constructors.len(), p.con_infos.len());
        Ok(TaskActions {
            mobile,
            constructors,
        })
    }

    /// Direct readback of a dispenser request binding at tick 1; used by
    /// exclusivity tests.
    pub fn request_decoded(&self, dispenser_pos: Position, agent: usize) -> bool {
        self.problem
            .request
            .get(&CellAgentTick::new(dispenser_pos, agent, 1))
            .is_some_and(|v| self.solution.bool_value(v) == Some(true))
    }
}
