use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use hive_grid::{
    AgentAction, Bounds, CellType, Constructor, Dispenser, ExploreSnapshot, ExplorerInfo,
    MobileAgent, Placed, Position, RequiredCell, SpeedProfile, TaskSnapshot, WorkerInfo,
    WorkerPhase,
};
use hive_plan::{
    plan_group, plan_tick, ExploreProblem, GroupActions, GroupSnapshot, Horizon, PlanConfig,
    TaskProblem,
};
use hive_z3::{CpEnv, SolveStatus};

fn pos(x: i32, y: i32) -> Position {
    Position::new(x, y)
}

fn explorer(vision: i32, speed: u32) -> ExplorerInfo {
    ExplorerInfo {
        vision,
        speed,
        clear_radius: 1,
        clear_prob: 0.3,
    }
}

fn worker(phase: WorkerPhase, block_type: &str) -> WorkerInfo {
    WorkerInfo {
        phase,
        vision: 5,
        speed: SpeedProfile::uniform(1),
        clear_radius: 1,
        clear_prob: 0.3,
        max_attached: 2,
        block_type: block_type.to_owned(),
        constructor_idx: 0,
        attached_sides: BTreeSet::new(),
        dispenser_idx: None,
    }
}

fn digger_at(position: Position) -> Placed<MobileAgent> {
    Placed::new(
        position,
        MobileAgent::Digger(hive_grid::DiggerInfo {
            vision: 5,
            speed: 1,
            clear_radius: 1,
            clear_prob: 0.3,
            flock: BTreeSet::new(),
        }),
    )
}

fn empty_task_snapshot(cells: BTreeMap<Position, CellType>) -> TaskSnapshot {
    TaskSnapshot {
        cells,
        agents: vec![],
        constructors: vec![],
        dispensers: vec![],
        markers: BTreeSet::new(),
        bounds: Bounds::UNKNOWN,
    }
}

/// A corridor open only to the east: agents see a 6x5 band whose west
/// column is permanently blocked, so the only unseen frontier reachable
/// within the horizon lies beyond x = 2.
fn eastward_snapshot() -> ExploreSnapshot {
    let mut cells = BTreeMap::new();
    for x in -3..=2 {
        for y in 0..5 {
            let cell = if x == -3 {
                CellType::FixedObstacle
            } else {
                CellType::Empty
            };
            cells.insert(pos(x, y), cell);
        }
    }
    ExploreSnapshot {
        cells,
        agents: vec![Placed::new(pos(0, 2), explorer(1, 1))],
        markers: BTreeSet::new(),
        bounds: Bounds::new(None, Some(5)),
    }
}

#[test]
fn exploration_moves_toward_the_only_frontier() {
    let env = CpEnv::new();
    let problem =
        ExploreProblem::build(&env, &eastward_snapshot(), Horizon::new(3), 10, None).unwrap();
    let solution = problem.solve();
    assert_eq!(solution.status(), SolveStatus::Optimal);

    let actions = solution.agent_actions().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(
        actions[0],
        AgentAction::Move {
            offsets: vec![pos(1, 0)]
        }
    );
}

#[test]
fn fast_agents_spend_their_whole_movement_budget_in_cardinal_steps() {
    let mut cells = BTreeMap::new();
    cells.insert(pos(-1, 0), CellType::FixedObstacle);
    for x in 0..=4 {
        cells.insert(pos(x, 0), CellType::Empty);
    }
    let snapshot = ExploreSnapshot {
        cells,
        agents: vec![Placed::new(pos(0, 0), explorer(1, 2))],
        markers: BTreeSet::new(),
        bounds: Bounds::new(None, Some(1)),
    };

    let env = CpEnv::new();
    let problem = ExploreProblem::build(&env, &snapshot, Horizon::new(3), 10, None).unwrap();
    let solution = problem.solve();
    assert_eq!(solution.status(), SolveStatus::Optimal);

    let actions = solution.agent_actions().unwrap();
    let AgentAction::Move { offsets } = &actions[0] else {
        panic!("expected a move, got {:?}", actions[0]);
    };
    assert!(offsets.len() <= 2);
    assert!(offsets.iter().all(|o| o.norm() == 1));
    assert_eq!(offsets, &vec![pos(1, 0), pos(1, 0)]);
}

#[test]
fn obstacles_are_cleared_before_crossing() {
    // The only unseen cell hides behind a clearable obstacle; the plan must
    // open with a clear, not a move onto it.
    let mut cells = BTreeMap::new();
    cells.insert(pos(-1, 0), CellType::FixedObstacle);
    cells.insert(pos(0, 0), CellType::Empty);
    cells.insert(pos(1, 0), CellType::MutableObstacle);
    let snapshot = ExploreSnapshot {
        cells,
        agents: vec![Placed::new(
            pos(0, 0),
            ExplorerInfo {
                vision: 1,
                speed: 1,
                clear_radius: 1,
                clear_prob: 1.0,
            },
        )],
        markers: BTreeSet::new(),
        bounds: Bounds::new(None, Some(1)),
    };

    let env = CpEnv::new();
    let problem = ExploreProblem::build(&env, &snapshot, Horizon::new(3), 10, None).unwrap();
    let solution = problem.solve();
    assert_eq!(solution.status(), SolveStatus::Optimal);

    let actions = solution.agent_actions().unwrap();
    assert_eq!(actions[0], AgentAction::Clear { offset: pos(1, 0) });
}

#[test]
fn priority_region_outweighs_a_plain_frontier() {
    // Frontiers on both sides at equal distance; the priority region tips
    // the balance west.
    let mut cells = BTreeMap::new();
    for x in -2..=2 {
        cells.insert(pos(x, 0), CellType::Empty);
    }
    let snapshot = ExploreSnapshot {
        cells,
        agents: vec![Placed::new(pos(0, 0), explorer(1, 1))],
        markers: BTreeSet::new(),
        bounds: Bounds::new(None, Some(1)),
    };
    let priority: BTreeSet<Position> = [pos(-3, 0)].into();

    let env = CpEnv::new();
    let problem =
        ExploreProblem::build(&env, &snapshot, Horizon::new(3), 10, Some(&priority)).unwrap();
    let solution = problem.solve();
    assert_eq!(solution.status(), SolveStatus::Optimal);

    let actions = solution.agent_actions().unwrap();
    assert_eq!(
        actions[0],
        AgentAction::Move {
            offsets: vec![pos(-1, 0)]
        }
    );
}

#[test]
fn adjacent_gatherer_requests_instead_of_moving() {
    let mut cells = BTreeMap::new();
    cells.insert(pos(0, 0), CellType::Empty);
    cells.insert(pos(1, 0), CellType::Empty);
    let snapshot = TaskSnapshot {
        cells,
        agents: vec![Placed::new(
            pos(0, 0),
            MobileAgent::Worker(worker(WorkerPhase::Gatherer, "b1")),
        )],
        constructors: vec![],
        dispensers: vec![Dispenser {
            position: pos(1, 0),
            block_type: "b1".to_owned(),
            occupied: false,
        }],
        markers: BTreeSet::new(),
        bounds: Bounds::UNKNOWN,
    };

    let env = CpEnv::new();
    let problem = TaskProblem::build(&env, &snapshot, Horizon::new(2), 10).unwrap();
    let solution = problem.solve();
    assert_eq!(solution.status(), SolveStatus::Optimal);

    let actions = solution.actions().unwrap();
    assert_eq!(actions.mobile.len(), 1);
    assert_eq!(actions.mobile[0], AgentAction::Request { offset: pos(1, 0) });
}

#[test]
fn complete_constructor_submits() {
    let mut cells = BTreeMap::new();
    cells.insert(pos(0, 0), CellType::Empty);
    cells.insert(pos(0, 1), CellType::Empty);
    let snapshot = TaskSnapshot {
        constructors: vec![Constructor {
            position: pos(0, 0),
            clear_radius: 1,
            clear_prob: 0.3,
            cells: vec![RequiredCell {
                position: pos(0, 1),
                block_type: "b1".to_owned(),
                filled: true,
            }],
        }],
        ..empty_task_snapshot(cells)
    };

    let env = CpEnv::new();
    let problem = TaskProblem::build(&env, &snapshot, Horizon::new(2), 10).unwrap();
    let solution = problem.solve();
    assert_eq!(solution.status(), SolveStatus::Optimal);

    let actions = solution.actions().unwrap();
    assert_eq!(actions.constructors, vec![AgentAction::Submit]);
}

#[test]
fn incomplete_constructor_never_submits() {
    let mut cells = BTreeMap::new();
    cells.insert(pos(0, 0), CellType::Empty);
    cells.insert(pos(0, 1), CellType::Empty);
    let snapshot = TaskSnapshot {
        constructors: vec![Constructor {
            position: pos(0, 0),
            clear_radius: 1,
            clear_prob: 0.3,
            cells: vec![RequiredCell {
                position: pos(0, 1),
                block_type: "b1".to_owned(),
                filled: false,
            }],
        }],
        ..empty_task_snapshot(cells)
    };

    let env = CpEnv::new();
    let problem = TaskProblem::build(&env, &snapshot, Horizon::new(2), 10).unwrap();
    let solution = problem.solve();
    assert_eq!(solution.status(), SolveStatus::Optimal);

    let actions = solution.actions().unwrap();
    assert_eq!(actions.constructors, vec![AgentAction::Skip]);
}

#[test]
fn one_block_dispenser_serves_at_most_one_request() {
    let mut cells = BTreeMap::new();
    cells.insert(pos(0, 0), CellType::Empty);
    cells.insert(pos(1, 0), CellType::Empty);
    cells.insert(pos(2, 0), CellType::Empty);
    let snapshot = TaskSnapshot {
        cells,
        agents: vec![
            Placed::new(pos(0, 0), MobileAgent::Worker(worker(WorkerPhase::Gatherer, "b1"))),
            Placed::new(pos(2, 0), MobileAgent::Worker(worker(WorkerPhase::Gatherer, "b1"))),
        ],
        constructors: vec![],
        dispensers: vec![Dispenser {
            position: pos(1, 0),
            block_type: "b1".to_owned(),
            occupied: false,
        }],
        markers: BTreeSet::new(),
        bounds: Bounds::UNKNOWN,
    };

    let env = CpEnv::new();
    let problem = TaskProblem::build(&env, &snapshot, Horizon::new(2), 10).unwrap();
    let solution = problem.solve();
    assert!(solution.status().has_plan());

    let requests = (0..2)
        .filter(|ag| solution.request_decoded(pos(1, 0), *ag))
        .count();
    assert!(requests <= 1);

    // Totality: one action per agent, no matter who won the dispenser.
    let actions = solution.actions().unwrap();
    assert_eq!(actions.mobile.len(), 2);
}

#[test]
fn colliding_starts_degrade_to_no_plan() {
    let mut cells = BTreeMap::new();
    cells.insert(pos(0, 0), CellType::Empty);
    cells.insert(pos(1, 0), CellType::Empty);
    let snapshot = TaskSnapshot {
        agents: vec![digger_at(pos(0, 0)), digger_at(pos(0, 0))],
        ..empty_task_snapshot(cells)
    };

    let outcome = plan_group(
        &GroupSnapshot::Task { snapshot },
        None,
        &PlanConfig::default().with_horizon(2),
    )
    .unwrap();
    assert!(!outcome.status.has_plan());
    assert!(outcome.actions.is_none());
}

#[test]
fn groups_plan_independently_within_one_tick() {
    // One healthy exploration group, one unsatisfiable tasking group: the
    // first still plans.
    let mut task_cells = BTreeMap::new();
    task_cells.insert(pos(0, 0), CellType::Empty);
    let broken = GroupSnapshot::Task {
        snapshot: TaskSnapshot {
            agents: vec![digger_at(pos(0, 0)), digger_at(pos(0, 0))],
            ..empty_task_snapshot(task_cells)
        },
    };
    let healthy = GroupSnapshot::Explore {
        snapshot: eastward_snapshot(),
        priority_region: None,
    };

    let outcomes = plan_tick(
        &[healthy, broken],
        Duration::from_secs(8),
        &PlanConfig::default(),
    );
    assert_eq!(outcomes.len(), 2);

    let first = outcomes[0].as_ref().unwrap();
    assert!(first.status.has_plan());
    match first.actions.as_ref().unwrap() {
        GroupActions::Explore(actions) => assert_eq!(actions.len(), 1),
        other => panic!("expected exploration actions, got {other:?}"),
    }

    let second = outcomes[1].as_ref().unwrap();
    assert!(!second.status.has_plan());
    assert!(second.actions.is_none());
}

#[test]
fn stranded_explorer_still_decodes_to_skip() {
    // Nothing to see, nowhere to go: the model yields a valid null plan and
    // the driver leaves the substitution to the caller's fallback policy.
    let mut cells = BTreeMap::new();
    cells.insert(pos(0, 0), CellType::Empty);
    for p in [pos(1, 0), pos(-1, 0), pos(0, 1), pos(0, -1)] {
        cells.insert(p, CellType::FixedObstacle);
    }
    let snapshot = ExploreSnapshot {
        cells,
        agents: vec![Placed::new(pos(0, 0), explorer(1, 1))],
        markers: BTreeSet::new(),
        bounds: Bounds::UNKNOWN,
    };

    let env = CpEnv::new();
    let problem = ExploreProblem::build(&env, &snapshot, Horizon::new(3), 10, None).unwrap();
    let solution = problem.solve();
    assert!(solution.status().has_plan());
    let actions = solution.agent_actions().unwrap();
    assert_eq!(actions, vec![AgentAction::Skip]);
}
