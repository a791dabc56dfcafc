use std::collections::{BTreeMap, BTreeSet};

use hive_grid::{
    Bounds, CellType, Dispenser, ExploreSnapshot, ExplorerInfo, Placed, Position, ProblemDump,
    TaskSnapshot,
};

#[test]
fn explore_dump_round_trips_through_json() {
    let mut cells = BTreeMap::new();
    cells.insert(Position::new(0, 0), CellType::Empty);
    cells.insert(Position::new(1, 0), CellType::MutableObstacle);
    let snapshot = ExploreSnapshot {
        cells,
        agents: vec![Placed::new(
            Position::new(0, 0),
            ExplorerInfo {
                vision: 2,
                speed: 1,
                clear_radius: 1,
                clear_prob: 0.3,
            },
        )],
        markers: BTreeSet::from([Position::new(1, 0)]),
        bounds: Bounds::new(Some(10), None),
    };

    let mut buffer = Vec::new();
    ProblemDump::from_explore(&snapshot)
        .write_json(&mut buffer)
        .unwrap();

    let parsed: ProblemDump = serde_json::from_slice(&buffer).unwrap();
    let ProblemDump::Exploring { cells, agents, markers, bounds } = parsed else {
        panic!("wrong dump variant");
    };
    assert_eq!(cells.len(), 2);
    assert_eq!(agents.len(), 1);
    assert_eq!(markers, vec![Position::new(1, 0)]);
    assert_eq!(bounds, snapshot.bounds);
}

#[test]
fn task_dump_keeps_resource_lists() {
    let mut cells = BTreeMap::new();
    cells.insert(Position::new(0, 0), CellType::Empty);
    let snapshot = TaskSnapshot {
        cells,
        agents: vec![],
        constructors: vec![],
        dispensers: vec![Dispenser {
            position: Position::new(0, 0),
            block_type: "b0".to_owned(),
            occupied: true,
        }],
        markers: BTreeSet::new(),
        bounds: Bounds::UNKNOWN,
    };

    let mut buffer = Vec::new();
    ProblemDump::from_task(&snapshot).write_json(&mut buffer).unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert!(text.contains("\"problem\":\"tasking\""));
    assert!(text.contains("\"b0\""));
}
