use std::collections::BTreeSet;

use hive_grid::{
    Direction, MobileAgent, Position, Rotation, SpeedProfile, WorkerInfo, WorkerPhase,
};

#[test]
fn rotations_are_cyclic_and_inverse() {
    for dir in Direction::ALL {
        assert_eq!(
            dir.rotate(Rotation::Clockwise).rotate(Rotation::Anticlockwise),
            dir
        );
        let mut full = dir;
        for _ in 0..4 {
            full = full.rotate(Rotation::Clockwise);
        }
        assert_eq!(full, dir);
    }
}

#[test]
fn direction_offsets_round_trip() {
    for dir in Direction::ALL {
        assert_eq!(Direction::from_offset(dir.offset()), Some(dir));
    }
    assert_eq!(Direction::from_offset(Position::new(1, 1)), None);
    assert_eq!(Direction::from_offset(Position::ZERO), None);
}

#[test]
fn speed_profile_clamps_to_last_entry() {
    let profile = SpeedProfile(vec![2, 1, 1]);
    assert_eq!(profile.for_load(0), 2);
    assert_eq!(profile.for_load(1), 1);
    assert_eq!(profile.for_load(7), 1);
}

#[test]
fn laden_worker_slows_down() {
    let worker = WorkerInfo {
        phase: WorkerPhase::Deliverer,
        vision: 5,
        speed: SpeedProfile(vec![2, 1]),
        clear_radius: 1,
        clear_prob: 0.3,
        max_attached: 2,
        block_type: "b1".to_owned(),
        constructor_idx: 0,
        attached_sides: BTreeSet::from([Direction::East]),
        dispenser_idx: None,
    };
    assert_eq!(worker.step_dist(), 1);

    let agent = MobileAgent::Worker(worker);
    let occupied = agent.attached_positions(Position::new(3, 3));
    assert!(occupied.contains(&Position::new(4, 3)));
    assert_eq!(occupied.len(), 1);
}
