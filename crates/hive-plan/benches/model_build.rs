use std::collections::{BTreeMap, BTreeSet};

use criterion::{criterion_group, criterion_main, Criterion};
use hive_grid::{Bounds, CellType, ExploreSnapshot, ExplorerInfo, Placed, Position};
use hive_plan::{ExploreProblem, Horizon};
use hive_z3::CpEnv;

fn open_field(width: i32, height: i32, agents: usize) -> ExploreSnapshot {
    let mut cells = BTreeMap::new();
    for x in 0..width {
        for y in 0..height {
            let cell = if (x + 3 * y) % 11 == 0 {
                CellType::MutableObstacle
            } else {
                CellType::Empty
            };
            cells.insert(Position::new(x, y), cell);
        }
    }
    let agents = (0..agents)
        .map(|i| {
            Placed::new(
                Position::new(2 * i as i32 + 1, 1),
                ExplorerInfo {
                    vision: 3,
                    speed: 1,
                    clear_radius: 1,
                    clear_prob: 0.3,
                },
            )
        })
        .collect();
    ExploreSnapshot {
        cells,
        agents,
        markers: BTreeSet::new(),
        bounds: Bounds::new(Some(width as u32), Some(height as u32)),
    }
}

fn bench_explore_build(c: &mut Criterion) {
    let snapshot = open_field(12, 12, 3);
    c.bench_function("explore_model_build_12x12x3", |b| {
        b.iter(|| {
            let env = CpEnv::new();
            let problem =
                ExploreProblem::build(&env, &snapshot, Horizon::new(3), 10, None).unwrap();
            std::hint::black_box(&problem);
        })
    });
}

criterion_group!(benches, bench_explore_build);
criterion_main!(benches);
