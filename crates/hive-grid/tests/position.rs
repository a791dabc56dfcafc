use hive_grid::{distance_bounded, sub_closest, Bounds, Position};

#[test]
fn neighbours_at_most_is_the_manhattan_ball() {
    let origin = Position::new(0, 0);
    let ball: Vec<Position> = origin.neighbours_at_most(2).collect();

    // 1 + 4 + 8 cells for radius 2, origin included.
    assert_eq!(ball.len(), 13);
    assert!(ball.iter().all(|p| p.norm() <= 2));
    assert!(ball.contains(&origin));
}

#[test]
fn neighbours_exactly_is_the_ring() {
    let ring: Vec<Position> = Position::new(3, -1).neighbours_exactly(2).collect();
    assert_eq!(ring.len(), 8);
    assert!(ring
        .iter()
        .all(|p| (*p - Position::new(3, -1)).norm() == 2));
}

#[test]
fn distance_wraps_around_known_bounds() {
    let bounds = Bounds::new(Some(10), Some(6));
    assert_eq!(
        distance_bounded(Position::new(0, 0), Position::new(9, 0), bounds),
        1
    );
    assert_eq!(
        distance_bounded(Position::new(0, 0), Position::new(0, 5), bounds),
        1
    );
    assert_eq!(
        distance_bounded(Position::new(2, 2), Position::new(5, 2), bounds),
        3
    );
}

#[test]
fn distance_is_flat_when_bounds_unknown() {
    assert_eq!(
        distance_bounded(Position::new(0, 0), Position::new(9, 0), Bounds::UNKNOWN),
        9
    );
}

#[test]
fn sub_closest_walks_the_short_way() {
    let bounds = Bounds::new(Some(10), Some(10));
    // From (9, 0) to (0, 0) the short way is one step east.
    assert_eq!(
        sub_closest(Position::new(0, 0), Position::new(9, 0), bounds),
        Position::new(1, 0)
    );
    assert_eq!(
        sub_closest(Position::new(9, 0), Position::new(0, 0), bounds),
        Position::new(-1, 0)
    );
}

#[test]
fn into_bounds_normalizes_negative_coordinates() {
    let bounds = Bounds::new(Some(10), None);
    assert_eq!(
        Position::new(-1, -7).into_bounds(bounds),
        Position::new(9, -7)
    );
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn into_bounds_is_idempotent(
            x in -50i32..50,
            y in -50i32..50,
            w in 1u32..40,
            h in 1u32..40,
        ) {
            let bounds = Bounds::new(Some(w), Some(h));
            let once = Position::new(x, y).into_bounds(bounds);
            prop_assert_eq!(once.into_bounds(bounds), once);
            prop_assert!(once.x >= 0 && once.x < w as i32);
            prop_assert!(once.y >= 0 && once.y < h as i32);
        }

        #[test]
        fn bounded_distance_is_symmetric(
            ax in -50i32..50, ay in -50i32..50,
            bx in -50i32..50, by in -50i32..50,
            w in 1u32..40, h in 1u32..40,
        ) {
            let bounds = Bounds::new(Some(w), Some(h));
            let a = Position::new(ax, ay);
            let b = Position::new(bx, by);
            prop_assert_eq!(
                distance_bounded(a, b, bounds),
                distance_bounded(b, a, bounds)
            );
        }

        #[test]
        fn sub_closest_matches_bounded_distance(
            ax in 0i32..40, ay in 0i32..40,
            bx in 0i32..40, by in 0i32..40,
            w in 1u32..40, h in 1u32..40,
        ) {
            let bounds = Bounds::new(Some(w), Some(h));
            let a = Position::new(ax, ay).into_bounds(bounds);
            let b = Position::new(bx, by).into_bounds(bounds);
            prop_assert_eq!(
                sub_closest(a, b, bounds).norm(),
                distance_bounded(a, b, bounds)
            );
        }
    }
}
