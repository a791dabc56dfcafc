use core::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Known map dimensions. An axis is `None` until the wraparound extent has
/// been established externally; coordinates on such an axis do not wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Bounds {
    /// Both axes unknown: a flat, non-wrapping plane.
    pub const UNKNOWN: Bounds = Bounds {
        width: None,
        height: None,
    };

    pub fn new(width: Option<u32>, height: Option<u32>) -> Self {
        Self { width, height }
    }
}

/// A grid coordinate. All distances are Manhattan.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const ZERO: Position = Position { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }

    pub fn norm(self) -> i32 {
        self.x.abs() + self.y.abs()
    }

    /// All positions within Manhattan distance `max_distance` (inclusive),
    /// the position itself included.
    pub fn neighbours_at_most(self, max_distance: i32) -> impl Iterator<Item = Position> {
        (-max_distance..=max_distance).flat_map(move |dy| {
            let span = max_distance - dy.abs();
            (-span..=span).map(move |dx| self + Position::new(dx, dy))
        })
    }

    /// All positions strictly within Manhattan distance `distance`.
    pub fn neighbours_less(self, distance: i32) -> impl Iterator<Item = Position> {
        self.neighbours_at_most(distance - 1)
    }

    /// All positions at exactly Manhattan distance `distance`.
    pub fn neighbours_exactly(self, distance: i32) -> impl Iterator<Item = Position> {
        (-distance..=distance).flat_map(move |dy| {
            let span = distance - dy.abs();
            let xs: [Option<i32>; 2] = if span == 0 {
                [Some(0), None]
            } else {
                [Some(-span), Some(span)]
            };
            xs.into_iter()
                .flatten()
                .map(move |dx| self + Position::new(dx, dy))
        })
    }

    /// The wrapped copy of `other` nearest to `self` under `bounds`.
    pub fn closest_variant_of(self, other: Position, bounds: Bounds) -> Position {
        let axis = |anchor: i32, value: i32, dim: Option<u32>| -> i32 {
            match dim {
                Some(dim) => {
                    let dim = dim as i32;
                    [value - dim, value, value + dim]
                        .into_iter()
                        .min_by_key(|v| (anchor - v).abs())
                        .unwrap_or(value)
                }
                None => value,
            }
        };
        Position::new(
            axis(self.x, other.x, bounds.width),
            axis(self.y, other.y, bounds.height),
        )
    }

    /// Normalize into the canonical `[0, width) x [0, height)` window on the
    /// axes whose extent is known.
    pub fn into_bounds(self, bounds: Bounds) -> Position {
        let axis = |value: i32, dim: Option<u32>| -> i32 {
            match dim {
                Some(dim) => value.rem_euclid(dim as i32),
                None => value,
            }
        };
        Position::new(axis(self.x, bounds.width), axis(self.y, bounds.height))
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Position {
    type Output = Position;

    fn neg(self) -> Position {
        Position::new(-self.x, -self.y)
    }
}

/// The smallest Manhattan distance between two positions under `bounds`.
pub fn distance_bounded(a: Position, b: Position, bounds: Bounds) -> i32 {
    let axis = |v1: i32, v2: i32, dim: Option<u32>| -> i32 {
        match dim {
            Some(dim) => {
                let dim = dim as i32;
                (v1 - v2)
                    .abs()
                    .min((v1 + dim - v2).abs())
                    .min((v1 - dim - v2).abs())
            }
            None => (v1 - v2).abs(),
        }
    };
    axis(a.x, b.x, bounds.width) + axis(a.y, b.y, bounds.height)
}

/// The smallest-magnitude difference `a - b` under `bounds`: the offset from
/// `b` to `a` walking the short way around.
pub fn sub_closest(a: Position, b: Position, bounds: Bounds) -> Position {
    a - a.closest_variant_of(b, bounds)
}
