//! The six principal directions of a vehicle's local frame.
//!
//! Thrusters, force maxima and damping decisions are all expressed per direction.
//! A `Direction` names the direction in which a force *pushes the vehicle*, so a
//! thruster whose nozzle points backward contributes to `Forward`.

use crate::collision::Vec3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Forward = 0,
    Backward = 1,
    Left = 2,
    Right = 3,
    Up = 4,
    Down = 5,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Forward,
        Direction::Backward,
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];

    /// Index into per-direction arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Local unit vector (+X right, +Y up, -Z forward).
    pub fn vector(self) -> Vec3 {
        match self {
            Direction::Forward => -Vec3::z(),
            Direction::Backward => Vec3::z(),
            Direction::Left => -Vec3::x(),
            Direction::Right => Vec3::x(),
            Direction::Up => Vec3::y(),
            Direction::Down => -Vec3::y(),
        }
    }

    pub const fn opposite(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Local axis index (0 = X, 1 = Y, 2 = Z) this direction lies on.
    pub const fn axis(self) -> usize {
        match self {
            Direction::Left | Direction::Right => 0,
            Direction::Up | Direction::Down => 1,
            Direction::Forward | Direction::Backward => 2,
        }
    }

    /// Direction along `axis` on the positive or negative side.
    pub const fn from_axis(axis: usize, positive: bool) -> Direction {
        match (axis, positive) {
            (0, true) => Direction::Right,
            (0, false) => Direction::Left,
            (1, true) => Direction::Up,
            (1, false) => Direction::Down,
            (_, true) => Direction::Backward,
            (_, false) => Direction::Forward,
        }
    }

    /// Direction along `axis` that `value` points toward (zero counts as positive).
    #[inline]
    pub fn from_component(axis: usize, value: f32) -> Direction {
        Direction::from_axis(axis, value >= 0.0)
    }

    /// Are `self` and `other` on different axes?
    #[inline]
    pub const fn is_perpendicular(self, other: Direction) -> bool {
        self.axis() != other.axis()
    }

    /// The direction whose vector is closest to `v`.
    pub fn closest(v: &Vec3) -> Direction {
        let abs = v.abs();
        let axis = if abs.x >= abs.y && abs.x >= abs.z {
            0
        } else if abs.y >= abs.z {
            1
        } else {
            2
        };
        Direction::from_component(axis, v[axis])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_and_sign_round_trip_through_vector() {
        for dir in Direction::ALL {
            let v = dir.vector();
            assert_eq!(Direction::from_component(dir.axis(), v[dir.axis()]), dir);
            assert_eq!(Direction::closest(&v), dir);
            assert_eq!(dir.opposite().vector(), -v);
            assert!(!dir.is_perpendicular(dir.opposite()));
        }
    }

    #[test]
    fn forward_is_negative_z() {
        assert_eq!(Direction::Forward.vector(), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(Direction::from_component(2, -3.0), Direction::Forward);
    }
}
