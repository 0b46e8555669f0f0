//! Stopping-distance kinematics.
//!
//! The autopilot flies every axis with the same rule: never move faster than a speed
//! from which the vehicle can still stop exactly at the target. These helpers are
//! pure functions of distance, deceleration and time so both the translational and
//! the rotational controllers share them.

use crate::collision::settings::DIST_EPS;

/// Highest speed at which a vehicle `distance` away can still stop at the target
/// when it can decelerate at `deceleration`.
///
/// `v = min(sqrt(2 * a * d), d / 2)`: the first term is the exact stopping speed, the
/// second keeps a reaction-time margin so the final approach takes at least two
/// seconds. Zero for non-positive inputs.
///
/// Non-decreasing in both `distance` and `deceleration`.
#[inline]
pub fn maximum_speed(distance: f32, deceleration: f32) -> f32 {
    if distance <= 0.0 || deceleration <= 0.0 || !distance.is_finite() {
        return 0.0;
    }
    let stop = (2.0 * deceleration * distance).sqrt();
    stop.min(distance * 0.5)
}

/// How far ahead to test for obstructions when moving at `speed`: the distance
/// covered in `horizon_seconds`, capped at `max_distance`.
#[inline]
pub fn look_ahead_distance(speed: f32, horizon_seconds: f32, max_distance: f32) -> f32 {
    (speed.max(0.0) * horizon_seconds.max(0.0)).min(max_distance.max(0.0))
}

/// Signed speed along one axis toward a target `displacement` away.
#[inline]
pub fn approach_speed(displacement: f32, deceleration: f32) -> f32 {
    if displacement.abs() <= DIST_EPS {
        return 0.0;
    }
    maximum_speed(displacement.abs(), deceleration).copysign(displacement)
}

/// Ratio of `value` to `capacity`, clamped to `[-1, 1]`; zero when there is no capacity.
#[inline]
pub fn ratio_of(value: f32, capacity: f32) -> f32 {
    if capacity <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / capacity).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn maximum_speed_is_monotone_in_distance() {
        for &decel in &[0.1_f32, 1.0, 9.81, 50.0] {
            let mut last = 0.0;
            let mut d = 0.01_f32;
            while d < 100_000.0 {
                let v = maximum_speed(d, decel);
                assert!(v >= last, "d={d} decel={decel} v={v} last={last}");
                last = v;
                d *= 1.3;
            }
        }
    }

    #[test]
    fn maximum_speed_never_increases_with_weaker_deceleration() {
        for &d in &[0.5_f32, 10.0, 250.0, 8000.0] {
            let mut last = f32::INFINITY;
            let mut decel = 100.0_f32;
            while decel > 0.001 {
                let v = maximum_speed(d, decel);
                assert!(v <= last);
                last = v;
                decel *= 0.7;
            }
        }
    }

    #[test]
    fn maximum_speed_uses_smaller_of_both_limits() {
        // Stopping limit: sqrt(2 * 1 * 1000) ~= 44.7 < 500.
        assert_relative_eq!(maximum_speed(1000.0, 1.0), 2000.0_f32.sqrt());
        // Reaction limit: 2 / 2 = 1 < sqrt(2 * 10 * 2) ~= 6.3.
        assert_relative_eq!(maximum_speed(2.0, 10.0), 1.0);
        assert_eq!(maximum_speed(0.0, 10.0), 0.0);
        assert_eq!(maximum_speed(10.0, 0.0), 0.0);
    }

    #[test]
    fn approach_speed_keeps_sign() {
        assert!(approach_speed(-100.0, 5.0) < 0.0);
        assert!(approach_speed(100.0, 5.0) > 0.0);
        assert_eq!(approach_speed(0.0, 5.0), 0.0);
    }

    #[test]
    fn look_ahead_is_capped() {
        assert_relative_eq!(look_ahead_distance(10.0, 5.0, 1000.0), 50.0);
        assert_relative_eq!(look_ahead_distance(1000.0, 5.0, 1000.0), 1000.0);
    }

    #[test]
    fn ratio_is_clamped() {
        assert_eq!(ratio_of(5.0, 2.0), 1.0);
        assert_eq!(ratio_of(-5.0, 2.0), -1.0);
        assert_eq!(ratio_of(1.0, 0.0), 0.0);
        assert_relative_eq!(ratio_of(1.0, 4.0), 0.25);
    }
}
