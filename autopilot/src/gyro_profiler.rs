//! Rotational capability of a vehicle.
//!
//! The torque available from gyroscopes is easy to sum; how much angular
//! acceleration that torque produces depends on the inertia tensor, which the host
//! does not expose. The profiler starts from a conservative estimate (all mass at
//! the bounding radius) and learns upward from observed responses to its own
//! commands. It only ever raises the estimate: underestimating acceleration makes
//! rotations slow, overestimating it makes them overshoot.

use shared::{Vec3, ticks_to_seconds};

use crate::vehicle::{GyroInfo, VehicleSnapshot};

/// Commands smaller than this on an axis are not used for learning.
const MIN_LEARNING_RATIO: f32 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq)]
struct GyroCommand {
    tick: u64,
    /// Commanded torque ratio per local axis.
    ratio: Vec3,
    /// Local angular velocity when the command was issued.
    angular_velocity: Vec3,
}

/// Learns the torque-to-acceleration ratio of one vehicle.
#[derive(Debug, Default)]
pub struct GyroProfiler {
    total_torque: f32,
    /// Angular acceleration per unit torque (1 / kg m^2).
    accel_per_torque: f32,
    mass: f32,
    last_command: Option<GyroCommand>,
}

impl GyroProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conservative ratio for a vehicle of `mass` spread out to `radius`.
    pub fn initial_ratio(mass: f32, radius: f32) -> f32 {
        let radius = radius.max(0.5);
        if mass <= 0.0 {
            return 0.0;
        }
        1.0 / (mass * radius * radius)
    }

    /// Refresh torque, reset on mass increase, and learn from the last command.
    pub fn update(&mut self, snapshot: &VehicleSnapshot, gyros: &[GyroInfo], tick: u64, staleness_ticks: u64) {
        self.total_torque = gyros
            .iter()
            .filter(|g| g.functional)
            .map(|g| g.max_torque.max(0.0))
            .sum();

        if snapshot.mass > self.mass * (1.0 + 1.0e-3) || self.accel_per_torque <= 0.0 {
            if self.mass > 0.0 {
                log::debug!(
                    "vehicle {}: mass grew {:.0} -> {:.0} kg, resetting gyro estimate",
                    snapshot.id,
                    self.mass,
                    snapshot.mass
                );
            }
            self.accel_per_torque =
                Self::initial_ratio(snapshot.mass, snapshot.bounding_radius());
            self.last_command = None;
        }
        self.mass = snapshot.mass;

        let Some(command) = self.last_command else {
            return;
        };
        let elapsed = tick.saturating_sub(command.tick);
        if elapsed == 0 {
            return;
        }
        self.last_command = None;
        if elapsed > staleness_ticks || self.total_torque <= 0.0 {
            return;
        }

        let dt = ticks_to_seconds(elapsed);
        let accel = (snapshot.local_angular_velocity() - command.angular_velocity) / dt;
        for axis in 0..3 {
            let ratio = command.ratio[axis];
            if ratio.abs() < MIN_LEARNING_RATIO {
                continue;
            }
            let estimate = accel[axis] / (ratio * self.total_torque);
            if estimate.is_finite() && estimate > self.accel_per_torque {
                self.accel_per_torque = estimate;
            }
        }
    }

    /// Remember a rotation command for learning on a later update.
    pub fn record_command(&mut self, tick: u64, ratio: Vec3, local_angular_velocity: Vec3) {
        self.last_command = Some(GyroCommand {
            tick,
            ratio,
            angular_velocity: local_angular_velocity,
        });
    }

    pub fn total_torque(&self) -> f32 {
        self.total_torque
    }

    pub fn accel_per_torque(&self) -> f32 {
        self.accel_per_torque
    }

    /// Angular acceleration at full torque (rad/s^2).
    pub fn max_angular_accel(&self) -> f32 {
        self.total_torque * self.accel_per_torque
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::Transform;
    use shared::collision::Aabb;

    fn snapshot(mass: f32, angular_velocity: Vec3) -> VehicleSnapshot {
        VehicleSnapshot {
            id: 1,
            pose: Transform::identity(),
            linear_velocity: Vec3::zeros(),
            angular_velocity,
            mass,
            center_of_mass: Vec3::zeros(),
            cell_size: 2.5,
            local_aabb: Aabb::new([-3.0, -4.0, 0.0].into(), [3.0, 4.0, 0.0].into()),
            gravity: Vec3::zeros(),
            air_density: 0.0,
        }
    }

    fn gyros() -> Vec<GyroInfo> {
        vec![
            GyroInfo {
                max_torque: 1000.0,
                functional: true,
            },
            GyroInfo {
                max_torque: 1000.0,
                functional: false,
            },
        ]
    }

    #[test]
    fn starts_conservative() {
        let mut g = GyroProfiler::new();
        g.update(&snapshot(100.0, Vec3::zeros()), &gyros(), 0, 10);
        assert_relative_eq!(g.total_torque(), 1000.0);
        // Bounding radius 5 m: 1 / (100 * 25).
        assert_relative_eq!(g.accel_per_torque(), 1.0 / 2500.0);
    }

    #[test]
    fn learns_upward_only() {
        let mut g = GyroProfiler::new();
        g.update(&snapshot(100.0, Vec3::zeros()), &gyros(), 0, 10);
        let initial = g.accel_per_torque();

        // Full torque on X for 6 ticks (0.1 s) gained 0.2 rad/s: 2 rad/s^2 per 1000 N*m.
        g.record_command(0, Vec3::new(1.0, 0.0, 0.0), Vec3::zeros());
        g.update(&snapshot(100.0, Vec3::new(0.2, 0.0, 0.0)), &gyros(), 6, 10);
        assert_relative_eq!(g.accel_per_torque(), 0.002, epsilon = 1.0e-6);
        assert!(g.accel_per_torque() > initial);

        // A weaker response never lowers the estimate.
        g.record_command(6, Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.2, 0.0, 0.0));
        g.update(&snapshot(100.0, Vec3::new(0.21, 0.0, 0.0)), &gyros(), 12, 10);
        assert_relative_eq!(g.accel_per_torque(), 0.002, epsilon = 1.0e-6);
        assert_relative_eq!(g.max_angular_accel(), 2.0, epsilon = 1.0e-3);
    }

    #[test]
    fn stale_commands_are_ignored() {
        let mut g = GyroProfiler::new();
        g.update(&snapshot(100.0, Vec3::zeros()), &gyros(), 0, 10);
        let initial = g.accel_per_torque();
        g.record_command(0, Vec3::new(1.0, 0.0, 0.0), Vec3::zeros());
        g.update(&snapshot(100.0, Vec3::new(5.0, 0.0, 0.0)), &gyros(), 60, 10);
        assert_eq!(g.accel_per_torque(), initial);
    }

    #[test]
    fn mass_increase_resets_estimate() {
        let mut g = GyroProfiler::new();
        g.update(&snapshot(100.0, Vec3::zeros()), &gyros(), 0, 10);
        g.record_command(0, Vec3::new(1.0, 0.0, 0.0), Vec3::zeros());
        g.update(&snapshot(100.0, Vec3::new(0.2, 0.0, 0.0)), &gyros(), 6, 10);
        assert!(g.accel_per_torque() > 1.0 / 2500.0);

        g.update(&snapshot(200.0, Vec3::zeros()), &gyros(), 7, 10);
        assert_relative_eq!(g.accel_per_torque(), 1.0 / 5000.0);
    }
}
