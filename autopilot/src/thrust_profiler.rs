//! Per-direction force capability of a vehicle.
//!
//! Recomputed once per control period, or immediately when the block count
//! changes, from the live thruster inventory and the ambient conditions.

use shared::collision::settings::DIST_EPS;
use shared::{Direction, Quat, Vec3};

use crate::vehicle::{ThrusterInfo, VehicleSnapshot};

/// Maximum force per direction and the conditions it was computed under.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThrustProfile {
    /// Newtons, indexed by [`Direction::index`].
    pub force: [f32; 6],
    /// Air density the effectiveness curves were sampled at.
    pub air_density: f32,
    /// Local gravity acceleration the profile was computed under (m/s^2).
    pub gravity: Vec3,
    /// Signed per-axis force ratio that exactly cancels gravity. Components beyond
    /// +-1 mean the vehicle cannot hold against gravity on that axis.
    pub gravity_ratio: Vec3,
    pub primary: Direction,
    pub secondary: Direction,
}

impl ThrustProfile {
    /// Sum `thrusters` at the snapshot's air density.
    pub fn compute(snapshot: &VehicleSnapshot, thrusters: &[ThrusterInfo], multiplier: f32) -> Self {
        let air_density = snapshot.air_density;
        let mut force = [0.0_f32; 6];
        for thruster in thrusters {
            force[thruster.direction.index()] += thruster.force_at(air_density) * multiplier;
        }

        let gravity = snapshot.local_gravity();
        let mut gravity_ratio = Vec3::zeros();
        for axis in 0..3 {
            // The force that cancels gravity points against it.
            let needed = -gravity[axis] * snapshot.mass;
            if needed.abs() <= DIST_EPS {
                continue;
            }
            let available = force[Direction::from_component(axis, needed).index()];
            gravity_ratio[axis] = if available > 0.0 {
                needed / available
            } else {
                f32::INFINITY.copysign(needed)
            };
        }

        let primary = Direction::ALL
            .into_iter()
            .max_by(|a, b| force[a.index()].total_cmp(&force[b.index()]))
            .unwrap_or_default();
        let secondary = Direction::ALL
            .into_iter()
            .filter(|d| d.is_perpendicular(primary))
            .max_by(|a, b| force[a.index()].total_cmp(&force[b.index()]))
            .unwrap_or(Direction::Up);

        Self {
            force,
            air_density,
            gravity,
            gravity_ratio,
            primary,
            secondary,
        }
    }

    #[inline]
    pub fn force_in(&self, direction: Direction) -> f32 {
        self.force[direction.index()]
    }

    /// Whether thrust on every axis can at least cancel gravity.
    pub fn holds_against_gravity(&self) -> bool {
        self.gravity_ratio.iter().all(|r| r.abs() <= 1.0)
    }

    /// Local rotation whose forward (-Z) is the primary thrust direction and whose
    /// up (+Y) is the secondary one.
    pub fn flight_frame(&self) -> Quat {
        Quat::face_towards(&-self.primary.vector(), &self.secondary.vector())
    }
}

/// Keeps a [`ThrustProfile`] current.
#[derive(Debug, Default)]
pub struct ThrustProfiler {
    profile: ThrustProfile,
    computed_tick: Option<u64>,
    cell_generation: u64,
}

impl ThrustProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute if a control period has passed or the cells changed. Returns
    /// true if the profile was recomputed.
    pub fn update(
        &mut self,
        snapshot: &VehicleSnapshot,
        thrusters: impl FnOnce() -> Vec<ThrusterInfo>,
        cell_generation: u64,
        tick: u64,
        period_ticks: u64,
        multiplier: f32,
    ) -> bool {
        let due = match self.computed_tick {
            None => true,
            Some(last) => {
                tick.saturating_sub(last) >= period_ticks || cell_generation != self.cell_generation
            }
        };
        if !due {
            return false;
        }
        self.profile = ThrustProfile::compute(snapshot, &thrusters(), multiplier);
        self.computed_tick = Some(tick);
        self.cell_generation = cell_generation;
        true
    }

    pub fn profile(&self) -> &ThrustProfile {
        &self.profile
    }

    /// Maximum acceleration in `direction` for a vehicle of `mass`.
    pub fn max_accel(&self, direction: Direction, mass: f32) -> f32 {
        if mass <= 0.0 {
            return 0.0;
        }
        self.profile.force_in(direction) / mass
    }
}
