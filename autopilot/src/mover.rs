//! The motion controller.
//!
//! Each control period the mover turns "be there, facing that way" into force and
//! torque ratios. Every axis is flown on its own with the stopping-speed rule from
//! [`shared::motion`]: never faster than a speed from which the available
//! deceleration can still stop exactly on target.
//!
//! Axes whose target speed is near zero, or that are moving the wrong way faster
//! than the thrusters can arrest in one period, are left to the inertial dampers
//! instead of being driven actively.

use std::sync::Arc;

use log::{debug, warn};
use nalgebra::Vector2;
use shared::collision::settings::DIST_EPS;
use shared::motion::{approach_speed, ratio_of};
use shared::{Direction, Vec3, ticks_to_seconds};

use crate::error::Result;
use crate::gyro_profiler::GyroProfiler;
use crate::host::{ControlSurface, Vehicle};
use crate::nav_set::NavParams;
use crate::pathfinder::{PathRequest, Pathfinder};
use crate::settings::NavSettings;
use crate::thrust_profiler::{ThrustProfile, ThrustProfiler};
use crate::vehicle::VehicleSnapshot;

/// Per-axis damping rule shared by translation and rotation.
///
/// `ratio` is the commanded ratio, `velocity` the current velocity along the axis,
/// `accel` the acceleration the ratio's direction provides at full power.
fn prefers_damping(target: f32, ratio: f32, velocity: f32, accel: f32, period: f32, near_zero: f32) -> bool {
    if target.abs() < near_zero {
        return true;
    }
    ratio * velocity < 0.0 && ratio.abs() * accel * period < velocity.abs()
}

/// Scale `v` down to at most `limit` long.
fn cap_norm(v: Vec3, limit: f32) -> Vec3 {
    let norm = v.norm();
    if norm > limit && norm > DIST_EPS {
        v * (limit / norm)
    } else {
        v
    }
}

fn sanitize(v: Vec3) -> Vec3 {
    v.map(|c| if c.is_finite() { c.clamp(-1.0, 1.0) } else { 0.0 })
}

/// Owns the pathfinder and both profilers of one vehicle, and the command being
/// built for this control period.
pub struct Mover {
    vehicle: Arc<dyn Vehicle>,
    settings: Arc<NavSettings>,
    pathfinder: Pathfinder,
    thrust: ThrustProfiler,
    gyro: GyroProfiler,
    tick: u64,
    /// Local force ratios.
    movement: Vec3,
    /// Local torque ratios (pitch about X, yaw about Y, roll about Z).
    rotation: Vec3,
    dampers: bool,
    /// Last world target direction, for estimating how fast the target turns.
    last_direction: Option<(u64, Vec3)>,
    /// Set while gravity outweighs the available thrust; warned once per episode.
    outweighed: bool,
}

impl Mover {
    pub fn new(vehicle: Arc<dyn Vehicle>, pathfinder: Pathfinder, settings: Arc<NavSettings>) -> Self {
        Self {
            vehicle,
            settings,
            pathfinder,
            thrust: ThrustProfiler::new(),
            gyro: GyroProfiler::new(),
            tick: 0,
            movement: Vec3::zeros(),
            rotation: Vec3::zeros(),
            dampers: true,
            last_direction: None,
            outweighed: false,
        }
    }

    pub fn pathfinder(&self) -> &Pathfinder {
        &self.pathfinder
    }

    pub fn pathfinder_mut(&mut self) -> &mut Pathfinder {
        &mut self.pathfinder
    }

    pub fn thrust_profile(&self) -> &ThrustProfile {
        self.thrust.profile()
    }

    pub fn gyro_profiler(&self) -> &GyroProfiler {
        &self.gyro
    }

    pub fn movement(&self) -> Vec3 {
        self.movement
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn dampers(&self) -> bool {
        self.dampers
    }

    fn period(&self) -> f32 {
        ticks_to_seconds(self.settings.control_period_ticks)
    }

    /// Refresh both profilers. Call once per control period before `calc_*`.
    pub fn update_profiles(&mut self, snapshot: &VehicleSnapshot, tick: u64) {
        self.tick = tick;
        let vehicle = Arc::clone(&self.vehicle);
        self.thrust.update(
            snapshot,
            || vehicle.thrusters(),
            vehicle.cells().generation(),
            tick,
            self.settings.control_period_ticks,
            self.settings.thrust_multiplier,
        );
        self.gyro.update(
            snapshot,
            &vehicle.gyros(),
            tick,
            self.settings.gyro_staleness_ticks,
        );

        let outweighed = !self.thrust.profile().holds_against_gravity();
        if outweighed && !self.outweighed {
            warn!(
                "vehicle {}: thrust cannot hold against gravity (ratio {:?})",
                snapshot.id,
                self.thrust.profile().gravity_ratio
            );
        }
        self.outweighed = outweighed;
    }

    /// False while gravity is stronger than the thrust on some axis.
    pub fn holds_against_gravity(&self) -> bool {
        !self.outweighed
    }

    /// Compute force ratios that bring `nav_block` to `destination`, which moves at
    /// `target_velocity`.
    pub fn calc_move(
        &mut self,
        snapshot: &VehicleSnapshot,
        nav_block: &Vec3,
        destination: &Vec3,
        target_velocity: &Vec3,
        params: &NavParams,
    ) -> Result<()> {
        if self.settings.collision_avoidance {
            let request = PathRequest::with_params(*nav_block, *destination, params);
            self.pathfinder.test_path(snapshot, &request)?;
            if !self.pathfinder.can_move() {
                debug!(
                    "vehicle {}: path not clear ({:?}), holding",
                    snapshot.id,
                    self.pathfinder.move_state()
                );
                self.stop_move();
                return Ok(());
            }
        }

        let profile = self.thrust.profile();
        let mass = snapshot.mass;
        let period = self.period();
        let displacement = snapshot.pose.inverse_transform_vector(&(destination - nav_block));
        let target_local = snapshot.pose.inverse_transform_vector(target_velocity);
        let velocity = snapshot.local_velocity();
        let gravity = snapshot.local_gravity();

        let mut approach = Vec3::zeros();
        for axis in 0..3 {
            let d = displacement[axis];
            // Deceleration pushes against the direction of travel; gravity along it helps.
            let brake = Direction::from_component(axis, -d);
            let a_stop = self.thrust.max_accel(brake, mass) - gravity[axis] * d.signum();
            approach[axis] = approach_speed(d, a_stop.max(0.0));
        }
        let approach = cap_norm(approach, params.relative_speed_limit);
        let speed_limit = self
            .settings
            .max_speed
            .min(params.speed_limit)
            .min(self.pathfinder.speed_cap().unwrap_or(f32::INFINITY));
        let target = cap_norm(approach + target_local, speed_limit);

        let accel = (target - velocity) / period;
        let force = (accel - gravity) * mass;
        let mut movement = Vec3::zeros();
        let mut damp_any = false;
        for axis in 0..3 {
            let dir = Direction::from_component(axis, force[axis]);
            let capacity = profile.force_in(dir);
            let ratio = ratio_of(force[axis], capacity);
            let full_accel = self.thrust.max_accel(dir, mass);
            if prefers_damping(
                target[axis],
                ratio,
                velocity[axis],
                full_accel,
                period,
                self.settings.near_zero_speed,
            ) {
                damp_any = true;
            } else {
                movement[axis] = ratio;
            }
        }

        self.movement = movement;
        self.dampers = damp_any;
        Ok(())
    }

    /// Compute torque ratios that turn the vehicle's forward toward
    /// `target_direction` (world) and, if given, its up toward `up`.
    pub fn calc_rotate(
        &mut self,
        snapshot: &VehicleSnapshot,
        target_direction: &Vec3,
        up: Option<&Vec3>,
        ignore_terrain: bool,
    ) -> Result<()> {
        let Some(world_dir) = target_direction.try_normalize(DIST_EPS) else {
            self.stop_rotate();
            return Ok(());
        };
        let local = snapshot.pose.inverse_transform_vector(&world_dir);
        let azimuth = local.x.atan2(-local.z);
        let elevation = local.y.clamp(-1.0, 1.0).asin();
        let roll = up
            .map(|u| snapshot.pose.inverse_transform_vector(u))
            .filter(|u| u.x.abs() + u.y.abs() > DIST_EPS)
            .map_or(0.0, |u| (-u.x).atan2(u.y));
        let displacement = Vec3::new(elevation, -azimuth, roll);

        if self.settings.collision_avoidance {
            let axis = snapshot.pose.transform_vector(&displacement);
            if axis.norm() > DIST_EPS {
                self.pathfinder.test_rotate(&axis, ignore_terrain)?;
                if !self.pathfinder.can_rotate() {
                    debug!(
                        "vehicle {}: rotation not clear ({:?})",
                        snapshot.id,
                        self.pathfinder.rotate_state()
                    );
                    self.stop_rotate();
                    return Ok(());
                }
            }
        }

        let period = self.period();
        let max_accel = self.gyro.max_angular_accel();
        let target_spin = match self.last_direction {
            Some((tick, previous)) if self.tick > tick => {
                let dt = ticks_to_seconds(self.tick - tick);
                snapshot
                    .pose
                    .inverse_transform_vector(&(previous.cross(&world_dir) / dt))
            }
            _ => Vec3::zeros(),
        };
        self.last_direction = Some((self.tick, world_dir));

        let spin = snapshot.local_angular_velocity();
        let mut rotation = Vec3::zeros();
        for axis in 0..3 {
            let target = approach_speed(displacement[axis], max_accel)
                .clamp(-self.settings.max_angular_speed, self.settings.max_angular_speed)
                + target_spin[axis];
            let ratio = if max_accel > 0.0 {
                ratio_of((target - spin[axis]) / period, max_accel)
            } else {
                0.0
            };
            if !prefers_damping(
                target,
                ratio,
                spin[axis],
                max_accel,
                period,
                self.settings.near_zero_speed * 0.1,
            ) {
                rotation[axis] = ratio;
            }
        }
        self.rotation = rotation;
        Ok(())
    }

    /// Zero force; dampers hold the vehicle.
    pub fn stop_move(&mut self) {
        self.movement = Vec3::zeros();
        self.dampers = true;
    }

    pub fn stop_rotate(&mut self) {
        self.rotation = Vec3::zeros();
        self.last_direction = None;
    }

    /// Submit the command built this period. Simulation thread only.
    pub fn move_and_rotate(&mut self, surface: &mut dyn ControlSurface, snapshot: &VehicleSnapshot) {
        let movement = sanitize(self.movement);
        let rotation = sanitize(self.rotation);
        surface.set_dampers(self.dampers);
        if movement == Vec3::zeros() && rotation == Vec3::zeros() {
            surface.stop();
        } else {
            surface.move_and_rotate(movement, Vector2::new(rotation.x, rotation.y), rotation.z);
        }
        self.gyro
            .record_command(self.tick, rotation, snapshot.local_angular_velocity());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::World;
    use crate::planet_checker::PlanetWorkQueue;
    use crate::sandbox::{Command, CommandRecorder, SandboxVehicle, SandboxWorld};
    use crate::scheduler::ManualExecutor;
    use crate::spatial_profile::SpatialProfile;
    use crate::vehicle::GyroInfo;
    use approx::assert_relative_eq;
    use shared::{STANDARD_GRAVITY, Transform};

    struct Rig {
        world: Arc<SandboxWorld>,
        me: Arc<SandboxVehicle>,
        exec: Arc<ManualExecutor>,
        mover: Mover,
    }

    fn rig(settings: NavSettings) -> Rig {
        let world = Arc::new(SandboxWorld::new());
        let me = SandboxVehicle::cube(1, 3, 2.5, 50_000.0);
        me.set_uniform_thrust(1.0e6);
        me.set_gyros(vec![GyroInfo {
            max_torque: 1.0e7,
            functional: true,
        }]);
        world.add_vehicle(Arc::clone(&me));
        let exec = Arc::new(ManualExecutor::new());
        let settings = Arc::new(settings);
        let pathfinder = Pathfinder::new(
            1,
            world.clone(),
            Arc::new(SpatialProfile::new(me.cells())),
            Arc::clone(&settings),
            exec.clone(),
            Arc::new(PlanetWorkQueue::new()),
        );
        let mover = Mover::new(me.clone(), pathfinder, settings);
        Rig {
            world,
            me,
            exec,
            mover,
        }
    }

    impl Rig {
        fn calc_move(&mut self, destination: Vec3, params: &NavParams) -> Vec3 {
            let snapshot = self.me.snapshot().unwrap();
            self.mover.update_profiles(&snapshot, self.world.tick());
            self.mover
                .calc_move(&snapshot, &snapshot.pose.translation, &destination, &Vec3::zeros(), params)
                .unwrap();
            self.exec.run_until_idle(100);
            self.mover.movement()
        }
    }

    #[test]
    fn holds_until_the_path_is_known_then_accelerates() {
        let mut rig = rig(NavSettings::default());
        let params = NavParams::default();
        let first = rig.calc_move(Vec3::new(0.0, 0.0, -500.0), &params);
        assert_eq!(first, Vec3::zeros());
        assert!(rig.mover.dampers());

        let second = rig.calc_move(Vec3::new(0.0, 0.0, -500.0), &params);
        assert!(second.z < -0.5, "{second:?}");
        assert_eq!(second.x, 0.0);
    }

    #[test]
    fn blocked_path_holds_with_dampers() {
        let mut rig = rig(NavSettings::default());
        let wall = SandboxVehicle::cube(2, 6, 2.5, 1.0e6);
        wall.set_pose(Transform::from_translation(Vec3::new(0.0, 0.0, -60.0)));
        rig.world.add_vehicle(wall);
        let params = NavParams::default().with_course_change(false);
        for _ in 0..3 {
            let m = rig.calc_move(Vec3::new(0.0, 0.0, -500.0), &params);
            assert_eq!(m, Vec3::zeros());
            assert!(rig.mover.dampers());
        }
    }

    #[test]
    fn speed_limit_stops_acceleration() {
        let mut rig = rig(NavSettings::default().with_collision_avoidance(false));
        rig.me.set_velocity(Vec3::new(0.0, 0.0, -10.0));
        let params = NavParams::default().with_speed_limit(10.0);
        let m = rig.calc_move(Vec3::new(0.0, 0.0, -5000.0), &params);
        assert_relative_eq!(m.z, 0.0, epsilon = 1.0e-3);
    }

    #[test]
    fn gravity_is_compensated() {
        let mut rig = rig(NavSettings::default().with_collision_avoidance(false));
        rig.me.set_velocity(Vec3::new(0.0, 49.9, 0.0));
        let params = NavParams::default().with_speed_limit(50.0);
        let without = rig.calc_move(Vec3::new(0.0, 100.0, 0.0), &params);
        rig.me
            .set_environment(Vec3::new(0.0, -STANDARD_GRAVITY, 0.0), 0.0);
        let with = rig.calc_move(Vec3::new(0.0, 100.0, 0.0), &params);
        assert_relative_eq!(without.y, 0.05, epsilon = 1.0e-3);
        assert_relative_eq!(with.y, 0.05 + STANDARD_GRAVITY / 20.0, epsilon = 1.0e-3);
    }

    #[test]
    fn weak_thrust_under_heavy_gravity_is_reported() {
        let mut rig = rig(NavSettings::default().with_collision_avoidance(false));
        let snapshot = rig.me.snapshot().unwrap();
        rig.mover.update_profiles(&snapshot, 0);
        assert!(rig.mover.holds_against_gravity());

        rig.me.set_uniform_thrust(1.0e4);
        rig.me
            .set_environment(Vec3::new(0.0, -STANDARD_GRAVITY, 0.0), 0.0);
        let snapshot = rig.me.snapshot().unwrap();
        rig.mover.update_profiles(&snapshot, 60);
        assert!(rig.mover.thrust_profile().gravity_ratio.y > 1.0);
        assert!(!rig.mover.holds_against_gravity());
    }

    #[test]
    fn at_rest_on_target_stops_with_dampers() {
        let mut rig = rig(NavSettings::default().with_collision_avoidance(false));
        rig.calc_move(Vec3::zeros(), &NavParams::default());
        let snapshot = rig.me.snapshot().unwrap();
        let mut surface = CommandRecorder::new();
        rig.mover.move_and_rotate(&mut surface, &snapshot);
        assert_eq!(surface.last(), Some(&Command::Stop));
        assert!(surface.dampers);
    }

    #[test]
    fn turns_toward_a_target_on_the_right() {
        let mut rig = rig(NavSettings::default());
        let snapshot = rig.me.snapshot().unwrap();
        rig.mover.update_profiles(&snapshot, 0);
        rig.mover
            .calc_rotate(&snapshot, &Vec3::x(), None, false)
            .unwrap();
        assert_eq!(rig.mover.rotation(), Vec3::zeros());
        rig.exec.run_until_idle(10);

        rig.mover
            .calc_rotate(&snapshot, &Vec3::x(), None, false)
            .unwrap();
        let rotation = rig.mover.rotation();
        assert!(rotation.y < 0.0, "{rotation:?}");
        assert_relative_eq!(rotation.x, 0.0, epsilon = 1.0e-4);

        let mut surface = CommandRecorder::new();
        rig.mover.move_and_rotate(&mut surface, &snapshot);
        match surface.last() {
            Some(Command::Move { rotation, .. }) => assert!(rotation.y < 0.0),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn roll_follows_the_up_reference() {
        let mut rig = rig(NavSettings::default().with_collision_avoidance(false));
        let snapshot = rig.me.snapshot().unwrap();
        rig.mover.update_profiles(&snapshot, 0);
        // Forward already on target; up wanted toward +X.
        rig.mover
            .calc_rotate(&snapshot, &-Vec3::z(), Some(&Vec3::x()), false)
            .unwrap();
        assert!(rig.mover.rotation().z < 0.0);
    }
}
