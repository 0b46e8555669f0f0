//! Whole-system runs against the sandbox world with a manually drained executor.

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use autopilot::path_checker::{ObstructionKind, PathChecker, PathQuery};
use autopilot::planet_checker::{PlanetFlag, PlanetWorkQueue};
use autopilot::sandbox::{CommandRecorder, SandboxVehicle, SandboxWorld, SphericalPlanet};
use autopilot::spatial_profile::SpatialProfile;
use autopilot::{
    AutopilotContext, AutopilotStatus, Destination, EntityId, GyroInfo, ManualExecutor,
    NavParams, NavSettings, PathRequest, PathState, Pathfinder, Vehicle,
};
use shared::collision::narrow_phase::capsule_intersects_sphere;
use shared::{Transform, Vec3};

const CONTROL: u64 = 6;

struct Scene {
    world: Arc<SandboxWorld>,
    me: Arc<SandboxVehicle>,
    exec: Arc<ManualExecutor>,
    planet_queue: Arc<PlanetWorkQueue>,
}

impl Scene {
    fn new(me: Arc<SandboxVehicle>) -> Self {
        let world = Arc::new(SandboxWorld::new());
        me.set_uniform_thrust(1.0e6);
        me.set_gyros(vec![GyroInfo {
            max_torque: 1.0e7,
            functional: true,
        }]);
        world.add_vehicle(Arc::clone(&me));
        Self {
            world,
            me,
            exec: Arc::new(ManualExecutor::new()),
            planet_queue: Arc::new(PlanetWorkQueue::new()),
        }
    }

    fn cube_at(at: Vec3) -> Self {
        let me = SandboxVehicle::cube(1, 3, 2.5, 50_000.0);
        me.set_pose(Transform::from_translation(at));
        Self::new(me)
    }

    fn pathfinder(&self) -> Pathfinder {
        Pathfinder::new(
            self.me.id(),
            self.world.clone(),
            Arc::new(SpatialProfile::new(self.me.cells())),
            Arc::new(NavSettings::default()),
            self.exec.clone(),
            Arc::clone(&self.planet_queue),
        )
    }

    fn add_block(&self, id: EntityId, at: Vec3) {
        let block = SandboxVehicle::cube(id, 4, 2.5, 200_000.0);
        block.set_pose(Transform::from_translation(at));
        self.world.add_vehicle(block);
    }

    fn test_path(&self, pathfinder: &mut Pathfinder, destination: Vec3) {
        let snapshot = self.me.snapshot().unwrap();
        let request = PathRequest::new(snapshot.pose.translation, destination);
        pathfinder.test_path(&snapshot, &request).unwrap();
    }
}

#[test]
fn clear_path_is_reported_every_time_without_search_work() {
    let scene = Scene::cube_at(Vec3::zeros());
    let mut pathfinder = scene.pathfinder();
    for _ in 0..5 {
        scene.test_path(&mut pathfinder, Vec3::new(1000.0, 0.0, 0.0));
        let (_, low) = pathfinder.pending_jobs();
        assert_eq!(low, 0);
        scene.exec.run_until_idle(100);
        assert!(pathfinder.can_move());
        scene.world.step(10);
    }
    assert!(pathfinder.last_search().is_none());
}

#[test]
fn clear_path_can_move_after_one_cycle() {
    let scene = Scene::cube_at(Vec3::zeros());
    let checker = PathChecker::new(
        1,
        scene.world.clone(),
        Arc::new(SpatialProfile::new(scene.me.cells())),
        Arc::new(NavSettings::default()),
    );
    let mut session = checker.try_begin().unwrap();
    let query = PathQuery::between(&Vec3::zeros(), &Vec3::zeros(), &Vec3::new(1000.0, 0.0, 0.0));
    assert!(session.test_fast(&query).unwrap());
    drop(session);

    let mut pathfinder = scene.pathfinder();
    scene.test_path(&mut pathfinder, Vec3::new(1000.0, 0.0, 0.0));
    assert!(!pathfinder.can_move());
    scene.exec.run_until_idle(100);
    assert!(pathfinder.can_move());
    assert_eq!(pathfinder.move_state(), PathState::NoObstruction);
}

#[test]
fn head_on_obstruction_is_found_and_avoided() {
    let scene = Scene::cube_at(Vec3::zeros());
    scene.add_block(2, Vec3::new(0.0, 0.0, -250.0));
    let destination = Vec3::new(0.0, 0.0, -500.0);

    let checker = PathChecker::new(
        1,
        scene.world.clone(),
        Arc::new(SpatialProfile::new(scene.me.cells())),
        Arc::new(NavSettings::default()),
    );
    let mut session = checker.try_begin().unwrap();
    let query = PathQuery::between(&Vec3::zeros(), &Vec3::zeros(), &destination);
    assert!(!session.test_fast(&query).unwrap());
    let capsule = session.capsule().copied().unwrap();
    let hit = session.test_slow().unwrap().unwrap();
    assert_eq!(hit.entity, 2);
    assert_eq!(hit.kind, ObstructionKind::Vehicle);
    assert!(capsule_intersects_sphere(&capsule, &hit.point, 2.5));
    drop(session);

    let mut pathfinder = scene.pathfinder();
    scene.test_path(&mut pathfinder, destination);
    scene.exec.run_until_idle(1);
    assert_eq!(pathfinder.move_state(), PathState::Searching);
    scene.exec.run_until_idle(200);

    let installs = pathfinder.take_installs();
    match installs.first() {
        None => assert_eq!(pathfinder.move_state(), PathState::PathBlocked),
        Some(install) => {
            // Flying to the waypoint is a new run, and its first leg is clear.
            let (waypoint, _) = install.waypoint.resolve(&*scene.world).unwrap();
            scene.world.step(10);
            scene.test_path(&mut pathfinder, waypoint);
            scene.exec.run_until_idle(100);
            assert_eq!(pathfinder.move_state(), PathState::NoObstruction);
        }
    }
}

#[test]
fn installed_waypoint_has_the_best_evaluated_value() {
    for offset in [0.0_f32, 4.0, -6.0] {
        let scene = Scene::cube_at(Vec3::zeros());
        scene.add_block(2, Vec3::new(offset, offset * 0.5, -200.0));
        let mut pathfinder = scene.pathfinder();
        scene.test_path(&mut pathfinder, Vec3::new(0.0, 0.0, -600.0));
        scene.exec.run_until_idle(200);

        let report = pathfinder.last_search().unwrap();
        assert!(!report.evaluated.is_empty());
        assert!(report.evaluated.len() <= NavSettings::default().max_alternates as usize);
        if let Some(chosen) = report.chosen() {
            assert!(report.evaluated.iter().all(|c| chosen.value <= c.value));
        }
    }
}

#[test]
fn stale_runs_never_reach_the_controls() {
    let scene = Scene::cube_at(Vec3::zeros());
    scene.add_block(2, Vec3::new(0.0, 0.0, -250.0));
    let ctx = AutopilotContext::with_executor(
        scene.world.clone(),
        NavSettings::default(),
        scene.exec.clone(),
    )
    .unwrap();
    let mut pilot = ctx.autopilot(1).unwrap();
    let mut surface = CommandRecorder::new();

    pilot
        .set_destination(Destination::Point(Vec3::new(0.0, 0.0, -500.0)), NavParams::default())
        .unwrap();
    pilot.update(&mut surface).unwrap();
    // Direct test plus a few candidates of the blocked run.
    scene.exec.run_until_idle(4);

    pilot
        .set_destination(Destination::Point(Vec3::new(600.0, 0.0, 0.0)), NavParams::default())
        .unwrap();
    for _ in 0..3 {
        scene.world.step(CONTROL);
        pilot.update(&mut surface).unwrap();
        ctx.end_tick();
        scene.exec.run_until_idle(200);
        assert!(pilot.nav_set().waypoints().is_empty());
    }
    assert_eq!(pilot.status(), AutopilotStatus::Moving);
    let movement = surface.last_movement();
    assert!(movement.x > 0.0, "{movement:?}");
    assert_eq!(movement.z, 0.0);
}

#[test]
fn skirting_a_planet_is_blocked_by_gravity() {
    let scene = Scene::cube_at(Vec3::new(-3000.0, 1200.0, 0.0));
    scene
        .world
        .add_planet(SphericalPlanet::new(100, Vec3::zeros(), 1000.0));
    let mut pathfinder = scene.pathfinder();
    scene.test_path(&mut pathfinder, Vec3::new(3000.0, 1200.0, 0.0));
    scene.planet_queue.drain_for(Duration::from_secs(5));

    let status = pathfinder.planet_status();
    assert!(status.flags.has(PlanetFlag::BlockedGravity));
    assert_eq!(status.planet, Some(100));
    assert_relative_eq!(
        status.obstruction_point.unwrap(),
        Vec3::new(0.0, 1200.0, 0.0),
        epsilon = 1.0e-2
    );

    scene.world.step(10);
    scene.test_path(&mut pathfinder, Vec3::new(3000.0, 1200.0, 0.0));
    assert!(!pathfinder.can_move());
    assert_eq!(pathfinder.move_obstruction().unwrap().entity, 100);
}

#[test]
fn rotation_next_to_terrain_is_not_clear() {
    let rod = SandboxVehicle::rod(1, 9, 2.5, 80_000.0);
    rod.set_pose(Transform::from_translation(Vec3::new(0.0, 1003.0, 0.0)));
    let scene = Scene::new(rod);
    scene
        .world
        .add_planet(SphericalPlanet::new(100, Vec3::zeros(), 1000.0));
    let mut pathfinder = scene.pathfinder();

    pathfinder.test_rotate(&Vec3::x(), false).unwrap();
    scene.exec.run_until_idle(10);
    assert!(!pathfinder.can_rotate());
    assert_eq!(pathfinder.rotate_obstruction().unwrap().entity, 100);

    pathfinder.test_rotate(&Vec3::x(), true).unwrap();
    scene.exec.run_until_idle(10);
    assert!(pathfinder.can_rotate());
}
