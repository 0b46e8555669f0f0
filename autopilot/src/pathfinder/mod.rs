//! Per-vehicle path and rotation orchestration.
//!
//! [`Pathfinder::test_path`] is called from the simulation thread every control
//! tick. It decides whether the request starts a new run, polls the planet
//! checker, and (throttled) queues two high-priority jobs: the direct test to the
//! destination and a look-ahead test along the current velocity. A direct test
//! that finds an obstruction moves the run to [`PathState::Searching`] and queues
//! one low-priority job per alternate candidate. When the search ends, the best
//! candidate is sent back to the simulation thread as a [`WaypointInstall`].
//!
//! Every job carries the [`RunToken`] of the run that queued it and does nothing
//! once a newer run has begun.

mod alternate;
mod directions;
pub mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use shared::collision::settings::DIST_EPS;
use shared::motion::look_ahead_distance;
use shared::Vec3;

pub use alternate::{EvaluatedCandidate, SearchReport};
pub use directions::{HOP_DIRECTION_COUNT, hop_directions};
pub use state::{PathState, SharedPathState};

use state::RunSlot;

use alternate::{CandidateInput, SearchState, candidates, path_value};
use crate::error::{NavError, Result};
use crate::host::{EntityId, World};
use crate::nav_set::{NavParams, Waypoint};
use crate::path_checker::{Obstruction, ObstructionKind, PathChecker, PathQuery, PathTestSession};
use crate::planet_checker::{PlanetChecker, PlanetFlag, PlanetStatus, PlanetWorkQueue};
use crate::rotate_checker::RotateChecker;
use crate::scheduler::{Executor, Priority, RunCounter, RunToken, TaskQueues, log_push};
use crate::settings::NavSettings;
use crate::spatial_profile::SpatialProfile;
use crate::vehicle::VehicleSnapshot;

/// Rotation axes closer than this (cosine) belong to the same rotate run.
const SAME_AXIS_COS: f32 = 0.9;

/// What the simulation thread wants tested this tick.
#[derive(Clone, Debug, PartialEq)]
pub struct PathRequest {
    /// World position of the navigation block now.
    pub nav_block: Vec3,
    /// Where the navigation block should end up.
    pub destination: Vec3,
    pub landing: bool,
    pub ignore_terrain: bool,
    pub ignore_entity: Option<EntityId>,
    pub allow_course_change: bool,
}

impl PathRequest {
    pub fn new(nav_block: Vec3, destination: Vec3) -> Self {
        Self {
            nav_block,
            destination,
            landing: false,
            ignore_terrain: false,
            ignore_entity: None,
            allow_course_change: true,
        }
    }

    /// A request carrying the navigation parameters of `params`.
    pub fn with_params(nav_block: Vec3, destination: Vec3, params: &NavParams) -> Self {
        Self {
            nav_block,
            destination,
            landing: params.landing,
            ignore_terrain: params.ignore_terrain,
            ignore_entity: params.ignore_entity,
            allow_course_change: params.allow_course_change,
        }
    }

    fn query(&self, from: &Vec3, to: &Vec3) -> PathQuery {
        PathQuery::between(&self.nav_block, from, to)
            .ignoring_terrain(self.ignore_terrain)
            .ignoring(self.ignore_entity)
    }

    /// Does `other` ask for something different enough to need a new run? Callers
    /// compare consecutive requests, so a destination drifting a little every tick
    /// keeps its run.
    fn differs_from(&self, other: &PathRequest, tolerance: f32) -> bool {
        (self.destination - other.destination).norm() > tolerance
            || self.landing != other.landing
            || self.ignore_terrain != other.ignore_terrain
            || self.ignore_entity != other.ignore_entity
            || self.allow_course_change != other.allow_course_change
    }
}

/// An alternate waypoint found by a finished search, waiting to be installed on
/// the simulation thread.
#[derive(Clone, Debug)]
pub struct WaypointInstall {
    token: RunToken,
    pub waypoint: Waypoint,
    /// Path value of the chosen candidate.
    pub value: f32,
}

impl WaypointInstall {
    pub fn run(&self) -> u64 {
        self.token.id()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the simulation thread and the jobs.
struct Core {
    vehicle_id: EntityId,
    world: Arc<dyn World>,
    settings: Arc<NavSettings>,
    path_checker: PathChecker,
    rotate_checker: RotateChecker,
    queues: Arc<TaskQueues>,
    runs: RunCounter,
    rotate_runs: RunCounter,
    move_state: SharedPathState,
    rotate_state: SharedPathState,
    /// Infinity when uncapped.
    speed_cap: RunSlot<f32>,
    move_obstruction: RunSlot<Option<Obstruction>>,
    rotate_obstruction: RunSlot<Option<Obstruction>>,
    search: Mutex<Option<SearchState>>,
    last_search: Mutex<Option<SearchReport>>,
    installs: Sender<WaypointInstall>,
}

impl Core {
    /// Hand every move-side result slot to `run`.
    fn reset_move(&self, run: u64) {
        self.move_state.reset(run);
        self.move_obstruction.reset(run, None);
        self.speed_cap.reset(run, f32::INFINITY);
        *lock(&self.search) = None;
    }

    fn reset_rotate(&self, run: u64) {
        self.rotate_state.reset(run);
        self.rotate_obstruction.reset(run, None);
    }

    fn push(self: &Arc<Self>, priority: Priority, what: &str, job: impl FnOnce(Arc<Self>) + Send + 'static) {
        let core = Arc::clone(self);
        log_push(self.queues.push(priority, Box::new(move || job(core))), what);
    }

    fn direct_test(self: &Arc<Self>, token: RunToken, request: PathRequest) {
        if !token.is_current() {
            return;
        }
        let Some(mut session) = self.path_checker.try_begin() else {
            debug!("vehicle {}: path checker busy, requeueing direct test", self.vehicle_id);
            self.push(Priority::High, "direct path test", move |core| {
                core.direct_test(token, request)
            });
            return;
        };

        let query = request
            .query(&request.nav_block, &request.destination)
            .landing(request.landing);
        let result = run_test(&mut session, &query);
        drop(session);

        match result {
            Ok(None) => match self.move_state.advance(token.id(), PathState::NoObstruction) {
                Some(PathState::NotRunning) => {
                    debug!("vehicle {}: run {} path clear", self.vehicle_id, token.id());
                }
                Some(_) => {}
                None => debug!("vehicle {}: run {} ended during direct test", self.vehicle_id, token.id()),
            },
            Ok(Some(obstruction)) => self.on_obstruction(&token, &request, obstruction),
            Err(e) => e.log("direct path test"),
        }
    }

    fn velocity_test(self: &Arc<Self>, token: RunToken, request: PathRequest, velocity: Vec3, distance: f32) {
        if !token.is_current() {
            return;
        }
        let Some(mut session) = self.path_checker.try_begin() else {
            self.push(Priority::High, "velocity path test", move |core| {
                core.velocity_test(token, request, velocity, distance)
            });
            return;
        };

        let speed = velocity.norm();
        let Some(direction) = velocity.try_normalize(DIST_EPS) else {
            return;
        };
        let ahead = request.nav_block + direction * distance;
        let query = request.query(&request.nav_block, &ahead);
        let result = session.test_fast(&query).and_then(|clear| {
            if clear {
                return Ok(None);
            }
            let capsule = session.capsule().copied();
            Ok(session.test_slow()?.zip(capsule))
        });
        drop(session);

        match result {
            Ok(None) => {
                self.speed_cap.set(token.id(), f32::INFINITY);
            }
            Ok(Some((obstruction, capsule))) => {
                let reach = obstruction.reachable(&capsule.p0, &direction, capsule.radius, distance);
                let cap = (speed * reach / distance).max(self.settings.min_capped_speed);
                if self.speed_cap.set(token.id(), cap) {
                    debug!(
                        "vehicle {}: closing on {} at {speed:.1} m/s, capping to {cap:.1}",
                        self.vehicle_id, obstruction.entity
                    );
                }
            }
            Err(e) => e.log("velocity path test"),
        }
    }

    fn on_obstruction(self: &Arc<Self>, token: &RunToken, request: &PathRequest, obstruction: Obstruction) {
        if !self.move_obstruction.set(token.id(), Some(obstruction.clone())) {
            return;
        }
        match self.move_state.advance(token.id(), PathState::Searching) {
            Some(PathState::NotRunning | PathState::NoObstruction) => {}
            _ => return,
        }
        info!(
            "vehicle {}: path obstructed by {} ({:?}) at {:?}, searching",
            self.vehicle_id, obstruction.entity, obstruction.kind, obstruction.point
        );

        let Some(own_radius) = self
            .world
            .vehicle(self.vehicle_id)
            .and_then(|v| v.snapshot())
            .map(|s| s.bounding_radius())
        else {
            NavError::VehicleClosed(self.vehicle_id).log("alternate search");
            return;
        };
        let obstruction_radius = match obstruction.kind {
            ObstructionKind::Vehicle | ObstructionKind::Other => self
                .world
                .body(obstruction.entity)
                .map_or(0.0, |b| b.radius),
            ObstructionKind::Voxel | ObstructionKind::Gravity => 0.0,
        };

        let mut points = candidates(
            &self.settings,
            &CandidateInput {
                origin: request.nav_block,
                destination: request.destination,
                obstruction: &obstruction,
                own_radius,
                obstruction_radius,
                allow_course_change: request.allow_course_change,
            },
        );
        points.truncate(self.settings.max_alternates as usize);
        if points.is_empty() {
            info!("vehicle {}: no alternate candidates, path blocked", self.vehicle_id);
            self.move_state.advance(token.id(), PathState::PathBlocked);
            return;
        }

        *lock(&self.search) = Some(SearchState::new(
            &self.settings,
            token.id(),
            request.nav_block,
            request.destination,
            obstruction,
            points.len(),
        ));
        for point in points {
            let (token, request) = (token.clone(), request.clone());
            self.push(Priority::Low, "alternate path test", move |core| {
                core.alternate_test(token, request, point)
            });
        }
        self.queues.run_item();
    }

    fn search_open(&self, token: &RunToken) -> bool {
        lock(&self.search)
            .as_ref()
            .is_some_and(|s| s.run == token.id() && !s.is_finished())
    }

    fn alternate_test(self: &Arc<Self>, token: RunToken, request: PathRequest, candidate: Vec3) {
        if !token.is_current() || !self.search_open(&token) {
            return;
        }
        let Some(mut session) = self.path_checker.try_begin() else {
            self.push(Priority::Low, "alternate path test", move |core| {
                core.alternate_test(token, request, candidate)
            });
            return;
        };
        let evaluated = match self.evaluate(&mut session, &request, candidate) {
            Ok(evaluated) => evaluated,
            Err(e) => {
                e.log("alternate path test");
                EvaluatedCandidate {
                    point: candidate,
                    value: f32::INFINITY,
                    unreachable: f32::INFINITY,
                }
            }
        };
        drop(session);
        debug!(
            "vehicle {}: candidate {:?} value {}",
            self.vehicle_id, evaluated.point, evaluated.value
        );

        let finished = {
            let mut search = lock(&self.search);
            match search.as_mut() {
                Some(s) if s.run == token.id() => s
                    .record(evaluated)
                    .map(|report| (report, s.obstruction.clone())),
                _ => None,
            }
        };
        if let Some((report, obstruction)) = finished {
            self.finish_search(&token, report, &obstruction);
        }
    }

    /// Path value of reaching the destination by way of `candidate`.
    fn evaluate(
        &self,
        session: &mut PathTestSession<'_>,
        request: &PathRequest,
        candidate: Vec3,
    ) -> Result<EvaluatedCandidate> {
        let origin = request.nav_block;
        let destination = request.destination;

        if run_test(session, &request.query(&origin, &candidate))?.is_some() {
            return Ok(EvaluatedCandidate {
                point: candidate,
                value: f32::INFINITY,
                unreachable: f32::INFINITY,
            });
        }

        let length = (destination - candidate).norm();
        let second = request
            .query(&candidate, &destination)
            .landing(request.landing);
        let unreachable = if session.test_fast(&second)? {
            0.0
        } else {
            let capsule = session
                .capsule()
                .copied()
                .ok_or(NavError::Invariant("slow path test without a sweep capsule"))?;
            match session.test_slow()? {
                None => 0.0,
                Some(obstruction) => {
                    let direction = capsule
                        .direction()
                        .ok_or(NavError::Invariant("sweep capsule has no direction"))?;
                    length - obstruction.reachable(&capsule.p0, &direction, capsule.radius, length)
                }
            }
        };

        Ok(EvaluatedCandidate {
            point: candidate,
            value: path_value(
                &origin,
                &candidate,
                &destination,
                unreachable,
                self.settings.waypoint_distance_bias,
            ),
            unreachable,
        })
    }

    fn finish_search(&self, token: &RunToken, report: SearchReport, obstruction: &Obstruction) {
        if !token.is_current() {
            return;
        }
        *lock(&self.last_search) = Some(report.clone());
        let Some(best) = report.chosen() else {
            info!(
                "vehicle {}: no viable alternate among {} candidate(s), path blocked",
                self.vehicle_id,
                report.evaluated.len()
            );
            self.move_state.advance(token.id(), PathState::PathBlocked);
            return;
        };

        let waypoint = match self.world.body(obstruction.entity) {
            Some(body) if body.is_movable() && !body.closed => {
                Waypoint::anchored(body.id, best.point - body.center)
            }
            _ => Waypoint::fixed(best.point),
        };
        info!(
            "vehicle {}: alternate waypoint {:?} (value {:.2}, {} evaluated)",
            self.vehicle_id,
            best.point,
            best.value,
            report.evaluated.len()
        );
        let install = WaypointInstall {
            token: token.clone(),
            waypoint,
            value: best.value,
        };
        if self.installs.send(install).is_err() {
            warn!("vehicle {}: pathfinder dropped, waypoint discarded", self.vehicle_id);
        }
    }

    fn rotate_test(&self, token: RunToken, axis: Vec3, ignore_terrain: bool) {
        if !token.is_current() {
            return;
        }
        match self.rotate_checker.test_rotate(&axis, ignore_terrain) {
            Ok(None) => {
                self.rotate_state.advance(token.id(), PathState::NoObstruction);
            }
            Ok(Some(obstruction)) => {
                let entity = obstruction.entity;
                if !self.rotate_obstruction.set(token.id(), Some(obstruction)) {
                    return;
                }
                info!(
                    "vehicle {}: rotation about {:?} obstructed by {}",
                    self.vehicle_id, axis, entity
                );
                self.rotate_state.advance(token.id(), PathState::PathBlocked);
            }
            Err(e) => e.log("rotate test"),
        }
    }
}

/// Fast then, only if needed, slow test.
fn run_test(session: &mut PathTestSession<'_>, query: &PathQuery) -> Result<Option<Obstruction>> {
    if session.test_fast(query)? {
        return Ok(None);
    }
    session.test_slow()
}

struct MoveRun {
    token: RunToken,
    /// The request of the latest call, not of the one that began the run.
    request: PathRequest,
    /// Destination the planet check was last started for.
    planet_target: Vec3,
    last_test_tick: Option<u64>,
    blocked_since: Option<u64>,
    planet_handled: bool,
}

struct RotateRun {
    token: RunToken,
    axis: Vec3,
    ignore_terrain: bool,
    last_test_tick: Option<u64>,
}

/// Path and rotation state machines of one vehicle.
pub struct Pathfinder {
    core: Arc<Core>,
    planet: PlanetChecker,
    installs: Receiver<WaypointInstall>,
    run: Option<MoveRun>,
    rotate: Option<RotateRun>,
}

impl Pathfinder {
    pub fn new(
        vehicle_id: EntityId,
        world: Arc<dyn World>,
        profile: Arc<SpatialProfile>,
        settings: Arc<NavSettings>,
        executor: Arc<dyn Executor>,
        planet_queue: Arc<PlanetWorkQueue>,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let core = Core {
            vehicle_id,
            path_checker: PathChecker::new(
                vehicle_id,
                Arc::clone(&world),
                Arc::clone(&profile),
                Arc::clone(&settings),
            ),
            rotate_checker: RotateChecker::new(
                vehicle_id,
                Arc::clone(&world),
                Arc::clone(&profile),
                Arc::clone(&settings),
            ),
            queues: TaskQueues::new(executor, settings.high_queue_capacity),
            runs: RunCounter::new(),
            rotate_runs: RunCounter::new(),
            move_state: SharedPathState::new(),
            rotate_state: SharedPathState::new(),
            speed_cap: RunSlot::new(f32::INFINITY),
            move_obstruction: RunSlot::new(None),
            rotate_obstruction: RunSlot::new(None),
            search: Mutex::new(None),
            last_search: Mutex::new(None),
            installs: sender,
            world: Arc::clone(&world),
            settings: Arc::clone(&settings),
        };
        Self {
            planet: PlanetChecker::new(vehicle_id, world, profile, settings, planet_queue),
            core: Arc::new(core),
            installs: receiver,
            run: None,
            rotate: None,
        }
    }

    pub fn vehicle_id(&self) -> EntityId {
        self.core.vehicle_id
    }

    /// Test the path for `request`, starting a new run if needed. Results are
    /// published asynchronously; poll [`Self::can_move`].
    pub fn test_path(&mut self, snapshot: &VehicleSnapshot, request: &PathRequest) -> Result<()> {
        let settings = Arc::clone(&self.core.settings);
        let tick = self.core.world.tick();

        let retry_due = self.run.as_ref().is_some_and(|run| {
            run.blocked_since
                .is_some_and(|since| tick.saturating_sub(since) >= settings.blocked_retry_ticks)
        });
        let new_run = match &self.run {
            None => true,
            Some(run) => {
                retry_due || run.request.differs_from(request, settings.destination_change_tolerance)
            }
        };
        if new_run {
            self.begin_run(request)?;
        }
        let Some(run) = self.run.as_mut() else {
            return Err(NavError::Invariant("path run missing after it began"));
        };
        run.request = request.clone();

        if !request.ignore_terrain
            && !run.planet_handled
            && (request.destination - run.planet_target).norm() > settings.destination_change_tolerance
            && !self.planet.status().is_running()
        {
            debug!(
                "vehicle {}: destination drifted, restarting planet check",
                self.core.vehicle_id
            );
            run.planet_target = request.destination;
            self.planet.start(&(request.destination - request.nav_block))?;
        }

        if !run.planet_handled {
            if let Some(obstruction) = planet_obstruction(&self.planet.status()) {
                run.planet_handled = true;
                self.core.on_obstruction(&run.token, request, obstruction);
            }
        }

        match self.core.move_state.get() {
            PathState::Searching => return Ok(()),
            PathState::PathBlocked => {
                run.blocked_since.get_or_insert(tick);
                return Ok(());
            }
            PathState::NotRunning | PathState::NoObstruction => {}
        }
        if run
            .last_test_tick
            .is_some_and(|last| tick.saturating_sub(last) < settings.path_test_interval_ticks)
        {
            return Ok(());
        }
        run.last_test_tick = Some(tick);

        let (token, req) = (run.token.clone(), request.clone());
        self.core.push(Priority::High, "direct path test", move |core| {
            core.direct_test(token, req)
        });

        let speed = snapshot.linear_velocity.norm();
        if speed > settings.look_ahead_min_speed {
            let distance = look_ahead_distance(
                speed,
                settings.look_ahead_seconds,
                settings.look_ahead_distance,
            )
            .min((request.destination - request.nav_block).norm());
            if distance > DIST_EPS {
                let (token, req, velocity) =
                    (run.token.clone(), request.clone(), snapshot.linear_velocity);
                self.core.push(Priority::High, "velocity path test", move |core| {
                    core.velocity_test(token, req, velocity, distance)
                });
            }
        }
        self.core.queues.run_item();
        Ok(())
    }

    fn begin_run(&mut self, request: &PathRequest) -> Result<()> {
        self.core.queues.clear();
        let token = self.core.runs.begin();
        self.core.reset_move(token.id());
        self.planet.stop();
        info!(
            "vehicle {}: run {} toward {:?}",
            self.core.vehicle_id,
            token.id(),
            request.destination
        );
        self.run = Some(MoveRun {
            token,
            request: request.clone(),
            planet_target: request.destination,
            last_test_tick: None,
            blocked_since: None,
            planet_handled: false,
        });
        if !request.ignore_terrain {
            self.planet.start(&(request.destination - request.nav_block))?;
        }
        Ok(())
    }

    /// Test rotating about `world_axis`. A zero axis needs no test.
    pub fn test_rotate(&mut self, world_axis: &Vec3, ignore_terrain: bool) -> Result<()> {
        let Some(axis) = world_axis.try_normalize(DIST_EPS) else {
            return Ok(());
        };
        let tick = self.core.world.tick();
        let interval = self.core.settings.rotate_test_interval_ticks;
        let due = |run: &RotateRun| {
            run.last_test_tick
                .is_none_or(|last| tick.saturating_sub(last) >= interval)
        };

        let new_run = match &self.rotate {
            None => true,
            Some(run) => {
                run.axis.dot(&axis).abs() < SAME_AXIS_COS
                    || run.ignore_terrain != ignore_terrain
                    || (self.core.rotate_state.get() == PathState::PathBlocked && due(run))
            }
        };
        if new_run {
            let token = self.core.rotate_runs.begin();
            self.core.reset_rotate(token.id());
            self.rotate = Some(RotateRun {
                token,
                axis,
                ignore_terrain,
                last_test_tick: None,
            });
        }
        let Some(run) = self.rotate.as_mut() else {
            return Err(NavError::Invariant("rotate run missing after it began"));
        };
        if !due(run) {
            return Ok(());
        }
        run.last_test_tick = Some(tick);

        let token = run.token.clone();
        self.core.push(Priority::High, "rotate test", move |core| {
            core.rotate_test(token, axis, ignore_terrain)
        });
        self.core.queues.run_item();
        Ok(())
    }

    /// Installs sent by searches of the current run; older ones are discarded.
    pub fn take_installs(&self) -> Vec<WaypointInstall> {
        self.installs
            .try_iter()
            .filter(|install| install.token.is_current())
            .collect()
    }

    /// Abandon every run and queued job.
    pub fn invalidate(&mut self) {
        self.core.queues.clear();
        self.core.reset_move(self.core.runs.begin().id());
        self.core.reset_rotate(self.core.rotate_runs.begin().id());
        self.planet.stop();
        self.run = None;
        self.rotate = None;
        self.installs.try_iter().for_each(drop);
    }

    pub fn can_move(&self) -> bool {
        self.core.move_state.get() == PathState::NoObstruction
    }

    pub fn can_rotate(&self) -> bool {
        self.core.rotate_state.get() == PathState::NoObstruction
    }

    pub fn move_state(&self) -> PathState {
        self.core.move_state.get()
    }

    pub fn rotate_state(&self) -> PathState {
        self.core.rotate_state.get()
    }

    /// The last body found blocking the path.
    pub fn move_obstruction(&self) -> Option<Obstruction> {
        self.core.move_obstruction.get()
    }

    /// The last body found blocking a rotation.
    pub fn rotate_obstruction(&self) -> Option<Obstruction> {
        self.core.rotate_obstruction.get()
    }

    /// Speed limit imposed by the look-ahead test, if any.
    pub fn speed_cap(&self) -> Option<f32> {
        let cap = self.core.speed_cap.get();
        cap.is_finite().then_some(cap)
    }

    /// Report of the most recently finished alternate search.
    pub fn last_search(&self) -> Option<SearchReport> {
        lock(&self.core.last_search).clone()
    }

    pub fn planet_status(&self) -> PlanetStatus {
        self.planet.status()
    }

    /// `(high, low)` queued job counts.
    pub fn pending_jobs(&self) -> (usize, usize) {
        self.core.queues.pending()
    }

    /// Nothing queued and nothing running.
    pub fn is_idle(&self) -> bool {
        self.core.queues.is_idle()
    }

    /// Id of the current path run.
    pub fn run_id(&self) -> u64 {
        self.core.runs.id()
    }
}

impl Drop for Pathfinder {
    fn drop(&mut self) {
        self.core.queues.clear();
        self.core.runs.begin();
        self.core.rotate_runs.begin();
        self.planet.stop();
    }
}

fn planet_obstruction(status: &PlanetStatus) -> Option<Obstruction> {
    if !status.is_blocked() {
        return None;
    }
    let kind = if status.flags.has(PlanetFlag::BlockedGravity) {
        ObstructionKind::Gravity
    } else {
        ObstructionKind::Voxel
    };
    Some(Obstruction {
        entity: status.planet?,
        kind,
        point: status.obstruction_point?,
        velocity: Vec3::zeros(),
    })
}
