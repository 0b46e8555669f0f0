//! Per-vehicle autopilot and the context that wires it to the world.

use std::sync::Arc;

use log::info;
use shared::{Quat, Vec3};

use crate::error::{NavError, Result};
use crate::host::{ControlSurface, EntityId, Vehicle, World};
use crate::mover::Mover;
use crate::nav_set::{Destination, Facing, NavParams, NavSet};
use crate::pathfinder::Pathfinder;
use crate::planet_checker::PlanetWorkQueue;
use crate::scheduler::{Executor, ThreadPools};
use crate::settings::NavSettings;
use crate::spatial_profile::SpatialProfile;
use crate::stopwatch::LogStopwatch;

/// Ticks between sampled timing logs.
const SAMPLE_EVERY: u64 = 600;

/// Shared by every autopilot in one world: settings, background executor and the
/// planet work queue drained at the end of each tick.
pub struct AutopilotContext {
    settings: Arc<NavSettings>,
    world: Arc<dyn World>,
    executor: Arc<dyn Executor>,
    planet_queue: Arc<PlanetWorkQueue>,
}

impl AutopilotContext {
    /// Context backed by two rayon pools sized from `settings`.
    pub fn new(world: Arc<dyn World>, settings: NavSettings) -> Result<Self> {
        settings.validate()?;
        let executor = Arc::new(ThreadPools::new(&settings)?);
        Self::with_executor(world, settings, executor)
    }

    pub fn with_executor(
        world: Arc<dyn World>,
        settings: NavSettings,
        executor: Arc<dyn Executor>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
            world,
            executor,
            planet_queue: Arc::new(PlanetWorkQueue::new()),
        })
    }

    pub fn settings(&self) -> &NavSettings {
        &self.settings
    }

    pub fn planet_queue(&self) -> &Arc<PlanetWorkQueue> {
        &self.planet_queue
    }

    /// Run queued planet work for one time slice. Simulation thread, once per tick.
    pub fn end_tick(&self) -> usize {
        let mut sw = LogStopwatch::new("planet queue", false, SAMPLE_EVERY);
        sw.span("drain");
        self.planet_queue.drain_for(self.settings.planet_time_slice)
    }

    /// A new autopilot for `vehicle_id`.
    pub fn autopilot(&self, vehicle_id: EntityId) -> Result<Autopilot> {
        let vehicle = self
            .world
            .vehicle(vehicle_id)
            .ok_or(NavError::VehicleClosed(vehicle_id))?;
        let pathfinder = Pathfinder::new(
            vehicle_id,
            Arc::clone(&self.world),
            Arc::new(SpatialProfile::new(vehicle.cells())),
            Arc::clone(&self.settings),
            Arc::clone(&self.executor),
            Arc::clone(&self.planet_queue),
        );
        Ok(Autopilot {
            mover: Mover::new(Arc::clone(&vehicle), pathfinder, Arc::clone(&self.settings)),
            vehicle,
            world: Arc::clone(&self.world),
            settings: Arc::clone(&self.settings),
            nav_set: NavSet::new(),
            nav_block_offset: Vec3::zeros(),
            generation_seen: 0,
            last_update: None,
            status: AutopilotStatus::Idle,
        })
    }
}

/// Outcome of the last control period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutopilotStatus {
    /// Nothing to fly to.
    Idle,
    /// Flying toward a waypoint or the destination.
    Moving,
    /// Waiting on a path test or search, or the path is blocked.
    Holding,
    /// Within the destination radius of the destination.
    Arrived,
}

pub struct Autopilot {
    vehicle: Arc<dyn Vehicle>,
    world: Arc<dyn World>,
    settings: Arc<NavSettings>,
    mover: Mover,
    nav_set: NavSet,
    /// Navigation block in vehicle-local coordinates.
    nav_block_offset: Vec3,
    generation_seen: u64,
    last_update: Option<u64>,
    status: AutopilotStatus,
}

impl Autopilot {
    pub fn vehicle_id(&self) -> EntityId {
        self.vehicle.id()
    }

    pub fn nav_set(&self) -> &NavSet {
        &self.nav_set
    }

    pub fn mover(&self) -> &Mover {
        &self.mover
    }

    pub fn pathfinder(&self) -> &Pathfinder {
        self.mover.pathfinder()
    }

    pub fn status(&self) -> AutopilotStatus {
        self.status
    }

    pub fn set_nav_block_offset(&mut self, offset: Vec3) {
        self.nav_block_offset = offset;
    }

    pub fn set_destination(&mut self, destination: Destination, params: NavParams) -> Result<()> {
        self.nav_set.set_destination(destination, params)
    }

    pub fn set_facing(&mut self, facing: Option<Facing>) {
        self.nav_set.set_facing(facing);
    }

    /// Drop all navigation and stop the vehicle.
    pub fn stop(&mut self, surface: &mut dyn ControlSurface) {
        self.nav_set.clear();
        self.generation_seen = self.nav_set.generation();
        self.mover.pathfinder_mut().invalidate();
        self.mover.stop_move();
        self.mover.stop_rotate();
        surface.set_dampers(true);
        surface.stop();
        self.status = AutopilotStatus::Idle;
    }

    /// A facing that points the strongest thrusters along `travel` (world),
    /// keeping the current up as the reference.
    pub fn transit_facing(&self, travel: &Vec3) -> Option<Facing> {
        let travel = travel.try_normalize(shared::collision::settings::DIST_EPS)?;
        let snapshot = self.vehicle.snapshot()?;
        let up = snapshot.pose.up();
        let up = if travel.cross(&up).norm() < 1.0e-3 {
            snapshot.pose.forward()
        } else {
            up
        };
        let wanted = Quat::face_towards(&-travel, &up) * self.mover.thrust_profile().flight_frame().inverse();
        Some(Facing {
            direction: wanted * -Vec3::z(),
            up: Some(wanted * Vec3::y()),
        })
    }

    /// One control step. Simulation thread; does nothing until a control period
    /// has passed since the last step.
    pub fn update(&mut self, surface: &mut dyn ControlSurface) -> Result<AutopilotStatus> {
        let tick = self.world.tick();
        if let Some(last) = self.last_update {
            if tick.saturating_sub(last) < self.settings.control_period_ticks {
                return Ok(self.status);
            }
        }
        self.last_update = Some(tick);

        let id = self.vehicle.id();
        let snapshot = self.vehicle.snapshot().ok_or(NavError::VehicleClosed(id))?;
        let mut sw = LogStopwatch::new(format!("autopilot {id}"), false, SAMPLE_EVERY);

        sw.span("installs");
        for install in self.mover.pathfinder().take_installs() {
            info!(
                "vehicle {id}: installing waypoint {:?} (value {:.1}, run {})",
                install.waypoint,
                install.value,
                install.run()
            );
            self.nav_set.push_waypoint(install.waypoint);
        }
        if self.nav_set.generation() != self.generation_seen {
            self.generation_seen = self.nav_set.generation();
            self.mover.pathfinder_mut().invalidate();
        }

        sw.span("calc");
        self.mover.update_profiles(&snapshot, tick);
        let nav_block = snapshot.pose.transform_point(&self.nav_block_offset);
        let params = self.nav_set.params().clone();
        let target = self.nav_set.current_target(&*self.world, &nav_block);
        self.status = match &target {
            None => {
                self.mover.stop_move();
                AutopilotStatus::Idle
            }
            Some(target) => {
                self.mover.calc_move(
                    &snapshot,
                    &nav_block,
                    &target.position,
                    &target.velocity,
                    &params,
                )?;
                if self.settings.collision_avoidance && !self.mover.pathfinder().can_move() {
                    AutopilotStatus::Holding
                } else if !target.is_waypoint
                    && (target.position - nav_block).norm() <= params.destination_radius
                {
                    AutopilotStatus::Arrived
                } else {
                    AutopilotStatus::Moving
                }
            }
        };
        match self.nav_set.facing().cloned() {
            Some(facing) => self.mover.calc_rotate(
                &snapshot,
                &facing.direction,
                facing.up.as_ref(),
                params.ignore_terrain,
            )?,
            None => self.mover.stop_rotate(),
        }

        sw.span("command");
        self.mover.move_and_rotate(surface, &snapshot);
        Ok(self.status)
    }
}
