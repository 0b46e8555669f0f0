//! Budgeted background test of a straight path against the nearest planet.
//!
//! Voxel raycasts are too expensive to run for every vehicle every tick, so all
//! vehicles share one [`PlanetWorkQueue`] that the simulation thread drains for a
//! fixed wall-clock slice per tick. A check is seeded with one raycast per
//! silhouette cell; each queued step casts one ray and either flags the path as
//! blocked or queues the next ray. When the destination lies outside the planet,
//! a single gravity sample at the path's closest approach runs first.
//!
//! Results are published in a [`PlanetStatus`]; callers poll it. [`PlanetChecker::stop`]
//! invalidates outstanding steps through a generation counter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info};
use shared::collision::narrow_phase::closest_point_on_segment;
use shared::{BitmaskFlags, Vec3};

use crate::error::{NavError, Result};
use crate::host::{EntityId, VoxelBody, World};
use crate::settings::NavSettings;
use crate::spatial_profile::SpatialProfile;

shared::define_bitmask_flags!(PlanetFlag, u8, {
    Running,
    Clear,
    BlockedPath,
    BlockedGravity,
});

/// Deferred unit of planet work.
pub type PlanetWork = Box<dyn FnOnce() + Send + 'static>;

/// The global FIFO shared by every vehicle's planet checker.
#[derive(Default)]
pub struct PlanetWorkQueue {
    items: Mutex<VecDeque<PlanetWork>>,
}

impl PlanetWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, work: PlanetWork) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(work);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run queued items in order until the queue is empty or `slice` has elapsed.
    /// Items queued by running items are picked up in the same drain. Returns the
    /// number of items run.
    pub fn drain_for(&self, slice: Duration) -> usize {
        let started = Instant::now();
        let mut ran = 0;
        loop {
            // Never hold the lock while running an item; items requeue themselves.
            let next = self
                .items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(work) = next else {
                break;
            };
            work();
            ran += 1;
            if started.elapsed() >= slice {
                break;
            }
        }
        ran
    }
}

/// Published result of the latest planet check.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanetStatus {
    pub flags: BitmaskFlags<u8>,
    pub planet: Option<EntityId>,
    /// Surface hit, or the closest-approach point for a gravity block.
    pub obstruction_point: Option<Vec3>,
}

impl PlanetStatus {
    pub fn is_running(&self) -> bool {
        self.flags.has(PlanetFlag::Running)
    }

    pub fn is_clear(&self) -> bool {
        self.flags.has(PlanetFlag::Clear)
    }

    pub fn is_blocked(&self) -> bool {
        self.flags
            .has_any(&[PlanetFlag::BlockedPath, PlanetFlag::BlockedGravity])
    }
}

struct Shared {
    generation: AtomicU64,
    status: Mutex<PlanetStatus>,
}

impl Shared {
    fn publish(&self, generation: u64, update: impl FnOnce(&mut PlanetStatus)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) == generation {
            update(&mut status);
        }
    }

    fn finish(&self, generation: u64, flag: PlanetFlag, point: Option<Vec3>) {
        self.publish(generation, |status| {
            status.flags.remove(PlanetFlag::Running);
            status.flags.add(flag);
            status.obstruction_point = point;
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }
}

/// One pending raycast sequence.
struct RaySteps {
    shared: Arc<Shared>,
    queue: Arc<PlanetWorkQueue>,
    planet: Arc<dyn VoxelBody>,
    rays: Arc<Vec<(Vec3, Vec3)>>,
    generation: u64,
}

impl RaySteps {
    fn enqueue(self, index: usize) {
        let queue = Arc::clone(&self.queue);
        queue.push(Box::new(move || self.step(index)));
    }

    fn step(self, index: usize) {
        if !self.shared.is_current(self.generation) {
            return;
        }
        let Some((from, to)) = self.rays.get(index).copied() else {
            self.shared.finish(self.generation, PlanetFlag::Clear, None);
            return;
        };
        match self.planet.raycast_surface(&from, &to) {
            Some(hit) => {
                info!("planet {} blocks path at {:?}", self.planet.id(), hit);
                self.shared
                    .finish(self.generation, PlanetFlag::BlockedPath, Some(hit));
            }
            None => self.enqueue(index + 1),
        }
    }
}

/// Per-vehicle planet checker.
pub struct PlanetChecker {
    vehicle_id: EntityId,
    world: Arc<dyn World>,
    profile: Arc<SpatialProfile>,
    settings: Arc<NavSettings>,
    queue: Arc<PlanetWorkQueue>,
    shared: Arc<Shared>,
}

impl PlanetChecker {
    pub fn new(
        vehicle_id: EntityId,
        world: Arc<dyn World>,
        profile: Arc<SpatialProfile>,
        settings: Arc<NavSettings>,
        queue: Arc<PlanetWorkQueue>,
    ) -> Self {
        Self {
            vehicle_id,
            world,
            profile,
            settings,
            queue,
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                status: Mutex::new(PlanetStatus::default()),
            }),
        }
    }

    pub fn status(&self) -> PlanetStatus {
        self.shared
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel outstanding work and clear the status.
    pub fn stop(&self) {
        let mut status = self.shared.status.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        *status = PlanetStatus::default();
    }

    /// Begin checking a move of the vehicle by `displacement` from its current pose.
    pub fn start(&self, displacement: &Vec3) -> Result<()> {
        let snapshot = self
            .world
            .vehicle(self.vehicle_id)
            .and_then(|v| v.snapshot())
            .ok_or(NavError::VehicleClosed(self.vehicle_id))?;

        let generation = {
            let mut status = self.shared.status.lock().unwrap_or_else(PoisonError::into_inner);
            let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *status = PlanetStatus {
                flags: BitmaskFlags::of(&[PlanetFlag::Running]),
                planet: None,
                obstruction_point: None,
            };
            generation
        };

        let start = snapshot.center_of_mass;
        let end = start + displacement;
        let Some(planet) = self.world.nearest_planet(&start) else {
            self.shared.finish(generation, PlanetFlag::Clear, None);
            return Ok(());
        };
        self.shared
            .publish(generation, |status| status.planet = Some(planet.id()));

        let center = planet.center();
        let radius = planet.bounding_radius();
        let closest = closest_point_on_segment(&start, &end, &center);
        let enters = (closest - center).norm() <= radius + snapshot.bounding_radius();
        let destination_outside = (end - center).norm() > radius;

        let silhouette = self
            .profile
            .silhouette(&snapshot.pose.inverse_transform_vector(displacement));
        let rays = match (&silhouette, enters) {
            (Some(silhouette), true) => silhouette
                .world_cells(&snapshot.pose)
                .map(|from| (from, from + displacement))
                .collect(),
            _ => Vec::new(),
        };
        debug!(
            "vehicle {}: planet check against {} with {} ray(s)",
            self.vehicle_id,
            planet.id(),
            rays.len()
        );

        let steps = RaySteps {
            shared: Arc::clone(&self.shared),
            queue: Arc::clone(&self.queue),
            planet: Arc::clone(&planet),
            rays: Arc::new(rays),
            generation,
        };

        if destination_outside {
            let threshold = self.settings.planet_gravity_threshold;
            let shared = Arc::clone(&self.shared);
            self.queue.push(Box::new(move || {
                if !shared.is_current(generation) {
                    return;
                }
                let peak = planet.gravity_at(&closest);
                let ends = planet.gravity_at(&start).max(planet.gravity_at(&end));
                if peak > ends + threshold {
                    info!(
                        "planet {} gravity {:.2}g blocks path (endpoints {:.2}g)",
                        planet.id(),
                        peak,
                        ends
                    );
                    shared.finish(generation, PlanetFlag::BlockedGravity, Some(closest));
                } else {
                    steps.enqueue(0);
                }
            }));
        } else {
            steps.enqueue(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Vehicle;
    use crate::sandbox::{SandboxVehicle, SandboxWorld, SphericalPlanet};
    use approx::assert_relative_eq;
    use shared::Transform;
    use std::sync::atomic::AtomicUsize;

    const SLICE: Duration = Duration::from_secs(5);

    fn setup(at: Vec3) -> (Arc<SandboxWorld>, Arc<PlanetWorkQueue>, PlanetChecker) {
        let world = Arc::new(SandboxWorld::new());
        world.add_planet(SphericalPlanet::new(100, Vec3::zeros(), 1000.0));
        let me = SandboxVehicle::cube(1, 3, 2.5, 50_000.0);
        me.set_pose(Transform::from_translation(at));
        world.add_vehicle(Arc::clone(&me));
        let queue = Arc::new(PlanetWorkQueue::new());
        let checker = PlanetChecker::new(
            1,
            world.clone(),
            Arc::new(SpatialProfile::new(me.cells())),
            Arc::new(NavSettings::default()),
            Arc::clone(&queue),
        );
        (world, queue, checker)
    }

    #[test]
    fn queue_runs_requeued_items_within_one_drain() {
        let queue = Arc::new(PlanetWorkQueue::new());
        let count = Arc::new(AtomicUsize::new(0));
        let (q, c) = (Arc::clone(&queue), Arc::clone(&count));
        queue.push(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c2 = Arc::clone(&c);
            q.push(Box::new(move || {
                c2.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(queue.drain_for(SLICE), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_slice_still_makes_progress() {
        let queue = PlanetWorkQueue::new();
        queue.push(Box::new(|| {}));
        queue.push(Box::new(|| {}));
        assert_eq!(queue.drain_for(Duration::ZERO), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn skirting_a_gravity_well_is_blocked_at_closest_approach() {
        let (_world, queue, checker) = setup(Vec3::new(-3000.0, 1200.0, 0.0));
        checker.start(&Vec3::new(6000.0, 0.0, 0.0)).unwrap();
        assert!(checker.status().is_running());
        queue.drain_for(SLICE);

        let status = checker.status();
        assert!(status.flags.has(PlanetFlag::BlockedGravity));
        assert!(!status.is_running());
        assert_eq!(status.planet, Some(100));
        assert_relative_eq!(
            status.obstruction_point.unwrap(),
            Vec3::new(0.0, 1200.0, 0.0),
            epsilon = 1.0e-2
        );
    }

    #[test]
    fn diving_into_the_surface_is_blocked() {
        let (_world, queue, checker) = setup(Vec3::new(0.0, 1500.0, 0.0));
        checker.start(&Vec3::new(0.0, -1000.0, 0.0)).unwrap();
        queue.drain_for(SLICE);

        let status = checker.status();
        assert!(status.flags.has(PlanetFlag::BlockedPath));
        let hit = status.obstruction_point.unwrap();
        assert_relative_eq!(hit.norm(), 1000.0, epsilon = 0.5);
    }

    #[test]
    fn path_away_from_the_planet_is_clear() {
        let (_world, queue, checker) = setup(Vec3::new(0.0, 1500.0, 0.0));
        checker.start(&Vec3::new(0.0, 500.0, 0.0)).unwrap();
        queue.drain_for(SLICE);
        let status = checker.status();
        assert!(status.is_clear());
        assert!(!status.is_running());
    }

    #[test]
    fn stop_discards_outstanding_steps() {
        let (_world, queue, checker) = setup(Vec3::new(0.0, 1500.0, 0.0));
        checker.start(&Vec3::new(0.0, -1000.0, 0.0)).unwrap();
        checker.stop();
        queue.drain_for(SLICE);
        let status = checker.status();
        assert!(status.flags.is_empty());
        assert!(!status.is_blocked());
    }
}
