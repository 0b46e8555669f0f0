//! Two-phase straight-line path test.
//!
//! Phase one ([`PathTestSession::test_fast`]) is cheap: build the sweep capsule,
//! gather bodies whose boxes overlap the swept box, drop the ones that can never
//! obstruct, and pre-filter the rest with a capsule-vs-box test. Only if something
//! survives does the caller pay for phase two ([`PathTestSession::test_slow`]),
//! which runs the exact test per candidate, nearest first:
//! - voxel terrain: a sphere walk along the capsule against the surface,
//! - vehicles: the projected-cell rejection test,
//! - anything else: capsule vs bounding sphere.
//!
//! Only one test runs per vehicle at a time. [`PathChecker::try_begin`] never
//! blocks; a caller that loses the race requeues its work.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use log::debug;
use shared::collision::broad::{aabb_distance_sq, swept_aabb};
use shared::collision::narrow_phase::{capsule_closest_point, closest_point_on_segment};
use shared::collision::settings::DIST_EPS;
use shared::collision::{
    capsule_intersects_aabb, capsule_intersects_sphere, sphere_steps, world_aabb,
};
use shared::{Capsule, Transform, Vec3, first_contact};

use crate::error::{NavError, Result};
use crate::host::{BodyKind, BodySnapshot, EntityId, World};
use crate::settings::NavSettings;
use crate::spatial_profile::{Silhouette, SpatialProfile};
use crate::vehicle::VehicleSnapshot;

/// What kind of thing blocked a test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObstructionKind {
    Voxel,
    Vehicle,
    Other,
    /// A planet's gravity well rather than its surface.
    Gravity,
}

/// The first thing found in the way of a path or rotation.
#[derive(Clone, Debug, PartialEq)]
pub struct Obstruction {
    pub entity: EntityId,
    pub kind: ObstructionKind,
    /// World point of contact.
    pub point: Vec3,
    /// Velocity of the obstructing body when it was found.
    pub velocity: Vec3,
}

impl Obstruction {
    /// How far a capsule can travel from `p0` along unit `direction` before its
    /// surface reaches the contact point, clamped to `[0, length]`.
    pub fn reachable(&self, p0: &Vec3, direction: &Vec3, radius: f32, length: f32) -> f32 {
        ((self.point - p0).dot(direction) - radius).clamp(0.0, length.max(0.0))
    }
}

/// Which bodies can never obstruct the controlled vehicle.
pub(crate) struct ObstructionFilter {
    pub group: Vec<EntityId>,
    pub ignore_entity: Option<EntityId>,
    pub ignore_terrain: bool,
    pub min_mass: f32,
}

impl ObstructionFilter {
    pub fn new(
        world: &dyn World,
        vehicle_id: EntityId,
        ignore_entity: Option<EntityId>,
        ignore_terrain: bool,
        min_mass: f32,
    ) -> Self {
        let mut group = world.attached_group(vehicle_id);
        if !group.contains(&vehicle_id) {
            group.push(vehicle_id);
        }
        Self {
            group,
            ignore_entity,
            ignore_terrain,
            min_mass,
        }
    }

    pub fn admits(&self, body: &BodySnapshot) -> bool {
        if body.closed || self.group.contains(&body.id) || self.ignore_entity == Some(body.id) {
            return false;
        }
        match body.kind {
            BodyKind::Voxel { .. } => !self.ignore_terrain,
            _ => body.is_static || body.mass >= self.min_mass,
        }
    }
}

/// One straight-line path test request.
///
/// The vehicle is first moved by `start_offset` from its current pose, then swept
/// by `displacement`. A direct test has a zero offset; an alternate leg starting at
/// a candidate waypoint has a non-zero one.
#[derive(Clone, Debug, PartialEq)]
pub struct PathQuery {
    pub start_offset: Vec3,
    pub displacement: Vec3,
    pub ignore_terrain: bool,
    pub ignore_entity: Option<EntityId>,
    pub landing: bool,
}

impl PathQuery {
    /// Sweep the navigation block from `from` to `to`, given it is at `nav_block` now.
    pub fn between(nav_block: &Vec3, from: &Vec3, to: &Vec3) -> Self {
        Self {
            start_offset: from - nav_block,
            displacement: to - from,
            ignore_terrain: false,
            ignore_entity: None,
            landing: false,
        }
    }

    #[must_use]
    pub fn ignoring_terrain(mut self, ignore: bool) -> Self {
        self.ignore_terrain = ignore;
        self
    }

    #[must_use]
    pub fn ignoring(mut self, entity: Option<EntityId>) -> Self {
        self.ignore_entity = entity;
        self
    }

    #[must_use]
    pub fn landing(mut self, landing: bool) -> Self {
        self.landing = landing;
        self
    }
}

/// State carried from `test_fast` to `test_slow`.
struct Prepared {
    pose: Transform,
    capsule: Capsule,
    direction: Vec3,
    silhouette: Arc<Silhouette>,
    cell_size: f32,
    candidates: Vec<BodySnapshot>,
}

/// Per-vehicle path tester.
pub struct PathChecker {
    vehicle_id: EntityId,
    world: Arc<dyn World>,
    profile: Arc<SpatialProfile>,
    settings: Arc<NavSettings>,
    testing: Mutex<()>,
}

impl PathChecker {
    pub fn new(
        vehicle_id: EntityId,
        world: Arc<dyn World>,
        profile: Arc<SpatialProfile>,
        settings: Arc<NavSettings>,
    ) -> Self {
        Self {
            vehicle_id,
            world,
            profile,
            settings,
            testing: Mutex::new(()),
        }
    }

    /// Take the exclusive "currently testing" lock, or `None` if another test holds it.
    pub fn try_begin(&self) -> Option<PathTestSession<'_>> {
        let guard = match self.testing.try_lock() {
            Ok(guard) => guard,
            // The guarded state is `()`, nothing to repair after a panic.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(PathTestSession {
            checker: self,
            _guard: guard,
            prepared: None,
        })
    }

    fn snapshot(&self) -> Result<VehicleSnapshot> {
        self.world
            .vehicle(self.vehicle_id)
            .and_then(|v| v.snapshot())
            .ok_or(NavError::VehicleClosed(self.vehicle_id))
    }
}

/// An in-progress test holding the checker's lock.
pub struct PathTestSession<'a> {
    checker: &'a PathChecker,
    _guard: MutexGuard<'a, ()>,
    prepared: Option<Prepared>,
}

impl PathTestSession<'_> {
    /// Cheap phase. Returns true if the path is certainly clear; false means
    /// [`Self::test_slow`] must decide.
    pub fn test_fast(&mut self, query: &PathQuery) -> Result<bool> {
        self.prepared = None;
        let checker = self.checker;
        let snapshot = checker.snapshot()?;
        let pose = snapshot.pose.translated(&query.start_offset);

        let Some((capsule, silhouette)) =
            checker
                .profile
                .capsule(&pose, &query.displacement, query.landing)
        else {
            return Ok(true);
        };
        let direction = query
            .displacement
            .try_normalize(DIST_EPS)
            .ok_or(NavError::Invariant("sweep capsule built for a zero displacement"))?;

        let start_box = world_aabb(&snapshot.local_aabb, &pose);
        let swept = swept_aabb(&start_box, &query.displacement);

        let filter = ObstructionFilter::new(
            checker.world.as_ref(),
            checker.vehicle_id,
            query.ignore_entity,
            query.ignore_terrain,
            checker.settings.min_obstruction_mass,
        );
        let mut candidates = checker
            .world
            .bodies_in_aabb(&swept)
            .into_iter()
            .filter(|b| filter.admits(b))
            .filter(|b| capsule_intersects_aabb(&capsule, &b.aabb))
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return Ok(true);
        }
        candidates.sort_by(|a, b| {
            aabb_distance_sq(&a.aabb, &capsule.p0).total_cmp(&aabb_distance_sq(&b.aabb, &capsule.p0))
        });
        debug!(
            "vehicle {}: {} candidate(s) after fast path test",
            checker.vehicle_id,
            candidates.len()
        );

        self.prepared = Some(Prepared {
            pose,
            capsule,
            direction,
            silhouette,
            cell_size: snapshot.cell_size,
            candidates,
        });
        Ok(false)
    }

    /// The sweep capsule of the last fast test, if it produced one.
    pub fn capsule(&self) -> Option<&Capsule> {
        self.prepared.as_ref().map(|p| &p.capsule)
    }

    /// Exact phase over the candidates left by the last `test_fast`. Returns the
    /// nearest obstruction, or `None` if the path is clear.
    pub fn test_slow(&mut self) -> Result<Option<Obstruction>> {
        let Some(prepared) = self.prepared.take() else {
            return Ok(None);
        };
        let world = self.checker.world.as_ref();

        for body in &prepared.candidates {
            let hit = match body.kind {
                BodyKind::Voxel { .. } => voxel_hit(world, body, &prepared.capsule),
                BodyKind::Vehicle => self.vehicle_hit(body, &prepared),
                BodyKind::Character | BodyKind::Floating => {
                    Ok(sphere_hit(&prepared.capsule, &body.center, body.radius))
                }
            };
            let hit = match hit {
                // Gone since the broad phase; it no longer obstructs anything.
                Err(NavError::EntityClosed(id)) => {
                    debug!("entity {id} closed during path test");
                    None
                }
                other => other?,
            };
            if let Some(point) = hit {
                let kind = match body.kind {
                    BodyKind::Voxel { .. } => ObstructionKind::Voxel,
                    BodyKind::Vehicle => ObstructionKind::Vehicle,
                    _ => ObstructionKind::Other,
                };
                debug!(
                    "vehicle {}: path obstructed by {} at {:?}",
                    self.checker.vehicle_id, body.id, point
                );
                return Ok(Some(Obstruction {
                    entity: body.id,
                    kind,
                    point,
                    velocity: body.velocity,
                }));
            }
        }
        Ok(None)
    }

    fn vehicle_hit(&self, body: &BodySnapshot, prepared: &Prepared) -> Result<Option<Vec3>> {
        let other = self
            .checker
            .world
            .vehicle(body.id)
            .ok_or(NavError::EntityClosed(body.id))?;
        let other_snapshot = other.snapshot().ok_or(NavError::EntityClosed(body.id))?;

        let direction = prepared.direction;
        let capsule = &prepared.capsule;
        let start = capsule.p0.dot(&direction) - prepared.silhouette.back;
        let end = capsule.p1.dot(&direction) + prepared.silhouette.radius;

        // Slab filter: only cells between our rear now and our front at the end.
        let other_cells = other
            .cells()
            .world_points(&other_snapshot.pose)
            .into_iter()
            .filter(|p| {
                let along = p.dot(&direction);
                along >= start && along <= end
            })
            .collect::<Vec<_>>();
        if other_cells.is_empty() {
            return Ok(None);
        }

        let own_cells = prepared.silhouette.world_cells(&prepared.pose);
        let coarse = prepared.cell_size.max(other_snapshot.cell_size);
        Ok(first_contact(own_cells, other_cells, &direction, coarse))
    }
}

fn voxel_hit(world: &dyn World, body: &BodySnapshot, capsule: &Capsule) -> Result<Option<Vec3>> {
    let voxel = world.voxel(body.id).ok_or(NavError::EntityClosed(body.id))?;
    Ok(sphere_steps(capsule)
        .find(|center| voxel.intersects_sphere(center, capsule.radius))
        .map(|center| voxel.closest_surface_point(&center)))
}

fn sphere_hit(capsule: &Capsule, center: &Vec3, radius: f32) -> Option<Vec3> {
    if !capsule_intersects_sphere(capsule, center, radius) {
        return None;
    }
    let on_axis = capsule_closest_point(capsule, center);
    let toward = on_axis - center;
    Some(match toward.try_normalize(DIST_EPS) {
        Some(n) => center + n * radius,
        None => closest_point_on_segment(&capsule.p0, &capsule.p1, center),
    })
}
