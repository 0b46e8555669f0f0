//! The boundary between the navigation core and the host simulation.
//!
//! The host owns physics, voxel terrain and the entity registry. The core only
//! reads world state through [`World`] and writes exactly one thing back: the
//! command issued through [`ControlSurface`] on the simulation thread.
//!
//! `World`, `VoxelBody` and `Vehicle` are queried from background worker threads
//! and must be `Send + Sync`. Implementations answer from a consistent snapshot
//! and report closed entities instead of panicking.

use std::sync::Arc;

use nalgebra::Vector2;
use shared::collision::broad::sphere_aabb;
use shared::{Aabb, Vec3};

use crate::vehicle::{CellCache, GyroInfo, ThrusterInfo, VehicleSnapshot};

/// Opaque id of any top-level entity in the host world.
pub type EntityId = u64;

/// What kind of thing a body is, which decides how it is tested for obstruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyKind {
    /// Another cell-composed vehicle.
    Vehicle,
    /// Voxel terrain: an asteroid, or a planet when `planet` is set.
    Voxel { planet: bool },
    /// A character or similar small actor.
    Character,
    /// Free-floating debris.
    Floating,
}

/// Broad-phase view of a body: enough to filter and sort candidates.
#[derive(Clone, Debug)]
pub struct BodySnapshot {
    pub id: EntityId,
    pub kind: BodyKind,
    /// World-space bounding box.
    pub aabb: Aabb,
    /// Center of the bounding sphere.
    pub center: Vec3,
    /// Radius of the bounding sphere.
    pub radius: f32,
    pub mass: f32,
    pub velocity: Vec3,
    /// Physics-static bodies obstruct regardless of mass.
    pub is_static: bool,
    pub closed: bool,
}

impl BodySnapshot {
    /// Does this body have a physics representation that a waypoint can follow?
    pub fn is_movable(&self) -> bool {
        !self.is_static && !matches!(self.kind, BodyKind::Voxel { .. })
    }
}

/// Read-only world queries.
pub trait World: Send + Sync {
    /// Current simulation tick.
    fn tick(&self) -> u64;

    /// Top-level bodies whose bounding box overlaps `aabb`.
    fn bodies_in_aabb(&self, aabb: &Aabb) -> Vec<BodySnapshot>;

    /// Top-level bodies whose bounding sphere overlaps the sphere.
    fn bodies_in_sphere(&self, center: &Vec3, radius: f32) -> Vec<BodySnapshot> {
        self.bodies_in_aabb(&sphere_aabb(*center, radius))
            .into_iter()
            .filter(|b| {
                let reach = b.radius + radius;
                (b.center - center).norm_squared() <= reach * reach
            })
            .collect()
    }

    /// Broad-phase view of one body; `None` once it is removed.
    fn body(&self, id: EntityId) -> Option<BodySnapshot>;

    /// The vehicle with this id, if it is one.
    fn vehicle(&self, id: EntityId) -> Option<Arc<dyn Vehicle>>;

    /// The voxel body with this id, if it is one.
    fn voxel(&self, id: EntityId) -> Option<Arc<dyn VoxelBody>>;

    /// Every vehicle physically joined to `id`, including `id` itself.
    fn attached_group(&self, id: EntityId) -> Vec<EntityId>;

    /// The planet whose gravity well contains `point`, or the closest one.
    fn nearest_planet(&self, point: &Vec3) -> Option<Arc<dyn VoxelBody>>;
}

/// Continuous voxel terrain.
pub trait VoxelBody: Send + Sync {
    fn id(&self) -> EntityId;

    /// Center of the body's bounding sphere.
    fn center(&self) -> Vec3;

    /// Radius that encloses all terrain.
    fn bounding_radius(&self) -> f32;

    /// Does any solid voxel lie within the sphere?
    fn intersects_sphere(&self, center: &Vec3, radius: f32) -> bool;

    /// First surface point hit along the segment `from..to`.
    fn raycast_surface(&self, from: &Vec3, to: &Vec3) -> Option<Vec3>;

    /// Surface point closest to `point`.
    fn closest_surface_point(&self, point: &Vec3) -> Vec3;

    /// Gravity magnitude at `point` in multiples of standard gravity.
    fn gravity_at(&self, point: &Vec3) -> f32;

    /// Air density at `point`, 0 in vacuum and 1 at the densest.
    fn air_density(&self, point: &Vec3) -> f32;
}

/// A controllable, cell-composed vehicle.
pub trait Vehicle: Send + Sync {
    fn id(&self) -> EntityId;

    /// Physics state, or `None` once the vehicle is closed.
    fn snapshot(&self) -> Option<VehicleSnapshot>;

    /// The shared occupied-cell cache.
    fn cells(&self) -> Arc<CellCache>;

    fn thrusters(&self) -> Vec<ThrusterInfo>;

    fn gyros(&self) -> Vec<GyroInfo>;
}

/// The command surface of the controlled vehicle. Simulation thread only.
pub trait ControlSurface {
    /// Apply per-axis force ratios (local +X right, +Y up, +Z backward), a
    /// `(pitch, yaw)` torque ratio and a roll ratio, each within `[-1, 1]`.
    fn move_and_rotate(&mut self, movement: Vec3, rotation: Vector2<f32>, roll: f32);

    /// Release all overrides.
    fn stop(&mut self);

    /// Enable or disable inertial dampers.
    fn set_dampers(&mut self, enabled: bool);
}
