//! Vehicle state as seen by the navigation core.
//!
//! - [`VehicleSnapshot`]: an immutable per-tick copy of the physics state.
//! - [`CellCache`]: the occupied-cell set, shared between the host (writer, on
//!   block add/remove) and checkers on worker threads (readers).
//! - [`ThrusterInfo`] / [`GyroInfo`]: the actuator inventory the profilers sum up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use shared::cell::cell_to_local;
use shared::collision::broad::{cell_bounds_aabb, world_aabb};
use shared::{Aabb, CellPos, Direction, Transform, Vec3};

use crate::host::EntityId;

/// Physics state of a vehicle at one tick.
#[derive(Clone, Debug)]
pub struct VehicleSnapshot {
    pub id: EntityId,
    /// World pose of the cell grid origin.
    pub pose: Transform,
    /// World linear velocity (m/s).
    pub linear_velocity: Vec3,
    /// World angular velocity (rad/s).
    pub angular_velocity: Vec3,
    /// Total mass (kg).
    pub mass: f32,
    /// World center of mass.
    pub center_of_mass: Vec3,
    /// Edge length of one cell (m).
    pub cell_size: f32,
    /// Local bounds of all occupied cells.
    pub local_aabb: Aabb,
    /// Ambient gravity acceleration in world space (m/s^2).
    pub gravity: Vec3,
    /// Ambient air density, 0 in vacuum.
    pub air_density: f32,
}

impl VehicleSnapshot {
    /// World-space bounding box.
    pub fn world_aabb(&self) -> Aabb {
        world_aabb(&self.local_aabb, &self.pose)
    }

    /// Radius of the sphere around the bounding box center that encloses all cells.
    pub fn bounding_radius(&self) -> f32 {
        self.local_aabb.half_extents().norm()
    }

    /// World velocity expressed in the vehicle's local frame.
    pub fn local_velocity(&self) -> Vec3 {
        self.pose.inverse_transform_vector(&self.linear_velocity)
    }

    /// World angular velocity expressed in the vehicle's local frame.
    pub fn local_angular_velocity(&self) -> Vec3 {
        self.pose.inverse_transform_vector(&self.angular_velocity)
    }

    /// Gravity expressed in the vehicle's local frame.
    pub fn local_gravity(&self) -> Vec3 {
        self.pose.inverse_transform_vector(&self.gravity)
    }
}

/// The set of occupied cells of one vehicle.
///
/// Every mutation bumps [`CellCache::generation`], which invalidates silhouettes
/// and signals the profilers that the block count changed.
#[derive(Debug)]
pub struct CellCache {
    cell_size: f32,
    cells: RwLock<HashSet<CellPos>>,
    generation: AtomicU64,
}

impl CellCache {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: RwLock::new(HashSet::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_cells(cell_size: f32, cells: impl IntoIterator<Item = CellPos>) -> Self {
        Self {
            cell_size,
            cells: RwLock::new(cells.into_iter().collect()),
            generation: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Block-added notification. Returns false if the cell was already occupied.
    pub fn add_cell(&self, cell: CellPos) -> bool {
        let added = self
            .cells
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cell);
        if added {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        added
    }

    /// Block-removed notification. Returns false if the cell was empty.
    pub fn remove_cell(&self, cell: &CellPos) -> bool {
        let removed = self
            .cells
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(cell);
        if removed {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    /// Shared read access. Hold the guard only for the duration of one scan.
    pub fn read(&self) -> RwLockReadGuard<'_, HashSet<CellPos>> {
        self.cells.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Local centers of all cells.
    pub fn local_points(&self) -> Vec<Vec3> {
        self.read()
            .iter()
            .map(|c| cell_to_local(c, self.cell_size))
            .collect()
    }

    /// World centers of all cells at `pose`.
    pub fn world_points(&self, pose: &Transform) -> Vec<Vec3> {
        self.read()
            .iter()
            .map(|c| pose.transform_point(&cell_to_local(c, self.cell_size)))
            .collect()
    }

    /// Local bounds covering every cell, or `None` for an empty vehicle.
    pub fn local_aabb(&self) -> Option<Aabb> {
        let cells = self.read();
        let mut iter = cells.iter();
        let first = *iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), c| (lo.inf(c), hi.sup(c)));
        Some(cell_bounds_aabb(
            &cell_to_local(&min, self.cell_size),
            &cell_to_local(&max, self.cell_size),
            self.cell_size,
        ))
    }
}

/// One thruster, as reported by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct ThrusterInfo {
    /// Direction in which the thruster pushes the vehicle.
    pub direction: Direction,
    /// Force at full effectiveness (N).
    pub max_force: f32,
    /// Air density at and below which `effectiveness_at_min_influence` applies.
    pub min_influence: f32,
    /// Air density at and above which `effectiveness_at_max_influence` applies.
    pub max_influence: f32,
    pub effectiveness_at_min_influence: f32,
    pub effectiveness_at_max_influence: f32,
    /// Produces no force in vacuum.
    pub needs_atmosphere: bool,
    /// Built, powered and enabled.
    pub functional: bool,
}

impl ThrusterInfo {
    /// A thruster with the same effectiveness everywhere.
    pub fn constant(direction: Direction, max_force: f32) -> Self {
        Self {
            direction,
            max_force,
            min_influence: 0.0,
            max_influence: 1.0,
            effectiveness_at_min_influence: 1.0,
            effectiveness_at_max_influence: 1.0,
            needs_atmosphere: false,
            functional: true,
        }
    }

    /// Effectiveness at `air_density`, interpolated between the two influence limits.
    pub fn effectiveness(&self, air_density: f32) -> f32 {
        if self.needs_atmosphere && air_density <= 0.0 {
            return 0.0;
        }
        let span = self.max_influence - self.min_influence;
        if span <= f32::EPSILON {
            return if air_density >= self.max_influence {
                self.effectiveness_at_max_influence
            } else {
                self.effectiveness_at_min_influence
            };
        }
        let t = ((air_density - self.min_influence) / span).clamp(0.0, 1.0);
        self.effectiveness_at_min_influence
            + (self.effectiveness_at_max_influence - self.effectiveness_at_min_influence) * t
    }

    /// Force this thruster delivers at `air_density`.
    pub fn force_at(&self, air_density: f32) -> f32 {
        if !self.functional {
            return 0.0;
        }
        self.max_force * self.effectiveness(air_density).max(0.0)
    }
}

/// One gyroscope.
#[derive(Clone, Debug, PartialEq)]
pub struct GyroInfo {
    /// Torque at full override (N*m).
    pub max_torque: f32,
    pub functional: bool,
}
