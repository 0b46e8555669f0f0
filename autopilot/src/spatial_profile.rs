//! Turns a vehicle's occupied cells into sweep volumes.
//!
//! For a travel direction the profile projects every cell onto the plane
//! orthogonal to that direction and keeps one cell per projected position, the
//! front-most. The result, a [`Silhouette`], gives:
//! - the capsule radius (farthest projected cell from the travel axis),
//! - the vehicle's extent ahead of and behind its center along the direction,
//! - the cells a surface raycast has to start from.
//!
//! Silhouettes are cached per quantized local direction and dropped as soon as the
//! cell cache generation changes.

use std::sync::{Arc, Mutex, PoisonError};

use rapier3d::parry::utils::hashmap::HashMap;
use shared::collision::settings::{DIRECTION_KEY_RESOLUTION, DIST_EPS};
use shared::{Capsule, ProjectedGrid, Transform, Vec3};

use crate::vehicle::CellCache;

type DirectionKey = (i32, i32, i32);

/// The shape of a vehicle seen along one local direction.
#[derive(Clone, Debug)]
pub struct Silhouette {
    /// Local unit travel direction.
    pub direction: Vec3,
    /// Local point on the travel axis (the center of the cell bounds).
    pub center: Vec3,
    /// Distance from the axis to the farthest cell corner.
    pub radius: f32,
    /// Extent ahead of `center` along the direction, including half a cell.
    pub front: f32,
    /// Extent behind `center` along the direction, including half a cell.
    pub back: f32,
    /// Local front-most cell centers, one per projected position.
    pub cells: Vec<Vec3>,
}

impl Silhouette {
    fn build(cells: &CellCache, direction: Vec3) -> Self {
        let cell_size = cells.cell_size();
        let points = cells.local_points();
        let center = cells
            .local_aabb()
            .map(|aabb| aabb.center().coords)
            .unwrap_or_else(Vec3::zeros);

        let half_diagonal = cell_size * 0.5 * 3.0_f32.sqrt();
        let mut radius: f32 = 0.0;
        let mut front = f32::NEG_INFINITY;
        let mut back = f32::INFINITY;
        // Key on the vehicle's own cell size so every column keeps one cell.
        let mut grid = ProjectedGrid::new(&direction, cell_size);

        for p in points {
            let rel = p - center;
            let along = rel.dot(&direction);
            let radial = (rel - direction * along).norm();
            radius = radius.max(radial);
            front = front.max(along);
            back = back.min(along);
            // ProjectedGrid keeps the smallest `along`, so insert mirrored to keep the front-most.
            grid.insert(p - direction * (2.0 * along));
        }

        let cells = grid
            .points()
            .map(|mirrored| {
                let along = (mirrored - center).dot(&direction);
                mirrored + direction * (-2.0 * along)
            })
            .collect::<Vec<_>>();

        if cells.is_empty() {
            return Self {
                direction,
                center,
                radius: 0.0,
                front: 0.0,
                back: 0.0,
                cells,
            };
        }

        Self {
            direction,
            center,
            radius: radius + half_diagonal,
            front: front + cell_size * 0.5,
            back: -(back - cell_size * 0.5),
            cells,
        }
    }

    /// World positions of the silhouette cells at `pose`.
    pub fn world_cells(&self, pose: &Transform) -> impl Iterator<Item = Vec3> + '_ {
        let pose = *pose;
        self.cells.iter().map(move |c| pose.transform_point(c))
    }
}

#[derive(Default)]
struct SilhouetteCache {
    generation: u64,
    by_direction: HashMap<DirectionKey, Arc<Silhouette>>,
}

/// Per-vehicle cache of silhouettes.
pub struct SpatialProfile {
    cells: Arc<CellCache>,
    cache: Mutex<SilhouetteCache>,
}

impl SpatialProfile {
    pub fn new(cells: Arc<CellCache>) -> Self {
        Self {
            cells,
            cache: Mutex::new(SilhouetteCache::default()),
        }
    }

    pub fn cells(&self) -> &Arc<CellCache> {
        &self.cells
    }

    fn key(direction: &Vec3) -> DirectionKey {
        (
            (direction.x * DIRECTION_KEY_RESOLUTION).round() as i32,
            (direction.y * DIRECTION_KEY_RESOLUTION).round() as i32,
            (direction.z * DIRECTION_KEY_RESOLUTION).round() as i32,
        )
    }

    /// The silhouette along a local direction. `None` for a zero direction.
    pub fn silhouette(&self, local_direction: &Vec3) -> Option<Arc<Silhouette>> {
        let direction = local_direction.try_normalize(DIST_EPS)?;
        let key = Self::key(&direction);
        let generation = self.cells.generation();

        {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if cache.generation != generation {
                cache.by_direction.clear();
                cache.generation = generation;
            }
            if let Some(found) = cache.by_direction.get(&key) {
                return Some(Arc::clone(found));
            }
        }

        // Build outside the lock; a concurrent builder for the same key only wastes work.
        let built = Arc::new(Silhouette::build(&self.cells, direction));
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.generation == generation {
            cache.by_direction.insert(key, Arc::clone(&built));
        }
        Some(built)
    }

    /// Sweep capsule for moving the vehicle at `pose` by `displacement` (world).
    ///
    /// The capsule axis runs through the silhouette center from the current
    /// position to the displaced one, extended so the end cap covers the vehicle's
    /// front. When `landing`, the far end is pulled back by the radius so the
    /// surface being landed on does not count as an obstruction.
    pub fn capsule(
        &self,
        pose: &Transform,
        displacement: &Vec3,
        landing: bool,
    ) -> Option<(Capsule, Arc<Silhouette>)> {
        let length = displacement.norm();
        if length <= DIST_EPS {
            return None;
        }
        let world_dir = displacement / length;
        let local_dir = pose.inverse_transform_vector(&world_dir);
        let silhouette = self.silhouette(&local_dir)?;

        let p0 = pose.transform_point(&silhouette.center);
        let mut reach = length + (silhouette.front - silhouette.radius).max(0.0);
        if landing {
            reach = (reach - silhouette.radius).max(0.0);
        }
        let p1 = p0 + world_dir * reach;
        Some((Capsule::new(p0, p1, silhouette.radius), silhouette))
    }
}
