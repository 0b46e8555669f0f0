use nalgebra as na;
use rapier3d::parry::{
    bounding_volume::{Aabb, BoundingVolume},
    partitioning::{Bvh, BvhBuildStrategy},
};

use crate::collision::{Transform, Vec3, settings::SWEEP_MARGIN};

/// Broad-phase index over world-space body bounds.
///
/// Notes:
/// - Built from a snapshot of `(key, aabb)` pairs; rebuild it when bodies move.
/// - `keys` maps each BVH leaf back to the caller's identifier (typically an entity id).
pub struct BodyIndex<K> {
    /// BVH over the body AABBs.
    bvh: Bvh,
    /// Caller keys, indexed by BVH leaf.
    keys: Vec<K>,
}

impl<K: Copy> BodyIndex<K> {
    /// Build an index from `(key, world aabb)` pairs.
    pub fn build(entries: impl IntoIterator<Item = (K, Aabb)>) -> Self {
        let mut aabbs: Vec<Aabb> = Vec::new();
        let mut keys: Vec<K> = Vec::new();

        for (key, aabb) in entries {
            aabbs.push(aabb);
            keys.push(key);
        }

        Self {
            bvh: Bvh::from_leaves(BvhBuildStrategy::Binned, &aabbs),
            keys,
        }
    }

    /// Keys of every body whose AABB intersects `query`.
    pub fn query(&self, query: &Aabb) -> Vec<K> {
        if self.keys.is_empty() {
            return Vec::new();
        }
        self.bvh
            .intersect_aabb(query)
            .map(|leaf_idx| self.keys[leaf_idx as usize])
            .collect()
    }

    /// Return true if this index has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of indexed bodies.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

/// World AABB of a body whose local bounds are `local` and whose pose is `pose`.
pub fn world_aabb(local: &Aabb, pose: &Transform) -> Aabb {
    local.transform_by(&pose.iso())
}

/// AABB enclosing a sphere.
pub fn sphere_aabb(center: Vec3, radius: f32) -> Aabb {
    let r = Vec3::repeat(radius.max(0.0));
    Aabb::new((center - r).into(), (center + r).into())
}

/// Swept box of a body: the union of its current AABB and the same AABB moved by
/// `displacement`, inflated by [`SWEEP_MARGIN`] to conservatively include near misses.
pub fn swept_aabb(current: &Aabb, displacement: &Vec3) -> Aabb {
    let moved = aabb_translate(current, displacement);
    aabb_inflate(&current.merged(&moved), SWEEP_MARGIN)
}

/// Move an AABB by `offset`.
pub fn aabb_translate(a: &Aabb, offset: &Vec3) -> Aabb {
    Aabb {
        mins: a.mins + offset,
        maxs: a.maxs + offset,
    }
}

/// Inflate an AABB by `margin` on all sides.
pub fn aabb_inflate(a: &Aabb, margin: f32) -> Aabb {
    if margin <= 0.0 {
        return *a;
    }
    a.loosened(margin)
}

/// Test two AABBs for intersection.
pub fn aabb_intersects(a: &Aabb, b: &Aabb) -> bool {
    !(a.maxs.x < b.mins.x
        || a.mins.x > b.maxs.x
        || a.maxs.y < b.mins.y
        || a.mins.y > b.maxs.y
        || a.maxs.z < b.mins.z
        || a.mins.z > b.maxs.z)
}

/// Squared distance from `p` to the closest point of `a` (zero inside).
pub fn aabb_distance_sq(a: &Aabb, p: &Vec3) -> f32 {
    let clamped = na::Vector3::new(
        p.x.clamp(a.mins.x, a.maxs.x),
        p.y.clamp(a.mins.y, a.maxs.y),
        p.z.clamp(a.mins.z, a.maxs.z),
    );
    (p - clamped).norm_squared()
}

/// AABB from the min/max corners of local cell bounds (cell centers inflated by half a cell).
pub fn cell_bounds_aabb(min_center: &Vec3, max_center: &Vec3, cell_size: f32) -> Aabb {
    let half = Vec3::repeat(cell_size * 0.5);
    Aabb::new((min_center - half).into(), (max_center + half).into())
}
