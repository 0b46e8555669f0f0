use rapier3d::parry::{bounding_volume::Aabb, query, shape as pshape};

use super::{
    settings::{MAX_SPHERE_STEPS, SPHERE_STEP_FRACTION},
    types::{Capsule, Cylinder, Iso, Vec3},
};

/// Closest point to `p` on the segment `a..b`.
pub fn closest_point_on_segment(a: &Vec3, b: &Vec3, p: &Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq <= f32::EPSILON {
        return *a;
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Fraction (0..1) along the segment `a..b` of the point closest to `p`.
pub fn segment_fraction(a: &Vec3, b: &Vec3, p: &Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq <= f32::EPSILON {
        return 0.0;
    }
    ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0)
}

/// Closest point on the capsule's core segment to `p`.
#[inline]
pub fn capsule_closest_point(capsule: &Capsule, p: &Vec3) -> Vec3 {
    closest_point_on_segment(&capsule.p0, &capsule.p1, p)
}

/// Does the capsule overlap a sphere?
pub fn capsule_intersects_sphere(capsule: &Capsule, center: &Vec3, radius: f32) -> bool {
    let closest = capsule_closest_point(capsule, center);
    let reach = capsule.radius + radius;
    (center - closest).norm_squared() <= reach * reach
}

/// Does the capsule overlap an axis-aligned box?
///
/// The query runs in a frame centered on the box so large world coordinates do not
/// cost precision. If parry cannot answer, the box is conservatively reported as hit.
pub fn capsule_intersects_aabb(capsule: &Capsule, aabb: &Aabb) -> bool {
    let center = aabb.center().coords;
    let cuboid = pshape::Cuboid::new(aabb.half_extents());
    let local_capsule = pshape::Capsule::new(
        (capsule.p0 - center).into(),
        (capsule.p1 - center).into(),
        capsule.radius,
    );
    query::intersection_test(&Iso::identity(), &local_capsule, &Iso::identity(), &cuboid)
        .unwrap_or(true)
}

/// Position of `p` in the cylinder frame: `(axial, radial)` where `axial` is the signed
/// distance along the axis from the center and `radial` the distance from the axis.
pub fn cylinder_coordinates(cylinder: &Cylinder, p: &Vec3) -> (f32, f32) {
    let rel = p - cylinder.center;
    let axial = rel.dot(&cylinder.axis);
    let radial = (rel - cylinder.axis * axial).norm();
    (axial, radial)
}

/// Is `p` inside the cylinder grown by `margin` on every side?
pub fn cylinder_contains_point(cylinder: &Cylinder, p: &Vec3, margin: f32) -> bool {
    let (axial, radial) = cylinder_coordinates(cylinder, p);
    axial.abs() <= cylinder.half_height + margin && radial <= cylinder.radius + margin
}

/// Does the cylinder overlap a sphere? Conservative: the sphere is treated as its
/// enclosing box in cylinder coordinates.
pub fn cylinder_intersects_sphere(cylinder: &Cylinder, center: &Vec3, radius: f32) -> bool {
    cylinder_contains_point(cylinder, center, radius)
}

/// Lazy, finite sequence of sphere centers covering a capsule.
///
/// Consecutive spheres (each of the capsule radius) overlap, so testing every sphere
/// against a surface covers the whole sweep. Restart by calling
/// [`sphere_steps`] again; the sequence never mutates the capsule.
#[derive(Clone, Debug)]
pub struct SphereSteps {
    origin: Vec3,
    step: Vec3,
    count: u32,
    index: u32,
}

impl Iterator for SphereSteps {
    type Item = Vec3;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let center = self.origin + self.step * self.index as f32;
        self.index += 1;
        Some(center)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.count - self.index) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SphereSteps {}

/// Sphere walk from `p0` to `p1`, always including both end points.
pub fn sphere_steps(capsule: &Capsule) -> SphereSteps {
    let segment = capsule.segment();
    let length = segment.norm();
    let spacing = (capsule.radius * SPHERE_STEP_FRACTION).max(f32::EPSILON);
    let intervals = ((length / spacing).ceil() as u32).clamp(0, MAX_SPHERE_STEPS - 1);

    let step = if intervals == 0 {
        Vec3::zeros()
    } else {
        segment / intervals as f32
    };

    SphereSteps {
        origin: capsule.p0,
        step,
        count: intervals + 1,
        index: 0,
    }
}
