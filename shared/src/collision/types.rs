/*!
Core geometric types and math aliases shared by the collision submodules.

This module intentionally contains no intersection algorithms. It defines the data
types exchanged between:
- broad (world AABB index and swept boxes)
- narrow_phase (capsule, sphere, box and cylinder tests)
- the path/rotate/planet checkers in the autopilot crate

Poses are immutable value types. A checker takes a snapshot of the vehicle pose at
the start of a test and never mutates it; a new tick produces a new `Transform`.

Local frame convention (matches the vehicle cell grid):
- +X right
- +Y up
- -Z forward
*/

use nalgebra as na;

/// Common math aliases for clarity and consistency.
pub type Vec3 = na::Vector3<f32>;
pub type Point3 = na::Point3<f32>;
pub type Quat = na::UnitQuaternion<f32>;
pub type Iso = na::Isometry3<f32>;

/// A rigid transform (isometry) in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    #[inline]
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    #[inline]
    pub fn identity() -> Self {
        Self::new(Vec3::zeros(), Quat::identity())
    }

    /// A transform with no rotation placed at `translation`.
    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quat::identity())
    }

    /// Convert to nalgebra `Isometry3` for use with parry3d queries.
    #[inline]
    pub fn iso(&self) -> Iso {
        Iso::from_parts(
            na::Translation3::new(self.translation.x, self.translation.y, self.translation.z),
            self.rotation,
        )
    }

    /// Local point -> world point.
    #[inline]
    pub fn transform_point(&self, local: &Vec3) -> Vec3 {
        self.rotation * local + self.translation
    }

    /// World point -> local point.
    #[inline]
    pub fn inverse_transform_point(&self, world: &Vec3) -> Vec3 {
        self.rotation.inverse_transform_vector(&(world - self.translation))
    }

    /// Local direction -> world direction.
    #[inline]
    pub fn transform_vector(&self, local: &Vec3) -> Vec3 {
        self.rotation * local
    }

    /// World direction -> local direction.
    #[inline]
    pub fn inverse_transform_vector(&self, world: &Vec3) -> Vec3 {
        self.rotation.inverse_transform_vector(world)
    }

    /// The same pose moved by a world-space offset.
    #[inline]
    pub fn translated(&self, offset: &Vec3) -> Self {
        Self::new(self.translation + offset, self.rotation)
    }

    /// World-space forward (-Z) of this pose.
    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::z()
    }

    /// World-space up (+Y) of this pose.
    #[inline]
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::y()
    }

    /// World-space right (+X) of this pose.
    #[inline]
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::x()
    }
}

/// A line segment swept by a sphere: the primary sweep-test primitive.
///
/// `p0` is the start of the sweep (the vehicle's current position) and `p1` the
/// end (the same point translated by the tested displacement).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Capsule {
    pub p0: Vec3,
    pub p1: Vec3,
    pub radius: f32,
}

impl Capsule {
    #[inline]
    pub fn new(p0: Vec3, p1: Vec3, radius: f32) -> Self {
        Self { p0, p1, radius }
    }

    /// Segment vector from `p0` to `p1`.
    #[inline]
    pub fn segment(&self) -> Vec3 {
        self.p1 - self.p0
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.segment().norm()
    }

    /// Unit direction of travel, `None` for a degenerate (point) capsule.
    #[inline]
    pub fn direction(&self) -> Option<Vec3> {
        self.segment().try_normalize(1.0e-6)
    }
}

/// An oriented cylinder: the sweep volume of a rotation about `axis`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cylinder {
    /// World-space point on the axis, halfway between the two caps.
    pub center: Vec3,
    /// Unit axis of rotation.
    pub axis: Vec3,
    pub half_height: f32,
    pub radius: f32,
}

impl Cylinder {
    #[inline]
    pub fn new(center: Vec3, axis: Vec3, half_height: f32, radius: f32) -> Self {
        Self {
            center,
            axis,
            half_height,
            radius,
        }
    }

    /// Radius of the smallest sphere around `center` that contains the cylinder.
    #[inline]
    pub fn enclosing_radius(&self) -> f32 {
        (self.radius * self.radius + self.half_height * self.half_height).sqrt()
    }
}
