/*!
Collision root module.

This module re-exports submodules that implement the geometric tests used by the
autopilot's path, rotate and planet checkers. The code is split for clarity:

- types:        shared data types (Transform, Capsule, Cylinder, math aliases)
- settings:     geometric tolerances
- broad:        broad-phase helpers (swept AABBs, BVH body index)
- narrow_phase: capsule/sphere/box/cylinder tests and the capsule sphere walk
*/

pub mod broad;
pub mod narrow_phase;
pub mod settings;
pub mod types;

// Re-export commonly used types and functions.
pub use broad::{BodyIndex, swept_aabb, world_aabb};
pub use narrow_phase::{
    capsule_intersects_aabb, capsule_intersects_sphere, closest_point_on_segment,
    cylinder_contains_point, sphere_steps,
};
pub use rapier3d::parry::bounding_volume::Aabb;
pub use types::{Capsule, Cylinder, Iso, Point3, Quat, Transform, Vec3};
