pub mod bitmask_flags;
pub mod cell;
pub mod collision;
pub mod constants;
pub mod direction;
pub mod motion;

pub use bitmask_flags::{BitmaskFlags, FlagBitmask};
pub use cell::{CellPos, ProjectedGrid, first_contact, plane_basis, rejection_collides};
pub use collision::{Aabb, Capsule, Cylinder, Quat, Transform, Vec3};
pub use constants::{STANDARD_GRAVITY, TICK_SECONDS, TICKS_PER_SECOND, ticks_to_seconds};
pub use direction::Direction;
pub use motion::maximum_speed;
