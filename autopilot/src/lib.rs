//! Autonomous navigation for cell-built vehicles: asynchronous path search around
//! obstructions, and a motion controller that flies to a target on the vehicle's
//! real thrust and torque.
//!
//! The host world is reached only through the traits in [`host`]; [`sandbox`]
//! implements them in memory.

pub mod controller;
pub mod error;
pub mod gyro_profiler;
pub mod host;
pub mod mover;
pub mod nav_set;
pub mod path_checker;
pub mod pathfinder;
pub mod planet_checker;
pub mod rotate_checker;
pub mod sandbox;
pub mod scheduler;
pub mod settings;
pub mod spatial_profile;
mod stopwatch;
pub mod thrust_profiler;
pub mod vehicle;

pub use controller::{Autopilot, AutopilotContext, AutopilotStatus};
pub use error::{NavError, Result};
pub use host::{BodyKind, BodySnapshot, ControlSurface, EntityId, Vehicle, VoxelBody, World};
pub use mover::Mover;
pub use nav_set::{Destination, Facing, NavParams, NavSet, Target, Waypoint};
pub use pathfinder::{PathRequest, PathState, Pathfinder, WaypointInstall};
pub use scheduler::{Executor, ManualExecutor, Priority, ThreadPools};
pub use settings::NavSettings;
pub use vehicle::{CellCache, GyroInfo, ThrusterInfo, VehicleSnapshot};
