//! Where the vehicle is going, as set by a navigator.
//!
//! A [`NavSet`] holds the navigator's destination, an optional facing, the
//! per-navigation parameters, and a stack of [`Waypoint`]s the pathfinder installs
//! when the direct route is blocked. The top waypoint, if any, is the current
//! target; it is popped once reached.

use log::{debug, warn};
use shared::Vec3;

use crate::error::{NavError, Result};
use crate::host::{EntityId, World};

/// Per-navigation parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NavParams {
    /// A target closer than this counts as reached (m).
    pub destination_radius: f32,
    /// Absolute speed limit for this navigation (m/s).
    pub speed_limit: f32,
    /// Limit on speed relative to a moving destination (m/s).
    pub relative_speed_limit: f32,
    /// Whether the pathfinder may leave the straight line to find a way around.
    pub allow_course_change: bool,
    /// Do not test against voxel terrain.
    pub ignore_terrain: bool,
    /// Final approach onto a surface.
    pub landing: bool,
    /// An entity that never counts as an obstruction, e.g. a docking target.
    pub ignore_entity: Option<EntityId>,
}

impl Default for NavParams {
    fn default() -> Self {
        Self {
            destination_radius: 1.0,
            speed_limit: f32::INFINITY,
            relative_speed_limit: f32::INFINITY,
            allow_course_change: true,
            ignore_terrain: false,
            landing: false,
            ignore_entity: None,
        }
    }
}

impl NavParams {
    #[must_use]
    pub fn with_destination_radius(mut self, radius: f32) -> Self {
        self.destination_radius = radius;
        self
    }

    #[must_use]
    pub fn with_speed_limit(mut self, limit: f32) -> Self {
        self.speed_limit = limit;
        self
    }

    #[must_use]
    pub fn with_relative_speed_limit(mut self, limit: f32) -> Self {
        self.relative_speed_limit = limit;
        self
    }

    #[must_use]
    pub fn with_course_change(mut self, allow: bool) -> Self {
        self.allow_course_change = allow;
        self
    }

    #[must_use]
    pub fn with_ignore_terrain(mut self, ignore: bool) -> Self {
        self.ignore_terrain = ignore;
        self
    }

    #[must_use]
    pub fn with_landing(mut self, landing: bool) -> Self {
        self.landing = landing;
        self
    }

    #[must_use]
    pub fn with_ignore_entity(mut self, entity: Option<EntityId>) -> Self {
        self.ignore_entity = entity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.destination_radius >= 0.0 && self.destination_radius.is_finite()) {
            return Err(NavError::InvalidSettings(format!(
                "destination_radius must be a non-negative distance, got {}",
                self.destination_radius
            )));
        }
        if !(self.speed_limit > 0.0) || !(self.relative_speed_limit > 0.0) {
            return Err(NavError::InvalidSettings(
                "speed limits must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// The navigator's goal.
#[derive(Clone, Debug, PartialEq)]
pub enum Destination {
    /// A fixed world point.
    Point(Vec3),
    /// A point riding along with an entity, `offset` from its bounding-sphere center.
    Entity { id: EntityId, offset: Vec3 },
}

/// A temporary sub-destination.
///
/// An anchored waypoint follows the body it was placed relative to, so a detour
/// around a moving obstruction moves with it.
#[derive(Clone, Debug, PartialEq)]
pub struct Waypoint {
    /// World point, or offset from the anchor's center when anchored.
    pub position: Vec3,
    pub anchor: Option<EntityId>,
}

impl Waypoint {
    pub fn fixed(position: Vec3) -> Self {
        Self {
            position,
            anchor: None,
        }
    }

    pub fn anchored(anchor: EntityId, offset: Vec3) -> Self {
        Self {
            position: offset,
            anchor: Some(anchor),
        }
    }

    /// World position and velocity now; `None` if the anchor is gone.
    pub fn resolve(&self, world: &dyn World) -> Option<(Vec3, Vec3)> {
        match self.anchor {
            None => Some((self.position, Vec3::zeros())),
            Some(id) => world
                .body(id)
                .filter(|b| !b.closed)
                .map(|b| (b.center + self.position, b.velocity)),
        }
    }
}

/// Optional orientation goal.
#[derive(Clone, Debug, PartialEq)]
pub struct Facing {
    /// World direction the vehicle's forward should point along.
    pub direction: Vec3,
    /// World direction the vehicle's up should point along, if roll matters.
    pub up: Option<Vec3>,
}

/// The current movement target.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub position: Vec3,
    pub velocity: Vec3,
    /// The target is a waypoint, not the navigator's destination.
    pub is_waypoint: bool,
}

/// Destination, facing and waypoint stack of one vehicle.
#[derive(Clone, Debug, Default)]
pub struct NavSet {
    params: NavParams,
    destination: Option<Destination>,
    facing: Option<Facing>,
    waypoints: Vec<Waypoint>,
    generation: u64,
}

impl NavSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &NavParams {
        &self.params
    }

    /// Bumped whenever the navigator changes what it wants.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn facing(&self) -> Option<&Facing> {
        self.facing.as_ref()
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Replace the destination; drops every waypoint.
    pub fn set_destination(&mut self, destination: Destination, params: NavParams) -> Result<()> {
        params.validate()?;
        self.destination = Some(destination);
        self.params = params;
        self.waypoints.clear();
        self.generation += 1;
        Ok(())
    }

    pub fn set_facing(&mut self, facing: Option<Facing>) {
        self.facing = facing;
    }

    /// Drop destination, facing and waypoints.
    pub fn clear(&mut self) {
        self.destination = None;
        self.facing = None;
        self.waypoints.clear();
        self.generation += 1;
    }

    pub fn push_waypoint(&mut self, waypoint: Waypoint) {
        debug!("waypoint pushed: {waypoint:?}");
        self.waypoints.push(waypoint);
    }

    /// Resolve the current target for a navigation block at `nav_block`.
    ///
    /// Waypoints whose anchor closed are dropped; reached waypoints are popped.
    pub fn current_target(&mut self, world: &dyn World, nav_block: &Vec3) -> Option<Target> {
        while let Some(top) = self.waypoints.last() {
            match top.resolve(world) {
                None => {
                    warn!("waypoint anchor {:?} closed, dropping waypoint", top.anchor);
                    self.waypoints.pop();
                }
                Some((position, _)) if (position - nav_block).norm() <= self.params.destination_radius => {
                    debug!("waypoint reached at {position:?}");
                    self.waypoints.pop();
                }
                Some((position, velocity)) => {
                    return Some(Target {
                        position,
                        velocity,
                        is_waypoint: true,
                    });
                }
            }
        }

        match self.destination.as_ref()? {
            Destination::Point(p) => Some(Target {
                position: *p,
                velocity: Vec3::zeros(),
                is_waypoint: false,
            }),
            Destination::Entity { id, offset } => match world.body(*id).filter(|b| !b.closed) {
                Some(body) => Some(Target {
                    position: body.center + offset,
                    velocity: body.velocity,
                    is_waypoint: false,
                }),
                None => {
                    warn!("destination entity {id} closed");
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxVehicle, SandboxWorld};
    use approx::assert_relative_eq;
    use shared::Transform;

    #[test]
    fn params_validate() {
        assert!(NavParams::default().validate().is_ok());
        assert!(NavParams::default().with_destination_radius(-1.0).validate().is_err());
        assert!(NavParams::default().with_speed_limit(0.0).validate().is_err());
    }

    #[test]
    fn waypoints_are_popped_when_reached() {
        let world = SandboxWorld::new();
        let mut nav = NavSet::new();
        nav.set_destination(
            Destination::Point(Vec3::new(0.0, 0.0, -500.0)),
            NavParams::default().with_destination_radius(5.0),
        )
        .unwrap();
        nav.push_waypoint(Waypoint::fixed(Vec3::new(50.0, 0.0, -100.0)));

        let t = nav.current_target(&world, &Vec3::zeros()).unwrap();
        assert!(t.is_waypoint);
        assert_relative_eq!(t.position, Vec3::new(50.0, 0.0, -100.0));

        let t = nav.current_target(&world, &Vec3::new(48.0, 0.0, -99.0)).unwrap();
        assert!(!t.is_waypoint);
        assert!(nav.waypoints().is_empty());
    }

    #[test]
    fn anchored_waypoint_follows_and_drops_with_its_anchor() {
        let world = SandboxWorld::new();
        let anchor = SandboxVehicle::cube(7, 1, 2.5, 5000.0);
        anchor.set_pose(Transform::from_translation(Vec3::new(100.0, 0.0, 0.0)));
        world.add_vehicle(std::sync::Arc::clone(&anchor));

        let mut nav = NavSet::new();
        nav.set_destination(Destination::Point(Vec3::zeros()), NavParams::default())
            .unwrap();
        nav.push_waypoint(Waypoint::anchored(7, Vec3::new(0.0, 20.0, 0.0)));
        let t = nav.current_target(&world, &Vec3::new(0.0, 0.0, 300.0)).unwrap();
        assert_relative_eq!(t.position, Vec3::new(100.0, 20.0, 0.0));

        anchor.set_pose(Transform::from_translation(Vec3::new(150.0, 0.0, 0.0)));
        let t = nav.current_target(&world, &Vec3::new(0.0, 0.0, 300.0)).unwrap();
        assert_relative_eq!(t.position, Vec3::new(150.0, 20.0, 0.0));

        anchor.close();
        let t = nav.current_target(&world, &Vec3::new(0.0, 0.0, 300.0)).unwrap();
        assert!(!t.is_waypoint);
    }

    #[test]
    fn new_destination_clears_waypoints_and_bumps_generation() {
        let mut nav = NavSet::new();
        nav.push_waypoint(Waypoint::fixed(Vec3::zeros()));
        let g = nav.generation();
        nav.set_destination(Destination::Point(Vec3::x()), NavParams::default())
            .unwrap();
        assert!(nav.waypoints().is_empty());
        assert_eq!(nav.generation(), g + 1);
    }
}
