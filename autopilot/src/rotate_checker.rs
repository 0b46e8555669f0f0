//! Obstruction test for rotating in place.
//!
//! A rotation about an axis through the center of mass sweeps, in the worst case,
//! a cylinder: as tall as the vehicle's extent along the axis and as wide as its
//! farthest cell from the axis. Anything inside that cylinder can be hit.

use std::sync::Arc;

use log::debug;
use shared::cell::cell_to_local;
use shared::collision::narrow_phase::{
    cylinder_contains_point, cylinder_coordinates, cylinder_intersects_sphere,
};
use shared::collision::settings::DIST_EPS;
use shared::{Cylinder, Vec3};

use crate::error::{NavError, Result};
use crate::host::{BodyKind, BodySnapshot, EntityId, World};
use crate::path_checker::{Obstruction, ObstructionFilter, ObstructionKind};
use crate::settings::NavSettings;
use crate::spatial_profile::SpatialProfile;
use crate::vehicle::VehicleSnapshot;

/// Per-vehicle rotation tester.
pub struct RotateChecker {
    vehicle_id: EntityId,
    world: Arc<dyn World>,
    profile: Arc<SpatialProfile>,
    settings: Arc<NavSettings>,
}

impl RotateChecker {
    pub fn new(
        vehicle_id: EntityId,
        world: Arc<dyn World>,
        profile: Arc<SpatialProfile>,
        settings: Arc<NavSettings>,
    ) -> Self {
        Self {
            vehicle_id,
            world,
            profile,
            settings,
        }
    }

    /// Worst-case sweep cylinder for rotating about `world_axis`.
    pub fn sweep_cylinder(&self, snapshot: &VehicleSnapshot, world_axis: &Vec3) -> Option<Cylinder> {
        let axis = world_axis.try_normalize(DIST_EPS)?;
        let cells = self.profile.cells();
        let cell_size = cells.cell_size();
        let center = snapshot.center_of_mass;

        let line = Cylinder::new(center, axis, 0.0, 0.0);
        let (mut half_height, mut radius) = (0.0_f32, 0.0_f32);
        for cell in cells.read().iter() {
            let world = snapshot.pose.transform_point(&cell_to_local(cell, cell_size));
            let (axial, radial) = cylinder_coordinates(&line, &world);
            half_height = half_height.max(axial.abs());
            radius = radius.max(radial);
        }

        let half_cell = cell_size * 0.5;
        Some(Cylinder::new(
            center,
            axis,
            half_height + half_cell,
            radius + half_cell * 3.0_f32.sqrt(),
        ))
    }

    /// Test a rotation about `world_axis`. Returns the obstruction, or `None` if
    /// the rotation is clear.
    pub fn test_rotate(&self, world_axis: &Vec3, ignore_terrain: bool) -> Result<Option<Obstruction>> {
        let snapshot = self
            .world
            .vehicle(self.vehicle_id)
            .and_then(|v| v.snapshot())
            .ok_or(NavError::VehicleClosed(self.vehicle_id))?;
        let Some(cylinder) = self.sweep_cylinder(&snapshot, world_axis) else {
            return Ok(None);
        };

        let filter = ObstructionFilter::new(
            self.world.as_ref(),
            self.vehicle_id,
            None,
            ignore_terrain,
            self.settings.min_obstruction_mass,
        );
        let enclosing = cylinder.enclosing_radius();
        for body in self
            .world
            .bodies_in_sphere(&cylinder.center, enclosing)
            .into_iter()
            .filter(|b| filter.admits(b))
        {
            if let Some(obstruction) = self.test_body(&cylinder, enclosing, &body) {
                debug!(
                    "vehicle {}: rotation obstructed by {}",
                    self.vehicle_id, obstruction.entity
                );
                return Ok(Some(obstruction));
            }
        }
        Ok(None)
    }

    fn test_body(&self, cylinder: &Cylinder, enclosing: f32, body: &BodySnapshot) -> Option<Obstruction> {
        let (kind, point) = match body.kind {
            BodyKind::Voxel { .. } => {
                let voxel = self.world.voxel(body.id)?;
                if !voxel.intersects_sphere(&cylinder.center, enclosing) {
                    return None;
                }
                let surface = voxel.closest_surface_point(&cylinder.center);
                if !cylinder_contains_point(cylinder, &surface, 0.0) {
                    return None;
                }
                (ObstructionKind::Voxel, surface)
            }
            BodyKind::Vehicle => {
                let other = self.world.vehicle(body.id)?;
                let snapshot = other.snapshot()?;
                let margin = snapshot.cell_size * 0.5;
                let point = other
                    .cells()
                    .world_points(&snapshot.pose)
                    .into_iter()
                    .find(|p| cylinder_contains_point(cylinder, p, margin))?;
                (ObstructionKind::Vehicle, point)
            }
            BodyKind::Character | BodyKind::Floating => {
                if !cylinder_intersects_sphere(cylinder, &body.center, body.radius) {
                    return None;
                }
                (ObstructionKind::Other, body.center)
            }
        };
        Some(Obstruction {
            entity: body.id,
            kind,
            point,
            velocity: body.velocity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Vehicle;
    use crate::sandbox::{SandboxVehicle, SandboxWorld, SphericalPlanet};
    use approx::assert_relative_eq;
    use shared::Transform;

    fn setup(world: &Arc<SandboxWorld>, at: Vec3) -> RotateChecker {
        let me = SandboxVehicle::rod(1, 9, 2.5, 80_000.0);
        me.set_pose(Transform::from_translation(at));
        world.add_vehicle(Arc::clone(&me));
        RotateChecker::new(
            1,
            world.clone(),
            Arc::new(SpatialProfile::new(me.cells())),
            Arc::new(NavSettings::default()),
        )
    }

    #[test]
    fn cylinder_covers_rod_length_about_perpendicular_axis() {
        let world = Arc::new(SandboxWorld::new());
        let checker = setup(&world, Vec3::zeros());
        let snapshot = world.vehicle(1).unwrap().snapshot().unwrap();
        let cyl = checker.sweep_cylinder(&snapshot, &Vec3::x()).unwrap();
        // Rod of 9 cells along Z, centered: farthest cell is 4 cells from the axis.
        assert!(cyl.radius >= 10.0);
        assert_relative_eq!(cyl.half_height, 1.25, epsilon = 1.0e-4);
    }

    #[test]
    fn open_space_is_clear() {
        let world = Arc::new(SandboxWorld::new());
        let checker = setup(&world, Vec3::zeros());
        assert!(checker.test_rotate(&Vec3::x(), false).unwrap().is_none());
    }

    #[test]
    fn terrain_inside_the_cylinder_blocks_unless_ignored() {
        let world = Arc::new(SandboxWorld::new());
        world.add_planet(SphericalPlanet::new(100, Vec3::zeros(), 1000.0));
        let checker = setup(&world, Vec3::new(0.0, 1003.0, 0.0));

        let hit = checker.test_rotate(&Vec3::x(), false).unwrap().unwrap();
        assert_eq!(hit.entity, 100);
        assert_eq!(hit.kind, ObstructionKind::Voxel);
        assert!(checker.test_rotate(&Vec3::x(), true).unwrap().is_none());
        // Spinning about the vertical axis keeps the rod level and clear of the ground.
        assert!(checker.test_rotate(&Vec3::y(), false).unwrap().is_none());
    }

    #[test]
    fn vehicle_inside_the_cylinder_blocks() {
        let world = Arc::new(SandboxWorld::new());
        let checker = setup(&world, Vec3::zeros());
        let other = SandboxVehicle::cube(2, 1, 2.5, 10_000.0);
        other.set_pose(Transform::from_translation(Vec3::new(0.0, 6.0, 0.0)));
        world.add_vehicle(other);

        let hit = checker.test_rotate(&Vec3::x(), false).unwrap().unwrap();
        assert_eq!(hit.entity, 2);
    }
}
