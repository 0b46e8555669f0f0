use rapier3d::parry::query::{Ray, RayCast};
use rapier3d::parry::shape::Ball;
use shared::collision::settings::DIST_EPS;
use shared::{STANDARD_GRAVITY, Vec3};

use crate::host::{EntityId, VoxelBody};

/// A perfectly round planet.
///
/// Gravity is `surface_gravity` at the surface, falls off as `(radius / r)^falloff`
/// above it and linearly to zero below it. Air density falls linearly from 1 at the
/// surface to 0 at the top of the atmosphere.
#[derive(Clone, Debug, PartialEq)]
pub struct SphericalPlanet {
    pub id: EntityId,
    pub center: Vec3,
    pub radius: f32,
    /// In multiples of standard gravity.
    pub surface_gravity: f32,
    pub falloff: f32,
    pub atmosphere_height: f32,
}

impl SphericalPlanet {
    pub fn new(id: EntityId, center: Vec3, radius: f32) -> Self {
        Self {
            id,
            center,
            radius,
            surface_gravity: 1.0,
            falloff: 2.0,
            atmosphere_height: radius * 0.1,
        }
    }

    #[must_use]
    pub fn with_gravity(mut self, surface_gravity: f32, falloff: f32) -> Self {
        self.surface_gravity = surface_gravity;
        self.falloff = falloff;
        self
    }

    #[must_use]
    pub fn with_atmosphere(mut self, height: f32) -> Self {
        self.atmosphere_height = height;
        self
    }

    /// Gravity acceleration at `point` (m/s^2), pointing at the center.
    pub fn gravity_vector(&self, point: &Vec3) -> Vec3 {
        let down = (self.center - point)
            .try_normalize(DIST_EPS)
            .unwrap_or_else(Vec3::zeros);
        down * self.gravity_at(point) * STANDARD_GRAVITY
    }
}

impl VoxelBody for SphericalPlanet {
    fn id(&self) -> EntityId {
        self.id
    }

    fn center(&self) -> Vec3 {
        self.center
    }

    fn bounding_radius(&self) -> f32 {
        self.radius
    }

    fn intersects_sphere(&self, center: &Vec3, radius: f32) -> bool {
        (center - self.center).norm() - radius <= self.radius
    }

    fn raycast_surface(&self, from: &Vec3, to: &Vec3) -> Option<Vec3> {
        let ray = Ray::new((from - self.center).into(), to - from);
        Ball::new(self.radius)
            .cast_local_ray(&ray, 1.0, true)
            .map(|toi| from + (to - from) * toi)
    }

    fn closest_surface_point(&self, point: &Vec3) -> Vec3 {
        let out = (point - self.center)
            .try_normalize(DIST_EPS)
            .unwrap_or_else(Vec3::y);
        self.center + out * self.radius
    }

    fn gravity_at(&self, point: &Vec3) -> f32 {
        let r = (point - self.center).norm();
        if r <= self.radius {
            return self.surface_gravity * r / self.radius;
        }
        self.surface_gravity * (self.radius / r).powf(self.falloff)
    }

    fn air_density(&self, point: &Vec3) -> f32 {
        if self.atmosphere_height <= 0.0 {
            return 0.0;
        }
        let altitude = (point - self.center).norm() - self.radius;
        (1.0 - altitude / self.atmosphere_height).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gravity_peaks_at_the_surface() {
        let planet = SphericalPlanet::new(1, Vec3::zeros(), 1000.0);
        assert_relative_eq!(planet.gravity_at(&Vec3::new(0.0, 1000.0, 0.0)), 1.0);
        assert_relative_eq!(planet.gravity_at(&Vec3::new(0.0, 2000.0, 0.0)), 0.25);
        assert!(planet.gravity_at(&Vec3::new(0.0, 500.0, 0.0)) < 1.0);
        let g = planet.gravity_vector(&Vec3::new(0.0, 1000.0, 0.0));
        assert_relative_eq!(g, Vec3::new(0.0, -STANDARD_GRAVITY, 0.0), epsilon = 1.0e-4);
    }

    #[test]
    fn raycast_hits_the_near_surface() {
        let planet = SphericalPlanet::new(1, Vec3::new(10.0, 0.0, 0.0), 100.0);
        let hit = planet
            .raycast_surface(&Vec3::new(10.0, 300.0, 0.0), &Vec3::new(10.0, -300.0, 0.0))
            .unwrap();
        assert_relative_eq!(hit, Vec3::new(10.0, 100.0, 0.0), epsilon = 1.0e-3);
        assert!(
            planet
                .raycast_surface(&Vec3::new(10.0, 300.0, 0.0), &Vec3::new(10.0, 150.0, 0.0))
                .is_none()
        );
    }

    #[test]
    fn atmosphere_thins_with_altitude() {
        let planet = SphericalPlanet::new(1, Vec3::zeros(), 1000.0).with_atmosphere(100.0);
        assert_relative_eq!(planet.air_density(&Vec3::new(0.0, 1000.0, 0.0)), 1.0);
        assert_relative_eq!(planet.air_density(&Vec3::new(0.0, 1050.0, 0.0)), 0.5);
        assert_eq!(planet.air_density(&Vec3::new(0.0, 1200.0, 0.0)), 0.0);
    }
}
