use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use shared::collision::{Aabb, Point3};
use shared::{CellPos, Direction, Transform, Vec3};

use crate::host::{EntityId, Vehicle};
use crate::vehicle::{CellCache, GyroInfo, ThrusterInfo, VehicleSnapshot};

#[derive(Clone, Debug)]
struct Motion {
    pose: Transform,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    mass: f32,
    is_static: bool,
    gravity: Vec3,
    air_density: f32,
}

/// A kinematic cell vehicle: it moves at whatever velocity it is given.
#[derive(Debug)]
pub struct SandboxVehicle {
    id: EntityId,
    cells: Arc<CellCache>,
    motion: RwLock<Motion>,
    thrusters: RwLock<Vec<ThrusterInfo>>,
    gyros: RwLock<Vec<GyroInfo>>,
    closed: AtomicBool,
}

/// `n` indices centered on zero.
fn centered(n: i32) -> std::ops::Range<i32> {
    -(n / 2)..(n - n / 2)
}

impl SandboxVehicle {
    pub fn from_cells(
        id: EntityId,
        cell_size: f32,
        mass: f32,
        cells: impl IntoIterator<Item = CellPos>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            cells: Arc::new(CellCache::from_cells(cell_size, cells)),
            motion: RwLock::new(Motion {
                pose: Transform::identity(),
                linear_velocity: Vec3::zeros(),
                angular_velocity: Vec3::zeros(),
                mass,
                is_static: false,
                gravity: Vec3::zeros(),
                air_density: 0.0,
            }),
            thrusters: RwLock::new(Vec::new()),
            gyros: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// An `n`-cell cube centered on the grid origin.
    pub fn cube(id: EntityId, n: i32, cell_size: f32, mass: f32) -> Arc<Self> {
        let cells = centered(n)
            .flat_map(|x| centered(n).flat_map(move |y| centered(n).map(move |z| CellPos::new(x, y, z))));
        Self::from_cells(id, cell_size, mass, cells)
    }

    /// A line of `n` cells along local Z, centered on the grid origin.
    pub fn rod(id: EntityId, n: i32, cell_size: f32, mass: f32) -> Arc<Self> {
        Self::from_cells(id, cell_size, mass, centered(n).map(|z| CellPos::new(0, 0, z)))
    }

    fn read(&self) -> Motion {
        self.motion
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut Motion)) {
        f(&mut self.motion.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn pose(&self) -> Transform {
        self.read().pose
    }

    pub fn set_pose(&self, pose: Transform) {
        self.update(|m| m.pose = pose);
    }

    pub fn set_velocity(&self, velocity: Vec3) {
        self.update(|m| m.linear_velocity = velocity);
    }

    pub fn set_angular_velocity(&self, velocity: Vec3) {
        self.update(|m| m.angular_velocity = velocity);
    }

    pub fn set_mass(&self, mass: f32) {
        self.update(|m| m.mass = mass);
    }

    pub fn set_static(&self, is_static: bool) {
        self.update(|m| m.is_static = is_static);
    }

    /// Ambient gravity (world, m/s^2) and air density.
    pub fn set_environment(&self, gravity: Vec3, air_density: f32) {
        self.update(|m| {
            m.gravity = gravity;
            m.air_density = air_density;
        });
    }

    pub fn set_thrusters(&self, thrusters: Vec<ThrusterInfo>) {
        *self.thrusters.write().unwrap_or_else(PoisonError::into_inner) = thrusters;
    }

    /// One constant thruster of `force` newtons per direction.
    pub fn set_uniform_thrust(&self, force: f32) {
        self.set_thrusters(
            Direction::ALL
                .into_iter()
                .map(|d| ThrusterInfo::constant(d, force))
                .collect(),
        );
    }

    pub fn set_gyros(&self, gyros: Vec<GyroInfo>) {
        *self.gyros.write().unwrap_or_else(PoisonError::into_inner) = gyros;
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_static(&self) -> bool {
        self.read().is_static
    }

    /// Advance the pose by the current velocities over `seconds`.
    pub fn integrate(&self, seconds: f32) {
        self.update(|m| {
            if m.is_static {
                return;
            }
            m.pose.translation += m.linear_velocity * seconds;
            let spin = shared::Quat::from_scaled_axis(m.angular_velocity * seconds);
            m.pose.rotation = spin * m.pose.rotation;
        });
    }
}

impl Vehicle for SandboxVehicle {
    fn id(&self) -> EntityId {
        self.id
    }

    fn snapshot(&self) -> Option<VehicleSnapshot> {
        if self.is_closed() {
            return None;
        }
        let motion = self.read();
        let local_aabb = self
            .cells
            .local_aabb()
            .unwrap_or_else(|| Aabb::new(Point3::origin(), Point3::origin()));
        Some(VehicleSnapshot {
            id: self.id,
            pose: motion.pose,
            linear_velocity: motion.linear_velocity,
            angular_velocity: motion.angular_velocity,
            mass: motion.mass,
            center_of_mass: motion.pose.transform_point(&local_aabb.center().coords),
            cell_size: self.cells.cell_size(),
            local_aabb,
            gravity: motion.gravity,
            air_density: motion.air_density,
        })
    }

    fn cells(&self) -> Arc<CellCache> {
        Arc::clone(&self.cells)
    }

    fn thrusters(&self) -> Vec<ThrusterInfo> {
        self.thrusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn gyros(&self) -> Vec<GyroInfo> {
        self.gyros
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cube_is_centered() {
        let cube = SandboxVehicle::cube(1, 3, 2.5, 1000.0);
        assert_eq!(cube.cells().len(), 27);
        let snapshot = cube.snapshot().unwrap();
        assert_relative_eq!(snapshot.center_of_mass, Vec3::zeros());
        assert_relative_eq!(snapshot.local_aabb.maxs.x, 3.75);
    }

    #[test]
    fn integrate_moves_by_velocity_and_closed_has_no_snapshot() {
        let rod = SandboxVehicle::rod(1, 5, 1.0, 1000.0);
        rod.set_velocity(Vec3::new(2.0, 0.0, 0.0));
        rod.integrate(1.5);
        assert_relative_eq!(rod.pose().translation, Vec3::new(3.0, 0.0, 0.0));
        rod.close();
        assert!(rod.snapshot().is_none());
    }
}
