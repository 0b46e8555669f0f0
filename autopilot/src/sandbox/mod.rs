//! An in-memory host world.
//!
//! Enough of a simulation to run the navigation core headless: kinematic cell
//! vehicles, round planets with gravity and atmosphere, simple props, and a
//! control surface that records what it was told. Used by the tests and by
//! embedders that want to try the autopilot without a game attached.

#[cfg(test)]
pub(crate) mod hooked;
mod planet;
mod vehicle;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use nalgebra::Vector2;
use shared::collision::BodyIndex;
use shared::collision::broad::sphere_aabb;
use shared::{ticks_to_seconds, Vec3};

pub use planet::SphericalPlanet;
pub use vehicle::SandboxVehicle;

use crate::host::{BodyKind, BodySnapshot, ControlSurface, EntityId, Vehicle, VoxelBody, World};

/// A body that is neither a vehicle nor terrain.
#[derive(Clone, Debug, PartialEq)]
pub struct Prop {
    pub kind: BodyKind,
    pub center: Vec3,
    pub radius: f32,
    pub mass: f32,
    pub velocity: Vec3,
}

impl Prop {
    pub fn floating(center: Vec3, radius: f32, mass: f32) -> Self {
        Self {
            kind: BodyKind::Floating,
            center,
            radius,
            mass,
            velocity: Vec3::zeros(),
        }
    }

    pub fn character(center: Vec3) -> Self {
        Self {
            kind: BodyKind::Character,
            center,
            radius: 1.0,
            mass: 100.0,
            velocity: Vec3::zeros(),
        }
    }

    #[must_use]
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }
}

/// The sandbox world. All methods take `&self`; state sits behind locks so worker
/// threads can query while the test thread moves things around.
#[derive(Default)]
pub struct SandboxWorld {
    tick: AtomicU64,
    vehicles: RwLock<BTreeMap<EntityId, Arc<SandboxVehicle>>>,
    planets: RwLock<BTreeMap<EntityId, Arc<SphericalPlanet>>>,
    props: RwLock<BTreeMap<EntityId, Prop>>,
    links: RwLock<Vec<(EntityId, EntityId)>>,
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl SandboxWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vehicle(&self, vehicle: Arc<SandboxVehicle>) {
        self.refresh_environment(&vehicle);
        write(&self.vehicles).insert(vehicle.id(), vehicle);
    }

    pub fn add_planet(&self, planet: SphericalPlanet) -> Arc<SphericalPlanet> {
        let planet = Arc::new(planet);
        write(&self.planets).insert(planet.id, Arc::clone(&planet));
        planet
    }

    pub fn add_prop(&self, id: EntityId, prop: Prop) {
        write(&self.props).insert(id, prop);
    }

    /// Remove any entity. Vehicles removed this way are also closed.
    pub fn remove(&self, id: EntityId) {
        if let Some(vehicle) = write(&self.vehicles).remove(&id) {
            vehicle.close();
        }
        write(&self.planets).remove(&id);
        write(&self.props).remove(&id);
        write(&self.links).retain(|(a, b)| *a != id && *b != id);
    }

    /// Physically join two vehicles.
    pub fn attach(&self, a: EntityId, b: EntityId) {
        write(&self.links).push((a, b));
    }

    pub fn set_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::Release);
    }

    /// Advance time: move every vehicle and prop by its velocity and resample
    /// the environment each vehicle sits in.
    pub fn step(&self, ticks: u64) {
        self.tick.fetch_add(ticks, Ordering::AcqRel);
        let seconds = ticks_to_seconds(ticks);
        for vehicle in read(&self.vehicles).values() {
            vehicle.integrate(seconds);
            self.refresh_environment(vehicle);
        }
        for prop in write(&self.props).values_mut() {
            prop.center += prop.velocity * seconds;
        }
    }

    fn refresh_environment(&self, vehicle: &SandboxVehicle) {
        let Some(snapshot) = vehicle.snapshot() else {
            return;
        };
        let com = snapshot.center_of_mass;
        let (gravity, air) = read(&self.planets)
            .values()
            .fold((Vec3::zeros(), 0.0_f32), |(g, a), p| {
                (g + p.gravity_vector(&com), a.max(p.air_density(&com)))
            });
        vehicle.set_environment(gravity, air);
    }

    fn vehicle_body(vehicle: &SandboxVehicle) -> Option<BodySnapshot> {
        let snapshot = vehicle.snapshot()?;
        let aabb = snapshot.world_aabb();
        Some(BodySnapshot {
            id: snapshot.id,
            kind: BodyKind::Vehicle,
            center: aabb.center().coords,
            radius: snapshot.bounding_radius(),
            aabb,
            mass: snapshot.mass,
            velocity: snapshot.linear_velocity,
            is_static: vehicle.is_static(),
            closed: false,
        })
    }

    fn planet_body(planet: &SphericalPlanet) -> BodySnapshot {
        BodySnapshot {
            id: planet.id,
            kind: BodyKind::Voxel { planet: true },
            aabb: sphere_aabb(planet.center, planet.radius),
            center: planet.center,
            radius: planet.radius,
            mass: f32::INFINITY,
            velocity: Vec3::zeros(),
            is_static: true,
            closed: false,
        }
    }

    fn prop_body(id: EntityId, prop: &Prop) -> BodySnapshot {
        BodySnapshot {
            id,
            kind: prop.kind,
            aabb: sphere_aabb(prop.center, prop.radius),
            center: prop.center,
            radius: prop.radius,
            mass: prop.mass,
            velocity: prop.velocity,
            is_static: false,
            closed: false,
        }
    }

    fn all_bodies(&self) -> Vec<BodySnapshot> {
        let mut bodies = read(&self.vehicles)
            .values()
            .filter_map(|v| Self::vehicle_body(v))
            .collect::<Vec<_>>();
        bodies.extend(read(&self.planets).values().map(|p| Self::planet_body(p)));
        bodies.extend(read(&self.props).iter().map(|(id, p)| Self::prop_body(*id, p)));
        bodies
    }
}

impl World for SandboxWorld {
    fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    fn bodies_in_aabb(&self, aabb: &shared::Aabb) -> Vec<BodySnapshot> {
        let bodies = self.all_bodies();
        let index = BodyIndex::build(bodies.iter().enumerate().map(|(i, b)| (i, b.aabb)));
        index
            .query(aabb)
            .into_iter()
            .map(|i| bodies[i].clone())
            .collect()
    }

    fn body(&self, id: EntityId) -> Option<BodySnapshot> {
        if let Some(vehicle) = read(&self.vehicles).get(&id) {
            return Self::vehicle_body(vehicle);
        }
        if let Some(planet) = read(&self.planets).get(&id) {
            return Some(Self::planet_body(planet));
        }
        read(&self.props).get(&id).map(|p| Self::prop_body(id, p))
    }

    fn vehicle(&self, id: EntityId) -> Option<Arc<dyn Vehicle>> {
        read(&self.vehicles)
            .get(&id)
            .map(|v| Arc::clone(v) as Arc<dyn Vehicle>)
    }

    fn voxel(&self, id: EntityId) -> Option<Arc<dyn VoxelBody>> {
        read(&self.planets)
            .get(&id)
            .map(|p| Arc::clone(p) as Arc<dyn VoxelBody>)
    }

    fn attached_group(&self, id: EntityId) -> Vec<EntityId> {
        let links = read(&self.links);
        let mut seen = HashSet::from([id]);
        let mut open = VecDeque::from([id]);
        while let Some(current) = open.pop_front() {
            for (a, b) in links.iter() {
                let other = match (*a == current, *b == current) {
                    (true, _) => *b,
                    (_, true) => *a,
                    _ => continue,
                };
                if seen.insert(other) {
                    open.push_back(other);
                }
            }
        }
        let mut group = seen.into_iter().collect::<Vec<_>>();
        group.sort_unstable();
        group
    }

    fn nearest_planet(&self, point: &Vec3) -> Option<Arc<dyn VoxelBody>> {
        read(&self.planets)
            .values()
            .min_by(|a, b| {
                let da = (point - a.center).norm() - a.radius;
                let db = (point - b.center).norm() - b.radius;
                da.total_cmp(&db)
            })
            .map(|p| Arc::clone(p) as Arc<dyn VoxelBody>)
    }
}

/// One command received by a [`CommandRecorder`].
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Move {
        movement: Vec3,
        rotation: Vector2<f32>,
        roll: f32,
    },
    Stop,
}

/// A control surface that remembers everything it was told.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    pub commands: Vec<Command>,
    pub dampers: bool,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&Command> {
        self.commands.last()
    }

    /// The last move command's force ratios, zero after a stop.
    pub fn last_movement(&self) -> Vec3 {
        match self.last() {
            Some(Command::Move { movement, .. }) => *movement,
            _ => Vec3::zeros(),
        }
    }
}

impl ControlSurface for CommandRecorder {
    fn move_and_rotate(&mut self, movement: Vec3, rotation: Vector2<f32>, roll: f32) {
        self.commands.push(Command::Move {
            movement,
            rotation,
            roll,
        });
    }

    fn stop(&mut self) {
        self.commands.push(Command::Stop);
    }

    fn set_dampers(&mut self, enabled: bool) {
        self.dampers = enabled;
    }
}
