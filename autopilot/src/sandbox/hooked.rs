//! A sandbox world that runs a callback in the middle of a body query, standing
//! in for the simulation thread changing things while a job is between reads.

use std::sync::{Arc, Mutex};

use shared::{Aabb, Vec3};

use super::SandboxWorld;
use crate::host::{BodySnapshot, EntityId, Vehicle, VoxelBody, World};

type Hook = Box<dyn FnOnce() + Send>;

pub(crate) struct HookedWorld {
    inner: Arc<SandboxWorld>,
    hook: Mutex<Option<Hook>>,
}

impl HookedWorld {
    pub fn new(inner: Arc<SandboxWorld>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hook: Mutex::new(None),
        })
    }

    /// Run `hook` once, right after the next `bodies_in_aabb` has collected its bodies.
    pub fn arm(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn is_armed(&self) -> bool {
        self.hook.lock().unwrap().is_some()
    }
}

impl World for HookedWorld {
    fn tick(&self) -> u64 {
        self.inner.tick()
    }

    fn bodies_in_aabb(&self, aabb: &Aabb) -> Vec<BodySnapshot> {
        let bodies = self.inner.bodies_in_aabb(aabb);
        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        bodies
    }

    fn body(&self, id: EntityId) -> Option<BodySnapshot> {
        self.inner.body(id)
    }

    fn vehicle(&self, id: EntityId) -> Option<Arc<dyn Vehicle>> {
        self.inner.vehicle(id)
    }

    fn voxel(&self, id: EntityId) -> Option<Arc<dyn VoxelBody>> {
        self.inner.voxel(id)
    }

    fn attached_group(&self, id: EntityId) -> Vec<EntityId> {
        self.inner.attached_group(id)
    }

    fn nearest_planet(&self, point: &Vec3) -> Option<Arc<dyn VoxelBody>> {
        self.inner.nearest_planet(point)
    }
}
