//! Invokers: observers whose positions drive LOD and foliage selection

use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::core::types::Vec3;
use crate::math::WorldTransform;

/// Anything with a world position that should have terrain meshed around it.
///
/// Held weakly by the scheduler; once the last strong reference is dropped
/// the invoker is pruned on the next LOD pass.
pub trait InvokerSource: Send + Sync {
    /// Current world-space position
    fn position(&self) -> Vec3;
}

/// Movable point invoker, handy for hosts without their own entity type
#[derive(Debug, Default)]
pub struct PointInvoker {
    position: RwLock<Vec3>,
}

impl PointInvoker {
    pub fn new(position: Vec3) -> Self {
        Self {
            position: RwLock::new(position),
        }
    }

    pub fn set_position(&self, position: Vec3) {
        *self.position.write().unwrap_or_else(PoisonError::into_inner) = position;
    }
}

impl InvokerSource for PointInvoker {
    fn position(&self) -> Vec3 {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by invoker registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvokerId(pub u64);

/// Registered invoker (world units)
pub struct Invoker {
    pub id: InvokerId,
    source: Weak<dyn InvokerSource>,
    pub mesh_radius: f32,
    pub foliage_radius: f32,
    pub priority: i32,
}

impl Invoker {
    pub fn new(
        id: InvokerId,
        source: &Arc<dyn InvokerSource>,
        mesh_radius: f32,
        foliage_radius: f32,
        priority: i32,
    ) -> Self {
        Self {
            id,
            source: Arc::downgrade(source),
            mesh_radius,
            foliage_radius,
            priority,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.source.strong_count() > 0
    }

    /// Poll the source and convert to local voxel space.
    /// `None` once the source has been dropped.
    pub fn snapshot(&self, transform: &WorldTransform) -> Option<InvokerSnapshot> {
        let source = self.source.upgrade()?;
        Some(InvokerSnapshot {
            id: self.id,
            position: transform.world_to_local(source.position()),
            mesh_radius: transform.world_to_local_distance(self.mesh_radius),
            foliage_radius: transform.world_to_local_distance(self.foliage_radius),
            priority: self.priority,
        })
    }
}

/// Invoker state for one LOD pass, in local voxel units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InvokerSnapshot {
    pub id: InvokerId,
    pub position: Vec3,
    pub mesh_radius: f32,
    pub foliage_radius: f32,
    pub priority: i32,
}
