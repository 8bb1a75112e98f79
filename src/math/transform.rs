//! World <-> local grid conversion

use serde::{Deserialize, Serialize};

use crate::core::types::{Affine3A, IVec3, Quat, Vec3};

/// Placement of the voxel grid in the world: rigid transform plus the world
/// size of one voxel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub voxel_size: f32,
}

impl Default for WorldTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            voxel_size: 100.0,
        }
    }
}

impl WorldTransform {
    pub fn new(translation: Vec3, rotation: Quat, voxel_size: f32) -> Self {
        Self {
            translation,
            rotation,
            voxel_size,
        }
    }

    fn affine(&self) -> Affine3A {
        Affine3A::from_rotation_translation(self.rotation, self.translation)
    }

    /// World position to continuous local voxel coordinates
    pub fn world_to_local(&self, world: Vec3) -> Vec3 {
        self.affine().inverse().transform_point3(world) / self.voxel_size
    }

    /// World position to the nearest grid position
    pub fn global_to_local(&self, world: Vec3) -> IVec3 {
        self.world_to_local(world).round().as_ivec3()
    }

    /// Grid position to world position
    pub fn local_to_global(&self, local: IVec3) -> Vec3 {
        self.affine().transform_point3(local.as_vec3() * self.voxel_size)
    }

    /// World distance to a distance in voxels
    pub fn world_to_local_distance(&self, distance: f32) -> f32 {
        distance / self.voxel_size
    }
}
