//! World configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{Quat, Result, Vec3};
use crate::math::WorldTransform;
use crate::streaming::foliage::FoliageConfig;
use crate::streaming::lod::LodConfig;
use crate::voxel::generator::GeneratorConfig;
use crate::voxel::save::ChangeSet;

/// Deepest supported field (2^20 voxels per edge)
pub const MAX_DEPTH: u8 = 20;

/// Configuration for a voxel world session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Field edge is 2^depth voxels.
    pub depth: u8,
    /// World size of one voxel.
    pub voxel_size: f32,
    /// World placement of the grid origin.
    pub translation: Vec3,
    pub rotation: Quat,
    /// Time a superseded chunk stays visible before removal.
    pub deletion_delay_secs: f32,
    /// Stitch LOD boundaries; without it every chunk is meshed independently.
    pub compute_transitions: bool,
    pub lod_update_fps: f32,
    pub foliage_fps: f32,
    pub mesh_thread_count: usize,
    pub foliage_thread_count: usize,
    pub lod: LodConfig,
    pub generator: GeneratorConfig,
    pub foliage: FoliageConfig,
    /// Loaded at creation when its depth matches.
    pub world_save: Option<ChangeSet>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            depth: 9,
            voxel_size: 100.0,
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            deletion_delay_secs: 0.1,
            compute_transitions: true,
            lod_update_fps: 10.0,
            foliage_fps: 15.0,
            mesh_thread_count: 4,
            foliage_thread_count: 4,
            lod: LodConfig::default(),
            generator: GeneratorConfig::default(),
            foliage: FoliageConfig::default(),
            world_save: None,
        }
    }
}

impl WorldConfig {
    /// Check ranges that would otherwise fail deep inside the scheduler.
    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(Error::InvalidConfig(format!("depth must be in 1..={}, got {}", MAX_DEPTH, self.depth)));
        }
        if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
            return Err(Error::InvalidConfig(format!("voxel_size must be positive, got {}", self.voxel_size)));
        }
        if !(self.deletion_delay_secs.is_finite() && self.deletion_delay_secs >= 0.0) {
            return Err(Error::InvalidConfig("deletion_delay_secs must be non-negative".into()));
        }
        for (name, fps) in [("lod_update_fps", self.lod_update_fps), ("foliage_fps", self.foliage_fps)] {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(Error::InvalidConfig(format!("{} must be positive, got {}", name, fps)));
            }
        }
        if self.mesh_thread_count == 0 || self.foliage_thread_count == 0 {
            return Err(Error::InvalidConfig("thread counts must be at least 1".into()));
        }
        self.lod.validate()?;
        self.foliage.validate()?;
        Ok(())
    }

    pub fn transform(&self) -> WorldTransform {
        WorldTransform::new(self.translation, self.rotation, self.voxel_size)
    }

    pub fn deletion_delay(&self) -> Duration {
        Duration::from_secs_f32(self.deletion_delay_secs)
    }

    pub fn lod_update_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.lod_update_fps)
    }

    pub fn foliage_update_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.foliage_fps)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
