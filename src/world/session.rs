//! Voxel world session: one field plus the scheduler that meshes it

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::WorldConfig;
use crate::core::Error;
use crate::core::types::{IVec3, Result, Vec3};
use crate::math::WorldTransform;
use crate::streaming::chunk_graph::ChunkId;
use crate::streaming::invoker::{InvokerId, InvokerSource};
use crate::streaming::scene::{LiveScene, SceneEvent};
use crate::streaming::scheduler::{ChunkState, MeshScheduler, SchedulerStats};
use crate::voxel::{ChangeSet, VoxelField, VoxelMaterial, VoxelValue};

/// A live voxel world.
///
/// Owns the field and its scheduler and tears both down together. Value
/// accessors taking grid positions log and fall back to a default on
/// out-of-bounds input; everything else reports errors through [`Result`].
pub struct VoxelWorld {
    config: WorldConfig,
    transform: WorldTransform,
    field: Arc<VoxelField>,
    scheduler: MeshScheduler,
}

impl VoxelWorld {
    /// Create the field and scheduler described by `config`.
    ///
    /// An unusable generator falls back to a flat world; a configured save
    /// with the wrong depth is skipped with a warning.
    pub fn create(config: WorldConfig) -> Result<Self> {
        config.validate()?;

        let generator = config.generator.instantiate_or_flat();
        let field = Arc::new(VoxelField::new(config.depth, generator));
        let scheduler = MeshScheduler::new(Arc::clone(&field), &config)?;

        let mut world = Self {
            transform: config.transform(),
            config,
            field,
            scheduler,
        };

        if let Some(save) = world.config.world_save.take() {
            if save.depth == world.config.depth {
                world.load_from_save(&save, false)?;
            } else {
                log::warn!(
                    "Ignoring world save for depth {} (world depth is {})",
                    save.depth,
                    world.config.depth
                );
            }
            world.config.world_save = Some(save);
        }

        log::info!(
            "Created voxel world: depth {} ({}^3 voxels), voxel size {}",
            world.config.depth,
            world.size(),
            world.config.voxel_size
        );
        Ok(world)
    }

    /// Tear down the scheduler and the field
    pub fn destroy(self) {
        drop(self);
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn field(&self) -> &Arc<VoxelField> {
        &self.field
    }

    pub fn transform(&self) -> &WorldTransform {
        &self.transform
    }

    pub fn depth(&self) -> u8 {
        self.field.depth()
    }

    /// Edge length in voxels
    pub fn size(&self) -> i32 {
        self.field.size()
    }

    pub fn voxel_size(&self) -> f32 {
        self.transform.voxel_size
    }

    pub fn is_in_world(&self, p: IVec3) -> bool {
        self.field.is_in_bounds(p)
    }

    fn get_voxel(&self, p: IVec3) -> Option<VoxelValue> {
        match self.field.get(p) {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("Voxel read failed: {}", e);
                None
            }
        }
    }

    /// Density at `p`; 0.0 when out of bounds
    pub fn get_value(&self, p: IVec3) -> f32 {
        self.get_voxel(p).map_or(0.0, |value| value.density)
    }

    /// Material at `p`; the default material when out of bounds
    pub fn get_material(&self, p: IVec3) -> VoxelMaterial {
        self.get_voxel(p).map_or(VoxelMaterial::DEFAULT, |value| value.material)
    }

    /// Write a density. Meshes pick it up on the next tick or update call.
    pub fn set_value(&self, p: IVec3, density: f32) {
        if let Err(e) = self.field.set_density(p, density) {
            log::error!("Voxel write failed: {}", e);
        }
    }

    pub fn set_material(&self, p: IVec3, material: VoxelMaterial) {
        if let Err(e) = self.field.set_material(p, material) {
            log::error!("Voxel write failed: {}", e);
        }
    }

    /// Every written cell
    pub fn get_save(&self) -> ChangeSet {
        self.field.snapshot()
    }

    /// Apply a save, re-mesh every position it changed and wait for the
    /// meshes. Returns the number of changed positions.
    pub fn load_from_save(&mut self, save: &ChangeSet, reset: bool) -> Result<usize> {
        let changed = match self.field.restore(save, reset) {
            Ok(changed) => changed,
            Err(e) => {
                log::warn!("Rejected world save: {}", e);
                return Err(e);
            }
        };

        for p in &changed {
            self.scheduler.update_chunks_at_position(*p, true);
        }
        self.scheduler.apply_updates();

        log::debug!("Loaded save: {} overrides, {} positions changed", save.len(), changed.len());
        Ok(changed.len())
    }

    pub fn update_chunks_at_position(&mut self, p: IVec3, async_update: bool) {
        self.scheduler.update_chunks_at_position(p, async_update);
    }

    pub fn update_all(&mut self, async_update: bool) {
        self.scheduler.update_all(async_update);
    }

    pub fn apply_updates(&mut self) {
        self.scheduler.apply_updates();
    }

    pub fn add_invoker(
        &mut self,
        source: &Arc<dyn InvokerSource>,
        mesh_radius: f32,
        foliage_radius: f32,
        priority: i32,
    ) -> InvokerId {
        self.scheduler.add_invoker(source, mesh_radius, foliage_radius, priority)
    }

    pub fn remove_invoker(&mut self, id: InvokerId) -> bool {
        self.scheduler.remove_invoker(id)
    }

    /// LOD of the chunk covering `p`. Out-of-bounds positions are logged.
    pub fn get_depth_at(&self, p: IVec3) -> Result<u8> {
        let depth = self.scheduler.get_depth_at(p);
        if let Err(e @ Error::OutOfBounds { .. }) = &depth {
            log::error!("Depth query failed: {}", e);
        }
        depth
    }

    pub fn tick(&mut self, dt: Duration) {
        self.scheduler.tick(dt);
    }

    /// World position to the nearest grid position
    pub fn global_to_local(&self, world: Vec3) -> IVec3 {
        self.transform.global_to_local(world)
    }

    pub fn local_to_global(&self, local: IVec3) -> Vec3 {
        self.transform.local_to_global(local)
    }

    pub fn scene(&self) -> &LiveScene {
        self.scheduler.scene()
    }

    pub fn drain_scene_events(&mut self) -> Vec<SceneEvent> {
        self.scheduler.drain_scene_events()
    }

    pub fn chunk_state(&self, id: ChunkId) -> ChunkState {
        self.scheduler.chunk_state(id)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }
}

impl Drop for VoxelWorld {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        log::info!("Destroyed voxel world ({} overrides)", self.field.override_count());
    }
}
