//! Voxel data: samples, the sparse field store and world generators

pub mod voxel;
pub mod octree;
pub mod field;
pub mod save;
pub mod generator;

pub use voxel::{VoxelMaterial, VoxelValue};
pub use field::{FieldReadGuard, FieldWriteGuard, VoxelField};
pub use save::{ChangeSet, VoxelOverride};
pub use generator::{FlatWorldGenerator, GeneratorConfig, NoiseWorldGenerator, TerrainParams, WorldGenerator};
