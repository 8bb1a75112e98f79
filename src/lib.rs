//! Voxterra - streaming LOD voxel terrain
//!
//! A bounded octree of density/material samples ([`voxel::VoxelField`]),
//! meshed chunk by chunk at a level of detail picked from observer distance
//! ([`streaming::MeshScheduler`]), with crack-free seams between chunks of
//! different LOD. [`world::VoxelWorld`] ties the two together.

pub mod core;
pub mod math;
pub mod voxel;
pub mod mesh;
pub mod streaming;
pub mod world;

pub use crate::core::{Error, Result, WorldConfig};
pub use crate::world::VoxelWorld;
