//! Foliage placement on finished chunk meshes.
//!
//! Instances are scattered over up-facing triangles with an integer hash of
//! the chunk and triangle index, so the same mesh always yields the same
//! placements. Foliage only reads meshes, never the field.

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::core::{Error, Result};
use crate::mesh::ChunkMesh;
use crate::streaming::chunk_graph::ChunkId;
use crate::voxel::VoxelMaterial;

/// Configuration for foliage scattering
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoliageConfig {
    /// Expected instances per square voxel of up-facing surface
    pub density: f32,
    /// Minimum normal Y component (1.0 = flat ground only)
    pub min_up: f32,
    pub seed: u32,
    /// Materials that receive foliage; empty = all
    pub materials: Vec<VoxelMaterial>,
    pub min_scale: f32,
    pub max_scale: f32,
}

impl Default for FoliageConfig {
    fn default() -> Self {
        Self {
            density: 0.25,
            min_up: 0.7,
            seed: 1337,
            materials: Vec::new(),
            min_scale: 0.8,
            max_scale: 1.2,
        }
    }
}

impl FoliageConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.density.is_finite() && self.density >= 0.0) {
            return Err(Error::InvalidConfig(format!("foliage density must be non-negative, got {}", self.density)));
        }
        if self.min_scale > self.max_scale {
            return Err(Error::InvalidConfig("foliage min_scale exceeds max_scale".into()));
        }
        Ok(())
    }

    fn accepts(&self, material: VoxelMaterial) -> bool {
        self.materials.is_empty() || self.materials.contains(&material)
    }
}

/// Single foliage placement in local voxel coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FoliageInstance {
    pub position: Vec3,
    pub normal: Vec3,
    /// Rotation around the normal, radians
    pub rotation: f32,
    pub scale: f32,
    pub material: VoxelMaterial,
}

/// All placements of one chunk
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FoliageInstances {
    pub instances: Vec<FoliageInstance>,
}

impl FoliageInstances {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Integer hash producing a value in [0, 1].
fn hash_3(a: i32, b: i32, c: i32, seed: u32) -> f32 {
    let mut h = (a as u32).wrapping_mul(374761393)
        .wrapping_add((b as u32).wrapping_mul(668265263))
        .wrapping_add((c as u32).wrapping_mul(2246822519))
        .wrapping_add(seed.wrapping_mul(1274126177));
    h = (h ^ (h >> 13)).wrapping_mul(1103515245);
    h = h ^ (h >> 16);
    (h & 0x7FFFFFFF) as f32 / 0x7FFFFFFF_u32 as f32
}

/// Scatter foliage over the up-facing triangles of a chunk mesh
pub fn scatter_foliage(id: ChunkId, mesh: &ChunkMesh, config: &FoliageConfig) -> FoliageInstances {
    let mut instances = Vec::new();
    // Chunk-unique salt so neighbouring chunks do not repeat patterns
    let salt = config.seed
        ^ (id.lod as u32).wrapping_mul(0x9E3779B9)
        ^ (id.coord.x as u32).wrapping_mul(73856093)
        ^ (id.coord.y as u32).wrapping_mul(19349663)
        ^ (id.coord.z as u32).wrapping_mul(83492791);

    for (t, [a, b, c]) in mesh.triangles().enumerate() {
        let (pa, pb, pc) = (
            mesh.positions[a as usize],
            mesh.positions[b as usize],
            mesh.positions[c as usize],
        );
        let cross = (pb - pa).cross(pc - pa);
        let area = cross.length() * 0.5;
        if area <= 0.0 {
            continue;
        }
        let normal = cross / (area * 2.0);
        if normal.y < config.min_up {
            continue;
        }
        let material = mesh.materials[a as usize];
        if !config.accepts(material) {
            continue;
        }

        // Expected count = area * density; the fractional part is a coin flip
        let expected = area * config.density;
        let t = t as i32;
        let mut count = expected.floor() as i32;
        if hash_3(t, 0, 0, salt) < expected.fract() {
            count += 1;
        }

        for k in 0..count {
            let mut u = hash_3(t, k, 1, salt);
            let mut v = hash_3(t, k, 2, salt);
            if u + v > 1.0 {
                u = 1.0 - u;
                v = 1.0 - v;
            }
            let position = pa + (pb - pa) * u + (pc - pa) * v;
            let rotation = hash_3(t, k, 3, salt) * std::f32::consts::TAU;
            let scale = config.min_scale + (config.max_scale - config.min_scale) * hash_3(t, k, 4, salt);

            instances.push(FoliageInstance {
                position,
                normal,
                rotation,
                scale,
                material,
            });
        }
    }

    FoliageInstances { instances }
}
