//! Immutable chunk mesh handed from mesh workers to the live scene

use crate::core::types::Vec3;
use crate::mesh::stitch::TransitionMask;
use crate::voxel::VoxelMaterial;

/// Triangle mesh of one chunk, in local voxel coordinates
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    /// Per-vertex material, taken from the solid side of the surface
    pub materials: Vec<VoxelMaterial>,
    /// Counter-clockwise triangles seen from outside the surface
    pub indices: Vec<u32>,
    pub lod: u8,
    /// Faces that were degenerated against a coarser neighbour
    pub transitions: TransitionMask,
}

impl ChunkMesh {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Iterate triangles as vertex index triples
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }

    /// Approximate heap usage in bytes
    pub fn memory_usage(&self) -> usize {
        self.positions.len() * std::mem::size_of::<Vec3>() * 2
            + self.materials.len() * std::mem::size_of::<VoxelMaterial>()
            + self.indices.len() * std::mem::size_of::<u32>()
    }
}
