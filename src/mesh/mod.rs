//! Chunk meshing: lattice sampling, LOD stitching and polygonization

pub mod chunk_mesh;
pub mod grid;
pub mod marching_tets;
pub mod stitch;

pub use chunk_mesh::ChunkMesh;
pub use grid::{SampleGrid, MESH_MARGIN};
pub use stitch::{NeighborLods, TransitionMask};

use crate::streaming::chunk_graph::{ChunkGraph, ChunkId};
use crate::streaming::lod::lod_step;
use crate::voxel::FieldReadGuard;

/// Mesh one chunk from the field.
///
/// Samples the chunk lattice plus [`MESH_MARGIN`], degenerates faces shared
/// with coarser neighbours when `compute_transitions` is set, then
/// polygonizes.
pub fn build_chunk_mesh(
    field: &FieldReadGuard<'_>,
    graph: &ChunkGraph,
    id: ChunkId,
    neighbors: &NeighborLods,
    compute_transitions: bool,
) -> ChunkMesh {
    let step = lod_step(id.lod);
    let mut grid = SampleGrid::sample(field, graph.min_corner(id), step, graph.chunk_cells());

    let transitions = if compute_transitions {
        stitch::stitch_boundary(&mut grid, id.lod, neighbors, &|p| field.get_or_generate(p))
    } else {
        TransitionMask::NONE
    };

    let mut mesh = marching_tets::polygonize(&grid);
    mesh.lod = id.lod;
    mesh.transitions = transitions;
    mesh
}
