//! ChunkGraph - addressing of fixed-size chunks at every LOD level.
//!
//! A chunk at LOD `L` spans `chunk_cells << L` voxels per edge and is meshed
//! on a lattice of step `2^L`, so every chunk has the same number of cells.
//! Chunks mirror the field octree: the root chunk covers the whole field at
//! `max_lod`, and each chunk has eight children one LOD finer.

use serde::{Deserialize, Serialize};

use crate::core::types::{IVec3, Vec3};
use crate::math::Aabb;

/// Cells per chunk edge (before clamping to the field size)
pub const CHUNK_CELLS: i32 = 16;

/// log2 of [`CHUNK_CELLS`]
const CHUNK_CELLS_LOG2: u8 = 4;

/// Chunk identifier: LOD level plus chunk coordinate at that level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub lod: u8,
    pub coord: IVec3,
}

impl ChunkId {
    pub fn new(lod: u8, coord: IVec3) -> Self {
        Self { lod, coord }
    }
}

/// Pure chunk addressing for a field of a given depth
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkGraph {
    depth: u8,
    cells_log2: u8,
}

impl ChunkGraph {
    pub fn new(depth: u8) -> Self {
        Self {
            depth,
            cells_log2: depth.min(CHUNK_CELLS_LOG2),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Cells per chunk edge (lattice points per edge minus one)
    pub fn chunk_cells(&self) -> i32 {
        1 << self.cells_log2
    }

    /// Coarsest LOD; the root chunk covers the whole field
    pub fn max_lod(&self) -> u8 {
        self.depth - self.cells_log2
    }

    /// Chunk edge length in voxels at `lod`
    pub fn chunk_size(&self, lod: u8) -> i32 {
        self.chunk_cells() << lod
    }

    /// Chunks per axis at `lod`
    pub fn chunks_per_axis(&self, lod: u8) -> i32 {
        1 << (self.max_lod() - lod)
    }

    pub fn root(&self) -> ChunkId {
        ChunkId::new(self.max_lod(), IVec3::ZERO)
    }

    pub fn is_valid(&self, id: ChunkId) -> bool {
        id.lod <= self.max_lod()
            && id.coord.cmpge(IVec3::ZERO).all()
            && id.coord.cmplt(IVec3::splat(self.chunks_per_axis(id.lod))).all()
    }

    /// Chunk containing `pos` at `lod`, `None` outside the field
    pub fn chunk_at(&self, pos: IVec3, lod: u8) -> Option<ChunkId> {
        if lod > self.max_lod() {
            return None;
        }
        let size = self.chunk_size(lod);
        let id = ChunkId::new(lod, pos.div_euclid(IVec3::splat(size)));
        self.is_valid(id).then_some(id)
    }

    /// Minimum voxel corner of the chunk
    pub fn min_corner(&self, id: ChunkId) -> IVec3 {
        id.coord * self.chunk_size(id.lod)
    }

    pub fn bounds(&self, id: ChunkId) -> Aabb {
        Aabb::from_cube(self.min_corner(id), self.chunk_size(id.lod))
    }

    /// Half-open containment: `min <= pos < min + size`
    pub fn contains(&self, id: ChunkId, pos: IVec3) -> bool {
        let min = self.min_corner(id);
        pos.cmpge(min).all() && pos.cmplt(min + IVec3::splat(self.chunk_size(id.lod))).all()
    }

    pub fn parent(&self, id: ChunkId) -> Option<ChunkId> {
        (id.lod < self.max_lod()).then(|| ChunkId::new(id.lod + 1, id.coord >> 1i32))
    }

    /// The eight children one LOD finer, `None` at LOD 0.
    /// Octant order: bit 0 = x, bit 1 = y, bit 2 = z.
    pub fn children(&self, id: ChunkId) -> Option<[ChunkId; 8]> {
        if id.lod == 0 {
            return None;
        }
        let base = id.coord * 2;
        Some(std::array::from_fn(|octant| {
            let o = octant as i32;
            ChunkId::new(id.lod - 1, base + IVec3::new(o & 1, (o >> 1) & 1, (o >> 2) & 1))
        }))
    }

    /// Same-LOD neighbour at `offset` (in chunk units), `None` outside the field
    pub fn neighbor(&self, id: ChunkId, offset: IVec3) -> Option<ChunkId> {
        let n = ChunkId::new(id.lod, id.coord + offset);
        self.is_valid(n).then_some(n)
    }

    /// True when `ancestor` is `id` or one of its ancestors
    pub fn is_ancestor_or_self(&self, ancestor: ChunkId, id: ChunkId) -> bool {
        ancestor.lod >= id.lod && (id.coord >> (ancestor.lod - id.lod) as i32) == ancestor.coord
    }

    /// Whether two chunks cover overlapping volumes
    pub fn overlaps(&self, a: ChunkId, b: ChunkId) -> bool {
        self.is_ancestor_or_self(a, b) || self.is_ancestor_or_self(b, a)
    }

    /// Every valid chunk, at every LOD, whose sampled region contains `pos`.
    ///
    /// The sampled region is the closed chunk box padded by `margin` lattice
    /// steps, matching what the mesher reads.
    pub fn chunks_touching(&self, pos: IVec3, margin: i32) -> Vec<ChunkId> {
        let mut result = Vec::new();
        for lod in 0..=self.max_lod() {
            let size = self.chunk_size(lod);
            let pad = margin << lod;
            let lo = (pos - IVec3::splat(size + pad)).div_euclid(IVec3::splat(size));
            let hi = (pos + IVec3::splat(pad)).div_euclid(IVec3::splat(size));
            for z in lo.z..=hi.z {
                for y in lo.y..=hi.y {
                    for x in lo.x..=hi.x {
                        let id = ChunkId::new(lod, IVec3::new(x, y, z));
                        if !self.is_valid(id) {
                            continue;
                        }
                        let min = self.min_corner(id) - IVec3::splat(pad);
                        let max = self.min_corner(id) + IVec3::splat(size + pad);
                        if pos.cmpge(min).all() && pos.cmple(max).all() {
                            result.push(id);
                        }
                    }
                }
            }
        }
        result
    }

    /// Distance in voxels from `point` to the chunk bounds
    pub fn distance_to(&self, id: ChunkId, point: Vec3) -> f32 {
        self.bounds(id).distance_to_point(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let graph = ChunkGraph::new(9);
        assert_eq!(graph.chunk_cells(), 16);
        assert_eq!(graph.max_lod(), 5);
        assert_eq!(graph.chunk_size(0), 16);
        assert_eq!(graph.chunk_size(5), 512);
        assert_eq!(graph.chunks_per_axis(0), 32);
        assert_eq!(graph.root(), ChunkId::new(5, IVec3::ZERO));
    }

    #[test]
    fn test_small_field_clamps_chunk_cells() {
        let graph = ChunkGraph::new(3);
        assert_eq!(graph.chunk_cells(), 8);
        assert_eq!(graph.max_lod(), 0);
        assert_eq!(graph.chunk_size(0), 8);
        assert_eq!(graph.parent(graph.root()), None);
    }

    #[test]
    fn test_chunk_at() {
        let graph = ChunkGraph::new(6);
        assert_eq!(graph.chunk_at(IVec3::new(17, 0, 63), 0), Some(ChunkId::new(0, IVec3::new(1, 0, 3))));
        assert_eq!(graph.chunk_at(IVec3::new(17, 0, 63), 2), Some(graph.root()));
        assert_eq!(graph.chunk_at(IVec3::new(-1, 0, 0), 0), None);
        assert_eq!(graph.chunk_at(IVec3::new(64, 0, 0), 0), None);
        assert_eq!(graph.chunk_at(IVec3::ZERO, 3), None);
    }

    #[test]
    fn test_parent_children() {
        let graph = ChunkGraph::new(6);
        let id = ChunkId::new(1, IVec3::new(1, 0, 1));
        let children = graph.children(id).unwrap();
        assert_eq!(children[0], ChunkId::new(0, IVec3::new(2, 0, 2)));
        assert_eq!(children[7], ChunkId::new(0, IVec3::new(3, 1, 3)));
        for child in children {
            assert_eq!(graph.parent(child), Some(id));
            assert!(graph.is_ancestor_or_self(id, child));
            assert!(graph.overlaps(child, id));
        }
        assert!(graph.children(children[0]).is_none());
        assert!(!graph.overlaps(children[0], children[1]));
    }

    #[test]
    fn test_neighbor() {
        let graph = ChunkGraph::new(6);
        let id = ChunkId::new(0, IVec3::new(0, 1, 3));
        assert_eq!(graph.neighbor(id, IVec3::X), Some(ChunkId::new(0, IVec3::new(1, 1, 3))));
        assert_eq!(graph.neighbor(id, IVec3::NEG_X), None);
        assert_eq!(graph.neighbor(id, IVec3::Z), None);
    }

    #[test]
    fn test_bounds_contains() {
        let graph = ChunkGraph::new(6);
        let id = ChunkId::new(1, IVec3::new(1, 0, 0));
        assert_eq!(graph.min_corner(id), IVec3::new(32, 0, 0));
        assert_eq!(graph.bounds(id).size(), Vec3::splat(32.0));
        assert!(graph.contains(id, IVec3::new(32, 0, 31)));
        assert!(!graph.contains(id, IVec3::new(64, 0, 0)));
        assert_eq!(graph.distance_to(id, Vec3::new(20.0, 0.0, 0.0)), 12.0);
    }

    #[test]
    fn test_chunks_touching_interior() {
        let graph = ChunkGraph::new(6);
        // Deep inside chunk (1,1,1) at LOD 0: one chunk per LOD
        let touching = graph.chunks_touching(IVec3::new(24, 24, 24), 1);
        assert_eq!(touching.len(), 3);
        assert!(touching.contains(&ChunkId::new(0, IVec3::ONE)));
        assert!(touching.contains(&ChunkId::new(1, IVec3::ZERO)));
        assert!(touching.contains(&graph.root()));
    }

    #[test]
    fn test_chunks_touching_boundary() {
        let graph = ChunkGraph::new(6);
        // On the x = 16 face: both LOD 0 chunks along x sample it
        let touching = graph.chunks_touching(IVec3::new(16, 8, 8), 0);
        assert!(touching.contains(&ChunkId::new(0, IVec3::new(0, 0, 0))));
        assert!(touching.contains(&ChunkId::new(0, IVec3::new(1, 0, 0))));

        // One voxel past the face, only inside the margin of chunk 0
        let touching = graph.chunks_touching(IVec3::new(17, 8, 8), 1);
        assert!(touching.contains(&ChunkId::new(0, IVec3::new(0, 0, 0))));
        let touching = graph.chunks_touching(IVec3::new(17, 8, 8), 0);
        assert!(!touching.contains(&ChunkId::new(0, IVec3::new(0, 0, 0))));
    }

    #[test]
    fn test_chunks_touching_all_valid() {
        let graph = ChunkGraph::new(5);
        for id in graph.chunks_touching(IVec3::ZERO, 1) {
            assert!(graph.is_valid(id));
        }
    }
}
