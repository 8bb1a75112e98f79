//! Sparse octree of written voxel cells
//!
//! Arena of nodes addressed by `u32` index. Interior nodes point at a run of
//! eight consecutive children; nodes at block level point at a dense
//! `BLOCK_SIZE^3` block. Only blocks containing at least one written cell
//! exist; everything else falls back to the world generator.

use glam::IVec3;

use crate::voxel::voxel::VoxelValue;

/// Sentinel for "no child run" / "no block"
pub const NO_NODE: u32 = u32::MAX;

/// Maximum block depth: leaf blocks are at most 8x8x8
pub const MAX_BLOCK_DEPTH: u8 = 3;

/// Octree node
#[derive(Clone, Copy, Debug)]
struct OctreeNode {
    /// Index of the first of eight children
    children: u32,
    /// Index of the leaf block (block-level nodes only)
    block: u32,
}

impl OctreeNode {
    const EMPTY: OctreeNode = OctreeNode {
        children: NO_NODE,
        block: NO_NODE,
    };
}

/// Dense leaf block
#[derive(Clone, Debug)]
pub struct VoxelBlock {
    origin: IVec3,
    values: Vec<VoxelValue>,
    /// One bit per cell
    written: Vec<u64>,
}

impl VoxelBlock {
    fn new(origin: IVec3, edge: i32) -> Self {
        let cells = (edge * edge * edge) as usize;
        Self {
            origin,
            values: vec![VoxelValue::default(); cells],
            written: vec![0; cells.div_ceil(64)],
        }
    }

    fn is_written(&self, index: usize) -> bool {
        self.written[index / 64] & (1 << (index % 64)) != 0
    }

    fn mark_written(&mut self, index: usize) {
        self.written[index / 64] |= 1 << (index % 64);
    }

    /// Number of written cells
    pub fn written_count(&self) -> usize {
        self.written.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Octree over a cube of `2^depth` cells per edge
#[derive(Clone, Debug)]
pub struct Octree {
    depth: u8,
    block_depth: u8,
    nodes: Vec<OctreeNode>,
    blocks: Vec<VoxelBlock>,
}

impl Octree {
    /// Create an empty octree (root node only)
    pub fn new(depth: u8) -> Self {
        Self {
            depth,
            block_depth: depth.min(MAX_BLOCK_DEPTH),
            nodes: vec![OctreeNode::EMPTY],
            blocks: Vec::new(),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Edge length of a leaf block in cells
    pub fn block_edge(&self) -> i32 {
        1 << self.block_depth
    }

    fn cell_index(&self, block: &VoxelBlock, p: IVec3) -> usize {
        let edge = self.block_edge();
        let local = p - block.origin;
        (local.x + local.y * edge + local.z * edge * edge) as usize
    }

    fn octant(p: IVec3, level: u8) -> u32 {
        let shift = level - 1;
        (((p.x >> shift) & 1) | (((p.y >> shift) & 1) << 1) | (((p.z >> shift) & 1) << 2)) as u32
    }

    /// Descend to the block containing `p`, if any.
    /// `p` must already be in bounds.
    fn find_block(&self, p: IVec3) -> Option<u32> {
        let mut node = 0u32;
        let mut level = self.depth;
        while level > self.block_depth {
            let children = self.nodes[node as usize].children;
            if children == NO_NODE {
                return None;
            }
            node = children + Self::octant(p, level);
            level -= 1;
        }
        let block = self.nodes[node as usize].block;
        (block != NO_NODE).then_some(block)
    }

    /// Descend to the block containing `p`, allocating nodes on the way
    fn find_or_create_block(&mut self, p: IVec3) -> u32 {
        let mut node = 0u32;
        let mut level = self.depth;
        while level > self.block_depth {
            let mut children = self.nodes[node as usize].children;
            if children == NO_NODE {
                children = self.nodes.len() as u32;
                self.nodes.extend_from_slice(&[OctreeNode::EMPTY; 8]);
                self.nodes[node as usize].children = children;
            }
            node = children + Self::octant(p, level);
            level -= 1;
        }

        let block = self.nodes[node as usize].block;
        if block != NO_NODE {
            return block;
        }

        let edge = self.block_edge();
        let origin = IVec3::new(p.x & !(edge - 1), p.y & !(edge - 1), p.z & !(edge - 1));
        let index = self.blocks.len() as u32;
        self.blocks.push(VoxelBlock::new(origin, edge));
        self.nodes[node as usize].block = index;
        index
    }

    /// Written value at `p`, `None` if the cell was never written
    pub fn get(&self, p: IVec3) -> Option<VoxelValue> {
        let block = &self.blocks[self.find_block(p)? as usize];
        let index = self.cell_index(block, p);
        block.is_written(index).then(|| block.values[index])
    }

    /// Write a cell, returning its previous written value
    pub fn set(&mut self, p: IVec3, value: VoxelValue) -> Option<VoxelValue> {
        let block_index = self.find_or_create_block(p);
        let index = self.cell_index(&self.blocks[block_index as usize], p);
        let block = &mut self.blocks[block_index as usize];
        let previous = block.is_written(index).then(|| block.values[index]);
        block.values[index] = value;
        block.mark_written(index);
        previous
    }

    /// Drop every node and block
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(OctreeNode::EMPTY);
        self.blocks.clear();
    }

    /// Visit every written cell (block order, then x-fastest inside a block)
    pub fn for_each_written(&self, mut f: impl FnMut(IVec3, VoxelValue)) {
        let edge = self.block_edge();
        for block in &self.blocks {
            for (index, value) in block.values.iter().enumerate() {
                if !block.is_written(index) {
                    continue;
                }
                let i = index as i32;
                let local = IVec3::new(i % edge, (i / edge) % edge, i / (edge * edge));
                f(block.origin + local, *value);
            }
        }
    }

    /// Number of written cells
    pub fn written_count(&self) -> usize {
        self.blocks.iter().map(VoxelBlock::written_count).sum()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Calculate memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        let block_bytes: usize = self
            .blocks
            .iter()
            .map(|b| {
                b.values.len() * std::mem::size_of::<VoxelValue>()
                    + b.written.len() * std::mem::size_of::<u64>()
                    + std::mem::size_of::<VoxelBlock>()
            })
            .sum();
        self.nodes.len() * std::mem::size_of::<OctreeNode>() + block_bytes
    }
}
