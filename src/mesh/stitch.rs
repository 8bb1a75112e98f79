//! Crack-free seams between chunks of different LOD.
//!
//! A chunk bordering a coarser neighbour re-evaluates every boundary lattice
//! point shared with that neighbour as the piecewise-linear (Freudenthal)
//! interpolant of the coarser lattice. The fine Kuhn triangulation of a face
//! refines the coarse one, so the fine side's iso-curve on the face is the
//! same curve the coarse chunk produces.

use serde::{Deserialize, Serialize};

use crate::core::types::IVec3;
use crate::mesh::grid::SampleGrid;
use crate::voxel::VoxelValue;

/// Face order used by [`TransitionMask`]
pub const FACE_OFFSETS: [IVec3; 6] = [
    IVec3::NEG_X,
    IVec3::X,
    IVec3::NEG_Y,
    IVec3::Y,
    IVec3::NEG_Z,
    IVec3::Z,
];

/// One bit per face bordering a coarser neighbour, in [`FACE_OFFSETS`] order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionMask(pub u8);

impl TransitionMask {
    pub const NONE: TransitionMask = TransitionMask(0);

    pub fn has_face(self, face: usize) -> bool {
        self.0 & (1 << face) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// LOD of the mesh covering each of the 26 same-size neighbour regions.
///
/// `None` marks regions outside the field. A region subdivided finer than
/// the chunk itself is recorded at the chunk's own LOD; only coarser
/// neighbours change the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NeighborLods {
    lods: [Option<u8>; 27],
}

impl NeighborLods {
    /// Every neighbour at the same LOD
    pub fn uniform(lod: u8) -> Self {
        Self { lods: [Some(lod); 27] }
    }

    fn slot(offset: IVec3) -> usize {
        let o = offset + IVec3::ONE;
        (o.x + o.y * 3 + o.z * 9) as usize
    }

    /// `offset` components must be in `-1..=1`
    pub fn get(&self, offset: IVec3) -> Option<u8> {
        self.lods[Self::slot(offset)]
    }

    pub fn set(&mut self, offset: IVec3, lod: Option<u8>) {
        self.lods[Self::slot(offset)] = lod;
    }

    /// Faces bordering a coarser neighbour
    pub fn transition_mask(&self, lod: u8) -> TransitionMask {
        let mut bits = 0;
        for (face, offset) in FACE_OFFSETS.iter().enumerate() {
            if self.get(*offset).is_some_and(|l| l > lod) {
                bits |= 1 << face;
            }
        }
        TransitionMask(bits)
    }

    /// Coarsest LOD among the chunk and the neighbours whose closed bounds
    /// contain lattice index `i` of a chunk with `cells` cells per edge
    pub fn coarsest_touching(&self, lod: u8, i: IVec3, cells: i32) -> u8 {
        let range = |v: i32| -> (i32, i32) {
            (if v == 0 { -1 } else { 0 }, if v == cells { 1 } else { 0 })
        };
        let (x0, x1) = range(i.x);
        let (y0, y1) = range(i.y);
        let (z0, z1) = range(i.z);

        let mut coarsest = lod;
        for z in z0..=z1 {
            for y in y0..=y1 {
                for x in x0..=x1 {
                    if let Some(l) = self.get(IVec3::new(x, y, z)) {
                        coarsest = coarsest.max(l);
                    }
                }
            }
        }
        coarsest
    }
}

/// Piecewise-linear interpolant of the lattice of step `step` at `p`.
///
/// The containing cube is split along its main diagonal exactly like the
/// mesher's tetrahedra: sorting the fractional coordinates in descending
/// order `f_a >= f_b >= f_c` selects the tetrahedron
/// `c000, c000 + e_a, c000 + e_a + e_b, c111`.
pub fn freudenthal_interpolate(p: IVec3, step: i32, sample: &impl Fn(IVec3) -> VoxelValue) -> VoxelValue {
    let base = p.div_euclid(IVec3::splat(step)) * step;
    let local = p - base;
    if local == IVec3::ZERO {
        return sample(p);
    }

    let f = local.as_vec3() / step as f32;
    let mut axes = [0usize, 1, 2];
    axes.sort_by(|&a, &b| f[b].total_cmp(&f[a]));

    let unit = |axis: usize| {
        let mut e = IVec3::ZERO;
        e[axis] = step;
        e
    };
    let c1 = base + unit(axes[0]);
    let c2 = c1 + unit(axes[1]);
    let c3 = c2 + unit(axes[2]);

    let weights = [
        1.0 - f[axes[0]],
        f[axes[0]] - f[axes[1]],
        f[axes[1]] - f[axes[2]],
        f[axes[2]],
    ];

    let mut density = 0.0;
    let mut material = None;
    let mut best = 0.0;
    for (corner, weight) in [base, c1, c2, c3].into_iter().zip(weights) {
        if weight <= 0.0 {
            continue;
        }
        let value = sample(corner);
        density += weight * value.density;
        if material.is_none() || weight > best {
            best = weight;
            material = Some(value.material);
        }
    }

    VoxelValue::new(density, material.unwrap_or_default())
}

/// Degenerate the boundary of `grid` (a chunk at `lod`) against coarser
/// neighbours. Returns the faces that border a coarser neighbour.
pub fn stitch_boundary(
    grid: &mut SampleGrid,
    lod: u8,
    neighbors: &NeighborLods,
    sample: &impl Fn(IVec3) -> VoxelValue,
) -> TransitionMask {
    let mask = neighbors.transition_mask(lod);
    let cells = grid.cells();

    for z in 0..=cells {
        for y in 0..=cells {
            for x in 0..=cells {
                let i = IVec3::new(x, y, z);
                let on_boundary = i.cmpeq(IVec3::ZERO).any() || i.cmpeq(IVec3::splat(cells)).any();
                if !on_boundary {
                    continue;
                }
                let coarsest = neighbors.coarsest_touching(lod, i, cells);
                if coarsest > lod {
                    let p = grid.lattice_position(i);
                    grid.set(i, freudenthal_interpolate(p, 1 << coarsest, sample));
                }
            }
        }
    }

    mask
}
