//! Lattice samples of one chunk, including the margin ring

use crate::core::types::IVec3;
use crate::voxel::{FieldReadGuard, VoxelValue};

/// Lattice steps sampled beyond each chunk face (for normals and edits
/// touching the border)
pub const MESH_MARGIN: i32 = 1;

/// Samples at `origin + i * step` for `i` in `-MESH_MARGIN..=cells + MESH_MARGIN`
#[derive(Clone, Debug)]
pub struct SampleGrid {
    origin: IVec3,
    step: i32,
    cells: i32,
    dim: i32,
    values: Vec<VoxelValue>,
}

impl SampleGrid {
    /// Sample a chunk lattice through a read guard.
    /// Margin samples outside the field come from the generator.
    pub fn sample(field: &FieldReadGuard<'_>, origin: IVec3, step: i32, cells: i32) -> Self {
        Self::from_fn(origin, step, cells, |p| field.get_or_generate(p))
    }

    /// Build a grid from any sampling function of global lattice positions
    pub fn from_fn(origin: IVec3, step: i32, cells: i32, mut f: impl FnMut(IVec3) -> VoxelValue) -> Self {
        let dim = cells + 1 + 2 * MESH_MARGIN;
        let mut values = Vec::with_capacity((dim * dim * dim) as usize);
        for z in -MESH_MARGIN..=cells + MESH_MARGIN {
            for y in -MESH_MARGIN..=cells + MESH_MARGIN {
                for x in -MESH_MARGIN..=cells + MESH_MARGIN {
                    values.push(f(origin + IVec3::new(x, y, z) * step));
                }
            }
        }
        Self {
            origin,
            step,
            cells,
            dim,
            values,
        }
    }

    pub fn cells(&self) -> i32 {
        self.cells
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn origin(&self) -> IVec3 {
        self.origin
    }

    /// Linear index of lattice index `i` (margin included)
    pub fn linear_index(&self, i: IVec3) -> usize {
        let s = i + IVec3::splat(MESH_MARGIN);
        (s.x + s.y * self.dim + s.z * self.dim * self.dim) as usize
    }

    pub fn get(&self, i: IVec3) -> VoxelValue {
        self.values[self.linear_index(i)]
    }

    pub fn set(&mut self, i: IVec3, value: VoxelValue) {
        let index = self.linear_index(i);
        self.values[index] = value;
    }

    /// Global voxel position of lattice index `i`
    pub fn lattice_position(&self, i: IVec3) -> IVec3 {
        self.origin + i * self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::VoxelMaterial;

    #[test]
    fn test_from_fn_positions() {
        let grid = SampleGrid::from_fn(IVec3::new(32, 0, 0), 2, 4, |p| {
            VoxelValue::new(p.x as f32, VoxelMaterial(p.y as u8))
        });
        assert_eq!(grid.get(IVec3::ZERO).density, 32.0);
        assert_eq!(grid.get(IVec3::new(-1, 0, 0)).density, 30.0);
        assert_eq!(grid.get(IVec3::new(5, 0, 0)).density, 42.0);
        assert_eq!(grid.lattice_position(IVec3::new(4, 1, 0)), IVec3::new(40, 2, 0));
    }

    #[test]
    fn test_set() {
        let mut grid = SampleGrid::from_fn(IVec3::ZERO, 1, 2, |_| VoxelValue::SOLID);
        grid.set(IVec3::new(2, 2, 2), VoxelValue::EMPTY);
        assert_eq!(grid.get(IVec3::new(2, 2, 2)), VoxelValue::EMPTY);
        assert_eq!(grid.get(IVec3::new(3, 3, 3)), VoxelValue::SOLID);
    }
}
