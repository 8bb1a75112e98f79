//! Marching tetrahedra over the Freudenthal (Kuhn) decomposition.
//!
//! Every cube cell is split into six tetrahedra sharing the main diagonal
//! from corner 0 to corner 7. Each tetrahedron walks `0 -> e_a -> e_a + e_b
//! -> 7` for one permutation `(a, b, c)` of the axes, which is the same
//! decomposition the boundary stitcher interpolates over.

use std::collections::HashMap;

use crate::core::types::{IVec3, Vec3};
use crate::mesh::chunk_mesh::ChunkMesh;
use crate::mesh::grid::SampleGrid;

/// Axis permutations; tetrahedron vertices are corner bitmasks
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 1 | 2, 7],
    [0, 1, 1 | 4, 7],
    [0, 2, 2 | 1, 7],
    [0, 2, 2 | 4, 7],
    [0, 4, 4 | 1, 7],
    [0, 4, 4 | 2, 7],
];

fn corner_offset(corner: usize) -> IVec3 {
    IVec3::new((corner & 1) as i32, ((corner >> 1) & 1) as i32, ((corner >> 2) & 1) as i32)
}

struct MeshBuilder<'a> {
    grid: &'a SampleGrid,
    mesh: ChunkMesh,
    edge_vertices: HashMap<(usize, usize), u32>,
}

impl<'a> MeshBuilder<'a> {
    fn density(&self, i: IVec3) -> f32 {
        self.grid.get(i).density
    }

    /// Central-difference gradient; points towards increasing density (into solid)
    fn gradient(&self, i: IVec3) -> Vec3 {
        Vec3::new(
            self.density(i + IVec3::X) - self.density(i - IVec3::X),
            self.density(i + IVec3::Y) - self.density(i - IVec3::Y),
            self.density(i + IVec3::Z) - self.density(i - IVec3::Z),
        )
    }

    /// Vertex on the edge between a solid and an empty lattice point
    fn edge_vertex(&mut self, a: IVec3, b: IVec3) -> u32 {
        let (ka, kb) = (self.grid.linear_index(a), self.grid.linear_index(b));
        // Canonical endpoint order keeps shared vertices bit-identical
        let (a, b, key) = if ka <= kb { (a, b, (ka, kb)) } else { (b, a, (kb, ka)) };
        if let Some(&index) = self.edge_vertices.get(&key) {
            return index;
        }

        let va = self.grid.get(a);
        let vb = self.grid.get(b);
        let t = va.density / (va.density - vb.density);
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };

        let pa = self.grid.lattice_position(a).as_vec3();
        let pb = self.grid.lattice_position(b).as_vec3();
        let position = pa + (pb - pa) * t;
        let normal = -(self.gradient(a).lerp(self.gradient(b), t)).normalize_or_zero();
        let material = if va.is_solid() { va.material } else { vb.material };

        let index = self.mesh.positions.len() as u32;
        self.mesh.positions.push(position);
        self.mesh.normals.push(normal);
        self.mesh.materials.push(material);
        self.edge_vertices.insert(key, index);
        index
    }

    /// Emit a triangle facing away from the solid side
    fn triangle(&mut self, mut tri: [u32; 3], outward: Vec3) {
        let p = tri.map(|i| self.mesh.positions[i as usize]);
        let normal = (p[1] - p[0]).cross(p[2] - p[0]);
        if normal.length_squared() <= f32::EPSILON * f32::EPSILON {
            return;
        }
        if normal.dot(outward) < 0.0 {
            tri.swap(1, 2);
        }
        self.mesh.indices.extend_from_slice(&tri);
    }

    fn tetrahedron(&mut self, corners: [IVec3; 4]) {
        let solid: Vec<IVec3> = corners.iter().copied().filter(|&c| self.grid.get(c).is_solid()).collect();
        let empty: Vec<IVec3> = corners.iter().copied().filter(|&c| !self.grid.get(c).is_solid()).collect();
        if solid.is_empty() || empty.is_empty() {
            return;
        }

        let centroid = |points: &[IVec3]| {
            points.iter().map(|p| p.as_vec3()).sum::<Vec3>() / points.len() as f32
        };
        // Lattice-index space has the same orientation as voxel space
        let outward = centroid(&empty) - centroid(&solid);

        match (solid.len(), empty.len()) {
            (1, 3) => {
                let s = solid[0];
                let tri = [
                    self.edge_vertex(s, empty[0]),
                    self.edge_vertex(s, empty[1]),
                    self.edge_vertex(s, empty[2]),
                ];
                self.triangle(tri, outward);
            }
            (3, 1) => {
                let e = empty[0];
                let tri = [
                    self.edge_vertex(solid[0], e),
                    self.edge_vertex(solid[1], e),
                    self.edge_vertex(solid[2], e),
                ];
                self.triangle(tri, outward);
            }
            _ => {
                // Two and two: quad around the four crossing edges
                let q = [
                    self.edge_vertex(solid[0], empty[0]),
                    self.edge_vertex(solid[0], empty[1]),
                    self.edge_vertex(solid[1], empty[1]),
                    self.edge_vertex(solid[1], empty[0]),
                ];
                self.triangle([q[0], q[1], q[2]], outward);
                self.triangle([q[0], q[2], q[3]], outward);
            }
        }
    }
}

/// Polygonize the iso-surface `density == 0` of every cell of the grid
pub fn polygonize(grid: &SampleGrid) -> ChunkMesh {
    let mut builder = MeshBuilder {
        grid,
        mesh: ChunkMesh::default(),
        edge_vertices: HashMap::new(),
    };

    let cells = grid.cells();
    for z in 0..cells {
        for y in 0..cells {
            for x in 0..cells {
                let base = IVec3::new(x, y, z);
                let corners: [IVec3; 8] = std::array::from_fn(|c| base + corner_offset(c));

                let solid_count = corners.iter().filter(|&&c| grid.get(c).is_solid()).count();
                if solid_count == 0 || solid_count == 8 {
                    continue;
                }

                for tet in TETRAHEDRA {
                    builder.tetrahedron(tet.map(|c| corners[c]));
                }
            }
        }
    }

    builder.mesh
}
