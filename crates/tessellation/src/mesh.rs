use std::collections::HashMap;

use brep_kernel::geometry::point::Point3d;
use brep_kernel::geometry::vector::Vec3;
use brep_kernel::Shape;
use serde::{Deserialize, Serialize};

use crate::TessellationError;

/// An indexed triangle mesh.
///
/// Holds no reference back into the topology it was made from; `face_ids`
/// records, per triangle, the index of the source face in [`Shape::faces`]
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriangleMesh {
    /// Vertex positions [x, y, z, x, y, z, ...]
    pub positions: Vec<f64>,
    /// Unit vertex normals [nx, ny, nz, ...]
    pub normals: Vec<f64>,
    /// Counter-clockwise triangle indices [i0, i1, i2, ...]
    pub indices: Vec<u32>,
    pub face_ids: Vec<u32>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn add_vertex(&mut self, pos: Point3d, normal: Vec3) -> u32 {
        let idx = self.vertex_count() as u32;
        self.positions.extend_from_slice(&pos.to_array());
        self.normals.extend_from_slice(&normal.to_array());
        idx
    }

    pub fn add_triangle(&mut self, i0: u32, i1: u32, i2: u32, face: u32) {
        self.indices.extend_from_slice(&[i0, i1, i2]);
        self.face_ids.push(face);
    }

    pub fn merge(&mut self, other: &TriangleMesh) {
        let offset = self.vertex_count() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.indices.extend(other.indices.iter().map(|&i| i + offset));
        self.face_ids.extend_from_slice(&other.face_ids);
    }

    pub fn position(&self, i: u32) -> Point3d {
        let k = 3 * i as usize;
        Point3d::new(self.positions[k], self.positions[k + 1], self.positions[k + 2])
    }

    pub fn normal(&self, i: u32) -> Vec3 {
        let k = 3 * i as usize;
        Vec3::new(self.normals[k], self.normals[k + 1], self.normals[k + 2])
    }

    pub fn triangle(&self, t: usize) -> [u32; 3] {
        [self.indices[3 * t], self.indices[3 * t + 1], self.indices[3 * t + 2]]
    }

    pub fn triangle_points(&self, t: usize) -> [Point3d; 3] {
        self.triangle(t).map(|i| self.position(i))
    }

    /// Positions narrowed for GPU upload.
    pub fn positions_f32(&self) -> Vec<f32> {
        self.positions.iter().map(|&x| x as f32).collect()
    }

    pub fn normals_f32(&self) -> Vec<f32> {
        self.normals.iter().map(|&x| x as f32).collect()
    }

    /// Signed enclosed volume by the divergence theorem. Positive for a
    /// closed mesh with outward winding.
    pub fn volume(&self) -> f64 {
        (0..self.triangle_count())
            .map(|t| {
                let [a, b, c] = self.triangle_points(t);
                a.to_vec3().triple(&b.to_vec3(), &c.to_vec3())
            })
            .sum::<f64>()
            / 6.0
    }

    pub fn area(&self) -> f64 {
        (0..self.triangle_count())
            .map(|t| {
                let [a, b, c] = self.triangle_points(t);
                0.5 * (b - a).cross(&(c - a)).length()
            })
            .sum()
    }

    /// Merge vertices at bit-identical positions whose normals differ by at
    /// most `angle`, then drop triangles that became degenerate. Returns the
    /// number of vertices removed.
    pub fn weld(&mut self, angle: f64) -> usize {
        let n = self.vertex_count();
        let mut buckets: HashMap<[u64; 3], Vec<u32>> = HashMap::new();
        let mut remap = vec![0u32; n];
        let mut positions = Vec::with_capacity(self.positions.len());
        let mut sums: Vec<Vec3> = Vec::with_capacity(n);

        for i in 0..n as u32 {
            let p = self.position(i);
            let normal = self.normal(i);
            let reps = buckets.entry(position_key(&p)).or_default();
            let found = reps
                .iter()
                .copied()
                .find(|&r| sums[r as usize].angle_to(&normal) <= angle);
            remap[i as usize] = match found {
                Some(r) => {
                    sums[r as usize] = sums[r as usize] + normal;
                    r
                }
                None => {
                    let r = sums.len() as u32;
                    positions.extend_from_slice(&p.to_array());
                    sums.push(normal);
                    reps.push(r);
                    r
                }
            };
        }

        let mut indices = Vec::with_capacity(self.indices.len());
        let mut face_ids = Vec::with_capacity(self.face_ids.len());
        for t in 0..self.triangle_count() {
            let [a, b, c] = self.triangle(t).map(|i| remap[i as usize]);
            if a != b && b != c && c != a {
                indices.extend_from_slice(&[a, b, c]);
                face_ids.push(self.face_ids[t]);
            }
        }

        let removed = n - sums.len();
        self.normals = sums.iter().flat_map(|s| s.normalize_or(Vec3::Z).to_array()).collect();
        self.positions = positions;
        self.indices = indices;
        self.face_ids = face_ids;
        removed
    }

    /// Number of edges used by exactly one triangle, with vertices matched
    /// by position. Zero for a crack-free closed mesh.
    pub fn boundary_edge_count(&self) -> usize {
        let mut ids: HashMap<[u64; 3], u32> = HashMap::new();
        let canonical: Vec<u32> = (0..self.vertex_count() as u32)
            .map(|i| {
                let next = ids.len() as u32;
                *ids.entry(position_key(&self.position(i))).or_insert(next)
            })
            .collect();
        let mut uses: HashMap<(u32, u32), usize> = HashMap::new();
        for t in 0..self.triangle_count() {
            let tri = self.triangle(t).map(|i| canonical[i as usize]);
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                *uses.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
        uses.values().filter(|&&n| n == 1).count()
    }

    /// Largest distance from a triangle centroid to the surface of its
    /// source face. `shape` must be the shape the mesh was made from.
    pub fn surface_deviation(&self, shape: &Shape) -> Result<f64, TessellationError> {
        let faces = shape.faces();
        let store = shape.store();
        let mut worst: f64 = 0.0;
        for t in 0..self.triangle_count() {
            let face = faces.get(self.face_ids[t] as usize).ok_or_else(|| {
                TessellationError::InvalidInput(format!("triangle {t} names face {} outside the shape", self.face_ids[t]))
            })?;
            let [a, b, c] = self.triangle_points(t);
            let centroid = Point3d::barycentric(&a, &b, &c, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
            let (on_surface, _, _) = store.faces[*face].surface.project(&centroid)?;
            worst = worst.max(centroid.distance_to(&on_surface));
        }
        Ok(worst)
    }
}

fn position_key(p: &Point3d) -> [u64; 3] {
    // -0.0 and 0.0 must share a key.
    p.to_array().map(|x| (x + 0.0).to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two triangles sharing an edge, written with duplicated vertices.
    fn split_quad() -> TriangleMesh {
        let mut m = TriangleMesh::new();
        let up = Vec3::Z;
        let a = m.add_vertex(Point3d::new(0.0, 0.0, 0.0), up);
        let b = m.add_vertex(Point3d::new(1.0, 0.0, 0.0), up);
        let c = m.add_vertex(Point3d::new(1.0, 1.0, 0.0), up);
        m.add_triangle(a, b, c, 0);
        let d = m.add_vertex(Point3d::new(0.0, 0.0, 0.0), up);
        let e = m.add_vertex(Point3d::new(1.0, 1.0, 0.0), up);
        let f = m.add_vertex(Point3d::new(0.0, 1.0, 0.0), up);
        m.add_triangle(d, e, f, 0);
        m
    }

    #[test]
    fn test_counts_and_merge() {
        let mut m = split_quad();
        assert_eq!(m.vertex_count(), 6);
        assert_eq!(m.triangle_count(), 2);
        let other = split_quad();
        m.merge(&other);
        assert_eq!(m.vertex_count(), 12);
        assert_eq!(m.triangle(2), [6, 7, 8]);
        assert_eq!(m.face_ids.len(), 4);
    }

    #[test]
    fn test_weld_joins_identical_points() {
        let mut m = split_quad();
        assert_eq!(m.boundary_edge_count(), 4);
        let removed = m.weld(0.1);
        assert_eq!(removed, 2);
        assert_eq!(m.vertex_count(), 4);
        assert_eq!(m.triangle_count(), 2);
        assert_eq!(m.boundary_edge_count(), 4);
        assert_relative_eq!(m.area(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weld_keeps_creases() {
        let mut m = TriangleMesh::new();
        m.add_vertex(Point3d::ORIGIN, Vec3::Z);
        m.add_vertex(Point3d::ORIGIN, Vec3::X);
        m.add_vertex(Point3d::ORIGIN, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(m.weld(0.5), 1);
        assert_eq!(m.vertex_count(), 2);
    }

    #[test]
    fn test_tetrahedron_volume() {
        let mut m = TriangleMesh::new();
        let p = [
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ];
        let ids: Vec<u32> = p.iter().map(|q| m.add_vertex(*q, Vec3::Z)).collect();
        for [a, b, c] in [[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]] {
            m.add_triangle(ids[a], ids[b], ids[c], 0);
        }
        assert_relative_eq!(m.volume(), 1.0 / 6.0, epsilon = 1e-12);
        assert_eq!(m.boundary_edge_count(), 0);
        assert_eq!(m.positions_f32().len(), 12);
        assert_eq!(m.normals_f32()[2], 1.0);
    }
}
