//! Meshing of a single face.
//!
//! The face boundary, sampled from the shared edge discretization, is
//! triangulated in parameter space and then refined by conforming
//! bisection until every triangle is within the interior deflection and
//! angle bounds. Boundary segments that carry real 3D length are never
//! split, so neighbouring faces meet on identical points.

use std::collections::{HashMap, HashSet};

use brep_kernel::geometry::point::{Point2d, Point3d};
use brep_kernel::geometry::polygon;
use brep_kernel::geometry::surfaces::Surface;
use brep_kernel::geometry::transform::BoundingBox;
use brep_kernel::geometry::vector::Vec3;
use brep_kernel::topology::brep::{EntityStore, FaceId};
use brep_kernel::topology::domain::FaceDomain;
use tracing::{debug, warn};

use crate::edges::{edge_samples, EdgeSamples};
use crate::params::MeshParameters;
use crate::TessellationError;

/// Two 3D points closer than this are the same mesh vertex.
const COINCIDENT: f64 = 1e-9;
const MAX_ROUNDS: usize = 64;

/// Triangles of one face, in face-local indexing.
#[derive(Debug, Clone, Default)]
pub struct FaceMesh {
    pub points: Vec<Point3d>,
    pub normals: Vec<Vec3>,
    /// Outward-wound triangles.
    pub triangles: Vec<[u32; 3]>,
}

pub fn mesh_face(
    store: &EntityStore,
    face_id: FaceId,
    samples: &EdgeSamples,
    params: &MeshParameters,
) -> Result<FaceMesh, TessellationError> {
    let face = &store.faces[face_id];
    let domain = FaceDomain::build(store, face_id, &|e| {
        samples
            .get(e)
            .cloned()
            .unwrap_or_else(|| edge_samples(&store.edges[e], params))
    })?;
    if !domain.is_simple() {
        return Err(TessellationError::failure(format!(
            "parameter domain of face {face_id:?} intersects itself"
        )));
    }

    let mut deflection = params.interior_deflection();
    if params.relative {
        deflection *= BoundingBox::from_points(&domain.outer.xyz).diagonal();
    }
    let ((u0, u1), (v0, v1)) = domain.bounds();
    let (su, sv) = face.surface.d1(0.5 * (u0 + u1), 0.5 * (v0 + v1));
    let metric = (positive_or_one(su.length()), positive_or_one(sv.length()));

    let floor = 1e-9 * (metric.0 * (u1 - u0)).hypot(metric.1 * (v1 - v0));

    let mut refiner = Refiner {
        surface: face.surface.as_ref(),
        uv: Vec::new(),
        xyz: Vec::new(),
        fixed: HashSet::new(),
        midpoints: HashMap::new(),
        deflection,
        angle: params.interior_angle(),
        min_size: params.min_size,
        metric,
        floor,
    };
    for ring in std::iter::once(&domain.outer).chain(&domain.inners) {
        let base = refiner.uv.len() as u32;
        let n = ring.len() as u32;
        refiner.uv.extend_from_slice(&ring.uv);
        refiner.xyz.extend_from_slice(&ring.xyz);
        for i in 0..n {
            let (a, b) = (base + i, base + (i + 1) % n);
            if refiner.xyz[a as usize].distance_to(&refiner.xyz[b as usize]) >= COINCIDENT {
                refiner.fixed.insert(key(a, b));
            }
        }
    }

    let mut triangles: Vec<[u32; 3]> = polygon::triangulate(&domain.outer.uv, &domain.hole_polygons())
        .into_iter()
        .map(|t| t.map(|i| i as u32))
        .collect();
    if triangles.is_empty() {
        return Err(TessellationError::failure(format!(
            "parameter domain of face {face_id:?} has no area"
        )));
    }

    let mut converged = false;
    for _ in 0..MAX_ROUNDS {
        match refiner.refine(&triangles) {
            Some(next) => triangles = next,
            None => {
                converged = true;
                break;
            }
        }
        if triangles.len() > params.max_triangles {
            return Err(TessellationError::failure(format!(
                "face {face_id:?} needs more than {} triangles",
                params.max_triangles
            )));
        }
    }
    if !converged {
        warn!(face = ?face_id, triangles = triangles.len(), "refinement stopped at the round limit");
    }

    let out = refiner.finish(store, face_id, &triangles)?;
    debug!(face = ?face_id, triangles = out.triangles.len(), "face meshed");
    Ok(out)
}

fn positive_or_one(x: f64) -> f64 {
    if x > 1e-12 { x } else { 1.0 }
}

fn key(a: u32, b: u32) -> (u32, u32) {
    (a.min(b), a.max(b))
}

enum Verdict {
    Good,
    /// Bisect this edge (by local index 0..3).
    Split(usize),
    /// No splittable edge; insert the centroid.
    Center,
}

/// Chord sag at the midpoint and normal turn between the ends of a segment.
#[derive(Clone, Copy)]
struct Measure {
    deviation: f64,
    turn: f64,
}

struct Refiner<'a> {
    surface: &'a Surface,
    uv: Vec<Point2d>,
    xyz: Vec<Point3d>,
    /// Boundary segments with 3D length; never split.
    fixed: HashSet<(u32, u32)>,
    midpoints: HashMap<(u32, u32), u32>,
    deflection: f64,
    angle: f64,
    min_size: f64,
    /// Parameter-space scale factors for picking the longest edge.
    metric: (f64, f64),
    /// Metric length below which a segment is never split.
    floor: f64,
}

impl Refiner<'_> {
    /// One round of bisection. `None` when every triangle passes.
    fn refine(&mut self, triangles: &[[u32; 3]]) -> Option<Vec<[u32; 3]>> {
        let mut marked: HashSet<(u32, u32)> = HashSet::new();
        let mut centers: HashSet<usize> = HashSet::new();
        let mut cache: HashMap<(u32, u32), Measure> = HashMap::new();
        for (t, tri) in triangles.iter().enumerate() {
            match self.assess(tri, &mut cache) {
                Verdict::Good => {}
                Verdict::Split(k) => {
                    marked.insert(key(tri[k], tri[(k + 1) % 3]));
                }
                Verdict::Center => {
                    centers.insert(t);
                }
            }
        }
        if marked.is_empty() && centers.is_empty() {
            return None;
        }

        let mut next = Vec::with_capacity(triangles.len() * 2);
        for (t, &[v0, v1, v2]) in triangles.iter().enumerate() {
            let verts = [v0, v1, v2];
            let split: Vec<bool> = (0..3)
                .map(|k| marked.contains(&key(verts[k], verts[(k + 1) % 3])))
                .collect();
            match split.iter().filter(|&&s| s).count() {
                0 if centers.contains(&t) => {
                    let c = self.push_centroid(&verts);
                    next.extend([[v0, v1, c], [v1, v2, c], [v2, v0, c]]);
                }
                0 => next.push(verts),
                1 => {
                    let k = split.iter().position(|&s| s).unwrap_or(0);
                    let [a, b, c] = rotate(verts, k);
                    let m = self.midpoint(a, b);
                    next.extend([[a, m, c], [m, b, c]]);
                }
                2 => {
                    let k = split.iter().position(|&s| !s).unwrap_or(0);
                    let [a, b, c] = rotate(verts, (k + 1) % 3);
                    let m0 = self.midpoint(a, b);
                    let m1 = self.midpoint(b, c);
                    next.extend([[m0, b, m1], [a, m0, m1], [a, m1, c]]);
                }
                _ => {
                    let m0 = self.midpoint(v0, v1);
                    let m1 = self.midpoint(v1, v2);
                    let m2 = self.midpoint(v2, v0);
                    next.extend([[v0, m0, m2], [m0, v1, m1], [m2, m1, v2], [m0, m1, m2]]);
                }
            }
        }
        Some(next)
    }

    /// A failing triangle bisects its longest splittable edge.
    ///
    /// Fixed boundary chords were sampled under the edge bounds; their sag
    /// and turn raise the allowance of the triangles they bound, so a
    /// triangle is never split for a defect only its boundary can carry.
    fn assess(&self, tri: &[u32; 3], cache: &mut HashMap<(u32, u32), Measure>) -> Verdict {
        let fixed = [0, 1, 2].map(|k| self.fixed.contains(&key(tri[k], tri[(k + 1) % 3])));
        let measures = [0, 1, 2].map(|k| {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            *cache.entry(key(a, b)).or_insert_with(|| self.measure(a, b))
        });

        let (mut deviation, mut turn) = (self.deflection, self.angle);
        for k in (0..3).filter(|&k| fixed[k]) {
            deviation = deviation.max(measures[k].deviation);
            turn = turn.max(measures[k].turn);
        }
        let deviation = deviation * (1.0 + 1e-9) + 1e-15;
        let turn = turn * (1.0 + 1e-9) + 1e-12;

        let fails = (0..3).any(|k| !fixed[k] && (measures[k].deviation > deviation || measures[k].turn > turn))
            || self.centroid_deviation(tri) > deviation;
        if !fails {
            return Verdict::Good;
        }
        match (0..3)
            .filter(|&k| self.can_split(tri[k], tri[(k + 1) % 3]))
            .max_by(|&i, &j| self.metric_length(tri, i).total_cmp(&self.metric_length(tri, j)))
        {
            Some(k) => Verdict::Split(k),
            None if self.longest_chord(tri) > self.min_size && self.metric_size(tri) > self.floor => Verdict::Center,
            None => Verdict::Good,
        }
    }

    fn can_split(&self, a: u32, b: u32) -> bool {
        if self.fixed.contains(&key(a, b)) {
            return false;
        }
        let d = self.uv[b as usize] - self.uv[a as usize];
        if (self.metric.0 * d.x).hypot(self.metric.1 * d.y) <= self.floor {
            return false;
        }
        let chord = self.xyz[a as usize].distance_to(&self.xyz[b as usize]);
        // Pole segments have no 3D length but still subdivide the fan.
        chord < COINCIDENT || chord > self.min_size
    }

    fn measure(&self, a: u32, b: u32) -> Measure {
        let (ua, ub) = (self.uv[a as usize], self.uv[b as usize]);
        let uv = ua.midpoint(&ub);
        let chord = self.xyz[a as usize].midpoint(&self.xyz[b as usize]);
        Measure {
            deviation: self.surface.point(uv.x, uv.y).distance_to(&chord),
            turn: self
                .surface
                .normal_at(ua.x, ua.y)
                .angle_to(&self.surface.normal_at(ub.x, ub.y)),
        }
    }

    fn centroid_deviation(&self, tri: &[u32; 3]) -> f64 {
        let [a, b, c] = tri.map(|i| i as usize);
        let uv = Point2d::new(
            (self.uv[a].x + self.uv[b].x + self.uv[c].x) / 3.0,
            (self.uv[a].y + self.uv[b].y + self.uv[c].y) / 3.0,
        );
        let third = 1.0 / 3.0;
        let chord = Point3d::barycentric(&self.xyz[a], &self.xyz[b], &self.xyz[c], third, third, third);
        self.surface.point(uv.x, uv.y).distance_to(&chord)
    }

    fn metric_size(&self, tri: &[u32; 3]) -> f64 {
        (0..3).map(|k| self.metric_length(tri, k)).fold(0.0, f64::max)
    }

    fn metric_length(&self, tri: &[u32; 3], k: usize) -> f64 {
        let d = self.uv[tri[(k + 1) % 3] as usize] - self.uv[tri[k] as usize];
        (self.metric.0 * d.x).hypot(self.metric.1 * d.y)
    }

    fn longest_chord(&self, tri: &[u32; 3]) -> f64 {
        (0..3)
            .map(|k| self.xyz[tri[k] as usize].distance_to(&self.xyz[tri[(k + 1) % 3] as usize]))
            .fold(0.0, f64::max)
    }

    fn push_point(&mut self, uv: Point2d, xyz: Point3d) -> u32 {
        self.uv.push(uv);
        self.xyz.push(xyz);
        (self.uv.len() - 1) as u32
    }

    /// Shared midpoint of segment (a, b), created on first request.
    fn midpoint(&mut self, a: u32, b: u32) -> u32 {
        if let Some(&m) = self.midpoints.get(&key(a, b)) {
            return m;
        }
        let uv = self.uv[a as usize].midpoint(&self.uv[b as usize]);
        let (pa, pb) = (self.xyz[a as usize], self.xyz[b as usize]);
        // Points along a pole keep the pole position exactly.
        let xyz = if pa.distance_to(&pb) < COINCIDENT {
            pa
        } else {
            self.surface.point(uv.x, uv.y)
        };
        let m = self.push_point(uv, xyz);
        self.midpoints.insert(key(a, b), m);
        m
    }

    fn push_centroid(&mut self, tri: &[u32; 3]) -> u32 {
        let [a, b, c] = tri.map(|i| self.uv[i as usize]);
        let uv = Point2d::new((a.x + b.x + c.x) / 3.0, (a.y + b.y + c.y) / 3.0);
        let xyz = self.surface.point(uv.x, uv.y);
        self.push_point(uv, xyz)
    }

    /// Drop collapsed triangles, check orientation against the surface, and
    /// emit the used vertices with face normals.
    fn finish(&self, store: &EntityStore, face_id: FaceId, triangles: &[[u32; 3]]) -> Result<FaceMesh, TessellationError> {
        let reversed = store.faces[face_id].reversed;
        let mut out = FaceMesh::default();
        let mut local: HashMap<u32, u32> = HashMap::new();
        for tri in triangles {
            let [a, b, c] = tri.map(|i| self.xyz[i as usize]);
            if a.distance_to(&b) < COINCIDENT || b.distance_to(&c) < COINCIDENT || c.distance_to(&a) < COINCIDENT {
                continue;
            }
            let cross = (b - a).cross(&(c - a));
            let [ua, ub, uc] = tri.map(|i| self.uv[i as usize]);
            let centroid = Point2d::new((ua.x + ub.x + uc.x) / 3.0, (ua.y + ub.y + uc.y) / 3.0);
            let surface_normal = self.surface.normal_at(centroid.x, centroid.y);
            if let Some(n) = cross.normalized() {
                if n.dot(&surface_normal) < -1e-6 {
                    return Err(TessellationError::failure(format!(
                        "triangle inverted against the surface of face {face_id:?} near {centroid:?}"
                    )));
                }
            }

            let mut ids = tri.map(|i| {
                let next = out.points.len() as u32;
                *local.entry(i).or_insert_with(|| {
                    let uv = self.uv[i as usize];
                    out.points.push(self.xyz[i as usize]);
                    out.normals.push(store.face_normal(face_id, uv.x, uv.y));
                    next
                })
            });
            if reversed {
                ids.swap(1, 2);
            }
            out.triangles.push(ids);
        }
        Ok(out)
    }
}

/// Rotate a triangle so that its local edge `k` comes first.
fn rotate(v: [u32; 3], k: usize) -> [u32; 3] {
    [v[k], v[(k + 1) % 3], v[(k + 2) % 3]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::discretize_edges;
    use brep_kernel::topology::primitives::{make_box, make_cylinder, make_sphere};
    use brep_kernel::Shape;

    fn mesh_all(shape: &Shape, params: &MeshParameters) -> Vec<FaceMesh> {
        let samples = discretize_edges(shape.store(), &shape.edges(), params);
        shape
            .faces()
            .into_iter()
            .map(|f| mesh_face(shape.store(), f, &samples, params).unwrap())
            .collect()
    }

    #[test]
    fn test_box_faces_are_two_triangles() {
        let b = make_box(Point3d::ORIGIN, 1.0, 2.0, 3.0).unwrap();
        for fm in mesh_all(&b, &MeshParameters::default()) {
            assert_eq!(fm.triangles.len(), 2);
            assert_eq!(fm.points.len(), 4);
        }
    }

    #[test]
    fn test_cylinder_side_stays_within_deflection() {
        let c = make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 2.0).unwrap();
        let params = MeshParameters::with_deflection(0.005);
        let faces = c.faces();
        for (f, fm) in faces.iter().zip(mesh_all(&c, &params)) {
            let surface = &c.store().faces[*f].surface;
            for p in &fm.points {
                let (q, _, _) = surface.project(p).unwrap();
                assert!(p.distance_to(&q) < 1e-9);
            }
            for [a, b, cc] in &fm.triangles {
                let third = 1.0 / 3.0;
                let m = Point3d::barycentric(
                    &fm.points[*a as usize],
                    &fm.points[*b as usize],
                    &fm.points[*cc as usize],
                    third,
                    third,
                    third,
                );
                let (q, _, _) = surface.project(&m).unwrap();
                assert!(m.distance_to(&q) <= 0.005 + 1e-9);
            }
        }
    }

    #[test]
    fn test_sphere_poles_collapse() {
        let s = make_sphere(Point3d::ORIGIN, 1.0).unwrap();
        let params = MeshParameters::with_deflection(0.02);
        let meshes = mesh_all(&s, &params);
        let fm = &meshes[0];
        assert!(fm.triangles.len() > 50);
        for [a, b, c] in &fm.triangles {
            let p = [a, b, c].map(|&i| fm.points[i as usize]);
            assert!(p[0].distance_to(&p[1]) > COINCIDENT);
            assert!(p[1].distance_to(&p[2]) > COINCIDENT);
            let n = (p[1] - p[0]).cross(&(p[2] - p[0]));
            // Outward winding.
            assert!(n.dot(&p[0].to_vec3()) > 0.0);
        }
    }

    #[test]
    fn test_rotate_puts_edge_first() {
        assert_eq!(rotate([4, 5, 6], 0), [4, 5, 6]);
        assert_eq!(rotate([4, 5, 6], 1), [5, 6, 4]);
        assert_eq!(rotate([4, 5, 6], 2), [6, 4, 5]);
    }
}
