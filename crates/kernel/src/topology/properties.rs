//! Bounding boxes and mass properties.
//!
//! Volume, area and centroid come from the divergence theorem: every face
//! contributes a surface integral over its parameter-space domain, which is
//! triangulated and integrated with collapsed tensor Gauss-Legendre rules.
//! Planar faces are integrated exactly along their boundary curves instead
//! (Green's theorem), so sampled circles do not bias their moments.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::brep::{EntityStore, FaceId};
use super::domain::FaceDomain;
use super::shape::Shape;
use crate::error::TopologyError;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::polygon;
use crate::geometry::surfaces::{Plane, Surface};
use crate::geometry::transform::BoundingBox;

const BOX_SAMPLES: usize = 64;
/// Gauss-Legendre points per boundary span of a planar face.
const BOUNDARY_ORDER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub volume: f64,
    pub area: f64,
    pub centroid: Point3d,
}

/// Per-face integrals accumulated by [`face_integrals`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FaceIntegrals {
    /// Surface area.
    pub area: f64,
    /// Signed volume contribution, (1/3) ∫ P · n dA.
    pub volume: f64,
    /// First moments (1/2) ∫ P_i² n_i dA.
    pub moments: [f64; 3],
}

/// Gauss-Legendre nodes and weights on [0, 1].
fn gauss_legendre(n: usize) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 1.0;
        for _ in 0..100 {
            let (mut p0, mut p1) = (1.0, x);
            for k in 2..=n {
                let p2 = ((2 * k - 1) as f64 * x * p1 - (k - 1) as f64 * p0) / k as f64;
                p0 = p1;
                p1 = p2;
            }
            let pn = if n == 1 { x } else { p1 };
            let pn1 = if n == 1 { 1.0 } else { p0 };
            dp = n as f64 * (x * pn - pn1) / (x * x - 1.0);
            let dx = pn / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        out.push((0.5 * (1.0 - x), 0.5 * w));
    }
    out
}

/// Integrate one face of `store` over its parameter-space domain.
pub fn face_integrals(store: &EntityStore, face_id: FaceId, deflection: f64) -> Result<FaceIntegrals, TopologyError> {
    let face = &store.faces[face_id];
    let surface = face.surface.as_ref();
    let sign = if face.reversed { -1.0 } else { 1.0 };
    if let Surface::Plane(plane) = surface {
        return Ok(planar_integrals(store, face_id, plane, deflection));
    }
    let domain = FaceDomain::with_deflection(store, face_id, deflection)?;
    let holes = domain.hole_polygons();
    let points: Vec<Point2d> = domain.outer.uv.iter().chain(holes.iter().flatten()).copied().collect();
    let triangles = polygon::triangulate(&domain.outer.uv, &holes);
    let ((u0, u1), (v0, v1)) = domain.bounds();
    let diag = (u1 - u0).hypot(v1 - v0).max(1e-300);

    let mut acc = FaceIntegrals::default();
    for t in &triangles {
        let (a, b, c) = (points[t[0]], points[t[1]], points[t[2]]);
        let area2 = (b - a).cross(&(c - a));
        if area2 <= 0.0 {
            continue;
        }
        let longest = a.distance_to(&b).max(b.distance_to(&c)).max(c.distance_to(&a));
        let order = ((12.0 * longest / diag).ceil() as usize + 4).min(24);
        let rule = gauss_legendre(order);
        for &(xi, wx) in &rule {
            for &(eta, wy) in &rule {
                let q = Point2d::new(
                    (1.0 - xi) * a.x + xi * ((1.0 - eta) * b.x + eta * c.x),
                    (1.0 - xi) * a.y + xi * ((1.0 - eta) * b.y + eta * c.y),
                );
                let w = wx * wy * xi * area2;
                let d = surface.derivatives(q.x, q.y);
                let n = d.du.cross(&d.dv);
                let p = d.point;
                acc.area += w * n.length();
                let n = n * sign;
                acc.volume += w * (p.x * n.x + p.y * n.y + p.z * n.z) / 3.0;
                acc.moments[0] += w * 0.5 * p.x * p.x * n.x;
                acc.moments[1] += w * 0.5 * p.y * p.y * n.y;
                acc.moments[2] += w * 0.5 * p.z * p.z * n.z;
            }
        }
    }
    Ok(acc)
}

/// Region integrals of 1, u, v, u², uv and v² over a planar face, taken as
/// boundary integrals ∮ F dv with ∂F/∂u equal to each integrand.
fn planar_integrals(store: &EntityStore, face_id: FaceId, plane: &Plane, deflection: f64) -> FaceIntegrals {
    let face = &store.faces[face_id];
    let (o, a, b) = (plane.origin, plane.u_axis, plane.v_axis);
    let rule = gauss_legendre(BOUNDARY_ORDER);
    // [1, u, v, uu, uv, vv]
    let mut m = [0.0f64; 6];
    for w in face.wires() {
        for use_ in &store.wires[w].edges {
            let edge = &store.edges[use_.edge];
            if edge.degenerated {
                continue;
            }
            let params = edge
                .curve
                .discretize(edge.first, edge.last, deflection.max(1e-9), 0.5, 0.0);
            let dir = if use_.forward { 1.0 } else { -1.0 };
            for span in params.windows(2) {
                let (t0, t1) = (span[0], span[1]);
                for &(x, wx) in &rule {
                    let t = t0 + (t1 - t0) * x;
                    let d = edge.curve.point(t) - o;
                    let (u, v) = (d.dot(&a), d.dot(&b));
                    let dv = dir * edge.curve.d1(t).dot(&b) * (t1 - t0) * wx;
                    m[0] += u * dv;
                    m[1] += 0.5 * u * u * dv;
                    m[2] += u * v * dv;
                    m[3] += u * u * u / 3.0 * dv;
                    m[4] += 0.5 * u * u * v * dv;
                    m[5] += u * v * v * dv;
                }
            }
        }
    }
    // Wires of reversed faces run clockwise in parameter space.
    let sign = if face.reversed { -1.0 } else { 1.0 };
    let m = m.map(|x| sign * x);

    let n = a.cross(&b);
    let (o, a, b, nv) = (o.to_array(), a.to_array(), b.to_array(), n.to_array());
    let mut acc = FaceIntegrals {
        area: n.length() * m[0],
        volume: sign * (o[0] * nv[0] + o[1] * nv[1] + o[2] * nv[2]) * m[0] / 3.0,
        moments: [0.0; 3],
    };
    for i in 0..3 {
        let square = o[i] * o[i] * m[0]
            + 2.0 * o[i] * a[i] * m[1]
            + 2.0 * o[i] * b[i] * m[2]
            + a[i] * a[i] * m[3]
            + 2.0 * a[i] * b[i] * m[4]
            + b[i] * b[i] * m[5];
        acc.moments[i] = sign * 0.5 * nv[i] * square;
    }
    acc
}

/// Volume, area and centroid of every face below the shape's root, with
/// face boundaries sampled at `deflection`.
#[instrument(skip(shape))]
pub fn mass_properties(shape: &Shape, deflection: f64) -> Result<MassProperties, TopologyError> {
    let store = shape.store();
    let mut total = FaceIntegrals::default();
    for face in shape.faces() {
        let f = face_integrals(store, face, deflection)?;
        total.area += f.area;
        total.volume += f.volume;
        for i in 0..3 {
            total.moments[i] += f.moments[i];
        }
    }
    let centroid = if total.volume.abs() > 1e-300 {
        Point3d::new(
            total.moments[0] / total.volume,
            total.moments[1] / total.volume,
            total.moments[2] / total.volume,
        )
    } else {
        bounding_box(shape)?.center()
    };
    debug!(volume = total.volume, area = total.area, "mass properties");
    Ok(MassProperties {
        volume: total.volume,
        area: total.area,
        centroid,
    })
}

/// Signed volume enclosed by the faces of one shell.
pub fn shell_volume(store: &EntityStore, faces: &[FaceId], deflection: f64) -> Result<f64, TopologyError> {
    faces
        .iter()
        .map(|&f| face_integrals(store, f, deflection).map(|i| i.volume))
        .sum()
}

/// Box around a face from a parameter grid over its domain, inflated by the
/// largest grid step so curved patches stay inside.
pub fn face_bounding_box(store: &EntityStore, face_id: FaceId) -> Result<BoundingBox, TopologyError> {
    let face = &store.faces[face_id];
    let domain = FaceDomain::with_deflection(store, face_id, 1e-3)?;
    let mut bb = BoundingBox::from_points(&domain.outer.xyz);
    for inner in &domain.inners {
        inner.xyz.iter().for_each(|p| bb.expand_to_include(p));
    }
    let ((u0, u1), (v0, v1)) = domain.bounds();
    let mut step: f64 = 0.0;
    let n = BOX_SAMPLES;
    let mut row_prev: Vec<Option<Point3d>> = vec![None; n + 1];
    for i in 0..=n {
        let u = u0 + (u1 - u0) * i as f64 / n as f64;
        let mut prev: Option<Point3d> = None;
        for (j, slot) in row_prev.iter_mut().enumerate() {
            let v = v0 + (v1 - v0) * j as f64 / n as f64;
            let p = face.surface.point(u, v);
            if let Some(q) = prev {
                step = step.max(p.distance_to(&q));
            }
            if let Some(q) = *slot {
                step = step.max(p.distance_to(&q));
            }
            prev = Some(p);
            *slot = Some(p);
            if domain.contains(Point2d::new(u, v)) {
                bb.expand_to_include(&p);
            }
        }
    }
    Ok(bb.expanded(0.125 * step + face.tolerance))
}

/// Axis-aligned box enclosing every face and edge of the shape.
pub fn bounding_box(shape: &Shape) -> Result<BoundingBox, TopologyError> {
    let store = shape.store();
    let mut bb = BoundingBox::empty();
    for v in shape.vertices() {
        bb.expand_to_include(&store.vertices[v].point);
    }
    for face in shape.faces() {
        bb = bb.union(&face_bounding_box(store, face)?);
    }
    Ok(bb)
}
