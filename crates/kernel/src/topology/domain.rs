//! Parameter-space images of face boundaries.
//!
//! A face's wires are sampled edge by edge and mapped into the (u, v) space
//! of its surface. Edge uses carrying a parameter-space line (seams, poles)
//! are mapped through it; every other sample is inverted onto the surface
//! and unwrapped next to its predecessor so the loop stays continuous across
//! periodic seams.

use crate::error::TopologyError;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::polygon;
use crate::geometry::surfaces::{unwrap_near, Surface};

use super::brep::{Edge, EdgeId, EntityStore, FaceId, WireId};

/// Default turning bound for boundary sampling, radians.
pub const DEFAULT_SAMPLING_ANGLE: f64 = 0.2;

/// Edge parameters sampling `edge` within the deflection and angle bounds,
/// ascending from `first` to `last`.
pub fn edge_parameters(edge: &Edge, deflection: f64, angle: f64) -> Vec<f64> {
    if edge.degenerated {
        return vec![edge.first, edge.last];
    }
    edge.curve.discretize(edge.first, edge.last, deflection, angle, 0.0)
}

/// One wire mapped into parameter space.
#[derive(Debug, Clone, Default)]
pub struct UvLoop {
    pub uv: Vec<Point2d>,
    pub xyz: Vec<Point3d>,
    /// Per sample: index of the edge use within the wire and the edge parameter.
    pub source: Vec<(usize, f64)>,
}

impl UvLoop {
    pub fn len(&self) -> usize {
        self.uv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uv.is_empty()
    }

    fn centroid(&self) -> Point2d {
        let n = self.uv.len().max(1) as f64;
        let (sx, sy) = self.uv.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
        Point2d::new(sx / n, sy / n)
    }

    fn shift(&mut self, du: f64, dv: f64) {
        for p in &mut self.uv {
            p.x += du;
            p.y += dv;
        }
    }
}

/// Parameter-space domain of a face: outer loop plus holes.
#[derive(Debug, Clone)]
pub struct FaceDomain {
    pub outer: UvLoop,
    pub inners: Vec<UvLoop>,
    u_period: Option<f64>,
    v_period: Option<f64>,
    center: Point2d,
}

impl FaceDomain {
    /// Map every wire of `face` into parameter space with `sampler` choosing
    /// the edge parameters.
    pub fn build(
        store: &EntityStore,
        face_id: FaceId,
        sampler: &dyn Fn(EdgeId) -> Vec<f64>,
    ) -> Result<Self, TopologyError> {
        let face = &store.faces[face_id];
        let surface = face.surface.as_ref();
        let outer = wire_uv(store, surface, face.outer, sampler)?;
        let center = outer.centroid();
        let u_period = surface.u_period();
        let v_period = surface.v_period();
        let mut inners = Vec::with_capacity(face.inners.len());
        for &w in &face.inners {
            let mut inner = wire_uv(store, surface, w, sampler)?;
            let c = inner.centroid();
            let du = u_period.map_or(0.0, |p| unwrap_near(c.x, center.x, p) - c.x);
            let dv = v_period.map_or(0.0, |p| unwrap_near(c.y, center.y, p) - c.y);
            inner.shift(du, dv);
            inners.push(inner);
        }
        Ok(Self {
            outer,
            inners,
            u_period,
            v_period,
            center,
        })
    }

    /// Domain with edges sampled at `deflection`.
    pub fn with_deflection(store: &EntityStore, face_id: FaceId, deflection: f64) -> Result<Self, TopologyError> {
        Self::build(store, face_id, &|e| {
            edge_parameters(&store.edges[e], deflection, DEFAULT_SAMPLING_ANGLE)
        })
    }

    pub fn hole_polygons(&self) -> Vec<Vec<Point2d>> {
        self.inners.iter().map(|l| l.uv.clone()).collect()
    }

    /// Shift periodic coordinates of `uv` next to the domain.
    pub fn normalize(&self, uv: Point2d) -> Point2d {
        Point2d::new(
            self.u_period.map_or(uv.x, |p| unwrap_near(uv.x, self.center.x, p)),
            self.v_period.map_or(uv.y, |p| unwrap_near(uv.y, self.center.y, p)),
        )
    }

    /// Inside the outer loop and outside every hole.
    pub fn contains(&self, uv: Point2d) -> bool {
        let p = self.normalize(uv);
        polygon::point_in_polygon(&p, &self.outer.uv) && self.inners.iter().all(|h| !polygon::point_in_polygon(&p, &h.uv))
    }

    /// Parameter-space distance from `uv` to the nearest boundary loop.
    pub fn boundary_distance(&self, uv: Point2d) -> f64 {
        let p = self.normalize(uv);
        std::iter::once(&self.outer)
            .chain(&self.inners)
            .map(|l| polygon::distance_to_boundary(&p, &l.uv))
            .fold(f64::INFINITY, f64::min)
    }

    pub fn bounds(&self) -> ((f64, f64), (f64, f64)) {
        let (mut u0, mut u1, mut v0, mut v1) = (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
        for p in &self.outer.uv {
            u0 = u0.min(p.x);
            u1 = u1.max(p.x);
            v0 = v0.min(p.y);
            v1 = v1.max(p.y);
        }
        ((u0, u1), (v0, v1))
    }

    /// Signed parameter-space area of the region (holes subtracted).
    pub fn signed_area(&self) -> f64 {
        polygon::signed_area(&self.outer.uv) + self.inners.iter().map(|l| polygon::signed_area(&l.uv)).sum::<f64>()
    }

    /// A point strictly inside the region.
    pub fn interior_point(&self) -> Option<Point2d> {
        polygon::interior_point(&self.outer.uv, &self.hole_polygons())
    }

    /// Every loop is free of self-intersections.
    pub fn is_simple(&self) -> bool {
        std::iter::once(&self.outer).chain(&self.inners).all(|l| polygon::is_simple(&l.uv))
    }
}

fn wire_uv(
    store: &EntityStore,
    surface: &Surface,
    wire_id: WireId,
    sampler: &dyn Fn(EdgeId) -> Vec<f64>,
) -> Result<UvLoop, TopologyError> {
    let wire = &store.wires[wire_id];
    let n = wire.edges.len();
    let start = wire.edges.iter().position(|u| u.pcurve.is_some()).unwrap_or(0);
    let mut out = UvLoop::default();
    let mut prev: Option<Point2d> = None;

    for k in 0..n {
        let index = (start + k) % n;
        let use_ = &wire.edges[index];
        let edge = &store.edges[use_.edge];
        let mut params = sampler(use_.edge);
        if !use_.forward {
            params.reverse();
        }
        let span = edge.last - edge.first;
        let (head, tail) = if use_.forward {
            (edge.start, edge.end)
        } else {
            (edge.end, edge.start)
        };
        let last = params.len().saturating_sub(1);
        for (j, &t) in params.iter().enumerate() {
            if j == 0 && k > 0 {
                continue;
            }
            // Ends come from the vertices so every face sees the same point.
            let xyz = if edge.degenerated || j == 0 {
                store.vertices[head].point
            } else if j == last {
                store.vertices[tail].point
            } else {
                edge.point_at(t)
            };
            let uv = match (&use_.pcurve, prev) {
                (Some(pc), _) => pc.at(if span.abs() > 0.0 { (t - edge.first) / span } else { 0.0 }),
                (None, None) => {
                    let (u, v) = surface.parameters_of(&xyz)?;
                    Point2d::new(u, v)
                }
                (None, Some(p)) => {
                    let (u, v) = surface.parameters_of_near(&xyz, (p.x, p.y))?;
                    resolve_singular(surface, Point2d::new(u, v), p)
                }
            };
            out.uv.push(uv);
            out.xyz.push(xyz);
            out.source.push((index, t));
            prev = Some(uv);
        }
    }

    if out.uv.len() > 1 {
        let (first, last) = (out.uv[0], out.uv[out.uv.len() - 1]);
        if first.distance_to(&last) < 1e-12 {
            out.uv.pop();
            out.xyz.pop();
            out.source.pop();
        }
    }
    if out.uv.len() < 2 {
        return Err(TopologyError::InvalidInput(format!(
            "wire maps to {} distinct parameter-space points",
            out.uv.len()
        )));
    }
    Ok(out)
}

/// At a singular point one parameter is free; keep it continuous.
fn resolve_singular(surface: &Surface, uv: Point2d, prev: Point2d) -> Point2d {
    if surface.normal(uv.x, uv.y).is_ok() {
        return uv;
    }
    let (du, dv) = surface.d1(uv.x, uv.y);
    if du.length() < 1e-12 {
        Point2d::new(prev.x, uv.y)
    } else if dv.length() < 1e-12 {
        Point2d::new(uv.x, prev.y)
    } else {
        uv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Point3d;
    use crate::topology::primitives::{make_box, make_cylinder, make_sphere};
    use std::f64::consts::{FRAC_PI_2, TAU};

    #[test]
    fn test_box_face_domain_is_square() {
        let shape = make_box(Point3d::ORIGIN, 2.0, 2.0, 2.0).unwrap();
        let store = shape.store();
        for face in store.faces_of(shape.root()) {
            let d = FaceDomain::with_deflection(store, face, 1e-3).unwrap();
            assert_eq!(d.outer.len(), 4);
            assert!((d.signed_area().abs() - 4.0).abs() < 1e-9);
            let c = d.interior_point().unwrap();
            assert!(d.contains(c));
        }
    }

    #[test]
    fn test_cylinder_side_spans_full_period() {
        let shape = make_cylinder(Point3d::ORIGIN, crate::geometry::vector::Vec3::Z, 1.0, 3.0).unwrap();
        let store = shape.store();
        let side = store
            .faces_of(shape.root())
            .into_iter()
            .find(|&f| matches!(store.faces[f].surface.as_ref(), Surface::Cylinder(_)))
            .unwrap();
        let d = FaceDomain::with_deflection(store, side, 1e-3).unwrap();
        let ((u0, u1), (v0, v1)) = d.bounds();
        assert!((u1 - u0 - TAU).abs() < 1e-9);
        assert!((v1 - v0 - 3.0).abs() < 1e-9);
        assert!((d.signed_area().abs() - 3.0 * TAU).abs() < 1e-6);
        assert!(d.is_simple());
    }

    #[test]
    fn test_sphere_domain_is_rectangle_with_poles() {
        let shape = make_sphere(Point3d::ORIGIN, 2.0).unwrap();
        let store = shape.store();
        let face = store.faces_of(shape.root())[0];
        let d = FaceDomain::with_deflection(store, face, 1e-3).unwrap();
        let ((u0, u1), (v0, v1)) = d.bounds();
        assert!((u1 - u0 - TAU).abs() < 1e-9);
        assert!((v0 + FRAC_PI_2).abs() < 1e-9 && (v1 - FRAC_PI_2).abs() < 1e-9);
        assert!(d.contains(Point2d::new(1.0, 0.3)));
        assert!(d.contains(Point2d::new(1.0 + TAU, 0.3)));
    }
}
