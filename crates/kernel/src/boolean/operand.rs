//! Boolean operands: accepted shapes plus per-face data cached once for
//! every later stage.

use std::sync::Arc;

use tracing::debug;

use crate::geometry::curves::Curve;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::surfaces::Surface;
use crate::geometry::transform::BoundingBox;
use crate::geometry::vector::Vec3;
use crate::topology::brep::{EdgeId, EntityStore, FaceId, ShapeRef};
use crate::topology::domain::FaceDomain;
use crate::topology::properties::{face_bounding_box, mass_properties};
use crate::topology::shape::Shape;

use super::{BooleanError, BooleanOptions};

/// A non-degenerate boundary edge of a face.
#[derive(Debug, Clone)]
pub struct BoundaryCurve {
    pub edge: EdgeId,
    pub curve: Arc<Curve>,
    pub first: f64,
    pub last: f64,
}

impl BoundaryCurve {
    /// Closest point of the trimmed edge to `p`, with its parameter.
    pub fn project(&self, p: &Point3d) -> (f64, Point3d) {
        project_on_range(&self.curve, self.first, self.last, p)
    }
}

#[derive(Debug, Clone)]
pub struct FaceData {
    pub id: FaceId,
    pub surface: Arc<Surface>,
    pub reversed: bool,
    pub domain: FaceDomain,
    pub bbox: BoundingBox,
    pub edges: Vec<BoundaryCurve>,
    /// 3D distance below which a point counts as lying on the boundary.
    pub band: f64,
}

impl FaceData {
    fn new(store: &EntityStore, id: FaceId, options: &BooleanOptions) -> Result<Self, BooleanError> {
        let face = &store.faces[id];
        let domain = FaceDomain::with_deflection(store, id, options.section_deflection)?;
        let bbox = face_bounding_box(store, id)?.expanded(options.tolerance);
        let mut edges = Vec::new();
        let mut curved = false;
        for w in face.wires() {
            for use_ in &store.wires[w].edges {
                let edge = &store.edges[use_.edge];
                if edge.degenerated || edges.iter().any(|b: &BoundaryCurve| b.edge == use_.edge) {
                    continue;
                }
                curved |= !edge.curve.is_linear();
                edges.push(BoundaryCurve {
                    edge: use_.edge,
                    curve: edge.curve.clone(),
                    first: edge.first,
                    last: edge.last,
                });
            }
        }
        let band = merge_tolerance(options) + if curved { options.section_deflection } else { 0.0 };
        Ok(Self {
            id,
            surface: face.surface.clone(),
            reversed: face.reversed,
            domain,
            bbox,
            edges,
            band,
        })
    }

    /// Outward unit normal at surface parameters.
    pub fn outward_normal(&self, u: f64, v: f64) -> Vec3 {
        let n = self.surface.normal_at(u, v);
        if self.reversed { -n } else { n }
    }

    /// Parameter window of the domain, for freeform ray casting.
    pub fn window(&self) -> ((f64, f64), (f64, f64)) {
        self.domain.bounds()
    }

    /// Distance from `p` to the sampled boundary loops.
    pub fn boundary_distance(&self, p: &Point3d) -> f64 {
        std::iter::once(&self.domain.outer)
            .chain(&self.domain.inners)
            .map(|l| polyline_distance(p, &l.xyz))
            .fold(f64::INFINITY, f64::min)
    }

    /// `p`, assumed on the surface, lies in the closed face region.
    pub fn contains_point(&self, p: &Point3d) -> bool {
        match self.surface.parameters_of(p) {
            Ok((u, v)) if self.domain.contains(Point2d::new(u, v)) => true,
            _ => self.boundary_distance(p) <= self.band,
        }
    }

    /// Boundary edge nearest to `p` and the projection onto it.
    pub fn nearest_edge(&self, p: &Point3d) -> Option<(&BoundaryCurve, f64, Point3d)> {
        self.edges
            .iter()
            .map(|b| {
                let (t, q) = b.project(p);
                (b, t, q)
            })
            .min_by(|a, b| a.2.distance_squared_to(p).total_cmp(&b.2.distance_squared_to(p)))
    }
}

/// A shape accepted as boolean input.
#[derive(Debug)]
pub struct Operand<'a> {
    pub shape: &'a Shape,
    pub faces: Vec<FaceData>,
    pub bbox: BoundingBox,
}

impl<'a> Operand<'a> {
    /// Accept solids, closed shells and compounds of them. Open or
    /// volume-less input is rejected.
    pub fn prepare(shape: &'a Shape, options: &BooleanOptions) -> Result<Self, BooleanError> {
        if matches!(
            shape.root(),
            ShapeRef::Vertex(_) | ShapeRef::Edge(_) | ShapeRef::Wire(_) | ShapeRef::Face(_)
        ) {
            return Err(BooleanError::InvalidInput(
                "operand must be a solid, a closed shell or a compound of them".into(),
            ));
        }
        let shells = shape.shells();
        if shells.is_empty() {
            return Err(BooleanError::InvalidInput("operand has no shells".into()));
        }
        let store = shape.store();
        if let Some(open) = shells.iter().find(|&&s| !store.shells[s].closed) {
            let (free, non_manifold) = store.manifold_defects(ShapeRef::Shell(*open));
            return Err(BooleanError::InvalidInput(format!(
                "operand shell is open ({free} free edges, {non_manifold} non-manifold edges)"
            )));
        }
        let volume = mass_properties(shape, 1e-3)?.volume;
        if volume.abs() <= options.tolerance {
            return Err(BooleanError::DegenerateInput(format!("operand volume {volume:e} is zero")));
        }
        let faces = shape
            .faces()
            .into_iter()
            .map(|f| FaceData::new(store, f, options))
            .collect::<Result<Vec<_>, _>>()?;
        let bbox = faces.iter().fold(BoundingBox::empty(), |acc, f| acc.union(&f.bbox));
        debug!(faces = faces.len(), volume, "operand prepared");
        Ok(Self { shape, faces, bbox })
    }

    pub fn store(&self) -> &EntityStore {
        self.shape.store()
    }
}

/// Node merge and on-surface distance of the engine.
pub fn merge_tolerance(options: &BooleanOptions) -> f64 {
    10.0 * options.tolerance
}

/// Closest point of `curve` restricted to [first, last], endpoints included.
pub fn project_on_range(curve: &Curve, first: f64, last: f64, p: &Point3d) -> (f64, Point3d) {
    let (lo, hi) = if first <= last { (first, last) } else { (last, first) };
    let mut best = (lo, curve.point(lo));
    let end = curve.point(hi);
    if end.distance_squared_to(p) < best.1.distance_squared_to(p) {
        best = (hi, end);
    }
    if let Ok(t) = curve.parameter_of_in(p, lo, hi) {
        let slack = 1e-12 * (1.0 + (hi - lo).abs());
        if t >= lo - slack && t <= hi + slack {
            let t = t.clamp(lo, hi);
            let q = curve.point(t);
            if q.distance_squared_to(p) < best.1.distance_squared_to(p) {
                best = (t, q);
            }
        }
    }
    best
}

/// Distance from `p` to the closed polyline through `points`.
pub fn polyline_distance(p: &Point3d, points: &[Point3d]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| segment_distance(p, &points[i], &points[(i + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

pub fn segment_distance(p: &Point3d, a: &Point3d, b: &Point3d) -> f64 {
    let ab = *b - *a;
    let len2 = ab.length_squared();
    if len2 < 1e-300 {
        return p.distance_to(a);
    }
    let s = ((*p - *a).dot(&ab) / len2).clamp(0.0, 1.0);
    p.distance_to(&a.lerp(b, s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::curves::Circle3d;
    use crate::topology::builder::ShapeBuilder;
    use crate::topology::primitives::{make_box, make_cylinder};
    use crate::Tolerance;
    use std::f64::consts::PI;

    #[test]
    fn test_project_on_range_clamps_partial_arc() {
        let frame = crate::geometry::frame::Frame::new(Point3d::ORIGIN, Vec3::Z, Vec3::X).unwrap();
        let c = Curve::Circle(Circle3d::with_frame(frame, 1.0).unwrap());
        // Nearest full-circle point is at angle pi, outside [0, pi/2].
        let (t, q) = project_on_range(&c, 0.0, PI / 2.0, &Point3d::new(-2.0, 0.1, 0.0));
        assert!(t == PI / 2.0 || t == 0.0);
        assert!(q.distance_to(&c.point(t)) < 1e-12);
        let (t, _) = project_on_range(&c, 0.0, PI / 2.0, &Point3d::new(1.0, 1.0, 0.0));
        assert!((t - PI / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_box_operand_faces_and_containment() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let op = Operand::prepare(&b, &BooleanOptions::default()).unwrap();
        assert_eq!(op.faces.len(), 6);
        for f in &op.faces {
            assert_eq!(f.edges.len(), 4);
        }
        let bottom = op
            .faces
            .iter()
            .find(|f| f.outward_normal(0.0, 0.0).z < -0.5)
            .unwrap();
        assert!(bottom.contains_point(&Point3d::new(0.5, 0.5, 0.0)));
        assert!(bottom.contains_point(&Point3d::new(1.0, 0.5, 0.0)));
        assert!(!bottom.contains_point(&Point3d::new(1.5, 0.5, 0.0)));
    }

    #[test]
    fn test_open_shell_is_rejected() {
        let cyl = make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 1.0).unwrap();
        let store = cyl.store().clone();
        let face = cyl.faces()[0];
        let mut builder = ShapeBuilder::from_store(store, Tolerance::default());
        let shell = builder.make_shell(vec![face]);
        let open = builder.finish(ShapeRef::Shell(shell));
        let err = Operand::prepare(&open, &BooleanOptions::default()).unwrap_err();
        assert!(matches!(err, BooleanError::InvalidInput(_)));

        let face_only = Shape::from_parts(cyl.store().clone(), ShapeRef::Face(face));
        assert!(Operand::prepare(&face_only, &BooleanOptions::default()).is_err());
    }
}
