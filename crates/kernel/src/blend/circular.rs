//! Blends on circular rims where a plane meets a coaxial cylinder.
//!
//! Both faces are cut along the contact circles by the boolean face
//! splitter. Sub-faces between a contact circle and the rim are dropped, a
//! torus (fillet) or cone (chamfer) band fills the gap, and the shell is
//! stitched again.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::sync::Arc;

use slotmap::SecondaryMap;
use tracing::{debug, info, instrument};

use crate::boolean::engine::{Rebuild, Side};
use crate::boolean::operand::{merge_tolerance, FaceData, Operand};
use crate::boolean::section::Strand;
use crate::boolean::split::split_face;
use crate::boolean::BooleanOptions;
use crate::geometry::curves::{Circle3d, Curve};
use crate::geometry::frame::Frame;
use crate::geometry::point::Point3d;
use crate::geometry::surfaces::{Cone, Surface, Torus};
use crate::geometry::vector::Vec3;
use crate::topology::brep::{EdgeId, EntityStore, FaceId, OrientedEdge};
use crate::topology::builder::ShapeBuilder;
use crate::topology::primitives::revolved_band;
use crate::topology::sew::sew_faces;
use crate::topology::shape::Shape;

use super::convexity::{convexity_between, Convexity, SMOOTH_ANGLE};
use super::rebuild::EdgeKind;
use super::{BlendError, BlendParameters};

/// Samples per contact circle checked against its face.
const CONTACT_SAMPLES: usize = 16;

/// Whether `edge` is a circular edge, blended as part of a rim.
pub(crate) fn is_circular(store: &EntityStore, edge: EdgeId) -> bool {
    store
        .edges
        .get(edge)
        .is_some_and(|e| !e.degenerated && matches!(*e.curve, Curve::Circle(_)))
}

/// Circle of a circular edge.
pub(crate) fn rim_circle(store: &EntityStore, edge: EdgeId) -> Option<Circle3d> {
    match store.edges.get(edge).map(|e| e.curve.as_ref()) {
        Some(Curve::Circle(c)) => Some(*c),
        _ => None,
    }
}

/// A full circle shared by a planar face and a coaxial cylinder face.
#[derive(Debug, Clone)]
struct Rim {
    plane: FaceId,
    cylinder: FaceId,
    center: Point3d,
    /// Outward normal of the planar face.
    normal: Vec3,
    /// Seam direction of the cylinder face, perpendicular to the axis.
    x: Vec3,
    radius: f64,
    /// +1 when the cylinder face points away from the axis.
    sigma: f64,
    convex: bool,
    fillet: Option<f64>,
    /// Setbacks into the planar face and along the cylinder face.
    setbacks: (f64, f64),
}

impl Rim {
    fn new(
        store: &EntityStore,
        edge: EdgeId,
        uses: &[(FaceId, OrientedEdge)],
        kind: &EdgeKind,
        tolerance: f64,
    ) -> Result<Self, BlendError> {
        let circle = rim_circle(store, edge).ok_or_else(|| BlendError::geometry("rim edge is not a circle"))?;
        let [(fa, ua), (fb, _)] = uses else {
            return Err(BlendError::InvalidInput(format!(
                "blended edge must be shared by two faces, found {} uses",
                uses.len()
            )));
        };
        let (plane, cylinder, plane_forward) = match (&*store.faces[*fa].surface, &*store.faces[*fb].surface) {
            (Surface::Plane(_), Surface::Cylinder(_)) => (*fa, *fb, ua.forward),
            (Surface::Cylinder(_), Surface::Plane(_)) => (*fb, *fa, !ua.forward),
            (a, b) => {
                return Err(BlendError::geometry(format!(
                    "circular blends need a plane and a cylinder, got a {} and a {}",
                    a.surface_type_name(),
                    b.surface_type_name()
                )));
            }
        };
        let Surface::Cylinder(cyl) = &*store.faces[cylinder].surface else {
            return Err(BlendError::geometry("rim face is not a cylinder"));
        };
        let center = circle.center();
        let axis = cyl.axis();
        let normal = store.face_normal(plane, 0.0, 0.0);
        let off_axis = (center - cyl.frame.origin).cross(&axis).length();
        if normal.cross(&axis).length() > 1e-9
            || circle.normal().cross(&axis).length() > 1e-9
            || off_axis > tolerance
            || (circle.radius - cyl.radius).abs() > tolerance
        {
            return Err(BlendError::geometry(
                "circular blends need the plane square to the cylinder axis",
            ));
        }

        let start = circle.point(0.0);
        let (u, v) = store.faces[cylinder].surface.parameters_of(&start)?;
        let sigma = store.face_normal(cylinder, u, v).dot(&(start - center)).signum();
        let convexity = convexity_between(store, edge, uses, SMOOTH_ANGLE)?;
        if convexity == Convexity::Smooth {
            return Err(BlendError::geometry("edge between tangent faces has no dihedral to blend"));
        }

        let (fillet, setbacks) = match kind {
            EdgeKind::Fillet(profile) => {
                let r = profile.constant_radius().ok_or_else(|| {
                    BlendError::geometry("variable radius fillets are available on straight edges only")
                })?;
                (Some(r), (r, r))
            }
            EdgeKind::Chamfer { forward, reverse } if plane_forward => (None, (*forward, *reverse)),
            EdgeKind::Chamfer { forward, reverse } => (None, (*reverse, *forward)),
        };
        let rim = Self {
            plane,
            cylinder,
            center,
            normal,
            x: cyl.frame.x,
            radius: cyl.radius,
            sigma,
            convex: convexity == Convexity::Convex,
            fillet,
            setbacks,
        };
        if let Some(r) = fillet {
            if rim.radius + rim.radial() * r <= r {
                return Err(BlendError::geometry(format!(
                    "fillet radius {r} is too large for a rim of radius {}",
                    rim.radius
                )));
            }
        }
        Ok(rim)
    }

    /// Radial step of the plane contact away from the rim.
    fn radial(&self) -> f64 {
        if self.convex { -self.sigma } else { self.sigma }
    }

    /// Axial step of the cylinder contact along the plane normal.
    fn axial(&self) -> f64 {
        if self.convex { -1.0 } else { 1.0 }
    }

    fn frame(&self, origin: Point3d, z: Vec3) -> Result<Frame, BlendError> {
        Ok(Frame::new(origin, z, self.x)?)
    }

    fn plane_contact(&self) -> Result<Circle3d, BlendError> {
        let radius = self.radius + self.radial() * self.setbacks.0;
        if radius <= 0.0 {
            return Err(BlendError::geometry(format!(
                "setback {} reaches the axis of a rim of radius {}",
                self.setbacks.0, self.radius
            )));
        }
        Ok(Circle3d::with_frame(self.frame(self.center, self.normal)?, radius)?)
    }

    fn cylinder_contact(&self) -> Result<Circle3d, BlendError> {
        let origin = self.center + self.normal * (self.axial() * self.setbacks.1);
        Ok(Circle3d::with_frame(self.frame(origin, self.normal)?, self.radius)?)
    }

    /// Whether a sub-face sample of the plane or cylinder face lies between
    /// the rim and the contact circle.
    fn swept(&self, on_plane: bool, p: &Point3d) -> bool {
        let w = *p - self.center;
        let h = w.dot(&self.normal);
        let rho = (w - self.normal * h).length();
        let (offset, limit) = if on_plane {
            ((rho - self.radius) * self.radial(), self.setbacks.0)
        } else {
            (h * self.axial(), self.setbacks.1)
        };
        offset > 0.0 && offset < limit
    }

    /// Both contact circles lie inside their faces, clear of other edges.
    fn check_contacts(&self, plane: &FaceData, cylinder: &FaceData) -> Result<(), BlendError> {
        for (face, circle) in [(plane, self.plane_contact()?), (cylinder, self.cylinder_contact()?)] {
            for i in 0..CONTACT_SAMPLES {
                let p = circle.point(TAU * i as f64 / CONTACT_SAMPLES as f64);
                if !face.contains_point(&p) || face.boundary_distance(&p) <= face.band {
                    return Err(BlendError::geometry(format!(
                        "blend contact leaves its face near ({:.6}, {:.6}, {:.6})",
                        p.x, p.y, p.z
                    )));
                }
            }
        }
        Ok(())
    }

    /// Torus or cone band between the two contact circles.
    fn band(&self, b: &mut ShapeBuilder) -> Result<FaceId, BlendError> {
        let (sp, sc) = self.setbacks;
        let (surface, (v0, v1), seam) = match self.fillet {
            Some(r) => {
                let major = self.radius + self.radial() * r;
                let frame = self.frame(self.center + self.normal * (self.axial() * r), self.normal * -self.axial())?;
                let torus = Torus::new(frame, major, r)?;
                let range = if self.radial() < 0.0 { (0.0, FRAC_PI_2) } else { (FRAC_PI_2, PI) };
                let meridian = Frame::new(frame.origin + frame.x * major, frame.x.cross(&frame.z), frame.x)?;
                let seam = (Curve::Circle(Circle3d::with_frame(meridian, r)?), range.0, range.1);
                (Surface::Torus(torus), range, seam)
            }
            None => {
                let plane_radius = self.radius + self.radial() * sp;
                let frame = self.frame(self.center, self.normal * self.axial())?;
                let slant = sp.hypot(sc);
                let cone = Surface::Cone(Cone::new(frame, plane_radius, (-self.radial() * sp).atan2(sc))?);
                let seam = Curve::segment(cone.point(0.0, 0.0), cone.point(0.0, slant))?;
                (cone, (0.0, slant), seam)
            }
        };

        let parallel = |v: f64| -> Result<Circle3d, BlendError> {
            let p = surface.point(0.0, v);
            let h = (p - self.center).dot(&self.normal);
            let origin = self.center + self.normal * h;
            Ok(Circle3d::with_frame(
                Frame { origin, ..self.surface_frame(&surface) },
                p.distance_to(&origin),
            )?)
        };
        let (bottom, top) = (parallel(v0)?, parallel(v1)?);

        let mid = 0.5 * (v0 + v1);
        let outward = self.normal + self.x * self.sigma;
        let reversed = surface.normal_at(0.0, mid).dot(&outward) < 0.0;
        let side = revolved_band(b, surface, (v0, v1), Some(bottom), Some(top), seam, reversed)?;
        Ok(side.side)
    }

    fn surface_frame(&self, surface: &Surface) -> Frame {
        match surface {
            Surface::Torus(t) => t.frame,
            Surface::Cone(c) => c.frame,
            _ => Frame {
                origin: self.center,
                ..Frame::world()
            },
        }
    }
}

/// Blend the full rim through `edge` on the single closed shell of `shape`.
#[instrument(skip_all)]
pub(crate) fn blend_rim(
    shape: &Shape,
    edge: EdgeId,
    kind: &EdgeKind,
    params: &BlendParameters,
) -> Result<Shape, BlendError> {
    let options = BooleanOptions {
        tolerance: params.tolerance,
        parallel: false,
        ..BooleanOptions::default()
    };
    let store = shape.store();
    let edge_faces = store.edge_face_map(shape.root());
    let uses = edge_faces
        .get(edge)
        .ok_or_else(|| BlendError::InvalidInput("edge does not belong to the shape".into()))?;
    let rim = Rim::new(store, edge, uses, kind, 10.0 * params.tolerance)?;
    check_full_rim(store, &edge_faces, &rim, params.tolerance)?;

    let operand = Operand::prepare(shape, &options)?;
    let index = |f: FaceId| {
        operand
            .faces
            .iter()
            .position(|d| d.id == f)
            .ok_or_else(|| BlendError::geometry("rim face is missing from the shell"))
    };
    let (ip, ic) = (index(rim.plane)?, index(rim.cylinder)?);
    rim.check_contacts(&operand.faces[ip], &operand.faces[ic])?;
    let cuts = [
        Strand::along(Arc::new(Curve::Circle(rim.plane_contact()?)), 0.0, TAU, ip, &options),
        Strand::along(Arc::new(Curve::Circle(rim.cylinder_contact()?)), 0.0, TAU, ic, &options),
    ];

    let merge = merge_tolerance(&options);
    let mut rebuild = Rebuild::new(merge);
    let mut faces = Vec::new();
    for (i, data) in operand.faces.iter().enumerate() {
        let on_face: Vec<&Strand> = cuts.iter().filter(|s| s.face_a == i).collect();
        let split = split_face(store, data, i, &on_face, &options)?;
        let trimmed = i == ip || i == ic;
        let mut dropped = 0;
        for sub in &split.sub_faces {
            if trimmed && rim.swept(i == ip, &sub.sample) {
                dropped += 1;
                continue;
            }
            faces.push(rebuild.face(Side::A, &operand, &split, sub, false)?);
        }
        if trimmed && dropped != 1 {
            return Err(BlendError::geometry(format!(
                "contact circle cuts {} strips off its face, expected one",
                dropped
            )));
        }
    }
    debug!(kept = faces.len(), convex = rim.convex, "rim faces trimmed");
    faces.push(rim.band(&mut rebuild.builder)?);

    let result = sew_faces(rebuild.builder.into_store(), &faces, merge)?;
    if !result.is_closed() {
        let (free, non_manifold) = result.store().manifold_defects(result.root());
        return Err(BlendError::geometry(format!(
            "blended shell does not close ({free} free edges, {non_manifold} non-manifold edges)"
        )));
    }
    info!(faces = faces.len(), radius = rim.radius, "rim blend complete");
    Ok(result)
}

/// The edges on the rim circle between the two faces cover it completely.
fn check_full_rim(
    store: &EntityStore,
    edge_faces: &SecondaryMap<EdgeId, Vec<(FaceId, OrientedEdge)>>,
    rim: &Rim,
    tolerance: f64,
) -> Result<(), BlendError> {
    let mut span = 0.0;
    for (edge, uses) in edge_faces.iter() {
        let on_rim = uses.len() == 2
            && uses.iter().any(|(f, _)| *f == rim.plane)
            && uses.iter().any(|(f, _)| *f == rim.cylinder);
        let Some(circle) = rim_circle(store, edge).filter(|_| on_rim) else {
            continue;
        };
        if circle.center().distance_to(&rim.center) <= 10.0 * tolerance
            && (circle.radius - rim.radius).abs() <= 10.0 * tolerance
        {
            let e = &store.edges[edge];
            span += e.last - e.first;
        }
    }
    if (span - TAU).abs() > 1e-6 {
        return Err(BlendError::geometry(format!(
            "circular blends need a full rim, the edges cover {span:.6} of 2π"
        )));
    }
    Ok(())
}
