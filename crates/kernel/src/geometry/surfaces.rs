use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, TAU};

use super::curves::{wrap_into, Circle3d, Curve, Line3d};
use super::frame::Frame;
use super::nurbs::{BSplineCurve, BSplineSurface, BezierSurface, SurfaceDerivatives};
use super::point::Point3d;
use super::transform::Transform;
use super::vector::Vec3;
use crate::error::GeometryError;

const SINGULAR_EPS: f64 = 1e-12;
const INVERSION_ITERATIONS: usize = 50;

/// All surface types supported by the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Surface {
    Plane(Plane),
    Cylinder(Cylinder),
    Cone(Cone),
    Sphere(Sphere),
    Torus(Torus),
    Bezier(BezierSurface),
    BSpline(BSplineSurface),
    Revolution(RevolutionSurface),
    Extrusion(ExtrusionSurface),
    Offset(OffsetSurface),
}

/// An infinite plane `origin + u * u_axis + v * v_axis`.
///
/// `normal` is always `u_axis x v_axis`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub origin: Point3d,
    pub normal: Vec3,
    pub u_axis: Vec3,
    pub v_axis: Vec3,
}

impl Plane {
    pub fn new(origin: Point3d, normal: Vec3) -> Result<Self, GeometryError> {
        Ok(Self::from_frame(&Frame::from_axis(origin, normal)?))
    }

    /// Plane with the given normal whose u axis follows `x_hint`.
    pub fn with_x(origin: Point3d, normal: Vec3, x_hint: Vec3) -> Result<Self, GeometryError> {
        Ok(Self::from_frame(&Frame::new(origin, normal, x_hint)?))
    }

    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            origin: frame.origin,
            normal: frame.x.cross(&frame.y),
            u_axis: frame.x,
            v_axis: frame.y,
        }
    }

    pub fn xy() -> Self {
        Self::from_frame(&Frame::world())
    }

    pub fn point(&self, u: f64, v: f64) -> Point3d {
        self.origin + self.u_axis * u + self.v_axis * v
    }

    /// Signed distance along the normal.
    pub fn distance_to_point(&self, p: &Point3d) -> f64 {
        (*p - self.origin).dot(&self.normal)
    }

    pub fn project_point(&self, p: &Point3d) -> Point3d {
        *p - self.normal * self.distance_to_point(p)
    }

    pub fn parameters_of(&self, p: &Point3d) -> (f64, f64) {
        let d = *p - self.origin;
        (d.dot(&self.u_axis), d.dot(&self.v_axis))
    }
}

/// Cylinder `origin + r (cos u x + sin u y) + v z`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    pub frame: Frame,
    pub radius: f64,
}

impl Cylinder {
    pub fn new(frame: Frame, radius: f64) -> Result<Self, GeometryError> {
        check_radius("cylinder", radius)?;
        Ok(Self { frame, radius })
    }

    pub fn axis(&self) -> Vec3 {
        self.frame.z
    }
}

/// Cone `origin + (R + v sin a)(cos u x + sin u y) + v cos a z`, where `v`
/// is the slant distance from the reference circle of radius `R`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cone {
    pub frame: Frame,
    pub ref_radius: f64,
    pub half_angle: f64,
}

impl Cone {
    pub fn new(frame: Frame, ref_radius: f64, half_angle: f64) -> Result<Self, GeometryError> {
        if !(half_angle.abs() > 1e-12) || half_angle.abs() >= FRAC_PI_2 || ref_radius < 0.0 {
            return Err(GeometryError::DegenerateGeometry(format!(
                "cone half angle {half_angle}, radius {ref_radius}"
            )));
        }
        Ok(Self {
            frame,
            ref_radius,
            half_angle,
        })
    }

    /// Slant parameter of the apex.
    pub fn apex_parameter(&self) -> f64 {
        -self.ref_radius / self.half_angle.sin()
    }

    pub fn apex(&self) -> Point3d {
        self.frame.origin + self.frame.z * (self.apex_parameter() * self.half_angle.cos())
    }
}

/// Sphere `c + r cos v (cos u x + sin u y) + r sin v z`, v in [-π/2, π/2].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub frame: Frame,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: Point3d, radius: f64) -> Result<Self, GeometryError> {
        check_radius("sphere", radius)?;
        Ok(Self {
            frame: Frame {
                origin: center,
                ..Frame::world()
            },
            radius,
        })
    }

    pub fn with_frame(frame: Frame, radius: f64) -> Result<Self, GeometryError> {
        check_radius("sphere", radius)?;
        Ok(Self { frame, radius })
    }

    pub fn center(&self) -> Point3d {
        self.frame.origin
    }
}

/// Torus `o + (R + r cos v)(cos u x + sin u y) + r sin v z`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Torus {
    pub frame: Frame,
    pub major_radius: f64,
    pub minor_radius: f64,
}

impl Torus {
    pub fn new(frame: Frame, major_radius: f64, minor_radius: f64) -> Result<Self, GeometryError> {
        check_radius("torus minor", minor_radius)?;
        if major_radius <= minor_radius {
            return Err(GeometryError::DegenerateGeometry(format!(
                "torus major radius {major_radius} must exceed minor radius {minor_radius}"
            )));
        }
        Ok(Self {
            frame,
            major_radius,
            minor_radius,
        })
    }
}

/// Basis curve `C(v)` revolved by angle `u` about an axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevolutionSurface {
    pub basis: Box<Curve>,
    pub axis_origin: Point3d,
    pub axis: Vec3,
}

impl RevolutionSurface {
    pub fn new(basis: Curve, axis_origin: Point3d, axis: Vec3) -> Result<Self, GeometryError> {
        let axis = axis
            .normalized()
            .ok_or_else(|| GeometryError::DegenerateGeometry("zero revolution axis".into()))?;
        Ok(Self {
            basis: Box::new(basis),
            axis_origin,
            axis,
        })
    }

    /// Rotate the vector `w` by `angle` about the axis.
    fn rotate(&self, w: Vec3, angle: f64) -> Vec3 {
        let along = self.axis * w.dot(&self.axis);
        let perp = w - along;
        let (s, c) = angle.sin_cos();
        along + perp * c + self.axis.cross(&perp) * s
    }

    /// Derivative of [`Self::rotate`] with respect to the angle.
    fn rotate_d(&self, w: Vec3, angle: f64) -> Vec3 {
        let perp = w.reject_from(&self.axis);
        let (s, c) = angle.sin_cos();
        perp * -s + self.axis.cross(&perp) * c
    }
}

/// Basis curve `C(u)` swept along the unit `direction` by `v`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtrusionSurface {
    pub basis: Box<Curve>,
    pub direction: Vec3,
}

impl ExtrusionSurface {
    pub fn new(basis: Curve, direction: Vec3) -> Result<Self, GeometryError> {
        let direction = direction
            .normalized()
            .ok_or_else(|| GeometryError::DegenerateGeometry("zero extrusion direction".into()))?;
        Ok(Self {
            basis: Box::new(basis),
            direction,
        })
    }
}

/// Basis surface displaced by `distance` along its normal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetSurface {
    pub basis: Box<Surface>,
    pub distance: f64,
}

impl OffsetSurface {
    pub fn new(basis: Surface, distance: f64) -> Result<Self, GeometryError> {
        if !distance.is_finite() {
            return Err(GeometryError::InvalidInput(format!("offset distance {distance}")));
        }
        Ok(Self {
            basis: Box::new(basis),
            distance,
        })
    }
}

fn check_radius(what: &str, radius: f64) -> Result<(), GeometryError> {
    if !(radius > 0.0) || !radius.is_finite() {
        return Err(GeometryError::DegenerateGeometry(format!("{what} radius {radius}")));
    }
    Ok(())
}

fn derivs(point: Point3d, du: Vec3, dv: Vec3, duu: Vec3, duv: Vec3, dvv: Vec3) -> SurfaceDerivatives {
    SurfaceDerivatives {
        point,
        du,
        dv,
        duu,
        duv,
        dvv,
    }
}

/// Principal curvature data at a surface point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curvatures {
    pub gaussian: f64,
    pub mean: f64,
    pub k_min: f64,
    pub k_max: f64,
}

impl Surface {
    pub fn point(&self, u: f64, v: f64) -> Point3d {
        match self {
            Surface::Plane(p) => p.point(u, v),
            Surface::Cylinder(c) => c.frame.origin + c.frame.radial(u) * c.radius + c.frame.z * v,
            Surface::Cone(c) => {
                let (s, co) = c.half_angle.sin_cos();
                c.frame.origin + c.frame.radial(u) * (c.ref_radius + v * s) + c.frame.z * (v * co)
            }
            Surface::Sphere(s) => {
                s.frame.origin + s.frame.radial(u) * (s.radius * v.cos()) + s.frame.z * (s.radius * v.sin())
            }
            Surface::Torus(t) => {
                let rho = t.major_radius + t.minor_radius * v.cos();
                t.frame.origin + t.frame.radial(u) * rho + t.frame.z * (t.minor_radius * v.sin())
            }
            Surface::Bezier(b) => b.as_bspline().point(u, v),
            Surface::BSpline(b) => b.point(u, v),
            Surface::Revolution(r) => r.axis_origin + r.rotate(r.basis.point(v) - r.axis_origin, u),
            Surface::Extrusion(e) => e.basis.point(u) + e.direction * v,
            Surface::Offset(o) => o.basis.point(u, v) + o.basis.normal_at(u, v) * o.distance,
        }
    }

    /// Point with first and second partial derivatives.
    pub fn derivatives(&self, u: f64, v: f64) -> SurfaceDerivatives {
        match self {
            Surface::Plane(p) => derivs(p.point(u, v), p.u_axis, p.v_axis, Vec3::ZERO, Vec3::ZERO, Vec3::ZERO),
            Surface::Cylinder(c) => {
                let (rad, tan) = (c.frame.radial(u), c.frame.radial_tangent(u));
                derivs(self.point(u, v), tan * c.radius, c.frame.z, rad * -c.radius, Vec3::ZERO, Vec3::ZERO)
            }
            Surface::Cone(c) => {
                let (rad, tan) = (c.frame.radial(u), c.frame.radial_tangent(u));
                let (s, co) = c.half_angle.sin_cos();
                let rho = c.ref_radius + v * s;
                derivs(
                    self.point(u, v),
                    tan * rho,
                    rad * s + c.frame.z * co,
                    rad * -rho,
                    tan * s,
                    Vec3::ZERO,
                )
            }
            Surface::Sphere(s) => {
                let (rad, tan, z, r) = (s.frame.radial(u), s.frame.radial_tangent(u), s.frame.z, s.radius);
                let (sv, cv) = v.sin_cos();
                derivs(
                    self.point(u, v),
                    tan * (r * cv),
                    (rad * -sv + z * cv) * r,
                    rad * (-r * cv),
                    tan * (-r * sv),
                    (rad * cv + z * sv) * -r,
                )
            }
            Surface::Torus(t) => {
                let (rad, tan, z) = (t.frame.radial(u), t.frame.radial_tangent(u), t.frame.z);
                let (sv, cv) = v.sin_cos();
                let r = t.minor_radius;
                let rho = t.major_radius + r * cv;
                derivs(
                    self.point(u, v),
                    tan * rho,
                    rad * (-r * sv) + z * (r * cv),
                    rad * -rho,
                    tan * (-r * sv),
                    (rad * cv + z * sv) * -r,
                )
            }
            Surface::Bezier(b) => b.as_bspline().derivatives(u, v),
            Surface::BSpline(b) => b.derivatives(u, v),
            Surface::Revolution(r) => {
                let q = r.basis.point(v) - r.axis_origin;
                let [c1, c2, _] = r.basis.derivatives(v);
                derivs(
                    r.axis_origin + r.rotate(q, u),
                    r.rotate_d(q, u),
                    r.rotate(c1, u),
                    -r.rotate(q.reject_from(&r.axis), u),
                    r.rotate_d(c1, u),
                    r.rotate(c2, u),
                )
            }
            Surface::Extrusion(e) => {
                let [c1, c2, _] = e.basis.derivatives(u);
                derivs(self.point(u, v), c1, e.direction, c2, Vec3::ZERO, Vec3::ZERO)
            }
            Surface::Offset(o) => offset_derivatives(o, u, v),
        }
    }

    pub fn d1(&self, u: f64, v: f64) -> (Vec3, Vec3) {
        let d = self.derivatives(u, v);
        (d.du, d.dv)
    }

    /// Unit normal `Su x Sv`; `SingularPoint` where it vanishes.
    pub fn normal(&self, u: f64, v: f64) -> Result<Vec3, GeometryError> {
        if let Surface::Plane(p) = self {
            return Ok(p.normal);
        }
        let (du, dv) = self.d1(u, v);
        let n = du.cross(&dv);
        if n.length() < SINGULAR_EPS * (1.0 + du.length() * dv.length()) {
            return Err(GeometryError::SingularPoint {
                parameter: (u, v),
                reason: "Su x Sv vanishes".into(),
            });
        }
        n.normalized().ok_or_else(|| GeometryError::SingularPoint {
            parameter: (u, v),
            reason: "Su x Sv vanishes".into(),
        })
    }

    /// Normal with a limit fallback at singular points such as sphere poles.
    pub fn normal_at(&self, u: f64, v: f64) -> Vec3 {
        if let Ok(n) = self.normal(u, v) {
            return n;
        }
        let ((u0, u1), (v0, v1)) = self.finite_domain();
        let uc = 0.5 * (u0 + u1);
        let vc = 0.5 * (v0 + v1);
        let mut h = 1e-7;
        for _ in 0..6 {
            let un = u + (uc - u).signum() * h;
            let vn = v + (vc - v).signum() * h;
            if let Ok(n) = self.normal(un, vn).or_else(|_| self.normal(u, vn)) {
                return n;
            }
            h *= 10.0;
        }
        Vec3::Z
    }

    fn fundamental_forms(&self, u: f64, v: f64) -> Result<([f64; 3], [f64; 3]), GeometryError> {
        let d = self.derivatives(u, v);
        let n = self.normal(u, v)?;
        let first = [d.du.dot(&d.du), d.du.dot(&d.dv), d.dv.dot(&d.dv)];
        let second = [d.duu.dot(&n), d.duv.dot(&n), d.dvv.dot(&n)];
        Ok((first, second))
    }

    /// Gaussian, mean and principal curvatures. Signs are relative to the
    /// `Su x Sv` normal: a sphere has mean curvature `-1/r`.
    pub fn curvatures(&self, u: f64, v: f64) -> Result<Curvatures, GeometryError> {
        let ([e, f, g], [l, m, n]) = self.fundamental_forms(u, v)?;
        let det = e * g - f * f;
        if det.abs() < SINGULAR_EPS {
            return Err(GeometryError::SingularPoint {
                parameter: (u, v),
                reason: "degenerate first fundamental form".into(),
            });
        }
        let gaussian = (l * n - m * m) / det;
        let mean = (e * n - 2.0 * f * m + g * l) / (2.0 * det);
        let disc = (mean * mean - gaussian).max(0.0).sqrt();
        Ok(Curvatures {
            gaussian,
            mean,
            k_min: mean - disc,
            k_max: mean + disc,
        })
    }

    pub fn gaussian_curvature(&self, u: f64, v: f64) -> Result<f64, GeometryError> {
        Ok(self.curvatures(u, v)?.gaussian)
    }

    pub fn mean_curvature(&self, u: f64, v: f64) -> Result<f64, GeometryError> {
        Ok(self.curvatures(u, v)?.mean)
    }

    pub fn principal_curvatures(&self, u: f64, v: f64) -> Result<(f64, f64), GeometryError> {
        let c = self.curvatures(u, v)?;
        Ok((c.k_min, c.k_max))
    }

    pub fn domain(&self) -> ((f64, f64), (f64, f64)) {
        const ALL: (f64, f64) = (f64::NEG_INFINITY, f64::INFINITY);
        match self {
            Surface::Plane(_) => (ALL, ALL),
            Surface::Cylinder(_) | Surface::Cone(_) => ((0.0, TAU), ALL),
            Surface::Sphere(_) => ((0.0, TAU), (-FRAC_PI_2, FRAC_PI_2)),
            Surface::Torus(_) => ((0.0, TAU), (0.0, TAU)),
            Surface::Bezier(b) => b.as_bspline().domain(),
            Surface::BSpline(b) => b.domain(),
            Surface::Revolution(r) => ((0.0, TAU), r.basis.domain()),
            Surface::Extrusion(e) => (e.basis.domain(), ALL),
            Surface::Offset(o) => o.basis.domain(),
        }
    }

    /// Domain with infinite directions cut down to a sampling window.
    fn finite_domain(&self) -> ((f64, f64), (f64, f64)) {
        let ((u0, u1), (v0, v1)) = self.domain();
        let cut = |a: f64, b: f64| (a.max(-1e3), b.min(1e3));
        (cut(u0, u1), cut(v0, v1))
    }

    pub fn u_period(&self) -> Option<f64> {
        match self {
            Surface::Cylinder(_)
            | Surface::Cone(_)
            | Surface::Sphere(_)
            | Surface::Torus(_)
            | Surface::Revolution(_) => Some(TAU),
            Surface::BSpline(b) => b.u_period(),
            Surface::Extrusion(e) => e.basis.period(),
            Surface::Offset(o) => o.basis.u_period(),
            _ => None,
        }
    }

    pub fn v_period(&self) -> Option<f64> {
        match self {
            Surface::Torus(_) => Some(TAU),
            Surface::BSpline(b) => b.v_period(),
            Surface::Revolution(r) => r.basis.period(),
            Surface::Offset(o) => o.basis.v_period(),
            _ => None,
        }
    }

    pub fn as_plane(&self) -> Option<&Plane> {
        match self {
            Surface::Plane(p) => Some(p),
            _ => None,
        }
    }

    /// Parameters of the point on the surface closest to `p`. Periodic
    /// parameters are returned in their base period.
    pub fn parameters_of(&self, p: &Point3d) -> Result<(f64, f64), GeometryError> {
        if !p.is_finite() {
            return Err(GeometryError::InvalidInput("projected point is not finite".into()));
        }
        let (u, v) = match self {
            Surface::Plane(pl) => pl.parameters_of(p),
            Surface::Cylinder(c) => {
                let l = c.frame.to_local(p);
                (l.y.atan2(l.x), l.z)
            }
            Surface::Cone(c) => {
                let l = c.frame.to_local(p);
                let (s, co) = c.half_angle.sin_cos();
                let rho = l.x.hypot(l.y);
                (l.y.atan2(l.x), (rho - c.ref_radius) * s + l.z * co)
            }
            Surface::Sphere(s) => {
                let l = s.frame.to_local(p);
                (l.y.atan2(l.x), l.z.atan2(l.x.hypot(l.y)))
            }
            Surface::Torus(t) => {
                let l = t.frame.to_local(p);
                (l.y.atan2(l.x), l.z.atan2(l.x.hypot(l.y) - t.major_radius))
            }
            Surface::Offset(o) => return o.basis.parameters_of(p),
            Surface::Revolution(r) => {
                let seed = revolution_seed(r, p)?;
                self.refine_inversion(p, seed)
            }
            Surface::Extrusion(e) => {
                let along = (*p - e.basis.point(0.0)).dot(&e.direction);
                let flat = *p - e.direction * along;
                let u = e.basis.parameter_of(&flat)?;
                let v = (*p - e.basis.point(u)).dot(&e.direction);
                self.refine_inversion(p, (u, v))
            }
            Surface::Bezier(_) | Surface::BSpline(_) => {
                let seed = self.grid_seed(p, 24);
                self.refine_inversion(p, seed)
            }
        };
        if !u.is_finite() || !v.is_finite() {
            return Err(GeometryError::NumericalNonConvergence {
                solver: "surface inversion",
                iterations: INVERSION_ITERATIONS,
                residual: f64::NAN,
            });
        }
        Ok(self.normalize_parameters(u, v))
    }

    /// Like [`Surface::parameters_of`], with periodic parameters shifted to
    /// lie within half a period of `near`.
    pub fn parameters_of_near(&self, p: &Point3d, near: (f64, f64)) -> Result<(f64, f64), GeometryError> {
        let (mut u, mut v) = self.parameters_of(p)?;
        if let Some(period) = self.u_period() {
            u = unwrap_near(u, near.0, period);
        }
        if let Some(period) = self.v_period() {
            v = unwrap_near(v, near.1, period);
        }
        Ok((u, v))
    }

    /// Closest point on the surface with its parameters.
    pub fn project(&self, p: &Point3d) -> Result<(Point3d, f64, f64), GeometryError> {
        let (u, v) = self.parameters_of(p)?;
        Ok((self.point(u, v), u, v))
    }

    fn normalize_parameters(&self, u: f64, v: f64) -> (f64, f64) {
        let ((u0, _), (v0, _)) = self.domain();
        let u = self.u_period().map_or(u, |period| wrap_into(u, u0, period));
        let v = self.v_period().map_or(v, |period| wrap_into(v, v0, period));
        (u, v)
    }

    pub(crate) fn grid_seed(&self, p: &Point3d, n: usize) -> (f64, f64) {
        let ((u0, u1), (v0, v1)) = self.finite_domain();
        let mut best = ((u0, v0), f64::INFINITY);
        for i in 0..=n {
            let u = u0 + (u1 - u0) * i as f64 / n as f64;
            for j in 0..=n {
                let v = v0 + (v1 - v0) * j as f64 / n as f64;
                let d = self.point(u, v).distance_squared_to(p);
                if d < best.1 {
                    best = ((u, v), d);
                }
            }
        }
        best.0
    }

    /// Newton iteration on the gradient of |S(u,v) - p|², keeping the best
    /// iterate. Non-periodic directions are clamped to the domain.
    pub(crate) fn refine_inversion(&self, p: &Point3d, seed: (f64, f64)) -> (f64, f64) {
        let ((u0, u1), (v0, v1)) = self.domain();
        let clamp_u = self.u_period().is_none();
        let clamp_v = self.v_period().is_none();
        let (mut u, mut v) = seed;
        let mut best = (seed, self.point(u, v).distance_squared_to(p));
        for _ in 0..INVERSION_ITERATIONS {
            let d = self.derivatives(u, v);
            let r = d.point - *p;
            let grad = Vector2::new(r.dot(&d.du), r.dot(&d.dv));
            let j = Matrix2::new(
                d.du.dot(&d.du) + r.dot(&d.duu),
                d.du.dot(&d.dv) + r.dot(&d.duv),
                d.du.dot(&d.dv) + r.dot(&d.duv),
                d.dv.dot(&d.dv) + r.dot(&d.dvv),
            );
            let Some(step) = j.lu().solve(&grad) else {
                break;
            };
            u -= step.x;
            v -= step.y;
            if clamp_u {
                u = u.clamp(u0, u1);
            }
            if clamp_v {
                v = v.clamp(v0, v1);
            }
            let dist = self.point(u, v).distance_squared_to(p);
            if dist < best.1 {
                best = ((u, v), dist);
            }
            if step.norm() < 1e-14 * (1.0 + u.abs() + v.abs()) {
                break;
            }
        }
        best.0
    }

    /// Iso-parametric curve at fixed `u`, parametrized by `v`.
    pub fn u_iso(&self, u: f64) -> Result<Curve, GeometryError> {
        match self {
            Surface::Plane(p) => Ok(Curve::Line(Line3d {
                origin: p.point(u, 0.0),
                direction: p.v_axis,
            })),
            Surface::Cylinder(c) => Ok(Curve::Line(Line3d {
                origin: self.point(u, 0.0),
                direction: c.frame.z,
            })),
            Surface::Cone(c) => {
                let (s, co) = c.half_angle.sin_cos();
                Ok(Curve::Line(Line3d {
                    origin: self.point(u, 0.0),
                    direction: c.frame.radial(u) * s + c.frame.z * co,
                }))
            }
            Surface::Sphere(s) => meridian(s.frame, u, s.frame.origin, s.radius),
            Surface::Torus(t) => {
                let center = t.frame.origin + t.frame.radial(u) * t.major_radius;
                meridian(t.frame, u, center, t.minor_radius)
            }
            Surface::Bezier(b) => Ok(Curve::BSpline(b.as_bspline().u_iso(u)?)),
            Surface::BSpline(b) => Ok(Curve::BSpline(b.u_iso(u)?)),
            Surface::Revolution(r) => {
                let rotation = Transform::rotation(r.axis_origin, r.axis, u)?;
                Ok(r.basis.transformed(&rotation))
            }
            Surface::Extrusion(e) => Ok(Curve::Line(Line3d {
                origin: e.basis.point(u),
                direction: e.direction,
            })),
            Surface::Offset(_) => {
                let (v0, v1) = self.domain().1;
                sampled_curve(|v| self.point(u, v), v0, v1)
            }
        }
    }

    /// Iso-parametric curve at fixed `v`, parametrized by `u`.
    pub fn v_iso(&self, v: f64) -> Result<Curve, GeometryError> {
        match self {
            Surface::Plane(p) => Ok(Curve::Line(Line3d {
                origin: p.point(0.0, v),
                direction: p.u_axis,
            })),
            Surface::Cylinder(c) => parallel(c.frame, c.frame.origin + c.frame.z * v, c.radius),
            Surface::Cone(c) => {
                let (s, co) = c.half_angle.sin_cos();
                parallel(c.frame, c.frame.origin + c.frame.z * (v * co), c.ref_radius + v * s)
            }
            Surface::Sphere(s) => parallel(
                s.frame,
                s.frame.origin + s.frame.z * (s.radius * v.sin()),
                s.radius * v.cos(),
            ),
            Surface::Torus(t) => parallel(
                t.frame,
                t.frame.origin + t.frame.z * (t.minor_radius * v.sin()),
                t.major_radius + t.minor_radius * v.cos(),
            ),
            Surface::Bezier(b) => Ok(Curve::BSpline(b.as_bspline().v_iso(v)?)),
            Surface::BSpline(b) => Ok(Curve::BSpline(b.v_iso(v)?)),
            Surface::Revolution(r) => {
                let q = r.basis.point(v) - r.axis_origin;
                let along = q.dot(&r.axis);
                let perp = q.reject_from(&r.axis);
                let x = perp
                    .normalized()
                    .ok_or_else(|| GeometryError::DegenerateGeometry("parallel circle on the axis".into()))?;
                let frame = Frame {
                    origin: r.axis_origin + r.axis * along,
                    x,
                    y: r.axis.cross(&x),
                    z: r.axis,
                };
                Ok(Curve::Circle(Circle3d::with_frame(frame, perp.length())?))
            }
            Surface::Extrusion(e) => Ok(e.basis.transformed(&Transform::from_translation_vec(e.direction * v))),
            Surface::Offset(_) => {
                let (u0, u1) = self.domain().0;
                sampled_curve(|u| self.point(u, v), u0, u1)
            }
        }
    }

    pub fn transformed(&self, t: &Transform) -> Surface {
        let s = t.scale_factor();
        match self {
            Surface::Plane(p) => {
                let u_axis = t.transform_direction(&p.u_axis).normalize_or(p.u_axis);
                let v_axis = t.transform_direction(&p.v_axis).normalize_or(p.v_axis);
                Surface::Plane(Plane {
                    origin: t.transform_point(&p.origin),
                    normal: u_axis.cross(&v_axis).normalize_or(p.normal),
                    u_axis,
                    v_axis,
                })
            }
            Surface::Cylinder(c) => Surface::Cylinder(Cylinder {
                frame: c.frame.transformed(t),
                radius: c.radius * s,
            }),
            Surface::Cone(c) => Surface::Cone(Cone {
                frame: c.frame.transformed(t),
                ref_radius: c.ref_radius * s,
                half_angle: c.half_angle,
            }),
            Surface::Sphere(sp) => Surface::Sphere(Sphere {
                frame: sp.frame.transformed(t),
                radius: sp.radius * s,
            }),
            Surface::Torus(to) => Surface::Torus(Torus {
                frame: to.frame.transformed(t),
                major_radius: to.major_radius * s,
                minor_radius: to.minor_radius * s,
            }),
            Surface::Bezier(b) => Surface::Bezier(b.transformed(t)),
            Surface::BSpline(b) => Surface::BSpline(b.transformed(t)),
            Surface::Revolution(r) => Surface::Revolution(RevolutionSurface {
                basis: Box::new(r.basis.transformed(t)),
                axis_origin: t.transform_point(&r.axis_origin),
                axis: t.transform_direction(&r.axis).normalize_or(r.axis),
            }),
            Surface::Extrusion(e) => Surface::Extrusion(ExtrusionSurface {
                basis: Box::new(e.basis.transformed(t)),
                direction: t.transform_direction(&e.direction).normalize_or(e.direction),
            }),
            Surface::Offset(o) => Surface::Offset(OffsetSurface {
                basis: Box::new(o.basis.transformed(t)),
                // A mirror flips Su x Sv, so the offset side flips with it.
                distance: if t.is_mirror() { -o.distance * s } else { o.distance * s },
            }),
        }
    }

    /// Factors mapping (u, v) of `self` to (u, v) of `self.transformed(t)`.
    pub fn parameter_scales(&self, t: &Transform) -> (f64, f64) {
        let s = t.scale_factor();
        match self {
            Surface::Plane(_) => (s, s),
            Surface::Cylinder(_) | Surface::Cone(_) => (1.0, s),
            Surface::Revolution(r) => (1.0, r.basis.parameter_scale(t)),
            Surface::Extrusion(e) => (e.basis.parameter_scale(t), s),
            Surface::Offset(o) => o.basis.parameter_scales(t),
            _ => (1.0, 1.0),
        }
    }

    pub fn surface_type_name(&self) -> &'static str {
        match self {
            Surface::Plane(_) => "Plane",
            Surface::Cylinder(_) => "Cylinder",
            Surface::Cone(_) => "Cone",
            Surface::Sphere(_) => "Sphere",
            Surface::Torus(_) => "Torus",
            Surface::Bezier(_) => "Bezier",
            Surface::BSpline(_) => "BSpline",
            Surface::Revolution(_) => "Revolution",
            Surface::Extrusion(_) => "Extrusion",
            Surface::Offset(_) => "Offset",
        }
    }
}

/// Shift a periodic value by whole periods to within half a period of `reference`.
pub fn unwrap_near(value: f64, reference: f64, period: f64) -> f64 {
    value + ((reference - value) / period).round() * period
}

fn meridian(frame: Frame, u: f64, center: Point3d, radius: f64) -> Result<Curve, GeometryError> {
    let x = frame.radial(u);
    let circle_frame = Frame {
        origin: center,
        x,
        y: frame.z,
        z: x.cross(&frame.z),
    };
    Ok(Curve::Circle(Circle3d::with_frame(circle_frame, radius)?))
}

fn parallel(frame: Frame, center: Point3d, radius: f64) -> Result<Curve, GeometryError> {
    Ok(Curve::Circle(Circle3d::with_frame(
        Frame {
            origin: center,
            ..frame
        },
        radius,
    )?))
}

/// Degree-1 curve whose knots are the sample parameters, so parameters match.
fn sampled_curve(f: impl Fn(f64) -> Point3d, a: f64, b: f64) -> Result<Curve, GeometryError> {
    if !a.is_finite() || !b.is_finite() {
        return Err(GeometryError::InvalidInput("iso curve over an unbounded range".into()));
    }
    const N: usize = 64;
    let params: Vec<f64> = (0..=N).map(|i| a + (b - a) * i as f64 / N as f64).collect();
    let poles = params.iter().map(|&t| f(t)).collect();
    let mut knots = Vec::with_capacity(N + 3);
    knots.push(a);
    knots.extend_from_slice(&params);
    knots.push(b);
    Ok(Curve::BSpline(BSplineCurve::new(1, poles, None, knots)?))
}

fn revolution_seed(r: &RevolutionSurface, p: &Point3d) -> Result<(f64, f64), GeometryError> {
    let (v0, v1) = r.basis.domain();
    let (v0, v1) = (v0.max(-1e3), v1.min(1e3));
    let reference = r.basis.point(0.5 * (v0 + v1)) - r.axis_origin;
    let q = *p - r.axis_origin;
    let e0 = reference.reject_from(&r.axis);
    let e1 = q.reject_from(&r.axis);
    let u = if e0.length() > SINGULAR_EPS && e1.length() > SINGULAR_EPS {
        e0.signed_angle_to(&e1, &r.axis)
    } else {
        0.0
    };
    let back = r.axis_origin + r.rotate(q, -u);
    let v = r.basis.parameter_of_in(&back, v0, v1)?;
    Ok((u, v))
}

fn offset_derivatives(o: &OffsetSurface, u: f64, v: f64) -> SurfaceDerivatives {
    let first = |u: f64, v: f64| -> (Point3d, Vec3, Vec3) {
        let b = o.basis.derivatives(u, v);
        let n = o.basis.normal_at(u, v);
        let e = b.du.dot(&b.du);
        let f = b.du.dot(&b.dv);
        let g = b.dv.dot(&b.dv);
        let l = b.duu.dot(&n);
        let m = b.duv.dot(&n);
        let nn = b.dvv.dot(&n);
        let det = e * g - f * f;
        if det.abs() < 1e-300 {
            return (b.point + n * o.distance, b.du, b.dv);
        }
        // Weingarten equations for the normal derivatives.
        let n_u = (b.du * (f * m - g * l) + b.dv * (f * l - e * m)) / det;
        let n_v = (b.du * (f * nn - g * m) + b.dv * (f * m - e * nn)) / det;
        (b.point + n * o.distance, b.du + n_u * o.distance, b.dv + n_v * o.distance)
    };
    let (point, du, dv) = first(u, v);
    let h = 1e-6;
    let (_, du_up, dv_up) = first(u + h, v);
    let (_, du_um, dv_um) = first(u - h, v);
    let (_, du_vp, dv_vp) = first(u, v + h);
    let (_, du_vm, dv_vm) = first(u, v - h);
    let duv = ((dv_up - dv_um) + (du_vp - du_vm)) / (4.0 * h);
    derivs(
        point,
        du,
        dv,
        (du_up - du_um) / (2.0 * h),
        duv,
        (dv_vp - dv_vm) / (2.0 * h),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn samples() -> Vec<Surface> {
        let frame = Frame::new(Point3d::new(0.5, -1.0, 2.0), Vec3::new(0.2, 0.3, 1.0), Vec3::X).unwrap();
        let arc = Curve::Circle(Circle3d::new(Point3d::new(3.0, 0.0, 0.0), Vec3::Y, 1.0).unwrap());
        vec![
            Surface::Plane(Plane::new(Point3d::new(1.0, 2.0, 3.0), Vec3::new(1.0, 1.0, 0.0)).unwrap()),
            Surface::Cylinder(Cylinder::new(frame, 2.0).unwrap()),
            Surface::Cone(Cone::new(frame, 1.5, 0.4).unwrap()),
            Surface::Sphere(Sphere::with_frame(frame, 3.0).unwrap()),
            Surface::Torus(Torus::new(frame, 4.0, 1.0).unwrap()),
            Surface::Revolution(RevolutionSurface::new(arc.clone(), Point3d::ORIGIN, Vec3::Z).unwrap()),
            Surface::Extrusion(ExtrusionSurface::new(arc, Vec3::new(0.0, 1.0, 1.0)).unwrap()),
        ]
    }

    #[test]
    fn test_sphere_on_surface() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 3.0).unwrap());
        for i in 0..10 {
            for j in 0..10 {
                let u = 2.0 * PI * (i as f64 / 10.0);
                let v = -FRAC_PI_2 + PI * (j as f64 / 10.0);
                let r = s.point(u, v).distance_to(&Point3d::ORIGIN);
                assert!((r - 3.0).abs() < 1e-10, "r={} at u={}, v={}", r, u, v);
            }
        }
    }

    #[test]
    fn test_first_derivatives_match_finite_differences() {
        let h = 1e-6;
        for s in samples() {
            let (u, v) = (0.7, 0.3);
            let d = s.derivatives(u, v);
            let fu = (s.point(u + h, v) - s.point(u - h, v)) / (2.0 * h);
            let fv = (s.point(u, v + h) - s.point(u, v - h)) / (2.0 * h);
            assert!((d.du - fu).length() < 1e-6, "{} du", s.surface_type_name());
            assert!((d.dv - fv).length() < 1e-6, "{} dv", s.surface_type_name());
            let fuv = (s.derivatives(u, v + h).du - s.derivatives(u, v - h).du) / (2.0 * h);
            assert!((d.duv - fuv).length() < 1e-5, "{} duv", s.surface_type_name());
        }
    }

    #[test]
    fn test_inversion_round_trip() {
        for s in samples() {
            for (u, v) in [(0.4, 0.2), (2.5, -0.3), (5.0, 0.9)] {
                let p = s.point(u, v);
                let (ui, vi) = s.parameters_of(&p).unwrap();
                assert!(
                    s.point(ui, vi).distance_to(&p) < 1e-8,
                    "{} at ({}, {})",
                    s.surface_type_name(),
                    u,
                    v
                );
            }
        }
    }

    #[test]
    fn test_sphere_curvature() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 2.0).unwrap());
        let c = s.curvatures(0.3, 0.4).unwrap();
        assert_relative_eq!(c.gaussian, 0.25, epsilon = 1e-12);
        assert_relative_eq!(c.mean, -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_cylinder_principal_curvatures() {
        let s = Surface::Cylinder(Cylinder::new(Frame::world(), 4.0).unwrap());
        let (k1, k2) = s.principal_curvatures(1.0, 2.0).unwrap();
        assert_relative_eq!(k1, -0.25, epsilon = 1e-12);
        assert_relative_eq!(k2, 0.0, epsilon = 1e-12);
        assert_relative_eq!(s.gaussian_curvature(1.0, 2.0).unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(s.mean_curvature(1.0, 2.0).unwrap(), -0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_pole_is_singular_but_normal_at_recovers() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0).unwrap());
        assert!(matches!(s.normal(0.0, FRAC_PI_2), Err(GeometryError::SingularPoint { .. })));
        let n = s.normal_at(0.0, FRAC_PI_2);
        assert!((n - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn test_iso_curves_follow_surface() {
        for s in samples() {
            let (u, v) = (1.1, 0.25);
            let ui = s.u_iso(u).unwrap();
            let vi = s.v_iso(v).unwrap();
            assert!(ui.point(v).distance_to(&s.point(u, v)) < 1e-10, "{}", s.surface_type_name());
            assert!(vi.point(u).distance_to(&s.point(u, v)) < 1e-10, "{}", s.surface_type_name());
        }
    }

    #[test]
    fn test_offset_of_plane_and_sphere() {
        let plane = Surface::Plane(Plane::xy());
        let off = Surface::Offset(OffsetSurface::new(plane, 2.0).unwrap());
        assert!((off.point(1.0, 1.0).z - 2.0).abs() < 1e-12);

        let sphere = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0).unwrap());
        let off = Surface::Offset(OffsetSurface::new(sphere, 0.5).unwrap());
        let p = off.point(0.3, 0.2);
        assert!((p.distance_to(&Point3d::ORIGIN) - 1.5).abs() < 1e-12);
        let (du, _) = off.d1(0.3, 0.2);
        let h = 1e-6;
        let fd = (off.point(0.3 + h, 0.2) - off.point(0.3 - h, 0.2)) / (2.0 * h);
        assert!((du - fd).length() < 1e-6);
    }

    #[test]
    fn test_mirror_flips_normal() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0).unwrap());
        let m = Transform::mirror(Point3d::ORIGIN, Vec3::X).unwrap();
        let ms = s.transformed(&m);
        let (u, v) = (0.5, 0.2);
        let p = ms.point(u, v);
        let n = ms.normal(u, v).unwrap();
        // Outward before, inward after.
        assert!(n.dot(&p.to_vec3()) < 0.0);
    }

    #[test]
    fn test_scaled_plane_parameters() {
        let s = Surface::Plane(Plane::xy());
        let t = Transform::scaling_about(Point3d::ORIGIN, 2.0).unwrap();
        let moved = s.transformed(&t);
        let (su, sv) = s.parameter_scales(&t);
        let p = moved.point(1.0 * su, 3.0 * sv);
        assert!(p.distance_to(&t.transform_point(&s.point(1.0, 3.0))) < 1e-12);
    }
}
