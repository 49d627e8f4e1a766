use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

use super::frame::Frame;
use super::nurbs::{BSplineCurve, BezierCurve};
use super::point::Point3d;
use super::transform::Transform;
use super::vector::Vec3;
use crate::error::GeometryError;

/// Derivative magnitudes below this are treated as vanishing.
const SINGULAR_EPS: f64 = 1e-12;
const PROJECTION_ITERATIONS: usize = 50;
/// Relative orthogonality residual accepted by curve projection.
const PROJECTION_TOLERANCE: f64 = 1e-10;

/// Analytic and free-form curve representations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Curve {
    Line(Line3d),
    Circle(Circle3d),
    Ellipse(Ellipse3d),
    Parabola(Parabola3d),
    Hyperbola(Hyperbola3d),
    Bezier(BezierCurve),
    BSpline(BSplineCurve),
}

/// An infinite line `origin + direction * t` with unit `direction`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line3d {
    pub origin: Point3d,
    pub direction: Vec3,
}

impl Line3d {
    pub fn new(origin: Point3d, direction: Vec3) -> Result<Self, GeometryError> {
        let direction = direction
            .normalized()
            .ok_or_else(|| GeometryError::DegenerateGeometry("zero line direction".into()))?;
        Ok(Self { origin, direction })
    }

    /// Line through `a` and `b`; `a` is at t = 0 and `b` at t = |b - a|.
    pub fn from_points(a: Point3d, b: Point3d) -> Result<Self, GeometryError> {
        Self::new(a, b - a)
    }

    pub fn point(&self, t: f64) -> Point3d {
        self.origin + self.direction * t
    }

    pub fn closest_point(&self, p: &Point3d) -> (Point3d, f64) {
        let t = (*p - self.origin).dot(&self.direction);
        (self.point(t), t)
    }

    pub fn distance_to_point(&self, p: &Point3d) -> f64 {
        let (closest, _) = self.closest_point(p);
        p.distance_to(&closest)
    }
}

/// A circle of radius `radius` in the xy plane of `frame`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle3d {
    pub frame: Frame,
    pub radius: f64,
}

impl Circle3d {
    pub fn new(center: Point3d, normal: Vec3, radius: f64) -> Result<Self, GeometryError> {
        Self::with_frame(Frame::from_axis(center, normal)?, radius)
    }

    pub fn with_frame(frame: Frame, radius: f64) -> Result<Self, GeometryError> {
        if !(radius > 0.0) || !radius.is_finite() {
            return Err(GeometryError::DegenerateGeometry(format!("circle radius {radius}")));
        }
        Ok(Self { frame, radius })
    }

    /// Circle through three points. The frame's x axis points at `a`, so the
    /// arc a → b → c runs over [0, end] with the returned `end`.
    pub fn through_three_points(a: Point3d, b: Point3d, c: Point3d) -> Result<(Self, f64), GeometryError> {
        let ab = b - a;
        let ac = c - a;
        let n = ab.cross(&ac);
        let n2 = n.length_squared();
        if n2 < SINGULAR_EPS * SINGULAR_EPS {
            return Err(GeometryError::DegenerateGeometry("collinear points define no circle".into()));
        }
        let to_center = (n.cross(&ab) * ac.length_squared() + ac.cross(&n) * ab.length_squared()) / (2.0 * n2);
        let center = a + to_center;
        let frame = Frame::new(center, n, a - center)?;
        let circle = Self::with_frame(frame, to_center.length())?;
        let end = circle.angle_of(&c);
        let end = if end < 1e-15 { TAU } else { end };
        Ok((circle, end))
    }

    pub fn center(&self) -> Point3d {
        self.frame.origin
    }

    pub fn normal(&self) -> Vec3 {
        self.frame.z
    }

    pub fn point(&self, t: f64) -> Point3d {
        self.frame.origin + self.frame.radial(t) * self.radius
    }

    /// Angle of the projection of `p` in [0, 2π).
    pub fn angle_of(&self, p: &Point3d) -> f64 {
        let l = self.frame.to_local(p);
        l.y.atan2(l.x).rem_euclid(TAU)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse3d {
    pub frame: Frame,
    pub major_radius: f64,
    pub minor_radius: f64,
}

impl Ellipse3d {
    pub fn new(frame: Frame, major_radius: f64, minor_radius: f64) -> Result<Self, GeometryError> {
        if !(minor_radius > 0.0) || major_radius < minor_radius {
            return Err(GeometryError::DegenerateGeometry(format!(
                "ellipse radii {major_radius}, {minor_radius}"
            )));
        }
        Ok(Self {
            frame,
            major_radius,
            minor_radius,
        })
    }

    pub fn point(&self, t: f64) -> Point3d {
        self.frame.origin
            + self.frame.x * (self.major_radius * t.cos())
            + self.frame.y * (self.minor_radius * t.sin())
    }
}

/// Parabola `origin + t²/(4f) x + t y` with focal length `f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parabola3d {
    pub frame: Frame,
    pub focal: f64,
}

impl Parabola3d {
    pub fn new(frame: Frame, focal: f64) -> Result<Self, GeometryError> {
        if !(focal > 0.0) {
            return Err(GeometryError::DegenerateGeometry(format!("parabola focal length {focal}")));
        }
        Ok(Self { frame, focal })
    }

    pub fn point(&self, t: f64) -> Point3d {
        self.frame.origin + self.frame.x * (t * t / (4.0 * self.focal)) + self.frame.y * t
    }
}

/// Hyperbola branch `origin + a cosh t x + b sinh t y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperbola3d {
    pub frame: Frame,
    pub major_radius: f64,
    pub minor_radius: f64,
}

impl Hyperbola3d {
    pub fn new(frame: Frame, major_radius: f64, minor_radius: f64) -> Result<Self, GeometryError> {
        if !(major_radius > 0.0) || !(minor_radius > 0.0) {
            return Err(GeometryError::DegenerateGeometry(format!(
                "hyperbola radii {major_radius}, {minor_radius}"
            )));
        }
        Ok(Self {
            frame,
            major_radius,
            minor_radius,
        })
    }

    pub fn point(&self, t: f64) -> Point3d {
        self.frame.origin
            + self.frame.x * (self.major_radius * t.cosh())
            + self.frame.y * (self.minor_radius * t.sinh())
    }
}

impl Curve {
    /// Segment from `a` to `b`, returned with its parameter range.
    pub fn segment(a: Point3d, b: Point3d) -> Result<(Curve, f64, f64), GeometryError> {
        let line = Line3d::from_points(a, b)?;
        Ok((Curve::Line(line), 0.0, a.distance_to(&b)))
    }

    pub fn point(&self, t: f64) -> Point3d {
        match self {
            Curve::Line(l) => l.point(t),
            Curve::Circle(c) => c.point(t),
            Curve::Ellipse(e) => e.point(t),
            Curve::Parabola(p) => p.point(t),
            Curve::Hyperbola(h) => h.point(t),
            Curve::Bezier(b) => b.as_bspline().point(t),
            Curve::BSpline(s) => s.point(t),
        }
    }

    /// Derivatives of order 1 to 3 at `t`.
    pub fn derivatives(&self, t: f64) -> [Vec3; 3] {
        match self {
            Curve::Line(l) => [l.direction, Vec3::ZERO, Vec3::ZERO],
            Curve::Circle(c) => {
                let r = c.radius;
                let radial = c.frame.radial(t);
                let tangent = c.frame.radial_tangent(t);
                [tangent * r, radial * -r, tangent * -r]
            }
            Curve::Ellipse(_) => {
                let seed = self.sampled_seed(p, 0.0, TAU, 64);
                let t = self.refine_projection(p, seed, f64::NEG_INFINITY, f64::INFINITY)?;
                wrap_into(t, first, TAU)
            }
            Curve::Parabola(pa) => {
                let seed = pa.frame.to_local(p).y.clamp(first, last);
                self.refine_projection(p, seed, first, last)?
            }
            Curve::Hyperbola(h) => {
                let seed = (h.frame.to_local(p).y / h.minor_radius).asinh().clamp(first, last);
                self.refine_projection(p, seed, first, last)?
            }
            Curve::Bezier(_) | Curve::BSpline(_) => {
                let (lo, hi) = clamp_range(self.domain(), first, last);
                let seed = self.sampled_seed(p, lo, hi, 64);
                let t = self.refine_projection(p, seed, lo, hi)?;
                match self.period() {
                    Some(period) => wrap_into(t, first, period),
                    None => t,
                }
            }
        };
        if !t.is_finite() {
            return Err(GeometryError::NumericalNonConvergence {
                solver: "curve projection",
                iterations: PROJECTION_ITERATIONS,
                residual: f64::NAN,
            });
        }
        Ok(t)
    }

    /// Closest point on the curve and its parameter.
    pub fn closest_point(&self, p: &Point3d) -> Result<(Point3d, f64), GeometryError> {
        let t = self.parameter_of(p)?;
        Ok((self.point(t), t))
    }

    fn sampled_seed(&self, p: &Point3d, lo: f64, hi: f64, n: usize) -> f64 {
        let mut best = (lo, f64::INFINITY);
        for i in 0..=n {
            let t = lo + (hi - lo) * i as f64 / n as f64;
            let d = self.point(t).distance_squared_to(p);
            if d < best.1 {
                best = (t, d);
            }
        }
        best.0
    }

    /// Newton iteration on f(t) = (C(t) - p) . C'(t) = 0 with step halving.
    ///
    /// Fails with `NumericalNonConvergence` unless the final iterate is
    /// orthogonal to within `PROJECTION_TOLERANCE` or sits on a bound the
    /// distance grows away from.
    pub(crate) fn refine_projection(&self, p: &Point3d, seed: f64, lo: f64, hi: f64) -> Result<f64, GeometryError> {
        let residual = |t: f64| {
            let r = self.point(t) - *p;
            let d1 = self.d1(t);
            (r.dot(&d1), d1.length() * (1.0 + r.length()))
        };
        let mut t = seed.clamp(lo, hi);
        let (mut f, mut scale) = residual(t);
        for _ in 0..PROJECTION_ITERATIONS {
            if f.abs() <= PROJECTION_TOLERANCE * scale {
                break;
            }
            let [d1, d2, _] = self.derivatives(t);
            let df = d1.length_squared() + (self.point(t) - *p).dot(&d2);
            // Away from a minimum the Newton direction is unreliable; descend instead.
            let mut step = if df > 1e-300 { f / df } else { f.signum() * 1e-3 * (1.0 + t.abs()) };
            let mut moved = false;
            for _ in 0..40 {
                let next = (t - step).clamp(lo, hi);
                let (f_next, scale_next) = residual(next);
                if f_next.abs() < f.abs() || f_next.abs() <= PROJECTION_TOLERANCE * scale_next {
                    t = next;
                    (f, scale) = (f_next, scale_next);
                    moved = true;
                    break;
                }
                step *= 0.5;
            }
            if !moved {
                break;
            }
        }
        let on_bound = (t <= lo && f > 0.0) || (t >= hi && f < 0.0);
        if f.abs() <= PROJECTION_TOLERANCE * scale || on_bound {
            Ok(t)
        } else {
            Err(GeometryError::NumericalNonConvergence {
                solver: "curve projection",
                iterations: PROJECTION_ITERATIONS,
                residual: f.abs(),
            })
        }
    }

    /// Arc length over [t0, t1] by adaptive Gauss-Legendre quadrature.
    pub fn length(&self, t0: f64, t1: f64) -> f64 {
        match self {
            Curve::Line(_) => (t1 - t0).abs(),
            Curve::Circle(c) => c.radius * (t1 - t0).abs(),
            _ => {
                let speed = |t: f64| self.d1(t).length();
                let whole = gauss_legendre(&speed, t0, t1);
                adaptive_length(&speed, t0, t1, whole, 1e-10 * (1.0 + whole.abs()), 0).abs()
            }
        }
    }

    /// Same point set traversed backwards. Parameter `t` on `self`
    /// corresponds to [`Curve::reversed_parameter`] on the result.
    pub fn reversed(&self) -> Curve {
        match self {
            Curve::Line(l) => Curve::Line(Line3d {
                origin: l.origin,
                direction: -l.direction,
            }),
            Curve::Circle(c) => Curve::Circle(Circle3d {
                frame: c.frame.flipped_y(),
                ..*c
            }),
            Curve::Ellipse(e) => Curve::Ellipse(Ellipse3d {
                frame: e.frame.flipped_y(),
                ..*e
            }),
            Curve::Parabola(p) => Curve::Parabola(Parabola3d {
                frame: p.frame.flipped_y(),
                ..*p
            }),
            Curve::Hyperbola(h) => Curve::Hyperbola(Hyperbola3d {
                frame: h.frame.flipped_y(),
                ..*h
            }),
            Curve::Bezier(b) => Curve::Bezier(b.reversed()),
            Curve::BSpline(s) => Curve::BSpline(s.reversed()),
        }
    }

    pub fn reversed_parameter(&self, t: f64) -> f64 {
        match self {
            Curve::Bezier(b) => spline_reflection(b.as_bspline()) - t,
            Curve::BSpline(s) => spline_reflection(s) - t,
            _ => -t,
        }
    }

    pub fn transformed(&self, t: &Transform) -> Curve {
        match self {
            Curve::Line(l) => Curve::Line(Line3d {
                origin: t.transform_point(&l.origin),
                direction: t.transform_direction(&l.direction).normalize_or(l.direction),
            }),
            Curve::Circle(c) => Curve::Circle(Circle3d {
                frame: c.frame.transformed(t),
                radius: c.radius * t.scale_factor(),
            }),
            Curve::Ellipse(e) => Curve::Ellipse(Ellipse3d {
                frame: e.frame.transformed(t),
                major_radius: e.major_radius * t.scale_factor(),
                minor_radius: e.minor_radius * t.scale_factor(),
            }),
            Curve::Parabola(p) => Curve::Parabola(Parabola3d {
                frame: p.frame.transformed(t),
                focal: p.focal * t.scale_factor(),
            }),
            Curve::Hyperbola(h) => Curve::Hyperbola(Hyperbola3d {
                frame: h.frame.transformed(t),
                major_radius: h.major_radius * t.scale_factor(),
                minor_radius: h.minor_radius * t.scale_factor(),
            }),
            Curve::Bezier(b) => Curve::Bezier(b.transformed(t)),
            Curve::BSpline(s) => Curve::BSpline(s.transformed(t)),
        }
    }

    /// Factor mapping parameters of `self` to parameters of `self.transformed(t)`.
    pub fn parameter_scale(&self, t: &Transform) -> f64 {
        match self {
            Curve::Line(_) | Curve::Parabola(_) => t.scale_factor(),
            _ => 1.0,
        }
    }

    /// Parameters subdividing [first, last] so that every chord deviates from
    /// the curve by at most `deflection` and turns by at most `angle`.
    /// Chords shorter than `min_size` are not split further.
    pub fn discretize(&self, first: f64, last: f64, deflection: f64, angle: f64, min_size: f64) -> Vec<f64> {
        let initial = match self {
            Curve::Line(_) => 1,
            Curve::Circle(_) | Curve::Ellipse(_) => (((last - first).abs() / (PI / 4.0)).ceil() as usize).max(2),
            Curve::BSpline(s) => s.poles().len().max(4),
            Curve::Bezier(b) => b.poles().len().max(4),
            _ => 8,
        };
        let mut params = vec![first];
        for i in 0..initial {
            let a = first + (last - first) * i as f64 / initial as f64;
            let b = first + (last - first) * (i + 1) as f64 / initial as f64;
            self.subdivide(a, b, deflection, angle, min_size, 0, &mut params);
        }
        params
    }

    #[allow(clippy::too_many_arguments)]
    fn subdivide(
        &self,
        a: f64,
        b: f64,
        deflection: f64,
        angle: f64,
        min_size: f64,
        depth: usize,
        out: &mut Vec<f64>,
    ) {
        if depth < 24 && !self.is_linear() {
            let pa = self.point(a);
            let pb = self.point(b);
            let chord = pa.distance_to(&pb);
            if chord > min_size {
                let m = 0.5 * (a + b);
                let sag = self.point(m).distance_to(&pa.midpoint(&pb));
                let turn = self.d1(a).angle_to(&self.d1(b));
                if sag > deflection || turn > angle {
                    self.subdivide(a, m, deflection, angle, min_size, depth + 1, out);
                    self.subdivide(m, b, deflection, angle, min_size, depth + 1, out);
                    return;
                }
            }
        }
        out.push(b);
    }

    pub fn curve_type_name(&self) -> &'static str {
        match self {
            Curve::Line(_) => "Line",
            Curve::Circle(_) => "Circle",
            Curve::Ellipse(_) => "Ellipse",
            Curve::Parabola(_) => "Parabola",
            Curve::Hyperbola(_) => "Hyperbola",
            Curve::Bezier(_) => "Bezier",
            Curve::BSpline(_) => "BSpline",
        }
    }
}

fn spline_derivatives(s: &BSplineCurve, t: f64) -> [Vec3; 3] {
    let d = s.derivatives(t, 3);
    [d[1], d[2], d[3]]
}

fn spline_reflection(s: &BSplineCurve) -> f64 {
    let k = s.knots();
    k[0] + k[k.len() - 1]
}

fn clamp_range(domain: (f64, f64), first: f64, last: f64) -> (f64, f64) {
    (first.max(domain.0), last.min(domain.1))
}

/// Shift `t` by whole periods into [start, start + period).
pub(crate) fn wrap_into(t: f64, start: f64, period: f64) -> f64 {
    if !start.is_finite() {
        return t;
    }
    let w = start + (t - start).rem_euclid(period);
    // Values a hair below start + period belong to the period end.
    if (w - start - period).abs() < 1e-12 { start } else { w }
}

const GL_NODES: [f64; 5] = [
    0.0,
    -0.538_469_310_105_683,
    0.538_469_310_105_683,
    -0.906_179_845_938_664,
    0.906_179_845_938_664,
];
const GL_WEIGHTS: [f64; 5] = [
    0.568_888_888_888_889,
    0.478_628_670_499_366,
    0.478_628_670_499_366,
    0.236_926_885_056_189,
    0.236_926_885_056_189,
];

fn gauss_legendre(f: &dyn Fn(f64) -> f64, a: f64, b: f64) -> f64 {
    let half = 0.5 * (b - a);
    let mid = 0.5 * (a + b);
    GL_NODES
        .iter()
        .zip(GL_WEIGHTS.iter())
        .map(|(x, w)| w * f(mid + half * x))
        .sum::<f64>()
        * half
}

fn adaptive_length(f: &dyn Fn(f64) -> f64, a: f64, b: f64, whole: f64, tol: f64, depth: usize) -> f64 {
    let m = 0.5 * (a + b);
    let left = gauss_legendre(f, a, m);
    let right = gauss_legendre(f, m, b);
    if depth >= 20 || (left + right - whole).abs() <= tol {
        return left + right;
    }
    adaptive_length(f, a, m, left, 0.5 * tol, depth + 1) + adaptive_length(f, m, b, right, 0.5 * tol, depth + 1)
}

/// A ray for intersection testing.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Point3d,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Point3d, direction: Vec3) -> Result<Self, GeometryError> {
        let direction = direction
            .normalized()
            .ok_or_else(|| GeometryError::DegenerateGeometry("zero ray direction".into()))?;
        Ok(Self { origin, direction })
    }

    pub fn at(&self, t: f64) -> Point3d {
        self.origin + self.direction * t
    }
}
