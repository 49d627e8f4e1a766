use crate::Tolerance;

use super::curves::{Circle3d, Curve, Ellipse3d, Line3d};
use super::frame::Frame;
use super::point::Point3d;
use super::surfaces::{Cone, Cylinder, Plane, Sphere, Surface};

/// Result of intersecting two analytic surfaces.
#[derive(Debug, Clone)]
pub enum SurfaceIntersection {
    /// Surfaces do not intersect.
    None,
    /// Surfaces touch at a single point (degenerate/tangent case).
    Point(Point3d),
    /// Surfaces intersect along one or more curves.
    Curves(Vec<Curve>),
    /// Surfaces are coincident (identical geometric locus).
    Coincident,
}

/// Closed-form intersection of two surfaces, or `None` when the pair has
/// no closed form and must be marched numerically.
pub fn analytic_intersection(s1: &Surface, s2: &Surface, tol: &Tolerance) -> Option<SurfaceIntersection> {
    use Surface as S;
    match (s1, s2) {
        (S::Plane(a), S::Plane(b)) => Some(plane_plane(a, b, tol)),
        (S::Plane(p), S::Cylinder(c)) | (S::Cylinder(c), S::Plane(p)) => Some(plane_cylinder(p, c, tol)),
        (S::Plane(p), S::Sphere(s)) | (S::Sphere(s), S::Plane(p)) => Some(plane_sphere(p, s, tol)),
        (S::Plane(p), S::Cone(c)) | (S::Cone(c), S::Plane(p)) => plane_cone(p, c, tol),
        (S::Sphere(a), S::Sphere(b)) => Some(sphere_sphere(a, b, tol)),
        (S::Cylinder(a), S::Cylinder(b)) => cylinder_cylinder(a, b, tol),
        _ => None,
    }
}

// ─── Plane–Plane ─────────────────────────────────────────────────────────────

/// Intersect two infinite planes.
///
/// - Parallel, non-coincident -> `None`
/// - Coincident -> `Coincident`
/// - Transverse -> one line
pub fn plane_plane(p1: &Plane, p2: &Plane, tol: &Tolerance) -> SurfaceIntersection {
    let cross = p1.normal.cross(&p2.normal);
    let cross_len = cross.length();

    if cross_len < tol.angular {
        if p1.distance_to_point(&p2.origin).abs() < tol.coincidence {
            return SurfaceIntersection::Coincident;
        }
        return SurfaceIntersection::None;
    }

    // Point on both planes: n_i . P = d_i, P in span(n1, n2).
    let d1 = p1.origin.to_vec3().dot(&p1.normal);
    let d2 = p2.origin.to_vec3().dot(&p2.normal);
    let n1n2 = p1.normal.dot(&p2.normal);
    let denom = 1.0 - n1n2 * n1n2;
    let c1 = (d1 - d2 * n1n2) / denom;
    let c2 = (d2 - d1 * n1n2) / denom;
    let origin = Point3d::ORIGIN + p1.normal * c1 + p2.normal * c2;

    SurfaceIntersection::Curves(vec![Curve::Line(Line3d {
        origin,
        direction: cross / cross_len,
    })])
}

// ─── Plane–Cylinder ──────────────────────────────────────────────────────────

/// Intersect an infinite plane with an infinite cylinder.
///
/// - plane perpendicular to the axis -> circle
/// - plane parallel to the axis -> `None`, one tangent line, or two lines
/// - otherwise -> ellipse with minor radius R and major radius R / |n . axis|
pub fn plane_cylinder(plane: &Plane, cyl: &Cylinder, tol: &Tolerance) -> SurfaceIntersection {
    let axis = cyl.axis();
    let cos_theta = plane.normal.dot(&axis).abs();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    if sin_theta < tol.angular {
        let center = plane.project_point(&cyl.frame.origin);
        return match Frame::new(center, axis, cyl.frame.x).and_then(|f| Circle3d::with_frame(f, cyl.radius)) {
            Ok(circle) => SurfaceIntersection::Curves(vec![Curve::Circle(circle)]),
            Err(_) => SurfaceIntersection::None,
        };
    }

    if cos_theta < tol.angular {
        let dist = plane.distance_to_point(&cyl.frame.origin).abs();
        if dist > cyl.radius + tol.coincidence {
            return SurfaceIntersection::None;
        }
        let foot = plane.project_point(&cyl.frame.origin);
        if (dist - cyl.radius).abs() < tol.coincidence {
            return SurfaceIntersection::Curves(vec![Curve::Line(Line3d {
                origin: foot,
                direction: axis,
            })]);
        }
        let half_chord = (cyl.radius * cyl.radius - dist * dist).max(0.0).sqrt();
        let lateral = axis.cross(&plane.normal).normalize_or(plane.u_axis);
        return SurfaceIntersection::Curves(vec![
            Curve::Line(Line3d {
                origin: foot + lateral * half_chord,
                direction: axis,
            }),
            Curve::Line(Line3d {
                origin: foot - lateral * half_chord,
                direction: axis,
            }),
        ]);
    }

    // The axis pierces the plane at the ellipse center.
    let t = (plane.origin - cyl.frame.origin).dot(&plane.normal) / plane.normal.dot(&axis);
    let center = cyl.frame.origin + axis * t;
    let major_axis = axis.reject_from(&plane.normal);
    let ellipse = Frame::new(center, plane.normal, major_axis)
        .and_then(|f| Ellipse3d::new(f, cyl.radius / cos_theta, cyl.radius));
    match ellipse {
        Ok(e) => SurfaceIntersection::Curves(vec![Curve::Ellipse(e)]),
        Err(_) => SurfaceIntersection::None,
    }
}

// ─── Plane–Sphere ────────────────────────────────────────────────────────────

/// Intersect an infinite plane with a sphere.
///
/// - Plane outside sphere -> `None`
/// - Plane tangent to sphere -> `Point`
/// - Plane cutting sphere -> circle
pub fn plane_sphere(plane: &Plane, sphere: &Sphere, tol: &Tolerance) -> SurfaceIntersection {
    let signed_dist = plane.distance_to_point(&sphere.center());
    let dist = signed_dist.abs();

    if dist > sphere.radius + tol.coincidence {
        return SurfaceIntersection::None;
    }
    let center = sphere.center() - plane.normal * signed_dist;
    if (dist - sphere.radius).abs() < tol.coincidence {
        return SurfaceIntersection::Point(center);
    }

    let circle_radius = (sphere.radius * sphere.radius - dist * dist).max(0.0).sqrt();
    match Circle3d::new(center, plane.normal, circle_radius) {
        Ok(c) => SurfaceIntersection::Curves(vec![Curve::Circle(c)]),
        Err(_) => SurfaceIntersection::Point(center),
    }
}

// ─── Plane–Cone ──────────────────────────────────────────────────────────────

/// Closed form only for planes normal to the cone axis (a parallel circle).
pub fn plane_cone(plane: &Plane, cone: &Cone, tol: &Tolerance) -> Option<SurfaceIntersection> {
    let axis = cone.frame.z;
    if plane.normal.cross(&axis).length() >= tol.angular {
        return None;
    }
    // Height of the plane along the axis gives the slant parameter.
    let height = (plane.origin - cone.frame.origin).dot(&axis);
    let v = height / cone.half_angle.cos();
    let radius = cone.ref_radius + v * cone.half_angle.sin();
    let center = cone.frame.origin + axis * height;
    if radius.abs() < tol.coincidence {
        return Some(SurfaceIntersection::Point(center));
    }
    let frame = Frame {
        origin: center,
        ..cone.frame
    };
    // Beyond the apex the parallel circle runs on the opposite side.
    let circle = Circle3d::with_frame(frame, radius.abs()).ok()?;
    Some(SurfaceIntersection::Curves(vec![Curve::Circle(circle)]))
}

// ─── Sphere–Sphere ───────────────────────────────────────────────────────────

pub fn sphere_sphere(s1: &Sphere, s2: &Sphere, tol: &Tolerance) -> SurfaceIntersection {
    let axis = s2.center() - s1.center();
    let d = axis.length();
    let (r1, r2) = (s1.radius, s2.radius);
    if d < tol.coincidence {
        return if (r1 - r2).abs() < tol.coincidence {
            SurfaceIntersection::Coincident
        } else {
            SurfaceIntersection::None
        };
    }
    if d > r1 + r2 + tol.coincidence || d < (r1 - r2).abs() - tol.coincidence {
        return SurfaceIntersection::None;
    }
    let n = axis / d;
    let a = (d * d + r1 * r1 - r2 * r2) / (2.0 * d);
    let center = s1.center() + n * a;
    let h2 = r1 * r1 - a * a;
    if h2 <= tol.coincidence * tol.coincidence {
        return SurfaceIntersection::Point(center);
    }
    match Circle3d::new(center, n, h2.sqrt()) {
        Ok(c) => SurfaceIntersection::Curves(vec![Curve::Circle(c)]),
        Err(_) => SurfaceIntersection::Point(center),
    }
}

// ─── Cylinder–Cylinder (parallel axes) ───────────────────────────────────────

/// Parallel-axis cylinders: coincident, disjoint, or meeting along lines.
pub fn cylinder_cylinder(c1: &Cylinder, c2: &Cylinder, tol: &Tolerance) -> Option<SurfaceIntersection> {
    let axis = c1.axis();
    if axis.cross(&c2.axis()).length() >= tol.angular {
        return None;
    }
    let offset = (c2.frame.origin - c1.frame.origin).reject_from(&axis);
    let d = offset.length();
    let (r1, r2) = (c1.radius, c2.radius);
    if d < tol.coincidence {
        return Some(if (r1 - r2).abs() < tol.coincidence {
            SurfaceIntersection::Coincident
        } else {
            SurfaceIntersection::None
        });
    }
    if d > r1 + r2 + tol.coincidence || d < (r1 - r2).abs() - tol.coincidence {
        return Some(SurfaceIntersection::None);
    }
    // Two circles in the cross-section plane.
    let n = offset / d;
    let lateral = axis.cross(&n);
    let a = (d * d + r1 * r1 - r2 * r2) / (2.0 * d);
    let h = (r1 * r1 - a * a).max(0.0).sqrt();
    let base = c1.frame.origin + n * a;
    let line = |p: Point3d| Curve::Line(Line3d { origin: p, direction: axis });
    if h < tol.coincidence {
        return Some(SurfaceIntersection::Curves(vec![line(base)]));
    }
    Some(SurfaceIntersection::Curves(vec![
        line(base + lateral * h),
        line(base - lateral * h),
    ]))
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::vector::Vec3;
    use std::f64::consts::{FRAC_PI_4, PI};

    fn default_tol() -> Tolerance {
        Tolerance::default()
    }

    fn assert_on(surface: &Surface, p: &Point3d, tol: f64) {
        let (q, _, _) = surface.project(p).unwrap();
        let d = q.distance_to(p);
        assert!(
            d < tol,
            "Point {:?} not on {} (distance = {:.2e})",
            p,
            surface.surface_type_name(),
            d
        );
    }

    fn sample_curve(curve: &Curve, num: usize) -> Vec<Point3d> {
        let (t0, t1) = match curve {
            Curve::Circle(_) | Curve::Ellipse(_) => (0.0, 2.0 * PI),
            _ => (-10.0, 10.0),
        };
        (0..num)
            .map(|i| curve.point(t0 + (t1 - t0) * (i as f64 / (num - 1) as f64)))
            .collect()
    }

    fn curves_of(result: SurfaceIntersection) -> Vec<Curve> {
        match result {
            SurfaceIntersection::Curves(c) => c,
            other => panic!("Expected curves, got {:?}", other),
        }
    }

    fn check_all_on(s1: &Surface, s2: &Surface, curves: &[Curve]) {
        for c in curves {
            for p in sample_curve(c, 40) {
                assert_on(s1, &p, 1e-7);
                assert_on(s2, &p, 1e-7);
            }
        }
    }

    #[test]
    fn plane_plane_transverse() {
        let p1 = Plane::xy();
        let p2 = Plane::new(Point3d::ORIGIN, Vec3::new(0.0, -FRAC_PI_4.sin(), FRAC_PI_4.cos())).unwrap();
        let curves = curves_of(plane_plane(&p1, &p2, &default_tol()));
        assert_eq!(curves.len(), 1);
        check_all_on(&Surface::Plane(p1), &Surface::Plane(p2), &curves);
    }

    #[test]
    fn plane_plane_parallel_and_coincident() {
        let tol = default_tol();
        let p1 = Plane::new(Point3d::ORIGIN, Vec3::Z).unwrap();
        let p2 = Plane::new(Point3d::new(0.0, 0.0, 5.0), Vec3::Z).unwrap();
        assert!(matches!(plane_plane(&p1, &p2, &tol), SurfaceIntersection::None));
        let p3 = Plane::new(Point3d::new(1.0, 2.0, 0.0), -Vec3::Z).unwrap();
        assert!(matches!(plane_plane(&p1, &p3, &tol), SurfaceIntersection::Coincident));
    }

    #[test]
    fn plane_cylinder_cases() {
        let tol = default_tol();
        let cyl = Cylinder::new(Frame::world(), 3.0).unwrap();
        let cs = Surface::Cylinder(cyl);

        let perpendicular = Plane::new(Point3d::new(0.0, 0.0, 5.0), Vec3::Z).unwrap();
        let curves = curves_of(plane_cylinder(&perpendicular, &cyl, &tol));
        assert_eq!(curves[0].curve_type_name(), "Circle");
        check_all_on(&Surface::Plane(perpendicular), &cs, &curves);

        let parallel = Plane::new(Point3d::new(1.0, 0.0, 0.0), Vec3::X).unwrap();
        let curves = curves_of(plane_cylinder(&parallel, &cyl, &tol));
        assert_eq!(curves.len(), 2);
        check_all_on(&Surface::Plane(parallel), &cs, &curves);

        let oblique = Plane::new(Point3d::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 1.0)).unwrap();
        let curves = curves_of(plane_cylinder(&oblique, &cyl, &tol));
        assert_eq!(curves[0].curve_type_name(), "Ellipse");
        check_all_on(&Surface::Plane(oblique), &cs, &curves);

        let outside = Plane::new(Point3d::new(4.0, 0.0, 0.0), Vec3::X).unwrap();
        assert!(matches!(plane_cylinder(&outside, &cyl, &tol), SurfaceIntersection::None));
    }

    #[test]
    fn plane_sphere_cases() {
        let tol = default_tol();
        let sphere = Sphere::new(Point3d::ORIGIN, 2.0).unwrap();
        let cut = Plane::new(Point3d::new(0.0, 0.0, 1.0), Vec3::Z).unwrap();
        let curves = curves_of(plane_sphere(&cut, &sphere, &tol));
        check_all_on(&Surface::Plane(cut), &Surface::Sphere(sphere), &curves);

        let tangent = Plane::new(Point3d::new(0.0, 0.0, 2.0), Vec3::Z).unwrap();
        assert!(matches!(plane_sphere(&tangent, &sphere, &tol), SurfaceIntersection::Point(_)));
    }

    #[test]
    fn plane_cone_axis_normal_only() {
        let tol = default_tol();
        let cone = Cone::new(Frame::world(), 1.0, 0.3).unwrap();
        let plane = Plane::new(Point3d::new(0.0, 0.0, 2.0), Vec3::Z).unwrap();
        let curves = curves_of(plane_cone(&plane, &cone, &tol).unwrap());
        check_all_on(&Surface::Plane(plane), &Surface::Cone(cone), &curves);

        let tilted = Plane::new(Point3d::ORIGIN, Vec3::new(1.0, 0.0, 1.0)).unwrap();
        assert!(plane_cone(&tilted, &cone, &tol).is_none());
    }

    #[test]
    fn sphere_sphere_circle() {
        let tol = default_tol();
        let a = Sphere::new(Point3d::ORIGIN, 2.0).unwrap();
        let b = Sphere::new(Point3d::new(3.0, 0.0, 0.0), 2.0).unwrap();
        let curves = curves_of(sphere_sphere(&a, &b, &tol));
        check_all_on(&Surface::Sphere(a), &Surface::Sphere(b), &curves);
        assert!(matches!(sphere_sphere(&a, &a, &tol), SurfaceIntersection::Coincident));
    }

    #[test]
    fn parallel_cylinders() {
        let tol = default_tol();
        let a = Cylinder::new(Frame::world(), 1.0).unwrap();
        let frame = Frame {
            origin: Point3d::new(1.5, 0.0, 0.0),
            ..Frame::world()
        };
        let b = Cylinder::new(frame, 1.0).unwrap();
        let curves = curves_of(cylinder_cylinder(&a, &b, &tol).unwrap());
        assert_eq!(curves.len(), 2);
        check_all_on(&Surface::Cylinder(a), &Surface::Cylinder(b), &curves);
        assert!(matches!(cylinder_cylinder(&a, &a, &tol), Some(SurfaceIntersection::Coincident)));
    }

    #[test]
    fn dispatcher_is_symmetric() {
        let tol = default_tol();
        let p = Surface::Plane(Plane::xy());
        let s = Surface::Sphere(Sphere::new(Point3d::new(0.0, 0.0, 0.5), 1.0).unwrap());
        assert!(matches!(analytic_intersection(&p, &s, &tol), Some(SurfaceIntersection::Curves(_))));
        assert!(matches!(analytic_intersection(&s, &p, &tol), Some(SurfaceIntersection::Curves(_))));
        let t = Surface::Torus(super::super::surfaces::Torus::new(Frame::world(), 3.0, 1.0).unwrap());
        assert!(analytic_intersection(&p, &t, &tol).is_none());
    }
}
