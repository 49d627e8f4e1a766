//! Rolling-ball geometry: fillet strips, end caps and corner patches.

use std::f64::consts::TAU;

use nalgebra::{Matrix3, Vector3};

use crate::geometry::curves::{Circle3d, Curve, Ellipse3d};
use crate::geometry::frame::Frame;
use crate::geometry::nurbs::BSplineSurface;
use crate::geometry::point::Point3d;
use crate::geometry::surfaces::{Cylinder, Sphere, Surface};
use crate::geometry::vector::Vec3;

use super::rebuild::{Blend, Piece};
use super::{BlendError, BlendParameters};

/// Surface of the fillet strip and whether its natural normal points into
/// the solid.
pub(crate) fn strip_surface(b: &Blend, params: &BlendParameters) -> Result<(Surface, bool), BlendError> {
    let m = b.bisector();
    if let Some(r) = b.constant_radius() {
        // Arc midpoint sits at u = pi.
        let toward_edge = if b.is_convex() { m } else { -m };
        let frame = Frame::new(b.center(0.0), b.dir, -toward_edge)?;
        let cylinder = Cylinder::new(frame, r)?;
        return Ok((Surface::Cylinder(cylinder), !b.is_convex()));
    }

    let sections = b.sections();
    if sections.len() - 1 > params.max_segments {
        return Err(BlendError::geometry(format!(
            "radius profile needs {} spans, more than the {} allowed",
            sections.len() - 1,
            params.max_segments
        )));
    }
    let w = (0.5 * b.phi).cos();
    let poles = vec![
        sections.iter().map(|&s| b.contact(0, s)).collect::<Vec<_>>(),
        sections.iter().map(|&s| b.at(s)).collect(),
        sections.iter().map(|&s| b.contact(1, s)).collect(),
    ];
    let weights = vec![vec![1.0; sections.len()], vec![w; sections.len()], vec![1.0; sections.len()]];
    let mut v_knots = Vec::with_capacity(sections.len() + 2);
    v_knots.push(sections[0]);
    v_knots.extend(sections.iter().copied());
    v_knots.push(sections[sections.len() - 1]);
    let surface = Surface::BSpline(BSplineSurface::new(
        2,
        1,
        poles,
        Some(weights),
        vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        v_knots,
    )?);
    let mid = 0.5 * (sections[0] + sections[sections.len() - 1]);
    let reversed = surface.normal_at(0.5, mid).dot(&m) < 0.0;
    Ok((surface, reversed))
}

/// Section of the strip by the plane through `point` with normal `normal`.
pub(crate) fn cap_curve(b: &Blend, s: f64, point: &Point3d, normal: &Vec3) -> Result<Curve, BlendError> {
    cylinder_section(&b.center(s), &b.dir, b.radius(s), point, normal)
}

/// Mitre between two equal-radius strips: the planar section through the
/// intersection of their axes, `p1` and `p2`.
pub(crate) fn mitre_curve(
    (b1, s1): (&Blend, f64),
    (b2, s2): (&Blend, f64),
    p1: &Point3d,
    p2: &Point3d,
    tolerance: f64,
) -> Result<Curve, BlendError> {
    let (a1, a2) = (b1.center(s1), b2.center(s2));
    let (c1, c2) = closest_on_lines(&a1, &b1.dir, &a2, &b2.dir)
        .ok_or_else(|| BlendError::geometry("mitred fillet axes are parallel"))?;
    if c1.distance_to(&c2) > tolerance {
        return Err(BlendError::geometry(format!(
            "mitred fillet axes miss each other by {:e}",
            c1.distance_to(&c2)
        )));
    }
    let c = c1.midpoint(&c2);
    let normal = (*p1 - c)
        .cross(&(*p2 - c))
        .normalized()
        .ok_or_else(|| BlendError::geometry("mitre plane is degenerate"))?;
    cylinder_section(&a1, &b1.dir, b1.radius(s1), &c, &normal)
}

/// Plane section of the cylinder of radius `r` around the line through
/// `axis_point` along `axis`.
fn cylinder_section(
    axis_point: &Point3d,
    axis: &Vec3,
    r: f64,
    plane_point: &Point3d,
    normal: &Vec3,
) -> Result<Curve, BlendError> {
    let cos = axis.dot(normal);
    if cos.abs() < 1e-9 {
        return Err(BlendError::geometry("end plane is parallel to the fillet axis"));
    }
    let center = *axis_point + *axis * ((*plane_point - *axis_point).dot(normal) / cos);
    match axis.cross(normal).normalized() {
        Some(minor) if 1.0 - cos.abs() > 1e-12 => {
            let major = normal.cross(&minor);
            let frame = Frame::new(center, *normal, major)?;
            Ok(Curve::Ellipse(Ellipse3d::new(frame, r / cos.abs(), r)?))
        }
        _ => Ok(Curve::Circle(Circle3d::with_frame(Frame::from_axis(center, *normal)?, r)?)),
    }
}

/// Sphere centre of a corner where three convex fillets of radius `r`
/// meet at `vertex`, given the outward normals of the three faces.
pub(crate) fn corner_center(normals: [Vec3; 3], vertex: &Point3d, r: f64) -> Result<Point3d, BlendError> {
    let [a, b, c] = normals;
    let m = Matrix3::new(a.x, a.y, a.z, b.x, b.y, b.z, c.x, c.y, c.z);
    let v = vertex.to_vec3();
    let rhs = Vector3::new(a.dot(&v) - r, b.dot(&v) - r, c.dot(&v) - r);
    let x = m
        .lu()
        .solve(&rhs)
        .ok_or_else(|| BlendError::geometry("corner faces do not meet in a point"))?;
    Ok(Point3d::new(x[0], x[1], x[2]))
}

/// Corner sphere, seamed away from the patch around the mean normal.
pub(crate) fn corner_sphere(center: Point3d, normals: [Vec3; 3], r: f64) -> Result<Surface, BlendError> {
    let m = (normals[0] + normals[1] + normals[2])
        .normalized()
        .ok_or_else(|| BlendError::geometry("corner normals cancel"))?;
    let frame = Frame::new(center, m.any_perpendicular(), -m)?;
    Ok(Surface::Sphere(Sphere::with_frame(frame, r)?))
}

/// Great circle of the sphere at `center` through `a` and `b`.
pub(crate) fn great_arc(center: &Point3d, r: f64, a: &Point3d, b: &Point3d) -> Result<Curve, BlendError> {
    let normal = (*a - *center).cross(&(*b - *center));
    let frame = Frame::new(*center, normal, *a - *center)
        .map_err(|_| BlendError::geometry("corner arc end points are antipodal or coincident"))?;
    Ok(Curve::Circle(Circle3d::with_frame(frame, r)?))
}

/// The arc of a closed `curve` from `from` to `to` whose midpoint lies
/// nearer to `near`.
pub(crate) fn arc_piece(curve: Curve, from: &Point3d, to: &Point3d, near: &Point3d) -> Result<Piece, BlendError> {
    let ta = curve.parameter_of(from)?;
    let tb = curve.parameter_of(to)?;
    let span = (tb - ta).rem_euclid(TAU);
    if span < 1e-12 || TAU - span < 1e-12 {
        return Err(BlendError::geometry("blend end cap degenerates to a point"));
    }
    let forward_mid = curve.point(ta + 0.5 * span);
    let backward_mid = curve.point(tb + 0.5 * (TAU - span));
    let piece = if forward_mid.distance_squared_to(near) <= backward_mid.distance_squared_to(near) {
        Piece::new(curve, ta, ta + span, true)
    } else {
        Piece::new(curve, tb, tb + (TAU - span), false)
    };
    Ok(piece)
}

fn closest_on_lines(p1: &Point3d, d1: &Vec3, p2: &Point3d, d2: &Vec3) -> Option<(Point3d, Point3d)> {
    let w = *p1 - *p2;
    let (a, b, c) = (d1.dot(d1), d1.dot(d2), d2.dot(d2));
    let (d, e) = (d1.dot(&w), d2.dot(&w));
    let den = a * c - b * b;
    if den.abs() < 1e-14 * a * c {
        return None;
    }
    let s = (b * e - c * d) / den;
    let t = (a * e - b * d) / den;
    Some((*p1 + *d1 * s, *p2 + *d2 * t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_oblique_section_is_ellipse_on_cylinder() {
        let n = Vec3::new(1.0, 0.0, 1.0).normalized().unwrap();
        let c = cylinder_section(&Point3d::ORIGIN, &Vec3::Z, 2.0, &Point3d::new(0.0, 0.0, 1.0), &n).unwrap();
        let Curve::Ellipse(e) = &c else {
            panic!("expected an ellipse, got {c:?}");
        };
        assert!((e.major_radius - 2.0 * 2f64.sqrt()).abs() < 1e-12);
        for i in 0..8 {
            let p = c.point(i as f64 * 0.7);
            assert!(((p.x * p.x + p.y * p.y).sqrt() - 2.0).abs() < 1e-12);
            assert!((p - Point3d::new(0.0, 0.0, 1.0)).dot(&n).abs() < 1e-12);
        }
    }

    #[test]
    fn test_square_section_is_circle() {
        let c = cylinder_section(&Point3d::ORIGIN, &Vec3::X, 0.5, &Point3d::new(3.0, 1.0, 1.0), &Vec3::X).unwrap();
        let Curve::Circle(circle) = &c else {
            panic!("expected a circle, got {c:?}");
        };
        assert!(circle.center().distance_to(&Point3d::new(3.0, 0.0, 0.0)) < 1e-12);
        assert_eq!(circle.radius, 0.5);
    }

    #[test]
    fn test_arc_piece_takes_short_side_toward_reference() {
        let circle = Curve::Circle(Circle3d::new(Point3d::ORIGIN, Vec3::Z, 1.0).unwrap());
        let a = Point3d::new(1.0, 0.0, 0.0);
        let b = Point3d::new(0.0, 1.0, 0.0);
        let piece = arc_piece(circle.clone(), &a, &b, &Point3d::new(1.0, 1.0, 0.0)).unwrap();
        assert!((piece.last - piece.first - PI / 2.0).abs() < 1e-12);
        assert!(piece.start().distance_to(&a) < 1e-12);
        assert!(piece.end().distance_to(&b) < 1e-12);

        let long = arc_piece(circle, &a, &b, &Point3d::new(-1.0, -1.0, 0.0)).unwrap();
        assert!((long.last - long.first - 1.5 * PI).abs() < 1e-12);
        assert!(long.start().distance_to(&a) < 1e-12);
        assert!(long.end().distance_to(&b) < 1e-12);
    }

    #[test]
    fn test_corner_center_of_unit_cube_corner() {
        let normals = [Vec3::X, Vec3::Y, Vec3::Z];
        let c = corner_center(normals, &Point3d::new(1.0, 1.0, 1.0), 0.25).unwrap();
        assert!(c.distance_to(&Point3d::new(0.75, 0.75, 0.75)) < 1e-12);
        let sphere = corner_sphere(c, normals, 0.25).unwrap();
        // The patch around the corner direction stays clear of the poles.
        let (_, v) = sphere.parameters_of(&Point3d::new(1.0, 0.75, 0.75)).unwrap();
        assert!(v.abs() < PI / 2.0 - 0.1);
    }

    #[test]
    fn test_great_arc_passes_through_both_points() {
        let center = Point3d::new(1.0, 2.0, 3.0);
        let a = center + Vec3::X * 2.0;
        let b = center + Vec3::Z * 2.0;
        let arc = great_arc(&center, 2.0, &a, &b).unwrap();
        let piece = arc_piece(arc, &a, &b, &(center + Vec3::new(1.0, 0.0, 1.0))).unwrap();
        assert!(piece.end().distance_to(&b) < 1e-12);
        assert!((piece.last - piece.first - PI / 2.0).abs() < 1e-12);
    }
}
