//! Chamfer planes.

use crate::geometry::point::Point3d;
use crate::geometry::surfaces::{Plane, Surface};
use crate::geometry::vector::Vec3;

use super::rebuild::Blend;
use super::BlendError;

/// Plane through both contact lines, facing out of the solid.
pub(crate) fn strip_plane(b: &Blend) -> Result<Surface, BlendError> {
    let (p0, p1) = (b.contact(0, 0.0), b.contact(1, 0.0));
    corner_plane([p0, p1, p0 + b.dir], &b.bisector())
}

/// Plane through three points with its normal on the side of `outward`.
pub(crate) fn corner_plane(points: [Point3d; 3], outward: &Vec3) -> Result<Surface, BlendError> {
    let [a, b, c] = points;
    let normal = (b - a)
        .cross(&(c - a))
        .normalized()
        .ok_or_else(|| BlendError::geometry("chamfer plane points are collinear"))?;
    let normal = if normal.dot(outward) < 0.0 { -normal } else { normal };
    Ok(Surface::Plane(Plane::with_x(a, normal, b - a)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corner_plane_faces_outward() {
        let pts = [
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ];
        let s = corner_plane(pts, &Vec3::new(1.0, 1.0, 1.0)).unwrap();
        let Surface::Plane(p) = s else { unreachable!() };
        assert!(p.normal.dot(&Vec3::new(1.0, 1.0, 1.0)) > 0.0);
        let flipped = corner_plane(pts, &Vec3::new(-1.0, 0.0, 0.0)).unwrap();
        let Surface::Plane(q) = flipped else { unreachable!() };
        assert!((q.normal + p.normal).length() < 1e-12);
        for pt in pts {
            assert!(q.distance_to_point(&pt).abs() < 1e-12);
        }
    }

    #[test]
    fn test_collinear_points_fail() {
        let pts = [Point3d::ORIGIN, Point3d::new(1.0, 0.0, 0.0), Point3d::new(2.0, 0.0, 0.0)];
        assert!(matches!(corner_plane(pts, &Vec3::Z), Err(BlendError::BlendGeometryFailure(_))));
    }
}
