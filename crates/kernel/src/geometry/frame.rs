use serde::{Deserialize, Serialize};

use super::point::Point3d;
use super::transform::Transform;
use super::vector::Vec3;
use crate::error::GeometryError;

/// An orthonormal axis system positioning analytic curves and surfaces.
///
/// `z` is the main axis (circle normal, cylinder axis). Mirrored frames are
/// left-handed; parametrizations stay valid because every derived quantity
/// is computed from the axes, never from `x.cross(y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub origin: Point3d,
    pub x: Vec3,
    pub y: Vec3,
    pub z: Vec3,
}

impl Frame {
    pub fn world() -> Self {
        Self {
            origin: Point3d::ORIGIN,
            x: Vec3::X,
            y: Vec3::Y,
            z: Vec3::Z,
        }
    }

    /// Right-handed frame with main axis `z`; `x_hint` is orthogonalized
    /// against `z` and replaced by an arbitrary perpendicular when parallel.
    pub fn new(origin: Point3d, z: Vec3, x_hint: Vec3) -> Result<Self, GeometryError> {
        let z = z
            .normalized()
            .ok_or_else(|| GeometryError::DegenerateGeometry("zero-length frame axis".into()))?;
        let x = x_hint
            .reject_from(&z)
            .normalized()
            .unwrap_or_else(|| z.any_perpendicular());
        let y = z.cross(&x);
        Ok(Self { origin, x, y, z })
    }

    /// Right-handed frame with main axis `z` and an arbitrary `x`.
    pub fn from_axis(origin: Point3d, z: Vec3) -> Result<Self, GeometryError> {
        let z = z
            .normalized()
            .ok_or_else(|| GeometryError::DegenerateGeometry("zero-length frame axis".into()))?;
        Self::new(origin, z, z.any_perpendicular())
    }

    pub fn is_right_handed(&self) -> bool {
        self.x.cross(&self.y).dot(&self.z) > 0.0
    }

    /// Local coordinates of `p`.
    pub fn to_local(&self, p: &Point3d) -> Vec3 {
        let d = *p - self.origin;
        Vec3::new(d.dot(&self.x), d.dot(&self.y), d.dot(&self.z))
    }

    pub fn to_world(&self, x: f64, y: f64, z: f64) -> Point3d {
        self.origin + self.x * x + self.y * y + self.z * z
    }

    /// Radial unit direction at angle `angle` in the xy plane.
    pub fn radial(&self, angle: f64) -> Vec3 {
        self.x * angle.cos() + self.y * angle.sin()
    }

    /// Derivative of [`Frame::radial`] with respect to the angle.
    pub fn radial_tangent(&self, angle: f64) -> Vec3 {
        self.y * angle.cos() - self.x * angle.sin()
    }

    pub fn transformed(&self, t: &Transform) -> Self {
        Self {
            origin: t.transform_point(&self.origin),
            x: t.transform_direction(&self.x).normalize_or(self.x),
            y: t.transform_direction(&self.y).normalize_or(self.y),
            z: t.transform_direction(&self.z).normalize_or(self.z),
        }
    }

    /// Frame with the `y` axis negated, so angles run the other way.
    pub(crate) fn flipped_y(&self) -> Self {
        Self { y: -self.y, ..*self }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::world()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_orthonormalizes_hint() {
        let f = Frame::new(Point3d::ORIGIN, Vec3::new(0.0, 0.0, 2.0), Vec3::new(1.0, 0.0, 1.0)).unwrap();
        assert!((f.x.length() - 1.0).abs() < 1e-12);
        assert!(f.x.dot(&f.z).abs() < 1e-12);
        assert!(f.is_right_handed());
    }

    #[test]
    fn test_local_round_trip() {
        let f = Frame::from_axis(Point3d::new(1.0, 2.0, 3.0), Vec3::new(1.0, 1.0, 1.0)).unwrap();
        let p = Point3d::new(-2.0, 0.5, 4.0);
        let l = f.to_local(&p);
        assert!(f.to_world(l.x, l.y, l.z).distance_to(&p) < 1e-12);
    }

    #[test]
    fn test_zero_axis_is_degenerate() {
        assert!(matches!(
            Frame::from_axis(Point3d::ORIGIN, Vec3::ZERO),
            Err(GeometryError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_mirrored_frame_is_left_handed() {
        let t = Transform::mirror(Point3d::ORIGIN, Vec3::X).unwrap();
        let f = Frame::world().transformed(&t);
        assert!(!f.is_right_handed());
    }
}
