use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

use super::vector::{Vec2, Vec3};
use crate::error::GeometryError;

/// A point in 3D Euclidean space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3d {
    pub const ORIGIN: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        self.distance_squared_to(other).sqrt()
    }

    pub fn distance_squared_to(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn midpoint(&self, other: &Self) -> Self {
        self.lerp(other, 0.5)
    }

    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            x: self.x + t * (other.x - self.x),
            y: self.y + t * (other.y - self.y),
            z: self.z + t * (other.z - self.z),
        }
    }

    /// Barycentric combination `a*wa + b*wb + c*wc` (weights expected to sum to one).
    pub fn barycentric(a: &Self, b: &Self, c: &Self, wa: f64, wb: f64, wc: f64) -> Self {
        Self {
            x: a.x * wa + b.x * wb + c.x * wc,
            y: a.y * wa + b.y * wb + c.y * wc,
            z: a.z * wa + b.z * wb + c.z * wc,
        }
    }

    pub fn to_vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Decode a flat coordinate buffer `[x0, y0, z0, x1, ...]`.
    pub fn from_flat(coords: &[f64]) -> Result<Vec<Self>, GeometryError> {
        if coords.len() % 3 != 0 {
            return Err(GeometryError::InvalidInput(format!(
                "coordinate buffer length {} is not a multiple of 3",
                coords.len()
            )));
        }
        Ok(coords
            .chunks_exact(3)
            .map(|c| Self::new(c[0], c[1], c[2]))
            .collect())
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add<Vec3> for Point3d {
    type Output = Point3d;
    fn add(self, rhs: Vec3) -> Self::Output {
        Point3d::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3d {
    type Output = Vec3;
    fn sub(self, rhs: Self) -> Self::Output {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Sub<Vec3> for Point3d {
    type Output = Point3d;
    fn sub(self, rhs: Vec3) -> Self::Output {
        Point3d::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// A point in a surface's (u, v) parameter plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2d {
    pub x: f64,
    pub y: f64,
}

impl Point2d {
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self::new(self.x + t * (other.x - self.x), self.y + t * (other.y - self.y))
    }

    pub fn midpoint(&self, other: &Self) -> Self {
        self.lerp(other, 0.5)
    }
}

impl Add<Vec2> for Point2d {
    type Output = Point2d;
    fn add(self, rhs: Vec2) -> Self::Output {
        Point2d::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point2d {
    type Output = Vec2;
    fn sub(self, rhs: Self) -> Self::Output {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let a = Point3d::new(1.0, 0.0, 0.0);
        let b = Point3d::new(4.0, 0.0, 0.0);
        assert!((a.distance_to(&b) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_point_sub_gives_vector() {
        let a = Point3d::new(3.0, 4.0, 5.0);
        let b = Point3d::new(1.0, 1.0, 1.0);
        let v = a - b;
        assert!((v.x - 2.0).abs() < 1e-12);
        assert!((v.y - 3.0).abs() < 1e-12);
        assert!((v.z - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_flat_rejects_ragged_buffer() {
        assert!(Point3d::from_flat(&[1.0, 2.0]).is_err());
        let pts = Point3d::from_flat(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[1], Point3d::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_barycentric_centroid() {
        let c = Point3d::barycentric(
            &Point3d::new(0.0, 0.0, 0.0),
            &Point3d::new(3.0, 0.0, 0.0),
            &Point3d::new(0.0, 3.0, 0.0),
            1.0 / 3.0,
            1.0 / 3.0,
            1.0 / 3.0,
        );
        assert!((c.x - 1.0).abs() < 1e-12 && (c.y - 1.0).abs() < 1e-12);
    }
}
