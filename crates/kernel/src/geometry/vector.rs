use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A vector in 3D Euclidean space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const X: Self = Self {
        x: 1.0,
        y: 0.0,
        z: 0.0,
    };
    pub const Y: Self = Self {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };
    pub const Z: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Self) -> Self {
        Self {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    pub fn length_squared(&self) -> f64 {
        self.dot(self)
    }

    pub fn normalized(&self) -> Option<Self> {
        let len = self.length();
        if len < 1e-15 || !len.is_finite() {
            None
        } else {
            Some(*self / len)
        }
    }

    /// Normalize, falling back to `fallback` for a near-zero vector.
    pub fn normalize_or(&self, fallback: Self) -> Self {
        self.normalized().unwrap_or(fallback)
    }

    /// Some unit vector perpendicular to `self`.
    pub fn any_perpendicular(&self) -> Self {
        let seed = if self.x.abs() < 0.9 * self.length() { Vec3::X } else { Vec3::Y };
        seed.cross(self).normalize_or(Vec3::Z)
    }

    pub fn angle_to(&self, other: &Self) -> f64 {
        let len_product = self.length() * other.length();
        if len_product < 1e-15 {
            return 0.0;
        }
        // atan2 keeps precision near 0 and pi where acos does not.
        self.cross(other).length().atan2(self.dot(other))
    }

    /// Signed angle from `self` to `other` measured around `axis`.
    pub fn signed_angle_to(&self, other: &Self, axis: &Self) -> f64 {
        let c = self.cross(other);
        let s = c.length().copysign(c.dot(axis));
        s.atan2(self.dot(other))
    }

    pub fn is_parallel_to(&self, other: &Self, angular_tol: f64) -> bool {
        let angle = self.angle_to(other);
        angle < angular_tol || (std::f64::consts::PI - angle) < angular_tol
    }

    /// Component of `self` orthogonal to the unit vector `axis`.
    pub fn reject_from(&self, axis: &Self) -> Self {
        *self - *axis * self.dot(axis)
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Triple scalar product: self . (b x c)
    pub fn triple(&self, b: &Self, c: &Self) -> f64 {
        self.dot(&b.cross(c))
    }

    pub(crate) fn to_na(self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.x, self.y, self.z)
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Mul<Vec3> for f64 {
    type Output = Vec3;
    fn mul(self, rhs: Vec3) -> Self::Output {
        rhs * self
    }
}

impl Div<f64> for Vec3 {
    type Output = Self;
    fn div(self, rhs: f64) -> Self::Output {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A direction in a parameter plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// z-component of the 3D cross product.
    pub fn cross(&self, other: &Self) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(&self) -> f64 {
        self.dot(self).sqrt()
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_product() {
        let c = Vec3::X.cross(&Vec3::Y);
        assert!((c.z - 1.0).abs() < 1e-12);
        assert!(c.x.abs() < 1e-12 && c.y.abs() < 1e-12);
    }

    #[test]
    fn test_normalized_zero_is_none() {
        assert!(Vec3::ZERO.normalized().is_none());
        let n = Vec3::new(3.0, 0.0, 4.0).normalized().unwrap();
        assert!((n.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_any_perpendicular() {
        for v in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(1.0, 2.0, -3.0)] {
            let p = v.any_perpendicular();
            assert!(p.dot(&v).abs() < 1e-12);
            assert!((p.length() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_signed_angle() {
        let a = Vec3::X.signed_angle_to(&Vec3::Y, &Vec3::Z);
        let b = Vec3::Y.signed_angle_to(&Vec3::X, &Vec3::Z);
        assert!((a - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((b + std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }
}
