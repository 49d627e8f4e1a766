use nalgebra::{Matrix3, Matrix4};
use serde::{Deserialize, Serialize};

use super::point::Point3d;
use super::vector::Vec3;
use crate::error::GeometryError;

/// A similarity transformation (rotation, uniform scale, optional mirror,
/// translation) stored as a column-major 4x4 matrix.
///
/// Only similarities are constructible so that circles stay circles and
/// analytic surfaces stay analytic after transformation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Column-major 4x4 matrix entries.
    pub m: [f64; 16],
}

impl Transform {
    pub fn identity() -> Self {
        Self::from_matrix(&Matrix4::identity())
    }

    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        Self::from_matrix(&Matrix4::new_translation(&nalgebra::Vector3::new(dx, dy, dz)))
    }

    pub fn from_translation_vec(v: Vec3) -> Self {
        Self::translation(v.x, v.y, v.z)
    }

    /// Uniform scaling by `factor` about `center`.
    pub fn scaling_about(center: Point3d, factor: f64) -> Result<Self, GeometryError> {
        if factor.abs() < 1e-12 || !factor.is_finite() {
            return Err(GeometryError::DegenerateGeometry(format!(
                "scale factor {factor} collapses geometry"
            )));
        }
        let c = center.to_vec3().to_na();
        let m = Matrix4::new_translation(&c)
            * Matrix4::new_scaling(factor)
            * Matrix4::new_translation(&(-c));
        Ok(Self::from_matrix(&m))
    }

    /// Rotation by `angle` radians about the axis through `origin` along `axis`
    /// (Rodrigues' formula).
    pub fn rotation(origin: Point3d, axis: Vec3, angle: f64) -> Result<Self, GeometryError> {
        let axis = axis
            .normalized()
            .ok_or_else(|| GeometryError::DegenerateGeometry("zero rotation axis".into()))?;
        let c = angle.cos();
        let s = angle.sin();
        let t = 1.0 - c;
        let (x, y, z) = (axis.x, axis.y, axis.z);

        #[rustfmt::skip]
        let r = Matrix3::new(
            t*x*x + c,   t*x*y - s*z, t*x*z + s*y,
            t*x*y + s*z, t*y*y + c,   t*y*z - s*x,
            t*x*z - s*y, t*y*z + s*x, t*z*z + c,
        );
        let o = origin.to_vec3().to_na();
        let m = Matrix4::new_translation(&o) * r.to_homogeneous() * Matrix4::new_translation(&(-o));
        Ok(Self::from_matrix(&m))
    }

    /// Reflection across the plane through `origin` with normal `normal`.
    pub fn mirror(origin: Point3d, normal: Vec3) -> Result<Self, GeometryError> {
        let n = normal
            .normalized()
            .ok_or_else(|| GeometryError::DegenerateGeometry("zero mirror normal".into()))?
            .to_na();
        let r = Matrix3::identity() - n * n.transpose() * 2.0;
        let o = origin.to_vec3().to_na();
        let m = Matrix4::new_translation(&o) * r.to_homogeneous() * Matrix4::new_translation(&(-o));
        Ok(Self::from_matrix(&m))
    }

    fn from_matrix(m: &Matrix4<f64>) -> Self {
        let mut out = [0.0; 16];
        out.copy_from_slice(m.as_slice());
        Self { m: out }
    }

    fn matrix(&self) -> Matrix4<f64> {
        Matrix4::from_column_slice(&self.m)
    }

    /// Matrix element access (row, col), 0-indexed.
    fn at(&self, row: usize, col: usize) -> f64 {
        self.m[col * 4 + row]
    }

    /// Transform a point (applies translation).
    pub fn transform_point(&self, p: &Point3d) -> Point3d {
        let x = self.at(0, 0) * p.x + self.at(0, 1) * p.y + self.at(0, 2) * p.z + self.at(0, 3);
        let y = self.at(1, 0) * p.x + self.at(1, 1) * p.y + self.at(1, 2) * p.z + self.at(1, 3);
        let z = self.at(2, 0) * p.x + self.at(2, 1) * p.y + self.at(2, 2) * p.z + self.at(2, 3);
        Point3d::new(x, y, z)
    }

    /// Transform a vector (no translation).
    pub fn transform_vector(&self, v: &Vec3) -> Vec3 {
        let x = self.at(0, 0) * v.x + self.at(0, 1) * v.y + self.at(0, 2) * v.z;
        let y = self.at(1, 0) * v.x + self.at(1, 1) * v.y + self.at(1, 2) * v.z;
        let z = self.at(2, 0) * v.x + self.at(2, 1) * v.y + self.at(2, 2) * v.z;
        Vec3::new(x, y, z)
    }

    /// Transform a unit direction, renormalizing away the scale factor.
    pub fn transform_direction(&self, v: &Vec3) -> Vec3 {
        self.transform_vector(v) / self.scale_factor()
    }

    fn linear_determinant(&self) -> f64 {
        self.matrix().fixed_view::<3, 3>(0, 0).determinant()
    }

    /// Absolute uniform scale factor.
    pub fn scale_factor(&self) -> f64 {
        self.linear_determinant().abs().cbrt()
    }

    /// True when the transform reverses orientation (odd number of mirrors).
    pub fn is_mirror(&self) -> bool {
        self.linear_determinant() < 0.0
    }

    /// Apply `self` first, then `next`.
    pub fn then(&self, next: &Transform) -> Transform {
        Self::from_matrix(&(next.matrix() * self.matrix()))
    }

    /// Inverse transform, or `None` if the matrix is singular.
    pub fn inverse(&self) -> Option<Self> {
        self.matrix().try_inverse().map(|m| Self::from_matrix(&m))
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3d,
    pub max: Point3d,
}

impl BoundingBox {
    pub fn new(min: Point3d, max: Point3d) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Point3d::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3d::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points(points: &[Point3d]) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.expand_to_include(p);
        }
        bb
    }

    pub fn expand_to_include(&mut self, p: &Point3d) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut bb = *self;
        if other.is_valid() {
            bb.expand_to_include(&other.min);
            bb.expand_to_include(&other.max);
        }
        bb
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, p: &Point3d) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn center(&self) -> Point3d {
        self.min.midpoint(&self.max)
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn diagonal(&self) -> f64 {
        if self.is_valid() { self.size().length() } else { 0.0 }
    }

    pub fn volume(&self) -> f64 {
        let s = self.size();
        s.x * s.y * s.z
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn expanded(&self, margin: f64) -> Self {
        let d = Vec3::new(margin, margin, margin);
        Self {
            min: self.min - d,
            max: self.max + d,
        }
    }

    /// Bounds of the transformed box corners.
    pub fn transformed(&self, t: &Transform) -> Self {
        let mut bb = Self::empty();
        for i in 0..8 {
            let p = Point3d::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            bb.expand_to_include(&t.transform_point(&p));
        }
        bb
    }
}
