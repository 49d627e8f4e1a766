use serde::{Deserialize, Serialize};

use crate::TessellationError;

/// Deflection bounds and limits for [`tessellate`](crate::tessellate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshParameters {
    /// Maximum chord deviation along edges.
    pub deflection: f64,
    /// Maximum tangent turn between consecutive edge samples, radians.
    pub angle: f64,
    /// Maximum deviation inside faces; 0 means `deflection`.
    pub deflection_interior: f64,
    /// Maximum normal turn across a triangle; 0 means `angle`.
    pub angle_interior: f64,
    /// Segments shorter than this are never split.
    pub min_size: f64,
    /// Scale deflections by the size of each edge or face.
    pub relative: bool,
    /// Discretize edges and mesh faces on the rayon pool.
    pub parallel: bool,
    pub max_triangles: usize,
}

impl Default for MeshParameters {
    fn default() -> Self {
        Self {
            deflection: 0.1,
            angle: 0.5,
            deflection_interior: 0.0,
            angle_interior: 0.0,
            min_size: 0.0,
            relative: false,
            parallel: true,
            max_triangles: 4_000_000,
        }
    }
}

impl MeshParameters {
    /// Parameters with both deflections set to `deflection`.
    pub fn with_deflection(deflection: f64) -> Self {
        Self {
            deflection,
            ..Self::default()
        }
    }

    pub fn interior_deflection(&self) -> f64 {
        if self.deflection_interior > 0.0 {
            self.deflection_interior
        } else {
            self.deflection
        }
    }

    pub fn interior_angle(&self) -> f64 {
        if self.angle_interior > 0.0 {
            self.angle_interior
        } else {
            self.angle
        }
    }

    pub fn validate(&self) -> Result<(), TessellationError> {
        let positive = [("deflection", self.deflection), ("angle", self.angle)];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TessellationError::InvalidInput(format!("{name} must be positive, got {value}")));
            }
        }
        let optional = [
            ("deflection_interior", self.deflection_interior),
            ("angle_interior", self.angle_interior),
            ("min_size", self.min_size),
        ];
        for (name, value) in optional {
            if !(value.is_finite() && value >= 0.0) {
                return Err(TessellationError::InvalidInput(format!("{name} must be non-negative, got {value}")));
            }
        }
        if self.max_triangles == 0 {
            return Err(TessellationError::InvalidInput("max_triangles must be at least 1".into()));
        }
        Ok(())
    }
}
