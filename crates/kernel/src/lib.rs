pub mod error;
pub mod geometry;
pub mod topology;
pub mod boolean;
pub mod blend;
pub mod validation;

use serde::{Deserialize, Serialize};

pub use boolean::{BooleanEngine, BooleanError, BooleanOp, BooleanOptions, DefaultBooleanEngine};
pub use blend::{BlendEngine, BlendError, BlendParameters, BlendProfile, DefaultBlendEngine};
pub use error::{ErrorKind, GeometryError, KernelError, TopologyError};
pub use topology::shape::Shape;
pub use validation::{check_shape, ValidationConfig, ValidationReport};

/// Global tolerance configuration for geometric comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    /// Points closer than this are considered coincident (meters).
    pub coincidence: f64,
    /// Angles smaller than this (radians) are considered zero.
    pub angular: f64,
    /// Parameter-space tolerance for curve/surface evaluations.
    pub parametric: f64,
    /// Working tolerance of the boolean engine.
    pub boolean: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            coincidence: 1e-7,
            angular: 1e-10,
            parametric: 1e-9,
            boolean: 1e-6,
        }
    }
}

impl Tolerance {
    /// Same tolerance with every length threshold set to `distance`.
    pub fn with_coincidence(distance: f64) -> Self {
        Self {
            coincidence: distance,
            ..Self::default()
        }
    }
}
