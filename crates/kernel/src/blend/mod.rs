//! Fillets and chamfers on straight edges between planar faces, and on
//! circular rims where a plane meets a coaxial cylinder.
//!
//! A blend replaces the dihedral neighbourhood of each selected edge with
//! a rolling-ball surface (fillet) or a ruled surface (chamfer). Adjacent
//! faces are re-trimmed in place and the result is sewn back into a solid
//! with the shared sewing core.

pub mod chamfer;
pub mod circular;
pub mod convexity;
pub mod fillet;
pub mod rebuild;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::boolean::BooleanError;
use crate::error::{ErrorKind, GeometryError, TopologyError};
use crate::topology::brep::EdgeId;
use crate::topology::shape::Shape;

pub use convexity::{edge_convexity, Convexity};

/// Fillet radius along the normalized edge parameter `s` in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlendProfile {
    Constant(f64),
    /// Radius varying linearly from the edge start to its end.
    Linear(f64, f64),
    /// `(s, r)` samples with strictly increasing `s` from 0 to 1,
    /// interpolated linearly.
    Piecewise(Vec<(f64, f64)>),
}

impl BlendProfile {
    /// Radius at normalized parameter `s`, clamped to the edge.
    pub fn radius_at(&self, s: f64) -> f64 {
        let s = s.clamp(0.0, 1.0);
        match self {
            Self::Constant(r) => *r,
            Self::Linear(r0, r1) => r0 + (r1 - r0) * s,
            Self::Piecewise(samples) => {
                let Some(i) = samples.iter().position(|&(si, _)| si >= s) else {
                    return samples.last().map_or(0.0, |&(_, r)| r);
                };
                if i == 0 {
                    return samples[0].1;
                }
                let ((s0, r0), (s1, r1)) = (samples[i - 1], samples[i]);
                r0 + (r1 - r0) * (s - s0) / (s1 - s0)
            }
        }
    }

    /// Constant radius, or `None` for variable profiles.
    pub fn constant_radius(&self) -> Option<f64> {
        match self {
            Self::Constant(r) => Some(*r),
            Self::Linear(r0, r1) if r0 == r1 => Some(*r0),
            _ => None,
        }
    }

    /// Parameters where the profile changes slope, ends included.
    pub(crate) fn breakpoints(&self) -> Vec<f64> {
        match self {
            Self::Piecewise(samples) => samples.iter().map(|&(s, _)| s).collect(),
            _ => vec![0.0, 1.0],
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BlendError> {
        let positive = |r: f64| r > 0.0 && r.is_finite();
        match self {
            Self::Constant(r) if !positive(*r) => Err(BlendError::InvalidInput(format!("radius {r} must be positive"))),
            Self::Linear(r0, r1) if !positive(*r0) || !positive(*r1) => Err(BlendError::InvalidInput(format!(
                "radii {r0}, {r1} must be positive"
            ))),
            Self::Piecewise(samples) => {
                if samples.len() < 2 {
                    return Err(BlendError::InvalidInput("piecewise profile needs two samples".into()));
                }
                let ends = (samples[0].0, samples[samples.len() - 1].0);
                if ends != (0.0, 1.0) {
                    return Err(BlendError::InvalidInput(format!(
                        "piecewise profile must span [0, 1], got [{}, {}]",
                        ends.0, ends.1
                    )));
                }
                if samples.windows(2).any(|w| !(w[1].0 > w[0].0)) {
                    return Err(BlendError::InvalidInput("piecewise parameters must increase".into()));
                }
                if let Some(&(s, r)) = samples.iter().find(|&&(_, r)| !positive(r)) {
                    return Err(BlendError::InvalidInput(format!("radius {r} at s = {s} must be positive")));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Geometric continuity across the blend boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Continuity {
    G0,
    #[default]
    G1,
    G2,
}

/// Filling and approximation settings of the blend engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendParameters {
    pub continuity: Continuity,
    /// Working tolerance, model units.
    pub tolerance: f64,
    /// Highest degree of generated freeform blend surfaces.
    pub max_degree: usize,
    /// Upper bound on spans of a generated blend surface.
    pub max_segments: usize,
}

impl Default for BlendParameters {
    fn default() -> Self {
        Self {
            continuity: Continuity::G1,
            tolerance: 1e-6,
            max_degree: 3,
            max_segments: 64,
        }
    }
}

impl BlendParameters {
    pub(crate) fn validate(&self) -> Result<(), BlendError> {
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(BlendError::InvalidInput(format!("tolerance {} must be positive", self.tolerance)));
        }
        if self.continuity == Continuity::G2 {
            return Err(BlendError::BlendGeometryFailure(
                "circular blends are tangent continuous only; G2 is not available".into(),
            ));
        }
        if self.max_degree < 2 {
            return Err(BlendError::InvalidInput(format!(
                "max_degree {} cannot represent circular sections",
                self.max_degree
            )));
        }
        if self.max_segments == 0 {
            return Err(BlendError::InvalidInput("max_segments must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum BlendError {
    /// The blend does not fit: a contact line leaves its face, an end cap
    /// degenerates, or the configuration is not supported.
    #[error("blend geometry failure: {0}")]
    BlendGeometryFailure(String),

    /// Influence regions of different blends overlap.
    #[error("blend collision: {0}")]
    BlendCollision(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Face splitting or stitching around a circular edge failed.
    #[error(transparent)]
    Boolean(#[from] BooleanError),
}

impl BlendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BlendGeometryFailure(_) => ErrorKind::ToleranceViolation,
            Self::BlendCollision(_) => ErrorKind::TopologicalInconsistency,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Geometry(e) => e.kind(),
            Self::Topology(e) => e.kind(),
            Self::Boolean(e) => e.kind(),
        }
    }

    pub(crate) fn geometry(reason: impl Into<String>) -> Self {
        Self::BlendGeometryFailure(reason.into())
    }

    pub(crate) fn collision(reason: impl Into<String>) -> Self {
        Self::BlendCollision(reason.into())
    }
}

/// Edge blending on solids.
pub trait BlendEngine {
    /// Round `edges` with the rolling-ball `profile`.
    fn fillet(&self, shape: &Shape, edges: &[EdgeId], profile: &BlendProfile) -> Result<Shape, BlendError>;

    /// Bevel `edges`, setting back `d1` in the face that uses each edge
    /// forward and `d2` in the other.
    fn chamfer(&self, shape: &Shape, edges: &[EdgeId], d1: f64, d2: f64) -> Result<Shape, BlendError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBlendEngine {
    pub params: BlendParameters,
}

impl DefaultBlendEngine {
    pub fn new(params: BlendParameters) -> Self {
        Self { params }
    }
}

impl BlendEngine for DefaultBlendEngine {
    fn fillet(&self, shape: &Shape, edges: &[EdgeId], profile: &BlendProfile) -> Result<Shape, BlendError> {
        self.params.validate()?;
        profile.validate()?;
        let kind = rebuild::EdgeKind::Fillet(profile.clone());
        let requests: Vec<_> = edges.iter().map(|&e| (e, kind.clone())).collect();
        rebuild::blend_edges(shape, &requests, &self.params)
    }

    fn chamfer(&self, shape: &Shape, edges: &[EdgeId], d1: f64, d2: f64) -> Result<Shape, BlendError> {
        self.params.validate()?;
        for d in [d1, d2] {
            if !(d > 0.0 && d.is_finite()) {
                return Err(BlendError::InvalidInput(format!("chamfer distance {d} must be positive")));
            }
        }
        let kind = rebuild::EdgeKind::Chamfer { forward: d1, reverse: d2 };
        let requests: Vec<_> = edges.iter().map(|&e| (e, kind.clone())).collect();
        rebuild::blend_edges(shape, &requests, &self.params)
    }
}

/// Fillet with default parameters.
pub fn fillet(shape: &Shape, edges: &[EdgeId], profile: &BlendProfile) -> Result<Shape, BlendError> {
    DefaultBlendEngine::default().fillet(shape, edges, profile)
}

/// Symmetric chamfer with default parameters.
pub fn chamfer(shape: &Shape, edges: &[EdgeId], distance: f64) -> Result<Shape, BlendError> {
    DefaultBlendEngine::default().chamfer(shape, edges, distance, distance)
}
