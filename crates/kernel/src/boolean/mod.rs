pub mod classify;
pub mod engine;
pub mod operand;
pub mod section;
pub mod split;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorKind, GeometryError, TopologyError};
use crate::topology::shape::Shape;

/// Boolean operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BooleanOp {
    Union,
    Subtract,
    Intersect,
}

/// Numeric settings of the boolean engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BooleanOptions {
    /// Working tolerance for every coincidence test, model units.
    pub tolerance: f64,
    /// Chordal deviation of sampled section curves and face boundaries.
    pub section_deflection: f64,
    /// Iteration bound of marching and projection refinement.
    pub max_iterations: usize,
    /// Process face pairs and sub-faces on the rayon pool.
    pub parallel: bool,
}

impl Default for BooleanOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            section_deflection: 1e-4,
            max_iterations: 50,
            parallel: true,
        }
    }
}

impl BooleanOptions {
    pub(crate) fn validate(&self) -> Result<(), BooleanError> {
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(BooleanError::InvalidInput(format!("tolerance {} must be positive", self.tolerance)));
        }
        if !(self.section_deflection > 0.0 && self.section_deflection.is_finite()) {
            return Err(BooleanError::InvalidInput(format!(
                "section deflection {} must be positive",
                self.section_deflection
            )));
        }
        if self.max_iterations == 0 {
            return Err(BooleanError::InvalidInput("max_iterations must be at least 1".into()));
        }
        Ok(())
    }
}

/// Structured failure information for boolean operations.
#[derive(Debug, Error)]
pub enum BooleanError {
    /// Recoverable: retry with a coarser tolerance or healed operands.
    #[error("boolean failed during {stage}: {reason}")]
    BooleanFailure { stage: &'static str, reason: String },

    #[error("degenerate operand: {0}")]
    DegenerateInput(String),

    #[error("boolean result is empty")]
    EmptyResult,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl BooleanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BooleanFailure { .. } => ErrorKind::TopologicalInconsistency,
            Self::DegenerateInput(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::EmptyResult => ErrorKind::EmptyResult,
            Self::Geometry(e) => e.kind(),
            Self::Topology(e) => e.kind(),
        }
    }

    pub(crate) fn failure(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::BooleanFailure {
            stage,
            reason: reason.into(),
        }
    }
}

/// Boolean operations on solids.
///
/// Implement this trait to provide alternative boolean backends or mock
/// implementations.
pub trait BooleanEngine {
    fn union(&self, a: &Shape, b: &Shape) -> Result<Shape, BooleanError>;

    /// Subtract `b` from `a`.
    fn subtract(&self, a: &Shape, b: &Shape) -> Result<Shape, BooleanError>;

    fn intersect(&self, a: &Shape, b: &Shape) -> Result<Shape, BooleanError>;
}

/// Section/split/classify/stitch engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBooleanEngine {
    pub options: BooleanOptions,
}

impl DefaultBooleanEngine {
    pub fn new(options: BooleanOptions) -> Self {
        Self { options }
    }
}

impl BooleanEngine for DefaultBooleanEngine {
    fn union(&self, a: &Shape, b: &Shape) -> Result<Shape, BooleanError> {
        engine::boolean_op(a, b, BooleanOp::Union, &self.options)
    }

    fn subtract(&self, a: &Shape, b: &Shape) -> Result<Shape, BooleanError> {
        engine::boolean_op(a, b, BooleanOp::Subtract, &self.options)
    }

    fn intersect(&self, a: &Shape, b: &Shape) -> Result<Shape, BooleanError> {
        engine::boolean_op(a, b, BooleanOp::Intersect, &self.options)
    }
}

/// `a ∪ b` with default options.
pub fn union(a: &Shape, b: &Shape) -> Result<Shape, BooleanError> {
    engine::boolean_op(a, b, BooleanOp::Union, &BooleanOptions::default())
}

/// `a − b` with default options.
pub fn subtract(a: &Shape, b: &Shape) -> Result<Shape, BooleanError> {
    engine::boolean_op(a, b, BooleanOp::Subtract, &BooleanOptions::default())
}

/// `a ∩ b` with default options.
pub fn intersect(a: &Shape, b: &Shape) -> Result<Shape, BooleanError> {
    engine::boolean_op(a, b, BooleanOp::Intersect, &BooleanOptions::default())
}
