//! Error types for every kernel layer.
//!
//! Each layer owns a `thiserror` enum; all of them fold into [`KernelError`]
//! and report a coarse [`ErrorKind`] so callers can decide whether a retry
//! with looser tolerance or pre-healed input makes sense.

use thiserror::Error;

/// Coarse failure category shared by all layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed parameters, rejected before any computation.
    InvalidInput,
    /// Inputs too close or too far apart to resolve at the working tolerance.
    ToleranceViolation,
    /// Non-manifold or open result where a closed one was required.
    TopologicalInconsistency,
    /// An iterative solver did not converge within its limits.
    NumericalNonConvergence,
    /// Well-formed inputs whose combination bounds no volume.
    EmptyResult,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    #[error("invalid knot vector: {0}")]
    InvalidKnotVector(String),

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("singular point at parameter {parameter:?}: {reason}")]
    SingularPoint { parameter: (f64, f64), reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{solver} did not converge after {iterations} iterations (residual {residual:e})")]
    NumericalNonConvergence {
        solver: &'static str,
        iterations: usize,
        residual: f64,
    },
}

impl GeometryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKnotVector(_) | Self::DegenerateGeometry(_) | Self::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            Self::SingularPoint { .. } => ErrorKind::ToleranceViolation,
            Self::NumericalNonConvergence { .. } => ErrorKind::NumericalNonConvergence,
        }
    }

    pub(crate) fn singular_curve(t: f64, reason: impl Into<String>) -> Self {
        Self::SingularPoint {
            parameter: (t, 0.0),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TopologyError {
    #[error("open wire: gap of {gap:e} after edge {index} exceeds tolerance {tolerance:e}")]
    OpenWire { index: usize, gap: f64, tolerance: f64 },

    #[error("shell is not a closed 2-manifold: {free_edges} free edges, {non_manifold_edges} non-manifold edges")]
    NonManifoldShell {
        free_edges: usize,
        non_manifold_edges: usize,
    },

    #[error("tolerance violation: {0}")]
    ToleranceViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inconsistent topology in {stage}: {detail}")]
    Inconsistent { stage: &'static str, detail: String },

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl TopologyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OpenWire { .. } | Self::NonManifoldShell { .. } | Self::Inconsistent { .. } => {
                ErrorKind::TopologicalInconsistency
            }
            Self::ToleranceViolation(_) => ErrorKind::ToleranceViolation,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Geometry(e) => e.kind(),
        }
    }
}

/// Crate-level error aggregating every layer.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Boolean(#[from] crate::boolean::BooleanError),

    #[error(transparent)]
    Blend(#[from] crate::blend::BlendError),
}

impl KernelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Geometry(e) => e.kind(),
            Self::Topology(e) => e.kind(),
            Self::Boolean(e) => e.kind(),
            Self::Blend(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_taxonomy() {
        let e = GeometryError::InvalidKnotVector("decreasing".into());
        assert_eq!(e.kind(), ErrorKind::InvalidInput);

        let e = TopologyError::OpenWire {
            index: 2,
            gap: 0.1,
            tolerance: 1e-7,
        };
        assert_eq!(e.kind(), ErrorKind::TopologicalInconsistency);

        let e: TopologyError = GeometryError::NumericalNonConvergence {
            solver: "projection",
            iterations: 50,
            residual: 1e-3,
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::NumericalNonConvergence);
    }

    #[test]
    fn test_messages_carry_context() {
        let e = TopologyError::NonManifoldShell {
            free_edges: 3,
            non_manifold_edges: 0,
        };
        assert!(e.to_string().contains("3 free edges"));
    }
}
