//! Shared types for shape validation.
//!
//! Defines check codes, severity levels, findings, metrics, and the
//! unified `ValidationReport`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::topology::brep::ShapeRef;
use crate::topology::shape::TopologyCounts;

/// Which validation levels to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValidationLevel {
    /// Euler-Poincaré, manifold edges, wire closure, orientation.
    Topology,
    /// Adds vertex/edge placement on curves and surfaces and the tolerance
    /// hierarchy.
    Geometry,
    /// Adds enclosed volume checks.
    Full,
}

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Must be fixed for a valid solid.
    Error,
    /// Informational: the shape is usable but a recorded tolerance
    /// understates the real gap, or similar.
    Warning,
}

/// Enumeration of all validation check codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// V - E + F - R is odd or exceeds 2 for a closed shell.
    EulerPoincareViolation,
    /// Edge used by a single face of a closed shell.
    FreeEdge,
    /// Edge used by more than two faces.
    NonManifoldEdge,
    /// Consecutive edge uses of a wire do not share a vertex.
    WireNotClosed,
    /// Both uses of a manifold edge run in the same direction.
    BadOrientationOfFaces,
    /// Vertex does not lie on the end of its edge curve.
    InvalidPointOnCurve,
    /// Vertex does not lie on the surface of a face using it.
    InvalidPointOnSurface,
    /// Edge curve deviates from the surface of a face using it.
    SameParameterViolation,
    /// Non-degenerated edge of (near) zero length.
    ZeroLengthEdge,
    /// Vertex tolerance below edge tolerance, or edge below face.
    ToleranceHierarchyViolation,
    /// A recorded tolerance is smaller than the gap it should cover.
    InsufficientTolerance,
    /// A recorded tolerance exceeds the configured maximum.
    ExcessiveTolerance,
    /// Outer shell encloses negative volume, or a void encloses positive.
    NegativeVolume,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ErrorCode,
    pub severity: Severity,
    /// The offending entity.
    pub entity: ShapeRef,
    /// Owner of the entity for the failed relation (the face of a vertex on
    /// surface check, the shell of a free edge).
    pub parent: Option<ShapeRef>,
    pub message: String,
    /// Measured value, e.g. the gap distance.
    pub value: Option<f64>,
    /// Threshold the value was compared against.
    pub tolerance: Option<f64>,
}

impl ValidationIssue {
    pub(crate) fn error(code: ErrorCode, entity: ShapeRef, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            entity,
            parent: None,
            message: message.into(),
            value: None,
            tolerance: None,
        }
    }

    pub(crate) fn warning(code: ErrorCode, entity: ShapeRef, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, entity, message)
        }
    }

    pub(crate) fn in_parent(mut self, parent: ShapeRef) -> Self {
        self.parent = Some(parent);
        self
    }

    pub(crate) fn measured(mut self, value: f64, tolerance: f64) -> Self {
        self.value = Some(value);
        self.tolerance = Some(tolerance);
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        write!(f, "[{}] {:?}: {} (code: {})", sev, self.entity, self.message, self.code)?;
        if let Some(val) = self.value {
            write!(f, " value={val:.2e}")?;
        }
        if let Some(tol) = self.tolerance {
            write!(f, " tol={tol:.2e}")?;
        }
        Ok(())
    }
}

/// Measured gaps and tolerances across the shape.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ToleranceStats {
    pub max_vertex_tolerance: f64,
    pub max_edge_tolerance: f64,
    /// Largest vertex-to-curve or vertex-to-surface distance.
    pub max_vertex_gap: f64,
    /// Largest sampled edge-to-surface distance.
    pub max_edge_gap: f64,
}

/// Aggregate metrics computed during validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub counts: TopologyCounts,
    /// Genus of each closed shell, in shell order.
    pub genus: Vec<i64>,
    pub tolerance_stats: ToleranceStats,
    /// Enclosed volume, when the Full level ran.
    pub volume: Option<f64>,
}

/// The unified validation report produced by `check_shape`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// No findings of severity Error.
    pub valid: bool,
    pub level_completed: ValidationLevel,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub metrics: ValidationMetrics,
}

impl ValidationReport {
    pub fn errors_of(&self, code: ErrorCode) -> Vec<&ValidationIssue> {
        self.errors.iter().filter(|e| e.code == code).collect()
    }

    pub fn no_errors_of(&self, code: ErrorCode) -> bool {
        !self.errors.iter().any(|e| e.code == code)
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ValidationReport: valid={}, level={:?}, errors={}, warnings={}",
            self.valid,
            self.level_completed,
            self.errors.len(),
            self.warnings.len()
        )?;
        for e in &self.errors {
            writeln!(f, "  {e}")?;
        }
        for w in &self.warnings {
            writeln!(f, "  {w}")?;
        }
        Ok(())
    }
}

/// Sorts findings into errors and warnings.
#[derive(Debug, Default)]
pub(crate) struct Findings {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl Findings {
    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }
}
