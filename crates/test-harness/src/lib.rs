//! Test harness for the B-Rep kernel and tessellator.
//!
//! Provides oracles, assertions and reports for scripting end-to-end
//! scenarios: boolean algebra on primitives, blends with closed-form
//! volumes, and tessellation fidelity.
//!
//! # Key Components
//!
//! - [`oracle`] - Verification functions returning pass/fail verdicts
//! - [`report`] - Structured text report of a shape and its mesh
//! - [`helpers`] - Error type, tracing setup, reference solids, volumes
//! - [`assertions`] - Rich assertion helpers with diagnostics

pub mod assertions;
pub mod helpers;
pub mod oracle;
pub mod report;

pub use helpers::HarnessError;
pub use oracle::OracleVerdict;
pub use report::ShapeReport;
