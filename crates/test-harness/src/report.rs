//! Structured text reports of a shape and its mesh.
//!
//! Reports are plain text for reading in test output; the same data
//! serializes to JSON for tooling.

use std::fmt;

use brep_kernel::topology::properties::mass_properties;
use brep_kernel::topology::shape::TopologyCounts;
use brep_kernel::validation::{check_shape, ValidationConfig};
use brep_kernel::Shape;
use brep_tessellation::{tessellate, MeshParameters};
use serde::Serialize;

use crate::helpers::{mesh_bounding_box, HarnessError};
use crate::oracle::{self, OracleVerdict};

/// A complete shape report with all sections.
#[derive(Debug, Clone, Serialize)]
pub struct ShapeReport {
    pub name: String,
    pub counts: TopologyCounts,
    pub euler: i64,
    pub volume: f64,
    pub area: f64,
    pub valid: bool,
    pub validation_errors: Vec<String>,
    pub mesh: Option<MeshSummary>,
    pub bounding_box: Option<([f64; 3], [f64; 3])>,
    pub oracle_results: Vec<OracleVerdict>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeshSummary {
    pub triangle_count: usize,
    pub vertex_count: usize,
    pub deflection: f64,
    pub mesh_volume: f64,
}

impl ShapeReport {
    /// Validate, measure and tessellate `shape` at `deflection`.
    pub fn build(name: &str, shape: &Shape, deflection: f64) -> Result<Self, HarnessError> {
        let mass = mass_properties(shape, 1e-4).map_err(HarnessError::kernel)?;
        let validation = check_shape(shape, &ValidationConfig::full());
        let mut oracle_results = oracle::run_solid_checks(shape);
        oracle_results.push(oracle::check_euler_formula(shape));

        let (mesh, bounding_box) = match tessellate(shape, &MeshParameters::with_deflection(deflection)) {
            Ok(m) => {
                oracle_results.extend(oracle::run_all_mesh_checks(&m));
                oracle_results.push(oracle::check_deflection(&m, shape, deflection));
                let summary = MeshSummary {
                    triangle_count: m.triangle_count(),
                    vertex_count: m.vertex_count(),
                    deflection,
                    mesh_volume: m.volume(),
                };
                (Some(summary), Some(mesh_bounding_box(&m)))
            }
            Err(e) => {
                oracle_results.push(OracleVerdict {
                    oracle_name: "tessellation".into(),
                    passed: false,
                    detail: e.to_string(),
                    value: None,
                });
                (None, None)
            }
        };

        let counts = shape.counts();
        let euler = oracle_results
            .iter()
            .find(|v| v.oracle_name == "euler_formula")
            .and_then(|v| v.value)
            .map_or(0, |x| x as i64);
        Ok(Self {
            name: name.to_string(),
            counts,
            euler,
            volume: mass.volume,
            area: mass.area,
            valid: validation.valid,
            validation_errors: validation.errors.iter().map(ToString::to_string).collect(),
            mesh,
            bounding_box,
            oracle_results,
        })
    }

    pub fn all_passed(&self) -> bool {
        self.oracle_results.iter().all(|v| v.passed)
    }

    /// Format the report as text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("=== Shape Report: {} ===\n\n", self.name));

        let c = &self.counts;
        let euler_status = if self.euler == 2 { "OK" } else { "WARN" };
        out.push_str(&format!(
            "Topology: V={} E={} F={} shells={} solids={} | Euler V-E+F={} ({})\n",
            c.vertices, c.edges, c.faces, c.shells, c.solids, self.euler, euler_status,
        ));
        out.push_str(&format!("Volume: {:.6}  Area: {:.6}\n", self.volume, self.area));

        if let Some(ms) = &self.mesh {
            out.push_str(&format!(
                "\nMesh (deflection {}): {} triangles, {} vertices, volume {:.6}\n",
                ms.deflection, ms.triangle_count, ms.vertex_count, ms.mesh_volume,
            ));
        }

        if let Some((min, max)) = self.bounding_box {
            out.push_str(&format!(
                "\nBounding Box: ({:.3}, {:.3}, {:.3}) -> ({:.3}, {:.3}, {:.3})\n",
                min[0], min[1], min[2], max[0], max[1], max[2],
            ));
        }

        if !self.oracle_results.is_empty() {
            out.push_str(&format!("\nOracle Results ({} checks):\n", self.oracle_results.len()));
            for v in &self.oracle_results {
                let status = if v.passed { "PASS" } else { "FAIL" };
                out.push_str(&format!("  [{}] {}: {}\n", status, v.oracle_name, v.detail));
            }
        }

        if self.validation_errors.is_empty() {
            out.push_str("\nErrors: none\n");
        } else {
            out.push_str(&format!("\nErrors ({}):\n", self.validation_errors.len()));
            for msg in &self.validation_errors {
                out.push_str(&format!("  {msg}\n"));
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String, HarnessError> {
        serde_json::to_string_pretty(self).map_err(HarnessError::kernel)
    }
}

impl fmt::Display for ShapeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}
