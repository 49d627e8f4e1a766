//! Configuration for shape validation.

use serde::{Deserialize, Serialize};

use super::types::ValidationLevel;

/// Tolerance thresholds for validation checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Gaps below this pass regardless of recorded entity tolerances.
    pub resolution: f64,
    /// Vertex gaps above this are errors even when the vertex tolerance
    /// covers them.
    pub max_vertex_tol: f64,
    /// Edge-to-surface gaps above this are errors.
    pub max_edge_tol: f64,
    /// Edges shorter than this are reported as zero length.
    pub min_edge_length: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            resolution: 1e-7,
            max_vertex_tol: 1e-3,
            max_edge_tol: 1e-3,
            min_edge_length: 1e-7,
        }
    }
}

/// Which checks run and with what parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub level: ValidationLevel,
    pub tolerance: ToleranceConfig,
    /// Sample points per edge for edge-on-surface checks.
    pub sampling_density: u32,
    /// Boundary deflection for the volume quadrature.
    pub volume_deflection: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            level: ValidationLevel::Full,
            tolerance: ToleranceConfig::default(),
            sampling_density: 23,
            volume_deflection: 1e-3,
        }
    }
}

impl ValidationConfig {
    /// Topology-only validation (fastest).
    pub fn topology() -> Self {
        Self {
            level: ValidationLevel::Topology,
            ..Self::default()
        }
    }

    /// Topology + geometric consistency.
    pub fn geometry() -> Self {
        Self {
            level: ValidationLevel::Geometry,
            ..Self::default()
        }
    }

    /// All levels including volume.
    pub fn full() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_order_levels() {
        assert!(ValidationConfig::topology().level < ValidationConfig::geometry().level);
        assert_eq!(ValidationConfig::full().level, ValidationLevel::Full);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let c: ValidationConfig =
            serde_json::from_str(r#"{"level": "Geometry", "tolerance": {"max_edge_tol": 1e-2}}"#).unwrap();
        assert_eq!(c.level, ValidationLevel::Geometry);
        assert_eq!(c.tolerance.max_edge_tol, 1e-2);
        assert_eq!(c.tolerance.resolution, 1e-7);
        assert_eq!(c.sampling_density, 23);
    }
}
