pub mod audit;
pub mod config;
pub mod geometry;
pub mod types;
pub mod volume;

pub use config::*;
pub use types::*;

use tracing::{info, instrument};

use crate::topology::shape::Shape;

/// Shape validation engine.
///
/// Runs hierarchical checks at increasing levels of sophistication:
/// - **Topology**: Euler-Poincaré per closed shell, free and non-manifold
///   edges, wire closure, orientation consistency.
/// - **Geometry**: vertex-on-curve, vertex-on-surface, edge-on-surface,
///   zero-length edges, tolerance hierarchy.
/// - **Full**: enclosed volume sign per shell.
#[derive(Debug, Clone, Default)]
pub struct ShapeValidator {
    config: ValidationConfig,
}

impl ShapeValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(level = ?self.config.level))]
    pub fn validate(&self, shape: &Shape) -> ValidationReport {
        let mut findings = Findings::default();
        let mut metrics = ValidationMetrics {
            counts: shape.counts(),
            ..Default::default()
        };

        audit::check_topology(shape, &mut findings, &mut metrics);
        let mut level_completed = ValidationLevel::Topology;

        if self.config.level >= ValidationLevel::Geometry {
            geometry::check_geometry(shape, &self.config, &mut findings, &mut metrics);
            level_completed = ValidationLevel::Geometry;
        }

        if self.config.level >= ValidationLevel::Full {
            metrics.volume = Some(volume::check_volume(shape, &self.config, &mut findings));
            level_completed = ValidationLevel::Full;
        }

        let valid = findings.errors.is_empty();
        info!(
            valid,
            level = ?level_completed,
            error_count = findings.errors.len(),
            warning_count = findings.warnings.len(),
            "validation complete"
        );

        ValidationReport {
            valid,
            level_completed,
            errors: findings.errors,
            warnings: findings.warnings,
            metrics,
        }
    }
}

/// Validate `shape` with `config`.
pub fn check_shape(shape: &Shape, config: &ValidationConfig) -> ValidationReport {
    ShapeValidator::new(config.clone()).validate(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::geometry::curves::{Circle3d, Curve};
    use crate::geometry::point::Point3d;
    use crate::geometry::vector::Vec3;
    use crate::topology::brep::ShapeRef;
    use crate::topology::primitives::{make_box, make_cone, make_cylinder, make_sphere, make_torus};

    #[test]
    fn test_primitives_pass_full_validation() {
        let shapes = [
            make_box(Point3d::ORIGIN, 1.0, 2.0, 3.0).unwrap(),
            make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 2.0).unwrap(),
            make_cone(Point3d::ORIGIN, Vec3::Z, 1.0, 0.0, 2.0).unwrap(),
            make_sphere(Point3d::ORIGIN, 2.0).unwrap(),
        ];
        for shape in &shapes {
            let report = check_shape(shape, &ValidationConfig::full());
            assert!(report.valid, "{report}");
            assert_eq!(report.level_completed, ValidationLevel::Full);
            assert_eq!(report.metrics.genus, vec![0]);
            assert!(report.metrics.volume.unwrap() > 0.0);
        }
    }

    #[test]
    fn test_torus_has_genus_one() {
        let torus = make_torus(Point3d::ORIGIN, Vec3::Z, 3.0, 1.0).unwrap();
        let report = check_shape(&torus, &ValidationConfig::topology());
        assert!(report.valid, "{report}");
        assert_eq!(report.metrics.genus, vec![1]);
        assert_eq!(report.level_completed, ValidationLevel::Topology);
        assert!(report.metrics.volume.is_none());
    }

    #[test]
    fn test_box_counts() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let report = check_shape(&b, &ValidationConfig::topology());
        let c = report.metrics.counts;
        assert_eq!((c.vertices, c.edges, c.faces, c.shells, c.solids), (8, 12, 6, 1, 1));
    }

    #[test]
    fn test_removed_face_leaves_free_edges() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let (mut store, root) = b.into_parts();
        let shell = store.shells_of(root)[0];
        store.shells[shell].faces.pop();
        let broken = Shape::from_parts(store, root);

        let report = check_shape(&broken, &ValidationConfig::topology());
        assert!(!report.valid);
        assert_eq!(report.errors_of(ErrorCode::FreeEdge).len(), 4);
        // V - E + F = 8 - 12 + 5 = 1
        assert!(!report.no_errors_of(ErrorCode::EulerPoincareViolation));
    }

    #[test]
    fn test_flipped_face_breaks_orientation() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let (mut store, root) = b.into_parts();
        let face = store.faces_of(root)[0];
        let outer = store.faces[face].outer;
        crate::topology::builder::flip_uses(&mut store.wires[outer].edges);
        let broken = Shape::from_parts(store, root);

        let report = check_shape(&broken, &ValidationConfig::topology());
        assert_eq!(report.errors_of(ErrorCode::BadOrientationOfFaces).len(), 4);
    }

    #[test]
    fn test_open_wire_detected() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let (mut store, root) = b.into_parts();
        let face = store.faces_of(root)[0];
        let outer = store.faces[face].outer;
        store.wires[outer].edges.pop();
        let broken = Shape::from_parts(store, root);

        let report = check_shape(&broken, &ValidationConfig::topology());
        let errs = report.errors_of(ErrorCode::WireNotClosed);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].entity, ShapeRef::Wire(outer));
        assert!((errs[0].value.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_moved_vertex_is_off_curve_and_surface() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let (mut store, root) = b.into_parts();
        let v = store.vertices_of(root)[0];
        store.vertices[v].point = store.vertices[v].point + Vec3::new(0.0, 0.0, 0.01);
        let broken = Shape::from_parts(store, root);

        let topo = check_shape(&broken, &ValidationConfig::topology());
        assert!(topo.valid, "{topo}");

        let report = check_shape(&broken, &ValidationConfig::geometry());
        assert!(!report.valid);
        assert_eq!(report.errors_of(ErrorCode::InvalidPointOnCurve).len(), 3);
        // Off the face it is lifted from, on the two faces it slides along.
        let surface = report.errors_of(ErrorCode::InvalidPointOnSurface);
        assert_eq!(surface.len(), 1);
        assert!((surface[0].value.unwrap() - 0.01).abs() < 1e-12);
        assert!((report.metrics.tolerance_stats.max_vertex_gap - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_bent_edge_violates_same_parameter() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let (mut store, root) = b.into_parts();
        let e = store.edges_of(root)[0];
        let (a, z) = (store.edge_start_point(e), store.edge_end_point(e));
        // Same ends, bowed away from both faces.
        let mid = a.midpoint(&z) + Vec3::new(0.3, -0.3, 0.3);
        let (circle, end) = Circle3d::through_three_points(a, mid, z).unwrap();
        let edge = &mut store.edges[e];
        edge.curve = Arc::new(Curve::Circle(circle));
        edge.first = 0.0;
        edge.last = end;
        let broken = Shape::from_parts(store, root);

        let report = check_shape(&broken, &ValidationConfig::geometry());
        assert!(report.no_errors_of(ErrorCode::InvalidPointOnCurve), "{report}");
        assert_eq!(report.errors_of(ErrorCode::SameParameterViolation).len(), 2);
        assert!(report.metrics.tolerance_stats.max_edge_gap > 0.1);
    }

    #[test]
    fn test_small_gap_is_a_tolerance_warning() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let (mut store, root) = b.into_parts();
        let v = store.vertices_of(root)[0];
        store.vertices[v].point = store.vertices[v].point + Vec3::new(0.0, 0.0, 1e-5);
        for e in store.edges_of(root) {
            let (start, end) = (store.edges[e].start, store.edges[e].end);
            if start == v || end == v {
                store.edges[e].tolerance = 2e-5;
                store.vertices[start].tolerance = 2e-5;
                store.vertices[end].tolerance = 2e-5;
            }
        }
        let shifted = Shape::from_parts(store, root);

        let report = check_shape(&shifted, &ValidationConfig::geometry());
        assert!(report.valid, "{report}");
        assert_eq!(report.warning_count(), 0, "{report}");

        let (mut store, root) = shifted.into_parts();
        store.vertices[v].tolerance = 2e-6;
        let under = Shape::from_parts(store, root);
        let report = check_shape(&under, &ValidationConfig::geometry());
        assert!(report.valid, "{report}");
        assert!(report.warnings.iter().any(|w| w.code == ErrorCode::InsufficientTolerance));
        assert!(report.warnings.iter().any(|w| w.code == ErrorCode::ToleranceHierarchyViolation));
    }

    #[test]
    fn test_inverted_solid_has_negative_volume() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let (mut store, root) = b.into_parts();
        for face in store.faces_of(root) {
            store.faces[face].reversed = !store.faces[face].reversed;
        }
        let inverted = Shape::from_parts(store, root);

        let report = check_shape(&inverted, &ValidationConfig::full());
        assert_eq!(report.errors_of(ErrorCode::NegativeVolume).len(), 1, "{report}");
        assert!((report.metrics.volume.unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_serializes() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let report = check_shape(&b, &ValidationConfig::full());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"valid\":true"));
    }
}
