//! Tests for shape reports.

use brep_kernel::geometry::point::Point3d;
use brep_kernel::geometry::vector::Vec3;
use brep_kernel::topology::primitives::make_cylinder;
use test_harness::helpers::unit_box;
use test_harness::ShapeReport;

#[test]
fn box_report_has_all_sections() {
    let b = unit_box().unwrap();
    let report = ShapeReport::build("box", &b, 0.1).unwrap();
    assert!(report.all_passed(), "{report}");
    assert!(report.valid);
    assert_eq!(report.euler, 2);
    assert!((report.volume - 1.0).abs() < 1e-9);
    assert!((report.area - 6.0).abs() < 1e-9);

    let text = report.to_text();
    assert!(text.contains("=== Shape Report: box ==="));
    assert!(text.contains("V=8 E=12 F=6"));
    assert!(text.contains("Euler V-E+F=2 (OK)"));
    assert!(text.contains("12 triangles"));
    assert!(text.contains("Bounding Box: (0.000, 0.000, 0.000) -> (1.000, 1.000, 1.000)"));
    assert!(text.contains("Errors: none"));
    assert!(!text.contains("[FAIL]"));
}

#[test]
fn cylinder_report_mesh_volume_is_close() {
    let c = make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 2.0).unwrap();
    let report = ShapeReport::build("cylinder", &c, 0.01).unwrap();
    assert!(report.all_passed(), "{report}");
    let mesh = report.mesh.as_ref().unwrap();
    assert!(mesh.triangle_count > 12);
    assert!((mesh.mesh_volume - report.volume).abs() / report.volume < 0.02);
}

#[test]
fn report_serializes_to_json() {
    let b = unit_box().unwrap();
    let report = ShapeReport::build("box", &b, 0.1).unwrap();
    let json = report.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["name"], "box");
    assert_eq!(value["counts"]["faces"], 6);
    assert_eq!(value["mesh"]["triangle_count"], 12);
    assert!(value["oracle_results"].as_array().unwrap().len() >= 8);
}
