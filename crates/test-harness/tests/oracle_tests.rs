//! Tests for verification oracles.

use brep_kernel::geometry::point::Point3d;
use brep_kernel::geometry::vector::Vec3;
use brep_kernel::topology::primitives::{make_cylinder, make_sphere, make_torus};
use brep_kernel::validation::ValidationConfig;
use brep_kernel::Shape;
use brep_tessellation::{tessellate, MeshParameters, TriangleMesh};
use test_harness::helpers::unit_box;
use test_harness::oracle::*;

fn box_mesh() -> (Shape, TriangleMesh) {
    let b = unit_box().unwrap();
    let mesh = tessellate(&b, &MeshParameters::default()).unwrap();
    (b, mesh)
}

// ── Solid Oracle Tests ──────────────────────────────────────────────────

#[test]
fn euler_formula_passes_for_box_and_sphere() {
    let (b, _) = box_mesh();
    let result = check_euler_formula(&b);
    assert!(result.passed, "{}", result.detail);
    assert_eq!(result.value, Some(2.0));

    let s = make_sphere(Point3d::ORIGIN, 1.0).unwrap();
    assert!(check_euler_formula(&s).passed, "{}", check_euler_formula(&s).detail);
}

#[test]
fn euler_formula_fails_for_torus() {
    let t = make_torus(Point3d::ORIGIN, Vec3::Z, 3.0, 1.0).unwrap();
    let result = check_euler_formula(&t);
    assert!(!result.passed, "torus has genus one: {}", result.detail);
    assert_eq!(result.value, Some(0.0));
}

#[test]
fn topology_counts_correct_for_box() {
    let (b, _) = box_mesh();
    assert!(check_topology_counts(&b, 8, 12, 6).passed);
    let wrong = check_topology_counts(&b, 8, 12, 7);
    assert!(!wrong.passed);
    assert!(wrong.detail.contains("F=7"));
}

#[test]
fn open_shell_fails_closure() {
    let (b, _) = box_mesh();
    let (mut store, root) = b.into_parts();
    let shell = store.shells_of(root)[0];
    store.shells[shell].faces.pop();
    let open = Shape::from_parts(store, root);
    let result = check_valid(&open, &ValidationConfig::topology());
    assert!(!result.passed);
    assert!(result.detail.contains("FreeEdge"), "{}", result.detail);
}

#[test]
fn volume_oracle_reports_value() {
    let (b, _) = box_mesh();
    let ok = check_volume(&b, 1.0, 1e-9);
    assert!(ok.passed);
    assert!((ok.value.unwrap() - 1.0).abs() < 1e-9);
    assert!(!check_volume(&b, 2.0, 1e-9).passed);
}

#[test]
fn box_edges_are_not_smooth() {
    let (b, _) = box_mesh();
    let result = check_all_edges_smooth(&b, 1e-6);
    assert!(!result.passed);
    assert!(result.detail.starts_with("12 sharp edges"), "{}", result.detail);
}

// ── Mesh Oracle Tests ───────────────────────────────────────────────────

#[test]
fn box_mesh_passes_all_mesh_checks() {
    let (_, mesh) = box_mesh();
    for v in run_all_mesh_checks(&mesh) {
        assert!(v.passed, "{}: {}", v.oracle_name, v.detail);
    }
}

#[test]
fn open_mesh_fails_watertight() {
    let (_, mut mesh) = box_mesh();
    mesh.indices.truncate(mesh.indices.len() - 3);
    mesh.face_ids.pop();
    let result = check_watertight_mesh(&mesh);
    assert!(!result.passed);
    assert!(result.detail.starts_with("3 unpaired"), "{}", result.detail);
}

#[test]
fn flipped_triangle_fails_normal_consistency() {
    let (_, mut mesh) = box_mesh();
    mesh.indices.swap(0, 1);
    let result = check_consistent_normals(&mesh);
    assert!(!result.passed);
    assert!(result.detail.starts_with("1 of 12"), "{}", result.detail);
}

#[test]
fn out_of_range_index_is_caught() {
    let (_, mut mesh) = box_mesh();
    mesh.indices[0] = 10_000;
    assert!(!check_valid_indices(&mesh).passed);
}

#[test]
fn cylinder_mesh_meets_its_deflection() {
    let c = make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 1.0).unwrap();
    let mesh = tessellate(&c, &MeshParameters::with_deflection(0.01)).unwrap();
    let result = check_deflection(&mesh, &c, 0.01);
    assert!(result.passed, "{}", result.detail);
    assert!(!check_deflection(&mesh, &c, 1e-9).passed);
}

#[test]
fn sphere_vertices_oracle() {
    let s = make_sphere(Point3d::new(1.0, 2.0, 3.0), 2.0).unwrap();
    let mesh = tessellate(&s, &MeshParameters::with_deflection(0.05)).unwrap();
    assert!(check_vertices_on_sphere(&mesh, Point3d::new(1.0, 2.0, 3.0), 2.0, 1e-9).passed);
    assert!(!check_vertices_on_sphere(&mesh, Point3d::ORIGIN, 2.0, 1e-3).passed);
}
