//! End-to-end scenarios: primitives through booleans, blends and meshing,
//! checked against closed-form values.

use std::f64::consts::PI;

use brep_kernel::blend::{chamfer, fillet, BlendProfile};
use brep_kernel::boolean::{intersect, subtract, union};
use brep_kernel::geometry::point::Point3d;
use brep_kernel::geometry::vector::Vec3;
use brep_kernel::topology::primitives::{make_cylinder, make_sphere};
use brep_kernel::validation::ValidationConfig;
use brep_tessellation::{tessellate, MeshParameters};
use test_harness::assertions::*;
use test_harness::helpers::*;
use test_harness::oracle;

#[test]
fn test_union_of_shifted_unit_boxes() {
    init_tracing();
    let a = unit_box().unwrap();
    let b = box_at(0.5, 0.0, 0.0, 1.0, 1.0, 1.0).unwrap();
    let merged = union(&a, &b).unwrap();

    let mut checks = oracle::run_solid_checks(&merged);
    checks.push(oracle::check_volume(&merged, 1.5, 1e-6));
    checks.push(oracle::check_euler_formula(&merged));
    assert_all_pass(&checks, "box ∪ box").unwrap();

    let mesh = tessellate(&merged, &MeshParameters::default()).unwrap();
    assert_all_pass(&oracle::run_all_mesh_checks(&mesh), "box ∪ box mesh").unwrap();
    assert_close(mesh.volume(), 1.5, 1e-9, "mesh volume").unwrap();
    assert_bounding_box(&mesh, [0.0; 3], [1.5, 1.0, 1.0], 1e-12, "mesh bounds").unwrap();
}

#[test]
fn test_fillet_every_box_edge_matches_steiner_volume() {
    init_tracing();
    let b = unit_box().unwrap();
    let r = 0.1;
    let rounded = fillet(&b, &b.edges(), &BlendProfile::Constant(r)).unwrap();

    assert_topology_eq(&rounded, 24, 48, 26, "rounded box").unwrap();
    let checks = [
        oracle::check_closed(&rounded),
        oracle::check_valid(&rounded, &ValidationConfig::topology()),
        oracle::check_volume(&rounded, steiner_volume(1.0, 1.0, 1.0, r), 1e-4),
        oracle::check_all_edges_smooth(&rounded, 1e-6),
    ];
    assert_all_pass(&checks, "rounded box").unwrap();
}

#[test]
fn test_fillet_rectangular_block() {
    let (a, b, c, r) = (2.0, 1.5, 1.0, 0.2);
    let block = box_at(-1.0, -1.0, -1.0, a, b, c).unwrap();
    let rounded = fillet(&block, &block.edges(), &BlendProfile::Constant(r)).unwrap();
    assert_all_pass(
        &[
            oracle::check_closed(&rounded),
            oracle::check_volume(&rounded, steiner_volume(a, b, c, r), 1e-4),
        ],
        "rounded block",
    )
    .unwrap();
}

#[test]
fn test_chamfer_every_box_edge() {
    let b = box_at(0.0, 0.0, 0.0, 2.0, 1.0, 1.0).unwrap();
    let d = 0.1;
    let cut = chamfer(&b, &b.edges(), d).unwrap();
    assert_all_pass(
        &[
            oracle::check_closed(&cut),
            oracle::check_valid(&cut, &ValidationConfig::full()),
            oracle::check_volume(&cut, chamfered_box_volume(2.0, 1.0, 1.0, d), 1e-9),
        ],
        "chamfered box",
    )
    .unwrap();

    let mesh = tessellate(&cut, &MeshParameters::default()).unwrap();
    assert_all_pass(&oracle::run_all_mesh_checks(&mesh), "chamfered mesh").unwrap();
    assert_close(mesh.volume(), chamfered_box_volume(2.0, 1.0, 1.0, d), 1e-9, "chamfered mesh volume").unwrap();
}

#[test]
fn test_sphere_mesh_converges_to_radius() {
    init_tracing();
    let r = 10.0;
    let sphere = make_sphere(Point3d::ORIGIN, r).unwrap();

    let meshes: Vec<_> = [0.1, 0.03, 0.01]
        .iter()
        .map(|&eps| tessellate(&sphere, &MeshParameters::with_deflection(eps)).unwrap())
        .collect();
    assert_refines(&meshes, "sphere refinement").unwrap();

    let fine = &meshes[2];
    let checks = [
        oracle::check_vertices_on_sphere(fine, Point3d::ORIGIN, r, 0.01),
        oracle::check_deflection(fine, &sphere, 0.01),
        oracle::check_watertight_mesh(fine),
        oracle::check_consistent_normals(fine),
    ];
    assert_all_pass(&checks, "sphere ε=0.01").unwrap();

    let exact = 4.0 / 3.0 * PI * r.powi(3);
    assert!(fine.volume() < exact);
    assert!((fine.volume() - exact).abs() / exact < 1e-2);
}

#[test]
fn test_drilled_plate_meshes_watertight() {
    init_tracing();
    let plate = box_at(0.0, 0.0, 0.0, 2.0, 2.0, 1.0).unwrap();
    let drill = make_cylinder(Point3d::new(1.0, 1.0, -1.0), Vec3::Z, 0.5, 3.0).unwrap();
    let drilled = subtract(&plate, &drill).unwrap();
    let expected = 4.0 - PI * 0.25;

    let mut checks = oracle::run_solid_checks(&drilled);
    checks.push(oracle::check_volume(&drilled, expected, 1e-3));
    assert_all_pass(&checks, "drilled plate").unwrap();

    let eps = 0.005;
    let mesh = tessellate(&drilled, &MeshParameters::with_deflection(eps)).unwrap();
    let mut mesh_checks = oracle::run_all_mesh_checks(&mesh);
    mesh_checks.push(oracle::check_deflection(&mesh, &drilled, eps));
    assert_all_pass(&mesh_checks, "drilled plate mesh").unwrap();
    // The bore is polygonal, so the mesh holds slightly more material.
    assert!(mesh.volume() > expected);
    assert!(mesh.volume() - expected < 1e-2);
}

#[test]
fn test_boolean_algebra_on_overlapping_boxes() {
    let a = box_at(0.0, 0.0, 0.0, 2.0, 2.0, 2.0).unwrap();
    let b = box_at(1.0, 0.5, -0.5, 2.0, 1.0, 1.0).unwrap();
    let va = solid_volume(&a).unwrap();
    let vb = solid_volume(&b).unwrap();

    let ab = solid_volume(&union(&a, &b).unwrap()).unwrap();
    let ba = solid_volume(&union(&b, &a).unwrap()).unwrap();
    assert_close(ab, ba, 1e-9, "union commutes").unwrap();

    let common = solid_volume(&intersect(&a, &b).unwrap()).unwrap();
    assert_close(ab + common, va + vb, 1e-9, "inclusion-exclusion").unwrap();

    let a_minus_b = solid_volume(&subtract(&a, &b).unwrap()).unwrap();
    assert_close(a_minus_b, va - common, 1e-9, "difference").unwrap();

    let back = subtract(&union(&a, &b).unwrap(), &b).unwrap();
    assert!(solid_volume(&back).unwrap() <= va + 1e-9);

    let aa = intersect(&a, &a).unwrap();
    assert_close(solid_volume(&aa).unwrap(), va, 1e-9, "A ∩ A").unwrap();
}
