//! Verification oracles: pure functions returning pass/fail verdicts.
//!
//! Each oracle returns an `OracleVerdict` with diagnostic detail, not panics.
//! This lets a scenario collect all failures in one pass.

use brep_kernel::blend::{edge_convexity, Convexity};
use brep_kernel::geometry::point::Point3d;
use brep_kernel::geometry::vector::Vec3;
use brep_kernel::validation::{check_shape, ValidationConfig};
use brep_kernel::Shape;
use brep_tessellation::TriangleMesh;
use serde::Serialize;

use crate::helpers::{radial_range, solid_volume};

/// The result of a single oracle check.
#[derive(Debug, Clone, Serialize)]
pub struct OracleVerdict {
    pub oracle_name: String,
    pub passed: bool,
    pub detail: String,
    pub value: Option<f64>,
}

impl OracleVerdict {
    fn pass(name: &str, detail: String) -> Self {
        Self {
            oracle_name: name.to_string(),
            passed: true,
            detail,
            value: None,
        }
    }

    fn fail(name: &str, detail: String) -> Self {
        Self {
            oracle_name: name.to_string(),
            passed: false,
            detail,
            value: None,
        }
    }

    fn check(name: &str, passed: bool, detail: String) -> Self {
        if passed {
            Self::pass(name, detail)
        } else {
            Self::fail(name, detail)
        }
    }

    fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

// ── Solid Oracles ───────────────────────────────────────────────────────────

/// Check Euler's formula V - E + F = 2 for a genus-0 solid with no inner
/// loops. Degenerate (pole) edges are not counted.
pub fn check_euler_formula(shape: &Shape) -> OracleVerdict {
    let store = shape.store();
    let v = shape.vertices().len() as i64;
    let e = shape.edges().iter().filter(|&&e| !store.edges[e].degenerated).count() as i64;
    let f = shape.faces().len() as i64;
    let euler = v - e + f;
    OracleVerdict::check(
        "euler_formula",
        euler == 2,
        format!("V({v}) - E({e}) + F({f}) = {euler}"),
    )
    .with_value(euler as f64)
}

/// Check that every shell of the shape is closed.
pub fn check_closed(shape: &Shape) -> OracleVerdict {
    let shells = shape.shells().len();
    OracleVerdict::check(
        "closed_shells",
        shells > 0 && shape.is_closed(),
        format!("{shells} shells, closed = {}", shape.is_closed()),
    )
}

/// Check exact vertex/edge/face counts.
pub fn check_topology_counts(shape: &Shape, expected_v: usize, expected_e: usize, expected_f: usize) -> OracleVerdict {
    let c = shape.counts();
    OracleVerdict::check(
        "topology_counts",
        (c.vertices, c.edges, c.faces) == (expected_v, expected_e, expected_f),
        format!(
            "expected V={expected_v} E={expected_e} F={expected_f}, got V={} E={} F={}",
            c.vertices, c.edges, c.faces
        ),
    )
}

/// Run the kernel validator at `config` and pass when it reports no errors.
pub fn check_valid(shape: &Shape, config: &ValidationConfig) -> OracleVerdict {
    let report = check_shape(shape, config);
    let detail = if report.valid {
        format!("valid at {:?}, {} warnings", report.level_completed, report.warning_count())
    } else {
        let first: Vec<String> = report.errors.iter().take(5).map(ToString::to_string).collect();
        format!("{} errors: {}", report.error_count(), first.join("; "))
    };
    OracleVerdict::check("validation", report.valid, detail)
}

/// Check the enclosed volume against a closed-form value.
pub fn check_volume(shape: &Shape, expected: f64, tol: f64) -> OracleVerdict {
    match solid_volume(shape) {
        Ok(v) => OracleVerdict::check(
            "volume",
            (v - expected).abs() <= tol,
            format!("volume {v:.9}, expected {expected:.9} (tol {tol:e})"),
        )
        .with_value(v),
        Err(e) => OracleVerdict::fail("volume", format!("volume integration failed: {e}")),
    }
}

/// Check that no edge is sharp: every manifold edge is tangent-continuous
/// within `angle` radians.
pub fn check_all_edges_smooth(shape: &Shape, angle: f64) -> OracleVerdict {
    let mut sharp = Vec::new();
    let mut checked = 0usize;
    for e in shape.edges() {
        if shape.store().edges[e].degenerated {
            continue;
        }
        checked += 1;
        match edge_convexity(shape, e, angle) {
            Ok(Convexity::Smooth) => {}
            Ok(c) => sharp.push(format!("{e:?}: {c:?}")),
            Err(err) => sharp.push(format!("{e:?}: {err}")),
        }
    }
    OracleVerdict::check(
        "smooth_edges",
        sharp.is_empty(),
        if sharp.is_empty() {
            format!("all {checked} edges smooth")
        } else {
            format!("{} sharp edges: {}", sharp.len(), sharp[..sharp.len().min(5)].join(", "))
        },
    )
}

// ── Mesh Oracles ────────────────────────────────────────────────────────────

/// Check that the mesh is watertight: every triangle edge, matched by
/// position, is shared by exactly two triangles.
pub fn check_watertight_mesh(mesh: &TriangleMesh) -> OracleVerdict {
    let open = mesh.boundary_edge_count();
    OracleVerdict::check(
        "watertight_mesh",
        open == 0,
        format!("{open} unpaired edges over {} triangles", mesh.triangle_count()),
    )
}

/// Check that stored normals agree with the triangle winding.
pub fn check_consistent_normals(mesh: &TriangleMesh) -> OracleVerdict {
    let total = mesh.triangle_count();
    let inconsistent = (0..total)
        .filter(|&t| {
            let [a, b, c] = mesh.triangle_points(t);
            let geometric = (b - a).cross(&(c - a));
            let stored = mesh
                .triangle(t)
                .iter()
                .fold(Vec3::ZERO, |s, &i| s + mesh.normal(i));
            geometric.dot(&stored) < 0.0
        })
        .count();
    OracleVerdict::check(
        "consistent_normals",
        inconsistent == 0,
        format!("{inconsistent} of {total} triangles have reversed normals"),
    )
}

/// Check that no triangle has (near) zero area.
pub fn check_no_degenerate_triangles(mesh: &TriangleMesh) -> OracleVerdict {
    let degenerate = (0..mesh.triangle_count())
        .filter(|&t| {
            let [a, b, c] = mesh.triangle_points(t);
            (b - a).cross(&(c - a)).length() < 1e-18
        })
        .count();
    OracleVerdict::check(
        "no_degenerate_triangles",
        degenerate == 0,
        format!("{degenerate} degenerate triangles"),
    )
}

/// Check that all indices are in range and buffers are consistent.
pub fn check_valid_indices(mesh: &TriangleMesh) -> OracleVerdict {
    let n = mesh.vertex_count() as u32;
    let bad = mesh.indices.iter().filter(|&&i| i >= n).count();
    let shaped = mesh.positions.len() == mesh.normals.len()
        && mesh.indices.len() % 3 == 0
        && mesh.face_ids.len() == mesh.triangle_count();
    OracleVerdict::check(
        "valid_indices",
        bad == 0 && shaped,
        format!("{bad} out-of-range indices, buffers consistent = {shaped}"),
    )
}

/// Check that every stored normal has unit length.
pub fn check_unit_normals(mesh: &TriangleMesh) -> OracleVerdict {
    let bad = (0..mesh.vertex_count() as u32)
        .filter(|&i| (mesh.normal(i).length() - 1.0).abs() > 1e-6)
        .count();
    OracleVerdict::check("unit_normals", bad == 0, format!("{bad} non-unit normals"))
}

/// Check that triangle centroids lie within `eps` of their source surfaces.
pub fn check_deflection(mesh: &TriangleMesh, shape: &Shape, eps: f64) -> OracleVerdict {
    match mesh.surface_deviation(shape) {
        Ok(d) => OracleVerdict::check(
            "deflection",
            d <= eps + 1e-9,
            format!("max centroid deviation {d:.3e} (bound {eps:e})"),
        )
        .with_value(d),
        Err(e) => OracleVerdict::fail("deflection", format!("deviation check failed: {e}")),
    }
}

/// Check that every vertex is within `tol` of the sphere of radius `r`.
pub fn check_vertices_on_sphere(mesh: &TriangleMesh, center: Point3d, r: f64, tol: f64) -> OracleVerdict {
    let (lo, hi) = radial_range(mesh, center);
    let worst = (lo - r).abs().max((hi - r).abs());
    OracleVerdict::check(
        "vertices_on_sphere",
        mesh.vertex_count() > 0 && worst <= tol,
        format!("radii in [{lo:.9}, {hi:.9}], r = {r}"),
    )
    .with_value(worst)
}

/// Run all generic mesh checks.
pub fn run_all_mesh_checks(mesh: &TriangleMesh) -> Vec<OracleVerdict> {
    vec![
        check_valid_indices(mesh),
        check_watertight_mesh(mesh),
        check_consistent_normals(mesh),
        check_no_degenerate_triangles(mesh),
        check_unit_normals(mesh),
    ]
}

/// Run all generic solid checks.
pub fn run_solid_checks(shape: &Shape) -> Vec<OracleVerdict> {
    vec![check_closed(shape), check_valid(shape, &ValidationConfig::full())]
}
