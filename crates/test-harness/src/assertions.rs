//! Rich assertion helpers with diagnostic output.
//!
//! Every failure includes expected vs actual and the context string of the
//! scenario step that produced it.

use brep_kernel::Shape;
use brep_tessellation::TriangleMesh;

use crate::helpers::{mesh_bounding_box, HarnessError};
use crate::oracle::OracleVerdict;

/// Assert exact topology counts (V, E, F) for a shape.
pub fn assert_topology_eq(
    shape: &Shape,
    expected_v: usize,
    expected_e: usize,
    expected_f: usize,
    ctx: &str,
) -> Result<(), HarnessError> {
    let c = shape.counts();
    if (c.vertices, c.edges, c.faces) == (expected_v, expected_e, expected_f) {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed {
            detail: format!(
                "[{ctx}] expected V={expected_v} E={expected_e} F={expected_f}, got V={} E={} F={}",
                c.vertices, c.edges, c.faces,
            ),
        })
    }
}

/// Assert a scalar within an absolute tolerance.
pub fn assert_close(actual: f64, expected: f64, tol: f64, ctx: &str) -> Result<(), HarnessError> {
    if (actual - expected).abs() <= tol {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed {
            detail: format!(
                "[{ctx}] expected {expected:.9}, got {actual:.9} (diff {:.3e}, tol {tol:e})",
                (actual - expected).abs(),
            ),
        })
    }
}

/// Assert the mesh bounding box matches expected values within tolerance.
pub fn assert_bounding_box(
    mesh: &TriangleMesh,
    expected_min: [f64; 3],
    expected_max: [f64; 3],
    tol: f64,
    ctx: &str,
) -> Result<(), HarnessError> {
    let (actual_min, actual_max) = mesh_bounding_box(mesh);
    for i in 0..3 {
        if (actual_min[i] - expected_min[i]).abs() > tol {
            return Err(HarnessError::AssertionFailed {
                detail: format!(
                    "[{ctx}] bounding box min[{i}]: expected {:.6}, got {:.6} (tol={tol})",
                    expected_min[i], actual_min[i],
                ),
            });
        }
        if (actual_max[i] - expected_max[i]).abs() > tol {
            return Err(HarnessError::AssertionFailed {
                detail: format!(
                    "[{ctx}] bounding box max[{i}]: expected {:.6}, got {:.6} (tol={tol})",
                    expected_max[i], actual_max[i],
                ),
            });
        }
    }
    Ok(())
}

/// Fail with the first failing verdict, listing how many others failed.
pub fn assert_all_pass(verdicts: &[OracleVerdict], ctx: &str) -> Result<(), HarnessError> {
    let failed: Vec<&OracleVerdict> = verdicts.iter().filter(|v| !v.passed).collect();
    match failed.first() {
        None => Ok(()),
        Some(first) => Err(HarnessError::OracleFailure {
            oracle: first.oracle_name.clone(),
            detail: format!("[{ctx}] {} ({} of {} checks failed)", first.detail, failed.len(), verdicts.len()),
        }),
    }
}

/// Assert that the triangle count strictly grows along a refinement
/// sequence of meshes.
pub fn assert_refines(meshes: &[TriangleMesh], ctx: &str) -> Result<(), HarnessError> {
    let counts: Vec<usize> = meshes.iter().map(TriangleMesh::triangle_count).collect();
    if counts.windows(2).all(|w| w[0] < w[1]) {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed {
            detail: format!("[{ctx}] triangle counts do not grow: {counts:?}"),
        })
    }
}
