//! Helper functions: error type, tracing setup, reference solids, closed-form
//! volumes, mesh math.

use std::f64::consts::PI;

use brep_kernel::geometry::point::Point3d;
use brep_kernel::topology::primitives::make_box;
use brep_kernel::topology::properties::mass_properties;
use brep_kernel::Shape;
use brep_tessellation::TriangleMesh;

// ── Error Type ──────────────────────────────────────────────────────────────

/// Unified error type for the test harness.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("assertion failed: {detail}")]
    AssertionFailed { detail: String },

    #[error("oracle failure ({oracle}): {detail}")]
    OracleFailure { oracle: String, detail: String },

    #[error("kernel error: {0}")]
    Kernel(String),
}

impl HarnessError {
    pub fn kernel(e: impl std::fmt::Display) -> Self {
        Self::Kernel(e.to_string())
    }
}

// ── Tracing ─────────────────────────────────────────────────────────────────

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every
/// test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Reference Solids ────────────────────────────────────────────────────────

pub fn unit_box() -> Result<Shape, HarnessError> {
    make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).map_err(HarnessError::kernel)
}

pub fn box_at(x: f64, y: f64, z: f64, dx: f64, dy: f64, dz: f64) -> Result<Shape, HarnessError> {
    make_box(Point3d::new(x, y, z), dx, dy, dz).map_err(HarnessError::kernel)
}

/// Enclosed volume at a deflection fine enough for 1e-6 comparisons on
/// planar and quadric solids.
pub fn solid_volume(shape: &Shape) -> Result<f64, HarnessError> {
    mass_properties(shape, 1e-4)
        .map(|m| m.volume)
        .map_err(HarnessError::kernel)
}

// ── Closed-Form Volumes ─────────────────────────────────────────────────────

/// Volume of an a×b×c box with every edge rounded at radius r: the core,
/// six face slabs, twelve quarter cylinders and eight sphere octants.
pub fn steiner_volume(a: f64, b: f64, c: f64, r: f64) -> f64 {
    let (x, y, z) = (a - 2.0 * r, b - 2.0 * r, c - 2.0 * r);
    x * y * z + 2.0 * r * (x * y + y * z + z * x) + PI * r * r * (a + b + c - 6.0 * r) + 4.0 / 3.0 * PI * r.powi(3)
}

/// Volume of an a×b×c box with every edge chamfered at distance d.
pub fn chamfered_box_volume(a: f64, b: f64, c: f64, d: f64) -> f64 {
    let bars = 0.5 * d * d * ((a - 2.0 * d) + (b - 2.0 * d) + (c - 2.0 * d)) * 4.0;
    let corners = 8.0 * (5.0 / 6.0) * d.powi(3);
    a * b * c - bars - corners
}

// ── Mesh Math ───────────────────────────────────────────────────────────────

/// Axis-aligned bounds of the mesh positions as (min, max).
pub fn mesh_bounding_box(mesh: &TriangleMesh) -> ([f64; 3], [f64; 3]) {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for p in mesh.positions.chunks_exact(3) {
        for i in 0..3 {
            min[i] = min[i].min(p[i]);
            max[i] = max[i].max(p[i]);
        }
    }
    (min, max)
}

/// Largest and smallest distance of a mesh vertex from `center`.
pub fn radial_range(mesh: &TriangleMesh, center: Point3d) -> (f64, f64) {
    (0..mesh.vertex_count() as u32)
        .map(|i| mesh.position(i).distance_to(&center))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| (lo.min(d), hi.max(d)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steiner_volume_reduces_to_box_at_zero_radius() {
        assert!((steiner_volume(1.0, 2.0, 3.0, 0.0) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn steiner_volume_of_full_rounding_is_a_ball() {
        // A cube of side 2r rounded at r is a ball.
        let r = 0.5;
        assert!((steiner_volume(1.0, 1.0, 1.0, r) - 4.0 / 3.0 * PI * r.powi(3)).abs() < 1e-12);
    }

    #[test]
    fn chamfered_cube_matches_kernel_formula() {
        let d: f64 = 0.1;
        let kernel = 1.0 - 12.0 * 0.5 * d * d * (1.0 - 2.0 * d) - 8.0 * (5.0 / 6.0) * d.powi(3);
        assert!((chamfered_box_volume(1.0, 1.0, 1.0, d) - kernel).abs() < 1e-12);
    }

    #[test]
    fn bounding_box_of_unit_box_mesh() {
        let mesh = brep_tessellation::tessellate(&unit_box().unwrap(), &Default::default()).unwrap();
        let (min, max) = mesh_bounding_box(&mesh);
        assert_eq!(min, [0.0; 3]);
        assert_eq!(max, [1.0; 3]);
    }
}
