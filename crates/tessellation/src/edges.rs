//! Shared edge discretization.
//!
//! Every edge is sampled exactly once; faces on both sides read the same
//! parameters, so their boundary vertices coincide bit for bit.

use brep_kernel::topology::brep::{Edge, EdgeId, EntityStore};
use rayon::prelude::*;
use slotmap::SecondaryMap;
use tracing::debug;

use crate::params::MeshParameters;

pub type EdgeSamples = SecondaryMap<EdgeId, Vec<f64>>;

/// Ascending curve parameters for `edge`, from `first` to `last`.
pub fn edge_samples(edge: &Edge, params: &MeshParameters) -> Vec<f64> {
    if edge.degenerated {
        return vec![edge.first, edge.last];
    }
    let deflection = if params.relative {
        params.deflection * edge.length()
    } else {
        params.deflection
    };
    edge.curve
        .discretize(edge.first, edge.last, deflection, params.angle, params.min_size)
}

pub fn discretize_edges(store: &EntityStore, edges: &[EdgeId], params: &MeshParameters) -> EdgeSamples {
    let sample = |&e: &EdgeId| (e, edge_samples(&store.edges[e], params));
    let sampled: Vec<(EdgeId, Vec<f64>)> = if params.parallel {
        edges.par_iter().map(sample).collect()
    } else {
        edges.iter().map(sample).collect()
    };
    let points: usize = sampled.iter().map(|(_, s)| s.len()).sum();
    debug!(edges = sampled.len(), points, "edges discretized");
    sampled.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use brep_kernel::geometry::point::Point3d;
    use brep_kernel::geometry::vector::Vec3;
    use brep_kernel::topology::primitives::{make_box, make_cylinder};

    #[test]
    fn test_lines_keep_their_ends() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let samples = discretize_edges(b.store(), &b.edges(), &MeshParameters::default());
        assert_eq!(samples.len(), 12);
        for (e, s) in &samples {
            let edge = &b.store().edges[e];
            assert_eq!(s.len(), 2);
            assert!((s[0] - edge.first).abs() < 1e-12);
            assert!((s[1] - edge.last).abs() < 1e-12);
        }
    }

    #[test]
    fn test_circle_chords_within_deflection() {
        let c = make_cylinder(Point3d::ORIGIN, Vec3::Z, 2.0, 1.0).unwrap();
        let params = MeshParameters::with_deflection(0.01);
        let samples = discretize_edges(c.store(), &c.edges(), &params);
        for (e, s) in &samples {
            let edge = &c.store().edges[e];
            for w in s.windows(2) {
                let chord_mid = edge.point_at(w[0]).midpoint(&edge.point_at(w[1]));
                let arc_mid = edge.point_at(0.5 * (w[0] + w[1]));
                assert!(chord_mid.distance_to(&arc_mid) <= 0.01 + 1e-9);
            }
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let c = make_cylinder(Point3d::ORIGIN, Vec3::Z, 2.0, 1.0).unwrap();
        let par = discretize_edges(c.store(), &c.edges(), &MeshParameters::default());
        let seq = discretize_edges(
            c.store(),
            &c.edges(),
            &MeshParameters {
                parallel: false,
                ..MeshParameters::default()
            },
        );
        for e in c.edges() {
            assert_eq!(par[e], seq[e]);
        }
    }
}
