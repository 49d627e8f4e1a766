//! Property-based tests for tessellation fidelity.

use proptest::prelude::*;

use brep_kernel::geometry::point::Point3d;
use brep_kernel::geometry::vector::Vec3;
use brep_kernel::topology::primitives::{make_box, make_cylinder, make_sphere};
use brep_tessellation::{tessellate, MeshParameters};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn centroids_stay_within_deflection(
        r in 0.5f64..5.0,
        h in 0.5f64..5.0,
        eps in 0.005f64..0.1,
        sphere in any::<bool>(),
    ) {
        let shape = if sphere {
            make_sphere(Point3d::ORIGIN, r).unwrap()
        } else {
            make_cylinder(Point3d::ORIGIN, Vec3::Z, r, h).unwrap()
        };
        let mesh = tessellate(&shape, &MeshParameters::with_deflection(eps)).unwrap();
        prop_assert!(mesh.surface_deviation(&shape).unwrap() <= eps + 1e-9);
        prop_assert_eq!(mesh.boundary_edge_count(), 0);
    }

    #[test]
    fn box_meshes_are_exact(
        dx in 0.1f64..10.0,
        dy in 0.1f64..10.0,
        dz in 0.1f64..10.0,
    ) {
        let b = make_box(Point3d::new(-1.0, 2.0, 0.5), dx, dy, dz).unwrap();
        let mesh = tessellate(&b, &MeshParameters::default()).unwrap();
        prop_assert_eq!(mesh.triangle_count(), 12);
        let v = dx * dy * dz;
        prop_assert!((mesh.volume() - v).abs() < 1e-9 * v.max(1.0));
    }

    #[test]
    fn finer_deflection_never_coarsens(r in 1.0f64..20.0) {
        let s = make_sphere(Point3d::ORIGIN, r).unwrap();
        let coarse = tessellate(&s, &MeshParameters::with_deflection(0.1)).unwrap();
        let fine = tessellate(&s, &MeshParameters::with_deflection(0.01)).unwrap();
        prop_assert!(fine.triangle_count() > coarse.triangle_count());
    }
}
