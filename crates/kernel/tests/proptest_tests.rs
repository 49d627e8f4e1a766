//! Property-based tests for kernel invariants using the `proptest` crate.

use proptest::prelude::*;

use brep_kernel::blend::{fillet, BlendProfile};
use brep_kernel::boolean::{intersect, subtract, union, BooleanError};
use brep_kernel::geometry::nurbs::{BSplineCurve, BSplineSurface};
use brep_kernel::geometry::point::Point3d;
use brep_kernel::geometry::transform::Transform;
use brep_kernel::geometry::vector::Vec3;
use brep_kernel::topology::primitives::{make_box, make_cylinder};
use brep_kernel::topology::properties::mass_properties;
use brep_kernel::topology::sew::sew;
use brep_kernel::validation::{check_shape, ValidationConfig};
use brep_kernel::Shape;

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_point() -> impl Strategy<Value = Point3d> {
    (-100.0f64..100.0, -100.0f64..100.0, -100.0f64..100.0).prop_map(|(x, y, z)| Point3d::new(x, y, z))
}

fn arb_positive_dim() -> impl Strategy<Value = f64> {
    0.5f64..5.0
}

/// Offset of a second unit box that always overlaps the first one. A zero
/// component makes the boxes share two face planes on that axis; 0.5 puts
/// the boundaries of both boxes at the midplane of the other.
fn arb_overlap() -> impl Strategy<Value = (f64, f64, f64)> {
    let axis = prop_oneof![Just(0.0), Just(0.5), Just(-0.5), 0.1f64..0.9, -0.9f64..-0.1];
    (axis.clone(), axis.clone(), axis)
}

fn arb_angle() -> impl Strategy<Value = f64> {
    -std::f64::consts::PI..std::f64::consts::PI
}

fn volume(shape: &Shape) -> f64 {
    mass_properties(shape, 1e-4).unwrap().volume
}

fn unit_box() -> Shape {
    make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap()
}

fn shifted_unit_box((dx, dy, dz): (f64, f64, f64)) -> Shape {
    make_box(Point3d::new(dx, dy, dz), 1.0, 1.0, 1.0).unwrap()
}

// ---------------------------------------------------------------------------
// 1. Clamped splines interpolate their end poles
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn clamped_curve_hits_end_poles(
        degree in 1usize..4,
        poles in prop::collection::vec(arb_point(), 4..9),
    ) {
        let first = poles[0];
        let last = poles[poles.len() - 1];
        let curve = BSplineCurve::clamped_uniform(degree, poles, None).unwrap();
        let (t0, t1) = curve.domain();
        prop_assert!(curve.point(t0).distance_to(&first) < 1e-9);
        prop_assert!(curve.point(t1).distance_to(&last) < 1e-9);
    }
}

proptest! {
    #[test]
    fn clamped_surface_hits_corner_poles(
        u_degree in 1usize..4,
        v_degree in 1usize..4,
        flat in prop::collection::vec(arb_point(), 20),
    ) {
        let poles: Vec<Vec<Point3d>> = flat.chunks(5).map(<[Point3d]>::to_vec).collect();
        let corners = [poles[0][0], poles[0][4], poles[3][0], poles[3][4]];
        let surface = BSplineSurface::clamped_uniform(u_degree, v_degree, poles, None).unwrap();
        let ((u0, u1), (v0, v1)) = surface.domain();
        let evaluated = [
            surface.point(u0, v0),
            surface.point(u0, v1),
            surface.point(u1, v0),
            surface.point(u1, v1),
        ];
        for (p, q) in evaluated.iter().zip(&corners) {
            prop_assert!(p.distance_to(q) < 1e-9, "corner {:?} evaluated to {:?}", q, p);
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Boolean closure and algebra on overlapping boxes
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn boolean_results_are_closed_and_bounded(offset in arb_overlap()) {
        let a = unit_box();
        let b = shifted_unit_box(offset);
        let bound = volume(&a) + volume(&b);
        for result in [union(&a, &b), subtract(&a, &b), intersect(&a, &b)] {
            match result {
                Err(BooleanError::EmptyResult) => {}
                Err(e) => prop_assert!(false, "boolean failed: {e}"),
                Ok(shape) => {
                    prop_assert!(shape.is_closed());
                    let v = volume(&shape);
                    prop_assert!(v >= -1e-9 && v <= bound + 1e-9, "volume {v} outside [0, {bound}]");
                }
            }
        }
    }

    #[test]
    fn boolean_volumes_follow_set_algebra(offset in arb_overlap()) {
        let a = unit_box();
        let b = shifted_unit_box(offset);
        let (dx, dy, dz) = offset;
        let overlap = (1.0 - dx.abs()) * (1.0 - dy.abs()) * (1.0 - dz.abs());

        let ab = volume(&union(&a, &b).unwrap());
        let ba = volume(&union(&b, &a).unwrap());
        prop_assert!((ab - ba).abs() < 1e-9);
        prop_assert!((ab - (2.0 - overlap)).abs() < 1e-9);

        let common = volume(&intersect(&a, &b).unwrap());
        prop_assert!((common - overlap).abs() < 1e-9);

        match subtract(&union(&a, &b).unwrap(), &b) {
            Ok(back) => prop_assert!((volume(&back) - (1.0 - overlap)).abs() < 1e-6),
            // Coincident operands leave nothing behind.
            Err(BooleanError::EmptyResult) => prop_assert!((overlap - 1.0).abs() < 1e-12),
            Err(e) => prop_assert!(false, "difference failed: {e}"),
        }
    }

    #[test]
    fn intersecting_a_shape_with_itself_is_identity(
        dx in arb_positive_dim(),
        dy in arb_positive_dim(),
        dz in arb_positive_dim(),
    ) {
        let a = make_box(Point3d::ORIGIN, dx, dy, dz).unwrap();
        let aa = intersect(&a, &a).unwrap();
        prop_assert!((volume(&aa) - dx * dy * dz).abs() < 1e-9 * dx * dy * dz);
    }
}

// ---------------------------------------------------------------------------
// 3. Sewing a watertight shape keeps its counts
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn sewing_is_idempotent(
        r in arb_positive_dim(),
        h in arb_positive_dim(),
        corner in arb_point(),
    ) {
        let shapes = [
            make_box(corner, r, h, r + h).unwrap(),
            make_cylinder(corner, Vec3::Z, r, h).unwrap(),
        ];
        for shape in &shapes {
            let sewn = sew(shape, 1e-6).unwrap();
            prop_assert_eq!(sewn.counts().faces, shape.counts().faces);
            prop_assert_eq!(sewn.counts().edges, shape.counts().edges);
            prop_assert_eq!(sewn.counts().vertices, shape.counts().vertices);
            prop_assert!(sewn.is_closed());
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Rigid motions and mirrors keep volume and validity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn rigid_motion_preserves_volume(
        dx in arb_positive_dim(),
        dy in arb_positive_dim(),
        dz in arb_positive_dim(),
        angle in arb_angle(),
        shift in arb_point(),
    ) {
        let b = make_box(Point3d::ORIGIN, dx, dy, dz).unwrap();
        let axis = Vec3::new(1.0, 2.0, 3.0);
        let moved = b
            .transformed(&Transform::rotation(Point3d::ORIGIN, axis, angle).unwrap())
            .transformed(&Transform::from_translation_vec(shift.to_vec3()));
        let expected = dx * dy * dz;
        prop_assert!((volume(&moved) - expected).abs() < 1e-9 * expected.max(1.0));

        let mirrored = b.transformed(&Transform::mirror(Point3d::ORIGIN, axis).unwrap());
        prop_assert!((volume(&mirrored) - expected).abs() < 1e-9 * expected.max(1.0));
        let report = check_shape(&mirrored, &ValidationConfig::full());
        prop_assert!(report.valid, "{}", report);
    }
}

// ---------------------------------------------------------------------------
// 5. Single-edge fillets remove exactly the rolling-ball corner area
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn single_edge_fillet_volume(
        dx in 1.0f64..3.0,
        dy in 1.0f64..3.0,
        dz in 1.0f64..3.0,
        r in 0.05f64..0.45,
        pick in 0usize..12,
    ) {
        let b = make_box(Point3d::ORIGIN, dx, dy, dz).unwrap();
        let edge = b.edges()[pick];
        let length = b.store().edges[edge].length();
        let rounded = fillet(&b, &[edge], &BlendProfile::Constant(r)).unwrap();
        prop_assert!(rounded.is_closed());
        let expected = dx * dy * dz - r * r * (1.0 - std::f64::consts::FRAC_PI_4) * length;
        prop_assert!((volume(&rounded) - expected).abs() < 1e-4 * expected);
    }
}
