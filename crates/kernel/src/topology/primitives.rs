use std::f64::consts::{FRAC_PI_2, TAU};
use std::sync::Arc;

use tracing::{info, instrument};

use super::brep::*;
use super::builder::{flip_uses, ShapeBuilder};
use super::shape::Shape;
use crate::error::TopologyError;
use crate::geometry::curves::{Circle3d, Curve};
use crate::geometry::frame::Frame;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::polygon;
use crate::geometry::surfaces::{Cone, Cylinder, ExtrusionSurface, Plane, Sphere, Surface, Torus};
use crate::geometry::vector::Vec3;
use crate::Tolerance;

/// Closed planar profile swept by [`make_prism`].
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    /// Polygon vertices in order; the loop is closed implicitly.
    Polygon(Vec<Point3d>),
    Circle { center: Point3d, normal: Vec3, radius: f64 },
}

fn check_positive(name: &str, value: f64) -> Result<(), TopologyError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(TopologyError::InvalidInput(format!("{name} must be positive, got {value}")))
    }
}

fn finish_solid(mut b: ShapeBuilder, faces: Vec<FaceId>) -> Result<Shape, TopologyError> {
    let shell = b.make_shell(faces);
    let solid = b.make_solid(shell, vec![])?;
    Ok(b.finish(ShapeRef::Solid(solid)))
}

/// Planar face through a closed loop of vertices, counter-clockwise around
/// `normal`. Edges between consecutive vertices are looked up in `edges`
/// (keyed by vertex index pair) or created.
fn planar_face(
    b: &mut ShapeBuilder,
    verts: &[VertexId],
    loop_: &[usize],
    normal: Vec3,
    edges: &mut Vec<((usize, usize), EdgeId)>,
) -> Result<FaceId, TopologyError> {
    let mut uses = Vec::with_capacity(loop_.len());
    for k in 0..loop_.len() {
        let (i, j) = (loop_[k], loop_[(k + 1) % loop_.len()]);
        let key = (i.min(j), i.max(j));
        let edge = match edges.iter().find(|(k, _)| *k == key) {
            Some(&(_, e)) => e,
            None => {
                let e = b.make_line_edge(verts[key.0], verts[key.1])?;
                edges.push((key, e));
                e
            }
        };
        uses.push(OrientedEdge::new(edge, i < j));
    }
    let origin = b.store().vertices[verts[loop_[0]]].point;
    let x_hint = b.store().vertices[verts[loop_[1]]].point - origin;
    let plane = Plane::with_x(origin, normal, x_hint)?;
    let wire = b.make_wire(uses, true)?;
    b.make_face(Arc::new(Surface::Plane(plane)), wire, vec![], false)
}

/// Axis-aligned box with one corner at `corner` and extents `dx, dy, dz`.
#[instrument]
pub fn make_box(corner: Point3d, dx: f64, dy: f64, dz: f64) -> Result<Shape, TopologyError> {
    check_positive("box dx", dx)?;
    check_positive("box dy", dy)?;
    check_positive("box dz", dz)?;
    info!(dx, dy, dz, "creating box primitive");
    let (x0, y0, z0) = (corner.x, corner.y, corner.z);
    let (x1, y1, z1) = (x0 + dx, y0 + dy, z0 + dz);
    let points = [
        Point3d::new(x0, y0, z0),
        Point3d::new(x1, y0, z0),
        Point3d::new(x1, y1, z0),
        Point3d::new(x0, y1, z0),
        Point3d::new(x0, y0, z1),
        Point3d::new(x1, y0, z1),
        Point3d::new(x1, y1, z1),
        Point3d::new(x0, y1, z1),
    ];
    let mut b = ShapeBuilder::new(Tolerance::default());
    let verts: Vec<VertexId> = points.iter().map(|p| b.make_vertex(*p)).collect();

    // Loops run counter-clockwise seen from outside.
    let faces_def: [([usize; 4], Vec3); 6] = [
        ([0, 3, 2, 1], -Vec3::Z),
        ([4, 5, 6, 7], Vec3::Z),
        ([0, 1, 5, 4], -Vec3::Y),
        ([3, 7, 6, 2], Vec3::Y),
        ([0, 4, 7, 3], -Vec3::X),
        ([1, 2, 6, 5], Vec3::X),
    ];
    let mut edges = Vec::new();
    let mut faces = Vec::with_capacity(6);
    for (loop_, normal) in &faces_def {
        faces.push(planar_face(&mut b, &verts, loop_, *normal, &mut edges)?);
    }
    finish_solid(b, faces)
}

/// Side face of a swept or revolved primitive with its two parallels.
pub(crate) struct RevolvedSide {
    pub bottom: EdgeId,
    pub top: EdgeId,
    pub side: FaceId,
}

/// Side face over [0, 2π] x [0, v_top] with the seam line along u = 0.
/// Parallels with zero radius become degenerated edges.
fn revolved_side(
    b: &mut ShapeBuilder,
    surface: Surface,
    v_top: f64,
    bottom_circle: Option<Circle3d>,
    top_circle: Option<Circle3d>,
) -> Result<RevolvedSide, TopologyError> {
    let (seam, s0, s1) = Curve::segment(surface.point(0.0, 0.0), surface.point(0.0, v_top))?;
    revolved_band(b, surface, (0.0, v_top), bottom_circle, top_circle, (seam, s0, s1), false)
}

/// Band over [0, 2π] x [v0, v1] of a surface of revolution. `seam` is the
/// iso-u curve at u = 0 with its parameter range from v0 to v1.
pub(crate) fn revolved_band(
    b: &mut ShapeBuilder,
    surface: Surface,
    (v0, v1): (f64, f64),
    bottom_circle: Option<Circle3d>,
    top_circle: Option<Circle3d>,
    (seam_curve, s0, s1): (Curve, f64, f64),
    reversed: bool,
) -> Result<RevolvedSide, TopologyError> {
    let vb = b.make_vertex(surface.point(0.0, v0));
    let vt = b.make_vertex(surface.point(0.0, v1));

    let parallel = |b: &mut ShapeBuilder, circle: Option<Circle3d>, v: VertexId| match circle {
        Some(c) => b.make_edge(Arc::new(Curve::Circle(c)), 0.0, TAU, v, v),
        None => b.make_degenerate_edge(v),
    };
    let bottom = parallel(b, bottom_circle, vb)?;
    let top = parallel(b, top_circle, vt)?;
    let seam = b.make_edge(Arc::new(seam_curve), s0, s1, vb, vt)?;

    let uv = |u: f64, v: f64| Point2d::new(u, v);
    let mut uses = vec![
        OrientedEdge::with_pcurve(bottom, true, PCurve::new(uv(0.0, v0), uv(TAU, v0))),
        OrientedEdge::with_pcurve(seam, true, PCurve::new(uv(TAU, v0), uv(TAU, v1))),
        OrientedEdge::with_pcurve(top, false, PCurve::new(uv(0.0, v1), uv(TAU, v1))),
        OrientedEdge::with_pcurve(seam, false, PCurve::new(uv(0.0, v0), uv(0.0, v1))),
    ];
    if reversed {
        flip_uses(&mut uses);
    }
    let wire = b.make_wire(uses, true)?;
    let side = b.make_face(Arc::new(surface), wire, vec![], reversed)?;
    Ok(RevolvedSide {
        bottom,
        top,
        side,
    })
}

/// Planar disk face bounded by a full circle edge; `outward` is the face normal.
fn disk_face(b: &mut ShapeBuilder, circle: &Circle3d, edge: EdgeId, outward: Vec3) -> Result<FaceId, TopologyError> {
    let forward = circle.normal().dot(&outward) > 0.0;
    let plane = Plane::with_x(circle.center(), outward, circle.frame.x)?;
    let wire = b.make_wire(vec![OrientedEdge::new(edge, forward)], true)?;
    b.make_face(Arc::new(Surface::Plane(plane)), wire, vec![], false)
}

/// Right circular cylinder standing on `base` along `axis`.
#[instrument(fields(base = ?[base.x, base.y, base.z]))]
pub fn make_cylinder(base: Point3d, axis: Vec3, radius: f64, height: f64) -> Result<Shape, TopologyError> {
    check_positive("cylinder radius", radius)?;
    check_positive("cylinder height", height)?;
    info!(radius, height, "creating cylinder primitive");
    let frame = Frame::from_axis(base, axis)?;
    let top_frame = Frame {
        origin: base + frame.z * height,
        ..frame
    };
    let bottom_circle = Circle3d::with_frame(frame, radius)?;
    let top_circle = Circle3d::with_frame(top_frame, radius)?;

    let mut b = ShapeBuilder::new(Tolerance::default());
    let side = revolved_side(
        &mut b,
        Surface::Cylinder(Cylinder::new(frame, radius)?),
        height,
        Some(bottom_circle),
        Some(top_circle),
    )?;
    let bottom = disk_face(&mut b, &bottom_circle, side.bottom, -frame.z)?;
    let top = disk_face(&mut b, &top_circle, side.top, frame.z)?;
    finish_solid(b, vec![side.side, bottom, top])
}

/// Truncated cone from radius `r_bottom` at `base` to `r_top` at `height`
/// along `axis`. One radius may be zero (apex). Equal radii give a cylinder.
#[instrument(fields(base = ?[base.x, base.y, base.z]))]
pub fn make_cone(base: Point3d, axis: Vec3, r_bottom: f64, r_top: f64, height: f64) -> Result<Shape, TopologyError> {
    check_positive("cone height", height)?;
    if r_bottom < 0.0 || r_top < 0.0 || (r_bottom == 0.0 && r_top == 0.0) {
        return Err(TopologyError::InvalidInput(format!(
            "cone radii {r_bottom}, {r_top} must be non-negative and not both zero"
        )));
    }
    if (r_bottom - r_top).abs() < 1e-12 {
        return make_cylinder(base, axis, r_bottom, height);
    }
    info!(r_bottom, r_top, height, "creating cone primitive");
    let frame = Frame::from_axis(base, axis)?;
    let half_angle = ((r_top - r_bottom) / height).atan();
    let v_top = height / half_angle.cos();
    let cone = Cone::new(frame, r_bottom, half_angle)?;
    let top_frame = Frame {
        origin: base + frame.z * height,
        ..frame
    };
    let bottom_circle = (r_bottom > 0.0).then(|| Circle3d::with_frame(frame, r_bottom)).transpose()?;
    let top_circle = (r_top > 0.0).then(|| Circle3d::with_frame(top_frame, r_top)).transpose()?;

    let mut b = ShapeBuilder::new(Tolerance::default());
    let side = revolved_side(&mut b, Surface::Cone(cone), v_top, bottom_circle, top_circle)?;
    let mut faces = vec![side.side];
    if let Some(c) = &bottom_circle {
        faces.push(disk_face(&mut b, c, side.bottom, -frame.z)?);
    }
    if let Some(c) = &top_circle {
        faces.push(disk_face(&mut b, c, side.top, frame.z)?);
    }
    finish_solid(b, faces)
}

/// Sphere with poles along world z.
#[instrument(fields(center = ?[center.x, center.y, center.z]))]
pub fn make_sphere(center: Point3d, radius: f64) -> Result<Shape, TopologyError> {
    check_positive("sphere radius", radius)?;
    info!(radius, "creating sphere primitive");
    let sphere = Sphere::new(center, radius)?;
    let frame = sphere.frame;
    let mut b = ShapeBuilder::new(Tolerance::default());
    let south = b.make_vertex(center - frame.z * radius);
    let north = b.make_vertex(center + frame.z * radius);
    let meridian = Circle3d::with_frame(Frame::new(center, frame.x.cross(&frame.z), frame.x)?, radius)?;
    let seam = b.make_edge(Arc::new(Curve::Circle(meridian)), -FRAC_PI_2, FRAC_PI_2, south, north)?;
    let south_pole = b.make_degenerate_edge(south)?;
    let north_pole = b.make_degenerate_edge(north)?;

    let uv = |u: f64, v: f64| Point2d::new(u, v);
    let (lo, hi) = (-FRAC_PI_2, FRAC_PI_2);
    let wire = b.make_wire(
        vec![
            OrientedEdge::with_pcurve(south_pole, true, PCurve::new(uv(0.0, lo), uv(TAU, lo))),
            OrientedEdge::with_pcurve(seam, true, PCurve::new(uv(TAU, lo), uv(TAU, hi))),
            OrientedEdge::with_pcurve(north_pole, false, PCurve::new(uv(0.0, hi), uv(TAU, hi))),
            OrientedEdge::with_pcurve(seam, false, PCurve::new(uv(0.0, lo), uv(0.0, hi))),
        ],
        true,
    )?;
    let face = b.make_face(Arc::new(Surface::Sphere(sphere)), wire, vec![], false)?;
    finish_solid(b, vec![face])
}

/// Ring torus around `axis` through `center`.
#[instrument(fields(center = ?[center.x, center.y, center.z]))]
pub fn make_torus(center: Point3d, axis: Vec3, major_radius: f64, minor_radius: f64) -> Result<Shape, TopologyError> {
    check_positive("torus minor radius", minor_radius)?;
    info!(major_radius, minor_radius, "creating torus primitive");
    let frame = Frame::from_axis(center, axis)?;
    let torus = Torus::new(frame, major_radius, minor_radius)?;
    let mut b = ShapeBuilder::new(Tolerance::default());
    let v0 = b.make_vertex(torus_point(&torus, 0.0, 0.0));

    let equator = Circle3d::with_frame(frame, major_radius + minor_radius)?;
    let meridian_frame = Frame::new(center + frame.x * major_radius, frame.x.cross(&frame.z), frame.x)?;
    let meridian = Circle3d::with_frame(meridian_frame, minor_radius)?;
    let e_u = b.make_edge(Arc::new(Curve::Circle(equator)), 0.0, TAU, v0, v0)?;
    let e_v = b.make_edge(Arc::new(Curve::Circle(meridian)), 0.0, TAU, v0, v0)?;

    let uv = |u: f64, v: f64| Point2d::new(u, v);
    let wire = b.make_wire(
        vec![
            OrientedEdge::with_pcurve(e_u, true, PCurve::new(uv(0.0, 0.0), uv(TAU, 0.0))),
            OrientedEdge::with_pcurve(e_v, true, PCurve::new(uv(TAU, 0.0), uv(TAU, TAU))),
            OrientedEdge::with_pcurve(e_u, false, PCurve::new(uv(0.0, TAU), uv(TAU, TAU))),
            OrientedEdge::with_pcurve(e_v, false, PCurve::new(uv(0.0, 0.0), uv(0.0, TAU))),
        ],
        true,
    )?;
    let face = b.make_face(Arc::new(Surface::Torus(torus)), wire, vec![], false)?;
    finish_solid(b, vec![face])
}

fn torus_point(t: &Torus, u: f64, v: f64) -> Point3d {
    Surface::Torus(*t).point(u, v)
}

/// Extrude a closed planar profile along `direction` (its length is the
/// extrusion distance).
#[instrument(skip(profile))]
pub fn make_prism(profile: &Profile, direction: Vec3) -> Result<Shape, TopologyError> {
    match profile {
        Profile::Polygon(points) => polygon_prism(points, direction),
        Profile::Circle { center, normal, radius } => circle_prism(*center, *normal, *radius, direction),
    }
}

fn polygon_prism(points: &[Point3d], direction: Vec3) -> Result<Shape, TopologyError> {
    if points.len() < 3 {
        return Err(TopologyError::InvalidInput(format!(
            "prism profile needs at least 3 points, got {}",
            points.len()
        )));
    }
    let normal = polygon::newell_normal(points)
        .normalized()
        .ok_or_else(|| TopologyError::InvalidInput("prism profile is degenerate".into()))?;
    let origin = points[0];
    if points.iter().any(|p| (*p - origin).dot(&normal).abs() > 1e-9 * (1.0 + (*p - origin).length())) {
        return Err(TopologyError::InvalidInput("prism profile is not planar".into()));
    }
    let along = direction.dot(&normal);
    if along.abs() < 1e-9 * direction.length().max(1e-300) {
        return Err(TopologyError::InvalidInput("extrusion direction lies in the profile plane".into()));
    }
    info!(points = points.len(), distance = direction.length(), "creating prism primitive");

    // Orient the profile counter-clockwise around the extrusion direction.
    let mut base: Vec<Point3d> = points.to_vec();
    let n = if along < 0.0 {
        base.reverse();
        -normal
    } else {
        normal
    };
    let count = base.len();
    let mut b = ShapeBuilder::new(Tolerance::default());
    let mut verts: Vec<VertexId> = base.iter().map(|p| b.make_vertex(*p)).collect();
    verts.extend(base.iter().map(|p| b.make_vertex(*p + direction)));

    let mut edges = Vec::new();
    let mut faces = Vec::with_capacity(count + 2);
    let bottom: Vec<usize> = (0..count).rev().collect();
    faces.push(planar_face(&mut b, &verts, &bottom, -n, &mut edges)?);
    let top: Vec<usize> = (count..2 * count).collect();
    faces.push(planar_face(&mut b, &verts, &top, n, &mut edges)?);
    for i in 0..count {
        let j = (i + 1) % count;
        let side_normal = (base[j] - base[i]).cross(&direction);
        faces.push(planar_face(&mut b, &verts, &[i, j, j + count, i + count], side_normal, &mut edges)?);
    }
    finish_solid(b, faces)
}

fn circle_prism(center: Point3d, normal: Vec3, radius: f64, direction: Vec3) -> Result<Shape, TopologyError> {
    check_positive("prism circle radius", radius)?;
    let height = direction.length();
    check_positive("extrusion distance", height)?;
    let n = normal
        .normalized()
        .ok_or_else(|| TopologyError::InvalidInput("profile normal is zero".into()))?;
    let along = direction.dot(&n);
    if along.abs() < 1e-9 * height {
        return Err(TopologyError::InvalidInput("extrusion direction lies in the profile plane".into()));
    }
    if direction.is_parallel_to(&n, 1e-12) {
        let axis = if along > 0.0 { n } else { -n };
        return make_cylinder(center, axis, radius, height);
    }
    info!(radius, distance = height, "creating oblique circular prism");
    let axis_n = if along > 0.0 { n } else { -n };
    let frame = Frame::from_axis(center, axis_n)?;
    let bottom_circle = Circle3d::with_frame(frame, radius)?;
    let top_circle = Circle3d::with_frame(
        Frame {
            origin: center + direction,
            ..frame
        },
        radius,
    )?;
    let surface = Surface::Extrusion(ExtrusionSurface::new(Curve::Circle(bottom_circle), direction)?);
    let mut b = ShapeBuilder::new(Tolerance::default());
    let side = revolved_side(&mut b, surface, height, Some(bottom_circle), Some(top_circle))?;
    let bottom = disk_face(&mut b, &bottom_circle, side.bottom, -axis_n)?;
    let top = disk_face(&mut b, &top_circle, side.top, axis_n)?;
    finish_solid(b, vec![side.side, bottom, top])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::properties::mass_properties;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn euler_genus(shape: &Shape) -> i64 {
        let store = shape.store();
        let v = shape.vertices().len() as i64;
        let e = shape.edges().iter().filter(|&&e| !store.edges[e].degenerated).count() as i64;
        let f = shape.faces().len() as i64;
        let loops: i64 = shape.faces().iter().map(|&f| store.faces[f].wires().count() as i64).sum();
        let chi = v - e + f - (loops - f);
        (2 - chi) / 2
    }

    #[test]
    fn test_box_is_closed_with_unit_volume() {
        let shape = make_box(Point3d::new(1.0, 1.0, 1.0), 1.0, 2.0, 3.0).unwrap();
        assert!(shape.is_closed());
        assert_eq!(euler_genus(&shape), 0);
        let m = mass_properties(&shape, 1e-4).unwrap();
        assert_relative_eq!(m.volume, 6.0, epsilon = 1e-9);
        assert_relative_eq!(m.area, 22.0, epsilon = 1e-9);
        assert_relative_eq!(m.centroid.z, 2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_box_rejects_non_positive_extent() {
        assert!(make_box(Point3d::ORIGIN, 0.0, 1.0, 1.0).is_err());
        assert!(make_box(Point3d::ORIGIN, 1.0, -1.0, 1.0).is_err());
    }

    #[test]
    fn test_cylinder_topology_and_volume() {
        let shape = make_cylinder(Point3d::ORIGIN, Vec3::Z, 2.0, 3.0).unwrap();
        let c = shape.counts();
        assert_eq!((c.vertices, c.edges, c.faces), (2, 3, 3));
        assert!(shape.is_closed());
        assert_eq!(euler_genus(&shape), 0);
        let m = mass_properties(&shape, 1e-4).unwrap();
        assert_relative_eq!(m.volume, PI * 4.0 * 3.0, max_relative = 1e-4);
    }

    #[test]
    fn test_sphere_has_pole_edges() {
        let shape = make_sphere(Point3d::new(1.0, 0.0, 0.0), 10.0).unwrap();
        let store = shape.store();
        let degenerate = shape.edges().iter().filter(|&&e| store.edges[e].degenerated).count();
        assert_eq!(degenerate, 2);
        assert!(shape.is_closed());
        assert_eq!(euler_genus(&shape), 0);
        let m = mass_properties(&shape, 1e-4).unwrap();
        assert_relative_eq!(m.volume, 4.0 / 3.0 * PI * 1000.0, max_relative = 1e-4);
        assert_relative_eq!(m.centroid.x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_cone_with_apex() {
        let shape = make_cone(Point3d::ORIGIN, Vec3::Z, 1.0, 0.0, 3.0).unwrap();
        assert!(shape.is_closed());
        assert_eq!(shape.faces().len(), 2);
        let m = mass_properties(&shape, 1e-4).unwrap();
        assert_relative_eq!(m.volume, PI * 3.0 / 3.0, max_relative = 1e-4);
    }

    #[test]
    fn test_frustum_volume() {
        let shape = make_cone(Point3d::ORIGIN, Vec3::Z, 2.0, 1.0, 3.0).unwrap();
        let m = mass_properties(&shape, 1e-4).unwrap();
        let expected = PI * 3.0 / 3.0 * (4.0 + 2.0 + 1.0);
        assert_relative_eq!(m.volume, expected, max_relative = 1e-4);
    }

    #[test]
    fn test_torus_genus_one() {
        let shape = make_torus(Point3d::ORIGIN, Vec3::Z, 3.0, 1.0).unwrap();
        assert!(shape.is_closed());
        assert_eq!(euler_genus(&shape), 1);
        let m = mass_properties(&shape, 1e-4).unwrap();
        assert_relative_eq!(m.volume, 2.0 * PI * PI * 3.0, max_relative = 1e-4);
    }

    #[test]
    fn test_polygon_prism_volume_independent_of_winding() {
        let tri = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(0.0, 2.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
        ];
        let shape = make_prism(&Profile::Polygon(tri), Vec3::new(0.0, 0.0, 1.5)).unwrap();
        assert!(shape.is_closed());
        assert_eq!(shape.faces().len(), 5);
        let m = mass_properties(&shape, 1e-4).unwrap();
        assert_relative_eq!(m.volume, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_oblique_circle_prism() {
        let profile = Profile::Circle {
            center: Point3d::ORIGIN,
            normal: Vec3::Z,
            radius: 1.0,
        };
        let shape = make_prism(&profile, Vec3::new(1.0, 0.0, 2.0)).unwrap();
        assert!(shape.is_closed());
        let m = mass_properties(&shape, 1e-4).unwrap();
        assert_relative_eq!(m.volume, PI * 2.0, max_relative = 1e-4);
    }

    #[test]
    fn test_prism_rejects_in_plane_direction() {
        let square = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(1.0, 1.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
        ];
        assert!(make_prism(&Profile::Polygon(square), Vec3::X).is_err());
    }
}
