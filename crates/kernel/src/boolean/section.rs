//! Face/face sections.
//!
//! The surfaces of two faces are intersected in closed form when a formula
//! exists and marched numerically otherwise. Each intersection curve is
//! sampled, clipped to the closed regions of both faces, and the clip points
//! are pulled onto the boundary edge that caused them. The surviving pieces
//! ("strands") are shared verbatim by both faces so their splits agree.

use std::sync::Arc;

use nalgebra::{Matrix3, Vector3};
use tracing::trace;

use crate::geometry::curves::{Curve, Line3d};
use crate::geometry::nurbs::BSplineCurve;
use crate::geometry::point::Point3d;
use crate::geometry::surface_intersection::{analytic_intersection, SurfaceIntersection};
use crate::geometry::surfaces::Surface;
use crate::geometry::transform::BoundingBox;
use crate::geometry::vector::Vec3;
use crate::Tolerance;

use super::operand::{merge_tolerance, project_on_range, segment_distance, FaceData};
use super::{BooleanError, BooleanOptions};

const SEED_GRID: usize = 16;
const MAX_MARCH_STEPS: usize = 5000;
const SAMPLING_ANGLE: f64 = 0.2;

/// A piece of an intersection curve lying in both faces.
#[derive(Debug, Clone)]
pub struct Strand {
    pub curve: Arc<Curve>,
    /// Ascending curve parameters with their points.
    pub samples: Vec<(f64, Point3d)>,
    /// Face index within operand A.
    pub face_a: usize,
    /// Face index within operand B.
    pub face_b: usize,
}

impl Strand {
    /// `curve` over `[first, last]`, sampled like a computed section, as a
    /// cut of face `face` alone.
    pub(crate) fn along(curve: Arc<Curve>, first: f64, last: f64, face: usize, options: &BooleanOptions) -> Self {
        let samples = curve
            .discretize(first, last, options.section_deflection, SAMPLING_ANGLE, 0.0)
            .into_iter()
            .map(|t| (t, curve.point(t)))
            .collect();
        Self {
            curve,
            samples,
            face_a: face,
            face_b: face,
        }
    }

    pub fn length(&self) -> f64 {
        self.samples.windows(2).map(|w| w[0].1.distance_to(&w[1].1)).sum()
    }
}

/// Intersection of two boxes, or `None` when they are disjoint.
pub fn overlap(a: &BoundingBox, b: &BoundingBox) -> Option<BoundingBox> {
    let min = Point3d::new(a.min.x.max(b.min.x), a.min.y.max(b.min.y), a.min.z.max(b.min.z));
    let max = Point3d::new(a.max.x.min(b.max.x), a.max.y.min(b.max.y), a.max.z.min(b.max.z));
    (min.x <= max.x && min.y <= max.y && min.z <= max.z).then(|| BoundingBox::new(min, max))
}

/// Strands of `fa ∩ fb`. Coincident or tangent surfaces yield none: the
/// classifier resolves overlapping regions.
pub fn section_faces(
    fa: &FaceData,
    ia: usize,
    fb: &FaceData,
    ib: usize,
    options: &BooleanOptions,
) -> Result<Vec<Strand>, BooleanError> {
    let Some(window) = overlap(&fa.bbox, &fb.bbox) else {
        return Ok(Vec::new());
    };
    let window = window.expanded(options.tolerance);
    let tol = Tolerance::with_coincidence(options.tolerance);
    let curves = match analytic_intersection(&fa.surface, &fb.surface, &tol) {
        Some(SurfaceIntersection::Curves(curves)) => curves,
        Some(_) => return Ok(Vec::new()),
        None => march(fa, fb, &window, options),
    };

    let merge = merge_tolerance(options);
    let mut strands = Vec::new();
    for curve in curves {
        let curve = Arc::new(curve);
        let Some((t0, t1, closed)) = curve_range(&curve, &window) else {
            continue;
        };
        let params = sample_parameters(&curve, t0, t1, &window, options);
        for samples in clip(&curve, &params, closed, fa, fb, options) {
            let strand = Strand {
                curve: curve.clone(),
                samples,
                face_a: ia,
                face_b: ib,
            };
            if strand.samples.len() >= 2 && strand.length() > merge {
                strands.push(strand);
            }
        }
    }
    trace!(ia, ib, strands = strands.len(), "face pair sectioned");
    Ok(strands)
}

/// Parameter range of `curve` worth sampling inside `window`, and whether
/// it is a full closed period.
fn curve_range(curve: &Curve, window: &BoundingBox) -> Option<(f64, f64, bool)> {
    if let Some(period) = curve.period() {
        let (a, _) = curve.domain();
        return Some((a, a + period, true));
    }
    let (a, b) = curve.domain();
    if a.is_finite() && b.is_finite() {
        let closed = curve.point(a).distance_to(&curve.point(b)) <= 1e-12 * (1.0 + window.diagonal());
        return Some((a, b, closed));
    }
    match curve {
        Curve::Line(line) => line_window(line, window).map(|(a, b)| (a, b, false)),
        _ => {
            let mut half = window.diagonal().max(1.0);
            for _ in 0..40 {
                if !window.contains_point(&curve.point(-half)) && !window.contains_point(&curve.point(half)) {
                    break;
                }
                half *= 2.0;
            }
            Some((-half, half, false))
        }
    }
}

/// Slab clip of an infinite line against a box.
fn line_window(line: &Line3d, window: &BoundingBox) -> Option<(f64, f64)> {
    let o = [line.origin.x, line.origin.y, line.origin.z];
    let d = [line.direction.x, line.direction.y, line.direction.z];
    let lo_b = [window.min.x, window.min.y, window.min.z];
    let hi_b = [window.max.x, window.max.y, window.max.z];
    let (mut lo, mut hi) = (f64::NEG_INFINITY, f64::INFINITY);
    for k in 0..3 {
        if d[k].abs() < 1e-15 {
            if o[k] < lo_b[k] || o[k] > hi_b[k] {
                return None;
            }
            continue;
        }
        let t1 = (lo_b[k] - o[k]) / d[k];
        let t2 = (hi_b[k] - o[k]) / d[k];
        lo = lo.max(t1.min(t2));
        hi = hi.min(t1.max(t2));
    }
    (hi > lo).then_some((lo, hi))
}

/// Curve parameters within deflection, refined inside `window` so that
/// clipping never skips a short face.
fn sample_parameters(curve: &Curve, t0: f64, t1: f64, window: &BoundingBox, options: &BooleanOptions) -> Vec<f64> {
    let coarse = curve.discretize(t0, t1, options.section_deflection, SAMPLING_ANGLE, 0.0);
    let max_step = (window.diagonal() / 64.0).max(merge_tolerance(options));
    let mut out = Vec::with_capacity(coarse.len());
    for w in coarse.windows(2) {
        let (a, b) = (w[0], w[1]);
        out.push(a);
        let (pa, pb) = (curve.point(a), curve.point(b));
        let chord = BoundingBox::from_points(&[pa, pb]);
        if !chord.intersects(window) {
            continue;
        }
        let n = (pa.distance_to(&pb) / max_step).ceil() as usize;
        for k in 1..n.min(4096) {
            out.push(a + (b - a) * k as f64 / n as f64);
        }
    }
    if let Some(&last) = coarse.last() {
        out.push(last);
    }
    out
}

/// Runs of the sampled curve inside both closed face regions. Run ends
/// produced by clipping are bisected and then refined onto the boundary.
fn clip(
    curve: &Curve,
    params: &[f64],
    closed: bool,
    fa: &FaceData,
    fb: &FaceData,
    options: &BooleanOptions,
) -> Vec<Vec<(f64, Point3d)>> {
    let inside = |p: &Point3d| {
        fa.bbox.contains_point(p) && fb.bbox.contains_point(p) && fa.contains_point(p) && fb.contains_point(p)
    };
    let points: Vec<Point3d> = params.iter().map(|&t| curve.point(t)).collect();
    let status: Vec<bool> = points.iter().map(|p| inside(p)).collect();
    let n = params.len();
    let merge = merge_tolerance(options);

    let mut runs = Vec::new();
    let mut k = 0;
    while k < n {
        if !status[k] {
            k += 1;
            continue;
        }
        let start = k;
        while k + 1 < n && status[k + 1] {
            k += 1;
        }
        let end = k;
        k += 1;

        let lead = if start > 0 {
            let t = bisect(curve, params[start], params[start - 1], &inside);
            refine_end(curve, t, (params[start - 1], params[start]), fa, fb, options)
        } else if closed {
            (params[0], points[0])
        } else {
            refine_end(curve, params[0], (params[0], params[1.min(n - 1)]), fa, fb, options)
        };
        let tail = if end + 1 < n {
            let t = bisect(curve, params[end], params[end + 1], &inside);
            refine_end(curve, t, (params[end], params[end + 1]), fa, fb, options)
        } else if closed {
            (params[n - 1], points[n - 1])
        } else {
            refine_end(curve, params[n - 1], (params[n.saturating_sub(2)], params[n - 1]), fa, fb, options)
        };
        let first_interior = if start > 0 { start } else { start + 1 };
        let interior_end = if end + 1 < n { end + 1 } else { end };
        let mut run = vec![lead];
        run.extend((first_interior..interior_end).map(|j| (params[j], points[j])));
        run.push(tail);
        dedupe_samples(&mut run, merge);
        if run.len() >= 2 {
            runs.push(run);
        }
    }
    runs
}

fn dedupe_samples(run: &mut Vec<(f64, Point3d)>, merge: f64) {
    if run.len() < 3 {
        return;
    }
    let last = run[run.len() - 1];
    let mut out: Vec<(f64, Point3d)> = Vec::with_capacity(run.len());
    for &s in &run[..run.len() - 1] {
        if out.last().is_none_or(|q| q.1.distance_to(&s.1) > merge) {
            out.push(s);
        }
    }
    while out.len() > 1 && out[out.len() - 1].1.distance_to(&last.1) <= merge {
        out.pop();
    }
    out.push(last);
    *run = out;
}

/// Last parameter between `t_in` and `t_out` still inside.
fn bisect(curve: &Curve, t_in: f64, t_out: f64, inside: &dyn Fn(&Point3d) -> bool) -> f64 {
    let (mut a, mut b) = (t_in, t_out);
    for _ in 0..60 {
        let m = 0.5 * (a + b);
        if inside(&curve.point(m)) {
            a = m;
        } else {
            b = m;
        }
        if (b - a).abs() <= 1e-14 * (1.0 + a.abs()) {
            break;
        }
    }
    a
}

/// Alternate projections between the section curve and the nearest boundary
/// edge of either face until they meet.
fn refine_end(
    curve: &Curve,
    t: f64,
    bracket: (f64, f64),
    fa: &FaceData,
    fb: &FaceData,
    options: &BooleanOptions,
) -> (f64, Point3d) {
    let p0 = curve.point(t);
    let nearest = [fa.nearest_edge(&p0), fb.nearest_edge(&p0)]
        .into_iter()
        .flatten()
        .min_by(|a, b| a.2.distance_squared_to(&p0).total_cmp(&b.2.distance_squared_to(&p0)));
    let Some((edge, _, _)) = nearest else {
        return (t, p0);
    };
    let (lo, hi) = if bracket.0 <= bracket.1 { bracket } else { (bracket.1, bracket.0) };
    let (mut t_cur, mut p) = (t, p0);
    for _ in 0..options.max_iterations {
        let (_, q) = edge.project(&p);
        let (t_next, p_next) = project_on_range(curve, lo, hi, &q);
        let moved = p_next.distance_to(&p);
        t_cur = t_next;
        p = p_next;
        if p.distance_to(&q) <= 0.1 * options.tolerance || moved <= 1e-3 * options.tolerance {
            break;
        }
    }
    let reach = 10.0 * fa.band.max(fb.band) + curve.point(lo).distance_to(&curve.point(hi));
    if p.distance_to(&p0) > reach {
        return (t, p0);
    }
    (t_cur, p)
}

// ─── Marching ────────────────────────────────────────────────────────────────

/// Polyline approximations of `fa.surface ∩ fb.surface` inside `window`,
/// seeded from sign changes of the distance to B over a grid on A.
fn march(fa: &FaceData, fb: &FaceData, window: &BoundingBox, options: &BooleanOptions) -> Vec<Curve> {
    let (sa, sb) = (fa.surface.as_ref(), fb.surface.as_ref());
    let h = (window.diagonal() / 100.0).max(100.0 * options.tolerance);
    let ((u0, u1), (v0, v1)) = fa.domain.bounds();

    let signed = |p: &Point3d| -> Option<f64> {
        let (q, u, v) = sb.project(p).ok()?;
        let n = sb.normal(u, v).ok()?;
        Some((*p - q).dot(&n))
    };
    let g = SEED_GRID;
    let mut grid: Vec<Option<(Point3d, f64)>> = Vec::with_capacity((g + 1) * (g + 1));
    for i in 0..=g {
        for j in 0..=g {
            let u = u0 + (u1 - u0) * i as f64 / g as f64;
            let v = v0 + (v1 - v0) * j as f64 / g as f64;
            let p = sa.point(u, v);
            grid.push(if window.contains_point(&p) { signed(&p).map(|d| (p, d)) } else { None });
        }
    }
    let at = |i: usize, j: usize| grid[i * (g + 1) + j];

    let mut seeds = Vec::new();
    for i in 0..=g {
        for j in 0..=g {
            let here = at(i, j);
            for next in [(i + 1 <= g).then(|| at(i + 1, j)), (j + 1 <= g).then(|| at(i, j + 1))]
                .into_iter()
                .flatten()
            {
                if let (Some((p, d)), Some((q, e))) = (here, next) {
                    if d * e < 0.0 {
                        let guess = p.lerp(&q, d / (d - e));
                        if let Some(s) = settle(sa, sb, guess, options) {
                            seeds.push(s);
                        }
                    }
                }
            }
        }
    }

    let mut polylines: Vec<Vec<Point3d>> = Vec::new();
    for seed in seeds {
        let known = polylines
            .iter()
            .any(|pl| pl.windows(2).any(|w| segment_distance(&seed, &w[0], &w[1]) < 1.5 * h));
        if known {
            continue;
        }
        let (forward, closed) = trace(sa, sb, seed, 1.0, h, window, options);
        let points = if closed {
            forward
        } else {
            let (mut backward, _) = trace(sa, sb, seed, -1.0, h, window, options);
            backward.reverse();
            backward.pop();
            backward.extend(forward);
            backward
        };
        if points.len() >= 2 {
            polylines.push(points);
        }
    }
    polylines
        .into_iter()
        .filter_map(|pl| BSplineCurve::polyline(&pl).ok().map(Curve::BSpline))
        .collect()
}

/// Unit tangent of the intersection at `p`, or `None` where the surfaces
/// are tangent or singular.
fn section_tangent(sa: &Surface, sb: &Surface, p: &Point3d) -> Option<Vec3> {
    let (_, ua, va) = sa.project(p).ok()?;
    let (_, ub, vb) = sb.project(p).ok()?;
    let t = sa.normal(ua, va).ok()?.cross(&sb.normal(ub, vb).ok()?);
    if t.length() < 1e-9 {
        return None;
    }
    t.normalized()
}

/// Newton iteration on both tangent planes plus the normal plane of the
/// section through the current point.
fn settle(sa: &Surface, sb: &Surface, start: Point3d, options: &BooleanOptions) -> Option<Point3d> {
    let mut p = start;
    for _ in 0..options.max_iterations {
        let (qa, ua, va) = sa.project(&p).ok()?;
        let (qb, ub, vb) = sb.project(&p).ok()?;
        let na = sa.normal(ua, va).ok()?;
        let nb = sb.normal(ub, vb).ok()?;
        let t = na.cross(&nb);
        if t.length() < 1e-9 {
            return None;
        }
        let m = Matrix3::new(na.x, na.y, na.z, nb.x, nb.y, nb.z, t.x, t.y, t.z);
        let rhs = Vector3::new(na.dot(&qa.to_vec3()), nb.dot(&qb.to_vec3()), t.dot(&p.to_vec3()));
        let x = m.lu().solve(&rhs)?;
        let next = Point3d::new(x[0], x[1], x[2]);
        let step = next.distance_to(&p);
        p = next;
        if step <= 1e-3 * options.tolerance {
            break;
        }
    }
    let da = sa.project(&p).ok()?.0.distance_to(&p);
    let db = sb.project(&p).ok()?.0.distance_to(&p);
    (da.max(db) <= options.tolerance).then_some(p)
}

/// March from `seed` in direction `sign` until the window is left, the
/// surfaces become tangent, or the trace closes on its seed.
fn trace(
    sa: &Surface,
    sb: &Surface,
    seed: Point3d,
    sign: f64,
    h: f64,
    window: &BoundingBox,
    options: &BooleanOptions,
) -> (Vec<Point3d>, bool) {
    let mut points = vec![seed];
    let mut p = seed;
    let mut prev: Option<Vec3> = None;
    for _ in 0..MAX_MARCH_STEPS {
        let Some(mut dir) = section_tangent(sa, sb, &p).map(|t| t * sign) else {
            break;
        };
        if let Some(d) = prev {
            if d.dot(&dir) < 0.0 {
                dir = -dir;
            }
        }
        let mut step = h;
        let mut next = None;
        for _ in 0..8 {
            if let Some(q) = settle(sa, sb, p + dir * step, options) {
                let turn = section_tangent(sa, sb, &q).map(|t| t.dot(&dir).abs()).unwrap_or(0.0);
                if turn >= SAMPLING_ANGLE.cos() && q.distance_to(&p) > 0.2 * step {
                    next = Some(q);
                    break;
                }
            }
            step *= 0.5;
        }
        let Some(q) = next else {
            break;
        };
        if points.len() > 3 && segment_distance(&seed, &p, &q) < 0.5 * step {
            points.push(seed);
            return (points, true);
        }
        points.push(q);
        if !window.expanded(step).contains_point(&q) {
            break;
        }
        p = q;
        prev = Some(dir);
    }
    (points, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::operand::Operand;
    use crate::topology::primitives::{make_box, make_cylinder, make_torus};
    use approx::assert_relative_eq;

    fn face_with_normal(op: &Operand<'_>, n: Vec3) -> usize {
        op.faces
            .iter()
            .position(|f| {
                matches!(f.surface.as_ref(), Surface::Plane(_))
                    && f.outward_normal(0.0, 0.0).dot(&n) > 0.99
            })
            .unwrap()
    }

    #[test]
    fn test_overlapping_box_faces_share_clipped_segment() {
        let options = BooleanOptions::default();
        let a = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let b = make_box(Point3d::new(0.5, 0.5, 0.5), 1.0, 1.0, 1.0).unwrap();
        let (oa, ob) = (Operand::prepare(&a, &options).unwrap(), Operand::prepare(&b, &options).unwrap());
        // A's top (z = 1) against B's left side (x = 0.5).
        let ia = face_with_normal(&oa, Vec3::Z);
        let ib = face_with_normal(&ob, -Vec3::X);
        let strands = section_faces(&oa.faces[ia], ia, &ob.faces[ib], ib, &options).unwrap();
        assert_eq!(strands.len(), 1);
        let s = &strands[0];
        let (p, q) = (s.samples[0].1, s.samples[s.samples.len() - 1].1);
        assert_relative_eq!(p.distance_to(&q), 0.5, epsilon = 1e-9);
        for pt in [p, q] {
            assert_relative_eq!(pt.x, 0.5, epsilon = 1e-9);
            assert_relative_eq!(pt.z, 1.0, epsilon = 1e-9);
            assert!(pt.y > 0.5 - 1e-9 && pt.y < 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_parallel_faces_have_no_section() {
        let options = BooleanOptions::default();
        let a = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let b = make_box(Point3d::new(0.5, 0.0, 0.0), 1.0, 1.0, 1.0).unwrap();
        let (oa, ob) = (Operand::prepare(&a, &options).unwrap(), Operand::prepare(&b, &options).unwrap());
        let ia = face_with_normal(&oa, Vec3::Z);
        let ib = face_with_normal(&ob, Vec3::Z);
        assert!(section_faces(&oa.faces[ia], ia, &ob.faces[ib], ib, &options).unwrap().is_empty());
    }

    #[test]
    fn test_cylinder_through_box_top_is_a_full_circle() {
        let options = BooleanOptions::default();
        let a = make_box(Point3d::ORIGIN, 2.0, 2.0, 1.0).unwrap();
        let b = make_cylinder(Point3d::new(1.0, 1.0, -1.0), Vec3::Z, 0.5, 3.0).unwrap();
        let (oa, ob) = (Operand::prepare(&a, &options).unwrap(), Operand::prepare(&b, &options).unwrap());
        let ia = face_with_normal(&oa, Vec3::Z);
        let ib = ob
            .faces
            .iter()
            .position(|f| matches!(f.surface.as_ref(), Surface::Cylinder(_)))
            .unwrap();
        let strands = section_faces(&oa.faces[ia], ia, &ob.faces[ib], ib, &options).unwrap();
        assert_eq!(strands.len(), 1);
        assert_relative_eq!(strands[0].length(), std::f64::consts::PI, max_relative = 1e-3);
        for (_, p) in &strands[0].samples {
            assert_relative_eq!(p.z, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_marched_torus_plane_section_stays_on_both_surfaces() {
        let options = BooleanOptions::default();
        let a = make_box(Point3d::new(-3.0, -3.0, 0.2), 6.0, 6.0, 2.0).unwrap();
        let b = make_torus(Point3d::ORIGIN, Vec3::Z, 2.0, 0.5).unwrap();
        let (oa, ob) = (Operand::prepare(&a, &options).unwrap(), Operand::prepare(&b, &options).unwrap());
        let ia = face_with_normal(&oa, -Vec3::Z);
        let strands = section_faces(&oa.faces[ia], ia, &ob.faces[0], 0, &options).unwrap();
        assert_eq!(strands.len(), 2);
        let torus = ob.faces[0].surface.clone();
        for s in &strands {
            for (_, p) in &s.samples {
                assert_relative_eq!(p.z, 0.2, epsilon = 1e-6);
                let (q, _, _) = torus.project(p).unwrap();
                assert!(q.distance_to(p) < 1e-3);
            }
        }
        let mut lengths: Vec<f64> = strands.iter().map(Strand::length).collect();
        lengths.sort_by(f64::total_cmp);
        let r = (0.25f64 - 0.04).sqrt();
        assert_relative_eq!(lengths[0], 2.0 * std::f64::consts::PI * (2.0 - r), max_relative = 1e-3);
        assert_relative_eq!(lengths[1], 2.0 * std::f64::consts::PI * (2.0 + r), max_relative = 1e-3);
    }
}
