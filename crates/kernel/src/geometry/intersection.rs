use nalgebra::{Matrix3, Vector3};

use super::curves::Ray;
use super::point::Point3d;
use super::surfaces::{Cone, Cylinder, Plane, Sphere, Surface, Torus};
use super::transform::BoundingBox;
use super::vector::Vec3;

/// Result of a ray-surface intersection.
#[derive(Debug, Clone, Copy)]
pub struct RaySurfaceHit {
    pub point: Point3d,
    pub t: f64,
    pub u: f64,
    pub v: f64,
}

// ─── Ray-Surface ─────────────────────────────────────────────────────────────

/// All intersections of `ray` (t >= 0) with `surface`, sorted by `t`.
///
/// Elementary surfaces are solved in closed form. Other surfaces are seeded
/// by a triangle grid over `uv_window` and refined by Newton iteration.
pub fn ray_surface(ray: &Ray, surface: &Surface, uv_window: ((f64, f64), (f64, f64))) -> Vec<RaySurfaceHit> {
    let ts = match surface {
        Surface::Plane(p) => ray_plane(ray, p).into_iter().collect(),
        Surface::Cylinder(c) => ray_cylinder(ray, c),
        Surface::Cone(c) => ray_cone(ray, c),
        Surface::Sphere(s) => ray_sphere(ray, s),
        Surface::Torus(t) => ray_torus(ray, t),
        _ => return ray_freeform(ray, surface, uv_window),
    };
    let mut hits: Vec<RaySurfaceHit> = ts
        .into_iter()
        .filter_map(|t| {
            let point = ray.at(t);
            let (u, v) = surface.parameters_of(&point).ok()?;
            Some(RaySurfaceHit { point, t, u, v })
        })
        .collect();
    sort_dedup(&mut hits);
    hits
}

fn sort_dedup(hits: &mut Vec<RaySurfaceHit>) {
    hits.sort_by(|a, b| a.t.total_cmp(&b.t));
    hits.dedup_by(|a, b| (a.t - b.t).abs() < 1e-9);
}

pub fn ray_plane(ray: &Ray, plane: &Plane) -> Option<f64> {
    let denom = ray.direction.dot(&plane.normal);
    if denom.abs() < 1e-15 {
        return None;
    }
    let t = (plane.origin - ray.origin).dot(&plane.normal) / denom;
    (t >= 0.0).then_some(t)
}

pub fn ray_sphere(ray: &Ray, sphere: &Sphere) -> Vec<f64> {
    let oc = ray.origin - sphere.center();
    let b = 2.0 * oc.dot(&ray.direction);
    let c = oc.dot(&oc) - sphere.radius * sphere.radius;
    non_negative(solve_quadratic(ray.direction.length_squared(), b, c))
}

/// Intersect a ray with an infinite cylinder.
pub fn ray_cylinder(ray: &Ray, cyl: &Cylinder) -> Vec<f64> {
    let axis = cyl.axis();
    let oc = ray.origin - cyl.frame.origin;
    let d_proj = ray.direction.reject_from(&axis);
    let oc_proj = oc.reject_from(&axis);

    let a = d_proj.dot(&d_proj);
    if a < 1e-15 {
        return vec![];
    }
    let b = 2.0 * d_proj.dot(&oc_proj);
    let c = oc_proj.dot(&oc_proj) - cyl.radius * cyl.radius;
    non_negative(solve_quadratic(a, b, c))
}

/// Intersect a ray with the (double) cone through the apex.
///
/// ((P - apex) . axis)² = |P - apex|² cos²(half_angle), a quadratic in t.
pub fn ray_cone(ray: &Ray, cone: &Cone) -> Vec<f64> {
    let axis = cone.frame.z;
    let co = ray.origin - cone.apex();
    let cos2 = cone.half_angle.cos().powi(2);

    let d_dot_a = ray.direction.dot(&axis);
    let co_dot_a = co.dot(&axis);

    let a = d_dot_a * d_dot_a - cos2 * ray.direction.dot(&ray.direction);
    let b = 2.0 * (d_dot_a * co_dot_a - cos2 * co.dot(&ray.direction));
    let c = co_dot_a * co_dot_a - cos2 * co.dot(&co);
    non_negative(solve_quadratic(a, b, c))
}

/// Intersect a ray with a torus.
///
/// In the torus frame (axis = Z) the implicit equation is
///   (x² + y² + z² + R² - r²)² = 4R²(x² + y²)
/// and substituting P = O + tD gives a quartic in t.
pub fn ray_torus(ray: &Ray, torus: &Torus) -> Vec<f64> {
    let big_r = torus.major_radius;
    let small_r = torus.minor_radius;

    let o = torus.frame.to_local(&ray.origin);
    let f = &torus.frame;
    let d = Vec3::new(ray.direction.dot(&f.x), ray.direction.dot(&f.y), ray.direction.dot(&f.z));

    let sum_d2 = d.length_squared();
    let sum_od = o.dot(&d);
    let sum_o2 = o.length_squared();

    let r2 = big_r * big_r;
    let s2 = small_r * small_r;
    let k = sum_o2 - r2 - s2;

    let a4 = sum_d2 * sum_d2;
    let a3 = 4.0 * sum_d2 * sum_od;
    let a2 = 2.0 * sum_d2 * k + 4.0 * sum_od * sum_od + 4.0 * r2 * d.z * d.z;
    let a1 = 4.0 * k * sum_od + 8.0 * r2 * o.z * d.z;
    let a0 = k * k - 4.0 * r2 * (s2 - o.z * o.z);

    // Polish the closed-form roots; Ferrari loses digits for thin tori.
    let polish = |mut t: f64| {
        for _ in 0..4 {
            let p = (((a4 * t + a3) * t + a2) * t + a1) * t + a0;
            let dp = ((4.0 * a4 * t + 3.0 * a3) * t + 2.0 * a2) * t + a1;
            if dp.abs() < 1e-300 {
                break;
            }
            t -= p / dp;
        }
        t
    };
    non_negative(solve_quartic(a4, a3, a2, a1, a0).into_iter().map(polish).collect())
}

fn non_negative(mut roots: Vec<f64>) -> Vec<f64> {
    roots.retain(|t| *t >= -1e-12 && t.is_finite());
    for t in &mut roots {
        *t = t.max(0.0);
    }
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    roots
}

/// Grid-seeded Newton ray intersection for surfaces without a closed form.
fn ray_freeform(ray: &Ray, surface: &Surface, window: ((f64, f64), (f64, f64))) -> Vec<RaySurfaceHit> {
    const N: usize = 16;
    let ((u0, u1), (v0, v1)) = window;
    let uv = |i: usize, j: usize| {
        (
            u0 + (u1 - u0) * i as f64 / N as f64,
            v0 + (v1 - v0) * j as f64 / N as f64,
        )
    };
    let mut grid = vec![Point3d::ORIGIN; (N + 1) * (N + 1)];
    for i in 0..=N {
        for j in 0..=N {
            let (u, v) = uv(i, j);
            grid[i * (N + 1) + j] = surface.point(u, v);
        }
    }
    let bbox = BoundingBox::from_points(&grid).expanded(1e-9);
    if ray_aabb(ray, &bbox.min, &bbox.max).is_none() {
        return vec![];
    }

    let mut hits = Vec::new();
    for i in 0..N {
        for j in 0..N {
            let corners = [(i, j), (i + 1, j), (i + 1, j + 1), (i, j + 1)];
            let p = corners.map(|(a, b)| grid[a * (N + 1) + b]);
            for tri in [[0, 1, 2], [0, 2, 3]] {
                let Some((t, b1, b2)) = ray_triangle(ray, &p[tri[0]], &p[tri[1]], &p[tri[2]]) else {
                    continue;
                };
                let c = tri.map(|k| uv(corners[k].0, corners[k].1));
                let b0 = 1.0 - b1 - b2;
                let seed = (
                    b0 * c[0].0 + b1 * c[1].0 + b2 * c[2].0,
                    b0 * c[0].1 + b1 * c[1].1 + b2 * c[2].1,
                    t,
                );
                if let Some(hit) = refine_ray_hit(ray, surface, seed, window) {
                    hits.push(hit);
                }
            }
        }
    }
    sort_dedup(&mut hits);
    hits
}

/// Solve S(u, v) = O + t D by Newton iteration from `seed`.
pub(crate) fn refine_ray_hit(
    ray: &Ray,
    surface: &Surface,
    seed: (f64, f64, f64),
    window: ((f64, f64), (f64, f64)),
) -> Option<RaySurfaceHit> {
    let (mut u, mut v, mut t) = seed;
    for _ in 0..30 {
        let d = surface.derivatives(u, v);
        let r = d.point - ray.at(t);
        if r.length() < 1e-12 {
            break;
        }
        let j = Matrix3::from_columns(&[d.du.to_na(), d.dv.to_na(), (-ray.direction).to_na()]);
        let step = j.lu().solve(&Vector3::new(-r.x, -r.y, -r.z))?;
        u += step.x;
        v += step.y;
        t += step.z;
    }
    let point = surface.point(u, v);
    let ((u0, u1), (v0, v1)) = window;
    let slack_u = 1e-9 * (1.0 + (u1 - u0).abs());
    let slack_v = 1e-9 * (1.0 + (v1 - v0).abs());
    let inside = u >= u0 - slack_u && u <= u1 + slack_u && v >= v0 - slack_v && v <= v1 + slack_v;
    (inside && t >= -1e-12 && point.distance_to(&ray.at(t)) < 1e-7).then_some(RaySurfaceHit {
        point,
        t: t.max(0.0),
        u,
        v,
    })
}

/// Möller-Trumbore; returns (t, b1, b2) with barycentrics of the 2nd and 3rd vertex.
pub fn ray_triangle(ray: &Ray, a: &Point3d, b: &Point3d, c: &Point3d) -> Option<(f64, f64, f64)> {
    let e1 = *b - *a;
    let e2 = *c - *a;
    let pvec = ray.direction.cross(&e2);
    let det = e1.dot(&pvec);
    if det.abs() < 1e-18 {
        return None;
    }
    let inv = 1.0 / det;
    let tvec = ray.origin - *a;
    let b1 = tvec.dot(&pvec) * inv;
    if !(-1e-9..=1.0 + 1e-9).contains(&b1) {
        return None;
    }
    let qvec = tvec.cross(&e1);
    let b2 = ray.direction.dot(&qvec) * inv;
    if b2 < -1e-9 || b1 + b2 > 1.0 + 1e-9 {
        return None;
    }
    let t = e2.dot(&qvec) * inv;
    (t >= -1e-9).then_some((t, b1, b2))
}

// ─── Polynomial roots ────────────────────────────────────────────────────────

/// Real roots of a*x^4 + b*x^3 + c*x^2 + d*x + e = 0 (Ferrari).
fn solve_quartic(a: f64, b: f64, c: f64, d: f64, e: f64) -> Vec<f64> {
    if a.abs() < 1e-15 {
        return solve_cubic(b, c, d, e);
    }

    let p = b / a;
    let q = c / a;
    let r = d / a;
    let s = e / a;

    // Depressed quartic via x = t - p/4: t^4 + alpha t^2 + beta t + gamma = 0
    let p2 = p * p;
    let alpha = q - 3.0 * p2 / 8.0;
    let beta = r - p * q / 2.0 + p2 * p / 8.0;
    let gamma = s - p * r / 4.0 + p2 * q / 16.0 - 3.0 * p2 * p2 / 256.0;
    let shift = -p / 4.0;

    if beta.abs() < 1e-15 {
        let disc = alpha * alpha - 4.0 * gamma;
        if disc < -1e-15 {
            return vec![];
        }
        let disc = disc.max(0.0).sqrt();
        let mut roots = Vec::new();
        for u2 in [(-alpha + disc) / 2.0, (-alpha - disc) / 2.0] {
            if u2 >= -1e-15 {
                let u = u2.max(0.0).sqrt();
                roots.push(u + shift);
                if u > 1e-10 {
                    roots.push(-u + shift);
                }
            }
        }
        return roots;
    }

    // Resolvent cubic y^3 - alpha/2 y^2 - gamma y + (alpha gamma - beta^2)/2 = 0
    let cubic_roots = solve_cubic(1.0, -alpha / 2.0, -gamma, (alpha * gamma - beta * beta) / 2.0);
    let Some(&first) = cubic_roots.first() else {
        return vec![];
    };
    let y = cubic_roots
        .iter()
        .copied()
        .find(|yr| 2.0 * yr - alpha > 1e-15)
        .unwrap_or(first);

    let w2 = 2.0 * y - alpha;
    if w2 < -1e-12 {
        return vec![];
    }
    let w = w2.max(0.0).sqrt();
    if w.abs() < 1e-12 {
        return vec![];
    }

    let mut roots = Vec::new();
    let bw = beta / (2.0 * w);
    for (sign_w, offset) in [(1.0, y + bw), (-1.0, y - bw)] {
        let disc = w * w / 4.0 - offset;
        if disc >= -1e-12 {
            let sq = disc.max(0.0).sqrt();
            roots.push(-sign_w * w / 2.0 + sq + shift);
            roots.push(-sign_w * w / 2.0 - sq + shift);
        }
    }
    roots
}

/// Real roots of a*x^3 + b*x^2 + c*x + d = 0 (Cardano / trigonometric).
fn solve_cubic(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    if a.abs() < 1e-15 {
        return solve_quadratic(b, c, d);
    }

    let p = b / a;
    let q = c / a;
    let r = d / a;

    let a_dep = q - p * p / 3.0;
    let b_dep = r - p * q / 3.0 + 2.0 * p * p * p / 27.0;
    let shift = -p / 3.0;

    let disc = -4.0 * a_dep * a_dep * a_dep - 27.0 * b_dep * b_dep;

    if disc > 1e-15 {
        let m = (-a_dep / 3.0).sqrt();
        let theta = (-b_dep / (2.0 * m * m * m)).clamp(-1.0, 1.0).acos() / 3.0;
        let two_pi_3 = 2.0 * std::f64::consts::PI / 3.0;
        vec![
            2.0 * m * theta.cos() + shift,
            2.0 * m * (theta - two_pi_3).cos() + shift,
            2.0 * m * (theta + two_pi_3).cos() + shift,
        ]
    } else {
        let half_b = b_dep / 2.0;
        let inner = half_b * half_b + a_dep * a_dep * a_dep / 27.0;
        let sqrt_inner = inner.max(0.0).sqrt();
        vec![(-half_b + sqrt_inner).cbrt() + (-half_b - sqrt_inner).cbrt() + shift]
    }
}

/// Real roots of a*x^2 + b*x + c = 0.
pub(crate) fn solve_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a.abs() < 1e-15 {
        if b.abs() < 1e-15 {
            return vec![];
        }
        return vec![-c / b];
    }
    let disc = b * b - 4.0 * a * c;
    if disc < -1e-12 * (b * b).max(1.0) {
        return vec![];
    }
    let disc = disc.max(0.0).sqrt();
    // Numerically stable pairing.
    let q = -0.5 * (b + disc.copysign(b));
    if q.abs() < 1e-300 {
        return vec![0.0];
    }
    vec![q / a, c / q]
}

// ─── Ray-AABB ────────────────────────────────────────────────────────────────

/// Entry parameter of `ray` into the box, if it hits.
pub fn ray_aabb(ray: &Ray, bb_min: &Point3d, bb_max: &Point3d) -> Option<f64> {
    let mut tmin = f64::NEG_INFINITY;
    let mut tmax = f64::INFINITY;

    let origin = ray.origin.to_array();
    let dir = ray.direction.to_array();
    let min = bb_min.to_array();
    let max = bb_max.to_array();

    for i in 0..3 {
        if dir[i].abs() < 1e-15 {
            if origin[i] < min[i] || origin[i] > max[i] {
                return None;
            }
        } else {
            let inv_d = 1.0 / dir[i];
            let mut t0 = (min[i] - origin[i]) * inv_d;
            let mut t1 = (max[i] - origin[i]) * inv_d;
            if inv_d < 0.0 {
                std::mem::swap(&mut t0, &mut t1);
            }
            tmin = tmin.max(t0);
            tmax = tmax.min(t1);
            if tmax < tmin {
                return None;
            }
        }
    }

    (tmax >= 0.0).then(|| tmin.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::frame::Frame;
    use crate::geometry::nurbs::BSplineSurface;

    fn ray(o: (f64, f64, f64), d: (f64, f64, f64)) -> Ray {
        Ray::new(Point3d::new(o.0, o.1, o.2), Vec3::new(d.0, d.1, d.2)).unwrap()
    }

    const ALL: ((f64, f64), (f64, f64)) = ((-1e3, 1e3), (-1e3, 1e3));

    #[test]
    fn test_ray_sphere_two_hits() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 2.0).unwrap());
        let hits = ray_surface(&ray((-5.0, 0.0, 0.0), (1.0, 0.0, 0.0)), &s, ALL);
        assert_eq!(hits.len(), 2);
        assert!((hits[0].t - 3.0).abs() < 1e-12);
        assert!((hits[1].t - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_ray_from_inside_sphere() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 2.0).unwrap());
        let hits = ray_surface(&ray((0.0, 0.0, 0.0), (0.0, 0.0, 1.0)), &s, ALL);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].point.z - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_ray_cylinder_and_cone() {
        let cyl = Surface::Cylinder(Cylinder::new(Frame::world(), 1.0).unwrap());
        let hits = ray_surface(&ray((-3.0, 0.0, 5.0), (1.0, 0.0, 0.0)), &cyl, ALL);
        assert_eq!(hits.len(), 2);
        assert!((hits[0].v - 5.0).abs() < 1e-12);

        let cone = Surface::Cone(Cone::new(Frame::world(), 1.0, std::f64::consts::FRAC_PI_4).unwrap());
        let hits = ray_surface(&ray((-3.0, 0.0, 0.0), (1.0, 0.0, 0.0)), &cone, ALL);
        assert_eq!(hits.len(), 2);
        for h in &hits {
            assert!((h.point.x.abs() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_ray_torus_four_hits() {
        let t = Surface::Torus(Torus::new(Frame::world(), 3.0, 1.0).unwrap());
        let hits = ray_surface(&ray((-10.0, 0.0, 0.0), (1.0, 0.0, 0.0)), &t, ALL);
        assert_eq!(hits.len(), 4);
        let xs: Vec<f64> = hits.iter().map(|h| h.point.x).collect();
        for (x, expected) in xs.iter().zip([-4.0, -2.0, 2.0, 4.0]) {
            assert!((x - expected).abs() < 1e-9, "{:?}", xs);
        }
    }

    #[test]
    fn test_ray_freeform_patch() {
        let poles: Vec<Vec<Point3d>> = (0..3)
            .map(|i| (0..3).map(|j| Point3d::new(i as f64, j as f64, if i == 1 && j == 1 { 1.0 } else { 0.0 })).collect())
            .collect();
        let s = Surface::BSpline(BSplineSurface::clamped_uniform(2, 2, poles, None).unwrap());
        let hits = ray_surface(&ray((1.0, 1.0, 5.0), (0.0, 0.0, -1.0)), &s, s.domain());
        assert_eq!(hits.len(), 1);
        assert!((hits[0].u - 0.5).abs() < 1e-9 && (hits[0].v - 0.5).abs() < 1e-9);
        assert!((hits[0].point.z - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_ray_aabb() {
        let r = ray((-5.0, 0.5, 0.5), (1.0, 0.0, 0.0));
        let t = ray_aabb(&r, &Point3d::ORIGIN, &Point3d::new(1.0, 1.0, 1.0)).unwrap();
        assert!((t - 5.0).abs() < 1e-12);
        let miss = ray((-5.0, 2.0, 0.5), (1.0, 0.0, 0.0));
        assert!(ray_aabb(&miss, &Point3d::ORIGIN, &Point3d::new(1.0, 1.0, 1.0)).is_none());
    }
}
