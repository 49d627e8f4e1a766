//! Planar polygon utilities on parameter-space loops: area, containment,
//! segment intersection and ear-clipping triangulation with holes.

use super::point::{Point2d, Point3d};
use super::vector::Vec3;

/// Shoelace area; positive for counter-clockwise loops.
pub fn signed_area(poly: &[Point2d]) -> f64 {
    let n = poly.len();
    if n < 3 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let a = poly[i];
            let b = poly[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        * 0.5
}

/// Newell normal of a closed 3D loop: twice the vector area, pointing
/// along the counter-clockwise side.
pub fn newell_normal(points: &[Point3d]) -> Vec3 {
    let n = points.len();
    (0..n).fold(Vec3::ZERO, |acc, i| {
        let (a, b) = (points[i], points[(i + 1) % n]);
        acc + Vec3::new((a.y - b.y) * (a.z + b.z), (a.z - b.z) * (a.x + b.x), (a.x - b.x) * (a.y + b.y))
    })
}

/// Crossing-number containment test. Points on the boundary may go either way.
pub fn point_in_polygon(p: &Point2d, poly: &[Point2d]) -> bool {
    let n = poly.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (a, b) = (poly[i], poly[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Inside `outer` and outside every hole.
pub fn point_in_region(p: &Point2d, outer: &[Point2d], holes: &[Vec<Point2d>]) -> bool {
    point_in_polygon(p, outer) && holes.iter().all(|h| !point_in_polygon(p, h))
}

/// Distance from `p` to the closed polyline `poly`.
pub fn distance_to_boundary(p: &Point2d, poly: &[Point2d]) -> f64 {
    let n = poly.len();
    (0..n)
        .map(|i| distance_to_segment(p, &poly[i], &poly[(i + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

pub fn distance_to_segment(p: &Point2d, a: &Point2d, b: &Point2d) -> f64 {
    let ab = *b - *a;
    let len2 = ab.dot(&ab);
    if len2 < 1e-300 {
        return p.distance_to(a);
    }
    let t = ((*p - *a).dot(&ab) / len2).clamp(0.0, 1.0);
    p.distance_to(&a.lerp(b, t))
}

/// Intersection parameters (s on a0-a1, t on b0-b1), both in [0, 1], of two
/// non-parallel segments.
pub fn segment_intersection(a0: &Point2d, a1: &Point2d, b0: &Point2d, b1: &Point2d) -> Option<(f64, f64)> {
    let r = *a1 - *a0;
    let s = *b1 - *b0;
    let denom = r.cross(&s);
    let scale = r.length() * s.length();
    if denom.abs() <= 1e-12 * scale || scale < 1e-300 {
        return None;
    }
    let q = *b0 - *a0;
    let u = q.cross(&s) / denom;
    let v = q.cross(&r) / denom;
    const E: f64 = 1e-12;
    ((-E..=1.0 + E).contains(&u) && (-E..=1.0 + E).contains(&v)).then(|| (u.clamp(0.0, 1.0), v.clamp(0.0, 1.0)))
}

fn proper_crossing(a0: &Point2d, a1: &Point2d, b0: &Point2d, b1: &Point2d) -> bool {
    match segment_intersection(a0, a1, b0, b1) {
        Some((s, t)) => s > 1e-9 && s < 1.0 - 1e-9 && t > 1e-9 && t < 1.0 - 1e-9,
        None => false,
    }
}

/// True when no two non-adjacent edges of the closed loop cross or touch.
pub fn is_simple(poly: &[Point2d]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    for i in 0..n {
        let (a0, a1) = (poly[i], poly[(i + 1) % n]);
        for j in (i + 1)..n {
            if j == i || (j + 1) % n == i || (i + 1) % n == j {
                continue;
            }
            let (b0, b1) = (poly[j], poly[(j + 1) % n]);
            if segment_intersection(&a0, &a1, &b0, &b1).is_some() {
                return false;
            }
        }
    }
    true
}

/// Triangulate a region given as a counter-clockwise outer loop and
/// clockwise holes. Indices refer to the concatenation `outer ++ holes[0] ++ ...`.
/// Loops of the wrong orientation are reversed first. Output triangles are
/// counter-clockwise; zero-area triangles are dropped.
pub fn triangulate(outer: &[Point2d], holes: &[Vec<Point2d>]) -> Vec<[usize; 3]> {
    let mut points: Vec<Point2d> = outer.to_vec();
    let mut ring: Vec<usize> = (0..outer.len()).collect();
    if signed_area(outer) < 0.0 {
        ring.reverse();
    }

    let mut hole_rings: Vec<Vec<usize>> = Vec::new();
    for h in holes {
        let base = points.len();
        points.extend_from_slice(h);
        let mut r: Vec<usize> = (base..base + h.len()).collect();
        if signed_area(h) > 0.0 {
            r.reverse();
        }
        if r.len() >= 3 {
            hole_rings.push(r);
        }
    }

    // Bridge holes rightmost-first so later bridges cannot cross earlier ones.
    hole_rings.sort_by(|a, b| {
        let ma = a.iter().map(|&i| points[i].x).fold(f64::NEG_INFINITY, f64::max);
        let mb = b.iter().map(|&i| points[i].x).fold(f64::NEG_INFINITY, f64::max);
        mb.total_cmp(&ma)
    });
    for k in 0..hole_rings.len() {
        let (current, rest) = hole_rings.split_at(k + 1);
        ring = bridge_hole(&points, &ring, &current[k], rest);
    }

    ear_clip(&points, ring)
}

fn bridge_hole(points: &[Point2d], ring: &[usize], hole: &[usize], pending: &[Vec<usize>]) -> Vec<usize> {
    let Some(m_pos) = (0..hole.len()).max_by(|&a, &b| points[hole[a]].x.total_cmp(&points[hole[b]].x)) else {
        return ring.to_vec();
    };
    let m = points[hole[m_pos]];

    let mut candidates: Vec<usize> = (0..ring.len()).collect();
    candidates.sort_by(|&a, &b| {
        points[ring[a]]
            .distance_to(&m)
            .total_cmp(&points[ring[b]].distance_to(&m))
    });

    let crosses_loop = |lp: &[usize], p: &Point2d| {
        let n = lp.len();
        (0..n).any(|i| proper_crossing(&m, p, &points[lp[i]], &points[lp[(i + 1) % n]]))
    };
    let chosen = candidates
        .iter()
        .copied()
        .find(|&c| {
            let p = points[ring[c]];
            !crosses_loop(ring, &p) && !crosses_loop(hole, &p) && !pending.iter().any(|h| crosses_loop(h, &p))
        })
        .unwrap_or(candidates[0]);

    let mut merged = Vec::with_capacity(ring.len() + hole.len() + 2);
    merged.extend_from_slice(&ring[..=chosen]);
    for k in 0..=hole.len() {
        merged.push(hole[(m_pos + k) % hole.len()]);
    }
    merged.extend_from_slice(&ring[chosen..]);
    merged
}

fn cross3(a: &Point2d, b: &Point2d, c: &Point2d) -> f64 {
    (*b - *a).cross(&(*c - *a))
}

/// Closed containment: points on an edge of the counter-clockwise triangle
/// count as inside.
fn inside_or_on_triangle(p: &Point2d, a: &Point2d, b: &Point2d, c: &Point2d, eps: f64) -> bool {
    cross3(a, b, p) >= -eps && cross3(b, c, p) >= -eps && cross3(c, a, p) >= -eps
}

/// Ear clipping over a ring that may repeat indices (hole bridges).
///
/// An ear is a strictly convex tip whose closed triangle holds no other
/// ring vertex; vertices coincident with the triangle's corners are bridge
/// copies and do not block. Collinear tips are never clipped on their own,
/// so every boundary point ends up in some triangle.
fn ear_clip(points: &[Point2d], mut ring: Vec<usize>) -> Vec<[usize; 3]> {
    let mut tris = Vec::with_capacity(ring.len().saturating_sub(2));
    let size = extent(ring.iter().map(|&i| points[i]));
    let eps = 1e-12 * size * size;
    let same = 1e-12 * size;

    let mut i = 0;
    let mut stalled = 0;
    while ring.len() > 3 {
        let n = ring.len();
        let at = i % n;
        let (ia, ib, ic) = (ring[(at + n - 1) % n], ring[at], ring[(at + 1) % n]);
        let (a, b, c) = (points[ia], points[ib], points[ic]);
        let convex = cross3(&a, &b, &c) > eps;
        let blocked = || {
            ring.iter().any(|&k| {
                if k == ia || k == ib || k == ic {
                    return false;
                }
                let p = points[k];
                if p.distance_to(&a) <= same || p.distance_to(&b) <= same || p.distance_to(&c) <= same {
                    return false;
                }
                inside_or_on_triangle(&p, &a, &b, &c, eps)
            })
        };
        // A full fruitless pass means the ring is not simple; take any
        // convex tip rather than stall.
        if convex && (stalled >= n || !blocked()) {
            tris.push([ia, ib, ic]);
            ring.remove(at);
            stalled = 0;
            i = (at + ring.len() - 1) % ring.len();
        } else {
            stalled += 1;
            if stalled > 2 * n {
                // Only collinear or reflex tips remain: no area left.
                return tris;
            }
            i = (at + 1) % n;
        }
    }
    if ring.len() == 3 && cross3(&points[ring[0]], &points[ring[1]], &points[ring[2]]) > eps {
        tris.push([ring[0], ring[1], ring[2]]);
    }
    tris
}

/// Largest side of the axis-aligned box around a point set.
fn extent(points: impl Iterator<Item = Point2d>) -> f64 {
    let (mut x0, mut x1, mut y0, mut y1) = (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for p in points {
        x0 = x0.min(p.x);
        x1 = x1.max(p.x);
        y0 = y0.min(p.y);
        y1 = y1.max(p.y);
    }
    if x1 >= x0 { (x1 - x0).max(y1 - y0) } else { 0.0 }
}

/// A point strictly inside the region: the centroid of the largest
/// triangle whose centroid passes the even-odd test against every loop.
pub fn interior_point(outer: &[Point2d], holes: &[Vec<Point2d>]) -> Option<Point2d> {
    let points: Vec<Point2d> = outer.iter().chain(holes.iter().flatten()).copied().collect();
    let area = |t: &[usize; 3]| cross3(&points[t[0]], &points[t[1]], &points[t[2]]);
    let centroid = |t: &[usize; 3]| {
        let (a, b, c) = (points[t[0]], points[t[1]], points[t[2]]);
        Point2d::new((a.x + b.x + c.x) / 3.0, (a.y + b.y + c.y) / 3.0)
    };
    let mut tris = triangulate(outer, holes);
    tris.sort_by(|a, b| area(b).total_cmp(&area(a)));
    tris.iter()
        .map(centroid)
        .find(|c| point_in_region(c, outer, holes))
        .or_else(|| tris.first().map(centroid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, s: f64) -> Vec<Point2d> {
        vec![
            Point2d::new(x0, y0),
            Point2d::new(x0 + s, y0),
            Point2d::new(x0 + s, y0 + s),
            Point2d::new(x0, y0 + s),
        ]
    }

    fn total_area(points: &[Point2d], tris: &[[usize; 3]]) -> f64 {
        tris.iter()
            .map(|t| signed_area(&[points[t[0]], points[t[1]], points[t[2]]]))
            .sum()
    }

    #[test]
    fn test_interior_point_of_curved_annulus() {
        let outer = square(0.0, 0.0, 4.0);
        let ring: Vec<Point2d> = (0..48)
            .map(|i| {
                let a = std::f64::consts::TAU * i as f64 / 48.0;
                Point2d::new(2.0 + 1.5 * a.cos(), 2.0 + 1.5 * a.sin())
            })
            .collect();
        let p = interior_point(&outer, &[ring.clone()]).unwrap();
        assert!(point_in_region(&p, &outer, &[ring.clone()]));
        assert!(p.distance_to(&Point2d::new(2.0, 2.0)) > 1.5);

        // A thin annulus between two circles.
        let mut inner: Vec<Point2d> = ring
            .iter()
            .map(|q| Point2d::new(2.0 + (q.x - 2.0) * 0.9, 2.0 + (q.y - 2.0) * 0.9))
            .collect();
        inner.reverse();
        let p = interior_point(&ring, &[inner.clone()]).unwrap();
        let r = p.distance_to(&Point2d::new(2.0, 2.0));
        assert!(r > 1.35 && r < 1.5, "{r}");
    }

    #[test]
    fn test_signed_area_orientation() {
        let sq = square(0.0, 0.0, 2.0);
        assert!((signed_area(&sq) - 4.0).abs() < 1e-12);
        let mut rev = sq.clone();
        rev.reverse();
        assert!((signed_area(&rev) + 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_point_in_region_with_hole() {
        let outer = square(0.0, 0.0, 4.0);
        let hole = square(1.0, 1.0, 2.0);
        assert!(point_in_region(&Point2d::new(0.5, 0.5), &outer, &[hole.clone()]));
        assert!(!point_in_region(&Point2d::new(2.0, 2.0), &outer, &[hole]));
        assert!(!point_in_polygon(&Point2d::new(5.0, 2.0), &outer));
    }

    #[test]
    fn test_concave_polygon_triangulation() {
        let l_shape = vec![
            Point2d::new(0.0, 0.0),
            Point2d::new(2.0, 0.0),
            Point2d::new(2.0, 1.0),
            Point2d::new(1.0, 1.0),
            Point2d::new(1.0, 2.0),
            Point2d::new(0.0, 2.0),
        ];
        let tris = triangulate(&l_shape, &[]);
        assert_eq!(tris.len(), 4);
        assert!((total_area(&l_shape, &tris) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_reflex_vertex_on_diagonal_blocks_ear() {
        // The reflex corner (1, 1) lies exactly on the diagonal (0, 2)-(2, 0).
        let l_shape = vec![
            Point2d::new(0.0, 0.0),
            Point2d::new(2.0, 0.0),
            Point2d::new(2.0, 1.0),
            Point2d::new(1.0, 1.0),
            Point2d::new(1.0, 2.0),
            Point2d::new(0.0, 2.0),
        ];
        for t in triangulate(&l_shape, &[]) {
            let c = Point2d::new(
                (l_shape[t[0]].x + l_shape[t[1]].x + l_shape[t[2]].x) / 3.0,
                (l_shape[t[0]].y + l_shape[t[1]].y + l_shape[t[2]].y) / 3.0,
            );
            assert!(point_in_polygon(&c, &l_shape), "triangle {t:?} leaves the region");
        }
    }

    #[test]
    fn test_collinear_boundary_points_are_kept() {
        // Rectangle with extra samples along the bottom and top sides.
        let mut ring: Vec<Point2d> = (0..=6).map(|i| Point2d::new(i as f64, 0.0)).collect();
        ring.extend((0..=6).rev().map(|i| Point2d::new(i as f64, 1.0)));
        let tris = triangulate(&ring, &[]);
        assert_eq!(tris.len(), ring.len() - 2);
        assert!((total_area(&ring, &tris) - 6.0).abs() < 1e-12);
        for i in 0..ring.len() {
            assert!(tris.iter().any(|t| t.contains(&i)), "vertex {i} dropped");
        }
    }

    #[test]
    fn test_triangulation_with_hole_preserves_area() {
        let outer = square(0.0, 0.0, 4.0);
        let hole = square(1.0, 1.0, 2.0);
        let tris = triangulate(&outer, &[hole.clone()]);
        let points: Vec<Point2d> = outer.iter().chain(hole.iter()).copied().collect();
        assert!((total_area(&points, &tris) - 12.0).abs() < 1e-9);
        for t in &tris {
            let c = Point2d::new(
                (points[t[0]].x + points[t[1]].x + points[t[2]].x) / 3.0,
                (points[t[0]].y + points[t[1]].y + points[t[2]].y) / 3.0,
            );
            assert!(!point_in_polygon(&c, &hole));
        }
    }

    #[test]
    fn test_self_intersection_detected() {
        let bowtie = vec![
            Point2d::new(0.0, 0.0),
            Point2d::new(1.0, 1.0),
            Point2d::new(1.0, 0.0),
            Point2d::new(0.0, 1.0),
        ];
        assert!(!is_simple(&bowtie));
        assert!(is_simple(&square(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_interior_point_avoids_hole() {
        let outer = square(0.0, 0.0, 4.0);
        let hole = square(0.5, 0.5, 3.0);
        let p = interior_point(&outer, &[hole.clone()]).unwrap();
        assert!(point_in_region(&p, &outer, &[hole]));
    }

    #[test]
    fn test_newell_normal_of_tilted_square() {
        let pts = [
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(1.0, 1.0, 1.0),
            Point3d::new(0.0, 1.0, 1.0),
        ];
        let n = newell_normal(&pts);
        assert!((n - Vec3::new(0.0, -2.0, 2.0)).length() < 1e-12);
    }
}
