use tracing::trace;

use crate::geometry::curves::Ray;
use crate::geometry::intersection::ray_surface;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::vector::Vec3;

use super::operand::{merge_tolerance, Operand};
use super::{BooleanError, BooleanOptions};

/// Position of a sub-face relative to the other operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    In,
    Out,
    /// On the other boundary with the same outward orientation.
    OnSame,
    /// On the other boundary, facing the other way.
    OnOpposite,
}

/// Off-axis directions so rays rarely graze edges of axis-aligned models.
const RAY_DIRECTIONS: [(f64, f64, f64); 5] = [
    (0.5773, 0.6123, 0.5401),
    (-0.7071, 0.3347, 0.6229),
    (0.2113, -0.8944, 0.3941),
    (-0.3162, -0.4472, -0.8367),
    (0.8629, -0.1913, -0.4677),
];

/// Classify `p`, a sample of a sub-face with outward `normal`, against
/// the closed solid `other`.
pub fn classify_point(
    p: &Point3d,
    normal: &Vec3,
    other: &Operand<'_>,
    options: &BooleanOptions,
) -> Result<Classification, BooleanError> {
    let merge = merge_tolerance(options);
    if !other.bbox.contains_point(p) {
        return Ok(Classification::Out);
    }

    for face in &other.faces {
        if !face.bbox.contains_point(p) {
            continue;
        }
        let Ok((q, u, v)) = face.surface.project(p) else {
            continue;
        };
        if q.distance_to(p) > merge {
            continue;
        }
        if face.domain.contains(Point2d::new(u, v)) || face.boundary_distance(p) <= merge {
            let n = face.outward_normal(u, v);
            return Ok(if n.dot(normal) >= 0.0 {
                Classification::OnSame
            } else {
                Classification::OnOpposite
            });
        }
    }

    let mut odd = 0;
    for &(x, y, z) in &RAY_DIRECTIONS {
        let ray = Ray::new(*p, Vec3::new(x, y, z))?;
        let mut ts: Vec<f64> = Vec::new();
        for face in &other.faces {
            for hit in ray_surface(&ray, &face.surface, face.window()) {
                if hit.t > merge && face.domain.contains(Point2d::new(hit.u, hit.v)) {
                    ts.push(hit.t);
                }
            }
        }
        ts.sort_by(f64::total_cmp);
        ts.dedup_by(|a, b| (*a - *b).abs() <= options.tolerance);
        if ts.len() % 2 == 1 {
            odd += 1;
        }
    }
    trace!(?p, odd, "ray parity");
    Ok(if odd * 2 > RAY_DIRECTIONS.len() { Classification::In } else { Classification::Out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::primitives::{make_box, make_sphere};

    #[test]
    fn test_box_classification() {
        let options = BooleanOptions::default();
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let op = Operand::prepare(&b, &options).unwrap();
        let c = |p: Point3d, n: Vec3| classify_point(&p, &n, &op, &options).unwrap();
        assert_eq!(c(Point3d::new(0.5, 0.5, 0.5), Vec3::Z), Classification::In);
        assert_eq!(c(Point3d::new(1.5, 0.5, 0.5), Vec3::Z), Classification::Out);
        assert_eq!(c(Point3d::new(0.3, 0.6, 1.0), Vec3::Z), Classification::OnSame);
        assert_eq!(c(Point3d::new(0.3, 0.6, 1.0), -Vec3::Z), Classification::OnOpposite);
        assert_eq!(c(Point3d::new(1.0, 0.5, 0.5), Vec3::X), Classification::OnSame);
    }

    #[test]
    fn test_sphere_classification_by_rays() {
        let options = BooleanOptions::default();
        let s = make_sphere(Point3d::new(1.0, 1.0, 1.0), 1.0).unwrap();
        let op = Operand::prepare(&s, &options).unwrap();
        let c = |p: Point3d| classify_point(&p, &Vec3::Z, &op, &options).unwrap();
        assert_eq!(c(Point3d::new(1.0, 1.0, 1.0)), Classification::In);
        assert_eq!(c(Point3d::new(1.5, 1.5, 1.5)), Classification::In);
        // Inside the bounding box, outside the ball.
        assert_eq!(c(Point3d::new(1.9, 1.9, 1.9)), Classification::Out);
    }
}
