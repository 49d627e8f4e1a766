//! Dihedral classification of edges.

use crate::topology::brep::{EdgeId, EntityStore, FaceId, OrientedEdge};
use crate::topology::shape::Shape;

use super::BlendError;

/// Dihedral angles below this count as tangent, radians.
pub const SMOOTH_ANGLE: f64 = 1e-6;

/// Edge parameters sampled for the convexity test, as fractions of the
/// range. The midpoint comes first.
const SAMPLES: [f64; 5] = [0.5, 0.1, 0.3, 0.7, 0.9];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Convexity {
    Concave,
    Smooth,
    Convex,
}

/// Convexity of a manifold edge of `shape`, with `angle` the smooth
/// threshold in radians.
pub fn edge_convexity(shape: &Shape, edge: EdgeId, angle: f64) -> Result<Convexity, BlendError> {
    let map = shape.store().edge_face_map(shape.root());
    let uses = map
        .get(edge)
        .ok_or_else(|| BlendError::InvalidInput("edge does not belong to the shape".into()))?;
    convexity_between(shape.store(), edge, uses, angle)
}

pub(crate) fn convexity_between(
    store: &EntityStore,
    edge: EdgeId,
    uses: &[(FaceId, OrientedEdge)],
    angle: f64,
) -> Result<Convexity, BlendError> {
    let [(fa, ua), (fb, _)] = uses else {
        return Err(BlendError::InvalidInput(format!(
            "edge is used by {} faces; convexity needs exactly two",
            uses.len()
        )));
    };
    let e = &store.edges[edge];
    if e.degenerated {
        return Err(BlendError::InvalidInput("degenerate edge has no dihedral angle".into()));
    }

    let mut found: Option<Convexity> = None;
    for fraction in SAMPLES {
        let t = e.first + (e.last - e.first) * fraction;
        let a = signed_dihedral(store, edge, *fa, ua.forward, *fb, t)?;
        let here = if a > angle {
            Convexity::Convex
        } else if a < -angle {
            Convexity::Concave
        } else {
            Convexity::Smooth
        };
        found = match (found, here) {
            (None, c) | (Some(Convexity::Smooth), c) | (Some(c), Convexity::Smooth) => Some(c),
            (Some(c), h) if c == h => Some(c),
            _ => {
                return Err(BlendError::geometry(format!(
                    "edge changes between convex and concave near t = {t}"
                )));
            }
        };
    }
    Ok(found.unwrap_or(Convexity::Smooth))
}

/// Angle between the outward normals of `fa` and `fb` at edge parameter
/// `t`, positive when the edge is convex. The edge direction is taken as
/// traversed in `fa`.
fn signed_dihedral(
    store: &EntityStore,
    edge: EdgeId,
    fa: FaceId,
    forward_in_a: bool,
    fb: FaceId,
    t: f64,
) -> Result<f64, BlendError> {
    let e = &store.edges[edge];
    let p = e.point_at(t);
    let tangent = e.curve.tangent(t)?;
    let tangent = if forward_in_a { tangent } else { -tangent };
    let normal = |f: FaceId| -> Result<_, BlendError> {
        let (u, v) = store.faces[f].surface.parameters_of(&p)?;
        Ok(store.face_normal(f, u, v))
    };
    let (na, nb) = (normal(fa)?, normal(fb)?);
    Ok(na.cross(&nb).dot(&tangent).atan2(na.dot(&nb)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Point3d;
    use crate::geometry::vector::Vec3;
    use crate::topology::primitives::{make_box, make_cylinder, make_prism, Profile};

    #[test]
    fn test_box_edges_are_convex() {
        let b = make_box(Point3d::ORIGIN, 1.0, 2.0, 3.0).unwrap();
        for e in b.edges() {
            assert_eq!(edge_convexity(&b, e, SMOOTH_ANGLE).unwrap(), Convexity::Convex);
        }
    }

    #[test]
    fn test_l_block_has_one_concave_edge() {
        let profile = Profile::Polygon(vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
            Point3d::new(2.0, 1.0, 0.0),
            Point3d::new(1.0, 1.0, 0.0),
            Point3d::new(1.0, 2.0, 0.0),
            Point3d::new(0.0, 2.0, 0.0),
        ]);
        let block = make_prism(&profile, Vec3::new(0.0, 0.0, 1.0)).unwrap();
        let concave: Vec<_> = block
            .edges()
            .into_iter()
            .filter(|&e| edge_convexity(&block, e, SMOOTH_ANGLE).unwrap() == Convexity::Concave)
            .collect();
        assert_eq!(concave.len(), 1);
        let store = block.store();
        let mid = store.edges[concave[0]].point_at(store.edges[concave[0]].mid_parameter());
        assert!(mid.distance_to(&Point3d::new(1.0, 1.0, 0.5)) < 1e-12);
    }

    #[test]
    fn test_cylinder_seam_is_smooth() {
        let c = make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 2.0).unwrap();
        let map = c.store().edge_face_map(c.root());
        let seam = c
            .edges()
            .into_iter()
            .find(|&e| {
                map.get(e)
                    .is_some_and(|uses| uses.len() == 2 && uses[0].0 == uses[1].0)
            })
            .unwrap();
        assert_eq!(edge_convexity(&c, seam, SMOOTH_ANGLE).unwrap(), Convexity::Smooth);
    }
}
