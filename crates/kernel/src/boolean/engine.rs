//! Boolean pipeline: section, split, classify, select, stitch.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::topology::brep::{FaceId, OrientedEdge, PCurve, ShapeRef, VertexId};
use crate::topology::builder::{flip_uses, CopyMap, ShapeBuilder};
use crate::topology::sew::sew_faces;
use crate::topology::shape::Shape;
use crate::Tolerance;

use super::classify::{classify_point, Classification};
use super::operand::{merge_tolerance, Operand};
use super::section::{overlap, section_faces, Strand};
use super::split::{split_face, FaceSplit, Piece, SubFace};
use super::{BooleanError, BooleanOp, BooleanOptions};

/// Which operand a face comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Side {
    A,
    B,
}

/// Run `op` on two closed operands.
#[instrument(skip(a, b, options), fields(faces_a = a.faces().len(), faces_b = b.faces().len()))]
pub fn boolean_op(a: &Shape, b: &Shape, op: BooleanOp, options: &BooleanOptions) -> Result<Shape, BooleanError> {
    options.validate()?;
    let oa = Operand::prepare(a, options)?;
    let ob = Operand::prepare(b, options)?;

    if !oa.bbox.intersects(&ob.bbox) {
        debug!(?op, "operands are disjoint");
        return match op {
            BooleanOp::Union => Ok(disjoint_union(a, b, options)),
            BooleanOp::Subtract => Ok(a.clone()),
            BooleanOp::Intersect => Err(BooleanError::EmptyResult),
        };
    }

    let strands = section(&oa, &ob, options)?;
    debug!(strands = strands.len(), "sections computed");

    let jobs: Vec<(Side, usize)> = (0..oa.faces.len())
        .map(|i| (Side::A, i))
        .chain((0..ob.faces.len()).map(|j| (Side::B, j)))
        .collect();
    let split_one = |&(side, index): &(Side, usize)| -> Result<(Side, FaceSplit), BooleanError> {
        let (operand, on_face): (&Operand<'_>, Vec<&Strand>) = match side {
            Side::A => (&oa, strands.iter().filter(|s| s.face_a == index).collect()),
            Side::B => (&ob, strands.iter().filter(|s| s.face_b == index).collect()),
        };
        let split = split_face(operand.store(), &operand.faces[index], index, &on_face, options)?;
        Ok((side, split))
    };
    let splits: Vec<(Side, FaceSplit)> = if options.parallel {
        jobs.par_iter().map(split_one).collect::<Result<_, _>>()?
    } else {
        jobs.iter().map(split_one).collect::<Result<_, _>>()?
    };

    let classify_one = |(side, split): &(Side, FaceSplit)| -> Result<Vec<bool>, BooleanError> {
        let (own, other) = match side {
            Side::A => (&oa, &ob),
            Side::B => (&ob, &oa),
        };
        split
            .sub_faces
            .iter()
            .map(|sub| {
                let face = &own.faces[sub.face];
                let normal = face.outward_normal(sub.sample_uv.x, sub.sample_uv.y);
                let class = classify_point(&sub.sample, &normal, other, options)?;
                Ok(keep(op, *side, class))
            })
            .collect()
    };
    let kept: Vec<Vec<bool>> = if options.parallel {
        splits.par_iter().map(classify_one).collect::<Result<_, _>>()?
    } else {
        splits.iter().map(classify_one).collect::<Result<_, _>>()?
    };

    let merge = merge_tolerance(options);
    let mut rebuild = Rebuild::new(merge);
    let mut faces = Vec::new();
    for ((side, split), keep) in splits.iter().zip(&kept) {
        let operand = if *side == Side::A { &oa } else { &ob };
        let flip = op == BooleanOp::Subtract && *side == Side::B;
        for (sub, _) in split.sub_faces.iter().zip(keep).filter(|(_, k)| **k) {
            let face = rebuild.face(*side, operand, split, sub, flip)?;
            faces.push(face);
        }
    }
    if faces.is_empty() {
        return Err(BooleanError::EmptyResult);
    }

    let kept_faces = faces.len();
    let result = sew_faces(rebuild.builder.into_store(), &faces, merge)
        .map_err(|e| BooleanError::failure("stitch", e.to_string()))?;
    if !result.is_closed() {
        let (free, non_manifold) = result.store().manifold_defects(result.root());
        return Err(BooleanError::failure(
            "stitch",
            format!("result is open ({free} free edges, {non_manifold} non-manifold edges)"),
        ));
    }
    let counts = result.counts();
    info!(?op, faces = kept_faces, solids = counts.solids, "boolean complete");
    Ok(result)
}

/// Section every overlapping face pair.
fn section(oa: &Operand<'_>, ob: &Operand<'_>, options: &BooleanOptions) -> Result<Vec<Strand>, BooleanError> {
    let pairs: Vec<(usize, usize)> = oa
        .faces
        .iter()
        .enumerate()
        .flat_map(|(i, fa)| {
            ob.faces
                .iter()
                .enumerate()
                .filter(move |(_, fb)| overlap(&fa.bbox, &fb.bbox).is_some())
                .map(move |(j, _)| (i, j))
        })
        .collect();
    let run = |&(i, j): &(usize, usize)| section_faces(&oa.faces[i], i, &ob.faces[j], j, options);
    let nested: Vec<Vec<Strand>> = if options.parallel {
        pairs.par_iter().map(run).collect::<Result<_, _>>()?
    } else {
        pairs.iter().map(run).collect::<Result<_, _>>()?
    };
    Ok(nested.into_iter().flatten().collect())
}

/// Selection table of the three operations.
fn keep(op: BooleanOp, side: Side, class: Classification) -> bool {
    use Classification::*;
    match (op, side) {
        (BooleanOp::Union, Side::A) => matches!(class, Out | OnSame),
        (BooleanOp::Union, Side::B) => class == Out,
        (BooleanOp::Subtract, Side::A) => matches!(class, Out | OnOpposite),
        (BooleanOp::Subtract, Side::B) => class == In,
        (BooleanOp::Intersect, Side::A) => matches!(class, In | OnSame),
        (BooleanOp::Intersect, Side::B) => class == In,
    }
}

fn disjoint_union(a: &Shape, b: &Shape, options: &BooleanOptions) -> Shape {
    let mut builder = ShapeBuilder::new(Tolerance::with_coincidence(merge_tolerance(options)));
    let ra = a.copy_into(builder.store_mut());
    let rb = b.copy_into(builder.store_mut());
    let root = ShapeRef::Compound(builder.make_compound(vec![ra, rb]));
    builder.finish(root)
}

/// New faces for the selected sub-faces, in one store.
pub(crate) struct Rebuild {
    pub(crate) builder: ShapeBuilder,
    nodes: HashMap<(Side, usize, usize), VertexId>,
    /// Unsplit faces of one operand share their copied edges.
    copies: HashMap<Side, CopyMap>,
}

impl Rebuild {
    pub(crate) fn new(merge: f64) -> Self {
        Self {
            builder: ShapeBuilder::new(Tolerance::with_coincidence(merge)),
            nodes: HashMap::new(),
            copies: HashMap::new(),
        }
    }

    pub(crate) fn face(
        &mut self,
        side: Side,
        operand: &Operand<'_>,
        split: &FaceSplit,
        sub: &SubFace,
        flip: bool,
    ) -> Result<FaceId, BooleanError> {
        let data = &operand.faces[sub.face];
        let Some(loops) = &sub.loops else {
            let map = self.copies.entry(side).or_default();
            return Ok(self.builder.copy_face(operand.store(), data.id, map, flip));
        };
        let mut wires = Vec::with_capacity(loops.len());
        for pieces in loops {
            let mut uses = pieces
                .iter()
                .map(|p| self.piece(side, sub.face, split, p))
                .collect::<Result<Vec<_>, _>>()?;
            if flip {
                flip_uses(&mut uses);
            }
            let wire = self
                .builder
                .make_wire(uses, true)
                .map_err(|e| BooleanError::failure("rebuild", e.to_string()))?;
            wires.push(wire);
        }
        let outer = wires.remove(0);
        self.builder
            .make_face(data.surface.clone(), outer, wires, data.reversed != flip)
            .map_err(|e| BooleanError::failure("rebuild", e.to_string()))
    }

    fn node(&mut self, side: Side, face: usize, split: &FaceSplit, node: usize) -> VertexId {
        let key = (side, face, node);
        if let Some(&v) = self.nodes.get(&key) {
            return v;
        }
        let v = self.builder.make_vertex(split.nodes[node]);
        self.nodes.insert(key, v);
        v
    }

    fn piece(&mut self, side: Side, face: usize, split: &FaceSplit, piece: &Piece) -> Result<OrientedEdge, BooleanError> {
        let start = self.node(side, face, split, piece.start);
        let end = self.node(side, face, split, piece.end);
        if piece.degenerated {
            let edge = self.builder.make_degenerate_edge(start)?;
            return Ok(match piece.pcurve {
                Some((a, b)) => OrientedEdge::with_pcurve(edge, true, PCurve::new(a, b)),
                None => OrientedEdge::new(edge, true),
            });
        }
        let forward = piece.t_start < piece.t_end;
        let (first, last, v_first, v_last) = if forward {
            (piece.t_start, piece.t_end, start, end)
        } else {
            (piece.t_end, piece.t_start, end, start)
        };
        for (v, t) in [(v_first, first), (v_last, last)] {
            let gap = piece.curve.point(t).distance_to(&self.builder.store().vertices[v].point);
            let vertex = &mut self.builder.store_mut().vertices[v];
            vertex.tolerance = vertex.tolerance.max(gap);
        }
        let edge = self
            .builder
            .make_edge(piece.curve.clone(), first, last, v_first, v_last)
            .map_err(|e| BooleanError::failure("rebuild", e.to_string()))?;
        Ok(match piece.pcurve {
            Some((a, b)) if forward => OrientedEdge::with_pcurve(edge, true, PCurve::new(a, b)),
            Some((a, b)) => OrientedEdge::with_pcurve(edge, false, PCurve::new(b, a)),
            None => OrientedEdge::new(edge, forward),
        })
    }
}
