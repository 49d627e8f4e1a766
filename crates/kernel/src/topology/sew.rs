//! Sewing: turn a bag of faces into shared-edge shells and solids.
//!
//! Vertices closer than the sewing tolerance are welded through a spatial
//! hash, edges are split at foreign vertices lying on them, and edges with
//! the same end vertices and matching midpoints collapse into one. Shells
//! are then the connected components of the face adjacency.

use std::collections::{HashMap, HashSet};

use slotmap::{Key, SecondaryMap};
use tracing::{debug, instrument, warn};

use crate::error::TopologyError;
use crate::geometry::point::Point3d;
use crate::geometry::transform::BoundingBox;

use super::brep::*;
use super::domain::{edge_parameters, DEFAULT_SAMPLING_ANGLE};
use super::properties::{face_bounding_box, shell_volume};
use super::shape::Shape;

/// Deflection for the volume sign test on stitched shells.
const ORIENTATION_DEFLECTION: f64 = 1e-3;

/// Sew every face of `shape` at `tolerance`.
#[instrument(skip(shape))]
pub fn sew(shape: &Shape, tolerance: f64) -> Result<Shape, TopologyError> {
    let faces = shape.faces();
    sew_faces(shape.store().clone(), &faces, tolerance)
}

/// Sew `faces` of `store` into shells. Every other face, shell, solid and
/// compound in the store is discarded. Closed shells become solids;
/// inside-out closed shells become voids of the smallest solid around
/// them. The root is a solid when exactly one results, otherwise a
/// compound of solids and any leftover open shells.
pub fn sew_faces(mut store: EntityStore, faces: &[FaceId], tolerance: f64) -> Result<Shape, TopologyError> {
    if !(tolerance > 0.0 && tolerance.is_finite()) {
        return Err(TopologyError::InvalidInput(format!("sewing tolerance {tolerance} must be positive")));
    }
    if faces.is_empty() {
        return Err(TopologyError::InvalidInput("nothing to sew".into()));
    }
    let keep: HashSet<FaceId> = faces.iter().copied().collect();
    store.faces.retain(|id, _| keep.contains(&id));
    store.shells.clear();
    store.solids.clear();
    store.compounds.clear();

    let welded = weld_vertices(&mut store, faces, tolerance);
    let split = split_t_junctions(&mut store, faces, tolerance);
    let merged = merge_edges(&mut store, faces, tolerance);
    prune_unreferenced(&mut store, faces);
    debug!(welded, split, merged, "sewing pass");

    let root = assemble(&mut store, faces)?;
    Ok(Shape::from_parts(store, root))
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[hi] = lo;
        true
    }
}

fn face_edges(store: &EntityStore, faces: &[FaceId]) -> Vec<EdgeId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &f in faces {
        for w in store.faces[f].wires() {
            for u in &store.wires[w].edges {
                if seen.insert(u.edge) {
                    out.push(u.edge);
                }
            }
        }
    }
    out
}

fn face_vertices(store: &EntityStore, edges: &[EdgeId]) -> Vec<VertexId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &e in edges {
        for v in [store.edges[e].start, store.edges[e].end] {
            if seen.insert(v) {
                out.push(v);
            }
        }
    }
    out
}

fn cell_of(p: &Point3d, size: f64) -> (i64, i64, i64) {
    (
        (p.x / size).floor() as i64,
        (p.y / size).floor() as i64,
        (p.z / size).floor() as i64,
    )
}

/// Merge vertices closer than `tolerance`; returns the number removed.
fn weld_vertices(store: &mut EntityStore, faces: &[FaceId], tolerance: f64) -> usize {
    let edges = face_edges(store, faces);
    let vertices = face_vertices(store, &edges);
    let cell = 2.0 * tolerance;
    let mut grid: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    for (i, &v) in vertices.iter().enumerate() {
        grid.entry(cell_of(&store.vertices[v].point, cell)).or_default().push(i);
    }

    let mut uf = UnionFind::new(vertices.len());
    let mut merges = 0;
    for (i, &v) in vertices.iter().enumerate() {
        let p = store.vertices[v].point;
        let (cx, cy, cz) = cell_of(&p, cell);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(bucket) = grid.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &j in bucket {
                        if j > i
                            && store.vertices[vertices[j]].point.distance_to(&p) <= tolerance
                            && uf.union(i, j)
                        {
                            merges += 1;
                        }
                    }
                }
            }
        }
    }
    if merges == 0 {
        return 0;
    }

    let mut rep: SecondaryMap<VertexId, VertexId> = SecondaryMap::new();
    for (i, &v) in vertices.iter().enumerate() {
        let r = vertices[uf.find(i)];
        rep.insert(v, r);
        if r != v {
            let gap = store.vertices[v].point.distance_to(&store.vertices[r].point) + store.vertices[v].tolerance;
            let target = &mut store.vertices[r];
            target.tolerance = target.tolerance.max(gap);
        }
    }
    for e in edges {
        let edge = &mut store.edges[e];
        edge.start = rep[edge.start];
        edge.end = rep[edge.end];
    }
    merges
}

/// Split edges at welded vertices lying on their interior; returns the
/// number of splits.
fn split_t_junctions(store: &mut EntityStore, faces: &[FaceId], tolerance: f64) -> usize {
    let edges = face_edges(store, faces);
    let vertices = face_vertices(store, &edges);
    let mut splits: HashMap<EdgeId, Vec<(f64, VertexId)>> = HashMap::new();

    for &e in &edges {
        let edge = &store.edges[e];
        if edge.degenerated {
            continue;
        }
        let deflection = (edge.length() * 1e-3).max(tolerance);
        let params = edge_parameters(edge, deflection, DEFAULT_SAMPLING_ANGLE);
        let samples: Vec<Point3d> = params.iter().map(|&t| edge.point_at(t)).collect();
        let bb = BoundingBox::from_points(&samples).expanded(deflection + tolerance);
        let (a, b) = (store.vertices[edge.start].point, store.vertices[edge.end].point);
        for &v in &vertices {
            if v == edge.start || v == edge.end {
                continue;
            }
            let p = store.vertices[v].point;
            if !bb.contains_point(&p) || p.distance_to(&a) <= tolerance || p.distance_to(&b) <= tolerance {
                continue;
            }
            let t = match edge.curve.parameter_of_in(&p, edge.first, edge.last) {
                Ok(t) => t,
                Err(err) => {
                    warn!(%err, "vertex projection failed during sewing");
                    continue;
                }
            };
            if t > edge.first && t < edge.last && edge.point_at(t).distance_to(&p) <= tolerance {
                splits.entry(e).or_default().push((t, v));
            }
        }
    }

    let mut count = 0;
    for (e, mut cuts) in splits {
        cuts.sort_by(|x, y| x.0.total_cmp(&y.0));
        cuts.dedup_by(|x, y| x.1 == y.1);
        count += cuts.len();
        split_edge(store, e, &cuts);
    }
    count
}

/// Replace `edge` by pieces between the cut vertices, in every wire using it.
fn split_edge(store: &mut EntityStore, edge_id: EdgeId, cuts: &[(f64, VertexId)]) {
    let edge = store.edges[edge_id].clone();
    let mut bounds = vec![(edge.first, edge.start)];
    bounds.extend_from_slice(cuts);
    bounds.push((edge.last, edge.end));
    let span = edge.last - edge.first;

    let pieces: Vec<(EdgeId, f64, f64)> = bounds
        .windows(2)
        .map(|w| {
            let id = store.edges.insert(Edge {
                first: w[0].0,
                last: w[1].0,
                start: w[0].1,
                end: w[1].1,
                ..edge.clone()
            });
            (id, (w[0].0 - edge.first) / span, (w[1].0 - edge.first) / span)
        })
        .collect();

    for wire in store.wires.values_mut() {
        if !wire.edges.iter().any(|u| u.edge == edge_id) {
            continue;
        }
        let mut uses = Vec::with_capacity(wire.edges.len() + pieces.len());
        for u in &wire.edges {
            if u.edge != edge_id {
                uses.push(*u);
                continue;
            }
            let mut replaced: Vec<OrientedEdge> = pieces
                .iter()
                .map(|&(id, s0, s1)| OrientedEdge {
                    edge: id,
                    forward: u.forward,
                    pcurve: u.pcurve.map(|pc| PCurve::new(pc.at(s0), pc.at(s1))),
                })
                .collect();
            if !u.forward {
                replaced.reverse();
            }
            uses.extend(replaced);
        }
        wire.edges = uses;
    }
    store.edges.remove(edge_id);
}

/// Collapse geometrically equal edges; returns the number of edges removed.
fn merge_edges(store: &mut EntityStore, faces: &[FaceId], tolerance: f64) -> usize {
    let edges = face_edges(store, faces);
    let mut groups: HashMap<(VertexId, VertexId), Vec<EdgeId>> = HashMap::new();
    for &e in &edges {
        let edge = &store.edges[e];
        if edge.degenerated {
            continue;
        }
        let key = if edge.start.data() <= edge.end.data() {
            (edge.start, edge.end)
        } else {
            (edge.end, edge.start)
        };
        groups.entry(key).or_default().push(e);
    }

    // Canonical edge and direction agreement for every replaced edge.
    let mut replace: HashMap<EdgeId, (EdgeId, bool)> = HashMap::new();
    let mut keys: Vec<_> = groups.keys().copied().collect();
    keys.sort_by_key(|(a, b)| (a.data().as_ffi(), b.data().as_ffi()));
    for key in keys {
        let group = &groups[&key];
        let mut canon: Vec<EdgeId> = Vec::new();
        for &e in group {
            match canon.iter().find_map(|&c| same_edge(store, c, e, tolerance).map(|d| (c, d))) {
                Some((c, same_direction)) => {
                    replace.insert(e, (c, same_direction));
                }
                None => canon.push(e),
            }
        }
    }
    if replace.is_empty() {
        return 0;
    }

    for wire in store.wires.values_mut() {
        for u in &mut wire.edges {
            if let Some(&(c, same_direction)) = replace.get(&u.edge) {
                u.edge = c;
                if !same_direction {
                    u.forward = !u.forward;
                    u.pcurve = u.pcurve.map(|pc| pc.reversed());
                }
            }
        }
    }
    for (&e, &(c, _)) in &replace {
        let tol = store.edges[e].tolerance;
        let target = &mut store.edges[c];
        target.tolerance = target.tolerance.max(tol);
        store.edges.remove(e);
    }
    replace.len()
}

/// `Some(same_direction)` when `b` runs along `a` within tolerance.
fn same_edge(store: &EntityStore, a: EdgeId, b: EdgeId, tolerance: f64) -> Option<bool> {
    let (ea, eb) = (&store.edges[a], &store.edges[b]);
    let tb = eb.mid_parameter();
    let pb = eb.point_at(tb);
    let ta = ea.curve.parameter_of_in(&pb, ea.first, ea.last).ok()?;
    if ea.point_at(ta).distance_to(&pb) > tolerance {
        return None;
    }
    let pa = ea.point_at(ea.mid_parameter());
    let back = eb.curve.parameter_of_in(&pa, eb.first, eb.last).ok()?;
    if eb.point_at(back).distance_to(&pa) > tolerance {
        return None;
    }
    let along = ea.curve.d1(ta).dot(&eb.curve.d1(tb));
    Some(along > 0.0)
}

fn prune_unreferenced(store: &mut EntityStore, faces: &[FaceId]) {
    let wires: HashSet<WireId> = faces.iter().flat_map(|&f| store.faces[f].wires().collect::<Vec<_>>()).collect();
    store.wires.retain(|id, _| wires.contains(&id));
    let edges: HashSet<EdgeId> = face_edges(store, faces).into_iter().collect();
    store.edges.retain(|id, _| edges.contains(&id));
    let vertices: HashSet<VertexId> = store.edges.values().flat_map(|e| [e.start, e.end]).collect();
    store.vertices.retain(|id, _| vertices.contains(&id));
}

/// Group faces into shells by shared edges and promote closed shells.
fn assemble(store: &mut EntityStore, faces: &[FaceId]) -> Result<ShapeRef, TopologyError> {
    let index: HashMap<FaceId, usize> = faces.iter().enumerate().map(|(i, &f)| (f, i)).collect();
    let mut uf = UnionFind::new(faces.len());
    let mut by_edge: HashMap<EdgeId, usize> = HashMap::new();
    for &f in faces {
        for w in store.faces[f].wires() {
            for u in &store.wires[w].edges {
                if store.edges[u.edge].degenerated {
                    continue;
                }
                match by_edge.get(&u.edge) {
                    Some(&other) => {
                        uf.union(other, index[&f]);
                    }
                    None => {
                        by_edge.insert(u.edge, index[&f]);
                    }
                }
            }
        }
    }

    let mut components: Vec<(usize, Vec<FaceId>)> = Vec::new();
    for (i, &f) in faces.iter().enumerate() {
        let r = uf.find(i);
        match components.iter_mut().find(|(root, _)| *root == r) {
            Some((_, members)) => members.push(f),
            None => components.push((r, vec![f])),
        }
    }

    let mut outers: Vec<(ShellId, f64, BoundingBox)> = Vec::new();
    let mut voids: Vec<(ShellId, BoundingBox)> = Vec::new();
    let mut open: Vec<ShellId> = Vec::new();
    for (_, members) in components {
        let id = store.shells.insert(Shell {
            faces: members.clone(),
            closed: false,
        });
        let (free, non_manifold) = store.manifold_defects(ShapeRef::Shell(id));
        if free > 0 || non_manifold > 0 {
            open.push(id);
            continue;
        }
        store.shells[id].closed = true;
        let volume = shell_volume(store, &members, ORIENTATION_DEFLECTION)?;
        let mut bb = BoundingBox::empty();
        for &f in &members {
            bb = bb.union(&face_bounding_box(store, f)?);
        }
        if volume < 0.0 {
            voids.push((id, bb));
        } else {
            outers.push((id, volume, bb));
        }
    }

    let mut solids: Vec<(ShellId, Vec<ShellId>)> = outers.iter().map(|o| (o.0, Vec::new())).collect();
    for (void, bb) in voids {
        let host = outers
            .iter()
            .enumerate()
            .filter(|(_, (_, _, outer))| outer.contains_point(&bb.min) && outer.contains_point(&bb.max))
            .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map(|(i, _)| i);
        match host {
            Some(i) => solids[i].1.push(void),
            None => solids.push((void, Vec::new())),
        }
    }

    let mut members: Vec<ShapeRef> = solids
        .into_iter()
        .map(|(outer, inner)| ShapeRef::Solid(store.solids.insert(Solid { outer, inner })))
        .collect();
    members.extend(open.iter().map(|&s| ShapeRef::Shell(s)));
    debug!(members = members.len(), open = open.len(), "sewn shells assembled");
    Ok(match members.as_slice() {
        [single] => *single,
        _ => ShapeRef::Compound(store.compounds.insert(Compound { members })),
    })
}
