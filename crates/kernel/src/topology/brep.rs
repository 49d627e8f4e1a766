use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SecondaryMap, SlotMap};

use crate::geometry::curves::Curve;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::surfaces::Surface;
use crate::geometry::vector::Vec3;

// ─── Entity Keys ─────────────────────────────────────────────────────────────

new_key_type! {
    pub struct VertexId;
    pub struct EdgeId;
    pub struct WireId;
    pub struct FaceId;
    pub struct ShellId;
    pub struct SolidId;
    pub struct CompoundId;
}

/// Reference to any topological entity of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeRef {
    Vertex(VertexId),
    Edge(EdgeId),
    Wire(WireId),
    Face(FaceId),
    Shell(ShellId),
    Solid(SolidId),
    Compound(CompoundId),
}

// ─── Topological Entities ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub point: Point3d,
    pub tolerance: f64,
}

/// A curve trimmed to `[first, last]`, running from `start` to `end`.
///
/// Degenerated edges collapse to a single point (sphere poles, cone apexes);
/// they carry a constant curve over [0, 1] and are only meaningful through
/// the parameter-space curve of their use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub curve: Arc<Curve>,
    pub first: f64,
    pub last: f64,
    pub start: VertexId,
    pub end: VertexId,
    pub tolerance: f64,
    pub degenerated: bool,
}

impl Edge {
    pub fn point_at(&self, t: f64) -> Point3d {
        self.curve.point(t)
    }

    pub fn mid_parameter(&self) -> f64 {
        0.5 * (self.first + self.last)
    }

    pub fn is_closed(&self) -> bool {
        self.start == self.end
    }

    pub fn length(&self) -> f64 {
        if self.degenerated {
            0.0
        } else {
            self.curve.length(self.first, self.last)
        }
    }
}

/// Straight line in a face's parameter space, oriented like the edge curve:
/// `start` corresponds to `Edge::first`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PCurve {
    pub start: Point2d,
    pub end: Point2d,
}

impl PCurve {
    pub fn new(start: Point2d, end: Point2d) -> Self {
        Self { start, end }
    }

    /// Point at fraction `s` in [0, 1] of the edge parameter range.
    pub fn at(&self, s: f64) -> Point2d {
        self.start.lerp(&self.end, s)
    }

    pub fn reversed(&self) -> Self {
        Self {
            start: self.end,
            end: self.start,
        }
    }
}

/// Use of an edge inside a wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrientedEdge {
    pub edge: EdgeId,
    /// true if the wire traverses the edge from `start` to `end`.
    pub forward: bool,
    pub pcurve: Option<PCurve>,
}

impl OrientedEdge {
    pub fn new(edge: EdgeId, forward: bool) -> Self {
        Self {
            edge,
            forward,
            pcurve: None,
        }
    }

    pub fn with_pcurve(edge: EdgeId, forward: bool, pcurve: PCurve) -> Self {
        Self {
            edge,
            forward,
            pcurve: Some(pcurve),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wire {
    pub edges: Vec<OrientedEdge>,
    pub closed: bool,
}

/// A trimmed surface. Wires run counter-clockwise around the outward normal
/// (inner wires clockwise), which is `Su x Sv`, or `-(Su x Sv)` when
/// `reversed` is set. Edges shared by two faces of a closed shell are
/// therefore used in opposite directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
    pub surface: Arc<Surface>,
    pub outer: WireId,
    pub inners: Vec<WireId>,
    pub reversed: bool,
    pub tolerance: f64,
}

impl Face {
    pub fn wires(&self) -> impl Iterator<Item = WireId> + '_ {
        std::iter::once(self.outer).chain(self.inners.iter().copied())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shell {
    pub faces: Vec<FaceId>,
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solid {
    pub outer: ShellId,
    /// Void shells, oriented with normals pointing into the void.
    pub inner: Vec<ShellId>,
}

impl Solid {
    pub fn shells(&self) -> impl Iterator<Item = ShellId> + '_ {
        std::iter::once(self.outer).chain(self.inner.iter().copied())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Compound {
    pub members: Vec<ShapeRef>,
}

// ─── Entity Store ────────────────────────────────────────────────────────────

/// Arena-based storage for all topological entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStore {
    pub vertices: SlotMap<VertexId, Vertex>,
    pub edges: SlotMap<EdgeId, Edge>,
    pub wires: SlotMap<WireId, Wire>,
    pub faces: SlotMap<FaceId, Face>,
    pub shells: SlotMap<ShellId, Shell>,
    pub solids: SlotMap<SolidId, Solid>,
    pub compounds: SlotMap<CompoundId, Compound>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge_start_point(&self, edge: EdgeId) -> Point3d {
        self.vertices[self.edges[edge].start].point
    }

    pub fn edge_end_point(&self, edge: EdgeId) -> Point3d {
        self.vertices[self.edges[edge].end].point
    }

    /// Start vertex of an edge use, following its orientation.
    pub fn use_start(&self, use_: &OrientedEdge) -> VertexId {
        let e = &self.edges[use_.edge];
        if use_.forward { e.start } else { e.end }
    }

    pub fn use_end(&self, use_: &OrientedEdge) -> VertexId {
        let e = &self.edges[use_.edge];
        if use_.forward { e.end } else { e.start }
    }

    /// Outward normal of a face at surface parameters (u, v).
    pub fn face_normal(&self, face_id: FaceId, u: f64, v: f64) -> Vec3 {
        let face = &self.faces[face_id];
        let n = face.surface.normal_at(u, v);
        if face.reversed { -n } else { n }
    }

    // ─── Exploration ─────────────────────────────────────────────────────

    /// Unique faces below `root`, in first-visit order.
    pub fn faces_of(&self, root: ShapeRef) -> Vec<FaceId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.visit_faces(root, &mut |f| {
            if seen.insert(f) {
                out.push(f);
            }
        });
        out
    }

    fn visit_faces(&self, root: ShapeRef, f: &mut dyn FnMut(FaceId)) {
        match root {
            ShapeRef::Vertex(_) | ShapeRef::Edge(_) | ShapeRef::Wire(_) => {}
            ShapeRef::Face(id) => f(id),
            ShapeRef::Shell(id) => self.shells[id].faces.iter().for_each(|&face| f(face)),
            ShapeRef::Solid(id) => {
                for shell in self.solids[id].shells() {
                    self.visit_faces(ShapeRef::Shell(shell), f);
                }
            }
            ShapeRef::Compound(id) => {
                for &member in &self.compounds[id].members {
                    self.visit_faces(member, f);
                }
            }
        }
    }

    /// Unique edges below `root`, in first-visit order.
    pub fn edges_of(&self, root: ShapeRef) -> Vec<EdgeId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut push = |e: EdgeId| {
            if seen.insert(e) {
                out.push(e);
            }
        };
        match root {
            ShapeRef::Vertex(_) => {}
            ShapeRef::Edge(e) => push(e),
            ShapeRef::Wire(w) => self.wires[w].edges.iter().for_each(|u| push(u.edge)),
            _ => {
                for face in self.faces_of(root) {
                    for w in self.faces[face].wires() {
                        self.wires[w].edges.iter().for_each(|u| push(u.edge));
                    }
                }
                if let ShapeRef::Compound(c) = root {
                    for &m in &self.compounds[c].members {
                        if matches!(m, ShapeRef::Edge(_) | ShapeRef::Wire(_)) {
                            self.edges_of(m).into_iter().for_each(&mut push);
                        }
                    }
                }
            }
        }
        out
    }

    /// Unique vertices below `root`, in first-visit order.
    pub fn vertices_of(&self, root: ShapeRef) -> Vec<VertexId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        if let ShapeRef::Vertex(v) = root {
            return vec![v];
        }
        for e in self.edges_of(root) {
            let edge = &self.edges[e];
            for v in [edge.start, edge.end] {
                if seen.insert(v) {
                    out.push(v);
                }
            }
        }
        out
    }

    pub fn shells_of(&self, root: ShapeRef) -> Vec<ShellId> {
        match root {
            ShapeRef::Shell(s) => vec![s],
            ShapeRef::Solid(s) => self.solids[s].shells().collect(),
            ShapeRef::Compound(c) => self.compounds[c]
                .members
                .iter()
                .flat_map(|&m| self.shells_of(m))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn solids_of(&self, root: ShapeRef) -> Vec<SolidId> {
        match root {
            ShapeRef::Solid(s) => vec![s],
            ShapeRef::Compound(c) => self.compounds[c]
                .members
                .iter()
                .flat_map(|&m| self.solids_of(m))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Every edge use of every face below `root`: edge -> (face, use).
    pub fn edge_face_map(&self, root: ShapeRef) -> SecondaryMap<EdgeId, Vec<(FaceId, OrientedEdge)>> {
        let mut map: SecondaryMap<EdgeId, Vec<(FaceId, OrientedEdge)>> = SecondaryMap::new();
        for face in self.faces_of(root) {
            for w in self.faces[face].wires() {
                for use_ in &self.wires[w].edges {
                    if let Some(list) = map.entry(use_.edge) {
                        list.or_default().push((face, *use_));
                    }
                }
            }
        }
        map
    }

    /// Edges incident to each vertex below `root`.
    pub fn vertex_edge_map(&self, root: ShapeRef) -> SecondaryMap<VertexId, Vec<EdgeId>> {
        let mut map: SecondaryMap<VertexId, Vec<EdgeId>> = SecondaryMap::new();
        for e in self.edges_of(root) {
            let edge = &self.edges[e];
            let ends = if edge.start == edge.end {
                vec![edge.start]
            } else {
                vec![edge.start, edge.end]
            };
            for v in ends {
                if let Some(list) = map.entry(v) {
                    list.or_default().push(e);
                }
            }
        }
        map
    }

    /// Faces adjacent to `face` across a shared edge.
    pub fn adjacent_faces(&self, root: ShapeRef, face: FaceId) -> Vec<FaceId> {
        let map = self.edge_face_map(root);
        let mut out = Vec::new();
        for w in self.faces[face].wires() {
            for use_ in &self.wires[w].edges {
                for &(other, _) in map.get(use_.edge).map(Vec::as_slice).unwrap_or(&[]) {
                    if other != face && !out.contains(&other) {
                        out.push(other);
                    }
                }
            }
        }
        out
    }

    /// Free and non-manifold edge counts of a face set, ignoring degenerated
    /// edges. An edge is manifold when used exactly twice in opposite
    /// directions.
    pub fn manifold_defects(&self, root: ShapeRef) -> (usize, usize) {
        let map = self.edge_face_map(root);
        let mut free = 0;
        let mut non_manifold = 0;
        for (edge, uses) in &map {
            if self.edges[edge].degenerated {
                continue;
            }
            match uses.as_slice() {
                [_] => free += 1,
                [(_, ua), (_, ub)] => {
                    if ua.forward == ub.forward {
                        non_manifold += 1;
                    }
                }
                _ => non_manifold += 1,
            }
        }
        (free, non_manifold)
    }
}
