//! Local rebuild of a solid around blended edges.
//!
//! Circular rims are handed to [`circular`] first. For straight edges,
//! every face touching a blend is re-trimmed in its own plane: the
//! boundary line of a blended edge moves onto the blend's contact line and
//! the corners are intersected again. Strips, corner patches and the
//! re-trimmed faces are then sewn with the untouched rest of the solid.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use slotmap::SecondaryMap;
use tracing::{debug, info, instrument};

use crate::error::TopologyError;
use crate::geometry::curves::Curve;
use crate::geometry::point::Point3d;
use crate::geometry::polygon::newell_normal;
use crate::geometry::surfaces::Surface;
use crate::geometry::vector::Vec3;
use crate::topology::brep::{EdgeId, EntityStore, FaceId, OrientedEdge, VertexId};
use crate::topology::builder::{CopyMap, ShapeBuilder};
use crate::topology::sew::sew_faces;
use crate::topology::shape::Shape;
use crate::Tolerance;

use super::convexity::{convexity_between, Convexity, SMOOTH_ANGLE};
use super::{chamfer, circular, fillet, BlendError, BlendParameters, BlendProfile};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EdgeKind {
    Fillet(BlendProfile),
    /// Setbacks in the faces using the edge forward and reversed.
    Chamfer { forward: f64, reverse: f64 },
}

/// A trimmed curve traversed from `first` to `last`, or backwards.
#[derive(Debug, Clone)]
pub(crate) struct Piece {
    pub curve: Arc<Curve>,
    pub first: f64,
    pub last: f64,
    pub forward: bool,
}

impl Piece {
    pub fn new(curve: Curve, first: f64, last: f64, forward: bool) -> Self {
        Self {
            curve: Arc::new(curve),
            first,
            last,
            forward,
        }
    }

    pub fn line(a: &Point3d, b: &Point3d) -> Result<Self, BlendError> {
        let (curve, first, last) = Curve::segment(*a, *b)?;
        Ok(Self::new(curve, first, last, true))
    }

    pub fn start(&self) -> Point3d {
        self.curve.point(if self.forward { self.first } else { self.last })
    }

    pub fn end(&self) -> Point3d {
        self.curve.point(if self.forward { self.last } else { self.first })
    }

    /// Points along the traversal, end excluded.
    fn samples(&self, count: usize) -> impl Iterator<Item = Point3d> + '_ {
        (0..count).map(move |i| {
            let f = i as f64 / count as f64;
            let f = if self.forward { f } else { 1.0 - f };
            self.curve.point(self.first + (self.last - self.first) * f)
        })
    }
}

/// One straight edge selected for blending, with the frame of its
/// dihedral.
#[derive(Debug, Clone)]
pub(crate) struct Blend {
    pub edge: EdgeId,
    pub kind: EdgeKind,
    /// The face using the edge forward, then the other one.
    pub faces: [FaceId; 2],
    pub normals: [Vec3; 2],
    pub convexity: Convexity,
    /// Start and end vertex of the edge.
    pub ends: [VertexId; 2],
    pub origin: Point3d,
    pub dir: Vec3,
    pub length: f64,
    /// Angle between the two face normals.
    pub phi: f64,
}

impl Blend {
    fn new(
        store: &EntityStore,
        edge: EdgeId,
        uses: &[(FaceId, OrientedEdge)],
        kind: EdgeKind,
    ) -> Result<Self, BlendError> {
        let e = &store.edges[edge];
        if e.degenerated || !e.curve.is_linear() {
            return Err(BlendError::geometry(format!(
                "only straight and circular edges can be blended, got a {}",
                e.curve.curve_type_name()
            )));
        }
        let faces = match uses {
            [(fa, ua), (fb, ub)] if ua.forward && !ub.forward => [*fa, *fb],
            [(fa, ua), (fb, ub)] if !ua.forward && ub.forward => [*fb, *fa],
            _ => {
                return Err(BlendError::InvalidInput(format!(
                    "blended edge must be shared by two consistently oriented faces, found {} uses",
                    uses.len()
                )));
            }
        };
        if faces[0] == faces[1] {
            return Err(BlendError::geometry("seam edges cannot be blended"));
        }
        for f in faces {
            let surface = &store.faces[f].surface;
            if surface.as_plane().is_none() {
                return Err(BlendError::geometry(format!(
                    "faces next to a blend must be planar, got a {}",
                    surface.surface_type_name()
                )));
            }
        }
        let convexity = convexity_between(store, edge, uses, SMOOTH_ANGLE)?;
        if convexity == Convexity::Smooth {
            return Err(BlendError::geometry("edge between tangent faces has no dihedral to blend"));
        }
        let normals = faces.map(|f| store.face_normal(f, 0.0, 0.0));
        let (a, b) = (store.vertices[e.start].point, store.vertices[e.end].point);
        let length = a.distance_to(&b);
        let dir = (b - a)
            .normalized()
            .ok_or_else(|| BlendError::geometry("blended edge has zero length"))?;
        Ok(Self {
            edge,
            kind,
            faces,
            normals,
            convexity,
            ends: [e.start, e.end],
            origin: a,
            dir,
            length,
            phi: normals[0].angle_to(&normals[1]),
        })
    }

    pub fn is_convex(&self) -> bool {
        self.convexity == Convexity::Convex
    }

    fn is_fillet(&self) -> bool {
        matches!(self.kind, EdgeKind::Fillet(_))
    }

    /// Direction halfway between the face normals; the outward normal of
    /// the blend surface at its middle.
    pub fn bisector(&self) -> Vec3 {
        (self.normals[0] + self.normals[1]).normalize_or(self.normals[0])
    }

    /// Point on the edge at normalized parameter `s`.
    pub fn at(&self, s: f64) -> Point3d {
        self.origin + self.dir * (s * self.length)
    }

    /// Direction into face `k`, perpendicular to the edge.
    fn inward(&self, k: usize) -> Vec3 {
        if k == 0 {
            self.normals[0].cross(&self.dir)
        } else {
            self.dir.cross(&self.normals[1])
        }
    }

    pub fn radius(&self, s: f64) -> f64 {
        match &self.kind {
            EdgeKind::Fillet(profile) => profile.radius_at(s),
            EdgeKind::Chamfer { .. } => 0.0,
        }
    }

    pub fn constant_radius(&self) -> Option<f64> {
        match &self.kind {
            EdgeKind::Fillet(profile) => profile.constant_radius(),
            EdgeKind::Chamfer { .. } => None,
        }
    }

    fn setback(&self, k: usize, s: f64) -> f64 {
        match &self.kind {
            EdgeKind::Fillet(profile) => profile.radius_at(s) * (0.5 * self.phi).tan(),
            EdgeKind::Chamfer { forward, reverse } => {
                if k == 0 {
                    *forward
                } else {
                    *reverse
                }
            }
        }
    }

    /// Where the blend leaves face `k` at normalized parameter `s`.
    pub fn contact(&self, k: usize, s: f64) -> Point3d {
        self.at(s) + self.inward(k) * self.setback(k, s)
    }

    /// Rolling-ball centre at `s`.
    pub fn center(&self, s: f64) -> Point3d {
        let side = if self.is_convex() { -1.0 } else { 1.0 };
        self.contact(0, s) + self.normals[0] * (side * self.radius(s))
    }

    /// Normalized parameters of the cross-sections, ends included.
    pub fn sections(&self) -> Vec<f64> {
        match &self.kind {
            EdgeKind::Fillet(profile) => profile.breakpoints(),
            EdgeKind::Chamfer { .. } => vec![0.0, 1.0],
        }
    }

    fn end_of(&self, v: VertexId) -> Result<f64, BlendError> {
        match self.ends {
            [start, _] if start == v => Ok(0.0),
            [_, end] if end == v => Ok(1.0),
            _ => Err(BlendError::geometry("vertex is not an end of the blended edge")),
        }
    }

    fn side_of(&self, f: FaceId) -> Result<usize, BlendError> {
        self.faces
            .iter()
            .position(|&g| g == f)
            .ok_or_else(|| BlendError::geometry("face is not adjacent to the blended edge"))
    }

    /// Contact line in face `k` near the end at `s`.
    fn contact_line(&self, k: usize, s: f64) -> (Point3d, Vec3) {
        let sections = self.sections();
        let neighbour = if s == 0.0 { sections[1] } else { sections[sections.len() - 2] };
        let p = self.contact(k, s);
        (p, p - self.contact(k, neighbour))
    }
}

/// How the blends at a vertex meet.
#[derive(Debug, Clone, Copy)]
enum Corner {
    /// One blended edge, ended by the third face.
    Single { cap: FaceId },
    /// Two blended edges on the faces they share.
    Mitre { blends: [EdgeId; 2], shared: FaceId },
    /// Three blended edges closed by a corner patch.
    Trihedral { blends: [EdgeId; 3] },
}

#[derive(Debug, Clone)]
struct Node {
    point: Point3d,
    edges: [EdgeId; 3],
    faces: [FaceId; 3],
    corner: Corner,
}

/// A straight boundary run of a re-trimmed face.
#[derive(Debug, Clone)]
struct Run {
    edge: EdgeId,
    points: Vec<Point3d>,
    /// Traversal direction before trimming.
    dir: Vec3,
    start_line: (Point3d, Vec3),
    end_line: (Point3d, Vec3),
}

impl Run {
    fn new(edge: EdgeId, points: Vec<Point3d>, dir: Vec3) -> Self {
        let n = points.len();
        Self {
            edge,
            start_line: (points[0], points[1] - points[0]),
            end_line: (points[n - 1], points[n - 1] - points[n - 2]),
            points,
            dir,
        }
    }
}

#[derive(Debug, Clone)]
enum Track {
    Run(Run),
    /// Boundary edge left as it is.
    Keep(OrientedEdge),
}

/// Arc or segment closing a face loop where a blend ends on it.
#[derive(Debug, Clone, Copy)]
struct Cap {
    blend: EdgeId,
    vertex: VertexId,
    from: Point3d,
    to: Point3d,
}

type FacePlan = Vec<Vec<(Track, Option<Cap>)>>;

struct Rebuild<'a> {
    store: &'a EntityStore,
    params: &'a BlendParameters,
    edge_faces: SecondaryMap<EdgeId, Vec<(FaceId, OrientedEdge)>>,
    blends: HashMap<EdgeId, Blend>,
    nodes: HashMap<VertexId, Node>,
    /// Re-trimmed corner of a face at a touched vertex.
    corners: HashMap<(FaceId, VertexId), Point3d>,
    /// Final contact polylines per face and blended edge, in the face's
    /// traversal order.
    tracks: HashMap<(FaceId, EdgeId), Vec<Point3d>>,
}

/// Where a selected edge lies, stable across rebuilds of the shell.
#[derive(Debug, Clone, Copy)]
enum EdgeKey {
    Rim { center: Point3d, radius: f64 },
    Straight { start: Point3d, end: Point3d },
}

impl EdgeKey {
    fn of(store: &EntityStore, edge: EdgeId) -> Result<Self, BlendError> {
        let e = store
            .edges
            .get(edge)
            .ok_or_else(|| BlendError::InvalidInput("edge does not belong to the shape".into()))?;
        Ok(match circular::rim_circle(store, edge) {
            Some(c) => Self::Rim {
                center: c.center(),
                radius: c.radius,
            },
            None => Self::Straight {
                start: store.vertices[e.start].point,
                end: store.vertices[e.end].point,
            },
        })
    }

    fn matches(&self, other: &Self, tolerance: f64) -> bool {
        match (self, other) {
            (Self::Rim { center: a, radius: ra }, Self::Rim { center: b, radius: rb }) => {
                a.distance_to(b) <= tolerance && (ra - rb).abs() <= tolerance
            }
            (Self::Straight { start: a0, end: a1 }, Self::Straight { start: b0, end: b1 }) => {
                (a0.distance_to(b0) <= tolerance && a1.distance_to(b1) <= tolerance)
                    || (a0.distance_to(b1) <= tolerance && a1.distance_to(b0) <= tolerance)
            }
            _ => false,
        }
    }

    /// The edge of `shape` at this place.
    fn locate(&self, shape: &Shape, tolerance: f64) -> Result<EdgeId, BlendError> {
        let store = shape.store();
        shape
            .edges()
            .into_iter()
            .find(|&e| !store.edges[e].degenerated && EdgeKey::of(store, e).is_ok_and(|k| k.matches(self, tolerance)))
            .ok_or_else(|| BlendError::geometry("selected edge vanished while blending a neighbouring rim"))
    }
}

/// Blend `requests` on the single closed shell of `shape`. Circular rims
/// go first, one at a time; straight edges are blended together after.
#[instrument(skip_all, fields(edges = requests.len()))]
pub(crate) fn blend_edges(
    shape: &Shape,
    requests: &[(EdgeId, EdgeKind)],
    params: &BlendParameters,
) -> Result<Shape, BlendError> {
    if requests.is_empty() {
        return Err(BlendError::InvalidInput("no edges to blend".into()));
    }
    if shape.shells().len() != 1 || !shape.is_closed() {
        return Err(BlendError::InvalidInput("blending needs a solid bounded by one closed shell".into()));
    }
    let store = shape.store();
    if !requests.iter().any(|(e, _)| circular::is_circular(store, *e)) {
        return blend_straight(shape, requests, params);
    }

    let tolerance = 10.0 * params.tolerance;
    let mut keyed: Vec<(EdgeKey, &EdgeKind)> = Vec::with_capacity(requests.len());
    for (edge, kind) in requests {
        let key = EdgeKey::of(store, *edge)?;
        // Arcs of one rim are blended together.
        if keyed.iter().any(|(k, _)| k.matches(&key, tolerance)) {
            if matches!(key, EdgeKey::Straight { .. }) {
                return Err(BlendError::InvalidInput("edge selected twice".into()));
            }
            continue;
        }
        keyed.push((key, kind));
    }

    let mut current = shape.clone();
    for (key, kind) in keyed.iter().filter(|(k, _)| matches!(k, EdgeKey::Rim { .. })) {
        let edge = key.locate(&current, tolerance)?;
        current = circular::blend_rim(&current, edge, kind, params)?;
    }
    let straight = keyed
        .iter()
        .filter(|(k, _)| matches!(k, EdgeKey::Straight { .. }))
        .map(|(k, kind)| Ok((k.locate(&current, tolerance)?, (*kind).clone())))
        .collect::<Result<Vec<_>, BlendError>>()?;
    if straight.is_empty() {
        return Ok(current);
    }
    blend_straight(&current, &straight, params)
}

/// Blend straight edges between planar faces in one local rebuild.
fn blend_straight(
    shape: &Shape,
    requests: &[(EdgeId, EdgeKind)],
    params: &BlendParameters,
) -> Result<Shape, BlendError> {
    let store = shape.store();
    let edge_faces = store.edge_face_map(shape.root());
    let mut blends = HashMap::new();
    for (edge, kind) in requests {
        let uses = edge_faces
            .get(*edge)
            .ok_or_else(|| BlendError::InvalidInput("edge does not belong to the shape".into()))?;
        if blends.contains_key(edge) {
            return Err(BlendError::InvalidInput("edge selected twice".into()));
        }
        blends.insert(*edge, Blend::new(store, *edge, uses, kind.clone())?);
    }

    let mut rebuild = Rebuild {
        store,
        params,
        edge_faces,
        blends,
        nodes: HashMap::new(),
        corners: HashMap::new(),
        tracks: HashMap::new(),
    };
    let vertices = shape.vertices();
    rebuild.classify_vertices(shape, &vertices)?;

    let all_faces = shape.faces();
    let touched: HashSet<FaceId> = rebuild
        .blends
        .values()
        .flat_map(|b| b.faces)
        .chain(rebuild.nodes.values().flat_map(|n| n.faces))
        .collect();
    let mut plans = Vec::new();
    for &f in all_faces.iter().filter(|f| touched.contains(f)) {
        plans.push((f, rebuild.plan_face(f)?));
    }
    rebuild.check_mitres(&vertices)?;
    debug!(touched = touched.len(), corners = rebuild.nodes.len(), "faces re-trimmed");

    let mut builder = ShapeBuilder::new(Tolerance::with_coincidence(params.tolerance));
    let mut faces = Vec::new();
    let mut copies = CopyMap::default();
    for &f in all_faces.iter().filter(|f| !touched.contains(f)) {
        faces.push(builder.copy_face(store, f, &mut copies, false));
    }
    for (f, plan) in &plans {
        faces.push(rebuild.retrim_face(&mut builder, *f, plan)?);
    }
    for (edge, _) in requests {
        faces.push(rebuild.strip_face(&mut builder, &rebuild.blends[edge])?);
    }
    for v in &vertices {
        if let Some(node) = rebuild.nodes.get(v) {
            if let Corner::Trihedral { blends } = node.corner {
                faces.push(rebuild.corner_face(&mut builder, *v, node, blends)?);
            }
        }
    }

    let result = sew_faces(builder.into_store(), &faces, 10.0 * params.tolerance)?;
    if !result.is_closed() {
        let (free, non_manifold) = result.store().manifold_defects(result.root());
        return Err(BlendError::geometry(format!(
            "blended shell does not close ({free} free edges, {non_manifold} non-manifold edges)"
        )));
    }
    info!(faces = faces.len(), "blend complete");
    Ok(result)
}

impl Rebuild<'_> {
    fn classify_vertices(&mut self, shape: &Shape, vertices: &[VertexId]) -> Result<(), BlendError> {
        let vertex_edges = self.store.vertex_edge_map(shape.root());
        let ends: HashSet<VertexId> = self.blends.values().flat_map(|b| b.ends).collect();
        for &v in vertices.iter().filter(|v| ends.contains(v)) {
            let node = self.classify(v, vertex_edges.get(v).map_or(&[][..], Vec::as_slice))?;
            self.nodes.insert(v, node);
        }
        Ok(())
    }

    fn classify(&self, v: VertexId, incident: &[EdgeId]) -> Result<Node, BlendError> {
        let edges: [EdgeId; 3] = incident.try_into().map_err(|_| {
            BlendError::geometry(format!(
                "{} edges meet at a blended vertex; only trihedral vertices are supported",
                incident.len()
            ))
        })?;
        let mut faces: Vec<FaceId> = Vec::with_capacity(3);
        for e in edges {
            if !self.store.edges[e].curve.is_linear() {
                return Err(BlendError::geometry("a curved edge meets a blended vertex"));
            }
            for (f, _) in self.edge_faces.get(e).map_or(&[][..], Vec::as_slice) {
                if !faces.contains(f) {
                    faces.push(*f);
                }
            }
        }
        let faces: [FaceId; 3] = faces
            .as_slice()
            .try_into()
            .map_err(|_| BlendError::geometry("faces around a blended vertex are not trihedral"))?;
        if faces.iter().any(|&f| self.store.faces[f].surface.as_plane().is_none()) {
            return Err(BlendError::geometry("faces around a blended vertex must be planar"));
        }

        let blended: Vec<&Blend> = edges.iter().filter_map(|e| self.blends.get(e)).collect();
        if blended.len() > 1 {
            if blended.iter().any(|b| !b.is_convex()) {
                return Err(BlendError::geometry("concave blends meeting at a corner are not supported"));
            }
            if blended.iter().any(|b| b.is_fillet() != blended[0].is_fillet()) {
                return Err(BlendError::geometry("fillets and chamfers cannot share a corner"));
            }
            if blended[0].is_fillet() {
                let radii = blended
                    .iter()
                    .map(|b| b.constant_radius())
                    .collect::<Option<Vec<f64>>>()
                    .ok_or_else(|| BlendError::geometry("variable-radius fillets cannot share a corner"))?;
                if radii.iter().any(|r| (r - radii[0]).abs() > self.params.tolerance) {
                    return Err(BlendError::collision(format!(
                        "fillets of radii {radii:?} meet at a shared corner"
                    )));
                }
            }
        }
        let corner = match blended.as_slice() {
            [b] => {
                let cap = faces
                    .into_iter()
                    .find(|f| !b.faces.contains(f))
                    .ok_or_else(|| BlendError::geometry("blended edge has no end face"))?;
                if b.is_fillet() && b.constant_radius().is_none() {
                    let n = self.store.face_normal(cap, 0.0, 0.0);
                    if n.dot(&b.dir).abs() < 1.0 - 1e-9 {
                        return Err(BlendError::geometry(
                            "a variable-radius fillet must end on a face square to its edge",
                        ));
                    }
                }
                Corner::Single { cap }
            }
            [b1, b2] => {
                let shared = b1
                    .faces
                    .into_iter()
                    .find(|f| b2.faces.contains(f))
                    .ok_or_else(|| BlendError::geometry("mitred blends share no face"))?;
                Corner::Mitre {
                    blends: [b1.edge, b2.edge],
                    shared,
                }
            }
            [b1, b2, b3] => Corner::Trihedral {
                blends: [b1.edge, b2.edge, b3.edge],
            },
            _ => return Err(BlendError::geometry("vertex is not an end of any blend")),
        };
        Ok(Node {
            point: self.store.vertices[v].point,
            edges,
            faces,
            corner,
        })
    }

    fn other_face(&self, edge: EdgeId, f: FaceId) -> Result<FaceId, BlendError> {
        self.edge_faces
            .get(edge)
            .and_then(|uses| uses.iter().map(|(g, _)| *g).find(|&g| g != f))
            .ok_or_else(|| BlendError::geometry("boundary edge has no neighbouring face"))
    }

    fn initial_track(&self, f: FaceId, u: &OrientedEdge) -> Result<Track, BlendError> {
        if let Some(b) = self.blends.get(&u.edge) {
            let k = b.side_of(f)?;
            let mut points: Vec<Point3d> = b.sections().iter().map(|&s| b.contact(k, s)).collect();
            let mut dir = b.dir;
            if !u.forward {
                points.reverse();
                dir = -dir;
            }
            return Ok(Track::Run(Run::new(u.edge, points, dir)));
        }
        let (vs, ve) = (self.store.use_start(u), self.store.use_end(u));
        if !self.nodes.contains_key(&vs) && !self.nodes.contains_key(&ve) {
            return Ok(Track::Keep(*u));
        }
        let (a, c) = (self.store.vertices[vs].point, self.store.vertices[ve].point);
        let dir = (c - a)
            .normalized()
            .ok_or_else(|| BlendError::geometry("zero-length edge next to a blend"))?;
        Ok(Track::Run(Run::new(u.edge, vec![a, c], dir)))
    }

    /// Move blended boundary runs onto their contact lines and recompute
    /// the corners of face `f`.
    fn plan_face(&mut self, f: FaceId) -> Result<FacePlan, BlendError> {
        let store = self.store;
        let mut plan = Vec::new();
        for w in store.faces[f].wires() {
            let uses = &store.wires[w].edges;
            let n = uses.len();
            let mut tracks = uses
                .iter()
                .map(|u| self.initial_track(f, u))
                .collect::<Result<Vec<_>, _>>()?;
            let mut caps: Vec<Option<Cap>> = vec![None; n];
            for i in 0..n {
                let j = (i + 1) % n;
                let v = store.use_end(&uses[i]);
                let Some(node) = self.nodes.get(&v) else {
                    continue;
                };
                let (Track::Run(ri), Track::Run(rj)) = (&tracks[i], &tracks[j]) else {
                    return Err(BlendError::geometry("face boundary at a blended vertex is not straight"));
                };
                let (ei, ej) = (uses[i].edge, uses[j].edge);
                let (pi, pj) = if self.blends.contains_key(&ei) || self.blends.contains_key(&ej) {
                    let x = intersect(&ri.end_line, &rj.start_line)?;
                    self.corners.insert((f, v), x);
                    (x, x)
                } else {
                    // Both runs are plain: the blend on the third edge ends on this face.
                    let third = node
                        .edges
                        .into_iter()
                        .find(|&e| e != ei && e != ej)
                        .and_then(|e| self.blends.get(&e))
                        .ok_or_else(|| BlendError::geometry("touched vertex without a blend"))?;
                    let s = third.end_of(v)?;
                    let ki = third.side_of(self.other_face(ei, f)?)?;
                    let kj = third.side_of(self.other_face(ej, f)?)?;
                    let pi = intersect(&ri.end_line, &third.contact_line(ki, s))?;
                    let pj = intersect(&third.contact_line(kj, s), &rj.start_line)?;
                    caps[i] = Some(Cap {
                        blend: third.edge,
                        vertex: v,
                        from: pi,
                        to: pj,
                    });
                    (pi, pj)
                };
                if let Track::Run(r) = &mut tracks[i] {
                    if let Some(last) = r.points.last_mut() {
                        *last = pi;
                    }
                }
                if let Track::Run(r) = &mut tracks[j] {
                    r.points[0] = pj;
                }
            }

            for (use_, track) in uses.iter().zip(&tracks) {
                let Track::Run(run) = track else {
                    continue;
                };
                self.check_run(store, use_, run)?;
                if self.blends.contains_key(&run.edge) {
                    self.tracks.insert((f, run.edge), run.points.clone());
                }
            }
            plan.push(tracks.into_iter().zip(caps).collect());
        }
        Ok(plan)
    }

    /// A re-trimmed run must keep its direction; if it flips, the blends
    /// at its ends have eaten it up.
    fn check_run(&self, store: &EntityStore, use_: &OrientedEdge, run: &Run) -> Result<(), BlendError> {
        let collapsed = run
            .points
            .windows(2)
            .any(|w| (w[1] - w[0]).dot(&run.dir) <= self.params.tolerance);
        if !collapsed {
            return Ok(());
        }
        let others: HashSet<EdgeId> = [store.use_start(use_), store.use_end(use_)]
            .iter()
            .filter_map(|v| self.nodes.get(v))
            .flat_map(|n| n.edges)
            .filter(|e| *e != run.edge && self.blends.contains_key(e))
            .collect();
        if others.len() >= 2 {
            Err(BlendError::collision(format!(
                "{} blends overlap across a face boundary of length {:.6}",
                others.len(),
                store.edges[run.edge].length()
            )))
        } else {
            Err(BlendError::geometry(format!(
                "blend setback exceeds a face boundary of length {:.6}",
                store.edges[run.edge].length()
            )))
        }
    }

    /// Both strips of a mitre must end on the same point of the plain edge.
    fn check_mitres(&self, vertices: &[VertexId]) -> Result<(), BlendError> {
        for v in vertices {
            let Some(node) = self.nodes.get(v) else {
                continue;
            };
            let Corner::Mitre { shared, .. } = node.corner else {
                continue;
            };
            let ends: Vec<Point3d> = node
                .faces
                .iter()
                .filter(|&&f| f != shared)
                .filter_map(|&f| self.corners.get(&(f, *v)).copied())
                .collect();
            match ends.as_slice() {
                [a, b] if a.distance_to(b) <= 10.0 * self.params.tolerance => {}
                [a, b] => {
                    return Err(BlendError::geometry(format!(
                        "mitred blends end {:e} apart on the unblended edge",
                        a.distance_to(b)
                    )));
                }
                _ => return Err(BlendError::geometry("mitre corner was not trimmed")),
            }
        }
        Ok(())
    }

    /// The curve closing blend `b` at vertex `v`, traversed `from` → `to`.
    fn end_piece(&self, b: &Blend, v: VertexId, from: &Point3d, to: &Point3d) -> Result<Piece, BlendError> {
        if from.distance_to(to) <= self.params.tolerance {
            return Err(BlendError::geometry("blend end cap degenerates to a point"));
        }
        if !b.is_fillet() {
            return Piece::line(from, to);
        }
        let node = self
            .nodes
            .get(&v)
            .ok_or_else(|| BlendError::geometry("blend end was not classified"))?;
        let s = b.end_of(v)?;
        let curve = match node.corner {
            Corner::Single { cap } => {
                let normal = self.store.face_normal(cap, 0.0, 0.0);
                fillet::cap_curve(b, s, &node.point, &normal)?
            }
            Corner::Mitre { blends, shared } => {
                let other = blends
                    .into_iter()
                    .find(|&e| e != b.edge)
                    .and_then(|e| self.blends.get(&e))
                    .ok_or_else(|| BlendError::geometry("mitre partner is missing"))?;
                let own = b.faces[1 - b.side_of(shared)?];
                let corner = |f: FaceId| {
                    self.corners
                        .get(&(f, v))
                        .copied()
                        .ok_or_else(|| BlendError::geometry("mitre corner was not trimmed"))
                };
                fillet::mitre_curve(
                    (b, s),
                    (other, other.end_of(v)?),
                    &corner(shared)?,
                    &corner(own)?,
                    10.0 * self.params.tolerance,
                )?
            }
            Corner::Trihedral { .. } => {
                let r = b.radius(s);
                fillet::great_arc(&self.corner_center(node, r)?, r, from, to)?
            }
        };
        fillet::arc_piece(curve, from, to, &node.point)
    }

    fn corner_center(&self, node: &Node, r: f64) -> Result<Point3d, BlendError> {
        let normals = node.faces.map(|f| self.store.face_normal(f, 0.0, 0.0));
        fillet::corner_center(normals, &node.point, r)
    }

    fn retrim_face(&self, builder: &mut ShapeBuilder, f: FaceId, plan: &FacePlan) -> Result<FaceId, BlendError> {
        let mut loops = Vec::with_capacity(plan.len());
        for wire in plan {
            let mut pieces = Vec::new();
            for (track, cap) in wire {
                match track {
                    Track::Run(run) => {
                        for w in run.points.windows(2) {
                            pieces.push(Piece::line(&w[0], &w[1])?);
                        }
                    }
                    Track::Keep(u) => {
                        let e = &self.store.edges[u.edge];
                        pieces.push(Piece {
                            curve: e.curve.clone(),
                            first: e.first,
                            last: e.last,
                            forward: u.forward,
                        });
                    }
                }
                if let Some(cap) = cap {
                    let b = &self.blends[&cap.blend];
                    pieces.push(self.end_piece(b, cap.vertex, &cap.from, &cap.to)?);
                }
            }
            loops.push(pieces);
        }
        let face = &self.store.faces[f];
        make_face(builder, face.surface.clone(), face.reversed, loops)
            .map_err(|e| BlendError::collision(format!("re-trimmed face is invalid: {e}")))
    }

    fn strip_face(&self, builder: &mut ShapeBuilder, b: &Blend) -> Result<FaceId, BlendError> {
        let track = |k: usize| {
            self.tracks
                .get(&(b.faces[k], b.edge))
                .ok_or_else(|| BlendError::geometry("blend contact line was not trimmed"))
        };
        let (t0, t1) = (track(0)?, track(1)?);
        let (first0, last0) = (t0[0], t0[t0.len() - 1]);
        let (first1, last1) = (t1[0], t1[t1.len() - 1]);

        let mut pieces = Vec::new();
        for w in t0.windows(2) {
            pieces.push(Piece::line(&w[0], &w[1])?);
        }
        pieces.push(self.end_piece(b, b.ends[1], &last0, &first1)?);
        for w in t1.windows(2) {
            pieces.push(Piece::line(&w[0], &w[1])?);
        }
        pieces.push(self.end_piece(b, b.ends[0], &last1, &first0)?);
        orient(&mut pieces, &b.bisector());

        let (surface, reversed) = if b.is_fillet() {
            fillet::strip_surface(b, self.params)?
        } else {
            (chamfer::strip_plane(b)?, false)
        };
        make_face(builder, Arc::new(surface), reversed, vec![pieces])
            .map_err(|e| BlendError::geometry(format!("blend strip is invalid: {e}")))
    }

    fn corner_face(
        &self,
        builder: &mut ShapeBuilder,
        v: VertexId,
        node: &Node,
        blends: [EdgeId; 3],
    ) -> Result<FaceId, BlendError> {
        let corner = |f: FaceId| {
            self.corners
                .get(&(f, v))
                .copied()
                .ok_or_else(|| BlendError::geometry("corner face was not trimmed"))
        };
        let points = [corner(node.faces[0])?, corner(node.faces[1])?, corner(node.faces[2])?];
        let normals = node.faces.map(|f| self.store.face_normal(f, 0.0, 0.0));
        let outward = (normals[0] + normals[1] + normals[2]).normalize_or(normals[0]);

        let mut pieces = Vec::with_capacity(3);
        for (a, c) in [(0, 1), (1, 2), (2, 0)] {
            let b = blends
                .iter()
                .filter_map(|e| self.blends.get(e))
                .find(|b| b.faces.contains(&node.faces[a]) && b.faces.contains(&node.faces[c]))
                .ok_or_else(|| BlendError::geometry("corner faces are not joined by a blend"))?;
            pieces.push(self.end_piece(b, v, &points[a], &points[c])?);
        }
        orient(&mut pieces, &outward);

        let first = &self.blends[&blends[0]];
        let surface = if first.is_fillet() {
            let r = first.radius(first.end_of(v)?);
            let center = self.corner_center(node, r)?;
            if let Some(p) = points.iter().find(|p| (p.distance_to(&center) - r).abs() > 10.0 * self.params.tolerance) {
                return Err(BlendError::geometry(format!(
                    "corner point is {:e} off the corner ball",
                    p.distance_to(&center) - r
                )));
            }
            fillet::corner_sphere(center, normals, r)?
        } else {
            chamfer::corner_plane(points, &outward)?
        };
        make_face(builder, Arc::new(surface), false, vec![pieces])
            .map_err(|e| BlendError::geometry(format!("corner patch is invalid: {e}")))
    }
}

/// Closest approach of two lines, as the midpoint between them.
fn intersect((p1, d1): &(Point3d, Vec3), (p2, d2): &(Point3d, Vec3)) -> Result<Point3d, BlendError> {
    let w = *p1 - *p2;
    let (a, b, c) = (d1.dot(d1), d1.dot(d2), d2.dot(d2));
    let (d, e) = (d1.dot(&w), d2.dot(&w));
    let den = a * c - b * b;
    if !(den > 1e-24 * a * c) {
        return Err(BlendError::geometry("trimmed boundary lines are parallel"));
    }
    let s = (b * e - c * d) / den;
    let t = (a * e - b * d) / den;
    Ok((*p1 + *d1 * s).midpoint(&(*p2 + *d2 * t)))
}

/// Traverse `pieces` counter-clockwise around `outward`.
fn orient(pieces: &mut [Piece], outward: &Vec3) {
    let points: Vec<Point3d> = pieces.iter().flat_map(|p| p.samples(8)).collect();
    if newell_normal(&points).dot(outward) < 0.0 {
        pieces.reverse();
        for p in pieces.iter_mut() {
            p.forward = !p.forward;
        }
    }
}

fn make_face(
    builder: &mut ShapeBuilder,
    surface: Arc<Surface>,
    reversed: bool,
    loops: Vec<Vec<Piece>>,
) -> Result<FaceId, TopologyError> {
    let mut wires = Vec::with_capacity(loops.len());
    for pieces in loops {
        let vertices: Vec<VertexId> = pieces.iter().map(|p| builder.make_vertex(p.start())).collect();
        let mut uses = Vec::with_capacity(pieces.len());
        for (i, p) in pieces.iter().enumerate() {
            let (a, b) = (vertices[i], vertices[(i + 1) % pieces.len()]);
            let (start, end) = if p.forward { (a, b) } else { (b, a) };
            let edge = builder.make_edge(p.curve.clone(), p.first, p.last, start, end)?;
            uses.push(OrientedEdge::new(edge, p.forward));
        }
        wires.push(builder.make_wire(uses, true)?);
    }
    if wires.is_empty() {
        return Err(TopologyError::InvalidInput("face without boundary".into()));
    }
    let outer = wires.remove(0);
    builder.make_face(surface, outer, wires, reversed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::{chamfer, edge_convexity, fillet, BlendEngine, DefaultBlendEngine};
    use crate::error::ErrorKind;
    use crate::topology::primitives::{make_box, make_prism, Profile};
    use crate::topology::properties::mass_properties;
    use std::f64::consts::PI;

    fn volume(s: &Shape) -> f64 {
        mass_properties(s, 1e-5).unwrap().volume
    }

    /// Edge of `shape` whose midpoint is `p`.
    fn edge_at(shape: &Shape, p: Point3d) -> EdgeId {
        let store = shape.store();
        shape
            .edges()
            .into_iter()
            .find(|&e| {
                let edge = &store.edges[e];
                edge.point_at(edge.mid_parameter()).distance_to(&p) < 1e-9
            })
            .unwrap()
    }

    fn l_block() -> Shape {
        let profile = Profile::Polygon(vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
            Point3d::new(2.0, 1.0, 0.0),
            Point3d::new(1.0, 1.0, 0.0),
            Point3d::new(1.0, 2.0, 0.0),
            Point3d::new(0.0, 2.0, 0.0),
        ]);
        make_prism(&profile, Vec3::Z).unwrap()
    }

    #[test]
    fn test_single_edge_fillet() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let top_front = edge_at(&b, Point3d::new(0.5, 0.0, 1.0));
        let r = 0.2;
        let result = fillet(&b, &[top_front], &BlendProfile::Constant(r)).unwrap();
        assert!(result.is_closed());
        assert_eq!(result.counts().faces, 7);
        let expected = 1.0 - (r * r - PI * r * r / 4.0);
        assert!((volume(&result) - expected).abs() < 2e-5);
    }

    #[test]
    fn test_fillet_all_box_edges_matches_steiner_volume() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let r = 0.1;
        let result = fillet(&b, &b.edges(), &BlendProfile::Constant(r)).unwrap();
        assert!(result.is_closed());
        // 6 trimmed faces, 12 strips, 8 corner patches.
        assert_eq!(result.counts().faces, 26);
        let core = 1.0 - 2.0 * r;
        let expected = core.powi(3) + 6.0 * r * core * core + PI * r * r * 3.0 * core + 4.0 / 3.0 * PI * r.powi(3);
        assert!((volume(&result) - expected).abs() < 1e-4);
        for e in result.edges() {
            assert_eq!(edge_convexity(&result, e, 1e-6).unwrap(), Convexity::Smooth);
        }
    }

    #[test]
    fn test_two_edges_mitre() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let front = edge_at(&b, Point3d::new(0.5, 0.0, 1.0));
        let right = edge_at(&b, Point3d::new(1.0, 0.5, 1.0));
        let r = 0.2;
        let result = fillet(&b, &[front, right], &BlendProfile::Constant(r)).unwrap();
        assert!(result.is_closed());
        assert_eq!(result.counts().faces, 8);
        // Each strip is cut by the mitre plane, so a removed section of area
        // `a` runs for 1 - d, with d its centroid distance from the edge.
        let a = r * r * (1.0 - PI / 4.0);
        let d = r * (5.0 / 6.0 - PI / 4.0) / (1.0 - PI / 4.0);
        let expected = 1.0 - 2.0 * a * (1.0 - d);
        assert!((volume(&result) - expected).abs() < 2e-5);
    }

    #[test]
    fn test_concave_fillet_adds_material() {
        let block = l_block();
        let inner = edge_at(&block, Point3d::new(1.0, 1.0, 0.5));
        let r = 0.2;
        let result = fillet(&block, &[inner], &BlendProfile::Constant(r)).unwrap();
        assert!(result.is_closed());
        let expected = 3.0 + (r * r - PI * r * r / 4.0);
        assert!((volume(&result) - expected).abs() < 2e-5);
    }

    #[test]
    fn test_variable_radius_fillet() {
        let b = make_box(Point3d::ORIGIN, 2.0, 1.0, 1.0).unwrap();
        let front = edge_at(&b, Point3d::new(1.0, 0.0, 1.0));
        let result = fillet(&b, &[front], &BlendProfile::Linear(0.1, 0.3)).unwrap();
        assert!(result.is_closed());
        // Removed area r^2 (1 - pi / 4) integrated over the edge.
        let (r0, r1, len) = (0.1f64, 0.3f64, 2.0);
        let mean_r2 = (r0 * r0 + r0 * r1 + r1 * r1) / 3.0;
        let expected = 2.0 - (1.0 - PI / 4.0) * mean_r2 * len;
        assert!((volume(&result) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_symmetric_and_asymmetric_chamfer() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let edge = edge_at(&b, Point3d::new(0.5, 0.0, 1.0));
        let c = chamfer(&b, &[edge], 0.2).unwrap();
        assert!(c.is_closed());
        assert!((volume(&c) - (1.0 - 0.5 * 0.2 * 0.2)).abs() < 1e-9);

        let a = DefaultBlendEngine::default().chamfer(&b, &[edge], 0.1, 0.3).unwrap();
        assert!((volume(&a) - (1.0 - 0.5 * 0.1 * 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_chamfer_all_box_edges() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let d = 0.1;
        let result = chamfer(&b, &b.edges(), d).unwrap();
        assert!(result.is_closed());
        assert_eq!(result.counts().faces, 26);
        // Twelve bars of section d^2 / 2 between the corners; each corner
        // cube keeps only the tetrahedron behind its triangle.
        let expected = 1.0 - 12.0 * 0.5 * d * d * (1.0 - 2.0 * d) - 8.0 * (5.0 / 6.0) * d.powi(3);
        assert!((volume(&result) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_oversized_radius_collides() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let err = fillet(&b, &b.edges(), &BlendProfile::Constant(0.6)).unwrap_err();
        assert!(matches!(err, BlendError::BlendCollision(_)), "{err}");
        assert_eq!(err.kind(), ErrorKind::TopologicalInconsistency);
    }

    #[test]
    fn test_radius_wider_than_face_fails() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let edge = edge_at(&b, Point3d::new(0.5, 0.0, 1.0));
        let err = fillet(&b, &[edge], &BlendProfile::Constant(1.5)).unwrap_err();
        assert!(matches!(err, BlendError::BlendGeometryFailure(_)), "{err}");
    }

    #[test]
    fn test_unequal_radii_at_corner_collide() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let front = edge_at(&b, Point3d::new(0.5, 0.0, 1.0));
        let right = edge_at(&b, Point3d::new(1.0, 0.5, 1.0));
        let engine = DefaultBlendEngine::default();
        let once = engine.fillet(&b, &[front], &BlendProfile::Constant(0.1)).unwrap();
        assert!(once.is_closed());
        let requests = [
            (front, EdgeKind::Fillet(BlendProfile::Constant(0.1))),
            (right, EdgeKind::Fillet(BlendProfile::Constant(0.2))),
        ];
        let err = blend_edges(&b, &requests, &BlendParameters::default()).unwrap_err();
        assert!(matches!(err, BlendError::BlendCollision(_)), "{err}");
    }

    #[test]
    fn test_unsupported_curved_edges_are_rejected() {
        let cone = crate::topology::primitives::make_cone(Point3d::ORIGIN, Vec3::Z, 1.0, 0.5, 1.0).unwrap();
        let store = cone.store();
        let rim = cone
            .edges()
            .into_iter()
            .find(|&e| matches!(*store.edges[e].curve, Curve::Circle(_)))
            .unwrap();
        let err = fillet(&cone, &[rim], &BlendProfile::Constant(0.1)).unwrap_err();
        assert!(matches!(err, BlendError::BlendGeometryFailure(_)), "{err}");

        let c = crate::topology::primitives::make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 1.0).unwrap();
        let seam = c
            .edges()
            .into_iter()
            .find(|&e| c.store().edges[e].curve.is_linear())
            .unwrap();
        let err = fillet(&c, &[seam], &BlendProfile::Constant(0.1)).unwrap_err();
        assert!(matches!(err, BlendError::BlendGeometryFailure(_)), "{err}");
    }

    #[test]
    fn test_empty_selection_is_invalid() {
        let b = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let err = fillet(&b, &[], &BlendProfile::Constant(0.1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
