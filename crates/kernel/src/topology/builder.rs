//! Checked construction of topology, bottom-up.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::TopologyError;
use crate::geometry::curves::Curve;
use crate::geometry::nurbs::BSplineCurve;
use crate::geometry::point::Point3d;
use crate::geometry::polygon;
use crate::geometry::surfaces::Surface;
use crate::Tolerance;

use super::brep::*;
use super::domain::FaceDomain;
use super::shape::Shape;

/// Deflection used when checking face boundaries in parameter space.
const CHECK_DEFLECTION: f64 = 1e-3;

/// Incremental builder over a fresh [`EntityStore`].
///
/// Every `make_*` operation validates its input against the builder's
/// tolerance and raises entity tolerances so that vertex >= edge >= face.
#[derive(Debug, Clone, Default)]
pub struct ShapeBuilder {
    store: EntityStore,
    tolerance: Tolerance,
}

impl ShapeBuilder {
    pub fn new(tolerance: Tolerance) -> Self {
        Self {
            store: EntityStore::new(),
            tolerance,
        }
    }

    /// Continue building on top of an existing store.
    pub fn from_store(store: EntityStore, tolerance: Tolerance) -> Self {
        Self { store, tolerance }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn tolerance(&self) -> &Tolerance {
        &self.tolerance
    }

    pub fn finish(self, root: ShapeRef) -> Shape {
        Shape::from_parts(self.store, root)
    }

    pub fn into_store(self) -> EntityStore {
        self.store
    }

    pub fn make_vertex(&mut self, point: Point3d) -> VertexId {
        self.store.vertices.insert(Vertex {
            point,
            tolerance: self.tolerance.coincidence,
        })
    }

    /// Edge over `curve` restricted to [first, last]. The curve ends must
    /// meet the vertices within tolerance.
    pub fn make_edge(
        &mut self,
        curve: Arc<Curve>,
        first: f64,
        last: f64,
        start: VertexId,
        end: VertexId,
    ) -> Result<EdgeId, TopologyError> {
        if !(first.is_finite() && last.is_finite()) || last - first <= self.tolerance.parametric {
            return Err(TopologyError::InvalidInput(format!(
                "edge parameter range [{first}, {last}] is empty"
            )));
        }
        let edge_tol = self.tolerance.coincidence;
        for (vertex, t) in [(start, first), (end, last)] {
            let v = &self.store.vertices[vertex];
            let gap = curve.point(t).distance_to(&v.point);
            let allowed = v.tolerance.max(edge_tol);
            if gap > allowed {
                return Err(TopologyError::ToleranceViolation(format!(
                    "{} endpoint at t = {t} is {gap:e} from its vertex (tolerance {allowed:e})",
                    curve.curve_type_name()
                )));
            }
        }
        self.raise_vertex_tolerance(start, edge_tol);
        self.raise_vertex_tolerance(end, edge_tol);
        Ok(self.store.edges.insert(Edge {
            curve,
            first,
            last,
            start,
            end,
            tolerance: edge_tol,
            degenerated: false,
        }))
    }

    /// Straight edge between two existing vertices.
    pub fn make_line_edge(&mut self, start: VertexId, end: VertexId) -> Result<EdgeId, TopologyError> {
        let a = self.store.vertices[start].point;
        let b = self.store.vertices[end].point;
        let (curve, first, last) = Curve::segment(a, b)?;
        self.make_edge(Arc::new(curve), first, last, start, end)
    }

    /// Edge collapsed onto `vertex` (pole or apex).
    pub fn make_degenerate_edge(&mut self, vertex: VertexId) -> Result<EdgeId, TopologyError> {
        let p = self.store.vertices[vertex].point;
        let curve = BSplineCurve::clamped_uniform(1, vec![p, p], None)?;
        Ok(self.store.edges.insert(Edge {
            curve: Arc::new(Curve::BSpline(curve)),
            first: 0.0,
            last: 1.0,
            start: vertex,
            end: vertex,
            tolerance: self.tolerance.coincidence,
            degenerated: true,
        }))
    }

    /// Chain of edge uses. Consecutive uses must share a vertex or meet
    /// within tolerance.
    pub fn make_wire(&mut self, uses: Vec<OrientedEdge>, require_closed: bool) -> Result<WireId, TopologyError> {
        if uses.is_empty() {
            return Err(TopologyError::InvalidInput("wire without edges".into()));
        }
        let n = uses.len();
        for i in 0..n {
            if i + 1 == n && !require_closed {
                break;
            }
            let a = self.store.use_end(&uses[i]);
            let b = self.store.use_start(&uses[(i + 1) % n]);
            if a != b {
                let gap = self.store.vertices[a].point.distance_to(&self.store.vertices[b].point);
                let tolerance = self.store.vertices[a].tolerance.max(self.store.vertices[b].tolerance);
                if gap > tolerance {
                    return Err(TopologyError::OpenWire { index: i, gap, tolerance });
                }
            }
        }
        let closed = {
            let a = self.store.use_end(&uses[n - 1]);
            let b = self.store.use_start(&uses[0]);
            a == b || self.store.vertices[a].point.distance_to(&self.store.vertices[b].point) <= self.tolerance.coincidence
        };
        Ok(self.store.wires.insert(Wire { edges: uses, closed }))
    }

    /// Face bounded by closed wires on `surface`. The wires must run
    /// counter-clockwise around the outward normal, stay inside the surface
    /// domain and not self-intersect in parameter space.
    pub fn make_face(
        &mut self,
        surface: Arc<Surface>,
        outer: WireId,
        inners: Vec<WireId>,
        reversed: bool,
    ) -> Result<FaceId, TopologyError> {
        for &w in std::iter::once(&outer).chain(&inners) {
            if !self.store.wires[w].closed {
                return Err(TopologyError::InvalidInput("face wire is not closed".into()));
            }
        }
        let face_tol = self.tolerance.coincidence;
        let id = self.store.faces.insert(Face {
            surface,
            outer,
            inners,
            reversed,
            tolerance: face_tol,
        });
        if let Err(e) = self.check_face_domain(id) {
            self.store.faces.remove(id);
            return Err(e);
        }
        self.raise_face_tolerances(id);
        Ok(id)
    }

    fn check_face_domain(&self, id: FaceId) -> Result<(), TopologyError> {
        let face = &self.store.faces[id];
        let domain = FaceDomain::with_deflection(&self.store, id, CHECK_DEFLECTION)?;
        if !domain.is_simple() {
            return Err(TopologyError::InvalidInput(
                "face boundary self-intersects in parameter space".into(),
            ));
        }
        let ((u0, u1), (v0, v1)) = face.surface.domain();
        let margin = 1e-9;
        let u_bounded = face.surface.u_period().is_none();
        let v_bounded = face.surface.v_period().is_none();
        let outside = std::iter::once(&domain.outer)
            .chain(&domain.inners)
            .flat_map(|l| l.uv.iter())
            .any(|p| {
                (u_bounded && (p.x < u0 - margin || p.x > u1 + margin))
                    || (v_bounded && (p.y < v0 - margin || p.y > v1 + margin))
            });
        if outside {
            return Err(TopologyError::InvalidInput(format!(
                "face boundary leaves the {} parameter domain",
                face.surface.surface_type_name()
            )));
        }
        let outer_area = polygon::signed_area(&domain.outer.uv);
        if (outer_area > 0.0) == face.reversed {
            return Err(TopologyError::InvalidInput(
                "outer wire does not run counter-clockwise around the face normal".into(),
            ));
        }
        for inner in &domain.inners {
            if (polygon::signed_area(&inner.uv) > 0.0) != face.reversed {
                return Err(TopologyError::InvalidInput("inner wire orientation matches the outer wire".into()));
            }
            if !inner.uv.iter().all(|p| polygon::point_in_polygon(p, &domain.outer.uv)) {
                return Err(TopologyError::InvalidInput("inner wire is not enclosed by the outer wire".into()));
            }
        }
        Ok(())
    }

    /// Shell over `faces`; `closed` is derived from edge usage.
    pub fn make_shell(&mut self, faces: Vec<FaceId>) -> ShellId {
        let id = self.store.shells.insert(Shell { faces, closed: false });
        let (free, non_manifold) = self.store.manifold_defects(ShapeRef::Shell(id));
        self.store.shells[id].closed = free == 0 && non_manifold == 0;
        id
    }

    /// Solid bounded by closed shells.
    pub fn make_solid(&mut self, outer: ShellId, inner: Vec<ShellId>) -> Result<SolidId, TopologyError> {
        for &shell in std::iter::once(&outer).chain(&inner) {
            let (free_edges, non_manifold_edges) = self.store.manifold_defects(ShapeRef::Shell(shell));
            if free_edges > 0 || non_manifold_edges > 0 {
                return Err(TopologyError::NonManifoldShell {
                    free_edges,
                    non_manifold_edges,
                });
            }
            self.store.shells[shell].closed = true;
        }
        debug!(voids = inner.len(), "solid created");
        Ok(self.store.solids.insert(Solid { outer, inner }))
    }

    pub fn make_compound(&mut self, members: Vec<ShapeRef>) -> CompoundId {
        self.store.compounds.insert(Compound { members })
    }

    /// Copy face `id` of `src` verbatim. Edges and vertices already copied
    /// through `map` are shared; `flip` turns the face inside out.
    pub fn copy_face(&mut self, src: &EntityStore, id: FaceId, map: &mut CopyMap, flip: bool) -> FaceId {
        let face = &src.faces[id];
        let wires: Vec<WireId> = face
            .wires()
            .map(|w| {
                let mut uses: Vec<OrientedEdge> = src.wires[w]
                    .edges
                    .iter()
                    .map(|u| OrientedEdge {
                        edge: self.copy_edge(src, u.edge, map),
                        ..*u
                    })
                    .collect();
                if flip {
                    flip_uses(&mut uses);
                }
                self.store.wires.insert(Wire {
                    edges: uses,
                    closed: true,
                })
            })
            .collect();
        let mut copy = face.clone();
        copy.outer = wires[0];
        copy.inners = wires[1..].to_vec();
        copy.reversed = face.reversed != flip;
        self.store.faces.insert(copy)
    }

    fn copy_edge(&mut self, src: &EntityStore, id: EdgeId, map: &mut CopyMap) -> EdgeId {
        if let Some(&e) = map.edges.get(&id) {
            return e;
        }
        let mut edge = src.edges[id].clone();
        for v in [&mut edge.start, &mut edge.end] {
            *v = match map.vertices.get(v) {
                Some(&copied) => copied,
                None => {
                    let copied = self.store.vertices.insert(src.vertices[*v].clone());
                    map.vertices.insert(*v, copied);
                    copied
                }
            };
        }
        let e = self.store.edges.insert(edge);
        map.edges.insert(id, e);
        e
    }

    fn raise_vertex_tolerance(&mut self, v: VertexId, tol: f64) {
        let vertex = &mut self.store.vertices[v];
        vertex.tolerance = vertex.tolerance.max(tol);
    }

    fn raise_face_tolerances(&mut self, face: FaceId) {
        let face_tol = self.store.faces[face].tolerance;
        let wires: Vec<WireId> = self.store.faces[face].wires().collect();
        for w in wires {
            let edges: Vec<EdgeId> = self.store.wires[w].edges.iter().map(|u| u.edge).collect();
            for e in edges {
                let edge = &mut self.store.edges[e];
                edge.tolerance = edge.tolerance.max(face_tol);
                let (s, t, tol) = (edge.start, edge.end, edge.tolerance);
                self.raise_vertex_tolerance(s, tol);
                self.raise_vertex_tolerance(t, tol);
            }
        }
    }
}

/// Entities already copied from one source store.
#[derive(Debug, Clone, Default)]
pub struct CopyMap {
    vertices: HashMap<VertexId, VertexId>,
    edges: HashMap<EdgeId, EdgeId>,
}

/// Traverse a wire the other way round. Parameter-space lines follow the
/// edge, so they stay as they are.
pub fn flip_uses(uses: &mut [OrientedEdge]) {
    uses.reverse();
    for u in uses.iter_mut() {
        u.forward = !u.forward;
    }
}
