use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::curves::Curve;
use crate::geometry::point::Point2d;
use crate::geometry::surfaces::Surface;
use crate::geometry::transform::Transform;

use super::brep::*;

/// An owned topology graph: an entity arena plus the root entity.
///
/// Operations borrow shapes immutably and return fresh ones; dropping a
/// shape releases everything it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    store: EntityStore,
    root: ShapeRef,
}

/// Entity counts below a shape's root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopologyCounts {
    pub vertices: usize,
    pub edges: usize,
    pub faces: usize,
    pub shells: usize,
    pub solids: usize,
}

impl Shape {
    pub fn from_parts(store: EntityStore, root: ShapeRef) -> Self {
        Self { store, root }
    }

    pub fn into_parts(self) -> (EntityStore, ShapeRef) {
        (self.store, self.root)
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn root(&self) -> ShapeRef {
        self.root
    }

    pub fn faces(&self) -> Vec<FaceId> {
        self.store.faces_of(self.root)
    }

    pub fn edges(&self) -> Vec<EdgeId> {
        self.store.edges_of(self.root)
    }

    pub fn vertices(&self) -> Vec<VertexId> {
        self.store.vertices_of(self.root)
    }

    pub fn shells(&self) -> Vec<ShellId> {
        self.store.shells_of(self.root)
    }

    pub fn solids(&self) -> Vec<SolidId> {
        self.store.solids_of(self.root)
    }

    pub fn counts(&self) -> TopologyCounts {
        TopologyCounts {
            vertices: self.vertices().len(),
            edges: self.edges().len(),
            faces: self.faces().len(),
            shells: self.shells().len(),
            solids: self.solids().len(),
        }
    }

    /// Every shell below the root is closed.
    pub fn is_closed(&self) -> bool {
        let shells = self.shells();
        !shells.is_empty() && shells.iter().all(|&s| self.store.shells[s].closed)
    }

    /// Copy every entity below the root into `target`, returning the root's
    /// counterpart there. Geometry is shared, not duplicated.
    pub fn copy_into(&self, target: &mut EntityStore) -> ShapeRef {
        let mut copier = Copier {
            src: &self.store,
            dst: target,
            vertices: HashMap::new(),
            edges: HashMap::new(),
            wires: HashMap::new(),
            faces: HashMap::new(),
            shells: HashMap::new(),
        };
        copier.copy(self.root)
    }

    /// Copy of the shape mapped through `t`. Geometry is rebuilt, so the
    /// result shares nothing with `self`. A mirror flips every face and
    /// reverses every wire to keep normals pointing outward.
    pub fn transformed(&self, t: &Transform) -> Shape {
        let mut store = self.store.clone();
        let mirror = t.is_mirror();

        for v in store.vertices.values_mut() {
            v.point = t.transform_point(&v.point);
            v.tolerance *= t.scale_factor();
        }

        let mut curves: HashMap<*const Curve, Arc<Curve>> = HashMap::new();
        for e in store.edges.values_mut() {
            let scale = e.curve.parameter_scale(t);
            let key = Arc::as_ptr(&e.curve);
            let mapped = curves
                .entry(key)
                .or_insert_with(|| Arc::new(e.curve.transformed(t)))
                .clone();
            e.curve = mapped;
            if !e.degenerated {
                e.first *= scale;
                e.last *= scale;
            }
            e.tolerance *= t.scale_factor();
        }

        let mut surfaces: HashMap<*const Surface, Arc<Surface>> = HashMap::new();
        let mut face_scales: HashMap<FaceId, (f64, f64)> = HashMap::new();
        for (id, f) in store.faces.iter_mut() {
            face_scales.insert(id, f.surface.parameter_scales(t));
            let key = Arc::as_ptr(&f.surface);
            f.surface = surfaces
                .entry(key)
                .or_insert_with(|| Arc::new(f.surface.transformed(t)))
                .clone();
            if mirror {
                f.reversed = !f.reversed;
            }
            f.tolerance *= t.scale_factor();
        }

        for (face_id, (su, sv)) in face_scales {
            let wires: Vec<WireId> = store.faces[face_id].wires().collect();
            for w in wires {
                for use_ in &mut store.wires[w].edges {
                    if let Some(pc) = use_.pcurve.as_mut() {
                        pc.start = Point2d::new(pc.start.x * su, pc.start.y * sv);
                        pc.end = Point2d::new(pc.end.x * su, pc.end.y * sv);
                    }
                }
            }
        }

        if mirror {
            for w in store.wires.values_mut() {
                w.edges.reverse();
                w.edges.iter_mut().for_each(|u| u.forward = !u.forward);
            }
        }

        debug!(faces = store.faces.len(), mirror, "shape transformed");
        Shape { store, root: self.root }
    }
}

struct Copier<'a> {
    src: &'a EntityStore,
    dst: &'a mut EntityStore,
    vertices: HashMap<VertexId, VertexId>,
    edges: HashMap<EdgeId, EdgeId>,
    wires: HashMap<WireId, WireId>,
    faces: HashMap<FaceId, FaceId>,
    shells: HashMap<ShellId, ShellId>,
}

impl Copier<'_> {
    fn copy(&mut self, r: ShapeRef) -> ShapeRef {
        let src = self.src;
        match r {
            ShapeRef::Vertex(v) => ShapeRef::Vertex(self.vertex(v)),
            ShapeRef::Edge(e) => ShapeRef::Edge(self.edge(e)),
            ShapeRef::Wire(w) => ShapeRef::Wire(self.wire(w)),
            ShapeRef::Face(f) => ShapeRef::Face(self.face(f)),
            ShapeRef::Shell(s) => ShapeRef::Shell(self.shell(s)),
            ShapeRef::Solid(s) => {
                let solid = &src.solids[s];
                let outer = self.shell(solid.outer);
                let inner = solid.inner.iter().map(|&sh| self.shell(sh)).collect();
                ShapeRef::Solid(self.dst.solids.insert(Solid { outer, inner }))
            }
            ShapeRef::Compound(c) => {
                let members = src.compounds[c].members.iter().map(|&m| self.copy(m)).collect();
                ShapeRef::Compound(self.dst.compounds.insert(Compound { members }))
            }
        }
    }

    fn vertex(&mut self, v: VertexId) -> VertexId {
        if let Some(&id) = self.vertices.get(&v) {
            return id;
        }
        let id = self.dst.vertices.insert(self.src.vertices[v].clone());
        self.vertices.insert(v, id);
        id
    }

    fn edge(&mut self, e: EdgeId) -> EdgeId {
        if let Some(&id) = self.edges.get(&e) {
            return id;
        }
        let mut edge = self.src.edges[e].clone();
        edge.start = self.vertex(edge.start);
        edge.end = self.vertex(edge.end);
        let id = self.dst.edges.insert(edge);
        self.edges.insert(e, id);
        id
    }

    fn wire(&mut self, w: WireId) -> WireId {
        if let Some(&id) = self.wires.get(&w) {
            return id;
        }
        let mut wire = self.src.wires[w].clone();
        for u in &mut wire.edges {
            u.edge = self.edge(u.edge);
        }
        let id = self.dst.wires.insert(wire);
        self.wires.insert(w, id);
        id
    }

    fn face(&mut self, f: FaceId) -> FaceId {
        if let Some(&id) = self.faces.get(&f) {
            return id;
        }
        let mut face = self.src.faces[f].clone();
        face.outer = self.wire(face.outer);
        face.inners = face.inners.iter().map(|&w| self.wire(w)).collect();
        let id = self.dst.faces.insert(face);
        self.faces.insert(f, id);
        id
    }

    fn shell(&mut self, s: ShellId) -> ShellId {
        if let Some(&id) = self.shells.get(&s) {
            return id;
        }
        let mut shell = self.src.shells[s].clone();
        shell.faces = shell.faces.iter().map(|&f| self.face(f)).collect();
        let id = self.dst.shells.insert(shell);
        self.shells.insert(s, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Point3d;
    use crate::geometry::vector::Vec3;
    use crate::topology::primitives::{make_box, make_cylinder};
    use crate::topology::properties::mass_properties;

    #[test]
    fn test_counts_of_box() {
        let shape = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let c = shape.counts();
        assert_eq!((c.vertices, c.edges, c.faces, c.shells, c.solids), (8, 12, 6, 1, 1));
        assert!(shape.is_closed());
    }

    #[test]
    fn test_translation_moves_every_vertex() {
        let shape = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let moved = shape.transformed(&Transform::translation(1.0, 2.0, 3.0));
        for (a, b) in shape.vertices().iter().zip(moved.vertices()) {
            let pa = shape.store().vertices[*a].point;
            let pb = moved.store().vertices[b].point;
            assert!((pb.x - pa.x - 1.0).abs() < 1e-12);
            assert!((pb.z - pa.z - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_copy_into_shares_nothing_but_geometry() {
        let a = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let b = make_cylinder(Point3d::new(5.0, 0.0, 0.0), Vec3::Z, 1.0, 1.0).unwrap();
        let mut store = a.store().clone();
        let ra = a.root();
        let rb = b.copy_into(&mut store);
        let mut builder = crate::topology::builder::ShapeBuilder::from_store(store, crate::Tolerance::default());
        let root = ShapeRef::Compound(builder.make_compound(vec![ra, rb]));
        let both = builder.finish(root);
        assert_eq!(both.counts().faces, 6 + 3);
        assert_eq!(both.counts().solids, 2);
    }

    #[test]
    fn test_mirror_keeps_positive_volume() {
        let shape = make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 2.0).unwrap();
        let mirror = Transform::mirror(Point3d::ORIGIN, Vec3::X).unwrap();
        let m = mass_properties(&shape.transformed(&mirror), 1e-4).unwrap();
        assert!((m.volume - std::f64::consts::PI * 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_scaling_scales_volume() {
        let shape = make_box(Point3d::ORIGIN, 1.0, 2.0, 3.0).unwrap();
        let t = Transform::scaling_about(Point3d::ORIGIN, 2.0).unwrap();
        let m = mass_properties(&shape.transformed(&t), 1e-4).unwrap();
        assert!((m.volume - 48.0).abs() < 1e-9);
    }
}
