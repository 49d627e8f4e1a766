//! Topology checks: Euler-Poincaré, edge manifoldness, wire closure and
//! orientation consistency.

use std::collections::HashSet;

use tracing::debug;

use crate::topology::brep::*;
use crate::topology::shape::Shape;

use super::types::*;

pub(crate) fn check_topology(shape: &Shape, findings: &mut Findings, metrics: &mut ValidationMetrics) {
    let store = shape.store();
    let solid_shells: HashSet<ShellId> = shape
        .solids()
        .into_iter()
        .flat_map(|s| store.solids[s].shells().collect::<Vec<_>>())
        .collect();

    for shell in shape.shells() {
        let must_close = solid_shells.contains(&shell) || store.shells[shell].closed;
        check_shell_edges(store, shell, must_close, findings);
        if must_close {
            if let Some(genus) = check_euler(store, shell, findings) {
                metrics.genus.push(genus);
            }
        }
    }
    for face in shape.faces() {
        check_wires(store, face, findings);
    }
    debug!(errors = findings.errors.len(), "topology checks complete");
}

fn check_shell_edges(store: &EntityStore, shell: ShellId, must_close: bool, findings: &mut Findings) {
    let map = store.edge_face_map(ShapeRef::Shell(shell));
    for (edge, uses) in &map {
        if store.edges[edge].degenerated {
            continue;
        }
        let entity = ShapeRef::Edge(edge);
        match uses.as_slice() {
            [_] if must_close => findings.push(
                ValidationIssue::error(ErrorCode::FreeEdge, entity, "edge bounds a single face of a closed shell")
                    .in_parent(ShapeRef::Shell(shell)),
            ),
            [_] => findings.push(
                ValidationIssue::warning(ErrorCode::FreeEdge, entity, "open shell boundary")
                    .in_parent(ShapeRef::Shell(shell)),
            ),
            [(fa, ua), (_, ub)] if ua.forward == ub.forward => findings.push(
                ValidationIssue::error(
                    ErrorCode::BadOrientationOfFaces,
                    entity,
                    "both faces traverse the edge in the same direction",
                )
                .in_parent(ShapeRef::Face(*fa)),
            ),
            [_, _] => {}
            more => findings.push(
                ValidationIssue::error(
                    ErrorCode::NonManifoldEdge,
                    entity,
                    format!("edge is used {} times", more.len()),
                )
                .in_parent(ShapeRef::Shell(shell)),
            ),
        }
    }
}

/// V - E + F - R = 2(1 - g) for a closed orientable shell, where R counts
/// the inner rings of faces and degenerated edges are left out. Returns
/// the genus when the characteristic is admissible.
fn check_euler(store: &EntityStore, shell: ShellId, findings: &mut Findings) -> Option<i64> {
    let root = ShapeRef::Shell(shell);
    let v = store.vertices_of(root).len() as i64;
    let e = store
        .edges_of(root)
        .into_iter()
        .filter(|&e| !store.edges[e].degenerated)
        .count() as i64;
    let faces = &store.shells[shell].faces;
    let f = faces.len() as i64;
    let rings: i64 = faces.iter().map(|&face| store.faces[face].inners.len() as i64).sum();
    let chi = v - e + f - rings;
    if chi > 2 || chi % 2 != 0 {
        findings.push(
            ValidationIssue::error(
                ErrorCode::EulerPoincareViolation,
                root,
                format!("V={v} E={e} F={f} R={rings} gives characteristic {chi}"),
            )
            .measured(chi as f64, 2.0),
        );
        return None;
    }
    Some((2 - chi) / 2)
}

fn check_wires(store: &EntityStore, face: FaceId, findings: &mut Findings) {
    for w in store.faces[face].wires() {
        let uses = &store.wires[w].edges;
        if uses.is_empty() {
            findings.push(
                ValidationIssue::error(ErrorCode::WireNotClosed, ShapeRef::Wire(w), "face wire has no edges")
                    .in_parent(ShapeRef::Face(face)),
            );
            continue;
        }
        let n = uses.len();
        let gap = (0..n).find(|&i| store.use_end(&uses[i]) != store.use_start(&uses[(i + 1) % n]));
        if let Some(i) = gap {
            let (a, b) = (store.use_end(&uses[i]), store.use_start(&uses[(i + 1) % n]));
            let distance = store.vertices[a].point.distance_to(&store.vertices[b].point);
            findings.push(
                ValidationIssue::error(
                    ErrorCode::WireNotClosed,
                    ShapeRef::Wire(w),
                    format!("edge use {i} does not end where the next one starts"),
                )
                .in_parent(ShapeRef::Face(face))
                .measured(distance, 0.0),
            );
        }
    }
}
