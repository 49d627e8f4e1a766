//! Geometric consistency checks.
//!
//! Vertices must sit on the ends of their edge curves and on the surfaces
//! of the faces using them, edge curves must run along those surfaces, and
//! entity tolerances must nest as vertex >= edge >= face.

use std::collections::HashSet;

use tracing::debug;

use crate::topology::brep::*;
use crate::topology::shape::Shape;

use super::config::ValidationConfig;
use super::types::*;

pub(crate) fn check_geometry(
    shape: &Shape,
    config: &ValidationConfig,
    findings: &mut Findings,
    metrics: &mut ValidationMetrics,
) {
    let store = shape.store();
    let stats = &mut metrics.tolerance_stats;
    for e in shape.edges() {
        check_edge_ends(store, e, config, findings, stats);
    }
    for face in shape.faces() {
        check_face_placement(store, face, config, findings, stats);
    }
    check_tolerances(shape, config, findings, stats);
    debug!(
        max_vertex_gap = stats.max_vertex_gap,
        max_edge_gap = stats.max_edge_gap,
        "geometry checks complete"
    );
}

/// Vertex-on-curve and zero-length checks for one edge.
fn check_edge_ends(
    store: &EntityStore,
    id: EdgeId,
    config: &ValidationConfig,
    findings: &mut Findings,
    stats: &mut ToleranceStats,
) {
    let edge = &store.edges[id];
    if edge.degenerated {
        return;
    }
    for (v, t) in [(edge.start, edge.first), (edge.end, edge.last)] {
        let vertex = &store.vertices[v];
        let gap = vertex.point.distance_to(&edge.point_at(t));
        stats.max_vertex_gap = stats.max_vertex_gap.max(gap);
        let allowed = vertex.tolerance.max(edge.tolerance).max(config.tolerance.resolution);
        if gap > allowed {
            findings.push(
                ValidationIssue::error(
                    ErrorCode::InvalidPointOnCurve,
                    ShapeRef::Vertex(v),
                    format!("vertex is off the curve end at t = {t}"),
                )
                .in_parent(ShapeRef::Edge(id))
                .measured(gap, allowed),
            );
        }
    }
    let length = edge.length();
    if length < config.tolerance.min_edge_length {
        findings.push(
            ValidationIssue::error(ErrorCode::ZeroLengthEdge, ShapeRef::Edge(id), "edge has near-zero length")
                .measured(length, config.tolerance.min_edge_length),
        );
    }
}

/// Vertex-on-surface and edge-on-surface checks for the boundary of one
/// face.
fn check_face_placement(
    store: &EntityStore,
    face_id: FaceId,
    config: &ValidationConfig,
    findings: &mut Findings,
    stats: &mut ToleranceStats,
) {
    let face = &store.faces[face_id];
    let parent = ShapeRef::Face(face_id);
    let mut seen_vertices = HashSet::new();
    let mut seen_edges = HashSet::new();
    for w in face.wires() {
        for use_ in &store.wires[w].edges {
            let v = store.use_start(use_);
            if seen_vertices.insert(v) {
                let vertex = &store.vertices[v];
                match face.surface.project(&vertex.point) {
                    Ok((on_surface, _, _)) => {
                        let gap = vertex.point.distance_to(&on_surface);
                        stats.max_vertex_gap = stats.max_vertex_gap.max(gap);
                        let own = vertex.tolerance.max(config.tolerance.resolution);
                        grade_gap(
                            findings,
                            ErrorCode::InvalidPointOnSurface,
                            ShapeRef::Vertex(v),
                            parent,
                            gap,
                            own,
                            config.tolerance.max_vertex_tol,
                        );
                    }
                    Err(e) => findings.push(
                        ValidationIssue::error(
                            ErrorCode::InvalidPointOnSurface,
                            ShapeRef::Vertex(v),
                            format!("vertex does not project onto the surface: {e}"),
                        )
                        .in_parent(parent),
                    ),
                }
            }

            if store.edges[use_.edge].degenerated || !seen_edges.insert(use_.edge) {
                continue;
            }
            check_edge_on_surface(store, use_.edge, face_id, config, findings, stats);
        }
    }
}

fn check_edge_on_surface(
    store: &EntityStore,
    id: EdgeId,
    face_id: FaceId,
    config: &ValidationConfig,
    findings: &mut Findings,
    stats: &mut ToleranceStats,
) {
    let edge = &store.edges[id];
    let surface = &store.faces[face_id].surface;
    let n = config.sampling_density.max(1) as usize;
    let mut worst: f64 = 0.0;
    for i in 0..=n {
        let t = edge.first + (edge.last - edge.first) * i as f64 / n as f64;
        let p = edge.point_at(t);
        match surface.project(&p) {
            Ok((q, _, _)) => worst = worst.max(p.distance_to(&q)),
            Err(e) => {
                findings.push(
                    ValidationIssue::error(
                        ErrorCode::SameParameterViolation,
                        ShapeRef::Edge(id),
                        format!("edge point at t = {t} does not project onto the surface: {e}"),
                    )
                    .in_parent(ShapeRef::Face(face_id)),
                );
                return;
            }
        }
    }
    stats.max_edge_gap = stats.max_edge_gap.max(worst);
    let own = edge.tolerance.max(config.tolerance.resolution);
    grade_gap(
        findings,
        ErrorCode::SameParameterViolation,
        ShapeRef::Edge(id),
        ShapeRef::Face(face_id),
        worst,
        own,
        config.tolerance.max_edge_tol,
    );
}

/// Gaps within the entity's own tolerance pass; gaps beyond it but within
/// the configured maximum are warnings; larger gaps are errors.
fn grade_gap(
    findings: &mut Findings,
    code: ErrorCode,
    entity: ShapeRef,
    parent: ShapeRef,
    gap: f64,
    own: f64,
    max: f64,
) {
    if gap <= own {
        return;
    }
    let issue = if gap > max {
        ValidationIssue::error(code, entity, format!("gap {gap:.2e} exceeds the allowed maximum")).measured(gap, max)
    } else {
        ValidationIssue::warning(
            ErrorCode::InsufficientTolerance,
            entity,
            format!("gap {gap:.2e} is not covered by the entity tolerance"),
        )
        .measured(gap, own)
    };
    findings.push(issue.in_parent(parent));
}

fn check_tolerances(shape: &Shape, config: &ValidationConfig, findings: &mut Findings, stats: &mut ToleranceStats) {
    let store = shape.store();
    for v in shape.vertices() {
        let tol = store.vertices[v].tolerance;
        stats.max_vertex_tolerance = stats.max_vertex_tolerance.max(tol);
        if tol > config.tolerance.max_vertex_tol {
            findings.push(
                ValidationIssue::warning(ErrorCode::ExcessiveTolerance, ShapeRef::Vertex(v), "vertex tolerance too large")
                    .measured(tol, config.tolerance.max_vertex_tol),
            );
        }
    }
    for e in shape.edges() {
        let edge = &store.edges[e];
        stats.max_edge_tolerance = stats.max_edge_tolerance.max(edge.tolerance);
        for v in [edge.start, edge.end] {
            let vt = store.vertices[v].tolerance;
            if vt < edge.tolerance {
                findings.push(
                    ValidationIssue::warning(
                        ErrorCode::ToleranceHierarchyViolation,
                        ShapeRef::Vertex(v),
                        "vertex tolerance is below the tolerance of an incident edge",
                    )
                    .in_parent(ShapeRef::Edge(e))
                    .measured(vt, edge.tolerance),
                );
            }
        }
    }
    for f in shape.faces() {
        let face = &store.faces[f];
        for w in face.wires() {
            for use_ in &store.wires[w].edges {
                let et = store.edges[use_.edge].tolerance;
                if et < face.tolerance {
                    findings.push(
                        ValidationIssue::warning(
                            ErrorCode::ToleranceHierarchyViolation,
                            ShapeRef::Edge(use_.edge),
                            "edge tolerance is below the tolerance of its face",
                        )
                        .in_parent(ShapeRef::Face(f))
                        .measured(et, face.tolerance),
                    );
                }
            }
        }
    }
}
