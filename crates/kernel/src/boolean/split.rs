//! Face splitting.
//!
//! The sampled boundary of a face and the section strands lying on it are
//! merged into a planar arrangement in the face's parameter space. Bounded
//! cycles of the arrangement become sub-face loops; every chain of segments
//! is traced back to the boundary edge or section curve it came from, so the
//! rebuilt edges keep exact geometry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::geometry::curves::Curve;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::polygon;
use crate::topology::brep::{EntityStore, PCurve};

use super::operand::{merge_tolerance, project_on_range, FaceData};
use super::section::Strand;
use super::{BooleanError, BooleanOptions};

/// One trimmed curve of a sub-face loop, in traversal order.
#[derive(Debug, Clone)]
pub struct Piece {
    pub curve: Arc<Curve>,
    pub degenerated: bool,
    pub t_start: f64,
    pub t_end: f64,
    /// Node ids local to the face split.
    pub start: usize,
    pub end: usize,
    /// Parameter-space line for seam and pole pieces, in traversal order.
    pub pcurve: Option<(Point2d, Point2d)>,
}

impl Piece {
    fn reversed(self) -> Self {
        Self {
            t_start: self.t_end,
            t_end: self.t_start,
            start: self.end,
            end: self.start,
            pcurve: self.pcurve.map(|(a, b)| (b, a)),
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubFace {
    /// Face index within its operand.
    pub face: usize,
    /// Outer loop first, oriented like the original face's wires. `None`
    /// when the face is not split and is kept as is.
    pub loops: Option<Vec<Vec<Piece>>>,
    pub sample: Point3d,
    pub sample_uv: Point2d,
}

#[derive(Debug, Clone)]
pub struct FaceSplit {
    pub nodes: Vec<Point3d>,
    pub sub_faces: Vec<SubFace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Boundary { wire: usize, use_: usize },
    Section(usize),
}

#[derive(Debug, Clone)]
struct UseInfo {
    curve: Arc<Curve>,
    degenerated: bool,
    forward: bool,
    first: f64,
    last: f64,
    pcurve: Option<PCurve>,
}

impl UseInfo {
    /// Edge parameters at the start and end of the traversal.
    fn travel(&self) -> (f64, f64) {
        if self.forward { (self.first, self.last) } else { (self.last, self.first) }
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    uv: Point2d,
    xyz: Point3d,
    vertex: bool,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    a: usize,
    b: usize,
    ta: f64,
    tb: f64,
    origin: Origin,
}

struct Arrangement<'a> {
    face: &'a FaceData,
    index: usize,
    uses: Vec<Vec<UseInfo>>,
    strands: &'a [&'a Strand],
    nodes: Vec<Node>,
    cells: HashMap<(i64, i64, i64), Vec<usize>>,
    segments: Vec<Segment>,
    merge: f64,
    uv_gate: f64,
    options: &'a BooleanOptions,
}

/// Split face `index` of an operand by the strands lying on it.
pub fn split_face(
    store: &EntityStore,
    face: &FaceData,
    index: usize,
    strands: &[&Strand],
    options: &BooleanOptions,
) -> Result<FaceSplit, BooleanError> {
    if strands.is_empty() {
        return Ok(whole(face, index));
    }
    let uses = store.faces[face.id]
        .wires()
        .map(|w| {
            store.wires[w]
                .edges
                .iter()
                .map(|u| {
                    let e = &store.edges[u.edge];
                    UseInfo {
                        curve: e.curve.clone(),
                        degenerated: e.degenerated,
                        forward: u.forward,
                        first: e.first,
                        last: e.last,
                        pcurve: u.pcurve,
                    }
                })
                .collect()
        })
        .collect();
    let periods = [face.surface.u_period(), face.surface.v_period()];
    let uv_gate = periods.iter().flatten().fold(f64::INFINITY, |g, p| g.min(0.25 * p));
    let mut arr = Arrangement {
        face,
        index,
        uses,
        strands,
        nodes: Vec::new(),
        cells: HashMap::new(),
        segments: Vec::new(),
        merge: merge_tolerance(options),
        uv_gate,
        options,
    };
    arr.add_boundary();
    let boundary_segments = arr.segments.len();
    for k in 0..strands.len() {
        arr.add_strand(k);
    }
    if arr.segments.len() == boundary_segments {
        return Ok(whole(face, index));
    }
    arr.split_segments();
    let edges = arr.edges();
    let sub_faces = arr.regions(&edges)?;
    trace!(face = index, nodes = arr.nodes.len(), regions = sub_faces.len(), "face split");
    Ok(FaceSplit {
        nodes: arr.nodes.iter().map(|n| n.xyz).collect(),
        sub_faces,
    })
}

fn whole(face: &FaceData, index: usize) -> FaceSplit {
    let uv = face
        .domain
        .interior_point()
        .unwrap_or_else(|| face.domain.outer.uv[0]);
    FaceSplit {
        nodes: Vec::new(),
        sub_faces: vec![SubFace {
            face: index,
            loops: None,
            sample: face.surface.point(uv.x, uv.y),
            sample_uv: uv,
        }],
    }
}

/// Half-edges of the pruned arrangement.
struct Edges {
    ends: Vec<(usize, usize)>,
    params: Vec<(f64, f64)>,
    origins: Vec<Origin>,
    outgoing: Vec<Vec<usize>>,
}

impl Edges {
    fn from(&self, h: usize) -> usize {
        let (a, b) = self.ends[h / 2];
        if h % 2 == 0 { a } else { b }
    }

    fn to(&self, h: usize) -> usize {
        self.from(h ^ 1)
    }

    fn params(&self, h: usize) -> (f64, f64) {
        let (ta, tb) = self.params[h / 2];
        if h % 2 == 0 { (ta, tb) } else { (tb, ta) }
    }
}

impl Arrangement<'_> {
    fn cell(&self, p: &Point3d) -> (i64, i64, i64) {
        let s = 2.0 * self.merge;
        ((p.x / s).floor() as i64, (p.y / s).floor() as i64, (p.z / s).floor() as i64)
    }

    /// Node at `xyz`, merged with an existing one within tolerance on the
    /// same side of every seam.
    fn add_node(&mut self, uv: Point2d, xyz: Point3d, vertex: bool) -> usize {
        let (cx, cy, cz) = self.cell(&xyz);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(ids) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) {
                        for &id in ids {
                            let n = &self.nodes[id];
                            if n.xyz.distance_to(&xyz) <= self.merge && n.uv.distance_to(&uv) <= self.uv_gate {
                                self.nodes[id].vertex |= vertex;
                                return id;
                            }
                        }
                    }
                }
            }
        }
        let id = self.nodes.len();
        self.nodes.push(Node { uv, xyz, vertex });
        self.cells.entry((cx, cy, cz)).or_default().push(id);
        id
    }

    fn curve_of(&self, origin: Origin) -> (&Arc<Curve>, bool) {
        match origin {
            Origin::Boundary { wire, use_ } => {
                let u = &self.uses[wire][use_];
                (&u.curve, u.degenerated)
            }
            Origin::Section(k) => (&self.strands[k].curve, false),
        }
    }

    fn add_boundary(&mut self) {
        let face = self.face;
        let loops: Vec<_> = std::iter::once(&face.domain.outer).chain(&face.domain.inners).collect();
        for (w, l) in loops.into_iter().enumerate() {
            let n_uses = self.uses[w].len();
            let m = l.len();
            let ids: Vec<usize> = (0..m)
                .map(|i| {
                    let (k, t) = l.source[i];
                    let u = &self.uses[w][k];
                    let slack = 1e-9 * (1.0 + (u.last - u.first).abs());
                    let vertex = u.degenerated || (t - u.first).abs() <= slack || (t - u.last).abs() <= slack;
                    self.add_node(l.uv[i], l.xyz[i], vertex)
                })
                .collect();
            for i in 0..m {
                let j = (i + 1) % m;
                let (ui, ti) = l.source[i];
                let (uj, tj) = l.source[j];
                let (use_, t0, t1) = if j == 0 {
                    let last = (l.source[0].0 + n_uses - 1) % n_uses;
                    let travel = self.uses[w][last].travel();
                    (last, if ui == last { ti } else { travel.0 }, travel.1)
                } else if ui == uj {
                    (ui, ti, tj)
                } else {
                    (uj, self.uses[w][uj].travel().0, tj)
                };
                if ids[i] != ids[j] {
                    self.segments.push(Segment {
                        a: ids[i],
                        b: ids[j],
                        ta: t0,
                        tb: t1,
                        origin: Origin::Boundary { wire: w, use_ },
                    });
                }
            }
        }
    }

    fn on_boundary(&self, p: &Point3d) -> bool {
        self.face.boundary_distance(p) <= self.face.band
            && self
                .face
                .nearest_edge(p)
                .is_some_and(|(_, _, q)| q.distance_to(p) <= self.merge)
    }

    fn add_strand(&mut self, k: usize) {
        let strand = self.strands[k];
        for chain in self.map_strand(strand) {
            let last = chain.len() - 1;
            let on_edge: Vec<bool> = chain.iter().map(|c| self.on_boundary(&c.1)).collect();
            // Runs along the face boundary add neither segments nor nodes.
            let inner: Vec<bool> = (0..last)
                .map(|i| {
                    let mid = strand.curve.point(0.5 * (chain[i].2 + chain[i + 1].2));
                    !(on_edge[i] && on_edge[i + 1] && self.on_boundary(&mid))
                })
                .collect();
            let mut ids: Vec<Option<usize>> = vec![None; chain.len()];
            for i in 0..last {
                if !inner[i] {
                    continue;
                }
                for j in [i, i + 1] {
                    if ids[j].is_none() {
                        let ends_run = j == 0 || j == last || !inner[j - 1] || !inner.get(j).copied().unwrap_or(false);
                        ids[j] = Some(self.add_node(chain[j].0, chain[j].1, ends_run));
                    }
                }
            }
            for i in 0..last {
                let (Some(a), Some(b)) = (ids[i], ids[i + 1]) else {
                    continue;
                };
                if a == b || !inner[i] {
                    continue;
                }
                let (ta, tb) = (chain[i].2, chain[i + 1].2);
                self.segments.push(Segment {
                    a,
                    b,
                    ta,
                    tb,
                    origin: Origin::Section(k),
                });
            }
        }
    }

    /// Strand samples mapped into the face's parameter window, broken where
    /// they cross a seam or pass through a pole.
    fn map_strand(&self, strand: &Strand) -> Vec<Vec<(Point2d, Point3d, f64)>> {
        let surface = self.face.surface.as_ref();
        let ((u_lo, _), (v_lo, _)) = self.face.domain.bounds();
        let lo = [u_lo, v_lo];
        let periods = [surface.u_period(), surface.v_period()];
        let wrap = |c: f64, k: usize| periods[k].map_or(c, |p| lo[k] + (c - lo[k]).rem_euclid(p));

        // (uv, xyz, t, free axis at a singular point)
        let mut raw: Vec<(Point2d, Point3d, f64, Option<usize>)> = Vec::with_capacity(strand.samples.len());
        for &(t, p) in &strand.samples {
            let Ok((u, v)) = surface.parameters_of(&p) else {
                continue;
            };
            let uv = Point2d::new(wrap(u, 0), wrap(v, 1));
            let free = if surface.normal(uv.x, uv.y).is_err() {
                let (du, dv) = surface.d1(uv.x, uv.y);
                if du.length() < 1e-12 {
                    Some(0)
                } else if dv.length() < 1e-12 {
                    Some(1)
                } else {
                    None
                }
            } else {
                None
            };
            raw.push((uv, p, t, free));
        }
        for i in 0..raw.len() {
            if let Some(axis) = raw[i].3 {
                let donor = raw[..i]
                    .iter()
                    .rev()
                    .chain(raw[i + 1..].iter())
                    .find(|r| r.3.is_none())
                    .map(|r| r.0);
                if let Some(d) = donor {
                    if axis == 0 {
                        raw[i].0.x = d.x;
                    } else {
                        raw[i].0.y = d.y;
                    }
                }
            }
        }

        let mut out = Vec::new();
        let mut cur: Vec<(Point2d, Point3d, f64)> = Vec::new();
        for i in 0..raw.len() {
            let (uv, p, t, _) = raw[i];
            if let Some(&(prev_uv, prev_p, prev_t)) = cur.last() {
                // Leaving a pole: the free parameter restarts.
                if let Some(axis) = raw[i - 1].3 {
                    if raw[i].3.is_none() {
                        let moved = if axis == 0 { (uv.x - prev_uv.x).abs() } else { (uv.y - prev_uv.y).abs() };
                        if moved > 1e-9 {
                            out.push(std::mem::take(&mut cur));
                            let pole = if axis == 0 {
                                Point2d::new(uv.x, prev_uv.y)
                            } else {
                                Point2d::new(prev_uv.x, uv.y)
                            };
                            cur.push((pole, prev_p, prev_t));
                        }
                    }
                }
                for axis in 0..2 {
                    let Some(period) = periods[axis] else {
                        continue;
                    };
                    let Some(&(puv, pp, pt)) = cur.last() else {
                        continue;
                    };
                    let c = [uv.x, uv.y];
                    let pc = [puv.x, puv.y];
                    let d = c[axis] - pc[axis];
                    if d.abs() <= 0.5 * period {
                        continue;
                    }
                    let (end_val, start_val) = if d < 0.0 { (lo[axis] + period, lo[axis]) } else { (lo[axis], lo[axis] + period) };
                    let unwrapped = c[axis] + if d < 0.0 { period } else { -period };
                    let s = ((end_val - pc[axis]) / (unwrapped - pc[axis])).clamp(0.0, 1.0);
                    let ts = pt + (t - pt) * s;
                    let xs = self.seam_point(strand, (pt, t), ts, axis, end_val, pp.lerp(&p, s));
                    let other = {
                        let (u, v) = surface.parameters_of(&xs.1).unwrap_or((puv.x, puv.y));
                        let o = if axis == 0 { v } else { u };
                        let reference = if axis == 0 { puv.y } else { puv.x };
                        match periods[1 - axis] {
                            Some(p2) => crate::geometry::surfaces::unwrap_near(o, reference, p2),
                            None => o,
                        }
                    };
                    let at = |val: f64| if axis == 0 { Point2d::new(val, other) } else { Point2d::new(other, val) };
                    cur.push((at(end_val), xs.1, xs.0));
                    out.push(std::mem::take(&mut cur));
                    cur.push((at(start_val), xs.1, xs.0));
                }
            }
            if cur.last().is_none_or(|q| q.0.distance_to(&uv) > 1e-12 || q.1.distance_to(&p) > 1e-12) {
                cur.push((uv, p, t));
            }
        }
        out.push(cur);
        out.retain(|c| c.len() >= 2);
        out
    }

    /// Point where the strand crosses the seam iso-line `axis = value`.
    fn seam_point(
        &self,
        strand: &Strand,
        bracket: (f64, f64),
        t: f64,
        axis: usize,
        value: f64,
        guess: Point3d,
    ) -> (f64, Point3d) {
        let surface = self.face.surface.as_ref();
        let iso = if axis == 0 { surface.u_iso(value) } else { surface.v_iso(value) };
        let (lo, hi) = if bracket.0 <= bracket.1 { bracket } else { (bracket.1, bracket.0) };
        let Ok(iso) = iso else {
            return (t, guess);
        };
        let (mut t_cur, mut p) = (t, strand.curve.point(t));
        for _ in 0..self.options.max_iterations {
            let Ok((q, _)) = iso.closest_point(&p) else {
                break;
            };
            let (tn, pn) = project_on_range(&strand.curve, lo, hi, &q);
            let moved = pn.distance_to(&p);
            t_cur = tn;
            p = pn;
            if moved <= 1e-3 * self.options.tolerance {
                break;
            }
        }
        (t_cur, p)
    }

    /// Insert T-junction and crossing nodes into every segment.
    fn split_segments(&mut self) {
        let n_seg = self.segments.len();
        let (mut lo, mut hi) = (Point2d::new(f64::INFINITY, f64::INFINITY), Point2d::new(f64::NEG_INFINITY, f64::NEG_INFINITY));
        for n in &self.nodes {
            lo = Point2d::new(lo.x.min(n.uv.x), lo.y.min(n.uv.y));
            hi = Point2d::new(hi.x.max(n.uv.x), hi.y.max(n.uv.y));
        }
        let g = ((n_seg as f64).sqrt().ceil() as usize).clamp(1, 256);
        let span = Point2d::new((hi.x - lo.x).max(1e-12), (hi.y - lo.y).max(1e-12));
        let cell_of = |p: Point2d| -> (usize, usize) {
            let cx = (((p.x - lo.x) / span.x) * g as f64).floor().clamp(0.0, (g - 1) as f64) as usize;
            let cy = (((p.y - lo.y) / span.y) * g as f64).floor().clamp(0.0, (g - 1) as f64) as usize;
            (cx, cy)
        };
        let margins: Vec<f64> = self
            .segments
            .iter()
            .map(|s| 0.05 * self.nodes[s.a].uv.distance_to(&self.nodes[s.b].uv) + 1e-9 * (span.x + span.y))
            .collect();
        let mut grid: Vec<Vec<usize>> = vec![Vec::new(); g * g];
        for (i, s) in self.segments.iter().enumerate() {
            let (a, b) = (self.nodes[s.a].uv, self.nodes[s.b].uv);
            let m = margins[i];
            let (x0, y0) = cell_of(Point2d::new(a.x.min(b.x) - m, a.y.min(b.y) - m));
            let (x1, y1) = cell_of(Point2d::new(a.x.max(b.x) + m, a.y.max(b.y) + m));
            for cx in x0..=x1 {
                for cy in y0..=y1 {
                    grid[cx * g + cy].push(i);
                }
            }
        }

        let mut splits: Vec<Vec<(f64, usize)>> = vec![Vec::new(); n_seg];

        // Crossings first: they may create nodes the T-junction pass must see.
        let mut tested: std::collections::HashSet<(usize, usize)> = std::collections::HashSet::new();
        for cell in &grid {
            for (x, &i) in cell.iter().enumerate() {
                for &j in &cell[x + 1..] {
                    let key = (i.min(j), i.max(j));
                    if !tested.insert(key) {
                        continue;
                    }
                    self.cross(key.0, key.1, &mut splits);
                }
            }
        }

        let n_nodes = self.nodes.len();
        for node in 0..n_nodes {
            let uv = self.nodes[node].uv;
            let (cx, cy) = cell_of(uv);
            for &i in &grid[cx * g + cy] {
                let s = self.segments[i];
                if s.a == node || s.b == node || splits[i].iter().any(|&(_, n)| n == node) {
                    continue;
                }
                let (a, b) = (self.nodes[s.a].uv, self.nodes[s.b].uv);
                if polygon::distance_to_segment(&uv, &a, &b) > margins[i] {
                    continue;
                }
                let (curve, degenerated) = self.curve_of(s.origin);
                if degenerated {
                    continue;
                }
                let xyz = self.nodes[node].xyz;
                let (t, q) = project_on_range(curve, s.ta, s.tb, &xyz);
                if q.distance_to(&xyz) <= self.merge
                    && q.distance_to(&self.nodes[s.a].xyz) > self.merge
                    && q.distance_to(&self.nodes[s.b].xyz) > self.merge
                {
                    self.nodes[node].vertex = true;
                    splits[i].push((t, node));
                }
            }
        }

        let mut out = Vec::with_capacity(n_seg);
        for (i, s) in self.segments.iter().enumerate() {
            let mut list = std::mem::take(&mut splits[i]);
            let dir = if s.tb >= s.ta { 1.0 } else { -1.0 };
            list.sort_by(|x, y| (dir * x.0).total_cmp(&(dir * y.0)));
            let mut prev = (s.ta, s.a);
            for (t, n) in list.into_iter().chain(std::iter::once((s.tb, s.b))) {
                if n != prev.1 {
                    out.push(Segment {
                        a: prev.1,
                        b: n,
                        ta: prev.0,
                        tb: t,
                        origin: s.origin,
                    });
                }
                prev = (t, n);
            }
        }
        self.segments = out;
    }

    fn cross(&mut self, i: usize, j: usize, splits: &mut [Vec<(f64, usize)>]) {
        let (si, sj) = (self.segments[i], self.segments[j]);
        if si.a == sj.a || si.a == sj.b || si.b == sj.a || si.b == sj.b {
            return;
        }
        let (a0, a1, b0, b1) = (
            self.nodes[si.a].uv,
            self.nodes[si.b].uv,
            self.nodes[sj.a].uv,
            self.nodes[sj.b].uv,
        );
        let Some((s, t)) = polygon::segment_intersection(&a0, &a1, &b0, &b1) else {
            return;
        };
        const E: f64 = 1e-9;
        if !(s > E && s < 1.0 - E && t > E && t < 1.0 - E) {
            return;
        }
        let uv = a0.lerp(&a1, s);
        let (ci, di) = self.curve_of(si.origin);
        let (cj, dj) = self.curve_of(sj.origin);
        let (ci, cj) = (ci.clone(), cj.clone());
        let mut ti = si.ta + (si.tb - si.ta) * s;
        let mut tj = sj.ta + (sj.tb - sj.ta) * t;
        let xyz = if di || dj {
            self.face.surface.point(uv.x, uv.y)
        } else {
            let mut p = ci.point(ti);
            let mut q = cj.point(tj);
            for _ in 0..self.options.max_iterations {
                let (tj_n, q_n) = project_on_range(&cj, sj.ta, sj.tb, &p);
                let (ti_n, p_n) = project_on_range(&ci, si.ta, si.tb, &q_n);
                let moved = p_n.distance_to(&p);
                (ti, tj, p, q) = (ti_n, tj_n, p_n, q_n);
                if moved <= 1e-3 * self.options.tolerance {
                    break;
                }
            }
            p.midpoint(&q)
        };
        let node = self.add_node(uv, xyz, true);
        if node != si.a && node != si.b {
            splits[i].push((ti, node));
        }
        if node != sj.a && node != sj.b {
            splits[j].push((tj, node));
        }
    }

    /// Deduplicated, pruned edges with CCW-sorted outgoing half-edges.
    fn edges(&self) -> Edges {
        let mut seen: HashMap<(usize, usize), usize> = HashMap::new();
        let mut kept: Vec<Segment> = Vec::new();
        for s in &self.segments {
            if s.a == s.b {
                continue;
            }
            let key = (s.a.min(s.b), s.a.max(s.b));
            if seen.contains_key(&key) {
                continue;
            }
            seen.insert(key, kept.len());
            kept.push(*s);
        }

        let mut alive = vec![true; kept.len()];
        let mut degree = vec![0usize; self.nodes.len()];
        for s in &kept {
            degree[s.a] += 1;
            degree[s.b] += 1;
        }
        let mut incident: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (e, s) in kept.iter().enumerate() {
            incident[s.a].push(e);
            incident[s.b].push(e);
        }
        let mut stack: Vec<usize> = (0..self.nodes.len()).filter(|&n| degree[n] == 1).collect();
        while let Some(n) = stack.pop() {
            for &e in &incident[n] {
                if !alive[e] {
                    continue;
                }
                alive[e] = false;
                let s = kept[e];
                for m in [s.a, s.b] {
                    degree[m] -= 1;
                    if degree[m] == 1 {
                        stack.push(m);
                    }
                }
            }
        }

        let mut edges = Edges {
            ends: Vec::new(),
            params: Vec::new(),
            origins: Vec::new(),
            outgoing: vec![Vec::new(); self.nodes.len()],
        };
        for (e, s) in kept.iter().enumerate() {
            if !alive[e] {
                continue;
            }
            let id = edges.ends.len();
            edges.ends.push((s.a, s.b));
            edges.params.push((s.ta, s.tb));
            edges.origins.push(s.origin);
            edges.outgoing[s.a].push(2 * id);
            edges.outgoing[s.b].push(2 * id + 1);
        }
        let angle = |h: usize| {
            let d = self.nodes[edges.to(h)].uv - self.nodes[edges.from(h)].uv;
            d.y.atan2(d.x)
        };
        let sorted: Vec<Vec<usize>> = edges
            .outgoing
            .iter()
            .map(|out| {
                let mut out = out.clone();
                out.sort_by(|&x, &y| angle(x).total_cmp(&angle(y)));
                out
            })
            .collect();
        edges.outgoing = sorted;
        edges
    }

    fn regions(&self, edges: &Edges) -> Result<Vec<SubFace>, BooleanError> {
        let n_half = 2 * edges.ends.len();
        let next = |h: usize| -> Option<usize> {
            let v = edges.to(h);
            let out = &edges.outgoing[v];
            let pos = out.iter().position(|&x| x == h ^ 1)?;
            Some(out[(pos + out.len() - 1) % out.len()])
        };
        let mut visited = vec![false; n_half];
        let mut cycles: Vec<Vec<usize>> = Vec::new();
        for h0 in 0..n_half {
            if visited[h0] {
                continue;
            }
            let mut cycle = Vec::new();
            let mut h = h0;
            loop {
                if visited[h] {
                    return Err(BooleanError::failure("split", "arrangement cycle is not closed"));
                }
                visited[h] = true;
                cycle.push(h);
                h = next(h).ok_or_else(|| BooleanError::failure("split", "half-edge has no successor"))?;
                if h == h0 {
                    break;
                }
                if cycle.len() > n_half {
                    return Err(BooleanError::failure("split", "runaway arrangement cycle"));
                }
            }
            cycles.push(cycle);
        }

        let polygon_of = |c: &[usize]| -> Vec<Point2d> { c.iter().map(|&h| self.nodes[edges.from(h)].uv).collect() };
        let areas: Vec<f64> = cycles.iter().map(|c| polygon::signed_area(&polygon_of(c))).collect();
        let ((u0, u1), (v0, v1)) = self.face.domain.bounds();
        let eps = 1e-14 * ((u1 - u0) * (v1 - v0)).abs().max(1e-300);

        let outers: Vec<usize> = (0..cycles.len()).filter(|&c| areas[c] > eps).collect();
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); cycles.len()];
        for c in (0..cycles.len()).filter(|&c| areas[c] < -eps) {
            let h = cycles[c][0];
            let (a, b) = (self.nodes[edges.from(h)].uv, self.nodes[edges.to(h)].uv);
            let d = b - a;
            let len = d.length().max(1e-300);
            let offset = (1e-6 * (u1 - u0).abs().max((v1 - v0).abs())).min(0.1 * len);
            let mid = a.midpoint(&b);
            let probe = Point2d::new(mid.x - d.y / len * offset, mid.y + d.x / len * offset);
            let host = outers
                .iter()
                .copied()
                .filter(|&o| polygon::point_in_polygon(&probe, &polygon_of(&cycles[o])))
                .min_by(|&x, &y| areas[x].total_cmp(&areas[y]));
            if let Some(o) = host {
                holes[o].push(c);
            }
        }

        let mut out = Vec::new();
        for &o in &outers {
            let outer_uv = polygon_of(&cycles[o]);
            let hole_uv: Vec<Vec<Point2d>> = holes[o].iter().map(|&h| polygon_of(&cycles[h])).collect();
            let Some(uv) = polygon::interior_point(&outer_uv, &hole_uv) else {
                continue;
            };
            if !self.face.domain.contains(uv) {
                continue;
            }
            let mut loops = vec![self.chain(&cycles[o], edges)];
            loops.extend(holes[o].iter().map(|&h| self.chain(&cycles[h], edges)));
            if self.face.reversed {
                for l in &mut loops {
                    let reversed: Vec<Piece> = l.drain(..).rev().map(Piece::reversed).collect();
                    *l = reversed;
                }
            }
            out.push(SubFace {
                face: self.index,
                loops: Some(loops),
                sample: self.face.surface.point(uv.x, uv.y),
                sample_uv: uv,
            });
        }
        Ok(out)
    }

    /// Group a cycle's half-edges into pieces of one origin each.
    fn chain(&self, cycle: &[usize], edges: &Edges) -> Vec<Piece> {
        let m = cycle.len();
        let breaks: Vec<bool> = (0..m)
            .map(|k| {
                let h = cycle[k];
                let prev = cycle[(k + m - 1) % m];
                let node = edges.from(h);
                self.nodes[node].vertex
                    || edges.outgoing[node].len() >= 3
                    || edges.origins[h / 2] != edges.origins[prev / 2]
            })
            .collect();
        let first = breaks.iter().position(|&b| b).unwrap_or(0);
        let mut pieces = Vec::new();
        let mut k = 0;
        while k < m {
            let start = (first + k) % m;
            let mut len = 1;
            while k + len < m && !breaks[(first + k + len) % m] {
                len += 1;
            }
            let h_first = cycle[start];
            let h_last = cycle[(start + len - 1) % m];
            let origin = edges.origins[h_first / 2];
            let (curve, degenerated) = self.curve_of(origin);
            let (n0, n1) = (edges.from(h_first), edges.to(h_last));
            let pcurve = match origin {
                Origin::Boundary { wire, use_ } if self.uses[wire][use_].pcurve.is_some() || degenerated => {
                    Some((self.nodes[n0].uv, self.nodes[n1].uv))
                }
                _ => None,
            };
            pieces.push(Piece {
                curve: curve.clone(),
                degenerated,
                t_start: edges.params(h_first).0,
                t_end: edges.params(h_last).1,
                start: n0,
                end: n1,
                pcurve,
            });
            k += len;
        }
        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::operand::Operand;
    use crate::boolean::section::section_faces;
    use crate::geometry::surfaces::Surface;
    use crate::geometry::vector::Vec3;
    use crate::topology::primitives::{make_box, make_cylinder};

    fn planar_face(op: &Operand<'_>, n: Vec3) -> usize {
        op.faces
            .iter()
            .position(|f| matches!(f.surface.as_ref(), Surface::Plane(_)) && f.outward_normal(0.0, 0.0).dot(&n) > 0.99)
            .unwrap()
    }

    fn loop_area(split: &FaceSplit, sub: &SubFace, face: &FaceData) -> f64 {
        let l = &sub.loops.as_ref().unwrap()[0];
        let uv: Vec<Point2d> = l
            .iter()
            .map(|p| {
                let (u, v) = face.surface.parameters_of(&split.nodes[p.start]).unwrap();
                Point2d::new(u, v)
            })
            .collect();
        polygon::signed_area(&uv).abs()
    }

    #[test]
    fn test_box_top_split_by_overlapping_box() {
        let options = BooleanOptions::default();
        let a = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let b = make_box(Point3d::new(0.5, -1.0, 0.5), 1.0, 3.0, 1.0).unwrap();
        let (oa, ob) = (Operand::prepare(&a, &options).unwrap(), Operand::prepare(&b, &options).unwrap());
        let ia = planar_face(&oa, Vec3::Z);
        let mut strands = Vec::new();
        for (ib, fb) in ob.faces.iter().enumerate() {
            strands.extend(section_faces(&oa.faces[ia], ia, fb, ib, &options).unwrap());
        }
        assert_eq!(strands.len(), 1);
        let refs: Vec<&Strand> = strands.iter().collect();
        let split = split_face(a.store(), &oa.faces[ia], ia, &refs, &options).unwrap();
        assert_eq!(split.sub_faces.len(), 2);
        for sub in &split.sub_faces {
            let loops = sub.loops.as_ref().unwrap();
            assert_eq!(loops.len(), 1);
            assert_eq!(loops[0].len(), 4);
            assert!((loop_area(&split, sub, &oa.faces[ia]) - 0.5).abs() < 1e-9);
            for w in loops[0].windows(2) {
                assert_eq!(w[0].end, w[1].start);
            }
        }
    }

    #[test]
    fn test_coplanar_neighbour_leaves_no_stray_nodes() {
        let options = BooleanOptions::default();
        let a = make_box(Point3d::ORIGIN, 1.0, 1.0, 1.0).unwrap();
        let b = make_box(Point3d::new(0.5, 0.0, 0.0), 1.0, 1.0, 1.0).unwrap();
        let (oa, ob) = (Operand::prepare(&a, &options).unwrap(), Operand::prepare(&b, &options).unwrap());
        let ia = planar_face(&oa, -Vec3::Z);
        let mut strands = Vec::new();
        for (ib, fb) in ob.faces.iter().enumerate() {
            strands.extend(section_faces(&oa.faces[ia], ia, fb, ib, &options).unwrap());
        }
        // B's front and back faces meet the bottom along its own edges.
        assert!(strands.len() >= 3);
        let refs: Vec<&Strand> = strands.iter().collect();
        let split = split_face(a.store(), &oa.faces[ia], ia, &refs, &options).unwrap();
        assert_eq!(split.sub_faces.len(), 2);
        // Along the front and back edges only the corners and the ends of
        // the x = 0.5 cut remain.
        for n in split.nodes.iter().filter(|n| n.y.abs() < 1e-9 || (n.y - 1.0).abs() < 1e-9) {
            assert!([0.0, 0.5, 1.0].iter().any(|x| (n.x - x).abs() < 1e-9), "{n:?}");
        }
        for sub in &split.sub_faces {
            let outer = &sub.loops.as_ref().unwrap()[0];
            let uv: Vec<Point2d> = outer
                .iter()
                .map(|p| {
                    let (u, v) = oa.faces[ia].surface.parameters_of(&split.nodes[p.start]).unwrap();
                    Point2d::new(u, v)
                })
                .collect();
            assert!(polygon::is_simple(&uv));
            assert!((loop_area(&split, sub, &oa.faces[ia]) - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_circle_inside_face_makes_disc_and_ring() {
        let options = BooleanOptions::default();
        let a = make_box(Point3d::ORIGIN, 2.0, 2.0, 1.0).unwrap();
        let b = make_cylinder(Point3d::new(1.0, 1.0, -1.0), Vec3::Z, 0.5, 3.0).unwrap();
        let (oa, ob) = (Operand::prepare(&a, &options).unwrap(), Operand::prepare(&b, &options).unwrap());
        let ia = planar_face(&oa, Vec3::Z);
        let mut strands = Vec::new();
        for (ib, fb) in ob.faces.iter().enumerate() {
            strands.extend(section_faces(&oa.faces[ia], ia, fb, ib, &options).unwrap());
        }
        let refs: Vec<&Strand> = strands.iter().collect();
        let split = split_face(a.store(), &oa.faces[ia], ia, &refs, &options).unwrap();
        assert_eq!(split.sub_faces.len(), 2);
        let ring = split
            .sub_faces
            .iter()
            .find(|s| s.loops.as_ref().unwrap().len() == 2)
            .unwrap();
        let disc = split
            .sub_faces
            .iter()
            .find(|s| s.loops.as_ref().unwrap().len() == 1)
            .unwrap();
        assert!(disc.sample.distance_to(&Point3d::new(1.0, 1.0, 1.0)) < 0.5);
        assert!(ring.sample.distance_to(&Point3d::new(1.0, 1.0, 1.0)) > 0.5);
        let circle = &disc.loops.as_ref().unwrap()[0];
        assert_eq!(circle.len(), 1);
        assert_eq!(circle[0].start, circle[0].end);
    }

    #[test]
    fn test_cylinder_side_split_keeps_seam_pieces() {
        let options = BooleanOptions::default();
        let a = make_cylinder(Point3d::ORIGIN, Vec3::Z, 1.0, 2.0).unwrap();
        let b = make_box(Point3d::new(-2.0, -2.0, 1.0), 4.0, 4.0, 2.0).unwrap();
        let (oa, ob) = (Operand::prepare(&a, &options).unwrap(), Operand::prepare(&b, &options).unwrap());
        let ia = oa
            .faces
            .iter()
            .position(|f| matches!(f.surface.as_ref(), Surface::Cylinder(_)))
            .unwrap();
        let mut strands = Vec::new();
        for (ib, fb) in ob.faces.iter().enumerate() {
            strands.extend(section_faces(&oa.faces[ia], ia, fb, ib, &options).unwrap());
        }
        let refs: Vec<&Strand> = strands.iter().collect();
        let split = split_face(a.store(), &oa.faces[ia], ia, &refs, &options).unwrap();
        assert_eq!(split.sub_faces.len(), 2);
        for sub in &split.sub_faces {
            let outer = &sub.loops.as_ref().unwrap()[0];
            // Cap circle and both seam pieces; the section piece has none.
            assert_eq!(outer.iter().filter(|p| p.pcurve.is_some()).count(), 3);
            assert!(outer.iter().any(|p| Arc::ptr_eq(&p.curve, &strands[0].curve)));
        }
        let low = split.sub_faces.iter().find(|s| s.sample.z < 1.0).unwrap();
        assert!(low.sample.z > 0.0);
    }
}
