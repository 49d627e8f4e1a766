//! Free-form curves and surfaces: B-splines (optionally rational) and the
//! Bezier special case.
//!
//! Evaluation follows the NURBS Book: binary-search knot span (A2.1),
//! Cox-de Boor basis and derivative recursion (A2.2, A2.3), homogeneous
//! evaluation and the rational quotient rule (A4.2, A4.4).

use serde::{Deserialize, Serialize};

use super::point::Point3d;
use super::transform::Transform;
use super::vector::Vec3;
use crate::error::GeometryError;

/// A B-spline curve, rational when `weights` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BSplineCurve {
    degree: usize,
    poles: Vec<Point3d>,
    weights: Option<Vec<f64>>,
    knots: Vec<f64>,
    periodic: bool,
}

impl BSplineCurve {
    /// Build from a flat knot vector (length = poles + degree + 1).
    pub fn new(
        degree: usize,
        poles: Vec<Point3d>,
        weights: Option<Vec<f64>>,
        knots: Vec<f64>,
    ) -> Result<Self, GeometryError> {
        validate_degree_and_poles(degree, poles.len())?;
        validate_knots(degree, poles.len(), &knots)?;
        if let Some(w) = &weights {
            validate_weights(w, poles.len())?;
        }
        Ok(Self {
            degree,
            poles,
            weights,
            knots,
            periodic: false,
        })
    }

    /// Build from distinct knot values and their multiplicities.
    pub fn from_multiplicities(
        degree: usize,
        poles: Vec<Point3d>,
        weights: Option<Vec<f64>>,
        knots: &[f64],
        multiplicities: &[usize],
    ) -> Result<Self, GeometryError> {
        Self::new(degree, poles, weights, expand_knots(knots, multiplicities)?)
    }

    /// Clamped curve with uniformly spaced interior knots on [0, 1].
    pub fn clamped_uniform(
        degree: usize,
        poles: Vec<Point3d>,
        weights: Option<Vec<f64>>,
    ) -> Result<Self, GeometryError> {
        validate_degree_and_poles(degree, poles.len())?;
        let knots = clamped_uniform_knots(degree, poles.len());
        Self::new(degree, poles, weights, knots)
    }

    /// Closed periodic curve through the control polygon `poles` (not repeated),
    /// parametrized on [0, 1) with period 1.
    pub fn periodic_uniform(
        degree: usize,
        poles: Vec<Point3d>,
        weights: Option<Vec<f64>>,
    ) -> Result<Self, GeometryError> {
        if poles.len() < degree + 1 {
            return Err(GeometryError::InvalidInput(format!(
                "periodic curve of degree {degree} needs at least {} poles, got {}",
                degree + 1,
                poles.len()
            )));
        }
        if let Some(w) = &weights {
            validate_weights(w, poles.len())?;
        }
        let k = poles.len();
        let mut wrapped = poles.clone();
        wrapped.extend_from_slice(&poles[..degree]);
        let weights = weights.map(|w| {
            let mut ext = w.clone();
            ext.extend_from_slice(&w[..degree]);
            ext
        });
        let knots: Vec<f64> = (0..k + 2 * degree + 1)
            .map(|i| (i as f64 - degree as f64) / k as f64)
            .collect();
        let mut curve = Self::new(degree, wrapped, weights, knots)?;
        curve.periodic = true;
        Ok(curve)
    }

    /// Degree-1 curve through `points`, parametrized by chord length.
    pub fn polyline(points: &[Point3d]) -> Result<Self, GeometryError> {
        if points.len() < 2 {
            return Err(GeometryError::InvalidInput("polyline needs two points".into()));
        }
        let mut knots = vec![0.0, 0.0];
        let mut acc = 0.0;
        for w in points.windows(2) {
            acc += w[0].distance_to(&w[1]).max(1e-12);
            knots.push(acc);
        }
        knots.push(acc);
        Self::new(1, points.to_vec(), None, knots)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn poles(&self) -> &[Point3d] {
        &self.poles
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn is_rational(&self) -> bool {
        self.weights.is_some()
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    fn weight(&self, i: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[i])
    }

    /// Distinct knot values with their multiplicities.
    pub fn multiplicities(&self) -> (Vec<f64>, Vec<usize>) {
        knot_runs(&self.knots)
    }

    /// Parameter domain [t_min, t_max].
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[self.degree], self.knots[self.poles.len()])
    }

    pub fn period(&self) -> Option<f64> {
        self.periodic.then(|| {
            let (a, b) = self.domain();
            b - a
        })
    }

    pub fn is_closed(&self, tol: f64) -> bool {
        let (a, b) = self.domain();
        self.point(a).distance_to(&self.point(b)) < tol
    }

    fn wrap(&self, t: f64) -> f64 {
        if !self.periodic {
            return t;
        }
        let (a, b) = self.domain();
        let period = b - a;
        a + (t - a).rem_euclid(period)
    }

    pub fn point(&self, t: f64) -> Point3d {
        let d = self.derivatives(t, 0);
        Point3d::new(d[0].x, d[0].y, d[0].z)
    }

    /// Point (as a vector from the origin) and derivatives up to order `n`.
    pub fn derivatives(&self, t: f64, n: usize) -> Vec<Vec3> {
        let t = self.wrap(t);
        let p = self.degree;
        let span = find_span(&self.knots, p, self.poles.len(), t);
        let ders = basis_derivatives(&self.knots, p, span, t, n);

        let mut aw = vec![Vec3::ZERO; n + 1];
        let mut wd = vec![0.0; n + 1];
        for k in 0..=n {
            for j in 0..=p {
                let idx = span - p + j;
                let w = self.weight(idx);
                aw[k] = aw[k] + self.poles[idx].to_vec3() * (ders[k][j] * w);
                wd[k] += ders[k][j] * w;
            }
        }
        if !self.is_rational() {
            return aw;
        }
        rational_curve_derivatives(&aw, &wd)
    }

    pub fn transformed(&self, t: &Transform) -> Self {
        Self {
            poles: self.poles.iter().map(|p| t.transform_point(p)).collect(),
            ..self.clone()
        }
    }

    /// Same point set traversed backwards; parameter `t` maps to `a + b - t`.
    pub fn reversed(&self) -> Self {
        let (a, b) = (self.knots[0], self.knots[self.knots.len() - 1]);
        let mut poles = self.poles.clone();
        poles.reverse();
        let weights = self.weights.as_ref().map(|w| w.iter().rev().copied().collect());
        let knots = self.knots.iter().rev().map(|k| a + b - k).collect();
        Self {
            degree: self.degree,
            poles,
            weights,
            knots,
            periodic: self.periodic,
        }
    }
}

/// A Bezier curve: a single-span clamped B-spline on [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BezierCurve {
    spline: BSplineCurve,
}

impl BezierCurve {
    pub fn new(poles: Vec<Point3d>, weights: Option<Vec<f64>>) -> Result<Self, GeometryError> {
        if poles.len() < 2 {
            return Err(GeometryError::InvalidInput("Bezier curve needs at least two poles".into()));
        }
        let degree = poles.len() - 1;
        let spline = BSplineCurve::clamped_uniform(degree, poles, weights)?;
        Ok(Self { spline })
    }

    pub fn degree(&self) -> usize {
        self.spline.degree
    }

    pub fn poles(&self) -> &[Point3d] {
        &self.spline.poles
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.spline.weights()
    }

    pub fn as_bspline(&self) -> &BSplineCurve {
        &self.spline
    }

    pub fn transformed(&self, t: &Transform) -> Self {
        Self {
            spline: self.spline.transformed(t),
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            spline: self.spline.reversed(),
        }
    }
}

/// Tensor-product B-spline surface. `poles[i][j]` is indexed u-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BSplineSurface {
    u_degree: usize,
    v_degree: usize,
    poles: Vec<Vec<Point3d>>,
    weights: Option<Vec<Vec<f64>>>,
    u_knots: Vec<f64>,
    v_knots: Vec<f64>,
    u_periodic: bool,
    v_periodic: bool,
}

/// Point and partial derivatives up to second order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceDerivatives {
    pub point: Point3d,
    pub du: Vec3,
    pub dv: Vec3,
    pub duu: Vec3,
    pub duv: Vec3,
    pub dvv: Vec3,
}

impl BSplineSurface {
    pub fn new(
        u_degree: usize,
        v_degree: usize,
        poles: Vec<Vec<Point3d>>,
        weights: Option<Vec<Vec<f64>>>,
        u_knots: Vec<f64>,
        v_knots: Vec<f64>,
    ) -> Result<Self, GeometryError> {
        let nu = poles.len();
        let nv = poles.first().map_or(0, Vec::len);
        if poles.iter().any(|row| row.len() != nv) {
            return Err(GeometryError::InvalidInput("pole grid rows have different lengths".into()));
        }
        validate_degree_and_poles(u_degree, nu)?;
        validate_degree_and_poles(v_degree, nv)?;
        validate_knots(u_degree, nu, &u_knots)?;
        validate_knots(v_degree, nv, &v_knots)?;
        if let Some(w) = &weights {
            if w.len() != nu {
                return Err(GeometryError::InvalidInput("weight grid shape mismatch".into()));
            }
            for row in w {
                validate_weights(row, nv)?;
            }
        }
        Ok(Self {
            u_degree,
            v_degree,
            poles,
            weights,
            u_knots,
            v_knots,
            u_periodic: false,
            v_periodic: false,
        })
    }

    /// Clamped surface with uniform interior knots on [0,1] x [0,1].
    pub fn clamped_uniform(
        u_degree: usize,
        v_degree: usize,
        poles: Vec<Vec<Point3d>>,
        weights: Option<Vec<Vec<f64>>>,
    ) -> Result<Self, GeometryError> {
        let nu = poles.len();
        let nv = poles.first().map_or(0, Vec::len);
        validate_degree_and_poles(u_degree, nu)?;
        validate_degree_and_poles(v_degree, nv)?;
        Self::new(
            u_degree,
            v_degree,
            poles,
            weights,
            clamped_uniform_knots(u_degree, nu),
            clamped_uniform_knots(v_degree, nv),
        )
    }

    pub fn u_degree(&self) -> usize {
        self.u_degree
    }

    pub fn v_degree(&self) -> usize {
        self.v_degree
    }

    pub fn poles(&self) -> &[Vec<Point3d>] {
        &self.poles
    }

    pub fn u_knots(&self) -> &[f64] {
        &self.u_knots
    }

    pub fn v_knots(&self) -> &[f64] {
        &self.v_knots
    }

    pub fn is_rational(&self) -> bool {
        self.weights.is_some()
    }

    fn weight(&self, i: usize, j: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[i][j])
    }

    pub fn domain(&self) -> ((f64, f64), (f64, f64)) {
        (
            (self.u_knots[self.u_degree], self.u_knots[self.poles.len()]),
            (self.v_knots[self.v_degree], self.v_knots[self.poles[0].len()]),
        )
    }

    pub fn u_period(&self) -> Option<f64> {
        self.u_periodic.then(|| self.domain().0).map(|(a, b)| b - a)
    }

    pub fn v_period(&self) -> Option<f64> {
        self.v_periodic.then(|| self.domain().1).map(|(a, b)| b - a)
    }

    pub fn point(&self, u: f64, v: f64) -> Point3d {
        self.derivatives(u, v).point
    }

    pub fn derivatives(&self, u: f64, v: f64) -> SurfaceDerivatives {
        let (p, q) = (self.u_degree, self.v_degree);
        let nu = self.poles.len();
        let nv = self.poles[0].len();
        let su = find_span(&self.u_knots, p, nu, u);
        let sv = find_span(&self.v_knots, q, nv, v);
        let bu = basis_derivatives(&self.u_knots, p, su, u, 2);
        let bv = basis_derivatives(&self.v_knots, q, sv, v, 2);

        // Homogeneous derivatives A[k][l] and weight derivatives W[k][l], k + l <= 2.
        let mut a = [[Vec3::ZERO; 3]; 3];
        let mut w = [[0.0; 3]; 3];
        for k in 0..=2 {
            for l in 0..=(2 - k) {
                for i in 0..=p {
                    let iu = su - p + i;
                    for j in 0..=q {
                        let jv = sv - q + j;
                        let b = bu[k][i] * bv[l][j];
                        if b == 0.0 {
                            continue;
                        }
                        let wt = self.weight(iu, jv);
                        a[k][l] = a[k][l] + self.poles[iu][jv].to_vec3() * (b * wt);
                        w[k][l] += b * wt;
                    }
                }
            }
        }

        let s = if self.is_rational() {
            rational_surface_derivatives(&a, &w)
        } else {
            a
        };
        SurfaceDerivatives {
            point: Point3d::new(s[0][0].x, s[0][0].y, s[0][0].z),
            du: s[1][0],
            dv: s[0][1],
            duu: s[2][0],
            duv: s[1][1],
            dvv: s[0][2],
        }
    }

    /// Iso-parametric curve at fixed `u` (a curve in v).
    pub fn u_iso(&self, u: f64) -> Result<BSplineCurve, GeometryError> {
        let p = self.u_degree;
        let nu = self.poles.len();
        let span = find_span(&self.u_knots, p, nu, u);
        let basis = basis_derivatives(&self.u_knots, p, span, u, 0);
        let nv = self.poles[0].len();
        let mut poles = Vec::with_capacity(nv);
        let mut weights = Vec::with_capacity(nv);
        for j in 0..nv {
            let mut acc = Vec3::ZERO;
            let mut wsum = 0.0;
            for i in 0..=p {
                let iu = span - p + i;
                let wt = self.weight(iu, j) * basis[0][i];
                acc = acc + self.poles[iu][j].to_vec3() * wt;
                wsum += wt;
            }
            let q = acc / wsum;
            poles.push(Point3d::new(q.x, q.y, q.z));
            weights.push(wsum);
        }
        let weights = self.is_rational().then_some(weights);
        BSplineCurve::new(self.v_degree, poles, weights, self.v_knots.clone())
    }

    /// Iso-parametric curve at fixed `v` (a curve in u).
    pub fn v_iso(&self, v: f64) -> Result<BSplineCurve, GeometryError> {
        let q = self.v_degree;
        let nv = self.poles[0].len();
        let span = find_span(&self.v_knots, q, nv, v);
        let basis = basis_derivatives(&self.v_knots, q, span, v, 0);
        let mut poles = Vec::with_capacity(self.poles.len());
        let mut weights = Vec::with_capacity(self.poles.len());
        for (i, row) in self.poles.iter().enumerate() {
            let mut acc = Vec3::ZERO;
            let mut wsum = 0.0;
            for j in 0..=q {
                let jv = span - q + j;
                let wt = self.weight(i, jv) * basis[0][j];
                acc = acc + row[jv].to_vec3() * wt;
                wsum += wt;
            }
            let p = acc / wsum;
            poles.push(Point3d::new(p.x, p.y, p.z));
            weights.push(wsum);
        }
        let weights = self.is_rational().then_some(weights);
        BSplineCurve::new(self.u_degree, poles, weights, self.u_knots.clone())
    }

    pub fn transformed(&self, t: &Transform) -> Self {
        Self {
            poles: self
                .poles
                .iter()
                .map(|row| row.iter().map(|p| t.transform_point(p)).collect())
                .collect(),
            ..self.clone()
        }
    }
}

/// A Bezier patch: a single-span clamped B-spline surface on [0,1]^2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BezierSurface {
    spline: BSplineSurface,
}

impl BezierSurface {
    pub fn new(poles: Vec<Vec<Point3d>>, weights: Option<Vec<Vec<f64>>>) -> Result<Self, GeometryError> {
        let nu = poles.len();
        let nv = poles.first().map_or(0, Vec::len);
        if nu < 2 || nv < 2 {
            return Err(GeometryError::InvalidInput("Bezier patch needs a 2x2 pole grid at least".into()));
        }
        let spline = BSplineSurface::clamped_uniform(nu - 1, nv - 1, poles, weights)?;
        Ok(Self { spline })
    }

    pub fn as_bspline(&self) -> &BSplineSurface {
        &self.spline
    }

    pub fn transformed(&self, t: &Transform) -> Self {
        Self {
            spline: self.spline.transformed(t),
        }
    }
}

// ─── Knot-vector helpers ─────────────────────────────────────────────────────

fn validate_degree_and_poles(degree: usize, n_poles: usize) -> Result<(), GeometryError> {
    if degree < 1 {
        return Err(GeometryError::InvalidInput("degree must be at least 1".into()));
    }
    if n_poles < degree + 1 {
        return Err(GeometryError::InvalidInput(format!(
            "degree {degree} needs at least {} poles, got {n_poles}",
            degree + 1
        )));
    }
    Ok(())
}

fn validate_weights(weights: &[f64], n_poles: usize) -> Result<(), GeometryError> {
    if weights.len() != n_poles {
        return Err(GeometryError::InvalidInput(format!(
            "{} weights for {n_poles} poles",
            weights.len()
        )));
    }
    if let Some(w) = weights.iter().find(|w| !(**w > 0.0) || !w.is_finite()) {
        return Err(GeometryError::InvalidInput(format!("weight {w} is not strictly positive")));
    }
    Ok(())
}

/// Check length, monotonicity and multiplicities of a flat knot vector.
pub(crate) fn validate_knots(degree: usize, n_poles: usize, knots: &[f64]) -> Result<(), GeometryError> {
    let expected = n_poles + degree + 1;
    if knots.len() != expected {
        return Err(GeometryError::InvalidKnotVector(format!(
            "length {} but poles + degree + 1 = {expected}",
            knots.len()
        )));
    }
    if knots.iter().any(|k| !k.is_finite()) {
        return Err(GeometryError::InvalidKnotVector("non-finite knot".into()));
    }
    if let Some(i) = knots.windows(2).position(|w| w[1] < w[0]) {
        return Err(GeometryError::InvalidKnotVector(format!("knots decrease at index {}", i + 1)));
    }
    let mut start = 0;
    while start < knots.len() {
        let mut end = start + 1;
        while end < knots.len() && knots[end] == knots[start] {
            end += 1;
        }
        let mult = end - start;
        let at_end = start == 0 || end == knots.len();
        let limit = if at_end { degree + 1 } else { degree };
        if mult > limit {
            return Err(GeometryError::InvalidKnotVector(format!(
                "knot {} has multiplicity {mult}, limit is {limit} for degree {degree}",
                knots[start]
            )));
        }
        start = end;
    }
    if knots[degree] >= knots[n_poles] {
        return Err(GeometryError::InvalidKnotVector("empty parameter domain".into()));
    }
    Ok(())
}

fn expand_knots(knots: &[f64], multiplicities: &[usize]) -> Result<Vec<f64>, GeometryError> {
    if knots.len() != multiplicities.len() {
        return Err(GeometryError::InvalidKnotVector(format!(
            "{} knots but {} multiplicities",
            knots.len(),
            multiplicities.len()
        )));
    }
    if multiplicities.contains(&0) {
        return Err(GeometryError::InvalidKnotVector("zero multiplicity".into()));
    }
    Ok(knots
        .iter()
        .zip(multiplicities)
        .flat_map(|(&k, &m)| std::iter::repeat_n(k, m))
        .collect())
}

fn knot_runs(knots: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut values: Vec<f64> = Vec::new();
    let mut mults: Vec<usize> = Vec::new();
    for &k in knots {
        match values.last() {
            Some(&last) if last == k => {
                if let Some(m) = mults.last_mut() {
                    *m += 1;
                }
            }
            _ => {
                values.push(k);
                mults.push(1);
            }
        }
    }
    (values, mults)
}

fn clamped_uniform_knots(degree: usize, n_poles: usize) -> Vec<f64> {
    let interior = n_poles - degree - 1;
    let mut knots = vec![0.0; degree + 1];
    for i in 1..=interior {
        knots.push(i as f64 / (interior + 1) as f64);
    }
    knots.extend(std::iter::repeat_n(1.0, degree + 1));
    knots
}

/// Knot span index containing `t` (binary search).
pub(crate) fn find_span(knots: &[f64], degree: usize, n_poles: usize, t: f64) -> usize {
    let n = n_poles - 1;
    let p = degree;

    if t >= knots[n + 1] {
        // Last non-empty span.
        let mut s = n;
        while s > p && knots[s] >= knots[n + 1] {
            s -= 1;
        }
        return s;
    }
    if t <= knots[p] {
        let mut s = p;
        while s < n && knots[s + 1] <= knots[p] {
            s += 1;
        }
        return s;
    }

    let mut low = p;
    let mut high = n + 1;
    let mut mid = (low + high) / 2;
    while t < knots[mid] || t >= knots[mid + 1] {
        if t < knots[mid] {
            high = mid;
        } else {
            low = mid;
        }
        mid = (low + high) / 2;
    }
    mid
}

/// Basis functions and their derivatives up to order `n` at `t`:
/// `ders[k][j]` is the k-th derivative of N_{span-p+j, p}.
pub(crate) fn basis_derivatives(knots: &[f64], p: usize, span: usize, t: f64, n: usize) -> Vec<Vec<f64>> {
    let mut ndu = vec![vec![0.0; p + 1]; p + 1];
    let mut left = vec![0.0; p + 1];
    let mut right = vec![0.0; p + 1];
    ndu[0][0] = 1.0;
    for j in 1..=p {
        left[j] = t - knots[span + 1 - j];
        right[j] = knots[span + j] - t;
        let mut saved = 0.0;
        for r in 0..j {
            ndu[j][r] = right[r + 1] + left[j - r];
            let temp = ndu[r][j - 1] / ndu[j][r];
            ndu[r][j] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        ndu[j][j] = saved;
    }

    let mut ders = vec![vec![0.0; p + 1]; n + 1];
    for j in 0..=p {
        ders[0][j] = ndu[j][p];
    }
    let nd = n.min(p);
    let pi = p as isize;
    let mut a = vec![vec![0.0; p + 1]; 2];
    for r in 0..=pi {
        let (mut s1, mut s2) = (0usize, 1usize);
        a[0][0] = 1.0;
        for k in 1..=nd as isize {
            let mut d = 0.0;
            let rk = r - k;
            let pk = pi - k;
            if r >= k {
                a[s2][0] = a[s1][0] / ndu[(pk + 1) as usize][rk as usize];
                d = a[s2][0] * ndu[rk as usize][pk as usize];
            }
            let j1 = if rk >= -1 { 1 } else { -rk };
            let j2 = if r - 1 <= pk { k - 1 } else { pi - r };
            for j in j1..=j2 {
                let (ju, rkj) = (j as usize, (rk + j) as usize);
                a[s2][ju] = (a[s1][ju] - a[s1][ju - 1]) / ndu[(pk + 1) as usize][rkj];
                d += a[s2][ju] * ndu[rkj][pk as usize];
            }
            if r <= pk {
                let ku = k as usize;
                a[s2][ku] = -a[s1][ku - 1] / ndu[(pk + 1) as usize][r as usize];
                d += a[s2][ku] * ndu[r as usize][pk as usize];
            }
            ders[k as usize][r as usize] = d;
            std::mem::swap(&mut s1, &mut s2);
        }
    }

    let mut factor = p as f64;
    for k in 1..=nd {
        for j in 0..=p {
            ders[k][j] *= factor;
        }
        factor *= (p - k) as f64;
    }
    ders
}

fn binomial(n: usize, k: usize) -> f64 {
    let mut r = 1.0;
    for i in 0..k {
        r = r * (n - i) as f64 / (i + 1) as f64;
    }
    r
}

fn rational_curve_derivatives(aw: &[Vec3], wd: &[f64]) -> Vec<Vec3> {
    let n = aw.len() - 1;
    let mut ck = vec![Vec3::ZERO; n + 1];
    for k in 0..=n {
        let mut v = aw[k];
        for i in 1..=k {
            v = v - ck[k - i] * (binomial(k, i) * wd[i]);
        }
        ck[k] = v / wd[0];
    }
    ck
}

fn rational_surface_derivatives(a: &[[Vec3; 3]; 3], w: &[[f64; 3]; 3]) -> [[Vec3; 3]; 3] {
    let mut s = [[Vec3::ZERO; 3]; 3];
    for k in 0..=2 {
        for l in 0..=(2 - k) {
            let mut v = a[k][l];
            for j in 1..=l {
                v = v - s[k][l - j] * (binomial(l, j) * w[0][j]);
            }
            for i in 1..=k {
                v = v - s[k - i][l] * (binomial(k, i) * w[i][0]);
                let mut v2 = Vec3::ZERO;
                for j in 1..=l {
                    v2 = v2 + s[k - i][l - j] * (binomial(l, j) * w[i][j]);
                }
                v = v - v2 * binomial(k, i);
            }
            s[k][l] = v / w[0][0];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quarter_circle() -> BSplineCurve {
        let w = std::f64::consts::FRAC_1_SQRT_2;
        BSplineCurve::new(
            2,
            vec![
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(1.0, 1.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
            ],
            Some(vec![1.0, w, 1.0]),
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_clamped_endpoints_hit_poles() {
        let poles = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 2.0, 0.0),
            Point3d::new(3.0, 2.0, 1.0),
            Point3d::new(4.0, 0.0, 0.0),
            Point3d::new(5.0, 1.0, 2.0),
        ];
        let c = BSplineCurve::clamped_uniform(3, poles.clone(), None).unwrap();
        let (a, b) = c.domain();
        assert!(c.point(a).distance_to(&poles[0]) < 1e-12);
        assert!(c.point(b).distance_to(&poles[4]) < 1e-12);
    }

    #[test]
    fn test_rational_quarter_circle_is_exact() {
        let c = quarter_circle();
        for i in 0..=10 {
            let t = i as f64 / 10.0;
            let p = c.point(t);
            let r = (p.x * p.x + p.y * p.y).sqrt();
            assert!((r - 1.0).abs() < 1e-12, "radius {} at t={}", r, t);
        }
    }

    #[test]
    fn test_rational_derivative_matches_finite_difference() {
        let c = quarter_circle();
        let t = 0.37;
        let h = 1e-6;
        let d = c.derivatives(t, 2);
        let fd = (c.point(t + h) - c.point(t - h)) / (2.0 * h);
        assert!((d[1] - fd).length() < 1e-6);
        let fd2 = (c.derivatives(t + h, 1)[1] - c.derivatives(t - h, 1)[1]) / (2.0 * h);
        assert!((d[2] - fd2).length() < 1e-5);
    }

    #[test]
    fn test_knot_vector_validation() {
        let poles = vec![Point3d::ORIGIN, Point3d::new(1.0, 0.0, 0.0), Point3d::new(2.0, 1.0, 0.0)];
        let wrong_len = BSplineCurve::new(2, poles.clone(), None, vec![0.0, 0.0, 1.0, 1.0]);
        assert!(matches!(wrong_len, Err(GeometryError::InvalidKnotVector(_))));

        let decreasing = BSplineCurve::new(2, poles.clone(), None, vec![0.0, 0.0, 0.0, 1.0, 0.5, 1.0]);
        assert!(matches!(decreasing, Err(GeometryError::InvalidKnotVector(_))));

        let poles4 = vec![
            Point3d::ORIGIN,
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(2.0, 1.0, 0.0),
            Point3d::new(3.0, 1.0, 0.0),
            Point3d::new(4.0, 0.0, 0.0),
        ];
        // Interior multiplicity 3 > degree 2.
        let too_many = BSplineCurve::new(2, poles4, None, vec![0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 1.0, 1.0]);
        assert!(matches!(too_many, Err(GeometryError::InvalidKnotVector(_))));

        let bad_weight = BSplineCurve::new(2, poles, Some(vec![1.0, 0.0, 1.0]), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert!(matches!(bad_weight, Err(GeometryError::InvalidInput(_))));
    }

    #[test]
    fn test_multiplicity_round_trip() {
        let poles = vec![
            Point3d::ORIGIN,
            Point3d::new(1.0, 1.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
            Point3d::new(3.0, 1.0, 0.0),
        ];
        let c = BSplineCurve::from_multiplicities(2, poles, None, &[0.0, 0.5, 1.0], &[3, 1, 3]).unwrap();
        let (k, m) = c.multiplicities();
        assert_eq!(k, vec![0.0, 0.5, 1.0]);
        assert_eq!(m, vec![3, 1, 3]);
    }

    #[test]
    fn test_periodic_curve_closes_smoothly() {
        let poles = vec![
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(-1.0, 0.0, 0.0),
            Point3d::new(0.0, -1.0, 0.0),
        ];
        let c = BSplineCurve::periodic_uniform(3, poles, None).unwrap();
        let (a, b) = c.domain();
        assert!(c.point(a).distance_to(&c.point(b)) < 1e-12);
        let d_start = c.derivatives(a, 1)[1];
        let d_end = c.derivatives(b - 1e-12, 1)[1];
        assert!((d_start - d_end).length() < 1e-6);
        assert_eq!(c.period(), Some(1.0));
    }

    #[test]
    fn test_reversed_curve_swaps_ends() {
        let c = quarter_circle();
        let r = c.reversed();
        assert!(r.point(0.0).distance_to(&c.point(1.0)) < 1e-12);
        assert!(r.point(0.3).distance_to(&c.point(0.7)) < 1e-12);
    }

    #[test]
    fn test_polyline_passes_through_points() {
        let pts = [Point3d::ORIGIN, Point3d::new(1.0, 0.0, 0.0), Point3d::new(1.0, 2.0, 0.0)];
        let c = BSplineCurve::polyline(&pts).unwrap();
        assert_eq!(c.domain(), (0.0, 3.0));
        assert!(c.point(1.0).distance_to(&pts[1]) < 1e-12);
        assert!(c.point(3.0).distance_to(&pts[2]) < 1e-12);
    }

    #[test]
    fn test_surface_corners_and_iso_curves() {
        let poles: Vec<Vec<Point3d>> = (0..3)
            .map(|i| {
                (0..4)
                    .map(|j| Point3d::new(i as f64, j as f64, ((i + j) % 2) as f64))
                    .collect()
            })
            .collect();
        let s = BSplineSurface::clamped_uniform(2, 3, poles.clone(), None).unwrap();
        assert!(s.point(0.0, 0.0).distance_to(&poles[0][0]) < 1e-12);
        assert!(s.point(1.0, 1.0).distance_to(&poles[2][3]) < 1e-12);
        let iso = s.u_iso(0.4).unwrap();
        assert!(iso.point(0.7).distance_to(&s.point(0.4, 0.7)) < 1e-12);
        let iso = s.v_iso(0.2).unwrap();
        assert!(iso.point(0.9).distance_to(&s.point(0.9, 0.2)) < 1e-12);
    }

    #[test]
    fn test_surface_derivatives_match_finite_difference() {
        let poles: Vec<Vec<Point3d>> = (0..3)
            .map(|i| (0..3).map(|j| Point3d::new(i as f64, j as f64, (i * j) as f64 * 0.5)).collect())
            .collect();
        let weights = Some(vec![vec![1.0, 2.0, 1.0], vec![0.5, 1.0, 1.5], vec![1.0, 1.0, 3.0]]);
        let s = BSplineSurface::clamped_uniform(2, 2, poles, weights).unwrap();
        let (u, v, h) = (0.3, 0.6, 1e-6);
        let d = s.derivatives(u, v);
        let du = (s.point(u + h, v) - s.point(u - h, v)) / (2.0 * h);
        let dv = (s.point(u, v + h) - s.point(u, v - h)) / (2.0 * h);
        assert!((d.du - du).length() < 1e-6);
        assert!((d.dv - dv).length() < 1e-6);
        let duv = (s.derivatives(u, v + h).du - s.derivatives(u, v - h).du) / (2.0 * h);
        assert!((d.duv - duv).length() < 1e-5);
    }
}
