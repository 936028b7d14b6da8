//! Robust orientation and in-sphere predicates
//!
//! Both predicates first evaluate the determinant in floating point together with a
//! conservative bound on its rounding error. When the bound does not certify the sign,
//! the determinant is evaluated exactly using floating point expansions
//! (J.R. Shewchuk, "Adaptive Precision Floating-Point Arithmetic and Fast Robust
//! Geometric Predicates", 1997), so the returned sign is always exact.
use crate::{Idx, Vert3d};

const EPS: f64 = f64::EPSILON * 0.5;
const ORIENT_ERRBOUND: f64 = (16.0 + 128.0 * EPS) * EPS;
const INSPHERE_ERRBOUND: f64 = (32.0 + 512.0 * EPS) * EPS;

#[inline]
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let x = a + b;
    let bv = x - a;
    let av = x - bv;
    let br = b - bv;
    let ar = a - av;
    (x, ar + br)
}

#[inline]
fn two_prod(a: f64, b: f64) -> (f64, f64) {
    let p = a * b;
    (p, a.mul_add(b, -p))
}

/// Non-overlapping expansion, components sorted by increasing magnitude
#[derive(Debug, Clone)]
struct Expansion(Vec<f64>);

impl Expansion {
    fn diff(a: f64, b: f64) -> Self {
        let (x, y) = two_sum(a, -b);
        let mut res = Vec::with_capacity(2);
        if y != 0.0 {
            res.push(y);
        }
        res.push(x);
        Self(res)
    }

    fn grow(&self, b: f64) -> Self {
        let mut q = b;
        let mut h = Vec::with_capacity(self.0.len() + 1);
        for &e in &self.0 {
            let (s, r) = two_sum(q, e);
            if r != 0.0 {
                h.push(r);
            }
            q = s;
        }
        if q != 0.0 || h.is_empty() {
            h.push(q);
        }
        Self(h)
    }

    fn add(&self, other: &Self) -> Self {
        other.0.iter().fold(self.clone(), |acc, &f| acc.grow(f))
    }

    fn neg(&self) -> Self {
        Self(self.0.iter().map(|x| -x).collect())
    }

    fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    fn scale(&self, b: f64) -> Self {
        let mut h = Vec::with_capacity(2 * self.0.len());
        let mut it = self.0.iter();
        let Some(&e0) = it.next() else {
            return Self(vec![0.0]);
        };
        let (mut q, r) = two_prod(e0, b);
        if r != 0.0 {
            h.push(r);
        }
        for &e in it {
            let (p1, p0) = two_prod(e, b);
            let (s, r) = two_sum(q, p0);
            if r != 0.0 {
                h.push(r);
            }
            let (s, r) = two_sum(p1, s);
            if r != 0.0 {
                h.push(r);
            }
            q = s;
        }
        if q != 0.0 || h.is_empty() {
            h.push(q);
        }
        Self(h)
    }

    fn mul(&self, other: &Self) -> Self {
        other
            .0
            .iter()
            .fold(Self(vec![0.0]), |acc, &f| acc.add(&self.scale(f)))
    }

    /// Most significant component, carrying the exact sign
    fn estimate(&self) -> f64 {
        self.0
            .iter()
            .rev()
            .copied()
            .find(|x| *x != 0.0)
            .unwrap_or(0.0)
    }
}

fn det3_exact(r: [&[Expansion; 3]; 3]) -> Expansion {
    let m0 = r[1][1].mul(&r[2][2]).sub(&r[1][2].mul(&r[2][1]));
    let m1 = r[1][0].mul(&r[2][2]).sub(&r[1][2].mul(&r[2][0]));
    let m2 = r[1][0].mul(&r[2][1]).sub(&r[1][1].mul(&r[2][0]));
    r[0][0]
        .mul(&m0)
        .sub(&r[0][1].mul(&m1))
        .add(&r[0][2].mul(&m2))
}

fn diffs_exact(p: &Vert3d, o: &Vert3d) -> [Expansion; 3] {
    [
        Expansion::diff(p[0], o[0]),
        Expansion::diff(p[1], o[1]),
        Expansion::diff(p[2], o[2]),
    ]
}

fn orient3d_exact(a: &Vert3d, b: &Vert3d, c: &Vert3d, d: &Vert3d) -> f64 {
    let ba = diffs_exact(b, a);
    let ca = diffs_exact(c, a);
    let da = diffs_exact(d, a);
    det3_exact([&ba, &ca, &da]).estimate()
}

/// Sign of det[b - a, c - a, d - a], i.e. positive if `d` lies on the side of the plane
/// `abc` pointed to by (b - a) x (c - a). The sign of the returned value is exact.
#[must_use]
pub fn orient3d(a: &Vert3d, b: &Vert3d, c: &Vert3d, d: &Vert3d) -> f64 {
    let ba = b - a;
    let ca = c - a;
    let da = d - a;

    let m0 = ca[1] * da[2] - ca[2] * da[1];
    let m1 = ca[0] * da[2] - ca[2] * da[0];
    let m2 = ca[0] * da[1] - ca[1] * da[0];
    let det = ba[0] * m0 - ba[1] * m1 + ba[2] * m2;

    let p0 = (ca[1] * da[2]).abs() + (ca[2] * da[1]).abs();
    let p1 = (ca[0] * da[2]).abs() + (ca[2] * da[0]).abs();
    let p2 = (ca[0] * da[1]).abs() + (ca[1] * da[0]).abs();
    let permanent = ba[0].abs() * p0 + ba[1].abs() * p1 + ba[2].abs() * p2;

    if det.abs() > ORIENT_ERRBOUND * permanent {
        return det;
    }
    orient3d_exact(a, b, c, d)
}

fn insphere_exact(a: &Vert3d, b: &Vert3d, c: &Vert3d, d: &Vert3d, e: &Vert3d) -> f64 {
    let rows = [a, b, c, d].map(|p| diffs_exact(p, e));
    let lifts = rows
        .iter()
        .map(|r| r[0].mul(&r[0]).add(&r[1].mul(&r[1])).add(&r[2].mul(&r[2])))
        .collect::<Vec<_>>();

    let minor = |skip: usize| {
        let [i0, i1, i2] = match skip {
            0 => [1, 2, 3],
            1 => [0, 2, 3],
            2 => [0, 1, 3],
            _ => [0, 1, 2],
        };
        det3_exact([&rows[i0], &rows[i1], &rows[i2]])
    };

    // cofactor expansion along the lifted column, the sign is flipped so that
    // points inside the sphere of a positive tetrahedron are positive
    let det = lifts[0]
        .mul(&minor(0))
        .sub(&lifts[1].mul(&minor(1)))
        .add(&lifts[2].mul(&minor(2)))
        .sub(&lifts[3].mul(&minor(3)));
    det.estimate()
}

fn det3_and_permanent(r0: &Vert3d, r1: &Vert3d, r2: &Vert3d) -> (f64, f64) {
    let m0 = r1[1] * r2[2] - r1[2] * r2[1];
    let m1 = r1[0] * r2[2] - r1[2] * r2[0];
    let m2 = r1[0] * r2[1] - r1[1] * r2[0];
    let p0 = (r1[1] * r2[2]).abs() + (r1[2] * r2[1]).abs();
    let p1 = (r1[0] * r2[2]).abs() + (r1[2] * r2[0]).abs();
    let p2 = (r1[0] * r2[1]).abs() + (r1[1] * r2[0]).abs();
    (
        r0[0] * m0 - r0[1] * m1 + r0[2] * m2,
        r0[0].abs() * p0 + r0[1].abs() * p1 + r0[2].abs() * p2,
    )
}

/// Positive if `e` lies strictly inside the circumsphere of the positively oriented
/// tetrahedron `abcd`, negative if it lies outside, zero if the five points are
/// cospherical. The sign of the returned value is exact.
#[must_use]
pub fn insphere(a: &Vert3d, b: &Vert3d, c: &Vert3d, d: &Vert3d, e: &Vert3d) -> f64 {
    let rows = [a - e, b - e, c - e, d - e];
    let lifts = rows.map(|r| r.norm_squared());

    let (m0, p0) = det3_and_permanent(&rows[1], &rows[2], &rows[3]);
    let (m1, p1) = det3_and_permanent(&rows[0], &rows[2], &rows[3]);
    let (m2, p2) = det3_and_permanent(&rows[0], &rows[1], &rows[3]);
    let (m3, p3) = det3_and_permanent(&rows[0], &rows[1], &rows[2]);

    let det = lifts[0] * m0 - lifts[1] * m1 + lifts[2] * m2 - lifts[3] * m3;
    let permanent = lifts[0] * p0 + lifts[1] * p1 + lifts[2] * p2 + lifts[3] * p3;

    if det.abs() > INSPHERE_ERRBOUND * permanent {
        return det;
    }
    insphere_exact(a, b, c, d, e)
}

/// Check that the tetrahedron `abcd` has a strictly positive signed volume
#[must_use]
pub fn is_positive(a: &Vert3d, b: &Vert3d, c: &Vert3d, d: &Vert3d) -> bool {
    orient3d(a, b, c, d) > 0.0
}

/// Check that a tetrahedron, given by indices into `nodes`, has a strictly positive
/// signed volume
#[must_use]
pub fn test_sign(nodes: &[Vert3d], tet: &[Idx; 4]) -> bool {
    let [i0, i1, i2, i3] = tet.map(|i| &nodes[i as usize]);
    is_positive(i0, i1, i2, i3)
}
