//! Elementary geometry on triangles and tetrahedra
use crate::Vert3d;
use nalgebra::Matrix3;
use std::f64::consts::PI;

/// Signed volume of a tetrahedron
#[must_use]
pub fn tet_volume(a: &Vert3d, b: &Vert3d, c: &Vert3d, d: &Vert3d) -> f64 {
    (b - a).cross(&(c - a)).dot(&(d - a)) / 6.0
}

/// Center of the sphere through the 4 vertices of a tetrahedron, `None` for flat elements
#[must_use]
pub fn tet_circumcenter(a: &Vert3d, b: &Vert3d, c: &Vert3d, d: &Vert3d) -> Option<Vert3d> {
    let ba = b - a;
    let ca = c - a;
    let da = d - a;
    let m = Matrix3::from_rows(&[ba.transpose(), ca.transpose(), da.transpose()]);
    let rhs = 0.5 * Vert3d::new(ba.norm_squared(), ca.norm_squared(), da.norm_squared());
    let det = m.determinant();
    let scale = ba.norm() * ca.norm() * da.norm();
    if det.abs() <= 1e-14 * scale {
        return None;
    }
    m.lu().solve(&rhs).map(|x| a + x)
}

/// Center of the circle through the 3 vertices of a triangle
#[must_use]
pub fn tri_circumcenter(a: &Vert3d, b: &Vert3d, c: &Vert3d) -> Vert3d {
    let ab = b - a;
    let ac = c - a;
    let n = ab.cross(&ac);
    let n2 = n.norm_squared();
    if n2 < f64::MIN_POSITIVE {
        return (a + b + c) / 3.0;
    }
    a + (ab.norm_squared() * ac.cross(&n) + ac.norm_squared() * n.cross(&ab)) / (2.0 * n2)
}

/// Area-weighted normal (norm = twice the area)
#[must_use]
pub fn tri_normal(a: &Vert3d, b: &Vert3d, c: &Vert3d) -> Vert3d {
    (b - a).cross(&(c - a))
}

/// Area of a triangle
#[must_use]
pub fn tri_area(a: &Vert3d, b: &Vert3d, c: &Vert3d) -> f64 {
    0.5 * tri_normal(a, b, c).norm()
}

/// Angle at `a` in triangle `abc`, in radians
#[must_use]
pub fn corner_angle(a: &Vert3d, b: &Vert3d, c: &Vert3d) -> f64 {
    let u = b - a;
    let v = c - a;
    f64::atan2(u.cross(&v).norm(), u.dot(&v))
}

/// Minimum angle of a triangle, in degrees
#[must_use]
pub fn tri_min_angle(a: &Vert3d, b: &Vert3d, c: &Vert3d) -> f64 {
    let a0 = corner_angle(a, b, c);
    let a1 = corner_angle(b, c, a);
    let a2 = PI - a0 - a1;
    a0.min(a1).min(a2).to_degrees()
}

/// Shortest edge of a tetrahedron
#[must_use]
pub fn tet_min_edge(p: &[Vert3d; 4]) -> f64 {
    let mut res = f64::MAX;
    for i in 0..4 {
        for j in i + 1..4 {
            res = res.min((p[j] - p[i]).norm());
        }
    }
    res
}

/// Normalized quality of a tetrahedron in [0, 1] (1 for the regular tetrahedron), based on
/// the ratio of the volume to the cube of the root mean square edge length. Non positive
/// elements get a non positive quality.
#[must_use]
pub fn tet_quality(p: &[Vert3d; 4]) -> f64 {
    let vol = tet_volume(&p[0], &p[1], &p[2], &p[3]);
    let mut l2 = 0.0;
    for i in 0..4 {
        for j in i + 1..4 {
            l2 += (p[j] - p[i]).norm_squared();
        }
    }
    let l_rms = (l2 / 6.0).sqrt();
    if l_rms < f64::MIN_POSITIVE {
        return 0.0;
    }
    6.0 * f64::sqrt(2.0) * vol / l_rms.powi(3)
}

/// Minimum dihedral angle of a tetrahedron, in degrees
#[must_use]
pub fn tet_min_dihedral(p: &[Vert3d; 4]) -> f64 {
    const EDGES: [[usize; 4]; 6] = [
        [0, 1, 2, 3],
        [0, 2, 1, 3],
        [0, 3, 1, 2],
        [1, 2, 0, 3],
        [1, 3, 0, 2],
        [2, 3, 0, 1],
    ];
    let mut res = 180.0_f64;
    for [i, j, k, l] in EDGES {
        let e = (p[j] - p[i]).normalize();
        let u = p[k] - p[i];
        let v = p[l] - p[i];
        let u = u - u.dot(&e) * e;
        let v = v - v.dot(&e) * e;
        let (nu, nv) = (u.norm(), v.norm());
        if nu < f64::MIN_POSITIVE || nv < f64::MIN_POSITIVE {
            return 0.0;
        }
        let cos = (u.dot(&v) / (nu * nv)).clamp(-1.0, 1.0);
        res = res.min(cos.acos().to_degrees());
    }
    res
}

/// Bounding box of a set of points
#[must_use]
pub fn bounding_box<'a, I: IntoIterator<Item = &'a Vert3d>>(pts: I) -> Option<(Vert3d, Vert3d)> {
    let mut it = pts.into_iter();
    let first = it.next()?;
    let mut mini = *first;
    let mut maxi = *first;
    for p in it {
        mini = mini.inf(p);
        maxi = maxi.sup(p);
    }
    Some((mini, maxi))
}
