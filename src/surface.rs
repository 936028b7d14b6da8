//! Closed triangulated surfaces used to define nested domains
use crate::{
    geometry::{bounding_box, tri_normal},
    predicates::orient3d,
    spatialindex::BucketGrid,
    Error, Idx, Result, Vert3d,
};
use log::{debug, info};
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::{
    f64::consts::PI,
    fs::OpenOptions,
    io::{Read, Seek},
    path::Path,
};

/// Relative area below which a triangle is considered degenerate
const DEGENERATE_TOL: f64 = 1e-12;

/// Triangulated surface given as vertices and triangles
#[derive(Clone, Debug)]
pub struct TriangleSoup {
    pub verts: Vec<Vert3d>,
    pub tris: Vec<[Idx; 3]>,
}

impl TriangleSoup {
    #[must_use]
    pub const fn new(verts: Vec<Vert3d>, tris: Vec<[Idx; 3]>) -> Self {
        Self { verts, tris }
    }

    /// Read a surface from a .stl file (ascii or binary)
    pub fn from_stl<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let stl = stl_io::read_stl(reader)?;
        let verts = stl
            .vertices
            .iter()
            .map(|v| Vert3d::new(f64::from(v[0]), f64::from(v[1]), f64::from(v[2])))
            .collect();
        let tris = stl
            .faces
            .iter()
            .map(|f| {
                let mut t = [0; 3];
                for (i, &j) in f.vertices.iter().enumerate() {
                    t[i] = Idx::try_from(j)
                        .map_err(|_| Error::InvalidInput(format!("vertex index {j} too large")))?;
                }
                Ok(t)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(verts, tris))
    }

    /// Read a surface from a .stl file
    pub fn from_stl_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Read {}", path.as_ref().display());
        let mut file = OpenOptions::new().read(true).open(path)?;
        Self::from_stl(&mut file)
    }

    #[must_use]
    pub fn n_tris(&self) -> usize {
        self.tris.len()
    }

    /// Vertices of triangle `i`
    #[must_use]
    pub fn gtri(&self, i: usize) -> [Vert3d; 3] {
        self.tris[i].map(|j| self.verts[j as usize])
    }

    #[must_use]
    pub fn bounding_box(&self) -> Option<(Vert3d, Vert3d)> {
        bounding_box(self.tris.iter().flatten().map(|&i| &self.verts[i as usize]))
    }

    /// Signed enclosed volume, positive if the triangles are oriented outwards
    #[must_use]
    pub fn signed_volume(&self) -> f64 {
        (0..self.n_tris())
            .map(|i| {
                let [a, b, c] = self.gtri(i);
                a.dot(&b.cross(&c))
            })
            .sum::<f64>()
            / 6.0
    }

    /// Generalized winding number at `p`: +-1 inside a closed surface, 0 outside
    #[must_use]
    pub fn winding_number(&self, p: &Vert3d) -> f64 {
        let mut res = 0.0;
        for i in 0..self.n_tris() {
            let [a, b, c] = self.gtri(i).map(|x| x - p);
            let (la, lb, lc) = (a.norm(), b.norm(), c.norm());
            let num = a.dot(&b.cross(&c));
            let den = la * lb * lc + a.dot(&b) * lc + b.dot(&c) * la + c.dot(&a) * lb;
            res += 2.0 * f64::atan2(num, den);
        }
        res / (4.0 * PI)
    }

    /// Check if `p` is enclosed by the surface
    #[must_use]
    pub fn contains(&self, p: &Vert3d) -> bool {
        self.winding_number(p).abs() > 0.5
    }

    /// Check that the surface is a closed, consistently oriented 2-manifold without
    /// degenerate triangles. Intersections are checked by [`check_intersections`].
    pub fn check_topology(&self, surface: usize) -> Result<()> {
        if self.tris.is_empty() {
            return Err(Error::surface_topology(surface, "empty surface"));
        }
        let n = self.verts.len();
        if let Some(t) = self.tris.iter().find(|t| t.iter().any(|&i| i as usize >= n)) {
            return Err(Error::surface_topology(
                surface,
                &format!("invalid vertex index in triangle {t:?}"),
            ));
        }

        let Some((lo, hi)) = self.bounding_box() else {
            return Err(Error::surface_topology(surface, "empty surface"));
        };
        let l = (hi - lo).norm();
        for (i, t) in self.tris.iter().enumerate() {
            let [a, b, c] = self.gtri(i);
            if t[0] == t[1] || t[1] == t[2] || t[2] == t[0]
                || tri_normal(&a, &b, &c).norm() <= DEGENERATE_TOL * l * l
            {
                return Err(Error::surface_topology(
                    surface,
                    &format!("degenerate triangle {t:?}"),
                ));
            }
        }

        // number of times each edge is used in both directions
        let mut edges: FxHashMap<[Idx; 2], [usize; 2]> =
            FxHashMap::with_capacity_and_hasher(3 * self.tris.len(), FxBuildHasher);
        for t in &self.tris {
            for k in 0..3 {
                let (a, b) = (t[k], t[(k + 1) % 3]);
                if a < b {
                    edges.entry([a, b]).or_default()[0] += 1;
                } else {
                    edges.entry([b, a]).or_default()[1] += 1;
                }
            }
        }
        let mut edges = edges.into_iter().collect::<Vec<_>>();
        edges.sort_unstable();
        for (e, [n_fwd, n_bwd]) in edges {
            if n_fwd + n_bwd != 2 {
                return Err(Error::surface_topology(
                    surface,
                    &format!("edge {e:?} belongs to {} triangles", n_fwd + n_bwd),
                ));
            }
            if n_fwd != 1 {
                return Err(Error::surface_topology(
                    surface,
                    &format!("inconsistent orientation at edge {e:?}"),
                ));
            }
        }
        Ok(())
    }
}

/// Exact sign of `orient3d`
fn orient_sign(a: &Vert3d, b: &Vert3d, c: &Vert3d, d: &Vert3d) -> i8 {
    let o = orient3d(a, b, c, d);
    if o > 0.0 {
        1
    } else if o < 0.0 {
        -1
    } else {
        0
    }
}

fn orient2d(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn segments_intersect_2d(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2], d: &[f64; 2]) -> bool {
    let (o1, o2) = (orient2d(a, b, c), orient2d(a, b, d));
    let (o3, o4) = (orient2d(c, d, a), orient2d(c, d, b));
    if o1 * o2 > 0.0 || o3 * o4 > 0.0 {
        return false;
    }
    if o1 == 0.0 && o2 == 0.0 {
        // collinear: overlap of the projections
        return (0..2).all(|k| {
            a[k].min(b[k]) <= c[k].max(d[k]) && c[k].min(d[k]) <= a[k].max(b[k])
        });
    }
    true
}

fn point_in_tri_2d(p: &[f64; 2], t: &[[f64; 2]; 3]) -> bool {
    let o = [
        orient2d(&t[0], &t[1], p),
        orient2d(&t[1], &t[2], p),
        orient2d(&t[2], &t[0], p),
    ];
    o.iter().all(|&x| x >= 0.0) || o.iter().all(|&x| x <= 0.0)
}

/// Projection on the coordinate plane most orthogonal to the normal of `t`
fn project(t: &[Vert3d; 3], pts: &[Vert3d]) -> Vec<[f64; 2]> {
    let n = tri_normal(&t[0], &t[1], &t[2]).abs();
    let drop = n.imax();
    let (i, j) = match drop {
        0 => (1, 2),
        1 => (2, 0),
        _ => (0, 1),
    };
    pts.iter().map(|p| [p[i], p[j]]).collect()
}

/// Intersection of two coplanar triangles
fn coplanar_tris_intersect(t0: &[Vert3d; 3], t1: &[Vert3d; 3]) -> bool {
    let pts = project(t0, &[t0[0], t0[1], t0[2], t1[0], t1[1], t1[2]]);
    let a = [pts[0], pts[1], pts[2]];
    let b = [pts[3], pts[4], pts[5]];
    for i in 0..3 {
        for j in 0..3 {
            if segments_intersect_2d(&a[i], &a[(i + 1) % 3], &b[j], &b[(j + 1) % 3]) {
                return true;
            }
        }
    }
    point_in_tri_2d(&a[0], &b) || point_in_tri_2d(&b[0], &a)
}

/// Intersection of segment `[p, q]` with a triangle
fn segment_tri_intersect(p: &Vert3d, q: &Vert3d, t: &[Vert3d; 3]) -> bool {
    let s0 = orient_sign(&t[0], &t[1], &t[2], p);
    let s1 = orient_sign(&t[0], &t[1], &t[2], q);
    if s0 * s1 > 0 {
        return false;
    }
    if s0 == 0 && s1 == 0 {
        let pts = project(t, &[t[0], t[1], t[2], *p, *q]);
        let tri = [pts[0], pts[1], pts[2]];
        return point_in_tri_2d(&pts[3], &tri)
            || (0..3).any(|i| segments_intersect_2d(&pts[3], &pts[4], &tri[i], &tri[(i + 1) % 3]));
    }
    let o = [
        orient_sign(p, q, &t[0], &t[1]),
        orient_sign(p, q, &t[1], &t[2]),
        orient_sign(p, q, &t[2], &t[0]),
    ];
    o.iter().all(|&x| x >= 0) || o.iter().all(|&x| x <= 0)
}

/// Exact intersection test between two triangles (touching counts as intersecting)
#[must_use]
pub fn tris_intersect(t0: &[Vert3d; 3], t1: &[Vert3d; 3]) -> bool {
    let s = t1.map(|p| orient_sign(&t0[0], &t0[1], &t0[2], &p));
    if s.iter().all(|&x| x > 0) || s.iter().all(|&x| x < 0) {
        return false;
    }
    let s2 = t0.map(|p| orient_sign(&t1[0], &t1[1], &t1[2], &p));
    if s2.iter().all(|&x| x > 0) || s2.iter().all(|&x| x < 0) {
        return false;
    }
    if s.iter().all(|&x| x == 0) {
        return coplanar_tris_intersect(t0, t1);
    }
    (0..3).any(|i| segment_tri_intersect(&t0[i], &t0[(i + 1) % 3], t1))
        || (0..3).any(|i| segment_tri_intersect(&t1[i], &t1[(i + 1) % 3], t0))
}

/// Check that the triangles of `surfaces` do not intersect, within a surface or between
/// surfaces. Triangles of the same surface sharing a vertex are not checked.
pub fn check_intersections(surfaces: &[TriangleSoup]) -> Result<()> {
    let mut tris = Vec::new();
    for (i_surf, s) in surfaces.iter().enumerate() {
        for i in 0..s.n_tris() {
            tris.push((i_surf, i));
        }
    }
    let Some((lo, hi)) = bounding_box(
        surfaces
            .iter()
            .flat_map(|s| s.tris.iter().flatten().map(|&i| &s.verts[i as usize])),
    ) else {
        return Ok(());
    };

    let bbox = |&(i_surf, i): &(usize, usize)| {
        let p = surfaces[i_surf].gtri(i);
        (p[0].inf(&p[1]).inf(&p[2]), p[0].sup(&p[1]).sup(&p[2]))
    };

    let mut grid = BucketGrid::new(&lo, &hi, tris.len());
    for (k, t) in tris.iter().enumerate() {
        let (a, b) = bbox(t);
        grid.insert(k, &a, &b);
    }

    let mut n_checked = 0;
    for (k, t) in tris.iter().enumerate() {
        let (a, b) = bbox(t);
        let (i_surf, i) = *t;
        let g0 = surfaces[i_surf].gtri(i);
        for l in grid.candidates_in_box(&a, &b) {
            if l <= k {
                continue;
            }
            let (j_surf, j) = tris[l];
            if i_surf == j_surf {
                let (ti, tj) = (surfaces[i_surf].tris[i], surfaces[j_surf].tris[j]);
                if ti.iter().any(|x| tj.contains(x)) {
                    continue;
                }
            }
            let (c, d) = bbox(&tris[l]);
            if (0..3).any(|x| c[x] > b[x] || d[x] < a[x]) {
                continue;
            }
            n_checked += 1;
            if tris_intersect(&g0, &surfaces[j_surf].gtri(j)) {
                let reason = if i_surf == j_surf {
                    format!("triangles {i} and {j} intersect")
                } else {
                    format!("triangle {i} intersects triangle {j} of surface {j_surf}")
                };
                return Err(Error::surface_topology(i_surf, &reason));
            }
        }
    }
    debug!("{n_checked} triangle pairs checked for intersections");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::{
        check_intersections,
        test_surfaces::{cube, icosphere},
        tris_intersect, TriangleSoup,
    };
    use crate::{assert_delta, Error, Result, Vert3d};
    use std::io::Cursor;

    #[test]
    fn test_cube() -> Result<()> {
        let c = cube(1.0);
        c.check_topology(0)?;
        assert_delta!(c.signed_volume(), 8.0, 1e-12);
        assert_delta!(c.winding_number(&Vert3d::new(0.1, 0.2, 0.3)), 1.0, 1e-10);
        assert_delta!(c.winding_number(&Vert3d::new(3.0, 0.2, 0.3)), 0.0, 1e-10);
        assert!(c.contains(&Vert3d::new(0.9, -0.9, 0.9)));
        assert!(!c.contains(&Vert3d::new(1.1, -0.9, 0.9)));
        Ok(())
    }

    #[test]
    fn test_sphere() -> Result<()> {
        let s = icosphere(2.0, 3);
        s.check_topology(0)?;
        assert!(s.signed_volume() > 0.9 * 4.0 / 3.0 * std::f64::consts::PI * 8.0);
        assert!(s.contains(&Vert3d::new(1.0, 1.0, 1.0)));
        assert!(!s.contains(&Vert3d::new(2.0, 1.0, 1.0)));
        check_intersections(&[s])?;
        Ok(())
    }

    #[test]
    fn test_invalid() {
        // open surface
        let mut c = cube(1.0);
        c.tris.pop();
        assert!(matches!(
            c.check_topology(3),
            Err(Error::InvalidSurfaceTopology { surface: 3, .. })
        ));

        // flipped triangle
        let mut c = cube(1.0);
        c.tris[0].swap(0, 1);
        assert!(c.check_topology(0).is_err());

        // degenerate triangle
        let mut c = cube(1.0);
        c.tris[0][1] = c.tris[0][0];
        assert!(c.check_topology(0).is_err());

        // non-manifold edge
        let mut c = cube(1.0);
        let t = c.tris[0];
        c.tris.push(t);
        assert!(c.check_topology(0).is_err());
    }

    #[test]
    fn test_intersections() -> Result<()> {
        let a = [
            Vert3d::new(0., 0., 0.),
            Vert3d::new(1., 0., 0.),
            Vert3d::new(0., 1., 0.),
        ];
        let b = [
            Vert3d::new(0.2, 0.2, -1.),
            Vert3d::new(0.2, 0.2, 1.),
            Vert3d::new(0.3, 0.8, 1.),
        ];
        assert!(tris_intersect(&a, &b));
        let c = b.map(|p| p + Vert3d::new(2., 0., 0.));
        assert!(!tris_intersect(&a, &c));
        // coplanar
        let d = a.map(|p| 0.5 * p + Vert3d::new(0.1, 0.1, 0.));
        assert!(tris_intersect(&a, &d));
        let e = a.map(|p| p + Vert3d::new(1.5, 0., 0.));
        assert!(!tris_intersect(&a, &e));

        check_intersections(&[cube(1.0), cube(2.0)])?;
        let moved = TriangleSoup::new(
            cube(1.0)
                .verts
                .iter()
                .map(|p| p + Vert3d::new(1.5, 0., 0.))
                .collect(),
            cube(1.0).tris,
        );
        let res = check_intersections(&[cube(1.0), cube(2.0), moved]);
        assert!(matches!(res, Err(Error::InvalidSurfaceTopology { .. })));
        Ok(())
    }

    #[test]
    fn test_stl() -> Result<()> {
        let c = cube(1.0);
        let mesh = c
            .tris
            .iter()
            .map(|t| {
                let p = t.map(|i| c.verts[i as usize]);
                let n = (p[1] - p[0]).cross(&(p[2] - p[0])).normalize();
                let v = |x: &Vert3d| stl_io::Vertex::new([x[0] as f32, x[1] as f32, x[2] as f32]);
                stl_io::Triangle {
                    normal: stl_io::Normal::new([n[0] as f32, n[1] as f32, n[2] as f32]),
                    vertices: [v(&p[0]), v(&p[1]), v(&p[2])],
                }
            })
            .collect::<Vec<_>>();
        let mut buf = Cursor::new(Vec::new());
        stl_io::write_stl(&mut buf, mesh.iter())?;
        buf.set_position(0);
        let s = TriangleSoup::from_stl(&mut buf)?;
        assert_eq!(s.verts.len(), 8);
        assert_eq!(s.n_tris(), 12);
        s.check_topology(0)?;
        assert_delta!(s.signed_volume(), 8.0, 1e-6);

        let dir = tempfile::tempdir()?;
        let fname = dir.path().join("cube.stl");
        std::fs::write(&fname, buf.into_inner())?;
        let s = TriangleSoup::from_stl_file(&fname)?;
        assert_eq!(s.n_tris(), 12);
        assert_delta!(s.signed_volume(), 8.0, 1e-6);
        Ok(())
    }
}
