//! Tagged tetrahedral meshes
//!
//! A [`Mesh`] stores the vertex coordinates, the tetrahedra with their region tag and the
//! triangles on the interfaces between regions (or between a region and the background)
//! with the pair of regions they separate.
mod graph;
mod tags;

pub use graph::CSRGraph;
pub use tags::{DomainTag, FaceTag, FLAT_OFFSET};

use crate::{
    affine::{linear_part, transform_point},
    geometry::{bounding_box, corner_angle, tet_quality, tet_volume, tri_area},
    predicates::test_sign,
    Error, Idx, Result, Tag, Vert3d,
};
use log::debug;
use nalgebra::Matrix4;
use rayon::prelude::*;
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use std::f64::consts::PI;

/// Faces of a tetrahedron, oriented outwards; face `i` is opposite to vertex `i`
pub const TET_FACES: [[usize; 3]; 4] = [[1, 2, 3], [0, 3, 2], [0, 1, 3], [0, 2, 1]];

/// Coordinate space the vertices of a mesh are expressed in
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CoordinateSpace {
    /// The space of the caller's data
    Caller,
    /// A local space, mapped to the caller's space by an affine transform
    Local(Matrix4<f64>),
}

/// Sorted copy of a triangle, used as a key
#[must_use]
pub fn sorted_tri(t: [Idx; 3]) -> [Idx; 3] {
    let mut t = t;
    t.sort_unstable();
    t
}

/// Tetrahedral mesh with region tags on the elements and region pairs on the triangles
#[derive(Clone, Debug)]
pub struct Mesh {
    pub verts: Vec<Vert3d>,
    pub tets: Vec<[Idx; 4]>,
    pub etags: Vec<Tag>,
    pub tris: Vec<[Idx; 3]>,
    pub ftags: Vec<FaceTag>,
    pub space: CoordinateSpace,
}

impl Mesh {
    /// Create a mesh in the caller's coordinate space
    #[must_use]
    pub fn new(
        verts: Vec<Vert3d>,
        tets: Vec<[Idx; 4]>,
        etags: Vec<Tag>,
        tris: Vec<[Idx; 3]>,
        ftags: Vec<FaceTag>,
    ) -> Self {
        Self {
            verts,
            tets,
            etags,
            tris,
            ftags,
            space: CoordinateSpace::Caller,
        }
    }

    /// Create a mesh from tagged tetrahedra, the interface triangles being computed with
    /// [`Mesh::interface_triangles`]
    #[must_use]
    pub fn from_tets(verts: Vec<Vert3d>, tets: Vec<[Idx; 4]>, etags: Vec<Tag>) -> Self {
        Self::from_tets_with(verts, tets, etags, FaceTag::larger_inside)
    }

    /// Create a mesh from tagged tetrahedra, `face_tag` giving the side of each interface
    /// (see [`Mesh::interface_triangles_with`])
    #[must_use]
    pub fn from_tets_with<F: Fn(Tag, Tag) -> FaceTag>(
        verts: Vec<Vert3d>,
        tets: Vec<[Idx; 4]>,
        etags: Vec<Tag>,
        face_tag: F,
    ) -> Self {
        let (tris, ftags) = Self::interface_triangles_with(&tets, &etags, face_tag);
        Self::new(verts, tets, etags, tris, ftags)
    }

    /// Set the coordinate space
    #[must_use]
    pub fn with_space(mut self, space: CoordinateSpace) -> Self {
        self.space = space;
        self
    }

    #[must_use]
    pub fn n_verts(&self) -> usize {
        self.verts.len()
    }

    #[must_use]
    pub fn n_tets(&self) -> usize {
        self.tets.len()
    }

    #[must_use]
    pub fn n_tris(&self) -> usize {
        self.tris.len()
    }

    /// Vertices of a tetrahedron
    #[must_use]
    pub fn gtet(&self, t: &[Idx; 4]) -> [Vert3d; 4] {
        t.map(|i| self.verts[i as usize])
    }

    /// Vertices of a triangle
    #[must_use]
    pub fn gtri(&self, t: &[Idx; 3]) -> [Vert3d; 3] {
        t.map(|i| self.verts[i as usize])
    }

    /// Compute the triangles separating tetrahedra with different tags, or a tetrahedron
    /// from the background. Each interface is emitted once, from the element with the
    /// larger tag, and oriented outwards from it.
    #[must_use]
    pub fn interface_triangles(tets: &[[Idx; 4]], etags: &[Tag]) -> (Vec<[Idx; 3]>, Vec<FaceTag>) {
        Self::interface_triangles_with(tets, etags, FaceTag::larger_inside)
    }

    /// Same as [`Mesh::interface_triangles`], the inside region of the interface between
    /// tags `a` and `b` being given by `face_tag(a, b)`. Faces on the boundary of the mesh
    /// always have the element tag inside.
    #[must_use]
    pub fn interface_triangles_with<F: Fn(Tag, Tag) -> FaceTag>(
        tets: &[[Idx; 4]],
        etags: &[Tag],
        face_tag: F,
    ) -> (Vec<[Idx; 3]>, Vec<FaceTag>) {
        let mut face_to_tet: FxHashMap<[Idx; 3], [usize; 2]> =
            FxHashMap::with_capacity_and_hasher(2 * tets.len(), FxBuildHasher);
        for (i_tet, t) in tets.iter().enumerate() {
            for f in TET_FACES {
                let key = sorted_tri(f.map(|j| t[j]));
                face_to_tet
                    .entry(key)
                    .and_modify(|e| e[1] = i_tet)
                    .or_insert([i_tet, usize::MAX]);
            }
        }

        let mut tris = Vec::new();
        let mut ftags = Vec::new();
        for (i_tet, t) in tets.iter().enumerate() {
            let tag = etags[i_tet];
            for f in TET_FACES {
                let tri = f.map(|j| t[j]);
                let [e0, e1] = face_to_tet[&sorted_tri(tri)];
                let other = if e0 == i_tet { e1 } else { e0 };
                let ftag = if other == usize::MAX {
                    FaceTag::new(tag, 0)
                } else if etags[other] == tag {
                    continue;
                } else {
                    face_tag(tag, etags[other])
                };
                if ftag.inside == tag {
                    tris.push(tri);
                    ftags.push(ftag);
                }
            }
        }
        (tris, ftags)
    }

    /// Check the mesh validity
    ///   - connectivity and tag sizes
    ///   - vertex indices
    ///   - element orientation (exact predicate)
    ///   - tags
    ///   - all the interfaces are present and the boundary of every region is closed
    pub fn check(&self) -> Result<()> {
        if self.tets.len() != self.etags.len() {
            return Err(Error::InvalidInput("inconsistent sizes (tets)".into()));
        }
        if self.tris.len() != self.ftags.len() {
            return Err(Error::InvalidInput("inconsistent sizes (tris)".into()));
        }
        let n = self.verts.len();
        if let Some(i) = self
            .tets
            .iter()
            .position(|t| t.iter().any(|&j| j as usize >= n))
        {
            return Err(Error::InvalidInput(format!("invalid index in tet {i}")));
        }
        if let Some(i) = self
            .tris
            .iter()
            .position(|t| t.iter().any(|&j| j as usize >= n))
        {
            return Err(Error::InvalidInput(format!("invalid index in tri {i}")));
        }
        if let Some(i) = self
            .tets
            .par_iter()
            .position_first(|t| !test_sign(&self.verts, t))
        {
            return Err(Error::InvalidInput(format!(
                "tet {i} ({:?}) is not positive",
                self.tets[i]
            )));
        }
        if let Some(t) = self.etags.iter().find(|&&t| t <= 0) {
            return Err(Error::InvalidInput(format!("invalid element tag {t}")));
        }
        if let Some(f) = self
            .ftags
            .iter()
            .find(|f| f.inside <= 0 || f.outside < 0 || f.inside == f.outside)
        {
            return Err(Error::InvalidInput(format!("invalid face tag {f}")));
        }

        // interfaces
        let tris = self
            .tris
            .iter()
            .map(|&t| sorted_tri(t))
            .collect::<FxHashSet<_>>();
        let (expected, expected_tags) = Self::interface_triangles(&self.tets, &self.etags);
        for (t, f) in expected.iter().zip(expected_tags.iter()) {
            if !tris.contains(&sorted_tri(*t)) {
                return Err(Error::InvalidInput(format!(
                    "missing triangle {t:?} on interface {f}"
                )));
            }
        }

        // closed boundaries: every edge is traversed as often in both directions
        for tag in self.volume_tags() {
            let mut edges: FxHashMap<[Idx; 2], i64> = FxHashMap::default();
            for (t, f) in self.tris.iter().zip(self.ftags.iter()) {
                let t = if f.inside == tag {
                    *t
                } else if f.outside == tag {
                    [t[0], t[2], t[1]]
                } else {
                    continue;
                };
                for k in 0..3 {
                    let (a, b) = (t[k], t[(k + 1) % 3]);
                    if a < b {
                        *edges.entry([a, b]).or_default() += 1;
                    } else {
                        *edges.entry([b, a]).or_default() -= 1;
                    }
                }
            }
            if let Some((e, _)) = edges.iter().find(|(_, &c)| c != 0) {
                return Err(Error::InvalidInput(format!(
                    "boundary of region {tag} is not closed at edge {e:?}"
                )));
            }
        }

        Ok(())
    }

    /// Signed volume of every tetrahedron
    #[must_use]
    pub fn tet_volumes(&self) -> Vec<f64> {
        self.tets
            .par_iter()
            .map(|t| {
                let p = self.gtet(t);
                tet_volume(&p[0], &p[1], &p[2], &p[3])
            })
            .collect()
    }

    /// Quality of every tetrahedron (see [`tet_quality`])
    #[must_use]
    pub fn tet_qualities(&self) -> Vec<f64> {
        self.tets
            .par_iter()
            .map(|t| tet_quality(&self.gtet(t)))
            .collect()
    }

    /// Volume of each region
    #[must_use]
    pub fn region_volumes(&self) -> FxHashMap<Tag, f64> {
        let mut res = FxHashMap::default();
        for (v, &tag) in self.tet_volumes().iter().zip(self.etags.iter()) {
            *res.entry(tag).or_insert(0.0) += v;
        }
        res
    }

    /// Total volume
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.tet_volumes().iter().sum()
    }

    /// Bounding box of the vertices
    #[must_use]
    pub fn bounding_box(&self) -> Option<(Vert3d, Vert3d)> {
        bounding_box(&self.verts)
    }

    /// Sorted region tags
    #[must_use]
    pub fn volume_tags(&self) -> Vec<Tag> {
        let mut res = self.etags.clone();
        res.sort_unstable();
        res.dedup();
        res
    }

    /// Sorted interface tags
    #[must_use]
    pub fn boundary_tags(&self) -> Vec<FaceTag> {
        let mut res = self.ftags.clone();
        res.sort_unstable();
        res.dedup();
        res
    }

    /// Number of triangles with a given tag
    #[must_use]
    pub fn n_tagged_tris(&self, tag: FaceTag) -> usize {
        self.ftags.iter().filter(|&&f| f == tag).count()
    }

    /// Flat integer encoding of the element and triangle tags (see [`DomainTag::flat`])
    pub fn flat_tags(&self) -> Result<(Vec<i64>, Vec<i64>)> {
        let etags = self
            .etags
            .iter()
            .map(|&t| {
                DomainTag::Volume(t)
                    .flat()
                    .ok_or_else(|| Error::InvalidInput(format!("cannot encode element tag {t}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let ftags = self
            .ftags
            .iter()
            .map(|&f| {
                DomainTag::Boundary(f)
                    .flat()
                    .ok_or_else(|| Error::InvalidInput(format!("cannot encode face tag {f}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((etags, ftags))
    }

    /// Compute the vertex-to-tetrahedra connectivity
    #[must_use]
    pub fn vertex_to_tets(&self) -> CSRGraph {
        CSRGraph::transpose(&self.tets, self.n_verts())
    }

    /// Flag the vertices that belong to a triangle
    #[must_use]
    pub fn boundary_flag(&self) -> Vec<bool> {
        let mut res = vec![false; self.n_verts()];
        self.tris
            .iter()
            .flatten()
            .for_each(|&i| res[i as usize] = true);
        res
    }

    /// Apply an affine transform to the vertices. When the transform is a reflection, the
    /// elements are reordered to stay positive and the triangles to keep their
    /// orientation with respect to the regions.
    pub fn transform(&mut self, affine: &Matrix4<f64>) {
        self.verts
            .iter_mut()
            .for_each(|p| *p = transform_point(affine, p));
        if linear_part(affine).determinant() < 0.0 {
            debug!("Reflection: reorder the elements");
            self.tets.iter_mut().for_each(|t| t.swap(1, 2));
            self.tris.iter_mut().for_each(|t| t.swap(1, 2));
        }
    }

    /// Express the mesh in the caller's space
    #[must_use]
    pub fn into_caller_space(mut self) -> Self {
        if let CoordinateSpace::Local(affine) = self.space {
            self.transform(&affine);
            self.space = CoordinateSpace::Caller;
        }
        self
    }

    /// Discrete gaussian curvature (angle defect divided by a third of the area of the
    /// incident triangles) at the vertices of the triangles. Vertices shared by triangles
    /// with different tags are skipped.
    #[must_use]
    pub fn gaussian_curvature(&self) -> Vec<(Idx, f64)> {
        let n = self.n_verts();
        let mut angles = vec![0.0; n];
        let mut areas = vec![0.0; n];
        let mut tag: Vec<Option<FaceTag>> = vec![None; n];
        let mut mixed = vec![false; n];

        for (t, f) in self.tris.iter().zip(self.ftags.iter()) {
            let p = self.gtri(t);
            let a = tri_area(&p[0], &p[1], &p[2]);
            for k in 0..3 {
                let i = t[k] as usize;
                angles[i] += corner_angle(&p[k], &p[(k + 1) % 3], &p[(k + 2) % 3]);
                areas[i] += a / 3.0;
                match tag[i] {
                    None => tag[i] = Some(*f),
                    Some(g) if g != *f => mixed[i] = true,
                    _ => {}
                }
            }
        }

        (0..n)
            .filter(|&i| tag[i].is_some() && !mixed[i] && areas[i] > 0.0)
            .map(|i| (i as Idx, (2.0 * PI - angles[i]) / areas[i]))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::{test_meshes::box_mesh, CoordinateSpace, FaceTag, Mesh};
    use crate::{affine::from_parts, assert_delta, Result, Tag, Vert3d};
    use nalgebra::{Matrix3, Matrix4};

    fn two_regions(p: &Vert3d) -> Tag {
        if p.iter().all(|&x| (1.0..3.0).contains(&x)) {
            2
        } else {
            1
        }
    }

    #[test]
    fn test_box() -> Result<()> {
        let mesh = box_mesh(4, 4.0, two_regions);
        mesh.check()?;
        assert_eq!(mesh.n_verts(), 125);
        assert_eq!(mesh.n_tets(), 6 * 64);
        let vols = mesh.region_volumes();
        assert_delta!(vols[&2], 8.0, 1e-12);
        assert_delta!(vols[&1], 56.0, 1e-12);
        assert_eq!(
            mesh.boundary_tags(),
            vec![FaceTag::new(1, 0), FaceTag::new(2, 1)]
        );
        assert_eq!(mesh.n_tagged_tris(FaceTag::new(1, 0)), 6 * 16 * 2);
        assert_eq!(mesh.n_tagged_tris(FaceTag::new(2, 1)), 6 * 4 * 2);
        let (lo, hi) = mesh.bounding_box().unwrap();
        assert!((lo - Vert3d::zeros()).norm() < 1e-12);
        assert!((hi - Vert3d::new(4., 4., 4.)).norm() < 1e-12);

        let (etags, ftags) = mesh.flat_tags()?;
        assert!(etags.iter().all(|&t| t == 1 || t == 2));
        assert!(ftags.iter().all(|&t| t == 1001 || t == 2002));
        Ok(())
    }

    #[test]
    fn test_check() {
        let mesh = box_mesh(2, 1.0, |_| 1);
        assert!(mesh.check().is_ok());

        let mut m = mesh.clone();
        m.tets[0].swap(0, 1);
        assert!(m.check().is_err());

        let mut m = mesh.clone();
        m.tris.pop();
        m.ftags.pop();
        assert!(m.check().is_err());

        let mut m = mesh.clone();
        m.etags[3] = 0;
        assert!(m.check().is_err());

        let mut m = mesh;
        m.tets[0][0] = 1000;
        assert!(m.check().is_err());
    }

    #[test]
    fn test_reflection() -> Result<()> {
        let mesh = box_mesh(3, 3.0, |p| if p[0] < 1.5 { 1 } else { 2 });
        let lin = Matrix3::new(0., 2., 0., 1., 0., 0., 0., 0., 1.);
        let aff = from_parts(&lin, &Vert3d::new(1., 2., 3.));
        let vols = mesh.region_volumes();
        let mesh = mesh.with_space(CoordinateSpace::Local(aff));
        let mesh = mesh.into_caller_space();
        assert_eq!(mesh.space, CoordinateSpace::Caller);
        mesh.check()?;
        let new_vols = mesh.region_volumes();
        assert_delta!(new_vols[&1], 2.0 * vols[&1], 1e-10);
        assert_delta!(new_vols[&2], 2.0 * vols[&2], 1e-10);

        // identity
        let mut m = mesh.clone();
        m.transform(&Matrix4::identity());
        assert_eq!(m.tets, mesh.tets);
        Ok(())
    }

    #[test]
    fn test_curvature() -> Result<()> {
        let mesh = box_mesh(2, 2.0, |_| 1);
        let k = mesh.gaussian_curvature();
        // all the boundary vertices
        assert_eq!(k.len(), 26);
        // flat vertices
        let center = mesh
            .verts
            .iter()
            .position(|p| (p - Vert3d::new(1., 1., 0.)).norm() < 1e-12)
            .unwrap();
        let kc = k.iter().find(|(i, _)| *i as usize == center).unwrap().1;
        assert_delta!(kc, 0.0, 1e-10);
        // the total curvature of a closed surface is 4 pi
        let mut total = 0.0;
        let mut areas = vec![0.0; mesh.n_verts()];
        for t in &mesh.tris {
            let p = mesh.gtri(t);
            let a = crate::geometry::tri_area(&p[0], &p[1], &p[2]);
            t.iter().for_each(|&i| areas[i as usize] += a / 3.0);
        }
        for (i, ki) in k {
            total += ki * areas[i as usize];
        }
        assert_delta!(total, 4.0 * std::f64::consts::PI, 1e-10);
        Ok(())
    }

    #[test]
    fn test_interfaces_declared() {
        let mesh = box_mesh(2, 2.0, |p| if p[2] < 1.0 { 1 } else { 3 });
        let (tris, ftags) = Mesh::interface_triangles_with(&mesh.tets, &mesh.etags, |a, b| {
            if a.min(b) == 1 && a.max(b) == 3 {
                FaceTag::new(1, 3)
            } else {
                FaceTag::larger_inside(a, b)
            }
        });
        assert_eq!(tris.len(), mesh.n_tris());
        assert!(!ftags.contains(&FaceTag::new(3, 1)));
        let n_int = ftags.iter().filter(|f| **f == FaceTag::new(1, 3)).count();
        assert_eq!(n_int, 8);
        // oriented outwards from region 1, i.e. towards +z
        for (t, f) in tris.iter().zip(ftags.iter()) {
            if *f == FaceTag::new(1, 3) {
                let p = mesh.gtri(t);
                let n = (p[1] - p[0]).cross(&(p[2] - p[0]));
                assert!(n[2] > 0.0);
            }
        }
        let mesh = Mesh::new(mesh.verts, mesh.tets, mesh.etags, tris, ftags);
        assert!(mesh.check().is_ok());
    }

    #[test]
    fn test_interfaces() {
        let mesh = box_mesh(2, 2.0, |p| if p[2] < 1.0 { 1 } else { 3 });
        let (tris, ftags) = Mesh::interface_triangles(&mesh.tets, &mesh.etags);
        assert_eq!(tris.len(), mesh.n_tris());
        let n_int = ftags.iter().filter(|f| **f == FaceTag::new(3, 1)).count();
        assert_eq!(n_int, 8);
        // oriented outwards from region 3, i.e. towards -z
        for (t, f) in tris.iter().zip(ftags.iter()) {
            if *f == FaceTag::new(3, 1) {
                let p = mesh.gtri(t);
                let n = (p[1] - p[0]).cross(&(p[2] - p[0]));
                assert!(n[2] < 0.0);
            }
        }
    }
}
