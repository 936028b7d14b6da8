use super::LabeledDomain;
use crate::{
    geometry::tet_volume, spatialindex::BucketGrid, Error, FaceTag, Mesh, Result, Tag, Vert3d,
};
use log::debug;

/// Relative tolerance of the barycentric inclusion test
const BARYCENTRIC_TOL: f64 = 1e-10;

/// Domain defined by the tetrahedra of an existing mesh: the label of a point is the tag
/// of the element containing it
pub struct MeshDomain<'a> {
    mesh: &'a Mesh,
    grid: BucketGrid,
    bbox: (Vert3d, Vert3d),
}

impl<'a> MeshDomain<'a> {
    /// Build the point location structure; the mesh is checked first
    pub fn new(mesh: &'a Mesh) -> Result<Self> {
        mesh.check()?;
        let bbox = mesh
            .bounding_box()
            .ok_or_else(|| Error::mesh_generation("empty mesh"))?;
        if mesh.tets.is_empty() {
            return Err(Error::mesh_generation("no element in the mesh"));
        }
        let mut grid = BucketGrid::new(&bbox.0, &bbox.1, mesh.n_tets());
        for (i, t) in mesh.tets.iter().enumerate() {
            let p = mesh.gtet(t);
            let lo = p[0].inf(&p[1]).inf(&p[2]).inf(&p[3]);
            let hi = p[0].sup(&p[1]).sup(&p[2]).sup(&p[3]);
            grid.insert(i, &lo, &hi);
        }
        debug!("Point location structure built for {} tets", mesh.n_tets());
        Ok(Self { mesh, grid, bbox })
    }

    /// Index of an element containing `p`
    #[must_use]
    pub fn locate(&self, p: &Vert3d) -> Option<usize> {
        if (0..3).any(|d| p[d] < self.bbox.0[d] || p[d] > self.bbox.1[d]) {
            return None;
        }
        self.grid.candidates(p).iter().copied().find(|&i| {
            let [a, b, c, d] = self.mesh.gtet(&self.mesh.tets[i]);
            let vol = tet_volume(&a, &b, &c, &d);
            let tol = -BARYCENTRIC_TOL * vol;
            tet_volume(p, &b, &c, &d) >= tol
                && tet_volume(&a, p, &c, &d) >= tol
                && tet_volume(&a, &b, p, &d) >= tol
                && tet_volume(&a, &b, &c, p) >= tol
        })
    }
}

impl LabeledDomain for MeshDomain<'_> {
    fn label(&self, p: &Vert3d) -> Tag {
        self.locate(p).map_or(0, |i| self.mesh.etags[i])
    }

    fn bounding_box(&self) -> (Vert3d, Vert3d) {
        self.bbox
    }

    fn face_tag(&self, a: Tag, b: Tag) -> FaceTag {
        self.mesh
            .ftags
            .iter()
            .find(|f| f.touches(a) && f.touches(b))
            .copied()
            .unwrap_or_else(|| FaceTag::larger_inside(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::MeshDomain;
    use crate::{
        domain::LabeledDomain, mesh::test_meshes::box_mesh, FaceTag, Result, Vert3d,
    };

    #[test]
    fn test_mesh_domain() -> Result<()> {
        let mesh = box_mesh(4, 4.0, |p| if p[0] < 2.0 { 1 } else { 2 });
        let d = MeshDomain::new(&mesh)?;
        assert_eq!(d.label(&Vert3d::new(0.3, 1.2, 3.3)), 1);
        assert_eq!(d.label(&Vert3d::new(3.3, 1.2, 3.3)), 2);
        assert_eq!(d.label(&Vert3d::new(4.3, 1.2, 3.3)), 0);
        assert_eq!(d.label(&Vert3d::new(1.0, 1.0, 1.0)), 1);
        let p = d.bisect(&Vert3d::new(0.5, 1.2, 2.1), &Vert3d::new(3.5, 1.2, 2.1), 1e-6);
        assert!((p[0] - 2.0).abs() < 1e-5);

        // interface sides are taken from the mesh
        assert_eq!(d.face_tag(1, 2), FaceTag::new(2, 1));
        let mut flipped = mesh.clone();
        for (t, f) in flipped.tris.iter_mut().zip(flipped.ftags.iter_mut()) {
            if f.outside != 0 {
                t.swap(1, 2);
                *f = f.flipped();
            }
        }
        let d = MeshDomain::new(&flipped)?;
        assert_eq!(d.face_tag(2, 1), FaceTag::new(1, 2));
        assert_eq!(d.face_tag(2, 0), FaceTag::new(2, 0));
        Ok(())
    }

    #[test]
    fn test_invalid_mesh() {
        let mut mesh = box_mesh(2, 1.0, |_| 1);
        mesh.tets[0].swap(0, 1);
        assert!(MeshDomain::new(&mesh).is_err());
    }
}
