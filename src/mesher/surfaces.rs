use super::{mesh_domain, MeshingCriteria};
use crate::{domain::SurfacesDomain, surface::TriangleSoup, Mesh, Result, Tag};
use log::info;

/// Mesh the regions bounded by closed, non intersecting, consistently oriented surfaces.
/// `tags[i]` gives the `(inside, outside)` region tags of `surfaces[i]`, the outside tag
/// being the inside tag of the enclosing surface or 0 for the background.
pub fn mesh_surfaces(
    surfaces: &[TriangleSoup],
    tags: &[(Tag, Tag)],
    criteria: &MeshingCriteria,
) -> Result<Mesh> {
    info!(
        "Mesh {} surfaces ({} triangles)",
        surfaces.len(),
        surfaces.iter().map(TriangleSoup::n_tris).sum::<usize>()
    );
    criteria.validate()?;
    let domain = SurfacesDomain::new(surfaces, tags)?;
    mesh_domain(&domain, criteria)
}

#[cfg(test)]
mod tests {
    use super::mesh_surfaces;
    use crate::{
        assert_delta,
        init_log,
        mesher::MeshingCriteria,
        surface::{
            test_surfaces::{cube, icosphere},
            TriangleSoup,
        },
        Error, FaceTag, Result, Vert3d,
    };
    use std::f64::consts::PI;

    #[test]
    fn test_nested_cubes() -> Result<()> {
        init_log("warn");
        let surfaces = [cube(1.0), cube(2.0)];
        let criteria = MeshingCriteria::with_sizes(0.5, 0.05);
        let mesh = mesh_surfaces(&surfaces, &[(1, 2), (2, 0)], &criteria)?;
        mesh.check()?;
        let vols = mesh.region_volumes();
        assert_delta!(vols[&1], 8.0, 0.8);
        assert_delta!(vols[&2], 56.0, 5.6);
        assert_eq!(
            mesh.boundary_tags(),
            vec![FaceTag::new(1, 2), FaceTag::new(2, 0)]
        );
        let (lo, hi) = mesh.bounding_box().unwrap();
        assert!((lo + Vert3d::repeat(2.0)).norm() < 0.05);
        assert!((hi - Vert3d::repeat(2.0)).norm() < 0.05);

        // normals point out of the declared inside region
        for (t, f) in mesh.tris.iter().zip(mesh.ftags.iter()) {
            let p = mesh.gtri(t);
            let n = (p[1] - p[0]).cross(&(p[2] - p[0]));
            let c = (p[0] + p[1] + p[2]) / 3.0;
            assert!(n.dot(&c) > 0.0, "{f}");
        }
        Ok(())
    }

    #[test]
    fn test_outer_region_inside() -> Result<()> {
        // larger tag in the inner cube, the declared sides are kept
        let surfaces = [cube(1.0), cube(2.0)];
        let criteria = MeshingCriteria::with_sizes(0.5, 0.05);
        let mesh = mesh_surfaces(&surfaces, &[(3, 1), (1, 0)], &criteria)?;
        mesh.check()?;
        assert_eq!(
            mesh.boundary_tags(),
            vec![FaceTag::new(1, 0), FaceTag::new(3, 1)]
        );
        Ok(())
    }

    #[test]
    fn test_sphere() -> Result<()> {
        let surfaces = [icosphere(1.0, 3)];
        let criteria = MeshingCriteria::with_sizes(0.3, 0.02);
        let mesh = mesh_surfaces(&surfaces, &[(4, 0)], &criteria)?;
        assert_eq!(mesh.volume_tags(), vec![4]);
        let v_ref = surfaces[0].signed_volume();
        assert!(v_ref < 4.0 / 3.0 * PI);
        assert_delta!(mesh.volume(), v_ref, 0.1 * v_ref);
        Ok(())
    }

    #[test]
    fn test_invalid() {
        let criteria = MeshingCriteria::with_sizes(0.5, 0.05);

        // open surface
        let mut open = cube(1.0);
        open.tris.pop();
        let res = mesh_surfaces(&[open], &[(1, 0)], &criteria);
        assert!(matches!(
            res,
            Err(Error::InvalidSurfaceTopology { surface: 0, .. })
        ));

        // intersecting surfaces
        let mut shifted = cube(1.0);
        shifted
            .verts
            .iter_mut()
            .for_each(|p| *p += Vert3d::new(0.5, 0.3, 0.2));
        let res = mesh_surfaces(&[cube(1.0), shifted], &[(1, 0), (2, 0)], &criteria);
        assert!(matches!(res, Err(Error::InvalidSurfaceTopology { .. })));

        // inconsistent orientation
        let mut flipped = cube(1.0);
        flipped.tris[0].swap(1, 2);
        let res = mesh_surfaces(&[flipped], &[(1, 0)], &criteria);
        assert!(matches!(res, Err(Error::InvalidSurfaceTopology { .. })));

        // tag count
        let res = mesh_surfaces(&[cube(1.0)], &[(1, 0), (2, 1)], &criteria);
        assert!(res.is_err());

        let empty = TriangleSoup::new(Vec::new(), Vec::new());
        assert!(mesh_surfaces(&[empty], &[(1, 0)], &criteria).is_err());
    }
}
