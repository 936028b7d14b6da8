use super::{mesh_domain, MeshingCriteria};
use crate::{domain::MeshDomain, Mesh, Result};
use log::info;

/// Generate a new mesh of the regions of a tagged mesh with the given sizes, the other
/// criteria taking their default values
pub fn remesh(mesh: &Mesh, facet_size: f64, cell_size: f64) -> Result<Mesh> {
    let criteria = MeshingCriteria::default()
        .with_facet_size(facet_size)
        .with_cell_size(cell_size)
        .with_facet_distance(0.25 * facet_size);
    remesh_with_criteria(mesh, &criteria)
}

/// Generate a new mesh of the regions of a tagged mesh. The result is expressed in the
/// coordinate space of the input mesh.
pub fn remesh_with_criteria(mesh: &Mesh, criteria: &MeshingCriteria) -> Result<Mesh> {
    info!(
        "Remesh a mesh with {} vertices and {} elements",
        mesh.n_verts(),
        mesh.n_tets()
    );
    criteria.validate()?;
    let domain = MeshDomain::new(mesh)?;
    let res = mesh_domain(&domain, criteria)?;
    Ok(res.with_space(mesh.space))
}

#[cfg(test)]
mod tests {
    use super::remesh;
    use crate::{
        assert_delta,
        domain::test_domains::Shells,
        init_log,
        mesh::{test_meshes::box_mesh, CoordinateSpace},
        mesher::{mesh_domain, MeshingCriteria},
        Error, FaceTag, Mesh, Result,
    };
    use nalgebra::Matrix4;
    use std::f64::consts::PI;

    fn shell_volume(r0: f64, r1: f64) -> f64 {
        4.0 / 3.0 * PI * (r1.powi(3) - r0.powi(3))
    }

    #[test]
    fn test_shells() -> Result<()> {
        init_log("warn");
        let domain = Shells(vec![85.0, 90.0, 95.0]);
        let criteria = MeshingCriteria::with_sizes(8.0, 0.5).with_cell_size(20.0);
        let mesh = mesh_domain(&domain, &criteria)?;
        assert_eq!(mesh.volume_tags(), vec![1, 2, 3]);

        let new_mesh = remesh(&mesh, 6.0, 20.0)?;
        new_mesh.check()?;
        assert_eq!(new_mesh.volume_tags(), vec![1, 2, 3]);
        assert_eq!(
            new_mesh.boundary_tags(),
            vec![FaceTag::new(2, 1), FaceTag::new(3, 0), FaceTag::new(3, 2)]
        );

        let vols = new_mesh.region_volumes();
        let refs = [
            shell_volume(0.0, 85.0),
            shell_volume(85.0, 90.0),
            shell_volume(90.0, 95.0),
        ];
        for (i, &v) in refs.iter().enumerate() {
            assert_delta!(vols[&(i as crate::Tag + 1)], v, 0.1 * v);
        }
        let r_max = new_mesh
            .verts
            .iter()
            .map(|p| p.norm())
            .fold(0.0, f64::max);
        assert_delta!(r_max, 95.0, 1.0);
        Ok(())
    }

    #[test]
    fn test_space() -> Result<()> {
        let affine = Matrix4::new_scaling(2.0);
        let mesh = box_mesh(4, 4.0, |p| if p[2] < 2.0 { 1 } else { 2 })
            .with_space(CoordinateSpace::Local(affine));
        let new_mesh = remesh(&mesh, 1.0, 1.0)?;
        assert_eq!(new_mesh.space, mesh.space);
        let vols = new_mesh.region_volumes();
        assert_delta!(vols[&1], 32.0, 3.2);
        assert_delta!(vols[&2], 32.0, 3.2);
        Ok(())
    }

    #[test]
    fn test_invalid() {
        let mut mesh = box_mesh(2, 1.0, |_| 1);
        mesh.tets[0].swap(0, 1);
        assert!(remesh(&mesh, 0.5, 0.5).is_err());
        let empty = Mesh::new(Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new());
        assert!(matches!(
            remesh(&empty, 0.5, 0.5),
            Err(Error::MeshGeneration(_) | Error::InvalidInput(_))
        ));
    }
}
