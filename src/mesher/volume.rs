use super::{mesh_domain, MeshingCriteria};
use crate::{
    domain::ImageDomain, image::VoxelGrid, mesh::CoordinateSpace, Error, Mesh, Result, Vert3d,
};
use log::info;
use nalgebra::Matrix4;

/// Mesh the regions of a labeled voxel grid, in the local physical space of the grid
/// (voxel `(i, j, k)` at `(i * vx, j * vy, k * vz)`).
///
/// If the grid carries an affine, the mesh is returned in a local space mapped to the
/// affine's world space, see [`Mesh::into_caller_space`].
pub fn mesh_image(grid: &VoxelGrid, criteria: &MeshingCriteria) -> Result<Mesh> {
    info!(
        "Mesh a {:?} image, voxel size = {:?}",
        grid.dims(),
        grid.voxel_size().as_slice()
    );
    criteria.validate()?;
    let h_min = grid.voxel_size().min();
    if criteria.facet_size < 0.5 * h_min || criteria.cell_size < 0.5 * h_min {
        return Err(Error::MeshGeneration(format!(
            "facet_size = {} and cell_size = {} must be larger than half the voxel size ({h_min})",
            criteria.facet_size, criteria.cell_size
        )));
    }

    let domain = ImageDomain::new(grid)?;
    let mesh = mesh_domain(&domain, criteria)?;

    let space = grid.affine().map_or(CoordinateSpace::Caller, |a| {
        let to_index = Vert3d::from_fn(|d, _| 1.0 / grid.voxel_size()[d]);
        CoordinateSpace::Local(a * Matrix4::new_nonuniform_scaling(&to_index))
    });
    Ok(mesh.with_space(space))
}
