//! Meshing of labeled images given with an arbitrary affine
//!
//! The affine `A` mapping voxel indices to world coordinates is factorized as
//! `A = R * diag(s) * S` (see [`decompose_affine`]). If `s` is not uniform or `S` is not
//! the identity, the image is first resampled on an isotropic grid with voxel size
//! `h = min(s)`. The (isotropic) grid is then meshed in its local space (index * h) and
//! the vertices are mapped back with `R * S` and the translation.
use crate::{
    affine::{decompose_affine, from_parts, translation},
    image::{resample_to_isotropic, Interpolation, VoxelGrid},
    mesher::{mesh_image, MeshingCriteria},
    Mesh, Result, Vert3d,
};
use log::{debug, info};
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

/// Relative tolerance used to detect anisotropic scalings and shearings
const ISOTROPY_TOL: f64 = 1e-6;

/// Options to derive the meshing criteria from the voxel size `h` of the isotropic grid
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMeshingOptions {
    /// Boundary triangle and element sizes, relative to `h`
    pub size_factor: f64,
    /// Max. distance to the interfaces, relative to `h`
    pub distance_factor: f64,
    /// Min. angle of the boundary triangles (in degrees)
    pub facet_angle: f64,
    pub cell_radius_edge_ratio: f64,
    pub optimize: bool,
    /// Interpolation used if the image needs to be resampled
    pub interpolation: Interpolation,
}

impl Default for ImageMeshingOptions {
    fn default() -> Self {
        Self {
            size_factor: 2.0,
            distance_factor: 0.5,
            facet_angle: 30.0,
            cell_radius_edge_ratio: 3.0,
            optimize: false,
            interpolation: Interpolation::Nearest,
        }
    }
}

impl ImageMeshingOptions {
    /// Meshing criteria for an isotropic voxel size `h`
    #[must_use]
    pub fn criteria(&self, h: f64) -> MeshingCriteria {
        MeshingCriteria::with_sizes(self.size_factor * h, self.distance_factor * h)
            .with_facet_angle(self.facet_angle)
            .with_cell_radius_edge_ratio(self.cell_radius_edge_ratio)
            .with_optimize(self.optimize)
    }
}

/// Isotropic grid equivalent to `grid` with `affine`, the affine of the new grid mapping
/// its indices to the world space
fn isotropic_grid(
    grid: &VoxelGrid,
    affine: &Matrix4<f64>,
    interpolation: Interpolation,
) -> Result<VoxelGrid> {
    let dec = decompose_affine(affine)?;
    let h = dec.scaling.min();
    if dec.is_isotropic(ISOTROPY_TOL) && dec.is_unsheared(ISOTROPY_TOL) {
        debug!("Isotropic image, no resampling needed (h = {h})");
        let res = VoxelGrid::new(grid.dims(), grid.labels().to_vec(), Vert3d::repeat(h))?;
        let affine = from_parts(&dec.isotropic_linear(h), &translation(affine));
        return Ok(res.with_affine(affine));
    }
    debug!(
        "Anisotropic image (scaling = {:?}), resampling with h = {h}",
        dec.scaling.as_slice()
    );
    let (res, affine) = resample_to_isotropic(grid, affine, h, interpolation)?;
    Ok(res.with_affine(affine))
}

/// Mesh a labeled grid whose voxel indices are mapped to world coordinates by `affine`.
/// The voxel size stored in `grid` is not used. The mesh is returned in world
/// coordinates, with positive elements even if `affine` is a reflection.
pub fn image_to_mesh(
    grid: &VoxelGrid,
    affine: &Matrix4<f64>,
    criteria: &MeshingCriteria,
) -> Result<Mesh> {
    image_to_mesh_with_interpolation(grid, affine, criteria, Interpolation::Nearest)
}

/// Same as [`image_to_mesh`], with the meshing criteria derived from the voxel size
pub fn image_to_mesh_with_options(
    grid: &VoxelGrid,
    affine: &Matrix4<f64>,
    options: &ImageMeshingOptions,
) -> Result<Mesh> {
    let h = decompose_affine(affine)?.scaling.min();
    let criteria = options.criteria(h);
    image_to_mesh_with_interpolation(grid, affine, &criteria, options.interpolation)
}

fn image_to_mesh_with_interpolation(
    grid: &VoxelGrid,
    affine: &Matrix4<f64>,
    criteria: &MeshingCriteria,
    interpolation: Interpolation,
) -> Result<Mesh> {
    info!("Image to mesh: {:?} voxels", grid.dims());
    let iso = isotropic_grid(grid, affine, interpolation)?;
    let mesh = mesh_image(&iso, criteria)?.into_caller_space();
    info!(
        "Image to mesh: {} vertices, {} elements, {} triangles",
        mesh.n_verts(),
        mesh.n_tets(),
        mesh.n_tris()
    );
    Ok(mesh)
}
