//! Multi-domain tetrahedral meshing of labeled images and nested surfaces
//!
//! The entry points are
//!   - [`pipeline::image_to_mesh`] for a labeled voxel grid with an arbitrary affine,
//!   - [`mesher::mesh_image`] for a grid that is already isotropic,
//!   - [`mesher::mesh_surfaces`] for a set of nested closed surfaces,
//!   - [`mesher::remesh`] to re-refine an existing tagged mesh,
//!   - [`smooth::smooth_surfaces`] to relax the boundary surfaces of a mesh.
use nalgebra::SVector;

pub mod affine;
pub mod domain;
pub mod geometry;
pub mod image;
pub mod mesh;
pub mod mesher;
pub mod pipeline;
pub mod predicates;
pub mod smooth;
pub mod spatialindex;
pub mod surface;

pub use mesh::{CoordinateSpace, DomainTag, FaceTag, Mesh};
pub use mesher::{MeshingCriteria, OptimizeBudget};

/// Errors raised by the meshing components
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The linear part of an affine transform is (numerically) singular
    #[error("degenerate affine transform (det = {det:.3e})")]
    DegenerateTransform { det: f64 },
    /// The mesh could not be generated with the requested criteria
    #[error("mesh generation failed: {0}")]
    MeshGeneration(String),
    /// An input surface does not allow an unambiguous classification of space
    #[error("invalid topology for surface {surface}: {reason}")]
    InvalidSurfaceTopology { surface: usize, reason: String },
    /// Inconsistent input data
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a `MeshGeneration` error
    #[must_use]
    pub fn mesh_generation(msg: &str) -> Self {
        Self::MeshGeneration(msg.into())
    }

    /// Create an `InvalidSurfaceTopology` error
    #[must_use]
    pub fn surface_topology(surface: usize, reason: &str) -> Self {
        Self::InvalidSurfaceTopology {
            surface,
            reason: reason.into(),
        }
    }
}

/// Result
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(all(feature = "32bit-tags", feature = "64bit-tags"))]
compile_error!("features `32bit-tags` and `64bit-tags` are mutually exclusive");
#[cfg(feature = "64bit-tags")]
/// Tag used for elements, faces and voxel labels
pub type Tag = i64;
#[cfg(feature = "32bit-tags")]
/// Tag used for elements, faces and voxel labels
pub type Tag = i32;
#[cfg(not(any(feature = "32bit-tags", feature = "64bit-tags")))]
/// Tag used for elements, faces and voxel labels
pub type Tag = i16;

/// Index of a vertex in a mesh
pub type Idx = u32;

/// Vertex in D dimensions
pub type Vertex<const D: usize> = SVector<f64, D>;
/// Vertex in 3D
pub type Vert3d = Vertex<3>;

/// Assert that two floating point values are closer than a tolerance
#[macro_export]
macro_rules! assert_delta {
    ($x:expr, $y:expr, $d:expr) => {
        assert!(
            ($x - $y).abs() < $d,
            "({:.3e} - {:.3e}).abs() = {:.3e}",
            $x,
            $y,
            ($x - $y).abs()
        )
    };
}

#[cfg(test)]
pub(crate) fn init_log(level: &str) {
    use env_logger::Env;
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}
