//! Delaunay refinement of multi-region domains
mod delaunay;
mod optimize;
mod refine;
mod remesh;
mod surfaces;
mod volume;

pub use delaunay::{hilbert_order, Delaunay, Insertion};
pub use optimize::{optimize, OptimizeStats};
pub use refine::VertexKind;
pub use remesh::{remesh, remesh_with_criteria};
pub use surfaces::mesh_surfaces;
pub use volume::mesh_image;

use crate::{domain::LabeledDomain, Error, Mesh, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

/// Budget of the optimization pass. The pass stops after `max_sweeps` sweeps or when
/// `time_limit` (in seconds) is exceeded, the mesh being valid in both cases.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeBudget {
    /// Max. number of sweeps through the mesh
    pub max_sweeps: usize,
    /// Max. time in seconds
    pub time_limit: Option<f64>,
}

impl Default for OptimizeBudget {
    fn default() -> Self {
        Self {
            max_sweeps: 8,
            time_limit: None,
        }
    }
}

impl OptimizeBudget {
    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Refinement criteria
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshingCriteria {
    /// Min. angle of the boundary triangles (in degrees)
    pub facet_angle: f64,
    /// Max. radius of the surface Delaunay balls of the boundary triangles
    pub facet_size: f64,
    /// Max. distance between the boundary triangles and the interfaces
    pub facet_distance: f64,
    /// Max. ratio between the circumradius and the shortest edge of the elements
    pub cell_radius_edge_ratio: f64,
    /// Max. circumradius of the elements
    pub cell_size: f64,
    /// Apply the optimization pass
    pub optimize: bool,
    /// Budget of the optimization pass
    pub optimize_budget: OptimizeBudget,
    /// Max. number of vertices
    pub max_vertices: usize,
}

impl Default for MeshingCriteria {
    fn default() -> Self {
        Self {
            facet_angle: 30.0,
            facet_size: 2.0,
            facet_distance: 0.5,
            cell_radius_edge_ratio: 3.0,
            cell_size: 2.0,
            optimize: false,
            optimize_budget: OptimizeBudget::default(),
            max_vertices: 2_000_000,
        }
    }
}

impl MeshingCriteria {
    /// Criteria with the same sizes for the boundary triangles and the elements
    #[must_use]
    pub fn with_sizes(size: f64, facet_distance: f64) -> Self {
        Self {
            facet_size: size,
            cell_size: size,
            facet_distance,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_facet_angle(mut self, angle: f64) -> Self {
        self.facet_angle = angle;
        self
    }

    #[must_use]
    pub const fn with_facet_size(mut self, size: f64) -> Self {
        self.facet_size = size;
        self
    }

    #[must_use]
    pub const fn with_facet_distance(mut self, distance: f64) -> Self {
        self.facet_distance = distance;
        self
    }

    #[must_use]
    pub const fn with_cell_radius_edge_ratio(mut self, ratio: f64) -> Self {
        self.cell_radius_edge_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_cell_size(mut self, size: f64) -> Self {
        self.cell_size = size;
        self
    }

    #[must_use]
    pub const fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    #[must_use]
    pub const fn with_optimize_budget(mut self, budget: OptimizeBudget) -> Self {
        self.optimize_budget = budget;
        self
    }

    #[must_use]
    pub const fn with_max_vertices(mut self, n: usize) -> Self {
        self.max_vertices = n;
        self
    }

    /// Smallest of the target sizes
    #[must_use]
    pub fn min_size(&self) -> f64 {
        self.facet_size.min(self.cell_size)
    }

    /// Check that the refinement can terminate with these criteria
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("facet_size", self.facet_size),
            ("facet_distance", self.facet_distance),
            ("cell_size", self.cell_size),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(Error::MeshGeneration(format!(
                    "{name} = {value} must be positive"
                )));
            }
        }
        if !(self.facet_angle > 0.0 && self.facet_angle <= 30.0) {
            return Err(Error::MeshGeneration(format!(
                "facet_angle = {} must be in (0, 30]",
                self.facet_angle
            )));
        }
        if !(self.cell_radius_edge_ratio >= 1.0 && self.cell_radius_edge_ratio.is_finite()) {
            return Err(Error::MeshGeneration(format!(
                "cell_radius_edge_ratio = {} must be >= 1",
                self.cell_radius_edge_ratio
            )));
        }
        if self.max_vertices == 0 {
            return Err(Error::mesh_generation("max_vertices must be positive"));
        }
        Ok(())
    }

    /// Read the criteria from a json string
    pub fn from_json(s: &str) -> Result<Self> {
        let res: Self = serde_json::from_str(s)?;
        res.validate()?;
        Ok(res)
    }

    /// Read the criteria from a json file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let res: Self = serde_json::from_reader(reader)?;
        res.validate()?;
        Ok(res)
    }

    /// Serialize to json
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Mesh a domain, with optional optimization
pub fn mesh_domain<D: LabeledDomain>(domain: &D, criteria: &MeshingCriteria) -> Result<Mesh> {
    criteria.validate()?;
    let mut mesh = refine::refine(domain, criteria)?;
    if criteria.optimize {
        let stats = optimize(&mut mesh, &criteria.optimize_budget);
        info!("{stats}");
        mesh.check()
            .map_err(|e| Error::MeshGeneration(format!("invalid optimized mesh: {e}")))?;
    }
    Ok(mesh)
}
