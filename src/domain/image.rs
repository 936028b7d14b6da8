use super::LabeledDomain;
use crate::{image::VoxelGrid, Error, Result, Tag, Vert3d};

/// Domain defined by a labeled voxel grid, in the local physical space of the grid. The
/// label of a point is the label of the nearest voxel.
pub struct ImageDomain<'a> {
    grid: &'a VoxelGrid,
    bbox: (Vert3d, Vert3d),
}

impl<'a> ImageDomain<'a> {
    /// Create the domain, fails if there is no positive label in the grid
    pub fn new(grid: &'a VoxelGrid) -> Result<Self> {
        let bbox = grid
            .foreground_bounding_box()
            .ok_or_else(|| Error::mesh_generation("no positive label in the image"))?;
        Ok(Self { grid, bbox })
    }
}

impl LabeledDomain for ImageDomain<'_> {
    fn label(&self, p: &Vert3d) -> Tag {
        self.grid.label_at(p)
    }

    fn bounding_box(&self) -> (Vert3d, Vert3d) {
        self.bbox
    }
}
