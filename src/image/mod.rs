//! Labeled voxel grids
//!
//! Voxel `(i, j, k)` is centered at `(i * vx, j * vy, k * vz)` in the local physical space
//! of the grid and covers half a voxel on each side. Labels are stored with the x index
//! running fastest.
mod resample;

use crate::{Error, Result, Tag, Vert3d};
use log::debug;
use nalgebra::Matrix4;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

pub use resample::{resample_to_isotropic, Interpolation};

/// Size of the INRIMAGE-4 header
const INR_HEADER_SIZE: usize = 256;

/// 3D array of non-negative labels, 0 being the background
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    dims: [usize; 3],
    labels: Vec<Tag>,
    voxel_size: Vert3d,
    affine: Option<Matrix4<f64>>,
}

impl VoxelGrid {
    /// Create a grid from its labels (x index running fastest)
    pub fn new(dims: [usize; 3], labels: Vec<Tag>, voxel_size: Vert3d) -> Result<Self> {
        if dims.iter().any(|&n| n == 0) {
            return Err(Error::InvalidInput(format!("empty grid: {dims:?}")));
        }
        if labels.len() != dims[0] * dims[1] * dims[2] {
            return Err(Error::InvalidInput(format!(
                "{} labels for a {dims:?} grid",
                labels.len()
            )));
        }
        if voxel_size.iter().any(|&x| !(x > 0.0 && x.is_finite())) {
            return Err(Error::InvalidInput(format!(
                "invalid voxel size {:?}",
                voxel_size.as_slice()
            )));
        }
        if let Some(l) = labels.iter().find(|&&l| l < 0) {
            return Err(Error::InvalidInput(format!("negative label {l}")));
        }
        Ok(Self {
            dims,
            labels,
            voxel_size,
            affine: None,
        })
    }

    /// Create a grid filled with background
    #[must_use]
    pub fn zeros(dims: [usize; 3], voxel_size: Vert3d) -> Self {
        Self {
            dims,
            labels: vec![0; dims[0] * dims[1] * dims[2]],
            voxel_size,
            affine: None,
        }
    }

    /// Attach an affine mapping the voxel indices to a world space
    #[must_use]
    pub fn with_affine(mut self, affine: Matrix4<f64>) -> Self {
        self.affine = Some(affine);
        self
    }

    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[must_use]
    pub const fn voxel_size(&self) -> Vert3d {
        self.voxel_size
    }

    #[must_use]
    pub const fn affine(&self) -> Option<&Matrix4<f64>> {
        self.affine.as_ref()
    }

    #[must_use]
    pub fn labels(&self) -> &[Tag] {
        &self.labels
    }

    #[must_use]
    pub fn n_voxels(&self) -> usize {
        self.labels.len()
    }

    /// Flat index of voxel `(i, j, k)`
    #[must_use]
    pub const fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    #[must_use]
    pub fn get(&self, i: usize, j: usize, k: usize) -> Tag {
        self.labels[self.index(i, j, k)]
    }

    /// Label of voxel `(i, j, k)`, background outside of the grid
    #[must_use]
    pub fn get_or_background(&self, i: i64, j: i64, k: i64) -> Tag {
        if i < 0 || j < 0 || k < 0 {
            return 0;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= self.dims[0] || j >= self.dims[1] || k >= self.dims[2] {
            return 0;
        }
        self.get(i, j, k)
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, label: Tag) {
        let idx = self.index(i, j, k);
        self.labels[idx] = label;
    }

    /// Set the label of all the voxels in `lo[0]..hi[0] x lo[1]..hi[1] x lo[2]..hi[2]`
    pub fn fill_box(&mut self, lo: [usize; 3], hi: [usize; 3], label: Tag) {
        for k in lo[2]..hi[2].min(self.dims[2]) {
            for j in lo[1]..hi[1].min(self.dims[1]) {
                for i in lo[0]..hi[0].min(self.dims[0]) {
                    self.set(i, j, k, label);
                }
            }
        }
    }

    /// Sorted positive labels present in the grid
    #[must_use]
    pub fn positive_labels(&self) -> Vec<Tag> {
        let mut res = self
            .labels
            .iter()
            .copied()
            .filter(|&l| l > 0)
            .collect::<Vec<_>>();
        res.sort_unstable();
        res.dedup();
        res
    }

    /// Number of voxels with a given label
    #[must_use]
    pub fn count(&self, label: Tag) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Label of the voxel nearest to `p`, given in the local physical space of the grid
    #[must_use]
    pub fn label_at(&self, p: &Vert3d) -> Tag {
        let idx = p.component_div(&self.voxel_size);
        let i = (idx[0] + 0.5).floor();
        let j = (idx[1] + 0.5).floor();
        let k = (idx[2] + 0.5).floor();
        if !(i.is_finite() && j.is_finite() && k.is_finite()) {
            return 0;
        }
        self.get_or_background(i as i64, j as i64, k as i64)
    }

    /// Bounding box of the voxels with a positive label, in local physical space (voxel
    /// extents included)
    #[must_use]
    pub fn foreground_bounding_box(&self) -> Option<(Vert3d, Vert3d)> {
        let mut lo = [usize::MAX; 3];
        let mut hi = [0; 3];
        let mut found = false;
        for k in 0..self.dims[2] {
            for j in 0..self.dims[1] {
                for i in 0..self.dims[0] {
                    if self.get(i, j, k) > 0 {
                        found = true;
                        for (d, x) in [i, j, k].into_iter().enumerate() {
                            lo[d] = lo[d].min(x);
                            hi[d] = hi[d].max(x);
                        }
                    }
                }
            }
        }
        if !found {
            return None;
        }
        let lo = Vert3d::from_fn(|d, _| (lo[d] as f64 - 0.5) * self.voxel_size[d]);
        let hi = Vert3d::from_fn(|d, _| (hi[d] as f64 + 0.5) * self.voxel_size[d]);
        Some((lo, hi))
    }

    /// Write the grid in the INRIMAGE-4 format (unsigned 16 bit, big endian). This is meant
    /// for visualization only.
    pub fn write_inr<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut header = format!(
            "#INRIMAGE-4#{{\nXDIM={}\nYDIM={}\nZDIM={}\nVDIM=1\nTYPE=unsigned fixed\nPIXSIZE=16 bits\nSCALE=2**0\nCPU=sun\nVX={}\nVY={}\nVZ={}\n",
            self.dims[0],
            self.dims[1],
            self.dims[2],
            self.voxel_size[0],
            self.voxel_size[1],
            self.voxel_size[2],
        );
        let footer = "##}\n";
        if header.len() + footer.len() > INR_HEADER_SIZE {
            return Err(Error::InvalidInput("INR header too long".into()));
        }
        while header.len() + footer.len() < INR_HEADER_SIZE {
            header.push('\n');
        }
        header.push_str(footer);
        writer.write_all(header.as_bytes())?;

        let mut payload = Vec::with_capacity(2 * self.n_voxels());
        for &l in &self.labels {
            let l = u16::try_from(l)
                .map_err(|_| Error::InvalidInput(format!("label {l} does not fit in 16 bits")))?;
            payload.extend_from_slice(&l.to_be_bytes());
        }
        writer.write_all(&payload)?;
        Ok(())
    }

    /// Write the grid to an INRIMAGE-4 file
    pub fn write_inr_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        debug!("Write {}", path.as_ref().display());
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_inr(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
