//! Resampling of labeled grids onto isotropic grids
use super::VoxelGrid;
use crate::{
    affine::{decompose_affine, from_parts, linear_part, translation},
    Error, Result, Tag, Vert3d,
};
use log::{debug, info};
use nalgebra::{Matrix3, Matrix4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Tolerance used when rounding the transformed grid extents
const EXTENT_TOL: f64 = 1e-6;

/// Interpolation kernel used to resample labels. Labels are categorical so the linear and
/// cubic kernels are used as weights in a vote: the label with the largest accumulated
/// weight wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Interpolation {
    #[default]
    Nearest,
    Linear,
    Cubic,
}

/// Keys cubic convolution kernel (a = -1/2, Catmull-Rom)
fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        (1.5 * t - 2.5) * t * t + 1.0
    } else if t < 2.0 {
        ((-0.5 * t + 2.5) * t - 4.0) * t + 2.0
    } else {
        0.0
    }
}

/// Small accumulator of weights per label
#[derive(Default)]
struct Votes(Vec<(Tag, f64)>);

impl Votes {
    fn add(&mut self, label: Tag, w: f64) {
        if let Some(v) = self.0.iter_mut().find(|(l, _)| *l == label) {
            v.1 += w;
        } else {
            self.0.push((label, w));
        }
    }

    fn winner(&self) -> Tag {
        let mut best = (0, f64::MIN);
        for &(l, w) in &self.0 {
            if w > best.1 || (w == best.1 && l < best.0) {
                best = (l, w);
            }
        }
        best.0
    }
}

fn sample(grid: &VoxelGrid, s: &Vert3d, order: Interpolation) -> Tag {
    match order {
        Interpolation::Nearest => grid.get_or_background(
            (s[0] + 0.5).floor() as i64,
            (s[1] + 0.5).floor() as i64,
            (s[2] + 0.5).floor() as i64,
        ),
        Interpolation::Linear => {
            let base = s.map(f64::floor);
            let frac = s - base;
            let mut votes = Votes::default();
            for dk in 0..2 {
                let wk = if dk == 0 { 1.0 - frac[2] } else { frac[2] };
                for dj in 0..2 {
                    let wj = if dj == 0 { 1.0 - frac[1] } else { frac[1] };
                    for di in 0..2 {
                        let wi = if di == 0 { 1.0 - frac[0] } else { frac[0] };
                        let l = grid.get_or_background(
                            base[0] as i64 + di,
                            base[1] as i64 + dj,
                            base[2] as i64 + dk,
                        );
                        votes.add(l, wi * wj * wk);
                    }
                }
            }
            votes.winner()
        }
        Interpolation::Cubic => {
            let base = s.map(f64::floor);
            let frac = s - base;
            let mut votes = Votes::default();
            for dk in -1..3_i64 {
                let wk = cubic_weight(frac[2] - dk as f64);
                for dj in -1..3_i64 {
                    let wj = cubic_weight(frac[1] - dj as f64);
                    for di in -1..3_i64 {
                        let wi = cubic_weight(frac[0] - di as f64);
                        let l = grid.get_or_background(
                            base[0] as i64 + di,
                            base[1] as i64 + dj,
                            base[2] as i64 + dk,
                        );
                        votes.add(l, wi * wj * wk);
                    }
                }
            }
            votes.winner()
        }
    }
}

/// Resample `grid`, whose voxel indices are mapped to world coordinates by `affine`, on an
/// isotropic grid with voxel size `voxel_size`.
///
/// The returned affine keeps the rotation and shearing of `affine` but has a uniform
/// scaling; its translation is shifted so that the new grid covers the extent of the
/// original one. Samples falling outside of the original grid are background.
pub fn resample_to_isotropic(
    grid: &VoxelGrid,
    affine: &Matrix4<f64>,
    voxel_size: f64,
    order: Interpolation,
) -> Result<(VoxelGrid, Matrix4<f64>)> {
    if !(voxel_size > 0.0 && voxel_size.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "invalid target voxel size {voxel_size}"
        )));
    }
    let dec = decompose_affine(affine)?;
    let lin = linear_part(affine);
    let lin_iso = dec.isotropic_linear(voxel_size);
    let lin_iso_inv = lin_iso
        .try_inverse()
        .ok_or(Error::DegenerateTransform {
            det: lin_iso.determinant(),
        })?;
    let lin_inv = lin.try_inverse().ok_or(Error::DegenerateTransform {
        det: lin.determinant(),
    })?;

    // original index -> isotropic index (up to a translation)
    let to_iso: Matrix3<f64> = lin_iso_inv * lin;
    // isotropic index -> original index
    let to_orig: Matrix3<f64> = lin_inv * lin_iso;

    let dims = grid.dims();
    let mut lo = Vert3d::repeat(f64::MAX);
    let mut hi = Vert3d::repeat(f64::MIN);
    for corner in 0..8 {
        let c = Vert3d::from_fn(|d, _| {
            if corner & (1 << d) == 0 {
                0.0
            } else {
                dims[d] as f64
            }
        });
        let c = to_iso * c;
        lo = lo.inf(&c);
        hi = hi.sup(&c);
    }
    let lo = lo.map(|x| (x + EXTENT_TOL).floor());
    let hi = hi.map(|x| (x - EXTENT_TOL).ceil());
    let new_dims = [0, 1, 2].map(|d| ((hi[d] - lo[d]) as usize).max(1));

    let new_translation = translation(affine) + lin_iso * lo;
    let new_affine = from_parts(&lin_iso, &new_translation);

    info!(
        "Resample a {dims:?} grid to a {new_dims:?} isotropic grid (h = {voxel_size}, {order:?})"
    );

    let mut labels = vec![0 as Tag; new_dims[0] * new_dims[1] * new_dims[2]];
    let slab = new_dims[0] * new_dims[1];
    labels
        .par_chunks_mut(slab)
        .enumerate()
        .for_each(|(k, slab_labels)| {
            for j in 0..new_dims[1] {
                for i in 0..new_dims[0] {
                    let o = Vert3d::new(i as f64, j as f64, k as f64) + lo;
                    let s = to_orig * o;
                    slab_labels[i + new_dims[0] * j] = sample(grid, &s, order);
                }
            }
        });

    let n_fg = labels.iter().filter(|&&l| l > 0).count();
    debug!("{n_fg} foreground voxels after resampling");

    let res = VoxelGrid {
        dims: new_dims,
        labels,
        voxel_size: Vert3d::repeat(voxel_size),
        affine: Some(new_affine),
    };
    Ok((res, new_affine))
}

#[cfg(test)]
mod tests {
    use super::{cubic_weight, resample_to_isotropic, Interpolation};
    use crate::{
        affine::from_parts,
        assert_delta,
        image::{test_images::cube_image, VoxelGrid},
        Result, Vert3d,
    };
    use nalgebra::{Matrix3, Matrix4};

    fn check_mask(img: &VoxelGrid, lo: [usize; 3], hi: [usize; 3]) {
        let dims = img.dims();
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let inside = (lo[0]..hi[0]).contains(&i)
                        && (lo[1]..hi[1]).contains(&j)
                        && (lo[2]..hi[2]).contains(&k);
                    let l = img.get(i, j, k);
                    if inside {
                        assert!(l > 0, "({i}, {j}, {k}) should be inside");
                    } else {
                        assert_eq!(l, 0, "({i}, {j}, {k}) should be outside");
                    }
                }
            }
        }
    }

    #[test]
    fn test_kernel() {
        assert_delta!(cubic_weight(0.0), 1.0, 1e-12);
        assert_delta!(cubic_weight(1.0), 0.0, 1e-12);
        assert_delta!(cubic_weight(2.0), 0.0, 1e-12);
        let s: f64 = (-1..3).map(|i| cubic_weight(0.3 - f64::from(i))).sum();
        assert_delta!(s, 1.0, 1e-12);
    }

    #[test]
    fn test_resample() -> Result<()> {
        let img = cube_image();
        let (iso, aff) =
            resample_to_isotropic(&img, &Matrix4::identity(), 0.5, Interpolation::Nearest)?;
        assert_eq!(iso.dims(), [100, 100, 100]);
        let expected = Matrix4::from_diagonal(&nalgebra::Vector4::new(0.5, 0.5, 0.5, 1.0));
        assert!((aff - expected).amax() < 1e-12);
        assert!((iso.voxel_size() - Vert3d::repeat(0.5)).norm() < 1e-12);
        check_mask(&iso, [19, 19, 19], [79, 79, 79]);
        Ok(())
    }

    #[test]
    fn test_diagonal() -> Result<()> {
        let img = cube_image();
        let aff = Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, 2.0, 3.0, 1.0));
        let (iso, aff2) = resample_to_isotropic(&img, &aff, 1.0, Interpolation::Nearest)?;
        assert_eq!(iso.dims(), [50, 100, 150]);
        assert!((aff2 - Matrix4::identity()).amax() < 1e-12);
        check_mask(&iso, [10, 19, 29], [40, 79, 119]);
        Ok(())
    }

    #[test]
    fn test_rotation() -> Result<()> {
        let img = cube_image();
        let aff = Matrix4::new(
            0., 1., 0., 0., //
            2., 0., 0., 0., //
            0., 0., 1., 0., //
            0., 0., 0., 1.,
        );
        let (iso, aff2) = resample_to_isotropic(&img, &aff, 1.0, Interpolation::Nearest)?;
        assert_eq!(iso.dims(), [100, 50, 50]);
        let expected = Matrix4::new(
            0., 1., 0., 0., //
            1., 0., 0., 0., //
            0., 0., 1., 0., //
            0., 0., 0., 1.,
        );
        assert!((aff2 - expected).amax() < 1e-12);
        check_mask(&iso, [19, 10, 10], [79, 40, 40]);
        Ok(())
    }

    #[test]
    fn test_reflection() -> Result<()> {
        let img = cube_image();
        let lin = Matrix3::from_diagonal(&Vert3d::new(-2.0, 1.0, 1.0));
        let aff = from_parts(&lin, &Vert3d::new(10.0, 0.0, 0.0));
        let (iso, aff2) = resample_to_isotropic(&img, &aff, 1.0, Interpolation::Nearest)?;
        assert_eq!(iso.dims(), [100, 50, 50]);
        // world position of the center of the cube is preserved
        let center = Vert3d::new(24.5, 24.5, 24.5);
        let w = lin * center + Vert3d::new(10.0, 0.0, 0.0);
        let l2 = aff2.fixed_view::<3, 3>(0, 0).into_owned();
        let t2 = aff2.fixed_view::<3, 1>(0, 3).into_owned();
        let idx = l2.try_inverse().unwrap() * (w - t2);
        let idx = idx.map(|x| (x + 0.5).floor() as usize);
        assert_eq!(iso.get(idx[0], idx[1], idx[2]), 1);
        assert_eq!(iso.count(1), 60 * 30 * 30);
        Ok(())
    }

    #[test]
    fn test_interpolation_keeps_labels() -> Result<()> {
        let mut img = VoxelGrid::zeros([20, 20, 20], Vert3d::new(1., 1., 1.));
        img.fill_box([5, 5, 5], [15, 15, 15], 1);
        img.fill_box([9, 9, 9], [11, 11, 11], 3);
        for order in [
            Interpolation::Nearest,
            Interpolation::Linear,
            Interpolation::Cubic,
        ] {
            let (iso, _) = resample_to_isotropic(&img, &Matrix4::identity(), 0.5, order)?;
            assert_eq!(iso.positive_labels(), vec![1, 3], "{order:?}");
            // far from the labels, the background is preserved
            assert_eq!(iso.get(2, 2, 2), 0);
            assert_eq!(iso.get(38, 38, 38), 0);
            assert_eq!(iso.get(20, 20, 20), 3);
            assert_eq!(iso.get(14, 14, 14), 1);
        }
        Ok(())
    }
}
