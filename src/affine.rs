//! Affine transforms mapping voxel indices to a world space, and their factorization
//! into rotation, per-axis scaling and shearing
use crate::{Error, Result, Vert3d};
use log::debug;
use nalgebra::{Matrix3, Matrix4};

/// Relative tolerance used to detect singular linear parts
const SINGULAR_TOL: f64 = 1e-12;

/// Upper-left 3x3 block of an affine transform
#[must_use]
pub fn linear_part(affine: &Matrix4<f64>) -> Matrix3<f64> {
    affine.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Last column of an affine transform
#[must_use]
pub fn translation(affine: &Matrix4<f64>) -> Vert3d {
    affine.fixed_view::<3, 1>(0, 3).into_owned()
}

/// Build an affine transform from its linear part and translation
#[must_use]
pub fn from_parts(linear: &Matrix3<f64>, translation: &Vert3d) -> Matrix4<f64> {
    let mut res = Matrix4::identity();
    res.fixed_view_mut::<3, 3>(0, 0).copy_from(linear);
    res.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    res
}

/// Apply an affine transform to a point
#[must_use]
pub fn transform_point(affine: &Matrix4<f64>, p: &Vert3d) -> Vert3d {
    linear_part(affine) * p + translation(affine)
}

/// Inverse of an affine transform
pub fn inverse(affine: &Matrix4<f64>) -> Result<Matrix4<f64>> {
    let l = linear_part(affine);
    check_linear(&l)?;
    let inv = l.try_inverse().ok_or(Error::DegenerateTransform {
        det: l.determinant(),
    })?;
    Ok(from_parts(&inv, &(-(inv * translation(affine)))))
}

fn check_linear(l: &Matrix3<f64>) -> Result<()> {
    let det = l.determinant();
    let scale = l.column(0).norm() * l.column(1).norm() * l.column(2).norm();
    if !det.is_finite() || det.abs() <= SINGULAR_TOL * scale || scale == 0.0 {
        return Err(Error::DegenerateTransform { det });
    }
    Ok(())
}

/// Factorization `linear = rotation * diag(scaling) * shearing` of the linear part of an
/// affine transform, where
///   - `rotation` is orthonormal,
///   - `scaling` is positive,
///   - `shearing` is upper triangular with a unit diagonal.
///
/// The factorization is unique. When the linear part is a reflection (negative determinant)
/// the reflection is carried by `rotation`, whose determinant is then -1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineDecomposition {
    pub rotation: Matrix3<f64>,
    pub scaling: Vert3d,
    pub shearing: Matrix3<f64>,
}

impl AffineDecomposition {
    /// Rebuild the linear part
    #[must_use]
    pub fn linear(&self) -> Matrix3<f64> {
        self.compose(&self.scaling)
    }

    /// Linear part with the same rotation and shearing but another scaling
    #[must_use]
    pub fn compose(&self, scaling: &Vert3d) -> Matrix3<f64> {
        self.rotation * Matrix3::from_diagonal(scaling) * self.shearing
    }

    /// Linear part with the same rotation and shearing but a uniform scaling `h`
    #[must_use]
    pub fn isotropic_linear(&self, h: f64) -> Matrix3<f64> {
        self.compose(&Vert3d::repeat(h))
    }

    /// Check if the scaling is the same along the 3 axes
    #[must_use]
    pub fn is_isotropic(&self, rel_tol: f64) -> bool {
        let smin = self.scaling.min();
        let smax = self.scaling.max();
        smax - smin <= rel_tol * smax
    }

    /// Check if there is no shearing
    #[must_use]
    pub fn is_unsheared(&self, tol: f64) -> bool {
        (self.shearing - Matrix3::identity()).amax() <= tol
    }
}

/// Decompose the linear part of an affine transform (the translation is ignored) using a
/// QR factorization of its columns with a positive diagonal
pub fn decompose_affine(affine: &Matrix4<f64>) -> Result<AffineDecomposition> {
    let l = linear_part(affine);
    check_linear(&l)?;

    let c0 = l.column(0).into_owned();
    let c1 = l.column(1).into_owned();
    let c2 = l.column(2).into_owned();

    // modified Gram-Schmidt
    let r00 = c0.norm();
    let q0 = c0 / r00;

    let r01 = q0.dot(&c1);
    let u1 = c1 - r01 * q0;
    let r11 = u1.norm();
    let q1 = u1 / r11;

    let r02 = q0.dot(&c2);
    let mut u2 = c2 - r02 * q0;
    let r12 = q1.dot(&u2);
    u2 -= r12 * q1;
    let r22 = u2.norm();
    let q2 = u2 / r22;

    let rotation = Matrix3::from_columns(&[q0, q1, q2]);
    let scaling = Vert3d::new(r00, r11, r22);
    let shearing = Matrix3::new(
        1.0,
        r01 / r00,
        r02 / r00,
        0.0,
        1.0,
        r12 / r11,
        0.0,
        0.0,
        1.0,
    );
    debug!(
        "Affine decomposition: scaling = {:?}, det(R) = {:.1}",
        scaling.as_slice(),
        rotation.determinant()
    );

    Ok(AffineDecomposition {
        rotation,
        scaling,
        shearing,
    })
}
