//! Implicit descriptions of multi-region domains
//!
//! A domain answers, for any point, the tag of the region containing it (0 for the
//! background). The meshers only access the geometry through this oracle.
mod image;
mod mesh;
mod surfaces;

pub use image::ImageDomain;
pub use mesh::MeshDomain;
pub use surfaces::SurfacesDomain;

use crate::{FaceTag, Tag, Vert3d};

/// Point to label oracle
pub trait LabeledDomain: Sync {
    /// Tag of the region containing `p`, 0 outside of the domain
    fn label(&self, p: &Vert3d) -> Tag;

    /// Box containing all the points with a positive label
    fn bounding_box(&self) -> (Vert3d, Vert3d);

    /// Tag of the interface between regions `a` and `b`, i.e. which of the two is
    /// inside. The larger tag is inside unless the domain declares otherwise.
    fn face_tag(&self, a: Tag, b: Tag) -> FaceTag {
        FaceTag::larger_inside(a, b)
    }

    /// Find the label change on `[p, q]`, where `label(p) != label(q)`, by bisection until
    /// the interval is shorter than `tol`. The point returned is on the side of `p`.
    fn bisect(&self, p: &Vert3d, q: &Vert3d, tol: f64) -> Vert3d {
        let lp = self.label(p);
        let mut a = *p;
        let mut b = *q;
        for _ in 0..64 {
            if (b - a).norm() <= tol {
                break;
            }
            let m = 0.5 * (a + b);
            if self.label(&m) == lp {
                a = m;
            } else {
                b = m;
            }
        }
        a
    }
}

#[cfg(test)]
pub(crate) mod test_domains {
    use super::LabeledDomain;
    use crate::{Tag, Vert3d};

    /// Nested spheres centered at the origin, region `i + 1` being between radii `i - 1`
    /// and `i`
    pub struct Shells(pub Vec<f64>);

    impl LabeledDomain for Shells {
        fn label(&self, p: &Vert3d) -> Tag {
            let r = p.norm();
            self.0
                .iter()
                .position(|&ri| r < ri)
                .map_or(0, |i| (i + 1) as Tag)
        }

        fn bounding_box(&self) -> (Vert3d, Vert3d) {
            let r = self.0.last().copied().unwrap_or(0.0);
            (Vert3d::repeat(-r), Vert3d::repeat(r))
        }
    }
}
