use super::LabeledDomain;
use crate::{
    surface::{check_intersections, TriangleSoup},
    Error, FaceTag, Result, Tag, Vert3d,
};
use log::debug;

/// Domain defined by nested closed surfaces. A point belongs to the region given by the
/// inside tag of the innermost (smallest) surface enclosing it.
pub struct SurfacesDomain<'a> {
    surfaces: &'a [TriangleSoup],
    tags: Vec<(Tag, Tag)>,
    volumes: Vec<f64>,
    bboxes: Vec<(Vert3d, Vert3d)>,
    bbox: (Vert3d, Vert3d),
}

impl<'a> SurfacesDomain<'a> {
    /// Validate the surfaces and their `(inside, outside)` tags
    pub fn new(surfaces: &'a [TriangleSoup], tags: &[(Tag, Tag)]) -> Result<Self> {
        if surfaces.is_empty() {
            return Err(Error::InvalidInput("no input surface".into()));
        }
        if surfaces.len() != tags.len() {
            return Err(Error::surface_topology(
                surfaces.len().min(tags.len()),
                &format!("{} surfaces but {} tag pairs", surfaces.len(), tags.len()),
            ));
        }
        for (i, &(inside, outside)) in tags.iter().enumerate() {
            if inside <= 0 || outside < 0 || inside == outside {
                return Err(Error::surface_topology(
                    i,
                    &format!("invalid tags ({inside}, {outside})"),
                ));
            }
        }
        for (i, s) in surfaces.iter().enumerate() {
            s.check_topology(i)?;
        }
        check_intersections(surfaces)?;

        let volumes = surfaces
            .iter()
            .map(|s| s.signed_volume().abs())
            .collect::<Vec<_>>();
        let mut bboxes = Vec::with_capacity(surfaces.len());
        for (i, s) in surfaces.iter().enumerate() {
            bboxes.push(
                s.bounding_box()
                    .ok_or_else(|| Error::surface_topology(i, "empty surface"))?,
            );
        }
        let mut lo = bboxes[0].0;
        let mut hi = bboxes[0].1;
        for (a, b) in &bboxes {
            lo = lo.inf(a);
            hi = hi.sup(b);
        }

        let res = Self {
            surfaces,
            tags: tags.to_vec(),
            volumes,
            bboxes,
            bbox: (lo, hi),
        };

        // the outside tag of a surface is the inside tag of the enclosing surface
        for (i, s) in surfaces.iter().enumerate() {
            let p = s.verts[s.tris[0][0] as usize];
            let parent = res.innermost(&p, Some(i));
            let expected = parent.map_or(0, |j| res.tags[j].0);
            debug!("surface {i}: enclosed by {parent:?}");
            if res.tags[i].1 != expected {
                return Err(Error::surface_topology(
                    i,
                    &format!(
                        "outside tag {} does not match the enclosing region {expected}",
                        res.tags[i].1
                    ),
                ));
            }
        }

        Ok(res)
    }

    /// Index of the innermost surface enclosing `p`
    fn innermost(&self, p: &Vert3d, skip: Option<usize>) -> Option<usize> {
        let mut res: Option<usize> = None;
        for (i, s) in self.surfaces.iter().enumerate() {
            if Some(i) == skip {
                continue;
            }
            let (lo, hi) = &self.bboxes[i];
            if (0..3).any(|d| p[d] < lo[d] || p[d] > hi[d]) {
                continue;
            }
            if res.is_some_and(|j| self.volumes[j] <= self.volumes[i]) {
                continue;
            }
            if s.contains(p) {
                res = Some(i);
            }
        }
        res
    }
}

impl LabeledDomain for SurfacesDomain<'_> {
    fn label(&self, p: &Vert3d) -> Tag {
        self.innermost(p, None).map_or(0, |i| self.tags[i].0)
    }

    fn bounding_box(&self) -> (Vert3d, Vert3d) {
        self.bbox
    }

    fn face_tag(&self, a: Tag, b: Tag) -> FaceTag {
        self.tags
            .iter()
            .find(|&&(i, o)| (i == a && o == b) || (i == b && o == a))
            .map_or_else(|| FaceTag::larger_inside(a, b), |&(i, o)| FaceTag::new(i, o))
    }
}

#[cfg(test)]
mod tests {
    use super::SurfacesDomain;
    use crate::{
        domain::LabeledDomain,
        surface::test_surfaces::cube,
        Error, FaceTag, Result, Vert3d,
    };

    #[test]
    fn test_nested() -> Result<()> {
        let surfaces = [cube(1.0), cube(2.0)];
        let d = SurfacesDomain::new(&surfaces, &[(1, 2), (2, 0)])?;
        assert_eq!(d.label(&Vert3d::new(0.5, 0.5, 0.5)), 1);
        assert_eq!(d.label(&Vert3d::new(1.5, 0.5, 0.5)), 2);
        assert_eq!(d.label(&Vert3d::new(2.5, 0.5, 0.5)), 0);
        assert_eq!(d.face_tag(2, 1), FaceTag::new(1, 2));
        assert_eq!(d.face_tag(1, 2), FaceTag::new(1, 2));
        assert_eq!(d.face_tag(2, 0), FaceTag::new(2, 0));
        assert_eq!(d.face_tag(1, 0), FaceTag::new(1, 0));
        let (lo, hi) = d.bounding_box();
        assert!((lo + Vert3d::repeat(2.0)).norm() < 1e-12);
        assert!((hi - Vert3d::repeat(2.0)).norm() < 1e-12);

        // order does not matter
        let surfaces = [cube(2.0), cube(1.0)];
        let d = SurfacesDomain::new(&surfaces, &[(2, 0), (1, 2)])?;
        assert_eq!(d.label(&Vert3d::new(0.5, 0.5, 0.5)), 1);
        Ok(())
    }

    #[test]
    fn test_invalid_tags() {
        let surfaces = [cube(1.0), cube(2.0)];
        assert!(matches!(
            SurfacesDomain::new(&surfaces, &[(1, 3), (2, 0)]),
            Err(Error::InvalidSurfaceTopology { surface: 0, .. })
        ));
        assert!(matches!(
            SurfacesDomain::new(&surfaces, &[(1, 2), (2, 1)]),
            Err(Error::InvalidSurfaceTopology { surface: 1, .. })
        ));
        assert!(SurfacesDomain::new(&surfaces, &[(1, 2)]).is_err());
        assert!(SurfacesDomain::new(&surfaces, &[(0, 2), (2, 0)]).is_err());
    }
}
