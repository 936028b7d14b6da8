use crate::Tag;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset used by the flat integer encoding of boundary tags
pub const FLAT_OFFSET: i64 = 1000;

/// Tag of a boundary triangle: the pair of regions it separates. `outside` is 0 when the
/// triangle is on the boundary of the meshed domain.
///
/// Triangles are oriented with their normal pointing out of `inside`. When the domain
/// does not declare which side is inside, `inside` is the larger of the two tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaceTag {
    pub inside: Tag,
    pub outside: Tag,
}

impl FaceTag {
    #[must_use]
    pub const fn new(inside: Tag, outside: Tag) -> Self {
        Self { inside, outside }
    }

    /// Pair of two different region tags with the larger one inside
    #[must_use]
    pub fn larger_inside(a: Tag, b: Tag) -> Self {
        Self::new(a.max(b), a.min(b))
    }

    /// Swap the two sides
    #[must_use]
    pub const fn flipped(self) -> Self {
        Self {
            inside: self.outside,
            outside: self.inside,
        }
    }

    /// Check if the face is on the boundary of region `tag`
    #[must_use]
    pub const fn touches(&self, tag: Tag) -> bool {
        self.inside == tag || self.outside == tag
    }

    /// Flat integer encoding `1000 * (outside + 1) + inside`, where volume tags are kept
    /// as is. `None` is returned when the encoding would be ambiguous, i.e. when `inside`
    /// does not fit below the offset or a tag is negative.
    #[must_use]
    pub fn flat(&self) -> Option<i64> {
        let inside = i64::from(self.inside);
        let outside = i64::from(self.outside);
        if !(1..FLAT_OFFSET).contains(&inside) || outside < 0 {
            return None;
        }
        outside
            .checked_add(1)?
            .checked_mul(FLAT_OFFSET)?
            .checked_add(inside)
    }

    /// Decode a flat boundary tag; values that no valid pair encodes give `None`
    #[must_use]
    pub fn from_flat(value: i64) -> Option<Self> {
        if value <= FLAT_OFFSET {
            return None;
        }
        let inside = value % FLAT_OFFSET;
        let outside = value / FLAT_OFFSET - 1;
        if inside == 0 || inside == outside {
            return None;
        }
        Some(Self {
            inside: Tag::try_from(inside).ok()?,
            outside: Tag::try_from(outside).ok()?,
        })
    }
}

impl fmt::Display for FaceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.inside, self.outside)
    }
}

/// Domain an element belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainTag {
    Background,
    Volume(Tag),
    Boundary(FaceTag),
}

impl DomainTag {
    /// Flat integer encoding: 0 for the background, the tag for volumes and
    /// [`FaceTag::flat`] for boundaries
    #[must_use]
    pub fn flat(&self) -> Option<i64> {
        match self {
            Self::Background => Some(0),
            Self::Volume(t) => {
                let t = i64::from(*t);
                (1..FLAT_OFFSET).contains(&t).then_some(t)
            }
            Self::Boundary(f) => f.flat(),
        }
    }

    /// Decode a flat tag
    #[must_use]
    pub fn from_flat(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Background),
            1..FLAT_OFFSET => Tag::try_from(value).ok().map(Self::Volume),
            _ => FaceTag::from_flat(value).map(Self::Boundary),
        }
    }
}

impl From<FaceTag> for DomainTag {
    fn from(f: FaceTag) -> Self {
        Self::Boundary(f)
    }
}

#[cfg(test)]
mod tests {
    use super::{DomainTag, FaceTag};

    #[test]
    fn test_flat() {
        let f = FaceTag::new(2, 0);
        assert_eq!(f.flat(), Some(1002));
        assert_eq!(FaceTag::new(5, 3).flat(), Some(4005));
        assert_eq!(FaceTag::from_flat(4005), Some(FaceTag::new(5, 3)));
        assert_eq!(FaceTag::from_flat(1002), Some(f));

        // would collide with other pairs
        assert_eq!(FaceTag::new(1000, 0).flat(), None);
        assert_eq!(FaceTag::new(0, 1).flat(), None);
        assert_eq!(FaceTag::new(1, -1).flat(), None);

        assert_eq!(DomainTag::from_flat(0), Some(DomainTag::Background));
        assert_eq!(DomainTag::from_flat(3), Some(DomainTag::Volume(3)));
        assert_eq!(
            DomainTag::from_flat(1001),
            Some(DomainTag::Boundary(FaceTag::new(1, 0)))
        );

        // not the encoding of a valid pair
        assert_eq!(FaceTag::from_flat(1000), None);
        assert_eq!(FaceTag::from_flat(2000), None);
        assert_eq!(FaceTag::from_flat(2001), None);
        assert_eq!(FaceTag::from_flat(3002), None);
        assert_eq!(FaceTag::from_flat(-5), None);

        for t in [
            DomainTag::Background,
            DomainTag::Volume(12),
            DomainTag::Volume(999),
            DomainTag::Boundary(FaceTag::new(7, 4)),
            DomainTag::Boundary(FaceTag::new(2, 7)),
            DomainTag::Boundary(FaceTag::new(999, 0)),
        ] {
            assert_eq!(DomainTag::from_flat(t.flat().unwrap()), Some(t));
        }
    }

    #[test]
    fn test_flip() {
        assert_eq!(FaceTag::larger_inside(1, 4), FaceTag::new(4, 1));
        assert_eq!(FaceTag::larger_inside(4, 0), FaceTag::new(4, 0));
        let f = FaceTag::new(2, 1);
        assert_eq!(f.flipped(), FaceTag::new(1, 2));
        assert!(f.touches(1));
        assert!(!f.touches(3));
        assert_eq!(f.to_string(), "2|1");
    }
}
