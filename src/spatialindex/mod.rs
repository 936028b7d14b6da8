//! Indices to efficiently locate the nearest vertices or the objects overlapping a point
use crate::{Error, Result, Vert3d};

/// Point index based on `kdtree`, used to enforce a minimum spacing between vertices
pub struct PointIndex {
    tree: kdtree::KdTree<f64, usize, [f64; 3]>,
    len: usize,
}

impl Default for PointIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PointIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: kdtree::KdTree::new(3),
            len: 0,
        }
    }

    /// Create a PointIndex from vertices
    pub fn from_verts<'a, I: IntoIterator<Item = &'a Vert3d>>(verts: I) -> Result<Self> {
        let mut res = Self::new();
        for p in verts {
            res.add(p)?;
        }
        Ok(res)
    }

    /// Add a vertex, its index is the number of vertices already in the index
    pub fn add(&mut self, p: &Vert3d) -> Result<usize> {
        let i = self.len;
        self.tree
            .add([p[0], p[1], p[2]], i)
            .map_err(|e| Error::InvalidInput(format!("cannot index vertex {p:?}: {e:?}")))?;
        self.len += 1;
        Ok(i)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the index of the nearest point & the distance
    #[must_use]
    pub fn nearest_vert(&self, p: &Vert3d) -> Option<(usize, f64)> {
        self.tree
            .nearest(p.as_slice(), 1, &kdtree::distance::squared_euclidean)
            .ok()?
            .first()
            .map(|&(d2, &i)| (i, d2.sqrt()))
    }
}

/// Uniform grid of buckets storing the indices of objects given by their bounding boxes
pub struct BucketGrid {
    origin: Vert3d,
    cell: Vert3d,
    dims: [usize; 3],
    buckets: Vec<Vec<usize>>,
}

impl BucketGrid {
    /// Create a grid covering `[lo, hi]` with about `n_objects` buckets
    #[must_use]
    pub fn new(lo: &Vert3d, hi: &Vert3d, n_objects: usize) -> Self {
        let ext = (hi - lo).map(|x| x.max(f64::EPSILON));
        let vol = ext[0] * ext[1] * ext[2];
        let n = (n_objects.max(1) as f64).clamp(1.0, 2e6);
        let h = (vol / n).cbrt();
        let dims = [0, 1, 2].map(|d| ((ext[d] / h).ceil() as usize).clamp(1, 256));
        let cell = Vert3d::from_fn(|d, _| ext[d] / dims[d] as f64);
        Self {
            origin: *lo,
            cell,
            dims,
            buckets: vec![Vec::new(); dims[0] * dims[1] * dims[2]],
        }
    }

    fn coord(&self, x: f64, d: usize) -> usize {
        let i = ((x - self.origin[d]) / self.cell[d]).floor();
        if i < 0.0 {
            0
        } else {
            (i as usize).min(self.dims[d] - 1)
        }
    }

    fn bucket_range(&self, lo: &Vert3d, hi: &Vert3d) -> [std::ops::RangeInclusive<usize>; 3] {
        [0, 1, 2].map(|d| self.coord(lo[d], d)..=self.coord(hi[d], d))
    }

    const fn flat(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    /// Insert object `id` with bounding box `[lo, hi]`
    pub fn insert(&mut self, id: usize, lo: &Vert3d, hi: &Vert3d) {
        let [ri, rj, rk] = self.bucket_range(lo, hi);
        for k in rk {
            for j in rj.clone() {
                for i in ri.clone() {
                    let idx = self.flat(i, j, k);
                    self.buckets[idx].push(id);
                }
            }
        }
    }

    /// Objects whose bounding box may contain `p`
    #[must_use]
    pub fn candidates(&self, p: &Vert3d) -> &[usize] {
        let idx = self.flat(self.coord(p[0], 0), self.coord(p[1], 1), self.coord(p[2], 2));
        &self.buckets[idx]
    }

    /// Objects whose bounding box may intersect `[lo, hi]`, sorted and without duplicates
    #[must_use]
    pub fn candidates_in_box(&self, lo: &Vert3d, hi: &Vert3d) -> Vec<usize> {
        let [ri, rj, rk] = self.bucket_range(lo, hi);
        let mut res = Vec::new();
        for k in rk {
            for j in rj.clone() {
                for i in ri.clone() {
                    res.extend_from_slice(&self.buckets[self.flat(i, j, k)]);
                }
            }
        }
        res.sort_unstable();
        res.dedup();
        res
    }
}
