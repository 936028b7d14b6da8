//! Incremental Delaunay tetrahedralization (Bowyer-Watson)
//!
//! Cells are stored in an arena; the slots of the cells destroyed by an insertion are
//! reused. Neighbor `i` of a cell is the cell sharing the face opposite to vertex `i`.
//! The first 4 vertices are the vertices of a large enclosing tetrahedron.
use crate::{
    predicates::{insphere, orient3d},
    Error, Idx, Result, Vert3d,
};
use lindel::Lineariseable;
use log::trace;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;

/// Missing neighbor (outside of the enclosing tetrahedron)
pub const NO_CELL: usize = usize::MAX;

/// Number of vertices of the enclosing tetrahedron
pub const N_BOUNDING_VERTS: usize = 4;

/// Tetrahedron with its neighbors
#[derive(Clone, Copy, Debug)]
pub struct Cell {
    pub verts: [Idx; 4],
    pub neighbors: [usize; 4],
}

/// Result of a vertex insertion
#[derive(Debug)]
pub enum Insertion {
    /// The vertex was inserted; the indices of the cells created are given
    Inserted { vert: Idx, created: Vec<usize> },
    /// A vertex already exists at this location
    Duplicate(Idx),
    /// The cavity is not star-shaped with respect to the vertex
    Rejected,
}

/// Delaunay tetrahedralization
pub struct Delaunay {
    verts: Vec<Vert3d>,
    cells: Vec<Cell>,
    alive: Vec<bool>,
    free: Vec<usize>,
    hint: usize,
    rng: StdRng,
    in_cavity: Vec<bool>,
}

impl Delaunay {
    /// Create a triangulation with a single tetrahedron enclosing `[lo, hi]`
    #[must_use]
    pub fn new(lo: &Vert3d, hi: &Vert3d) -> Self {
        let center = 0.5 * (lo + hi);
        let r = (0.5 * (hi - lo).norm()).max(1.0);
        // the inscribed sphere of this tetrahedron has a radius s / sqrt(3)
        let s = 100.0 * r;
        let mut verts = vec![
            center + Vert3d::new(s, s, s),
            center + Vert3d::new(s, -s, -s),
            center + Vert3d::new(-s, s, -s),
            center + Vert3d::new(-s, -s, s),
        ];
        if orient3d(&verts[0], &verts[1], &verts[2], &verts[3]) < 0.0 {
            verts.swap(2, 3);
        }
        Self {
            verts,
            cells: vec![Cell {
                verts: [0, 1, 2, 3],
                neighbors: [NO_CELL; 4],
            }],
            alive: vec![true],
            free: Vec::new(),
            hint: 0,
            rng: StdRng::seed_from_u64(0),
            in_cavity: vec![false],
        }
    }

    #[must_use]
    pub fn n_verts(&self) -> usize {
        self.verts.len()
    }

    #[must_use]
    pub fn verts(&self) -> &[Vert3d] {
        &self.verts
    }

    #[must_use]
    pub fn vert(&self, i: Idx) -> &Vert3d {
        &self.verts[i as usize]
    }

    /// Number of cell slots (alive or not)
    #[must_use]
    pub fn n_slots(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_alive(&self, i: usize) -> bool {
        self.alive[i]
    }

    #[must_use]
    pub fn cell(&self, i: usize) -> &Cell {
        &self.cells[i]
    }

    /// Indices of the alive cells
    pub fn cells(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.cells.len()).filter(|&i| self.alive[i])
    }

    /// Vertices of a cell
    #[must_use]
    pub fn gcell(&self, i: usize) -> [Vert3d; 4] {
        self.cells[i].verts.map(|j| self.verts[j as usize])
    }

    /// Check if a cell has a vertex of the enclosing tetrahedron
    #[must_use]
    pub fn is_bounding(&self, i: usize) -> bool {
        self.cells[i]
            .verts
            .iter()
            .any(|&j| (j as usize) < N_BOUNDING_VERTS)
    }

    /// Check if `p` lies on the positive side of all the faces of a cell
    fn contains(&self, i: usize, p: &Vert3d) -> bool {
        let g = self.gcell(i);
        (0..4).all(|k| {
            let mut g = g;
            g[k] = *p;
            orient3d(&g[0], &g[1], &g[2], &g[3]) >= 0.0
        })
    }

    /// Find a cell containing `p` by walking from the last cell created
    fn locate(&mut self, p: &Vert3d) -> Option<usize> {
        let mut cur = if self.alive[self.hint] {
            self.hint
        } else {
            self.cells().next()?
        };
        let max_steps = 4 * self.cells.len() + 64;
        'walk: for _ in 0..max_steps {
            let g = self.gcell(cur);
            let start = self.rng.random_range(0..4);
            for k in 0..4 {
                let i = (start + k) % 4;
                let mut tmp = g;
                tmp[i] = *p;
                if orient3d(&tmp[0], &tmp[1], &tmp[2], &tmp[3]) < 0.0 {
                    let next = self.cells[cur].neighbors[i];
                    if next == NO_CELL {
                        return None;
                    }
                    cur = next;
                    continue 'walk;
                }
            }
            return Some(cur);
        }
        trace!("walk did not converge, fall back to a linear search");
        (0..self.cells.len()).find(|&i| self.alive[i] && self.contains(i, p))
    }

    /// Check if `p` is strictly inside the circumsphere of a cell
    fn in_circumsphere(&self, i: usize, p: &Vert3d) -> bool {
        let g = self.gcell(i);
        insphere(&g[0], &g[1], &g[2], &g[3], p) > 0.0
    }

    fn new_slot(&mut self) -> usize {
        if let Some(i) = self.free.pop() {
            self.alive[i] = true;
            i
        } else {
            self.cells.push(Cell {
                verts: [0; 4],
                neighbors: [NO_CELL; 4],
            });
            self.alive.push(true);
            self.in_cavity.push(false);
            self.cells.len() - 1
        }
    }

    /// Insert a vertex. Fails if `p` is outside of the enclosing tetrahedron.
    pub fn insert(&mut self, p: &Vert3d) -> Result<Insertion> {
        let start = self
            .locate(p)
            .ok_or_else(|| Error::mesh_generation("vertex outside of the bounding tetrahedron"))?;

        if let Some(&i) = self.cells[start]
            .verts
            .iter()
            .find(|&&i| self.verts[i as usize] == *p)
        {
            return Ok(Insertion::Duplicate(i));
        }

        // cavity: cells whose circumsphere strictly contains p
        let mut cavity = vec![start];
        self.in_cavity[start] = true;
        let mut boundary = Vec::new();
        let mut k = 0;
        while k < cavity.len() {
            let c = cavity[k];
            k += 1;
            for f in 0..4 {
                let n = self.cells[c].neighbors[f];
                if n != NO_CELL && self.in_cavity[n] {
                    continue;
                }
                if n != NO_CELL && self.in_circumsphere(n, p) {
                    self.in_cavity[n] = true;
                    cavity.push(n);
                } else {
                    boundary.push((c, f));
                }
            }
        }

        // new cells: the boundary faces connected to p
        let new_vert = self.verts.len() as Idx;
        let mut new_cells = Vec::with_capacity(boundary.len());
        for &(c, f) in &boundary {
            let mut verts = self.cells[c].verts;
            verts[f] = new_vert;
            let mut g = self.gcell(c);
            g[f] = *p;
            if orient3d(&g[0], &g[1], &g[2], &g[3]) <= 0.0 {
                for &c in &cavity {
                    self.in_cavity[c] = false;
                }
                trace!("insertion rejected: flat element");
                return Ok(Insertion::Rejected);
            }
            new_cells.push((verts, f, self.cells[c].neighbors[f]));
        }

        self.verts.push(*p);
        for &c in &cavity {
            self.in_cavity[c] = false;
            self.alive[c] = false;
            self.free.push(c);
        }

        let mut created = Vec::with_capacity(new_cells.len());
        let mut edge_to_face: FxHashMap<[Idx; 2], (usize, usize)> = FxHashMap::default();
        for (verts, f, outer) in new_cells {
            let id = self.new_slot();
            self.cells[id] = Cell {
                verts,
                neighbors: [NO_CELL; 4],
            };
            self.cells[id].neighbors[f] = outer;
            if outer != NO_CELL {
                // the face of `outer` opposite to its vertex not in the new cell
                if let Some(j) = self.cells[outer]
                    .verts
                    .iter()
                    .position(|v| !verts.contains(v))
                {
                    self.cells[outer].neighbors[j] = id;
                }
            }
            for k in 0..4 {
                if k == f {
                    continue;
                }
                let mut edge = [0; 2];
                let mut n = 0;
                for (l, &v) in verts.iter().enumerate() {
                    if l != k && l != f {
                        edge[n] = v;
                        n += 1;
                    }
                }
                edge.sort_unstable();
                if let Some((other, l)) = edge_to_face.remove(&edge) {
                    self.cells[id].neighbors[k] = other;
                    self.cells[other].neighbors[l] = id;
                } else {
                    edge_to_face.insert(edge, (id, k));
                }
            }
            created.push(id);
        }
        debug_assert!(edge_to_face.is_empty());
        self.hint = created[0];

        Ok(Insertion::Inserted {
            vert: new_vert,
            created,
        })
    }
}

/// Order of the vertices along a Hilbert curve
#[must_use]
pub fn hilbert_order(verts: &[Vert3d]) -> Vec<usize> {
    let Some((mini, maxi)) = crate::geometry::bounding_box(verts) else {
        return Vec::new();
    };
    let order = 16;
    let scale = usize::pow(2, order) as f64 - 1.0;
    let hilbert = |x: &Vert3d| {
        let mut tmp = [0_u16; 3];
        for j in 0..3 {
            let ext = (maxi[j] - mini[j]).max(f64::MIN_POSITIVE);
            tmp[j] = (scale * (x[j] - mini[j]) / ext).round() as u16;
        }
        tmp.hilbert_index()
    };
    let ids = verts.iter().map(hilbert).collect::<Vec<_>>();
    let mut res = (0..verts.len()).collect::<Vec<_>>();
    res.sort_by_key(|&i| ids[i]);
    res
}

#[cfg(test)]
mod tests {
    use super::{hilbert_order, Delaunay, Insertion, NO_CELL};
    use crate::{
        predicates::{insphere, orient3d},
        Result, Vert3d,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn check_delaunay(dt: &Delaunay) {
        for c in dt.cells() {
            let cell = dt.cell(c);
            let g = dt.gcell(c);
            assert!(orient3d(&g[0], &g[1], &g[2], &g[3]) > 0.0);
            for (i, &n) in cell.neighbors.iter().enumerate() {
                if n == NO_CELL {
                    continue;
                }
                assert!(dt.is_alive(n));
                let back = dt.cell(n).neighbors.iter().filter(|&&m| m == c).count();
                assert_eq!(back, 1);
                // the shared face
                for (j, v) in cell.verts.iter().enumerate() {
                    assert_eq!(j == i, !dt.cell(n).verts.contains(v));
                }
            }
            for (k, p) in dt.verts().iter().enumerate() {
                if cell.verts.contains(&(k as u32)) {
                    continue;
                }
                assert!(insphere(&g[0], &g[1], &g[2], &g[3], p) <= 0.0);
            }
        }
    }

    #[test]
    fn test_random() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(123);
        let lo = Vert3d::zeros();
        let hi = Vert3d::new(1., 1., 1.);
        let mut dt = Delaunay::new(&lo, &hi);
        let pts = (0..300)
            .map(|_| Vert3d::from_fn(|_, _| rng.random::<f64>()))
            .collect::<Vec<_>>();
        for i in hilbert_order(&pts) {
            let res = dt.insert(&pts[i])?;
            assert!(matches!(res, Insertion::Inserted { .. }));
        }
        assert_eq!(dt.n_verts(), 304);
        check_delaunay(&dt);

        // the cells without bounding vertices fill the convex hull
        let n_inner = dt.cells().filter(|&c| !dt.is_bounding(c)).count();
        assert!(n_inner > 300);

        let res = dt.insert(&pts[17])?;
        assert!(matches!(res, Insertion::Duplicate(_)));

        assert!(dt.insert(&Vert3d::new(1e6, 0., 0.)).is_err());
        Ok(())
    }

    #[test]
    fn test_lattice() -> Result<()> {
        // cospherical points
        let mut dt = Delaunay::new(&Vert3d::zeros(), &Vert3d::new(3., 3., 3.));
        for k in 0..4 {
            for j in 0..4 {
                for i in 0..4 {
                    let res = dt.insert(&Vert3d::new(f64::from(i), f64::from(j), f64::from(k)))?;
                    assert!(!matches!(res, Insertion::Duplicate(_)));
                }
            }
        }
        check_delaunay(&dt);
        let vol: f64 = dt
            .cells()
            .filter(|&c| !dt.is_bounding(c))
            .map(|c| {
                let g = dt.gcell(c);
                crate::geometry::tet_volume(&g[0], &g[1], &g[2], &g[3])
            })
            .sum();
        assert!((vol - 27.0).abs() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_hilbert() {
        let pts = vec![
            Vert3d::new(0., 0., 0.),
            Vert3d::new(1., 1., 1.),
            Vert3d::new(0.01, 0., 0.),
        ];
        let order = hilbert_order(&pts);
        assert_eq!(order.len(), 3);
        let pos = |i| order.iter().position(|&j| j == i).unwrap();
        assert_eq!(pos(0).abs_diff(pos(2)), 1);
    }
}
