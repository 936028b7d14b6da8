//! Delaunay refinement of a labeled domain
//!
//! The elements of the Delaunay triangulation are labeled by the domain label at their
//! circumcenter. The faces between elements with different labels (restricted faces)
//! approximate the interfaces. Points are inserted until
//!   - the restricted faces are small enough, well shaped, close to the interfaces and
//!     only have vertices on the interfaces,
//!   - the labeled elements are small enough, well shaped and do not have vertices inside
//!     other regions.
//!
//! The restricted faces are always refined before the elements.
use super::{
    delaunay::{hilbert_order, Delaunay, Insertion, NO_CELL},
    MeshingCriteria,
};
use crate::{
    domain::LabeledDomain,
    geometry::{tet_circumcenter, tet_min_edge, tri_circumcenter, tri_min_angle},
    mesh::TET_FACES,
    spatialindex::PointIndex,
    Error, Idx, Mesh, Result, Tag, Vert3d,
};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::{cmp::Ordering, collections::BinaryHeap};

/// Max. number of lattice samples per axis used to find the initial interface points
const MAX_SAMPLES_PER_AXIS: usize = 96;

/// Kind of a vertex of the triangulation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexKind {
    /// Vertex of the enclosing tetrahedron or of the enlarged bounding box
    Corner,
    /// Vertex on an interface
    Surface,
    /// Vertex inside a region
    Interior(Tag),
}

/// Element or face waiting to be checked, larger ones first
struct Item {
    priority: f64,
    seq: u64,
    cell: usize,
    face: usize,
    verts: [Idx; 4],
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Item {}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cached data of an element
#[derive(Clone, Copy, Default)]
struct CellData {
    center: Vert3d,
    radius: f64,
    label: Tag,
}

/// Refinement statistics
#[derive(Default, Debug)]
struct RefineStats {
    n_facet_insertions: usize,
    n_cell_insertions: usize,
    n_skipped: usize,
}

struct Refiner<'a, D: LabeledDomain> {
    domain: &'a D,
    criteria: &'a MeshingCriteria,
    dt: Delaunay,
    kinds: Vec<VertexKind>,
    data: Vec<CellData>,
    points: PointIndex,
    facets: BinaryHeap<Item>,
    cells: BinaryHeap<Item>,
    seq: u64,
    min_spacing: f64,
    bisection_tol: f64,
    stats: RefineStats,
}

impl<'a, D: LabeledDomain> Refiner<'a, D> {
    fn new(domain: &'a D, criteria: &'a MeshingCriteria) -> Result<Self> {
        let (lo, hi) = domain.bounding_box();
        if (0..3).any(|i| !(hi[i] >= lo[i]) || !lo[i].is_finite() || !hi[i].is_finite()) {
            return Err(Error::mesh_generation("invalid domain bounding box"));
        }
        let size = criteria.min_size();
        let margin = size.max(0.05 * (hi - lo).norm());
        let lo = lo - Vert3d::repeat(margin);
        let hi = hi + Vert3d::repeat(margin);

        let dt = Delaunay::new(&lo, &hi);
        let mut points = PointIndex::new();
        for p in dt.verts() {
            points.add(p)?;
        }
        let mut res = Self {
            domain,
            criteria,
            dt,
            kinds: vec![VertexKind::Corner; 4],
            data: vec![CellData::default()],
            points,
            facets: BinaryHeap::new(),
            cells: BinaryHeap::new(),
            seq: 0,
            min_spacing: 1e-2 * size.min(criteria.facet_distance),
            bisection_tol: 1e-3 * size.min(criteria.facet_distance),
            stats: RefineStats::default(),
        };
        res.update_cell(0);

        for k in 0..2 {
            for j in 0..2 {
                for i in 0..2 {
                    let p = Vert3d::new(
                        if i == 0 { lo[0] } else { hi[0] },
                        if j == 0 { lo[1] } else { hi[1] },
                        if k == 0 { lo[2] } else { hi[2] },
                    );
                    res.insert(&p, VertexKind::Corner)?;
                }
            }
        }
        Ok(res)
    }

    /// Sample the domain on a lattice and insert the label changes along the lattice edges
    fn insert_seeds(&mut self) -> Result<usize> {
        let (lo, hi) = self.domain.bounding_box();
        let spacing = 0.5 * self.criteria.min_size();
        let n = [0, 1, 2].map(|d| {
            (((hi[d] - lo[d]) / spacing).ceil() as usize + 3).clamp(2, MAX_SAMPLES_PER_AXIS)
        });
        let h = Vert3d::from_fn(|d, _| (hi[d] - lo[d] + 2.0 * spacing) / (n[d] - 1) as f64);
        let origin = lo - Vert3d::repeat(spacing);
        let pt = |i: usize, j: usize, k: usize| {
            origin + Vert3d::new(i as f64 * h[0], j as f64 * h[1], k as f64 * h[2])
        };
        let idx = |i: usize, j: usize, k: usize| i + n[0] * (j + n[1] * k);

        let domain = self.domain;
        let labels = (0..n[0] * n[1] * n[2])
            .into_par_iter()
            .map(|l| {
                let i = l % n[0];
                let j = (l / n[0]) % n[1];
                let k = l / (n[0] * n[1]);
                domain.label(&pt(i, j, k))
            })
            .collect::<Vec<_>>();
        debug!("Domain sampled on a {n:?} lattice");

        let mut seeds = Vec::new();
        for k in 0..n[2] {
            for j in 0..n[1] {
                for i in 0..n[0] {
                    let l0 = labels[idx(i, j, k)];
                    let p0 = pt(i, j, k);
                    for (di, dj, dk) in [(1, 0, 0), (0, 1, 0), (0, 0, 1)] {
                        let (i1, j1, k1) = (i + di, j + dj, k + dk);
                        if i1 >= n[0] || j1 >= n[1] || k1 >= n[2] {
                            continue;
                        }
                        if labels[idx(i1, j1, k1)] != l0 {
                            let p1 = pt(i1, j1, k1);
                            seeds.push(self.domain.bisect(&p0, &p1, self.bisection_tol));
                        }
                    }
                }
            }
        }
        if seeds.is_empty() {
            return Err(Error::mesh_generation(
                "no interface found, the domain may be empty or too thin",
            ));
        }

        let mut n_inserted = 0;
        let seed_spacing = 0.25 * spacing;
        for i in hilbert_order(&seeds) {
            let p = &seeds[i];
            if self
                .points
                .nearest_vert(p)
                .is_some_and(|(_, d)| d < seed_spacing)
            {
                continue;
            }
            if self.insert(p, VertexKind::Surface)? {
                n_inserted += 1;
            }
        }
        debug!("{n_inserted} / {} interface seeds inserted", seeds.len());
        Ok(n_inserted)
    }

    fn push(&mut self, heap_is_facet: bool, priority: f64, cell: usize, face: usize) {
        self.seq += 1;
        let item = Item {
            priority,
            seq: self.seq,
            cell,
            face,
            verts: self.dt.cell(cell).verts,
        };
        if heap_is_facet {
            self.facets.push(item);
        } else {
            self.cells.push(item);
        }
    }

    /// Compute the cached data of a new element and queue it and its faces
    fn update_cell(&mut self, c: usize) {
        if self.data.len() < self.dt.n_slots() {
            self.data.resize(self.dt.n_slots(), CellData::default());
        }
        let g = self.dt.gcell(c);
        let center = tet_circumcenter(&g[0], &g[1], &g[2], &g[3])
            .unwrap_or_else(|| 0.25 * (g[0] + g[1] + g[2] + g[3]));
        let radius = (g[0] - center).norm();
        let label = if self.dt.is_bounding(c) {
            0
        } else {
            self.domain.label(&center)
        };
        self.data[c] = CellData {
            center,
            radius,
            label,
        };
        for f in 0..4 {
            self.push(true, radius, c, f);
        }
        if label > 0 {
            self.push(false, radius, c, 0);
        }
    }

    fn is_stale(&self, item: &Item) -> bool {
        !self.dt.is_alive(item.cell) || self.dt.cell(item.cell).verts != item.verts
    }

    /// Insert a vertex, unless it is too close to an existing one
    fn insert(&mut self, p: &Vert3d, kind: VertexKind) -> Result<bool> {
        if self.dt.n_verts() >= self.criteria.max_vertices + 12 {
            return Err(Error::MeshGeneration(format!(
                "more than {} vertices required (facet_size = {}, cell_size = {}, facet_distance = {})",
                self.criteria.max_vertices,
                self.criteria.facet_size,
                self.criteria.cell_size,
                self.criteria.facet_distance
            )));
        }
        if self
            .points
            .nearest_vert(p)
            .is_some_and(|(_, d)| d < self.min_spacing)
        {
            self.stats.n_skipped += 1;
            return Ok(false);
        }
        match self.dt.insert(p)? {
            Insertion::Inserted { created, .. } => {
                self.kinds.push(kind);
                self.points.add(p)?;
                for c in created {
                    self.update_cell(c);
                }
                Ok(true)
            }
            Insertion::Duplicate(_) | Insertion::Rejected => {
                self.stats.n_skipped += 1;
                Ok(false)
            }
        }
    }

    /// Point to insert to refine a restricted face, if needed
    fn refine_facet(&self, c: usize, f: usize) -> Option<Vert3d> {
        let n = self.dt.cell(c).neighbors[f];
        if n == NO_CELL {
            return None;
        }
        let (dc, dn) = (&self.data[c], &self.data[n]);
        if dc.label == dn.label {
            return None;
        }

        let center = self
            .domain
            .bisect(&dc.center, &dn.center, self.bisection_tol);
        let cell = self.dt.cell(c);
        let tri = TET_FACES[f].map(|i| cell.verts[i]);
        let [a, b, p] = tri.map(|i| *self.dt.vert(i));

        if tri
            .iter()
            .any(|&i| self.kinds[i as usize] != VertexKind::Surface)
        {
            return Some(center);
        }
        if (center - a).norm() > self.criteria.facet_size {
            return Some(center);
        }
        if tri_min_angle(&a, &b, &p) < self.criteria.facet_angle {
            return Some(center);
        }
        if (tri_circumcenter(&a, &b, &p) - center).norm() > self.criteria.facet_distance {
            return Some(center);
        }
        None
    }

    /// Point to insert to refine a labeled element, if needed
    fn refine_cell(&self, c: usize) -> Option<(Vert3d, VertexKind)> {
        let d = &self.data[c];
        if d.label <= 0 {
            return None;
        }
        let cell = self.dt.cell(c);
        for &v in &cell.verts {
            let bad = match self.kinds[v as usize] {
                VertexKind::Corner => true,
                VertexKind::Interior(t) => t != d.label,
                VertexKind::Surface => false,
            };
            if bad {
                let p = self
                    .domain
                    .bisect(&d.center, self.dt.vert(v), self.bisection_tol);
                return Some((p, VertexKind::Surface));
            }
        }
        let l_min = tet_min_edge(&self.dt.gcell(c));
        if d.radius > self.criteria.cell_size
            || d.radius > self.criteria.cell_radius_edge_ratio * l_min
        {
            return Some((d.center, VertexKind::Interior(d.label)));
        }
        None
    }

    fn run(&mut self) -> Result<()> {
        loop {
            if let Some(item) = self.facets.pop() {
                if self.is_stale(&item) {
                    continue;
                }
                if let Some(p) = self.refine_facet(item.cell, item.face) {
                    if self.insert(&p, VertexKind::Surface)? {
                        self.stats.n_facet_insertions += 1;
                    }
                }
                continue;
            }
            if let Some(item) = self.cells.pop() {
                if self.is_stale(&item) {
                    continue;
                }
                if let Some((p, kind)) = self.refine_cell(item.cell) {
                    if self.insert(&p, kind)? {
                        self.stats.n_cell_insertions += 1;
                    }
                }
                continue;
            }
            break;
        }
        Ok(())
    }

    /// Extract the labeled elements, the vertices being renumbered by order of first use
    fn into_mesh(self) -> Result<Mesh> {
        let mut new_idx = vec![Idx::MAX; self.dt.n_verts()];
        let mut verts = Vec::new();
        let mut tets = Vec::new();
        let mut etags = Vec::new();
        for c in self.dt.cells() {
            let label = self.data[c].label;
            if label <= 0 || self.dt.is_bounding(c) {
                continue;
            }
            let t = self.dt.cell(c).verts.map(|i| {
                let i = i as usize;
                if new_idx[i] == Idx::MAX {
                    new_idx[i] = verts.len() as Idx;
                    verts.push(*self.dt.vert(i as Idx));
                }
                new_idx[i]
            });
            tets.push(t);
            etags.push(label);
        }
        if tets.is_empty() {
            return Err(Error::mesh_generation("no labeled element"));
        }
        let domain = self.domain;
        let mesh = Mesh::from_tets_with(verts, tets, etags, |a, b| domain.face_tag(a, b));
        mesh.check()
            .map_err(|e| Error::MeshGeneration(format!("invalid mesh: {e}")))?;
        Ok(mesh)
    }
}

/// Delaunay refinement of a domain
pub fn refine<D: LabeledDomain>(domain: &D, criteria: &MeshingCriteria) -> Result<Mesh> {
    info!(
        "Mesh domain: facet_size = {}, facet_distance = {}, facet_angle = {}, cell_size = {}, ratio = {}",
        criteria.facet_size,
        criteria.facet_distance,
        criteria.facet_angle,
        criteria.cell_size,
        criteria.cell_radius_edge_ratio
    );
    let mut refiner = Refiner::new(domain, criteria)?;
    refiner.insert_seeds()?;
    refiner.run()?;
    let stats = &refiner.stats;
    debug!(
        "{} insertions for faces, {} for elements, {} skipped",
        stats.n_facet_insertions, stats.n_cell_insertions, stats.n_skipped
    );
    if stats.n_skipped > 0 {
        warn!("{} insertions skipped (too close to existing vertices)", stats.n_skipped);
    }
    let n_verts = refiner.dt.n_verts();
    let mesh = refiner.into_mesh()?;
    info!(
        "{} vertices inserted, {} vertices, {} elements and {} faces in the mesh",
        n_verts,
        mesh.n_verts(),
        mesh.n_tets(),
        mesh.n_tris()
    );
    Ok(mesh)
}
