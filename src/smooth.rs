//! Smoothing of the interfaces of a tagged mesh
//!
//! Each interface (set of triangles with the same [`FaceTag`]) is smoothed independently
//! with Taubin's λ|μ algorithm (Taubin, "A signal processing approach to fair surface
//! design", 1995): a Laplacian step with a positive factor λ followed by a step with a
//! negative factor μ, which avoids the shrinkage of the plain Laplacian smoothing.
//!
//! The vertices on the border of an interface and the vertices shared by several
//! interfaces are not moved. A move that would invert an element is halved up to
//! [`MAX_HALVINGS`] times and then dropped.
use crate::{
    geometry::tri_area,
    mesh::{CSRGraph, FaceTag},
    predicates::test_sign,
    Error, Idx, Mesh, Result, Vert3d,
};
use log::{debug, info};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Max. number of times a move is halved before being dropped
pub const MAX_HALVINGS: usize = 3;

/// Taubin smoothing parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothParams {
    /// Number of λ|μ iterations
    pub n_iter: usize,
    /// Positive smoothing factor
    pub lambda: f64,
    /// Pass-band frequency, used to compute μ
    pub k_pb: f64,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            n_iter: 10,
            lambda: 0.5,
            k_pb: 0.1,
        }
    }
}

impl SmoothParams {
    #[must_use]
    pub fn with_n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    #[must_use]
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    #[must_use]
    pub fn with_k_pb(mut self, k_pb: f64) -> Self {
        self.k_pb = k_pb;
        self
    }

    /// Negative factor such that `1 / λ + 1 / μ = k_pb`
    #[must_use]
    pub fn mu(&self) -> f64 {
        self.lambda / (self.k_pb * self.lambda - 1.0)
    }

    fn validate(&self) -> Result<()> {
        if !(self.lambda > 0.0 && self.lambda < 1.0) {
            return Err(Error::InvalidInput(format!(
                "lambda = {} must be in (0, 1)",
                self.lambda
            )));
        }
        if !(self.k_pb > 0.0 && self.k_pb * self.lambda < 1.0) {
            return Err(Error::InvalidInput(format!(
                "k_pb = {} must be in (0, 1 / lambda)",
                self.k_pb
            )));
        }
        Ok(())
    }
}

/// Smoothing statistics
#[derive(Clone, Debug, Default)]
pub struct SmoothStats {
    pub n_moves: usize,
    pub n_reduced: usize,
    pub n_rejected: usize,
}

/// Triangles and movable vertices of an interface
struct Patch {
    tris: Vec<usize>,
    verts: Vec<Idx>,
}

/// Build the interfaces, the vertices on their borders or on several interfaces being
/// excluded
fn patches(mesh: &Mesh) -> Vec<(FaceTag, Patch)> {
    let n = mesh.n_verts();
    let mut tag: Vec<Option<FaceTag>> = vec![None; n];
    let mut fixed = vec![false; n];
    for (t, &f) in mesh.tris.iter().zip(mesh.ftags.iter()) {
        for &i in t {
            let i = i as usize;
            match tag[i] {
                None => tag[i] = Some(f),
                Some(g) if g != f => fixed[i] = true,
                _ => {}
            }
        }
    }

    let mut tris: FxHashMap<FaceTag, Vec<usize>> = FxHashMap::default();
    for (i, &f) in mesh.ftags.iter().enumerate() {
        tris.entry(f).or_default().push(i);
    }

    let mut res = tris
        .into_iter()
        .map(|(f, tris)| {
            // border edges are used by a single triangle of the patch
            let mut edges: FxHashMap<[Idx; 2], usize> = FxHashMap::default();
            for &i in &tris {
                let t = mesh.tris[i];
                for k in 0..3 {
                    let (a, b) = (t[k], t[(k + 1) % 3]);
                    *edges.entry([a.min(b), a.max(b)]).or_default() += 1;
                }
            }
            let mut border = vec![false; n];
            for (e, &c) in &edges {
                if c != 2 {
                    border[e[0] as usize] = true;
                    border[e[1] as usize] = true;
                }
            }
            let mut verts = tris
                .iter()
                .flat_map(|&i| mesh.tris[i])
                .filter(|&i| !fixed[i as usize] && !border[i as usize])
                .collect::<Vec<_>>();
            verts.sort_unstable();
            verts.dedup();
            (f, Patch { tris, verts })
        })
        .collect::<Vec<_>>();
    res.sort_by_key(|(f, _)| *f);
    res
}

/// Displacement of the vertices of a patch towards the area weighted average of the
/// centroids of their triangles
fn laplacian(mesh: &Mesh, patch: &Patch, factor: f64) -> Vec<Vert3d> {
    let mut centers = FxHashMap::default();
    for &v in &patch.verts {
        centers.insert(v, (Vert3d::zeros(), 0.0));
    }
    for &i in &patch.tris {
        let t = mesh.tris[i];
        let p = mesh.gtri(&t);
        let a = tri_area(&p[0], &p[1], &p[2]);
        let c = (p[0] + p[1] + p[2]) / 3.0;
        for v in t {
            if let Some((s, w)) = centers.get_mut(&v) {
                *s += a * c;
                *w += a;
            }
        }
    }
    patch
        .verts
        .iter()
        .map(|v| {
            let (s, w) = centers[v];
            if w > 0.0 {
                factor * (s / w - mesh.verts[*v as usize])
            } else {
                Vert3d::zeros()
            }
        })
        .collect()
}

/// Move a vertex, halving the displacement while the elements around it are not positive
fn apply_move(
    mesh: &mut Mesh,
    v2t: &CSRGraph,
    vert: usize,
    disp: &Vert3d,
    stats: &mut SmoothStats,
) {
    let old = mesh.verts[vert];
    let mut d = *disp;
    for k in 0..=MAX_HALVINGS {
        mesh.verts[vert] = old + d;
        if v2t
            .row(vert)
            .iter()
            .all(|&i| test_sign(&mesh.verts, &mesh.tets[i]))
        {
            stats.n_moves += 1;
            if k > 0 {
                stats.n_reduced += 1;
            }
            return;
        }
        d *= 0.5;
    }
    mesh.verts[vert] = old;
    stats.n_rejected += 1;
}

/// Smooth the interfaces of a mesh with `n_iter` λ|μ iterations and the default
/// parameters
pub fn smooth_surfaces(mesh: &mut Mesh, n_iter: usize) -> Result<SmoothStats> {
    smooth_surfaces_with(mesh, &SmoothParams::default().with_n_iter(n_iter))
}

/// Smooth the interfaces of a mesh. Only the vertex coordinates are modified.
pub fn smooth_surfaces_with(mesh: &mut Mesh, params: &SmoothParams) -> Result<SmoothStats> {
    params.validate()?;
    mesh.check()?;
    let (lambda, mu) = (params.lambda, params.mu());
    info!(
        "Smooth the interfaces: {} iterations, lambda = {lambda}, mu = {mu:.3}",
        params.n_iter
    );

    let v2t = mesh.vertex_to_tets();
    let patches = patches(mesh);
    let mut stats = SmoothStats::default();
    for (tag, patch) in &patches {
        debug!(
            "Interface {tag}: {} triangles, {} vertices moved",
            patch.tris.len(),
            patch.verts.len()
        );
        for _ in 0..params.n_iter {
            for factor in [lambda, mu] {
                let disp = laplacian(mesh, patch, factor);
                for (&v, d) in patch.verts.iter().zip(disp.iter()) {
                    apply_move(mesh, &v2t, v as usize, d, &mut stats);
                }
            }
        }
    }
    debug!(
        "{} moves, {} reduced, {} rejected",
        stats.n_moves, stats.n_reduced, stats.n_rejected
    );
    Ok(stats)
}
