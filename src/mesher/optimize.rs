//! Quality optimization of the elements
//!
//! The interface triangles are never modified: flips are only applied between elements
//! with the same tag away from the interfaces, and only the vertices that do not belong
//! to an interface triangle are moved.
use super::OptimizeBudget;
use crate::{
    geometry::{tet_min_dihedral, tet_min_edge, tet_quality, tet_volume},
    mesh::{sorted_tri, TET_FACES},
    predicates::test_sign,
    Idx, Mesh, Vert3d,
};
use log::{debug, trace};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::{
    fmt,
    time::{Duration, Instant},
};

/// Relative tolerance used to check that a flip preserves the volume
const VOLUME_TOL: f64 = 1e-10;

/// Min. improvement of the dihedral angles (in degrees) for a flip to be applied
const MIN_ANGLE_GAIN: f64 = 1e-6;

#[derive(Clone, Debug, Default)]
pub struct OptimizeStats {
    pub n_sweeps: usize,
    pub n_flips_23: usize,
    pub n_flips_32: usize,
    pub n_moves: usize,
    /// Min. dihedral angle before the optimization (in degrees)
    pub min_angle_before: f64,
    /// Min. dihedral angle after the optimization (in degrees)
    pub min_angle_after: f64,
    pub elapsed: Duration,
}

impl fmt::Display for OptimizeStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Optimization: {} sweeps, {} 2-3 flips, {} 3-2 flips, {} moves, min. dihedral angle {:.2} -> {:.2} ({:.2}s)",
            self.n_sweeps,
            self.n_flips_23,
            self.n_flips_32,
            self.n_moves,
            self.min_angle_before,
            self.min_angle_after,
            self.elapsed.as_secs_f64()
        )
    }
}

fn min_dihedral(mesh: &Mesh) -> f64 {
    mesh.tets
        .iter()
        .map(|t| tet_min_dihedral(&mesh.gtet(t)))
        .fold(180.0, f64::min)
}

fn volume(mesh: &Mesh, t: &[Idx; 4]) -> f64 {
    let [a, b, c, d] = mesh.gtet(t);
    tet_volume(&a, &b, &c, &d)
}

/// Check that the elements replacing `old` are valid, fill the same volume and improve
/// the min. dihedral angle
fn is_better_flip(mesh: &Mesh, old: &[[Idx; 4]], new: &[[Idx; 4]]) -> bool {
    if !new.iter().all(|t| test_sign(&mesh.verts, t)) {
        return false;
    }
    let v_old = old.iter().map(|t| volume(mesh, t)).sum::<f64>();
    let v_new = new.iter().map(|t| volume(mesh, t)).sum::<f64>();
    if (v_new - v_old).abs() > VOLUME_TOL * v_old.abs() {
        return false;
    }
    let q_old = old
        .iter()
        .map(|t| tet_min_dihedral(&mesh.gtet(t)))
        .fold(180.0, f64::min);
    let q_new = new
        .iter()
        .map(|t| tet_min_dihedral(&mesh.gtet(t)))
        .fold(180.0, f64::min);
    q_new > q_old + MIN_ANGLE_GAIN
}

/// Replace pairs of elements sharing a face by 3 elements around a new edge
fn flips_23(mesh: &mut Mesh) -> usize {
    let mut faces: FxHashMap<[Idx; 3], Vec<(usize, usize)>> = FxHashMap::default();
    for (i, t) in mesh.tets.iter().enumerate() {
        for (j, f) in TET_FACES.iter().enumerate() {
            let tri = f.map(|k| t[k]);
            faces.entry(sorted_tri(tri)).or_default().push((i, j));
        }
    }
    let mut keys = faces
        .iter()
        .filter(|(_, v)| v.len() == 2)
        .map(|(k, _)| *k)
        .collect::<Vec<_>>();
    keys.sort_unstable();

    let mut touched = vec![false; mesh.n_tets()];
    let mut n_flips = 0;
    for key in keys {
        let [(i0, f0), (i1, f1)] = [faces[&key][0], faces[&key][1]];
        if touched[i0] || touched[i1] || mesh.etags[i0] != mesh.etags[i1] {
            continue;
        }
        let (t0, t1) = (mesh.tets[i0], mesh.tets[i1]);
        let [x, y, z] = TET_FACES[f0].map(|k| t0[k]);
        let (d, e) = (t0[f0], t1[f1]);
        let new = [[x, y, d, e], [y, z, d, e], [z, x, d, e]];
        if !is_better_flip(mesh, &[t0, t1], &new) {
            continue;
        }
        trace!("2-3 flip of face {key:?}");
        mesh.tets[i0] = new[0];
        mesh.tets[i1] = new[1];
        mesh.tets.push(new[2]);
        mesh.etags.push(mesh.etags[i0]);
        touched[i0] = true;
        touched[i1] = true;
        touched.push(true);
        n_flips += 1;
    }
    n_flips
}

/// Replace rings of 3 elements around an edge by 2 elements
fn flips_32(mesh: &mut Mesh) -> usize {
    let mut edges: FxHashMap<[Idx; 2], Vec<usize>> = FxHashMap::default();
    for (i, t) in mesh.tets.iter().enumerate() {
        for j in 0..4 {
            for k in j + 1..4 {
                let e = if t[j] < t[k] { [t[j], t[k]] } else { [t[k], t[j]] };
                edges.entry(e).or_default().push(i);
            }
        }
    }
    let mut keys = edges
        .iter()
        .filter(|(_, v)| v.len() == 3)
        .map(|(k, _)| *k)
        .collect::<Vec<_>>();
    keys.sort_unstable();

    let mut removed = vec![false; mesh.n_tets()];
    let mut touched = vec![false; mesh.n_tets()];
    let mut n_flips = 0;
    for key in keys {
        let ids = &edges[&key];
        if ids.iter().any(|&i| touched[i]) {
            continue;
        }
        let tag = mesh.etags[ids[0]];
        if ids.iter().any(|&i| mesh.etags[i] != tag) {
            continue;
        }

        // the ring is closed if each of the other vertices appears twice
        let mut ring: Vec<Idx> = Vec::with_capacity(6);
        for &i in ids {
            ring.extend(mesh.tets[i].iter().filter(|&&v| v != key[0] && v != key[1]));
        }
        ring.sort_unstable();
        if ring.len() != 6 || ring[0] != ring[1] || ring[2] != ring[3] || ring[4] != ring[5] {
            continue;
        }
        let [x, y, z] = [ring[0], ring[2], ring[4]];
        if x == y || y == z {
            continue;
        }

        let [a, b] = key;
        let orient = |t: [Idx; 4]| if test_sign(&mesh.verts, &t) { t } else { [t[0], t[2], t[1], t[3]] };
        let new = [orient([x, y, z, a]), orient([x, y, z, b])];
        let old = ids.iter().map(|&i| mesh.tets[i]).collect::<Vec<_>>();
        if !is_better_flip(mesh, &old, &new) {
            continue;
        }
        trace!("3-2 flip of edge {key:?}");
        mesh.tets[ids[0]] = new[0];
        mesh.tets[ids[1]] = new[1];
        removed[ids[2]] = true;
        ids.iter().for_each(|&i| touched[i] = true);
        n_flips += 1;
    }

    if n_flips > 0 {
        let mut i = 0;
        mesh.tets.retain(|_| {
            i += 1;
            !removed[i - 1]
        });
        let mut i = 0;
        mesh.etags.retain(|_| {
            i += 1;
            !removed[i - 1]
        });
    }
    n_flips
}

/// Min. quality of the elements around a vertex
fn star_quality(mesh: &Mesh, star: &[usize]) -> f64 {
    star.iter()
        .map(|&i| tet_quality(&mesh.gtet(&mesh.tets[i])))
        .fold(f64::MAX, f64::min)
}

/// Try to move a vertex, the move being kept only if the elements around it stay valid
/// and their min. quality improves
fn try_move(mesh: &mut Mesh, vert: usize, star: &[usize], p: Vert3d, q_old: f64) -> bool {
    let old = mesh.verts[vert];
    mesh.verts[vert] = p;
    if star.iter().all(|&i| test_sign(&mesh.verts, &mesh.tets[i]))
        && star_quality(mesh, star) > q_old
    {
        return true;
    }
    mesh.verts[vert] = old;
    false
}

/// Move the vertices that are not on an interface, first towards the centroid of their
/// neighbors then randomly
fn relax(mesh: &mut Mesh, rng: &mut StdRng) -> usize {
    let v2t = mesh.vertex_to_tets();
    let fixed = mesh.boundary_flag();
    let mut n_moves = 0;
    for vert in 0..mesh.n_verts() {
        if fixed[vert] {
            continue;
        }
        let star = v2t.row(vert);
        if star.is_empty() {
            continue;
        }
        let mut neighbors = star
            .iter()
            .flat_map(|&i| mesh.tets[i])
            .filter(|&j| j as usize != vert)
            .collect::<Vec<_>>();
        neighbors.sort_unstable();
        neighbors.dedup();
        let centroid = neighbors
            .iter()
            .map(|&j| mesh.verts[j as usize])
            .sum::<Vert3d>()
            / neighbors.len() as f64;

        let q_old = star_quality(mesh, star);
        if try_move(mesh, vert, star, centroid, q_old) {
            n_moves += 1;
            continue;
        }

        let h = star
            .iter()
            .map(|&i| tet_min_edge(&mesh.gtet(&mesh.tets[i])))
            .fold(f64::MAX, f64::min);
        let dir = Vert3d::from_fn(|_, _| rng.random_range(-1.0..1.0));
        let p = mesh.verts[vert] + 0.1 * h * dir;
        if try_move(mesh, vert, star, p, q_old) {
            n_moves += 1;
        }
    }
    n_moves
}

/// Improve the elements by flips and vertex relocation, within a budget. The mesh is
/// valid after each step, so it can be interrupted at any time.
pub fn optimize(mesh: &mut Mesh, budget: &OptimizeBudget) -> OptimizeStats {
    let now = Instant::now();
    let time_limit = budget.time_limit();
    let out_of_time = |now: &Instant| time_limit.is_some_and(|t| now.elapsed() > t);

    let mut stats = OptimizeStats {
        min_angle_before: min_dihedral(mesh),
        ..OptimizeStats::default()
    };
    let mut rng = StdRng::seed_from_u64(0);

    for sweep in 0..budget.max_sweeps {
        if out_of_time(&now) {
            debug!("Optimization time limit reached after {sweep} sweeps");
            break;
        }
        stats.n_sweeps += 1;
        let n23 = flips_23(mesh);
        let n32 = if out_of_time(&now) { 0 } else { flips_32(mesh) };
        let n_moves = if out_of_time(&now) {
            0
        } else {
            relax(mesh, &mut rng)
        };
        debug!("Sweep {sweep}: {n23} 2-3 flips, {n32} 3-2 flips, {n_moves} moves");
        stats.n_flips_23 += n23;
        stats.n_flips_32 += n32;
        stats.n_moves += n_moves;
        if n23 + n32 + n_moves == 0 {
            break;
        }
    }

    stats.min_angle_after = min_dihedral(mesh);
    stats.elapsed = now.elapsed();
    stats
}

#[cfg(test)]
mod tests {
    use super::{min_dihedral, optimize};
    use crate::{
        assert_delta,
        geometry::tet_volume,
        mesh::test_meshes::box_mesh,
        mesher::OptimizeBudget,
        Idx, Mesh, Result, Vert3d,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    /// Bipyramid with apexes at `(0, 0, -h)` and `(0, 0, h)`, split into 2 elements
    fn bipyramid(h: f64) -> Mesh {
        let mut verts = (0..3)
            .map(|i| {
                let t = 2.0 * PI * f64::from(i) / 3.0;
                Vert3d::new(t.cos(), t.sin(), 0.0)
            })
            .collect::<Vec<_>>();
        verts.push(Vert3d::new(0.0, 0.0, -h));
        verts.push(Vert3d::new(0.0, 0.0, h));
        let tets = [[0, 1, 2, 3], [0, 1, 2, 4]]
            .into_iter()
            .map(|t: [Idx; 4]| {
                let [a, b, c, d] = t.map(|i| verts[i as usize]);
                if tet_volume(&a, &b, &c, &d) < 0.0 {
                    [t[0], t[2], t[1], t[3]]
                } else {
                    t
                }
            })
            .collect();
        Mesh::from_tets(verts, tets, vec![1, 1])
    }

    #[test]
    fn test_flips() -> Result<()> {
        // flat bipyramid: the 3 elements around the axis are better
        let mut mesh = bipyramid(0.05);
        mesh.check()?;
        let vol = mesh.volume();
        let n_tris = mesh.n_tris();
        let stats = optimize(&mut mesh, &OptimizeBudget::default());
        assert_eq!(stats.n_flips_23, 1);
        assert_eq!(mesh.n_tets(), 3);
        assert!(stats.min_angle_after > stats.min_angle_before);
        mesh.check()?;
        assert_delta!(mesh.volume(), vol, 1e-12);
        assert_eq!(mesh.n_tris(), n_tris);

        // and back
        let mut mesh2 = mesh.clone();
        let stats = optimize(&mut mesh2, &OptimizeBudget::default());
        assert_eq!(stats.n_flips_32, 0);
        assert_eq!(mesh2.n_tets(), 3);

        // tall bipyramid: the 2 elements are better
        let mut mesh = bipyramid(2.0);
        let before = min_dihedral(&mesh);
        optimize(&mut mesh, &OptimizeBudget::default());
        assert!(min_dihedral(&mesh) >= before);
        assert_eq!(mesh.n_tets(), 2);
        mesh.check()?;
        Ok(())
    }

    #[test]
    fn test_optimize() -> Result<()> {
        let mut mesh = box_mesh(5, 1.0, |p| if p[0] < 0.5 { 1 } else { 2 });
        let fixed = mesh.boundary_flag();
        let mut rng = StdRng::seed_from_u64(123);
        let h = 0.2;
        for (p, &f) in mesh.verts.iter_mut().zip(fixed.iter()) {
            if !f {
                *p += Vert3d::from_fn(|_, _| 0.1 * h * rng.random_range(-1.0..1.0));
            }
        }
        mesh.check()?;
        let tris = mesh.tris.clone();
        let vols = mesh.region_volumes();
        let before = min_dihedral(&mesh);

        let stats = optimize(&mut mesh, &OptimizeBudget::default());
        mesh.check()?;
        assert!(stats.n_sweeps > 0);
        assert!(stats.min_angle_after >= before);
        assert_delta!(stats.min_angle_before, before, 1e-12);
        assert_eq!(mesh.tris, tris);
        let new_vols = mesh.region_volumes();
        assert_delta!(new_vols[&1], vols[&1], 1e-10);
        assert_delta!(new_vols[&2], vols[&2], 1e-10);
        assert!(stats.to_string().contains("sweeps"));
        Ok(())
    }

    #[test]
    fn test_budget() -> Result<()> {
        let mut mesh = box_mesh(3, 1.0, |_| 1);
        let tets = mesh.tets.clone();
        let budget = OptimizeBudget {
            max_sweeps: 0,
            time_limit: None,
        };
        let stats = optimize(&mut mesh, &budget);
        assert_eq!(stats.n_sweeps, 0);
        assert_eq!(mesh.tets, tets);

        let budget = OptimizeBudget {
            max_sweeps: 100,
            time_limit: Some(0.0),
        };
        let stats = optimize(&mut mesh, &budget);
        assert!(stats.n_sweeps <= 1);
        mesh.check()?;
        Ok(())
    }
}
