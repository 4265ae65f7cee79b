//! Level-set construction, extrapolation and reinitialization.
//!
//! Level sets are negative inside the liquid. Distances are in cells.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::Vec3;
use rayon::prelude::*;

use crate::constants::MARCHING_MAX_DISTANCE;
use crate::grid::{FlagGrid, GridDims, LevelSet, MacGrid};
use crate::particle::Particles;
use crate::spatial::ParticleIndex;

/// Smallest interface fraction accepted when estimating distances at the surface.
const MIN_INTERFACE_FRACTION: f32 = 1e-3;

#[inline]
fn is_inside(value: f32) -> bool {
    value < 0.0
}

#[inline]
fn sign_of(value: f32) -> f32 {
    if is_inside(value) {
        -1.0
    } else {
        1.0
    }
}

/// Particle radius used for the union level set.
#[inline]
pub fn particle_radius(dims: GridDims, radius_factor: f32) -> f32 {
    radius_factor * (dims.dim() as f32).sqrt() * 0.5
}

/// Depth below the surface within which cells count as surface cells for
/// resampling: one particle diameter.
#[inline]
pub fn surface_distance(dims: GridDims, radius_factor: f32) -> f32 {
    2.0 * particle_radius(dims, radius_factor)
}

/// Union-of-spheres level set around the particles.
///
/// Each cell takes `min(|x - x_p| - r)` over particles in nearby cells, or `r`
/// when none is close. Obstacle cells are then filled from the adjacent
/// liquid/air cells so walls never introduce a fake interface.
pub fn union_particle_levelset(
    particles: &Particles,
    index: &ParticleIndex,
    flags: &FlagGrid,
    radius_factor: f32,
) -> LevelSet {
    let dims = flags.dims();
    let radius = particle_radius(dims, radius_factor);
    let reach = radius as i32 + 1;
    let planar = dims.is_2d();

    let mut phi = LevelSet::new(dims, radius);
    phi.data_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, value)| {
            let (i, j, k) = dims.cell_coords(idx);
            let center = dims.cell_center(i, j, k);
            let mut best = radius;
            index.for_each_near(i as i32, j as i32, k as i32, reach, |p| {
                let mut d = center - particles.list[p].position;
                if planar {
                    d.z = 0.0;
                }
                best = best.min(d.length() - radius);
            });
            *value = best;
        });

    extend_into_obstacles(&mut phi, flags);
    phi
}

/// Fill obstacle cells layer by layer with the minimum of their already
/// assigned neighbors (Neumann extension of the level set into walls).
pub fn extend_into_obstacles(phi: &mut LevelSet, flags: &FlagGrid) {
    let dims = phi.dims();
    let n = dims.cell_count();
    let mut assigned: Vec<bool> = (0..n).map(|idx| !flags.is_obstacle(idx)).collect();

    loop {
        let mut updates: Vec<(usize, f32)> = Vec::new();
        for idx in 0..n {
            if assigned[idx] {
                continue;
            }
            let (i, j, k) = dims.cell_coords(idx);
            let best = dims
                .neighbors(i, j, k)
                .iter()
                .flatten()
                .filter(|&&nb| assigned[nb])
                .map(|&nb| phi.at(nb))
                .fold(f32::INFINITY, f32::min);
            if best.is_finite() {
                updates.push((idx, best));
            }
        }
        if updates.is_empty() {
            break;
        }
        for (idx, value) in updates {
            phi.data_mut()[idx] = value;
            assigned[idx] = true;
        }
    }
}

/// Layered extrapolation of the level set away from the interface.
///
/// With `inside == true` the liquid side (`phi < 0`) is rewritten, otherwise
/// the air side. Cells on that side touching the other side are interface
/// cells and keep their value; each further layer (up to `distance` cells from
/// the surface) takes the average of its previous-layer neighbors plus `-1`
/// (inside) or `+1` (outside). Cells beyond the band are set to `±distance`.
pub fn extrapolate_ls_simple(phi: &mut LevelSet, distance: usize, inside: bool) {
    let dims = phi.dims();
    let n = dims.cell_count();
    let direction = if inside { -1.0 } else { 1.0 };
    let on_side = |v: f32| is_inside(v) == inside;

    // 0 = unprocessed, 1 = interface, d = layer d
    let mut layer = vec![0usize; n];
    for idx in 0..n {
        if !on_side(phi.at(idx)) {
            continue;
        }
        let (i, j, k) = dims.cell_coords(idx);
        let touches_other_side = dims
            .neighbors(i, j, k)
            .iter()
            .flatten()
            .any(|&nb| !on_side(phi.at(nb)));
        if touches_other_side {
            layer[idx] = 1;
        }
    }

    for d in 1..distance {
        let mut updates: Vec<(usize, f32)> = Vec::new();
        for idx in 0..n {
            if layer[idx] != 0 || !on_side(phi.at(idx)) {
                continue;
            }
            let (i, j, k) = dims.cell_coords(idx);
            let mut sum = 0.0;
            let mut count = 0;
            for &nb in dims.neighbors(i, j, k).iter().flatten() {
                if layer[nb] == d {
                    sum += phi.at(nb);
                    count += 1;
                }
            }
            if count > 0 {
                updates.push((idx, sum / count as f32 + direction));
            }
        }
        if updates.is_empty() {
            break;
        }
        for (idx, value) in updates {
            phi.data_mut()[idx] = value;
            layer[idx] = d + 1;
        }
    }

    let far = direction * distance as f32;
    for idx in 0..n {
        if layer[idx] == 0 && on_side(phi.at(idx)) {
            phi.data_mut()[idx] = far;
        }
    }
}

/// Distance estimate for a cell next to the zero crossing, or None when no
/// face neighbor lies on the other side.
///
/// Per axis the crossing sits at fraction `theta = v / (v - v_nb)` of the way
/// to the neighbor; the estimate is `1 / sqrt(sum(1 / theta²))`.
fn interface_distance<F>(phi: &LevelSet, idx: usize, active: F) -> Option<f32>
where
    F: Fn(usize) -> bool,
{
    let dims = phi.dims();
    let v = phi.at(idx);
    let (i, j, k) = dims.cell_coords(idx);
    let neighbors = dims.neighbors(i, j, k);

    let mut inv_sq = 0.0;
    let mut crossed = false;
    for axis in 0..3 {
        let mut theta = f32::INFINITY;
        for nb in [neighbors[2 * axis], neighbors[2 * axis + 1]].into_iter().flatten() {
            if !active(nb) {
                continue;
            }
            let vn = phi.at(nb);
            if is_inside(vn) != is_inside(v) {
                let t = (v / (v - vn)).abs().max(MIN_INTERFACE_FRACTION);
                theta = theta.min(t);
            }
        }
        if theta.is_finite() {
            inv_sq += 1.0 / (theta * theta);
            crossed = true;
        }
    }
    crossed.then(|| 1.0 / inv_sq.sqrt())
}

/// Solve the Eikonal equation |∇φ| = 1 (unit spacing) from the smallest
/// known neighbor value along each axis.
fn solve_eikonal(phi_x: f32, phi_y: f32, phi_z: f32) -> f32 {
    let (phi_a, phi_b, phi_c) = sort3(phi_x, phi_y, phi_z);

    let mut new_val = phi_a + 1.0;

    if new_val > phi_b {
        // (φ - a)² + (φ - b)² = 1
        let diff_sq = 2.0 - (phi_a - phi_b).powi(2);
        if diff_sq >= 0.0 {
            new_val = (phi_a + phi_b + diff_sq.sqrt()) / 2.0;
        }
    }

    if new_val > phi_c {
        let sum = phi_a + phi_b + phi_c;
        let sum_sq = phi_a * phi_a + phi_b * phi_b + phi_c * phi_c;
        let disc = sum * sum - 3.0 * (sum_sq - 1.0);
        if disc >= 0.0 {
            new_val = (sum + disc.sqrt()) / 3.0;
        }
    }

    new_val
}

/// Sort three values in ascending order.
fn sort3(a: f32, b: f32, c: f32) -> (f32, f32, f32) {
    if a <= b {
        if b <= c {
            (a, b, c)
        } else if a <= c {
            (a, c, b)
        } else {
            (c, a, b)
        }
    } else if a <= c {
        (b, a, c)
    } else if b <= c {
        (b, c, a)
    } else {
        (c, b, a)
    }
}

/// Smallest value of `dist` per axis among neighbors accepted by `known`.
fn axis_minima<F>(dims: GridDims, idx: usize, dist: &[f32], known: F) -> [f32; 3]
where
    F: Fn(usize) -> bool,
{
    let (i, j, k) = dims.cell_coords(idx);
    let neighbors = dims.neighbors(i, j, k);
    let mut out = [f32::INFINITY; 3];
    for (axis, slot) in out.iter_mut().enumerate() {
        for nb in [neighbors[2 * axis], neighbors[2 * axis + 1]].into_iter().flatten() {
            if known(nb) {
                *slot = slot.min(dist[nb]);
            }
        }
    }
    out
}

fn sweep_order(n: usize, forward: bool) -> Vec<usize> {
    if forward {
        (0..n).collect()
    } else {
        (0..n).rev().collect()
    }
}

/// Exact reinitialization by fast sweeping.
///
/// Interface cells are frozen at their sub-cell distance estimate; all other
/// cells get the upwind Eikonal distance from same-side neighbors. Signs never
/// change.
pub fn reinit_exact(phi: &mut LevelSet) {
    let dims = phi.dims();
    let n = dims.cell_count();
    let sentinel = (dims.width + dims.height + dims.depth) as f32;

    let sign: Vec<f32> = phi.data().iter().map(|&v| sign_of(v)).collect();
    let mut frozen = vec![false; n];
    let mut dist = vec![sentinel; n];
    for idx in 0..n {
        if let Some(d) = interface_distance(phi, idx, |_| true) {
            dist[idx] = d;
            frozen[idx] = true;
        }
    }

    let sweeps: &[(bool, bool, bool)] = if dims.is_2d() {
        &[(true, true, true), (false, true, true), (true, false, true), (false, false, true)]
    } else {
        &[
            (true, true, true),
            (false, true, true),
            (true, false, true),
            (false, false, true),
            (true, true, false),
            (false, true, false),
            (true, false, false),
            (false, false, false),
        ]
    };

    // Multiple passes for better convergence
    for _ in 0..2 {
        for &(fi, fj, fk) in sweeps {
            for k in sweep_order(dims.depth, fk) {
                for j in sweep_order(dims.height, fj) {
                    for i in sweep_order(dims.width, fi) {
                        let idx = dims.cell_index(i, j, k);
                        if frozen[idx] {
                            continue;
                        }
                        let s = sign[idx];
                        let [ax, ay, az] = axis_minima(dims, idx, &dist, |nb| sign[nb] == s);
                        if ax.is_finite() || ay.is_finite() || az.is_finite() {
                            dist[idx] = dist[idx].min(solve_eikonal(ax, ay, az));
                        }
                    }
                }
            }
        }
    }

    for (value, (&d, &s)) in phi.data_mut().iter_mut().zip(dist.iter().zip(&sign)) {
        *value = s * d;
    }
}

/// Fast-marching front entry; ordered so that `BinaryHeap` pops the smallest distance.
#[derive(Clone, Copy, Debug)]
struct Trial {
    dist: f32,
    idx: usize,
}

impl PartialEq for Trial {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Trial {}

impl PartialOrd for Trial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Trial {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Fast-marching reinitialization up to [`MARCHING_MAX_DISTANCE`] cells.
///
/// Obstacle cells are neither read nor written. When `vel_transport` is given,
/// velocities are carried outward into the air: cells are visited in
/// acceptance order and each unknown face of an air cell takes the average of
/// its known neighbor faces. Faces next to liquid cells start out known.
pub fn reinit_marching(phi: &mut LevelSet, flags: &FlagGrid, vel_transport: Option<&mut MacGrid>) {
    let dims = phi.dims();
    let n = dims.cell_count();
    let active = |idx: usize| !flags.is_obstacle(idx);

    let sign: Vec<f32> = phi.data().iter().map(|&v| sign_of(v)).collect();
    let mut dist = vec![f32::INFINITY; n];
    let mut accepted = vec![false; n];
    let mut heap = BinaryHeap::new();

    for idx in 0..n {
        if !active(idx) {
            continue;
        }
        if let Some(d) = interface_distance(phi, idx, active) {
            dist[idx] = d;
            heap.push(Trial { dist: d, idx });
        }
    }

    let mut order = Vec::with_capacity(n);
    while let Some(Trial { dist: d, idx }) = heap.pop() {
        if accepted[idx] || d > dist[idx] {
            continue;
        }
        accepted[idx] = true;
        order.push(idx);
        if d >= MARCHING_MAX_DISTANCE {
            continue;
        }

        let (i, j, k) = dims.cell_coords(idx);
        for &nb in dims.neighbors(i, j, k).iter().flatten() {
            if accepted[nb] || !active(nb) {
                continue;
            }
            let [ax, ay, az] = axis_minima(dims, nb, &dist, |c| accepted[c]);
            let candidate = solve_eikonal(ax, ay, az);
            if candidate < dist[nb] {
                dist[nb] = candidate;
                heap.push(Trial {
                    dist: candidate,
                    idx: nb,
                });
            }
        }
    }

    for idx in 0..n {
        if active(idx) {
            phi.data_mut()[idx] = sign[idx] * dist[idx].min(MARCHING_MAX_DISTANCE);
        }
    }

    if let Some(vel) = vel_transport {
        transport_velocity(&order, &sign, flags, vel);
    }
}

/// Carry velocities into air cells in front order (see [`reinit_marching`]).
fn transport_velocity(order: &[usize], sign: &[f32], flags: &FlagGrid, vel: &mut MacGrid) {
    let dims = vel.dims();
    for &axis in dims.active_axes() {
        let mut known: Vec<bool> = (0..dims.face_count(axis))
            .map(|f| {
                let (i, j, k) = dims.face_coords(axis, f);
                flags.is_fluid_face(axis, i, j, k)
            })
            .collect();

        let step = axis.face_offset() * -2.0 + Vec3::ONE;
        let (si, sj, sk) = (step.x as usize, step.y as usize, step.z as usize);

        for &idx in order {
            if sign[idx] < 0.0 {
                continue;
            }
            let (i, j, k) = dims.cell_coords(idx);
            for (fi, fj, fk) in [(i, j, k), (i + si, j + sj, k + sk)] {
                let face = dims.face_index(axis, fi, fj, fk);
                if known[face] || flags.is_wall_face(axis, fi, fj, fk) {
                    continue;
                }
                let mut sum = 0.0;
                let mut count = 0;
                for &nb in dims.face_neighbors(axis, fi, fj, fk).iter().flatten() {
                    if known[nb] {
                        sum += vel.component(axis)[nb];
                        count += 1;
                    }
                }
                if count > 0 {
                    vel.component_mut(axis)[face] = sum / count as f32;
                    known[face] = true;
                }
            }
        }
    }
}
