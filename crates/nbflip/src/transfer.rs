//! Particle-grid transfer functions.
//!
//! P2G: per-face gather of kernel-weighted particle velocities.
//! G2P: grid velocity sampled at particle positions (plain or FLIP-corrected).
//!
//! The gather runs face-parallel over the [`ParticleIndex`], so results do not
//! depend on thread scheduling.

use glam::Vec3;
use rayon::prelude::*;

use crate::grid::{Axis, FlagGrid, LevelSet, MacGrid};
use crate::kernels::TransferKernel;
use crate::particle::Particles;
use crate::spatial::ParticleIndex;

/// Per-face accumulated kernel weights from the last P2G.
pub type MappingWeights = MacGrid;

/// Transfer particle velocities to MAC faces (P2G).
///
/// Returns the particle-derived velocity (`Σ w·v / Σ w`, zero where no
/// particle contributes) and the accumulated weights.
pub fn map_particles_to_mac(
    particles: &Particles,
    index: &ParticleIndex,
    kernel: TransferKernel,
) -> (MacGrid, MappingWeights) {
    let dims = index.dims();
    let planar = dims.is_2d();
    let reach = kernel.support();

    let mut vel_parts = MacGrid::new(dims);
    let mut weights = MacGrid::new(dims);

    for &axis in dims.active_axes() {
        let c = axis.index();
        let gathered: Vec<(f32, f32)> = (0..dims.face_count(axis))
            .into_par_iter()
            .map(|f| {
                let (i, j, k) = dims.face_coords(axis, f);
                let node = dims.face_position(axis, i, j, k);
                let mut sum = 0.0;
                let mut wsum = 0.0;
                index.for_each_near(i as i32, j as i32, k as i32, reach, |p| {
                    let particle = &particles.list[p];
                    let w = kernel.weight(particle.position - node, planar);
                    if w > 0.0 {
                        sum += w * particle.velocity[c];
                        wsum += w;
                    }
                });
                if wsum > 0.0 {
                    (sum / wsum, wsum)
                } else {
                    (0.0, 0.0)
                }
            })
            .collect();

        for (f, (v, w)) in gathered.into_iter().enumerate() {
            vel_parts.component_mut(axis)[f] = v;
            weights.component_mut(axis)[f] = w;
        }
    }

    (vel_parts, weights)
}

/// Full replace: every face touching a fluid cell takes the particle velocity.
///
/// Mutates: `vel`.
pub fn replace_fluid_velocity(vel: &mut MacGrid, vel_parts: &MacGrid, flags: &FlagGrid) {
    let dims = vel.dims();
    for &axis in dims.active_axes() {
        let src = vel_parts.component(axis);
        vel.component_mut(axis)
            .par_iter_mut()
            .enumerate()
            .for_each(|(f, value)| {
                let (i, j, k) = dims.face_coords(axis, f);
                if flags.is_fluid_face(axis, i, j, k) {
                    *value = src[f];
                }
            });
    }
}

/// Level-set value at a face: average of the adjacent cells inside the domain.
#[inline]
fn face_phi(phi: &LevelSet, axis: Axis, i: usize, j: usize, k: usize) -> f32 {
    match phi.dims().face_cells(axis, i, j, k) {
        (Some(lo), Some(hi)) => 0.5 * (phi.at(lo) + phi.at(hi)),
        (Some(c), None) | (None, Some(c)) => phi.at(c),
        (None, None) => f32::INFINITY,
    }
}

/// Narrow-band combine: overwrite the Eulerian velocity with the particle
/// velocity on faces within `combine_band` cells of the surface (any depth
/// when the band is 0) whose P2G weight exceeds `threshold`.
///
/// Returns the number of overwritten faces. Mutates: `vel`.
pub fn combine_grid_velocity(
    vel: &mut MacGrid,
    vel_parts: &MacGrid,
    weights: &MappingWeights,
    phi: &LevelSet,
    combine_band: f32,
    threshold: f32,
) -> usize {
    let dims = vel.dims();
    let mut replaced = 0;
    for &axis in dims.active_axes() {
        let src = vel_parts.component(axis);
        let w = weights.component(axis);
        replaced += vel
            .component_mut(axis)
            .par_iter_mut()
            .enumerate()
            .map(|(f, value)| {
                let (i, j, k) = dims.face_coords(axis, f);
                let in_band =
                    combine_band <= 0.0 || face_phi(phi, axis, i, j, k) >= -combine_band;
                if in_band && w[f] > threshold {
                    *value = src[f];
                    1
                } else {
                    0
                }
            })
            .sum::<usize>();
    }
    replaced
}

/// Normalized smooth-kernel average of one velocity component around `pos`.
fn sample_component_smooth(vel: &MacGrid, axis: Axis, pos: Vec3) -> f32 {
    let dims = vel.dims();
    let planar = dims.is_2d();
    let (nx, ny, nz) = dims.face_dims(axis);
    let local = pos - axis.face_offset();
    let base = local.floor();
    let (bi, bj, bk) = (base.x as i32, base.y as i32, base.z as i32);
    let kr = if planar { 0..=0 } else { -1..=2 };

    let comp = vel.component(axis);
    let mut sum = 0.0;
    let mut wsum = 0.0;
    for dk in kr {
        for dj in -1..=2 {
            for di in -1..=2 {
                let (i, j, k) = (bi + di, bj + dj, if planar { 0 } else { bk + dk });
                if i < 0 || j < 0 || k < 0 || i >= nx as i32 || j >= ny as i32 || k >= nz as i32 {
                    continue;
                }
                let (i, j, k) = (i as usize, j as usize, k as usize);
                let w = TransferKernel::Smooth.weight(pos - dims.face_position(axis, i, j, k), planar);
                if w > 0.0 {
                    sum += w * comp[dims.face_index(axis, i, j, k)];
                    wsum += w;
                }
            }
        }
    }
    if wsum > 0.0 {
        sum / wsum
    } else {
        vel.sample_component(axis, pos)
    }
}

/// Grid velocity at a particle position with the given kernel.
#[inline]
pub fn sample_velocity(vel: &MacGrid, pos: Vec3, kernel: TransferKernel) -> Vec3 {
    match kernel {
        TransferKernel::DLinear => vel.sample(pos),
        TransferKernel::Smooth => {
            let mut out = Vec3::ZERO;
            for &axis in vel.dims().active_axes() {
                out[axis.index()] = sample_component_smooth(vel, axis, pos);
            }
            out
        }
    }
}

/// Plain G2P: particles take the grid velocity.
pub fn map_mac_to_particles(particles: &mut Particles, vel: &MacGrid, kernel: TransferKernel) {
    particles.list.par_iter_mut().for_each(|p| {
        p.velocity = sample_velocity(vel, p.position, kernel);
    });
}

/// FLIP/PIC blend:
/// `v_p = r·(v_p + vel(x_p) − vel_old(x_p)) + (1 − r)·vel(x_p)`.
/// `r = 1` is pure FLIP, `r = 0` pure PIC.
pub fn flip_velocity_update(
    particles: &mut Particles,
    vel: &MacGrid,
    vel_old: &MacGrid,
    flip_ratio: f32,
    kernel: TransferKernel,
) {
    particles.list.par_iter_mut().for_each(|p| {
        let v = sample_velocity(vel, p.position, kernel);
        let v_old = sample_velocity(vel_old, p.position, kernel);
        p.velocity = flip_ratio * (p.velocity + v - v_old) + (1.0 - flip_ratio) * v;
    });
}
