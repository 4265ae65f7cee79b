//! Semi-Lagrangian / MacCormack grid advection and RK4 particle advection.

use rayon::prelude::*;

use crate::grid::{FlagGrid, MacGrid, ScalarGrid};
use crate::particle::Particles;

/// Distance particles are kept away from the domain walls after advection.
const PARTICLE_WALL_MARGIN: f32 = 1e-3;

/// Advect a cell-centered scalar field through `vel`.
///
/// `order == 1` is plain semi-Lagrangian; `order >= 2` adds a MacCormack
/// correction, clamped to the values the forward trace interpolated between.
/// Obstacle cells keep their value.
pub fn advect_scalar(flags: &FlagGrid, vel: &MacGrid, field: &mut ScalarGrid, dt: f32, order: u32) {
    let forward = semi_lagrange_scalar(flags, vel, field, dt);
    if order < 2 {
        field.copy_from(&forward);
        return;
    }

    let backward = semi_lagrange_scalar(flags, vel, &forward, -dt);
    let dims = field.dims();
    let source = field.clone();
    field
        .data_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, value)| {
            if flags.is_obstacle(idx) {
                return;
            }
            let fwd = forward.at(idx);
            let corrected = fwd + 0.5 * (source.at(idx) - backward.at(idx));
            let (i, j, k) = dims.cell_coords(idx);
            let pos = dims.cell_center(i, j, k);
            let (lo, hi) = source.sample_bounds(pos - vel.sample(pos) * dt);
            *value = if corrected < lo || corrected > hi {
                fwd
            } else {
                corrected
            };
        });
}

fn semi_lagrange_scalar(flags: &FlagGrid, vel: &MacGrid, field: &ScalarGrid, dt: f32) -> ScalarGrid {
    let dims = field.dims();
    let mut out = field.clone();
    out.data_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, value)| {
            if flags.is_obstacle(idx) {
                return;
            }
            let (i, j, k) = dims.cell_coords(idx);
            let pos = dims.cell_center(i, j, k);
            *value = field.sample(pos - vel.sample(pos) * dt);
        });
    out
}

/// Self-advect a MAC velocity field (order 1 or 2, as for scalars).
pub fn advect_velocity(vel: &mut MacGrid, dt: f32, order: u32) {
    let forward = semi_lagrange_mac(vel, vel, dt);
    if order < 2 {
        vel.copy_from(&forward);
        return;
    }

    let backward = semi_lagrange_mac(vel, &forward, -dt);
    let dims = vel.dims();
    let source = vel.clone();
    for &axis in dims.active_axes() {
        let fwd = forward.component(axis);
        let bwd = backward.component(axis);
        let src = source.component(axis);
        vel.component_mut(axis)
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, value)| {
                let corrected = fwd[idx] + 0.5 * (src[idx] - bwd[idx]);
                let (i, j, k) = dims.face_coords(axis, idx);
                let pos = dims.face_position(axis, i, j, k);
                let back = pos - source.sample(pos) * dt;
                let (lo, hi) = source.sample_component_bounds(axis, back);
                *value = if corrected < lo || corrected > hi {
                    fwd[idx]
                } else {
                    corrected
                };
            });
    }
}

/// One semi-Lagrangian pass of `field` along the trace velocity `carrier`.
fn semi_lagrange_mac(carrier: &MacGrid, field: &MacGrid, dt: f32) -> MacGrid {
    let dims = field.dims();
    let mut out = field.clone();
    for &axis in dims.active_axes() {
        out.component_mut(axis)
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, value)| {
                let (i, j, k) = dims.face_coords(axis, idx);
                let pos = dims.face_position(axis, i, j, k);
                *value = field.sample_component(axis, pos - carrier.sample(pos) * dt);
            });
    }
    out
}

/// Advect particle positions through the grid velocity with classic RK4.
///
/// Particles that leave the domain are clamped back inside the domain walls;
/// particle velocities are not touched.
pub fn advect_particles(particles: &mut Particles, flags: &FlagGrid, vel: &MacGrid, dt: f32) {
    particles.list.par_iter_mut().for_each(|p| {
        let x = p.position;
        let k1 = vel.sample(x);
        let k2 = vel.sample(x + k1 * (0.5 * dt));
        let k3 = vel.sample(x + k2 * (0.5 * dt));
        let k4 = vel.sample(x + k3 * dt);
        let next = x + (k1 + 2.0 * k2 + 2.0 * k3 + k4) * (dt / 6.0);
        p.position = flags.clamp_to_interior(next, PARTICLE_WALL_MARGIN);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Axis, GridDims};
    use glam::Vec3;

    fn uniform_flow(dims: GridDims, u: f32) -> MacGrid {
        let mut vel = MacGrid::new(dims);
        vel.component_mut(Axis::X).fill(u);
        vel
    }

    #[test]
    fn test_scalar_translation_first_order() {
        let dims = GridDims::new(16, 4, 1);
        let flags = FlagGrid::new(dims);
        let vel = uniform_flow(dims, 1.0);
        let mut field = ScalarGrid::new(dims, 0.0);
        for j in 0..4 {
            for i in 0..16 {
                field.set(i, j, 0, i as f32);
            }
        }
        advect_scalar(&flags, &vel, &mut field, 1.0, 1);
        // Shift by exactly one cell
        assert!((field.get(5, 2, 0) - 4.0).abs() < 1e-5);
        assert!((field.get(10, 1, 0) - 9.0).abs() < 1e-5);
    }

    #[test]
    fn test_maccormack_stays_within_bounds() {
        let dims = GridDims::new(16, 4, 1);
        let flags = FlagGrid::new(dims);
        let vel = uniform_flow(dims, 0.6);
        let mut field = ScalarGrid::new(dims, 0.0);
        for j in 0..4 {
            field.set(8, j, 0, 1.0);
        }
        advect_scalar(&flags, &vel, &mut field, 1.0, 2);
        for &v in field.data() {
            assert!((-1e-6..=1.0 + 1e-6).contains(&v), "value {} out of range", v);
        }
    }

    #[test]
    fn test_obstacle_cells_keep_value() {
        let dims = GridDims::new(8, 8, 1);
        let mut flags = FlagGrid::new(dims);
        flags.init_domain(0);
        let vel = uniform_flow(dims, 1.0);
        let mut field = ScalarGrid::new(dims, 3.0);
        field.set(4, 4, 0, -1.0);
        advect_scalar(&flags, &vel, &mut field, 1.0, 1);
        assert_eq!(field.get(0, 4, 0), 3.0);
    }

    #[test]
    fn test_velocity_self_advection_uniform() {
        let dims = GridDims::new(8, 8, 1);
        let mut vel = uniform_flow(dims, 0.5);
        advect_velocity(&mut vel, 1.0, 2);
        assert!(vel.component(Axis::X).iter().all(|&u| (u - 0.5).abs() < 1e-6));
        assert!(vel.component(Axis::Z).iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_particles_rk4_and_clamp() {
        let dims = GridDims::new(8, 8, 1);
        let vel = uniform_flow(dims, 1.0);
        let mut particles = Particles::new();
        particles.spawn_at(Vec3::new(2.0, 2.0, 0.5));
        particles.spawn_at(Vec3::new(7.5, 2.0, 0.5));
        advect_particles(&mut particles, &FlagGrid::new(dims), &vel, 1.5);
        assert!((particles.list[0].position.x - 3.5).abs() < 1e-5);
        // Escaping particle is clamped just inside the domain
        assert!(particles.list[1].position.x < 8.0);
        assert_eq!(particles.list[1].position.z, 0.5);
    }

    #[test]
    fn test_escaping_particles_stay_out_of_walls() {
        let dims = GridDims::new(8, 8, 1);
        let mut flags = FlagGrid::new(dims);
        flags.init_domain(0);
        let vel = uniform_flow(dims, -1.0);
        let mut particles = Particles::new();
        particles.spawn_at(Vec3::new(1.5, 3.5, 0.5));
        advect_particles(&mut particles, &flags, &vel, 2.0);
        let p = particles.list[0].position;
        assert!((p.x - (1.0 + PARTICLE_WALL_MARGIN)).abs() < 1e-6, "x = {}", p.x);
        let cell = dims.cell_at(p).expect("particle left the grid");
        assert!(!flags.is_obstacle(cell), "particle clamped into the wall at {:?}", p);

        let mut walled = FlagGrid::new(dims);
        walled.init_domain(1);
        particles.list[0].position = Vec3::new(3.5, 6.5, 0.5);
        let up = {
            let mut vel = MacGrid::new(dims);
            vel.component_mut(Axis::Y).fill(3.0);
            vel
        };
        advect_particles(&mut particles, &walled, &up, 1.0);
        assert!((particles.list[0].position.y - (6.0 - PARTICLE_WALL_MARGIN)).abs() < 1e-5);
    }
}
