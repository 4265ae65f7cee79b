//! Body forces and solid-wall boundary conditions on the MAC grid.

use glam::Vec3;
use rayon::prelude::*;

use crate::grid::{FlagGrid, MacGrid};

/// Zero every face that touches an obstacle cell or the domain boundary.
/// In 2D the w component is cleared entirely.
pub fn set_wall_bcs(flags: &FlagGrid, vel: &mut MacGrid) {
    let dims = vel.dims();
    for &axis in dims.active_axes() {
        vel.component_mut(axis)
            .par_iter_mut()
            .enumerate()
            .for_each(|(f, value)| {
                let (i, j, k) = dims.face_coords(axis, f);
                if flags.is_wall_face(axis, i, j, k) {
                    *value = 0.0;
                }
            });
    }
    if dims.is_2d() {
        vel.component_mut(crate::grid::Axis::Z).fill(0.0);
    }
}

/// Add `gravity * dt` to faces adjacent to fluid.
///
/// `gravity` is in domain units and is scaled to grid units by the largest
/// resolution. Faces touching obstacles are skipped.
pub fn add_gravity(flags: &FlagGrid, vel: &mut MacGrid, gravity: Vec3, dt: f32) {
    let dims = vel.dims();
    let accel = gravity * dims.max_resolution() as f32 * dt;
    for &axis in dims.active_axes() {
        let delta = accel[axis.index()];
        if delta == 0.0 {
            continue;
        }
        vel.component_mut(axis)
            .par_iter_mut()
            .enumerate()
            .for_each(|(f, value)| {
                let (i, j, k) = dims.face_coords(axis, f);
                if flags.is_fluid_face(axis, i, j, k) && !flags.is_wall_face(axis, i, j, k) {
                    *value += delta;
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Axis, GridDims, ScalarGrid};

    fn column(dims: GridDims) -> FlagGrid {
        let mut flags = FlagGrid::new(dims);
        flags.init_domain(0);
        let mut phi = ScalarGrid::new(dims, 1.0);
        for j in 0..4 {
            phi.set(3, j, 0, -1.0);
        }
        flags.update_from_levelset(&phi);
        flags
    }

    #[test]
    fn test_gravity_only_on_fluid_faces() {
        let dims = GridDims::new(8, 8, 1);
        let flags = column(dims);
        let mut vel = MacGrid::new(dims);
        add_gravity(&flags, &mut vel, Vec3::new(0.0, -0.5, 0.0), 0.25);
        let v = vel.component(Axis::Y);
        // -0.5 * 8 cells * 0.25
        assert_eq!(v[dims.face_index(Axis::Y, 3, 2, 0)], -1.0);
        assert_eq!(v[dims.face_index(Axis::Y, 3, 4, 0)], -1.0);
        assert_eq!(v[dims.face_index(Axis::Y, 3, 1, 0)], 0.0, "floor face");
        assert_eq!(v[dims.face_index(Axis::Y, 5, 2, 0)], 0.0, "air face");
    }

    #[test]
    fn test_wall_bcs_zero_obstacle_faces() {
        let dims = GridDims::new(8, 8, 1);
        let flags = column(dims);
        let mut vel = MacGrid::new(dims);
        vel.component_mut(Axis::X).fill(1.0);
        vel.component_mut(Axis::Y).fill(1.0);
        vel.component_mut(Axis::Z).fill(1.0);
        set_wall_bcs(&flags, &mut vel);
        assert_eq!(vel.component(Axis::X)[dims.face_index(Axis::X, 1, 3, 0)], 0.0);
        assert_eq!(vel.component(Axis::X)[dims.face_index(Axis::X, 0, 3, 0)], 0.0);
        assert_eq!(vel.component(Axis::Y)[dims.face_index(Axis::Y, 3, 1, 0)], 0.0);
        assert_eq!(vel.component(Axis::X)[dims.face_index(Axis::X, 3, 3, 0)], 1.0);
        assert!(vel.component(Axis::Z).iter().all(|&w| w == 0.0));
    }
}
