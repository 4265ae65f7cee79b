//! Volume and energy measures reported per frame.

use glam::Vec3;

use crate::grid::{FlagGrid, MacGrid};

/// Fluid volume in cells (number of Fluid cells).
pub fn fluid_volume(flags: &FlagGrid) -> usize {
    flags.fluid_count()
}

/// Kinetic plus potential energy over fluid cells, in grid units.
///
/// Kinetic: `0.5 |v|²` from cell-centered velocity. Potential: `-g · x` with
/// gravity scaled to grid units, measured from the domain origin.
pub fn total_energy(flags: &FlagGrid, vel: &MacGrid, gravity: Vec3) -> f64 {
    let dims = flags.dims();
    let g = gravity * dims.max_resolution() as f32;
    let mut energy = 0.0f64;
    for idx in 0..dims.cell_count() {
        if !flags.is_fluid(idx) {
            continue;
        }
        let (i, j, k) = dims.cell_coords(idx);
        let v = vel.centered(i, j, k);
        let pos = dims.cell_center(i, j, k);
        energy += 0.5 * v.length_squared() as f64 - g.dot(pos) as f64;
    }
    energy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Axis, GridDims, ScalarGrid};

    #[test]
    fn test_volume_and_energy() {
        let dims = GridDims::new(4, 4, 1);
        let mut flags = FlagGrid::new(dims);
        let mut phi = ScalarGrid::new(dims, 1.0);
        phi.set(1, 0, 0, -1.0);
        phi.set(2, 0, 0, -1.0);
        flags.update_from_levelset(&phi);
        assert_eq!(fluid_volume(&flags), 2);

        let mut vel = MacGrid::new(dims);
        vel.component_mut(Axis::X).fill(2.0);
        // Kinetic 2 * 0.5 * 4, potential 2 * 0.25 * 4 * 0.5
        let e = total_energy(&flags, &vel, Vec3::new(0.0, -0.25, 0.0));
        assert!((e - 5.0).abs() < 1e-6, "energy {}", e);
    }
}
