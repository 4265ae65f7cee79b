//! Velocity extrapolation from the liquid into the surrounding air.

use crate::grid::{FlagGrid, MacGrid};

/// Extrapolate MAC velocities outward from faces adjacent to fluid cells.
///
/// Faces touching a fluid cell are known. Each layer, an unknown face takes
/// the average of its known same-component neighbors; `distance` layers are
/// processed. Faces touching obstacles are left alone.
pub fn extrapolate_mac_simple(flags: &FlagGrid, vel: &mut MacGrid, distance: usize) {
    let dims = vel.dims();

    for &axis in dims.active_axes() {
        let count = dims.face_count(axis);
        let mut known: Vec<bool> = (0..count)
            .map(|f| {
                let (i, j, k) = dims.face_coords(axis, f);
                flags.is_fluid_face(axis, i, j, k)
            })
            .collect();

        for _ in 0..distance {
            // Two-buffer pattern: values found in this layer are not read in the same pass
            let mut updates: Vec<(usize, f32)> = Vec::new();
            for f in 0..count {
                if known[f] {
                    continue;
                }
                let (i, j, k) = dims.face_coords(axis, f);
                if flags.is_wall_face(axis, i, j, k) {
                    continue;
                }
                let mut sum = 0.0;
                let mut n = 0;
                for &nb in dims.face_neighbors(axis, i, j, k).iter().flatten() {
                    if known[nb] {
                        sum += vel.component(axis)[nb];
                        n += 1;
                    }
                }
                if n > 0 {
                    updates.push((f, sum / n as f32));
                }
            }
            if updates.is_empty() {
                break;
            }
            let component = vel.component_mut(axis);
            for (f, value) in updates {
                component[f] = value;
                known[f] = true;
            }
        }
    }
}

/// Layer count used after projection: enough to cover one step of travel at `max_vel`.
#[inline]
pub fn extrapolation_distance(max_vel: f32) -> usize {
    (max_vel * 1.25 + 2.0) as usize
}
