//! Analytic shapes used to initialize fluid regions, obstacles and velocity regions.
//!
//! Shapes are described in domain units (fractions of the domain size per axis,
//! radii as fractions of the largest resolution) and converted to grid space
//! with [`Shape::to_grid`].

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::grid::{CellFlag, FlagGrid, GridDims, LevelSet, MacGrid};
use crate::serde_utils::vec3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    /// Axis-aligned box spanning `min..max`
    Box {
        #[serde(with = "vec3")]
        min: Vec3,
        #[serde(with = "vec3")]
        max: Vec3,
    },
    Sphere {
        #[serde(with = "vec3")]
        center: Vec3,
        radius: f32,
    },
}

impl Shape {
    /// Scale a domain-unit shape into grid space for the given lattice.
    pub fn to_grid(&self, dims: GridDims) -> Shape {
        let size = dims.size();
        match *self {
            Shape::Box { min, max } => Shape::Box {
                min: min * size,
                max: max * size,
            },
            Shape::Sphere { center, radius } => Shape::Sphere {
                center: center * size,
                radius: radius * dims.max_resolution() as f32,
            },
        }
    }

    /// Signed distance from `pos` to the shape surface, negative inside.
    /// In 2D (`planar`) the z axis is ignored.
    pub fn signed_distance(&self, pos: Vec3, planar: bool) -> f32 {
        let mask = if planar {
            Vec3::new(1.0, 1.0, 0.0)
        } else {
            Vec3::ONE
        };
        match *self {
            Shape::Box { min, max } => {
                let center = (min + max) * 0.5;
                let half = (max - min) * 0.5;
                let q = ((pos - center).abs() - half) * mask;
                let outside = q.max(Vec3::ZERO).length();
                let inside = if planar {
                    q.x.max(q.y).min(0.0)
                } else {
                    q.max_element().min(0.0)
                };
                outside + inside
            }
            Shape::Sphere { center, radius } => ((pos - center) * mask).length() - radius,
        }
    }

    #[inline]
    pub fn contains(&self, pos: Vec3, planar: bool) -> bool {
        self.signed_distance(pos, planar) <= 0.0
    }

    /// Level set of the shape sampled at cell centers.
    pub fn compute_levelset(&self, dims: GridDims) -> LevelSet {
        let mut phi = LevelSet::new(dims, 0.0);
        let planar = dims.is_2d();
        for (idx, value) in phi.data_mut().iter_mut().enumerate() {
            let (i, j, k) = dims.cell_coords(idx);
            *value = self.signed_distance(dims.cell_center(i, j, k), planar);
        }
        phi
    }

    /// Set the flag of every cell whose center lies inside the shape.
    pub fn apply_flag(&self, flags: &mut FlagGrid, flag: CellFlag) {
        let dims = flags.dims();
        let planar = dims.is_2d();
        for k in 0..dims.depth {
            for j in 0..dims.height {
                for i in 0..dims.width {
                    if self.contains(dims.cell_center(i, j, k), planar) {
                        flags.set(i, j, k, flag);
                    }
                }
            }
        }
    }

    /// Set every face node inside the shape to `value` (per component).
    pub fn apply_velocity(&self, vel: &mut MacGrid, value: Vec3) {
        let dims = vel.dims();
        let planar = dims.is_2d();
        for &axis in dims.active_axes() {
            let component = value[axis.index()];
            let count = dims.face_count(axis);
            for idx in 0..count {
                let (i, j, k) = dims.face_coords(axis, idx);
                if self.contains(dims.face_position(axis, i, j, k), planar) {
                    vel.component_mut(axis)[idx] = component;
                }
            }
        }
    }
}
