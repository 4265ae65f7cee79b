//! Particle/grid transfer kernels.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Kernel used to map particle velocities onto MAC faces (and back).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKernel {
    /// Tent function per axis, 2 grid nodes per axis
    #[default]
    DLinear,
    /// `(1 - r²/4)³` with radius 2, 4 grid nodes per axis
    Smooth,
}

impl TransferKernel {
    /// Support radius in cells.
    #[inline]
    pub fn support(self) -> i32 {
        match self {
            TransferKernel::DLinear => 1,
            TransferKernel::Smooth => 2,
        }
    }

    /// Weight for a particle at offset `delta` from a grid node.
    /// In 2D (`planar`) the z offset is ignored.
    #[inline]
    pub fn weight(self, delta: Vec3, planar: bool) -> f32 {
        match self {
            TransferKernel::DLinear => dlinear_3d(delta, planar),
            TransferKernel::Smooth => smooth_3d(delta, planar),
        }
    }
}

/// 1D tent weight. Support: [-1, 1]
#[inline]
pub fn dlinear_1d(r: f32) -> f32 {
    (1.0 - r.abs()).max(0.0)
}

#[inline]
pub fn dlinear_3d(delta: Vec3, planar: bool) -> f32 {
    let wz = if planar { 1.0 } else { dlinear_1d(delta.z) };
    dlinear_1d(delta.x) * dlinear_1d(delta.y) * wz
}

/// Radial smooth kernel `(1 - r²/4)³`, zero for r >= 2.
#[inline]
pub fn smooth_3d(delta: Vec3, planar: bool) -> f32 {
    let d = if planar {
        Vec3::new(delta.x, delta.y, 0.0)
    } else {
        delta
    };
    let r2 = d.length_squared();
    if r2 >= 4.0 {
        return 0.0;
    }
    let t = 1.0 - r2 * 0.25;
    t * t * t
}
