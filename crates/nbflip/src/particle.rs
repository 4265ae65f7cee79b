//! FLIP particles: grid-space position plus carried velocity.

use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::grid::{FlagGrid, LevelSet};
use crate::serde_utils::vec3;

/// A single marker particle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Grid-space position
    #[serde(with = "vec3")]
    pub position: Vec3,
    /// Carried velocity (cells per unit time)
    #[serde(with = "vec3")]
    pub velocity: Vec3,
}

impl Particle {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }

    /// Create a stationary particle at the given position.
    pub fn at(position: Vec3) -> Self {
        Self::new(position, Vec3::ZERO)
    }
}

/// Collection of particles.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Particles {
    pub list: Vec<Particle>,
}

impl Particles {
    pub fn new() -> Self {
        Self { list: Vec::new() }
    }

    pub fn spawn(&mut self, position: Vec3, velocity: Vec3) {
        self.list.push(Particle::new(position, velocity));
    }

    pub fn spawn_at(&mut self, position: Vec3) {
        self.list.push(Particle::at(position));
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.list
            .iter()
            .all(|p| p.position.is_finite() && p.velocity.is_finite())
    }
}

/// Seed particles inside the liquid.
///
/// Every non-obstacle cell is split into `discretization^dim` sub-cells; each
/// sub-cell center is jittered by up to `randomness` cells and kept when the
/// level set is negative there.
pub fn sample_levelset_with_particles<R: Rng>(
    phi: &LevelSet,
    flags: &FlagGrid,
    particles: &mut Particles,
    discretization: usize,
    randomness: f32,
    rng: &mut R,
) {
    let dims = phi.dims();
    let disc = discretization.max(1);
    let disc_z = if dims.is_2d() { 1 } else { disc };
    let step = 1.0 / disc as f32;

    for k in 0..dims.depth {
        for j in 0..dims.height {
            for i in 0..dims.width {
                let idx = dims.cell_index(i, j, k);
                if flags.is_obstacle(idx) {
                    continue;
                }
                // Skip cells clearly away from the surface on the outside
                if phi.at(idx) > 1.0 {
                    continue;
                }
                for dk in 0..disc_z {
                    for dj in 0..disc {
                        for di in 0..disc {
                            let mut pos = Vec3::new(
                                i as f32 + (di as f32 + 0.5) * step,
                                j as f32 + (dj as f32 + 0.5) * step,
                                k as f32 + (dk as f32 + 0.5) * step,
                            );
                            let jitter = Vec3::new(
                                rng.gen_range(-1.0..=1.0),
                                rng.gen_range(-1.0..=1.0),
                                rng.gen_range(-1.0..=1.0),
                            ) * (randomness * 0.5);
                            pos += jitter;
                            if dims.is_2d() {
                                pos.z = 0.5;
                            }
                            if phi.sample(pos) < 0.0 {
                                particles.spawn_at(pos);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridDims;
    use crate::shapes::Shape;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_particles_spawn() {
        let mut particles = Particles::new();
        particles.spawn(Vec3::ONE, Vec3::ZERO);
        particles.spawn_at(Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(particles.len(), 2);
        assert!(particles.is_finite());
    }

    #[test]
    fn test_sampling_fills_fluid_region() {
        let dims = GridDims::new(16, 16, 1);
        let mut flags = FlagGrid::new(dims);
        flags.init_domain(0);
        let phi = Shape::Box {
            min: Vec3::ZERO,
            max: Vec3::new(16.0, 6.0, 1.0),
        }
        .compute_levelset(dims);
        flags.update_from_levelset(&phi);

        let mut particles = Particles::new();
        let mut rng = StdRng::seed_from_u64(7);
        sample_levelset_with_particles(&phi, &flags, &mut particles, 2, 0.05, &mut rng);

        // 14 interior columns x 5 fluid rows x 4 samples per cell
        assert_eq!(particles.len(), 14 * 5 * 4, "got {}", particles.len());
        for p in &particles.list {
            assert!(phi.sample(p.position) < 0.0);
            assert_eq!(p.position.z, 0.5);
            let idx = dims.cell_at(p.position).unwrap();
            assert!(!flags.is_obstacle(idx));
        }
    }
}
