//! Owned simulation state.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::clock::SimulationClock;
use crate::config::{Mode, SimConfig};
use crate::constants::{SEED_DISCRETIZATION, SEED_RANDOMNESS};
use crate::grid::{FlagGrid, GridDims, LevelSet, MacGrid, ScalarGrid};
use crate::levelset::extend_into_obstacles;
use crate::measure::fluid_volume;
use crate::particle::{sample_levelset_with_particles, Particles};
use crate::transfer::map_mac_to_particles;

/// Everything a step reads and writes.
///
/// `Clone` so a failed step can be rolled back and retried.
#[derive(Clone)]
pub struct SimulationState {
    pub flags: FlagGrid,
    /// Level set, negative inside the liquid
    pub phi: LevelSet,
    pub vel: MacGrid,
    /// Grid velocity right after the particle transfer (FLIP reference)
    pub vel_old: MacGrid,
    pub pressure: ScalarGrid,
    pub particles: Particles,
    pub clock: SimulationClock,
    /// Fluid volume in cells the pressure source steers towards
    pub target_volume: f64,
    /// Drives particle resampling
    pub rng: StdRng,
}

impl SimulationState {
    /// Build the scene, seed particles inside the liquid and apply the
    /// initial velocity. `config` is expected to be normalized.
    pub fn new(config: &SimConfig) -> Self {
        let dims = config.dims();
        let (flags, mut phi) = config.scene.build(dims);
        extend_into_obstacles(&mut phi, &flags);

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut particles = Particles::new();
        sample_levelset_with_particles(
            &phi,
            &flags,
            &mut particles,
            SEED_DISCRETIZATION,
            SEED_RANDOMNESS,
            &mut rng,
        );

        let mut vel = MacGrid::new(dims);
        config.scene.apply_initial_velocity(&mut vel);
        if config.mode != Mode::Levelset {
            map_mac_to_particles(&mut particles, &vel, config.kernel);
        }

        let initial_volume = fluid_volume(&flags);
        let target_volume = config.target_volume.unwrap_or(initial_volume as f64);
        log::info!(
            "initialized {} {}D {}x{}x{}: {} fluid cells, {} particles, target volume {}",
            config.mode,
            dims.dim(),
            dims.width,
            dims.height,
            dims.depth,
            initial_volume,
            particles.len(),
            target_volume
        );

        Self {
            flags,
            phi,
            vel_old: vel.clone(),
            vel,
            pressure: ScalarGrid::new(dims, 0.0),
            particles,
            clock: SimulationClock::new(config.clock_settings()),
            target_volume,
            rng,
        }
    }

    #[inline]
    pub fn dims(&self) -> GridDims {
        self.flags.dims()
    }

    pub fn fluid_volume(&self) -> usize {
        fluid_volume(&self.flags)
    }

    /// Particles whose position lies in an obstacle cell (or outside the grid).
    pub fn particles_in_obstacles(&self) -> usize {
        let dims = self.dims();
        self.particles
            .list
            .iter()
            .filter(|p| match dims.cell_at(p.position) {
                Some(cell) => self.flags.is_obstacle(cell),
                None => true,
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_matches_scene() {
        let config = SimConfig::drop_into_pool().normalized();
        let state = SimulationState::new(&config);
        assert_eq!(state.target_volume, 800.0);
        assert!(state.particles.len() > 3 * state.fluid_volume());
        assert_eq!(state.particles_in_obstacles(), 0);
        // Drop particles carry the initial downward velocity
        let falling = state
            .particles
            .list
            .iter()
            .filter(|p| p.position.y > 40.0)
            .all(|p| p.velocity.y < -0.03);
        assert!(falling);
    }

    #[test]
    fn test_target_defaults_to_initial_volume() {
        let config = SimConfig::breaking_dam().normalized();
        let state = SimulationState::new(&config);
        assert_eq!(state.target_volume, state.fluid_volume() as f64);
    }

    #[test]
    fn test_same_seed_same_particles() {
        let config = SimConfig::drop_into_pool().normalized();
        let a = SimulationState::new(&config);
        let b = SimulationState::new(&config);
        assert_eq!(a.particles.list, b.particles.list);
    }
}
