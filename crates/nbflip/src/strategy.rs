//! Per-mode pipeline stages.
//!
//! The four simulation variants share one step pipeline (see
//! [`crate::solver`]); they differ only in how the surface is rebuilt, how
//! particle velocities reach the grid, how the velocity field is finished
//! after projection and how particles are updated from the grid.

use crate::config::{Mode, SimConfig};
use crate::constants::{FULL_INSIDE_EXTRAPOLATION, OUTSIDE_EXTRAPOLATION};
use crate::extrapolation::{extrapolate_mac_simple, extrapolation_distance};
use crate::kernels::TransferKernel;
use crate::levelset::{
    extend_into_obstacles, extrapolate_ls_simple, reinit_exact, reinit_marching,
    union_particle_levelset,
};
use crate::spatial::ParticleIndex;
use crate::state::SimulationState;
use crate::transfer::{
    combine_grid_velocity, flip_velocity_update, map_mac_to_particles, map_particles_to_mac,
    replace_fluid_velocity,
};

/// Mode-specific parameters, taken from a normalized config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    pub narrow_band: f32,
    pub combine_band: f32,
    pub combine_weight_threshold: f32,
    pub kernel: TransferKernel,
    pub flip_ratio: f32,
    pub radius_factor: f32,
}

impl StrategyParams {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            narrow_band: config.narrow_band,
            combine_band: config.combine_band,
            combine_weight_threshold: config.combine_weight_threshold,
            kernel: config.kernel,
            flip_ratio: config.flip_ratio,
            radius_factor: config.radius_factor,
        }
    }
}

/// Stages that differ between simulation modes.
pub trait StepStrategy: Send + Sync {
    fn mode(&self) -> Mode;

    /// Rebuild the level set after advection and re-derive the flags.
    ///
    /// Mutates: `phi`, `flags`.
    fn rebuild_surface(&self, state: &mut SimulationState, index: &ParticleIndex);

    /// Bring particle velocities onto the grid and record `vel_old`.
    ///
    /// Mutates: `vel`, `vel_old`.
    fn transfer_velocity(&self, state: &mut SimulationState, index: &ParticleIndex);

    /// Fill air velocities after projection (and reinitialize the level set
    /// where the mode asks for it). `max_vel` is the speed at step start.
    ///
    /// Mutates: `vel`, `phi`.
    fn finish_velocity(&self, state: &mut SimulationState, max_vel: f32);

    /// Update particle velocities from the projected grid.
    ///
    /// Mutates: `particles`.
    fn update_particles(&self, state: &mut SimulationState);

    /// Depth below the surface kept populated with particles (0 = everywhere).
    fn particle_band(&self) -> f32 {
        0.0
    }
}

/// Pick the strategy for the configured mode.
pub fn strategy_for(config: &SimConfig) -> Box<dyn StepStrategy> {
    let params = StrategyParams::from_config(config);
    match config.mode {
        Mode::Levelset => Box::new(LevelsetOnly),
        Mode::Flip0 => Box::new(FlipNoBand { params }),
        Mode::Flip => Box::new(FlipFull { params }),
        Mode::Nbflip => Box::new(FlipNarrowBand { params }),
    }
}

// ============================================================================
// Shared pieces
// ============================================================================

/// Outward extrapolation, obstacle extension and flag update that close every
/// particle-based surface rebuild.
fn close_particle_surface(state: &mut SimulationState) {
    extrapolate_ls_simple(&mut state.phi, OUTSIDE_EXTRAPOLATION, false);
    extend_into_obstacles(&mut state.phi, &state.flags);
    state.flags.update_from_levelset(&state.phi);
}

/// Level set taken entirely from the particles (flip0 and flip).
fn particle_surface(state: &mut SimulationState, index: &ParticleIndex, radius_factor: f32) {
    state.phi = union_particle_levelset(&state.particles, index, &state.flags, radius_factor);
    extrapolate_ls_simple(&mut state.phi, FULL_INSIDE_EXTRAPOLATION, true);
    close_particle_surface(state);
}

/// Marching pass for its velocity transport only, then an exact
/// reinitialization of the untouched level set.
fn reinit_with_transport(state: &mut SimulationState) {
    let backup = state.phi.clone();
    reinit_marching(&mut state.phi, &state.flags, Some(&mut state.vel));
    state.phi = backup;
    reinit_exact(&mut state.phi);
    extend_into_obstacles(&mut state.phi, &state.flags);
}

/// P2G everywhere particles exist: fluid faces take the particle velocity.
fn full_replace(state: &mut SimulationState, index: &ParticleIndex, kernel: TransferKernel) {
    let (vel_parts, _weights) = map_particles_to_mac(&state.particles, index, kernel);
    replace_fluid_velocity(&mut state.vel, &vel_parts, &state.flags);
    state.vel_old.copy_from(&state.vel);
}

// ============================================================================
// Strategies
// ============================================================================

/// Pure level-set liquid; particles ride along but never touch the velocity.
pub struct LevelsetOnly;

impl StepStrategy for LevelsetOnly {
    fn mode(&self) -> Mode {
        Mode::Levelset
    }

    fn rebuild_surface(&self, state: &mut SimulationState, _index: &ParticleIndex) {
        state.flags.update_from_levelset(&state.phi);
    }

    fn transfer_velocity(&self, state: &mut SimulationState, _index: &ParticleIndex) {
        state.vel_old.copy_from(&state.vel);
    }

    fn finish_velocity(&self, state: &mut SimulationState, _max_vel: f32) {
        reinit_with_transport(state);
    }

    fn update_particles(&self, _state: &mut SimulationState) {}
}

/// Particle surface with PIC velocities (no FLIP delta).
pub struct FlipNoBand {
    pub params: StrategyParams,
}

impl StepStrategy for FlipNoBand {
    fn mode(&self) -> Mode {
        Mode::Flip0
    }

    fn rebuild_surface(&self, state: &mut SimulationState, index: &ParticleIndex) {
        particle_surface(state, index, self.params.radius_factor);
    }

    fn transfer_velocity(&self, state: &mut SimulationState, index: &ParticleIndex) {
        full_replace(state, index, TransferKernel::DLinear);
    }

    fn finish_velocity(&self, state: &mut SimulationState, _max_vel: f32) {
        reinit_with_transport(state);
    }

    // Flip ratio 0: particles take the grid velocity
    fn update_particles(&self, state: &mut SimulationState) {
        map_mac_to_particles(&mut state.particles, &state.vel, TransferKernel::DLinear);
    }
}

/// FLIP with particles throughout the liquid.
pub struct FlipFull {
    pub params: StrategyParams,
}

impl StepStrategy for FlipFull {
    fn mode(&self) -> Mode {
        Mode::Flip
    }

    fn rebuild_surface(&self, state: &mut SimulationState, index: &ParticleIndex) {
        particle_surface(state, index, self.params.radius_factor);
    }

    fn transfer_velocity(&self, state: &mut SimulationState, index: &ParticleIndex) {
        full_replace(state, index, self.params.kernel);
    }

    fn finish_velocity(&self, state: &mut SimulationState, max_vel: f32) {
        extrapolate_mac_simple(&state.flags, &mut state.vel, extrapolation_distance(max_vel));
    }

    fn update_particles(&self, state: &mut SimulationState) {
        flip_velocity_update(
            &mut state.particles,
            &state.vel,
            &state.vel_old,
            self.params.flip_ratio,
            self.params.kernel,
        );
    }
}

/// FLIP with particles only in a band below the surface; the deep liquid is
/// carried by the grid alone.
pub struct FlipNarrowBand {
    pub params: StrategyParams,
}

impl StepStrategy for FlipNarrowBand {
    fn mode(&self) -> Mode {
        Mode::Nbflip
    }

    fn rebuild_surface(&self, state: &mut SimulationState, index: &ParticleIndex) {
        let phi_parts =
            union_particle_levelset(&state.particles, index, &state.flags, self.params.radius_factor);
        // Shrink the transported surface slightly so the particles dominate near it
        state.phi.add_const(1.0);
        state.phi.join(&phi_parts);
        let inside = (self.params.narrow_band + 2.0) as usize;
        extrapolate_ls_simple(&mut state.phi, inside, true);
        close_particle_surface(state);
    }

    fn transfer_velocity(&self, state: &mut SimulationState, index: &ParticleIndex) {
        let (vel_parts, weights) = map_particles_to_mac(&state.particles, index, self.params.kernel);
        let replaced = combine_grid_velocity(
            &mut state.vel,
            &vel_parts,
            &weights,
            &state.phi,
            self.params.combine_band,
            self.params.combine_weight_threshold,
        );
        log::debug!("narrow-band combine replaced {} faces", replaced);
        state.vel_old.copy_from(&state.vel);
    }

    fn finish_velocity(&self, state: &mut SimulationState, max_vel: f32) {
        extrapolate_mac_simple(&state.flags, &mut state.vel, extrapolation_distance(max_vel));
    }

    fn update_particles(&self, state: &mut SimulationState) {
        flip_velocity_update(
            &mut state.particles,
            &state.vel,
            &state.vel_old,
            self.params.flip_ratio,
            self.params.kernel,
        );
    }

    fn particle_band(&self) -> f32 {
        self.params.narrow_band
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::ParticleIndex;

    fn state_for(mode: Mode) -> (SimConfig, SimulationState) {
        let config = SimConfig {
            mode,
            resolution: 32,
            ..SimConfig::breaking_dam()
        }
        .normalized();
        let state = SimulationState::new(&config);
        (config, state)
    }

    fn assert_sign_consistent(state: &SimulationState) {
        for idx in 0..state.dims().cell_count() {
            if state.flags.is_obstacle(idx) {
                continue;
            }
            assert_eq!(
                state.flags.is_fluid(idx),
                state.phi.at(idx) < 0.0,
                "flag/phi mismatch at cell {} (phi {})",
                idx,
                state.phi.at(idx)
            );
        }
    }

    #[test]
    fn test_strategy_matches_mode() {
        for mode in [Mode::Levelset, Mode::Flip0, Mode::Flip, Mode::Nbflip] {
            let config = SimConfig {
                mode,
                ..SimConfig::default()
            };
            assert_eq!(strategy_for(&config).mode(), mode);
        }
    }

    #[test]
    fn test_surface_rebuild_keeps_flags_consistent() {
        for mode in [Mode::Levelset, Mode::Flip0, Mode::Flip, Mode::Nbflip] {
            let (config, mut state) = state_for(mode);
            let strategy = strategy_for(&config);
            let index = ParticleIndex::build(&state.particles, state.dims());
            strategy.rebuild_surface(&mut state, &index);
            assert_sign_consistent(&state);
            let volume = state.fluid_volume() as f64;
            assert!(
                (volume - state.target_volume).abs() < 0.1 * state.target_volume,
                "{}: volume {} vs {}",
                mode,
                volume,
                state.target_volume
            );
        }
    }

    #[test]
    fn test_flip0_surface_follows_radius_factor() {
        let (config, state) = state_for(Mode::Flip0);
        let index = ParticleIndex::build(&state.particles, state.dims());
        let volume_for = |radius_factor: f32| {
            let config = SimConfig {
                radius_factor,
                ..config.clone()
            };
            let mut state = state.clone();
            strategy_for(&config).rebuild_surface(&mut state, &index);
            state.fluid_volume()
        };
        let (thin, wide) = (volume_for(1.0), volume_for(2.5));
        assert!(wide > thin, "radius factor ignored: {} vs {}", wide, thin);
    }

    #[test]
    fn test_narrow_band_keeps_deep_levelset() {
        let (config, mut state) = state_for(Mode::Nbflip);
        // Drop every particle: the surface must survive from the transported level set
        state.particles.list.clear();
        let before = state.fluid_volume();
        let index = ParticleIndex::build(&state.particles, state.dims());
        strategy_for(&config).rebuild_surface(&mut state, &index);
        let after = state.fluid_volume();
        assert!(after > 0, "liquid vanished without particles");
        assert!(after <= before);
    }

    #[test]
    fn test_full_replace_overwrites_fluid_faces() {
        let (config, mut state) = state_for(Mode::Flip);
        for p in &mut state.particles.list {
            p.velocity = glam::Vec3::new(0.5, 0.0, 0.0);
        }
        let index = ParticleIndex::build(&state.particles, state.dims());
        strategy_for(&config).transfer_velocity(&mut state, &index);
        let dims = state.dims();
        let f = dims.face_index(crate::grid::Axis::X, 5, 5, 0);
        assert!((state.vel.component(crate::grid::Axis::X)[f] - 0.5).abs() < 1e-5);
        assert_eq!(state.vel.component(crate::grid::Axis::X), state.vel_old.component(crate::grid::Axis::X));
    }
}
