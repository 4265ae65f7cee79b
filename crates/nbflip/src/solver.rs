//! Time stepping: per-step pipeline, retry policy and the frame loop.
//!
//! Step order:
//! 1. advect particles, level set and velocity
//! 2. rebuild the surface (mode specific)
//! 3. transfer particle velocities to the grid (mode specific)
//! 4. gravity, wall conditions and pressure projection with volume correction
//! 5. finish the velocity field and update particles (mode specific)
//! 6. resample particles
//!
//! A step that fails is rolled back, retried once with half the step size and
//! then reported as [`SimError::Aborted`].

use crate::advection::{advect_particles, advect_scalar, advect_velocity};
use crate::boundary::{add_gravity, set_wall_bcs};
use crate::config::{Mode, SimConfig};
use crate::density::{adjust_particle_count, DensityReport, DensitySettings};
use crate::error::{NumericalError, SimError, SimResult, Stage, StageError};
use crate::levelset::{extend_into_obstacles, surface_distance};
use crate::measure::{fluid_volume, total_energy};
use crate::pressure::{solve_pressure, SolveReport};
use crate::spatial::ParticleIndex;
use crate::state::SimulationState;
use crate::stats::{FrameRecord, FrameSink};
use crate::strategy::{strategy_for, StepStrategy};

/// What one committed step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Step size actually used
    pub dt: f64,
    /// Step succeeded only after halving the step size
    pub retried: bool,
    /// Grid speed at step start (cells per time unit)
    pub max_velocity: f32,
    pub volume: usize,
    pub pressure: SolveReport,
    pub density: DensityReport,
}

/// Uniform per-cell divergence source steering the fluid volume towards `target`.
pub fn volume_correction(gain: f32, target: f64, volume: usize) -> f32 {
    if volume == 0 {
        return 0.0;
    }
    (gain as f64 * (target - volume as f64) / volume as f64) as f32
}

fn ensure_finite(stage: Stage, field: &'static str, finite: bool) -> Result<(), StageError> {
    if finite {
        Ok(())
    } else {
        Err(StageError::new(stage, NumericalError::NonFinite { field }))
    }
}

/// Narrow-band FLIP liquid solver.
pub struct Solver {
    config: SimConfig,
    strategy: Box<dyn StepStrategy>,
    state: SimulationState,
}

impl Solver {
    /// Normalize `config` and set up the initial scene.
    pub fn new(config: SimConfig) -> Self {
        let config = config.normalized();
        let strategy = strategy_for(&config);
        let state = SimulationState::new(&config);
        Self {
            config,
            strategy,
            state,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.strategy.mode()
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn is_frame_complete(&self) -> bool {
        self.state.clock.is_frame_complete()
    }

    /// Advance by one step: choose the step size, run the pipeline and commit.
    ///
    /// Starts the next frame first when the current one is already complete.
    pub fn advance_step(&mut self) -> SimResult<StepReport> {
        if self.state.clock.is_frame_complete() {
            self.state.clock.start_next_frame();
        }

        let max_vel = self.state.vel.max_magnitude();
        let dt = self.state.clock.choose_step(max_vel);
        let snapshot = self.state.clone();

        let (mut report, retried) = match self.run_pipeline(dt, max_vel) {
            Ok(report) => (report, false),
            Err(first) => {
                let frame = self.state.clock.frame();
                let step = self.state.clock.steps_in_frame();
                self.state = snapshot.clone();
                let halved = self.state.clock.halve_step();
                log::warn!(
                    "frame {} step {}: {}; retrying with dt {:.4}",
                    frame,
                    step,
                    first,
                    halved
                );
                match self.run_pipeline(halved, max_vel) {
                    Ok(report) => (report, true),
                    Err(second) => {
                        self.state = snapshot;
                        log::error!("frame {} step {}: {}; aborting", frame, step, second);
                        return Err(SimError::Aborted {
                            stage: second.stage,
                            frame,
                            step,
                            source: second.source,
                        });
                    }
                }
            }
        };
        report.retried = retried;

        self.state.clock.commit_step();
        log::debug!(
            "frame {} step {}: dt {:.4}, max vel {:.3}, volume {}, pressure iters {}, particles {} (+{} -{})",
            self.state.clock.frame(),
            self.state.clock.steps_in_frame(),
            report.dt,
            report.max_velocity,
            report.volume,
            report.pressure.iterations,
            self.state.particles.len(),
            report.density.added,
            report.density.removed_invalid + report.density.removed_excess
        );
        Ok(report)
    }

    /// One pass of the pipeline with step size `dt`. Leaves the state
    /// partially updated on error; the caller restores it.
    fn run_pipeline(&mut self, dt: f64, max_vel: f32) -> Result<StepReport, StageError> {
        let config = &self.config;
        let strategy = self.strategy.as_ref();
        let state = &mut self.state;
        let dt32 = dt as f32;

        // Advection
        advect_particles(&mut state.particles, &state.flags, &state.vel, dt32);
        advect_scalar(&state.flags, &state.vel, &mut state.phi, dt32, 1);
        extend_into_obstacles(&mut state.phi, &state.flags);
        state.flags.update_from_levelset(&state.phi);
        advect_velocity(&mut state.vel, dt32, 2);
        ensure_finite(Stage::Advection, "particles", state.particles.is_finite())?;
        ensure_finite(Stage::Advection, "level set", state.phi.is_finite())?;
        ensure_finite(Stage::Advection, "velocity", state.vel.is_finite())?;

        // Surface
        let index = ParticleIndex::build(&state.particles, state.dims());
        strategy.rebuild_surface(state, &index);
        ensure_finite(Stage::Surface, "level set", state.phi.is_finite())?;

        // Transfer
        strategy.transfer_velocity(state, &index);
        ensure_finite(Stage::Transfer, "velocity", state.vel.is_finite())?;

        // Forces and projection
        add_gravity(&state.flags, &mut state.vel, config.gravity, dt32);
        set_wall_bcs(&state.flags, &mut state.vel);
        let volume = fluid_volume(&state.flags);
        let correction = volume_correction(config.volume_gain, state.target_volume, volume);
        let pressure = solve_pressure(
            &mut state.vel,
            &mut state.pressure,
            &state.flags,
            Some(&state.phi),
            correction,
            &config.pressure_settings(),
        )
        .map_err(|e| StageError::new(Stage::Projection, e))?;
        set_wall_bcs(&state.flags, &mut state.vel);

        // Extrapolation and particle update
        strategy.finish_velocity(state, max_vel);
        strategy.update_particles(state);
        ensure_finite(Stage::Extrapolation, "velocity", state.vel.is_finite())?;
        ensure_finite(Stage::Extrapolation, "level set", state.phi.is_finite())?;
        ensure_finite(Stage::Extrapolation, "particles", state.particles.is_finite())?;

        // Density control
        let settings = DensitySettings {
            min_per_cell: config.min_particles(),
            max_per_cell: config.max_particles(),
            narrow_band: strategy.particle_band(),
            surface_distance: surface_distance(state.dims(), config.radius_factor),
            max_total: config.max_particle_count,
            kernel: config.kernel,
        };
        let density = adjust_particle_count(
            &mut state.particles,
            &state.flags,
            &state.phi,
            &state.vel,
            &settings,
            &mut state.rng,
        );
        ensure_finite(Stage::Density, "particles", state.particles.is_finite())?;

        Ok(StepReport {
            dt,
            retried: false,
            max_velocity: max_vel,
            volume,
            pressure,
            density,
        })
    }

    /// Step until the current frame is complete and summarize it.
    pub fn run_frame(&mut self) -> SimResult<FrameRecord> {
        if self.state.clock.is_frame_complete() {
            self.state.clock.start_next_frame();
        }
        let frame = self.state.clock.frame();
        let mut retries = 0;
        let mut pressure_iterations = 0;
        while !self.state.clock.is_frame_complete() {
            let report = self.advance_step()?;
            retries += report.retried as u32;
            pressure_iterations = pressure_iterations.max(report.pressure.iterations);
        }

        let state = &self.state;
        let record = FrameRecord {
            mode: self.mode(),
            frame,
            time: state.clock.total_time(),
            steps: state.clock.steps_in_frame(),
            retries,
            volume: fluid_volume(&state.flags),
            energy: total_energy(&state.flags, &state.vel, self.config.gravity),
            particles: state.particles.len(),
            max_velocity: state.vel.max_magnitude(),
            pressure_iterations,
        };
        log::info!(
            "frame {}: t = {:.2}, {} steps, volume {}, energy {:.3}, {} particles",
            record.frame,
            record.time,
            record.steps,
            record.volume,
            record.energy,
            record.particles
        );
        Ok(record)
    }

    /// Run `frames` frames, handing each record to `sink` once it commits.
    pub fn run<S: FrameSink + ?Sized>(&mut self, frames: u32, sink: &mut S) -> SimResult<()> {
        for _ in 0..frames {
            let record = self.run_frame()?;
            sink.record(&record, &self.state.particles)?;
        }
        Ok(())
    }
}
