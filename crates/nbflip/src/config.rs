//! Simulation configuration (JSON via serde).

use std::fmt;
use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::clock::ClockSettings;
use crate::constants::{
    DEFAULT_COMBINE_WEIGHT_THRESHOLD, DEFAULT_FLIP_RATIO, DEFAULT_VOLUME_GAIN, MAX_TARGET_FILL,
};
use crate::error::{SimError, SimResult};
use crate::grid::GridDims;
use crate::kernels::TransferKernel;
use crate::pressure::PressureSettings;
use crate::scene::{SceneConfig, ScenePreset};
use crate::serde_utils::vec3;

/// Simulation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Level set only, no particles in the velocity update
    Levelset,
    /// Particles define the surface, PIC velocity refresh
    Flip0,
    /// Full FLIP: particles everywhere in the liquid
    Flip,
    /// Narrow-band FLIP: particles near the surface only
    #[default]
    Nbflip,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Levelset => "levelset",
            Mode::Flip0 => "flip0",
            Mode::Flip => "flip",
            Mode::Nbflip => "nbflip",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub mode: Mode,
    /// 2 or 3
    pub dim: u32,
    /// Cells per side
    pub resolution: usize,
    /// Cells below the surface that carry particles (nbflip)
    pub narrow_band: f32,
    /// Cells below the surface where particle velocities replace grid velocities (nbflip)
    pub combine_band: f32,
    pub combine_weight_threshold: f32,
    pub kernel: TransferKernel,

    pub frame_length: f64,
    pub timestep: f64,
    pub timestep_min: f64,
    pub timestep_max: f64,
    /// Max cells travelled per step; `<= 0` selects fixed stepping
    pub cfl: f64,

    /// Domain units per time unit squared
    #[serde(with = "vec3")]
    pub gravity: Vec3,
    /// Target fluid volume in cells (defaults to the initial volume)
    pub target_volume: Option<f64>,
    pub volume_gain: f32,

    pub flip_ratio: f32,
    pub radius_factor: f32,
    /// Per-cell particle minimum (default `2^dim`)
    pub min_particles: Option<usize>,
    /// Per-cell particle maximum (default `2 * min`)
    pub max_particles: Option<usize>,
    /// Hard cap on the total particle count
    pub max_particle_count: usize,

    pub pressure_accuracy: f64,
    pub pressure_max_iterations: usize,

    /// Seed for particle sampling and resampling jitter
    pub seed: u64,
    pub scene: SceneConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        let clock = ClockSettings::default();
        let pressure = PressureSettings::default();
        Self {
            mode: Mode::Nbflip,
            dim: 2,
            resolution: 64,
            narrow_band: 4.0,
            combine_band: 3.0,
            combine_weight_threshold: DEFAULT_COMBINE_WEIGHT_THRESHOLD,
            kernel: TransferKernel::DLinear,
            frame_length: clock.frame_length,
            timestep: clock.timestep,
            timestep_min: clock.timestep_min,
            timestep_max: clock.timestep_max,
            cfl: clock.cfl,
            gravity: Vec3::new(0.0, -0.003, 0.0),
            target_volume: None,
            volume_gain: DEFAULT_VOLUME_GAIN,
            flip_ratio: DEFAULT_FLIP_RATIO,
            radius_factor: 1.0,
            min_particles: None,
            max_particles: None,
            max_particle_count: 2_000_000,
            pressure_accuracy: pressure.accuracy,
            pressure_max_iterations: pressure.max_iterations,
            seed: 1,
            scene: SceneConfig::drop_into_pool(),
        }
    }
}

impl SimConfig {
    /// Drop into pool with a volume target of 800 cells.
    pub fn drop_into_pool() -> Self {
        Self {
            target_volume: Some(800.0),
            scene: SceneConfig::drop_into_pool(),
            ..Self::default()
        }
    }

    pub fn breaking_dam() -> Self {
        Self {
            scene: SceneConfig::breaking_dam(),
            ..Self::default()
        }
    }

    pub fn preset(preset: ScenePreset) -> Self {
        match preset {
            ScenePreset::DropIntoPool => Self::drop_into_pool(),
            ScenePreset::BreakingDam => Self::breaking_dam(),
        }
    }

    /// Look up a preset by its snake_case name.
    pub fn preset_by_name(name: &str) -> SimResult<Self> {
        match name {
            "drop_into_pool" => Ok(Self::drop_into_pool()),
            "breaking_dam" => Ok(Self::breaking_dam()),
            other => Err(SimError::UnknownPreset(other.to_string())),
        }
    }

    pub fn from_json_str(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load configuration from JSON file
    pub fn load_json(path: &Path) -> SimResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| SimError::io(path, e))?;
        Self::from_json_str(&json)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &Path) -> SimResult<()> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(|e| SimError::io(path, e))
    }

    pub fn dims(&self) -> GridDims {
        GridDims::cubic(self.dim, self.resolution)
    }

    pub fn min_particles(&self) -> usize {
        self.min_particles.unwrap_or(1 << self.dim)
    }

    pub fn max_particles(&self) -> usize {
        self.max_particles.unwrap_or(2 * self.min_particles())
    }

    pub fn clock_settings(&self) -> ClockSettings {
        ClockSettings {
            frame_length: self.frame_length,
            timestep: self.timestep,
            timestep_min: self.timestep_min,
            timestep_max: self.timestep_max,
            cfl: self.cfl,
        }
    }

    pub fn pressure_settings(&self) -> PressureSettings {
        PressureSettings {
            accuracy: self.pressure_accuracy,
            max_iterations: self.pressure_max_iterations,
        }
    }

    /// Return a copy with inconsistent settings repaired.
    ///
    /// Never fails; every adjustment is logged as a warning.
    pub fn normalized(&self) -> Self {
        let mut c = self.clone();
        let defaults = SimConfig::default();

        if c.dim != 2 && c.dim != 3 {
            let dim = if c.dim > 3 { 3 } else { 2 };
            log::warn!("dim {} is not supported; using {}", c.dim, dim);
            c.dim = dim;
        }
        if c.resolution < 8 {
            log::warn!("resolution {} too small; using 8", c.resolution);
            c.resolution = 8;
        }

        if c.mode != Mode::Nbflip && (c.narrow_band != 0.0 || c.combine_band != 0.0) {
            log::warn!(
                "narrow_band {} / combine_band {} ignored for mode {}; using 0",
                c.narrow_band,
                c.combine_band,
                c.mode
            );
            c.narrow_band = 0.0;
            c.combine_band = 0.0;
        }
        if !(c.narrow_band >= 0.0) {
            log::warn!("narrow_band {} must not be negative; using 0", c.narrow_band);
            c.narrow_band = 0.0;
        }
        if !(c.combine_band >= 0.0) {
            log::warn!("combine_band {} must not be negative; using 0", c.combine_band);
            c.combine_band = 0.0;
        }
        if matches!(c.mode, Mode::Levelset | Mode::Flip0) && c.kernel != TransferKernel::DLinear {
            log::warn!("kernel {:?} ignored for mode {}; using d_linear", c.kernel, c.mode);
            c.kernel = TransferKernel::DLinear;
        }

        if !(c.frame_length > 0.0) {
            log::warn!(
                "frame_length {} must be positive; using {}",
                c.frame_length,
                defaults.frame_length
            );
            c.frame_length = defaults.frame_length;
        }
        if c.timestep_min > c.timestep_max {
            log::warn!(
                "timestep_min {} exceeds timestep_max {}; swapping",
                c.timestep_min,
                c.timestep_max
            );
            std::mem::swap(&mut c.timestep_min, &mut c.timestep_max);
        }
        if !(c.timestep_max > 0.0) {
            log::warn!("timestep_max {} must be positive; using frame_length", c.timestep_max);
            c.timestep_max = c.frame_length;
        }
        if !(c.timestep_min > 0.0) {
            let min = c.timestep_max * 0.01;
            log::warn!("timestep_min {} must be positive; using {}", c.timestep_min, min);
            c.timestep_min = min;
        }
        if !(c.timestep > 0.0) {
            log::warn!("timestep {} must be positive; using timestep_max", c.timestep);
            c.timestep = c.timestep_max;
        }
        if !c.cfl.is_finite() {
            log::warn!("cfl {} is not finite; using fixed stepping", c.cfl);
            c.cfl = 0.0;
        }

        if !(0.0..=1.0).contains(&c.flip_ratio) {
            let ratio = if c.flip_ratio.is_nan() {
                DEFAULT_FLIP_RATIO
            } else {
                c.flip_ratio.clamp(0.0, 1.0)
            };
            log::warn!("flip_ratio {} outside [0, 1]; using {}", c.flip_ratio, ratio);
            c.flip_ratio = ratio;
        }
        if !(c.radius_factor > 0.0) {
            log::warn!("radius_factor {} must be positive; using 1", c.radius_factor);
            c.radius_factor = 1.0;
        }
        if let Some(target) = c.target_volume {
            if !(target > 0.0) {
                log::warn!("target_volume {} must be positive; using initial volume", target);
                c.target_volume = None;
            }
        }
        if let Some(target) = c.target_volume {
            let dims = c.dims();
            let (flags, _) = c.scene.build(dims);
            let open = (0..dims.cell_count()).filter(|&idx| !flags.is_obstacle(idx)).count();
            let cap = MAX_TARGET_FILL * open as f64;
            if target > cap {
                log::warn!(
                    "target_volume {} exceeds {} open cells; using {:.1}",
                    target,
                    open,
                    cap
                );
                c.target_volume = Some(cap);
            }
        }
        if c.min_particles() == 0 {
            log::warn!("min_particles 0; using {}", 1 << c.dim);
            c.min_particles = None;
        }
        if c.max_particles() < c.min_particles() {
            let max = 2 * c.min_particles();
            log::warn!(
                "max_particles {} below min_particles {}; using {}",
                c.max_particles(),
                c.min_particles(),
                max
            );
            c.max_particles = Some(max);
        }

        if !(c.pressure_accuracy > 0.0) {
            log::warn!(
                "pressure_accuracy {} must be positive; using {}",
                c.pressure_accuracy,
                defaults.pressure_accuracy
            );
            c.pressure_accuracy = defaults.pressure_accuracy;
        }
        if c.pressure_max_iterations == 0 {
            log::warn!(
                "pressure_max_iterations 0; using {}",
                defaults.pressure_max_iterations
            );
            c.pressure_max_iterations = defaults.pressure_max_iterations;
        }

        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_dimension() {
        let c = SimConfig::default();
        assert_eq!(c.min_particles(), 4);
        assert_eq!(c.max_particles(), 8);
        let c3 = SimConfig {
            dim: 3,
            ..SimConfig::default()
        };
        assert_eq!(c3.min_particles(), 8);
        assert_eq!(c3.max_particles(), 16);
        assert_eq!(c3.dims().depth, 64);
    }

    #[test]
    fn test_normalize_zeroes_bands_outside_nbflip() {
        let c = SimConfig {
            mode: Mode::Flip,
            kernel: TransferKernel::Smooth,
            ..SimConfig::default()
        }
        .normalized();
        assert_eq!(c.narrow_band, 0.0);
        assert_eq!(c.combine_band, 0.0);
        assert_eq!(c.kernel, TransferKernel::Smooth);

        let c = SimConfig {
            mode: Mode::Flip0,
            kernel: TransferKernel::Smooth,
            ..SimConfig::default()
        }
        .normalized();
        assert_eq!(c.kernel, TransferKernel::DLinear);
    }

    #[test]
    fn test_normalize_repairs_bounds() {
        let c = SimConfig {
            dim: 7,
            timestep_min: 3.0,
            timestep_max: 0.5,
            flip_ratio: 1.7,
            max_particles: Some(1),
            ..SimConfig::default()
        }
        .normalized();
        assert_eq!(c.dim, 3);
        assert_eq!((c.timestep_min, c.timestep_max), (0.5, 3.0));
        assert_eq!(c.flip_ratio, 1.0);
        assert_eq!(c.max_particles(), 16);
    }

    #[test]
    fn test_normalize_caps_target_to_open_cells() {
        let c = SimConfig {
            resolution: 16,
            ..SimConfig::drop_into_pool()
        }
        .normalized();
        // 14 x 14 cells inside the walls
        let target = c.target_volume.expect("target dropped");
        assert!((target - 0.9 * 196.0).abs() < 1e-9, "target {}", target);

        let c = SimConfig::drop_into_pool().normalized();
        assert_eq!(c.target_volume, Some(800.0));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c = SimConfig::from_json_str(r#"{"mode":"flip","resolution":32,"gravity":[0,-0.01,0]}"#)
            .unwrap();
        assert_eq!(c.mode, Mode::Flip);
        assert_eq!(c.resolution, 32);
        assert_eq!(c.gravity, Vec3::new(0.0, -0.01, 0.0));
        assert_eq!(c.frame_length, 2.0);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = SimConfig::from_json_str(r#"{"mode":"vortex"}"#).unwrap_err();
        assert!(matches!(err, SimError::Config(_)), "{:?}", err);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(SimConfig::preset_by_name("drop_into_pool").is_ok());
        assert!(matches!(
            SimConfig::preset_by_name("tsunami"),
            Err(SimError::UnknownPreset(_))
        ));
    }
}
