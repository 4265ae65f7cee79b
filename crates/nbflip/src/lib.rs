//! Narrow-band FLIP liquid simulation
//!
//! A hybrid particle/grid solver for incompressible liquids on a MAC grid.
//! The free surface is a level set; FLIP particles carry velocity only in a
//! band below the surface, while the deep liquid is advanced on the grid.
//! The same pipeline also runs as a pure level-set solver (`levelset`), a PIC
//! variant with a particle surface (`flip0`) and full FLIP (`flip`).
//!
//! # Example
//!
//! ```
//! use nbflip::{Mode, SimConfig, Solver};
//!
//! let config = SimConfig {
//!     mode: Mode::Nbflip,
//!     resolution: 32,
//!     ..SimConfig::breaking_dam()
//! };
//! let mut solver = Solver::new(config);
//!
//! // One step, then finish the frame
//! solver.advance_step().unwrap();
//! let record = solver.run_frame().unwrap();
//! assert!(record.volume > 0);
//! ```

pub mod advection;
pub mod boundary;
pub mod clock;
pub mod config;
pub mod constants;
pub mod density;
pub mod error;
pub mod extrapolation;
pub mod grid;
pub mod kernels;
pub mod levelset;
pub mod measure;
pub mod particle;
pub mod pressure;
pub mod scene;
pub mod serde_utils;
pub mod shapes;
pub mod solver;
pub mod spatial;
pub mod state;
pub mod stats;
pub mod strategy;
pub mod transfer;

pub use clock::{ClockSettings, SimulationClock};
pub use config::{Mode, SimConfig};
pub use error::{NumericalError, SimError, SimResult, Stage};
pub use glam::Vec3;
pub use grid::{Axis, CellFlag, FlagGrid, GridDims, LevelSet, MacGrid, ScalarGrid};
pub use kernels::TransferKernel;
pub use particle::{Particle, Particles};
pub use scene::{SceneConfig, ScenePreset, VelocityRegion};
pub use shapes::Shape;
pub use solver::{Solver, StepReport};
pub use state::SimulationState;
pub use stats::{FileSink, FrameRecord, FrameSink, ParticleSnapshot, StatsWriter};
pub use strategy::StepStrategy;
