//! Numerical constants shared by the solver stages.

/// Level-set value separating liquid (below) from air.
pub const SURFACE_THRESHOLD: f32 = 0.0;

/// Smallest interface fraction used for ghost-fluid pressure and distance estimates.
pub const MIN_THETA: f32 = 0.01;

/// Default FLIP/PIC blend (0.95 = 95% FLIP, 5% PIC)
pub const DEFAULT_FLIP_RATIO: f32 = 0.95;

/// Default uniform volume-correction gain for the pressure source term.
pub const DEFAULT_VOLUME_GAIN: f32 = 0.01;

/// P2G weight below which the Eulerian velocity is kept in narrow-band mode.
pub const DEFAULT_COMBINE_WEIGHT_THRESHOLD: f32 = 0.1;

/// Inward level-set extrapolation distance for the full-particle modes.
pub const FULL_INSIDE_EXTRAPOLATION: usize = 4;

/// Outward level-set extrapolation distance for all particle modes.
pub const OUTSIDE_EXTRAPOLATION: usize = 3;

/// Sub-cell samples per axis when seeding particles from a level set.
pub const SEED_DISCRETIZATION: usize = 2;

/// Position jitter (in cells) when seeding particles.
pub const SEED_RANDOMNESS: f32 = 0.05;

/// Last-step guard: a step is clipped when it would leave less than this
/// fraction of a step in the frame.
pub const FRAME_END_SLACK: f64 = 1.05;

/// Distance (in cells) up to which fast marching reinitializes the level set.
pub const MARCHING_MAX_DISTANCE: f32 = 4.0;

/// Largest share of the open (non-obstacle) cells a volume target may claim.
pub const MAX_TARGET_FILL: f64 = 0.9;
