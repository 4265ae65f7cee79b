//! Error types for the solver and its process boundary.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Pipeline stage a step failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Advection,
    Surface,
    Transfer,
    Projection,
    Extrapolation,
    Density,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Advection => "advection",
            Stage::Surface => "surface reconstruction",
            Stage::Transfer => "velocity transfer",
            Stage::Projection => "pressure projection",
            Stage::Extrapolation => "velocity extrapolation",
            Stage::Density => "density control",
        };
        f.write_str(name)
    }
}

/// Recoverable numerical failure inside a single step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NumericalError {
    #[error("pressure solve did not converge after {iterations} iterations (residual {residual:.3e})")]
    PressureNotConverged { iterations: usize, residual: f64 },

    #[error("non-finite values in {field}")]
    NonFinite { field: &'static str },
}

/// A numerical failure tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage}: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: NumericalError,
}

impl StageError {
    pub fn new(stage: Stage, source: NumericalError) -> Self {
        Self { stage, source }
    }
}

/// Top-level simulation error.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Malformed configuration file
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("unknown scene preset '{0}' (expected drop_into_pool or breaking_dam)")]
    UnknownPreset(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A step failed twice in a row (original and halved step size)
    #[error("simulation aborted at frame {frame}, step {step} during {stage}: {source}")]
    Aborted {
        stage: Stage,
        frame: u32,
        step: u32,
        #[source]
        source: NumericalError,
    },
}

impl SimError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_display_names_stage() {
        let err = SimError::Aborted {
            stage: Stage::Projection,
            frame: 3,
            step: 7,
            source: NumericalError::PressureNotConverged {
                iterations: 500,
                residual: 0.25,
            },
        };
        let text = err.to_string();
        assert!(text.contains("frame 3"), "{}", text);
        assert!(text.contains("pressure projection"), "{}", text);
        assert!(text.contains("500 iterations"), "{}", text);
    }
}
