//! Error types for the trajectory reconstruction engine.

use std::fmt;
use thiserror::Error;

/// Stage of the smoothing run in which a numerical failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingPhase {
    /// Forward (filter) pass
    Filter,
    /// Backward (smoothing) pass
    Smoother,
}

impl fmt::Display for SmoothingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmoothingPhase::Filter => write!(f, "filter"),
            SmoothingPhase::Smoother => write!(f, "smoother"),
        }
    }
}

/// Failures of the symmetric positive-definite decomposition layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinalgError {
    /// Cholesky factorisation failed
    #[error("matrix is not positive definite")]
    NotPositiveDefinite,

    /// Matrix could not be inverted
    #[error("matrix is singular")]
    Singular,

    /// NaN or infinity appeared in an input or result
    #[error("matrix contains non-finite values")]
    NonFinite,

    /// Shapes do not line up
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Per-track errors. None of these abort a batch; the orchestrator records
/// them against the vehicle and carries on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SmoothingError {
    /// Too few samples to support the 6-dimensional state estimate.
    #[error("track has {samples} samples, at least {min_samples} are required")]
    TrackTooShort { samples: usize, min_samples: usize },

    /// A covariance required for a gain or recombination was not invertible.
    #[error("numerical instability in {phase} at step {step}: {reason}")]
    NumericalInstability {
        phase: SmoothingPhase,
        step: usize,
        reason: LinalgError,
    },

    /// Caller contract violation (frame order, missing fields, NaN input).
    #[error("malformed track: {0}")]
    MalformedTrack(String),
}

impl SmoothingError {
    /// Creates a malformed-track error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedTrack(msg.into())
    }

    /// Creates a numerical-instability error for the given step.
    pub fn unstable(phase: SmoothingPhase, step: usize, reason: LinalgError) -> Self {
        Self::NumericalInstability { phase, step, reason }
    }

    /// Short machine-friendly tag for reports and exports.
    pub fn kind(&self) -> &'static str {
        match self {
            SmoothingError::TrackTooShort { .. } => "track_too_short",
            SmoothingError::NumericalInstability { .. } => "numerical_instability",
            SmoothingError::MalformedTrack(_) => "malformed_track",
        }
    }
}
