//! Travia Core - Vehicle Trajectory Reconstruction
//!
//! Turns noisy per-frame vehicle positions into smooth, physically plausible
//! trajectories with a latent heading:
//! 1. **Motion**: front-axle kinematic bicycle model over a 6-D state
//! 2. **Estimation**: additive unscented Kalman filter and RTS smoother
//! 3. **Orchestration**: independent per-track smoothing into a shared table

pub mod error;
pub mod track;
pub mod travia_heading;
pub mod travia_linalg;
pub mod travia_motion;
pub mod travia_smoothing;
pub mod travia_unscented;

// Re-export key types for convenience
pub use error::{LinalgError, SmoothingError, SmoothingPhase};
pub use track::{Dataset, Measurement, Track, VehicleId, VehicleType};
pub use travia_heading::{estimate_initial_heading, initial_state_mean};
pub use travia_linalg::{CholeskyDecomposition, SpdDecomposition, SymmetricEigenDecomposition};
pub use travia_motion::{wrap_angle, BicycleModel, ObservationVariant, VehicleState, STATE_DIM};
pub use travia_smoothing::{
    DecompositionKind, Pose, SmoothedTable, SmoothedTrack, SmootherConfig, SmoothingOutput,
    SmoothingReport, TrackOutcome, TrajectorySmoother, VehicleParameters,
};
pub use travia_unscented::{Moments, SigmaParams, SigmaPoints, UnscentedSmoother};
