//! The "MOTION" Engine - Kinematic Bicycle Model and Observation Variants
//!
//! State layout (6-D): `[x, y, heading, velocity, steering_angle, acceleration]`.
//!
//! The steering angle is latent: no data source measures it, it is only
//! inferred through its effect on the heading. Headings are propagated
//! unwrapped and only wrapped into (−π, π] when a consumer reads them.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::SmoothingError;
use crate::track::Measurement;

/// Dimension of the kinematic state.
pub const STATE_DIM: usize = 6;

/// Index of each component in the state vector.
pub mod idx {
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const HEADING: usize = 2;
    pub const VELOCITY: usize = 3;
    pub const STEERING: usize = 4;
    pub const ACCELERATION: usize = 5;
}

/// Wraps an angle into (−π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(2.0 * PI);
    if wrapped > PI {
        wrapped - 2.0 * PI
    } else {
        wrapped
    }
}

// ============================================================================
// VEHICLE STATE
// ============================================================================

/// Typed view of one 6-D state estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, unwrapped
    pub heading: f64,
    /// Forward velocity in m/s
    pub velocity: f64,
    /// Latent front-wheel steering angle in radians
    pub steering_angle: f64,
    /// Forward acceleration in m/s²
    pub acceleration: f64,
}

impl VehicleState {
    /// Reads a state vector laid out as documented in this module.
    pub fn from_vector(state: &DVector<f64>) -> Self {
        Self {
            x: state[idx::X],
            y: state[idx::Y],
            heading: state[idx::HEADING],
            velocity: state[idx::VELOCITY],
            steering_angle: state[idx::STEERING],
            acceleration: state[idx::ACCELERATION],
        }
    }

    /// Packs the state back into a vector.
    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.x,
            self.y,
            self.heading,
            self.velocity,
            self.steering_angle,
            self.acceleration,
        ])
    }

    /// Heading wrapped into (−π, π].
    pub fn heading_wrapped(&self) -> f64 {
        wrap_angle(self.heading)
    }
}

// ============================================================================
// MOTION MODEL
// ============================================================================

/// Front-axle kinematic bicycle model.
///
/// ```text
/// x' = x + v·cos(θ+δ)·Δt + ½·a·cos(θ+δ)·Δt²
/// y' = y + v·sin(θ+δ)·Δt + ½·a·sin(θ+δ)·Δt²
/// θ' = θ + v·sin(δ)/L·Δt
/// v' = v + a·Δt
/// δ' = δ,  a' = a
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BicycleModel {
    /// Wheelbase L in meters
    pub wheelbase: f64,

    /// Time step Δt in seconds
    pub dt: f64,
}

impl BicycleModel {
    /// Creates a model with an explicit wheelbase.
    pub fn new(wheelbase: f64, dt: f64) -> Self {
        Self { wheelbase, dt }
    }

    /// Creates a model whose wheelbase is `fraction` of the vehicle length.
    pub fn from_vehicle_length(length: f64, fraction: f64, dt: f64) -> Self {
        Self::new(length * fraction, dt)
    }

    /// Predicts the state one time step ahead.
    pub fn transition(&self, state: &DVector<f64>) -> DVector<f64> {
        let dt = self.dt;
        let heading = state[idx::HEADING];
        let velocity = state[idx::VELOCITY];
        let steering = state[idx::STEERING];
        let acceleration = state[idx::ACCELERATION];

        let course = heading + steering;
        let travelled = velocity * dt + 0.5 * acceleration * dt * dt;

        let mut next = state.clone();
        next[idx::X] += course.cos() * travelled;
        next[idx::Y] += course.sin() * travelled;
        next[idx::HEADING] += velocity * steering.sin() / self.wheelbase * dt;
        next[idx::VELOCITY] += acceleration * dt;
        next
    }
}

// ============================================================================
// OBSERVATION MODEL
// ============================================================================

/// Measurement layout of a data source.
///
/// Passed into the smoothing engine as a strategy so a single engine serves
/// every dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationVariant {
    /// NGSIM-like: `[x, y, v, a]`
    #[serde(alias = "ngsim")]
    FourDim,

    /// pNeuma-like: `[x, y, v]`
    #[serde(alias = "pneuma")]
    ThreeDim,
}

impl ObservationVariant {
    /// State indices that are measured, in measurement order.
    pub fn observed_indices(&self) -> &'static [usize] {
        match self {
            ObservationVariant::FourDim => &[idx::X, idx::Y, idx::VELOCITY, idx::ACCELERATION],
            ObservationVariant::ThreeDim => &[idx::X, idx::Y, idx::VELOCITY],
        }
    }

    /// Measurement dimension.
    pub fn dim(&self) -> usize {
        self.observed_indices().len()
    }

    /// True if acceleration is part of the measurement.
    pub fn observes_acceleration(&self) -> bool {
        matches!(self, ObservationVariant::FourDim)
    }

    /// Process noise magnitude used by the source datasets.
    pub fn default_process_noise(&self) -> f64 {
        match self {
            ObservationVariant::FourDim => 0.005,
            ObservationVariant::ThreeDim => 0.001,
        }
    }

    /// Short dataset-family name.
    pub fn name(&self) -> &'static str {
        match self {
            ObservationVariant::FourDim => "ngsim",
            ObservationVariant::ThreeDim => "pneuma",
        }
    }

    /// Maps a state to its predicted measurement.
    pub fn observe(&self, state: &DVector<f64>) -> DVector<f64> {
        let indices = self.observed_indices();
        DVector::from_iterator(indices.len(), indices.iter().map(|&i| state[i]))
    }

    /// Builds the measurement vector of a raw sample.
    ///
    /// A field required by this variant that is missing or non-finite is a
    /// caller contract violation.
    pub fn measurement_vector(&self, sample: &Measurement) -> Result<DVector<f64>, SmoothingError> {
        let speed = sample.speed.ok_or_else(|| {
            SmoothingError::malformed(format!("frame {}: speed is missing", sample.frame))
        })?;

        let mut values = vec![sample.x, sample.y, speed];
        if self.observes_acceleration() {
            let acceleration = sample.acceleration.ok_or_else(|| {
                SmoothingError::malformed(format!("frame {}: acceleration is missing", sample.frame))
            })?;
            values.push(acceleration);
        }

        if values.iter().any(|v| !v.is_finite()) {
            return Err(SmoothingError::malformed(format!(
                "frame {}: non-finite measurement",
                sample.frame
            )));
        }

        Ok(DVector::from_vec(values))
    }
}
