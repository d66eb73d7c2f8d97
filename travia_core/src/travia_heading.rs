//! Initial state estimation from the first samples of a track.
//!
//! Raw data carries no heading, so the filter is seeded with the direction of
//! the first meter of travel. It does not matter how many frames that takes.

use nalgebra::DVector;

use crate::error::SmoothingError;
use crate::track::Measurement;
use crate::travia_motion::{idx, ObservationVariant, STATE_DIM};

/// Straight-line displacement (meters) used for the heading estimate.
pub const HEADING_ESTIMATION_DISTANCE: f64 = 1.0;

/// Estimates the initial heading of a vehicle.
///
/// Walks forward from the first sample until the displacement from the first
/// point reaches [`HEADING_ESTIMATION_DISTANCE`] and returns the direction of
/// that displacement. If the track ends first, whatever displacement exists at
/// the last sample is used; a track that never moves yields `0.0`.
pub fn estimate_initial_heading(samples: &[Measurement]) -> f64 {
    let Some(first) = samples.first() else {
        return 0.0;
    };

    let mut dx = 0.0;
    let mut dy = 0.0;
    for sample in &samples[1..] {
        if f64::hypot(dx, dy) >= HEADING_ESTIMATION_DISTANCE {
            break;
        }
        dx = sample.x - first.x;
        dy = sample.y - first.y;
    }

    dy.atan2(dx)
}

/// Assembles the initial state mean
/// `[x₀, y₀, heading, v₀, 0, a₀]`, with `a₀ = 0` when the variant does not
/// measure acceleration.
pub fn initial_state_mean(
    samples: &[Measurement],
    variant: ObservationVariant,
) -> Result<DVector<f64>, SmoothingError> {
    let first = samples
        .first()
        .ok_or_else(|| SmoothingError::malformed("cannot initialise an empty track"))?;
    let observed = variant.measurement_vector(first)?;

    let mut mean = DVector::zeros(STATE_DIM);
    mean[idx::X] = first.x;
    mean[idx::Y] = first.y;
    mean[idx::HEADING] = estimate_initial_heading(samples);
    mean[idx::VELOCITY] = observed[2];
    mean[idx::STEERING] = 0.0;
    if variant.observes_acceleration() {
        mean[idx::ACCELERATION] = observed[3];
    }

    Ok(mean)
}
