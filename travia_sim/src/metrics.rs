//! Ground truth comparison of smoothed trajectories.
//!
//! Key metrics:
//! - Position error (RMSE, max) of smoothed and raw positions
//! - Heading error, wrapped, for moving vehicles
//! - Velocity error
//! - Track outcome counts

use serde::Serialize;
use std::collections::BTreeMap;

use travia_core::{wrap_angle, Dataset, SmoothingOutput};

use crate::oracle::Oracle;

/// Below this true speed (m/s) the heading is not scored.
pub const MIN_SCORED_SPEED: f64 = 0.5;

// =============================================================================
// ERROR STATISTICS
// =============================================================================

/// Running RMSE / max of one error quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    /// Number of recorded errors
    pub count: usize,
    /// Sum of squared errors
    pub sum_squared: f64,
    /// Largest absolute error
    pub max: f64,
}

impl ErrorStats {
    pub fn record(&mut self, error: f64) {
        self.count += 1;
        self.sum_squared += error * error;
        self.max = self.max.max(error.abs());
    }

    /// Root mean square error, 0 when nothing was recorded.
    pub fn rmse(&self) -> f64 {
        if self.count > 0 {
            (self.sum_squared / self.count as f64).sqrt()
        } else {
            0.0
        }
    }
}

// =============================================================================
// SCENARIO METRICS
// =============================================================================

/// Metrics collected for one scenario run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub tracks_total: usize,
    pub tracks_smoothed: usize,
    pub tracks_skipped: usize,
    pub tracks_unprocessed: usize,
    pub frames_smoothed: usize,

    /// Smoothed position vs truth
    pub position: ErrorStats,

    /// Raw measured position vs truth, over the smoothed frames only
    pub raw_position: ErrorStats,

    /// Wrapped heading vs truth
    pub heading: ErrorStats,

    /// Velocity vs truth
    pub velocity: ErrorStats,

    /// Skipped tracks per error kind
    pub failures_by_kind: BTreeMap<String, usize>,
}

impl ScenarioMetrics {
    /// Compares a smoothing output to the oracle's ground truth.
    pub fn evaluate(oracle: &Oracle, dataset: &Dataset, output: &SmoothingOutput) -> Self {
        let report = &output.report;
        let mut metrics = ScenarioMetrics {
            tracks_total: report.total_tracks(),
            tracks_smoothed: report.smoothed_tracks(),
            tracks_skipped: report.failure_count(),
            tracks_unprocessed: report.unprocessed().len(),
            frames_smoothed: report.smoothed_frames(),
            failures_by_kind: report
                .failures_by_kind()
                .into_iter()
                .map(|(kind, n)| (kind.to_string(), n))
                .collect(),
            ..Default::default()
        };

        // Dataset order keeps the float sums reproducible
        for track in &dataset.tracks {
            let (Some(truth), Some(smoothed)) = (
                oracle.vehicle(track.vehicle_id),
                output.table.get(track.vehicle_id),
            ) else {
                continue;
            };

            for (frame, state) in smoothed.iter() {
                let (Some(exact), Some(raw)) = (truth.sample_at(frame), track.sample_at(frame)) else {
                    continue;
                };

                metrics.position.record((state.x - exact.x).hypot(state.y - exact.y));
                metrics.raw_position.record((raw.x - exact.x).hypot(raw.y - exact.y));
                metrics.velocity.record(state.velocity - exact.velocity);
                if exact.velocity >= MIN_SCORED_SPEED {
                    metrics.heading.record(wrap_angle(state.heading - exact.heading));
                }
            }
        }

        metrics
    }

    /// Raw position RMSE divided by smoothed position RMSE.
    pub fn position_improvement(&self) -> f64 {
        let smoothed = self.position.rmse();
        if smoothed > 0.0 {
            self.raw_position.rmse() / smoothed
        } else {
            f64::INFINITY
        }
    }
}
