//! JSON exporter for smoothed trajectories.
//!
//! Writes one record per (vehicle, frame) with the raw sample, the smoothed
//! state when available, and the ground truth, for offline plotting.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use travia_core::{Dataset, SmoothingOutput, TrackOutcome, VehicleId};

use crate::error::SimError;
use crate::oracle::Oracle;
use crate::runner::ScenarioRun;

/// A single frame of one vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameExport {
    pub frame: u64,

    /// Raw measured position
    pub raw_x: f64,
    pub raw_y: f64,

    /// Smoothed state, absent for skipped vehicles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothed: Option<SmoothedFrame>,

    /// Ground truth heading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_heading: Option<f64>,
}

/// Smoothed pose at one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothedFrame {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub velocity: f64,
}

/// All frames of one vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleExport {
    pub vehicle_id: VehicleId,

    /// Explicit success flag for consumers
    pub smoothed: bool,

    /// Error kind and message of a skipped track
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    pub frames: Vec<FrameExport>,
}

/// Complete smoothing export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Observation layout name
    pub variant: String,

    /// Sampling interval in seconds
    pub dt: f64,

    /// Final results
    pub passed: bool,

    pub vehicles: Vec<VehicleExport>,
}

impl SmoothingExport {
    /// Creates an empty export container.
    pub fn new(scenario: &str, seed: u64, dataset: &Dataset) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            variant: dataset.variant.name().to_string(),
            dt: dataset.dt,
            passed: false,
            vehicles: Vec::new(),
        }
    }

    /// Builds the export of a finished scenario run.
    pub fn from_run(run: &ScenarioRun) -> Self {
        let mut export = Self::new(run.result.scenario.name(), run.result.seed, &run.dataset);
        export.add_vehicles(&run.dataset, &run.output, Some(&run.oracle));
        export.passed = run.result.passed;
        export
    }

    /// Adds every track of `dataset`, in dataset order.
    pub fn add_vehicles(&mut self, dataset: &Dataset, output: &SmoothingOutput, oracle: Option<&Oracle>) {
        for track in &dataset.tracks {
            let failure = match output.report.outcome(track.vehicle_id) {
                Some(TrackOutcome::Skipped(err)) => Some(format!("{}: {}", err.kind(), err)),
                Some(TrackOutcome::Unprocessed) => Some("unprocessed".to_string()),
                _ => None,
            };
            let truth = oracle.and_then(|o| o.vehicle(track.vehicle_id));

            let frames = track
                .samples
                .iter()
                .map(|sample| FrameExport {
                    frame: sample.frame,
                    raw_x: sample.x,
                    raw_y: sample.y,
                    smoothed: output.table.state_at(track.vehicle_id, sample.frame).map(|s| {
                        SmoothedFrame {
                            x: s.x,
                            y: s.y,
                            heading: s.heading_wrapped(),
                            velocity: s.velocity,
                        }
                    }),
                    true_heading: truth.and_then(|t| t.sample_at(sample.frame)).map(|t| t.heading),
                })
                .collect();

            self.vehicles.push(VehicleExport {
                vehicle_id: track.vehicle_id,
                smoothed: output.table.smoothing_succeeded(track.vehicle_id),
                failure,
                frames,
            });
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[test]
    fn test_export_flags_skipped_vehicles() {
        let run = ScenarioRunner::new(3).execute(ScenarioId::ShortTracks);
        let export = SmoothingExport::from_run(&run);

        assert_eq!(export.vehicles.len(), 7);
        let short = &export.vehicles[0];
        assert!(!short.smoothed);
        assert!(short.failure.as_deref().unwrap().starts_with("track_too_short"));
        assert!(short.frames.iter().all(|f| f.smoothed.is_none()));

        let long = export.vehicles.last().unwrap();
        assert!(long.smoothed);
        assert_eq!(long.frames.len(), 8);
        assert!(long.frames.iter().all(|f| f.smoothed.is_some()));

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["variant"], "ngsim");
        assert_eq!(json["scenario"], "short_tracks");
    }

    #[test]
    fn test_write_to_file() {
        let run = ScenarioRunner::new(3).execute(ScenarioId::StraightLine);
        let path = std::env::temp_dir().join("travia_sim_export_test.json");

        SmoothingExport::from_run(&run).write_to_file(&path).unwrap();
        let back: SmoothingExport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.vehicles.len(), 5);
        assert!(back.passed);
    }
}
