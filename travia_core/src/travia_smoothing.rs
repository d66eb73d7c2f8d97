//! Per-track orchestration: configuration, vehicle parameters, batch smoothing
//! and the shared output table.
//!
//! Tracks are independent units of work. Each one is validated, smoothed, and
//! turned into its own [`SmoothedTrack`] buffer; the batch call then inserts
//! the buffers into a table keyed by vehicle id. A failing track is recorded in
//! the [`SmoothingReport`] and never affects any other track.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::error::SmoothingError;
use crate::track::{Dataset, Track, VehicleId};
use crate::travia_heading::initial_state_mean;
use crate::travia_linalg::{CholeskyDecomposition, SpdDecomposition, SymmetricEigenDecomposition};
use crate::travia_motion::{BicycleModel, ObservationVariant, VehicleState, STATE_DIM};
use crate::travia_unscented::{SigmaParams, UnscentedSmoother};

/// Tracks with fewer samples than this are skipped.
pub const DEFAULT_MIN_TRACK_SAMPLES: usize = 6;

/// Wheelbase as a fraction of vehicle length.
pub const DEFAULT_WHEELBASE_FRACTION: f64 = 0.7;

/// Diagonal of the initial state covariance,
/// `[x, y, heading, velocity, steering, acceleration]`.
pub const DEFAULT_INITIAL_COVARIANCE: [f64; STATE_DIM] = [1.0, 1.0, 0.1, 1.0, 0.01, 1.0];

/// Diagonal observation noise.
pub const DEFAULT_OBSERVATION_VARIANCE: f64 = 1.0;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Square-root strategy used for sigma points and gain solves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionKind {
    #[default]
    Cholesky,
    SymmetricEigen,
}

/// Configuration of a smoothing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Minimum number of samples a track needs to be smoothed
    pub min_track_samples: usize,

    /// Wheelbase = vehicle length × this fraction
    pub wheelbase_fraction: f64,

    /// Diagonal of the initial state covariance
    pub initial_covariance_diagonal: [f64; STATE_DIM],

    /// Variance on every measured component
    pub observation_variance: f64,

    /// Process noise override; `None` uses the variant default
    pub process_noise: Option<f64>,

    /// Sigma-point scaling
    pub sigma: SigmaParams,

    /// Square-root strategy
    pub decomposition: DecompositionKind,

    /// Run tracks on the rayon pool (needs the `parallel` feature)
    pub parallel: bool,

    /// Process at most this many tracks, in input order
    pub max_tracks: Option<usize>,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            min_track_samples: DEFAULT_MIN_TRACK_SAMPLES,
            wheelbase_fraction: DEFAULT_WHEELBASE_FRACTION,
            initial_covariance_diagonal: DEFAULT_INITIAL_COVARIANCE,
            observation_variance: DEFAULT_OBSERVATION_VARIANCE,
            process_noise: None,
            sigma: SigmaParams::default(),
            decomposition: DecompositionKind::default(),
            parallel: true,
            max_tracks: None,
        }
    }
}

impl SmootherConfig {
    /// Parses a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Process noise magnitude for a variant.
    pub fn process_noise_for(&self, variant: ObservationVariant) -> f64 {
        self.process_noise
            .unwrap_or_else(|| variant.default_process_noise())
    }
}

/// Per-vehicle constants of one smoothing run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleParameters {
    /// Wheelbase in meters
    pub wheelbase: f64,

    /// Diagonal process noise magnitude
    pub process_noise: f64,
}

impl VehicleParameters {
    /// Derives parameters from the track's length (or class default).
    pub fn for_track(
        track: &Track,
        variant: ObservationVariant,
        config: &SmootherConfig,
    ) -> Result<Self, SmoothingError> {
        let length = track.resolve_length()?;
        let wheelbase = length * config.wheelbase_fraction;
        if !(wheelbase.is_finite() && wheelbase > 0.0) {
            return Err(SmoothingError::malformed(format!(
                "vehicle {}: wheelbase fraction {} gives wheelbase {}",
                track.vehicle_id, config.wheelbase_fraction, wheelbase
            )));
        }
        Ok(Self {
            wheelbase,
            process_noise: config.process_noise_for(variant),
        })
    }

    /// Bicycle model for this vehicle at sampling interval `dt`.
    pub fn motion_model(&self, dt: f64) -> BicycleModel {
        BicycleModel::new(self.wheelbase, dt)
    }

    /// 6×6 process noise covariance.
    pub fn process_covariance(&self) -> DMatrix<f64> {
        DMatrix::identity(STATE_DIM, STATE_DIM) * self.process_noise
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Smoothed states of one vehicle, one per input frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedTrack {
    pub vehicle_id: VehicleId,
    pub frames: Vec<u64>,
    pub states: Vec<VehicleState>,
}

impl SmoothedTrack {
    /// Number of smoothed frames.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True if no frame was smoothed.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Smoothed state at `frame`, if the track covers it.
    pub fn state_at(&self, frame: u64) -> Option<&VehicleState> {
        self.frames
            .binary_search(&frame)
            .ok()
            .map(|i| &self.states[i])
    }

    /// Iterates `(frame, state)` pairs in frame order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &VehicleState)> + '_ {
        self.frames.iter().copied().zip(self.states.iter())
    }
}

/// What happened to one track.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// Smoothed, with this many frames written
    Smoothed { frames: usize },

    /// Skipped for the given reason
    Skipped(SmoothingError),

    /// Not attempted because the `max_tracks` cap was reached
    Unprocessed,
}

impl TrackOutcome {
    pub fn is_smoothed(&self) -> bool {
        matches!(self, TrackOutcome::Smoothed { .. })
    }
}

/// Per-vehicle outcomes of a batch, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothingReport {
    pub outcomes: Vec<(VehicleId, TrackOutcome)>,
}

impl SmoothingReport {
    /// Number of tracks in the batch.
    pub fn total_tracks(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of tracks smoothed successfully.
    pub fn smoothed_tracks(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_smoothed()).count()
    }

    /// Number of frames written to the output table.
    pub fn smoothed_frames(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                TrackOutcome::Smoothed { frames } => *frames,
                _ => 0,
            })
            .sum()
    }

    /// Every skipped track with its reason.
    pub fn failures(&self) -> Vec<(VehicleId, &SmoothingError)> {
        self.outcomes
            .iter()
            .filter_map(|(id, o)| match o {
                TrackOutcome::Skipped(err) => Some((*id, err)),
                _ => None,
            })
            .collect()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().len()
    }

    /// Vehicles left out by the `max_tracks` cap.
    pub fn unprocessed(&self) -> Vec<VehicleId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, TrackOutcome::Unprocessed))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Outcome recorded for a vehicle.
    pub fn outcome(&self, vehicle_id: VehicleId) -> Option<&TrackOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == vehicle_id)
            .map(|(_, o)| o)
    }

    /// Count of failures per error kind.
    pub fn failures_by_kind(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for (_, err) in self.failures() {
            *counts.entry(err.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Position and motion of a vehicle at one frame, smoothed if available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Wrapped heading; unknown for raw samples
    pub heading: Option<f64>,
    pub velocity: Option<f64>,
    /// False when this is a raw-measurement fallback
    pub smoothed: bool,
}

/// Smoothed states of a dataset keyed by vehicle id.
///
/// Vehicles whose track was skipped have no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothedTable {
    tracks: BTreeMap<VehicleId, SmoothedTrack>,
}

impl SmoothedTable {
    fn insert(&mut self, track: SmoothedTrack) {
        self.tracks.insert(track.vehicle_id, track);
    }

    /// Smoothed track of a vehicle.
    pub fn get(&self, vehicle_id: VehicleId) -> Option<&SmoothedTrack> {
        self.tracks.get(&vehicle_id)
    }

    /// Smoothed state of a vehicle at a frame.
    pub fn state_at(&self, vehicle_id: VehicleId, frame: u64) -> Option<&VehicleState> {
        self.get(vehicle_id)?.state_at(frame)
    }

    /// True if the vehicle's track was smoothed.
    pub fn smoothing_succeeded(&self, vehicle_id: VehicleId) -> bool {
        self.tracks.contains_key(&vehicle_id)
    }

    /// Smoothed pose at `frame`, else the raw sample with no heading.
    pub fn pose_or_raw(&self, track: &Track, frame: u64) -> Option<Pose> {
        if let Some(state) = self.state_at(track.vehicle_id, frame) {
            return Some(Pose {
                x: state.x,
                y: state.y,
                heading: Some(state.heading_wrapped()),
                velocity: Some(state.velocity),
                smoothed: true,
            });
        }

        track.sample_at(frame).map(|sample| Pose {
            x: sample.x,
            y: sample.y,
            heading: None,
            velocity: sample.speed,
            smoothed: false,
        })
    }

    /// Number of smoothed vehicles.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Iterates smoothed tracks in ascending vehicle id order.
    pub fn iter(&self) -> impl Iterator<Item = &SmoothedTrack> + '_ {
        self.tracks.values()
    }
}

/// Result of smoothing a dataset.
#[derive(Debug, Clone, Default)]
pub struct SmoothingOutput {
    pub table: SmoothedTable,
    pub report: SmoothingReport,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Smooths tracks with the kinematic bicycle model and an unscented RTS
/// smoother.
#[derive(Debug, Clone, Default)]
pub struct TrajectorySmoother {
    pub config: SmootherConfig,
}

impl TrajectorySmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Smooths a single track.
    ///
    /// Checks are applied in order: length, frame order, measurement
    /// fields, sampling interval, vehicle length.
    pub fn smooth_track(
        &self,
        track: &Track,
        variant: ObservationVariant,
        dt: f64,
    ) -> Result<SmoothedTrack, SmoothingError> {
        let min_samples = self.config.min_track_samples;
        if track.len() < min_samples {
            return Err(SmoothingError::TrackTooShort {
                samples: track.len(),
                min_samples,
            });
        }

        track.validate_frame_order()?;
        let measurements = track
            .samples
            .iter()
            .map(|sample| variant.measurement_vector(sample))
            .collect::<Result<Vec<_>, _>>()?;

        if !(dt.is_finite() && dt > 0.0) {
            return Err(SmoothingError::malformed(format!(
                "invalid sampling interval {}",
                dt
            )));
        }

        let params = VehicleParameters::for_track(track, variant, &self.config)?;
        let initial_mean = initial_state_mean(&track.samples, variant)?;

        let means = match self.config.decomposition {
            DecompositionKind::Cholesky => {
                self.run_engine(CholeskyDecomposition, &params, variant, dt, &initial_mean, &measurements)?
            }
            DecompositionKind::SymmetricEigen => self.run_engine(
                SymmetricEigenDecomposition::default(),
                &params,
                variant,
                dt,
                &initial_mean,
                &measurements,
            )?,
        };

        Ok(SmoothedTrack {
            vehicle_id: track.vehicle_id,
            frames: track.frames().collect(),
            states: means.iter().map(VehicleState::from_vector).collect(),
        })
    }

    fn run_engine<D: SpdDecomposition>(
        &self,
        decomposition: D,
        params: &VehicleParameters,
        variant: ObservationVariant,
        dt: f64,
        initial_mean: &DVector<f64>,
        measurements: &[DVector<f64>],
    ) -> Result<Vec<DVector<f64>>, SmoothingError> {
        let model = params.motion_model(dt);
        let smoother = UnscentedSmoother::new(
            DMatrix::from_diagonal(&DVector::from_row_slice(&self.config.initial_covariance_diagonal)),
            params.process_covariance(),
            DMatrix::identity(variant.dim(), variant.dim()) * self.config.observation_variance,
        )
        .with_sigma_params(self.config.sigma)
        .with_decomposition(decomposition);

        let smoothed = smoother.smooth(
            |state| model.transition(state),
            |state| variant.observe(state),
            initial_mean,
            measurements,
        )?;

        Ok(smoothed.into_iter().map(|m| m.mean).collect())
    }

    /// Smooths every track of a dataset.
    pub fn smooth_dataset(&self, dataset: &Dataset) -> SmoothingOutput {
        self.smooth_dataset_with_progress(dataset, |_, _| {})
    }

    /// Smooths every track, calling `progress(completed, total)` after each.
    ///
    /// Calls may arrive from worker threads and out of order.
    pub fn smooth_dataset_with_progress<P>(&self, dataset: &Dataset, progress: P) -> SmoothingOutput
    where
        P: Fn(usize, usize) + Sync,
    {
        let limit = self
            .config
            .max_tracks
            .map_or(dataset.tracks.len(), |cap| cap.min(dataset.tracks.len()));
        let (selected, deferred) = dataset.tracks.split_at(limit);

        info!(
            "Smoothing {} of {} tracks ({} variant, dt = {}s)",
            selected.len(),
            dataset.tracks.len(),
            dataset.variant.name(),
            dataset.dt
        );

        let duplicates = duplicate_ids(&dataset.tracks);
        let completed = AtomicUsize::new(0);

        let results = self.map_tracks(selected, |track| {
            let result = if duplicates.contains(&track.vehicle_id) {
                Err(SmoothingError::malformed(format!(
                    "vehicle {} appears in more than one track",
                    track.vehicle_id
                )))
            } else {
                self.smooth_track(track, dataset.variant, dataset.dt)
            };
            progress(completed.fetch_add(1, Ordering::Relaxed) + 1, limit);
            result
        });

        let mut output = SmoothingOutput::default();
        for (track, result) in selected.iter().zip(results) {
            let outcome = match result {
                Ok(smoothed) => {
                    debug!("Vehicle {}: smoothed {} frames", track.vehicle_id, smoothed.len());
                    let frames = smoothed.len();
                    output.table.insert(smoothed);
                    TrackOutcome::Smoothed { frames }
                }
                Err(err) => {
                    warn!("Vehicle {}: skipped ({})", track.vehicle_id, err);
                    TrackOutcome::Skipped(err)
                }
            };
            output.report.outcomes.push((track.vehicle_id, outcome));
        }

        if !deferred.is_empty() {
            warn!("Track cap reached, {} tracks not processed", deferred.len());
        }
        for track in deferred {
            output
                .report
                .outcomes
                .push((track.vehicle_id, TrackOutcome::Unprocessed));
        }

        info!(
            "Smoothed {} tracks ({} frames), {} skipped",
            output.report.smoothed_tracks(),
            output.report.smoothed_frames(),
            output.report.failure_count()
        );

        output
    }

    /// Maps tracks to results in input order, on the rayon pool if enabled.
    fn map_tracks<F>(&self, tracks: &[Track], f: F) -> Vec<Result<SmoothedTrack, SmoothingError>>
    where
        F: Fn(&Track) -> Result<SmoothedTrack, SmoothingError> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            if self.config.parallel {
                use rayon::prelude::*;
                return tracks.par_iter().map(&f).collect();
            }
        }

        tracks.iter().map(&f).collect()
    }
}

fn duplicate_ids(tracks: &[Track]) -> HashSet<VehicleId> {
    let mut seen = HashSet::new();
    tracks
        .iter()
        .filter(|t| !seen.insert(t.vehicle_id))
        .map(|t| t.vehicle_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{Measurement, VehicleType};
    use crate::travia_motion::wrap_angle;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
    use std::sync::Mutex;

    const DT: f64 = 0.1;

    /// Straight line through `origin` along `heading` at `speed`.
    fn line_track(id: VehicleId, frames: u64, origin: (f64, f64), heading: f64, speed: f64) -> Track {
        let samples = (0..frames)
            .map(|k| {
                let s = speed * k as f64 * DT;
                Measurement::new(k, origin.0 + s * heading.cos(), origin.1 + s * heading.sin())
                    .with_speed(speed)
                    .with_acceleration(0.0)
            })
            .collect();
        Track::new(id, samples).with_length(4.5)
    }

    /// Counter-clockwise arc of radius `radius`, starting east-bound at the origin.
    fn arc_track(id: VehicleId, frames: u64, radius: f64, speed: f64) -> Track {
        let omega = speed / radius;
        let samples = (0..frames)
            .map(|k| {
                let t = k as f64 * DT;
                Measurement::new(k, radius * (omega * t).sin(), radius * (1.0 - (omega * t).cos()))
                    .with_speed(speed)
                    .with_acceleration(0.0)
            })
            .collect();
        Track::new(id, samples).with_length(4.5)
    }

    fn sequential() -> TrajectorySmoother {
        TrajectorySmoother::new(SmootherConfig {
            parallel: false,
            ..SmootherConfig::default()
        })
    }

    #[test]
    fn test_concrete_batch_east_line_and_short_track() {
        let dataset = Dataset::new(
            ObservationVariant::FourDim,
            DT,
            vec![line_track(1, 20, (0.0, 0.0), 0.0, 10.0), line_track(2, 4, (0.0, 0.0), 0.0, 10.0)],
        );

        let output = TrajectorySmoother::with_defaults().smooth_dataset(&dataset);

        let a = output.table.get(1).unwrap();
        assert_eq!(a.len(), 20);
        for (_, state) in a.iter() {
            assert_relative_eq!(state.heading_wrapped(), 0.0, epsilon = 1e-3);
            assert_relative_eq!(state.velocity, 10.0, epsilon = 0.25);
        }

        assert!(output.table.get(2).is_none());
        assert!(!output.table.smoothing_succeeded(2));
        assert_eq!(output.report.failure_count(), 1);
        assert_eq!(output.report.smoothed_frames(), 20);
        assert_eq!(
            output.report.outcome(2),
            Some(&TrackOutcome::Skipped(SmoothingError::TrackTooShort {
                samples: 4,
                min_samples: 6
            }))
        );
    }

    #[test]
    fn test_straight_line_heading_any_direction() {
        let headings = [0.3, 0.6, FRAC_PI_4, 1.2, FRAC_PI_2, 2.2, -2.2, -0.6, 3.0];
        let runs = [(20, 10.0), (50, 25.0), (30, 5.0), (6, 10.0)];
        let smoother = sequential();

        for variant in [ObservationVariant::FourDim, ObservationVariant::ThreeDim] {
            for &heading in &headings {
                for &(frames, speed) in &runs {
                    let track = line_track(1, frames, (3.0, -2.0), heading, speed);
                    let smoothed = smoother.smooth_track(&track, variant, DT).unwrap();

                    for (_, state) in smoothed.iter() {
                        let error = wrap_angle(state.heading - heading).abs();
                        assert!(
                            error < 1e-3,
                            "{:?} heading {} ({} frames at {} m/s): error {}",
                            variant,
                            heading,
                            frames,
                            speed,
                            error
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_position_offset_on_exact_line() {
        let track = line_track(1, 20, (0.0, 0.0), 0.0, 10.0);
        let max_offset = |smoother: &TrajectorySmoother| {
            let smoothed = smoother.smooth_track(&track, ObservationVariant::FourDim, DT).unwrap();
            smoothed
                .iter()
                .map(|(k, s)| (s.x - k as f64).hypot(s.y))
                .fold(0.0, f64::max)
        };

        assert!(max_offset(&sequential()) < 0.35);

        // A tighter observation noise pulls the estimate onto the samples
        let trusting = TrajectorySmoother::new(SmootherConfig {
            observation_variance: 0.1,
            parallel: false,
            ..SmootherConfig::default()
        });
        assert!(max_offset(&trusting) < 0.15);
    }

    #[test]
    fn test_three_dim_variant_east_line() {
        let track = line_track(1, 20, (0.0, 0.0), 0.0, 10.0);
        let smoothed = sequential().smooth_track(&track, ObservationVariant::ThreeDim, DT).unwrap();

        assert_eq!(smoothed.frames, (0..20).collect::<Vec<_>>());
        for (_, state) in smoothed.iter() {
            assert_relative_eq!(state.heading_wrapped(), 0.0, epsilon = 1e-3);
            assert_relative_eq!(state.velocity, 10.0, epsilon = 0.25);
        }
    }

    #[test]
    fn test_arc_heading_turns_at_speed_over_radius() {
        let (radius, speed) = (50.0, 10.0);
        let track = arc_track(1, 40, radius, speed);
        let smoothed = sequential().smooth_track(&track, ObservationVariant::FourDim, DT).unwrap();

        let mut diffs: Vec<f64> = smoothed
            .states
            .windows(2)
            .map(|w| w[1].heading - w[0].heading)
            .collect();
        assert!(diffs.iter().all(|&d| d > 0.0), "heading must increase: {:?}", diffs);

        diffs.sort_by(|a, b| a.total_cmp(b));
        let median = diffs[diffs.len() / 2];
        let expected = speed * DT / radius;
        assert_relative_eq!(median, expected, max_relative = 0.1);

        for state in &smoothed.states {
            assert_relative_eq!(state.velocity, speed, epsilon = 0.5);
        }
    }

    #[test]
    fn test_five_samples_rejected_six_attempted() {
        let smoother = sequential();

        let err = smoother
            .smooth_track(&line_track(1, 5, (0.0, 0.0), 0.0, 10.0), ObservationVariant::FourDim, DT)
            .unwrap_err();
        assert_eq!(err, SmoothingError::TrackTooShort { samples: 5, min_samples: 6 });

        let smoothed = smoother
            .smooth_track(&line_track(1, 6, (0.0, 0.0), 0.0, 10.0), ObservationVariant::FourDim, DT)
            .unwrap();
        assert_eq!(smoothed.len(), 6);
    }

    #[test]
    fn test_min_track_samples_is_configurable() {
        let smoother = TrajectorySmoother::new(SmootherConfig {
            min_track_samples: 10,
            ..SmootherConfig::default()
        });
        let err = smoother
            .smooth_track(&line_track(1, 8, (0.0, 0.0), 0.0, 10.0), ObservationVariant::FourDim, DT)
            .unwrap_err();
        assert_eq!(err.kind(), "track_too_short");
    }

    #[test]
    fn test_stationary_track_does_not_break_batch() {
        let stationary = Track::new(
            7,
            (0..10)
                .map(|k| Measurement::new(k, 5.0, 5.0).with_speed(0.0).with_acceleration(0.0))
                .collect(),
        )
        .with_type(VehicleType::Car);
        let dataset = Dataset::new(
            ObservationVariant::FourDim,
            DT,
            vec![stationary, line_track(8, 20, (0.0, 0.0), 0.0, 10.0)],
        );

        let output = sequential().smooth_dataset(&dataset);

        match output.report.outcome(7) {
            Some(TrackOutcome::Smoothed { frames }) => {
                assert_eq!(*frames, 10);
                let state = output.table.state_at(7, 0).unwrap();
                assert!(state.heading.is_finite());
            }
            Some(TrackOutcome::Skipped(SmoothingError::NumericalInstability { .. })) => {}
            other => panic!("unexpected outcome for stationary track: {:?}", other),
        }
        assert!(output.table.smoothing_succeeded(8));
    }

    #[test]
    fn test_malformed_tracks_are_isolated() {
        let mut unordered = line_track(1, 10, (0.0, 0.0), 0.0, 10.0);
        unordered.samples.swap(3, 4);

        let mut missing_acceleration = line_track(2, 10, (0.0, 0.0), 0.0, 10.0);
        missing_acceleration.samples[5].acceleration = None;

        let mut no_length = line_track(3, 10, (0.0, 0.0), 0.0, 10.0);
        no_length.vehicle_length = None;

        let dataset = Dataset::new(
            ObservationVariant::FourDim,
            DT,
            vec![unordered, missing_acceleration, no_length, line_track(4, 10, (0.0, 0.0), 0.0, 10.0)],
        );
        let output = sequential().smooth_dataset(&dataset);

        assert_eq!(output.report.failure_count(), 3);
        assert_eq!(output.report.failures_by_kind().get("malformed_track"), Some(&3));
        assert_eq!(output.report.smoothed_tracks(), 1);
        assert!(output.table.smoothing_succeeded(4));
    }

    #[test]
    fn test_missing_acceleration_is_fine_for_three_dim() {
        let mut track = line_track(1, 10, (0.0, 0.0), 0.0, 10.0);
        for sample in &mut track.samples {
            sample.acceleration = None;
        }
        assert!(sequential().smooth_track(&track, ObservationVariant::ThreeDim, DT).is_ok());
        assert!(sequential().smooth_track(&track, ObservationVariant::FourDim, DT).is_err());
    }

    #[test]
    fn test_invalid_sampling_interval() {
        let track = line_track(1, 10, (0.0, 0.0), 0.0, 10.0);
        for dt in [0.0, -0.1, f64::NAN] {
            let err = sequential().smooth_track(&track, ObservationVariant::FourDim, dt).unwrap_err();
            assert!(matches!(err, SmoothingError::MalformedTrack(_)));
        }
    }

    #[test]
    fn test_duplicate_vehicle_ids_are_malformed() {
        let dataset = Dataset::new(
            ObservationVariant::FourDim,
            DT,
            vec![
                line_track(1, 10, (0.0, 0.0), 0.0, 10.0),
                line_track(1, 10, (0.0, 5.0), 0.0, 10.0),
                line_track(2, 10, (0.0, 0.0), 0.0, 10.0),
            ],
        );
        let output = sequential().smooth_dataset(&dataset);

        assert_eq!(output.report.failure_count(), 2);
        assert!(!output.table.smoothing_succeeded(1));
        assert!(output.table.smoothing_succeeded(2));
    }

    #[test]
    fn test_determinism() {
        let track = arc_track(1, 30, 40.0, 8.0);
        let smoother = sequential();

        let first = smoother.smooth_track(&track, ObservationVariant::FourDim, DT).unwrap();
        let second = smoother.smooth_track(&track, ObservationVariant::FourDim, DT).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let tracks: Vec<Track> = (0..12)
            .map(|id| match id % 3 {
                0 => line_track(id, 15 + id, (id as f64, 0.0), 0.1 * id as f64, 8.0),
                1 => arc_track(id, 20, 30.0 + id as f64, 6.0),
                _ => line_track(id, 3, (0.0, 0.0), 0.0, 5.0),
            })
            .collect();
        let dataset = Dataset::new(ObservationVariant::FourDim, DT, tracks);

        let parallel = TrajectorySmoother::with_defaults().smooth_dataset(&dataset);
        let serial = sequential().smooth_dataset(&dataset);

        assert_eq!(parallel.table, serial.table);
        assert_eq!(parallel.report, serial.report);
    }

    #[test]
    fn test_max_tracks_caps_batch() {
        let tracks: Vec<Track> = (0..5).map(|id| line_track(id, 10, (0.0, 0.0), 0.0, 10.0)).collect();
        let dataset = Dataset::new(ObservationVariant::FourDim, DT, tracks);
        let smoother = TrajectorySmoother::new(SmootherConfig {
            max_tracks: Some(2),
            ..SmootherConfig::default()
        });

        let output = smoother.smooth_dataset(&dataset);

        assert_eq!(output.report.smoothed_tracks(), 2);
        assert_eq!(output.report.unprocessed(), vec![2, 3, 4]);
        assert_eq!(output.report.failure_count(), 0);
        assert_eq!(output.table.len(), 2);
    }

    #[test]
    fn test_progress_reaches_total() {
        let tracks: Vec<Track> = (0..4).map(|id| line_track(id, 8, (0.0, 0.0), 0.0, 10.0)).collect();
        let dataset = Dataset::new(ObservationVariant::FourDim, DT, tracks);
        let calls = Mutex::new(Vec::new());

        TrajectorySmoother::with_defaults().smooth_dataset_with_progress(&dataset, |done, total| {
            calls.lock().unwrap().push((done, total));
        });

        let mut calls = calls.into_inner().unwrap();
        calls.sort();
        assert_eq!(calls, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    }

    #[test]
    fn test_pose_or_raw_falls_back() {
        let good = line_track(1, 10, (0.0, 0.0), 0.0, 10.0);
        let short = line_track(2, 3, (1.0, 2.0), 0.0, 7.0);
        let dataset = Dataset::new(ObservationVariant::FourDim, DT, vec![good.clone(), short.clone()]);
        let output = sequential().smooth_dataset(&dataset);

        let smoothed = output.table.pose_or_raw(&good, 4).unwrap();
        assert!(smoothed.smoothed);
        assert!(smoothed.heading.is_some());

        let raw = output.table.pose_or_raw(&short, 1).unwrap();
        assert!(!raw.smoothed);
        assert_eq!(raw.heading, None);
        assert_eq!(raw.velocity, Some(7.0));
        assert_eq!((raw.x, raw.y), (short.samples[1].x, short.samples[1].y));

        assert!(output.table.pose_or_raw(&short, 99).is_none());
    }

    #[test]
    fn test_eigen_decomposition_config() {
        let smoother = TrajectorySmoother::new(SmootherConfig {
            decomposition: DecompositionKind::SymmetricEigen,
            parallel: false,
            ..SmootherConfig::default()
        });
        let track = line_track(1, 20, (0.0, 0.0), 0.0, 10.0);
        let eigen = smoother.smooth_track(&track, ObservationVariant::FourDim, DT).unwrap();

        // Sigma points differ from the Cholesky set, so only compare to truth
        for (k, state) in eigen.iter() {
            assert_relative_eq!(state.x, k as f64, epsilon = 0.4);
            assert_relative_eq!(state.y, 0.0, epsilon = 1e-3);
            assert_relative_eq!(state.heading_wrapped(), 0.0, epsilon = 1e-2);
            assert_relative_eq!(state.velocity, 10.0, epsilon = 0.3);
        }
    }

    #[test]
    fn test_config_from_json() {
        let config = SmootherConfig::from_json_str(
            r#"{ "min_track_samples": 8, "process_noise": 0.01, "decomposition": "symmetric_eigen" }"#,
        )
        .unwrap();

        assert_eq!(config.min_track_samples, 8);
        assert_eq!(config.process_noise_for(ObservationVariant::ThreeDim), 0.01);
        assert_eq!(config.decomposition, DecompositionKind::SymmetricEigen);
        assert_eq!(config.wheelbase_fraction, DEFAULT_WHEELBASE_FRACTION);

        let defaults = SmootherConfig::default();
        assert_eq!(defaults.process_noise_for(ObservationVariant::FourDim), 0.005);
        assert_eq!(defaults.process_noise_for(ObservationVariant::ThreeDim), 0.001);
        assert!(SmootherConfig::from_json_str("{ \"parallel\": 3 }").is_err());
    }

    #[test]
    fn test_vehicle_parameters() {
        let config = SmootherConfig::default();
        let track = line_track(1, 6, (0.0, 0.0), 0.0, 1.0);
        let params = VehicleParameters::for_track(&track, ObservationVariant::FourDim, &config).unwrap();
        assert_relative_eq!(params.wheelbase, 3.15, epsilon = 1e-12);
        assert_eq!(params.process_covariance()[(5, 5)], 0.005);

        let bus = Track::new(2, Vec::new()).with_type(VehicleType::Bus);
        let params = VehicleParameters::for_track(&bus, ObservationVariant::ThreeDim, &config).unwrap();
        assert_relative_eq!(params.wheelbase, 8.4, epsilon = 1e-12);
    }

    #[test]
    fn test_non_positive_wheelbase_is_malformed() {
        let track = line_track(1, 10, (0.0, 0.0), 0.0, 10.0);
        for fraction in [0.0, -0.7, f64::NAN] {
            let smoother = TrajectorySmoother::new(SmootherConfig {
                wheelbase_fraction: fraction,
                parallel: false,
                ..SmootherConfig::default()
            });
            let err = smoother.smooth_track(&track, ObservationVariant::FourDim, DT).unwrap_err();
            assert_eq!(err.kind(), "malformed_track");
        }

        let zero_length = line_track(2, 10, (0.0, 0.0), 0.0, 10.0).with_length(0.0);
        let err = sequential()
            .smooth_track(&zero_length, ObservationVariant::FourDim, DT)
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_track");
    }

    #[test]
    fn test_table_iterates_in_id_order() {
        let dataset = Dataset::new(
            ObservationVariant::FourDim,
            DT,
            [9, 2, 7, 4]
                .iter()
                .map(|&id| line_track(id, 8, (0.0, 0.0), 0.0, 10.0))
                .collect(),
        );
        let output = sequential().smooth_dataset(&dataset);

        let ids: Vec<VehicleId> = output.table.iter().map(|t| t.vehicle_id).collect();
        assert_eq!(ids, vec![2, 4, 7, 9]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Smoothing the same track twice gives bit-identical results.
        #[test]
        fn prop_smooth_track_is_repeatable(
            heading in -3.1f64..3.1,
            speed in 0.5f64..30.0,
            frames in 6u64..25,
            jitter in prop::collection::vec((-0.5f64..0.5, -0.5f64..0.5), 25),
        ) {
            let samples: Vec<Measurement> = (0..frames)
                .map(|k| {
                    let s = speed * k as f64 * DT;
                    let (jx, jy) = jitter[k as usize];
                    Measurement::new(k, s * heading.cos() + jx, s * heading.sin() + jy)
                        .with_speed(speed)
                        .with_acceleration(0.0)
                })
                .collect();
            let track = Track::new(1, samples).with_length(4.5);
            let smoother = sequential();

            let first = smoother.smooth_track(&track, ObservationVariant::FourDim, DT);
            let second = smoother.smooth_track(&track, ObservationVariant::FourDim, DT);
            prop_assert_eq!(first, second);
        }
    }
}
