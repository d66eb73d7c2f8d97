//! Input data model: raw measurements grouped into per-vehicle tracks.
//!
//! Tracks are produced by a dataset-loading collaborator and are consumed
//! read-only by the smoothing engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SmoothingError;
use crate::travia_motion::ObservationVariant;

/// Identifier of a tracked road user within one dataset.
pub type VehicleId = u64;

// ============================================================================
// MEASUREMENT
// ============================================================================

/// A single raw sample of one vehicle at one frame.
///
/// Position is always present. Which of `speed` / `acceleration` are required
/// depends on the [`ObservationVariant`] of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Frame index (strictly increasing within a track)
    pub frame: u64,

    /// Global x position in meters
    pub x: f64,

    /// Global y position in meters
    pub y: f64,

    /// Forward speed in m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Forward acceleration in m/s²
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
}

impl Measurement {
    /// Creates a position-only measurement.
    pub fn new(frame: u64, x: f64, y: f64) -> Self {
        Self {
            frame,
            x,
            y,
            speed: None,
            acceleration: None,
        }
    }

    /// Sets the measured forward speed.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Sets the measured forward acceleration.
    pub fn with_acceleration(mut self, acceleration: f64) -> Self {
        self.acceleration = Some(acceleration);
        self
    }
}

// ============================================================================
// VEHICLE TYPE
// ============================================================================

/// Road user class as reported by the source datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Car,
    Truck,
    MotorCycle,
    Taxi,
    Bus,
    MediumVehicle,
    HeavyVehicle,
    Pedestrian,
    Bicycle,
    Van,
}

impl VehicleType {
    /// Returns all vehicle types.
    pub fn all() -> [VehicleType; 10] {
        [
            VehicleType::Car,
            VehicleType::Truck,
            VehicleType::MotorCycle,
            VehicleType::Taxi,
            VehicleType::Bus,
            VehicleType::MediumVehicle,
            VehicleType::HeavyVehicle,
            VehicleType::Pedestrian,
            VehicleType::Bicycle,
            VehicleType::Van,
        ]
    }

    /// Default (width, length) in meters for datasets that carry no size.
    pub fn default_size(&self) -> (f64, f64) {
        match self {
            VehicleType::Car | VehicleType::Taxi => (2.0, 4.5),
            VehicleType::Truck | VehicleType::MediumVehicle | VehicleType::Van => (2.5, 8.0),
            VehicleType::Bus | VehicleType::HeavyVehicle => (2.5, 12.0),
            VehicleType::MotorCycle | VehicleType::Bicycle => (0.5, 1.5),
            VehicleType::Pedestrian => (0.5, 0.5),
        }
    }

    /// Default length in meters.
    pub fn default_length(&self) -> f64 {
        self.default_size().1
    }

    /// Maps the NGSIM `v_Class` code (1 = motorcycle, 2 = car, 3 = truck).
    pub fn from_ngsim_class(code: u8) -> Option<VehicleType> {
        match code {
            1 => Some(VehicleType::MotorCycle),
            2 => Some(VehicleType::Car),
            3 => Some(VehicleType::Truck),
            _ => None,
        }
    }

    /// Returns the label used by the pNeuma vehicle table.
    pub fn label(&self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Truck => "truck",
            VehicleType::MotorCycle => "motorcycle",
            VehicleType::Taxi => "taxi",
            VehicleType::Bus => "bus",
            VehicleType::MediumVehicle => "medium vehicle",
            VehicleType::HeavyVehicle => "heavy vehicle",
            VehicleType::Pedestrian => "pedestrian",
            VehicleType::Bicycle => "bicycle",
            VehicleType::Van => "van",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for VehicleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        VehicleType::all()
            .into_iter()
            .find(|t| t.label() == wanted)
            .ok_or_else(|| format!("Unknown vehicle type: {}", s))
    }
}

// ============================================================================
// TRACK
// ============================================================================

/// The ordered measurement series of one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Vehicle this track belongs to
    pub vehicle_id: VehicleId,

    /// Vehicle class, used for the default length when none is measured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<VehicleType>,

    /// Measured vehicle length in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_length: Option<f64>,

    /// Samples ordered by frame index
    pub samples: Vec<Measurement>,
}

impl Track {
    /// Creates a track without size information.
    pub fn new(vehicle_id: VehicleId, samples: Vec<Measurement>) -> Self {
        Self {
            vehicle_id,
            vehicle_type: None,
            vehicle_length: None,
            samples,
        }
    }

    /// Sets the measured vehicle length.
    pub fn with_length(mut self, length: f64) -> Self {
        self.vehicle_length = Some(length);
        self
    }

    /// Sets the vehicle class.
    pub fn with_type(mut self, vehicle_type: VehicleType) -> Self {
        self.vehicle_type = Some(vehicle_type);
        self
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the track has no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame indices in track order.
    pub fn frames(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().map(|m| m.frame)
    }

    /// Returns the sample recorded at `frame`, if any.
    pub fn sample_at(&self, frame: u64) -> Option<&Measurement> {
        self.samples
            .binary_search_by_key(&frame, |m| m.frame)
            .ok()
            .map(|i| &self.samples[i])
    }

    /// Checks that frame indices are strictly increasing.
    pub fn validate_frame_order(&self) -> Result<(), SmoothingError> {
        for pair in self.samples.windows(2) {
            if pair[1].frame <= pair[0].frame {
                return Err(SmoothingError::malformed(format!(
                    "vehicle {}: frame {} follows frame {}",
                    self.vehicle_id, pair[1].frame, pair[0].frame
                )));
            }
        }
        Ok(())
    }

    /// Vehicle length: the measured one, else the class default.
    pub fn resolve_length(&self) -> Result<f64, SmoothingError> {
        match (self.vehicle_length, self.vehicle_type) {
            (Some(length), _) if length.is_finite() && length > 0.0 => Ok(length),
            (Some(length), _) => Err(SmoothingError::malformed(format!(
                "vehicle {}: invalid length {}",
                self.vehicle_id, length
            ))),
            (None, Some(vehicle_type)) => Ok(vehicle_type.default_length()),
            (None, None) => Err(SmoothingError::malformed(format!(
                "vehicle {}: neither length nor vehicle type known",
                self.vehicle_id
            ))),
        }
    }
}

// ============================================================================
// DATASET
// ============================================================================

/// All tracks of one dataset load, sharing a sampling interval and a
/// measurement layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Which state components the measurements carry
    pub variant: ObservationVariant,

    /// Fixed sampling interval Δt in seconds
    pub dt: f64,

    /// One track per vehicle
    pub tracks: Vec<Track>,
}

impl Dataset {
    /// Creates a dataset.
    pub fn new(variant: ObservationVariant, dt: f64, tracks: Vec<Track>) -> Self {
        Self { variant, dt, tracks }
    }

    /// Total number of samples over all tracks.
    pub fn total_samples(&self) -> usize {
        self.tracks.iter().map(Track::len).sum()
    }

    /// Looks up a track by vehicle id.
    pub fn track(&self, vehicle_id: VehicleId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.vehicle_id == vehicle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight(n: u64) -> Vec<Measurement> {
        (0..n).map(|k| Measurement::new(k, k as f64, 0.0)).collect()
    }

    #[test]
    fn test_frame_order_validation() {
        assert!(Track::new(1, straight(6)).validate_frame_order().is_ok());

        let mut samples = straight(6);
        samples[3].frame = 2;
        let err = Track::new(1, samples).validate_frame_order().unwrap_err();
        assert_eq!(err.kind(), "malformed_track");

        let mut samples = straight(6);
        samples[4].frame = 1;
        assert!(Track::new(1, samples).validate_frame_order().is_err());
    }

    #[test]
    fn test_resolve_length_prefers_measurement() {
        let track = Track::new(1, straight(6))
            .with_type(VehicleType::Bus)
            .with_length(5.0);
        assert_eq!(track.resolve_length().unwrap(), 5.0);

        let track = Track::new(1, straight(6)).with_type(VehicleType::Bus);
        assert_eq!(track.resolve_length().unwrap(), 12.0);

        assert!(Track::new(1, straight(6)).resolve_length().is_err());
        assert!(Track::new(1, straight(6)).with_length(-1.0).resolve_length().is_err());
    }

    #[test]
    fn test_vehicle_type_parsing() {
        assert_eq!(" Car ".parse::<VehicleType>().unwrap(), VehicleType::Car);
        assert_eq!("heavy vehicle".parse::<VehicleType>().unwrap(), VehicleType::HeavyVehicle);
        assert!("spaceship".parse::<VehicleType>().is_err());

        // Label and size agree: heavy is the 12 m class
        assert_eq!("heavy vehicle".parse::<VehicleType>().unwrap().default_length(), 12.0);
        assert_eq!("medium vehicle".parse::<VehicleType>().unwrap().default_length(), 8.0);
        assert_eq!(VehicleType::HeavyVehicle.label(), "heavy vehicle");

        assert_eq!(VehicleType::from_ngsim_class(1), Some(VehicleType::MotorCycle));
        assert_eq!(VehicleType::from_ngsim_class(3), Some(VehicleType::Truck));
        assert_eq!(VehicleType::from_ngsim_class(9), None);
    }

    #[test]
    fn test_sample_lookup() {
        let samples: Vec<Measurement> = (0..6).map(|k| Measurement::new(10 + 2 * k, 0.0, 0.0)).collect();
        let track = Track::new(7, samples);
        assert_eq!(track.sample_at(14).map(|m| m.frame), Some(14));
        assert!(track.sample_at(15).is_none());
    }
}
