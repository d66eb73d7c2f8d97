//! Ground truth oracle for simulation.
//!
//! The Oracle keeps the exact trajectory of every simulated vehicle and turns
//! it into the noisy per-frame samples a dataset loader would deliver:
//! - Closed-form kinematics (lines, arcs, accelerating runs, lane changes)
//! - Sensor noise on position, speed and acceleration
//! - Datasets in either observation layout

use nalgebra::Vector2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use travia_core::{Dataset, Measurement, ObservationVariant, Track, VehicleId, VehicleType};

/// How a simulated vehicle moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Motion {
    /// Constant velocity along `heading`
    Straight { heading: f64, speed: f64 },

    /// Constant speed on a circle; positive radius turns left
    Arc { heading: f64, speed: f64, radius: f64 },

    /// Constant acceleration along `heading`
    Accelerating { heading: f64, speed: f64, acceleration: f64 },

    /// Parked
    Stationary,

    /// Straight run with a smooth sideways shift of `offset` meters
    LaneChange { heading: f64, speed: f64, offset: f64, duration: f64 },
}

/// Exact vehicle state at one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthSample {
    pub frame: u64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

/// A ground truth vehicle in the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthVehicle {
    /// Unique vehicle ID
    pub id: VehicleId,

    /// Vehicle class
    pub vehicle_type: VehicleType,

    /// True length in meters
    pub length: f64,

    /// Motion pattern
    pub motion: Motion,

    /// Exact states, one per frame
    pub samples: Vec<TruthSample>,
}

impl GroundTruthVehicle {
    /// Exact state at a frame.
    pub fn sample_at(&self, frame: u64) -> Option<&TruthSample> {
        self.samples
            .binary_search_by_key(&frame, |s| s.frame)
            .ok()
            .map(|i| &self.samples[i])
    }
}

/// Evaluates a motion pattern `t` seconds after it started at `origin`.
pub fn motion_state(motion: &Motion, origin: Vector2<f64>, t: f64) -> (Vector2<f64>, f64, f64, f64) {
    match *motion {
        Motion::Straight { heading, speed } => {
            let dir = Vector2::new(heading.cos(), heading.sin());
            (origin + dir * speed * t, heading, speed, 0.0)
        }
        Motion::Arc { heading, speed, radius } => {
            let turn = radius.signum();
            let r = radius.abs();
            let theta = heading + turn * speed / r * t;
            let centre = origin - Vector2::new(heading.sin(), -heading.cos()) * turn * r;
            let position = centre + Vector2::new(theta.sin(), -theta.cos()) * turn * r;
            (position, theta, speed, 0.0)
        }
        Motion::Accelerating { heading, speed, acceleration } => {
            let dir = Vector2::new(heading.cos(), heading.sin());
            let travelled = speed * t + 0.5 * acceleration * t * t;
            (origin + dir * travelled, heading, speed + acceleration * t, acceleration)
        }
        Motion::Stationary => (origin, 0.0, 0.0, 0.0),
        Motion::LaneChange { heading, speed, offset, duration } => {
            let forward = Vector2::new(heading.cos(), heading.sin());
            let left = Vector2::new(-heading.sin(), heading.cos());
            let (lateral, lateral_rate) = if t < duration {
                let phase = PI * t / duration;
                (
                    offset * (1.0 - phase.cos()) / 2.0,
                    offset * PI / (2.0 * duration) * phase.sin(),
                )
            } else {
                (offset, 0.0)
            };
            let position = origin + forward * speed * t + left * lateral;
            (
                position,
                heading + lateral_rate.atan2(speed),
                speed.hypot(lateral_rate),
                0.0,
            )
        }
    }
}

/// The Oracle - maintains ground truth and generates noisy datasets.
pub struct Oracle {
    /// Master seed
    seed: u64,

    /// RNG for sensor noise
    noise_rng: ChaCha8Rng,

    /// Sampling interval in seconds
    dt: f64,

    /// All ground truth vehicles, in spawn order
    vehicles: Vec<GroundTruthVehicle>,

    /// Next vehicle ID
    next_id: VehicleId,

    /// Position noise standard deviation (meters)
    position_noise_std: f64,

    /// Speed noise standard deviation (m/s)
    speed_noise_std: f64,

    /// Acceleration noise standard deviation (m/s²)
    acceleration_noise_std: f64,
}

impl Oracle {
    /// Creates a noise-free Oracle sampling every `dt` seconds.
    pub fn new(seed: u64, dt: f64) -> Self {
        Self {
            seed,
            noise_rng: ChaCha8Rng::seed_from_u64(seed),
            dt,
            vehicles: Vec::new(),
            next_id: 1,
            position_noise_std: 0.0,
            speed_noise_std: 0.0,
            acceleration_noise_std: 0.0,
        }
    }

    /// Sets the sensor noise standard deviations.
    pub fn set_noise(&mut self, position: f64, speed: f64, acceleration: f64) {
        self.position_noise_std = position;
        self.speed_noise_std = speed;
        self.acceleration_noise_std = acceleration;
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Spawns a vehicle whose first sample is at `start_frame`.
    pub fn spawn_vehicle(
        &mut self,
        origin: Vector2<f64>,
        motion: Motion,
        start_frame: u64,
        frames: u64,
        vehicle_type: VehicleType,
    ) -> VehicleId {
        let id = self.next_id;
        self.next_id += 1;

        let samples = (0..frames)
            .map(|k| {
                let (position, heading, velocity, acceleration) =
                    motion_state(&motion, origin, k as f64 * self.dt);
                TruthSample {
                    frame: start_frame + k,
                    x: position.x,
                    y: position.y,
                    heading,
                    velocity,
                    acceleration,
                }
            })
            .collect();

        self.vehicles.push(GroundTruthVehicle {
            id,
            vehicle_type,
            length: vehicle_type.default_length(),
            motion,
            samples,
        });

        id
    }

    /// All vehicles in spawn order.
    pub fn vehicles(&self) -> &[GroundTruthVehicle] {
        &self.vehicles
    }

    /// Returns a specific vehicle by ID.
    pub fn vehicle(&self, id: VehicleId) -> Option<&GroundTruthVehicle> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    fn noise(&mut self, std_dev: f64) -> f64 {
        if std_dev <= 0.0 {
            return 0.0;
        }
        Normal::new(0.0, std_dev)
            .map(|normal| normal.sample(&mut self.noise_rng))
            .unwrap_or(0.0)
    }

    /// Generates the noisy dataset of every vehicle.
    ///
    /// `FourDim` datasets carry acceleration and measured lengths. `ThreeDim`
    /// datasets carry neither, so lengths come from the vehicle class.
    pub fn observe(&mut self, variant: ObservationVariant) -> Dataset {
        let vehicles = self.vehicles.clone();
        let tracks = vehicles
            .iter()
            .map(|vehicle| {
                let samples = vehicle
                    .samples
                    .iter()
                    .map(|truth| {
                        let mut m = Measurement::new(
                            truth.frame,
                            truth.x + self.noise(self.position_noise_std),
                            truth.y + self.noise(self.position_noise_std),
                        )
                        .with_speed(truth.velocity + self.noise(self.speed_noise_std));
                        if variant.observes_acceleration() {
                            m = m.with_acceleration(
                                truth.acceleration + self.noise(self.acceleration_noise_std),
                            );
                        }
                        m
                    })
                    .collect();

                let track = Track::new(vehicle.id, samples).with_type(vehicle.vehicle_type);
                match variant {
                    ObservationVariant::FourDim => track.with_length(vehicle.length),
                    ObservationVariant::ThreeDim => track,
                }
            })
            .collect();

        Dataset::new(variant, self.dt, tracks)
    }
}
