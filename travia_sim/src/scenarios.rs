//! Synthetic trajectory scenarios.

use travia_core::ObservationVariant;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// TRV-001: noise-free straight lines at several headings
    StraightLine,

    /// TRV-002: noise-free constant-radius turns
    CircularArc,

    /// TRV-003: parked vehicles next to moving traffic
    Stationary,

    /// TRV-004: tracks around the minimum sample count
    ShortTracks,

    /// TRV-005: every motion pattern plus malformed input in one batch
    MixedBatch,

    /// TRV-006: NGSIM-like freeway with sensor noise
    NoisyHighway,

    /// TRV-007: pNeuma-like city traffic without acceleration or lengths
    UrbanGrid,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::StraightLine,
            ScenarioId::CircularArc,
            ScenarioId::Stationary,
            ScenarioId::ShortTracks,
            ScenarioId::MixedBatch,
            ScenarioId::NoisyHighway,
            ScenarioId::UrbanGrid,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::StraightLine => "straight_line",
            ScenarioId::CircularArc => "circular_arc",
            ScenarioId::Stationary => "stationary",
            ScenarioId::ShortTracks => "short_tracks",
            ScenarioId::MixedBatch => "mixed_batch",
            ScenarioId::NoisyHighway => "noisy_highway",
            ScenarioId::UrbanGrid => "urban_grid",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::StraightLine => "Exact straight lines, heading must match the line direction",
            ScenarioId::CircularArc => "Exact arcs, heading must turn at speed/radius",
            ScenarioId::Stationary => "Zero-displacement tracks must not break the batch",
            ScenarioId::ShortTracks => "Tracks of 2-8 samples, 5 or fewer are skipped",
            ScenarioId::MixedBatch => "Lines, arcs, lane changes, short and malformed tracks together",
            ScenarioId::NoisyHighway => "20 vehicles at 10 Hz with position, speed and acceleration noise",
            ScenarioId::UrbanGrid => "Turning city traffic at 25 Hz, speed-only measurements",
        }
    }

    /// Measurement layout the scenario's dataset uses.
    pub fn variant(&self) -> ObservationVariant {
        match self {
            ScenarioId::UrbanGrid => ObservationVariant::ThreeDim,
            _ => ObservationVariant::FourDim,
        }
    }

    /// Sampling interval in seconds.
    pub fn dt(&self) -> f64 {
        match self {
            ScenarioId::UrbanGrid => 0.04,
            _ => 0.1,
        }
    }

    /// Returns true if the scenario adds sensor noise.
    pub fn is_noisy(&self) -> bool {
        matches!(self, ScenarioId::NoisyHighway | ScenarioId::UrbanGrid)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "straight_line" | "straight" | "trv-001" => Ok(ScenarioId::StraightLine),
            "circular_arc" | "arc" | "trv-002" => Ok(ScenarioId::CircularArc),
            "stationary" | "trv-003" => Ok(ScenarioId::Stationary),
            "short_tracks" | "short" | "trv-004" => Ok(ScenarioId::ShortTracks),
            "mixed_batch" | "mixed" | "trv-005" => Ok(ScenarioId::MixedBatch),
            "noisy_highway" | "highway" | "ngsim" | "trv-006" => Ok(ScenarioId::NoisyHighway),
            "urban_grid" | "urban" | "pneuma" | "trv-007" => Ok(ScenarioId::UrbanGrid),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
