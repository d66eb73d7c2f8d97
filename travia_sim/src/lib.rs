//! Travia Deterministic Trajectory Harness
//!
//! Generates synthetic vehicle tracks with known ground truth, runs them
//! through the Travia smoother and scores the result.
//!
//! All randomness derives from a single 64-bit seed, so a failing run can be
//! replayed exactly.
//!
//! # Usage
//!
//! ```ignore
//! use travia_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::NoisyHighway);
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod metrics;
mod oracle;
mod runner;
pub mod scenarios;

pub use error::SimError;
pub use exporter::{FrameExport, SmoothedFrame, SmoothingExport, VehicleExport};
pub use metrics::{ErrorStats, ScenarioMetrics};
pub use oracle::{motion_state, GroundTruthVehicle, Motion, Oracle, TruthSample};
pub use runner::{load_config, ScenarioResult, ScenarioRun, ScenarioRunner, ScenarioSetup};
