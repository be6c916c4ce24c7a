//! Unscented Kalman filter for nonlinear state estimation with
//! partial-state sensors, plus the tooling to replay logged runs through it.

pub mod config;
pub mod dataset;
pub mod error;
pub mod filters;
pub mod models;
pub mod tracker;
pub mod types;

pub use config::{SensorConfig, TrackerConfig};
pub use error::{UkfError, UkfResult};
pub use filters::{Innovation, MerweScaled, Ukf, UkfSummary};
pub use tracker::{TrackReport, Tracker};
pub use types::Measurement;
