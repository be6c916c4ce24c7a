/// State estimators
///
/// Scaled sigma point generation and the unscented Kalman filter built on it.

pub mod sigma_points;
pub mod ukf;

pub use sigma_points::{MerweScaled, SigmaPoints, UtWeights};
pub use ukf::{Innovation, MeasurementPrediction, Ukf, UkfSummary};
