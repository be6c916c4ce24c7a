use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::error::UkfResult;
use crate::filters::{MerweScaled, Ukf};
use crate::models::{ACCEL, HEADING, SPEED, STATE_DIM, YAW_RATE};
use crate::types::{check_indices, diag, MeasMat, StateMat, StateVec};

fn default_scale() -> f64 {
    1.0
}

/// One sensor channel: which state components it observes, where its
/// readings live in a log row, and its noise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,

    /// Observed state components, in the order of `columns`
    pub indices: Vec<usize>,

    /// Log columns holding the readings
    pub columns: Vec<usize>,

    /// Diagonal of the measurement noise R
    pub noise: Vec<f64>,

    /// Multiplier applied to raw readings
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl SensorConfig {
    pub fn noise_matrix(&self) -> MeasMat {
        diag(&self.noise)
    }
}

/// Filter tuning and sensor layout for a replay run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Diagonal of the process noise Q
    pub process_noise: Vec<f64>,

    pub initial_state: Vec<f64>,

    /// Diagonal of the initial covariance P0
    pub initial_variance: Vec<f64>,

    pub alpha: f64,
    pub kappa: f64,
    pub beta: f64,

    /// Column with the timestamp [s]
    pub time_column: usize,

    /// Columns holding the reference state, one per state component
    pub truth_columns: Vec<usize>,

    /// Fused in this order every cycle
    pub sensors: Vec<SensorConfig>,
}

impl TrackerConfig {
    /// IMU on (yaw rate, accel) plus a combined compass/encoder channel on
    /// (heading, speed).
    pub fn combined() -> Self {
        Self {
            process_noise: vec![0.0001, 0.0001, 0.0004, 0.0025, 0.0025, 0.0025],
            initial_state: vec![0.0; STATE_DIM],
            initial_variance: vec![0.0001; STATE_DIM],
            alpha: 0.04,
            kappa: 0.0,
            beta: 2.0,
            time_column: 0,
            truth_columns: vec![5, 6, 4, 3, 2, 1],
            sensors: vec![
                SensorConfig {
                    name: "imu".to_string(),
                    indices: vec![YAW_RATE, ACCEL],
                    columns: vec![8, 7],
                    noise: vec![0.01, 0.03],
                    scale: 1.0,
                },
                SensorConfig {
                    name: "compass_encoder".to_string(),
                    indices: vec![HEADING, SPEED],
                    columns: vec![9, 10],
                    noise: vec![0.02, 0.001],
                    scale: 1.0,
                },
            ],
        }
    }

    /// Doubled process noise, compass and encoder fused as separate sensors,
    /// every reading doubled as in the logged split run.
    pub fn split() -> Self {
        Self {
            process_noise: vec![0.0002, 0.0002, 0.0008, 0.005, 0.005, 0.005],
            initial_state: vec![0.0; STATE_DIM],
            initial_variance: vec![0.0002; STATE_DIM],
            alpha: 0.04,
            kappa: 0.0,
            beta: 2.0,
            time_column: 0,
            truth_columns: vec![5, 6, 4, 3, 2, 1],
            sensors: vec![
                SensorConfig {
                    name: "imu".to_string(),
                    indices: vec![YAW_RATE, ACCEL],
                    columns: vec![8, 7],
                    noise: vec![0.02, 0.06],
                    scale: 2.0,
                },
                SensorConfig {
                    name: "compass".to_string(),
                    indices: vec![HEADING],
                    columns: vec![9],
                    noise: vec![0.04],
                    scale: 2.0,
                },
                SensorConfig {
                    name: "encoder".to_string(),
                    indices: vec![SPEED],
                    columns: vec![10],
                    noise: vec![0.002],
                    scale: 2.0,
                },
            ],
        }
    }

    pub fn preset(name: &str) -> anyhow::Result<Self> {
        match name {
            "combined" => Ok(Self::combined()),
            "split" => Ok(Self::split()),
            other => bail!("Unknown preset '{other}' (expected combined or split)"),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn state_dim(&self) -> usize {
        self.initial_state.len()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let n = self.state_dim();
        if n == 0 {
            bail!("initial_state must not be empty");
        }
        if self.process_noise.len() != n {
            bail!("process_noise has {} entries, state has {n}", self.process_noise.len());
        }
        if self.initial_variance.len() != n {
            bail!("initial_variance has {} entries, state has {n}", self.initial_variance.len());
        }
        if self.process_noise.iter().any(|q| !(q.is_finite() && *q >= 0.0)) {
            bail!("process_noise entries must be finite and non-negative");
        }
        if self.initial_variance.iter().any(|p| !(p.is_finite() && *p > 0.0)) {
            bail!("initial_variance entries must be finite and positive");
        }
        if !self.truth_columns.is_empty() && self.truth_columns.len() != n {
            bail!("truth_columns has {} entries, state has {n}", self.truth_columns.len());
        }
        MerweScaled::new(self.alpha, self.kappa, self.beta).validate(n)?;

        for sensor in &self.sensors {
            check_indices(&sensor.indices, n).with_context(|| format!("sensor '{}'", sensor.name))?;
            let m = sensor.indices.len();
            if sensor.columns.len() != m || sensor.noise.len() != m {
                bail!(
                    "sensor '{}': {m} indices but {} columns and {} noise entries",
                    sensor.name,
                    sensor.columns.len(),
                    sensor.noise.len()
                );
            }
            if sensor.noise.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
                bail!("sensor '{}': noise entries must be finite and positive", sensor.name);
            }
            if !sensor.scale.is_finite() {
                bail!("sensor '{}': scale must be finite", sensor.name);
            }
        }
        Ok(())
    }

    pub fn params(&self) -> MerweScaled {
        MerweScaled::new(self.alpha, self.kappa, self.beta)
    }

    pub fn build_filter<F>(&self, process_fn: F) -> UkfResult<Ukf<F>>
    where
        F: Fn(&StateVec, f64) -> StateVec,
    {
        let q: StateMat = diag(&self.process_noise);
        let p0: StateMat = diag(&self.initial_variance);
        Ukf::new(
            self.state_dim(),
            q,
            StateVec::from_column_slice(&self.initial_state),
            p0,
            self.params(),
            process_fn,
        )
    }
}
