//! Replay driver: one predict per logged sample, then every configured
//! sensor fused in order.
//!
//! Recovery lives here, not in the estimator. A predict that fails on a
//! non-positive-definite covariance is retried once after projecting P to
//! the nearest SPD matrix; a sensor update that fails is skipped.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::{SensorConfig, TrackerConfig};
use crate::dataset::{Dataset, Sample};
use crate::error::UkfResult;
use crate::filters::Ukf;
use crate::types::{nearest_spd, MeasMat, StateVec};

/// Smallest eigenvalue kept when repairing the covariance.
pub const SPD_FLOOR: f64 = 1e-9;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensorInnovation {
    pub sensor: String,
    pub nis: f64,
}

/// One filter cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackRecord {
    pub time: f64,
    pub estimate: Vec<f64>,
    pub truth: Option<Vec<f64>>,
    pub covariance_trace: f64,
    pub innovations: Vec<SensorInnovation>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackReport {
    pub steps: usize,
    /// Per-component RMSE against the truth columns, if the log has them
    pub rmse: Option<Vec<f64>>,
    pub final_state: Vec<f64>,
    pub final_covariance_trace: f64,
    pub recoveries: u64,
    pub skipped_updates: u64,
}

struct Channel {
    config: SensorConfig,
    noise: MeasMat,
}

pub struct Tracker<F>
where
    F: Fn(&StateVec, f64) -> StateVec,
{
    ukf: Ukf<F>,
    channels: Vec<Channel>,
    time_column: usize,
    truth_columns: Vec<usize>,
    last_time: f64,
    records: Vec<TrackRecord>,
    recoveries: u64,
    skipped_updates: u64,
}

impl<F> Tracker<F>
where
    F: Fn(&StateVec, f64) -> StateVec,
{
    pub fn new(config: &TrackerConfig, process_fn: F) -> anyhow::Result<Self> {
        config.validate()?;
        let ukf = config.build_filter(process_fn)?;
        let channels = config
            .sensors
            .iter()
            .map(|s| Channel {
                noise: s.noise_matrix(),
                config: s.clone(),
            })
            .collect();

        Ok(Self {
            ukf,
            channels,
            time_column: config.time_column,
            truth_columns: config.truth_columns.clone(),
            last_time: 0.0,
            records: Vec::new(),
            recoveries: 0,
            skipped_updates: 0,
        })
    }

    pub fn filter(&self) -> &Ukf<F> {
        &self.ukf
    }

    pub fn records(&self) -> &[TrackRecord] {
        &self.records
    }

    /// Run one cycle on a logged sample.
    ///
    /// Every column is read before the filter moves, so a malformed sample
    /// leaves the tracker exactly as it was.
    pub fn step(&mut self, sample: &Sample) -> UkfResult<&TrackRecord> {
        let time = sample.get(self.time_column)?;
        let readings = self
            .channels
            .iter()
            .map(|c| sample.select(&c.config.columns, c.config.scale))
            .collect::<UkfResult<Vec<_>>>()?;
        let truth = if self.truth_columns.is_empty() {
            None
        } else {
            Some(sample.select(&self.truth_columns, 1.0)?.iter().copied().collect())
        };

        self.predict_with_recovery(time - self.last_time)?;
        self.last_time = time;

        let mut innovations = Vec::with_capacity(self.channels.len());
        for (channel, z) in self.channels.iter().zip(&readings) {
            match self.ukf.update(&channel.config.indices, z, &channel.noise) {
                Ok(innov) => innovations.push(SensorInnovation {
                    sensor: channel.config.name.clone(),
                    nis: innov.nis,
                }),
                Err(e) => {
                    log::warn!("[TRACKER] t={time:.3} skipping '{}': {e}", channel.config.name);
                    self.skipped_updates += 1;
                }
            }
        }

        self.records.push(TrackRecord {
            time,
            estimate: self.ukf.get_state().iter().copied().collect(),
            truth,
            covariance_trace: self.ukf.get_covariance().trace(),
            innovations,
        });
        let record = &self.records[self.records.len() - 1];
        log::debug!(
            "[TRACKER] t={:.3} trace={:.6} estimate={:?}",
            record.time,
            record.covariance_trace,
            record.estimate
        );
        Ok(record)
    }

    fn predict_with_recovery(&mut self, dt: f64) -> UkfResult<()> {
        match self.ukf.predict(dt) {
            Err(e) if e.is_numerical() => {
                log::warn!("[TRACKER] predict failed ({e}), repairing covariance and retrying");
                let repaired = nearest_spd(self.ukf.get_covariance(), SPD_FLOOR);
                self.ukf.set_covariance(repaired)?;
                self.recoveries += 1;
                self.ukf.predict(dt)
            }
            other => other,
        }
    }

    /// Replay a whole dataset.
    pub fn run(&mut self, dataset: &Dataset) -> UkfResult<TrackReport> {
        for sample in &dataset.samples {
            self.step(sample)?;
        }
        Ok(self.report())
    }

    pub fn report(&self) -> TrackReport {
        TrackReport {
            steps: self.records.len(),
            rmse: rmse(&self.records),
            final_state: self.ukf.get_state().iter().copied().collect(),
            final_covariance_trace: self.ukf.get_covariance().trace(),
            recoveries: self.recoveries,
            skipped_updates: self.skipped_updates,
        }
    }
}

/// Column-wise RMSE of estimate - truth over every record with truth.
fn rmse(records: &[TrackRecord]) -> Option<Vec<f64>> {
    let with_truth: Vec<(&Vec<f64>, &Vec<f64>)> = records
        .iter()
        .filter_map(|r| r.truth.as_ref().map(|t| (&r.estimate, t)))
        .collect();
    let dim = with_truth.first()?.0.len();

    let mut errors = Array2::<f64>::zeros((with_truth.len(), dim));
    for (row, (estimate, truth)) in with_truth.iter().enumerate() {
        for col in 0..dim {
            errors[[row, col]] = estimate[col] - truth[col];
        }
    }
    let mse: Array1<f64> = errors.mapv(|e| e * e).mean_axis(Axis(0))?;
    Some(mse.mapv(f64::sqrt).to_vec())
}
