use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::sigma_points::{deviations, weighted_outer, MerweScaled, UtWeights};
use crate::error::{UkfError, UkfResult};
use crate::types::{
    check_indices, ensure_finite_mat, ensure_finite_vec, ensure_square, is_symmetric, symmetrize,
    MeasMat, MeasVec, Measurement, StateMat, StateVec, SYMMETRY_TOL,
};

/// Serializable snapshot of the estimator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UkfSummary {
    /// Current state estimate
    pub state: Vec<f64>,

    /// Covariance trace for uncertainty
    pub covariance_trace: f64,

    /// Cycle counters
    pub predicts: u64,
    pub updates: u64,
}

/// Predicted measurement statistics for an index set.
#[derive(Clone, Debug)]
pub struct MeasurementPrediction {
    /// z' = Σ wm[i] * z_sigma[i]
    pub mean: MeasVec,
    /// Pz, including the measurement noise
    pub covariance: MeasMat,
    /// Pxz cross-covariance, n x m
    pub cross_covariance: DMatrix<f64>,
}

/// Result of fusing one measurement.
#[derive(Clone, Debug)]
pub struct Innovation {
    /// measurement - z'
    pub residual: MeasVec,
    /// Innovation covariance Pz
    pub covariance: MeasMat,
    /// Normalized innovation squared, for consistency monitoring
    pub nis: f64,
}

/// Unscented Kalman filter over an n-dimensional state with additive
/// process noise and direct (index-projection) measurements.
pub struct Ukf<F>
where
    F: Fn(&StateVec, f64) -> StateVec,
{
    /// State vector [n]
    state: StateVec,

    /// Covariance matrix [n x n]
    covariance: StateMat,

    /// Process noise matrix [n x n]
    process_noise: StateMat,

    /// Unscented transform parameters
    params: MerweScaled,

    /// Weights for sigma points (fixed for the filter's lifetime)
    weights: UtWeights,

    /// Caller-supplied transition x' = f(x, dt)
    process_fn: F,

    predicts: u64,
    updates: u64,
}

impl<F> Ukf<F>
where
    F: Fn(&StateVec, f64) -> StateVec,
{
    /// Create a new UKF.
    ///
    /// Dimensions, parameters and the symmetry of `Q` and `P0` are validated
    /// here. Positive-definiteness of `P0` is not: an indefinite `P0` is
    /// reported by the first `predict`/`update` as a numerical error.
    pub fn new(
        n: usize,
        process_noise: StateMat,
        initial_state: StateVec,
        initial_covariance: StateMat,
        params: MerweScaled,
        process_fn: F,
    ) -> UkfResult<Self> {
        params.validate(n)?;
        if initial_state.len() != n {
            return Err(UkfError::dimension("initial state length", n, initial_state.len()));
        }
        check_covariance(&initial_covariance, n, "initial covariance")?;
        check_process_noise(&process_noise, n)?;
        ensure_finite_vec(&initial_state, "initial state")?;

        let weights = params.weights(n);

        Ok(Self {
            state: initial_state,
            covariance: initial_covariance,
            process_noise,
            params,
            weights,
            process_fn,
            predicts: 0,
            updates: 0,
        })
    }

    pub fn dim(&self) -> usize {
        self.state.len()
    }

    pub fn params(&self) -> &MerweScaled {
        &self.params
    }

    /// Get current state
    pub fn get_state(&self) -> &StateVec {
        &self.state
    }

    /// Get current covariance
    pub fn get_covariance(&self) -> &StateMat {
        &self.covariance
    }

    pub fn process_noise(&self) -> &StateMat {
        &self.process_noise
    }

    pub fn summary(&self) -> UkfSummary {
        UkfSummary {
            state: self.state.iter().copied().collect(),
            covariance_trace: self.covariance.trace(),
            predicts: self.predicts,
            updates: self.updates,
        }
    }

    /// Replace Q between cycles (time-varying process noise).
    pub fn set_process_noise(&mut self, process_noise: StateMat) -> UkfResult<()> {
        check_process_noise(&process_noise, self.dim())?;
        self.process_noise = process_noise;
        Ok(())
    }

    /// Overwrite P, e.g. after caller-side covariance repair.
    pub fn set_covariance(&mut self, covariance: StateMat) -> UkfResult<()> {
        check_covariance(&covariance, self.dim(), "covariance")?;
        self.covariance = covariance;
        Ok(())
    }

    /// Predict step: propagate through the process model using the unscented transform.
    ///
    /// All-or-nothing: on error the state and covariance are untouched.
    pub fn predict(&mut self, dt: f64) -> UkfResult<()> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(UkfError::InvalidParameter(format!(
                "time step must be finite and non-negative, got {dt}"
            )));
        }
        let n = self.dim();

        // 1. Generate sigma points
        let sigmas = self.params.generate(&self.state, &self.covariance)?;

        // 2. Propagate through the process model
        let mut propagated = DMatrix::zeros(n, sigmas.count());
        for (i, sigma) in sigmas.points.column_iter().enumerate() {
            let next = (self.process_fn)(&sigma.into_owned(), dt);
            if next.len() != n {
                return Err(UkfError::dimension("process function output", n, next.len()));
            }
            propagated.set_column(i, &next);
        }
        ensure_finite_mat(&propagated, "propagated sigma points")?;

        // 3. Recombine
        let x_pred = &propagated * &self.weights.mean;
        let dev = deviations(&propagated, &x_pred);
        let mut p_pred = weighted_outer(&dev, &dev, &self.weights.covariance) + &self.process_noise;
        symmetrize(&mut p_pred);
        ensure_finite_vec(&x_pred, "predicted state")?;
        ensure_finite_mat(&p_pred, "predicted covariance")?;

        // 4. Commit
        self.state = x_pred;
        self.covariance = p_pred;
        self.predicts += 1;

        log::debug!(
            "[UKF] predict #{} dt={:.4} trace={:.6}",
            self.predicts,
            dt,
            self.covariance.trace()
        );
        Ok(())
    }

    /// Unscented statistics of the projection onto `indices`, without
    /// touching the filter.
    pub fn predict_measurement(
        &self,
        indices: &[usize],
        noise: &MeasMat,
    ) -> UkfResult<MeasurementPrediction> {
        let n = self.dim();
        check_indices(indices, n)?;
        ensure_square(noise, indices.len(), "measurement noise")?;
        ensure_finite_mat(noise, "measurement noise")?;

        // 1. Generate sigma points
        let sigmas = self.params.generate(&self.state, &self.covariance)?;

        // 2. Project sigma points into measurement space
        let z_sigmas = sigmas.points.select_rows(indices.iter());

        // 3. Predicted measurement mean and covariance
        let z_pred = &z_sigmas * &self.weights.mean;
        let z_dev = deviations(&z_sigmas, &z_pred);
        let p_zz = weighted_outer(&z_dev, &z_dev, &self.weights.covariance) + noise;

        // 4. Cross-covariance against the current mean
        let x_dev = deviations(&sigmas.points, &self.state);
        let p_xz = weighted_outer(&x_dev, &z_dev, &self.weights.covariance);

        Ok(MeasurementPrediction {
            mean: z_pred,
            covariance: p_zz,
            cross_covariance: p_xz,
        })
    }

    /// Fuse one sensor reading that observes the state components `indices`.
    ///
    /// Multiple calls per cycle are applied sequentially, each starting from
    /// the state left by the previous one, so call order matters when the
    /// sensors are correlated.
    pub fn update(
        &mut self,
        indices: &[usize],
        measurement: &MeasVec,
        noise: &MeasMat,
    ) -> UkfResult<Innovation> {
        let m = indices.len();
        if measurement.len() != m {
            return Err(UkfError::dimension("measurement length", m, measurement.len()));
        }
        ensure_square(noise, m, "measurement noise")?;
        ensure_finite_vec(measurement, "measurement")?;

        let pred = self.predict_measurement(indices, noise)?;

        // Kalman gain K = Pxz * Pz^-1, via Cholesky of the SPD innovation covariance
        let Some(chol) = pred.covariance.clone().cholesky() else {
            return Err(UkfError::Numerical(
                "innovation covariance is singular or not positive-definite".to_string(),
            ));
        };
        let gain = chol.solve(&pred.cross_covariance.transpose()).transpose();

        let residual = measurement - &pred.mean;
        let nis = residual.dot(&chol.solve(&residual));

        let x_new = &self.state + &gain * &residual;
        let mut p_new = &self.covariance - &gain * &pred.covariance * gain.transpose();
        symmetrize(&mut p_new);
        ensure_finite_vec(&x_new, "updated state")?;
        ensure_finite_mat(&p_new, "updated covariance")?;

        self.state = x_new;
        self.covariance = p_new;
        self.updates += 1;

        log::debug!(
            "[UKF] update {:?} nis={:.4} trace={:.6}",
            indices,
            nis,
            self.covariance.trace()
        );

        Ok(Innovation {
            residual,
            covariance: pred.covariance,
            nis,
        })
    }

    pub fn update_with(&mut self, measurement: &Measurement) -> UkfResult<Innovation> {
        self.update(&measurement.indices, &measurement.values, &measurement.noise)
    }
}

fn check_process_noise(q: &StateMat, n: usize) -> UkfResult<()> {
    check_covariance(q, n, "process noise")
}

/// Square n x n, finite and symmetric. Cholesky only reads the lower
/// triangle, so an asymmetric matrix would be silently half-ignored.
fn check_covariance(m: &StateMat, n: usize, what: &str) -> UkfResult<()> {
    ensure_square(m, n, what)?;
    ensure_finite_mat(m, what)?;
    if !is_symmetric(m, SYMMETRY_TOL) {
        return Err(UkfError::InvalidParameter(format!("{what} must be symmetric")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{bicycle, identity, ACCEL, HEADING, SPEED, STATE_DIM, YAW_RATE};
    use crate::types::diag;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn coupled_cov() -> StateMat {
        let mut p = diag(&[0.5, 0.4, 0.1, 0.2, 0.05, 0.05]);
        p[(0, 3)] = 0.05;
        p[(3, 0)] = 0.05;
        p[(2, 4)] = 0.01;
        p[(4, 2)] = 0.01;
        p
    }

    fn vehicle_filter(p0: StateMat) -> Ukf<fn(&StateVec, f64) -> StateVec> {
        let q = diag(&[0.0001, 0.0001, 0.0004, 0.0025, 0.0025, 0.0025]);
        Ukf::new(
            STATE_DIM,
            q,
            StateVec::zeros(STATE_DIM),
            p0,
            MerweScaled::new(0.04, 0.0, 2.0),
            bicycle as fn(&StateVec, f64) -> StateVec,
        )
        .unwrap()
    }

    fn build(
        n: usize,
        q: StateMat,
        x0: StateVec,
        p0: StateMat,
        params: MerweScaled,
    ) -> UkfResult<Ukf<fn(&StateVec, f64) -> StateVec>> {
        Ukf::new(n, q, x0, p0, params, identity as fn(&StateVec, f64) -> StateVec)
    }

    #[test]
    fn test_construction_rejects_bad_dimensions() {
        let params = MerweScaled::new(0.04, 0.0, 2.0);
        let q = StateMat::zeros(3, 3);
        let p = StateMat::identity(3, 3);

        let short = build(3, q.clone(), StateVec::zeros(2), p.clone(), params);
        assert!(matches!(short, Err(UkfError::Dimension(_))));

        let bad_p = build(3, q.clone(), StateVec::zeros(3), StateMat::identity(3, 2), params);
        assert!(matches!(bad_p, Err(UkfError::Dimension(_))));

        let bad_q = build(3, StateMat::zeros(2, 2), StateVec::zeros(3), p.clone(), params);
        assert!(matches!(bad_q, Err(UkfError::Dimension(_))));

        let empty = StateMat::zeros(0, 0);
        let zero = build(0, empty.clone(), StateVec::zeros(0), empty, params);
        assert!(matches!(zero, Err(UkfError::Dimension(_))));

        let bad_alpha = build(3, q, StateVec::zeros(3), p, MerweScaled::new(-1.0, 0.0, 2.0));
        assert!(matches!(bad_alpha, Err(UkfError::InvalidParameter(_))));
    }

    #[test]
    fn test_construction_rejects_bad_values() {
        let params = MerweScaled::new(0.5, 0.0, 2.0);

        let mut asym_q = diag(&[0.1, 0.1]);
        asym_q[(0, 1)] = 0.05;
        let bad_q = build(2, asym_q, StateVec::zeros(2), diag(&[1.0, 1.0]), params);
        assert!(matches!(bad_q, Err(UkfError::InvalidParameter(_))));

        let nan_x = StateVec::from_vec(vec![0.0, f64::NAN]);
        let bad_x = build(2, StateMat::zeros(2, 2), nan_x, diag(&[1.0, 1.0]), params);
        assert!(matches!(bad_x, Err(UkfError::Numerical(_))));

        // Only the lower triangle would reach the Cholesky factor
        let asym_p = DMatrix::from_row_slice(2, 2, &[1.0, 0.9, 0.0, 1.0]);
        let bad_p = build(2, StateMat::zeros(2, 2), StateVec::zeros(2), asym_p, params);
        assert!(matches!(bad_p, Err(UkfError::InvalidParameter(_))));
    }

    #[test]
    fn test_set_covariance_validates() {
        let mut ukf = vehicle_filter(diag(&[1e-4; 6]));
        let mut asym = diag(&[1e-2; 6]);
        asym[(1, 4)] = 1e-3;
        assert!(matches!(ukf.set_covariance(asym), Err(UkfError::InvalidParameter(_))));
        let small = StateMat::identity(5, 5);
        assert!(matches!(ukf.set_covariance(small), Err(UkfError::Dimension(_))));
        assert_eq!(ukf.get_covariance(), &diag(&[1e-4; 6]));

        ukf.set_covariance(diag(&[1e-2; 6])).unwrap();
        assert_eq!(ukf.get_covariance(), &diag(&[1e-2; 6]));
    }

    #[test]
    fn test_predict_identity_is_idempotent() {
        let x0 = StateVec::from_vec(vec![1.0, 2.0, 0.3, 4.0, -0.2, 0.1]);
        let p0 = coupled_cov();
        let mut ukf = Ukf::new(
            6,
            StateMat::zeros(6, 6),
            x0.clone(),
            p0.clone(),
            MerweScaled::new(0.5, 0.0, 2.0),
            identity,
        )
        .unwrap();

        for dt in [0.0, 0.1, 3.0] {
            ukf.predict(dt).unwrap();
            assert_relative_eq!(ukf.get_state(), &x0, epsilon = 1e-9);
            assert_relative_eq!(ukf.get_covariance(), &p0, epsilon = 1e-9);
        }
        assert_eq!(ukf.summary().predicts, 3);
    }

    #[test]
    fn test_predict_adds_process_noise() {
        let q = diag(&[0.1, 0.2]);
        let p0 = diag(&[1.0, 1.0]);
        let mut ukf = build(2, q.clone(), StateVec::zeros(2), p0, MerweScaled::default()).unwrap();
        ukf.predict(1.0).unwrap();
        assert_relative_eq!(ukf.get_covariance(), &(diag(&[1.0, 1.0]) + q), epsilon = 1e-6);
    }

    #[test]
    fn test_predict_bicycle_moves_forward() {
        let mut x0 = StateVec::zeros(STATE_DIM);
        x0[SPEED] = 2.0;
        let mut ukf = Ukf::new(
            STATE_DIM,
            StateMat::zeros(STATE_DIM, STATE_DIM),
            x0,
            diag(&[1e-6; STATE_DIM]),
            MerweScaled::new(0.04, 0.0, 2.0),
            bicycle,
        )
        .unwrap();
        ukf.predict(0.5).unwrap();
        assert_abs_diff_eq!(ukf.get_state()[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(ukf.get_state()[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_predict_rejects_negative_dt() {
        let mut ukf = vehicle_filter(diag(&[1e-4; 6]));
        assert!(matches!(ukf.predict(-0.1), Err(UkfError::InvalidParameter(_))));
        assert!(matches!(ukf.predict(f64::NAN), Err(UkfError::InvalidParameter(_))));
        assert_eq!(ukf.summary().predicts, 0);
    }

    #[test]
    fn test_predict_non_positive_definite_leaves_state() {
        let mut p0 = diag(&[1e-4; 6]);
        p0[(3, 3)] = -1.0;
        let mut ukf = vehicle_filter(p0);

        let x_before = ukf.get_state().clone();
        let p_before = ukf.get_covariance().clone();
        let err = ukf.predict(0.1).unwrap_err();
        assert!(err.is_numerical());
        assert_eq!(ukf.get_state(), &x_before);
        assert_eq!(ukf.get_covariance(), &p_before);
    }

    #[test]
    fn test_predict_nan_process_leaves_state() {
        let nan_fn = |x: &StateVec, dt: f64| {
            let mut out = x.clone();
            if dt > 0.0 {
                out[0] = f64::NAN;
            }
            out
        };
        let x0 = StateVec::from_vec(vec![1.0, 2.0]);
        let p0 = diag(&[0.5, 0.5]);
        let params = MerweScaled::default();
        let q = diag(&[0.01, 0.01]);
        let mut ukf = Ukf::new(2, q, x0.clone(), p0.clone(), params, nan_fn).unwrap();
        assert!(ukf.predict(1.0).unwrap_err().is_numerical());
        assert_eq!(ukf.get_state(), &x0);
        assert_eq!(ukf.get_covariance(), &p0);
        assert!(ukf.predict(0.0).is_ok());
    }

    #[test]
    fn test_predict_rejects_wrong_output_length() {
        let grow = |x: &StateVec, _dt: f64| StateVec::zeros(x.len() + 1);
        let mut ukf = Ukf::new(
            2,
            diag(&[0.01, 0.01]),
            StateVec::zeros(2),
            diag(&[1.0, 1.0]),
            MerweScaled::default(),
            grow,
        )
        .unwrap();
        assert!(matches!(ukf.predict(0.1), Err(UkfError::Dimension(_))));
    }

    #[test]
    fn test_zero_innovation_keeps_state() {
        let x0 = StateVec::from_vec(vec![1.0, 2.0, 0.3, 4.0, -0.2, 0.1]);
        let mut ukf = Ukf::new(
            6,
            diag(&[0.01; 6]),
            x0.clone(),
            coupled_cov(),
            MerweScaled::new(0.04, 0.0, 2.0),
            bicycle,
        )
        .unwrap();
        let noise = diag(&[0.02, 0.001]);
        let pred = ukf.predict_measurement(&[2, 3], &noise).unwrap();

        let innov = ukf.update(&[2, 3], &pred.mean, &noise).unwrap();
        assert_abs_diff_eq!(innov.nis, 0.0, epsilon = 1e-12);
        assert_relative_eq!(ukf.get_state(), &x0, epsilon = 1e-9);
        // Covariance still shrinks
        assert!(ukf.get_covariance().trace() < coupled_cov().trace());
    }

    #[test]
    fn test_update_pulls_toward_measurement() {
        let mut ukf = build(
            2,
            diag(&[0.0, 0.0]),
            StateVec::zeros(2),
            diag(&[1.0, 1.0]),
            MerweScaled::new(1e-3, 0.0, 2.0),
        )
        .unwrap();
        // Equal prior and measurement variance splits the difference
        let innov = ukf.update(&[1], &MeasVec::from_vec(vec![2.0]), &diag(&[1.0])).unwrap();
        assert_relative_eq!(ukf.get_state()[1], 1.0, epsilon = 1e-6);
        assert_relative_eq!(ukf.get_state()[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(ukf.get_covariance()[(1, 1)], 0.5, epsilon = 1e-6);
        assert_relative_eq!(ukf.get_covariance()[(0, 0)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(innov.nis, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_update_correlated_state_is_corrected() {
        let x0 = StateVec::zeros(2);
        let p0 = DMatrix::from_row_slice(2, 2, &[1.0, 0.8, 0.8, 1.0]);
        let mut ukf = build(2, diag(&[0.0, 0.0]), x0, p0, MerweScaled::new(0.5, 0.0, 2.0)).unwrap();
        ukf.update(&[0], &MeasVec::from_vec(vec![1.0]), &diag(&[1.0])).unwrap();
        // Unobserved component follows through the cross-covariance
        assert_relative_eq!(ukf.get_state()[1], 0.4, epsilon = 1e-9);
    }

    #[test]
    fn test_update_keeps_covariance_symmetric() {
        let mut ukf = vehicle_filter(coupled_cov());
        ukf.predict(0.1).unwrap();
        let imu = MeasVec::from_vec(vec![0.1, 0.5]);
        ukf.update(&[YAW_RATE, ACCEL], &imu, &diag(&[0.01, 0.03])).unwrap();
        let comp_enc = MeasVec::from_vec(vec![0.02, 1.0]);
        ukf.update(&[HEADING, SPEED], &comp_enc, &diag(&[0.02, 0.001])).unwrap();
        let p = ukf.get_covariance();
        assert_eq!(p, &p.transpose());
        assert_eq!(ukf.summary().updates, 2);
    }

    #[test]
    fn test_update_dimension_mismatch_leaves_state() {
        let mut ukf = vehicle_filter(coupled_cov());
        let x_before = ukf.get_state().clone();
        let p_before = ukf.get_covariance().clone();

        let cases: Vec<(Vec<usize>, MeasVec, MeasMat)> = vec![
            (vec![4, 5], MeasVec::from_vec(vec![0.1]), diag(&[0.01, 0.03])),
            (vec![4, 5], MeasVec::from_vec(vec![0.1, 0.2]), diag(&[0.01])),
            (vec![4], MeasVec::from_vec(vec![0.1, 0.2]), diag(&[0.01, 0.03])),
            (vec![4, 5], MeasVec::from_vec(vec![0.1, 0.2]), MeasMat::zeros(2, 3)),
            (vec![4, 4], MeasVec::from_vec(vec![0.1, 0.2]), diag(&[0.01, 0.03])),
            (vec![6], MeasVec::from_vec(vec![0.1]), diag(&[0.01])),
            (vec![], MeasVec::zeros(0), MeasMat::zeros(0, 0)),
        ];
        for (indices, z, r) in cases {
            let err = ukf.update(&indices, &z, &r).unwrap_err();
            assert!(matches!(err, UkfError::Dimension(_)), "{indices:?} gave {err:?}");
            assert_eq!(ukf.get_state(), &x_before);
            assert_eq!(ukf.get_covariance(), &p_before);
        }
        assert_eq!(ukf.summary().updates, 0);
    }

    #[test]
    fn test_update_singular_innovation_leaves_state() {
        let mut ukf = build(
            2,
            diag(&[0.0, 0.0]),
            StateVec::zeros(2),
            diag(&[1.0, 1.0]),
            MerweScaled::new(0.5, 0.0, 2.0),
        )
        .unwrap();
        // Pz = 1 - 2 < 0
        let err = ukf.update(&[0], &MeasVec::from_vec(vec![1.0]), &diag(&[-2.0])).unwrap_err();
        assert!(err.is_numerical());
        assert_eq!(ukf.get_state(), &StateVec::zeros(2));
        assert_eq!(ukf.get_covariance(), &diag(&[1.0, 1.0]));
    }

    #[test]
    fn test_update_with_measurement() {
        let mut ukf = vehicle_filter(diag(&[1e-2; 6]));
        let meas = Measurement::with_variances(vec![YAW_RATE], &[0.3], &[0.01]).unwrap();
        ukf.update_with(&meas).unwrap();
        assert!(ukf.get_state()[YAW_RATE] > 0.0);
    }

    #[test]
    fn test_set_process_noise_validates() {
        let mut ukf = vehicle_filter(diag(&[1e-4; 6]));
        let small = StateMat::zeros(5, 5);
        assert!(matches!(ukf.set_process_noise(small), Err(UkfError::Dimension(_))));
        let mut asym = diag(&[0.1; 6]);
        asym[(0, 1)] = 0.05;
        assert!(matches!(ukf.set_process_noise(asym), Err(UkfError::InvalidParameter(_))));
        ukf.set_process_noise(diag(&[0.5; 6])).unwrap();
        assert_eq!(ukf.process_noise(), &diag(&[0.5; 6]));
    }

    /// Truth trajectory from the same kinematics with known yaw rate and
    /// acceleration, sensed exactly by an IMU (yaw rate, accel) and a
    /// compass/encoder pair (heading, speed).
    fn truth_sequence(steps: usize, dt: f64) -> Vec<StateVec> {
        let mut truth = StateVec::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.1, 0.5]);
        (0..steps)
            .map(|_| {
                truth = bicycle(&truth, dt);
                truth.clone()
            })
            .collect()
    }

    fn fuse_cycle(
        ukf: &mut Ukf<fn(&StateVec, f64) -> StateVec>,
        truth: &StateVec,
        dt: f64,
    ) -> (f64, f64) {
        ukf.predict(dt).unwrap();
        let prior_trace = ukf.get_covariance().trace();
        let imu = MeasVec::from_vec(vec![truth[YAW_RATE], truth[ACCEL]]);
        ukf.update(&[YAW_RATE, ACCEL], &imu, &diag(&[0.01, 0.03])).unwrap();
        let after_imu = ukf.get_covariance().trace();
        assert!(after_imu <= prior_trace + 1e-15);
        let comp_enc = MeasVec::from_vec(vec![truth[HEADING], truth[SPEED]]);
        ukf.update(&[HEADING, SPEED], &comp_enc, &diag(&[0.02, 0.001])).unwrap();
        let posterior_trace = ukf.get_covariance().trace();
        assert!(posterior_trace <= after_imu + 1e-15);
        (prior_trace, posterior_trace)
    }

    #[test]
    fn test_vehicle_scenario_three_steps() {
        let dt = 0.1;
        let mut ukf = vehicle_filter(diag(&[0.0001; 6]));
        let truth = truth_sequence(3, dt);

        for x_true in &truth {
            fuse_cycle(&mut ukf, x_true, dt);
            let err = (ukf.get_state() - x_true).norm();
            assert!(err < 1.0, "estimate diverged: {err}");
            assert!(ukf.get_covariance().clone().cholesky().is_some());
        }

        // Better than holding the initial (zero) estimate
        let last = truth.last().unwrap();
        let err = (ukf.get_state() - last).norm();
        assert!(err < last.norm());
        assert!(ukf.get_state()[ACCEL] > 0.0);
        assert!(ukf.get_state()[YAW_RATE] > 0.0);
    }

    #[test]
    fn test_observed_block_uncertainty_converges() {
        let dt = 0.1;
        let mut ukf = vehicle_filter(StateMat::identity(6, 6));
        let truth = truth_sequence(20, dt);

        let observed_trace = |p: &StateMat| (HEADING..=ACCEL).map(|i| p[(i, i)]).sum::<f64>();
        let mut last = observed_trace(ukf.get_covariance());
        for x_true in &truth {
            fuse_cycle(&mut ukf, x_true, dt);
            let current = observed_trace(ukf.get_covariance());
            assert!(current <= last + 1e-12, "trace grew from {last} to {current}");
            last = current;
        }
        let end = truth.last().unwrap();
        let err = (ukf.get_state().rows(HEADING, 4) - end.rows(HEADING, 4)).norm();
        assert!(err < 0.2, "observed components off by {err}");
    }
}
