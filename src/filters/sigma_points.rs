//! Scaled (Van der Merwe) sigma point generation.
//!
//! For a mean `x` of dimension n and covariance `P`:
//! - χ₀ = x
//! - χᵢ = x + column_i(√((n+λ)P)) for i = 1..n
//! - χₙ₊ᵢ = x - column_i(√((n+λ)P)) for i = 1..n
//!
//! with λ = α²(n+κ) - n and the square root taken by Cholesky.

use nalgebra::{DMatrix, DVector};

use crate::error::{UkfError, UkfResult};
use crate::types::{cholesky_sqrt, ensure_finite_vec, ensure_square};

/// Unscented transform scaling parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MerweScaled {
    /// Spread of sigma points around the mean (typically 1e-3 to 1)
    pub alpha: f64,
    /// Secondary scaling (usually 0)
    pub kappa: f64,
    /// Prior knowledge of the distribution (2.0 for Gaussian)
    pub beta: f64,
}

impl Default for MerweScaled {
    fn default() -> Self {
        Self {
            alpha: 1e-3,
            kappa: 0.0,
            beta: 2.0,
        }
    }
}

/// Mean and covariance recombination weights, one pair per sigma point.
#[derive(Clone, Debug, PartialEq)]
pub struct UtWeights {
    pub mean: DVector<f64>,
    pub covariance: DVector<f64>,
}

/// 2n+1 sigma points stored column-wise. Weights depend only on n and the
/// parameters, so callers compute them once with [`MerweScaled::weights`].
#[derive(Clone, Debug)]
pub struct SigmaPoints {
    /// n x (2n+1), column i is sigma point i
    pub points: DMatrix<f64>,
}

impl MerweScaled {
    pub fn new(alpha: f64, kappa: f64, beta: f64) -> Self {
        Self { alpha, kappa, beta }
    }

    /// λ = α²(n+κ) - n
    pub fn lambda(&self, n: usize) -> f64 {
        let n = n as f64;
        self.alpha * self.alpha * (n + self.kappa) - n
    }

    /// Number of sigma points for dimension n.
    pub fn sigma_count(n: usize) -> usize {
        2 * n + 1
    }

    /// Reject parameter sets that cannot produce a valid spread for dimension n.
    pub fn validate(&self, n: usize) -> UkfResult<()> {
        if n == 0 {
            return Err(UkfError::Dimension("state dimension must be positive".to_string()));
        }
        if !(self.alpha.is_finite() && self.kappa.is_finite() && self.beta.is_finite()) {
            return Err(UkfError::InvalidParameter(
                "alpha, kappa and beta must be finite".to_string(),
            ));
        }
        if self.alpha <= 0.0 {
            return Err(UkfError::InvalidParameter(format!(
                "alpha must be positive, got {}",
                self.alpha
            )));
        }
        let scale = n as f64 + self.lambda(n);
        if scale <= 0.0 {
            return Err(UkfError::InvalidParameter(format!(
                "n + lambda must be positive, got {scale}"
            )));
        }
        Ok(())
    }

    pub fn weights(&self, n: usize) -> UtWeights {
        let lambda = self.lambda(n);
        let scale = n as f64 + lambda;
        let count = Self::sigma_count(n);

        let wi = 1.0 / (2.0 * scale);
        let mut mean = DVector::from_element(count, wi);
        let mut covariance = DVector::from_element(count, wi);
        mean[0] = lambda / scale;
        covariance[0] = lambda / scale + (1.0 - self.alpha * self.alpha + self.beta);

        UtWeights { mean, covariance }
    }

    /// Generate sigma points around `mean` with spread given by `cov`.
    ///
    /// Pure function of its inputs. Fails with `Numerical` when `(n+λ)·P`
    /// has no Cholesky factor.
    pub fn generate(&self, mean: &DVector<f64>, cov: &DMatrix<f64>) -> UkfResult<SigmaPoints> {
        let n = mean.len();
        self.validate(n)?;
        ensure_square(cov, n, "covariance")?;
        ensure_finite_vec(mean, "state mean")?;

        let scale = n as f64 + self.lambda(n);
        let sqrt = cholesky_sqrt(&(cov * scale))?;

        let mut points = DMatrix::zeros(n, Self::sigma_count(n));
        points.set_column(0, mean);
        for i in 0..n {
            let col = sqrt.column(i).into_owned();
            points.set_column(i + 1, &(mean + &col));
            points.set_column(i + 1 + n, &(mean - &col));
        }

        Ok(SigmaPoints { points })
    }
}

impl SigmaPoints {
    pub fn count(&self) -> usize {
        self.points.ncols()
    }
}

/// Each column of `points` minus `center`.
pub(crate) fn deviations(points: &DMatrix<f64>, center: &DVector<f64>) -> DMatrix<f64> {
    let mut dev = points.clone();
    for mut col in dev.column_iter_mut() {
        col -= center;
    }
    dev
}

/// Σ wᵢ aᵢ bᵢᵀ over columns of `a` and `b`.
pub(crate) fn weighted_outer(a: &DMatrix<f64>, b: &DMatrix<f64>, w: &DVector<f64>) -> DMatrix<f64> {
    let mut aw = a.clone();
    for (i, mut col) in aw.column_iter_mut().enumerate() {
        col *= w[i];
    }
    aw * b.transpose()
}
