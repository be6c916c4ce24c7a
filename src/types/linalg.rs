//! Linear algebra types and numeric helpers
//!
//! Dynamic-size aliases shared by the sigma point generator and the
//! estimator, plus the handful of dense-matrix routines they need:
//! Cholesky square root, symmetrization, finiteness checks and a
//! nearest-SPD projection for caller-side recovery.

use nalgebra::{DMatrix, DVector};

use crate::error::{UkfError, UkfResult};

// ===== Estimator Types =====
pub type StateVec = DVector<f64>;
pub type StateMat = DMatrix<f64>;

// Measurement space
pub type MeasVec = DVector<f64>;
pub type MeasMat = DMatrix<f64>;

/// Tolerance used when checking caller-supplied matrices for symmetry.
pub const SYMMETRY_TOL: f64 = 1e-9;

/// Build a square matrix from its diagonal.
pub fn diag(values: &[f64]) -> DMatrix<f64> {
    DMatrix::from_diagonal(&DVector::from_column_slice(values))
}

/// Lower-triangular L with `L * L^T = m`.
///
/// Fails with [`UkfError::Numerical`] when `m` is not positive-definite
/// or contains NaN/Inf.
pub fn cholesky_sqrt(m: &DMatrix<f64>) -> UkfResult<DMatrix<f64>> {
    ensure_finite_mat(m, "covariance")?;
    match m.clone().cholesky() {
        Some(chol) => Ok(chol.l()),
        None => Err(UkfError::Numerical(
            "covariance is not positive-definite".to_string(),
        )),
    }
}

/// Force `m = (m + m^T) / 2` in place.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let m_t = m.transpose();
    *m += m_t;
    *m *= 0.5;
}

pub fn is_symmetric(m: &DMatrix<f64>, tol: f64) -> bool {
    if !m.is_square() {
        return false;
    }
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            if (m[(i, j)] - m[(j, i)]).abs() > tol * (1.0 + m[(i, j)].abs()) {
                return false;
            }
        }
    }
    true
}

pub fn ensure_finite_vec(v: &DVector<f64>, what: &str) -> UkfResult<()> {
    if v.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(UkfError::Numerical(format!("{what} contains NaN or Inf")))
    }
}

pub fn ensure_finite_mat(m: &DMatrix<f64>, what: &str) -> UkfResult<()> {
    if m.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(UkfError::Numerical(format!("{what} contains NaN or Inf")))
    }
}

pub fn ensure_square(m: &DMatrix<f64>, n: usize, what: &str) -> UkfResult<()> {
    if m.nrows() != n || m.ncols() != n {
        return Err(UkfError::Dimension(format!(
            "{what}: expected {n}x{n}, got {}x{}",
            m.nrows(),
            m.ncols()
        )));
    }
    Ok(())
}

/// Nearest symmetric matrix whose eigenvalues are all at least `floor`.
///
/// Not used by the estimator itself; callers apply it when they choose to
/// recover from a non-positive-definite covariance.
pub fn nearest_spd(m: &DMatrix<f64>, floor: f64) -> DMatrix<f64> {
    let mut sym = m.clone();
    symmetrize(&mut sym);
    let mut eig = sym.symmetric_eigen();
    eig.eigenvalues = eig.eigenvalues.map(|v| if v.is_finite() { v.max(floor) } else { floor });
    let mut out = eig.recompose();
    symmetrize(&mut out);
    out
}
