pub mod linalg;

pub use linalg::*;

use crate::error::{UkfError, UkfResult};

/// One sensor observation: which state components it sees, what it read,
/// and how noisy the reading is.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub indices: Vec<usize>,
    pub values: MeasVec,
    pub noise: MeasMat,
}

impl Measurement {
    pub fn new(indices: Vec<usize>, values: MeasVec, noise: MeasMat) -> UkfResult<Self> {
        let m = Self { indices, values, noise };
        m.check_shape()?;
        Ok(m)
    }

    /// Convenience constructor for independent sensor channels.
    pub fn with_variances(indices: Vec<usize>, values: &[f64], variances: &[f64]) -> UkfResult<Self> {
        Self::new(indices, MeasVec::from_column_slice(values), diag(variances))
    }

    /// `len(indices) == len(values) == noise.rows == noise.cols`
    pub fn check_shape(&self) -> UkfResult<()> {
        let m = self.indices.len();
        if self.values.len() != m {
            return Err(UkfError::dimension("measurement length", m, self.values.len()));
        }
        ensure_square(&self.noise, m, "measurement noise")
    }
}

/// Indices must be non-empty, in range and free of duplicates.
pub fn check_indices(indices: &[usize], n: usize) -> UkfResult<()> {
    if indices.is_empty() {
        return Err(UkfError::Dimension("empty measurement index set".to_string()));
    }
    if indices.len() > n {
        return Err(UkfError::Dimension(format!(
            "{} indices observed but state has {n} components",
            indices.len()
        )));
    }
    for (k, &idx) in indices.iter().enumerate() {
        if idx >= n {
            return Err(UkfError::Dimension(format!(
                "index {idx} out of range for state dimension {n}"
            )));
        }
        if indices[..k].contains(&idx) {
            return Err(UkfError::Dimension(format!("duplicate index {idx}")));
        }
    }
    Ok(())
}
