use thiserror::Error;

/// Estimator error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UkfError {
    #[error("Dimension mismatch: {0}")]
    Dimension(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for estimator operations
pub type UkfResult<T> = Result<T, UkfError>;

impl UkfError {
    pub fn dimension(what: &str, expected: usize, actual: usize) -> Self {
        UkfError::Dimension(format!("{what}: expected {expected}, got {actual}"))
    }

    pub fn is_numerical(&self) -> bool {
        matches!(self, UkfError::Numerical(_))
    }
}
