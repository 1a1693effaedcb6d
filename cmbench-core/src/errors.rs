use thiserror::Error;

/// Error type for invalid field operations.
///
/// Per-cell statistical failures (too few jointly valid samples, zero variance)
/// never surface here; they produce masked cells in the result instead.
#[derive(Error, Debug)]
pub enum FieldError {
    #[error("Shape mismatch in {operation}: {left:?} vs {right:?}")]
    ShapeMismatch {
        operation: String,
        left: Vec<usize>,
        right: Vec<usize>,
    },
    #[error("Invalid computation: {0}")]
    Compute(String),
    #[error("Time axes cannot be aligned: {0}")]
    Alignment(String),
    #[error("Insufficient data: {needed} valid samples required, {found} available")]
    InsufficientData { needed: usize, found: usize },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid time specification: {0}")]
    InvalidTime(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    Netcdf(String),
}

impl FieldError {
    pub fn shape_mismatch(operation: &str, left: &[usize], right: &[usize]) -> Self {
        FieldError::ShapeMismatch {
            operation: operation.to_string(),
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}

/// Convenience type for `Result<T, FieldError>`.
pub type FieldResult<T> = Result<T, FieldError>;
