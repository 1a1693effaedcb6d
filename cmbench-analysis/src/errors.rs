use cmbench_core::FieldError;
use thiserror::Error;

/// Error type for the analysis layer.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("External tool failed running `{command}`: {message}")]
    Tool { command: String, message: String },
    #[error("Invalid options: {0}")]
    Options(String),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience type for `Result<T, AnalysisError>`.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
