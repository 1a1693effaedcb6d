pub mod config;
pub mod ensemble;
pub mod landsea;
pub mod metrics;
pub mod preprocess;

pub mod errors;

pub use errors::{AnalysisError, AnalysisResult};
