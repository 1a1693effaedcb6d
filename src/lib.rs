//! Climate model benchmarking
//!
//! Masked geophysical fields with time-axis reconciliation, spatial aggregation and
//! cross-field statistics live in [`cmbench_core`]; observation preprocessing, variable
//! options and model error metrics live in [`cmbench_analysis`].

pub use cmbench_analysis;
pub use cmbench_core;
