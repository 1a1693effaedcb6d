//! Per-variable analysis options
//!
//! Each observation dataset is described by one [`VariableOptions`] record, read from
//! TOML. Every option has a stated default except the observation file and variable
//! name, and the record is validated when it is parsed.
//!
//! ```toml
//! obs_file = "/data/gpcp/gpcp_v23.nc"
//! obs_var = "precip"
//! interval = "season"
//! start = "1989-01-01"
//! stop = "2008-12-31"
//! scale_data = 86400.0
//! valid_mask = "land"
//! units = "mm/day"
//! ```

use crate::errors::{AnalysisError, AnalysisResult};
use crate::landsea::{Area, AreaSelection};
use crate::preprocess::Interval;
use chrono::NaiveDate;
use cmbench_core::Field;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Options for analysing one variable against one observation dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariableOptions {
    // === Observations ===
    /// Raw observation file. Required.
    pub obs_file: PathBuf,

    /// Variable name inside the observation file. Required.
    pub obs_var: String,

    /// Aggregation of the climatology.
    ///
    /// Default: monthly
    pub interval: Interval,

    /// First date of the observations to use. Must be given together with `stop`.
    pub start: Option<NaiveDate>,

    /// Last date of the observations to use. Must be given together with `start`.
    pub stop: Option<NaiveDate>,

    /// Factor applied to the observations after loading.
    ///
    /// Default: 1.0
    pub scale_data: f64,

    /// Offset added to the observations after scaling.
    ///
    /// Default: 0.0
    pub add_offset: f64,

    /// Area used for the comparison.
    ///
    /// Default: global
    pub valid_mask: Area,

    // === Regridding ===
    /// Target grid of the remapping.
    ///
    /// Default: `t63grid`
    pub target_grid: String,

    /// Interpolation operator of the remapping.
    ///
    /// Default: `remapcon`
    pub interpolation: String,

    // === Presentation ===
    /// Unit assigned to the observations after scaling. Empty keeps the file's unit.
    pub units: String,

    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
    pub dmin: Option<f64>,
    pub dmax: Option<f64>,

    /// Number of colour classes.
    ///
    /// Default: 6
    pub nclasses: usize,

    /// Position (1-4) of the dataset in the portrait diagram.
    ///
    /// Default: 1
    pub gleckler_position: usize,

    // === Analysis switches ===
    pub add_to_report: bool,
    pub map_difference: bool,
    pub map_seasons: bool,
    pub reichler_plot: bool,
    pub gleckler_plot: bool,
    pub hovmoeller_plot: bool,
    pub regional_analysis: bool,
    pub global_mean: bool,
}

impl Default for VariableOptions {
    fn default() -> Self {
        Self {
            obs_file: PathBuf::new(),
            obs_var: String::new(),
            interval: Interval::Monthly,
            start: None,
            stop: None,
            scale_data: 1.0,
            add_offset: 0.0,
            valid_mask: Area::Global,
            target_grid: "t63grid".to_string(),
            interpolation: "remapcon".to_string(),
            units: String::new(),
            vmin: None,
            vmax: None,
            dmin: None,
            dmax: None,
            nclasses: 6,
            gleckler_position: 1,
            add_to_report: true,
            map_difference: true,
            map_seasons: true,
            reichler_plot: true,
            gleckler_plot: true,
            hovmoeller_plot: false,
            regional_analysis: false,
            global_mean: true,
        }
    }
}

fn check_range(name: &str, lo: Option<f64>, hi: Option<f64>) -> AnalysisResult<()> {
    if let (Some(lo), Some(hi)) = (lo, hi) {
        if lo >= hi {
            return Err(AnalysisError::Options(format!(
                "{name} range is empty: {lo} >= {hi}"
            )));
        }
    }
    Ok(())
}

impl VariableOptions {
    /// Parse and validate a TOML record.
    pub fn from_toml_str(content: &str) -> AnalysisResult<Self> {
        let options: Self = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: &Path) -> AnalysisResult<Self> {
        debug!("Reading variable options from {}", path.display());
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> AnalysisResult<()> {
        if self.obs_file.as_os_str().is_empty() {
            return Err(AnalysisError::Options("obs_file is required".to_string()));
        }
        if self.obs_var.trim().is_empty() {
            return Err(AnalysisError::Options("obs_var is required".to_string()));
        }
        match (self.start, self.stop) {
            (Some(start), Some(stop)) if start > stop => {
                return Err(AnalysisError::Options(format!(
                    "start {} is after stop {}",
                    start, stop
                )))
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AnalysisError::Options(
                    "start and stop must be given together".to_string(),
                ))
            }
            _ => {}
        }
        if !self.scale_data.is_finite() || !self.add_offset.is_finite() {
            return Err(AnalysisError::Options(
                "scale_data and add_offset must be finite".to_string(),
            ));
        }
        if self.nclasses == 0 {
            return Err(AnalysisError::Options("nclasses must be positive".to_string()));
        }
        if !(1..=4).contains(&self.gleckler_position) {
            return Err(AnalysisError::Options(format!(
                "gleckler_position must be between 1 and 4, got {}",
                self.gleckler_position
            )));
        }
        check_range("value", self.vmin, self.vmax)?;
        check_range("difference", self.dmin, self.dmax)?;
        Ok(())
    }

    /// Observation period, if restricted.
    pub fn period(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.start.zip(self.stop)
    }

    /// Area selection for the land-sea mask; Antarctica is excluded for land only.
    pub fn area_selection(&self) -> AreaSelection {
        AreaSelection::new(self.valid_mask)
    }

    /// Scale, offset and relabel the unit of `field` in place.
    pub fn apply_scaling(&self, field: &mut Field) {
        field.mulc_inplace(self.scale_data);
        field.addc_inplace(self.add_offset);
        if !self.units.is_empty() {
            field.set_unit(&self.units);
        }
    }
}
