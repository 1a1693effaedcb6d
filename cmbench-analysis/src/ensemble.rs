//! Model ensemble preprocessing
//!
//! CMIP-style archives store every ensemble member of a model run as one or more files
//! named `<variable>_Amon_<model>_<experiment>_r<member>*.nc`. The
//! [`EnsemblePreprocessor`] groups these files by member, merges each member along
//! time and reduces the merged members to an ensemble mean and standard deviation.
//!
//! All number crunching is delegated to a [`GridTool`]. As in the observation
//! pipeline, every output file doubles as a cache: a step whose output exists is
//! skipped unless forced, in which case the old file is removed first.
//!
//! For the output file `tas_ensmean.nc` the products are
//!
//! - `<prefix><member>_mergetime.nc` per member, next to the output file
//! - `tas_ensmean.nc`: mean over the merged members
//! - `tas_ensstd.nc`: standard deviation over the merged members

use crate::errors::{AnalysisError, AnalysisResult};
use crate::preprocess::{GridTool, Reduction};
use chrono::NaiveDate;
use cmbench_core::FieldError;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Members with a number at or above this are rejected unless configured otherwise.
pub const DEFAULT_MAX_MEMBERS: u32 = 10;

/// Files of an ensemble after reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleProducts {
    /// Time-merged file of every member, ordered by member number.
    pub members: Vec<PathBuf>,
    pub mean: PathBuf,
    pub std: PathBuf,
}

/// Ensemble statistics of one variable of one model experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsemblePreprocessor {
    data_dir: PathBuf,
    output: PathBuf,
    variable: String,
    model: String,
    experiment: String,
    max_members: u32,
}

impl EnsemblePreprocessor {
    /// Preprocessor for the raw member files in `data_dir`, writing the ensemble mean to
    /// `output`.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        variable: &str,
        model: &str,
        experiment: &str,
    ) -> AnalysisResult<Self> {
        let output = output.into();
        if output.file_name().is_none() {
            return Err(AnalysisError::Options(format!(
                "invalid ensemble output file {}",
                output.display()
            )));
        }
        for (name, value) in [("variable", variable), ("model", model), ("experiment", experiment)] {
            if value.trim().is_empty() {
                return Err(AnalysisError::Options(format!("ensemble {} is required", name)));
            }
        }
        Ok(Self {
            data_dir: data_dir.into(),
            output,
            variable: variable.to_string(),
            model: model.to_string(),
            experiment: experiment.to_string(),
            max_members: DEFAULT_MAX_MEMBERS,
        })
    }

    pub fn with_max_members(mut self, max_members: u32) -> Self {
        self.max_members = max_members;
        self
    }

    /// Directory receiving the merged members and the ensemble statistics.
    pub fn output_dir(&self) -> &Path {
        self.output.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Common file name prefix of all members, up to the member number.
    pub fn file_prefix(&self) -> String {
        format!(
            "{}_Amon_{}_{}_r",
            self.variable, self.model, self.experiment
        )
    }

    /// Raw files of every member, sorted by name within a member.
    ///
    /// Every file matching the prefix must belong to a member below the configured
    /// maximum; anything else is an error rather than silently left out.
    pub fn member_files(&self) -> AnalysisResult<BTreeMap<u32, Vec<PathBuf>>> {
        let prefix = self.file_prefix();
        let mut members: BTreeMap<u32, Vec<PathBuf>> = BTreeMap::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(rest) = name
                .strip_prefix(prefix.as_str())
                .filter(|_| name.ends_with(".nc"))
            else {
                continue;
            };
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            let member: u32 = digits.parse().map_err(|_| {
                AnalysisError::Options(format!("no ensemble member number in {}", name))
            })?;
            if member >= self.max_members {
                return Err(AnalysisError::Options(format!(
                    "{} belongs to member {}, maximum is {}",
                    name,
                    member,
                    self.max_members - 1
                )));
            }
            members.entry(member).or_default().push(path);
        }
        for files in members.values_mut() {
            files.sort();
        }
        debug!(
            "Found {} members of {} {} {}",
            members.len(),
            self.variable,
            self.model,
            self.experiment
        );
        Ok(members)
    }

    /// Time-merged file of `member`.
    pub fn merged_file(&self, member: u32) -> PathBuf {
        self.output_dir()
            .join(format!("{}{}_mergetime.nc", self.file_prefix(), member))
    }

    pub fn mean_file(&self) -> &Path {
        &self.output
    }

    /// Standard deviation file: `_ensmean` in the output name becomes `_ensstd`.
    pub fn std_file(&self) -> PathBuf {
        let name = self
            .output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let std_name = if name.contains("_ensmean") {
            name.replace("_ensmean", "_ensstd")
        } else {
            let stem = self
                .output
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("{}_ensstd.nc", stem)
        };
        self.output.with_file_name(std_name)
    }

    /// Merge the raw files of one member along time.
    pub fn merge_member(
        &self,
        tool: &dyn GridTool,
        member: u32,
        files: &[PathBuf],
        period: Option<(NaiveDate, NaiveDate)>,
        force: bool,
    ) -> AnalysisResult<PathBuf> {
        let output = self.merged_file(member);
        debug!("{}\t{}\t{}", self.model, member, files.len());
        if refresh(&output, force)? {
            info!("Merging ensemble member {} of {}", member, self.model);
            tool.merge_time(files, &output, period)?;
            ensure_written(&output, "merge_time")?;
        }
        Ok(output)
    }

    /// Merge every member found in the data directory.
    pub fn merge_members(
        &self,
        tool: &dyn GridTool,
        period: Option<(NaiveDate, NaiveDate)>,
        force: bool,
    ) -> AnalysisResult<Vec<PathBuf>> {
        if let Some((start, stop)) = period {
            if start > stop {
                return Err(AnalysisError::Options(format!(
                    "start {} is after stop {}",
                    start, stop
                )));
            }
        }
        self.member_files()?
            .iter()
            .map(|(&member, files)| self.merge_member(tool, member, files, period, force))
            .collect()
    }

    /// Ensemble mean and standard deviation over the time-merged members.
    ///
    /// At least two members are needed. The mean and the standard deviation are cached
    /// independently.
    pub fn ensemble_statistics(
        &self,
        tool: &dyn GridTool,
        period: Option<(NaiveDate, NaiveDate)>,
        force: bool,
    ) -> AnalysisResult<EnsembleProducts> {
        let members = self.merge_members(tool, period, force)?;
        if members.len() < 2 {
            warn!(
                "No ensemble statistics for {} {}: {} member(s)",
                self.model,
                self.experiment,
                members.len()
            );
            return Err(FieldError::InsufficientData {
                needed: 2,
                found: members.len(),
            }
            .into());
        }

        let std = self.std_file();
        for (output, reduction) in [(self.output.as_path(), Reduction::Mean), (std.as_path(), Reduction::Std)] {
            if refresh(output, force)? {
                info!(
                    "Ensemble {} of {} members of {}",
                    reduction.suffix(),
                    members.len(),
                    self.model
                );
                tool.ensemble_reduce(&members, output, reduction)?;
                ensure_written(output, "ensemble_reduce")?;
            }
        }
        Ok(EnsembleProducts {
            members,
            mean: self.output.clone(),
            std,
        })
    }
}

/// True if `output` has to be (re)computed; a forced rerun removes the old file.
fn refresh(output: &Path, force: bool) -> AnalysisResult<bool> {
    if !output.exists() {
        return Ok(true);
    }
    if force {
        fs::remove_file(output)?;
        return Ok(true);
    }
    debug!("Reusing {}", output.display());
    Ok(false)
}

fn ensure_written(output: &Path, step: &str) -> AnalysisResult<()> {
    if output.exists() {
        Ok(())
    } else {
        Err(AnalysisError::Tool {
            command: step.to_string(),
            message: format!("{} was not written", output.display()),
        })
    }
}
