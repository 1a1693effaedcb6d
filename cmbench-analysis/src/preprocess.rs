//! Observation preprocessing through an external grid tool
//!
//! Raw observation files are remapped and temporally aggregated by an external
//! grid-processing tool before they are loaded as fields. The intermediate files
//! act as a cache: every step writes to a file whose name is derived from the input
//! file, and a step is skipped when its output already exists (unless forced).
//!
//! For a raw file `obs.nc` the [`AggregationPlan`] produces
//!
//! - `obs_monmean.nc` (or `obs_<start>_<stop>_monmean.nc` for a restricted period):
//!   remapped monthly means
//! - `obs_monmean_ymonmean.nc`, `_ymonstd.nc`, `_ymonsum.nc`: per-month climatology
//!   (`yseas` instead of `ymon` for seasonal aggregation)
//! - `obs_monmean_ymonN.nc`: number of samples per phase, `sum / mean`

use crate::config::VariableOptions;
use crate::errors::{AnalysisError, AnalysisResult};
use chrono::NaiveDate;
use cmbench_core::io::FieldStore;
use cmbench_core::{Companions, Field, FieldError};
use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Temporal aggregation of the climatology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[default]
    Monthly,
    Season,
}

impl Interval {
    /// Number of phases in one year.
    pub fn time_cycle(&self) -> usize {
        match self {
            Interval::Monthly => 12,
            Interval::Season => 4,
        }
    }

    fn operator_prefix(&self) -> &'static str {
        match self {
            Interval::Monthly => "ymon",
            Interval::Season => "yseas",
        }
    }
}

/// Per-phase or per-member reduction performed by the grid tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reduction {
    Mean,
    Sum,
    Std,
}

impl Reduction {
    pub(crate) fn suffix(&self) -> &'static str {
        match self {
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
            Reduction::Std => "std",
        }
    }
}

/// Remapping applied while computing monthly means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remap {
    /// Interpolation operator, e.g. `remapcon`.
    pub method: String,
    /// Target grid name or grid description file, e.g. `t63grid`.
    pub target_grid: String,
    /// Inclusive date range to select before averaging.
    pub period: Option<(NaiveDate, NaiveDate)>,
}

/// External grid-processing tool.
pub trait GridTool {
    /// Remap `input` and write its monthly means to `output`.
    fn monthly_mean(&self, input: &Path, output: &Path, remap: &Remap) -> AnalysisResult<()>;

    /// Reduce each phase of the annual cycle of `input` (per month or per season).
    fn phase_reduce(
        &self,
        input: &Path,
        output: &Path,
        interval: Interval,
        reduction: Reduction,
    ) -> AnalysisResult<()>;

    /// Element-wise `numerator / denominator`.
    fn divide(&self, numerator: &Path, denominator: &Path, output: &Path) -> AnalysisResult<()>;

    /// Concatenate `inputs` along time, keeping only `period` (inclusive) when given.
    fn merge_time(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        period: Option<(NaiveDate, NaiveDate)>,
    ) -> AnalysisResult<()>;

    /// Reduce `inputs` across files, one output value per timestep and cell.
    fn ensemble_reduce(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        reduction: Reduction,
    ) -> AnalysisResult<()>;
}

/// [`GridTool`] backed by the `cdo` command line program.
#[derive(Debug, Clone)]
pub struct CdoTool {
    executable: PathBuf,
}

impl Default for CdoTool {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("cdo"),
        }
    }
}

impl CdoTool {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Store reading the NetCDF files `cdo` writes.
    #[cfg(feature = "netcdf")]
    pub fn store(&self) -> cmbench_core::io::NetcdfFieldStore {
        cmbench_core::io::NetcdfFieldStore
    }

    pub(crate) fn monthly_mean_args(input: &Path, output: &Path, remap: &Remap) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            "nc".into(),
            "monmean".into(),
            format!("-{},{}", remap.method, remap.target_grid).into(),
        ];
        if let Some((start, stop)) = remap.period {
            args.push(format!("-seldate,{},{}", start, stop).into());
        }
        args.push(input.into());
        args.push(output.into());
        args
    }

    pub(crate) fn phase_reduce_args(
        input: &Path,
        output: &Path,
        interval: Interval,
        reduction: Reduction,
    ) -> Vec<OsString> {
        vec![
            "-f".into(),
            "nc".into(),
            "-b".into(),
            "32".into(),
            format!("{}{}", interval.operator_prefix(), reduction.suffix()).into(),
            input.into(),
            output.into(),
        ]
    }

    pub(crate) fn merge_time_args(
        inputs: &[PathBuf],
        output: &Path,
        period: Option<(NaiveDate, NaiveDate)>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-f".into(), "nc".into()];
        match period {
            Some((start, stop)) => {
                args.push(format!("-seldate,{},{}", start, stop).into());
                args.push("-mergetime".into());
            }
            None => args.push("mergetime".into()),
        }
        args.extend(inputs.iter().map(OsString::from));
        args.push(output.into());
        args
    }

    pub(crate) fn ensemble_reduce_args(
        inputs: &[PathBuf],
        output: &Path,
        reduction: Reduction,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            "nc".into(),
            format!("ens{}", reduction.suffix()).into(),
        ];
        args.extend(inputs.iter().map(OsString::from));
        args.push(output.into());
        args
    }

    fn run(&self, args: Vec<OsString>) -> AnalysisResult<()> {
        let command = format!(
            "{} {}",
            self.executable.display(),
            args.iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        );
        debug!("Running {}", command);
        let output = Command::new(&self.executable).args(&args).output()?;
        if !output.status.success() {
            return Err(AnalysisError::Tool {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl GridTool for CdoTool {
    fn monthly_mean(&self, input: &Path, output: &Path, remap: &Remap) -> AnalysisResult<()> {
        self.run(Self::monthly_mean_args(input, output, remap))
    }

    fn phase_reduce(
        &self,
        input: &Path,
        output: &Path,
        interval: Interval,
        reduction: Reduction,
    ) -> AnalysisResult<()> {
        self.run(Self::phase_reduce_args(input, output, interval, reduction))
    }

    fn divide(&self, numerator: &Path, denominator: &Path, output: &Path) -> AnalysisResult<()> {
        self.run(vec![
            "-f".into(),
            "nc".into(),
            "-b".into(),
            "32".into(),
            "div".into(),
            numerator.into(),
            denominator.into(),
            output.into(),
        ])
    }

    fn merge_time(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        period: Option<(NaiveDate, NaiveDate)>,
    ) -> AnalysisResult<()> {
        self.run(Self::merge_time_args(inputs, output, period))
    }

    fn ensemble_reduce(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        reduction: Reduction,
    ) -> AnalysisResult<()> {
        self.run(Self::ensemble_reduce_args(inputs, output, reduction))
    }
}

/// File names of every intermediate product for one raw observation file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationPlan {
    pub interval: Interval,
    pub monthly: PathBuf,
    pub mean: PathBuf,
    pub std: PathBuf,
    pub sum: PathBuf,
    pub count: PathBuf,
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}.nc", stem, suffix))
}

impl AggregationPlan {
    /// Plan the products of `raw_file` inside `work_dir`.
    pub fn new(
        raw_file: &Path,
        work_dir: &Path,
        interval: Interval,
        period: Option<(NaiveDate, NaiveDate)>,
    ) -> AnalysisResult<Self> {
        let name = raw_file.file_name().ok_or_else(|| {
            AnalysisError::Options(format!("invalid observation file {}", raw_file.display()))
        })?;
        let base = work_dir.join(name);
        let monthly = match period {
            Some((start, stop)) => suffixed(&base, &format!("_{}_{}_monmean", start, stop)),
            None => suffixed(&base, "_monmean"),
        };
        let prefix = interval.operator_prefix();
        Ok(Self {
            interval,
            mean: suffixed(&monthly, &format!("_{}mean", prefix)),
            std: suffixed(&monthly, &format!("_{}std", prefix)),
            sum: suffixed(&monthly, &format!("_{}sum", prefix)),
            count: suffixed(&monthly, &format!("_{}N", prefix)),
            monthly,
        })
    }

    /// Run every missing step with `tool`; existing files are recomputed only with `force`.
    pub fn execute(
        &self,
        tool: &dyn GridTool,
        raw_file: &Path,
        remap: &Remap,
        force: bool,
    ) -> AnalysisResult<()> {
        let needed = |path: &Path| {
            let run = force || !path.exists();
            if !run {
                debug!("Reusing {}", path.display());
            }
            run
        };

        if needed(&self.monthly) {
            info!("Computing monthly means of {}", raw_file.display());
            tool.monthly_mean(raw_file, &self.monthly, remap)?;
        }
        for (output, reduction) in [
            (&self.mean, Reduction::Mean),
            (&self.sum, Reduction::Sum),
            (&self.std, Reduction::Std),
        ] {
            if needed(output) {
                tool.phase_reduce(&self.monthly, output, self.interval, reduction)?;
            }
        }
        if needed(&self.count) {
            tool.divide(&self.sum, &self.mean, &self.count)?;
        }
        Ok(())
    }
}

/// Preprocess one observation dataset.
///
/// Runs the [`AggregationPlan`] and returns `(climatology, monthly)`:
///
/// - the climatology carries the per-phase standard deviation and sample count as
///   companions, is stamped on the reference year 1700 (day 15) and starts in January
/// - the monthly series must be a regular monthly series and is centred on day 15
/// - both are scaled and offset as configured; the standard deviation is only scaled
///
/// `mask` (e.g. a land-sea mask) is applied to both fields.
pub fn preprocess_observations(
    tool: &dyn GridTool,
    store: &dyn FieldStore,
    options: &VariableOptions,
    work_dir: &Path,
    mask: Option<&Array2<bool>>,
    force: bool,
) -> AnalysisResult<(Field, Field)> {
    info!("Preprocessing {}", options.obs_file.display());
    let period = options.period();
    let plan = AggregationPlan::new(&options.obs_file, work_dir, options.interval, period)?;
    let remap = Remap {
        method: options.interpolation.clone(),
        target_grid: options.target_grid.clone(),
        period,
    };
    plan.execute(tool, &options.obs_file, &remap, force)?;

    let var = options.obs_var.as_str();
    let cycle = options.interval.time_cycle();
    let std = store.load(&plan.std, var)?.mulc(options.scale_data.abs());
    let count = store.load(&plan.count, var)?;
    let mut mean = store.load(&plan.mean, var)?;
    options.apply_scaling(&mut mean);
    let mut climatology = mean
        .with_label(var)
        .with_time_cycle(cycle)
        .with_companions(Companions::new(
            Some(std.filled(f64::NAN)),
            Some(count.filled(f64::NAN)),
        ))?;
    climatology.adjust_time(Some(1700), None, Some(15))?;
    climatology.timsort();

    let mut monthly = store.load(&plan.monthly, var)?.with_label(var);
    options.apply_scaling(&mut monthly);
    monthly.set_timecycle();
    if monthly.time_cycle() != Some(12) {
        return Err(FieldError::Configuration(format!(
            "{} is not a regular monthly series",
            plan.monthly.display()
        ))
        .into());
    }
    monthly.adjust_time(None, None, Some(15))?;

    if let Some(mask) = mask {
        climatology.apply_mask(mask)?;
        monthly.apply_mask(mask)?;
    }
    Ok((climatology, monthly))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_file_names() {
        let plan = AggregationPlan::new(
            Path::new("/data/gpcp.nc"),
            Path::new("/tmp/work"),
            Interval::Monthly,
            None,
        )
        .unwrap();
        assert_eq!(plan.monthly, PathBuf::from("/tmp/work/gpcp_monmean.nc"));
        assert_eq!(plan.mean, PathBuf::from("/tmp/work/gpcp_monmean_ymonmean.nc"));
        assert_eq!(plan.std, PathBuf::from("/tmp/work/gpcp_monmean_ymonstd.nc"));
        assert_eq!(plan.sum, PathBuf::from("/tmp/work/gpcp_monmean_ymonsum.nc"));
        assert_eq!(plan.count, PathBuf::from("/tmp/work/gpcp_monmean_ymonN.nc"));
    }

    #[test]
    fn seasonal_plan_with_period() {
        let period = Some((
            NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(1999, 12, 31).unwrap(),
        ));
        let plan = AggregationPlan::new(
            Path::new("gpcp.nc"),
            Path::new("work"),
            Interval::Season,
            period,
        )
        .unwrap();
        assert_eq!(
            plan.monthly,
            PathBuf::from("work/gpcp_1990-01-01_1999-12-31_monmean.nc")
        );
        assert_eq!(
            plan.count,
            PathBuf::from("work/gpcp_1990-01-01_1999-12-31_monmean_yseasN.nc")
        );
        assert_eq!(Interval::Season.time_cycle(), 4);
    }

    #[test]
    fn cdo_operator_chains() {
        let remap = Remap {
            method: "remapcon".to_string(),
            target_grid: "t63grid".to_string(),
            period: Some((
                NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2005, 12, 31).unwrap(),
            )),
        };
        let args = CdoTool::monthly_mean_args(Path::new("in.nc"), Path::new("out.nc"), &remap);
        assert_eq!(args[2], OsString::from("monmean"));
        assert_eq!(args[3], OsString::from("-remapcon,t63grid"));
        assert_eq!(args[4], OsString::from("-seldate,2000-01-01,2005-12-31"));
        assert_eq!(args.len(), 7);

        let args = CdoTool::phase_reduce_args(
            Path::new("in.nc"),
            Path::new("out.nc"),
            Interval::Season,
            Reduction::Std,
        );
        assert_eq!(args[4], OsString::from("yseasstd"));

        let members = vec![PathBuf::from("r1.nc"), PathBuf::from("r2.nc")];
        let args = CdoTool::merge_time_args(&members, Path::new("out.nc"), None);
        assert_eq!(args[2], OsString::from("mergetime"));
        assert_eq!(args.len(), 6);
        let args = CdoTool::merge_time_args(&members, Path::new("out.nc"), remap.period);
        assert_eq!(args[2], OsString::from("-seldate,2000-01-01,2005-12-31"));
        assert_eq!(args[3], OsString::from("-mergetime"));
        assert_eq!(args[6], OsString::from("out.nc"));

        let args = CdoTool::ensemble_reduce_args(&members, Path::new("std.nc"), Reduction::Std);
        assert_eq!(args[2], OsString::from("ensstd"));
        assert_eq!(args[3], OsString::from("r1.nc"));
    }

    #[test]
    fn missing_executable_is_an_io_error() {
        let tool = CdoTool::new("/nonexistent/cdo-binary");
        let err = tool
            .divide(Path::new("a.nc"), Path::new("b.nc"), Path::new("c.nc"))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Io(_)));
    }

    #[cfg(feature = "netcdf")]
    #[test]
    fn cdo_products_are_read_as_netcdf() {
        use cmbench_core::calendar::TimeUnits;
        use cmbench_core::time_axis::TimeAxis;
        use ndarray::{array, Array3};

        let dir = tempfile::tempdir().unwrap();
        let plan = AggregationPlan::new(
            Path::new("obs/gpcp.nc"),
            dir.path(),
            Interval::Monthly,
            None,
        )
        .unwrap();
        let time = TimeAxis::new(array![0.0, 31.0], TimeUnits::days_since(2000, 1, 15).unwrap());
        let field = Field::new(Array3::from_elem((2, 2, 2), 3.0), time).unwrap();

        let store = CdoTool::default().store();
        store.save(&field, &plan.mean, "pr").unwrap();
        let loaded = store.load(&plan.mean, "pr").unwrap();
        assert_eq!(loaded.raw_dim(), (2, 2, 2));
        assert_eq!(loaded.dates().unwrap(), field.dates().unwrap());
    }
}
