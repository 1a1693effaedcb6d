//! Observation preprocessing end to end.
//!
//! The external grid tool is replaced by an in-process implementation that performs the
//! same reductions with `cmbench-core` and writes JSON documents, so the caching,
//! scaling, companion and time-axis handling of the pipeline can be checked without
//! any external binary.

use approx::assert_relative_eq;
use chrono::{Datelike, NaiveDate};
use cmbench_analysis::config::VariableOptions;
use cmbench_analysis::ensemble::EnsemblePreprocessor;
use cmbench_analysis::errors::AnalysisResult;
use cmbench_analysis::landsea::{land_sea_mask, Area, AreaSelection};
use cmbench_analysis::metrics::{reichler_index, rms_error};
use cmbench_analysis::preprocess::{preprocess_observations, GridTool, Interval, Reduction, Remap};
use cmbench_core::calendar::TimeUnits;
use cmbench_core::io::{FieldStore, JsonFieldStore};
use cmbench_core::time_axis::TimeAxis;
use cmbench_core::Field;
use ndarray::{array, concatenate, Array3, Axis};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

const VAR: &str = "precip";

fn monthly_axis(start_year: i32, n: usize) -> TimeAxis {
    let dates: Vec<_> = (0..n)
        .map(|t| {
            NaiveDate::from_ymd_opt(start_year + (t / 12) as i32, (t % 12) as u32 + 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        })
        .collect();
    TimeAxis::from_dates(&dates, TimeUnits::days_since(1950, 1, 1).unwrap()).unwrap()
}

/// Two years of monthly data on a 2x2 grid, stamped on the first of the month.
///
/// Cell `(i, j)` holds `month + 10 * year + 100 * i + 1000 * j`.
fn raw_monthly() -> Field {
    let values = Array3::from_shape_fn((24, 2, 2), |(t, i, j)| {
        (t % 12) as f64 + 10.0 * (t / 12) as f64 + 100.0 * i as f64 + 1000.0 * j as f64
    });
    Field::new(values, monthly_axis(2000, 24)).unwrap()
}

#[derive(Default)]
struct InProcessTool {
    calls: RefCell<Vec<String>>,
}

impl InProcessTool {
    fn record(&self, call: &str) {
        self.calls.borrow_mut().push(call.to_string());
    }

    fn take_calls(&self) -> Vec<String> {
        self.calls.borrow_mut().drain(..).collect()
    }
}

impl GridTool for InProcessTool {
    fn monthly_mean(&self, _input: &Path, output: &Path, _remap: &Remap) -> AnalysisResult<()> {
        self.record("monthly_mean");
        JsonFieldStore.save(&raw_monthly(), output, VAR)?;
        Ok(())
    }

    fn phase_reduce(
        &self,
        input: &Path,
        output: &Path,
        interval: Interval,
        reduction: Reduction,
    ) -> AnalysisResult<()> {
        self.record(&format!("{:?}", reduction));
        let monthly = JsonFieldStore.load(input, VAR)?;
        let clim = monthly.get_climatology(Some(interval.time_cycle()))?;
        let time = clim.time().cloned().unwrap();
        let count = clim.companions().count().cloned().unwrap();
        let result = match reduction {
            Reduction::Mean => clim.clone(),
            Reduction::Std => Field::with_mask(
                clim.companions().std().cloned().unwrap(),
                clim.valid().clone(),
                time,
            )?,
            Reduction::Sum => clim.mul(&Field::new(count, time)?)?,
        };
        JsonFieldStore.save(&result, output, VAR)?;
        Ok(())
    }

    fn divide(&self, numerator: &Path, denominator: &Path, output: &Path) -> AnalysisResult<()> {
        self.record("divide");
        let n = JsonFieldStore.load(numerator, VAR)?;
        let d = JsonFieldStore.load(denominator, VAR)?;
        JsonFieldStore.save(&n.div(&d)?, output, VAR)?;
        Ok(())
    }

    fn merge_time(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        period: Option<(NaiveDate, NaiveDate)>,
    ) -> AnalysisResult<()> {
        self.record("merge_time");
        let parts = inputs
            .iter()
            .map(|p| JsonFieldStore.load(p, VAR))
            .collect::<Result<Vec<_>, _>>()?;
        let values: Vec<_> = parts.iter().map(|f| f.values().view()).collect();
        let valid: Vec<_> = parts.iter().map(|f| f.valid().view()).collect();
        let times: Vec<_> = parts.iter().map(|f| f.time().unwrap().values().view()).collect();
        let time = TimeAxis::new(
            concatenate(Axis(0), &times).unwrap(),
            *parts[0].time().unwrap().units(),
        );
        let mut merged = Field::with_mask(
            concatenate(Axis(0), &values).unwrap(),
            concatenate(Axis(0), &valid).unwrap(),
            time,
        )?;
        merged.timsort();
        if let Some((start, stop)) = period {
            merged = merged.apply_temporal_subsetting(
                start.and_hms_opt(0, 0, 0).unwrap(),
                stop.and_hms_opt(23, 59, 59).unwrap(),
            )?;
        }
        JsonFieldStore.save(&merged, output, VAR)?;
        Ok(())
    }

    fn ensemble_reduce(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        reduction: Reduction,
    ) -> AnalysisResult<()> {
        self.record(&format!("ens{:?}", reduction));
        let members = inputs
            .iter()
            .map(|p| JsonFieldStore.load(p, VAR))
            .collect::<Result<Vec<_>, _>>()?;
        let n = members.len() as f64;
        let mut sum = Array3::<f64>::zeros(members[0].values().raw_dim());
        let mut squares = sum.clone();
        let mut valid = members[0].valid().clone();
        for member in &members {
            sum = sum + member.values();
            squares = squares + member.values() * member.values();
            valid = valid & member.valid();
        }
        let mean = &sum / n;
        let values = match reduction {
            Reduction::Mean => mean,
            Reduction::Sum => sum,
            Reduction::Std => (&squares / n - &mean * &mean).mapv(|v| v.max(0.0).sqrt()),
        };
        let time = members[0].time().cloned().unwrap();
        JsonFieldStore.save(&Field::with_mask(values, valid, time)?, output, VAR)?;
        Ok(())
    }
}

fn options(scale: f64) -> VariableOptions {
    VariableOptions {
        obs_file: "/archive/gpcp_v23.nc".into(),
        obs_var: VAR.to_string(),
        scale_data: scale,
        units: "mm/day".to_string(),
        ..Default::default()
    }
}

#[test]
fn climatology_and_monthly_series() {
    let work = tempfile::tempdir().unwrap();
    let tool = InProcessTool::default();
    let (clim, monthly) =
        preprocess_observations(&tool, &JsonFieldStore, &options(2.0), work.path(), None, false)
            .unwrap();

    assert_eq!(clim.nt(), 12);
    assert_eq!(clim.time_cycle(), Some(12));
    assert_eq!(clim.label(), VAR);
    assert_eq!(clim.unit(), "mm/day");
    let dates = clim.dates().unwrap();
    assert!(dates.iter().all(|d| d.year() == 1700 && d.day() == 15));
    assert_eq!(dates[0].month(), 1);

    // mean over the two years of (month + 10 * year), doubled
    assert_relative_eq!(clim.value(3, 0, 0).unwrap(), 2.0 * (3.0 + 5.0), epsilon = 1e-12);
    assert_relative_eq!(clim.value(0, 1, 1).unwrap(), 2.0 * 1105.0, epsilon = 1e-12);
    let std = clim.companions().std().unwrap();
    let count = clim.companions().count().unwrap();
    assert_relative_eq!(std[[3, 0, 0]], 10.0, epsilon = 1e-12);
    assert_relative_eq!(count[[3, 0, 0]], 2.0, epsilon = 1e-12);

    assert_eq!(monthly.nt(), 24);
    assert_eq!(monthly.time_cycle(), Some(12));
    assert!(monthly.dates().unwrap().iter().all(|d| d.day() == 15));
    assert_eq!(monthly.value(13, 0, 0), Some(2.0 * 11.0));
}

#[test]
fn intermediate_files_are_reused_unless_forced() {
    let work = tempfile::tempdir().unwrap();
    let tool = InProcessTool::default();
    let opts = options(1.0);

    preprocess_observations(&tool, &JsonFieldStore, &opts, work.path(), None, false).unwrap();
    assert_eq!(
        tool.take_calls(),
        vec!["monthly_mean", "Mean", "Sum", "Std", "divide"]
    );

    preprocess_observations(&tool, &JsonFieldStore, &opts, work.path(), None, false).unwrap();
    assert!(tool.take_calls().is_empty());

    preprocess_observations(&tool, &JsonFieldStore, &opts, work.path(), None, true).unwrap();
    assert_eq!(tool.take_calls().len(), 5);
}

#[test]
fn land_mask_is_applied_to_both_products() {
    let work = tempfile::tempdir().unwrap();
    let tool = InProcessTool::default();
    let land_fraction = Field::spatial(array![[1.0, 0.0], [0.5, 0.0]], None).unwrap();
    let mask = land_sea_mask(
        &land_fraction,
        AreaSelection::new(Area::Land).with_antarctica_mask(false),
    )
    .unwrap();

    let (clim, monthly) = preprocess_observations(
        &tool,
        &JsonFieldStore,
        &options(1.0),
        work.path(),
        Some(&mask),
        false,
    )
    .unwrap();
    for t in 0..12 {
        assert!(clim.value(t, 0, 1).is_none());
        assert!(clim.value(t, 1, 0).is_some());
    }
    assert!(monthly.value(5, 1, 1).is_none());
    assert!(monthly.value(5, 0, 0).is_some());
}

#[test]
fn model_scores_against_preprocessed_climatology() {
    let work = tempfile::tempdir().unwrap();
    let tool = InProcessTool::default();
    let (obs, _) =
        preprocess_observations(&tool, &JsonFieldStore, &options(1.0), work.path(), None, false)
            .unwrap();

    // off by one standard deviation everywhere: each of the 12 timesteps contributes 1
    let model = obs.addc(5.0);
    assert_relative_eq!(reichler_index(&model, &obs).unwrap(), 12.0, epsilon = 1e-9);

    let rms = rms_error(&model, &obs).unwrap();
    assert_eq!(rms.len(), 12);
    assert!(rms.iter().all(|&e| (e - 5.0).abs() < 1e-9));
}

#[test]
fn ensemble_mean_and_spread_of_members() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let member = |year: i32, n: usize, value: f64, name: &str| {
        let field = Field::new(Array3::from_elem((n, 1, 2), value), monthly_axis(year, n)).unwrap();
        JsonFieldStore.save(&field, &data.path().join(name), VAR).unwrap();
    };
    // the first member is split over two files, written out of order
    member(2001, 12, 1.0, "precip_Amon_ECHAM_amip_r1i1p1_2001.nc");
    member(2000, 12, 1.0, "precip_Amon_ECHAM_amip_r1i1p1_2000.nc");
    member(2000, 24, 3.0, "precip_Amon_ECHAM_amip_r2i1p1_2000-2001.nc");

    let pre = EnsemblePreprocessor::new(
        data.path(),
        out.path().join("precip_ECHAM_amip_ensmean.nc"),
        VAR,
        "ECHAM",
        "amip",
    )
    .unwrap();
    let tool = InProcessTool::default();
    let period = Some((
        NaiveDate::from_ymd_opt(2001, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2001, 12, 31).unwrap(),
    ));
    let products = pre.ensemble_statistics(&tool, period, false).unwrap();
    assert_eq!(
        tool.take_calls(),
        vec!["merge_time", "merge_time", "ensMean", "ensStd"]
    );

    let merged = JsonFieldStore.load(&products.members[0], VAR).unwrap();
    assert_eq!(merged.nt(), 12);
    assert!(merged.years().unwrap().iter().all(|&y| y == 2001));

    let mean = JsonFieldStore.load(&products.mean, VAR).unwrap();
    let std = JsonFieldStore.load(&products.std, VAR).unwrap();
    assert_eq!(products.std, out.path().join("precip_ECHAM_amip_ensstd.nc"));
    assert_eq!(mean.nt(), 12);
    assert_relative_eq!(mean.value(5, 0, 1).unwrap(), 2.0, epsilon = 1e-12);
    assert_relative_eq!(std.value(5, 0, 1).unwrap(), 1.0, epsilon = 1e-12);
}
