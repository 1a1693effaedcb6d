//! Model error metrics
//!
//! Scores that compare a model field against an observation field on the same grid.
//!
//! The Reichler-Kim index of a model is
//!
//! $$ I^2 = \sum_t \sum_i w_{t,i} \frac{(m_{t,i} - o_{t,i})^2}{\sigma_{t,i}^2} $$
//!
//! where $\sigma$ is the inter-annual standard deviation of the observations, carried
//! as the `std` companion of the observation climatology. Indices of several models
//! are usually reported relative to their median, see [`relative_errors`].

use crate::errors::{AnalysisError, AnalysisResult};
use cmbench_core::{Field, FieldError, WeightingType};
use log::{debug, warn};
use ndarray::{Array1, Array2, Zip};
use std::collections::{BTreeMap, BTreeSet};

/// Sea-ice concentration (percent) above which a cell counts towards the ice extent.
pub const SEA_ICE_CONCENTRATION_THRESHOLD: f64 = 15.0;

/// Cells with at least one valid observation.
pub fn valid_observation_mask(obs: &Field) -> Array2<bool> {
    obs.count_valid_time().mapv(|n| n > 0)
}

/// Area-weighted root-mean-square difference of every timestep.
pub fn rms_error(model: &Field, obs: &Field) -> AnalysisResult<Array1<f64>> {
    let diff = model.sub(obs)?;
    let squared = diff.mul(&diff)?;
    Ok(squared.fldmean(true).mapv(f64::sqrt))
}

/// Reichler-Kim error index of `model` against `obs`.
///
/// Cells without a positive, finite observed standard deviation do not contribute.
pub fn reichler_index(model: &Field, obs: &Field) -> AnalysisResult<f64> {
    let sigma = obs.companions().std().ok_or_else(|| {
        FieldError::Configuration("observations carry no standard deviation".to_string())
    })?;
    let diff = model.sub(obs)?;
    let weights = diff.weighting_matrix();

    let mut skipped = 0usize;
    let index = Zip::from(diff.values())
        .and(diff.valid())
        .and(&weights)
        .and(sigma)
        .fold(0.0, |acc, &d, &ok, &w, &s| {
            if !ok {
                acc
            } else if !(s.is_finite() && s > 0.0) {
                skipped += 1;
                acc
            } else {
                acc + w * d * d / (s * s)
            }
        });
    if skipped > 0 {
        debug!("{} cells without observed variability skipped", skipped);
    }
    Ok(index)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Express every error relative to the median of all errors: $(e - \tilde e) / \tilde e$.
pub fn relative_errors(errors: &[(String, f64)]) -> AnalysisResult<Vec<(String, f64)>> {
    if errors.is_empty() {
        return Err(FieldError::InsufficientData { needed: 1, found: 0 }.into());
    }
    let mut values: Vec<f64> = errors.iter().map(|(_, e)| *e).collect();
    let m = median(&mut values);
    if m == 0.0 || !m.is_finite() {
        return Err(FieldError::Compute(format!("median error is {}", m)).into());
    }
    Ok(errors
        .iter()
        .map(|(name, e)| (name.clone(), (e - m) / m))
        .collect())
}

/// Spatial-mean time series of two fields within one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionalSeries {
    pub x: Array1<f64>,
    pub y: Array1<f64>,
}

/// Per-region mean series of `x` and `y`.
///
/// Both fields are restricted to their common valid cells. Each region's mean is
/// weighted by the region's total area, so missing cells lower the mean.
pub fn regional_timeseries(
    x: &Field,
    y: &Field,
    labels: &Array2<i64>,
) -> AnalysisResult<BTreeMap<i64, RegionalSeries>> {
    if x.values().shape() != y.values().shape() {
        return Err(FieldError::shape_mismatch("regional_timeseries", &x.shape(), &y.shape()).into());
    }
    if labels.dim() != (x.ny(), x.nx()) {
        return Err(FieldError::shape_mismatch(
            "regional_timeseries",
            &[x.ny(), x.nx()],
            labels.shape(),
        )
        .into());
    }

    let common = x.valid() & y.valid();
    let mut xm = x.clone();
    let mut ym = y.clone();
    xm.apply_mask_3d(&common)?;
    ym.apply_mask_3d(&common)?;
    let area = x.area();

    let regions: BTreeSet<i64> = labels.iter().copied().collect();
    let mut out = BTreeMap::new();
    for region in regions {
        let region_area = Zip::from(&area)
            .and(labels)
            .map_collect(|&a, &l| if l == region { a } else { 0.0 });
        if region_area.sum() <= 0.0 {
            warn!("Region {} has no area", region);
        }
        let series = |f: &Field| -> AnalysisResult<Array1<f64>> {
            Ok(f.clone()
                .with_cell_area(region_area.clone())?
                .with_weighting(WeightingType::All)
                .fldmean(true))
        };
        out.insert(
            region,
            RegionalSeries {
                x: series(&xm)?,
                y: series(&ym)?,
            },
        );
    }
    Ok(out)
}

/// 1 where the concentration exceeds `threshold`, 0 elsewhere, restricted to `mask`.
pub fn sea_ice_extent_indicator(
    concentration: &Field,
    threshold: f64,
    mask: &Array2<bool>,
) -> AnalysisResult<Field> {
    if !threshold.is_finite() {
        return Err(AnalysisError::Options(format!(
            "sea ice threshold must be finite, got {}",
            threshold
        )));
    }
    let mut indicator = concentration.threshold_indicator(threshold);
    indicator.apply_mask(mask)?;
    Ok(indicator)
}
