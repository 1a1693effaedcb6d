//! Cross-field statistics engine
//!
//! Per-cell correlation, regression and significance testing between fields, and
//! conditional statistics over labelled regions.
//!
//! Every statistic is computed from the samples that are valid in all inputs at the same
//! timestep. A cell without enough jointly valid samples, or whose statistic is
//! undefined (zero variance), is masked in the result instead of raising an error.
//!
//! Correlation p-values are two-tailed and use Student's t with $n - 2$ degrees of
//! freedom:
//!
//! $$ t = r \sqrt{\frac{n - 2}{(1 - r)(1 + r)}} $$

use super::Field;
use crate::errors::{FieldError, FieldResult};
use crate::stats;
use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Correlation coefficient used by [`Field::corr_single`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
}

/// Options for [`Field::correlate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationOptions {
    /// Use rank (Spearman) correlation instead of Pearson.
    pub spearman: bool,
    /// Remove a linear trend against time from both series first.
    pub detrend: bool,
    /// Cells with a p-value above this threshold are masked.
    pub pthres: f64,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            spearman: false,
            detrend: false,
            pthres: 1.01,
        }
    }
}

/// Options for [`Field::diff`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Significance level; a cell is significant where `p <= pthres`.
    pub pthres: f64,
    /// Use Welch's unequal-variance test instead of the pooled Student test.
    pub welch: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            pthres: 0.05,
            welch: false,
        }
    }
}

/// Per-cell result of [`Field::diff`].
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub t_value: Field,
    /// Confidence `1 - p` of the two-tailed test.
    pub p_value: Field,
    /// `true` where the difference is significant (`p <= pthres`).
    pub significant: Array2<bool>,
    /// Difference of the temporal means, receiver minus other.
    pub difference: Field,
}

/// Per-cell result of [`Field::temporal_trend`].
#[derive(Debug, Clone)]
pub struct TrendResult {
    pub slope: Field,
    pub intercept: Field,
    pub correlation: Field,
    pub p_value: Field,
}

/// Per-cell result of [`Field::corr_single`].
#[derive(Debug, Clone)]
pub struct SingleCorrelation {
    pub correlation: Field,
    pub slope: Field,
    pub intercept: Field,
    pub p_value: Field,
    pub covariance: Field,
}

/// Mean and sum series of one label of [`Field::condstat`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalStatistics {
    pub mean: Array1<f64>,
    pub sum: Array1<f64>,
}

/// Builder for several spatial result grids sharing one validity pattern per cell.
struct CellGrids<const N: usize> {
    grids: [(Array2<f64>, Array2<bool>); N],
}

impl<const N: usize> CellGrids<N> {
    fn new(ny: usize, nx: usize) -> Self {
        Self {
            grids: std::array::from_fn(|_| {
                (
                    Array2::from_elem((ny, nx), f64::NAN),
                    Array2::from_elem((ny, nx), false),
                )
            }),
        }
    }

    fn set(&mut self, i: usize, j: usize, values: [f64; N]) {
        for ((grid, valid), v) in self.grids.iter_mut().zip(values) {
            grid[[i, j]] = v;
            valid[[i, j]] = true;
        }
    }

    fn into_fields(self, template: &Field) -> [Field; N] {
        self.grids
            .map(|(values, valid)| template.derive_spatial(values, valid))
    }
}

/// Residual variance below this share of the original variance counts as none.
const RESIDUAL_VARIANCE_TOLERANCE: f64 = 1e-12;

fn is_flat(residuals: &[f64], original_ss: f64) -> bool {
    stats::sum_of_squares(residuals)
        .map_or(true, |ss| ss <= RESIDUAL_VARIANCE_TOLERANCE * original_ss)
}

impl Field {
    fn check_same_grid(&self, other: &Field, operation: &str) -> FieldResult<()> {
        if (self.ny(), self.nx()) != (other.ny(), other.nx()) {
            return Err(FieldError::shape_mismatch(
                operation,
                &[self.ny(), self.nx()],
                &[other.ny(), other.nx()],
            ));
        }
        Ok(())
    }

    fn check_same_dim(&self, other: &Field, operation: &str) -> FieldResult<()> {
        if self.raw_dim() != other.raw_dim() {
            return Err(FieldError::shape_mismatch(
                operation,
                &self.shape(),
                &other.shape(),
            ));
        }
        Ok(())
    }

    /// Jointly valid `(time, x, y)` samples of cell `(i, j)`.
    fn joint_samples(&self, other: &Field, times: &[f64], i: usize, j: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut t = Vec::new();
        let mut x = Vec::new();
        let mut y = Vec::new();
        for k in 0..self.nt() {
            if let (Some(a), Some(b)) = (self.value(k, i, j), other.value(k, i, j)) {
                t.push(times[k]);
                x.push(a);
                y.push(b);
            }
        }
        (t, x, y)
    }

    fn time_coordinate(&self) -> Vec<f64> {
        match self.time() {
            Some(time) => time.values().to_vec(),
            None => (0..self.nt()).map(|t| t as f64).collect(),
        }
    }

    /// Per-cell correlation with `other` over jointly valid timesteps.
    ///
    /// Returns `(correlation, p_value)` as spatial fields. Both are masked where fewer
    /// than two joint samples exist, a series is constant, or `p > pthres`. With
    /// `detrend`, a series that is entirely explained by its linear trend correlates
    /// with `r = 0` and `p = 1`.
    pub fn correlate(&self, other: &Field, options: CorrelationOptions) -> FieldResult<(Field, Field)> {
        self.check_same_dim(other, "correlate")?;
        let times = self.time_coordinate();
        let mut grids = CellGrids::<2>::new(self.ny(), self.nx());

        for i in 0..self.ny() {
            for j in 0..self.nx() {
                let (t, mut x, mut y) = self.joint_samples(other, &times, i, j);
                let n = x.len();
                if n < 2 {
                    continue;
                }
                if options.detrend {
                    let (Some(dx), Some(dy)) = (stats::detrend(&t, &x), stats::detrend(&t, &y))
                    else {
                        continue;
                    };
                    let (Some(ssx), Some(ssy)) = (stats::sum_of_squares(&x), stats::sum_of_squares(&y))
                    else {
                        continue;
                    };
                    if ssx == 0.0 || ssy == 0.0 {
                        continue;
                    }
                    if is_flat(&dx, ssx) || is_flat(&dy, ssy) {
                        // nothing left once the trend is removed
                        if 1.0 <= options.pthres {
                            grids.set(i, j, [0.0, 1.0]);
                        }
                        continue;
                    }
                    x = dx;
                    y = dy;
                }
                let r = if options.spearman {
                    stats::spearman(&x, &y)
                } else {
                    stats::pearson(&x, &y)
                };
                if let Some(r) = r {
                    let p = stats::correlation_p_value(r, n);
                    if p <= options.pthres {
                        grids.set(i, j, [r, p]);
                    }
                }
            }
        }
        debug!(
            "Correlated '{}' with '{}' (spearman={}, detrend={})",
            self.label(),
            other.label(),
            options.spearman,
            options.detrend
        );
        let [r, p] = grids.into_fields(self);
        Ok((r, p))
    }

    /// Partial correlation of the receiver and `y`, controlling for `z`.
    ///
    /// $$ r_{xy \cdot z} = \frac{r_{xy} - r_{xz} r_{zy}}{\sqrt{(1 - r_{xz}^2)(1 - r_{zy}^2)}} $$
    ///
    /// `zy` replaces `z` in the correlation with `y` when given.
    pub fn partial_correlation(&self, y: &Field, z: &Field, zy: Option<&Field>) -> FieldResult<Field> {
        let options = CorrelationOptions::default();
        let (rxy, _) = self.correlate(y, options)?;
        let (rxz, _) = self.correlate(z, options)?;
        let (rzy, _) = zy.unwrap_or(z).correlate(y, options)?;

        let mut grids = CellGrids::<1>::new(self.ny(), self.nx());
        for i in 0..self.ny() {
            for j in 0..self.nx() {
                if let (Some(a), Some(b), Some(c)) =
                    (rxy.value(0, i, j), rxz.value(0, i, j), rzy.value(0, i, j))
                {
                    let denom = ((1.0 - b * b) * (1.0 - c * c)).sqrt();
                    if denom > 0.0 {
                        grids.set(i, j, [(a - b * c) / denom]);
                    }
                }
            }
        }
        let [r] = grids.into_fields(self);
        Ok(r)
    }

    /// Per-cell least squares trend against the numeric time coordinate.
    pub fn temporal_trend(&self) -> FieldResult<TrendResult> {
        let times = self.require_time()?.values().to_vec();
        let mut grids = CellGrids::<4>::new(self.ny(), self.nx());
        for i in 0..self.ny() {
            for j in 0..self.nx() {
                let (t, x): (Vec<f64>, Vec<f64>) = self
                    .cell_samples(i, j)
                    .into_iter()
                    .map(|(k, v)| (times[k], v))
                    .unzip();
                if let Some(fit) = stats::linregress(&t, &x) {
                    grids.set(i, j, [fit.slope, fit.intercept, fit.r_value, fit.p_value]);
                }
            }
        }
        let [slope, intercept, correlation, p_value] = grids.into_fields(self);
        Ok(TrendResult {
            slope,
            intercept,
            correlation,
            p_value,
        })
    }

    /// Regress every cell against one external series of length `nt`.
    ///
    /// Slope and intercept describe `cell = slope * series + intercept`. Non-finite
    /// entries of `series` are treated as missing. With
    /// [`CorrelationMethod::Spearman`] the correlation and p-value are rank based.
    pub fn corr_single(&self, series: &[f64], method: CorrelationMethod) -> FieldResult<SingleCorrelation> {
        if series.len() != self.nt() {
            return Err(FieldError::shape_mismatch(
                "corr_single",
                &[self.nt()],
                &[series.len()],
            ));
        }
        let mut grids = CellGrids::<5>::new(self.ny(), self.nx());
        for i in 0..self.ny() {
            for j in 0..self.nx() {
                let (s, x): (Vec<f64>, Vec<f64>) = self
                    .cell_samples(i, j)
                    .into_iter()
                    .filter(|(k, _)| series[*k].is_finite())
                    .map(|(k, v)| (series[k], v))
                    .unzip();
                let fit = match stats::linregress(&s, &x) {
                    Some(fit) => fit,
                    None => continue,
                };
                let (r, p) = match method {
                    CorrelationMethod::Pearson => (fit.r_value, fit.p_value),
                    CorrelationMethod::Spearman => match stats::spearman(&s, &x) {
                        Some(rho) => (rho, stats::correlation_p_value(rho, s.len())),
                        None => continue,
                    },
                };
                let cov = stats::covariance(&s, &x).unwrap_or(f64::NAN);
                grids.set(i, j, [r, fit.slope, fit.intercept, p, cov]);
            }
        }
        let [correlation, slope, intercept, p_value, covariance] = grids.into_fields(self);
        Ok(SingleCorrelation {
            correlation,
            slope,
            intercept,
            p_value,
            covariance,
        })
    }

    /// Unpaired t-test of the temporal means of the receiver and `other`, per cell.
    ///
    /// The fields must share a grid but may differ in length. Cells where the test is
    /// undefined are masked in every output and never significant.
    pub fn diff(&self, other: &Field, options: DiffOptions) -> FieldResult<DiffResult> {
        self.check_same_grid(other, "diff")?;
        let mut grids = CellGrids::<3>::new(self.ny(), self.nx());
        let mut significant = Array2::from_elem((self.ny(), self.nx()), false);
        for i in 0..self.ny() {
            for j in 0..self.nx() {
                let x: Vec<f64> = self.cell_samples(i, j).into_iter().map(|(_, v)| v).collect();
                let y: Vec<f64> = other.cell_samples(i, j).into_iter().map(|(_, v)| v).collect();
                let (test, mx, my) = match (
                    stats::ttest_ind(&x, &y, options.welch),
                    stats::mean(&x),
                    stats::mean(&y),
                ) {
                    (Some(test), Some(mx), Some(my)) => (test, mx, my),
                    _ => continue,
                };
                significant[[i, j]] = test.p_value <= options.pthres;
                grids.set(i, j, [test.t_value, 1.0 - test.p_value, mx - my]);
            }
        }
        let [t_value, p_value, difference] = grids.into_fields(self);
        Ok(DiffResult {
            t_value,
            p_value,
            significant,
            difference,
        })
    }

    /// Mean and sum of the valid cells of each label, per timestep.
    ///
    /// Timesteps where a label has no valid cell are NaN.
    pub fn condstat(&self, labels: &Array2<i64>) -> FieldResult<BTreeMap<i64, ConditionalStatistics>> {
        if labels.dim() != (self.ny(), self.nx()) {
            return Err(FieldError::shape_mismatch(
                "condstat",
                &[self.ny(), self.nx()],
                labels.shape(),
            ));
        }
        let mut cells: BTreeMap<i64, Vec<(usize, usize)>> = BTreeMap::new();
        for ((i, j), &label) in labels.indexed_iter() {
            cells.entry(label).or_default().push((i, j));
        }

        Ok(cells
            .into_iter()
            .map(|(label, members)| {
                let mut mean = Array1::from_elem(self.nt(), f64::NAN);
                let mut sum = Array1::from_elem(self.nt(), f64::NAN);
                for t in 0..self.nt() {
                    let samples: Vec<f64> = members
                        .iter()
                        .filter_map(|&(i, j)| self.value(t, i, j))
                        .collect();
                    if let Some(m) = stats::mean(&samples) {
                        mean[t] = m;
                        sum[t] = samples.iter().sum();
                    }
                }
                (label, ConditionalStatistics { mean, sum })
            })
            .collect())
    }
}
