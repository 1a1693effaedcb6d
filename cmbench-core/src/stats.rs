//! Statistical helpers on plain slices.
//!
//! These are the per-series building blocks used by the field-level engines in
//! [`crate::field`]. Inputs are assumed to contain only valid samples; masking is the
//! caller's responsibility. Functions return `None` when a statistic is undefined for
//! the given input (too few samples, zero variance) instead of producing NaN.

use num::Float;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Arithmetic mean. Returns `None` if empty.
pub fn mean<T: Float + std::iter::Sum>(data: &[T]) -> Option<T> {
    if data.is_empty() {
        return None;
    }
    let n = T::from(data.len())?;
    Some(data.iter().copied().sum::<T>() / n)
}

/// Variance with `ddof` delta degrees of freedom (`ddof = 0` is the population variance).
///
/// Returns `None` if `data.len() <= ddof`.
pub fn variance(data: &[f64], ddof: usize) -> Option<f64> {
    if data.len() <= ddof {
        return None;
    }
    let m = mean(data)?;
    let ss: f64 = data.iter().map(|&x| (x - m) * (x - m)).sum();
    Some(ss / (data.len() - ddof) as f64)
}

/// Weighted standard deviation with reliability-weight `ddof` correction.
///
/// $$ \sigma^2 = \frac{\sum_i w_i (x_i - \bar{x}_w)^2}{V_1 - \text{ddof} \cdot V_2 / V_1} $$
///
/// with $V_1 = \sum w_i$ and $V_2 = \sum w_i^2$. The result is invariant to a common
/// scaling of the weights, and with `ddof = 0` a weight equal to an occurrence count is
/// equivalent to repeating the value that many times.
///
/// Returns `None` if the lengths differ.
pub fn weighted_std(values: &[f64], weights: &[f64], ddof: f64) -> Option<f64> {
    if values.len() != weights.len() {
        return None;
    }
    let v1: f64 = weights.iter().sum();
    if values.is_empty() || v1 <= 0.0 {
        return None;
    }
    let v2: f64 = weights.iter().map(|w| w * w).sum();
    let m = values.iter().zip(weights).map(|(x, w)| x * w).sum::<f64>() / v1;
    let ss: f64 = values
        .iter()
        .zip(weights)
        .map(|(x, w)| w * (x - m) * (x - m))
        .sum();
    let denom = v1 - ddof * v2 / v1;
    if denom <= 0.0 {
        return None;
    }
    Some((ss / denom).sqrt())
}

/// Ranks starting at 1, ties receiving the average of their positions.
pub fn rank_average(data: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..data.len()).collect();
    order.sort_by(|&a, &b| data[a].total_cmp(&data[b]));

    let mut ranks = vec![0.0; data.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && data[order[j + 1]] == data[order[i]] {
            j += 1;
        }
        // positions i..=j share the same value
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Centered sums of squares and cross-products `(sxx, syy, sxy)`.
fn sums_of_squares(x: &[f64], y: &[f64]) -> Option<(f64, f64, f64, f64, f64)> {
    let mx = mean(x)?;
    let my = mean(y)?;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - mx;
        let dy = yi - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    Some((mx, my, sxx, syy, sxy))
}

/// Pearson correlation coefficient.
///
/// Returns `None` if the lengths differ, fewer than 2 pairs are given or either series
/// has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let (_, _, sxx, syy, sxy) = sums_of_squares(x, y)?;
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Spearman rank correlation coefficient.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    pearson(&rank_average(x), &rank_average(y))
}

/// Two-tailed p-value of Student's t statistic with `df` degrees of freedom.
pub fn student_t_two_tailed(t: f64, df: f64) -> f64 {
    if t == 0.0 {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.cdf(-t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

/// Two-tailed p-value of a correlation coefficient computed from `n` samples,
/// using the t statistic with `n - 2` degrees of freedom.
///
/// Two samples always correlate perfectly and yield 0.
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n <= 2 || r.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = r * (df / ((1.0 - r) * (1.0 + r))).sqrt();
    student_t_two_tailed(t, df)
}

/// Result of a simple linear regression `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
    pub p_value: f64,
    pub std_err: f64,
}

/// Ordinary least squares fit of `y` against `x`.
///
/// Follows the textbook simple-regression formulas: a constant `y` gives `r = 0` and
/// `p = 1`. Returns `None` for mismatched lengths, fewer than 2 samples or a constant
/// `x`.
pub fn linregress(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }
    let (mx, my, sxx, syy, sxy) = sums_of_squares(x, y)?;
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let r_value = if syy == 0.0 {
        0.0
    } else {
        (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
    };

    let (p_value, std_err) = if n == 2 {
        (if syy == 0.0 { 1.0 } else { 0.0 }, 0.0)
    } else {
        let df = (n - 2) as f64;
        let p = if r_value.abs() >= 1.0 {
            0.0
        } else {
            let t = r_value * (df / ((1.0 - r_value) * (1.0 + r_value))).sqrt();
            student_t_two_tailed(t, df)
        };
        let std_err = ((1.0 - r_value * r_value) * syy / sxx / df).max(0.0).sqrt();
        (p, std_err)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_value,
        p_value,
        std_err,
    })
}

/// Residuals of `y` after removing its least squares line against `x`.
///
/// Both series are centered before the fit, so the residuals do not depend on the
/// offset of `x`: $e_i = (y_i - \bar y) - b (x_i - \bar x)$.
pub fn detrend(x: &[f64], y: &[f64]) -> Option<Vec<f64>> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let (mx, my, sxx, _, sxy) = sums_of_squares(x, y)?;
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some(
        x.iter()
            .zip(y)
            .map(|(&xi, &yi)| (yi - my) - slope * (xi - mx))
            .collect(),
    )
}

/// Sum of squared deviations from the mean. Returns `None` if empty.
pub fn sum_of_squares(data: &[f64]) -> Option<f64> {
    let m = mean(data)?;
    Some(data.iter().map(|&x| (x - m) * (x - m)).sum())
}

/// Sample covariance (`n - 1` denominator).
pub fn covariance(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() < 2 {
        return None;
    }
    let (_, _, _, _, sxy) = sums_of_squares(x, y)?;
    Some(sxy / (x.len() - 1) as f64)
}

/// Result of an unpaired two-sample t-test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TTest {
    pub t_value: f64,
    pub p_value: f64,
    pub df: f64,
}

/// Unpaired two-sample t-test of `mean(x) - mean(y)`.
///
/// With `welch = false` the pooled-variance (Student) test is used, otherwise Welch's
/// unequal-variance test with Welch–Satterthwaite degrees of freedom. Identical
/// samples give `t = 0` and `p = 1`.
pub fn ttest_ind(x: &[f64], y: &[f64], welch: bool) -> Option<TTest> {
    let (nx, ny) = (x.len(), y.len());
    let mx = mean(x)?;
    let my = mean(y)?;
    let (se, df) = if welch {
        let vx = variance(x, 1)?;
        let vy = variance(y, 1)?;
        let (ax, ay) = (vx / nx as f64, vy / ny as f64);
        let se2 = ax + ay;
        let df = if se2 == 0.0 {
            (nx + ny - 2) as f64
        } else {
            se2 * se2 / (ax * ax / (nx - 1) as f64 + ay * ay / (ny - 1) as f64)
        };
        (se2.sqrt(), df)
    } else {
        if nx + ny <= 2 {
            return None;
        }
        let df = (nx + ny - 2) as f64;
        let ssx: f64 = x.iter().map(|&v| (v - mx) * (v - mx)).sum();
        let ssy: f64 = y.iter().map(|&v| (v - my) * (v - my)).sum();
        let pooled = (ssx + ssy) / df;
        ((pooled * (1.0 / nx as f64 + 1.0 / ny as f64)).sqrt(), df)
    };

    let delta = mx - my;
    let t_value = if delta == 0.0 {
        0.0
    } else if se == 0.0 {
        delta.signum() * f64::INFINITY
    } else {
        delta / se
    };

    Some(TTest {
        t_value,
        p_value: student_t_two_tailed(t_value, df),
        df,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), Some(5.0));
        assert_eq!(mean::<f64>(&[]), None);
    }

    #[test]
    fn test_variance_ddof() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(variance(&data, 0), Some(4.0));
        assert!(is_close!(variance(&data, 1).unwrap(), 32.0 / 7.0));
        assert_eq!(variance(&[1.0], 1), None);
    }

    #[test]
    fn weighted_std_matches_repeated_values() {
        let repeated = [2.0, 2.0, 4.0, 5.0, 5.0, 5.0];
        let reference = variance(&repeated, 0).unwrap().sqrt();
        let weighted = weighted_std(&[2.0, 4.0, 5.0], &[20.0, 10.0, 30.0], 0.0).unwrap();
        assert!((weighted - reference).abs() < 1e-10);
    }

    #[test]
    fn weighted_std_uniform_weights_ddof_one() {
        let data = [1.0, 2.0, 3.0, 4.0];
        let reference = variance(&data, 1).unwrap().sqrt();
        let weighted = weighted_std(&data, &[3.0; 4], 1.0).unwrap();
        assert!((weighted - reference).abs() < 1e-12);
    }

    #[test]
    fn test_rank_average_ties() {
        assert_eq!(
            rank_average(&[10.0, 20.0, 10.0, 30.0]),
            vec![1.5, 3.0, 1.5, 4.0]
        );
    }

    #[test]
    fn test_pearson_self_is_one() {
        let x = [0.3, -1.2, 4.5, 2.2, 0.0];
        assert_eq!(pearson(&x, &x), Some(1.0));
        assert_eq!(correlation_p_value(1.0, x.len()), 0.0);
    }

    #[test]
    fn test_pearson_constant_is_undefined() {
        assert_eq!(pearson(&[1.0, 2.0, 3.0], &[4.0, 4.0, 4.0]), None);
        assert_eq!(pearson(&[1.0], &[4.0]), None);
    }

    #[test]
    fn test_spearman_monotonic() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 100.0];
        assert_eq!(spearman(&x, &y), Some(1.0));
    }

    #[test]
    fn test_linregress_exact_line() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 8.0).collect();
        let fit = linregress(&x, &y).unwrap();
        assert!(is_close!(fit.slope, 2.0));
        assert!(is_close!(fit.intercept, 8.0));
        assert!(is_close!(fit.r_value, 1.0));
        assert_eq!(fit.p_value, 0.0);
    }

    #[test]
    fn test_linregress_reference_values() {
        // reference values from an independent least squares routine
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [2.0, 4.1, 5.9, 8.3, 9.8, 12.2];
        let fit = linregress(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 0.03);
        assert!((fit.slope - 2.0085714285714).abs() < 1e-10);
        assert!((fit.intercept - 0.0266666666667).abs() < 1e-10);
        assert!(fit.r_value > 0.99);
        assert!(fit.p_value < 1e-5);
    }

    #[test]
    fn test_linregress_constant_y() {
        let fit = linregress(&[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.r_value, 0.0);
        assert_eq!(fit.p_value, 1.0);
        assert!(linregress(&[1.0, 1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_detrend_removes_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [3.0, 4.2, 5.4, 6.6];
        let residuals = detrend(&x, &y).unwrap();
        assert!(residuals.iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn test_detrend_is_independent_of_offset() {
        let x: Vec<f64> = (0..1000).map(|k| 730486.0 + k as f64).collect();
        let y: Vec<f64> = (0..1000).map(|k| 0.37 * k as f64 + 0.1).collect();
        let residuals = detrend(&x, &y).unwrap();
        let ss = sum_of_squares(&residuals).unwrap();
        assert!(ss <= 1e-12 * sum_of_squares(&y).unwrap());
    }

    #[test]
    fn mismatched_lengths_are_undefined() {
        assert_eq!(pearson(&[1.0, 2.0, 3.0], &[1.0, 2.0]), None);
        assert_eq!(spearman(&[1.0, 2.0], &[1.0, 2.0, 3.0]), None);
        assert!(linregress(&[1.0, 2.0, 3.0], &[1.0, 2.0]).is_none());
        assert!(detrend(&[1.0, 2.0], &[1.0]).is_none());
        assert_eq!(weighted_std(&[1.0, 2.0], &[1.0], 0.0), None);
    }

    #[test]
    fn test_ttest_student_reference() {
        let x = [5.0, 7.0, 5.0, 3.0, 5.0, 3.0, 3.0, 9.0];
        let y = [8.0, 1.0, 4.0, 6.0, 6.0, 4.0, 1.0, 2.0];
        let result = ttest_ind(&x, &y, false).unwrap();
        assert!((result.t_value - 0.847).abs() < 1e-3);
        assert_eq!(result.df, 14.0);
        assert!(result.p_value > 0.4 && result.p_value < 0.42);
    }

    #[test]
    fn test_ttest_identical_samples() {
        let x = [1.0, 2.5, 3.0, 0.5];
        let result = ttest_ind(&x, &x, false).unwrap();
        assert_eq!(result.t_value, 0.0);
        assert_eq!(result.p_value, 1.0);
        let result = ttest_ind(&x, &x, true).unwrap();
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn test_ttest_welch_differs_from_student_for_unequal_variance() {
        let x = [1.0, 1.1, 0.9, 1.0, 1.05];
        let y = [3.0, -2.0, 8.0, 0.5];
        let student = ttest_ind(&x, &y, false).unwrap();
        let welch = ttest_ind(&x, &y, true).unwrap();
        assert!(welch.df < student.df);
        assert!(welch.t_value != student.t_value);
    }
}
