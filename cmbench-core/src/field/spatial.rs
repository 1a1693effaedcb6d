//! Spatial aggregation engine
//!
//! Reduces every timestep of a field to a single value using the cell areas as weights.
//! Fields without cell areas are treated as having uniform unit areas.
//!
//! The weight of cell $i$ at timestep $t$ is
//!
//! $$ w_{t,i} = \frac{a_i}{A_t} $$
//!
//! where $A_t$ depends on the field's [`WeightingType`]: the total area of cells valid
//! at $t$ for [`WeightingType::Valid`], or the total area of all cells for
//! [`WeightingType::All`]. Invalid cells get a weight of zero. With `All` weighting the
//! weights of a timestep with invalid cells therefore sum to less than one.
//!
//! Timesteps without any valid cell reduce to NaN.

use super::{Field, WeightingType};
use crate::stats;
use ndarray::{Array1, Array3, Axis, Zip};

impl Field {
    /// Per-timestep normalised area weights, 0 for invalid cells.
    pub fn weighting_matrix(&self) -> Array3<f64> {
        let area = self.area();
        let total_area: f64 = area.sum();
        let mut weights = Array3::zeros(self.values().raw_dim());
        for (mut w, valid) in weights
            .axis_iter_mut(Axis(0))
            .zip(self.valid().axis_iter(Axis(0)))
        {
            let norm = match self.weighting_type() {
                WeightingType::Valid => Zip::from(&area)
                    .and(&valid)
                    .fold(0.0, |acc, &a, &ok| if ok { acc + a } else { acc }),
                WeightingType::All => total_area,
            };
            if norm <= 0.0 {
                continue;
            }
            Zip::from(&mut w)
                .and(&area)
                .and(&valid)
                .for_each(|w, &a, &ok| {
                    if ok {
                        *w = a / norm;
                    }
                });
        }
        weights
    }

    /// Values and weights of the valid cells of timestep `t`.
    fn step_samples(&self, t: usize, weights: &Array3<f64>) -> (Vec<f64>, Vec<f64>) {
        let values = self.values().index_axis(Axis(0), t);
        let valid = self.valid().index_axis(Axis(0), t);
        let w = weights.index_axis(Axis(0), t);
        values
            .iter()
            .zip(valid.iter())
            .zip(w.iter())
            .filter_map(|((&v, &ok), &w)| ok.then_some((v, w)))
            .unzip()
    }

    fn reduce_space(&self, weights: &Array3<f64>, f: impl Fn(&[f64], &[f64]) -> Option<f64>) -> Array1<f64> {
        (0..self.nt())
            .map(|t| {
                let (values, w) = self.step_samples(t, weights);
                if values.is_empty() {
                    f64::NAN
                } else {
                    f(&values, &w).unwrap_or(f64::NAN)
                }
            })
            .collect()
    }

    /// Spatial mean of each timestep.
    ///
    /// With `apply_weights` the mean is $\sum_i w_{t,i} x_{t,i}$, otherwise the plain mean
    /// of the valid cells.
    pub fn fldmean(&self, apply_weights: bool) -> Array1<f64> {
        if apply_weights {
            self.reduce_space(&self.weighting_matrix(), |x, w| {
                Some(x.iter().zip(w).map(|(x, w)| x * w).sum())
            })
        } else {
            self.reduce_space(&self.uniform_weights(), |x, _| stats::mean(x))
        }
    }

    /// Area-weighted sum using the raw cell areas (no normalisation).
    pub fn areasum(&self, apply_weights: bool) -> Array1<f64> {
        let weights = if apply_weights {
            let area = self.area();
            let mut weights = Array3::zeros(self.values().raw_dim());
            for mut w in weights.axis_iter_mut(Axis(0)) {
                w.assign(&area);
            }
            weights
        } else {
            self.uniform_weights()
        };
        self.reduce_space(&weights, |x, w| {
            Some(x.iter().zip(w).map(|(x, w)| x * w).sum())
        })
    }

    /// Spatial standard deviation of each timestep.
    ///
    /// The weighted form uses the same weights as [`Field::fldmean`] with a
    /// reliability-weight `ddof` correction (see [`stats::weighted_std`]).
    pub fn fldstd(&self, apply_weights: bool, ddof: usize) -> Array1<f64> {
        if apply_weights {
            self.reduce_space(&self.weighting_matrix(), |x, w| {
                stats::weighted_std(x, w, ddof as f64)
            })
        } else {
            self.reduce_space(&self.uniform_weights(), |x, _| {
                stats::variance(x, ddof).map(f64::sqrt)
            })
        }
    }

    fn uniform_weights(&self) -> Array3<f64> {
        Array3::ones(self.values().raw_dim())
    }
}
