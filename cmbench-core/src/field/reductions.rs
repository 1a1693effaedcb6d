//! Temporal reductions: per-cell statistics, climatologies, yearly aggregates,
//! anomalies and smoothing.
//!
//! Every reduction ignores masked entries. A cell (or phase, or year) with no valid
//! sample is masked in the result.
//!
//! The climatology of a field with cycle $P$ averages each phase $p$ over all timesteps
//! $t$ with $t \bmod P = p$:
//!
//! $$ \bar{x}_p = \frac{1}{n_p} \sum_{t \bmod P = p} x_t $$
//!
//! where $n_p$ counts the valid samples of the phase.

use super::{Companions, Field};
use crate::errors::{FieldError, FieldResult};
use crate::stats;
use log::debug;
use ndarray::{Array2, Array3};
use std::collections::BTreeMap;

impl Field {
    /// Reduce each cell's valid samples to a single value.
    fn reduce_time(&self, f: impl Fn(&[f64]) -> Option<f64>) -> Field {
        let (ny, nx) = (self.ny(), self.nx());
        let mut values = Array2::from_elem((ny, nx), f64::NAN);
        let mut valid = Array2::from_elem((ny, nx), false);
        for i in 0..ny {
            for j in 0..nx {
                let samples: Vec<f64> = self.cell_samples(i, j).into_iter().map(|(_, v)| v).collect();
                if let Some(v) = f(&samples) {
                    values[[i, j]] = v;
                    valid[[i, j]] = true;
                }
            }
        }
        self.derive_spatial(values, valid)
    }

    /// Temporal mean of each cell.
    pub fn timmean(&self) -> Field {
        self.reduce_time(stats::mean)
    }

    pub fn timsum(&self) -> Field {
        self.reduce_time(|x| (!x.is_empty()).then(|| x.iter().sum()))
    }

    /// Temporal standard deviation with `ddof` delta degrees of freedom.
    pub fn timstd(&self, ddof: usize) -> Field {
        self.reduce_time(|x| stats::variance(x, ddof).map(f64::sqrt))
    }

    pub fn timvar(&self, ddof: usize) -> Field {
        self.reduce_time(|x| stats::variance(x, ddof))
    }

    pub fn timmin(&self) -> Field {
        self.reduce_time(|x| x.iter().copied().reduce(f64::min))
    }

    pub fn timmax(&self) -> Field {
        self.reduce_time(|x| x.iter().copied().reduce(f64::max))
    }

    /// Coefficient of variation (population std over mean); masked where the mean is 0.
    pub fn timcv(&self) -> Field {
        self.reduce_time(|x| {
            let m = stats::mean(x)?;
            let s = stats::variance(x, 0)?.sqrt();
            (m != 0.0).then(|| s / m)
        })
    }

    /// Mean annual cycle.
    ///
    /// Uses `time_cycle` if given, otherwise the field's stored cycle. The result has one
    /// timestep per phase, stamped with the timestamps of the first cycle, and carries
    /// the per-phase population standard deviation and valid-sample count as
    /// companions. A series shorter than one cycle leaves its missing phases masked,
    /// stamped by extending the time axis.
    pub fn get_climatology(&self, time_cycle: Option<usize>) -> FieldResult<Field> {
        let cycle = time_cycle.or(self.time_cycle()).ok_or_else(|| {
            FieldError::Configuration(
                "climatology requires a time cycle; call set_timecycle or pass one".to_string(),
            )
        })?;
        if cycle == 0 {
            return Err(FieldError::Configuration(
                "time cycle must be positive".to_string(),
            ));
        }
        let time = self.require_time()?;
        let stamps = time.first_steps(cycle)?;

        let (ny, nx) = (self.ny(), self.nx());
        let mut values = Array3::from_elem((cycle, ny, nx), f64::NAN);
        let mut std = Array3::from_elem((cycle, ny, nx), f64::NAN);
        let mut count = Array3::zeros((cycle, ny, nx));
        for i in 0..ny {
            for j in 0..nx {
                let mut phases: Vec<Vec<f64>> = vec![Vec::new(); cycle];
                for (t, v) in self.cell_samples(i, j) {
                    phases[t % cycle].push(v);
                }
                for (p, samples) in phases.iter().enumerate() {
                    count[[p, i, j]] = samples.len() as f64;
                    if let Some(m) = stats::mean(samples) {
                        values[[p, i, j]] = m;
                        std[[p, i, j]] = stats::variance(samples, 0).map_or(f64::NAN, f64::sqrt);
                    }
                }
            }
        }
        debug!("Climatology of '{}' with cycle {}", self.label(), cycle);

        let valid = count.mapv(|c: f64| c > 0.0);
        let mut out = self.derive(values, valid, Some(stamps));
        out.set_time_cycle_value(Some(cycle));
        out.set_companions(Companions::new(Some(std), Some(count)))?;
        Ok(out)
    }

    /// Anomalies relative to the field's own climatology.
    ///
    /// Requires a stored time cycle.
    pub fn deseasonalized_anomaly(&self) -> FieldResult<Field> {
        let cycle = self.time_cycle().ok_or_else(|| {
            FieldError::Configuration("anomaly requires a stored time cycle".to_string())
        })?;
        let clim = self.get_climatology(None)?;
        let mut values = self.values().clone();
        let mut valid = self.valid().clone();
        for ((t, i, j), v) in values.indexed_iter_mut() {
            let p = t % cycle;
            if valid[[t, i, j]] && clim.valid()[[p, i, j]] {
                *v -= clim.values()[[p, i, j]];
            } else {
                valid[[t, i, j]] = false;
            }
        }
        let mut out = self.derive(values, valid, self.time().cloned());
        out.set_time_cycle_value(Some(cycle));
        Ok(out)
    }

    fn reduce_years(&self, f: impl Fn(&[f64]) -> Option<f64>) -> FieldResult<(Vec<i32>, Field)> {
        let time = self.require_time()?;
        let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (t, year) in time.years()?.into_iter().enumerate() {
            groups.entry(year).or_default().push(t);
        }

        let (ny, nx) = (self.ny(), self.nx());
        let mut values = Array3::from_elem((groups.len(), ny, nx), f64::NAN);
        let mut valid = Array3::from_elem((groups.len(), ny, nx), false);
        let mut first = Vec::with_capacity(groups.len());
        for (k, indices) in groups.values().enumerate() {
            first.push(indices[0]);
            for i in 0..ny {
                for j in 0..nx {
                    let samples: Vec<f64> = indices
                        .iter()
                        .filter_map(|&t| self.value(t, i, j))
                        .collect();
                    if let Some(v) = f(&samples) {
                        values[[k, i, j]] = v;
                        valid[[k, i, j]] = true;
                    }
                }
            }
        }
        let years = groups.keys().copied().collect();
        Ok((years, self.derive(values, valid, Some(time.select(&first)))))
    }

    /// Annual means, one timestep per calendar year in ascending order.
    pub fn yearmean(&self) -> FieldResult<(Vec<i32>, Field)> {
        self.reduce_years(stats::mean)
    }

    /// Annual sums, one timestep per calendar year in ascending order.
    pub fn yearsum(&self) -> FieldResult<(Vec<i32>, Field)> {
        self.reduce_years(|x| (!x.is_empty()).then(|| x.iter().sum()))
    }

    /// Centred moving average over `window` timesteps (odd).
    ///
    /// The first and last `window / 2` timesteps are masked.
    pub fn temporal_smooth(&self, window: usize) -> FieldResult<Field> {
        if window == 0 || window % 2 == 0 {
            return Err(FieldError::Configuration(format!(
                "smoothing window must be odd, got {}",
                window
            )));
        }
        let half = window / 2;
        let nt = self.nt();
        let mut values = Array3::from_elem(self.values().raw_dim(), f64::NAN);
        let mut valid = Array3::from_elem(self.values().raw_dim(), false);
        for ((t, i, j), out) in values.indexed_iter_mut() {
            if t < half || t + half >= nt {
                continue;
            }
            let samples: Vec<f64> = (t - half..=t + half)
                .filter_map(|k| self.value(k, i, j))
                .collect();
            if let Some(m) = stats::mean(&samples) {
                *out = m;
                valid[[t, i, j]] = true;
            }
        }
        let mut out = self.derive(values, valid, self.time().cloned());
        out.set_time_cycle_value(self.time_cycle());
        Ok(out)
    }

    /// Per-cell z-score using the population standard deviation.
    ///
    /// Cells with zero variance are masked.
    pub fn normalize(&self) -> Field {
        let mean = self.timmean();
        let std = self.timstd(0);
        let mut values = self.values().clone();
        let mut valid = self.valid().clone();
        for ((t, i, j), v) in values.indexed_iter_mut() {
            match (mean.value(0, i, j), std.value(0, i, j)) {
                (Some(m), Some(s)) if s > 0.0 => *v = (*v - m) / s,
                _ => valid[[t, i, j]] = false,
            }
        }
        let mut out = self.derive(values, valid, self.time().cloned());
        out.set_time_cycle_value(self.time_cycle());
        out
    }
}
