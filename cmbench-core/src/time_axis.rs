//! Numeric time axis with calendar semantics
//!
//! A [`TimeAxis`] pairs the raw timestamps of a field with the [`TimeUnits`] needed to
//! interpret them. Regularity checks ([`TimeAxis::is_monthly`], [`TimeAxis::is_daily`])
//! look at calendar boundaries rather than elapsed time, so a monthly series with
//! 28-31 day spacing is still recognised as monthly.

use crate::calendar::{month_index, Calendar, DateBase, TimeStep, TimeUnits};
use crate::errors::{FieldError, FieldResult};
use chrono::{Datelike, NaiveDateTime};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub type FloatValue = f64;
pub type Time = f64;

/// Ordered sequence of numeric timestamps and their units.
///
/// Ordering is not enforced; use [`TimeAxis::argsort`] or
/// [`Field::timsort`](crate::field::Field::timsort) to sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis {
    values: Array1<Time>,
    units: TimeUnits,
}

impl TimeAxis {
    pub fn new(values: Array1<Time>, units: TimeUnits) -> Self {
        Self { values, units }
    }

    /// Build an axis from calendar dates.
    pub fn from_dates(dates: &[NaiveDateTime], units: TimeUnits) -> FieldResult<Self> {
        let values = dates
            .iter()
            .map(|d| units.to_num(*d))
            .collect::<FieldResult<Vec<_>>>()?;
        Ok(Self::new(Array1::from(values), units))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &Array1<Time> {
        &self.values
    }

    pub fn units(&self) -> &TimeUnits {
        &self.units
    }

    pub fn calendar(&self) -> Calendar {
        self.units.calendar()
    }

    pub fn date(&self, index: usize) -> FieldResult<NaiveDateTime> {
        let value = self.values.get(index).ok_or_else(|| {
            FieldError::InvalidTime(format!(
                "timestep {} outside axis of length {}",
                index,
                self.len()
            ))
        })?;
        self.units.to_date(*value)
    }

    pub fn dates(&self) -> FieldResult<Vec<NaiveDateTime>> {
        self.values.iter().map(|t| self.units.to_date(*t)).collect()
    }

    pub fn years(&self) -> FieldResult<Vec<i32>> {
        Ok(self.dates()?.iter().map(|d| d.year()).collect())
    }

    pub fn months(&self) -> FieldResult<Vec<u32>> {
        Ok(self.dates()?.iter().map(|d| d.month()).collect())
    }

    /// True if the timestamps are non-decreasing.
    pub fn is_sorted(&self) -> bool {
        self.values.windows(2).into_iter().all(|w| w[0] <= w[1])
    }

    pub fn has_duplicates(&self) -> bool {
        let mut sorted = self.values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted.windows(2).any(|w| w[0] == w[1])
    }

    /// Stable ascending sort permutation.
    pub fn argsort(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        order
    }

    /// New axis holding the timestamps at `indices`, in that order.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of range.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self::new(
            indices.iter().map(|&i| self.values[i]).collect(),
            self.units,
        )
    }

    /// Timestamps of the first `n` steps, extrapolated past the end of a shorter axis.
    ///
    /// Monthly axes, and single timestamps when `n` divides a year, are extended by
    /// calendar months. Other axes are extended by their mean spacing.
    pub(crate) fn first_steps(&self, n: usize) -> FieldResult<TimeAxis> {
        let len = self.len();
        if len >= n {
            return Ok(self.select(&(0..n).collect::<Vec<_>>()));
        }
        let first = self.values.first().copied().ok_or(FieldError::InsufficientData {
            needed: 1,
            found: 0,
        })?;

        let month_step = if self.is_monthly() {
            Some(1)
        } else if len == 1 && 12 % n == 0 {
            Some(12 / n)
        } else {
            None
        };
        let mut values = self.values.to_vec();
        match month_step {
            Some(k) => {
                let months = TimeUnits::new(TimeStep::Months, self.date(0)?, self.calendar());
                for p in len..n {
                    let date = months.to_date((p * k) as f64)?;
                    values.push(self.units.to_num(date)?);
                }
            }
            None => {
                let spacing = if len > 1 {
                    (values[len - 1] - first) / (len - 1) as f64
                } else {
                    1.0
                };
                values.extend((len..n).map(|p| first + p as f64 * spacing));
            }
        }
        Ok(Self::new(Array1::from(values), self.units))
    }

    /// Replace the timestamps, keeping the units.
    pub(crate) fn set_values(&mut self, values: Array1<Time>) {
        self.values = values;
    }

    /// True if consecutive timestamps fall in consecutive calendar months.
    ///
    /// Fewer than two timestamps never qualify.
    pub fn is_monthly(&self) -> bool {
        if self.len() < 2 {
            return false;
        }
        match self.dates() {
            Ok(dates) => dates
                .windows(2)
                .all(|w| month_index(w[1]) - month_index(w[0]) == 1),
            Err(_) => false,
        }
    }

    /// True if consecutive timestamps fall on consecutive calendar days.
    ///
    /// Fewer than two timestamps never qualify.
    pub fn is_daily(&self) -> bool {
        if self.len() < 2 {
            return false;
        }
        let calendar = self.calendar();
        let dates = match self.dates() {
            Ok(dates) => dates,
            Err(_) => return false,
        };
        dates.windows(2).all(|w| {
            let (a, b) = (w[0].date(), w[1].date());
            match a.succ_opt() {
                Some(next) if calendar == Calendar::NoLeap && next.month() == 2 && next.day() == 29 => {
                    next.succ_opt() == Some(b)
                }
                Some(next) => next == b,
                None => false,
            }
        })
    }

    /// Number of days in the month of each timestamp.
    pub fn days_per_month(&self) -> FieldResult<Vec<u32>> {
        let calendar = self.calendar();
        Ok(self
            .dates()?
            .iter()
            .map(|d| calendar.days_in_month(d.year(), d.month()))
            .collect())
    }

    /// Earliest date, floored to the start of its `base` period.
    pub fn min_date(&self, base: Option<DateBase>) -> FieldResult<NaiveDateTime> {
        let date = self
            .dates()?
            .into_iter()
            .min()
            .ok_or(FieldError::InsufficientData { needed: 1, found: 0 })?;
        Ok(match base {
            Some(base) => base.floor(date),
            None => date,
        })
    }

    /// Latest date, extended to the last second of its `base` period.
    pub fn max_date(&self, base: Option<DateBase>) -> FieldResult<NaiveDateTime> {
        let date = self
            .dates()?
            .into_iter()
            .max()
            .ok_or(FieldError::InsufficientData { needed: 1, found: 0 })?;
        Ok(match base {
            Some(base) => base.ceil(date, self.calendar()),
            None => date,
        })
    }
}
