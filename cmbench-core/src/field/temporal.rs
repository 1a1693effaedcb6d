//! Time axis engine: ordering, calendar rewrites, cycle detection and alignment.

use super::Field;
use crate::calendar::DateBase;
use crate::errors::{FieldError, FieldResult};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use log::{debug, info};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Calendar component matched by [`Field::temporal_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalMaskKind {
    Monthly,
    Yearly,
}

impl Field {
    /// Sort the timesteps in place (stable), co-permuting mask and companions.
    ///
    /// A field without a time axis is left unchanged.
    pub fn timsort(&mut self) {
        let order = match self.time() {
            Some(time) if !time.is_sorted() => time.argsort(),
            _ => return,
        };
        debug!("Sorting {} timesteps of '{}'", order.len(), self.label());
        let time_cycle = self.time_cycle();
        *self = self.select_time(&order);
        self.set_time_cycle_value(time_cycle);
    }

    pub fn is_sorted(&self) -> bool {
        self.time().map_or(true, |t| t.is_sorted())
    }

    pub fn has_duplicate_times(&self) -> bool {
        self.time().map_or(false, |t| t.has_duplicates())
    }

    /// Rewrite the chosen calendar components of every timestamp.
    ///
    /// Typically used to project climatologies onto a reference year
    /// (`adjust_time(Some(1700), None, Some(15))`). A rewrite that produces a
    /// non-existent date (e.g. February 30) fails with [`FieldError::InvalidTime`].
    pub fn adjust_time(
        &mut self,
        year: Option<i32>,
        month: Option<u32>,
        day: Option<u32>,
    ) -> FieldResult<()> {
        let time = self.require_time()?;
        let units = *time.units();
        let values = time
            .dates()?
            .into_iter()
            .map(|date| {
                let y = year.unwrap_or(date.year());
                let m = month.unwrap_or(date.month());
                let d = day.unwrap_or(date.day());
                let adjusted = NaiveDate::from_ymd_opt(y, m, d)
                    .filter(|_| d <= units.calendar().days_in_month(y, m))
                    .ok_or_else(|| {
                        FieldError::InvalidTime(format!("invalid date {:04}-{:02}-{:02}", y, m, d))
                    })?;
                units.to_num(adjusted.and_time(date.time()))
            })
            .collect::<FieldResult<Vec<_>>>()?;
        if let Some(time) = self.time_mut() {
            time.set_values(Array1::from(values));
        }
        Ok(())
    }

    pub fn is_monthly(&self) -> bool {
        self.time().map_or(false, |t| t.is_monthly())
    }

    pub fn is_daily(&self) -> bool {
        self.time().map_or(false, |t| t.is_daily())
    }

    /// Detect the climatological cycle of the field.
    ///
    /// Monthly series get a cycle of 12; anything else leaves the cycle unset.
    pub fn set_timecycle(&mut self) {
        if self.is_monthly() {
            self.set_time_cycle_value(Some(12));
        } else {
            debug!(
                "Time cycle of '{}' could not be determined; the series is not monthly",
                self.label()
            );
            self.set_time_cycle_value(None);
        }
    }

    pub fn days_per_month(&self) -> FieldResult<Vec<u32>> {
        self.require_time()?.days_per_month()
    }

    /// Calendar date `offset` months after the epoch of the time axis.
    pub fn date_from_month(&self, offset: i64) -> FieldResult<NaiveDateTime> {
        self.require_time()?.units().date_from_month(offset)
    }

    pub fn years(&self) -> FieldResult<Vec<i32>> {
        self.require_time()?.years()
    }

    pub fn months(&self) -> FieldResult<Vec<u32>> {
        self.require_time()?.months()
    }

    pub fn min_date(&self, base: Option<DateBase>) -> FieldResult<NaiveDateTime> {
        self.require_time()?.min_date(base)
    }

    pub fn max_date(&self, base: Option<DateBase>) -> FieldResult<NaiveDateTime> {
        self.require_time()?.max_date(base)
    }

    /// Restrict both fields to their common period.
    ///
    /// Dates are compared at `base` granularity. The returned fields have equal length
    /// and pairwise matching dates, and are sorted by time. Fails with
    /// [`FieldError::Alignment`] if the periods do not overlap or the sampling inside
    /// the overlap differs.
    pub fn align(&self, other: &Field, base: DateBase) -> FieldResult<(Field, Field)> {
        let keys_a = date_keys(self, base)?;
        let keys_b = date_keys(other, base)?;

        let (first_a, last_a) = key_range(&keys_a)?;
        let (first_b, last_b) = key_range(&keys_b)?;
        let start = first_a.max(first_b);
        let stop = last_a.min(last_b);
        if start > stop {
            return Err(FieldError::Alignment(format!(
                "no overlapping period between '{}' and '{}'",
                self.label(),
                other.label()
            )));
        }

        let in_range = |keys: &[(usize, (i32, u32, u32))]| -> Vec<(usize, (i32, u32, u32))> {
            keys.iter()
                .copied()
                .filter(|(_, k)| *k >= start && *k <= stop)
                .collect()
        };
        let sel_a = in_range(&keys_a);
        let sel_b = in_range(&keys_b);
        if sel_a.len() != sel_b.len() || sel_a.iter().zip(&sel_b).any(|(a, b)| a.1 != b.1) {
            return Err(FieldError::Alignment(format!(
                "inconsistent sampling in common period ({} vs {} timesteps)",
                sel_a.len(),
                sel_b.len()
            )));
        }

        info!(
            "Aligned '{}' and '{}' on {} common timesteps",
            self.label(),
            other.label(),
            sel_a.len()
        );
        let idx_a: Vec<usize> = sel_a.iter().map(|(i, _)| *i).collect();
        let idx_b: Vec<usize> = sel_b.iter().map(|(i, _)| *i).collect();
        Ok((self.select_time(&idx_a), other.select_time(&idx_b)))
    }

    /// Timesteps `i1..i2` (half-open), co-slicing companions.
    pub fn temporal_subset(&self, i1: usize, i2: usize) -> FieldResult<Field> {
        self.require_time()?;
        if i1 > i2 || i2 > self.nt() {
            return Err(FieldError::Configuration(format!(
                "invalid temporal subset {}..{} of {} timesteps",
                i1,
                i2,
                self.nt()
            )));
        }
        let indices: Vec<usize> = (i1..i2).collect();
        Ok(self.select_time(&indices))
    }

    /// First and last timestep (inclusive) with `start <= date <= stop`.
    ///
    /// The time axis must be sorted.
    pub fn get_time_indices(
        &self,
        start: NaiveDateTime,
        stop: NaiveDateTime,
    ) -> FieldResult<(usize, usize)> {
        let dates = self.dates()?;
        let i1 = dates.partition_point(|d| *d < start);
        let i2 = dates.partition_point(|d| *d <= stop);
        if i1 >= i2 {
            return Err(FieldError::Configuration(format!(
                "no timesteps between {} and {}",
                start, stop
            )));
        }
        Ok((i1, i2 - 1))
    }

    /// Timesteps with `start <= date <= stop`, in their current order.
    pub fn apply_temporal_subsetting(
        &self,
        start: NaiveDateTime,
        stop: NaiveDateTime,
    ) -> FieldResult<Field> {
        let indices: Vec<usize> = self
            .dates()?
            .iter()
            .enumerate()
            .filter(|(_, d)| **d >= start && **d <= stop)
            .map(|(i, _)| i)
            .collect();
        Ok(self.select_time(&indices))
    }

    /// Per-timestep flags, `true` where the month (or year) is one of `values`.
    pub fn temporal_mask(&self, values: &[i32], kind: TemporalMaskKind) -> FieldResult<Vec<bool>> {
        Ok(self
            .dates()?
            .iter()
            .map(|d| {
                let component = match kind {
                    TemporalMaskKind::Monthly => d.month() as i32,
                    TemporalMaskKind::Yearly => d.year(),
                };
                values.contains(&component)
            })
            .collect())
    }
}

fn date_keys(field: &Field, base: DateBase) -> FieldResult<Vec<(usize, (i32, u32, u32))>> {
    let time = field.require_time()?;
    let dates = time.dates()?;
    Ok(time
        .argsort()
        .into_iter()
        .map(|i| (i, base.key(dates[i])))
        .collect())
}

fn key_range(keys: &[(usize, (i32, u32, u32))]) -> FieldResult<((i32, u32, u32), (i32, u32, u32))> {
    match (keys.first(), keys.last()) {
        (Some(first), Some(last)) => Ok((first.1, last.1)),
        _ => Err(FieldError::Alignment("empty time axis".to_string())),
    }
}
