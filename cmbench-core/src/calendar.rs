//! Calendar-aware conversion between numeric timestamps and calendar dates
//!
//! Gridded files describe time as numbers relative to an epoch, e.g.
//! `"days since 2001-01-01 00:00:00"` or `"months since 1983-05-01"`, together
//! with a calendar. This module provides:
//!
//! - [`Calendar`]: the supported calendars (proleptic Gregorian and 365-day)
//! - [`TimeUnits`]: a parsed `"<step> since <epoch>"` description that converts
//!   numbers to dates and back
//! - [`DateBase`]: the granularity used when comparing or truncating dates
//!
//! # Examples
//!
//! ```rust
//! use cmbench_core::calendar::{Calendar, TimeUnits};
//! use chrono::Datelike;
//!
//! let units = TimeUnits::parse("days since 2000-02-28 00:00:00", Calendar::Gregorian).unwrap();
//! let date = units.to_date(1.0).unwrap();
//! assert_eq!((date.month(), date.day()), (2, 29));
//!
//! let noleap = TimeUnits::parse("days since 2000-02-28", Calendar::NoLeap).unwrap();
//! let date = noleap.to_date(1.0).unwrap();
//! assert_eq!((date.month(), date.day()), (3, 1));
//! ```

use crate::errors::{FieldError, FieldResult};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

const MS_PER_DAY: i64 = 86_400_000;

/// Cumulative day count at the start of each month in a 365-day year.
const NOLEAP_MONTH_START: [i64; 13] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365];

/// Calendar used to interpret a time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Calendar {
    /// Proleptic Gregorian calendar (`standard`, `gregorian`, `proleptic_gregorian`)
    #[default]
    Gregorian,
    /// Calendar without leap years (`noleap`, `365_day`)
    NoLeap,
}

impl Calendar {
    /// Parse a CF calendar attribute.
    pub fn parse(name: &str) -> FieldResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "standard" | "gregorian" | "proleptic_gregorian" => Ok(Calendar::Gregorian),
            "noleap" | "365_day" => Ok(Calendar::NoLeap),
            other => Err(FieldError::InvalidTime(format!(
                "unsupported calendar '{}'",
                other
            ))),
        }
    }

    pub fn is_leap_year(&self, year: i32) -> bool {
        match self {
            Calendar::Gregorian => (year % 4 == 0 && year % 100 != 0) || year % 400 == 0,
            Calendar::NoLeap => false,
        }
    }

    /// Number of days in `month` (1-12) of `year`.
    pub fn days_in_month(&self, year: i32, month: u32) -> u32 {
        match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            _ => {
                if self.is_leap_year(year) {
                    29
                } else {
                    28
                }
            }
        }
    }

    /// Day index of `date` counted from an arbitrary, calendar-specific origin.
    fn day_index(&self, date: NaiveDate) -> FieldResult<i64> {
        match self {
            Calendar::Gregorian => Ok(date.num_days_from_ce() as i64),
            Calendar::NoLeap => {
                if date.month() == 2 && date.day() == 29 {
                    return Err(FieldError::InvalidTime(format!(
                        "{} does not exist in a 365-day calendar",
                        date
                    )));
                }
                Ok(date.year() as i64 * 365
                    + NOLEAP_MONTH_START[date.month0() as usize]
                    + date.day0() as i64)
            }
        }
    }

    /// Inverse of [`Calendar::day_index`].
    fn date_from_index(&self, index: i64) -> FieldResult<NaiveDate> {
        let out_of_range = || FieldError::InvalidTime(format!("day index {} out of range", index));
        match self {
            Calendar::Gregorian => {
                let days = i32::try_from(index).map_err(|_| out_of_range())?;
                NaiveDate::from_num_days_from_ce_opt(days).ok_or_else(out_of_range)
            }
            Calendar::NoLeap => {
                let year = i32::try_from(index.div_euclid(365)).map_err(|_| out_of_range())?;
                let day_of_year = index.rem_euclid(365);
                let month0 = NOLEAP_MONTH_START
                    .iter()
                    .rposition(|&start| start <= day_of_year)
                    .unwrap_or(0);
                let day = day_of_year - NOLEAP_MONTH_START[month0] + 1;
                NaiveDate::from_ymd_opt(year, month0 as u32 + 1, day as u32)
                    .ok_or_else(out_of_range)
            }
        }
    }

    /// Milliseconds since the calendar origin.
    fn to_millis(&self, date: NaiveDateTime) -> FieldResult<i64> {
        let time = date.time();
        let ms_of_day = time.num_seconds_from_midnight() as i64 * 1000
            + (time.nanosecond() / 1_000_000) as i64;
        Ok(self.day_index(date.date())? * MS_PER_DAY + ms_of_day)
    }

    fn from_millis(&self, millis: i64) -> FieldResult<NaiveDateTime> {
        let date = self.date_from_index(millis.div_euclid(MS_PER_DAY))?;
        let ms_of_day = millis.rem_euclid(MS_PER_DAY);
        let time = NaiveTime::from_num_seconds_from_midnight_opt(
            (ms_of_day / 1000) as u32,
            ((ms_of_day % 1000) * 1_000_000) as u32,
        )
        .ok_or_else(|| FieldError::InvalidTime(format!("invalid time of day {}ms", ms_of_day)))?;
        Ok(NaiveDateTime::new(date, time))
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Calendar::Gregorian => write!(f, "proleptic_gregorian"),
            Calendar::NoLeap => write!(f, "noleap"),
        }
    }
}

/// Step of a numeric time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeStep {
    Seconds,
    Hours,
    Days,
    Months,
}

impl TimeStep {
    fn millis(&self) -> Option<i64> {
        match self {
            TimeStep::Seconds => Some(1000),
            TimeStep::Hours => Some(3_600_000),
            TimeStep::Days => Some(MS_PER_DAY),
            TimeStep::Months => None,
        }
    }
}

impl fmt::Display for TimeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeStep::Seconds => write!(f, "seconds"),
            TimeStep::Hours => write!(f, "hours"),
            TimeStep::Days => write!(f, "days"),
            TimeStep::Months => write!(f, "months"),
        }
    }
}

/// Parsed `"<step> since <epoch>"` description of a numeric time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeUnits {
    step: TimeStep,
    epoch: NaiveDateTime,
    calendar: Calendar,
}

impl TimeUnits {
    pub fn new(step: TimeStep, epoch: NaiveDateTime, calendar: Calendar) -> Self {
        Self {
            step,
            epoch,
            calendar,
        }
    }

    /// Days since `year-month-day 00:00:00` in the Gregorian calendar.
    pub fn days_since(year: i32, month: u32, day: u32) -> FieldResult<Self> {
        let epoch = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| {
                FieldError::InvalidTime(format!(
                    "invalid epoch {:04}-{:02}-{:02}",
                    year, month, day
                ))
            })?
            .and_time(NaiveTime::MIN);
        Ok(Self::new(TimeStep::Days, epoch, Calendar::Gregorian))
    }

    /// Parse a units string such as `"days since 0001-01-01 00:00:00"`.
    ///
    /// The epoch may be given as a date, or a date followed by a time of day.
    pub fn parse(units: &str, calendar: Calendar) -> FieldResult<Self> {
        let invalid = || FieldError::InvalidTime(format!("cannot parse time units '{}'", units));
        let (step, epoch) = units.split_once(" since ").ok_or_else(invalid)?;
        let step = match step.trim().to_lowercase().as_str() {
            "second" | "seconds" | "s" => TimeStep::Seconds,
            "hour" | "hours" | "h" => TimeStep::Hours,
            "day" | "days" | "d" => TimeStep::Days,
            "month" | "months" => TimeStep::Months,
            _ => return Err(invalid()),
        };
        let epoch = epoch.trim();
        let epoch = NaiveDateTime::parse_from_str(epoch, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(epoch, "%Y-%m-%dT%H:%M:%S"))
            .or_else(|_| {
                NaiveDate::parse_from_str(epoch, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
            })
            .map_err(|_| invalid())?;
        Ok(Self::new(step, epoch, calendar))
    }

    pub fn step(&self) -> TimeStep {
        self.step
    }

    pub fn epoch(&self) -> NaiveDateTime {
        self.epoch
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    /// Convert a numeric timestamp to a calendar date.
    ///
    /// On month-based axes the integer part counts whole months from the epoch and the
    /// fractional part is the elapsed share of the following month, so `0.5` on
    /// `"months since 2001-04-01"` is 2001-04-16.
    pub fn to_date(&self, value: f64) -> FieldResult<NaiveDateTime> {
        if !value.is_finite() {
            return Err(FieldError::InvalidTime(format!(
                "non-finite timestamp {}",
                value
            )));
        }
        match self.step.millis() {
            Some(ms_per_step) => {
                let offset = (value * ms_per_step as f64).round() as i64;
                self.calendar
                    .from_millis(self.calendar.to_millis(self.epoch)? + offset)
            }
            None => {
                let whole = value.floor();
                let start = self.month_anchor(whole as i64)?;
                let end = self.month_anchor(whole as i64 + 1)?;
                let offset = ((value - whole) * (end - start) as f64).round() as i64;
                self.calendar.from_millis(start + offset)
            }
        }
    }

    /// Convert a calendar date to a numeric timestamp.
    pub fn to_num(&self, date: NaiveDateTime) -> FieldResult<f64> {
        match self.step.millis() {
            Some(ms_per_step) => {
                let delta = self.calendar.to_millis(date)? - self.calendar.to_millis(self.epoch)?;
                Ok(delta as f64 / ms_per_step as f64)
            }
            None => {
                let t = self.calendar.to_millis(date)?;
                let mut whole = month_index(date) - month_index(self.epoch);
                let mut start = self.month_anchor(whole)?;
                if t < start {
                    whole -= 1;
                    start = self.month_anchor(whole)?;
                }
                let end = self.month_anchor(whole + 1)?;
                Ok(whole as f64 + (t - start) as f64 / (end - start) as f64)
            }
        }
    }

    /// Milliseconds of the date `offset` whole months after the epoch.
    fn month_anchor(&self, offset: i64) -> FieldResult<i64> {
        self.calendar.to_millis(self.date_from_month(offset)?)
    }

    /// Date `offset` months after the epoch.
    ///
    /// The year rolls over as needed; the epoch's day of month is kept, clamped to
    /// the length of the target month.
    pub fn date_from_month(&self, offset: i64) -> FieldResult<NaiveDateTime> {
        let target = month_index(self.epoch) + offset;
        let year = i32::try_from(target.div_euclid(12))
            .map_err(|_| FieldError::InvalidTime(format!("month offset {} out of range", offset)))?;
        let month = target.rem_euclid(12) as u32 + 1;
        let day = self
            .epoch
            .day()
            .min(self.calendar.days_in_month(year, month));
        NaiveDate::from_ymd_opt(year, month, day)
            .map(|d| d.and_time(self.epoch.time()))
            .ok_or_else(|| {
                FieldError::InvalidTime(format!("invalid date {}-{}-{}", year, month, day))
            })
    }
}

impl fmt::Display for TimeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} since {}",
            self.step,
            self.epoch.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Continuous month counter (`year * 12 + month0`).
pub fn month_index(date: NaiveDateTime) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}

/// Granularity at which dates are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DateBase {
    #[default]
    Day,
    Month,
    Year,
}

impl DateBase {
    /// Comparison key of `date` at this granularity.
    pub fn key(&self, date: NaiveDateTime) -> (i32, u32, u32) {
        match self {
            DateBase::Day => (date.year(), date.month(), date.day()),
            DateBase::Month => (date.year(), date.month(), 1),
            DateBase::Year => (date.year(), 1, 1),
        }
    }

    /// First instant of the period containing `date`.
    pub fn floor(&self, date: NaiveDateTime) -> NaiveDateTime {
        let (y, m, d) = self.key(date);
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap_or(date.date())
            .and_time(NaiveTime::MIN)
    }

    /// Last second of the period containing `date`.
    pub fn ceil(&self, date: NaiveDateTime, calendar: Calendar) -> NaiveDateTime {
        let (y, m, d) = match self {
            DateBase::Day => (date.year(), date.month(), date.day()),
            DateBase::Month => (
                date.year(),
                date.month(),
                calendar.days_in_month(date.year(), date.month()),
            ),
            DateBase::Year => (date.year(), 12, 31),
        };
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap_or(date.date())
            .and_time(end_of_day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    #[test]
    fn parse_units() {
        let units = TimeUnits::parse("days since 0001-01-01 00:00:00", Calendar::Gregorian).unwrap();
        assert_eq!(units.step(), TimeStep::Days);
        assert_eq!(units.epoch(), ymd(1, 1, 1));

        let units = TimeUnits::parse("hours since 1979-01-01", Calendar::Gregorian).unwrap();
        assert_eq!(units.step(), TimeStep::Hours);
        assert_eq!(units.to_string(), "hours since 1979-01-01 00:00:00");

        assert!(TimeUnits::parse("fortnights since 2000-01-01", Calendar::Gregorian).is_err());
        assert!(TimeUnits::parse("days from 2000-01-01", Calendar::Gregorian).is_err());
    }

    #[test]
    fn parse_calendar() {
        assert_eq!(Calendar::parse("standard").unwrap(), Calendar::Gregorian);
        assert_eq!(Calendar::parse("365_day").unwrap(), Calendar::NoLeap);
        assert!(Calendar::parse("360_day").is_err());
    }

    #[test]
    fn gregorian_round_trip() {
        let units = TimeUnits::days_since(2001, 1, 1).unwrap();
        for t in [0.0, 1.0, 58.0, 59.0, 365.0, 1000.5] {
            let date = units.to_date(t).unwrap();
            assert_eq!(units.to_num(date).unwrap(), t);
        }
        assert_eq!(units.to_date(59.0).unwrap(), ymd(2001, 3, 1));
    }

    #[test]
    fn noleap_skips_february_29() {
        let units = TimeUnits::parse("days since 2000-01-01", Calendar::NoLeap).unwrap();
        assert_eq!(units.to_date(59.0).unwrap(), ymd(2000, 3, 1));
        assert_eq!(units.to_date(365.0).unwrap(), ymd(2001, 1, 1));
        assert!(units.to_num(ymd(2000, 2, 29)).is_err());
    }

    #[test]
    fn days_in_month_respects_leap_years() {
        assert_eq!(Calendar::Gregorian.days_in_month(2000, 2), 29);
        assert_eq!(Calendar::Gregorian.days_in_month(1999, 2), 28);
        assert_eq!(Calendar::Gregorian.days_in_month(1900, 2), 28);
        assert_eq!(Calendar::NoLeap.days_in_month(2000, 2), 28);
        assert_eq!(Calendar::Gregorian.days_in_month(2002, 9), 30);
    }

    #[test]
    fn date_from_month_rolls_over_years() {
        let units = TimeUnits::parse("months since 1983-05-01 00:00:00", Calendar::Gregorian).unwrap();
        assert_eq!(units.date_from_month(2).unwrap(), ymd(1983, 7, 1));

        let units = TimeUnits::parse("months since 1987-07-13 00:00:00", Calendar::Gregorian).unwrap();
        assert_eq!(units.date_from_month(5).unwrap(), ymd(1987, 12, 13));

        let units = TimeUnits::parse("months since 1987-08-22 00:00:00", Calendar::Gregorian).unwrap();
        assert_eq!(units.date_from_month(9).unwrap(), ymd(1988, 5, 22));
        assert_eq!(units.date_from_month(-8).unwrap(), ymd(1986, 12, 22));
    }

    #[test]
    fn month_axis_round_trip() {
        let units = TimeUnits::parse("months since 2000-01-15", Calendar::Gregorian).unwrap();
        let date = units.to_date(13.0).unwrap();
        assert_eq!(date, ymd(2001, 2, 15));
        assert_eq!(units.to_num(date).unwrap(), 13.0);
    }

    #[test]
    fn month_axis_keeps_day_of_month() {
        let units = TimeUnits::parse("months since 2000-01-01", Calendar::Gregorian).unwrap();
        let num = units.to_num(ymd(2000, 1, 15)).unwrap();
        assert!(is_close!(num, 14.0 / 31.0));
        assert_eq!(units.to_date(num).unwrap(), ymd(2000, 1, 15));

        let num = units.to_num(ymd(2001, 2, 15)).unwrap();
        assert!(is_close!(num, 13.0 + 14.0 / 28.0));
        assert_eq!(units.to_date(num).unwrap(), ymd(2001, 2, 15));
        assert_eq!(units.to_date(0.5).unwrap(), ymd(2000, 1, 16) + chrono::Duration::hours(12));
    }

    #[test]
    fn month_axis_before_epoch_day() {
        let units = TimeUnits::parse("months since 2000-01-20", Calendar::Gregorian).unwrap();
        // 2000-03-10 lies between the anchors 2000-02-20 and 2000-03-20
        let num = units.to_num(ymd(2000, 3, 10)).unwrap();
        assert!(is_close!(num, 1.0 + 19.0 / 29.0));
        assert_eq!(units.to_date(num).unwrap(), ymd(2000, 3, 10));
    }

    #[test]
    fn invalid_epoch_is_an_error() {
        assert!(matches!(
            TimeUnits::days_since(2001, 2, 30).unwrap_err(),
            FieldError::InvalidTime(_)
        ));
    }

    #[test]
    fn date_base_bounds() {
        let date = ymd(2004, 2, 10) + chrono::Duration::hours(5);
        assert_eq!(DateBase::Day.floor(date), ymd(2004, 2, 10));
        assert_eq!(DateBase::Month.floor(date), ymd(2004, 2, 1));
        assert_eq!(DateBase::Year.floor(date), ymd(2004, 1, 1));

        let end = DateBase::Month.ceil(date, Calendar::Gregorian);
        assert_eq!((end.day(), end.hour(), end.minute(), end.second()), (29, 23, 59, 59));
        let end = DateBase::Year.ceil(date, Calendar::Gregorian);
        assert_eq!((end.month(), end.day()), (12, 31));
    }
}
