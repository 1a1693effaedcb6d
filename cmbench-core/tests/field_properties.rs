//! Property tests for masked fields.
//!
//! These tests exercise the engines together through the public API:
//! - arithmetic and mask propagation
//! - time axis sorting, alignment and climatologies
//! - spatial aggregation and weighted statistics
//! - cross-field statistics

use approx::assert_relative_eq;
use chrono::{NaiveDate, NaiveDateTime};
use cmbench_core::calendar::{DateBase, TimeUnits};
use cmbench_core::field::{CorrelationOptions, DiffOptions, Field};
use cmbench_core::time_axis::TimeAxis;
use ndarray::{array, Array1, Array3};

fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn daily_axis(n: usize) -> TimeAxis {
    TimeAxis::new(
        Array1::range(0.0, n as f64, 1.0),
        TimeUnits::days_since(2001, 1, 1).unwrap(),
    )
}

fn monthly_axis(start_year: i32, n: usize) -> TimeAxis {
    let dates: Vec<_> = (0..n)
        .map(|i| ymd(start_year + (i / 12) as i32, (i % 12) as u32 + 1, 15))
        .collect();
    TimeAxis::from_dates(&dates, TimeUnits::days_since(1900, 1, 1).unwrap()).unwrap()
}

/// Deterministic values in `[-1, 1)` with every 7th entry missing.
fn gappy_values(nt: usize, ny: usize, nx: usize) -> Array3<f64> {
    Array3::from_shape_fn((nt, ny, nx), |(t, i, j)| {
        let k = t * ny * nx + i * nx + j;
        if k % 7 == 3 {
            f64::NAN
        } else {
            ((k as f64) * 0.618_033_988_75).fract() * 2.0 - 1.0
        }
    })
}

mod arithmetic {
    use super::*;

    #[test]
    fn add_sub_round_trip() {
        let a = Field::new(gappy_values(10, 3, 4), daily_axis(10)).unwrap();
        let b = Field::new(gappy_values(10, 3, 4).mapv(|v| v * 3.0 + 0.5), daily_axis(10)).unwrap();
        let c = a.add(&b).unwrap().sub(&b).unwrap();

        let expected_valid = a.valid() & b.valid();
        assert_eq!(c.valid(), &expected_valid);
        for ((idx, &ok), v) in c.valid().indexed_iter().zip(c.values().iter()) {
            if ok {
                assert_relative_eq!(*v, a.values()[idx], epsilon = 1e-12);
            }
        }
    }
}

mod time_axis {
    use super::*;

    #[test]
    fn timsort_is_an_idempotent_permutation() {
        let time = TimeAxis::new(
            array![5.0, 1.0, 3.0, 0.0, 4.0, 2.0],
            TimeUnits::days_since(2001, 1, 1).unwrap(),
        );
        let values = Array3::from_shape_fn((6, 2, 2), |(t, i, j)| (t * 4 + i * 2 + j) as f64);
        let mut field = Field::new(values.clone(), time).unwrap();
        field.timsort();

        let mut sorted: Vec<f64> = field.values().iter().copied().collect();
        let mut original: Vec<f64> = values.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        original.sort_by(f64::total_cmp);
        assert_eq!(sorted, original);
        assert!(field.is_sorted());
        // the timestep stamped 0 came from index 3
        assert_eq!(field.value(0, 0, 0), Some(12.0));

        let once = field.values().clone();
        field.timsort();
        assert_eq!(field.values(), &once);
    }

    #[test]
    fn climatology_of_cycle_one_is_time_mean() {
        let field = Field::new(gappy_values(12, 2, 3), daily_axis(12)).unwrap();
        let clim = field.get_climatology(Some(1)).unwrap();
        let mean = field.timmean();
        for i in 0..2 {
            for j in 0..3 {
                assert_relative_eq!(
                    clim.value(0, i, j).unwrap(),
                    mean.value(0, i, j).unwrap(),
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn align_gives_matching_dates() {
        let a = Field::new(gappy_values(48, 1, 2), monthly_axis(1998, 48)).unwrap();
        let b = Field::new(gappy_values(30, 1, 2), monthly_axis(2000, 30)).unwrap();
        let (x, y) = a.align(&b, DateBase::Month).unwrap();
        assert_eq!(x.nt(), y.nt());
        assert_eq!(x.nt(), 24);
        let keys = |f: &Field| {
            f.dates()
                .unwrap()
                .into_iter()
                .map(|d| DateBase::Month.key(d))
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&x), keys(&y));
    }

    #[test]
    fn leap_year_days_per_month() {
        let dates = [ymd(2000, 2, 10), ymd(1999, 2, 10), ymd(1900, 2, 10)];
        let time = TimeAxis::from_dates(&dates, TimeUnits::days_since(1850, 1, 1).unwrap()).unwrap();
        let field = Field::series(array![1.0, 2.0, 3.0], time).unwrap();
        assert_eq!(field.days_per_month().unwrap(), vec![29, 28, 28]);
    }
}

mod spatial {
    use super::*;

    #[test]
    fn weighted_mean_reference() {
        let field = Field::spatial(array![[5.0, 10.0, 20.0]], None)
            .unwrap()
            .with_cell_area(array![[75.0, 25.0, 25.0]])
            .unwrap();
        assert_relative_eq!(field.fldmean(true)[0], 9.0, epsilon = 1e-12);
    }

    #[test]
    fn weighted_std_is_frequency_weighted() {
        let weighted = Field::spatial(array![[2.0, 4.0, 5.0]], None)
            .unwrap()
            .with_cell_area(array![[2.0, 1.0, 3.0]])
            .unwrap();
        let repeated = Field::spatial(array![[2.0, 2.0, 4.0, 5.0, 5.0, 5.0]], None).unwrap();
        assert_relative_eq!(
            weighted.fldstd(true, 0)[0],
            repeated.fldstd(false, 0)[0],
            epsilon = 1e-10
        );
    }

    #[test]
    fn valid_mask_is_inclusive_at_half() {
        let values = array![[[1.0]], [[f64::NAN]]];
        let field = Field::new(values, daily_axis(2)).unwrap();
        assert_eq!(field.get_valid_mask(0.5), array![[true]]);
    }
}

mod cross_field {
    use super::*;

    #[test]
    fn self_statistics() {
        let field = Field::new(gappy_values(40, 2, 2), daily_axis(40)).unwrap();

        let (r, p) = field.correlate(&field, CorrelationOptions::default()).unwrap();
        let diff = field.diff(&field, DiffOptions::default()).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(r.value(0, i, j).unwrap(), 1.0, epsilon = 1e-12);
                assert_eq!(p.value(0, i, j), Some(0.0));
                assert_eq!(diff.t_value.value(0, i, j), Some(0.0));
                assert_eq!(diff.p_value.value(0, i, j), Some(0.0));
                assert!(!diff.significant[[i, j]]);
            }
        }
    }
}
