use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use itertools::Itertools;
use ndarray::Array2;

use crate::field::{Field, Frequency};

pub(crate) fn location_names(nloc: usize) -> Vec<String> {
    (0..nloc).map(|i| format!("site{i}")).collect_vec()
}

pub(crate) fn hourly_times(year: i32, month: u32, day: u32, n: usize) -> Vec<NaiveDateTime> {
    stepped_times(year, month, day, n, TimeDelta::hours(1))
}

pub(crate) fn daily_times(year: i32, month: u32, day: u32, n: usize) -> Vec<NaiveDateTime> {
    stepped_times(year, month, day, n, TimeDelta::days(1))
}

fn stepped_times(year: i32, month: u32, day: u32, n: usize, step: TimeDelta) -> Vec<NaiveDateTime> {
    let start = NaiveDate::from_ymd_opt(year, month, day)
        .expect("test dates should be valid")
        .and_hms_opt(0, 0, 0)
        .expect("midnight should be valid");
    (0..n).map(|i| start + step * i as i32).collect_vec()
}

/// Build a field on `nloc` generic sites whose value at (time index, location index)
/// is given by `value`.
pub(crate) fn make_field<F: Fn(usize, usize) -> f64>(
    name: &str,
    frequency: Frequency,
    units: &str,
    times: Vec<NaiveDateTime>,
    nloc: usize,
    value: F,
) -> Field {
    let values = Array2::from_shape_fn((times.len(), nloc), |(i, j)| value(i, j));
    Field::new(name, frequency, units, times, location_names(nloc), values)
        .expect("test field shapes should be consistent")
}

/// A scratch directory under the system temporary directory, emptied on creation.
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("era5-daily-tests-{}-{name}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).expect("should be able to clear the scratch directory");
    }
    std::fs::create_dir_all(&dir).expect("should be able to create the scratch directory");
    dir
}
