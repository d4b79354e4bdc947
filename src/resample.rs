//! Aggregation of sub-daily fields into calendar days.
use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::NaiveDate;
use itertools::Itertools;
use ndarray::{Array2, Axis};

use crate::error::AssemblyError;
use crate::field::{Field, Frequency};

/// Unit given to the output of [`Reducer::ThresholdCount`].
pub const COUNT_UNITS: &str = "count";

/// How the samples within one day are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reducer {
    Mean,
    Min,
    Max,
    Sum,
    /// Number of samples strictly greater than the threshold.
    ThresholdCount(f64),
}

impl Reducer {
    /// The word used in a CF `cell_methods` attribute for this reduction.
    pub fn cell_method(&self) -> &'static str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Min => "minimum",
            Reducer::Max => "maximum",
            Reducer::Sum | Reducer::ThresholdCount(_) => "sum",
        }
    }

    fn reduce<'a, I: Iterator<Item = &'a f64>>(&self, samples: I) -> f64 {
        match self {
            Reducer::Mean => {
                let (n, total) = samples.fold((0usize, 0.0), |(n, total), &x| (n + 1, total + x));
                if n == 0 { f64::NAN } else { total / n as f64 }
            }
            Reducer::Min => samples.fold(f64::INFINITY, |acc, &x| nan_aware(acc, x, f64::min)),
            Reducer::Max => samples.fold(f64::NEG_INFINITY, |acc, &x| nan_aware(acc, x, f64::max)),
            Reducer::Sum => samples.sum(),
            Reducer::ThresholdCount(threshold) => samples.filter(|&&x| x > *threshold).count() as f64,
        }
    }
}

impl Display for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reducer::ThresholdCount(threshold) => write!(f, "count > {threshold}"),
            other => write!(f, "{}", other.cell_method()),
        }
    }
}

// f64::min/max skip NaNs; a missing sample must make the day's extreme missing too.
fn nan_aware(acc: f64, x: f64, op: fn(f64, f64) -> f64) -> f64 {
    if acc.is_nan() || x.is_nan() {
        f64::NAN
    } else {
        op(acc, x)
    }
}

/// Reduce a sub-daily field to one value per calendar day.
///
/// A field that is already daily is returned unchanged whatever the reducer. Days are
/// taken from the time stamps as given, so a final day with fewer samples than the
/// others is still reduced as-is. The output time stamp of each day is its midnight.
/// Attributes of the sub-daily field are not carried over.
pub fn resample(field: &Field, reducer: Reducer) -> Result<Field, AssemblyError> {
    if field.frequency() == Frequency::Daily {
        return Ok(field.clone());
    }

    let mut buckets: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (i, t) in field.times().iter().enumerate() {
        buckets.entry(t.date()).or_default().push(i);
    }

    let values = field.values();
    let mut out = Array2::from_elem((buckets.len(), field.nloc()), f64::NAN);
    for (mut out_row, rows) in out.axis_iter_mut(Axis(0)).zip(buckets.values()) {
        for (iloc, out_value) in out_row.iter_mut().enumerate() {
            let column = values.column(iloc);
            *out_value = reducer.reduce(rows.iter().map(|&i| &column[i]));
        }
    }

    let times = buckets.keys().map(|d| d.and_time(chrono::NaiveTime::MIN)).collect_vec();
    let units = if let Reducer::ThresholdCount(_) = reducer {
        COUNT_UNITS
    } else {
        field.units()
    };

    Field::new(field.name(), Frequency::Daily, units, times, field.locations().to_vec(), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_times, hourly_times, make_field};
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    fn hourly_tas() -> Field {
        // value = 250 + hour of the run + 10 * site, so each day is a simple ramp
        make_field("tas", Frequency::SubDaily, "K", hourly_times(1990, 1, 1, 72), 2, |i, j| 250.0 + i as f64 + 10.0 * j as f64)
    }

    #[rstest]
    #[case(Reducer::Mean, [261.5, 285.5])]
    #[case(Reducer::Min, [250.0, 274.0])]
    #[case(Reducer::Max, [273.0, 297.0])]
    fn test_reducers(#[case] reducer: Reducer, #[case] site0_first_two_days: [f64; 2]) {
        let daily = resample(&hourly_tas(), reducer).unwrap();
        assert_eq!(daily.frequency(), Frequency::Daily);
        assert_eq!(daily.ntime(), 3);
        assert_eq!(daily.units(), "K");
        assert_abs_diff_eq!(daily.values()[[0, 0]], site0_first_two_days[0]);
        assert_abs_diff_eq!(daily.values()[[1, 0]], site0_first_two_days[1]);
        assert_abs_diff_eq!(daily.values()[[0, 1]], site0_first_two_days[0] + 10.0);
        assert_eq!(daily.times()[2], daily_times(1990, 1, 3, 1)[0]);
    }

    #[test]
    fn test_sum_and_partial_day() {
        let field = make_field("pr", Frequency::SubDaily, "m", hourly_times(1990, 1, 1, 30), 1, |_, _| 0.001);
        let daily = resample(&field, Reducer::Sum).unwrap();
        assert_eq!(daily.ntime(), 2);
        assert_abs_diff_eq!(daily.values()[[0, 0]], 0.024, epsilon = 1e-12);
        assert_abs_diff_eq!(daily.values()[[1, 0]], 0.006, epsilon = 1e-12);
    }

    #[test]
    fn test_threshold_count_is_strict() {
        let field = make_field("rsds", Frequency::SubDaily, "W m-2", hourly_times(1990, 6, 1, 24), 1, |i, _| 10.0 * i as f64);
        let daily = resample(&field, Reducer::ThresholdCount(120.0)).unwrap();
        // 130, 140, ..., 230 exceed 120; 120 itself does not
        assert_abs_diff_eq!(daily.values()[[0, 0]], 11.0);
        assert_eq!(daily.units(), COUNT_UNITS);
    }

    #[test]
    fn test_missing_samples_propagate() {
        let field = make_field("tas", Frequency::SubDaily, "K", hourly_times(1990, 1, 1, 24), 1, |i, _| if i == 5 { f64::NAN } else { 270.0 });
        for reducer in [Reducer::Mean, Reducer::Min, Reducer::Max, Reducer::Sum] {
            let daily = resample(&field, reducer).unwrap();
            assert!(daily.values()[[0, 0]].is_nan(), "{reducer} should propagate NaN");
        }
    }

    #[rstest]
    fn test_daily_is_unchanged(
        #[values(Reducer::Mean, Reducer::Min, Reducer::Max, Reducer::Sum, Reducer::ThresholdCount(120.0))] reducer: Reducer,
    ) {
        let mut field = make_field("tas", Frequency::Daily, "K", daily_times(1990, 1, 1, 5), 3, |i, j| (i * j) as f64);
        field.set_attr("long_name", "already daily");
        let out = resample(&field, reducer).unwrap();
        assert_eq!(out, field);
    }
}
