//! The labelled (time, location) arrays that flow through the engine.
use std::fmt::Display;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::AssemblyError;

/// How often a field is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum Frequency {
    #[strum(to_string = "sub-daily", serialize = "1hr", serialize = "subdaily")]
    SubDaily,
    #[strum(to_string = "daily", serialize = "day")]
    Daily,
}

/// A named point site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub lon: f64,
    pub lat: f64,
}

impl Location {
    pub fn new<S: ToString>(name: S, lon: f64, lat: f64) -> Self {
        Self { name: name.to_string(), lon, lat }
    }
}

/// Value of a variable, coordinate or global attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    Floats(Vec<f64>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        if let Self::Str(s) = self {
            Some(s)
        } else {
            None
        }
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Str(s) => write!(f, "{s}"),
            AttrValue::Floats(v) => write!(f, "[{}]", v.iter().join(", ")),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

pub type Attributes = IndexMap<String, AttrValue>;

/// A named physical quantity sampled over time at a set of locations.
///
/// `values` is indexed `(time, location)`: row `i` holds the samples at `times[i]`
/// and column `j` the samples at `locations[j]`. The constructors enforce that
/// the array shape matches the coordinates, so everything downstream may rely
/// on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    frequency: Frequency,
    units: String,
    times: Vec<NaiveDateTime>,
    locations: Vec<String>,
    values: Array2<f64>,
    attrs: Attributes,
}

impl Field {
    pub fn new<N: ToString, U: ToString>(
        name: N,
        frequency: Frequency,
        units: U,
        times: Vec<NaiveDateTime>,
        locations: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self, AssemblyError> {
        let name = name.to_string();
        let expected = vec![times.len(), locations.len()];
        if values.shape() != expected.as_slice() {
            return Err(AssemblyError::ShapeMismatch {
                variable: name,
                found: values.shape().to_vec(),
                expected,
            });
        }

        Ok(Self {
            name,
            frequency,
            units: units.to_string(),
            times,
            locations,
            values,
            attrs: Attributes::new(),
        })
    }

    /// Make a new field on the same grid and frequency as this one.
    pub fn derive<N: ToString, U: ToString>(&self, name: N, units: U, values: Array2<f64>) -> Result<Self, AssemblyError> {
        Self::new(name, self.frequency, units, self.times.clone(), self.locations.clone(), values)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn ntime(&self) -> usize {
        self.times.len()
    }

    pub fn nloc(&self) -> usize {
        self.locations.len()
    }

    pub fn is_daily(&self) -> bool {
        self.frequency == Frequency::Daily
    }

    /// Consume the field, returning it under a different name.
    pub fn renamed<S: ToString>(mut self, name: S) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn set_attr<K: ToString, V: Into<AttrValue>>(&mut self, key: K, value: V) {
        self.attrs.insert(key.to_string(), value.into());
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<AttrValue> {
        self.attrs.shift_remove(key)
    }

    pub(crate) fn set_units<U: ToString>(&mut self, units: U) {
        self.units = units.to_string();
    }

    /// The calendar days covered by the time stamps, in order and without repeats.
    pub fn days(&self) -> Vec<NaiveDate> {
        self.times.iter().map(|t| t.date()).dedup().collect_vec()
    }

    /// Spacing between the first two samples, `None` for a field with fewer than two.
    pub fn sampling_interval(&self) -> Option<TimeDelta> {
        match self.times.as_slice() {
            [t0, t1, ..] => Some(*t1 - *t0),
            _ => None,
        }
    }

    /// Short human-readable description of the time axis, used in error messages.
    pub fn time_span(&self) -> String {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => format!("{first} to {last} ({} steps)", self.times.len()),
            _ => "no times".to_string(),
        }
    }

    /// Check that `other` shares this field's locations and time stamps.
    ///
    /// Element-wise derivations and dataset assembly both rely on this; a mismatch
    /// means an upstream step built a field on the wrong grid.
    pub fn check_same_grid(&self, other: &Field) -> Result<(), AssemblyError> {
        if self.locations != other.locations {
            return Err(AssemblyError::location_mismatch(
                &other.name,
                &self.name,
                &other.locations,
                &self.locations,
            ));
        }

        if self.times != other.times {
            return Err(AssemblyError::time_mismatch(
                &other.name,
                &self.name,
                other.time_span(),
                self.time_span(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{hourly_times, make_field};

    #[test]
    fn test_shape_checked_on_construction() {
        let times = hourly_times(2023, 1, 1, 3);
        let err = Field::new(
            "tas",
            Frequency::SubDaily,
            "K",
            times,
            vec!["a".to_string()],
            Array2::zeros((2, 1)),
        )
        .unwrap_err();

        assert_eq!(
            err,
            AssemblyError::ShapeMismatch { variable: "tas".to_string(), found: vec![2, 1], expected: vec![3, 1] }
        );
    }

    #[test]
    fn test_days_and_interval() {
        let field = make_field("tas", Frequency::SubDaily, "K", hourly_times(2023, 1, 1, 30), 2, |i, _| i as f64);
        assert_eq!(field.days().len(), 2);
        assert_eq!(field.sampling_interval(), Some(TimeDelta::hours(1)));
    }

    #[test]
    fn test_grid_mismatch() {
        let a = make_field("a", Frequency::SubDaily, "K", hourly_times(2023, 1, 1, 4), 2, |_, _| 0.0);
        let b = make_field("b", Frequency::SubDaily, "K", hourly_times(2023, 1, 2, 4), 2, |_, _| 0.0);
        let c = make_field("c", Frequency::SubDaily, "K", hourly_times(2023, 1, 1, 4), 3, |_, _| 0.0);

        assert!(matches!(a.check_same_grid(&b), Err(AssemblyError::TimeMismatch { .. })));
        assert!(matches!(a.check_same_grid(&c), Err(AssemblyError::LocationMismatch { .. })));
        a.check_same_grid(&a.clone()).unwrap();
    }

    #[test]
    fn test_frequency_parsing() {
        assert_eq!("1hr".parse::<Frequency>().unwrap(), Frequency::SubDaily);
        assert_eq!("day".parse::<Frequency>().unwrap(), Frequency::Daily);
        assert_eq!(Frequency::Daily.to_string(), "daily");
    }
}
