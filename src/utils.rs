//! Small helpers shared by the library and the binaries.
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CfTimeError {
    #[error("Time units '{0}' are not of the form '<unit> since <date>'")]
    NotCfUnits(String),
    #[error("Unknown time unit '{0}'")]
    UnknownUnit(String),
    #[error("Could not parse the reference date '{0}'")]
    BadEpoch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TimeUnit {
    #[strum(to_string = "seconds")]
    Seconds,
    #[strum(to_string = "minutes")]
    Minutes,
    #[strum(to_string = "hours")]
    Hours,
    #[strum(to_string = "days")]
    Days,
}

impl TimeUnit {
    fn milliseconds(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1e3,
            TimeUnit::Minutes => 6e4,
            TimeUnit::Hours => 3.6e6,
            TimeUnit::Days => 8.64e7,
        }
    }
}

/// Parsed CF time `units` attribute, e.g. `hours since 1990-01-01 00:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfTimeUnits {
    pub unit: TimeUnit,
    pub epoch: NaiveDateTime,
}

impl CfTimeUnits {
    pub fn new(unit: TimeUnit, epoch: NaiveDateTime) -> Self {
        Self { unit, epoch }
    }

    /// Time stamp of a value in these units, rounded to the millisecond.
    pub fn to_datetime(&self, value: f64) -> NaiveDateTime {
        let ms = (value * self.unit.milliseconds()).round() as i64;
        self.epoch + TimeDelta::milliseconds(ms)
    }

    /// Inverse of [`CfTimeUnits::to_datetime`].
    pub fn from_datetime(&self, time: NaiveDateTime) -> f64 {
        (time - self.epoch).num_milliseconds() as f64 / self.unit.milliseconds()
    }
}

impl std::fmt::Display for CfTimeUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} since {}", self.unit, self.epoch.format("%Y-%m-%d %H:%M:%S"))
    }
}

pub fn parse_cf_time_units(units: &str) -> Result<CfTimeUnits, CfTimeError> {
    let (unit, epoch) = units
        .trim()
        .split_once(" since ")
        .ok_or_else(|| CfTimeError::NotCfUnits(units.to_string()))?;

    let unit = match unit.trim().to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => TimeUnit::Seconds,
        "min" | "mins" | "minute" | "minutes" => TimeUnit::Minutes,
        "h" | "hr" | "hrs" | "hour" | "hours" => TimeUnit::Hours,
        "d" | "day" | "days" => TimeUnit::Days,
        other => return Err(CfTimeError::UnknownUnit(other.to_string())),
    };

    let epoch_str = epoch.trim().trim_end_matches("UTC").trim_end_matches('Z').trim();
    let epoch = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(epoch_str, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(epoch_str, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| CfTimeError::BadEpoch(epoch.trim().to_string()))?;

    Ok(CfTimeUnits { unit, epoch })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn datetime(y: i32, m: u32, d: u32, hh: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(hh, 0, 0).unwrap()
    }

    #[rstest]
    #[case("hours since 1990-01-01 00:00:00", TimeUnit::Hours, datetime(1990, 1, 1, 0))]
    #[case("hours since 1900-01-01 00:00:00.0", TimeUnit::Hours, datetime(1900, 1, 1, 0))]
    #[case("days since 1990-01-01", TimeUnit::Days, datetime(1990, 1, 1, 0))]
    #[case("seconds since 1970-01-01T06:00:00Z", TimeUnit::Seconds, datetime(1970, 1, 1, 6))]
    #[case("Minutes since 2000-02-29 12:00", TimeUnit::Minutes, datetime(2000, 2, 29, 12))]
    fn test_parse_units(#[case] units: &str, #[case] unit: TimeUnit, #[case] epoch: NaiveDateTime) {
        assert_eq!(parse_cf_time_units(units).unwrap(), CfTimeUnits::new(unit, epoch));
    }

    #[rstest]
    #[case("hours")]
    #[case("fortnights since 1990-01-01")]
    #[case("hours since yesterday")]
    fn test_bad_units(#[case] units: &str) {
        parse_cf_time_units(units).unwrap_err();
    }

    #[test]
    fn test_conversions() {
        let units = parse_cf_time_units("hours since 1900-01-01 00:00:00").unwrap();
        // ERA5 stores hours since 1900; 1990-01-01 00:00 is hour 788928
        assert_eq!(units.to_datetime(788928.0), datetime(1990, 1, 1, 0));
        assert_eq!(units.from_datetime(datetime(1990, 1, 1, 1)), 788929.0);
        assert_eq!(units.to_string(), "hours since 1900-01-01 00:00:00");
    }
}
