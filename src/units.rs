//! Physical unit conversions.
//!
//! Each registered equivalence is a linear map `y = scale * x + offset` from one unit
//! to another. Equivalences can be used in either direction and chained, so
//! `mm d-1 -> kg m-2 s-1` goes through `m d-1`. Conversions that involve a density
//! only exist within a [`Context`]: the same `m` means a liquid water equivalent
//! depth under [`Context::Hydro`] and a snow thickness under [`Context::Snow`].
use std::collections::{HashMap, VecDeque};

use chrono::TimeDelta;
use ndarray::{Array, Array2, ArrayView, ArrayView2, Dimension, Zip};

use crate::error::UnitConversionError;

/// Density of liquid water, kg m-3
pub const WATER_DENSITY: f64 = 1000.0;
/// Seconds per day
pub const SECONDS_PER_DAY: f64 = 86400.0;
/// Bulk density assumed for snow when no measured density is available, kg m-3
pub const DEFAULT_SNOW_DENSITY: f64 = 300.0;

/// Which density-dependent equivalences are available for a conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Context {
    /// Only conversions that do not depend on the substance.
    Plain,
    /// Water depths and mass per area are related through [`WATER_DENSITY`].
    Hydro,
    /// Snow amount (kg m-2) and snow thickness (m) are related through `density` (kg m-3).
    Snow { density: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    pub scale: f64,
    pub offset: f64,
}

impl Linear {
    pub const IDENTITY: Linear = Linear { scale: 1.0, offset: 0.0 };

    const fn scale(scale: f64) -> Self {
        Self { scale, offset: 0.0 }
    }

    pub fn apply(&self, x: f64) -> f64 {
        self.scale * x + self.offset
    }

    pub fn inverse(&self) -> Self {
        Self { scale: 1.0 / self.scale, offset: -self.offset / self.scale }
    }

    /// The map equivalent to applying `self` then `next`.
    pub fn then(&self, next: &Linear) -> Self {
        Self { scale: self.scale * next.scale, offset: next.scale * self.offset + next.offset }
    }
}

static PLAIN_EQUIVALENCES: &[(&str, &str, Linear)] = &[
    ("degC", "K", Linear { scale: 1.0, offset: 273.15 }),
    ("hPa", "Pa", Linear::scale(100.0)),
    ("%", "1", Linear::scale(0.01)),
    ("min", "s", Linear::scale(60.0)),
    ("h", "s", Linear::scale(3600.0)),
    ("d", "s", Linear::scale(SECONDS_PER_DAY)),
    ("degree", "rad", Linear::scale(std::f64::consts::PI / 180.0)),
    ("km h-1", "m s-1", Linear::scale(1.0 / 3.6)),
    ("mm", "m", Linear::scale(1e-3)),
    ("mm d-1", "m d-1", Linear::scale(1e-3)),
    ("J m-2 h-1", "W m-2", Linear::scale(1.0 / 3600.0)),
];

static HYDRO_EQUIVALENCES: &[(&str, &str, Linear)] = &[
    ("m d-1", "kg m-2 s-1", Linear::scale(WATER_DENSITY / SECONDS_PER_DAY)),
    ("m", "kg m-2", Linear::scale(WATER_DENSITY)),
];

/// Canonical spelling of a unit string, so that e.g. `m/s`, `m s**-1` and `m s-1` compare equal.
pub fn normalize_unit(unit: &str) -> String {
    let cleaned = unit.replace("**", "").replace('^', "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let canonical = match cleaned.as_str() {
        "K" | "kelvin" | "Kelvin" | "degK" => "K",
        "degC" | "°C" | "deg_C" | "celsius" | "Celsius" | "C" => "degC",
        "" | "1" | "dimensionless" | "fraction" => "1",
        "%" | "percent" | "pct" => "%",
        "m/s" | "m s-1" => "m s-1",
        "km/h" | "km h-1" => "km h-1",
        "kg/m2/s" | "kg m-2 s-1" => "kg m-2 s-1",
        "kg/m2" | "kg m-2" => "kg m-2",
        "kg/m3" | "kg m-3" => "kg m-3",
        "W/m2" | "W m-2" => "W m-2",
        "J/m2/h" | "J m-2 h-1" => "J m-2 h-1",
        "m" | "m of water equivalent" | "m of water" | "m w.e." => "m",
        "mm" | "mm of water equivalent" | "mm w.e." => "mm",
        "m/d" | "m/day" | "m day-1" | "m d-1" => "m d-1",
        "mm/d" | "mm/day" | "mm day-1" | "mm d-1" => "mm d-1",
        "s" | "sec" | "second" | "seconds" => "s",
        "min" | "minute" | "minutes" => "min",
        "h" | "hr" | "hour" | "hours" => "h",
        "d" | "day" | "days" => "d",
        "degree" | "degrees" | "deg" => "degree",
        "rad" | "radian" | "radians" => "rad",
        other => other,
    };
    canonical.to_string()
}

/// Returns `true` if the two unit strings name the same unit.
pub fn same_unit(a: &str, b: &str) -> bool {
    normalize_unit(a) == normalize_unit(b)
}

fn equivalences(ctx: Context) -> Vec<(&'static str, &'static str, Linear)> {
    let mut all = PLAIN_EQUIVALENCES.to_vec();
    match ctx {
        Context::Plain => {}
        Context::Hydro => all.extend_from_slice(HYDRO_EQUIVALENCES),
        Context::Snow { density } => all.push(("kg m-2", "m", Linear::scale(1.0 / density))),
    }
    all
}

/// All (from, to) pairs directly registered in a context, in the direction they were registered.
pub fn registered_pairs(ctx: Context) -> Vec<(&'static str, &'static str)> {
    equivalences(ctx).into_iter().map(|(a, b, _)| (a, b)).collect()
}

/// Find the linear map converting `from` to `to` in the given context.
pub fn conversion(from: &str, to: &str, ctx: Context) -> Result<Linear, UnitConversionError> {
    let start = normalize_unit(from);
    let goal = normalize_unit(to);
    if start == goal {
        return Ok(Linear::IDENTITY);
    }

    let mut graph: HashMap<&str, Vec<(&str, Linear)>> = HashMap::new();
    for (a, b, map) in equivalences(ctx) {
        graph.entry(a).or_default().push((b, map));
        graph.entry(b).or_default().push((a, map.inverse()));
    }

    // Breadth-first, so the shortest chain of equivalences wins.
    let mut best: HashMap<&str, Linear> = HashMap::new();
    let mut queue = VecDeque::new();
    if let Some((&key, _)) = graph.get_key_value(start.as_str()) {
        best.insert(key, Linear::IDENTITY);
        queue.push_back(key);
    }

    while let Some(unit) = queue.pop_front() {
        let so_far = best[unit];
        if unit == goal {
            return Ok(so_far);
        }
        for &(next, map) in graph.get(unit).map(|v| v.as_slice()).unwrap_or_default() {
            if !best.contains_key(next) {
                best.insert(next, so_far.then(&map));
                queue.push_back(next);
            }
        }
    }

    Err(UnitConversionError::new(from, to))
}

/// Convert a single value.
pub fn convert_value(value: f64, from: &str, to: &str, ctx: Context) -> Result<f64, UnitConversionError> {
    Ok(conversion(from, to, ctx)?.apply(value))
}

/// Convert an array of any shape, returning a new array of the same shape.
pub fn convert<D: Dimension>(values: ArrayView<f64, D>, from: &str, to: &str, ctx: Context) -> Result<Array<f64, D>, UnitConversionError> {
    let map = conversion(from, to, ctx)?;
    Ok(values.mapv(|v| map.apply(v)))
}

/// Convert between snow amount and snow thickness using a measured density for each element.
///
/// `density` must be in kg m-3 and have the same shape as `values`. Either side may be
/// given in any unit plainly convertible to kg m-2 (amount) or m (thickness).
///
/// # Panics
/// If `density` and `values` have different shapes.
pub fn convert_with_density(values: ArrayView2<f64>, from: &str, to: &str, density: ArrayView2<f64>) -> Result<Array2<f64>, UnitConversionError> {
    let plain = Context::Plain;
    if same_unit(from, to) {
        return Ok(values.to_owned());
    }

    let (pre, post, to_thickness) = if let (Ok(pre), Ok(post)) = (conversion(from, "kg m-2", plain), conversion("m", to, plain)) {
        (pre, post, true)
    } else if let (Ok(pre), Ok(post)) = (conversion(from, "m", plain), conversion("kg m-2", to, plain)) {
        (pre, post, false)
    } else {
        return Err(UnitConversionError::new(from, to));
    };

    let mut out = Array2::zeros(values.raw_dim());
    Zip::from(&mut out).and(&values).and(&density).for_each(|o, &v, &rho| {
        let v = pre.apply(v);
        let v = if to_thickness { v / rho } else { v * rho };
        *o = post.apply(v);
    });
    Ok(out)
}

/// Turn a count of samples into the duration they represent, in seconds.
pub fn count_to_duration<D: Dimension>(counts: ArrayView<f64, D>, interval: TimeDelta) -> Array<f64, D> {
    let seconds = interval.num_milliseconds() as f64 / 1000.0;
    counts.mapv(|n| n * seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;
    use rstest::rstest;

    #[rstest]
    #[case(Context::Plain)]
    #[case(Context::Hydro)]
    #[case(Context::Snow { density: DEFAULT_SNOW_DENSITY })]
    fn test_conversions_are_self_inverse(#[case] ctx: Context) {
        let values = [-40.0, 0.0, 0.024, 1.5, 273.15, 101325.0];
        for (a, b) in registered_pairs(ctx) {
            for &v in values.iter() {
                let there = convert_value(v, a, b, ctx).unwrap();
                let back = convert_value(there, b, a, ctx).unwrap();
                assert_relative_eq!(back, v, epsilon = 1e-9, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_depth_per_day_to_flux() {
        let flux = convert_value(0.024, "m d-1", "kg m-2 s-1", Context::Hydro).unwrap();
        assert_abs_diff_eq!(flux, 0.024 * 1000.0 / 86400.0, epsilon = 1e-15);

        // Goes through m d-1
        let flux = convert_value(24.0, "mm/day", "kg m-2 s-1", Context::Hydro).unwrap();
        assert_abs_diff_eq!(flux, 24.0 / 86400.0, epsilon = 1e-15);
    }

    #[test]
    fn test_density_conversions_need_context() {
        let err = convert_value(1.0, "m", "kg m-2", Context::Plain).unwrap_err();
        assert_eq!(err, UnitConversionError::new("m", "kg m-2"));

        let snw = convert_value(0.3, "m", "kg m-2", Context::Hydro).unwrap();
        assert_abs_diff_eq!(snw, 300.0);
        let snd = convert_value(snw, "kg m-2", "m", Context::Snow { density: DEFAULT_SNOW_DENSITY }).unwrap();
        assert_abs_diff_eq!(snd, 1.0);
    }

    #[test]
    fn test_temperature_and_aliases() {
        assert_abs_diff_eq!(convert_value(0.0, "°C", "kelvin", Context::Plain).unwrap(), 273.15);
        assert_abs_diff_eq!(convert_value(50.0, "percent", "dimensionless", Context::Plain).unwrap(), 0.5);
        assert!(same_unit("kg m**-2 s**-1", "kg m-2 s-1"));
        assert!(same_unit("W m^-2", "W/m2"));
    }

    #[test]
    fn test_water_equivalent_depths() {
        assert!(same_unit("m of water equivalent", "m"));
        assert!(same_unit("m w.e.", "m of water"));
        assert_abs_diff_eq!(convert_value(1.0, "m of water equivalent", "kg m-2", Context::Hydro).unwrap(), 1000.0);
        assert_abs_diff_eq!(convert_value(0.5, "m of water equivalent", "mm", Context::Plain).unwrap(), 500.0);
    }

    #[test]
    fn test_unknown_units() {
        let err = conversion("furlong", "m", Context::Hydro).unwrap_err();
        assert_eq!(err.from, "furlong");
        assert_eq!(err.to, "m");

        let err = conversion("K", "Pa", Context::Plain).unwrap_err();
        assert_eq!(err, UnitConversionError::new("K", "Pa"));
    }

    #[test]
    fn test_convert_array() {
        let pa = convert(array![[1000.0, 1013.25], [990.0, 1001.0]].view(), "hPa", "Pa", Context::Plain).unwrap();
        assert_abs_diff_eq!(pa, array![[100000.0, 101325.0], [99000.0, 100100.0]], epsilon = 1e-9);
    }

    #[test]
    fn test_measured_density() {
        let snw = array![[100.0, 30.0]];
        let rho = array![[200.0, 300.0]];
        let snd = convert_with_density(snw.view(), "kg m-2", "m", rho.view()).unwrap();
        assert_abs_diff_eq!(snd, array![[0.5, 0.1]], epsilon = 1e-12);

        let back = convert_with_density(snd.view(), "m", "kg m-2", rho.view()).unwrap();
        assert_abs_diff_eq!(back, snw, epsilon = 1e-12);

        let cm = convert_with_density(snw.view(), "kg m-2", "mm", rho.view()).unwrap();
        assert_abs_diff_eq!(cm, array![[500.0, 100.0]], epsilon = 1e-9);

        convert_with_density(snw.view(), "kg m-2", "K", rho.view()).unwrap_err();
    }

    #[test]
    fn test_count_to_duration() {
        let secs = count_to_duration(array![[0.0, 3.0], [24.0, 1.0]].view(), TimeDelta::hours(1));
        assert_abs_diff_eq!(secs, array![[0.0, 10800.0], [86400.0, 3600.0]]);
    }
}
