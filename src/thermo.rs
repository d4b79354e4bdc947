//! Humidity and wind quantities derived from more than one input.
//!
//! All functions work element-wise over `(time, location)` arrays and panic if their
//! inputs do not share a shape; callers check that the source fields are on the same
//! grid (see [`Field::check_same_grid`](crate::field::Field::check_same_grid)) first.
use ndarray::{Array2, ArrayView2, Zip};

use crate::error::UnitConversionError;
use crate::units::{self, Context};

/// Ratio of the gas constants of dry air and water vapour
pub const EPSILON: f64 = 0.6219569100577033;

/// Saturation vapour pressure over liquid water, in Pa, for a temperature in K.
///
/// Uses the Sonntag (1990) formulation.
pub fn saturation_vapor_pressure(temperature: f64) -> f64 {
    let t = temperature;
    let ln_hpa = -6096.9385 / t + 16.635794 - 2.711193e-2 * t + 1.673952e-5 * t * t + 2.433502 * t.ln();
    100.0 * ln_hpa.exp()
}

/// Relative humidity (fraction) from temperature and dew point, both in K.
pub fn relative_humidity(temperature: ArrayView2<f64>, dewpoint: ArrayView2<f64>) -> Result<Array2<f64>, UnitConversionError> {
    let percent = Zip::from(&temperature)
        .and(&dewpoint)
        .map_collect(|&t, &td| 100.0 * saturation_vapor_pressure(td) / saturation_vapor_pressure(t));
    units::convert(percent.view(), "%", "1", Context::Plain)
}

/// Specific humidity (fraction) from temperature (K), relative humidity (fraction)
/// and surface pressure (Pa).
pub fn specific_humidity(
    temperature: ArrayView2<f64>,
    relative_humidity: ArrayView2<f64>,
    surface_pressure: ArrayView2<f64>,
) -> Array2<f64> {
    Zip::from(&temperature)
        .and(&relative_humidity)
        .and(&surface_pressure)
        .map_collect(|&t, &rh, &p| {
            let e_sat = saturation_vapor_pressure(t);
            let w_sat = EPSILON * e_sat / (p - e_sat);
            let w = rh * w_sat;
            w / (1.0 + w)
        })
}

/// Wind speed and direction from eastward and northward components.
///
/// The direction is the angle of the vector, `atan2(northward, eastward)`, in degrees
/// (counterclockwise from east).
pub fn wind_from_components(eastward: ArrayView2<f64>, northward: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
    let magnitude = Zip::from(&eastward).and(&northward).map_collect(|&u, &v| u.hypot(v));
    let direction = Zip::from(&eastward).and(&northward).map_collect(|&u, &v| v.atan2(u).to_degrees());
    (magnitude, direction)
}

/// Inverse of [`wind_from_components`].
pub fn components_from_magnitude_direction(magnitude: ArrayView2<f64>, direction: ArrayView2<f64>) -> (Array2<f64>, Array2<f64>) {
    let eastward = Zip::from(&magnitude).and(&direction).map_collect(|&m, &d| m * d.to_radians().cos());
    let northward = Zip::from(&magnitude).and(&direction).map_collect(|&m, &d| m * d.to_radians().sin());
    (eastward, northward)
}
