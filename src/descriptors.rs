//! The canonical output variables and how each one may be obtained.
//!
//! Every variable the engine can produce has one [`VariableDescriptor`] in
//! [`DESCRIPTORS`]. A descriptor lists its [`Candidate`]s in order of preference:
//! the resolver uses the first one whose inputs are all present. The table is
//! ordered by [`Family`], and within a family so that a variable only consumes
//! variables listed before it.
use itertools::Itertools;

use crate::field::Frequency;
use crate::resample::Reducer;

/// Thematic group of variables, in the order they are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Family {
    Temperature,
    Precipitation,
    Snow,
    Wind,
    Pressure,
    Humidity,
    Radiation,
}

/// Something a candidate needs before it can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    /// A field of this name in the daily source collection
    Daily(&'static str),
    /// A field of this name in the sub-daily source collection
    Subdaily(&'static str),
    /// A canonical variable resolved earlier in the same run
    Resolved(&'static str),
}

impl Input {
    pub fn name(&self) -> &'static str {
        match *self {
            Input::Daily(n) | Input::Subdaily(n) | Input::Resolved(n) => n,
        }
    }

    /// The input as it appears in error messages, e.g. `subdaily:tas`
    pub fn label(&self) -> String {
        match self {
            Input::Daily(n) => format!("daily:{n}"),
            Input::Subdaily(n) => format!("subdaily:{n}"),
            Input::Resolved(n) => format!("resolved:{n}"),
        }
    }
}

/// Which density-dependent unit equivalences a conversion may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionContext {
    Plain,
    Hydro,
    /// Snow amount to thickness through the configured snow density
    FixedSnowDensity,
}

/// Which component [`Formula::WindComponent`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Eastward,
    Northward,
}

/// A way of computing a daily variable from its inputs.
///
/// Every formula ends by converting its natural unit to the descriptor's unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Formula {
    /// Reduce a sub-daily source to days.
    Aggregate { source: &'static str, reducer: Reducer },
    /// A sub-daily accumulation or flux turned into a mean daily mass flux. Depths
    /// (`m`, `mm`) are summed over the day and treated as a depth per day; anything
    /// else is averaged. `quantity` names the accumulated quantity in descriptions.
    AccumulatedFlux { source: &'static str, quantity: &'static str },
    /// Convert one input to the descriptor unit. Sub-daily inputs are averaged first.
    Convert { input: Input, context: ConversionContext, basis: &'static str },
    /// Snow amount over a measured snow density.
    DensityRatio { amount: &'static str, density: &'static str },
    /// Wind speed from the `uas` and `vas` components of one source collection.
    /// For sub-daily sources the speed is computed per sample, then reduced.
    WindSpeed { frequency: Frequency, reducer: Reducer },
    /// A component of the resolved `sfcWind`, along the direction of the daily
    /// mean of the sub-daily wind vector.
    WindComponent(Component),
    /// Direction of the resolved `uas`/`vas` vector.
    WindDirection,
    /// The values of another resolved variable, unchanged.
    Copy { from: &'static str, basis: &'static str },
    /// Relative humidity from resolved `tas` and `tdps`.
    RelativeHumidity,
    /// Specific humidity from resolved `tas`, `hurs` and `ps`.
    SpecificHumidity,
    /// Time per day that the sub-daily downwelling shortwave flux exceeds the
    /// configured sunshine threshold.
    SunshineDuration { source: &'static str },
}

impl Formula {
    pub fn inputs(&self) -> Vec<Input> {
        match *self {
            Formula::Aggregate { source, .. } => vec![Input::Subdaily(source)],
            Formula::AccumulatedFlux { source, .. } => vec![Input::Subdaily(source)],
            Formula::Convert { input, .. } => vec![input],
            Formula::DensityRatio { amount, density } => vec![Input::Resolved(amount), Input::Resolved(density)],
            Formula::WindSpeed { frequency: Frequency::SubDaily, .. } => vec![Input::Subdaily("uas"), Input::Subdaily("vas")],
            Formula::WindSpeed { frequency: Frequency::Daily, .. } => vec![Input::Daily("uas"), Input::Daily("vas")],
            Formula::WindComponent(_) => vec![Input::Resolved("sfcWind"), Input::Subdaily("uas"), Input::Subdaily("vas")],
            Formula::WindDirection => vec![Input::Resolved("uas"), Input::Resolved("vas")],
            Formula::Copy { from, .. } => vec![Input::Resolved(from)],
            Formula::RelativeHumidity => vec![Input::Resolved("tas"), Input::Resolved("tdps")],
            Formula::SpecificHumidity => vec![Input::Resolved("tas"), Input::Resolved("hurs"), Input::Resolved("ps")],
            Formula::SunshineDuration { source } => vec![Input::Subdaily(source)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    /// A daily source field with the canonical name, used verbatim.
    UseDaily,
    /// The primary way of computing the variable.
    Derive(Formula),
    /// A secondary formula; its result is always flagged as an approximation.
    Fallback(Formula),
}

impl Strategy {
    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::UseDaily => "daily source",
            Strategy::Derive(_) => "derived",
            Strategy::Fallback(_) => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub strategy: Strategy,
    /// Flag the result as approximated even though this is not a fallback.
    pub approximated: bool,
}

impl Candidate {
    const fn use_daily() -> Self {
        Self { strategy: Strategy::UseDaily, approximated: false }
    }

    const fn derive(formula: Formula) -> Self {
        Self { strategy: Strategy::Derive(formula), approximated: false }
    }

    const fn derive_approximately(formula: Formula) -> Self {
        Self { strategy: Strategy::Derive(formula), approximated: true }
    }

    const fn fallback(formula: Formula) -> Self {
        Self { strategy: Strategy::Fallback(formula), approximated: true }
    }

    /// Inputs this candidate needs when resolving the variable `name`.
    pub fn inputs(&self, name: &'static str) -> Vec<Input> {
        match &self.strategy {
            Strategy::UseDaily => vec![Input::Daily(name)],
            Strategy::Derive(f) | Strategy::Fallback(f) => f.inputs(),
        }
    }

    pub fn is_approximated(&self) -> bool {
        self.approximated || matches!(self.strategy, Strategy::Fallback(_))
    }
}

/// Static description of one canonical output variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableDescriptor {
    pub name: &'static str,
    pub family: Family,
    pub units: &'static str,
    pub standard_name: &'static str,
    pub long_name: &'static str,
    /// Reduction over each day, as written in `cell_methods`
    pub cell_method: &'static str,
    /// Computed only to feed other variables, not written unless requested
    pub intermediate: bool,
    pub candidates: &'static [Candidate],
}

impl VariableDescriptor {
    /// The `cell_methods` attribute value.
    pub fn cell_methods(&self) -> String {
        format!("time: {} within days", self.cell_method)
    }

    /// Every input named by any candidate, without repeats, in candidate order.
    pub fn required_inputs(&self) -> Vec<Input> {
        self.candidates.iter().flat_map(|c| c.inputs(self.name)).unique().collect_vec()
    }

    /// Canonical variables this one may consume.
    pub fn prerequisites(&self) -> Vec<&'static str> {
        self.required_inputs()
            .into_iter()
            .filter_map(|i| if let Input::Resolved(n) = i { Some(n) } else { None })
            .collect_vec()
    }
}

const fn mean_of(source: &'static str) -> Formula {
    Formula::Aggregate { source, reducer: Reducer::Mean }
}

static TAS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(mean_of("tas"))];
static TASMIN: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(Formula::Aggregate { source: "tas", reducer: Reducer::Min }),
];
static TASMAX: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(Formula::Aggregate { source: "tas", reducer: Reducer::Max }),
];

static PR: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(Formula::AccumulatedFlux { source: "pr", quantity: "precipitation" }),
];
static EVSPSBLPOT: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(Formula::AccumulatedFlux { source: "evspsblpot", quantity: "potential evaporation" }),
];
static PRSN: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(Formula::AccumulatedFlux { source: "prsn", quantity: "solid precipitation (water equivalent)" }),
];

const SWE_FROM_SNW: &str = "Snow amount converted to liquid water equivalent thickness using a water density of 1000 kg/m³.";
static SWE: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(mean_of("swe")),
    Candidate::fallback(Formula::Convert { input: Input::Daily("snw"), context: ConversionContext::Hydro, basis: SWE_FROM_SNW }),
    Candidate::fallback(Formula::Convert { input: Input::Subdaily("snw"), context: ConversionContext::Hydro, basis: SWE_FROM_SNW }),
];
static SNW: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(mean_of("snw")),
    Candidate::derive(Formula::Convert {
        input: Input::Resolved("swe"),
        context: ConversionContext::Hydro,
        basis: "Snow thickness in m of liquid water equivalent converted to snow amount using a water density of 1000 kg/m³.",
    }),
];
static SNR: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(mean_of("snr"))];
static SND: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(mean_of("snd")),
    Candidate::fallback(Formula::DensityRatio { amount: "snw", density: "snr" }),
    Candidate::fallback(Formula::Convert {
        input: Input::Resolved("snw"),
        context: ConversionContext::FixedSnowDensity,
        basis: "Snow amount converted to snow thickness using a snow density of {snow_density} kg/m³.",
    }),
];

static SFCWIND: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(Formula::WindSpeed { frequency: Frequency::SubDaily, reducer: Reducer::Mean }),
    Candidate::fallback(Formula::WindSpeed { frequency: Frequency::Daily, reducer: Reducer::Mean }),
];
static WSGSMAX: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(Formula::Aggregate { source: "wsgsmax", reducer: Reducer::Max }),
    Candidate::fallback(Formula::WindSpeed { frequency: Frequency::SubDaily, reducer: Reducer::Max }),
];
static UAS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(Formula::WindComponent(Component::Eastward))];
static VAS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(Formula::WindComponent(Component::Northward))];
static SFCWINDFROMDIR: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(Formula::WindDirection)];

static PS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(mean_of("ps"))];
static PSL: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive(mean_of("psl")),
    Candidate::fallback(Formula::Copy { from: "ps", basis: "Copy of surface air pressure." }),
];

static TDPS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(mean_of("tdps"))];
static HURS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(Formula::RelativeHumidity)];
static HUSS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(Formula::SpecificHumidity)];

static RSDS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(mean_of("rsds"))];
static RLDS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(mean_of("rlds"))];
static RSS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(mean_of("rss"))];
static RLS: &[Candidate] = &[Candidate::use_daily(), Candidate::derive(mean_of("rls"))];
static SUND: &[Candidate] = &[
    Candidate::use_daily(),
    Candidate::derive_approximately(Formula::SunshineDuration { source: "rsds" }),
];

macro_rules! descriptor {
    ($name:literal, $family:ident, $units:literal, $std:literal, $long:literal, $cell:literal, $cands:ident) => {
        descriptor!($name, $family, $units, $std, $long, $cell, $cands, false)
    };
    ($name:literal, $family:ident, $units:literal, $std:literal, $long:literal, $cell:literal, $cands:ident, $intermediate:literal) => {
        VariableDescriptor {
            name: $name,
            family: Family::$family,
            units: $units,
            standard_name: $std,
            long_name: $long,
            cell_method: $cell,
            intermediate: $intermediate,
            candidates: $cands,
        }
    };
}

/// Every canonical variable, in resolution order.
pub static DESCRIPTORS: &[VariableDescriptor] = &[
    descriptor!("tas", Temperature, "K", "air_temperature", "Mean daily surface temperature", "mean", TAS),
    descriptor!("tasmin", Temperature, "K", "air_temperature", "Minimum daily surface temperature", "minimum", TASMIN),
    descriptor!("tasmax", Temperature, "K", "air_temperature", "Maximum daily surface temperature", "maximum", TASMAX),
    descriptor!("pr", Precipitation, "kg m-2 s-1", "precipitation_flux", "Mean daily precipitation flux", "mean", PR),
    descriptor!("evspsblpot", Precipitation, "kg m-2 s-1", "water_potential_evaporation_flux", "Mean daily potential evaporation flux", "mean", EVSPSBLPOT),
    descriptor!("prsn", Precipitation, "kg m-2 s-1", "solid_precipitation_flux", "Mean daily solid precipitation", "mean", PRSN),
    descriptor!("swe", Snow, "m", "lwe_thickness_of_surface_snow_amount", "Liquid water equivalent of surface snow amount", "mean", SWE),
    descriptor!("snw", Snow, "kg m-2", "surface_snow_amount", "Surface snow amount", "mean", SNW),
    descriptor!("snr", Snow, "kg m-3", "snow_density", "Snow density", "mean", SNR, true),
    descriptor!("snd", Snow, "m", "surface_snow_thickness", "Snow depth", "mean", SND),
    descriptor!("sfcWind", Wind, "m s-1", "wind_speed", "Daily mean surface wind speed (10 m)", "mean", SFCWIND),
    descriptor!("wsgsmax", Wind, "m s-1", "wind_speed_of_gust", "Daily maximum surface wind speed (10 m)", "maximum", WSGSMAX),
    descriptor!("uas", Wind, "m s-1", "eastward_wind", "Eastward wind component (10 m)", "mean", UAS),
    descriptor!("vas", Wind, "m s-1", "northward_wind", "Northward wind component (10 m)", "mean", VAS),
    descriptor!("sfcWindfromdir", Wind, "degree", "wind_from_direction", "Daily mean surface wind direction (10 m)", "mean", SFCWINDFROMDIR),
    descriptor!("ps", Pressure, "Pa", "surface_air_pressure", "Daily mean surface air pressure", "mean", PS),
    descriptor!("psl", Pressure, "Pa", "air_pressure_at_sea_level", "Daily mean sea-level air pressure", "mean", PSL),
    descriptor!("tdps", Humidity, "K", "dew_point_temperature", "Daily mean surface dew point temperature", "mean", TDPS),
    descriptor!("hurs", Humidity, "1", "relative_humidity", "Daily mean surface relative humidity", "mean", HURS),
    descriptor!("huss", Humidity, "1", "specific_humidity", "Daily mean surface specific humidity", "mean", HUSS),
    descriptor!("rsds", Radiation, "W m-2", "surface_downwelling_shortwave_flux", "Surface downwelling shortwave flux", "mean", RSDS),
    descriptor!("rlds", Radiation, "W m-2", "surface_downwelling_longwave_flux", "Surface downwelling longwave flux", "mean", RLDS),
    descriptor!("rss", Radiation, "W m-2", "surface_net_downward_shortwave_flux", "Surface net downward shortwave flux", "mean", RSS),
    descriptor!("rls", Radiation, "W m-2", "surface_net_downward_longwave_flux", "Surface net downward longwave flux", "mean", RLS),
    descriptor!("sund", Radiation, "s", "duration_of_sunshine", "Daily duration of sunshine", "sum", SUND),
];

/// Look up the descriptor of a canonical variable.
pub fn lookup(name: &str) -> Option<&'static VariableDescriptor> {
    DESCRIPTORS.iter().find(|d| d.name == name)
}

/// Position of a variable in [`DESCRIPTORS`].
pub fn position(name: &str) -> Option<usize> {
    DESCRIPTORS.iter().position(|d| d.name == name)
}

/// The variables written when no explicit list is requested.
pub fn default_outputs() -> Vec<&'static str> {
    DESCRIPTORS.iter().filter(|d| !d.intermediate).map(|d| d.name).collect_vec()
}
