//! Resolution of canonical variables from the available sources.
//!
//! [`Resolver::resolve`] walks [`DESCRIPTORS`] in order. For each needed variable
//! it takes the first candidate whose inputs are all present, evaluates it, and
//! records the result so later variables can consume it. Consecutive table entries
//! that do not consume each other form a stage and are evaluated in parallel.
use std::collections::HashSet;

use chrono::TimeDelta;
use error_stack::{Report, ResultExt};
use indexmap::IndexMap;
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::descriptors::{self, Candidate, Component, ConversionContext, Formula, Input, Strategy, VariableDescriptor, DESCRIPTORS};
use crate::error::MissingSourceError;
use crate::field::{Field, Frequency};
use crate::resample::{resample, Reducer};
use crate::sources::SourceSet;
use crate::thermo;
use crate::units::{self, Context, DEFAULT_SNOW_DENSITY, WATER_DENSITY};

/// Default downwelling shortwave flux above which an interval counts as sunny, W m-2
pub const DEFAULT_SUNSHINE_THRESHOLD: f64 = 120.0;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("'{0}' is not a canonical variable")]
    UnknownVariable(String),
    #[error("No candidate for '{0}' could be used")]
    MissingSource(String),
    #[error("Input {input} is not available for '{variable}'")]
    InputUnavailable { variable: String, input: String },
    #[error("Unit conversion failed while computing '{variable}'")]
    UnitConversion { variable: String },
    #[error("Inputs to '{variable}' are inconsistent")]
    Mismatch { variable: String },
}

impl ResolveError {
    fn unit_conversion(desc: &VariableDescriptor) -> Self {
        Self::UnitConversion { variable: desc.name.to_string() }
    }

    fn mismatch(desc: &VariableDescriptor) -> Self {
        Self::Mismatch { variable: desc.name.to_string() }
    }
}

/// Physical constants of the run that can be changed in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Physics {
    /// Bulk snow density used when no measured density is available, kg m-3
    pub snow_density: f64,
    /// Downwelling shortwave flux above which a sample counts towards sunshine duration, W m-2
    pub sunshine_threshold: f64,
    /// Spacing of the sub-daily samples; inferred from the time stamps if not given
    pub sampling_interval_seconds: Option<i64>,
}

impl Default for Physics {
    fn default() -> Self {
        Self {
            snow_density: DEFAULT_SNOW_DENSITY,
            sunshine_threshold: DEFAULT_SUNSHINE_THRESHOLD,
            sampling_interval_seconds: None,
        }
    }
}

impl Physics {
    pub fn sampling_interval(&self) -> Option<TimeDelta> {
        self.sampling_interval_seconds.map(TimeDelta::seconds)
    }

    fn context(&self, context: ConversionContext) -> Context {
        match context {
            ConversionContext::Plain => Context::Plain,
            ConversionContext::Hydro => Context::Hydro,
            ConversionContext::FixedSnowDensity => Context::Snow { density: self.snow_density },
        }
    }
}

/// Whether a resolved value is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Provenance {
    /// Taken as-is from the daily source
    #[strum(to_string = "source")]
    Source,
    #[strum(to_string = "derived")]
    Derived,
    #[strum(to_string = "approximated")]
    Approximated,
}

/// One resolved variable and how it was obtained.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub descriptor: &'static VariableDescriptor,
    pub field: Field,
    pub strategy: Strategy,
    pub provenance: Provenance,
    /// Short account of the formula, stamped into the `description` attribute
    pub basis: Option<String>,
}

#[derive(Tabled)]
struct SummaryRow {
    variable: &'static str,
    family: String,
    strategy: &'static str,
    provenance: String,
    units: String,
}

/// All variables resolved in one run, in table order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedVariables {
    resolutions: IndexMap<&'static str, Resolution>,
    requested: Vec<&'static str>,
    failed: Vec<&'static str>,
}

impl ResolvedVariables {
    pub fn get(&self, name: &str) -> Option<&Resolution> {
        self.resolutions.get(name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.get(name).map(|r| &r.field)
    }

    /// Everything resolved, including variables computed only as inputs.
    pub fn iter(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions.values()
    }

    /// The requested variables, in table order.
    pub fn outputs(&self) -> impl Iterator<Item = &Resolution> {
        self.resolutions.values().filter(|r| self.requested.contains(&r.descriptor.name))
    }

    /// Prerequisite-only variables that could not be resolved.
    pub fn failed(&self) -> &[&'static str] {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.resolutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }

    /// A table of how each variable was resolved, for the end-of-run log.
    pub fn summary_table(&self) -> String {
        let rows = self.resolutions.values().map(|r| SummaryRow {
            variable: r.descriptor.name,
            family: r.descriptor.family.to_string(),
            strategy: r.strategy.kind(),
            provenance: r.provenance.to_string(),
            units: r.field.units().to_string(),
        });
        let mut table = tabled::Table::new(rows);
        table.with(tabled::settings::Style::psql());
        table.to_string()
    }
}

/// Resolves canonical variables from one set of sources.
pub struct Resolver<'a> {
    sources: &'a SourceSet,
    physics: &'a Physics,
}

impl<'a> Resolver<'a> {
    pub fn new(sources: &'a SourceSet, physics: &'a Physics) -> Self {
        Self { sources, physics }
    }

    /// Resolve the requested variables and everything they depend on.
    ///
    /// A variable needed only as an input to others may fail without aborting the
    /// run: the candidates that need it simply become unavailable. Failure of a
    /// requested variable is returned as an error.
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> error_stack::Result<ResolvedVariables, ResolveError> {
        let requested = requested
            .iter()
            .map(|name| {
                descriptors::lookup(name.as_ref())
                    .map(|d| d.name)
                    .ok_or_else(|| Report::new(ResolveError::UnknownVariable(name.as_ref().to_string())))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = ResolvedVariables { requested: requested.clone(), ..Default::default() };
        for stage in stages(with_prerequisites(&requested)) {
            log::debug!("Resolving stage [{}]", stage.iter().map(|d| d.name).join(", "));
            let results = stage
                .into_par_iter()
                .map(|desc| (desc, self.resolve_one(desc, &out.resolutions)))
                .collect::<Vec<_>>();

            for (desc, result) in results {
                match result {
                    Ok(resolution) => {
                        log::info!(
                            "Resolved '{}' ({}, {})",
                            desc.name,
                            resolution.strategy.kind(),
                            resolution.provenance
                        );
                        out.resolutions.insert(desc.name, resolution);
                    }
                    Err(e) if requested.contains(&desc.name) => {
                        if out.failed.is_empty() {
                            return Err(e);
                        }
                        return Err(e.attach_printable(format!("inputs that failed earlier: {}", out.failed.join(", "))));
                    }
                    Err(e) => {
                        log::warn!("Could not resolve '{}', which was only needed as an input: {e:?}", desc.name);
                        out.failed.push(desc.name);
                    }
                }
            }
        }

        Ok(out)
    }

    fn is_available(&self, input: &Input, resolved: &IndexMap<&'static str, Resolution>) -> bool {
        match input {
            Input::Daily(name) => self.sources.daily.contains(name),
            Input::Subdaily(name) => self.sources.subdaily.contains(name),
            Input::Resolved(name) => resolved.contains_key(name),
        }
    }

    fn resolve_one(
        &self,
        desc: &'static VariableDescriptor,
        resolved: &IndexMap<&'static str, Resolution>,
    ) -> error_stack::Result<Resolution, ResolveError> {
        for candidate in desc.candidates {
            let inputs = candidate.inputs(desc.name);
            if let Some(missing) = inputs.iter().find(|i| !self.is_available(i, resolved)) {
                log::debug!(
                    "Skipping {} candidate for '{}': {} is not available",
                    candidate.strategy.kind(),
                    desc.name,
                    missing.label()
                );
                continue;
            }

            let eval = Evaluation { sources: self.sources, resolved, physics: self.physics, desc };
            let Evaluated { field, basis } = eval.candidate(candidate)?;
            if !field.is_daily() {
                return Err(Report::new(ResolveError::mismatch(desc)))
                    .attach_printable(format!("candidate produced a {} field", field.frequency()));
            }

            let provenance = match candidate.strategy {
                _ if candidate.is_approximated() => Provenance::Approximated,
                Strategy::UseDaily => Provenance::Source,
                _ => Provenance::Derived,
            };
            return Ok(Resolution { descriptor: desc, field: field.renamed(desc.name), strategy: candidate.strategy, provenance, basis });
        }

        let required = desc.required_inputs().iter().map(|i| i.label()).collect_vec();
        Err(Report::new(MissingSourceError::new(desc.name, required)))
            .change_context(ResolveError::MissingSource(desc.name.to_string()))
    }
}

/// The requested descriptors plus everything they transitively consume, in table order.
fn with_prerequisites(requested: &[&'static str]) -> Vec<&'static VariableDescriptor> {
    let mut needed: HashSet<&'static str> = HashSet::new();
    let mut pending = requested.to_vec();
    while let Some(name) = pending.pop() {
        if !needed.insert(name) {
            continue;
        }
        if let Some(desc) = descriptors::lookup(name) {
            pending.extend(desc.prerequisites());
        }
    }

    DESCRIPTORS.iter().filter(|d| needed.contains(d.name)).collect_vec()
}

/// Split descriptors into runs that can be evaluated concurrently: a new stage
/// starts whenever a descriptor consumes one already in the current stage.
fn stages(order: Vec<&'static VariableDescriptor>) -> Vec<Vec<&'static VariableDescriptor>> {
    let mut stages = Vec::new();
    let mut current: Vec<&'static VariableDescriptor> = Vec::new();
    for desc in order {
        let prereqs = desc.prerequisites();
        if current.iter().any(|c| prereqs.contains(&c.name)) {
            stages.push(std::mem::take(&mut current));
        }
        current.push(desc);
    }
    if !current.is_empty() {
        stages.push(current);
    }
    stages
}

struct Evaluated {
    field: Field,
    basis: Option<String>,
}

impl Evaluated {
    fn new(field: Field) -> Self {
        Self { field, basis: None }
    }

    fn with_basis<S: ToString>(field: Field, basis: S) -> Self {
        Self { field, basis: Some(basis.to_string()) }
    }
}

/// Everything one candidate evaluation can read.
struct Evaluation<'r> {
    sources: &'r SourceSet,
    resolved: &'r IndexMap<&'static str, Resolution>,
    physics: &'r Physics,
    desc: &'static VariableDescriptor,
}

impl<'r> Evaluation<'r> {
    fn unavailable(&self, input: Input) -> Report<ResolveError> {
        Report::new(ResolveError::InputUnavailable { variable: self.desc.name.to_string(), input: input.label() })
    }

    fn subdaily(&self, name: &'static str) -> error_stack::Result<&'r Field, ResolveError> {
        self.sources.subdaily.get(name).ok_or_else(|| self.unavailable(Input::Subdaily(name)))
    }

    fn daily(&self, name: &'static str) -> error_stack::Result<&'r Field, ResolveError> {
        self.sources.daily.get(name).ok_or_else(|| self.unavailable(Input::Daily(name)))
    }

    fn resolved(&self, name: &'static str) -> error_stack::Result<&'r Field, ResolveError> {
        self.resolved.get(name).map(|r| &r.field).ok_or_else(|| self.unavailable(Input::Resolved(name)))
    }

    fn resample(&self, field: &Field, reducer: Reducer) -> error_stack::Result<Field, ResolveError> {
        resample(field, reducer).change_context_lazy(|| ResolveError::mismatch(self.desc))
    }

    /// An input as a daily field, averaging it first if it is sub-daily.
    fn daily_input(&self, input: Input) -> error_stack::Result<Field, ResolveError> {
        match input {
            Input::Daily(name) => Ok(self.daily(name)?.clone()),
            Input::Resolved(name) => Ok(self.resolved(name)?.clone()),
            Input::Subdaily(name) => self.resample(self.subdaily(name)?, Reducer::Mean),
        }
    }

    fn convert_values(&self, field: &Field, to: &str, ctx: Context) -> error_stack::Result<ndarray::Array2<f64>, ResolveError> {
        units::convert(field.values(), field.units(), to, ctx)
            .change_context_lazy(|| ResolveError::unit_conversion(self.desc))
            .attach_printable_lazy(|| format!("while converting '{}'", field.name()))
    }

    fn check_grid(&self, a: &Field, b: &Field) -> error_stack::Result<(), ResolveError> {
        a.check_same_grid(b).change_context_lazy(|| ResolveError::mismatch(self.desc))
    }

    /// Convert a field from its natural unit to the descriptor unit.
    fn finish(&self, field: Field, ctx: Context) -> error_stack::Result<Field, ResolveError> {
        let values = if units::same_unit(field.units(), self.desc.units) {
            field.values().to_owned()
        } else {
            self.convert_values(&field, self.desc.units, ctx)?
        };
        field.derive(self.desc.name, self.desc.units, values).change_context_lazy(|| ResolveError::mismatch(self.desc))
    }

    fn candidate(&self, candidate: &Candidate) -> error_stack::Result<Evaluated, ResolveError> {
        match candidate.strategy {
            Strategy::UseDaily => Ok(Evaluated::new(self.daily(self.desc.name)?.clone())),
            Strategy::Derive(formula) | Strategy::Fallback(formula) => self.formula(formula),
        }
    }

    fn formula(&self, formula: Formula) -> error_stack::Result<Evaluated, ResolveError> {
        match formula {
            Formula::Aggregate { source, reducer } => {
                let daily = self.resample(self.subdaily(source)?, reducer)?;
                Ok(Evaluated::new(self.finish(daily, Context::Plain)?))
            }
            Formula::AccumulatedFlux { source, quantity } => self.accumulated_flux(source, quantity),
            Formula::Convert { input, context, basis } => {
                let daily = self.daily_input(input)?;
                let field = self.finish(daily, self.physics.context(context))?;
                let basis = basis.replace("{snow_density}", &self.physics.snow_density.to_string());
                Ok(Evaluated::with_basis(field, basis))
            }
            Formula::DensityRatio { amount, density } => self.density_ratio(amount, density),
            Formula::WindSpeed { frequency, reducer } => self.wind_speed(frequency, reducer),
            Formula::WindComponent(component) => self.wind_component(component),
            Formula::WindDirection => {
                let (u, v) = (self.resolved("uas")?, self.resolved("vas")?);
                self.check_grid(u, v)?;
                let v_values = self.convert_values(v, u.units(), Context::Plain)?;
                let (_, direction) = thermo::wind_from_components(u.values(), v_values.view());
                let field = u.derive(self.desc.name, "degree", direction).change_context_lazy(|| ResolveError::mismatch(self.desc))?;
                Ok(Evaluated::new(self.finish(field, Context::Plain)?))
            }
            Formula::Copy { from, basis } => {
                let field = self.resolved(from)?.clone();
                Ok(Evaluated::with_basis(self.finish(field, Context::Plain)?, basis))
            }
            Formula::RelativeHumidity => {
                let (tas, tdps) = (self.resolved("tas")?, self.resolved("tdps")?);
                self.check_grid(tas, tdps)?;
                let t = self.convert_values(tas, "K", Context::Plain)?;
                let td = self.convert_values(tdps, "K", Context::Plain)?;
                let rh = thermo::relative_humidity(t.view(), td.view())
                    .change_context_lazy(|| ResolveError::unit_conversion(self.desc))?;
                let field = tas.derive(self.desc.name, "1", rh).change_context_lazy(|| ResolveError::mismatch(self.desc))?;
                Ok(Evaluated::new(self.finish(field, Context::Plain)?))
            }
            Formula::SpecificHumidity => {
                let (tas, hurs, ps) = (self.resolved("tas")?, self.resolved("hurs")?, self.resolved("ps")?);
                self.check_grid(tas, hurs)?;
                self.check_grid(tas, ps)?;
                let t = self.convert_values(tas, "K", Context::Plain)?;
                let rh = self.convert_values(hurs, "1", Context::Plain)?;
                let p = self.convert_values(ps, "Pa", Context::Plain)?;
                let q = thermo::specific_humidity(t.view(), rh.view(), p.view());
                let field = tas.derive(self.desc.name, "1", q).change_context_lazy(|| ResolveError::mismatch(self.desc))?;
                Ok(Evaluated::new(self.finish(field, Context::Plain)?))
            }
            Formula::SunshineDuration { source } => self.sunshine_duration(source),
        }
    }

    fn accumulated_flux(&self, source: &'static str, quantity: &str) -> error_stack::Result<Evaluated, ResolveError> {
        let field = self.subdaily(source)?;
        if units::conversion(field.units(), "m", Context::Plain).is_ok() {
            let total = self.resample(field, Reducer::Sum)?;
            let depth = self.convert_values(&total, "m", Context::Plain)?;
            let per_day = total.derive(source, "m d-1", depth).change_context_lazy(|| ResolveError::mismatch(self.desc))?;
            let flux = self.finish(per_day, Context::Hydro)?;
            let basis = format!("Total {quantity} thickness converted to mass flux using a water density of {WATER_DENSITY} kg/m³.");
            Ok(Evaluated::with_basis(flux, basis))
        } else {
            let mean = self.resample(field, Reducer::Mean)?;
            Ok(Evaluated::new(self.finish(mean, Context::Hydro)?))
        }
    }

    fn density_ratio(&self, amount: &'static str, density: &'static str) -> error_stack::Result<Evaluated, ResolveError> {
        let (amount, density) = (self.resolved(amount)?, self.resolved(density)?);
        self.check_grid(amount, density)?;
        let rho = self.convert_values(density, "kg m-3", Context::Plain)?;
        let values = units::convert_with_density(amount.values(), amount.units(), self.desc.units, rho.view())
            .change_context_lazy(|| ResolveError::unit_conversion(self.desc))?;
        let field = amount
            .derive(self.desc.name, self.desc.units, values)
            .change_context_lazy(|| ResolveError::mismatch(self.desc))?;
        Ok(Evaluated::with_basis(field, "Snow amount converted to snow thickness using the daily mean snow density."))
    }

    fn wind_speed(&self, frequency: Frequency, reducer: Reducer) -> error_stack::Result<Evaluated, ResolveError> {
        let (u, v) = match frequency {
            Frequency::SubDaily => (self.subdaily("uas")?, self.subdaily("vas")?),
            Frequency::Daily => (self.daily("uas")?, self.daily("vas")?),
        };
        self.check_grid(u, v)?;
        let v_values = self.convert_values(v, u.units(), Context::Plain)?;
        let (speed, _) = thermo::wind_from_components(u.values(), v_values.view());
        let speed = u.derive(self.desc.name, u.units(), speed).change_context_lazy(|| ResolveError::mismatch(self.desc))?;
        let daily = self.resample(&speed, reducer)?;
        let field = self.finish(daily, Context::Plain)?;

        let basis = match (frequency, reducer) {
            (Frequency::Daily, _) => Some("Wind speed computed from the daily mean eastward and northward wind components."),
            (Frequency::SubDaily, Reducer::Max) => Some("Daily maximum of the sub-daily wind speed computed from the eastward and northward wind components."),
            _ => None,
        };
        Ok(Evaluated { field, basis: basis.map(|s| s.to_string()) })
    }

    fn wind_component(&self, component: Component) -> error_stack::Result<Evaluated, ResolveError> {
        let speed = self.resolved("sfcWind")?;
        let u = self.resample(self.subdaily("uas")?, Reducer::Mean)?;
        let v = self.resample(self.subdaily("vas")?, Reducer::Mean)?;
        self.check_grid(&u, &v)?;
        self.check_grid(speed, &u)?;

        let v_values = self.convert_values(&v, u.units(), Context::Plain)?;
        let (_, direction) = thermo::wind_from_components(u.values(), v_values.view());
        let (eastward, northward) = thermo::components_from_magnitude_direction(speed.values(), direction.view());
        let values = match component {
            Component::Eastward => eastward,
            Component::Northward => northward,
        };
        let field = speed.derive(self.desc.name, speed.units(), values).change_context_lazy(|| ResolveError::mismatch(self.desc))?;
        Ok(Evaluated::with_basis(
            self.finish(field, Context::Plain)?,
            "Daily mean wind speed projected along the direction of the daily mean wind vector.",
        ))
    }

    fn sunshine_duration(&self, source: &'static str) -> error_stack::Result<Evaluated, ResolveError> {
        let rsds = self.subdaily(source)?;
        let flux = self.convert_values(rsds, "W m-2", Context::Plain)?;
        let flux = rsds.derive(source, "W m-2", flux).change_context_lazy(|| ResolveError::mismatch(self.desc))?;

        let threshold = self.physics.sunshine_threshold;
        let counts = self.resample(&flux, Reducer::ThresholdCount(threshold))?;
        let interval = self
            .physics
            .sampling_interval()
            .or_else(|| rsds.sampling_interval())
            .ok_or_else(|| Report::new(ResolveError::mismatch(self.desc)))
            .attach_printable_lazy(|| format!("cannot infer the sampling interval of '{source}' from a single time step"))?;

        let seconds = units::count_to_duration(counts.values(), interval);
        let duration = counts.derive(self.desc.name, "s", seconds).change_context_lazy(|| ResolveError::mismatch(self.desc))?;
        let basis = format!(
            "Number of {} s intervals per day with downwelling shortwave flux above {threshold} W m-2, converted to a duration.",
            interval.num_seconds()
        );
        Ok(Evaluated::with_basis(self.finish(duration, Context::Plain)?, basis))
    }
}
