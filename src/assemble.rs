//! Merging stamped variables into one daily dataset.
use chrono::{Datelike, NaiveDateTime};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::AssemblyError;
use crate::field::{AttrValue, Attributes, Field, Location};
use crate::metadata::{self, StampedVariable};
use crate::resolve::Provenance;
use crate::units;

/// Global attribute values of the output dataset.
///
/// `comment` may contain `{year}`, replaced by the year the dataset was generated.
/// `extra` is appended after the standard attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalAttributes {
    pub conventions: String,
    pub history_message: String,
    pub title: String,
    pub source: String,
    pub comment: String,
    pub institution: String,
    pub doi: String,
    pub description: String,
    pub extra: IndexMap<String, AttrValue>,
}

impl Default for GlobalAttributes {
    fn default() -> Self {
        Self {
            conventions: "CF-1.9".to_string(),
            history_message: "Spatial extraction, daily aggregation and intermediate computation of raw ERA5 data.".to_string(),
            title: "xclim test dataset from ERA5".to_string(),
            source: "reanalysis".to_string(),
            comment: "Contains modified Copernicus Climate Change Service information {year}".to_string(),
            institution: "ECMWF".to_string(),
            doi: "doi:10.24381/cds.adbb2d47".to_string(),
            description: concat!(
                "Test dataset for xclim including all officially supported atmos variables that ERA5 can provide. ",
                "Intended for testing only, some intermediate variables are only rough approximations, ",
                "but they should have data in the right range and sequence. ",
                "Approximated variables are flagged as such in their description."
            )
            .to_string(),
            extra: IndexMap::new(),
        }
    }
}

impl GlobalAttributes {
    /// Render the attributes for a dataset generated at `generated`.
    pub fn render(&self, generated: NaiveDateTime) -> Attributes {
        let history = format!(
            "[{}] {} - {} version {}",
            generated.format("%Y-%m-%d %H:%M:%S"),
            self.history_message,
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );

        let mut attrs = Attributes::new();
        attrs.insert("Conventions".to_string(), self.conventions.as_str().into());
        attrs.insert("history".to_string(), history.into());
        attrs.insert("title".to_string(), self.title.as_str().into());
        attrs.insert("source".to_string(), self.source.as_str().into());
        attrs.insert("comment".to_string(), self.comment.replace("{year}", &generated.year().to_string()).into());
        attrs.insert("institution".to_string(), self.institution.as_str().into());
        attrs.insert("doi".to_string(), self.doi.as_str().into());
        attrs.insert("description".to_string(), self.description.as_str().into());
        for (key, value) in self.extra.iter() {
            attrs.insert(key.clone(), value.clone());
        }
        attrs
    }
}

/// Coordinates shared by every variable of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinates {
    pub times: Vec<NaiveDateTime>,
    pub locations: Vec<Location>,
    /// Attributes for `time`, `location`, `lon` and `lat`, plus any other inherited coordinates
    pub attrs: IndexMap<String, Attributes>,
}

impl Coordinates {
    pub fn location_names(&self) -> Vec<String> {
        self.locations.iter().map(|l| l.name.clone()).collect_vec()
    }

    pub fn lons(&self) -> Vec<f64> {
        self.locations.iter().map(|l| l.lon).collect_vec()
    }

    pub fn lats(&self) -> Vec<f64> {
        self.locations.iter().map(|l| l.lat).collect_vec()
    }
}

/// The final daily dataset. Immutable once assembled.
#[derive(Debug, Clone)]
pub struct ResolvedDataset {
    variables: IndexMap<String, Field>,
    provenance: IndexMap<String, Provenance>,
    coordinates: Coordinates,
    attrs: Attributes,
}

impl ResolvedDataset {
    pub fn variables(&self) -> &IndexMap<String, Field> {
        &self.variables
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.variables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(|k| k.as_str())
    }

    pub fn provenance(&self, name: &str) -> Option<Provenance> {
        self.provenance.get(name).copied()
    }

    pub fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn ntime(&self) -> usize {
        self.coordinates.times.len()
    }

    pub fn nloc(&self) -> usize {
        self.coordinates.locations.len()
    }
}

/// Merge stamped variables into a dataset.
///
/// Every variable must be daily, carry its descriptor's unit and share the time
/// stamps of the first variable; all must be defined on `locations`, in order.
/// `inherited_coord_attrs` are cleaned of precision hints before being used.
pub fn assemble(
    variables: Vec<StampedVariable>,
    locations: &[Location],
    inherited_coord_attrs: &IndexMap<String, Attributes>,
    global: &GlobalAttributes,
    generated: NaiveDateTime,
) -> Result<ResolvedDataset, AssemblyError> {
    let Some(reference) = variables.first().map(|v| v.field.clone()) else {
        return Err(AssemblyError::Empty);
    };

    let location_names = locations.iter().map(|l| l.name.clone()).collect_vec();
    let mut fields = IndexMap::new();
    let mut provenance = IndexMap::new();
    for StampedVariable { field, descriptor, provenance: prov } in variables {
        if !field.is_daily() {
            return Err(AssemblyError::NotDaily(field.name().to_string()));
        }
        if !units::same_unit(field.units(), descriptor.units) {
            return Err(AssemblyError::unit_mismatch(field.name(), field.units(), descriptor.units));
        }
        if field.locations() != location_names.as_slice() {
            return Err(AssemblyError::location_mismatch(field.name(), "configured locations", field.locations(), &location_names));
        }
        reference.check_same_grid(&field)?;

        provenance.insert(field.name().to_string(), prov);
        fields.insert(field.name().to_string(), field);
    }

    let coordinates = Coordinates {
        times: reference.times().to_vec(),
        locations: locations.to_vec(),
        attrs: metadata::normalize_coordinate_attrs(inherited_coord_attrs),
    };

    log::info!(
        "Assembled {} variables over {} days at {} locations",
        fields.len(),
        coordinates.times.len(),
        coordinates.locations.len()
    );

    Ok(ResolvedDataset { variables: fields, provenance, coordinates, attrs: global.render(generated) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::lookup;
    use crate::field::Frequency;
    use crate::test_utils::{daily_times, hourly_times, location_names, make_field};
    use chrono::NaiveDate;
    use rstest::{fixture, rstest};

    fn stamped(name: &'static str, field: Field) -> StampedVariable {
        StampedVariable { field, descriptor: lookup(name).unwrap(), provenance: Provenance::Derived }
    }

    fn daily(name: &'static str, units: &str) -> StampedVariable {
        stamped(name, make_field(name, Frequency::Daily, units, daily_times(1990, 1, 1, 4), 2, |i, j| (i + j) as f64))
    }

    #[fixture]
    fn locations() -> Vec<Location> {
        location_names(2).into_iter().enumerate().map(|(i, n)| Location::new(n, -60.0 - i as f64, 45.0)).collect()
    }

    fn generated() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, 1).unwrap().and_hms_opt(12, 30, 0).unwrap()
    }

    #[rstest]
    fn test_assemble(locations: Vec<Location>) {
        let ds = assemble(
            vec![daily("tas", "K"), daily("pr", "kg m-2 s-1")],
            &locations,
            &IndexMap::new(),
            &GlobalAttributes::default(),
            generated(),
        )
        .unwrap();

        assert_eq!(ds.names().collect_vec(), ["tas", "pr"]);
        assert_eq!(ds.ntime(), 4);
        assert_eq!(ds.nloc(), 2);
        assert_eq!(ds.provenance("pr"), Some(Provenance::Derived));
        assert_eq!(ds.attrs()["Conventions"].as_str(), Some("CF-1.9"));
        assert_eq!(
            ds.attrs()["comment"].as_str(),
            Some("Contains modified Copernicus Climate Change Service information 2021")
        );
        let history = ds.attrs()["history"].to_string();
        assert!(history.starts_with("[2021-06-01 12:30:00] Spatial extraction"));
        assert!(history.contains(env!("CARGO_PKG_VERSION")));
        assert_eq!(ds.coordinates().attrs["lat"]["units"].as_str(), Some("degree_north"));
    }

    #[rstest]
    fn test_empty(locations: Vec<Location>) {
        let err = assemble(vec![], &locations, &IndexMap::new(), &GlobalAttributes::default(), generated()).unwrap_err();
        assert_eq!(err, AssemblyError::Empty);
    }

    #[rstest]
    fn test_not_daily(locations: Vec<Location>) {
        let hourly = stamped("tas", make_field("tas", Frequency::SubDaily, "K", hourly_times(1990, 1, 1, 4), 2, |_, _| 0.0));
        let err = assemble(vec![hourly], &locations, &IndexMap::new(), &GlobalAttributes::default(), generated()).unwrap_err();
        assert_eq!(err, AssemblyError::NotDaily("tas".to_string()));
    }

    #[rstest]
    fn test_unit_mismatch(locations: Vec<Location>) {
        let err = assemble(vec![daily("tas", "degC")], &locations, &IndexMap::new(), &GlobalAttributes::default(), generated()).unwrap_err();
        assert_eq!(err, AssemblyError::unit_mismatch("tas", "degC", "K"));
    }

    #[rstest]
    fn test_time_mismatch(locations: Vec<Location>) {
        let shifted = stamped("pr", make_field("pr", Frequency::Daily, "kg m-2 s-1", daily_times(1990, 1, 2, 4), 2, |_, _| 0.0));
        let err = assemble(vec![daily("tas", "K"), shifted], &locations, &IndexMap::new(), &GlobalAttributes::default(), generated()).unwrap_err();
        assert!(matches!(err, AssemblyError::TimeMismatch { variable, .. } if variable == "pr"));
    }

    #[test]
    fn test_location_mismatch() {
        let locations = vec![Location::new("Halifax", -63.5, 44.5), Location::new("Victoria", -123.25, 48.5)];
        let err = assemble(vec![daily("tas", "K")], &locations, &IndexMap::new(), &GlobalAttributes::default(), generated()).unwrap_err();
        assert!(matches!(err, AssemblyError::LocationMismatch { .. }));
    }
}
