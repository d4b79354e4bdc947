//! Standard attributes for resolved variables and their coordinates.
use indexmap::IndexMap;

use crate::descriptors::VariableDescriptor;
use crate::field::{AttrValue, Attributes, Field};
use crate::resolve::{Provenance, Resolution, ResolvedVariables};

/// Prefix of the `description` of every approximated variable.
pub const APPROXIMATION_PREFIX: &str = "Approximation:";

/// A resolved variable with its attributes stamped, ready for assembly.
#[derive(Debug, Clone)]
pub struct StampedVariable {
    pub field: Field,
    pub descriptor: &'static VariableDescriptor,
    pub provenance: Provenance,
}

/// Stamp the descriptor's attributes onto a resolved field.
///
/// Attributes inherited from a daily source are kept unless a stamped attribute
/// has the same key. An approximated variable always gets a `description`
/// starting with [`APPROXIMATION_PREFIX`].
pub fn stamp(resolution: &Resolution) -> StampedVariable {
    let desc = resolution.descriptor;
    let mut field = resolution.field.clone();
    let units = field.units().to_string();

    field.set_attr("standard_name", desc.standard_name);
    field.set_attr("long_name", desc.long_name);
    field.set_attr("units", units);
    field.set_attr("cell_methods", desc.cell_methods());

    let description = match (resolution.provenance, resolution.basis.as_deref()) {
        (Provenance::Approximated, Some(basis)) => Some(format!("{APPROXIMATION_PREFIX} {basis}")),
        (Provenance::Approximated, None) => Some(format!("{APPROXIMATION_PREFIX} {} rule for {}.", resolution.strategy.kind(), desc.name)),
        (_, Some(basis)) => Some(basis.to_string()),
        (_, None) => None,
    };
    if let Some(description) = description {
        field.set_attr("description", description);
    }

    StampedVariable { field, descriptor: desc, provenance: resolution.provenance }
}

/// Stamp every requested variable, in table order.
pub fn stamp_outputs(resolved: &ResolvedVariables) -> Vec<StampedVariable> {
    resolved.outputs().map(stamp).collect()
}

/// Whether an attribute key is a numeric precision hint. These are carried over
/// from the source archive but are not valid for the derived data.
pub fn is_precision_hint(key: &str) -> bool {
    key == "precision" || key.ends_with("_precision")
}

/// Remove every precision hint from `attrs`, returning the removed keys.
pub fn strip_precision_hints(attrs: &mut Attributes) -> Vec<String> {
    let hints: Vec<String> = attrs.keys().filter(|k| is_precision_hint(k)).cloned().collect();
    for key in hints.iter() {
        attrs.shift_remove(key);
    }
    hints
}

fn cf_attributes(coordinate: &str) -> &'static [(&'static str, &'static str)] {
    match coordinate {
        "lon" => &[("standard_name", "longitude"), ("units", "degree_east"), ("long_name", "longitude")],
        "lat" => &[("standard_name", "latitude"), ("units", "degree_north"), ("long_name", "latitude")],
        "location" => &[("long_name", "City")],
        "time" => &[("standard_name", "time"), ("long_name", "time"), ("axis", "T")],
        _ => &[],
    }
}

/// Names of the coordinates every dataset carries.
pub const COORDINATES: [&str; 4] = ["time", "location", "lon", "lat"];

/// Clean the inherited coordinate attributes and stamp the CF ones over them.
///
/// Coordinates without inherited attributes are added, so the result always has
/// an entry for each of [`COORDINATES`].
pub fn normalize_coordinate_attrs(inherited: &IndexMap<String, Attributes>) -> IndexMap<String, Attributes> {
    let mut out = IndexMap::new();
    for coord in COORDINATES {
        let mut attrs = inherited.get(coord).cloned().unwrap_or_default();
        let removed = strip_precision_hints(&mut attrs);
        if !removed.is_empty() {
            log::debug!("Removed precision attributes [{}] from coordinate '{coord}'", removed.join(", "));
        }
        for &(key, value) in cf_attributes(coord) {
            attrs.insert(key.to_string(), AttrValue::from(value));
        }
        out.insert(coord.to_string(), attrs);
    }

    // Keep any other inherited coordinates, cleaned
    for (coord, attrs) in inherited.iter() {
        if !out.contains_key(coord) {
            let mut attrs = attrs.clone();
            strip_precision_hints(&mut attrs);
            out.insert(coord.clone(), attrs);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{lookup, Formula, Strategy};
    use crate::field::Frequency;
    use crate::test_utils::{daily_times, make_field};

    fn resolution(name: &'static str, strategy: Strategy, provenance: Provenance, basis: Option<&str>) -> Resolution {
        let desc = lookup(name).unwrap();
        let field = make_field(name, Frequency::Daily, desc.units, daily_times(1990, 1, 1, 2), 2, |_, _| 1.0);
        Resolution { descriptor: desc, field, strategy, provenance, basis: basis.map(|s| s.to_string()) }
    }

    #[test]
    fn test_stamp_derived() {
        let res = resolution("tasmin", Strategy::Derive(Formula::RelativeHumidity), Provenance::Derived, None);
        let stamped = stamp(&res);
        let attrs = stamped.field.attrs();
        assert_eq!(attrs["standard_name"].as_str(), Some("air_temperature"));
        assert_eq!(attrs["units"].as_str(), Some("K"));
        assert_eq!(attrs["cell_methods"].as_str(), Some("time: minimum within days"));
        assert!(!attrs.contains_key("description"));
    }

    #[test]
    fn test_stamp_approximation() {
        let res = resolution("psl", Strategy::Fallback(Formula::Copy { from: "ps", basis: "" }), Provenance::Approximated, Some("Copy of surface air pressure."));
        let stamped = stamp(&res);
        assert_eq!(
            stamped.field.attrs()["description"].as_str(),
            Some("Approximation: Copy of surface air pressure.")
        );
        assert_eq!(stamped.provenance, Provenance::Approximated);

        let res = resolution("psl", Strategy::Fallback(Formula::Copy { from: "ps", basis: "" }), Provenance::Approximated, None);
        let description = stamp(&res).field.attrs()["description"].to_string();
        assert!(description.starts_with(APPROXIMATION_PREFIX));
    }

    #[test]
    fn test_inherited_attributes_are_kept_under_stamped_ones() {
        let mut res = resolution("tas", Strategy::UseDaily, Provenance::Source, None);
        res.field.set_attr("long_name", "2 metre temperature");
        res.field.set_attr("history", "from the archive");
        let stamped = stamp(&res);
        assert_eq!(stamped.field.attrs()["long_name"].as_str(), Some("Mean daily surface temperature"));
        assert_eq!(stamped.field.attrs()["history"].as_str(), Some("from the archive"));
    }

    #[test]
    fn test_precision_hints() {
        assert!(is_precision_hint("precision"));
        assert!(is_precision_hint("_precision"));
        assert!(is_precision_hint("float_precision"));
        assert!(!is_precision_hint("precision_note"));
        assert!(!is_precision_hint("units"));

        let mut inherited = IndexMap::new();
        let mut lon = Attributes::new();
        lon.insert("_precision".to_string(), AttrValue::Int(2));
        lon.insert("comment".to_string(), "grid centre".into());
        lon.insert("units".to_string(), "degrees".into());
        inherited.insert("lon".to_string(), lon);
        let mut height = Attributes::new();
        height.insert("precision".to_string(), AttrValue::Float(0.1));
        inherited.insert("height".to_string(), height);

        let coords = normalize_coordinate_attrs(&inherited);
        assert_eq!(coords.keys().collect::<Vec<_>>(), ["time", "location", "lon", "lat", "height"]);
        assert!(!coords["lon"].contains_key("_precision"));
        assert_eq!(coords["lon"]["units"].as_str(), Some("degree_east"));
        assert_eq!(coords["lon"]["comment"].as_str(), Some("grid centre"));
        assert!(coords["height"].is_empty());
        assert_eq!(coords["location"]["long_name"].as_str(), Some("City"));
    }
}
