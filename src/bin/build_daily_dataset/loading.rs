//! Reading point series out of gridded ERA5 netCDF files.
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use era5_daily::{
    config::RunConfig,
    field::{AttrValue, Attributes, Field, Frequency, Location},
    metadata::is_precision_hint,
    pipeline::{LoadError, SourceLoader},
    sources::{SourceCollection, SourceSet},
    utils::parse_cf_time_units,
};
use error_stack::ResultExt;
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{concatenate, Array2, Axis, Ix3};
use netcdf::{AttributeValue, Extents};

const TIME_NAMES: [&str; 2] = ["time", "valid_time"];
const LAT_NAMES: [&str; 2] = ["lat", "latitude"];
const LON_NAMES: [&str; 2] = ["lon", "longitude"];

/// Attributes describing the on-disk packing, which no longer apply once read.
const PACKING_ATTRIBUTES: [&str; 4] = ["scale_factor", "add_offset", "_FillValue", "missing_value"];

pub(crate) struct NetcdfLoader;

impl SourceLoader for NetcdfLoader {
    fn load(&self, config: &RunConfig) -> error_stack::Result<SourceSet, LoadError> {
        let mut coordinate_attrs = IndexMap::new();
        let subdaily = load_collection(config, Frequency::SubDaily, &mut coordinate_attrs)?;
        let daily = load_collection(config, Frequency::Daily, &mut coordinate_attrs)?;
        let mut sources = SourceSet::new(subdaily, daily);
        sources.coordinate_attrs = coordinate_attrs;
        Ok(sources)
    }
}

/// One file's worth of a variable at the configured locations.
struct Piece {
    times: Vec<NaiveDateTime>,
    values: Array2<f64>,
    units: String,
    attrs: Attributes,
    coord_attrs: IndexMap<String, Attributes>,
}

fn load_collection(
    config: &RunConfig,
    frequency: Frequency,
    coordinate_attrs: &mut IndexMap<String, Attributes>,
) -> error_stack::Result<SourceCollection, LoadError> {
    let dir = config.archive.frequency_dir(frequency);
    let mut collection = SourceCollection::new(frequency);
    if !dir.is_dir() {
        log::warn!("No {frequency} directory at {}, no sources at this frequency", dir.display());
        return Ok(collection);
    }

    for variable in discover_variables(&dir)? {
        let files = find_variable_files(config, &variable, frequency)?;
        if files.is_empty() {
            log::warn!("No files for {variable} ({frequency}) match the configured years, skipping it");
            continue;
        }
        log::debug!("Reading {variable} ({frequency}) from {} files", files.len());

        let (field, coords) = read_variable(&variable, frequency, &files, &config.locations)?;
        for (name, attrs) in coords {
            coordinate_attrs.entry(name).or_insert(attrs);
        }
        collection
            .insert(field)
            .change_context_lazy(|| LoadError::inconsistent(&variable, "does not match the other sources"))?;
    }
    Ok(collection)
}

/// The variable sub-directories of a frequency directory, sorted.
fn discover_variables(dir: &Path) -> error_stack::Result<Vec<String>, LoadError> {
    let entries = std::fs::read_dir(dir).change_context_lazy(|| LoadError::Read(dir.to_path_buf()))?;
    let mut names = vec![];
    for entry in entries {
        let entry = entry.change_context_lazy(|| LoadError::Read(dir.to_path_buf()))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn find_variable_files(config: &RunConfig, variable: &str, frequency: Frequency) -> error_stack::Result<Vec<PathBuf>, LoadError> {
    let mut files = vec![];
    for pattern in config.archive.file_globs(variable, frequency) {
        let matches = glob::glob(&pattern)
            .change_context_lazy(|| LoadError::inconsistent(variable, format!("invalid file pattern '{pattern}'")))?;
        for entry in matches {
            let entry = entry.change_context_lazy(|| LoadError::Read(PathBuf::from(&pattern)))?;
            files.push(entry);
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn read_variable(
    variable: &str,
    frequency: Frequency,
    files: &[PathBuf],
    locations: &[Location],
) -> error_stack::Result<(Field, IndexMap<String, Attributes>), LoadError> {
    let mut pieces = files
        .iter()
        .map(|f| read_piece(f, variable, locations))
        .collect::<Result<Vec<_>, _>>()?;
    pieces.sort_by_key(|p| p.times.first().copied());

    let units = pieces[0].units.clone();
    if let Some(other) = pieces.iter().find(|p| p.units != units) {
        return Err(LoadError::inconsistent(variable, format!("files disagree on units ('{units}' vs. '{}')", other.units)).into());
    }

    let times = pieces.iter().flat_map(|p| p.times.iter().copied()).collect_vec();
    if let Some((a, b)) = times.iter().tuple_windows().find(|(a, b)| a >= b) {
        return Err(LoadError::inconsistent(variable, format!("files overlap in time ({a} is followed by {b})")).into());
    }

    let views = pieces.iter().map(|p| p.values.view()).collect_vec();
    let values = concatenate(Axis(0), &views)
        .change_context_lazy(|| LoadError::inconsistent(variable, "could not concatenate files"))?;

    let location_names = locations.iter().map(|l| l.name.clone()).collect_vec();
    let mut field = Field::new(variable, frequency, &units, times, location_names, values)
        .change_context_lazy(|| LoadError::inconsistent(variable, "shape does not match the coordinates"))?;
    let first = pieces.swap_remove(0);
    for (key, value) in first.attrs {
        field.set_attr(key, value);
    }
    Ok((field, first.coord_attrs))
}

fn read_piece(path: &Path, variable: &str, locations: &[Location]) -> error_stack::Result<Piece, LoadError> {
    let ds = netcdf::open(path).change_context_lazy(|| LoadError::Read(path.to_path_buf()))?;
    let var = find_data_variable(&ds, variable).ok_or_else(|| LoadError::bad_file(path, format!("no data variable for '{variable}'")))?;

    let dims = var.dimensions().iter().map(|d| d.name()).collect_vec();
    let find_dim = |names: &[&str]| dims.iter().position(|d| names.contains(&d.as_str()));
    let (Some(itime), Some(ilat), Some(ilon)) = (find_dim(&TIME_NAMES), find_dim(&LAT_NAMES), find_dim(&LON_NAMES)) else {
        return Err(LoadError::bad_file(path, format!("variable '{}' has dimensions ({}), expected time, latitude and longitude", var.name(), dims.join(", "))).into());
    };

    let times = read_times(&ds, &dims[itime], path)?;
    let lats = read_coordinate(&ds, &dims[ilat], path)?;
    let lons = read_coordinate(&ds, &dims[ilon], path)?;
    let lat_index = locations.iter().map(|l| nearest_latitude(&lats, l.lat)).collect_vec();
    let lon_index = locations.iter().map(|l| nearest_longitude(&lons, l.lon)).collect_vec();
    for (loc, (&j, &i)) in locations.iter().zip(lat_index.iter().zip(lon_index.iter())) {
        log::trace!("{}: using grid point at {}N, {}E for {}", path.display(), lats[j], lons[i], loc.name);
    }

    let raw = var
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| LoadError::bad_file(path, format!("could not read '{variable}'")))?
        .into_dimensionality::<Ix3>()
        .change_context_lazy(|| LoadError::bad_file(path, format!("'{variable}' is not three dimensional")))?
        .permuted_axes([itime, ilat, ilon]);

    let scale = numeric_attribute(&var, "scale_factor").unwrap_or(1.0);
    let offset = numeric_attribute(&var, "add_offset").unwrap_or(0.0);
    let fills = ["_FillValue", "missing_value"].iter().filter_map(|a| numeric_attribute(&var, a)).collect_vec();
    let values = Array2::from_shape_fn((times.len(), locations.len()), |(t, k)| {
        let v = raw[[t, lat_index[k], lon_index[k]]];
        if fills.contains(&v) {
            f64::NAN
        } else {
            v * scale + offset
        }
    });

    let units = string_attribute(&var, "units").unwrap_or_else(|| "1".to_string());
    let attrs = read_attributes(&var, path)?
        .into_iter()
        .filter(|(k, _)| !PACKING_ATTRIBUTES.contains(&k.as_str()) && !is_precision_hint(k))
        .collect();

    let mut coord_attrs = IndexMap::new();
    for (dim, canonical) in [(itime, "time"), (ilat, "lat"), (ilon, "lon")] {
        if let Some(coord_var) = ds.variable(&dims[dim]) {
            coord_attrs.insert(canonical.to_string(), read_attributes(&coord_var, path)?);
        }
    }

    Ok(Piece { times, values, units, attrs, coord_attrs })
}

/// The variable named after the folder, or the only three-dimensional variable in the file.
fn find_data_variable<'f>(ds: &'f netcdf::File, variable: &str) -> Option<netcdf::Variable<'f>> {
    if let Some(var) = ds.variable(variable) {
        return Some(var);
    }
    ds.variables().filter(|v| v.dimensions().len() == 3).exactly_one().ok()
}

fn read_times(ds: &netcdf::File, name: &str, path: &Path) -> error_stack::Result<Vec<NaiveDateTime>, LoadError> {
    let var = ds
        .variable(name)
        .ok_or_else(|| LoadError::bad_file(path, format!("no coordinate variable '{name}'")))?;
    let units = string_attribute(&var, "units")
        .ok_or_else(|| LoadError::bad_file(path, format!("'{name}' has no units")))?;
    let units = parse_cf_time_units(&units).change_context_lazy(|| LoadError::bad_file(path, format!("could not interpret the units of '{name}'")))?;
    let values = var
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| LoadError::bad_file(path, format!("could not read '{name}'")))?;
    Ok(values.iter().map(|&v| units.to_datetime(v)).collect_vec())
}

fn read_coordinate(ds: &netcdf::File, name: &str, path: &Path) -> error_stack::Result<Vec<f64>, LoadError> {
    let var = ds
        .variable(name)
        .ok_or_else(|| LoadError::bad_file(path, format!("no coordinate variable '{name}'")))?;
    let values = var
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| LoadError::bad_file(path, format!("could not read '{name}'")))?;
    if values.is_empty() {
        return Err(LoadError::bad_file(path, format!("coordinate '{name}' is empty")).into());
    }
    Ok(values.iter().copied().collect_vec())
}

fn nearest_latitude(lats: &[f64], lat: f64) -> usize {
    lats.iter()
        .map(|&g| (g - lat).abs())
        .position_min_by(|a, b| a.total_cmp(b))
        .unwrap_or(0)
}

/// Nearest longitude, comparing on the circle so 0-360 and -180-180 grids both work.
fn nearest_longitude(lons: &[f64], lon: f64) -> usize {
    lons.iter()
        .map(|&g| ((g - lon + 180.0).rem_euclid(360.0) - 180.0).abs())
        .position_min_by(|a, b| a.total_cmp(b))
        .unwrap_or(0)
}

fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Longlong(v) => Some(v as f64),
        _ => None,
    }
}

fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn read_attributes(var: &netcdf::Variable, path: &Path) -> error_stack::Result<Attributes, LoadError> {
    let mut attrs = Attributes::new();
    for att in var.attributes() {
        let name = att.name().to_string();
        let value = att
            .value()
            .change_context_lazy(|| LoadError::bad_file(path, format!("could not read attribute '{name}' of '{}'", var.name())))?;
        if let Some(value) = convert_attribute(value) {
            attrs.insert(name, value);
        } else {
            log::debug!("Not keeping attribute '{name}' of '{}', unsupported type", var.name());
        }
    }
    Ok(attrs)
}

fn convert_attribute(value: AttributeValue) -> Option<AttrValue> {
    let converted = match value {
        AttributeValue::Str(s) => AttrValue::Str(s),
        AttributeValue::Double(v) => AttrValue::Float(v),
        AttributeValue::Float(v) => AttrValue::Float(v as f64),
        AttributeValue::Schar(v) => AttrValue::Int(v as i64),
        AttributeValue::Uchar(v) => AttrValue::Int(v as i64),
        AttributeValue::Short(v) => AttrValue::Int(v as i64),
        AttributeValue::Ushort(v) => AttrValue::Int(v as i64),
        AttributeValue::Int(v) => AttrValue::Int(v as i64),
        AttributeValue::Uint(v) => AttrValue::Int(v as i64),
        AttributeValue::Longlong(v) => AttrValue::Int(v),
        AttributeValue::Doubles(v) => AttrValue::Floats(v),
        AttributeValue::Floats(v) => AttrValue::Floats(v.into_iter().map(|x| x as f64).collect()),
        _ => return None,
    };
    Some(converted)
}
