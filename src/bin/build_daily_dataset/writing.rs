//! Writing the assembled dataset to netCDF.
use std::path::Path;

use era5_daily::{
    assemble::ResolvedDataset,
    config::OutputConfig,
    field::{AttrValue, Attributes},
    pipeline::{DatasetSink, PersistError},
};
use error_stack::ResultExt;
use itertools::Itertools;
use ndarray::Array1;
use netcdf::{AttributeValue, Extents};

const LOCATION_DIM_NAME: &str = "location";
const TIME_DIM_NAME: &str = "time";

/// Time attributes that are recomputed for the daily axis rather than inherited.
const RECOMPUTED_TIME_ATTRIBUTES: [&str; 2] = ["units", "calendar"];

pub(crate) struct NetcdfSink {
    output: OutputConfig,
}

impl NetcdfSink {
    pub(crate) fn new(output: OutputConfig) -> Self {
        Self { output }
    }
}

impl DatasetSink for NetcdfSink {
    fn persist(&self, dataset: &ResolvedDataset) -> error_stack::Result<(), PersistError> {
        std::fs::create_dir_all(&self.output.directory)
            .change_context_lazy(|| PersistError::Create(self.output.directory.clone()))?;

        if self.output.write_per_variable {
            for name in dataset.names() {
                let path = self.output.variable_path(name);
                write_file(&path, dataset, &[name])?;
            }
        }

        let all_names = dataset.names().collect_vec();
        write_file(&self.output.merged_path(), dataset, &all_names)?;
        Ok(())
    }
}

fn write_file(path: &Path, dataset: &ResolvedDataset, names: &[&str]) -> error_stack::Result<(), PersistError> {
    log::debug!("Writing [{}] to {}", names.join(", "), path.display());
    let mut nc = netcdf::create(path).change_context_lazy(|| PersistError::Create(path.to_path_buf()))?;

    nc.add_dimension(LOCATION_DIM_NAME, dataset.nloc())
        .change_context_lazy(|| PersistError::write(path, "location dimension"))?;
    nc.add_dimension(TIME_DIM_NAME, dataset.ntime())
        .change_context_lazy(|| PersistError::write(path, "time dimension"))?;

    write_coordinates(&mut nc, dataset, path)?;

    for &name in names {
        let Some(field) = dataset.get(name) else {
            continue;
        };
        // Stored as (location, time)
        let data = field.values().t().mapv(|v| v as f32).as_standard_layout().into_owned();
        let mut var = nc
            .add_variable::<f32>(name, &[LOCATION_DIM_NAME, TIME_DIM_NAME])
            .change_context_lazy(|| PersistError::write(path, name))?;
        var.set_compression(9, true)
            .change_context_lazy(|| PersistError::write(path, format!("compression of {name}")))?;
        var.set_fill_value(f32::NAN)
            .change_context_lazy(|| PersistError::write(path, format!("fill value of {name}")))?;
        put_attributes(&mut var, field.attrs(), &["_FillValue"], path)?;
        var.put(data.view(), Extents::All)
            .change_context_lazy(|| PersistError::write(path, name))?;
    }

    for (key, value) in dataset.attrs() {
        nc.add_attribute(key, nc_attribute(value))
            .change_context_lazy(|| PersistError::write(path, format!("global attribute {key}")))?;
    }
    Ok(())
}

fn write_coordinates(nc: &mut netcdf::FileMut, dataset: &ResolvedDataset, path: &Path) -> error_stack::Result<(), PersistError> {
    let coords = dataset.coordinates();
    let empty = Attributes::new();
    let coord_attrs = |name: &str| coords.attrs.get(name).unwrap_or(&empty);

    // Time is written as whole days since the first day
    let first_day = coords.times.first().map(|t| t.date());
    let days = coords
        .times
        .iter()
        .map(|t| first_day.map(|d| (t.date() - d).num_days() as i32).unwrap_or(0))
        .collect::<Array1<i32>>();
    let time_units = match first_day {
        Some(d) => format!("days since {} 00:00:00", d.format("%Y-%m-%d")),
        None => "days since 1970-01-01 00:00:00".to_string(),
    };
    let mut time_var = nc
        .add_variable::<i32>(TIME_DIM_NAME, &[TIME_DIM_NAME])
        .change_context_lazy(|| PersistError::write(path, "time"))?;
    put_attributes(&mut time_var, coord_attrs("time"), &RECOMPUTED_TIME_ATTRIBUTES, path)?;
    time_var
        .put_attribute("units", time_units)
        .change_context_lazy(|| PersistError::write(path, "time units"))?;
    time_var
        .put_attribute("calendar", "proleptic_gregorian")
        .change_context_lazy(|| PersistError::write(path, "time calendar"))?;
    time_var
        .put(days.view(), Extents::All)
        .change_context_lazy(|| PersistError::write(path, "time"))?;

    let mut loc_var = nc
        .add_string_variable(LOCATION_DIM_NAME, &[LOCATION_DIM_NAME])
        .change_context_lazy(|| PersistError::write(path, "location"))?;
    put_attributes(&mut loc_var, coord_attrs("location"), &[], path)?;
    for (i, name) in coords.location_names().iter().enumerate() {
        let ext: Extents = i.into();
        loc_var
            .put_string(name, ext)
            .change_context_lazy(|| PersistError::write(path, format!("location name {name}")))?;
    }

    for (name, values) in [("lon", coords.lons()), ("lat", coords.lats())] {
        let values = Array1::from(values);
        let mut var = nc
            .add_variable::<f64>(name, &[LOCATION_DIM_NAME])
            .change_context_lazy(|| PersistError::write(path, name))?;
        put_attributes(&mut var, coord_attrs(name), &[], path)?;
        var.put(values.view(), Extents::All)
            .change_context_lazy(|| PersistError::write(path, name))?;
    }
    Ok(())
}

fn put_attributes(var: &mut netcdf::VariableMut, attrs: &Attributes, skip: &[&str], path: &Path) -> error_stack::Result<(), PersistError> {
    let varname = var.name();
    for (key, value) in attrs.iter().filter(|(k, _)| !skip.contains(&k.as_str())) {
        var.put_attribute(key, nc_attribute(value))
            .change_context_lazy(|| PersistError::write(path, format!("attribute {key} of {varname}")))?;
    }
    Ok(())
}

fn nc_attribute(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::Int(v) => AttributeValue::Longlong(*v),
        AttrValue::Float(v) => AttributeValue::Double(*v),
        AttrValue::Str(s) => AttributeValue::Str(s.clone()),
        AttrValue::Floats(v) => AttributeValue::Doubles(v.clone()),
    }
}
