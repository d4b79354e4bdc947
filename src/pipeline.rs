//! End-to-end run: load, rename, resolve, stamp, assemble, persist.
//!
//! The pipeline itself does no I/O. Reading the archive and writing the result
//! are done by a [`SourceLoader`] and a [`DatasetSink`], so the whole sequence can
//! be exercised on in-memory fields.
use std::path::PathBuf;

use error_stack::ResultExt;

use crate::assemble::{assemble, ResolvedDataset};
use crate::config::RunConfig;
use crate::metadata;
use crate::resolve::{ResolvedVariables, Resolver};
use crate::sources::SourceSet;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Could not read {}", .0.display())]
    Read(PathBuf),
    #[error("Error in source file {}: {cause}", path.display())]
    BadFile { path: PathBuf, cause: String },
    #[error("Sources for '{variable}' are inconsistent: {cause}")]
    Inconsistent { variable: String, cause: String },
}

impl LoadError {
    pub fn bad_file<P: Into<PathBuf>, S: ToString>(path: P, cause: S) -> Self {
        Self::BadFile { path: path.into(), cause: cause.to_string() }
    }

    pub fn inconsistent<V: ToString, S: ToString>(variable: V, cause: S) -> Self {
        Self::Inconsistent { variable: variable.to_string(), cause: cause.to_string() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Could not create {}", .0.display())]
    Create(PathBuf),
    #[error("Could not write '{item}' to {}", path.display())]
    Write { path: PathBuf, item: String },
}

impl PersistError {
    pub fn write<P: Into<PathBuf>, S: ToString>(path: P, item: S) -> Self {
        Self::Write { path: path.into(), item: item.to_string() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration")]
    Configuration,
    #[error("Could not load the sources")]
    Loading,
    #[error("Could not resolve the requested variables")]
    Resolution,
    #[error("Could not assemble the dataset")]
    Assembly,
    #[error("Could not persist the dataset")]
    Persistence,
}

/// Provides the sources of a run, already subset to the configured locations.
pub trait SourceLoader {
    fn load(&self, config: &RunConfig) -> error_stack::Result<SourceSet, LoadError>;
}

/// Receives the finished dataset.
pub trait DatasetSink {
    fn persist(&self, dataset: &ResolvedDataset) -> error_stack::Result<(), PersistError>;
}

/// Run every stage up to, but not including, persistence.
pub fn build_dataset<L: SourceLoader + ?Sized>(
    config: &RunConfig,
    loader: &L,
) -> error_stack::Result<(ResolvedDataset, ResolvedVariables), PipelineError> {
    config.validate().change_context(PipelineError::Configuration)?;

    let mut sources = loader.load(config).change_context(PipelineError::Loading)?;
    log::info!("Loaded sources: {}", sources.describe());

    let extra = config.rename_pairs();
    let report = sources.rename_to_canonical(extra.as_slice());
    report.log();
    sources.check_locations().change_context(PipelineError::Loading)?;

    let requested = config.requested_variables();
    let resolved = Resolver::new(&sources, &config.physics)
        .resolve(&requested)
        .change_context(PipelineError::Resolution)?;
    log::info!("Resolution summary:\n{}", resolved.summary_table());
    if !resolved.failed().is_empty() {
        log::warn!("Inputs that could not be resolved: {}", resolved.failed().join(", "));
    }

    let stamped = metadata::stamp_outputs(&resolved);
    let dataset = assemble(
        stamped,
        &config.locations,
        &sources.coordinate_attrs,
        &config.attributes,
        chrono::Utc::now().naive_utc(),
    )
    .change_context(PipelineError::Assembly)?;

    Ok((dataset, resolved))
}

/// Build the dataset described by `config` and hand it to `sink`.
pub fn run<L: SourceLoader + ?Sized, S: DatasetSink + ?Sized>(
    config: &RunConfig,
    loader: &L,
    sink: &S,
) -> error_stack::Result<ResolvedDataset, PipelineError> {
    let (dataset, _) = build_dataset(config, loader)?;
    sink.persist(&dataset).change_context(PipelineError::Persistence)?;
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use approx::assert_abs_diff_eq;
    use itertools::Itertools;

    use super::*;
    use crate::field::{Field, Frequency, Location};
    use crate::metadata::APPROXIMATION_PREFIX;
    use crate::resolve::Provenance;
    use crate::sources::SourceCollection;
    use crate::test_utils::{hourly_times, make_field};

    struct MemoryLoader {
        subdaily: Vec<Field>,
        daily: Vec<Field>,
    }

    impl SourceLoader for MemoryLoader {
        fn load(&self, _config: &RunConfig) -> error_stack::Result<SourceSet, LoadError> {
            let sub = SourceCollection::from_fields(Frequency::SubDaily, self.subdaily.clone())
                .change_context_lazy(|| LoadError::inconsistent("subdaily", "bad test fields"))?;
            let day = SourceCollection::from_fields(Frequency::Daily, self.daily.clone())
                .change_context_lazy(|| LoadError::inconsistent("daily", "bad test fields"))?;
            Ok(SourceSet::new(sub, day))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        written: Mutex<Vec<Vec<String>>>,
    }

    impl DatasetSink for MemorySink {
        fn persist(&self, dataset: &ResolvedDataset) -> error_stack::Result<(), PersistError> {
            let names = dataset.names().map(|s| s.to_string()).collect_vec();
            self.written.lock().unwrap().push(names);
            Ok(())
        }
    }

    struct FailingSink;

    impl DatasetSink for FailingSink {
        fn persist(&self, _dataset: &ResolvedDataset) -> error_stack::Result<(), PersistError> {
            Err(PersistError::Create(PathBuf::from("/nowhere/out.nc")).into())
        }
    }

    fn config(variables: &[&str]) -> RunConfig {
        RunConfig {
            locations: vec![Location::new("site0", -63.5, 44.5), Location::new("site1", -123.25, 48.5)],
            variables: variables.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn hourly(name: &str, units: &str, value: impl Fn(usize, usize) -> f64) -> Field {
        make_field(name, Frequency::SubDaily, units, hourly_times(1990, 1, 1, 48), 2, value)
    }

    #[test]
    fn test_run_from_native_names() {
        let loader = MemoryLoader {
            subdaily: vec![
                hourly("t2m", "K", |i, _| 270.0 + (i % 24) as f64),
                hourly("sp", "Pa", |_, j| 100000.0 + j as f64),
            ],
            daily: vec![],
        };
        let sink = MemorySink::default();
        let ds = run(&config(&["tas", "tasmax", "psl"]), &loader, &sink).unwrap();

        assert_eq!(sink.written.lock().unwrap().as_slice(), [vec!["tas", "tasmax", "psl"]]);
        assert_eq!(ds.ntime(), 2);
        assert_abs_diff_eq!(ds.get("tas").unwrap().values()[[0, 0]], 281.5);
        assert_abs_diff_eq!(ds.get("tasmax").unwrap().values()[[1, 1]], 293.0);
        assert_eq!(ds.provenance("psl"), Some(Provenance::Approximated));
        let description = ds.get("psl").unwrap().attrs()["description"].to_string();
        assert!(description.starts_with(APPROXIMATION_PREFIX));
    }

    #[test]
    fn test_missing_input_fails_resolution() {
        let loader = MemoryLoader { subdaily: vec![hourly("t2m", "K", |_, _| 280.0)], daily: vec![] };
        let err = run(&config(&["tas", "pr"]), &loader, &MemorySink::default()).unwrap_err();
        assert!(matches!(err.current_context(), PipelineError::Resolution));
    }

    #[test]
    fn test_invalid_config_stops_before_loading() {
        let loader = MemoryLoader { subdaily: vec![], daily: vec![] };
        let mut cfg = config(&["tas"]);
        cfg.locations.clear();
        let err = run(&cfg, &loader, &MemorySink::default()).unwrap_err();
        assert!(matches!(err.current_context(), PipelineError::Configuration));
    }

    #[test]
    fn test_persistence_failure() {
        let loader = MemoryLoader { subdaily: vec![hourly("t2m", "K", |_, _| 280.0)], daily: vec![] };
        let err = run(&config(&["tas"]), &loader, &FailingSink).unwrap_err();
        assert!(matches!(err.current_context(), PipelineError::Persistence));
    }
}
