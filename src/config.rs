//! Run configuration.
//!
//! A run is described by a [`RunConfig`], built by layering (lowest priority first):
//!
//! 1. the built-in defaults ([`RunConfig::default`]),
//! 2. the bundled Canadian cities configuration (`configs/cancities.toml`), and
//! 3. an optional user TOML file.
//!
//! Tables are merged key by key, arrays are replaced. A user file therefore only
//! needs the keys it changes:
//!
//! ```toml
//! [archive]
//! root = "/data/era5"
//! years = [1990]
//!
//! [physics]
//! snow_density = 250.0
//!
//! [rename]
//! tcc = "clt"
//! ```
//!
//! The sections are:
//!
//! - `archive`: where the sub-daily and daily source files are found. `file_pattern`
//!   is a glob template with `{variable}`, `{frequency}` and `{year}` placeholders,
//!   relative to `{root}/{subdaily_dir or daily_dir}/{variable}/`.
//! - `locations`: an array of `{name, lon, lat}` tables, the points extracted.
//! - `physics`: `snow_density` (kg m-3), `sunshine_threshold` (W m-2) and
//!   optionally `sampling_interval_seconds`.
//! - `rename`: extra native name to canonical name mappings, applied after the
//!   built-in ERA5 ones.
//! - `variables`: the canonical variables to write. Empty means every
//!   non-intermediate variable.
//! - `output`: output directory, merged file name and per-variable file template
//!   (`{var}` placeholder).
//! - `attributes`: global attribute values, see [`GlobalAttributes`].
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::assemble::GlobalAttributes;
use crate::descriptors;
use crate::field::{Frequency, Location};
use crate::resolve::Physics;

pub(crate) static CANCITIES_TOML: &str = include_str!("configs/cancities.toml");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not load the configuration")]
    Load,
    #[error("Configuration file {} does not exist", .0.display())]
    MissingFile(PathBuf),
    #[error("Requested variable '{0}' is not a canonical variable")]
    UnknownVariable(String),
    #[error("At least one location must be configured")]
    NoLocations,
    #[error("Location '{0}' is configured more than once")]
    DuplicateLocation(String),
    #[error("Invalid physics setting: {0}")]
    InvalidPhysics(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    pub root: PathBuf,
    pub subdaily_dir: String,
    pub daily_dir: String,
    pub file_pattern: String,
    pub years: Vec<i32>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            subdaily_dir: "1hr".to_string(),
            daily_dir: "day".to_string(),
            file_pattern: "{variable}_{frequency}_*_{year}*.nc".to_string(),
            years: vec![],
        }
    }
}

impl ArchiveConfig {
    /// Directory holding one sub-directory per variable for this frequency.
    pub fn frequency_dir(&self, frequency: Frequency) -> PathBuf {
        match frequency {
            Frequency::SubDaily => self.root.join(&self.subdaily_dir),
            Frequency::Daily => self.root.join(&self.daily_dir),
        }
    }

    /// Glob patterns matching the files of one variable, one per configured year
    /// (or a single pattern for any year if none are configured).
    pub fn file_globs(&self, variable: &str, frequency: Frequency) -> Vec<String> {
        let dir = self.frequency_dir(frequency).join(variable);
        let freq_code = match frequency {
            Frequency::SubDaily => "1hr",
            Frequency::Daily => "day",
        };
        let pattern = self.file_pattern.replace("{variable}", variable).replace("{frequency}", freq_code);

        let years = if self.years.is_empty() {
            vec!["*".to_string()]
        } else {
            self.years.iter().map(|y| y.to_string()).collect_vec()
        };

        years
            .into_iter()
            .map(|y| dir.join(pattern.replace("{year}", &y)).to_string_lossy().into_owned())
            .collect_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub merged_file: String,
    pub per_variable_template: String,
    pub write_per_variable: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            merged_file: "daily_surface.nc".to_string(),
            per_variable_template: "daily_surface_{var}.nc".to_string(),
            write_per_variable: true,
        }
    }
}

impl OutputConfig {
    pub fn merged_path(&self) -> PathBuf {
        self.directory.join(&self.merged_file)
    }

    pub fn variable_path(&self, variable: &str) -> PathBuf {
        self.directory.join(self.per_variable_template.replace("{var}", variable))
    }
}

/// Everything one run needs; constructed once and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub archive: ArchiveConfig,
    pub locations: Vec<Location>,
    pub physics: Physics,
    pub rename: IndexMap<String, String>,
    pub variables: Vec<String>,
    pub output: OutputConfig,
    pub attributes: GlobalAttributes,
}

impl RunConfig {
    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(RunConfig::default())).merge(Toml::string(CANCITIES_TOML))
    }

    /// The bundled configuration on its own.
    pub fn bundled() -> error_stack::Result<Self, ConfigError> {
        Self::base_figment().extract().change_context(ConfigError::Load)
    }

    /// The bundled configuration overridden by a TOML string.
    pub fn from_toml_str(s: &str) -> error_stack::Result<Self, ConfigError> {
        Self::base_figment()
            .merge(Toml::string(s))
            .extract()
            .change_context(ConfigError::Load)
    }

    /// The bundled configuration overridden by a TOML file.
    pub fn from_toml_file(p: &Path) -> error_stack::Result<Self, ConfigError> {
        if !p.exists() {
            return Err(ConfigError::MissingFile(p.to_path_buf()).into());
        }
        Self::base_figment()
            .merge(Toml::file(p))
            .extract()
            .change_context(ConfigError::Load)
            .attach_printable_lazy(|| format!("while reading {}", p.display()))
    }

    /// The variables to write: the configured list, or every non-intermediate one.
    pub fn requested_variables(&self) -> Vec<String> {
        if self.variables.is_empty() {
            descriptors::default_outputs().into_iter().map(|s| s.to_string()).collect_vec()
        } else {
            self.variables.clone()
        }
    }

    pub fn rename_pairs(&self) -> Vec<(String, String)> {
        self.rename.iter().map(|(k, v)| (k.clone(), v.clone())).collect_vec()
    }

    pub fn validate(&self) -> error_stack::Result<(), ConfigError> {
        if self.locations.is_empty() {
            return Err(ConfigError::NoLocations.into());
        }
        if let Some(dup) = self.locations.iter().map(|l| l.name.as_str()).duplicates().next() {
            return Err(ConfigError::DuplicateLocation(dup.to_string()).into());
        }
        if let Some(unknown) = self.variables.iter().find(|v| descriptors::lookup(v).is_none()) {
            return Err(ConfigError::UnknownVariable(unknown.clone()).into());
        }
        if self.physics.snow_density.is_nan() || self.physics.snow_density <= 0.0 {
            return Err(ConfigError::InvalidPhysics(format!("snow_density must be positive, got {}", self.physics.snow_density)).into());
        }
        if matches!(self.physics.sampling_interval_seconds, Some(s) if s <= 0) {
            return Err(ConfigError::InvalidPhysics("sampling_interval_seconds must be positive".to_string()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_bundled_config() {
        let cfg = RunConfig::bundled().expect("bundled configuration should parse");
        cfg.validate().expect("bundled configuration should be valid");

        let names = cfg.locations.iter().map(|l| l.name.as_str()).collect_vec();
        assert_eq!(names, ["Halifax", "Montréal", "Iqaluit", "Saskatoon", "Victoria"]);
        assert_abs_diff_eq!(cfg.locations[3].lon, -106.75);
        assert_abs_diff_eq!(cfg.physics.snow_density, 300.0);
        assert_eq!(cfg.archive.years, [1990, 1991, 1992, 1993]);
        assert_eq!(cfg.output.merged_file, "daily_surface_cancities_1990-1993.nc");
        assert_eq!(
            cfg.output.variable_path("tas"),
            PathBuf::from("./daily_surface_cancities_1990-1993_tas.nc")
        );
        // Values not in the bundled file come from the built-in defaults
        assert_eq!(cfg.attributes.doi, "doi:10.24381/cds.adbb2d47");
        assert!(!cfg.requested_variables().contains(&"snr".to_string()));
    }

    #[test]
    fn test_user_overrides() {
        let toml_str = r#"
            variables = ["tas", "pr"]

            [archive]
            root = "/data/era5"
            years = [1991]

            [physics]
            snow_density = 250.0

            [rename]
            tcc = "clt"
        "#;
        let cfg = RunConfig::from_toml_str(toml_str).expect("deserialization should not fail");
        assert_eq!(cfg.archive.root, PathBuf::from("/data/era5"));
        assert_eq!(cfg.archive.subdaily_dir, "datasets/reconstruction/ECMWF/ERA5/NAM/1hr");
        assert_abs_diff_eq!(cfg.physics.snow_density, 250.0);
        assert_abs_diff_eq!(cfg.physics.sunshine_threshold, 120.0);
        assert_eq!(cfg.requested_variables(), ["tas", "pr"]);
        assert_eq!(cfg.rename_pairs(), [("tcc".to_string(), "clt".to_string())]);
        assert_eq!(cfg.locations.len(), 5);

        let globs = cfg.archive.file_globs("t2m", Frequency::SubDaily);
        assert_eq!(
            globs,
            ["/data/era5/datasets/reconstruction/ECMWF/ERA5/NAM/1hr/t2m/t2m_1hr_ecmwf_era5-single-levels_NAM_1991*.nc"]
        );
    }

    #[test]
    fn test_invalid_configs() {
        let err = RunConfig::from_toml_str("variables = [\"t2m\"]").unwrap().validate().unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::UnknownVariable(v) if v == "t2m"));

        let err = RunConfig::from_toml_str("[physics]\nsnow_density = 0.0").unwrap().validate().unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::InvalidPhysics(_)));

        RunConfig::from_toml_str("[physics]\nsnow_depth = 1.0").unwrap_err();
        RunConfig::from_toml_file(Path::new("/definitely/not/a/config.toml")).unwrap_err();
    }
}
