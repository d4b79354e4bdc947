use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use era5_daily::{config::RunConfig, logging::init_logging, pipeline};
use error_stack::ResultExt;

use crate::loading::NetcdfLoader;
use crate::writing::NetcdfSink;

mod loading;
mod writing;

fn main() -> ExitCode {
    let clargs = Cli::parse();

    if let Err(e) = init_logging(clargs.verbosity.log_level_filter(), clargs.log_file.as_deref()) {
        eprintln!("Could not set up logging:\n{e:?}");
        return ExitCode::FAILURE;
    }

    match driver(clargs) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("build_daily_dataset did not complete successfully:\n{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn driver(clargs: Cli) -> error_stack::Result<(), CliError> {
    let mut config = match &clargs.config {
        Some(p) => RunConfig::from_toml_file(p),
        None => RunConfig::bundled(),
    }
    .change_context(CliError::ReadingConfig)?;

    if let Some(root) = clargs.archive_root {
        config.archive.root = root;
    }
    if let Some(dir) = clargs.output_dir {
        config.output.directory = dir;
    }
    config.validate().change_context(CliError::ReadingConfig)?;

    if clargs.check_config_only {
        let rendered = toml::to_string_pretty(&config).change_context(CliError::ReadingConfig)?;
        println!("{rendered}");
        return Ok(());
    }

    let loader = NetcdfLoader;
    let sink = NetcdfSink::new(config.output.clone());
    let dataset = pipeline::run(&config, &loader, &sink).change_context(CliError::Running)?;
    log::info!(
        "Wrote {} variables to {}",
        dataset.variables().len(),
        config.output.merged_path().display()
    );
    Ok(())
}

/// Build the daily point dataset from an ERA5 archive.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// Root of the archive; overrides `archive.root` from the configuration.
    archive_root: Option<PathBuf>,

    /// A TOML file whose values override the bundled configuration.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Directory to write the output files to; overrides `output.directory`.
    #[clap(long)]
    output_dir: Option<PathBuf>,

    /// Also write the log to this file.
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Print the merged configuration as TOML and stop without reading any data.
    #[clap(long)]
    check_config_only: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("An error occurred while reading the configuration")]
    ReadingConfig,
    #[error("An error occurred while building the dataset")]
    Running,
}
