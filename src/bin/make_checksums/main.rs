use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use era5_daily::{
    checksums::{find_files, write_checksums, ChecksumOutcome},
    logging::init_logging,
};
use error_stack::ResultExt;

fn main() -> ExitCode {
    let clargs = Cli::parse();
    if let Err(e) = init_logging(clargs.verbosity.log_level_filter(), None) {
        eprintln!("Could not set up logging:\n{e:?}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = main_inner(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(clargs: Cli) -> error_stack::Result<(), CliError> {
    let files = find_files(&clargs.root, &clargs.pattern).change_context(CliError::Finding)?;
    if files.is_empty() {
        log::warn!("No files under {} match '{}'", clargs.root.display(), clargs.pattern);
        return Ok(());
    }

    let outcomes = write_checksums(&files, clargs.dry_run).change_context(CliError::Writing)?;
    let (mut written, mut skipped) = (0, 0);
    for outcome in outcomes.iter() {
        match outcome {
            ChecksumOutcome::Written(_) | ChecksumOutcome::WouldWrite(_) => written += 1,
            ChecksumOutcome::SkippedExisting(p) => {
                log::info!("Skipped {}, checksum already exists", p.display());
                skipped += 1;
            }
        }
    }

    let verb = if clargs.dry_run { "Would write" } else { "Wrote" };
    log::info!("{verb} {written} checksum files, skipped {skipped}");
    Ok(())
}

/// Write a SHA-256 checksum file beside every matching file under ROOT.
///
/// Files that already have a checksum file are left alone.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// Directory to search.
    #[clap(default_value = ".")]
    root: PathBuf,

    /// Glob pattern, relative to ROOT, of the files to checksum.
    #[clap(long, default_value = "**/*.nc")]
    pattern: String,

    /// Report what would be written without writing anything.
    #[clap(long)]
    dry_run: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Could not find the files to checksum")]
    Finding,
    #[error("Could not write the checksum files")]
    Writing,
}
