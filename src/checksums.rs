//! SHA-256 sidecar files for the generated datasets.
//!
//! For every `file.nc` a `file.nc.sha256` is written containing
//! `<hex digest>  file.nc`, the format `sha256sum -c` reads. Existing sidecars
//! are never overwritten.
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use itertools::Itertools;
use rayon::prelude::*;
use ring::digest::{Context, SHA256};

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("Could not read {}", .0.display())]
    Read(PathBuf),
    #[error("Could not write {}", .0.display())]
    Write(PathBuf),
    #[error("Invalid glob pattern '{0}'")]
    Glob(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumOutcome {
    Written(PathBuf),
    WouldWrite(PathBuf),
    SkippedExisting(PathBuf),
}

impl ChecksumOutcome {
    pub fn sidecar(&self) -> &Path {
        match self {
            ChecksumOutcome::Written(p) => p,
            ChecksumOutcome::WouldWrite(p) => p,
            ChecksumOutcome::SkippedExisting(p) => p,
        }
    }
}

pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Hex-encoded SHA-256 digest of a file's contents.
pub fn sha256_file(file: &Path) -> error_stack::Result<String, ChecksumError> {
    let f = std::fs::File::open(file).change_context_lazy(|| ChecksumError::Read(file.to_path_buf()))?;
    let mut reader = BufReader::new(f);
    let mut context = Context::new(&SHA256);
    let mut buf = [0u8; 65536];
    loop {
        let n = reader
            .read(&mut buf)
            .change_context_lazy(|| ChecksumError::Read(file.to_path_buf()))?;
        if n == 0 {
            break;
        }
        context.update(&buf[..n]);
    }
    Ok(hex::encode(context.finish()))
}

pub fn write_checksum(file: &Path, dry_run: bool) -> error_stack::Result<ChecksumOutcome, ChecksumError> {
    let sidecar = sidecar_path(file);
    if sidecar.exists() {
        log::debug!("{} already exists, skipping", sidecar.display());
        return Ok(ChecksumOutcome::SkippedExisting(sidecar));
    }
    if dry_run {
        log::info!("Would write {}", sidecar.display());
        return Ok(ChecksumOutcome::WouldWrite(sidecar));
    }

    let digest = sha256_file(file)?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string_lossy().into_owned());

    let mut out = std::fs::File::create(&sidecar).change_context_lazy(|| ChecksumError::Write(sidecar.clone()))?;
    writeln!(out, "{digest}  {filename}").change_context_lazy(|| ChecksumError::Write(sidecar.clone()))?;
    log::info!("Wrote {}", sidecar.display());
    Ok(ChecksumOutcome::Written(sidecar))
}

/// Write checksums for many files in parallel. Stops at the first failure.
pub fn write_checksums(files: &[PathBuf], dry_run: bool) -> error_stack::Result<Vec<ChecksumOutcome>, ChecksumError> {
    files.par_iter().map(|f| write_checksum(f, dry_run)).collect()
}

/// Files under `root` matching `pattern` (e.g. `**/*.nc`), sorted.
pub fn find_files(root: &Path, pattern: &str) -> error_stack::Result<Vec<PathBuf>, ChecksumError> {
    let full = root.join(pattern);
    let full = full.to_string_lossy();
    let paths = glob::glob(&full).change_context_lazy(|| ChecksumError::Glob(full.to_string()))?;
    let files = paths
        .filter_map(|p| match p {
            Ok(p) => Some(p),
            Err(e) => {
                log::warn!("Skipping unreadable path: {e}");
                None
            }
        })
        .filter(|p| p.is_file())
        .sorted()
        .collect_vec();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::scratch_dir;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(sidecar_path(Path::new("/data/out.nc")), PathBuf::from("/data/out.nc.sha256"));
    }

    #[test]
    fn test_write_checksum() {
        let dir = scratch_dir("checksum");
        let file = dir.join("abc.nc");
        std::fs::write(&file, b"abc").unwrap();

        let outcome = write_checksum(&file, true).unwrap();
        assert_eq!(outcome, ChecksumOutcome::WouldWrite(dir.join("abc.nc.sha256")));
        assert!(!outcome.sidecar().exists());

        let outcome = write_checksum(&file, false).unwrap();
        assert_eq!(outcome, ChecksumOutcome::Written(dir.join("abc.nc.sha256")));
        let content = std::fs::read_to_string(outcome.sidecar()).unwrap();
        assert_eq!(
            content,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  abc.nc\n"
        );

        // An existing sidecar is left alone
        std::fs::write(&file, b"changed").unwrap();
        let outcome = write_checksum(&file, false).unwrap();
        assert!(matches!(outcome, ChecksumOutcome::SkippedExisting(_)));
        assert_eq!(std::fs::read_to_string(dir.join("abc.nc.sha256")).unwrap(), content);
    }

    #[test]
    fn test_find_and_write_many() {
        let dir = scratch_dir("checksum-many");
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("b.nc"), b"b").unwrap();
        std::fs::write(dir.join("sub").join("a.nc"), b"a").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();

        let files = find_files(&dir, "**/*.nc").unwrap();
        assert_eq!(files, [dir.join("b.nc"), dir.join("sub").join("a.nc")]);

        let outcomes = write_checksums(&files, false).unwrap();
        assert!(outcomes.iter().all(|o| matches!(o, ChecksumOutcome::Written(_))));
        assert!(dir.join("sub").join("a.nc.sha256").exists());

        sha256_file(&dir.join("missing.nc")).unwrap_err();
    }
}
