//! Sidecar backups (`bak_<name>`) for files mutated between preparation and
//! cleanup.
//!
//! Backups live on disk rather than in memory so that preparation and cleanup
//! can run in separate processes.

use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::debug;

use crate::error::PackError;

const BACKUP_PREFIX: &str = "bak_";

/// What [`restore`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    NoBackup,
}

/// Sidecar path for `path`: same directory, `bak_` prefixed name.
///
/// # Errors
/// Returns [`PackError::InvalidOptions`] if `path` has no file name.
pub fn backup_path(path: &Path) -> Result<PathBuf, PackError> {
    let name = path.file_name().ok_or_else(|| {
        PackError::invalid_options(format!("{} does not name a file", path.display()))
    })?;
    let mut backup_name = std::ffi::OsString::from(BACKUP_PREFIX);
    backup_name.push(name);
    Ok(path.with_file_name(backup_name))
}

/// Copies `path` to its sidecar, replacing any earlier backup.
///
/// # Errors
/// Returns [`PackError::BackupSourceMissing`] when `path` is not a file, or
/// [`PackError::Filesystem`] when the copy fails.
pub fn backup(path: &Path) -> Result<PathBuf, PackError> {
    if !path.is_file() {
        return Err(PackError::BackupSourceMissing {
            path: path.to_path_buf(),
        });
    }
    let sidecar = backup_path(path)?;
    copy_preserving(path, &sidecar)?;
    debug!(original = %path.display(), backup = %sidecar.display(), "backed up");
    Ok(sidecar)
}

/// Puts the sidecar back over `path` and removes it. Without a sidecar this
/// is a no-op.
///
/// # Errors
/// Returns [`PackError::Filesystem`] when copying back or removing the
/// sidecar fails.
pub fn restore(path: &Path) -> Result<RestoreOutcome, PackError> {
    let sidecar = backup_path(path)?;
    if !sidecar.is_file() {
        debug!(original = %path.display(), "no backup to restore");
        return Ok(RestoreOutcome::NoBackup);
    }
    copy_preserving(&sidecar, path)?;
    fs::remove_file(&sidecar).map_err(PackError::fs("remove backup", &sidecar))?;
    debug!(original = %path.display(), "restored from backup");
    Ok(RestoreOutcome::Restored)
}

/// Copies contents and permissions, then carries over access and
/// modification times.
fn copy_preserving(src: &Path, dst: &Path) -> Result<(), PackError> {
    fs::copy(src, dst).map_err(PackError::fs("copy", src))?;
    let metadata = fs::metadata(src).map_err(PackError::fs("stat", src))?;
    let atime = FileTime::from_last_access_time(&metadata);
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(dst, atime, mtime).map_err(PackError::fs("set times on", dst))?;
    Ok(())
}
