//! Crash-safe file replacement.
//!
//! Content is written to a staging file next to its target, flushed to disk,
//! and only then renamed over the target. A crash before the rename leaves the
//! previously committed file untouched; the stray staging file is removed by
//! [`sweep_staging`] on the next start.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// File name prefix of in-flight staging files.
pub const STAGING_PREFIX: &str = ".canvas-staging-";

/// Replace `path` with `bytes` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tx = Transaction::new();
    tx.stage(path, bytes)?;
    tx.commit()
}

/// A group of file replacements staged together and committed in order.
///
/// Dropping an uncommitted transaction deletes its staging files.
#[derive(Debug, Default)]
pub struct Transaction {
    staged: Vec<Staged>,
}

#[derive(Debug)]
struct Staged {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `bytes` to a durable staging file beside `target`.
    pub fn stage(&mut self, target: &Path, bytes: &[u8]) -> io::Result<()> {
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory")
        })?;
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;

        self.staged.push(Staged {
            tmp,
            target: target.to_path_buf(),
        });
        Ok(())
    }

    /// Rename every staged file onto its target, in staging order, then sync
    /// the affected directories.
    pub fn commit(self) -> io::Result<()> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for Staged { tmp, target } in self.staged {
            tmp.persist(&target).map_err(|e| e.error)?;
            debug!(target = %target.display(), "committed");
            if let Some(parent) = target.parent() {
                if !dirs.iter().any(|d| d == parent) {
                    dirs.push(parent.to_path_buf());
                }
            }
        }
        for dir in dirs {
            sync_dir(&dir)?;
        }
        Ok(())
    }
}

/// Delete `path`, treating absence as success. Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Read `path`, mapping absence to `None`.
pub fn read_if_exists(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Remove staging files abandoned in `dir` by an interrupted write.
pub fn sweep_staging(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            warn!(path = %entry.path().display(), "removing abandoned staging file");
            if remove_if_exists(&entry.path())? {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
