//! Temporary backups of items about to be overwritten.
//!
//! A backup is the original item moved to a hidden sibling. That is a plain
//! rename unless the item is itself a mount point, in which case the move
//! falls back to copy and delete.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use cairn_core::{OpError, OpResult};
use tracing::{debug, warn};

use crate::fsutil;

const BACKUP_SUFFIX: &str = "cairn-bak";

static NEXT_BACKUP: AtomicU64 = AtomicU64::new(0);

/// An overwritten destination and where its original content sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub destination: PathBuf,
    pub backup: PathBuf,
}

/// Sibling path used to hold the original of `destination`.
fn backup_path_for(destination: &Path) -> OpResult<PathBuf> {
    let parent = destination
        .parent()
        .ok_or_else(|| OpError::invalid_path(destination, "path has no parent"))?;
    let name = destination
        .file_name()
        .ok_or_else(|| OpError::invalid_path(destination, "path has no file name"))?
        .to_string_lossy();
    let pid = std::process::id();

    loop {
        let n = NEXT_BACKUP.fetch_add(1, Ordering::Relaxed);
        let candidate = parent.join(format!(".{name}.{pid}.{n}.{BACKUP_SUFFIX}"));
        if !fsutil::exists(&candidate) {
            return Ok(candidate);
        }
    }
}

/// Move the item at `destination` aside and return where it went.
pub fn backup(destination: &Path) -> OpResult<PathBuf> {
    let backup = backup_path_for(destination)?;
    let method =
        fsutil::move_path(destination, &backup).map_err(|e| OpError::io(destination, e))?;
    debug!(
        destination = %destination.display(),
        backup = %backup.display(),
        ?method,
        "backed up existing item"
    );
    Ok(backup)
}

/// Put a backup back at its original location.
///
/// Fails if the destination is occupied.
pub fn restore(backup: &Path, destination: &Path) -> OpResult<()> {
    if fsutil::exists(destination) {
        return Err(OpError::AlreadyExists {
            name: destination.display().to_string(),
        });
    }
    fsutil::move_path(backup, destination)
        .map(|_| ())
        .map_err(|e| OpError::io(destination, e))
}

/// Backups taken during one batch, at most one per destination.
#[derive(Debug, Default)]
pub struct BackupSet {
    records: Mutex<HashMap<PathBuf, BackupRecord>>,
}

impl BackupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back up `destination` unless this batch already did.
    pub fn ensure(&self, destination: &Path) -> OpResult<BackupRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.get(destination) {
            return Ok(record.clone());
        }
        let record = BackupRecord {
            destination: destination.to_path_buf(),
            backup: backup(destination)?,
        };
        records.insert(destination.to_path_buf(), record.clone());
        Ok(record)
    }

    /// Remove and return every record.
    pub fn take(&self) -> Vec<BackupRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.drain().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every backup after a successful commit.
    pub fn discard_all(&self) {
        for record in self.take() {
            if let Err(e) = fsutil::remove_if_exists(&record.backup) {
                warn!(
                    backup = %record.backup.display(),
                    error = %e,
                    "failed to delete backup after commit"
                );
            }
        }
    }
}
