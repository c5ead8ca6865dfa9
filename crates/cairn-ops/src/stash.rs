//! Persistent storage for backups that could not be restored.
//!
//! When a rollback finds the original location of an overwritten item
//! occupied, the backup is moved here instead of being lost. Entries are
//! named by a hash of the original path plus a counter, and are swept by age
//! and by count.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use cairn_core::{EngineConfig, OpError, OpResult};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fsutil;

/// Length of the hex hash prefix in stash entry names.
const KEY_LEN: usize = 16;

/// One entry in the stash directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StashedBackup {
    pub path: PathBuf,
    pub stashed_at: DateTime<Utc>,
    pub is_directory: bool,
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed_expired: usize,
    pub removed_over_cap: usize,
    pub retained: usize,
}

/// Owns the stash directory.
#[derive(Debug)]
pub struct StashManager {
    root: PathBuf,
    retention: Duration,
    max_entries: usize,
    // Serializes name allocation so two stashes never pick the same slot.
    lock: Mutex<()>,
}

impl StashManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_limits(
            config.stash_root.clone(),
            config.stash_retention(),
            config.stash_max_entries,
        )
    }

    pub fn with_limits(root: PathBuf, retention: Duration, max_entries: usize) -> Self {
        Self {
            root,
            retention,
            max_entries,
            lock: Mutex::new(()),
        }
    }

    /// The stash directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move `backup` into the stash and return its new path.
    ///
    /// `destination` is the path the backup was taken from; it only
    /// determines the stash name.
    pub fn stash(&self, backup: &Path, destination: &Path) -> OpResult<PathBuf> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        fs::create_dir_all(&self.root).map_err(|e| OpError::io(&self.root, e))?;

        let hash = blake3::hash(destination.as_os_str().as_encoded_bytes());
        let key = &hash.to_hex()[..KEY_LEN];
        let ext = destination
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut n = 0u64;
        let stashed = loop {
            let candidate = self.root.join(format!("{key}-{n}{ext}"));
            if !fsutil::exists(&candidate) {
                break candidate;
            }
            n += 1;
        };

        fsutil::move_path(backup, &stashed).map_err(|e| OpError::io(backup, e))?;
        touch(&stashed);

        info!(
            destination = %destination.display(),
            stashed = %stashed.display(),
            "stashed backup that could not be restored"
        );
        Ok(stashed)
    }

    /// Every stashed entry, newest first.
    pub fn list(&self) -> OpResult<Vec<StashedBackup>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OpError::io(&self.root, e)),
        };

        let mut listed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| OpError::io(&self.root, e))?;
            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable stash entry");
                    continue;
                }
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            listed.push(StashedBackup {
                path,
                stashed_at: DateTime::<Utc>::from(modified),
                is_directory: metadata.is_dir(),
            });
        }

        Ok(listed
            .into_iter()
            .sorted_by_key(|e| Reverse(e.stashed_at))
            .collect())
    }

    /// Delete expired entries, then the oldest entries beyond the cap.
    pub fn sweep(&self) -> OpResult<SweepReport> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or(chrono::Duration::MAX);

        let (expired, live): (Vec<_>, Vec<_>) = self
            .list()?
            .into_iter()
            .partition(|e| now.signed_duration_since(e.stashed_at) > retention);

        let mut report = SweepReport::default();
        for entry in &expired {
            if remove_entry(entry) {
                report.removed_expired += 1;
            }
        }

        // `live` is newest first; everything past the cap goes.
        for entry in live.iter().skip(self.max_entries) {
            if remove_entry(entry) {
                report.removed_over_cap += 1;
            }
        }
        report.retained = live.len().min(self.max_entries);

        if report.removed_expired + report.removed_over_cap > 0 {
            info!(
                expired = report.removed_expired,
                over_cap = report.removed_over_cap,
                retained = report.retained,
                "swept stash"
            );
        }
        Ok(report)
    }

    /// Sweep now and then every `interval` until `token` is cancelled.
    pub fn spawn_periodic_sweep(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let stash = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let stash = Arc::clone(&stash);
                match tokio::task::spawn_blocking(move || stash.sweep()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "stash sweep failed"),
                    Err(e) => warn!(error = %e, "stash sweep task failed"),
                }
            }
            debug!("stash sweeper stopped");
        })
    }
}

fn remove_entry(entry: &StashedBackup) -> bool {
    match fsutil::remove_path(&entry.path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %entry.path.display(), error = %e, "failed to remove stashed backup");
            false
        }
    }
}

/// Stamp the stash time on an entry; renames keep the original mtime.
fn touch(path: &Path) {
    let result = fs::File::options()
        .write(true)
        .open(path)
        .or_else(|_| fs::File::open(path))
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        debug!(path = %path.display(), error = %e, "could not update stash entry time");
    }
}
