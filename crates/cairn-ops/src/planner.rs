//! Batch planning: validation, collision checks and conflict resolution.
//!
//! Planning never touches the filesystem beyond reading metadata, so any
//! error it returns leaves the disk exactly as it was.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cairn_core::{
    Conflict, ConflictBehavior, ConflictDecision, EngineConfig, OpError, OpResult, PathPolicy,
    PlannedOperation, TransferMode,
};
use compact_str::CompactString;
use tracing::debug;

use crate::fsutil;
use crate::resolver::ConflictResolver;

/// A source that passed validation, before conflicts are looked at.
struct Candidate {
    source: PathBuf,
    /// Canonical location of the source entry itself (symlinks not followed).
    resolved: PathBuf,
    item_name: String,
    is_directory: bool,
}

/// Turns a list of sources and a destination directory into planned items.
#[derive(Debug, Clone)]
pub struct Planner {
    policy: PathPolicy,
    case_insensitive: bool,
    rename_attempts: u32,
}

impl Planner {
    /// Create a planner from engine configuration and the platform policy.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            policy: PathPolicy::platform(),
            case_insensitive: config.case_insensitive,
            rename_attempts: config.rename_attempts,
        }
    }

    /// Replace the path policy.
    pub fn with_policy(mut self, policy: PathPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The path policy in use.
    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    /// Key used to compare destination names for equality.
    pub fn dest_key(&self, path: &Path) -> String {
        let text = path.to_string_lossy();
        if self.case_insensitive {
            text.to_lowercase()
        } else {
            text.into_owned()
        }
    }

    /// Plan a batch.
    ///
    /// Must run on a blocking thread: the resolver may block waiting for the
    /// host. Conflicts with `behavior == Ask` and no resolver are cancelled.
    pub fn plan(
        &self,
        mode: TransferMode,
        sources: &[PathBuf],
        destination: &Path,
        behavior: ConflictBehavior,
        resolver: Option<&dyn ConflictResolver>,
    ) -> OpResult<Vec<PlannedOperation>> {
        let dest_dir = self.resolve_destination(destination)?;
        let candidates = self.validate_sources(sources, &dest_dir)?;

        // Every original destination name is reserved up front so an
        // auto-renamed item never lands on a name another item will use.
        let mut reserved: HashSet<String> = candidates
            .iter()
            .map(|c| self.dest_key(&dest_dir.join(&c.item_name)))
            .collect();

        let mut planned = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let target = dest_dir.join(&candidate.item_name);
            if !fsutil::exists(&target) {
                planned.push(PlannedOperation {
                    source: candidate.source,
                    destination: target,
                    item_name: CompactString::from(candidate.item_name),
                    is_directory: candidate.is_directory,
                    overwrite: false,
                });
                continue;
            }

            let same_path = self.dest_key(&target) == self.dest_key(&candidate.resolved);
            if same_path && mode == TransferMode::Move {
                debug!(path = %target.display(), "item already at destination, skipping");
                continue;
            }

            let decision = match behavior.decision() {
                Some(decision) => decision,
                None => match resolver {
                    Some(resolver) => resolver.resolve(&Conflict::new(
                        candidate.source.clone(),
                        target.clone(),
                        candidate.item_name.as_str(),
                        candidate.is_directory,
                    )),
                    None => ConflictDecision::Cancel,
                },
            };

            match decision {
                ConflictDecision::Cancel => return Err(OpError::Cancelled),
                ConflictDecision::Skip => {
                    debug!(path = %target.display(), "skipping conflicting item");
                }
                ConflictDecision::Overwrite => {
                    if same_path {
                        return Err(OpError::SameFile { path: target });
                    }
                    planned.push(PlannedOperation {
                        source: candidate.source,
                        destination: target,
                        item_name: CompactString::from(candidate.item_name),
                        is_directory: candidate.is_directory,
                        overwrite: true,
                    });
                }
                ConflictDecision::Rename => {
                    let name = self.next_available_name(
                        &dest_dir,
                        &candidate.item_name,
                        candidate.is_directory,
                        &reserved,
                    )?;
                    let target = dest_dir.join(&name);
                    reserved.insert(self.dest_key(&target));
                    planned.push(PlannedOperation {
                        source: candidate.source,
                        destination: target,
                        item_name: CompactString::from(name),
                        is_directory: candidate.is_directory,
                        overwrite: false,
                    });
                }
            }
        }

        Ok(planned)
    }

    fn resolve_destination(&self, destination: &Path) -> OpResult<PathBuf> {
        self.policy.validate_path(destination)?;
        let resolved = fs::canonicalize(destination).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => OpError::NotADirectory {
                path: destination.to_path_buf(),
            },
            _ => OpError::io(destination, e),
        })?;
        if !resolved.is_dir() {
            return Err(OpError::NotADirectory {
                path: destination.to_path_buf(),
            });
        }
        Ok(resolved)
    }

    fn validate_sources(&self, sources: &[PathBuf], dest_dir: &Path) -> OpResult<Vec<Candidate>> {
        let mut seen = HashSet::with_capacity(sources.len());
        let mut candidates = Vec::with_capacity(sources.len());

        for source in sources {
            self.policy.validate_path(source)?;

            let item_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| OpError::invalid_path(source, "path has no file name"))?;

            let metadata = fs::symlink_metadata(source).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => OpError::SourceNotFound {
                    name: item_name.clone(),
                },
                _ => OpError::io(source, e),
            })?;

            let key = self.dest_key(&dest_dir.join(&item_name));
            if !seen.insert(key) {
                return Err(OpError::DuplicateDestination { name: item_name });
            }

            // Resolve the parent so a symlink source stays a link.
            let parent = source
                .parent()
                .ok_or_else(|| OpError::invalid_path(source, "path has no parent"))?;
            let resolved = fs::canonicalize(parent)
                .map_err(|e| OpError::io(parent, e))?
                .join(&item_name);

            let is_directory = metadata.is_dir();
            if is_directory && self.contains(&resolved, dest_dir) {
                return Err(OpError::SelfContainment { name: item_name });
            }

            candidates.push(Candidate {
                source: source.clone(),
                resolved,
                item_name,
                is_directory,
            });
        }

        Ok(candidates)
    }

    /// Whether `inner` equals `outer` or lies beneath it.
    fn contains(&self, outer: &Path, inner: &Path) -> bool {
        if self.case_insensitive {
            let outer = PathBuf::from(outer.to_string_lossy().to_lowercase());
            let inner = PathBuf::from(inner.to_string_lossy().to_lowercase());
            inner.starts_with(outer)
        } else {
            inner.starts_with(outer)
        }
    }

    /// Find the next free "name (N).ext" in `dir`, starting at N = 2.
    pub fn next_available_name(
        &self,
        dir: &Path,
        name: &str,
        is_directory: bool,
        reserved: &HashSet<String>,
    ) -> OpResult<String> {
        let (stem, ext) = split_name(name, is_directory);

        for n in 2..=u64::from(self.rename_attempts) + 1 {
            let candidate = format!("{stem} ({n}){ext}");
            let path = dir.join(&candidate);
            if !reserved.contains(&self.dest_key(&path)) && !fsutil::exists(&path) {
                return Ok(candidate);
            }
        }

        Err(OpError::RenameExhausted {
            name: name.to_string(),
        })
    }
}

/// Split a name into stem and extension (with its dot). Directories and
/// dotfiles without a further dot keep the whole name as the stem.
fn split_name(name: &str, is_directory: bool) -> (&str, &str) {
    if is_directory {
        return (name, "");
    }
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
