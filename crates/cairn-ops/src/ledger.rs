//! Bounded undo/redo history.
//!
//! Only operations that can be reversed without stored content are
//! recorded: moves, renames and creations. Every reversal checks its
//! preconditions against the current filesystem first.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use cairn_core::{EngineConfig, OpError, OpResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fsutil;

/// Ledger shared between the executor and the engine facade.
pub type SharedLedger = Arc<Mutex<Ledger>>;

/// One item of a recorded move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedItem {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// A reversible operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndoAction {
    /// A file or directory was created.
    Create { path: PathBuf, is_directory: bool },
    /// An item was renamed in place.
    Rename { original: PathBuf, renamed: PathBuf },
    /// A batch of items was moved.
    Move {
        items: Vec<MovedItem>,
        original_parent: PathBuf,
    },
}

impl UndoAction {
    /// Human-readable description of the recorded operation.
    pub fn describe(&self) -> String {
        match self {
            Self::Create { path, is_directory } => {
                let kind = if *is_directory { "directory" } else { "file" };
                format!("Created {kind} '{}'", display_name(path))
            }
            Self::Rename { original, renamed } => format!(
                "Renamed '{}' to '{}'",
                display_name(original),
                display_name(renamed)
            ),
            Self::Move {
                items,
                original_parent,
            } => format!(
                "Moved {} items from {}",
                items.len(),
                original_parent.display()
            ),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// An entry in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    pub timestamp: SystemTime,
    pub action: UndoAction,
}

impl LedgerEntry {
    pub fn description(&self) -> String {
        self.action.describe()
    }
}

/// Which way an action is being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

impl Direction {
    fn precondition(self, reason: String) -> OpError {
        match self {
            Self::Undo => OpError::CannotUndo { reason },
            Self::Redo => OpError::CannotRedo { reason },
        }
    }
}

/// Undo and redo stacks with a shared capacity.
#[derive(Debug)]
pub struct Ledger {
    undo: VecDeque<LedgerEntry>,
    redo: VecDeque<LedgerEntry>,
    capacity: usize,
    case_insensitive: bool,
    next_id: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            capacity: capacity.max(1),
            case_insensitive: cfg!(any(windows, target_os = "macos")),
            next_id: 0,
        }
    }

    /// Build a ledger from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            case_insensitive: config.case_insensitive,
            ..Self::new(config.undo_capacity)
        }
    }

    /// Wrap in the shared handle used by the executor.
    pub fn shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    /// Record a committed operation. Clears the redo stack.
    pub fn push(&mut self, action: UndoAction) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        debug!(id, action = %action.describe(), "recorded undoable operation");

        self.redo.clear();
        push_bounded(
            &mut self.undo,
            self.capacity,
            LedgerEntry {
                id,
                timestamp: SystemTime::now(),
                action,
            },
        );
        id
    }

    /// Reverse the most recent operation.
    ///
    /// A failed precondition discards the entry. An I/O failure during the
    /// reversal keeps it on the undo stack so it can be retried.
    pub fn undo(&mut self) -> OpResult<LedgerEntry> {
        let entry = self.undo.pop_back().ok_or(OpError::NothingToUndo)?;

        match self.replay(&entry.action, Direction::Undo) {
            Ok(()) => {
                push_bounded(&mut self.redo, self.capacity, entry.clone());
                Ok(entry)
            }
            Err(e @ OpError::CannotUndo { .. }) => {
                warn!(id = entry.id, error = %e, "dropping undo entry");
                Err(e)
            }
            Err(e) => {
                self.undo.push_back(entry);
                Err(e)
            }
        }
    }

    /// Re-apply the most recently undone operation.
    pub fn redo(&mut self) -> OpResult<LedgerEntry> {
        let entry = self.redo.pop_back().ok_or(OpError::NothingToRedo)?;

        match self.replay(&entry.action, Direction::Redo) {
            Ok(()) => {
                push_bounded(&mut self.undo, self.capacity, entry.clone());
                Ok(entry)
            }
            Err(e @ OpError::CannotRedo { .. }) => {
                warn!(id = entry.id, error = %e, "dropping redo entry");
                Err(e)
            }
            Err(e) => {
                self.redo.push_back(entry);
                Err(e)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Number of undoable entries.
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Number of redoable entries.
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// The entry `undo` would reverse next.
    pub fn peek_undo(&self) -> Option<&LedgerEntry> {
        self.undo.back()
    }

    /// The entry `redo` would apply next.
    pub fn peek_redo(&self) -> Option<&LedgerEntry> {
        self.redo.back()
    }

    /// Undoable entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.undo.iter()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    fn replay(&self, action: &UndoAction, direction: Direction) -> OpResult<()> {
        match action {
            UndoAction::Create { path, is_directory } => match direction {
                Direction::Undo => {
                    if !fsutil::exists(path) {
                        return Err(direction.precondition(format!(
                            "'{}' no longer exists",
                            path.display()
                        )));
                    }
                    fsutil::remove_path(path).map_err(|e| OpError::io(path, e))
                }
                Direction::Redo => {
                    if fsutil::exists(path) {
                        return Err(direction.precondition(format!(
                            "'{}' already exists",
                            path.display()
                        )));
                    }
                    let result = if *is_directory {
                        fs::create_dir(path)
                    } else {
                        fs::File::create_new(path).map(|_| ())
                    };
                    result.map_err(|e| OpError::io(path, e))
                }
            },
            UndoAction::Rename { original, renamed } => {
                let (from, to) = match direction {
                    Direction::Undo => (renamed, original),
                    Direction::Redo => (original, renamed),
                };
                self.check_pair(from, to, direction)?;
                fs::rename(from, to).map_err(|e| OpError::io(from, e))
            }
            UndoAction::Move { items, .. } => {
                let pairs: Vec<(&Path, &Path)> = items
                    .iter()
                    .map(|item| match direction {
                        Direction::Undo => (item.to.as_path(), item.from.as_path()),
                        Direction::Redo => (item.from.as_path(), item.to.as_path()),
                    })
                    .collect();

                for (from, to) in &pairs {
                    self.check_pair(from, to, direction)?;
                }
                move_all(&pairs)
            }
        }
    }

    /// `from` must exist and `to` must be free, unless they name the same
    /// entry on a case-insensitive volume.
    fn check_pair(&self, from: &Path, to: &Path, direction: Direction) -> OpResult<()> {
        if !fsutil::exists(from) {
            return Err(direction.precondition(format!(
                "'{}' no longer exists",
                from.display()
            )));
        }
        if fsutil::exists(to) && !self.same_entry(from, to) {
            return Err(direction.precondition(format!(
                "'{}' is occupied",
                to.display()
            )));
        }
        Ok(())
    }

    fn same_entry(&self, a: &Path, b: &Path) -> bool {
        self.case_insensitive
            && a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    }
}

fn push_bounded(stack: &mut VecDeque<LedgerEntry>, capacity: usize, entry: LedgerEntry) {
    if stack.len() >= capacity {
        stack.pop_front();
    }
    stack.push_back(entry);
}

/// Move every pair, putting back the ones already moved if one fails.
fn move_all(pairs: &[(&Path, &Path)]) -> OpResult<()> {
    for (done, (from, to)) in pairs.iter().enumerate() {
        if let Err(e) = fsutil::move_path(from, to) {
            for (back_from, back_to) in pairs[..done].iter().rev() {
                if let Err(undo_err) = fsutil::move_path(back_to, back_from) {
                    warn!(
                        path = %back_to.display(),
                        error = %undo_err,
                        "failed to put item back after partial replay"
                    );
                }
            }
            return Err(OpError::io(*from, e));
        }
    }
    Ok(())
}
