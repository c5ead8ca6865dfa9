//! Error types for file mutation operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the cairn crates.
pub type OpResult<T> = Result<T, OpError>;

/// Errors that can occur while planning, executing or reversing an operation.
#[derive(Debug, Error)]
pub enum OpError {
    /// A path failed safety validation.
    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// A file or directory name failed validation.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A source item does not exist.
    #[error("Source not found: {name}")]
    SourceNotFound { name: String },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// The destination is missing or not a directory.
    #[error("Destination is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Two items in one batch resolve to the same destination.
    #[error("Duplicate destination name in batch: {name}")]
    DuplicateDestination { name: String },

    /// A directory would be copied or moved into itself.
    #[error("Cannot copy or move '{name}' into itself or one of its subdirectories")]
    SelfContainment { name: String },

    /// Source and destination are the same entry.
    #[error("Source and destination are the same: {path}")]
    SameFile { path: PathBuf },

    /// The target of a rename or create is already taken.
    #[error("'{name}' already exists")]
    AlreadyExists { name: String },

    /// No free "name (N)" slot was found.
    #[error("Could not find a free name for '{name}'")]
    RenameExhausted { name: String },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Rename crossed a filesystem boundary. Handled internally by the
    /// copy-then-delete fallback.
    #[error("Cross-device rename: {path}")]
    CrossDevice { path: PathBuf },

    /// The operation was cancelled (conflict prompt, consent gate, or caller).
    #[error("Operation cancelled")]
    Cancelled,

    /// The user declined the OS privilege prompt.
    #[error("Operation cancelled by user")]
    CancelledByUser,

    /// An elevated operation did not finish in time.
    #[error("Elevated operation timed out after {secs}s")]
    TimedOut { secs: u64 },

    /// The elevated operation failed.
    #[error("Elevated operation failed: {message}")]
    Elevation { message: String },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Execution failed and was rolled back. `stashed` lists backups that
    /// could not be put back at their original location.
    #[error("{}", rolled_back_message(message, stashed))]
    RolledBack {
        message: String,
        stashed: Vec<PathBuf>,
    },

    /// An undo or redo precondition did not hold.
    #[error("Cannot undo: {reason}")]
    CannotUndo { reason: String },

    /// A redo precondition did not hold.
    #[error("Cannot redo: {reason}")]
    CannotRedo { reason: String },

    /// The undo stack is empty.
    #[error("Nothing to undo")]
    NothingToUndo,

    /// The redo stack is empty.
    #[error("Nothing to redo")]
    NothingToRedo,

    /// An operation with this id is already running.
    #[error("Operation already in progress: {id}")]
    OperationInProgress { id: String },

    /// A background task panicked or was aborted.
    #[error("Task failed: {message}")]
    Task { message: String },
}

fn rolled_back_message(message: &str, stashed: &[PathBuf]) -> String {
    if stashed.is_empty() {
        return message.to_string();
    }
    let locations: Vec<String> = stashed.iter().map(|p| p.display().to_string()).collect();
    format!(
        "{message}. Some replaced items could not be restored and were saved to: {}",
        locations.join(", ")
    )
}

impl OpError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::CrossesDevices => Self::CrossDevice { path },
            _ => Self::Io { path, source },
        }
    }

    /// Create a validation error for a path.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error for a name.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a user cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::CancelledByUser | Self::TimedOut { .. }
        )
    }

    /// Whether this error should be retried under elevated privileges.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Whether the error was raised before any mutation took place.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. }
                | Self::InvalidName { .. }
                | Self::SourceNotFound { .. }
                | Self::NotADirectory { .. }
                | Self::DuplicateDestination { .. }
                | Self::SelfContainment { .. }
                | Self::SameFile { .. }
                | Self::RenameExhausted { .. }
        )
    }
}
