//! File operation types.

use std::fmt;
use std::path::PathBuf;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::conflict::ConflictBehavior;
use crate::error::OpResult;

/// A file operation requested by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FileOperation {
    /// Copy files/directories into a destination directory.
    Copy {
        sources: Vec<PathBuf>,
        destination: PathBuf,
        behavior: Option<ConflictBehavior>,
    },
    /// Move files/directories into a destination directory.
    Move {
        sources: Vec<PathBuf>,
        destination: PathBuf,
        behavior: Option<ConflictBehavior>,
    },
    /// Delete a file or directory.
    Delete { target: PathBuf },
    /// Rename a single file or directory in place.
    Rename { source: PathBuf, new_name: String },
    /// Create a new empty file.
    CreateFile { parent: PathBuf, name: String },
    /// Create a new directory.
    CreateDirectory { parent: PathBuf, name: String },
}

impl FileOperation {
    /// Create a copy operation.
    pub fn copy(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::Copy {
            sources,
            destination,
            behavior: None,
        }
    }

    /// Create a move operation.
    pub fn move_to(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::Move {
            sources,
            destination,
            behavior: None,
        }
    }

    /// Create a rename operation.
    pub fn rename(source: PathBuf, new_name: impl Into<String>) -> Self {
        Self::Rename {
            source,
            new_name: new_name.into(),
        }
    }

    /// Create a delete operation.
    pub fn delete(target: PathBuf) -> Self {
        Self::Delete { target }
    }

    /// Create a file creation operation.
    pub fn create_file(parent: PathBuf, name: impl Into<String>) -> Self {
        Self::CreateFile {
            parent,
            name: name.into(),
        }
    }

    /// Create a directory creation operation.
    pub fn create_directory(parent: PathBuf, name: impl Into<String>) -> Self {
        Self::CreateDirectory {
            parent,
            name: name.into(),
        }
    }

    /// Override the conflict behavior of a copy or move.
    pub fn with_behavior(mut self, new_behavior: ConflictBehavior) -> Self {
        if let Self::Copy { behavior, .. } | Self::Move { behavior, .. } = &mut self {
            *behavior = Some(new_behavior);
        }
        self
    }

    /// The kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Copy { .. } => OperationKind::Copy,
            Self::Move { .. } => OperationKind::Move,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Rename { .. } => OperationKind::Rename,
            Self::CreateFile { .. } => OperationKind::CreateFile,
            Self::CreateDirectory { .. } => OperationKind::CreateDirectory,
        }
    }
}

/// The type of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
    Rename,
    CreateFile,
    CreateDirectory,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Delete => write!(f, "Delete"),
            Self::Rename => write!(f, "Rename"),
            Self::CreateFile => write!(f, "Create file"),
            Self::CreateDirectory => write!(f, "Create directory"),
        }
    }
}

/// Whether a batch transfer copies or moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    Copy,
    Move,
}

impl TransferMode {
    /// The matching operation kind.
    pub fn kind(self) -> OperationKind {
        match self {
            Self::Copy => OperationKind::Copy,
            Self::Move => OperationKind::Move,
        }
    }
}

/// One source/destination pairing with a resolved conflict disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOperation {
    /// Absolute source path.
    pub source: PathBuf,
    /// Absolute destination path of the item itself (not its parent).
    pub destination: PathBuf,
    /// File name the item will have at the destination.
    pub item_name: CompactString,
    /// Whether the source is a directory.
    pub is_directory: bool,
    /// Back up and replace whatever occupies `destination`.
    pub overwrite: bool,
}

/// Caller-supplied identifier of an in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub CompactString);

impl OperationId {
    /// Create an operation id.
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result handed back to the host for every operation.
///
/// Cancellations and failures are ordinary values here; the host never sees
/// a panic or an `Err` for an expected outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The operation ran with elevated privileges.
    #[serde(default)]
    pub elevated: bool,
}

impl OpOutcome {
    /// A successful outcome without a path.
    pub fn ok() -> Self {
        Self {
            success: true,
            path: None,
            error: None,
            elevated: false,
        }
    }

    /// A successful outcome carrying the resulting path.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            ..Self::ok()
        }
    }

    /// An unsuccessful outcome.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            path: None,
            error: Some(error.into()),
            elevated: false,
        }
    }

    /// Mark the outcome as produced by an elevated operation.
    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Whether the outcome is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with("Operation cancelled") || e.contains("timed out"))
    }
}

impl<T> From<OpResult<T>> for OpOutcome
where
    T: Into<Option<PathBuf>>,
{
    fn from(result: OpResult<T>) -> Self {
        match result {
            Ok(path) => Self {
                path: path.into(),
                ..Self::ok()
            },
            Err(e) => Self::failed(e.to_string()),
        }
    }
}
