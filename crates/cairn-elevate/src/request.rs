//! Elevated operation requests.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EscalationError;

/// The minimal description of one elevated operation.
///
/// Requests are never batched: each one regenerates exactly one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EscalationRequest {
    /// Copy `source` to the item path `destination`.
    Copy {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Move `source` to the item path `destination`.
    Move {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Remove `path` recursively.
    Delete { path: PathBuf },
    /// Rename `source` to `new_name` within its parent directory.
    Rename { source: PathBuf, new_name: String },
    /// Create directory `name` inside `parent`.
    CreateFolder { parent: PathBuf, name: String },
    /// Create empty file `name` inside `parent`.
    CreateFile { parent: PathBuf, name: String },
}

impl EscalationRequest {
    /// Short verb for logs and prompts.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Copy { .. } => "copy",
            Self::Move { .. } => "move",
            Self::Delete { .. } => "delete",
            Self::Rename { .. } => "rename",
            Self::CreateFolder { .. } => "create folder",
            Self::CreateFile { .. } => "create file",
        }
    }

    /// The path whose permissions caused the escalation.
    pub fn primary_path(&self) -> &Path {
        match self {
            Self::Copy { destination, .. } => destination,
            Self::Move { source, .. } | Self::Rename { source, .. } => source,
            Self::Delete { path } => path,
            Self::CreateFolder { parent, .. } | Self::CreateFile { parent, .. } => parent,
        }
    }

    /// Human-readable summary shown in consent prompts.
    pub fn describe(&self) -> String {
        match self {
            Self::Copy {
                source,
                destination,
            }
            | Self::Move {
                source,
                destination,
            } => format!(
                "{} '{}' to '{}'",
                self.verb(),
                source.display(),
                destination.display()
            ),
            Self::Delete { path } => format!("delete '{}'", path.display()),
            Self::Rename { source, new_name } => {
                format!("rename '{}' to '{new_name}'", source.display())
            }
            Self::CreateFolder { parent, name } | Self::CreateFile { parent, name } => {
                format!("{} '{}'", self.verb(), parent.join(name).display())
            }
        }
    }

    /// Path the rename or create produces, if any.
    pub fn target_path(&self) -> Option<PathBuf> {
        match self {
            Self::Rename { source, new_name } => {
                source.parent().map(|parent| parent.join(new_name))
            }
            Self::CreateFolder { parent, name } | Self::CreateFile { parent, name } => {
                Some(parent.join(name))
            }
            Self::Copy { destination, .. } | Self::Move { destination, .. } => {
                Some(destination.clone())
            }
            Self::Delete { .. } => None,
        }
    }

    /// Reject requests that cannot be expressed safely in a script.
    ///
    /// Null bytes are refused outright; they would truncate the argument at
    /// the OS boundary no matter how the value is quoted.
    pub fn check(&self) -> Result<(), EscalationError> {
        match self {
            Self::Copy {
                source,
                destination,
            }
            | Self::Move {
                source,
                destination,
            } => {
                check_path("source", source)?;
                check_path("destination", destination)
            }
            Self::Delete { path } => check_path("path", path),
            Self::Rename { source, new_name } => {
                check_path("source", source)?;
                check_name("new name", new_name)
            }
            Self::CreateFolder { parent, name } | Self::CreateFile { parent, name } => {
                check_path("parent", parent)?;
                check_name("name", name)
            }
        }
    }
}

fn check_path(field: &'static str, path: &Path) -> Result<(), EscalationError> {
    if path.as_os_str().as_encoded_bytes().contains(&0) {
        return Err(EscalationError::NullByte { field });
    }
    if !path.is_absolute() {
        return Err(EscalationError::InvalidRequest {
            reason: format!("{field} must be an absolute path"),
        });
    }
    if path.to_str().is_none() {
        return Err(EscalationError::InvalidRequest {
            reason: format!("{field} is not valid UTF-8"),
        });
    }
    Ok(())
}

fn check_name(field: &'static str, name: &str) -> Result<(), EscalationError> {
    if name.contains('\0') {
        return Err(EscalationError::NullByte { field });
    }
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(EscalationError::InvalidRequest {
            reason: format!("{field} must be a plain file name"),
        });
    }
    Ok(())
}
