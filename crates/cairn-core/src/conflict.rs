//! Conflict policy types.

use std::path::PathBuf;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a batch treats items whose destination already exists.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConflictBehavior {
    /// Ask the interactive resolver for each conflicting item.
    #[default]
    Ask,
    /// Place the item under the next free "name (N).ext".
    Rename,
    /// Leave the item out of the batch.
    Skip,
    /// Back up the existing item and replace it.
    Overwrite,
    /// Abort the whole batch.
    Cancel,
}

impl ConflictBehavior {
    /// The fixed decision this behavior implies, or `None` for [`Self::Ask`].
    pub fn decision(self) -> Option<ConflictDecision> {
        match self {
            Self::Ask => None,
            Self::Rename => Some(ConflictDecision::Rename),
            Self::Skip => Some(ConflictDecision::Skip),
            Self::Overwrite => Some(ConflictDecision::Overwrite),
            Self::Cancel => Some(ConflictDecision::Cancel),
        }
    }
}

/// A per-item answer from the interactive resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConflictDecision {
    Rename,
    Skip,
    Overwrite,
    Cancel,
}

/// An item whose destination is already occupied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The source path being operated on.
    pub source: PathBuf,
    /// The occupied destination path.
    pub destination: PathBuf,
    /// File name of the item.
    pub item_name: CompactString,
    /// Whether the source is a directory.
    pub is_directory: bool,
}

impl Conflict {
    /// Create a new conflict.
    pub fn new(
        source: PathBuf,
        destination: PathBuf,
        item_name: impl Into<CompactString>,
        is_directory: bool,
    ) -> Self {
        Self {
            source,
            destination,
            item_name: item_name.into(),
            is_directory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_behavior_parse_and_display() {
        assert_eq!(
            ConflictBehavior::from_str("Overwrite").unwrap(),
            ConflictBehavior::Overwrite
        );
        assert_eq!(ConflictBehavior::Rename.to_string(), "rename");
        assert!(ConflictBehavior::from_str("merge").is_err());
    }

    #[test]
    fn test_behavior_decision() {
        assert_eq!(ConflictBehavior::Ask.decision(), None);
        assert_eq!(
            ConflictBehavior::Skip.decision(),
            Some(ConflictDecision::Skip)
        );
    }
}
