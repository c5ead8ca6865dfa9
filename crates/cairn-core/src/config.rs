//! Engine configuration types.

use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for the file operation engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Number of items executed concurrently within one batch.
    #[builder(default = "4")]
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,

    /// Maximum number of undo entries retained.
    #[builder(default = "50")]
    #[serde(default = "default_undo_capacity")]
    pub undo_capacity: usize,

    /// Directory holding stashed backups.
    #[builder(default = "default_stash_root()")]
    #[serde(default = "default_stash_root")]
    pub stash_root: PathBuf,

    /// Stashed backups older than this many days are swept.
    #[builder(default = "30")]
    #[serde(default = "default_retention_days")]
    pub stash_retention_days: u64,

    /// Maximum number of stashed backups kept after a sweep.
    #[builder(default = "200")]
    #[serde(default = "default_max_stashed")]
    pub stash_max_entries: usize,

    /// Seconds between periodic stash sweeps.
    #[builder(default = "3600")]
    #[serde(default = "default_sweep_interval")]
    pub stash_sweep_interval_secs: u64,

    /// Seconds an elevated process may run before it is killed.
    #[builder(default = "30")]
    #[serde(default = "default_elevation_timeout")]
    pub elevation_timeout_secs: u64,

    /// Maximum "name (N)" candidates probed when auto-renaming.
    #[builder(default = "9999")]
    #[serde(default = "default_rename_attempts")]
    pub rename_attempts: u32,

    /// Compare destination names case-insensitively.
    #[builder(default = "default_case_insensitive()")]
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,

    /// Send deleted items to the OS trash instead of removing them.
    #[builder(default = "false")]
    #[serde(default)]
    pub delete_to_trash: bool,
}

fn default_batch_width() -> usize {
    4
}

fn default_undo_capacity() -> usize {
    50
}

fn default_retention_days() -> u64 {
    30
}

fn default_max_stashed() -> usize {
    200
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_elevation_timeout() -> u64 {
    30
}

fn default_rename_attempts() -> u32 {
    9999
}

/// Windows and macOS volumes are case-insensitive by default.
fn default_case_insensitive() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

/// `<data dir>/cairn/backups`, falling back to the temp directory.
pub fn default_stash_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("cairn")
        .join("backups")
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.batch_width == Some(0) {
            return Err("Batch width must be at least 1".to_string());
        }
        if self.undo_capacity == Some(0) {
            return Err("Undo capacity must be at least 1".to_string());
        }
        if self.rename_attempts == Some(0) {
            return Err("Rename attempts must be at least 1".to_string());
        }
        if let Some(ref root) = self.stash_root {
            if root.as_os_str().is_empty() {
                return Err("Stash root cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Retention window for stashed backups.
    pub fn stash_retention(&self) -> Duration {
        Duration::from_secs(self.stash_retention_days * 24 * 60 * 60)
    }

    /// Interval between periodic stash sweeps.
    pub fn stash_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stash_sweep_interval_secs)
    }

    /// Timeout applied to elevated processes.
    pub fn elevation_timeout(&self) -> Duration {
        Duration::from_secs(self.elevation_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_width: default_batch_width(),
            undo_capacity: default_undo_capacity(),
            stash_root: default_stash_root(),
            stash_retention_days: default_retention_days(),
            stash_max_entries: default_max_stashed(),
            stash_sweep_interval_secs: default_sweep_interval(),
            elevation_timeout_secs: default_elevation_timeout(),
            rename_attempts: default_rename_attempts(),
            case_insensitive: default_case_insensitive(),
            delete_to_trash: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .batch_width(2usize)
            .stash_root("/tmp/stash")
            .stash_max_entries(10usize)
            .build()
            .unwrap();

        assert_eq!(config.batch_width, 2);
        assert_eq!(config.stash_root, PathBuf::from("/tmp/stash"));
        assert_eq!(config.stash_max_entries, 10);
        assert_eq!(config.undo_capacity, 50);
        assert_eq!(config.elevation_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder_rejects_zero_width() {
        let result = EngineConfig::builder().batch_width(0usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_width, 4);
        assert_eq!(config.rename_attempts, 9999);
        assert_eq!(config.stash_retention(), Duration::from_secs(30 * 86_400));
        assert!(config.stash_root.ends_with("cairn/backups"));
    }

    #[test]
    fn test_config_partial_toml() {
        let config: EngineConfig = toml::from_str("batch_width = 8\n").unwrap();
        assert_eq!(config.batch_width, 8);
        assert_eq!(config.stash_max_entries, 200);
    }
}
