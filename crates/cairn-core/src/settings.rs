//! User preferences consulted by the engine.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictBehavior;

/// Read access to the preferences the engine depends on.
pub trait SettingsStore: Send + Sync {
    /// Skip the consent prompt before elevating.
    fn skip_elevation_confirmation(&self) -> bool;

    /// Conflict behavior used when the caller does not pass one.
    fn default_conflict_behavior(&self) -> ConflictBehavior;
}

/// Preferences persisted as TOML in the user's config directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub skip_elevation_confirmation: bool,
    pub default_conflict_behavior: ConflictBehavior,
}

impl UserSettings {
    /// Get the config file path.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cairn").join("settings.toml"))
    }

    /// Load settings from disk, or return defaults.
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load settings from a specific file, or return defaults.
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|content| toml::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Save settings to disk.
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "No config directory")
        })?;
        self.save_to(&path)
    }

    /// Save settings to a specific file.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        std::fs::write(path, content)
    }
}

impl SettingsStore for UserSettings {
    fn skip_elevation_confirmation(&self) -> bool {
        self.skip_elevation_confirmation
    }

    fn default_conflict_behavior(&self) -> ConflictBehavior {
        self.default_conflict_behavior
    }
}

/// In-memory settings that can be changed at runtime.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: RwLock<UserSettings>,
}

impl MemorySettings {
    /// Wrap a set of settings.
    pub fn new(settings: UserSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Replace the stored settings.
    pub fn set(&self, settings: UserSettings) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = settings;
    }

    fn read(&self) -> UserSettings {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SettingsStore for MemorySettings {
    fn skip_elevation_confirmation(&self) -> bool {
        self.read().skip_elevation_confirmation
    }

    fn default_conflict_behavior(&self) -> ConflictBehavior {
        self.read().default_conflict_behavior
    }
}
