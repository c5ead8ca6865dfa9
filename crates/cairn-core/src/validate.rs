//! Path and file name safety checks.
//!
//! Every path handed to the engine goes through [`PathPolicy::validate_path`]
//! before anything touches the disk, and every user-supplied name goes
//! through [`PathPolicy::validate_name`].

use std::path::{Component, Path, PathBuf};

use crate::error::{OpError, OpResult};

/// Device names Windows reserves in every directory, with or without extension.
const RESERVED_DEVICE_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const WINDOWS_INVALID_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// Maximum length of a single name in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Rules applied to paths and names.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    /// Apply Windows character and device-name restrictions.
    pub windows_rules: bool,
    /// Paths under these roots are never mutated.
    pub restricted_roots: Vec<PathBuf>,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self::platform()
    }
}

impl PathPolicy {
    /// The policy for the platform this binary was built for.
    pub fn platform() -> Self {
        let restricted_roots = if cfg!(windows) {
            vec![
                PathBuf::from(r"C:\Windows\System32"),
                PathBuf::from(r"C:\Windows\SysWOW64"),
                PathBuf::from(r"C:\Windows\WinSxS"),
            ]
        } else if cfg!(target_os = "macos") {
            vec![
                PathBuf::from("/System"),
                PathBuf::from("/dev"),
                PathBuf::from("/private/var/db"),
            ]
        } else {
            vec![
                PathBuf::from("/proc"),
                PathBuf::from("/sys"),
                PathBuf::from("/dev"),
            ]
        };

        Self {
            windows_rules: cfg!(windows),
            restricted_roots,
        }
    }

    /// A policy with Windows rules and no restricted roots, for exercising
    /// Windows behaviour on any host.
    pub fn windows() -> Self {
        Self {
            windows_rules: true,
            restricted_roots: Vec::new(),
        }
    }

    /// Validate an absolute path supplied by a caller.
    pub fn validate_path(&self, path: &Path) -> OpResult<()> {
        let os = path.as_os_str();
        if os.is_empty() {
            return Err(OpError::invalid_path(path, "path is empty"));
        }

        if os.as_encoded_bytes().contains(&0) {
            return Err(OpError::invalid_path(path, "path contains a null byte"));
        }

        if !path.is_absolute() {
            return Err(OpError::invalid_path(path, "path must be absolute"));
        }

        for component in path.components() {
            match component {
                Component::ParentDir => {
                    return Err(OpError::invalid_path(
                        path,
                        "parent directory traversal is not allowed",
                    ));
                }
                Component::Normal(part) => {
                    let part = part.to_string_lossy();
                    if self.windows_rules {
                        check_windows_component(path, &part)?;
                    }
                }
                _ => {}
            }
        }

        if let Some(root) = self.restricted_root(path) {
            return Err(OpError::invalid_path(
                path,
                format!("{} is a protected system location", root.display()),
            ));
        }

        Ok(())
    }

    /// Validate a single file or directory name for rename and create.
    pub fn validate_name(&self, name: &str) -> OpResult<()> {
        if name.is_empty() {
            return Err(OpError::invalid_name(name, "name cannot be empty"));
        }

        if name.len() > MAX_NAME_LEN {
            return Err(OpError::invalid_name(
                name,
                format!("name is too long (max {MAX_NAME_LEN} bytes)"),
            ));
        }

        for c in ['/', '\0'] {
            if name.contains(c) {
                return Err(OpError::invalid_name(
                    name,
                    format!("name cannot contain {c:?}"),
                ));
            }
        }

        if name == "." || name == ".." {
            return Err(OpError::invalid_name(name, "'.' and '..' are reserved names"));
        }

        if name.starts_with(' ') || name.ends_with(' ') {
            return Err(OpError::invalid_name(
                name,
                "name cannot start or end with spaces",
            ));
        }

        if name.ends_with('.') {
            return Err(OpError::invalid_name(name, "name cannot end with a dot"));
        }

        if self.windows_rules {
            if name.contains('\\') {
                return Err(OpError::invalid_name(name, "name cannot contain '\\\\'"));
            }
            if let Some(c) = name
                .chars()
                .find(|c| WINDOWS_INVALID_CHARS.contains(c) || c.is_control())
            {
                return Err(OpError::invalid_name(
                    name,
                    format!("name cannot contain {c:?}"),
                ));
            }
            if is_reserved_device_name(name) {
                return Err(OpError::invalid_name(name, "reserved device name"));
            }
        }

        Ok(())
    }

    fn restricted_root(&self, path: &Path) -> Option<&Path> {
        self.restricted_roots
            .iter()
            .find(|root| {
                if self.windows_rules {
                    let path = path.to_string_lossy().to_lowercase();
                    let root = root.to_string_lossy().to_lowercase();
                    Path::new(&path).starts_with(Path::new(&root))
                } else {
                    path.starts_with(root)
                }
            })
            .map(PathBuf::as_path)
    }
}

fn check_windows_component(path: &Path, part: &str) -> OpResult<()> {
    if let Some(c) = part
        .chars()
        .find(|c| WINDOWS_INVALID_CHARS.contains(c) || c.is_control())
    {
        return Err(OpError::invalid_path(
            path,
            format!("contains unsupported character {c:?}"),
        ));
    }
    if is_reserved_device_name(part) {
        return Err(OpError::invalid_path(
            path,
            format!("'{part}' is a reserved device name"),
        ));
    }
    Ok(())
}

/// Whether `name` is a Windows device name such as `CON` or `lpt1.txt`.
pub fn is_reserved_device_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    let base = upper.split('.').next().unwrap_or("").trim_end();
    RESERVED_DEVICE_NAMES.contains(&base)
}

/// Validate a path with the platform policy.
pub fn validate_path(path: &Path) -> OpResult<()> {
    PathPolicy::platform().validate_path(path)
}

/// Validate a name with the platform policy.
pub fn validate_filename(name: &str) -> OpResult<()> {
    PathPolicy::platform().validate_name(name)
}
