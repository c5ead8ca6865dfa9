//! Filesystem primitives shared by the executor, backups and the ledger.

use std::fs;
use std::io;
use std::path::Path;

/// How an item reached its new location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    /// Atomic rename on the same volume.
    Renamed,
    /// Copy to the new volume followed by removal of the source.
    Copied,
}

/// Whether something (including a dangling symlink) exists at `path`.
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Whether a rename failed because source and destination are on different volumes.
pub fn is_cross_device(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::CrossesDevices
}

/// Copy a file, symlink, or directory tree to a path that must not exist yet.
///
/// The destination is created exclusively: an occupied `dest` fails with
/// [`io::ErrorKind::AlreadyExists`] and is left untouched. On any later
/// failure the partial copy this call created is removed.
///
/// Returns the number of bytes copied.
pub fn copy_item(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut created = false;
    let result = copy_entry(source, dest, &mut created);
    if result.is_err() && created {
        if let Err(cleanup) = remove_if_exists(dest) {
            tracing::warn!(
                path = %dest.display(),
                error = %cleanup,
                "failed to remove partial copy"
            );
        }
    }
    result
}

fn copy_entry(source: &Path, dest: &Path, created: &mut bool) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(source)?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        copy_symlink(source, dest)?;
        *created = true;
        Ok(0)
    } else if file_type.is_dir() {
        fs::create_dir(dest)?;
        *created = true;
        copy_children(source, dest)
    } else {
        copy_file(source, dest, &metadata, created)
    }
}

/// Copy the entries of `source` into the freshly created `dest`.
fn copy_children(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut total_bytes = 0u64;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let mut created = false;
        total_bytes += copy_entry(&entry.path(), &dest.join(entry.file_name()), &mut created)?;
    }

    Ok(total_bytes)
}

fn copy_file(
    source: &Path,
    dest: &Path,
    metadata: &fs::Metadata,
    created: &mut bool,
) -> io::Result<u64> {
    let mut reader = fs::File::open(source)?;
    let mut writer = fs::File::create_new(dest)?;
    *created = true;
    let bytes = io::copy(&mut reader, &mut writer)?;
    writer.set_permissions(metadata.permissions())?;
    Ok(bytes)
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    let target = fs::read_link(source)?;
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(windows)]
fn copy_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    let target = fs::read_link(source)?;
    if fs::metadata(source).map(|m| m.is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(target, dest)
    } else {
        std::os::windows::fs::symlink_file(target, dest)
    }
}

#[cfg(not(any(unix, windows)))]
fn copy_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(source, dest).map(|_| ())
}

/// Remove a file, symlink, or directory tree.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Remove whatever sits at `path`, ignoring a missing entry.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match remove_path(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Move an item, falling back to copy-then-delete across volumes.
///
/// Never replaces an existing `dest`: that fails with
/// [`io::ErrorKind::AlreadyExists`] before anything is touched. A `dest`
/// that is the source itself under another spelling (a case-only rename on
/// a case-insensitive volume) is allowed.
///
/// If the fallback copy fails, the partial copy is removed and the source is
/// untouched. If removing the source fails afterwards, the complete copy is
/// left at `dest` and the error is returned.
pub fn move_path(source: &Path, dest: &Path) -> io::Result<MoveMethod> {
    move_path_with(source, dest, |from, to| fs::rename(from, to))
}

fn move_path_with<R>(source: &Path, dest: &Path, rename: R) -> io::Result<MoveMethod>
where
    R: FnOnce(&Path, &Path) -> io::Result<()>,
{
    if exists(dest) && !is_same_entry(source, dest) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", dest.display()),
        ));
    }

    match rename(source, dest) {
        Ok(()) => Ok(MoveMethod::Renamed),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                source = %source.display(),
                dest = %dest.display(),
                "rename crossed devices, copying instead"
            );
            copy_then_remove(source, dest)?;
            Ok(MoveMethod::Copied)
        }
        Err(e) => Err(e),
    }
}

/// Copy `source` to `dest`, then remove `source`.
pub fn copy_then_remove(source: &Path, dest: &Path) -> io::Result<()> {
    copy_item(source, dest)?;
    remove_path(source)
}

#[cfg(unix)]
fn is_same_entry(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::symlink_metadata(a), fs::symlink_metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_same_entry(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}
