//! Filesystem helpers shared by sync and rebuild.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};

/// Characters rejected by at least one supported filesystem.
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\'];

const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Recursively copy `src` to `dst`. Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), SyncError> {
    let metadata = fs::symlink_metadata(src).map_err(|e| io_err(src, e))?;

    if metadata.is_dir() {
        fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
        for entry in fs::read_dir(src).map_err(|e| io_err(src, e))? {
            let entry = entry.map_err(|e| io_err(src, e))?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return Ok(());
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    if metadata.file_type().is_symlink() {
        let target = fs::read_link(src).map_err(|e| io_err(src, e))?;
        let is_dir = fs::metadata(src).map(|m| m.is_dir()).unwrap_or(false);
        return make_symlink(&target, dst, is_dir).map_err(|e| io_err(dst, e));
    }

    fs::copy(src, dst).map_err(|e| io_err(dst, e))?;
    Ok(())
}

/// Link `link` to `original`, copying instead where links are unavailable.
pub fn symlink_or_copy(original: &Path, link: &Path) -> Result<(), SyncError> {
    let is_dir = original.is_dir();
    match make_symlink(original, link, is_dir) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                original = %original.display(),
                link = %link.display(),
                error = %err,
                "symlink failed, copying instead"
            );
            copy_tree(original, link)
        }
    }
}

#[cfg(unix)]
fn make_symlink(original: &Path, link: &Path, _is_dir: bool) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn make_symlink(original: &Path, link: &Path, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        std::os::windows::fs::symlink_dir(original, link)
    } else {
        std::os::windows::fs::symlink_file(original, link)
    }
}

/// Remove a file, symlink or directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<(), SyncError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_err(path, e)),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// `true` if `name` can be created on every supported platform.
pub fn is_portable_name(name: &str) -> bool {
    if name.is_empty() || name.ends_with('.') || name.ends_with(' ') {
        return false;
    }
    if name
        .chars()
        .any(|c| c.is_control() || FORBIDDEN_CHARS.contains(&c))
    {
        return false;
    }
    let stem = name.split('.').next().unwrap_or(name).to_ascii_lowercase();
    !RESERVED_NAMES.contains(&stem.as_str())
}

/// First path under `root` whose file name is not portable, if any.
/// Symlinks are reported but not descended into.
pub fn find_incompatible_name(root: &Path) -> Result<Option<PathBuf>, SyncError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(root, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| io_err(root, e))?;
        let path = entry.path();
        if !is_portable_name(&entry.file_name().to_string_lossy()) {
            return Ok(Some(path));
        }
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            if let Some(found) = find_incompatible_name(&path)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}
