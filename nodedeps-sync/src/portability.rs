//! Detection of packages that ship compiled native artifacts.
//!
//! Results for package directories are cached in a marker file next to the
//! package manifest. A marker is only trusted while the manifest exists; a
//! package reinstalled by the tool arrives without one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};
use crate::layout::{is_hidden, is_native_artifact, is_node_modules_dir, PACKAGE_MANIFEST, PORTABLE_MARKER};

/// Cached portability verdict of one package directory.
#[derive(Debug, Clone)]
pub struct PortabilityMarker {
    path: PathBuf,
}

impl PortabilityMarker {
    pub fn for_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(PORTABLE_MARKER),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached verdict; `None` when absent or unreadable.
    pub fn read(&self) -> Option<bool> {
        let text = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(text.trim()).ok()
    }

    pub fn write(&self, portable: bool) {
        let text = if portable { "true" } else { "false" };
        if let Err(e) = fs::write(&self.path, text) {
            tracing::debug!(path = %self.path.display(), error = %e, "could not write portability marker");
        }
    }

    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed stale portability marker"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "could not remove portability marker")
            }
        }
    }
}

/// `true` if nothing under `path` is a compiled native artifact.
///
/// Symlinks are judged by their own name and never followed.
pub fn is_portable(path: &Path) -> Result<bool, SyncError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;
    if !metadata.is_dir() {
        return Ok(!is_native_artifact(path));
    }

    let marker = PortabilityMarker::for_dir(path);
    let cacheable = path.join(PACKAGE_MANIFEST).is_file();
    if cacheable {
        if let Some(cached) = marker.read() {
            return Ok(cached);
        }
    } else {
        marker.clear();
    }

    let portable = children_are_portable(path)?;
    if cacheable {
        marker.write(portable);
    }
    Ok(portable)
}

fn children_are_portable(dir: &Path) -> Result<bool, SyncError> {
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        if is_hidden(&entry.file_name().to_string_lossy()) {
            continue;
        }
        if !is_portable(&entry.path())? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `true` if every package installed in `node_modules` is portable.
/// A missing directory has nothing to rebuild and counts as portable.
pub fn dependencies_are_portable(node_modules: &Path) -> Result<bool, SyncError> {
    if !is_node_modules_dir(node_modules) {
        return Err(SyncError::Precondition(format!(
            "{} is not a node_modules directory",
            node_modules.display()
        )));
    }
    match fs::metadata(node_modules) {
        Ok(_) => children_are_portable(node_modules),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(io_err(node_modules, e)),
    }
}
