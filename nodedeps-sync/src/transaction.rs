//! Staged directory replacement.
//!
//! Work happens in a sibling staging directory and reaches the target through
//! `rename` only, so the target is always either its complete prior state or
//! its complete new state. Concurrent processes never corrupt each other; the
//! last commit wins.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use uuid::Uuid;

use crate::error::{io_err, SyncError};
use crate::fsutil::remove_path;

/// Sibling directories older than this are treated as leftovers of a crashed
/// run.
pub const ORPHAN_MAX_AGE: Duration = Duration::from_secs(60 * 60);

const STAGING_TAG: &str = "staging";
const REMOVING_TAG: &str = "removing";
const GARBAGE_TAG: &str = "garbage";

/// Bound on retrying a commit whose final rename failed.
const MAX_COMMIT_ATTEMPTS: usize = 64;

// ---------------------------------------------------------------------------
// StagingRegistry
// ---------------------------------------------------------------------------

/// Process-wide set of in-flight staging directories.
///
/// The host keeps one for the lifetime of the process and calls
/// [`StagingRegistry::drain_all`] on shutdown.
#[derive(Debug, Default)]
pub struct StagingRegistry {
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl StagingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn paths(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, path: &Path) {
        self.paths().insert(path.to_path_buf());
    }

    pub fn deregister(&self, path: &Path) {
        self.paths().remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths().contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths().is_empty()
    }

    /// Delete every registered directory. Returns how many were removed.
    pub fn drain_all(&self) -> usize {
        let paths = std::mem::take(&mut *self.paths());
        let mut removed = 0;
        for path in paths {
            match remove_path(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "removed staging directory");
                    removed += 1;
                }
                Err(e) => tracing::warn!(error = %e, "could not remove staging directory"),
            }
        }
        removed
    }
}

/// `.<target-name>.<tag>-<uuid>` beside `target`.
pub fn sibling_path(target: &Path, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent_dir(target).join(format!(".{name}.{tag}-{}", Uuid::new_v4().simple()))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A staging directory that either replaces `target` on [`commit`] or is
/// deleted. Dropping an unfinished transaction aborts it.
///
/// [`commit`]: Transaction::commit
#[derive(Debug)]
pub struct Transaction<'r> {
    registry: &'r StagingRegistry,
    target: PathBuf,
    staging: PathBuf,
    finished: bool,
}

impl<'r> Transaction<'r> {
    pub fn begin(registry: &'r StagingRegistry, target: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let target = target.into();
        let staging = sibling_path(&target, STAGING_TAG);
        let parent = parent_dir(&staging);
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;

        registry.register(&staging);
        let tx = Self {
            registry,
            target,
            staging,
            finished: false,
        };
        fs::create_dir(&tx.staging).map_err(|e| io_err(&tx.staging, e))?;
        tracing::debug!(staging = %tx.staging.display(), "began transaction");
        Ok(tx)
    }

    /// The staging directory.
    pub fn path(&self) -> &Path {
        &self.staging
    }

    /// Move the staging directory onto the target.
    pub fn commit(mut self) -> Result<(), SyncError> {
        replace_dir(&self.staging, &self.target)?;
        self.finished = true;
        self.registry.deregister(&self.staging);
        tracing::debug!(target = %self.target.display(), "committed transaction");
        Ok(())
    }

    /// Delete the staging directory and leave the target untouched.
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match remove_path(&self.staging) {
            Ok(()) => self.registry.deregister(&self.staging),
            // Stays registered so drain_all retries it.
            Err(e) => tracing::warn!(error = %e, "could not discard staging directory"),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

// ---------------------------------------------------------------------------
// Renames
// ---------------------------------------------------------------------------

/// Move `src` onto `target`, replacing whatever `target` held.
///
/// An existing target is renamed aside first and restored if the second
/// rename fails. A concurrent commit that lands between the two renames
/// makes the restore fail; the displaced copy is then obsolete and the
/// commit is retried, so the last commit wins.
pub fn replace_dir(src: &Path, target: &Path) -> Result<(), SyncError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let garbage = displace(target, GARBAGE_TAG)?;
        let err = match fs::rename(src, target) {
            Ok(()) => {
                if let Some(garbage) = &garbage {
                    discard_displaced(garbage);
                }
                return Ok(());
            }
            Err(e) => e,
        };

        if let Some(garbage) = &garbage {
            match fs::rename(garbage, target) {
                Ok(()) => {}
                Err(_) if target.exists() => discard_displaced(garbage),
                Err(restore) => {
                    tracing::error!(
                        target = %target.display(),
                        garbage = %garbage.display(),
                        error = %restore,
                        "could not restore displaced directory"
                    );
                    return Err(io_err(src, err));
                }
            }
        }
        if attempt >= MAX_COMMIT_ATTEMPTS || !src.exists() {
            return Err(io_err(src, err));
        }
        tracing::debug!(target = %target.display(), attempt, error = %err, "retrying commit");
    }
}

/// Remove `target` by renaming it aside and deleting the renamed copy.
/// Returns `false` if there was nothing to remove.
pub fn remove_dir_atomically(registry: &StagingRegistry, target: &Path) -> Result<bool, SyncError> {
    let Some(removing) = displace(target, REMOVING_TAG)? else {
        return Ok(false);
    };

    registry.register(&removing);
    match remove_path(&removing) {
        Ok(()) => registry.deregister(&removing),
        Err(e) => tracing::warn!(error = %e, "removal left a directory behind"),
    }
    tracing::info!(path = %target.display(), "removed directory");
    Ok(true)
}

/// Rename `target` to a fresh `tag` sibling. Returns `None` if there is no
/// target.
///
/// The target's mtime is refreshed first: a rename keeps it, and the orphan
/// sweep must see the displaced copy as in flight.
fn displace(target: &Path, tag: &str) -> Result<Option<PathBuf>, SyncError> {
    match filetime::set_file_mtime(target, FileTime::now()) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => tracing::warn!(path = %target.display(), error = %e, "could not refresh mtime"),
    }

    let aside = sibling_path(target, tag);
    match fs::rename(target, &aside) {
        Ok(()) => Ok(Some(aside)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(target, e)),
    }
}

fn discard_displaced(path: &Path) {
    if let Err(e) = remove_path(path) {
        tracing::warn!(error = %e, "left displaced directory for the orphan sweep");
    }
}

/// Modification time of `path`, or `None` once it is gone.
fn modified_time(path: &Path) -> Result<Option<SystemTime>, SyncError> {
    match fs::symlink_metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => Ok(Some(modified)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Delete staging, removing and garbage siblings of `target` older than
/// `max_age`. Returns how many were removed.
pub fn sweep_orphans(target: &Path, max_age: Duration) -> Result<usize, SyncError> {
    let Some(name) = target.file_name() else {
        return Ok(0);
    };
    let prefix = format!(".{}.", name.to_string_lossy());
    let parent = parent_dir(target);
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_err(parent, e)),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(parent, e))?;
        let file_name = entry.file_name();
        let Some(rest) = file_name.to_string_lossy().strip_prefix(&prefix).map(str::to_owned) else {
            continue;
        };
        let is_orphan_name = [STAGING_TAG, REMOVING_TAG, GARBAGE_TAG]
            .iter()
            .any(|tag| rest.strip_prefix(tag).is_some_and(|r| r.starts_with('-')));
        if !is_orphan_name {
            continue;
        }

        // Siblings vanish underneath us when a concurrent process finishes
        // its own cleanup.
        let path = entry.path();
        let Some(modified) = modified_time(&path)? else {
            continue;
        };
        if now.duration_since(modified).unwrap_or_default() < max_age {
            continue;
        }
        if let Err(e) = remove_path(&path) {
            tracing::warn!(error = %e, "could not remove orphaned directory");
            continue;
        }
        tracing::info!(path = %path.display(), "removed orphaned directory");
        removed += 1;
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
