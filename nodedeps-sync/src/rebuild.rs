//! Rebuild of native artifacts for the current runtime.
//!
//! Packages that need a rebuild are copied into a staging `node_modules`,
//! rebuilt there in one tool invocation and swapped back one by one. Their
//! nested dependencies are linked rather than copied and moved across after
//! the rebuild succeeds.

use std::fs;
use std::path::{Path, PathBuf};

use nodedeps_core::RuntimeIdentity;

use crate::error::{io_err, AbortReason, SyncError};
use crate::fsutil::{copy_tree, symlink_or_copy};
use crate::layout::{
    is_hidden, is_node_modules_dir, working_manifest, BIN_SHIMS, NODE_MODULES, PACKAGE_MANIFEST,
};
use crate::portability::is_portable;
use crate::stamp::RebuildStamp;
use crate::tool::PackageManager;
use crate::transaction::{replace_dir, sweep_orphans, StagingRegistry, Transaction, ORPHAN_MAX_AGE};

pub struct NativeRebuild<'a, P: PackageManager + ?Sized> {
    tool: &'a P,
    registry: &'a StagingRegistry,
}

impl<'a, P: PackageManager + ?Sized> NativeRebuild<'a, P> {
    pub fn new(tool: &'a P, registry: &'a StagingRegistry) -> Self {
        Self { tool, registry }
    }

    /// Rebuild every package under `node_modules` that carries native
    /// artifacts not built for the current runtime.
    ///
    /// Returns `true` if anything was rebuilt. A failed rebuild leaves every
    /// package untouched and returns `false`.
    pub fn rebuild_if_non_portable(&self, node_modules: &Path) -> Result<bool, SyncError> {
        if !is_node_modules_dir(node_modules) {
            return Err(SyncError::Precondition(format!(
                "{} is not a node_modules directory",
                node_modules.display()
            )));
        }
        if !node_modules.is_dir() {
            return Ok(false);
        }
        let node_modules = fs::canonicalize(node_modules).map_err(|e| io_err(node_modules, e))?;
        sweep_orphans(&node_modules, ORPHAN_MAX_AGE)?;

        let mut runtime: Option<RuntimeIdentity> = None;
        let mut marked = Vec::new();
        for (name, dir) in top_level_packages(&node_modules)? {
            if is_portable(&dir)? {
                continue;
            }
            if runtime.is_none() {
                runtime = Some(self.tool.runtime()?);
            }
            if let Some(current) = &runtime {
                if RebuildStamp::read(&dir).is_some_and(|stamp| stamp.is_compatible_with(current)) {
                    tracing::debug!(package = %name, runtime = %current, "native build is current");
                    continue;
                }
            }
            marked.push(name);
        }
        let Some(runtime) = runtime.filter(|_| !marked.is_empty()) else {
            return Ok(false);
        };
        tracing::info!(packages = ?marked, runtime = %runtime, "rebuilding native packages");

        let tx = Transaction::begin(self.registry, &node_modules)?;
        let manifest = working_manifest("rebuild", &Default::default());
        let manifest_path = tx.path().join(PACKAGE_MANIFEST);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
            .map_err(|e| io_err(&manifest_path, e))?;
        let staged_root = tx.path().join(NODE_MODULES);
        fs::create_dir(&staged_root).map_err(|e| io_err(&staged_root, e))?;
        for name in &marked {
            stage_package(&node_modules.join(name), &staged_root.join(name), &runtime)?;
        }

        let output = self.tool.rebuild(tx.path());
        if !output.success {
            let reason = AbortReason::RebuildFailed {
                detail: output.describe(),
            };
            tracing::warn!(%reason, "leaving native packages untouched");
            tx.abort();
            return Ok(false);
        }

        for name in &marked {
            swap_in(&staged_root.join(name), &node_modules.join(name))?;
            tracing::info!(package = %name, "rebuilt native package");
        }
        tx.abort();
        Ok(true)
    }
}

/// Installed packages as `(name, dir)`, with `@scope/name` expanded.
fn top_level_packages(node_modules: &Path) -> Result<Vec<(String, PathBuf)>, SyncError> {
    let mut packages = Vec::new();
    for (name, path) in visible_dirs(node_modules)? {
        if name.starts_with('@') {
            for (child, child_path) in visible_dirs(&path)? {
                packages.push((format!("{name}/{child}"), child_path));
            }
        } else {
            packages.push((name, path));
        }
    }
    packages.sort();
    Ok(packages)
}

fn visible_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, SyncError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if !is_hidden(&name) && path.is_dir() {
            dirs.push((name, path));
        }
    }
    Ok(dirs)
}

/// Copy `original` into `staged` without its nested `node_modules`, whose
/// entries are linked instead.
fn stage_package(original: &Path, staged: &Path, runtime: &RuntimeIdentity) -> Result<(), SyncError> {
    fs::create_dir_all(staged).map_err(|e| io_err(staged, e))?;
    for entry in fs::read_dir(original).map_err(|e| io_err(original, e))? {
        let entry = entry.map_err(|e| io_err(original, e))?;
        let name = entry.file_name();
        if name == NODE_MODULES {
            continue;
        }
        copy_tree(&entry.path(), &staged.join(&name))?;
    }

    let nested = original.join(NODE_MODULES);
    if nested.is_dir() {
        let staged_nested = staged.join(NODE_MODULES);
        fs::create_dir(&staged_nested).map_err(|e| io_err(&staged_nested, e))?;
        for entry in fs::read_dir(&nested).map_err(|e| io_err(&nested, e))? {
            let entry = entry.map_err(|e| io_err(&nested, e))?;
            let name = entry.file_name();
            if name == BIN_SHIMS {
                continue;
            }
            symlink_or_copy(&entry.path(), &staged_nested.join(&name))?;
        }
    }

    RebuildStamp::new(runtime.clone()).write(staged);
    Ok(())
}

/// Move the original nested `node_modules` into the rebuilt copy, then the
/// rebuilt copy over the original package.
fn swap_in(staged: &Path, original: &Path) -> Result<(), SyncError> {
    let nested = original.join(NODE_MODULES);
    let staged_nested = staged.join(NODE_MODULES);
    let moved_nested = nested.is_dir();
    if moved_nested {
        replace_dir(&nested, &staged_nested)?;
    }

    if let Err(e) = replace_dir(staged, original) {
        if moved_nested {
            if let Err(restore) = fs::rename(&staged_nested, &nested) {
                tracing::error!(
                    path = %nested.display(),
                    error = %restore,
                    "could not restore nested node_modules"
                );
            }
        }
        return Err(e);
    }
    Ok(())
}
