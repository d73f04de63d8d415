//! Bring a dependency root in line with a declared [`DependencySpec`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nodedeps_core::tree::canonical_version;
use nodedeps_core::{lockfile, DependencySpec, DependencyTree, MinimizedTree, TreeError};

use crate::error::{io_err, AbortReason, SyncError};
use crate::fsutil::{find_incompatible_name, remove_path};
use crate::layout::{
    lock_mirror_path, lock_path, node_modules_path, working_manifest, GITIGNORE, GITIGNORE_CONTENTS,
    PACKAGE_MANIFEST, README, README_CONTENTS, TOOL_LOCK_FILE,
};
use crate::stamp::{write_runtime_record, RuntimeRecord};
use crate::tool::{ConnectivityProbe, PackageManager};
use crate::transaction::{
    remove_dir_atomically, sweep_orphans, StagingRegistry, Transaction, ORPHAN_MAX_AGE,
};

/// Drives installs of one dependency root at a time.
pub struct DependencySync<'a, P: PackageManager + ?Sized> {
    tool: &'a P,
    registry: &'a StagingRegistry,
    probe: Option<&'a dyn ConnectivityProbe>,
}

impl<'a, P: PackageManager + ?Sized> DependencySync<'a, P> {
    pub fn new(tool: &'a P, registry: &'a StagingRegistry) -> Self {
        Self {
            tool,
            registry,
            probe: None,
        }
    }

    /// Check registry connectivity before every install.
    pub fn with_probe(mut self, probe: &'a dyn ConnectivityProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Make `dep_root` hold exactly the dependencies in `desired`.
    ///
    /// Returns `true` if dependencies are installed when this returns. An
    /// empty `desired` removes the root and returns `false`. Expected
    /// failures (unknown package, unreachable registry, ...) leave the root
    /// as it was and also return `false`.
    pub fn sync(&self, name: &str, dep_root: &Path, desired: &DependencySpec) -> Result<bool, SyncError> {
        if desired.is_empty() {
            remove_dir_atomically(self.registry, dep_root)?;
            return Ok(false);
        }
        sweep_orphans(dep_root, ORPHAN_MAX_AGE)?;

        let result = if dep_root.exists() {
            self.update(name, dep_root, desired)
        } else {
            self.create_fresh(name, dep_root, desired)
        };
        match result {
            Ok(()) => Ok(true),
            Err(SyncError::Recoverable(reason)) => {
                tracing::warn!(component = %name, %reason, "dependency sync abandoned");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn create_fresh(&self, name: &str, dep_root: &Path, desired: &DependencySpec) -> Result<(), SyncError> {
        tracing::info!(component = %name, packages = desired.len(), "installing dependencies");
        self.preflight()?;
        let tx = Transaction::begin(self.registry, dep_root)?;
        prepare_working_dir(tx.path(), name, &BTreeMap::new())?;

        for (package, spec) in desired.iter() {
            let request = format!("{package}@{spec}");
            tracing::debug!(component = %name, %request, "installing package");
            let output = self.tool.install(tx.path(), std::slice::from_ref(&request));
            if !output.success {
                return Err(self.tool.classify_install_failure(&request, &output));
            }
        }
        self.finalize(name, tx)
    }

    fn update(&self, name: &str, dep_root: &Path, desired: &DependencySpec) -> Result<(), SyncError> {
        let lock_file = lock_path(dep_root);
        if !lock_file.is_file() {
            tracing::warn!(path = %dep_root.display(), "dependency root has no lock file; reinstalling");
            return self.reinstall(name, dep_root, desired);
        }
        let Some(locked) = load_lock(&lock_file)? else {
            return self.reinstall(name, dep_root, desired);
        };

        let node_modules = node_modules_path(dep_root);
        let installed = match DependencyTree::read_installed(&node_modules) {
            Ok(tree) => tree.minimize(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read installed packages");
                MinimizedTree::default()
            }
        };
        let locked_min = locked.minimize();
        let desired_min = MinimizedTree::from_spec(desired);

        if desired_min.is_subtree_of(&installed)
            && locked_min.is_subtree_of(&installed)
            && self.runtime_matches(&node_modules)?
        {
            tracing::debug!(component = %name, "dependencies up to date");
            return Ok(());
        }

        let preserved = if desired_min.is_subtree_of(&locked_min) {
            locked
        } else {
            DependencyTree::desired(desired)
        };
        tracing::info!(
            component = %name,
            packages = preserved.dependencies.len(),
            "updating dependencies"
        );

        self.preflight()?;
        let tx = Transaction::begin(self.registry, dep_root)?;
        let manifest_deps: BTreeMap<String, String> = preserved
            .dependencies
            .iter()
            .map(|(package, node)| (package.clone(), canonical_version(node).to_owned()))
            .collect();
        prepare_working_dir(tx.path(), name, &manifest_deps)?;
        lockfile::save(&lock_path(tx.path()), &preserved)?;

        let output = self.tool.install(tx.path(), &[]);
        if !output.success {
            return Err(self
                .tool
                .classify_install_failure(&format!("dependencies of {name}"), &output));
        }
        self.finalize(name, tx)
    }

    fn reinstall(&self, name: &str, dep_root: &Path, desired: &DependencySpec) -> Result<(), SyncError> {
        remove_dir_atomically(self.registry, dep_root)?;
        self.create_fresh(name, dep_root, desired)
    }

    fn preflight(&self) -> Result<(), SyncError> {
        if let Some(probe) = self.probe {
            probe.check()?;
        }
        Ok(())
    }

    fn runtime_matches(&self, node_modules: &Path) -> Result<bool, SyncError> {
        let current = self.tool.runtime()?;
        Ok(RuntimeRecord::read(node_modules).is_some_and(|record| record.is_compatible_with(&current)))
    }

    /// Record what was installed in the staging directory and commit it.
    fn finalize(&self, name: &str, tx: Transaction<'_>) -> Result<(), SyncError> {
        let staging = tx.path().to_path_buf();
        let node_modules = node_modules_path(&staging);

        if let Some(path) = find_incompatible_name(&node_modules)? {
            let path = path.strip_prefix(&staging).map(Path::to_path_buf).unwrap_or(path);
            return Err(AbortReason::IncompatiblePathNames { path }.into());
        }

        // A non-zero exit only flags extraneous or missing packages; the
        // listing is still usable unless the run itself broke.
        let output = self.tool.list_installed(&staging, true);
        if output.error.is_some() || output.stdout.trim().is_empty() {
            return Err(SyncError::Tool {
                command: "npm ls".to_string(),
                detail: output.describe(),
            });
        }
        let installed = DependencyTree::from_listing(&output.stdout)?;

        remove_path(&staging.join(PACKAGE_MANIFEST))?;
        remove_path(&staging.join(TOOL_LOCK_FILE))?;
        lockfile::save(&lock_path(&staging), &installed)?;
        lockfile::save(&lock_mirror_path(&staging), &installed)?;
        write_runtime_record(&node_modules, &self.tool.runtime()?)?;
        write_file(&staging.join(GITIGNORE), GITIGNORE_CONTENTS)?;
        write_file(&staging.join(README), README_CONTENTS)?;

        tx.commit()?;
        tracing::info!(
            component = %name,
            packages = installed.dependencies.len(),
            "dependencies installed"
        );
        Ok(())
    }
}

/// Load the lock of an existing root that was just seen to have one.
/// `None` means the lock is unreadable and the root must be reinstalled.
fn load_lock(lock_file: &Path) -> Result<Option<DependencyTree>, SyncError> {
    match lockfile::load(lock_file) {
        Ok(tree) => Ok(Some(tree)),
        Err(TreeError::LockNotFound { path }) => Err(SyncError::Corrupted {
            path,
            detail: "lock file disappeared during update".to_string(),
        }),
        Err(e @ TreeError::Parse { .. }) => {
            tracing::warn!(error = %e, "unreadable lock file; reinstalling");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Anchor the tool to `dir`: an empty `node_modules` plus a working manifest.
fn prepare_working_dir(dir: &Path, name: &str, dependencies: &BTreeMap<String, String>) -> Result<(), SyncError> {
    let node_modules = node_modules_path(dir);
    fs::create_dir_all(&node_modules).map_err(|e| io_err(&node_modules, e))?;
    let manifest = serde_json::to_string_pretty(&working_manifest(name, dependencies))?;
    write_file(&dir.join(PACKAGE_MANIFEST), &(manifest + "\n"))
}

fn write_file(path: &Path, contents: &str) -> Result<(), SyncError> {
    fs::write(path, contents).map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn working_dir_is_anchored() {
        let tmp = TempDir::new().unwrap();
        let deps = BTreeMap::from([("a".to_owned(), "1.0.0".to_owned())]);
        prepare_working_dir(tmp.path(), "widget", &deps).unwrap();

        assert!(tmp.path().join("node_modules").is_dir());
        let manifest: Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join(PACKAGE_MANIFEST)).unwrap()).unwrap();
        assert_eq!(manifest["name"], "widget-deps");
        assert_eq!(manifest["dependencies"]["a"], "1.0.0");
    }

    #[test]
    fn vanished_lock_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let lock_file = lock_path(tmp.path());
        let err = load_lock(&lock_file).unwrap_err();
        match err {
            SyncError::Corrupted { path, .. } => assert_eq!(path, lock_file),
            other => panic!("expected Corrupted, got {other:?}"),
        }
    }

    #[test]
    fn malformed_lock_requests_reinstall() {
        let tmp = TempDir::new().unwrap();
        let lock_file = lock_path(tmp.path());
        fs::write(&lock_file, "{").unwrap();
        assert!(load_lock(&lock_file).unwrap().is_none());
    }
}
