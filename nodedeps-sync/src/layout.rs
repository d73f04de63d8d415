//! On-disk naming conventions for dependency roots and installed packages.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

/// Installed-dependencies directory inside a dependency root. The rebuild
/// command infers its working set from a directory with exactly this name.
pub const NODE_MODULES: &str = "node_modules";
/// Identity manifest of a package; also the working manifest during installs.
pub const PACKAGE_MANIFEST: &str = "package.json";
pub const LOCK_FILE: &str = "npm-shrinkwrap.json";
/// Provenance copy of the lock kept inside `node_modules`.
pub const LOCK_MIRROR: &str = ".npm-shrinkwrap.json";
/// Lock written by newer tool versions next to the working manifest.
pub const TOOL_LOCK_FILE: &str = "package-lock.json";
pub const GITIGNORE: &str = ".gitignore";
pub const README: &str = "README";
pub const RUNTIME_RECORD: &str = ".runtime-version.json";
pub const PORTABLE_MARKER: &str = ".nodedeps-portable";
pub const REBUILD_STAMP: &str = ".nodedeps-rebuild-stamp.json";
/// Executable shims; never linked into a rebuild staging copy.
pub const BIN_SHIMS: &str = ".bin";
/// Extension of compiled native addons.
pub const NATIVE_EXTENSION: &str = "node";

pub const GITIGNORE_CONTENTS: &str = "node_modules\n";

pub const README_CONTENTS: &str = "\
This directory and the files directly inside it are generated whenever the
declared dependencies of this component change.

Check npm-shrinkwrap.json, .gitignore and this README into version control so
that everyone installs the same versions of every sub-dependency.

Do not check in node_modules; it is rebuilt from npm-shrinkwrap.json on demand
and the .gitignore file keeps git from picking it up.
";

pub fn node_modules_path(dep_root: &Path) -> PathBuf {
    dep_root.join(NODE_MODULES)
}

pub fn lock_path(dep_root: &Path) -> PathBuf {
    dep_root.join(LOCK_FILE)
}

pub fn lock_mirror_path(dep_root: &Path) -> PathBuf {
    node_modules_path(dep_root).join(LOCK_MIRROR)
}

pub fn runtime_record_path(node_modules: &Path) -> PathBuf {
    node_modules.join(RUNTIME_RECORD)
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// `true` if `path` names a compiled native artifact.
pub fn is_native_artifact(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == NATIVE_EXTENSION)
}

/// `true` if `path` is named like an installed-dependencies directory.
pub fn is_node_modules_dir(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == NODE_MODULES)
}

/// Manifest that anchors the tool to a staging directory so it never walks
/// up into an enclosing project.
pub fn working_manifest(name: &str, dependencies: &BTreeMap<String, String>) -> Value {
    let mut manifest = json!({
        "name": format!("{}-deps", manifest_name(name)),
        "version": "0.0.0",
        "private": true,
    });
    if !dependencies.is_empty() {
        manifest["dependencies"] = json!(dependencies);
    }
    manifest
}

/// Lowercase `name` and replace anything the registry rejects in a package
/// name with `-`.
fn manifest_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '.' | '_' => c,
            _ => '-',
        })
        .collect();
    let trimmed = cleaned.trim_start_matches(['.', '_']);
    if trimmed.is_empty() {
        "nodedeps".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_manifest_sanitizes_name() {
        let manifest = working_manifest("My Component/v2", &BTreeMap::new());
        assert_eq!(manifest["name"], "my-component-v2-deps");
        assert_eq!(manifest["private"], true);
        assert!(manifest.get("dependencies").is_none());

        let deps = BTreeMap::from([("a".to_owned(), "1.0.0".to_owned())]);
        assert_eq!(working_manifest("_x", &deps)["dependencies"]["a"], "1.0.0");
        assert_eq!(working_manifest("..", &deps)["name"], "nodedeps-deps");
    }

    #[test]
    fn native_artifacts_are_detected_by_extension() {
        assert!(is_native_artifact(Path::new("build/Release/addon.node")));
        assert!(!is_native_artifact(Path::new("lib/node.js")));
        assert!(!is_native_artifact(Path::new("node")));
    }

    #[test]
    fn node_modules_name_check_ignores_parents() {
        assert!(is_node_modules_dir(Path::new("/app/.npm/package/node_modules")));
        assert!(!is_node_modules_dir(Path::new("/app/node_modules/lodash")));
    }
}
