//! In-process package manager double shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use nodedeps_core::{DependencySpec, DependencyTree, RuntimeIdentity};
use nodedeps_sync::npm::classify_install_failure;
use nodedeps_sync::{PackageManager, SyncError, ToolOutput};

#[derive(Debug, Clone, Default)]
pub struct FakePackage {
    /// Exact `name -> version` dependencies, installed nested.
    pub deps: BTreeMap<String, String>,
    /// Ships `build/Release/addon.node`.
    pub native: bool,
    pub extra_files: Vec<String>,
}

/// Materializes packages from an in-memory registry and records every call
/// except `runtime`.
pub struct FakeNpm {
    registry: BTreeMap<String, BTreeMap<String, FakePackage>>,
    pub calls: RefCell<Vec<String>>,
    pub fail_rebuild: Cell<bool>,
    pub install_stderr: RefCell<Option<String>>,
    /// Reported as the `error` of every listing, alongside the real tree.
    pub list_error: RefCell<Option<String>>,
    pub runtime: RefCell<RuntimeIdentity>,
}

pub fn runtime(node: &str) -> RuntimeIdentity {
    RuntimeIdentity {
        platform: "linux".to_owned(),
        arch: "x64".to_owned(),
        versions: BTreeMap::from([
            ("node".to_owned(), node.to_owned()),
            ("modules".to_owned(), "115".to_owned()),
        ]),
    }
}

pub fn spec(pairs: &[(&str, &str)]) -> DependencySpec {
    pairs.iter().copied().collect()
}

impl FakeNpm {
    pub fn new() -> Self {
        Self {
            registry: BTreeMap::new(),
            calls: RefCell::new(Vec::new()),
            fail_rebuild: Cell::new(false),
            install_stderr: RefCell::new(None),
            list_error: RefCell::new(None),
            runtime: RefCell::new(runtime("20.11.1")),
        }
    }

    /// Registry with `a@1.0.0 -> b@2.0.0`, `a@2.0.0`, `b@2.0.0`, `c@1.0.0`,
    /// native `native@1.0.0 -> helper@1.0.0`, `helper@1.0.0`, native
    /// `@scope/addon@3.0.0`, `plain@1.0.0`, and `weird@1.0.0` which ships a
    /// file named `lib/aux.js`.
    pub fn standard() -> Self {
        let mut npm = Self::new();
        npm.publish("a", "1.0.0", FakePackage {
            deps: BTreeMap::from([("b".to_owned(), "2.0.0".to_owned())]),
            ..FakePackage::default()
        });
        npm.publish("a", "2.0.0", FakePackage::default());
        npm.publish("b", "2.0.0", FakePackage::default());
        npm.publish("c", "1.0.0", FakePackage::default());
        npm.publish("native", "1.0.0", FakePackage {
            deps: BTreeMap::from([("helper".to_owned(), "1.0.0".to_owned())]),
            native: true,
            ..FakePackage::default()
        });
        npm.publish("helper", "1.0.0", FakePackage::default());
        npm.publish("@scope/addon", "3.0.0", FakePackage {
            native: true,
            ..FakePackage::default()
        });
        npm.publish("plain", "1.0.0", FakePackage::default());
        npm.publish("weird", "1.0.0", FakePackage {
            extra_files: vec!["lib/aux.js".to_owned()],
            ..FakePackage::default()
        });
        npm
    }

    pub fn publish(&mut self, name: &str, version: &str, package: FakePackage) {
        self.registry
            .entry(name.to_owned())
            .or_default()
            .insert(version.to_owned(), package);
    }

    pub fn set_runtime(&self, node: &str) {
        *self.runtime.borrow_mut() = runtime(node);
    }

    pub fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn materialize(&self, node_modules: &Path, name: &str, spec: &str) -> Result<(), String> {
        let Some(versions) = self.registry.get(name) else {
            return Err(format!(
                "npm ERR! code E404\nnpm ERR! 404 Not Found - GET https://registry.npmjs.org/{name} - Not found"
            ));
        };
        let Some(package) = versions.get(spec) else {
            return Err(format!(
                "npm ERR! code ETARGET\nnpm ERR! notarget No matching version found for {name}@{spec}."
            ));
        };

        let dir = node_modules.join(name);
        fs::create_dir_all(&dir).unwrap();
        let short = name.rsplit('/').next().unwrap_or(name);
        let manifest = json!({
            "name": name,
            "version": spec,
            "_from": format!("{name}@{spec}"),
            "_resolved": format!("https://registry.npmjs.org/{name}/-/{short}-{spec}.tgz"),
        });
        fs::write(dir.join("package.json"), manifest.to_string()).unwrap();
        fs::write(dir.join("index.js"), format!("module.exports = '{name}@{spec}';\n")).unwrap();
        if package.native {
            let addon = dir.join("build/Release/addon.node");
            fs::create_dir_all(addon.parent().unwrap()).unwrap();
            fs::write(addon, "built").unwrap();
        }
        for file in &package.extra_files {
            let path = dir.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        for (dep, version) in &package.deps {
            self.materialize(&dir.join("node_modules"), dep, version)?;
        }
        Ok(())
    }
}

impl PackageManager for FakeNpm {
    fn list_installed(&self, dir: &Path, _production_only: bool) -> ToolOutput {
        self.record("ls".to_owned());
        let mut output = match DependencyTree::read_installed(&dir.join("node_modules")) {
            Ok(tree) => ToolOutput::ok(serde_json::to_string(&tree).unwrap()),
            Err(e) => ToolOutput::failed(e.to_string()),
        };
        if let Some(error) = self.list_error.borrow().clone() {
            output.success = false;
            output.error = Some(error);
        }
        output
    }

    fn install(&self, dir: &Path, packages: &[String]) -> ToolOutput {
        self.record(format!("install {}", packages.join(" ")).trim_end().to_owned());
        if let Some(stderr) = self.install_stderr.borrow().clone() {
            return ToolOutput::failed(stderr);
        }

        let requests: Vec<(String, String)> = if packages.is_empty() {
            let manifest: Value =
                serde_json::from_str(&fs::read_to_string(dir.join("package.json")).unwrap()).unwrap();
            manifest["dependencies"]
                .as_object()
                .map(|deps| {
                    deps.iter()
                        .map(|(name, spec)| (name.clone(), spec.as_str().unwrap_or_default().to_owned()))
                        .collect()
                })
                .unwrap_or_default()
        } else {
            packages
                .iter()
                .map(|request| {
                    let at = request[1..].find('@').map(|i| i + 1).unwrap();
                    (request[..at].to_owned(), request[at + 1..].to_owned())
                })
                .collect()
        };

        for (name, spec) in requests {
            if let Err(stderr) = self.materialize(&dir.join("node_modules"), &name, &spec) {
                return ToolOutput::failed(stderr);
            }
        }
        ToolOutput::ok("")
    }

    fn rebuild(&self, dir: &Path) -> ToolOutput {
        self.record("rebuild".to_owned());
        if self.fail_rebuild.get() {
            return ToolOutput::failed("gyp ERR! build error\ngyp ERR! stack Error: `make` failed");
        }
        rebuild_addons(&dir.join("node_modules"));
        ToolOutput::ok("")
    }

    fn runtime(&self) -> Result<RuntimeIdentity, SyncError> {
        Ok(self.runtime.borrow().clone())
    }

    fn classify_install_failure(&self, request: &str, output: &ToolOutput) -> SyncError {
        classify_install_failure(request, output)
    }
}

/// Overwrite every `*.node` file under `dir`, without following symlinks.
fn rebuild_addons(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries {
        let entry = entry.unwrap();
        let file_type = entry.file_type().unwrap();
        let path = entry.path();
        if file_type.is_dir() {
            rebuild_addons(&path);
        } else if file_type.is_file() && path.extension().is_some_and(|ext| ext == "node") {
            fs::write(&path, "rebuilt").unwrap();
        }
    }
}

/// Every file under `dir` with its contents, keyed by relative path.
pub fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap().to_path_buf();
            let file_type = entry.file_type().unwrap();
            if file_type.is_dir() {
                out.insert(rel, Vec::new());
                walk(root, &path, out);
            } else if file_type.is_symlink() {
                out.insert(rel, fs::read_link(&path).unwrap().to_string_lossy().into_owned().into_bytes());
            } else {
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}

/// Names of entries directly inside `dir`.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
