//! Domain types for dependency synchronization.
//!
//! Trees own their children outright; every mapping is a `BTreeMap` so that
//! serialized lock files are stable across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{io_err, TreeError};
use crate::tree::{is_subtree_of, Equivalence};

// ---------------------------------------------------------------------------
// DependencySpec
// ---------------------------------------------------------------------------

/// Desired dependencies: package name to version or direct source location.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencySpec(pub BTreeMap<String, String>);

impl DependencySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: impl Into<String>) {
        self.0.insert(name.into(), spec.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DependencySpec {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&str, &str); N]> for DependencySpec {
    fn from(entries: [(&str, &str); N]) -> Self {
        entries.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// DependencyTree
// ---------------------------------------------------------------------------

/// One node of an installed, locked or desired tree.
///
/// Unknown fields (as emitted by `npm ls --json --long`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyNode {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, DependencyNode>>,
}

impl DependencyNode {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }
}

/// Root of a dependency tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyTree {
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyNode>,
}

/// The subset of an installed `package.json` the tree reader cares about.
#[derive(Debug, Deserialize)]
struct InstalledManifest {
    #[serde(default)]
    version: Option<String>,
    #[serde(default, rename = "_resolved")]
    resolved: Option<String>,
    #[serde(default, rename = "_from")]
    from: Option<String>,
}

impl DependencyTree {
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Synthesize the desired tree `{name: {version: spec}}`.
    pub fn desired(spec: &DependencySpec) -> Self {
        Self {
            dependencies: spec
                .iter()
                .map(|(name, version)| (name.clone(), DependencyNode::new(version.as_str())))
                .collect(),
        }
    }

    /// Parse the structured output of the tool's "list installed" command.
    ///
    /// Entries the tool reports without a version (missing or invalid
    /// packages) are dropped.
    pub fn from_listing(listing: &str) -> Result<Self, TreeError> {
        let mut tree: DependencyTree = serde_json::from_str(listing)?;
        prune_unversioned(&mut tree.dependencies);
        Ok(tree)
    }

    /// Build the installed tree by reading `package.json` files under
    /// `node_modules`, without invoking any external tool.
    ///
    /// Hidden entries are skipped, `@scope` directories are expanded and a
    /// missing directory yields an empty tree.
    pub fn read_installed(node_modules: &Path) -> Result<Self, TreeError> {
        Ok(Self {
            dependencies: read_installed_dir(node_modules)?,
        })
    }
}

fn prune_unversioned(deps: &mut BTreeMap<String, DependencyNode>) {
    deps.retain(|_, node| !node.version.is_empty());
    for node in deps.values_mut() {
        if let Some(children) = node.dependencies.as_mut() {
            prune_unversioned(children);
            if children.is_empty() {
                node.dependencies = None;
            }
        }
    }
}

fn read_installed_dir(dir: &Path) -> Result<BTreeMap<String, DependencyNode>, TreeError> {
    let mut deps = BTreeMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(deps),
        Err(err) => return Err(io_err(dir, err)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if name.starts_with('@') && path.is_dir() {
            let scoped = fs::read_dir(&path).map_err(|e| io_err(&path, e))?;
            for scoped_entry in scoped {
                let scoped_entry = scoped_entry.map_err(|e| io_err(&path, e))?;
                let child = scoped_entry.file_name().to_string_lossy().into_owned();
                if child.starts_with('.') {
                    continue;
                }
                if let Some(node) = read_installed_package(&scoped_entry.path())? {
                    deps.insert(format!("{name}/{child}"), node);
                }
            }
            continue;
        }
        if let Some(node) = read_installed_package(&path)? {
            deps.insert(name, node);
        }
    }
    Ok(deps)
}

fn read_installed_package(dir: &Path) -> Result<Option<DependencyNode>, TreeError> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let manifest_path = dir.join("package.json");
    let contents = match fs::read_to_string(&manifest_path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&manifest_path, err)),
    };
    let manifest: InstalledManifest =
        serde_json::from_str(&contents).map_err(|source| TreeError::Parse {
            path: manifest_path.clone(),
            source,
        })?;

    let children = read_installed_dir(&dir.join("node_modules"))?;
    Ok(Some(DependencyNode {
        version: manifest.version.unwrap_or_default(),
        resolved: manifest.resolved,
        from: manifest.from,
        dependencies: (!children.is_empty()).then_some(children),
    }))
}

// ---------------------------------------------------------------------------
// RuntimeIdentity
// ---------------------------------------------------------------------------

/// The runtime that compiled artifacts are built against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    pub platform: String,
    pub arch: String,
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
}

impl RuntimeIdentity {
    /// `true` when artifacts built for `recorded` can be used by `self`:
    /// platform and arch must match exactly, every runtime version `self`
    /// knows about must match at major.minor granularity.
    pub fn is_compatible_with(&self, recorded: &RuntimeIdentity) -> bool {
        is_subtree_of(&self.to_value(), &recorded.to_value(), Equivalence::MajorMinor)
    }

    pub fn to_value(&self) -> Value {
        let versions: Map<String, Value> = self
            .versions
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut map = Map::new();
        map.insert("platform".into(), Value::String(self.platform.clone()));
        map.insert("arch".into(), Value::String(self.arch.clone()));
        map.insert("versions".into(), Value::Object(versions));
        Value::Object(map)
    }
}

impl fmt::Display for RuntimeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.arch)?;
        for (name, version) in &self.versions {
            write!(f, " {name}@{version}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
