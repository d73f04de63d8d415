//! Tree minimization and subtree comparison.
//!
//! Comparisons never run on raw trees. Installed, locked and desired trees are
//! first reduced to a [`MinimizedTree`] in which each node carries a single
//! canonical version string, then compared with [`is_subtree_of`].
//!
//! Canonical version priority, highest first:
//! 1. a `resolved` locator outside the default registry (forks, overrides)
//! 2. a direct source location in `version` or in the spec part of `from`
//! 3. the plain `version`

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::types::{DependencyNode, DependencySpec, DependencyTree};

/// Registry whose `resolved` URLs carry no information beyond the version.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

const SOURCE_PREFIXES: &[&str] = &[
    "git+", "git://", "git@", "github:", "gitlab:", "bitbucket:", "file:",
];

// ---------------------------------------------------------------------------
// Leaf equivalence
// ---------------------------------------------------------------------------

/// How two leaf values are compared by [`is_subtree_of`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Equivalence {
    /// Leaves must be equal.
    #[default]
    Strict,
    /// Dotted numeric version strings match when major and minor agree;
    /// anything else falls back to strict equality.
    MajorMinor,
}

impl Equivalence {
    pub fn leaves_match(self, a: &Value, b: &Value) -> bool {
        match self {
            Equivalence::Strict => a == b,
            Equivalence::MajorMinor => match (a, b) {
                (Value::String(a), Value::String(b)) => {
                    match (major_minor(a), major_minor(b)) {
                        (Some(a), Some(b)) => a == b,
                        _ => a == b,
                    }
                }
                _ => a == b,
            },
        }
    }
}

fn major_minor(version: &str) -> Option<(u64, u64)> {
    let version = version.strip_prefix('v').unwrap_or(version);
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(minor) => minor.parse().ok()?,
        None => 0,
    };
    Some((major, minor))
}

/// Asymmetric structural containment: `a` is a subtree of `b` when every key
/// of every mapping in `a` is present in `b` with a contained value. Keys only
/// present in `b` are ignored.
pub fn is_subtree_of(a: &Value, b: &Value, equivalence: Equivalence) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => a.iter().all(|(key, a_child)| {
            b.get(key)
                .is_some_and(|b_child| is_subtree_of(a_child, b_child, equivalence))
        }),
        _ => equivalence.leaves_match(a, b),
    }
}

// ---------------------------------------------------------------------------
// Canonical versions
// ---------------------------------------------------------------------------

/// `true` if `spec` points at a source location rather than a registry version.
pub fn is_source_locator(spec: &str) -> bool {
    spec.contains("://")
        || SOURCE_PREFIXES.iter().any(|p| spec.starts_with(p))
        || spec.ends_with(".tgz")
        || spec.ends_with(".tar.gz")
}

/// The spec half of a `name@spec` string, when it is a source locator.
fn from_source_locator(from: &str) -> Option<&str> {
    // Scoped names start with '@', so the separator is searched after byte 0.
    let spec = from.get(1..).and_then(|rest| rest.find('@')).map(|i| &from[i + 2..]);
    match spec {
        Some(spec) if is_source_locator(spec) => Some(spec),
        _ if is_source_locator(from) => Some(from),
        _ => None,
    }
}

/// The node's source location if it was installed from one, otherwise its
/// version.
pub fn canonical_version(node: &DependencyNode) -> &str {
    if is_source_locator(&node.version) {
        return &node.version;
    }
    node.from
        .as_deref()
        .and_then(from_source_locator)
        .unwrap_or(&node.version)
}

fn is_default_registry(resolved: &str) -> bool {
    resolved.starts_with(DEFAULT_REGISTRY)
        || resolved.starts_with("http://registry.npmjs.org/")
}

// ---------------------------------------------------------------------------
// MinimizedTree
// ---------------------------------------------------------------------------

/// Comparison-only node: a canonical version plus optional children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimizedNode {
    pub version: String,
    pub dependencies: Option<BTreeMap<String, MinimizedNode>>,
}

/// Comparison-only form of a [`DependencyTree`]. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MinimizedTree {
    pub dependencies: BTreeMap<String, MinimizedNode>,
}

impl MinimizedTree {
    /// Minimized desired tree, built straight from a `DependencySpec`.
    pub fn from_spec(spec: &DependencySpec) -> Self {
        minimize(&DependencyTree::desired(spec))
    }

    /// Strict containment of `self` in `other`.
    pub fn is_subtree_of(&self, other: &MinimizedTree) -> bool {
        is_subtree_of(&self.to_value(), &other.to_value(), Equivalence::Strict)
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("dependencies".into(), deps_to_value(&self.dependencies));
        Value::Object(map)
    }
}

fn deps_to_value(deps: &BTreeMap<String, MinimizedNode>) -> Value {
    Value::Object(
        deps.iter()
            .map(|(name, node)| (name.clone(), node_to_value(node)))
            .collect(),
    )
}

fn node_to_value(node: &MinimizedNode) -> Value {
    let mut map = Map::new();
    map.insert("version".into(), Value::String(node.version.clone()));
    if let Some(children) = &node.dependencies {
        map.insert("dependencies".into(), deps_to_value(children));
    }
    Value::Object(map)
}

/// Reduce a tree to `{version, dependencies?}` per node.
pub fn minimize(tree: &DependencyTree) -> MinimizedTree {
    MinimizedTree {
        dependencies: minimize_deps(&tree.dependencies),
    }
}

fn minimize_deps(deps: &BTreeMap<String, DependencyNode>) -> BTreeMap<String, MinimizedNode> {
    deps.iter()
        .map(|(name, node)| (name.clone(), minimize_node(node)))
        .collect()
}

fn minimize_node(node: &DependencyNode) -> MinimizedNode {
    let version = match node.resolved.as_deref() {
        Some(resolved) if !resolved.is_empty() && !is_default_registry(resolved) => {
            resolved.to_owned()
        }
        _ => canonical_version(node).to_owned(),
    };
    MinimizedNode {
        version,
        dependencies: node.dependencies.as_ref().map(minimize_deps),
    }
}

impl DependencyTree {
    pub fn minimize(&self) -> MinimizedTree {
        minimize(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn node(version: &str, resolved: Option<&str>, from: Option<&str>) -> DependencyNode {
        DependencyNode {
            version: version.to_owned(),
            resolved: resolved.map(str::to_owned),
            from: from.map(str::to_owned),
            dependencies: None,
        }
    }

    #[rstest]
    #[case::plain("1.2.3", None, "1.2.3")]
    #[case::registry_from("1.2.3", Some("a@^1.0.0"), "1.2.3")]
    #[case::tarball_from("1.2.3", Some("a@https://example.com/a.tgz"), "https://example.com/a.tgz")]
    #[case::scoped_git_from("0.1.0", Some("@s/a@git+https://host/s/a.git#v1"), "git+https://host/s/a.git#v1")]
    #[case::git_ssh_from("0.1.0", Some("git@github.com:s/a.git"), "git@github.com:s/a.git")]
    #[case::url_version("https://example.com/a.tgz", None, "https://example.com/a.tgz")]
    fn canonical_version_prefers_source_location(
        #[case] version: &str,
        #[case] from: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(canonical_version(&node(version, None, from)), expected);
    }

    #[test]
    fn non_registry_resolved_wins_over_version() {
        let mut tree = DependencyTree::default();
        tree.dependencies.insert(
            "fork".into(),
            node("1.0.0", Some("https://mirror.example.com/fork-1.0.0.tgz"), Some("fork@1.0.0")),
        );
        tree.dependencies.insert(
            "plain".into(),
            node("2.0.0", Some("https://registry.npmjs.org/plain/-/plain-2.0.0.tgz"), None),
        );
        let min = minimize(&tree);
        assert_eq!(
            min.dependencies["fork"].version,
            "https://mirror.example.com/fork-1.0.0.tgz"
        );
        assert_eq!(min.dependencies["plain"].version, "2.0.0");
    }

    #[test]
    fn minimize_keeps_nested_shape() {
        let mut child = node("3.0.0", None, None);
        child.dependencies = Some(BTreeMap::from([("leaf".to_owned(), node("0.0.1", None, None))]));
        let mut parent = node("1.0.0", None, None);
        parent.dependencies = Some(BTreeMap::from([("child".to_owned(), child)]));
        let tree = DependencyTree {
            dependencies: BTreeMap::from([("parent".to_owned(), parent)]),
        };

        let value = minimize(&tree).to_value();
        assert_eq!(
            value,
            json!({"dependencies": {"parent": {"version": "1.0.0", "dependencies": {
                "child": {"version": "3.0.0", "dependencies": {"leaf": {"version": "0.0.1"}}}
            }}}})
        );
    }

    #[test]
    fn subtree_ignores_keys_only_in_b() {
        let a = json!({"x": {"version": "1"}});
        let b = json!({"x": {"version": "1", "dependencies": {"y": {"version": "2"}}}, "z": 1});
        assert!(is_subtree_of(&a, &b, Equivalence::Strict));
        assert!(!is_subtree_of(&b, &a, Equivalence::Strict));
    }

    #[test]
    fn subtree_fails_on_missing_key_or_leaf_mismatch() {
        let b = json!({"x": {"version": "1"}});
        assert!(!is_subtree_of(&json!({"w": {"version": "1"}}), &b, Equivalence::Strict));
        assert!(!is_subtree_of(&json!({"x": {"version": "2"}}), &b, Equivalence::Strict));
        assert!(!is_subtree_of(&json!({"x": "1"}), &b, Equivalence::Strict));
    }

    #[test]
    fn subtree_of_same_reference_is_true() {
        let a = json!({"x": {"version": "1"}});
        assert!(is_subtree_of(&a, &a, Equivalence::Strict));
    }

    #[rstest]
    #[case("20.11.1", "20.11.0", true)]
    #[case("v20.11.1", "20.11.9", true)]
    #[case("20.12.0", "20.11.0", false)]
    #[case("115", "115", true)]
    #[case("115", "108", false)]
    #[case("linux", "linux", true)]
    #[case("linux", "darwin", false)]
    #[case("1.2.3-beta", "1.2.4", true)]
    fn major_minor_equivalence(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
        assert_eq!(
            Equivalence::MajorMinor.leaves_match(&json!(a), &json!(b)),
            expected
        );
    }

    #[test]
    fn desired_spec_is_contained_in_installed() {
        let spec = DependencySpec::from([("a", "1.0.0")]);
        let mut installed = DependencyTree::default();
        let mut a = node("1.0.0", None, Some("a@1.0.0"));
        a.dependencies = Some(BTreeMap::from([("b".to_owned(), node("2.0.0", None, None))]));
        installed.dependencies.insert("a".into(), a);
        installed.dependencies.insert("extra".into(), node("9.9.9", None, None));

        assert!(MinimizedTree::from_spec(&spec).is_subtree_of(&installed.minimize()));
    }
}
