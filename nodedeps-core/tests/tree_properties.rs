//! Property tests for tree minimization and subtree comparison.

use std::collections::BTreeMap;

use nodedeps_core::{minimize, DependencyNode, DependencyTree};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn version() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
        Just("https://example.com/pkg-1.0.0.tgz".to_string()),
        "git\\+https://host/[a-z]{1,4}\\.git#v[0-9]",
    ]
}

fn resolved() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop_oneof![
        "https://registry\\.npmjs\\.org/[a-z]{1,4}/-/[a-z]{1,4}\\.tgz",
        "https://mirror\\.example\\.com/[a-z]{1,4}\\.tgz",
    ])
}

fn from() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop_oneof![
        "[a-z]{1,4}@\\^[0-9]\\.0\\.0",
        "[a-z]{1,4}@github:[a-z]{1,4}/[a-z]{1,4}",
    ])
}

fn node() -> impl Strategy<Value = DependencyNode> {
    let leaf = (version(), resolved(), from()).prop_map(|(version, resolved, from)| {
        DependencyNode {
            version,
            resolved,
            from,
            dependencies: None,
        }
    });
    leaf.prop_recursive(3, 32, 4, |inner| {
        (
            version(),
            resolved(),
            from(),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4),
        )
            .prop_map(|(version, resolved, from, children)| DependencyNode {
                version,
                resolved,
                from,
                dependencies: Some(children),
            })
    })
}

fn tree() -> impl Strategy<Value = DependencyTree> {
    prop::collection::btree_map("(@[a-z]{1,3}/)?[a-z]{1,6}", node(), 0..5)
        .prop_map(|dependencies| DependencyTree { dependencies })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Drop dependency entries (at any depth) according to `mask`.
fn prune(
    deps: &BTreeMap<String, DependencyNode>,
    mask: &[bool],
    cursor: &mut usize,
) -> BTreeMap<String, DependencyNode> {
    let mut kept = BTreeMap::new();
    for (name, node) in deps {
        let keep = mask[*cursor % mask.len()];
        *cursor += 1;
        if !keep {
            continue;
        }
        let mut node = node.clone();
        if let Some(children) = &node.dependencies {
            node.dependencies = Some(prune(children, mask, cursor));
        }
        kept.insert(name.clone(), node);
    }
    kept
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn minimized_tree_is_subtree_of_itself(t in tree()) {
        prop_assert!(minimize(&t).is_subtree_of(&minimize(&t)));
    }

    #[test]
    fn minimization_preserves_containment(
        b in tree(),
        mask in prop::collection::vec(any::<bool>(), 1..32),
    ) {
        let mut cursor = 0;
        let a = DependencyTree { dependencies: prune(&b.dependencies, &mask, &mut cursor) };
        prop_assert!(minimize(&a).is_subtree_of(&minimize(&b)));
    }

    #[test]
    fn minimize_is_deterministic(t in tree()) {
        prop_assert_eq!(minimize(&t), minimize(&t.clone()));
    }
}
