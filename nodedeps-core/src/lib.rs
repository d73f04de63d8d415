//! nodedeps core library: dependency-tree model and lock file persistence.
//!
//! Public API surface:
//! - [`types`]: specs, trees and runtime identity
//! - [`tree`]: minimization and subtree comparison
//! - [`lockfile`]: load / save of the persisted lock tree
//! - [`error`]: [`TreeError`]

pub mod error;
pub mod lockfile;
pub mod tree;
pub mod types;

pub use error::TreeError;
pub use tree::{is_subtree_of, minimize, Equivalence, MinimizedNode, MinimizedTree};
pub use types::{DependencyNode, DependencySpec, DependencyTree, RuntimeIdentity};
