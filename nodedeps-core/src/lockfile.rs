//! Lock tree persistence.
//!
//! The lock file is the pretty-printed JSON form of a [`DependencyTree`]
//! followed by a single trailing newline. Writes go to a `.tmp` sibling and
//! are renamed into place, so readers never see a half-written lock.

use std::io::ErrorKind;
use std::path::Path;

use crate::error::{io_err, TreeError};
use crate::types::DependencyTree;

/// Serialize a tree exactly as it is written to disk.
pub fn to_string(tree: &DependencyTree) -> Result<String, TreeError> {
    let mut json = serde_json::to_string_pretty(tree)?;
    json.push('\n');
    Ok(json)
}

/// Load the lock tree at `path`.
///
/// Returns [`TreeError::LockNotFound`] if absent and [`TreeError::Parse`]
/// (with the path) if malformed.
pub fn load(path: &Path) -> Result<DependencyTree, TreeError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(TreeError::LockNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| TreeError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically save `tree` to `path`.
pub fn save(path: &Path, tree: &DependencyTree) -> Result<(), TreeError> {
    let json = to_string(tree)?;
    let Some(file_name) = path.file_name() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid lock file path"),
        ));
    };
    let tmp = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
