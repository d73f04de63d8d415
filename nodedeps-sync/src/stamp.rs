//! Runtime identity records: per-package rebuild stamps and the runtime
//! record of a whole `node_modules` tree.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nodedeps_core::{Equivalence, RuntimeIdentity};

use crate::error::{io_err, SyncError};
use crate::layout::{runtime_record_path, REBUILD_STAMP};

// ---------------------------------------------------------------------------
// RebuildStamp
// ---------------------------------------------------------------------------

/// Records the runtime a package's native artifacts were last built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildStamp {
    #[serde(flatten)]
    pub runtime: RuntimeIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuilt_at: Option<DateTime<Utc>>,
}

impl RebuildStamp {
    pub fn new(runtime: RuntimeIdentity) -> Self {
        Self {
            runtime,
            rebuilt_at: Some(Utc::now()),
        }
    }

    pub fn path(package_dir: &Path) -> PathBuf {
        package_dir.join(REBUILD_STAMP)
    }

    /// `None` when the stamp is missing or unreadable.
    pub fn read(package_dir: &Path) -> Option<Self> {
        let text = fs::read_to_string(Self::path(package_dir)).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Best effort; a lost stamp only costs a redundant rebuild.
    pub fn write(&self, package_dir: &Path) {
        let path = Self::path(package_dir);
        let result = serde_json::to_string_pretty(self)
            .map_err(std::io::Error::from)
            .and_then(|json| fs::write(&path, json + "\n"));
        if let Err(e) = result {
            tracing::debug!(path = %path.display(), error = %e, "could not write rebuild stamp");
        }
    }

    pub fn is_compatible_with(&self, current: &RuntimeIdentity) -> bool {
        current.is_compatible_with(&self.runtime)
    }
}

// ---------------------------------------------------------------------------
// RuntimeRecord
// ---------------------------------------------------------------------------

/// Runtime a dependency root was installed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeRecord {
    Structured(RuntimeIdentity),
    /// Older roots stored only the runtime version string.
    Legacy { node: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeRecordCompat {
    Structured(RuntimeIdentity),
    Legacy(String),
}

impl RuntimeRecord {
    /// `None` when the record is missing or unparsable.
    pub fn read(node_modules: &Path) -> Option<Self> {
        let text = fs::read_to_string(runtime_record_path(node_modules)).ok()?;
        let text = text.trim();
        match serde_json::from_str::<RuntimeRecordCompat>(text) {
            Ok(RuntimeRecordCompat::Structured(runtime)) => Some(Self::Structured(runtime)),
            Ok(RuntimeRecordCompat::Legacy(node)) => Some(Self::Legacy { node }),
            // Bare `v20.11.1` without quotes.
            Err(_) if !text.is_empty() && !text.contains(['{', '[', '"']) => Some(Self::Legacy {
                node: text.to_owned(),
            }),
            Err(_) => None,
        }
    }

    pub fn is_compatible_with(&self, current: &RuntimeIdentity) -> bool {
        match self {
            Self::Structured(recorded) => current.is_compatible_with(recorded),
            Self::Legacy { node } => current.versions.get("node").is_some_and(|version| {
                Equivalence::MajorMinor
                    .leaves_match(&Value::String(version.clone()), &Value::String(node.clone()))
            }),
        }
    }
}

/// Write the runtime record of a freshly installed `node_modules`.
pub fn write_runtime_record(node_modules: &Path, runtime: &RuntimeIdentity) -> Result<(), SyncError> {
    let path = runtime_record_path(node_modules);
    let json = serde_json::to_string_pretty(runtime)?;
    fs::write(&path, json + "\n").map_err(|e| io_err(&path, e))
}
