//! Boundary to the external package manager and the connectivity probe.

use std::path::Path;

use nodedeps_core::RuntimeIdentity;

use crate::error::{AbortReason, SyncError};

/// Captured result of one external tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Spawn failures, signals and output overflow.
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Short human-readable failure summary: the error, else the tail of
    /// stderr.
    pub fn describe(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(5);
        let tail = lines[start..].join("\n");
        if tail.is_empty() {
            "no output".to_string()
        } else {
            tail
        }
    }
}

/// The external package manager.
///
/// Implementations run at most one invocation at a time and never retry.
pub trait PackageManager {
    /// Structured tree of what is installed under `dir/node_modules`.
    fn list_installed(&self, dir: &Path, production_only: bool) -> ToolOutput;

    /// Install `packages` (`name@spec`) into `dir`, or everything declared by
    /// the manifest in `dir` when `packages` is empty.
    fn install(&self, dir: &Path, packages: &[String]) -> ToolOutput;

    /// Rebuild native artifacts of every package under `dir/node_modules`.
    fn rebuild(&self, dir: &Path) -> ToolOutput;

    /// Identity of the runtime artifacts are built for.
    fn runtime(&self) -> Result<RuntimeIdentity, SyncError>;

    /// Map a failed install of `request` to an error. Expected failures
    /// become [`SyncError::Recoverable`].
    fn classify_install_failure(&self, request: &str, output: &ToolOutput) -> SyncError {
        SyncError::Tool {
            command: format!("install {request}"),
            detail: output.describe(),
        }
    }
}

/// Fail-fast check run before network-bound installs.
pub trait ConnectivityProbe {
    fn check(&self) -> Result<(), AbortReason>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_prefers_error_then_stderr_tail() {
        let mut out = ToolOutput::failed("a\n\nb\nc\nd\ne\nf\n");
        assert_eq!(out.describe(), "b\nc\nd\ne\nf");
        out.error = Some("spawn failed".into());
        assert_eq!(out.describe(), "spawn failed");
        assert_eq!(ToolOutput::failed("").describe(), "no output");
    }
}
