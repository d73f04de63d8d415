//! Tool configuration.
//!
//! Defaults exclude the user's ambient npm configuration: every invocation
//! passes `--userconfig` pointing at the null device unless overridden.

use std::path::PathBuf;
use std::time::Duration;

use nodedeps_core::tree::DEFAULT_REGISTRY;

pub const NPM_PROGRAM_ENV: &str = "NODEDEPS_NPM";
pub const NODE_PROGRAM_ENV: &str = "NODEDEPS_NODE";
pub const USERCONFIG_ENV: &str = "NODEDEPS_NPMRC";
pub const PROBE_URL_ENV: &str = "NODEDEPS_REGISTRY_PROBE_URL";

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// How the external package manager and the connectivity probe are invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub npm_program: PathBuf,
    pub node_program: PathBuf,
    /// Passed as `--userconfig` on every invocation.
    pub userconfig: PathBuf,
    /// Combined stdout + stderr above this size fails the invocation.
    pub max_output_bytes: usize,
    pub probe_url: String,
    pub probe_timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            npm_program: PathBuf::from(if cfg!(windows) { "npm.cmd" } else { "npm" }),
            node_program: PathBuf::from("node"),
            userconfig: PathBuf::from(NULL_DEVICE),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            probe_url: DEFAULT_REGISTRY.to_owned(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ToolConfig {
    /// Defaults overridden by `NODEDEPS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(npm) = set(NPM_PROGRAM_ENV) {
            config.npm_program = PathBuf::from(npm);
        }
        if let Some(node) = set(NODE_PROGRAM_ENV) {
            config.node_program = PathBuf::from(node);
        }
        if let Some(rc) = set(USERCONFIG_ENV) {
            config.userconfig = PathBuf::from(rc);
        }
        if let Some(url) = set(PROBE_URL_ENV) {
            config.probe_url = url;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let env = HashMap::from([
            (PROBE_URL_ENV, "http://localhost:4873/"),
            (USERCONFIG_ENV, "/etc/nodedeps/npmrc"),
        ]);
        let config = ToolConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.probe_url, "http://localhost:4873/");
        assert_eq!(config.userconfig, PathBuf::from("/etc/nodedeps/npmrc"));
        assert_eq!(config.node_program, PathBuf::from("node"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = ToolConfig::from_lookup(|k| (k == PROBE_URL_ENV).then(|| "  ".to_string()));
        assert_eq!(config.probe_url, DEFAULT_REGISTRY);
    }
}
