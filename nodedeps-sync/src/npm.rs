//! `npm` driver and registry connectivity probe.

use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use nodedeps_core::RuntimeIdentity;

use crate::config::ToolConfig;
use crate::error::{AbortReason, SyncError};
use crate::tool::{ConnectivityProbe, PackageManager, ToolOutput};

/// Error codes npm prints when the registry cannot be reached.
const UNREACHABLE_CODES: &[&str] = &[
    "ENOTFOUND",
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "EAI_AGAIN",
    "ENETUNREACH",
];

const RUNTIME_SCRIPT: &str = "JSON.stringify({platform: process.platform, arch: process.arch, \
     versions: {node: process.versions.node, modules: process.versions.modules}})";

// ---------------------------------------------------------------------------
// NpmCli
// ---------------------------------------------------------------------------

/// [`PackageManager`] backed by the `npm` executable.
#[derive(Debug)]
pub struct NpmCli {
    config: ToolConfig,
    runtime: OnceLock<RuntimeIdentity>,
}

impl NpmCli {
    pub fn new(config: ToolConfig) -> Self {
        Self {
            config,
            runtime: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn npm(&self, dir: &Path, args: &[&str]) -> ToolOutput {
        tracing::debug!(dir = %dir.display(), ?args, "running npm");
        let mut command = Command::new(&self.config.npm_program);
        command
            .arg("--userconfig")
            .arg(&self.config.userconfig)
            .args(args)
            .current_dir(dir)
            .env("npm_config_update_notifier", "false");
        capture(command, self.config.max_output_bytes)
    }

    fn detect_runtime(&self) -> Result<RuntimeIdentity, SyncError> {
        let mut command = Command::new(&self.config.node_program);
        command.arg("-p").arg(RUNTIME_SCRIPT);
        let output = capture(command, self.config.max_output_bytes);
        if !output.success {
            return Err(SyncError::Tool {
                command: format!("{} -p", self.config.node_program.display()),
                detail: output.describe(),
            });
        }
        Ok(serde_json::from_str(output.stdout.trim())?)
    }
}

impl PackageManager for NpmCli {
    fn list_installed(&self, dir: &Path, production_only: bool) -> ToolOutput {
        if production_only {
            self.npm(dir, &["ls", "--json", "--long", "--production"])
        } else {
            self.npm(dir, &["ls", "--json", "--long"])
        }
    }

    fn install(&self, dir: &Path, packages: &[String]) -> ToolOutput {
        let mut args = vec!["install", "--no-audit", "--no-fund"];
        args.extend(packages.iter().map(String::as_str));
        self.npm(dir, &args)
    }

    fn rebuild(&self, dir: &Path) -> ToolOutput {
        self.npm(dir, &["rebuild", "--update-binary"])
    }

    fn runtime(&self) -> Result<RuntimeIdentity, SyncError> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime.clone());
        }
        let runtime = self.detect_runtime()?;
        let _ = self.runtime.set(runtime.clone());
        Ok(runtime)
    }

    fn classify_install_failure(&self, request: &str, output: &ToolOutput) -> SyncError {
        classify_install_failure(request, output)
    }
}

fn capture(mut command: Command, max_output_bytes: usize) -> ToolOutput {
    let output = match command.output() {
        Ok(output) => output,
        Err(err) => {
            return ToolOutput {
                success: false,
                error: Some(format!(
                    "failed to run {}: {err}",
                    command.get_program().to_string_lossy()
                )),
                ..ToolOutput::default()
            }
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let size = output.stdout.len() + output.stderr.len();
    if size > max_output_bytes {
        return ToolOutput {
            success: false,
            stdout,
            stderr,
            error: Some(format!("output exceeded {max_output_bytes} bytes")),
        };
    }

    let error = match output.status.code() {
        Some(_) => None,
        None => Some(format!("terminated abnormally ({})", output.status)),
    };
    ToolOutput {
        success: output.status.success(),
        stdout,
        stderr,
        error,
    }
}

/// Map a failed `npm install` to a recoverable abort where the failure is
/// an expected one.
pub fn classify_install_failure(request: &str, output: &ToolOutput) -> SyncError {
    let text = format!("{}\n{}", output.stderr, output.stdout);
    if UNREACHABLE_CODES.iter().any(|code| text.contains(code)) {
        return AbortReason::RegistryUnreachable {
            detail: output.describe(),
        }
        .into();
    }
    if text.contains("ETARGET") || text.contains("No matching version") {
        return AbortReason::VersionNotFound {
            request: request.to_owned(),
        }
        .into();
    }
    if text.contains("E404") || text.contains("404 Not Found") {
        return AbortReason::PackageNotFound {
            name: package_name(request).to_owned(),
        }
        .into();
    }
    SyncError::Tool {
        command: format!("npm install {request}"),
        detail: output.describe(),
    }
}

/// `name` out of `name@spec`, keeping a leading scope `@`.
fn package_name(request: &str) -> &str {
    request
        .get(1..)
        .and_then(|rest| rest.find('@'))
        .map(|i| &request[..i + 1])
        .unwrap_or(request)
}

// ---------------------------------------------------------------------------
// RegistryProbe
// ---------------------------------------------------------------------------

/// HEAD request against the registry; any HTTP answer counts as reachable.
#[derive(Debug, Clone)]
pub struct RegistryProbe {
    url: String,
    timeout: Duration,
}

impl RegistryProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        Self::new(config.probe_url.clone(), config.probe_timeout)
    }
}

impl ConnectivityProbe for RegistryProbe {
    fn check(&self) -> Result<(), AbortReason> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        match agent.head(&self.url).call() {
            Ok(_) | Err(ureq::Error::Status(..)) => Ok(()),
            Err(err) => Err(AbortReason::RegistryUnreachable {
                detail: format!("{}: {err}", self.url),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
