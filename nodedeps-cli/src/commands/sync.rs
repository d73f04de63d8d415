//! `nodedeps sync`: bring a dependency root in line with a declared spec.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use nodedeps_core::DependencySpec;
use nodedeps_sync::{DependencySync, NpmCli, RegistryProbe, StagingRegistry, ToolConfig};

/// Arguments for `nodedeps sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Dependency root to manage (holds npm-shrinkwrap.json and node_modules).
    pub dep_root: PathBuf,

    /// Component name used in logs and the working manifest. Defaults to the
    /// name of the directory containing the dependency root.
    #[arg(long)]
    pub name: Option<String>,

    /// A dependency as `name=spec`; repeatable. Overrides `--spec-file`.
    #[arg(long = "dep", value_name = "NAME=SPEC", value_parser = parse_dep)]
    pub deps: Vec<(String, String)>,

    /// JSON object mapping package names to specs. `{}` removes the root.
    #[arg(long)]
    pub spec_file: Option<PathBuf>,

    /// Remove the dependency root.
    #[arg(long, conflicts_with_all = ["deps", "spec_file"])]
    pub remove: bool,

    /// Do not check registry connectivity before installing.
    #[arg(long)]
    pub skip_probe: bool,
}

impl SyncArgs {
    pub fn run(self, registry: &StagingRegistry) -> Result<()> {
        let name = self.component_name();
        let desired = self.desired()?;

        let npm = NpmCli::new(ToolConfig::from_env());
        let probe = RegistryProbe::from_config(npm.config());
        let mut sync = DependencySync::new(&npm, registry);
        if !self.skip_probe {
            sync = sync.with_probe(&probe);
        }

        let installed = sync
            .sync(&name, &self.dep_root, &desired)
            .with_context(|| format!("sync failed for '{name}'"))?;

        if installed {
            println!("{} '{name}' dependencies installed ({} declared)", "✓".green().bold(), desired.len());
        } else if desired.is_empty() {
            println!("{} '{name}' has no dependencies", "·".bold());
        } else {
            println!(
                "{} '{name}' dependencies were not installed; see the log above",
                "!".yellow().bold()
            );
        }
        Ok(())
    }

    fn component_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.dep_root
                .canonicalize()
                .unwrap_or_else(|_| self.dep_root.clone())
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "nodedeps".to_string())
        })
    }

    fn desired(&self) -> Result<DependencySpec> {
        if self.remove {
            return Ok(DependencySpec::new());
        }
        if self.deps.is_empty() && self.spec_file.is_none() {
            bail!("no dependencies declared; pass --dep, --spec-file or --remove");
        }
        let mut desired = match &self.spec_file {
            Some(path) => read_spec_file(path)?,
            None => DependencySpec::new(),
        };
        for (name, spec) in &self.deps {
            desired.insert(name.as_str(), spec.as_str());
        }
        Ok(desired)
    }
}

fn read_spec_file(path: &Path) -> Result<DependencySpec> {
    let text = fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a name-to-spec JSON object", path.display()))
}

fn parse_dep(s: &str) -> std::result::Result<(String, String), String> {
    let (name, spec) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=SPEC, got '{s}'"))?;
    if name.is_empty() || spec.is_empty() {
        return Err(format!("expected NAME=SPEC, got '{s}'"));
    }
    Ok((name.to_owned(), spec.to_owned()))
}
