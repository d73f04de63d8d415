//! `nodedeps rebuild`: rebuild native packages for the current runtime.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use nodedeps_sync::{NativeRebuild, NpmCli, StagingRegistry, ToolConfig};

/// Arguments for `nodedeps rebuild`.
#[derive(Args, Debug)]
pub struct RebuildArgs {
    /// The node_modules directory to scan.
    pub node_modules: PathBuf,
}

impl RebuildArgs {
    pub fn run(self, registry: &StagingRegistry) -> Result<()> {
        let npm = NpmCli::new(ToolConfig::from_env());
        let rebuilt = NativeRebuild::new(&npm, registry)
            .rebuild_if_non_portable(&self.node_modules)
            .with_context(|| format!("rebuild failed for {}", self.node_modules.display()))?;

        if rebuilt {
            println!("{} rebuilt native packages in {}", "✓".green().bold(), self.node_modules.display());
        } else {
            println!("{} nothing to rebuild in {}", "·".bold(), self.node_modules.display());
        }
        Ok(())
    }
}
