//! `nodedeps portable`: report whether installed packages are portable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use nodedeps_sync::dependencies_are_portable;

/// Arguments for `nodedeps portable`.
#[derive(Args, Debug)]
pub struct PortableArgs {
    /// The node_modules directory to inspect.
    pub node_modules: PathBuf,

    /// Print `true` or `false` as JSON instead of a sentence.
    #[arg(long)]
    pub json: bool,
}

impl PortableArgs {
    pub fn run(self) -> Result<()> {
        let portable = dependencies_are_portable(&self.node_modules)
            .with_context(|| format!("could not inspect {}", self.node_modules.display()))?;

        if self.json {
            println!("{}", serde_json::Value::Bool(portable));
        } else if portable {
            println!("{} {} is portable", "✓".green().bold(), self.node_modules.display());
        } else {
            println!(
                "{} {} contains native artifacts",
                "■".yellow().bold(),
                self.node_modules.display()
            );
        }
        Ok(())
    }
}
