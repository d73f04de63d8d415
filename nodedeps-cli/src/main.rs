//! nodedeps: keep per-component npm dependency roots in sync.
//!
//! # Usage
//!
//! ```text
//! nodedeps sync <dep-root> [--name <name>] (--dep name=spec... | --spec-file deps.json | --remove) [--skip-probe]
//! nodedeps rebuild <node_modules>
//! nodedeps portable <node_modules>
//! ```
//!
//! Log verbosity is read from `NODEDEPS_LOG` (default `info`).

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{portable::PortableArgs, rebuild::RebuildArgs, sync::SyncArgs};
use nodedeps_sync::StagingRegistry;

const LOG_ENV: &str = "NODEDEPS_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "nodedeps",
    version,
    about = "Crash-safe npm dependency roots and native rebuilds",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install, update or remove the dependencies of a dependency root.
    Sync(SyncArgs),

    /// Rebuild native packages whose build does not match the current runtime.
    Rebuild(RebuildArgs),

    /// Report whether a node_modules directory contains native artifacts.
    Portable(PortableArgs),
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let registry = StagingRegistry::new();
    let result = match cli.command {
        Commands::Sync(args) => args.run(&registry),
        Commands::Rebuild(args) => args.run(&registry),
        Commands::Portable(args) => args.run(),
    };

    let drained = registry.drain_all();
    if drained > 0 {
        tracing::debug!(drained, "removed leftover staging directories");
    }
    result
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
