//! # nodedeps-sync
//!
//! Crash-safe synchronization of a dependency root and native rebuilds of
//! its installed packages.
//!
//! Call [`DependencySync::sync`] to bring a dependency root in line with a
//! [`DependencySpec`](nodedeps_core::DependencySpec), and
//! [`NativeRebuild::rebuild_if_non_portable`] to rebuild compiled artifacts
//! for the current runtime. Both stage their work through a
//! [`Transaction`] registered in a [`StagingRegistry`] the host drains on
//! shutdown.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod layout;
pub mod npm;
pub mod orchestrator;
pub mod portability;
pub mod rebuild;
pub mod stamp;
pub mod tool;
pub mod transaction;

pub use config::ToolConfig;
pub use error::{AbortReason, SyncError};
pub use npm::{NpmCli, RegistryProbe};
pub use orchestrator::DependencySync;
pub use portability::{dependencies_are_portable, is_portable, PortabilityMarker};
pub use rebuild::NativeRebuild;
pub use stamp::{RebuildStamp, RuntimeRecord};
pub use tool::{ConnectivityProbe, PackageManager, ToolOutput};
pub use transaction::{StagingRegistry, Transaction};
