//! Command-line interface definitions for pion.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Incremental build executor.
#[derive(Parser)]
#[command(name = "pion", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Maximum number of worker threads (0 or omitted = auto-detect from CPU count).
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,

    /// Artifact cache directory (default: build/cache under the project root).
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Force re-execution, bypassing all cache lookups.
    #[arg(long, short = 'f', global = true)]
    pub force: bool,

    /// Suppress per-rule output; show only errors and the final summary.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output with stale reasons and cache diagnostics.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Build one or more targets (rule names or output paths).
    Build(BuildArgs),
    /// List the rules declared in pion.rhai.
    List,
    /// Remove the artifact cache.
    Clean,
}

/// Arguments for the `build` subcommand.
#[derive(Parser)]
pub struct BuildArgs {
    /// Targets to build.
    #[arg(required = true)]
    pub targets: Vec<String>,
}
