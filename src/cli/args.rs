//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Strata - Content-addressed build cache engine
///
/// Plans and executes staged builds, reusing cached step outputs
/// whenever the step's command and inputs are unchanged.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a build from a buildfile
    Build(BuildArgs),

    /// Manage the cache store
    Cache(CacheArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Path to the buildfile
    #[arg(short, long, default_value = "strata.toml")]
    pub file: PathBuf,

    /// Build context directory (defaults to the buildfile's directory)
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// Target platforms (os/arch, comma-separated), overriding the buildfile
    #[arg(long, value_delimiter = ',')]
    pub platform: Vec<String>,

    /// Directory to write final bundles into
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache store statistics
    Status,

    /// Remove cache entries older than a cutoff
    Prune {
        /// Remove entries unused for more than N days (default: from config)
        #[arg(long)]
        older_than: Option<u32>,
    },
}
