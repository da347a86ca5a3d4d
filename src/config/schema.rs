//! Configuration schema

use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Strata configuration (`config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache store settings
    pub store: StoreConfig,
    /// Build defaults
    pub build: BuildConfig,
    /// Prune policy defaults
    pub prune: PruneConfig,
}

/// Cache store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root; falls back to the state directory when unset
    pub dir: Option<PathBuf>,
}

/// Build defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Platforms built when neither the CLI nor the buildfile specify any
    pub platforms: Vec<Platform>,
    /// Directory bundles are written under, per platform
    pub output_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            platforms: vec![Platform::host()],
            output_dir: PathBuf::from("strata-out"),
        }
    }
}

/// Prune policy defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneConfig {
    /// Entries unused for this many days are eligible for `cache prune`
    pub max_age_days: u32,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self { max_age_days: 30 }
    }
}
