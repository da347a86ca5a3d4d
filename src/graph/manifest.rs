//! Buildfile parsing
//!
//! A buildfile is a TOML description of a build: the target platforms and
//! the stage/step graph. The CLI parses it and hands the validated graph
//! to the engine.

use crate::error::{StrataError, StrataResult};
use crate::graph::stage::{BuildGraph, Stage};
use crate::platform::Platform;
use serde::Deserialize;
use std::path::Path;

/// Parsed buildfile (`strata.toml` by convention)
#[derive(Debug, Clone, Deserialize)]
pub struct Buildfile {
    /// Target platforms; the CLI falls back to its configured default
    /// when empty
    #[serde(default)]
    pub platforms: Vec<Platform>,

    /// Stages in declaration order
    #[serde(rename = "stage")]
    pub stages: Vec<Stage>,
}

impl Buildfile {
    /// Parse a buildfile from a TOML file on disk
    pub async fn from_file(path: &Path) -> StrataResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StrataError::io(format!("reading buildfile {}", path.display()), e))?;
        Self::parse(&content, path)
    }

    /// Parse a buildfile from a TOML string
    pub fn parse(content: &str, path: &Path) -> StrataResult<Self> {
        toml::from_str(content).map_err(|e| StrataError::BuildfileInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Validate the stage list into a build graph
    pub fn into_graph(self) -> StrataResult<BuildGraph> {
        BuildGraph::new(self.stages)
    }
}
