//! Step definitions
//!
//! A step is pure data: a command, its declared input sources, and any
//! mount caches attached for the duration of its execution. A step's
//! identity is derived later by the planner; it is never stored here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A declared input to a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSource {
    /// A file from the build context, identified by content (renames do
    /// not invalidate, edits do)
    File {
        #[serde(rename = "file")]
        path: PathBuf,
    },
    /// The output of a step in an earlier stage. `step` defaults to the
    /// referenced stage's last step.
    Artifact {
        stage: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
    },
}

/// A persistent mount cache attached to a step during execution only.
///
/// Contents never land in the step's produced layer and never contribute
/// to its identity; they persist per (platform, name) across builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMount {
    /// Cache slot name, shared by every step that declares it
    pub name: String,
    /// Relative path where the cache is visible during execution
    pub target: PathBuf,
}

/// What a step produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// A filesystem layer delta (the default)
    #[default]
    Layer,
    /// Side effects only (e.g. populating a mount cache); the step is
    /// still identity-tracked so dependents cache-check correctly
    None,
}

/// A unit of build work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Command to run (opaque to the engine; the process executor hands
    /// it to the shell)
    pub command: String,

    /// Ordered input sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<InputSource>,

    /// Mount caches attached during execution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caches: Vec<CacheMount>,

    /// Produced output kind
    #[serde(default)]
    pub output: OutputKind,
}

impl Step {
    /// Create a step with the given command and no inputs
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            sources: Vec::new(),
            caches: Vec::new(),
            output: OutputKind::Layer,
        }
    }

    /// Add a context file source
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(InputSource::File { path: path.into() });
        self
    }

    /// Add an artifact source referencing an earlier stage's last step
    pub fn with_artifact(mut self, stage: impl Into<String>) -> Self {
        self.sources.push(InputSource::Artifact {
            stage: stage.into(),
            step: None,
        });
        self
    }

    /// Add an artifact source referencing a specific step of an earlier stage
    pub fn with_artifact_step(mut self, stage: impl Into<String>, step: usize) -> Self {
        self.sources.push(InputSource::Artifact {
            stage: stage.into(),
            step: Some(step),
        });
        self
    }

    /// Attach a mount cache
    pub fn with_cache(mut self, name: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        self.caches.push(CacheMount {
            name: name.into(),
            target: target.into(),
        });
        self
    }

    /// Mark this step as producing side effects only
    pub fn side_effect_only(mut self) -> Self {
        self.output = OutputKind::None;
        self
    }
}
