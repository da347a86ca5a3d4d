//! Step execution
//!
//! The executor runs a step that missed the cache: it is handed the
//! filesystem state produced by the step's dependencies, the resolved
//! copied sources, and the current contents of any declared mount caches,
//! and returns the produced layer delta plus the mutated mount contents.
//!
//! Executors never touch the cache store; the planner owns all store
//! reads and writes, so a custom executor cannot violate the layer /
//! mount-cache separation.

pub mod process;

pub use process::ProcessExecutor;

use crate::error::StrataResult;
use crate::platform::Platform;
use crate::tree::FileTree;
use async_trait::async_trait;
use std::path::PathBuf;

/// A mount cache's contents, placed at `target` for the duration of the
/// step's execution only
#[derive(Debug, Clone)]
pub struct MountInput {
    /// Cache slot name
    pub name: String,
    /// Relative path where the contents are visible to the command
    pub target: PathBuf,
    /// Slot contents at acquisition time
    pub contents: FileTree,
}

/// Everything an executor needs to run one step
#[derive(Debug, Clone)]
pub struct StepInvocation {
    /// Platform this step is building for
    pub platform: Platform,
    /// Enclosing stage name (for diagnostics)
    pub stage: String,
    /// Step index within the stage (for diagnostics)
    pub step_index: usize,
    /// Command to run
    pub command: String,
    /// Filesystem state produced by the step's dependencies
    pub base: FileTree,
    /// Resolved copied sources (context files and upstream artifacts),
    /// applied onto the base before the command runs
    pub copied: FileTree,
    /// Declared mount caches
    pub mounts: Vec<MountInput>,
}

/// What a step execution produced
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Filesystem delta relative to the base, with mount paths stripped
    pub layer: FileTree,
    /// Updated mount cache contents, keyed by slot name, written back to
    /// the store by the planner
    pub mounts: Vec<(String, FileTree)>,
}

/// Runs cache-missed steps
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one step to completion.
    ///
    /// A non-zero command outcome is returned as
    /// [`crate::StrataError::StepFailed`] carrying the step's stage,
    /// index, and command; it is fatal to the platform's build and never
    /// retried.
    async fn run(&self, invocation: StepInvocation) -> StrataResult<StepOutput>;
}
