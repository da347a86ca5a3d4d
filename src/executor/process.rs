//! Shell process executor
//!
//! Materializes the step's filesystem into a scratch directory, runs the
//! command through `sh -c` with that directory as its working directory,
//! and captures the delta by comparing tree snapshots. Mount cache paths
//! are split out of the post-state before the delta is computed, so cache
//! contents can never land in the produced layer.

use crate::error::{StrataError, StrataResult};
use crate::executor::{Executor, StepInvocation, StepOutput};
use crate::tree::FileTree;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Executor that runs step commands as local shell processes
pub struct ProcessExecutor {
    scratch_root: PathBuf,
}

impl ProcessExecutor {
    /// Create an executor staging scratch directories under `scratch_root`
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("strata-scratch"))
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, invocation: StepInvocation) -> StrataResult<StepOutput> {
        let scratch = self
            .scratch_root
            .join(uuid::Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| StrataError::io(format!("creating scratch {}", scratch.display()), e))?;

        let result = run_in_scratch(&invocation, &scratch).await;

        // Best-effort cleanup; the result matters more than the scratch dir
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!("Failed to remove scratch {}: {}", scratch.display(), e);
        }

        result
    }
}

async fn run_in_scratch(invocation: &StepInvocation, scratch: &Path) -> StrataResult<StepOutput> {
    // Assemble: base, then copied sources on top, then mount contents
    invocation.base.write_to_dir(scratch)?;
    invocation.copied.write_to_dir(scratch)?;
    for mount in &invocation.mounts {
        let dir = scratch.join(&mount.target);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StrataError::io(format!("creating mount dir {}", dir.display()), e))?;
        mount.contents.write_to_dir(&dir)?;
    }

    debug!(
        "Executing stage '{}' step {} on {}: {}",
        invocation.stage, invocation.step_index, invocation.platform, invocation.command
    );

    // Fixed environment: only PATH leaks in, so host state cannot
    // influence outputs that identity does not account for
    let output = Command::new("sh")
        .arg("-c")
        .arg(&invocation.command)
        .current_dir(scratch)
        .env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .output()
        .await
        .map_err(|e| StrataError::io(format!("spawning '{}'", invocation.command), e))?;

    if !output.status.success() {
        return Err(StrataError::StepFailed {
            platform: invocation.platform.clone(),
            stage: invocation.stage.clone(),
            step: invocation.step_index,
            command: invocation.command.clone(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let mut post = FileTree::from_dir(scratch)?;

    // Split mount contents out of the post-state; they go back to their
    // slots, never into the layer
    let mut mounts = Vec::with_capacity(invocation.mounts.len());
    for mount in &invocation.mounts {
        let contents = post.take_subtree(&mount.target);
        mounts.push((mount.name.clone(), contents));
    }

    // The layer is everything new or changed relative to the dependency
    // state, copied sources included
    let layer = post.delta_from(&invocation.base);

    Ok(StepOutput { layer, mounts })
}
