//! Build planner
//!
//! Walks a validated build graph for one platform: resolves every step's
//! inputs, computes its content identity, and decides execute-vs-reuse by
//! consulting the cache store. Steps run as independent tasks; a step
//! waits on completion signals from its dependencies (parent lineage and
//! artifact sources) and nothing else, so steps with no dependency
//! relationship run concurrently.
//!
//! Cache hits bind the step's output to the stored layer without invoking
//! the executor. Transitive invalidation needs no special casing: a
//! step's identity encodes its parent's identity, so an upstream miss
//! changes every downstream identity with it.
//!
//! On the first fatal failure a cancellation flag is raised; steps that
//! have not started executing resolve as cancelled, while in-flight steps
//! run to completion so mount caches are never left half-written.

use crate::context::BuildContext;
use crate::error::{StrataError, StrataResult};
use crate::executor::{Executor, MountInput, StepInvocation};
use crate::graph::{BuildGraph, InputSource, OutputKind, Step};
use crate::identity::{step_identity, ResolvedInput, StepIdentity};
use crate::platform::Platform;
use crate::store::CacheStore;
use crate::tree::{FileEntry, FileTree};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How one step resolved during a build
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Enclosing stage name
    pub stage: String,
    /// Step index within the stage
    pub step_index: usize,
    /// Computed content identity
    pub identity: StepIdentity,
    /// Whether the step was served from the cache store
    pub cache_hit: bool,
}

/// A completed platform build: the tagged bundle plus per-step reports
#[derive(Debug, Clone)]
pub struct PlatformBuild {
    /// Platform this build targeted
    pub platform: Platform,
    /// Final stage's resulting filesystem
    pub bundle: FileTree,
    /// Step reports in declaration order
    pub steps: Vec<StepReport>,
}

impl PlatformBuild {
    /// Number of steps served from cache
    pub fn cache_hits(&self) -> usize {
        self.steps.iter().filter(|s| s.cache_hit).count()
    }
}

/// Completion signal for one step's task
#[derive(Clone)]
enum Signal {
    Pending,
    Done(StepOutcome),
    Failed,
}

/// What dependents need from a resolved step
#[derive(Clone)]
struct StepOutcome {
    identity: StepIdentity,
    /// Cumulative filesystem state after this step
    snapshot: Arc<FileTree>,
}

/// Plans and executes builds for a single platform at a time
pub struct Planner {
    store: Arc<dyn CacheStore>,
    executor: Arc<dyn Executor>,
    context: Arc<dyn BuildContext>,
}

impl Planner {
    /// Create a planner over the injected store, executor, and context
    pub fn new(
        store: Arc<dyn CacheStore>,
        executor: Arc<dyn Executor>,
        context: Arc<dyn BuildContext>,
    ) -> Self {
        Self {
            store,
            executor,
            context,
        }
    }

    /// Build the graph for one platform.
    ///
    /// Returns the final stage's bundle and per-step reports, or the first
    /// failure with full step context.
    pub async fn build(
        &self,
        graph: &BuildGraph,
        platform: &Platform,
    ) -> StrataResult<PlatformBuild> {
        // One completion channel per step, addressed by (stage, step)
        let channels: Vec<Vec<(watch::Sender<Signal>, watch::Receiver<Signal>)>> = graph
            .stages()
            .iter()
            .map(|stage| {
                stage
                    .steps
                    .iter()
                    .map(|_| watch::channel(Signal::Pending))
                    .collect()
            })
            .collect();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);

        let mut handles = Vec::with_capacity(graph.step_count());
        for (stage_idx, stage) in graph.stages().iter().enumerate() {
            for (step_idx, step) in stage.steps.iter().enumerate() {
                let parent_rx = if step_idx > 0 {
                    Some(channels[stage_idx][step_idx - 1].1.clone())
                } else {
                    None
                };

                // Artifact sources, resolved to their steps' channels in
                // declaration order (validation guarantees they exist)
                let mut artifact_rxs = Vec::new();
                for source in &step.sources {
                    if let InputSource::Artifact { stage: target, step: target_step } = source {
                        let (dep_stage, dep_step) = graph
                            .resolve_artifact(target, *target_step)
                            .ok_or_else(|| StrataError::Internal(format!(
                                "unresolvable artifact reference to '{target}' in validated graph"
                            )))?;
                        artifact_rxs.push(channels[dep_stage][dep_step].1.clone());
                    }
                }

                let task = StepTask {
                    platform: platform.clone(),
                    stage: stage.name.clone(),
                    step_index: step_idx,
                    step: step.clone(),
                    store: Arc::clone(&self.store),
                    executor: Arc::clone(&self.executor),
                    context: Arc::clone(&self.context),
                    done_tx: channels[stage_idx][step_idx].0.clone(),
                    parent_rx,
                    artifact_rxs,
                    cancel_tx: Arc::clone(&cancel_tx),
                    cancel_rx: cancel_rx.clone(),
                };
                handles.push(tokio::spawn(task.resolve()));
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut first_failure: Option<StrataError> = None;
        let mut cancelled: Option<StrataError> = None;
        for handle in handles {
            let result = handle
                .await
                .map_err(|e| StrataError::Internal(format!("step task panicked: {e}")))?;
            match result {
                Ok(report) => reports.push(report),
                Err(err @ StrataError::Cancelled { .. }) => {
                    cancelled.get_or_insert(err);
                }
                Err(err) => {
                    first_failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_failure.or(cancelled) {
            return Err(err);
        }

        // All steps resolved; the final stage's last step holds the bundle
        let final_stage_idx = graph.stages().len() - 1;
        let final_step_idx = graph.final_stage().steps.len() - 1;
        let bundle = match &*channels[final_stage_idx][final_step_idx].1.borrow() {
            Signal::Done(outcome) => (*outcome.snapshot).clone(),
            _ => {
                return Err(StrataError::Internal(
                    "final step reported success without an outcome".to_string(),
                ))
            }
        };

        reports.sort_by(|a, b| {
            let ka = (graph.stage_index(&a.stage), a.step_index);
            let kb = (graph.stage_index(&b.stage), b.step_index);
            ka.cmp(&kb)
        });

        info!(
            "Build complete for {}: {}/{} steps from cache",
            platform,
            reports.iter().filter(|r| r.cache_hit).count(),
            reports.len()
        );

        Ok(PlatformBuild {
            platform: platform.clone(),
            bundle,
            steps: reports,
        })
    }
}

/// One step's resolution task
struct StepTask {
    platform: Platform,
    stage: String,
    step_index: usize,
    step: Step,
    store: Arc<dyn CacheStore>,
    executor: Arc<dyn Executor>,
    context: Arc<dyn BuildContext>,
    done_tx: watch::Sender<Signal>,
    parent_rx: Option<watch::Receiver<Signal>>,
    artifact_rxs: Vec<watch::Receiver<Signal>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl StepTask {
    async fn resolve(self) -> StrataResult<StepReport> {
        let result = self.resolve_inner().await;
        match &result {
            Ok(_) => {}
            Err(StrataError::Cancelled { .. }) => {
                let _ = self.done_tx.send(Signal::Failed);
            }
            Err(_) => {
                // Raise the cancel flag for steps that have not started
                let _ = self.cancel_tx.send(true);
                let _ = self.done_tx.send(Signal::Failed);
            }
        }
        result
    }

    async fn resolve_inner(&self) -> StrataResult<StepReport> {
        let cancelled = || StrataError::Cancelled {
            platform: self.platform.clone(),
        };

        // Wait for the parent lineage first; the parent's snapshot is this
        // step's base filesystem
        let parent = match &self.parent_rx {
            Some(rx) => Some(await_signal(rx.clone()).await.ok_or_else(cancelled)?),
            None => None,
        };

        // Resolve inputs in declaration order: context files to content
        // digests, artifact references to upstream outcomes
        let mut resolved = Vec::with_capacity(self.step.sources.len());
        let mut artifact_outcomes = Vec::new();
        let mut artifact_idx = 0usize;
        for source in &self.step.sources {
            match source {
                InputSource::File { path } => {
                    let digest = self.context.digest(path).await?;
                    resolved.push(ResolvedInput::FileDigest(digest));
                }
                InputSource::Artifact { .. } => {
                    let rx = self.artifact_rxs[artifact_idx].clone();
                    artifact_idx += 1;
                    let outcome = await_signal(rx).await.ok_or_else(cancelled)?;
                    resolved.push(ResolvedInput::Artifact(outcome.identity.clone()));
                    artifact_outcomes.push(outcome);
                }
            }
        }

        let identity = step_identity(
            &self.step.command,
            parent.as_ref().map(|p| &p.identity),
            &resolved,
        );

        let base = parent
            .as_ref()
            .map(|p| Arc::clone(&p.snapshot))
            .unwrap_or_default();

        // Consult the store; a read failure is a miss, never fatal
        let cached = match self.store.get_layer(&self.platform, &identity).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cache read failed for {} ({}); treating as miss", identity, e);
                None
            }
        };

        if let Some(layer) = cached {
            debug!(
                "Cache hit on {}: stage '{}' step {} ({})",
                self.platform, self.stage, self.step_index, identity
            );
            let snapshot = Arc::new(base.overlaid(&layer));
            let _ = self.done_tx.send(Signal::Done(StepOutcome {
                identity: identity.clone(),
                snapshot,
            }));
            return Ok(StepReport {
                stage: self.stage.clone(),
                step_index: self.step_index,
                identity,
                cache_hit: true,
            });
        }

        // Miss: about to execute. Honor cooperative cancellation here,
        // before any side effects begin.
        if *self.cancel_rx.borrow() {
            return Err(cancelled());
        }

        let copied = self.assemble_copied(&artifact_outcomes).await?;

        // Lock mount slots in sorted name order; two steps sharing a slot
        // serialize, and a fixed order cannot deadlock
        let mut declared = self.step.caches.clone();
        declared.sort_by(|a, b| a.name.cmp(&b.name));
        let mut leases = Vec::with_capacity(declared.len());
        let mut mounts = Vec::with_capacity(declared.len());
        for cache in &declared {
            let lease = self
                .store
                .acquire_mount_cache(&self.platform, &cache.name)
                .await?;
            mounts.push(MountInput {
                name: cache.name.clone(),
                target: cache.target.clone(),
                contents: lease.contents.clone(),
            });
            leases.push(lease);
        }

        let invocation = StepInvocation {
            platform: self.platform.clone(),
            stage: self.stage.clone(),
            step_index: self.step_index,
            command: self.step.command.clone(),
            base: (*base).clone(),
            copied,
            mounts,
        };

        let output = self.executor.run(invocation).await?;

        // Write mount deltas back to their mutable slots; this happens on
        // success and is kept separate from the step's own cache entry
        let mut updated = output.mounts;
        for lease in leases {
            let contents = updated
                .iter()
                .position(|(name, _)| *name == lease.name)
                .map(|i| updated.swap_remove(i).1)
                .unwrap_or_else(|| lease.contents.clone());
            self.store.release_mount_cache(lease, contents).await?;
        }

        // A side-effect-only step stores an empty marker so dependents
        // (and re-runs) still see it as resolved
        let layer = match self.step.output {
            OutputKind::Layer => output.layer,
            OutputKind::None => FileTree::new(),
        };
        self.store
            .put_layer(&self.platform, &identity, &layer)
            .await?;

        let snapshot = Arc::new(base.overlaid(&layer));
        let _ = self.done_tx.send(Signal::Done(StepOutcome {
            identity: identity.clone(),
            snapshot,
        }));

        Ok(StepReport {
            stage: self.stage.clone(),
            step_index: self.step_index,
            identity,
            cache_hit: false,
        })
    }

    /// Resolve copied sources into one tree: context files at their
    /// context paths, artifact snapshots in full, later sources winning
    async fn assemble_copied(&self, artifacts: &[StepOutcome]) -> StrataResult<FileTree> {
        let mut copied = FileTree::new();
        let mut artifact_idx = 0usize;
        for source in &self.step.sources {
            match source {
                InputSource::File { path } => {
                    let contents = self.context.read(path).await?;
                    copied.insert(path.clone(), FileEntry::regular(contents));
                }
                InputSource::Artifact { .. } => {
                    let outcome = &artifacts[artifact_idx];
                    artifact_idx += 1;
                    copied.apply(&outcome.snapshot);
                }
            }
        }
        Ok(copied)
    }
}

/// Wait for a step to leave `Pending`; `None` means it failed upstream
async fn await_signal(mut rx: watch::Receiver<Signal>) -> Option<StepOutcome> {
    let signal = rx
        .wait_for(|s| !matches!(s, Signal::Pending))
        .await
        .map(|s| s.clone())
        .unwrap_or(Signal::Failed);
    match signal {
        Signal::Done(outcome) => Some(outcome),
        _ => None,
    }
}
