//! Platform scheduler
//!
//! Runs one independent planner per requested target platform. Platforms
//! share no mutable state: every store key is platform-namespaced, so
//! cross-platform reuse is structurally impossible and the planners run
//! concurrently without coordination. One platform's failure is
//! independent of the others; each outcome is reported separately.

use crate::context::BuildContext;
use crate::error::{StrataError, StrataResult};
use crate::executor::Executor;
use crate::graph::BuildGraph;
use crate::planner::{Planner, PlatformBuild};
use crate::platform::Platform;
use crate::store::CacheStore;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// One platform's build outcome
pub struct PlatformOutcome {
    /// Platform this outcome belongs to
    pub platform: Platform,
    /// The build, or the platform's first failure
    pub result: StrataResult<PlatformBuild>,
}

/// Schedules per-platform planners over shared, namespaced state
pub struct Scheduler {
    store: Arc<dyn CacheStore>,
    executor: Arc<dyn Executor>,
    context: Arc<dyn BuildContext>,
}

impl Scheduler {
    /// Create a scheduler over the injected store, executor, and context
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

    /// Build the graph for every requested platform concurrently.
    ///
    /// Outcomes are returned in request order, duplicates removed.
    pub async fn build_all(
        &self,
        graph: &BuildGraph,
        platforms: &[Platform],
    ) -> StrataResult<Vec<PlatformOutcome>> {
        if platforms.is_empty() {
            return Err(StrataError::Internal(
                "no target platforms requested".to_string(),
            ));
        }

        let mut unique: Vec<Platform> = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if unique.contains(platform) {
                warn!("Duplicate target platform {} ignored", platform);
                continue;
            }
            unique.push(platform.clone());
        }

        info!(
            "Scheduling build for {} platform(s): {}",
            unique.len(),
            unique
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let handles: Vec<_> = unique
            .iter()
            .map(|platform| {
                let planner = Planner::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.executor),
                    Arc::clone(&self.context),
                );
                let graph = graph.clone();
                let platform = platform.clone();
                tokio::spawn(async move {
                    let result = planner.build(&graph, &platform).await;
                    PlatformOutcome { platform, result }
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            let outcome = joined
                .map_err(|e| StrataError::Internal(format!("platform task panicked: {e}")))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContext;
    use crate::executor::{StepInvocation, StepOutput};
    use crate::graph::{Stage, Step};
    use crate::store::MemoryStore;
    use crate::tree::FileEntry;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoExecutor {
        runs: AtomicUsize,
        fail_on: Option<Platform>,
    }

    impl EchoExecutor {
        fn new() -> Self {
            Self {
                runs: AtomicUsize::new(0),
                fail_on: None,
            }
        }

        fn failing_on(platform: Platform) -> Self {
            Self {
                runs: AtomicUsize::new(0),
                fail_on: Some(platform),
            }
        }
    }

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn run(&self, invocation: StepInvocation) -> StrataResult<StepOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.as_ref() == Some(&invocation.platform) {
                return Err(StrataError::StepFailed {
                    platform: invocation.platform.clone(),
                    stage: invocation.stage.clone(),
                    step: invocation.step_index,
                    command: invocation.command.clone(),
                    status: 1,
                    stderr: "platform-specific failure".to_string(),
                });
            }
            let mut layer = invocation.copied.clone();
            layer.insert(
                "built",
                FileEntry::regular(invocation.command.as_bytes().to_vec()),
            );
            Ok(StepOutput {
                layer,
                mounts: Vec::new(),
            })
        }
    }

    fn graph() -> BuildGraph {
        BuildGraph::new(vec![Stage::new("build", vec![Step::run("make")])]).unwrap()
    }

    fn platforms() -> Vec<Platform> {
        vec![Platform::new("linux", "amd64"), Platform::new("linux", "arm64")]
    }

    #[tokio::test]
    async fn platforms_build_with_disjoint_cache_keys() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(
            Arc::clone(&store) as Arc<dyn CacheStore>,
            Arc::new(EchoExecutor::new()),
            Arc::new(MemoryContext::new()),
        );

        let outcomes = scheduler.build_all(&graph(), &platforms()).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));

        // Identical steps, but every stored key carries its own platform tag
        let keys = store.layer_keys();
        assert_eq!(keys.len(), 2);
        let tagged: HashSet<_> = keys.iter().cloned().collect();
        assert_eq!(tagged.len(), 2);
        let identities: HashSet<_> = keys.iter().map(|(_, id)| id.clone()).collect();
        // Same graph, same identity; isolation comes from the namespace
        assert_eq!(identities.len(), 1);
    }

    #[tokio::test]
    async fn one_platform_failure_is_independent() {
        let arm = Platform::new("linux", "arm64");
        let scheduler = Scheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EchoExecutor::failing_on(arm.clone())),
            Arc::new(MemoryContext::new()),
        );

        let outcomes = scheduler.build_all(&graph(), &platforms()).await.unwrap();
        let amd = &outcomes[0];
        assert!(amd.result.is_ok());

        let failed = &outcomes[1];
        assert_eq!(failed.platform, arm);
        match failed.result.as_ref().unwrap_err() {
            StrataError::StepFailed {
                platform, stage, ..
            } => {
                assert_eq!(*platform, arm);
                assert_eq!(stage, "build");
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_platforms_deduplicated() {
        let scheduler = Scheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EchoExecutor::new()),
            Arc::new(MemoryContext::new()),
        );
        let doubled = vec![
            Platform::new("linux", "amd64"),
            Platform::new("linux", "amd64"),
        ];
        let outcomes = scheduler.build_all(&graph(), &doubled).await.unwrap();
        assert_eq!(outcomes.len(), 1);
    }

    #[tokio::test]
    async fn empty_platform_list_rejected() {
        let scheduler = Scheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EchoExecutor::new()),
            Arc::new(MemoryContext::new()),
        );
        assert!(scheduler.build_all(&graph(), &[]).await.is_err());
    }
}
