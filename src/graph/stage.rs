//! Stages and the validated build graph

use crate::error::{StrataError, StrataResult};
use crate::graph::step::{InputSource, Step};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Component;

/// A named ordered sequence of steps sharing one filesystem lineage.
///
/// Step N's base filesystem is step N-1's cumulative snapshot; the first
/// step starts from the empty tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name, unique within a build
    pub name: String,
    /// Steps in declaration order
    #[serde(rename = "step")]
    pub steps: Vec<Step>,
}

impl Stage {
    /// Create a stage from a name and its steps
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// A validated, acyclic build graph.
///
/// Construction validates every structural invariant: unique stage names,
/// backward-only artifact references, in-range step indices, and
/// well-formed mount cache declarations. A `BuildGraph` that exists is
/// safe to plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildGraph {
    stages: Vec<Stage>,
}

impl BuildGraph {
    /// Validate and build a graph from stages in declaration order
    pub fn new(stages: Vec<Stage>) -> StrataResult<Self> {
        validate(&stages)?;
        Ok(Self { stages })
    }

    /// Stages in declaration order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The final stage, whose output is the build result
    pub fn final_stage(&self) -> &Stage {
        // Non-empty by validation
        self.stages.last().expect("validated graph has stages")
    }

    /// Index of a stage by name
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Total step count across all stages
    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }

    /// Resolve an artifact reference to (stage index, step index).
    ///
    /// Assumes a validated graph; unknown names were rejected at
    /// construction.
    pub fn resolve_artifact(&self, stage: &str, step: Option<usize>) -> Option<(usize, usize)> {
        let stage_idx = self.stage_index(stage)?;
        let steps = &self.stages[stage_idx].steps;
        let step_idx = step.unwrap_or(steps.len().saturating_sub(1));
        if step_idx >= steps.len() {
            return None;
        }
        Some((stage_idx, step_idx))
    }
}

fn validate(stages: &[Stage]) -> StrataResult<()> {
    if stages.is_empty() {
        return Err(StrataError::EmptyGraph);
    }

    let mut declared: HashMap<&str, usize> = HashMap::new();
    for (stage_idx, stage) in stages.iter().enumerate() {
        if stage.steps.is_empty() {
            return Err(StrataError::EmptyStage(stage.name.clone()));
        }
        if declared.contains_key(stage.name.as_str()) {
            return Err(StrataError::DuplicateStage(stage.name.clone()));
        }

        for (step_idx, step) in stage.steps.iter().enumerate() {
            for source in &step.sources {
                let InputSource::Artifact {
                    stage: target,
                    step: target_step,
                } = source
                else {
                    continue;
                };

                let Some(&target_idx) = declared.get(target.as_str()) else {
                    // Not declared earlier: self-reference, declared later,
                    // or unknown entirely
                    let exists_later = stages[stage_idx..].iter().any(|s| &s.name == target);
                    if exists_later {
                        return Err(StrataError::ForwardStageReference {
                            from: stage.name.clone(),
                            step: step_idx,
                            target: target.clone(),
                        });
                    }
                    return Err(StrataError::UnknownStage {
                        from: stage.name.clone(),
                        step: step_idx,
                        target: target.clone(),
                    });
                };

                let available = stages[target_idx].steps.len();
                if let Some(ts) = target_step {
                    if *ts >= available {
                        return Err(StrataError::ArtifactStepOutOfRange {
                            from: stage.name.clone(),
                            step: step_idx,
                            target: target.clone(),
                            target_step: *ts,
                            available,
                        });
                    }
                }
            }

            let mut cache_names = std::collections::HashSet::new();
            for cache in &step.caches {
                if !cache_names.insert(cache.name.as_str()) {
                    return Err(StrataError::DuplicateCacheMount {
                        stage: stage.name.clone(),
                        step: step_idx,
                        name: cache.name.clone(),
                    });
                }
                if cache.name.is_empty()
                    || cache.name.contains('/')
                    || cache.name.contains('\\')
                    || cache.name.contains("..")
                {
                    return Err(StrataError::InvalidCacheName(cache.name.clone()));
                }
                let target_ok = !cache.target.as_os_str().is_empty()
                    && cache
                        .target
                        .components()
                        .all(|c| matches!(c, Component::Normal(_)));
                if !target_ok {
                    return Err(StrataError::InvalidCacheTarget {
                        name: cache.name.clone(),
                        target: cache.target.clone(),
                    });
                }
            }
        }

        // A stage becomes referenceable only once fully validated, so a
        // step can never name its own stage
        declared.insert(&stage.name, stage_idx);
    }

    Ok(())
}
