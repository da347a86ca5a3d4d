//! Error types for Strata
//!
//! All modules use `StrataResult<T>` as their return type.

use crate::platform::Platform;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Strata operations
pub type StrataResult<T> = Result<T, StrataError>;

/// All errors that can occur in Strata
#[derive(Error, Debug)]
pub enum StrataError {
    // Graph errors: detected during validation, before any step runs
    #[error("Build graph has no stages")]
    EmptyGraph,

    #[error("Stage '{0}' has no steps")]
    EmptyStage(String),

    #[error("Duplicate stage name: '{0}'")]
    DuplicateStage(String),

    #[error("Stage '{from}' step {step} references undeclared stage '{target}'")]
    UnknownStage {
        from: String,
        step: usize,
        target: String,
    },

    #[error("Stage '{from}' step {step} references stage '{target}', which is not declared earlier (stage references must point backward)")]
    ForwardStageReference {
        from: String,
        step: usize,
        target: String,
    },

    #[error("Stage '{from}' step {step} references step {target_step} of stage '{target}', which only has {available} steps")]
    ArtifactStepOutOfRange {
        from: String,
        step: usize,
        target: String,
        target_step: usize,
        available: usize,
    },

    #[error("Invalid mount cache name '{0}': must be non-empty and contain no path separators")]
    InvalidCacheName(String),

    #[error("Invalid mount cache target '{target}' for cache '{name}': must be a relative path inside the build root")]
    InvalidCacheTarget { name: String, target: PathBuf },

    #[error("Stage '{stage}' step {step} declares mount cache '{name}' more than once")]
    DuplicateCacheMount {
        stage: String,
        step: usize,
        name: String,
    },

    // Buildfile errors
    #[error("Invalid buildfile at {path}: {reason}")]
    BuildfileInvalid { path: PathBuf, reason: String },

    // Context errors
    #[error("Build context source not found: {0}")]
    SourceNotFound(PathBuf),

    // Store errors
    #[error("Cache store error: {context}")]
    Store {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache store entry corrupt for key {key}: {reason}")]
    StoreCorrupt { key: String, reason: String },

    // Execution errors: fatal to the enclosing platform's build
    #[error("Step failed on {platform}: stage '{stage}' step {step} (command: {command}): exit status {status}\n{stderr}")]
    StepFailed {
        platform: Platform,
        stage: String,
        step: usize,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Build cancelled on {platform} after an earlier step failed")]
    Cancelled { platform: Platform },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid platform '{0}': expected os/arch (e.g. linux/amd64)")]
    InvalidPlatform(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a store error with context
    pub fn store(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    /// Actionable hint for common user-facing errors
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::BuildfileInvalid { .. } => {
                Some("Check the buildfile against the format in the README")
            }
            Self::SourceNotFound(_) => {
                Some("Paths in [[stage.step]] sources are resolved relative to the build context")
            }
            Self::ForwardStageReference { .. } => {
                Some("Reorder the stages so the referenced stage is declared first")
            }
            Self::InvalidPlatform(_) => Some("Use os/arch form, e.g. linux/amd64 or linux/arm64"),
            _ => None,
        }
    }

    /// Whether this error was detected before any step executed
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyGraph
                | Self::EmptyStage(_)
                | Self::DuplicateStage(_)
                | Self::UnknownStage { .. }
                | Self::ForwardStageReference { .. }
                | Self::ArtifactStepOutOfRange { .. }
                | Self::InvalidCacheName(_)
                | Self::InvalidCacheTarget { .. }
                | Self::DuplicateCacheMount { .. }
                | Self::BuildfileInvalid { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_reference() {
        let err = StrataError::UnknownStage {
            from: "runtime".to_string(),
            step: 0,
            target: "bulid".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("runtime"));
        assert!(msg.contains("bulid"));
    }

    #[test]
    fn input_error_classification() {
        assert!(StrataError::EmptyGraph.is_input_error());
        assert!(StrataError::DuplicateStage("build".into()).is_input_error());
        assert!(!StrataError::Internal("x".into()).is_input_error());
    }
}
