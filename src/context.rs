//! Build context access
//!
//! The build context is the engine's content-resolvable view of the
//! caller's source files. File inputs are identified by content digest,
//! never by name or modification time.

use crate::error::{StrataError, StrataResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Content-resolvable view of the build context's source files
#[async_trait]
pub trait BuildContext: Send + Sync {
    /// Content digest (sha256 hex) of a context file
    async fn digest(&self, path: &Path) -> StrataResult<String>;

    /// Contents of a context file
    async fn read(&self, path: &Path) -> StrataResult<Vec<u8>>;
}

/// Filesystem-backed context rooted at a directory
pub struct DirContext {
    root: PathBuf,
}

impl DirContext {
    /// Create a context over the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a context-relative path, rejecting escapes
    fn resolve(&self, path: &Path) -> StrataResult<PathBuf> {
        let safe = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(StrataError::SourceNotFound(path.to_path_buf()));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl BuildContext for DirContext {
    async fn digest(&self, path: &Path) -> StrataResult<String> {
        let contents = self.read(path).await?;
        let mut hasher = Sha256::new();
        hasher.update(&contents);
        let digest = hex::encode(hasher.finalize());
        debug!("Context file {} -> {}", path.display(), &digest[..12]);
        Ok(digest)
    }

    async fn read(&self, path: &Path) -> StrataResult<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StrataError::SourceNotFound(path.to_path_buf()))
            }
            Err(e) => Err(StrataError::io(format!("reading {}", full.display()), e)),
        }
    }
}

/// In-memory context for tests
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a context file
    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }
}

#[async_trait]
impl BuildContext for MemoryContext {
    async fn digest(&self, path: &Path) -> StrataResult<String> {
        let contents = self.read(path).await?;
        let mut hasher = Sha256::new();
        hasher.update(&contents);
        Ok(hex::encode(hasher.finalize()))
    }

    async fn read(&self, path: &Path) -> StrataResult<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| StrataError::SourceNotFound(path.to_path_buf()))
    }
}
