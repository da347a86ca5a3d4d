//! In-memory cache store
//!
//! Used by tests and single-shot builds that don't want persistence. Also
//! exposes its key set so tests can assert platform namespace isolation.

use crate::error::{StrataError, StrataResult};
use crate::identity::StepIdentity;
use crate::platform::Platform;
use crate::store::{CacheStore, MountCacheLease};
use crate::tree::FileTree;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredLayer {
    layer: FileTree,
    #[allow(dead_code)]
    stored_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    layers: HashMap<(Platform, StepIdentity), StoredLayer>,
    mounts: HashMap<(Platform, String), FileTree>,
    mount_locks: HashMap<(Platform, String), Arc<tokio::sync::Mutex<()>>>,
}

/// In-memory store, safe to share across planner tasks
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_puts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every (platform, identity) key currently stored, for isolation
    /// assertions in tests
    pub fn layer_keys(&self) -> Vec<(Platform, StepIdentity)> {
        let inner = self.inner.lock().expect("store lock");
        let mut keys: Vec<_> = inner.layers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of stored layer entries
    pub fn layer_count(&self) -> usize {
        self.inner.lock().expect("store lock").layers.len()
    }

    /// Mount cache slot contents, if the slot exists
    pub fn mount_contents(&self, platform: &Platform, name: &str) -> Option<FileTree> {
        let inner = self.inner.lock().expect("store lock");
        inner
            .mounts
            .get(&(platform.clone(), name.to_string()))
            .cloned()
    }

    /// Make subsequent `put_layer` calls fail (failure-path tests)
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_layer(
        &self,
        platform: &Platform,
        identity: &StepIdentity,
    ) -> StrataResult<Option<FileTree>> {
        let mut inner = self.inner.lock().expect("store lock");
        let key = (platform.clone(), identity.clone());
        Ok(inner.layers.get_mut(&key).map(|stored| {
            stored.last_used = Utc::now();
            stored.layer.clone()
        }))
    }

    async fn put_layer(
        &self,
        platform: &Platform,
        identity: &StepIdentity,
        layer: &FileTree,
    ) -> StrataResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StrataError::store(
                format!("injected put failure for {identity}"),
                std::io::Error::other("injected failure"),
            ));
        }

        let mut inner = self.inner.lock().expect("store lock");
        let key = (platform.clone(), identity.clone());
        if let Some(existing) = inner.layers.get(&key) {
            // Idempotent re-store
            if existing.layer == *layer {
                return Ok(());
            }
        }
        debug!("Storing layer {} for {}", identity, platform);
        let now = Utc::now();
        inner.layers.insert(
            key,
            StoredLayer {
                layer: layer.clone(),
                stored_at: now,
                last_used: now,
            },
        );
        Ok(())
    }

    async fn acquire_mount_cache(
        &self,
        platform: &Platform,
        name: &str,
    ) -> StrataResult<MountCacheLease> {
        let key = (platform.clone(), name.to_string());
        let lock = {
            let mut inner = self.inner.lock().expect("store lock");
            inner
                .mount_locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;

        let contents = {
            let mut inner = self.inner.lock().expect("store lock");
            inner.mounts.entry(key).or_default().clone()
        };

        Ok(MountCacheLease::new(
            platform.clone(),
            name.to_string(),
            contents,
            guard,
        ))
    }

    async fn release_mount_cache(
        &self,
        lease: MountCacheLease,
        contents: FileTree,
    ) -> StrataResult<()> {
        let mut inner = self.inner.lock().expect("store lock");
        inner
            .mounts
            .insert((lease.platform.clone(), lease.name.clone()), contents);
        Ok(())
        // Lease (and with it the slot lock) drops here
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::step_identity;
    use crate::tree::FileEntry;

    fn layer(name: &str) -> FileTree {
        let mut tree = FileTree::new();
        tree.insert(name, FileEntry::regular(name.as_bytes()));
        tree
    }

    #[tokio::test]
    async fn layer_roundtrip() {
        let store = MemoryStore::new();
        let platform = Platform::new("linux", "amd64");
        let id = step_identity("install", None, &[]);

        assert!(store.get_layer(&platform, &id).await.unwrap().is_none());

        store.put_layer(&platform, &id, &layer("out")).await.unwrap();
        let fetched = store.get_layer(&platform, &id).await.unwrap().unwrap();
        assert!(fetched.contains("out"));
    }

    #[tokio::test]
    async fn platforms_do_not_share_entries() {
        let store = MemoryStore::new();
        let amd = Platform::new("linux", "amd64");
        let arm = Platform::new("linux", "arm64");
        let id = step_identity("install", None, &[]);

        store.put_layer(&amd, &id, &layer("out")).await.unwrap();
        assert!(store.get_layer(&arm, &id).await.unwrap().is_none());
        assert_eq!(store.layer_count(), 1);
    }

    #[tokio::test]
    async fn mount_cache_created_empty_and_persists() {
        let store = MemoryStore::new();
        let platform = Platform::new("linux", "amd64");

        let lease = store.acquire_mount_cache(&platform, "pkg").await.unwrap();
        assert!(lease.contents.is_empty());

        let mut mutated = lease.contents.clone();
        mutated.insert("downloaded.pkg", FileEntry::regular(b"bytes".as_slice()));
        store.release_mount_cache(lease, mutated).await.unwrap();

        let lease = store.acquire_mount_cache(&platform, "pkg").await.unwrap();
        assert!(lease.contents.contains("downloaded.pkg"));
        store
            .release_mount_cache(lease, FileTree::new())
            .await
            .ok();
    }

    #[tokio::test]
    async fn mount_cache_platform_scoped() {
        let store = MemoryStore::new();
        let amd = Platform::new("linux", "amd64");
        let arm = Platform::new("linux", "arm64");

        let lease = store.acquire_mount_cache(&amd, "pkg").await.unwrap();
        let mut mutated = FileTree::new();
        mutated.insert("a", FileEntry::regular(b"x".as_slice()));
        store.release_mount_cache(lease, mutated).await.unwrap();

        let lease = store.acquire_mount_cache(&arm, "pkg").await.unwrap();
        assert!(lease.contents.is_empty());
    }

    #[tokio::test]
    async fn injected_put_failure() {
        let store = MemoryStore::new();
        let platform = Platform::new("linux", "amd64");
        let id = step_identity("install", None, &[]);

        store.put_layer(&platform, &id, &layer("a")).await.unwrap();
        store.fail_puts(true);
        let id2 = step_identity("compile", None, &[]);
        assert!(store.put_layer(&platform, &id2, &layer("b")).await.is_err());

        // Pre-existing entry untouched
        assert!(store.get_layer(&platform, &id).await.unwrap().is_some());
    }
}
