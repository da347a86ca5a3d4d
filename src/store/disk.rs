//! On-disk cache store
//!
//! Layout under the store root:
//!
//! - `blobs/sha256/<aa>/<hash>`: content-addressed file blobs, shared
//!   across entries and platforms (identical bytes stored once)
//! - `index/<platform>/<identity>.json`: layer entries holding the file
//!   list with blob references plus stored-at / last-used timestamps
//! - `mounts/<platform>/<name>/`: mount cache slots
//! - `tmp/`: staging for atomic writes
//!
//! Every index and blob write goes through tmp-then-rename, so a failed
//! put never leaves a half-written entry visible and never corrupts a
//! pre-existing one. Blobs are verified against their hash on read.
//!
//! The layout is internal: external tooling interacts with the store only
//! through the [`CacheStore`] trait and the prune/status operations.

use crate::error::{StrataError, StrataResult};
use crate::identity::StepIdentity;
use crate::platform::Platform;
use crate::store::{CacheStore, MountCacheLease};
use crate::tree::{FileEntry, FileTree};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One file of a stored layer
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexFile {
    path: String,
    blob: String,
    executable: bool,
}

/// Index entry for a stored layer
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayerIndex {
    identity: String,
    files: Vec<IndexFile>,
    stored_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

/// Store footprint summary
#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub root: PathBuf,
    pub layer_entries: u64,
    pub mount_slots: u64,
    pub blob_count: u64,
    pub blob_bytes: u64,
}

/// Collect regular files under `root` up front so removal can go through
/// `tokio::fs` without holding a directory iterator across awaits.
fn files_under(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Persistent store rooted at a directory
pub struct DiskStore {
    root: PathBuf,
    mount_locks: Mutex<HashMap<(Platform, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl DiskStore {
    /// Open (and create if needed) a store at `root`
    pub async fn open(root: impl Into<PathBuf>) -> StrataResult<Self> {
        let root = root.into();
        for dir in ["blobs/sha256", "index", "mounts", "tmp"] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .map_err(|e| StrataError::store(format!("creating store layout under {}", root.display()), e))?;
        }
        Ok(Self {
            root,
            mount_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        let prefix = &digest[..digest.len().min(2)];
        self.root.join("blobs/sha256").join(prefix).join(digest)
    }

    fn index_path(&self, platform: &Platform, identity: &StepIdentity) -> PathBuf {
        self.root
            .join("index")
            .join(platform.slug())
            .join(format!("{}.json", identity.as_hex()))
    }

    fn mount_dir(&self, platform: &Platform, name: &str) -> PathBuf {
        self.root.join("mounts").join(platform.slug()).join(name)
    }

    /// Write bytes to `dest` atomically via a tmp file and rename
    async fn atomic_write(&self, dest: &Path, bytes: &[u8]) -> StrataResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StrataError::store(format!("creating {}", parent.display()), e))?;
        }
        let tmp = self.root.join("tmp").join(uuid::Uuid::new_v4().to_string());
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StrataError::store(format!("staging {}", dest.display()), e))?;
        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| StrataError::store(format!("committing {}", dest.display()), e))?;
        Ok(())
    }

    async fn read_index(
        &self,
        platform: &Platform,
        identity: &StepIdentity,
    ) -> StrataResult<Option<LayerIndex>> {
        let path = self.index_path(platform, identity);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StrataError::store(
                    format!("reading index {}", path.display()),
                    e,
                ))
            }
        };
        let index: LayerIndex = serde_json::from_slice(&bytes)?;
        Ok(Some(index))
    }

    /// Store footprint for `strata cache status`
    pub async fn status(&self) -> StrataResult<StoreStatus> {
        let mut layer_entries = 0u64;
        for entry in WalkDir::new(self.root.join("index"))
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("json")
            {
                layer_entries += 1;
            }
        }

        let mut mount_slots = 0u64;
        for entry in WalkDir::new(self.root.join("mounts"))
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_dir() {
                mount_slots += 1;
            }
        }

        let mut blob_count = 0u64;
        let mut blob_bytes = 0u64;
        for entry in WalkDir::new(self.root.join("blobs"))
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file() {
                blob_count += 1;
                blob_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        Ok(StoreStatus {
            root: self.root.clone(),
            layer_entries,
            mount_slots,
            blob_count,
            blob_bytes,
        })
    }

    /// Remove layer entries not used within `days`, then drop blobs no
    /// remaining entry references. Returns (entries removed, blobs removed).
    ///
    /// This is the externally-owned eviction policy; the engine itself
    /// never evicts.
    pub async fn prune_older_than(&self, days: u32) -> StrataResult<(usize, usize)> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut entries_removed = 0usize;

        let index_root = self.root.join("index");
        for path in files_under(&index_root) {
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            let Ok(index) = serde_json::from_slice::<LayerIndex>(&bytes) else {
                // Unreadable entry: treat as prunable
                let _ = tokio::fs::remove_file(&path).await;
                entries_removed += 1;
                continue;
            };
            if index.last_used < cutoff {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| StrataError::store(format!("removing {}", path.display()), e))?;
                entries_removed += 1;
            }
        }

        let blobs_removed = self.gc_blobs().await?;
        Ok((entries_removed, blobs_removed))
    }

    /// Remove blobs not referenced by any index entry
    async fn gc_blobs(&self) -> StrataResult<usize> {
        let mut referenced = BTreeSet::new();
        for path in files_under(&self.root.join("index")) {
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            if let Ok(index) = serde_json::from_slice::<LayerIndex>(&bytes) {
                for file in index.files {
                    referenced.insert(file.blob);
                }
            }
        }

        let mut removed = 0usize;
        for path in files_under(&self.root.join("blobs")) {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if referenced.contains(&name) {
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StrataError::store(format!("removing blob {}", name), e))?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get_layer(
        &self,
        platform: &Platform,
        identity: &StepIdentity,
    ) -> StrataResult<Option<FileTree>> {
        let Some(mut index) = self.read_index(platform, identity).await? else {
            return Ok(None);
        };

        let mut tree = FileTree::new();
        for file in &index.files {
            let blob_path = self.blob_path(&file.blob);
            let contents = tokio::fs::read(&blob_path)
                .await
                .map_err(|e| StrataError::store(format!("reading blob {}", file.blob), e))?;

            let entry = FileEntry {
                contents,
                executable: file.executable,
            };
            // Verify on read (corruption detection)
            if entry.digest() != file.blob {
                return Err(StrataError::StoreCorrupt {
                    key: identity.as_hex().to_string(),
                    reason: format!("blob hash mismatch for {}", file.path),
                });
            }
            tree.insert(PathBuf::from(&file.path), entry);
        }

        // Refresh last-used for external eviction; best-effort
        index.last_used = Utc::now();
        if let Ok(bytes) = serde_json::to_vec_pretty(&index) {
            if let Err(e) = self
                .atomic_write(&self.index_path(platform, identity), &bytes)
                .await
            {
                warn!("Failed to refresh last-used for {}: {}", identity, e);
            }
        }

        Ok(Some(tree))
    }

    async fn put_layer(
        &self,
        platform: &Platform,
        identity: &StepIdentity,
        layer: &FileTree,
    ) -> StrataResult<()> {
        // Idempotent re-store: identical content is a no-op
        if let Ok(Some(existing)) = self.read_index(platform, identity).await {
            let same = existing.files.len() == layer.len()
                && existing
                    .files
                    .iter()
                    .all(|f| layer.get(&f.path).map(|e| e.digest()) == Some(f.blob.clone()));
            if same {
                debug!("Layer {} already stored for {}", identity, platform);
                return Ok(());
            }
        }

        let mut files = Vec::with_capacity(layer.len());
        for (path, entry) in layer.iter() {
            let digest = entry.digest();
            let blob_path = self.blob_path(&digest);
            if !blob_path.exists() {
                self.atomic_write(&blob_path, &entry.contents).await?;
            }
            files.push(IndexFile {
                path: path.to_string_lossy().replace('\\', "/"),
                blob: digest,
                executable: entry.executable,
            });
        }

        let now = Utc::now();
        let index = LayerIndex {
            identity: identity.as_hex().to_string(),
            files,
            stored_at: now,
            last_used: now,
        };
        let bytes = serde_json::to_vec_pretty(&index)?;
        self.atomic_write(&self.index_path(platform, identity), &bytes)
            .await?;
        debug!("Stored layer {} for {}", identity, platform);
        Ok(())
    }

    async fn acquire_mount_cache(
        &self,
        platform: &Platform,
        name: &str,
    ) -> StrataResult<MountCacheLease> {
        let key = (platform.clone(), name.to_string());
        let lock = {
            let mut locks = self.mount_locks.lock().expect("mount lock registry");
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;

        let dir = self.mount_dir(platform, name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StrataError::store(format!("creating mount slot {}", dir.display()), e))?;
        let contents = FileTree::from_dir(&dir)?;

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
        let dir = self.mount_dir(&lease.platform, &lease.name);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await.map_err(|e| {
                StrataError::store(format!("clearing mount slot {}", dir.display()), e)
            })?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StrataError::store(format!("creating mount slot {}", dir.display()), e))?;
        contents.write_to_dir(&dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::step_identity;
    use tempfile::TempDir;

    fn layer(entries: &[(&str, &str)]) -> FileTree {
        let mut tree = FileTree::new();
        for (path, contents) in entries {
            tree.insert(*path, FileEntry::regular(contents.as_bytes()));
        }
        tree
    }

    #[tokio::test]
    async fn layer_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path().join("store")).await.unwrap();
        let platform = Platform::new("linux", "amd64");
        let id = step_identity("install", None, &[]);

        assert!(store.get_layer(&platform, &id).await.unwrap().is_none());

        let original = layer(&[("bin/app", "binary"), ("etc/conf", "cfg")]);
        store.put_layer(&platform, &id, &original).await.unwrap();

        let fetched = store.get_layer(&platform, &id).await.unwrap().unwrap();
        assert_eq!(fetched, original);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let platform = Platform::new("linux", "amd64");
        let id = step_identity("install", None, &[]);

        {
            let store = DiskStore::open(&root).await.unwrap();
            store
                .put_layer(&platform, &id, &layer(&[("a", "1")]))
                .await
                .unwrap();
        }

        let store = DiskStore::open(&root).await.unwrap();
        assert!(store.get_layer(&platform, &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn identical_blobs_stored_once() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path().join("store")).await.unwrap();
        let platform = Platform::new("linux", "amd64");

        let id1 = step_identity("a", None, &[]);
        let id2 = step_identity("b", None, &[]);
        store
            .put_layer(&platform, &id1, &layer(&[("x", "same bytes")]))
            .await
            .unwrap();
        store
            .put_layer(&platform, &id2, &layer(&[("y", "same bytes")]))
            .await
            .unwrap();

        let status = store.status().await.unwrap();
        assert_eq!(status.layer_entries, 2);
        assert_eq!(status.blob_count, 1);
    }

    #[tokio::test]
    async fn corrupt_blob_detected() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path().join("store")).await.unwrap();
        let platform = Platform::new("linux", "amd64");
        let id = step_identity("install", None, &[]);

        let tree = layer(&[("bin/app", "binary")]);
        store.put_layer(&platform, &id, &tree).await.unwrap();

        // Flip the blob on disk
        let digest = tree.get("bin/app").unwrap().digest();
        std::fs::write(store.blob_path(&digest), b"tampered").unwrap();

        let err = store.get_layer(&platform, &id).await.unwrap_err();
        assert!(matches!(err, StrataError::StoreCorrupt { .. }));
    }

    #[tokio::test]
    async fn mount_slot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path().join("store")).await.unwrap();
        let platform = Platform::new("linux", "amd64");

        let lease = store.acquire_mount_cache(&platform, "pkg").await.unwrap();
        assert!(lease.contents.is_empty());
        store
            .release_mount_cache(lease, layer(&[("cached/a.tar", "pkg bytes")]))
            .await
            .unwrap();

        let lease = store.acquire_mount_cache(&platform, "pkg").await.unwrap();
        assert!(lease.contents.contains("cached/a.tar"));
        let contents = lease.contents.clone();
        store.release_mount_cache(lease, contents).await.unwrap();
    }

    #[tokio::test]
    async fn prune_removes_stale_entries_and_blobs() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path().join("store")).await.unwrap();
        let platform = Platform::new("linux", "amd64");
        let id = step_identity("install", None, &[]);

        store
            .put_layer(&platform, &id, &layer(&[("a", "1")]))
            .await
            .unwrap();

        // Nothing is older than 30 days yet
        let (entries, blobs) = store.prune_older_than(30).await.unwrap();
        assert_eq!((entries, blobs), (0, 0));

        // Backdate the entry
        let index_path = store.index_path(&platform, &id);
        let mut index: LayerIndex =
            serde_json::from_slice(&std::fs::read(&index_path).unwrap()).unwrap();
        index.last_used = Utc::now() - Duration::days(90);
        std::fs::write(&index_path, serde_json::to_vec(&index).unwrap()).unwrap();

        let (entries, blobs) = store.prune_older_than(30).await.unwrap();
        assert_eq!(entries, 1);
        assert_eq!(blobs, 1);
        assert!(store.get_layer(&platform, &id).await.unwrap().is_none());
    }

    #[test]
    fn format_bytes_scales() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
