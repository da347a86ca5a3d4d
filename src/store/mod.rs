//! Cache store
//!
//! The store is the engine's only persisted state. It holds two distinct
//! entry kinds: immutable layer entries keyed by (platform, step identity),
//! and mutable mount cache slots keyed by (platform, name). Keeping the
//! kinds apart in the data model is what guarantees mount cache contents
//! can never leak into a step's content hash or cached layer.
//!
//! Stores are injected (`Arc<dyn CacheStore>`), never global, so tests can
//! substitute the in-memory implementation.

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::error::StrataResult;
use crate::identity::StepIdentity;
use crate::platform::Platform;
use crate::tree::FileTree;
use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

/// Exclusive lease on a mount cache slot.
///
/// Holding the lease holds the slot's (platform, name) lock: concurrent
/// steps declaring the same cache on the same platform serialize here.
/// The lease is returned to the store via
/// [`CacheStore::release_mount_cache`], which persists the mutated
/// contents and drops the lock.
pub struct MountCacheLease {
    /// Cache slot name
    pub name: String,
    /// Owning platform namespace
    pub platform: Platform,
    /// Slot contents at acquisition time (empty on first use)
    pub contents: FileTree,
    _guard: OwnedMutexGuard<()>,
}

impl MountCacheLease {
    /// Assemble a lease; called by store implementations only
    pub fn new(
        platform: Platform,
        name: String,
        contents: FileTree,
        guard: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            name,
            platform,
            contents,
            _guard: guard,
        }
    }
}

/// Key/value store mapping step identities to layers, plus mount cache
/// slots, both namespaced by platform.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a stored layer, refreshing its last-used timestamp.
    ///
    /// Callers treat an `Err` from `get_layer` as a miss; an I/O failure
    /// on read never aborts the build.
    async fn get_layer(
        &self,
        platform: &Platform,
        identity: &StepIdentity,
    ) -> StrataResult<Option<FileTree>>;

    /// Store a layer durably. Idempotent: re-storing the same key with
    /// the same content is a no-op. A failed put must leave every
    /// pre-existing entry intact.
    async fn put_layer(
        &self,
        platform: &Platform,
        identity: &StepIdentity,
        layer: &FileTree,
    ) -> StrataResult<()>;

    /// Acquire the exclusive lease for a mount cache slot, creating it
    /// empty on first use per (platform, name).
    async fn acquire_mount_cache(
        &self,
        platform: &Platform,
        name: &str,
    ) -> StrataResult<MountCacheLease>;

    /// Persist a mount cache slot's mutated contents and release the lease
    async fn release_mount_cache(
        &self,
        lease: MountCacheLease,
        contents: FileTree,
    ) -> StrataResult<()>;
}
