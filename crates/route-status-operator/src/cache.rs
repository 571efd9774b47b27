//! Write-through cache of last-applied routing resource status
//!
//! Every status write goes through [`StatusCache::apply_if_changed`], which
//! compares the desired address with what was last recorded for the key and
//! only calls the patcher when they differ. The cache is the process-lifetime
//! record of what was actually applied; the API server is not re-read before
//! each write.
//!
//! ## Locking
//!
//! The key map sits behind an `RwLock` that is only held for lookups and
//! insertions. Each snapshot has its own `Mutex`, held across
//! compare → patch → record, so two reconciliations of the same key serialize
//! while reconciliations of different keys run in parallel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::address::Address;
use crate::patcher::{PatchError, StatusPatcher};
use crate::resource::{ResourceKey, ResourceKind, RoutingResource};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{0} is already tracked")]
    DuplicateSeed(ResourceKey),
    #[error("{0} is not tracked")]
    NotTracked(ResourceKey),
    #[error("status patch for {key} failed: {source}")]
    Patch {
        key: ResourceKey,
        #[source]
        source: PatchError,
    },
}

type Slot = Arc<Mutex<RoutingResource>>;

/// Last-known snapshot per tracked routing resource
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: RwLock<HashMap<ResourceKey, Slot>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, key: &ResourceKey) -> Option<Slot> {
        self.entries.read().await.get(key).cloned()
    }

    /// Insert a snapshot for a key that is not tracked yet.
    ///
    /// Seeding a tracked key is a lifecycle bug and is reported as
    /// [`CacheError::DuplicateSeed`].
    pub async fn seed(&self, key: ResourceKey, snapshot: RoutingResource) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            return Err(CacheError::DuplicateSeed(key));
        }
        entries.insert(key, Arc::new(Mutex::new(snapshot)));
        Ok(())
    }

    /// Clone of the snapshot for `key`
    pub async fn get(&self, key: &ResourceKey) -> Option<RoutingResource> {
        let slot = self.slot(key).await?;
        let snapshot = slot.lock().await;
        Some(snapshot.clone())
    }

    pub async fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Record the body observed on a watch event.
    ///
    /// A new key is inserted as-is. For a tracked key only metadata and spec
    /// are taken from `snapshot`; the last-applied status is kept, since the
    /// event may predate our own write. Waits for any in-flight apply on the
    /// same key.
    pub async fn observe(&self, key: ResourceKey, snapshot: RoutingResource) {
        if let Some(slot) = self.slot(&key).await {
            refresh(&mut *slot.lock().await, snapshot);
            return;
        }

        let mut entries = self.entries.write().await;
        match entries.get(&key).cloned() {
            Some(slot) => {
                drop(entries);
                refresh(&mut *slot.lock().await, snapshot);
            }
            None => {
                entries.insert(key, Arc::new(Mutex::new(snapshot)));
            }
        }
    }

    /// Refresh metadata and spec for `key` only if it is already tracked.
    ///
    /// The last-applied status is kept, as in [`StatusCache::observe`].
    pub async fn refresh_if_tracked(&self, key: &ResourceKey, snapshot: RoutingResource) -> bool {
        match self.slot(key).await {
            Some(slot) => {
                refresh(&mut *slot.lock().await, snapshot);
                true
            }
            None => false,
        }
    }

    /// Patch `desired` into the resource if it differs from the cached status.
    ///
    /// Returns `Ok(false)` without calling the patcher when the cached status
    /// already equals `desired`. On patch failure the snapshot is left
    /// untouched so the next trigger retries the same comparison.
    pub async fn apply_if_changed(
        &self,
        key: &ResourceKey,
        desired: &Address,
        patcher: &dyn StatusPatcher,
    ) -> Result<bool, CacheError> {
        let slot = self
            .slot(key)
            .await
            .ok_or_else(|| CacheError::NotTracked(key.clone()))?;

        let mut snapshot = slot.lock().await;
        if snapshot.status_address() == *desired {
            debug!(key = %key, "Status unchanged");
            return Ok(false);
        }

        patcher
            .patch_status(key, desired)
            .await
            .map_err(|source| CacheError::Patch {
                key: key.clone(),
                source,
            })?;

        snapshot.set_status_address(desired);
        Ok(true)
    }

    /// Drop the entry for `key`. Returns whether it was tracked.
    pub async fn remove(&self, key: &ResourceKey) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Keys currently tracked, in stable order
    pub async fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every key of `kind` that is not in `live`.
    ///
    /// Used after a re-list to forget resources deleted while the watch was
    /// disconnected. Returns the removed keys.
    pub async fn retain_kind(
        &self,
        kind: ResourceKind,
        live: &HashSet<ResourceKey>,
    ) -> Vec<ResourceKey> {
        let mut entries = self.entries.write().await;
        let stale: Vec<ResourceKey> = entries
            .keys()
            .filter(|k| k.kind == kind && !live.contains(*k))
            .cloned()
            .collect();

        for key in &stale {
            entries.remove(key);
            warn!(key = %key, "Dropped resource missing from re-list");
        }

        stale
    }
}

/// Replace the cached body with `incoming`, keeping the recorded status
fn refresh(cached: &mut RoutingResource, mut incoming: RoutingResource) {
    incoming.set_status_address(&cached.status_address());
    *cached = incoming;
}
