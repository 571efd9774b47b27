//! Status synchronizer
//!
//! Reconciles routing resources against the current proxy address. Two event
//! sources drive it: per-resource add/update/delete hooks from the routing
//! watches, and [`StatusSynchronizer::on_address_changed`] from the re-sync
//! loop whenever the address register is published. Both paths go through the
//! same [`StatusCache`] so they can interleave freely.
//!
//! A patch failure never stops other resources from being reconciled. There is
//! no internal retry: the next event for the resource, or the next address
//! change, re-runs the comparison.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::address::AddressRegister;
use crate::cache::{CacheError, StatusCache};
use crate::class::ClassFilter;
use crate::metrics;
use crate::patcher::StatusPatcher;
use crate::resource::{ResourceKey, ResourceKind, RoutingResource};

/// Default number of reconciliations run in parallel during a re-sync
pub const DEFAULT_RESYNC_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{kind} object is missing metadata.namespace or metadata.name")]
    MissingField { kind: ResourceKind },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Result of reconciling one routing resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Status was patched
    Applied,
    /// Status already matched the address
    Unchanged,
    /// Resource belongs to another controller class, or vanished mid-pass
    Skipped,
    /// Resource was dropped from the cache
    Removed,
}

/// Tally of a re-sync pass over every tracked resource
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub applied: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: Vec<ResourceKey>,
}

impl ResyncReport {
    pub fn total(&self) -> usize {
        self.applied + self.unchanged + self.skipped + self.failed.len()
    }
}

/// Copies the proxy address into the status of every owned routing resource
pub struct StatusSynchronizer {
    filter: ClassFilter,
    register: Arc<AddressRegister>,
    cache: Arc<StatusCache>,
    patcher: Arc<dyn StatusPatcher>,
    resync_concurrency: usize,
}

impl StatusSynchronizer {
    pub fn new(
        filter: ClassFilter,
        register: Arc<AddressRegister>,
        cache: Arc<StatusCache>,
        patcher: Arc<dyn StatusPatcher>,
    ) -> Self {
        Self {
            filter,
            register,
            cache,
            patcher,
            resync_concurrency: DEFAULT_RESYNC_CONCURRENCY,
        }
    }

    /// Bound the number of parallel reconciliations during a re-sync
    pub fn with_resync_concurrency(mut self, concurrency: usize) -> Self {
        self.resync_concurrency = concurrency.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub fn register(&self) -> &Arc<AddressRegister> {
        &self.register
    }

    /// A routing resource was created (or replayed after a restart)
    #[instrument(skip(self, obj), fields(
        kind = %obj.kind(),
        namespace = %obj.metadata().namespace.as_deref().unwrap_or("unknown"),
        name = %obj.metadata().name.as_deref().unwrap_or("unknown"),
    ))]
    pub async fn on_resource_add(&self, obj: RoutingResource) -> Result<SyncOutcome, SyncError> {
        self.reconcile(obj).await
    }

    /// A routing resource changed; only the new state is considered
    #[instrument(skip(self, _old, new), fields(
        kind = %new.kind(),
        namespace = %new.metadata().namespace.as_deref().unwrap_or("unknown"),
        name = %new.metadata().name.as_deref().unwrap_or("unknown"),
    ))]
    pub async fn on_resource_update(
        &self,
        _old: RoutingResource,
        new: RoutingResource,
    ) -> Result<SyncOutcome, SyncError> {
        self.reconcile(new).await
    }

    /// A routing resource was deleted; its cache entry is dropped
    /// regardless of class
    #[instrument(skip(self, obj), fields(kind = %obj.kind()))]
    pub async fn on_resource_delete(
        &self,
        obj: &RoutingResource,
    ) -> Result<SyncOutcome, SyncError> {
        let key = identity(obj)?;
        if self.cache.remove(&key).await {
            debug!(key = %key, "Stopped tracking deleted resource");
        }
        Ok(SyncOutcome::Removed)
    }

    /// Re-apply the current address to every tracked resource.
    ///
    /// Each resource's class is checked again against its cached body.
    /// Failures are collected into the report and never abort the pass.
    pub async fn on_address_changed(&self) -> ResyncReport {
        let keys = self.cache.keys().await;
        let address = self.register.current();

        info!(
            address = %address,
            resources = keys.len(),
            "Re-syncing status for tracked resources"
        );

        let results: Vec<(ResourceKey, Result<SyncOutcome, SyncError>)> = stream::iter(keys)
            .map(|key| async move {
                let result = self.resync_key(&key).await;
                (key, result)
            })
            .buffer_unordered(self.resync_concurrency)
            .collect()
            .await;

        let mut report = ResyncReport::default();
        for (key, result) in results {
            match result {
                Ok(SyncOutcome::Applied) => report.applied += 1,
                Ok(SyncOutcome::Unchanged) => report.unchanged += 1,
                Ok(SyncOutcome::Skipped) | Ok(SyncOutcome::Removed) => report.skipped += 1,
                Err(_) => report.failed.push(key),
            }
        }
        report.failed.sort();

        metrics::record_resync(report.failed.len());
        metrics::set_tracked_resources(self.cache.len().await);

        info!(
            applied = report.applied,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Re-sync complete"
        );

        report
    }

    async fn reconcile(&self, obj: RoutingResource) -> Result<SyncOutcome, SyncError> {
        let key = identity(&obj)?;

        let class = obj.class();
        if !self.filter.matches(&class) {
            // Previously applied status is left as-is
            self.cache.refresh_if_tracked(&key, obj).await;
            debug!(
                class = %class,
                controller_class = %self.filter.controller_class(),
                "Ingress class does not match, skipping"
            );
            metrics::record_skipped(key.kind);
            return Ok(SyncOutcome::Skipped);
        }

        self.cache.observe(key.clone(), obj).await;
        self.apply(&key).await
    }

    async fn resync_key(&self, key: &ResourceKey) -> Result<SyncOutcome, SyncError> {
        let Some(snapshot) = self.cache.get(key).await else {
            debug!(key = %key, "Resource no longer tracked, skipping");
            return Ok(SyncOutcome::Skipped);
        };

        if !self.filter.matches(&snapshot.class()) {
            metrics::record_skipped(key.kind);
            return Ok(SyncOutcome::Skipped);
        }

        self.apply(key).await
    }

    async fn apply(&self, key: &ResourceKey) -> Result<SyncOutcome, SyncError> {
        let desired = self.register.current();

        match self
            .cache
            .apply_if_changed(key, &desired, self.patcher.as_ref())
            .await
        {
            Ok(true) => {
                info!(key = %key, address = %desired, "Updated status address");
                metrics::record_patch(key.kind, "applied");
                Ok(SyncOutcome::Applied)
            }
            Ok(false) => Ok(SyncOutcome::Unchanged),
            Err(CacheError::NotTracked(_)) => {
                debug!(key = %key, "Resource deleted during reconciliation");
                Ok(SyncOutcome::Skipped)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to update status address");
                metrics::record_patch(key.kind, "failed");
                Err(e.into())
            }
        }
    }
}

fn identity(obj: &RoutingResource) -> Result<ResourceKey, SyncError> {
    obj.key()
        .ok_or(SyncError::MissingField { kind: obj.kind() })
}
