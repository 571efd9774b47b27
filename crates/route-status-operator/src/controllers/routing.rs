//! Routing resource watches
//!
//! One watch per tracked kind, all sharing the same [`StatusSynchronizer`].
//! The watch stream is translated into synchronizer hooks:
//!
//! - `Apply` becomes an update when the key is already cached, otherwise an add
//! - `InitApply` (start-up and every re-list) replays the object as an add
//! - `InitDone` forgets cached keys the re-list no longer contains, marks the
//!   kind as synced for readiness, then re-applies the current address
//!
//! [`StatusSynchronizer`]: crate::sync::StatusSynchronizer

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::resource::{ResourceKey, RoutingResource, TrackedResource};

use super::ControllerContext;

/// Per-watch bookkeeping for re-list pruning
#[derive(Debug, Default)]
pub(crate) struct RoutingEvents {
    relisted: HashSet<ResourceKey>,
}

impl RoutingEvents {
    pub(crate) async fn handle<K: TrackedResource>(
        &mut self,
        ctx: &ControllerContext,
        event: Event<K>,
    ) {
        let sync = &ctx.synchronizer;

        match event {
            Event::Apply(obj) => {
                let new: RoutingResource = obj.into();
                let cached = match new.key() {
                    Some(key) => sync.cache().get(&key).await,
                    None => None,
                };
                let result = match cached {
                    Some(old) => sync.on_resource_update(old, new).await,
                    None => sync.on_resource_add(new).await,
                };
                if let Err(e) = result {
                    warn!(kind = %K::KIND, error = %e, "Failed to sync routing resource");
                }
            }
            Event::Delete(obj) => {
                let obj: RoutingResource = obj.into();
                if let Err(e) = sync.on_resource_delete(&obj).await {
                    warn!(kind = %K::KIND, error = %e, "Failed to handle routing resource delete");
                }
            }
            Event::Init => {
                debug!(kind = %K::KIND, "Listing routing resources");
                self.relisted.clear();
            }
            Event::InitApply(obj) => {
                let obj: RoutingResource = obj.into();
                if let Some(key) = obj.key() {
                    self.relisted.insert(key);
                }
                if let Err(e) = sync.on_resource_add(obj).await {
                    warn!(kind = %K::KIND, error = %e, "Failed to sync routing resource");
                }
            }
            Event::InitDone => {
                let relisted = std::mem::take(&mut self.relisted);
                let stale = sync.cache().retain_kind(K::KIND, &relisted).await;
                metrics::set_tracked_resources(sync.cache().len().await);

                info!(
                    kind = %K::KIND,
                    listed = relisted.len(),
                    pruned = stale.len(),
                    "Initial list complete"
                );

                ctx.health.mark_synced(K::KIND).await;
                sync.on_address_changed().await;
            }
        }
    }
}

/// Watch every resource of kind `K` across namespaces until the stream ends
pub async fn run<K: TrackedResource>(client: Client, ctx: Arc<ControllerContext>) {
    let api: Api<K> = Api::all(client);

    info!(kind = %K::KIND, "Starting routing resource watch");

    let mut stream = watcher::watcher(api, WatcherConfig::default())
        .default_backoff()
        .boxed();
    let mut events = RoutingEvents::default();

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => events.handle(&ctx, event).await,
            Err(e) => {
                warn!(kind = %K::KIND, error = %e, "Routing resource watch error");
            }
        }
    }

    error!(kind = %K::KIND, "Routing resource watch stream ended");
}
