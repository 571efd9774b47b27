//! Proxy Service watch
//!
//! Watches the single Service named in the configuration through a
//! field-selected watch and turns the raw event stream into
//! [`ServiceAddressWatcher`] add/update/delete calls.
//!
//! A re-list that no longer contains the Service counts as a delete, so a
//! removal missed while the watch was disconnected still clears the address.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tracing::{debug, error, info, warn};

use crate::watcher::ServiceAddressWatcher;

use super::ControllerContext;

/// Tracks the last seen Service so updates can carry the old object
#[derive(Debug, Default)]
pub(crate) struct ServiceEvents {
    last: Option<Service>,
    relisted: Option<Service>,
}

impl ServiceEvents {
    pub(crate) fn handle(&mut self, target: &ServiceAddressWatcher, event: Event<Service>) {
        match event {
            Event::Apply(service) => {
                match self.last.as_ref() {
                    Some(old) => target.on_update(old, &service),
                    None => target.on_add(&service),
                };
                self.last = Some(service);
            }
            Event::Delete(service) => {
                target.on_delete(&service);
                self.last = None;
            }
            Event::Init => {
                self.relisted = None;
            }
            Event::InitApply(service) => {
                self.relisted = Some(service);
            }
            Event::InitDone => match (self.last.take(), self.relisted.take()) {
                (Some(old), Some(new)) => {
                    target.on_update(&old, &new);
                    self.last = Some(new);
                }
                (None, Some(new)) => {
                    target.on_add(&new);
                    self.last = Some(new);
                }
                (Some(old), None) => {
                    info!("Proxy service missing from re-list");
                    target.on_delete(&old);
                }
                (None, None) => {
                    debug!("Proxy service not found");
                }
            },
        }
    }
}

/// Watch the proxy Service until the stream ends
pub async fn run(client: Client, ctx: Arc<ControllerContext>) {
    let target = ctx.address_watcher.clone();
    let services: Api<Service> = Api::namespaced(client, target.namespace());
    let config = WatcherConfig::default().fields(&format!("metadata.name={}", target.name()));

    info!(
        namespace = %target.namespace(),
        name = %target.name(),
        "Starting proxy Service watch"
    );

    let mut stream = watcher::watcher(services, config).default_backoff().boxed();
    let mut events = ServiceEvents::default();

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => events.handle(&target, event),
            Err(e) => {
                warn!(error = %e, "Proxy Service watch error");
            }
        }
    }

    error!("Proxy Service watch stream ended");
}
