//! End-to-end status propagation
//!
//! Drives the engine the way the watch loops do: proxy Service events go
//! through the [`ServiceAddressWatcher`] into the register, routing events go
//! through the [`StatusSynchronizer`], and re-syncs are triggered explicitly.
//! Status writes land in a recording patcher instead of an API server.
//!
//! ```bash
//! cargo test -p route-status-operator --test status_propagation
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service, ServiceStatus};
use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use route_status_operator::class::annotations;
use route_status_operator::patcher::PatchError;
use route_status_operator::resource::{HTTPProxySpec, VirtualHost};
use route_status_operator::{
    Address, AddressEntry, AddressRegister, ClassFilter, HTTPProxy, ResourceKey, ResourceKind,
    RoutingResource, ServiceAddressWatcher, StatusCache, StatusPatcher, StatusSynchronizer,
    SyncOutcome,
};

/// Patcher that records every write and can be told to reject some keys
#[derive(Default)]
struct RecordingPatcher {
    writes: Mutex<Vec<(ResourceKey, Address)>>,
    rejected: Mutex<Vec<String>>,
}

impl RecordingPatcher {
    fn writes(&self) -> Vec<(ResourceKey, Address)> {
        self.writes.lock().expect("lock poisoned").clone()
    }

    fn last_by_key(&self) -> HashMap<ResourceKey, Address> {
        self.writes().into_iter().collect()
    }

    fn reject(&self, name: &str) {
        self.rejected
            .lock()
            .expect("lock poisoned")
            .push(name.to_string());
    }

    fn accept_all(&self) {
        self.rejected.lock().expect("lock poisoned").clear();
    }
}

#[async_trait]
impl StatusPatcher for RecordingPatcher {
    async fn patch_status(&self, key: &ResourceKey, status: &Address) -> Result<(), PatchError> {
        if self
            .rejected
            .lock()
            .expect("lock poisoned")
            .contains(&key.name)
        {
            return Err(PatchError::Rejected(format!("{key} is read-only")));
        }
        self.writes
            .lock()
            .expect("lock poisoned")
            .push((key.clone(), status.clone()));
        Ok(())
    }
}

struct Harness {
    watcher: ServiceAddressWatcher,
    sync: StatusSynchronizer,
    patcher: Arc<RecordingPatcher>,
}

fn harness(filter: ClassFilter) -> Harness {
    let register = Arc::new(AddressRegister::new());
    let patcher = Arc::new(RecordingPatcher::default());
    let sync = StatusSynchronizer::new(
        filter,
        register.clone(),
        Arc::new(StatusCache::new()),
        patcher.clone(),
    )
    .with_resync_concurrency(2);
    let watcher = ServiceAddressWatcher::new("projectcontour", "envoy", register);

    Harness {
        watcher,
        sync,
        patcher,
    }
}

fn envoy(ingress: Vec<LoadBalancerIngress>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some("envoy".to_string()),
            namespace: Some("projectcontour".to_string()),
            ..Default::default()
        },
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(ingress),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn lb_ip(ip: &str) -> LoadBalancerIngress {
    LoadBalancerIngress {
        ip: Some(ip.to_string()),
        ..Default::default()
    }
}

fn lb_hostname(hostname: &str) -> LoadBalancerIngress {
    LoadBalancerIngress {
        hostname: Some(hostname.to_string()),
        ..Default::default()
    }
}

fn annotated_ingress(namespace: &str, name: &str, class: Option<&str>) -> RoutingResource {
    let annotations = class.map(|c| {
        let mut annots = BTreeMap::new();
        annots.insert(annotations::INGRESS_CLASS.to_string(), c.to_string());
        annots
    });
    RoutingResource::from(Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations,
            ..Default::default()
        },
        ..Default::default()
    })
}

fn spec_class_ingress(namespace: &str, name: &str, class: &str) -> RoutingResource {
    RoutingResource::from(Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(class.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn proxy(namespace: &str, name: &str, class: Option<&str>) -> RoutingResource {
    let mut proxy = HTTPProxy::new(
        name,
        HTTPProxySpec {
            virtualhost: Some(VirtualHost {
                fqdn: format!("{name}.example.com"),
            }),
            ingress_class_name: class.map(str::to_string),
            ..Default::default()
        },
    );
    proxy.metadata.namespace = Some(namespace.to_string());
    RoutingResource::from(proxy)
}

fn key(namespace: &str, name: &str, kind: ResourceKind) -> ResourceKey {
    ResourceKey::new(namespace, name, kind)
}

#[tokio::test]
async fn address_flows_from_service_to_every_owned_resource() {
    let h = harness(ClassFilter::new("phony"));

    // Resources show up before the proxy has an address
    for obj in [
        annotated_ingress("shop", "web", Some("phony")),
        spec_class_ingress("shop", "api", "phony"),
        proxy("blog", "site", Some("phony")),
        annotated_ingress("shop", "legacy", None),
        annotated_ingress("shop", "foreign", Some("other")),
    ] {
        h.sync.on_resource_add(obj).await.expect("add should succeed");
    }
    assert!(h.patcher.writes().is_empty());

    assert!(h.watcher.on_add(&envoy(vec![lb_ip("203.0.113.10")])));
    let report = h.sync.on_address_changed().await;
    assert_eq!(report.applied, 3);
    assert!(report.failed.is_empty());

    let expected = Address::new(vec![AddressEntry::ip("203.0.113.10")]);
    let writes = h.patcher.last_by_key();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[&key("shop", "web", ResourceKind::Ingress)], expected);
    assert_eq!(writes[&key("shop", "api", ResourceKind::Ingress)], expected);
    assert_eq!(writes[&key("blog", "site", ResourceKind::HttpProxy)], expected);
}

#[tokio::test]
async fn repeated_resync_without_change_writes_nothing() {
    let h = harness(ClassFilter::new(""));
    h.watcher.on_add(&envoy(vec![lb_hostname("lb.example.com")]));
    h.sync
        .on_resource_add(annotated_ingress("shop", "web", None))
        .await
        .expect("add should succeed");
    assert_eq!(h.patcher.writes().len(), 1);

    // Service update that leaves the address alone still signals
    h.watcher.on_update(
        &envoy(vec![lb_hostname("lb.example.com")]),
        &envoy(vec![lb_hostname("lb.example.com")]),
    );
    let report = h.sync.on_address_changed().await;

    assert_eq!(report.unchanged, 1);
    assert_eq!(h.patcher.writes().len(), 1);
}

#[tokio::test]
async fn replayed_events_with_stale_status_write_once() {
    let h = harness(ClassFilter::new(""));
    h.watcher.on_add(&envoy(vec![lb_ip("10.0.0.1")]));

    let web = annotated_ingress("shop", "web", None);
    for _ in 0..2 {
        h.sync
            .on_resource_add(web.clone())
            .await
            .expect("add should succeed");
    }
    for _ in 0..2 {
        h.sync
            .on_resource_update(web.clone(), web.clone())
            .await
            .expect("update should succeed");
    }
    h.sync.on_address_changed().await;

    assert_eq!(h.patcher.writes().len(), 1);
}

#[tokio::test]
async fn address_change_replaces_status_in_order() {
    let h = harness(ClassFilter::new(""));
    h.watcher.on_add(&envoy(vec![lb_ip("10.0.0.1")]));
    h.sync
        .on_resource_add(proxy("blog", "site", None))
        .await
        .expect("add should succeed");

    h.watcher.on_update(
        &envoy(vec![lb_ip("10.0.0.1")]),
        &envoy(vec![lb_hostname("lb.example.com"), lb_ip("10.0.0.2")]),
    );
    h.sync.on_address_changed().await;

    let cached = h
        .sync
        .cache()
        .get(&key("blog", "site", ResourceKind::HttpProxy))
        .await
        .expect("proxy should be tracked");
    assert_eq!(
        cached.status_address(),
        Address::new(vec![
            AddressEntry::hostname("lb.example.com"),
            AddressEntry::ip("10.0.0.2"),
        ])
    );
}

#[tokio::test]
async fn deleting_proxy_service_clears_status() {
    let h = harness(ClassFilter::new(""));
    let service = envoy(vec![lb_ip("10.0.0.1")]);
    h.watcher.on_add(&service);
    h.sync
        .on_resource_add(annotated_ingress("shop", "web", None))
        .await
        .expect("add should succeed");

    assert!(h.watcher.on_delete(&service));
    let report = h.sync.on_address_changed().await;
    assert_eq!(report.applied, 1);

    let writes = h.patcher.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes[1].1.is_empty());
}

#[tokio::test]
async fn unrelated_services_are_ignored() {
    let h = harness(ClassFilter::new(""));
    h.sync
        .on_resource_add(annotated_ingress("shop", "web", None))
        .await
        .expect("add should succeed");

    let mut potato = envoy(vec![lb_ip("10.9.9.9")]);
    potato.metadata.name = Some("potato".to_string());
    let mut elsewhere = envoy(vec![lb_ip("10.9.9.9")]);
    elsewhere.metadata.namespace = Some("elephant".to_string());

    assert!(!h.watcher.on_add(&potato));
    assert!(!h.watcher.on_add(&elsewhere));
    assert!(h.sync.register().current().is_empty());
    assert!(h.patcher.writes().is_empty());
}

#[tokio::test]
async fn failed_write_is_retried_on_next_resync() {
    let h = harness(ClassFilter::new(""));
    for name in ["a", "b", "c"] {
        h.sync
            .on_resource_add(annotated_ingress("shop", name, None))
            .await
            .expect("add should succeed");
    }

    h.patcher.reject("b");
    h.watcher.on_add(&envoy(vec![lb_ip("10.0.0.1")]));
    let report = h.sync.on_address_changed().await;

    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, vec![key("shop", "b", ResourceKind::Ingress)]);
    assert!(h
        .sync
        .cache()
        .get(&key("shop", "b", ResourceKind::Ingress))
        .await
        .expect("b should be tracked")
        .status_address()
        .is_empty());

    h.patcher.accept_all();
    let report = h.sync.on_address_changed().await;
    assert_eq!(report.applied, 1);
    assert_eq!(report.unchanged, 2);
}

#[tokio::test]
async fn class_change_and_delete_stop_updates() {
    let h = harness(ClassFilter::new("phony"));
    h.watcher.on_add(&envoy(vec![lb_ip("10.0.0.1")]));

    let web = annotated_ingress("shop", "web", Some("phony"));
    assert_eq!(
        h.sync.on_resource_add(web.clone()).await.expect("add"),
        SyncOutcome::Applied
    );

    let moved = annotated_ingress("shop", "web", Some("other"));
    assert_eq!(
        h.sync.on_resource_update(web, moved.clone()).await.expect("update"),
        SyncOutcome::Skipped
    );

    h.watcher.on_update(
        &envoy(vec![lb_ip("10.0.0.1")]),
        &envoy(vec![lb_ip("10.0.0.2")]),
    );
    let report = h.sync.on_address_changed().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(h.patcher.writes().len(), 1);

    h.sync.on_resource_delete(&moved).await.expect("delete");
    assert!(h.sync.cache().is_empty().await);
    assert_eq!(h.sync.on_address_changed().await.total(), 0);
}

#[tokio::test]
async fn default_class_claims_unclassed_and_named_resources() {
    let h = harness(ClassFilter::new("").with_default_class(Some("contour".to_string())));
    h.watcher.on_add(&envoy(vec![lb_ip("10.0.0.1")]));

    for obj in [
        annotated_ingress("shop", "unclassed", None),
        annotated_ingress("shop", "named", Some("contour")),
        annotated_ingress("shop", "foreign", Some("other")),
    ] {
        h.sync.on_resource_add(obj).await.expect("add should succeed");
    }

    let written: Vec<String> = h
        .patcher
        .writes()
        .into_iter()
        .map(|(key, _)| key.name)
        .collect();
    assert_eq!(written, vec!["unclassed", "named"]);
}
