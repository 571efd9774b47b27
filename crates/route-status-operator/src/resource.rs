//! Routing resource kinds tracked for status propagation
//!
//! Two kinds carry an independent `status.loadBalancer`: the built-in
//! `networking.k8s.io/v1` Ingress and the `projectcontour.io/v1` HTTPProxy
//! custom resource. Event delivery is typed per kind; [`RoutingResource`] is
//! the tagged variant the status cache stores.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::networking::v1::{Ingress, IngressStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::address::{Address, AddressEntry};
use crate::class;

/// HTTPProxy virtual host
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    /// Fully qualified domain name served by this proxy
    pub fqdn: String,
}

/// HTTPProxy spec
///
/// Only the fields that influence ownership are typed; routing configuration
/// is carried opaquely because this controller never interprets it.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "projectcontour.io",
    version = "v1",
    kind = "HTTPProxy",
    plural = "httpproxies",
    shortname = "proxy",
    namespaced,
    status = "HTTPProxyStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"FQDN", "type":"string", "jsonPath":".spec.virtualhost.fqdn"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualhost: Option<VirtualHost>,
    /// Ingress class that should process this proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<serde_json::Value>,
}

/// HTTPProxy load balancer status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyLoadBalancerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Vec<AddressEntry>>,
}

/// HTTPProxy status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HTTPProxyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<ProxyLoadBalancerStatus>,
}

/// Kind of a tracked routing resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Ingress,
    #[serde(rename = "HTTPProxy")]
    HttpProxy,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Ingress, ResourceKind::HttpProxy];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ingress => "Ingress",
            ResourceKind::HttpProxy => "HTTPProxy",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ingress" | "ingresses" => Ok(ResourceKind::Ingress),
            "httpproxy" | "httpproxies" => Ok(ResourceKind::HttpProxy),
            other => Err(format!("unknown resource kind {other:?}")),
        }
    }
}

/// Identity of a tracked routing resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
    pub kind: ResourceKind,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Full body of a tracked routing resource
#[derive(Clone, Debug, PartialEq)]
pub enum RoutingResource {
    Ingress(Ingress),
    HttpProxy(HTTPProxy),
}

impl RoutingResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            RoutingResource::Ingress(_) => ResourceKind::Ingress,
            RoutingResource::HttpProxy(_) => ResourceKind::HttpProxy,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            RoutingResource::Ingress(i) => &i.metadata,
            RoutingResource::HttpProxy(p) => &p.metadata,
        }
    }

    /// Key for this object, `None` when namespace or name is missing
    pub fn key(&self) -> Option<ResourceKey> {
        let meta = self.metadata();
        let namespace = meta.namespace.as_deref().filter(|s| !s.is_empty())?;
        let name = meta.name.as_deref().filter(|s| !s.is_empty())?;
        Some(ResourceKey::new(namespace, name, self.kind()))
    }

    /// Ingress class of this object, empty when unset
    pub fn class(&self) -> String {
        match self {
            RoutingResource::Ingress(i) => class::resource_class(
                &i.metadata,
                i.spec.as_ref().and_then(|s| s.ingress_class_name.as_deref()),
            ),
            RoutingResource::HttpProxy(p) => {
                class::resource_class(&p.metadata, p.spec.ingress_class_name.as_deref())
            }
        }
    }

    /// Address currently recorded in the object's status
    pub fn status_address(&self) -> Address {
        match self {
            RoutingResource::Ingress(i) => i
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .map(Address::from_ingress_status)
                .unwrap_or_default(),
            RoutingResource::HttpProxy(p) => Address::from_entries(
                p.status
                    .as_ref()
                    .and_then(|s| s.load_balancer.as_ref())
                    .and_then(|lb| lb.ingress.as_ref()),
            ),
        }
    }

    /// Record `address` as the object's status address
    pub fn set_status_address(&mut self, address: &Address) {
        match self {
            RoutingResource::Ingress(i) => {
                i.status
                    .get_or_insert_with(IngressStatus::default)
                    .load_balancer = Some(address.to_ingress_status());
            }
            RoutingResource::HttpProxy(p) => {
                p.status
                    .get_or_insert_with(HTTPProxyStatus::default)
                    .load_balancer = Some(ProxyLoadBalancerStatus {
                    ingress: address.to_entries(),
                });
            }
        }
    }
}

impl From<Ingress> for RoutingResource {
    fn from(ingress: Ingress) -> Self {
        RoutingResource::Ingress(ingress)
    }
}

impl From<HTTPProxy> for RoutingResource {
    fn from(proxy: HTTPProxy) -> Self {
        RoutingResource::HttpProxy(proxy)
    }
}

/// A Kubernetes type whose watch events feed the status synchronizer
pub trait TrackedResource:
    Resource<DynamicType = ()>
    + Into<RoutingResource>
    + Clone
    + DeserializeOwned
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    const KIND: ResourceKind;
}

impl TrackedResource for Ingress {
    const KIND: ResourceKind = ResourceKind::Ingress;
}

impl TrackedResource for HTTPProxy {
    const KIND: ResourceKind = ResourceKind::HttpProxy;
}
