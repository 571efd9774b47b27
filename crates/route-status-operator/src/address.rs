//! Front-end proxy address and the register that holds it
//!
//! An [`Address`] is the ordered list of load-balancer entries reported on the
//! proxy's Service. Order is preserved end to end because API consumers compare
//! status lists structurally.
//!
//! The [`AddressRegister`] is a single-slot store paired with a change signal.
//! Publishing overwrites the slot in place and never blocks; subscribers that
//! fall behind only ever observe the most recent value, and several rapid
//! publishes coalesce into one wake-up.

use std::fmt;

use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service};
use k8s_openapi::api::networking::v1::{IngressLoadBalancerIngress, IngressLoadBalancerStatus};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// A single load-balancer entry: an IP literal and/or a hostname
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl AddressEntry {
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            hostname: None,
        }
    }

    pub fn hostname(hostname: impl Into<String>) -> Self {
        Self {
            ip: None,
            hostname: Some(hostname.into()),
        }
    }

    /// Build an entry from raw fields, treating empty strings as unset.
    ///
    /// Returns `None` when neither field carries a value.
    fn from_parts(ip: Option<&String>, hostname: Option<&String>) -> Option<Self> {
        let ip = ip.filter(|v| !v.is_empty()).cloned();
        let hostname = hostname.filter(|v| !v.is_empty()).cloned();

        if ip.is_none() && hostname.is_none() {
            return None;
        }

        Some(Self { ip, hostname })
    }
}

impl fmt::Display for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.ip, &self.hostname) {
            (Some(ip), Some(hostname)) => write!(f, "{ip}/{hostname}"),
            (Some(ip), None) => f.write_str(ip),
            (None, Some(hostname)) => f.write_str(hostname),
            (None, None) => Ok(()),
        }
    }
}

/// Ordered, externally visible address of the front-end proxy
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Address(Vec<AddressEntry>);

impl Address {
    pub fn new(entries: Vec<AddressEntry>) -> Self {
        Self(entries)
    }

    /// The empty address, advertised when no backing Service exists
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[AddressEntry] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Extract the address from a Service's `status.loadBalancer`.
    ///
    /// A Service without status, or with a pending load balancer, yields the
    /// empty address.
    pub fn from_service(service: &Service) -> Self {
        service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .map(Self::from)
            .unwrap_or_default()
    }

    /// Read the address recorded in an Ingress status.
    pub fn from_ingress_status(status: &IngressLoadBalancerStatus) -> Self {
        let entries = status
            .ingress
            .iter()
            .flatten()
            .filter_map(|i| AddressEntry::from_parts(i.ip.as_ref(), i.hostname.as_ref()))
            .collect();
        Self(entries)
    }

    /// Render as an Ingress status value.
    ///
    /// The empty address maps to an unset `ingress` list, matching what the
    /// API server returns for an Ingress that never had an address.
    pub fn to_ingress_status(&self) -> IngressLoadBalancerStatus {
        if self.is_empty() {
            return IngressLoadBalancerStatus::default();
        }

        IngressLoadBalancerStatus {
            ingress: Some(
                self.0
                    .iter()
                    .map(|e| IngressLoadBalancerIngress {
                        ip: e.ip.clone(),
                        hostname: e.hostname.clone(),
                        ..Default::default()
                    })
                    .collect(),
            ),
        }
    }

    /// Read the address recorded in a custom resource status list.
    pub fn from_entries(entries: Option<&Vec<AddressEntry>>) -> Self {
        let entries = entries
            .into_iter()
            .flatten()
            .filter_map(|e| AddressEntry::from_parts(e.ip.as_ref(), e.hostname.as_ref()))
            .collect();
        Self(entries)
    }

    /// Render as a custom resource status list, `None` when empty.
    pub fn to_entries(&self) -> Option<Vec<AddressEntry>> {
        if self.is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

impl From<&LoadBalancerStatus> for Address {
    fn from(status: &LoadBalancerStatus) -> Self {
        let entries = status
            .ingress
            .iter()
            .flatten()
            .filter_map(|i: &LoadBalancerIngress| {
                AddressEntry::from_parts(i.ip.as_ref(), i.hostname.as_ref())
            })
            .collect();
        Self(entries)
    }
}

impl From<Vec<AddressEntry>> for Address {
    fn from(entries: Vec<AddressEntry>) -> Self {
        Self(entries)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{entry}")?;
        }
        f.write_str("]")
    }
}

/// Process-wide holder of the current proxy address.
///
/// Backed by a `tokio::sync::watch` channel: the slot is overwritten under the
/// channel's lock and every publish bumps the version that subscribers wait
/// on, so a subscriber wakes once per burst of publishes and reads the latest
/// value.
#[derive(Debug)]
pub struct AddressRegister {
    tx: watch::Sender<Address>,
}

impl AddressRegister {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Address::empty());
        Self { tx }
    }

    /// Snapshot of the current address
    pub fn current(&self) -> Address {
        self.tx.borrow().clone()
    }

    /// Overwrite the register and signal subscribers.
    ///
    /// Signals even when the value is unchanged. Returns whether the stored
    /// address differs from the previous one.
    pub fn publish(&self, address: Address) -> bool {
        let previous = self.tx.send_replace(address.clone());
        let changed = previous != address;
        debug!(changed, address = %address, "Published proxy address");
        changed
    }

    /// Subscribe to publications.
    ///
    /// The receiver starts with the current value marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<Address> {
        self.tx.subscribe()
    }
}

impl Default for AddressRegister {
    fn default() -> Self {
        Self::new()
    }
}
