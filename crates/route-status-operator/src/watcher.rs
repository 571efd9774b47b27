//! Proxy Service address watcher
//!
//! Observes events for the one Service that fronts the proxy and publishes its
//! load balancer address into the [`AddressRegister`]. Events for any other
//! Service are ignored.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::address::{Address, AddressRegister};

/// Publishes the proxy Service's load balancer address
pub struct ServiceAddressWatcher {
    namespace: String,
    name: String,
    register: Arc<AddressRegister>,
}

impl ServiceAddressWatcher {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        register: Arc<AddressRegister>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            register,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_target(&self, service: &Service) -> bool {
        service.name_any() == self.name
            && service.namespace().as_deref() == Some(self.namespace.as_str())
    }

    /// Service created; returns whether it was the watched Service
    pub fn on_add(&self, service: &Service) -> bool {
        if !self.is_target(service) {
            return false;
        }
        self.publish(Address::from_service(service));
        true
    }

    /// Service changed; only the new state is inspected
    pub fn on_update(&self, _old: &Service, new: &Service) -> bool {
        self.on_add(new)
    }

    /// Service removed; the watched Service publishes the empty address
    pub fn on_delete(&self, service: &Service) -> bool {
        if !self.is_target(service) {
            return false;
        }
        info!(
            namespace = %self.namespace,
            name = %self.name,
            "Proxy service deleted, clearing address"
        );
        self.publish(Address::empty());
        true
    }

    fn publish(&self, address: Address) {
        if self.register.publish(address) {
            info!(
                namespace = %self.namespace,
                name = %self.name,
                address = %self.register.current(),
                "Proxy address changed"
            );
        } else {
            debug!(
                namespace = %self.namespace,
                name = %self.name,
                "Proxy address unchanged"
            );
        }
    }
}
