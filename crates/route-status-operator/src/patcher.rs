//! Status subresource writer
//!
//! [`StatusPatcher`] is the seam between the synchronizer and the Kubernetes
//! API. [`KubeStatusPatcher`] is the production implementation; tests use the
//! generated mock.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::address::Address;
use crate::resource::{HTTPProxy, ResourceKey, ResourceKind};

/// Field manager recorded on status writes
pub const FIELD_MANAGER: &str = "route-status-operator";

/// API status codes for a write the server refused outright
/// (Forbidden, Conflict, Invalid)
const REJECTED_CODES: [u16; 3] = [403, 409, 422];

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("Status patch rejected: {0}")]
    Rejected(String),
}

/// Writes the load balancer address into a routing resource's status
///
/// This trait allows for mocking in tests while keeping the concrete
/// implementation for production use.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusPatcher: Send + Sync {
    /// Replace `status.loadBalancer.ingress` of the resource identified by `key`
    async fn patch_status(&self, key: &ResourceKey, status: &Address) -> Result<(), PatchError>;
}

/// Build the merge patch body for `address`.
///
/// The ingress list is replaced wholesale; the empty address sends `null` so
/// the field is removed rather than merged.
pub fn status_patch(address: &Address) -> Value {
    let ingress = match address.to_entries() {
        Some(entries) => json!(entries),
        None => Value::Null,
    };

    json!({
        "status": {
            "loadBalancer": {
                "ingress": ingress
            }
        }
    })
}

/// Patches status through the Kubernetes API
#[derive(Clone)]
pub struct KubeStatusPatcher {
    client: Client,
    params: PatchParams,
}

impl KubeStatusPatcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            params: PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
        }
    }

    async fn patch<K>(&self, key: &ResourceKey, body: &Value) -> Result<(), PatchError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        match api
            .patch_status(&key.name, &self.params, &Patch::Merge(body))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if REJECTED_CODES.contains(&err.code) => {
                Err(PatchError::Rejected(format!("{}: {}", err.reason, err.message)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StatusPatcher for KubeStatusPatcher {
    #[instrument(skip(self, status), fields(key = %key))]
    async fn patch_status(&self, key: &ResourceKey, status: &Address) -> Result<(), PatchError> {
        let body = status_patch(status);
        debug!(address = %status, "Patching status");

        match key.kind {
            ResourceKind::Ingress => self.patch::<Ingress>(key, &body).await,
            ResourceKind::HttpProxy => self.patch::<HTTPProxy>(key, &body).await,
        }
    }
}
