//! Watch loops feeding the status engine

pub mod resync;
pub mod routing;
pub mod service;

use std::sync::Arc;

use crate::config::OperatorConfig;
use crate::health::HealthState;
use crate::sync::StatusSynchronizer;
use crate::watcher::ServiceAddressWatcher;

/// Shared state for all watch loops
pub struct ControllerContext {
    /// Reconciles routing resource status
    pub synchronizer: Arc<StatusSynchronizer>,
    /// Publishes the proxy Service address
    pub address_watcher: Arc<ServiceAddressWatcher>,
    /// Readiness reported to the kubelet
    pub health: Arc<HealthState>,
    /// Operator configuration
    pub config: Arc<OperatorConfig>,
}
