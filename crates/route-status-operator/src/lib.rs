//! route-status-operator: propagates the proxy Service address into the
//! status of Ingress and HTTPProxy resources

pub mod address;
pub mod cache;
pub mod class;
pub mod config;
pub mod controllers;
pub mod health;
pub mod metrics;
pub mod patcher;
pub mod resource;
pub mod sync;
pub mod watcher;

pub use address::{Address, AddressEntry, AddressRegister};
pub use cache::StatusCache;
pub use class::ClassFilter;
pub use config::OperatorConfig;
pub use patcher::{KubeStatusPatcher, StatusPatcher};
pub use resource::{HTTPProxy, ResourceKey, ResourceKind, RoutingResource};
pub use sync::{ResyncReport, StatusSynchronizer, SyncOutcome};
pub use watcher::ServiceAddressWatcher;
