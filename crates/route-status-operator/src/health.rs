//! Health check HTTP server for Kubernetes probes.
//!
//! Provides `/healthz` (liveness) and `/readyz` (readiness) endpoints.
//! Readiness requires the server to be listening and every tracked routing
//! kind to have completed its initial list.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::resource::ResourceKind;

/// Default port for health check server.
pub const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Shared state for health check endpoints.
#[derive(Debug)]
pub struct HealthState {
    /// Whether the health server is listening.
    started: AtomicBool,
    /// Routing kinds still waiting for their initial list.
    pending: RwLock<HashSet<ResourceKind>>,
}

impl HealthState {
    /// Create health state that waits for each of `kinds` to sync.
    pub fn new(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            started: AtomicBool::new(false),
            pending: RwLock::new(kinds.into_iter().collect()),
        }
    }

    /// Mark the operator as started.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
        info!("Health check: operator marked as started");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Record that the watch for `kind` finished its initial list.
    pub async fn mark_synced(&self, kind: ResourceKind) {
        if self.pending.write().await.remove(&kind) {
            info!(kind = %kind, "Health check: initial list complete");
        }
    }

    pub async fn is_synced(&self) -> bool {
        self.pending.read().await.is_empty()
    }

    pub async fn is_ready(&self) -> bool {
        self.is_started() && self.is_synced().await
    }
}

/// Run the health check HTTP server.
///
/// Runs until the server encounters a fatal error. The operator is marked as
/// started only after the listener is bound.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state.clone());

    let listener = TcpListener::bind(listen_addr(port)).await?;

    info!(port = port, "Health check server listening");
    state.mark_started();

    axum::serve(listener, app).await
}

/// Kubelet probes target the pod IP, so listen on every interface.
fn listen_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

/// Liveness probe endpoint.
async fn healthz() -> StatusCode {
    debug!("Liveness probe: OK");
    StatusCode::OK
}

/// Readiness probe endpoint.
///
/// Returns 503 Service Unavailable until startup has completed and every
/// routing watch has listed its resources once.
async fn readyz(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready().await {
        debug!("Readiness probe: OK");
        return StatusCode::OK;
    }

    if !state.is_started() {
        debug!("Readiness probe: NOT READY (startup incomplete)");
    } else {
        debug!("Readiness probe: NOT READY (initial list pending)");
    }
    StatusCode::SERVICE_UNAVAILABLE
}
