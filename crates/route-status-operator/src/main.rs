use std::sync::Arc;

use anyhow::{bail, Context, Result};
use k8s_openapi::api::networking::v1::Ingress;
use kube::Client;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use route_status_operator::controllers::{self, ControllerContext};
use route_status_operator::health::{run_health_server, HealthState};
use route_status_operator::{
    AddressRegister, HTTPProxy, KubeStatusPatcher, OperatorConfig, ResourceKind,
    ServiceAddressWatcher, StatusCache, StatusSynchronizer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON formatting for production
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("route-status-operator starting");

    let config = OperatorConfig::load().context("Failed to load configuration")?;

    info!(
        service_namespace = %config.service_namespace,
        service_name = %config.service_name,
        ingress_class = %config.ingress_class,
        default_class = config.default_class.as_deref().unwrap_or(""),
        kinds = ?config.kinds,
        resync_concurrency = config.resync_concurrency,
        "Loaded configuration"
    );

    let kube_client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!("Connected to Kubernetes cluster");

    let register = Arc::new(AddressRegister::new());
    let synchronizer = StatusSynchronizer::new(
        config.class_filter(),
        register.clone(),
        Arc::new(StatusCache::new()),
        Arc::new(KubeStatusPatcher::new(kube_client.clone())),
    )
    .with_resync_concurrency(config.resync_concurrency);

    let address_watcher = ServiceAddressWatcher::new(
        config.service_namespace.clone(),
        config.service_name.clone(),
        register,
    );

    let health = Arc::new(HealthState::new(config.kinds.iter().copied()));
    let health_port = config.health_port;

    let ctx = Arc::new(ControllerContext {
        synchronizer: Arc::new(synchronizer),
        address_watcher: Arc::new(address_watcher),
        health: health.clone(),
        config: Arc::new(config),
    });

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    select! {
        result = run_controllers(kube_client, ctx) => {
            // Controller failure should trigger pod restart
            return result.context("Controller failure");
        }
        result = run_health_server(health, health_port) => {
            return result.context("Health check server failed");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Run every watch loop concurrently
///
/// Returns an error as soon as any loop exits, which should trigger a pod
/// restart by Kubernetes.
async fn run_controllers(client: Client, ctx: Arc<ControllerContext>) -> Result<()> {
    let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();

    info!("Starting proxy Service watch");
    tasks.push((
        "Service".to_string(),
        tokio::spawn(controllers::service::run(client.clone(), ctx.clone())),
    ));

    info!("Starting address re-sync loop");
    tasks.push((
        "Resync".to_string(),
        tokio::spawn(controllers::resync::run(ctx.clone())),
    ));

    for kind in ctx.config.kinds.clone() {
        info!(kind = %kind, "Starting routing watch");
        let handle = match kind {
            ResourceKind::Ingress => {
                tokio::spawn(controllers::routing::run::<Ingress>(client.clone(), ctx.clone()))
            }
            ResourceKind::HttpProxy => {
                tokio::spawn(controllers::routing::run::<HTTPProxy>(client.clone(), ctx.clone()))
            }
        };
        tasks.push((kind.to_string(), handle));
    }

    info!(count = tasks.len(), "All controllers spawned");

    let (names, handles): (Vec<String>, Vec<JoinHandle<()>>) = tasks.into_iter().unzip();

    // Wait for any controller to exit (they shouldn't under normal operation)
    let (result, index, _remaining) = futures::future::select_all(handles).await;
    handle_controller_exit(&names[index], result)
}

/// Handle a controller task exit, returning an error to trigger pod restart
fn handle_controller_exit(
    name: &str,
    result: std::result::Result<(), tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(()) => {
            error!(controller = name, "Controller exited unexpectedly");
            bail!("{} controller exited unexpectedly", name)
        }
        Err(e) if e.is_panic() => {
            error!(controller = name, "Controller panicked");
            bail!("{} controller panicked: {:?}", name, e.into_panic())
        }
        Err(e) if e.is_cancelled() => {
            warn!(controller = name, "Controller was cancelled");
            bail!("{} controller was cancelled", name)
        }
        Err(e) => {
            error!(controller = name, error = ?e, "Controller task failed");
            bail!("{} controller task failed: {}", name, e)
        }
    }
}
