//! Address change re-sync loop
//!
//! Waits on the address register's change signal and re-applies the current
//! address to every tracked resource. Bursts of publications coalesce into a
//! single pass that reads the latest value.

use std::sync::Arc;

use tracing::{info, warn};

use super::ControllerContext;

/// Re-sync on every address publication until the register is dropped
pub async fn run(ctx: Arc<ControllerContext>) {
    let mut changes = ctx.synchronizer.register().subscribe();

    info!("Starting address re-sync loop");

    loop {
        if changes.changed().await.is_err() {
            warn!("Address register closed, stopping re-sync loop");
            return;
        }

        let report = ctx.synchronizer.on_address_changed().await;
        if !report.failed.is_empty() {
            warn!(
                failed = report.failed.len(),
                total = report.total(),
                "Re-sync left resources with stale status"
            );
        }
    }
}
