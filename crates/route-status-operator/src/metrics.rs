//! Metric counter helpers
//!
//! Recorded through the `metrics` facade; installing a recorder/exporter is
//! left to the process that embeds the operator.

use metrics::{counter, gauge};

use crate::resource::ResourceKind;

/// Record the outcome of a status patch (`applied` or `failed`)
pub fn record_patch(kind: ResourceKind, result: &'static str) {
    counter!("route_status_patches_total", "kind" => kind.as_str(), "result" => result)
        .increment(1);
}

/// Record a routing resource skipped by the class filter
pub fn record_skipped(kind: ResourceKind) {
    counter!("route_status_skipped_total", "kind" => kind.as_str()).increment(1);
}

/// Record a completed re-sync pass
pub fn record_resync(failed: usize) {
    counter!("route_status_resyncs_total").increment(1);
    if failed > 0 {
        counter!("route_status_resync_failures_total").increment(failed as u64);
    }
}

/// Set the number of tracked routing resources
pub fn set_tracked_resources(count: usize) {
    gauge!("route_status_tracked_resources").set(count as f64);
}
