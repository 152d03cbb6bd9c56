//! Prometheus metrics for the buffer drain operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `buffer_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `buffer_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `buffer_drain_actions_total` (counter): drain actions taken, labeled by namespace/pool/action.
//! - `buffer_volumes` (gauge): volumes per lifecycle state, labeled by namespace/pool/state.
//! - `buffer_drain_failures_total` (counter): failed drain jobs observed, labeled by namespace/pool.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::crd::VolumeCounts;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "bufferpool"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind/category, e.g. "kube", "observation", "drain"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PoolLabels {
    pub namespace: String,
    pub pool: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DrainActionLabels {
    pub namespace: String,
    pub pool: String,
    pub action: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VolumeStateLabels {
    pub namespace: String,
    pub pool: String,
    pub state: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static DRAIN_ACTIONS_TOTAL: Lazy<Family<DrainActionLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static VOLUMES: Lazy<Family<VolumeStateLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static DRAIN_FAILURES_TOTAL: Lazy<Family<PoolLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "buffer_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "buffer_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "buffer_drain_actions_total",
        "Drain actions taken on buffer volumes",
        DRAIN_ACTIONS_TOTAL.clone(),
    );
    registry.register(
        "buffer_volumes",
        "Buffer volumes per lifecycle state as of the last drain pass",
        VOLUMES.clone(),
    );
    registry.register(
        "buffer_drain_failures_total",
        "Failed drain jobs observed",
        DRAIN_FAILURES_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_drain_action(namespace: &str, pool: &str, action: &str) {
    let labels = DrainActionLabels {
        namespace: namespace.to_string(),
        pool: pool.to_string(),
        action: action.to_string(),
    };
    DRAIN_ACTIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_drain_failure(namespace: &str, pool: &str) {
    let labels = PoolLabels {
        namespace: namespace.to_string(),
        pool: pool.to_string(),
    };
    DRAIN_FAILURES_TOTAL.get_or_create(&labels).inc();
}

/// Publish the per-state volume counts of the last pass
pub fn set_volume_counts(namespace: &str, pool: &str, counts: &VolumeCounts) {
    for (state, value) in [
        ("in-use", counts.in_use),
        ("available", counts.available),
        ("draining", counts.draining),
        ("drained", counts.drained),
        ("failed", counts.failed),
    ] {
        let labels = VolumeStateLabels {
            namespace: namespace.to_string(),
            pool: pool.to_string(),
            state: state.to_string(),
        };
        VOLUMES.get_or_create(&labels).set(i64::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn volume_counts_are_encoded_per_state() {
        set_volume_counts(
            "logging",
            "metrics-test",
            &VolumeCounts {
                in_use: 2,
                draining: 1,
                ..Default::default()
            },
        );

        let mut out = String::new();
        encode(&mut out, &REGISTRY).unwrap();
        assert!(out.contains(
            r#"buffer_volumes{namespace="logging",pool="metrics-test",state="in-use"} 2"#
        ));
        assert!(out.contains(
            r#"buffer_volumes{namespace="logging",pool="metrics-test",state="draining"} 1"#
        ));
    }
}
