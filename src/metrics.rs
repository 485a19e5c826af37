//! Lightweight in-memory counters for interception and review activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct BouncerMetrics {
    intercepted: AtomicU64,
    bypassed: AtomicU64,
    withdrawn: AtomicU64,
    superseded: AtomicU64,
    approved: AtomicU64,
    rejected: AtomicU64,
    failed_decisions: AtomicU64,
}

static BOUNCER_METRICS: OnceLock<BouncerMetrics> = OnceLock::new();

fn metrics() -> &'static BouncerMetrics {
    BOUNCER_METRICS.get_or_init(BouncerMetrics::default)
}

/// A mutation was captured as a proposal
pub fn record_intercepted(superseded: u64) {
    let metrics = metrics();
    metrics.intercepted.fetch_add(1, Ordering::Relaxed);
    metrics.superseded.fetch_add(superseded, Ordering::Relaxed);
}

pub fn record_bypassed() {
    metrics().bypassed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_withdrawn(superseded: u64) {
    let metrics = metrics();
    metrics.withdrawn.fetch_add(1, Ordering::Relaxed);
    metrics.superseded.fetch_add(superseded, Ordering::Relaxed);
}

pub fn record_approved() {
    metrics().approved.fetch_add(1, Ordering::Relaxed);
}

pub fn record_rejected() {
    metrics().rejected.fetch_add(1, Ordering::Relaxed);
}

pub fn record_failed_decision() {
    metrics().failed_decisions.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Serialize)]
pub struct BouncerMetricsSnapshot {
    pub intercepted: u64,
    pub bypassed: u64,
    pub withdrawn: u64,
    pub superseded: u64,
    pub approved: u64,
    pub rejected: u64,
    pub failed_decisions: u64,
}

pub fn snapshot() -> BouncerMetricsSnapshot {
    let metrics = metrics();
    BouncerMetricsSnapshot {
        intercepted: metrics.intercepted.load(Ordering::Relaxed),
        bypassed: metrics.bypassed.load(Ordering::Relaxed),
        withdrawn: metrics.withdrawn.load(Ordering::Relaxed),
        superseded: metrics.superseded.load(Ordering::Relaxed),
        approved: metrics.approved.load(Ordering::Relaxed),
        rejected: metrics.rejected.load(Ordering::Relaxed),
        failed_decisions: metrics.failed_decisions.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_flow() {
        // Other tests record concurrently, so only deltas are asserted.
        let initial = snapshot();

        record_intercepted(2);
        let s1 = snapshot();
        assert!(s1.intercepted >= initial.intercepted + 1);
        assert!(s1.superseded >= initial.superseded + 2);

        record_bypassed();
        record_withdrawn(0);
        record_approved();
        record_rejected();
        record_failed_decision();
        let s2 = snapshot();
        assert!(s2.bypassed >= initial.bypassed + 1);
        assert!(s2.withdrawn >= initial.withdrawn + 1);
        assert!(s2.approved >= initial.approved + 1);
        assert!(s2.rejected >= initial.rejected + 1);
        assert!(s2.failed_decisions >= initial.failed_decisions + 1);

        let json = serde_json::to_value(&s2).unwrap();
        assert!(json.get("failed_decisions").is_some());
    }
}
