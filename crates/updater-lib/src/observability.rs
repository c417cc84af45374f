//! Observability infrastructure for the updater
//!
//! Provides:
//! - Prometheus metrics (admission decisions, eviction outcomes, policy capping, pass latency)
//! - Structured logging with tracing

use crate::error::{EvictionError, PolicyError};
use crate::models::{PodId, WorkloadId};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for update pass duration (in seconds)
const PASS_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<UpdaterMetricsInner> = OnceLock::new();

struct UpdaterMetricsInner {
    evictions_admitted: IntCounter,
    evictions_denied: IntCounterVec,
    evictions_succeeded: IntCounter,
    evictions_failed: IntCounterVec,
    recommendations_capped: IntCounter,
    invalid_policies: IntCounter,
    recommendation_errors: IntCounter,
    pass_duration_seconds: Histogram,
    workloads_tracked: IntGauge,
}

impl UpdaterMetricsInner {
    fn new() -> Self {
        Self {
            evictions_admitted: register_int_counter!(
                "vpa_updater_evictions_admitted_total",
                "Eviction requests admitted under the disruption budget"
            )
            .expect("Failed to register evictions_admitted"),

            evictions_denied: register_int_counter_vec!(
                "vpa_updater_evictions_denied_total",
                "Eviction requests denied, by reason",
                &["reason"]
            )
            .expect("Failed to register evictions_denied"),

            evictions_succeeded: register_int_counter!(
                "vpa_updater_evictions_succeeded_total",
                "Evictions completed by the external eviction primitive"
            )
            .expect("Failed to register evictions_succeeded"),

            evictions_failed: register_int_counter_vec!(
                "vpa_updater_evictions_failed_total",
                "Evictions that failed, by kind",
                &["kind"]
            )
            .expect("Failed to register evictions_failed"),

            recommendations_capped: register_int_counter!(
                "vpa_updater_recommendations_capped_total",
                "Recommendations changed by resource policy bounds"
            )
            .expect("Failed to register recommendations_capped"),

            invalid_policies: register_int_counter!(
                "vpa_updater_invalid_policies_total",
                "Resource policies rejected because min allowed exceeds max allowed"
            )
            .expect("Failed to register invalid_policies"),

            recommendation_errors: register_int_counter!(
                "vpa_updater_recommendation_errors_total",
                "Failures fetching a recommendation from the recommender"
            )
            .expect("Failed to register recommendation_errors"),

            pass_duration_seconds: register_histogram!(
                "vpa_updater_pass_duration_seconds",
                "Time spent in one update pass",
                PASS_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_duration_seconds"),

            workloads_tracked: register_int_gauge!(
                "vpa_updater_workloads_tracked",
                "Workloads with eviction bookkeeping held by the admission controller"
            )
            .expect("Failed to register workloads_tracked"),
        }
    }
}

/// Updater metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct UpdaterMetrics {
    _private: (),
}

impl Default for UpdaterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdaterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(UpdaterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &UpdaterMetricsInner {
        GLOBAL_METRICS.get_or_init(UpdaterMetricsInner::new)
    }

    pub fn inc_evictions_admitted(&self) {
        self.inner().evictions_admitted.inc();
    }

    pub fn inc_evictions_denied(&self, reason: &str) {
        self.inner()
            .evictions_denied
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_evictions_succeeded(&self) {
        self.inner().evictions_succeeded.inc();
    }

    pub fn inc_evictions_failed(&self, kind: &str) {
        self.inner()
            .evictions_failed
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_recommendations_capped(&self) {
        self.inner().recommendations_capped.inc();
    }

    pub fn inc_invalid_policies(&self) {
        self.inner().invalid_policies.inc();
    }

    pub fn inc_recommendation_errors(&self) {
        self.inner().recommendation_errors.inc();
    }

    pub fn observe_pass_duration(&self, duration_secs: f64) {
        self.inner().pass_duration_seconds.observe(duration_secs);
    }

    pub fn set_workloads_tracked(&self, count: i64) {
        self.inner().workloads_tracked.set(count);
    }

    pub fn evictions_admitted(&self) -> u64 {
        self.inner().evictions_admitted.get()
    }

    pub fn evictions_denied(&self, reason: &str) -> u64 {
        self.inner()
            .evictions_denied
            .with_label_values(&[reason])
            .get()
    }

    pub fn evictions_failed(&self, kind: &str) -> u64 {
        self.inner()
            .evictions_failed
            .with_label_values(&[kind])
            .get()
    }
}

/// Short label for an eviction failure, used as a metric label value
pub fn eviction_failure_kind(err: &EvictionError) -> &'static str {
    match err {
        EvictionError::NotPermitted { .. } => "not_permitted",
        EvictionError::External { .. } => "external",
        EvictionError::Timeout { .. } => "timeout",
    }
}

/// Structured logger for updater events
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_workload_registered(
        &self,
        workload: &WorkloadId,
        total_pods: usize,
        healthy_pods: usize,
        tolerance: f64,
        max_disruptable: usize,
        stale_cleared: usize,
    ) {
        debug!(
            event = "workload_registered",
            component = %self.component,
            workload = %workload,
            total_pods = total_pods,
            healthy_pods = healthy_pods,
            tolerance = tolerance,
            max_disruptable = max_disruptable,
            stale_cleared = stale_cleared,
            "Registered workload for eviction admission"
        );
    }

    pub fn log_admission(&self, pod: &PodId, admitted: bool, reason: Option<&str>) {
        if admitted {
            debug!(
                event = "eviction_admitted",
                component = %self.component,
                pod = %pod,
                "Eviction admitted"
            );
        } else {
            debug!(
                event = "eviction_denied",
                component = %self.component,
                pod = %pod,
                reason = reason.unwrap_or("unknown"),
                "Eviction denied"
            );
        }
    }

    pub fn log_eviction(&self, pod: &PodId, workload: Option<&WorkloadId>) {
        info!(
            event = "pod_evicted",
            component = %self.component,
            pod = %pod,
            workload = ?workload.map(|w| w.to_string()),
            "Evicted pod to apply new recommendation"
        );
    }

    pub fn log_eviction_failed(&self, err: &EvictionError) {
        warn!(
            event = "eviction_failed",
            component = %self.component,
            pod = %err.pod(),
            kind = eviction_failure_kind(err),
            error = %err,
            "Eviction failed"
        );
    }

    pub fn log_recommendation_capped(&self, pod: &PodId, vpa: &str) {
        debug!(
            event = "recommendation_capped",
            component = %self.component,
            pod = %pod,
            vpa = %vpa,
            "Recommendation adjusted by resource policy"
        );
    }

    pub fn log_invalid_policy(&self, pod: &PodId, vpa: &str, err: &PolicyError) {
        warn!(
            event = "invalid_policy",
            component = %self.component,
            pod = %pod,
            vpa = %vpa,
            error = %err,
            "Resource policy rejected, pod skipped"
        );
    }

    pub fn log_collaborator_error(&self, operation: &str, target: &str, err: &anyhow::Error) {
        warn!(
            event = "collaborator_error",
            component = %self.component,
            operation = %operation,
            target = %target,
            error = %err,
            "External collaborator call failed"
        );
    }

    pub fn log_pass_summary(
        &self,
        vpas: usize,
        candidates: usize,
        evicted: usize,
        denied: usize,
        failed: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "update_pass_complete",
            component = %self.component,
            vpas = vpas,
            candidates = candidates,
            evicted = evicted,
            denied = denied,
            failed = failed,
            elapsed_ms = elapsed_ms as u64,
            "Update pass complete"
        );
    }
}
