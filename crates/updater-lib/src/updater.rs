//! Update pass
//!
//! One reconciliation pass: bound each pod's recommendation by its
//! autoscaler's resource policy, pick the pods whose requests drift from the
//! bounded recommendation, and evict them within each workload's budget.
//! Scheduling passes is left to the caller.

use crate::config::UpdaterConfig;
use crate::eviction::{sort_by_eviction_priority, PodsEvictionRestriction};
use crate::models::{Pod, RecommendedPodResources, UpdateMode, VerticalPodAutoscaler, WorkloadId};
use crate::observability::{StructuredLogger, UpdaterMetrics};
use crate::processor::{PolicyBoundsApplier, RecommendationProcessor};
use crate::source::{PodLister, Recommender, VpaLister};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Outcome counters for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Autoscalers in `Auto` mode that were processed
    pub vpas: usize,
    pub pods_evaluated: usize,
    /// Pods whose requests drift from the bounded recommendation
    pub candidates: usize,
    pub evicted: usize,
    pub denied: usize,
    pub failed: usize,
    /// Pods or autoscalers skipped because a collaborator or policy failed
    pub skipped: usize,
}

/// Drives update passes against the external collaborators
pub struct Updater {
    vpa_lister: Arc<dyn VpaLister>,
    pod_lister: Arc<dyn PodLister>,
    recommender: Arc<dyn Recommender>,
    processor: Arc<dyn RecommendationProcessor>,
    restriction: Arc<dyn PodsEvictionRestriction>,
    config: UpdaterConfig,
    metrics: UpdaterMetrics,
    logger: StructuredLogger,
}

impl Updater {
    pub fn new(
        vpa_lister: Arc<dyn VpaLister>,
        pod_lister: Arc<dyn PodLister>,
        recommender: Arc<dyn Recommender>,
        restriction: Arc<dyn PodsEvictionRestriction>,
        config: UpdaterConfig,
    ) -> Self {
        Self {
            vpa_lister,
            pod_lister,
            recommender,
            processor: Arc::new(PolicyBoundsApplier::new()),
            restriction,
            config,
            metrics: UpdaterMetrics::new(),
            logger: StructuredLogger::new("updater"),
        }
    }

    /// Replace the default policy bounds applier
    pub fn with_processor(mut self, processor: Arc<dyn RecommendationProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Run one reconciliation pass.
    ///
    /// Only a failure to list autoscalers aborts the pass; failures for a
    /// single autoscaler or pod are logged, counted and skipped.
    pub async fn run_once(&self) -> Result<PassSummary> {
        let start = Instant::now();
        let vpas = self
            .vpa_lister
            .list_vpas()
            .await
            .context("Failed to list vertical pod autoscalers")?;

        let mut summary = PassSummary::default();
        let mut active_workloads = HashSet::new();
        let mut candidates = Vec::new();

        for vpa in &vpas {
            if vpa.update_mode != UpdateMode::Auto {
                debug!(vpa = %vpa.name, mode = ?vpa.update_mode, "Skipping autoscaler");
                continue;
            }
            summary.vpas += 1;

            let pods = match self.pod_lister.list_pods(&vpa.namespace, &vpa.selector).await {
                Ok(pods) => pods,
                Err(e) => {
                    self.logger.log_collaborator_error("list_pods", &vpa.name, &e);
                    summary.skipped += 1;
                    continue;
                }
            };

            // Every workload is registered before any admission request
            for (workload, group) in group_by_workload(&pods) {
                self.restriction.register_workload(
                    &workload,
                    group.len(),
                    self.config.eviction_tolerance,
                    &group,
                );
                active_workloads.insert(workload);
            }

            for pod in pods {
                summary.pods_evaluated += 1;
                if let Some(candidate) = self.evaluate_pod(vpa, pod, &mut summary).await {
                    candidates.push(candidate);
                }
            }
        }

        self.restriction.retain_workloads(&active_workloads);

        sort_by_eviction_priority(&mut candidates);
        summary.candidates = candidates.len();

        for pod in &candidates {
            if !self.restriction.can_evict(pod) {
                summary.denied += 1;
                continue;
            }
            match self.restriction.evict(pod).await {
                Ok(()) => summary.evicted += 1,
                Err(_) => summary.failed += 1,
            }
        }

        let elapsed = start.elapsed();
        self.metrics.observe_pass_duration(elapsed.as_secs_f64());
        self.logger.log_pass_summary(
            summary.vpas,
            summary.candidates,
            summary.evicted,
            summary.denied,
            summary.failed,
            elapsed.as_millis(),
        );

        Ok(summary)
    }

    /// Returns the pod if it should be evicted to apply its recommendation
    async fn evaluate_pod(
        &self,
        vpa: &VerticalPodAutoscaler,
        pod: Pod,
        summary: &mut PassSummary,
    ) -> Option<Pod> {
        if pod.owner.is_none() {
            // Nothing would recreate it
            debug!(pod = %pod.id, "Skipping pod without owning workload");
            return None;
        }

        let raw = match self.recommender.get_recommendation(&pod).await {
            Ok(recommendation) => recommendation,
            Err(e) => {
                self.metrics.inc_recommendation_errors();
                self.logger
                    .log_collaborator_error("get_recommendation", &pod.id.to_string(), &e);
                summary.skipped += 1;
                return None;
            }
        };

        let bounded = match self
            .processor
            .apply(&raw, vpa.resource_policy.as_ref(), &pod)
        {
            Ok(bounded) => bounded,
            Err(e) => {
                self.metrics.inc_invalid_policies();
                self.logger.log_invalid_policy(&pod.id, &vpa.name, &e);
                summary.skipped += 1;
                return None;
            }
        };

        if bounded != raw {
            self.metrics.inc_recommendations_capped();
            self.logger.log_recommendation_capped(&pod.id, &vpa.name);
        }

        needs_update(&pod, &bounded, self.config.min_change_fraction).then_some(pod)
    }
}

/// Whether any container request drifts from the recommendation: missing,
/// outside `[lower_bound, upper_bound]`, or further than
/// `min_change_fraction` from the target.
pub fn needs_update(
    pod: &Pod,
    recommendation: &RecommendedPodResources,
    min_change_fraction: f64,
) -> bool {
    recommendation.container_recommendations.iter().any(|rec| {
        let Some(container) = pod.container(&rec.container_name) else {
            return false;
        };
        rec.target
            .iter()
            .any(|(resource, target)| match container.requests.get(resource) {
                None => true,
                Some(request) => {
                    let below = rec.lower_bound.get(resource).is_some_and(|lb| request < lb);
                    let above = rec.upper_bound.get(resource).is_some_and(|ub| request > ub);
                    below || above || request.relative_difference(*target) > min_change_fraction
                }
            })
    })
}

fn group_by_workload(pods: &[Pod]) -> BTreeMap<WorkloadId, Vec<Pod>> {
    let mut groups: BTreeMap<WorkloadId, Vec<Pod>> = BTreeMap::new();
    for pod in pods {
        if let Some(owner) = &pod.owner {
            groups.entry(owner.clone()).or_default().push(pod.clone());
        }
    }
    groups
}
