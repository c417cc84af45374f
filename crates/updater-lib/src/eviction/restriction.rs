//! Eviction admission controller
//!
//! Tracks, per workload, how many pods are being disrupted and admits an
//! eviction only while the workload keeps at least
//! `total_pods - max_disruptable` healthy pods that are not being evicted.
//! State for each workload sits behind its own lock so workers evaluating
//! pods of different workloads never contend, while workers evaluating the
//! same workload can never both claim the last free slot.

use super::{PodEvictor, PodsEvictionRestriction};
use crate::config::UpdaterConfig;
use crate::error::EvictionError;
use crate::models::{Pod, PodId, WorkloadId};
use crate::observability::{eviction_failure_kind, StructuredLogger, UpdaterMetrics};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Fraction of a workload's pods that may be evicted concurrently
pub const DEFAULT_EVICTION_TOLERANCE: f64 = 0.5;

/// Why an eviction was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The pod has no owner or its owner was never registered
    UnknownWorkload,
    /// The pod was not part of the latest listing for its workload
    UnknownPod,
    /// The workload has a single replica
    SingleReplica,
    /// The pod is already being evicted
    AlreadyEvicting,
    /// Evicting the pod would leave too few healthy replicas
    BudgetExhausted,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::UnknownWorkload => "unknown_workload",
            DenialReason::UnknownPod => "unknown_pod",
            DenialReason::SingleReplica => "single_replica",
            DenialReason::AlreadyEvicting => "already_evicting",
            DenialReason::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Outcome of an admission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Permitted,
    Denied(DenialReason),
}

impl AdmissionDecision {
    pub fn is_permitted(&self) -> bool {
        matches!(self, AdmissionDecision::Permitted)
    }
}

/// Maximum number of pods of a workload that may be disrupted at once.
///
/// `floor(total_pods * tolerance)`, raised to 1 when that rounds down to
/// zero, and capped so at least one replica always survives.
pub fn max_disruptable(total_pods: usize, tolerance: f64) -> usize {
    if total_pods <= 1 {
        return 0;
    }
    let allowed = (total_pods as f64 * tolerance).floor() as usize;
    allowed.max(1).min(total_pods - 1)
}

fn sanitize_tolerance(tolerance: f64) -> f64 {
    if tolerance.is_nan() {
        0.0
    } else {
        tolerance.clamp(0.0, 1.0)
    }
}

/// Bookkeeping for one workload
#[derive(Debug, Default)]
struct WorkloadEvictionState {
    epoch: u64,
    total_pods: usize,
    tolerance: f64,
    /// Pods from the latest listing and whether each was healthy
    listed: HashMap<PodId, bool>,
    /// Admitted in the current epoch, eviction not yet started
    admitted: HashSet<PodId>,
    evictions_in_progress: HashSet<PodId>,
}

impl WorkloadEvictionState {
    /// Start a new registration epoch. Returns how many stale in-progress
    /// entries were dropped.
    fn refresh(&mut self, total_pods: usize, tolerance: f64, pods: &[Pod]) -> usize {
        self.epoch += 1;
        self.total_pods = total_pods;
        self.tolerance = tolerance;
        self.listed = pods
            .iter()
            .map(|pod| (pod.id.clone(), pod.is_healthy()))
            .collect();
        self.admitted.clear();

        let before = self.evictions_in_progress.len();
        let listed = &self.listed;
        self.evictions_in_progress.retain(|id| listed.contains_key(id));
        before - self.evictions_in_progress.len()
    }

    fn healthy_listed(&self) -> usize {
        self.listed.values().filter(|healthy| **healthy).count()
    }

    /// Healthy pods already holding a share of the budget
    fn budget_consumed(&self) -> usize {
        self.admitted
            .iter()
            .chain(self.evictions_in_progress.iter())
            .filter(|id| self.listed.get(*id).copied().unwrap_or(false))
            .count()
    }

    fn evaluate(&self, pod: &PodId, healthy: bool) -> AdmissionDecision {
        if self.total_pods <= 1 {
            return AdmissionDecision::Denied(DenialReason::SingleReplica);
        }
        if self.evictions_in_progress.contains(pod) {
            return AdmissionDecision::Denied(DenialReason::AlreadyEvicting);
        }
        if !self.listed.contains_key(pod) {
            return AdmissionDecision::Denied(DenialReason::UnknownPod);
        }
        if self.admitted.contains(pod) || !healthy {
            return AdmissionDecision::Permitted;
        }

        let alive = self.healthy_listed().saturating_sub(self.budget_consumed());
        let should_be_alive =
            self.total_pods - max_disruptable(self.total_pods, self.tolerance);
        if alive > should_be_alive {
            AdmissionDecision::Permitted
        } else {
            AdmissionDecision::Denied(DenialReason::BudgetExhausted)
        }
    }
}

type WorkloadSlot = Arc<Mutex<WorkloadEvictionState>>;

fn lock(slot: &Mutex<WorkloadEvictionState>) -> MutexGuard<'_, WorkloadEvictionState> {
    // The state is updated in single statements, so a panic elsewhere
    // cannot leave it half-written.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rolls back an in-progress mark unless the eviction committed. Within the
/// same registration epoch the pod gets its admission back.
struct InProgressMark {
    slot: WorkloadSlot,
    pod: PodId,
    epoch: u64,
    committed: bool,
}

impl InProgressMark {
    fn new(slot: WorkloadSlot, pod: PodId, epoch: u64) -> Self {
        Self {
            slot,
            pod,
            epoch,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for InProgressMark {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut state = lock(&self.slot);
        state.evictions_in_progress.remove(&self.pod);
        if state.epoch == self.epoch {
            state.admitted.insert(self.pod.clone());
        }
    }
}

/// Admission controller enforcing a disruption budget per workload
pub struct EvictionAdmissionController {
    workloads: DashMap<WorkloadId, WorkloadSlot>,
    evictor: Arc<dyn PodEvictor>,
    eviction_timeout: Option<Duration>,
    metrics: UpdaterMetrics,
    logger: StructuredLogger,
}

impl EvictionAdmissionController {
    pub fn new(evictor: Arc<dyn PodEvictor>) -> Self {
        Self {
            workloads: DashMap::new(),
            evictor,
            eviction_timeout: None,
            metrics: UpdaterMetrics::new(),
            logger: StructuredLogger::new("eviction-admission"),
        }
    }

    /// Controller using the eviction timeout from `config`
    pub fn from_config(evictor: Arc<dyn PodEvictor>, config: &UpdaterConfig) -> Self {
        let controller = Self::new(evictor);
        match config.eviction_timeout() {
            Some(timeout) => controller.with_eviction_timeout(timeout),
            None => controller,
        }
    }

    /// Bound the time spent in the external eviction call. An eviction that
    /// does not finish in time is rolled back and reported as failed.
    pub fn with_eviction_timeout(mut self, timeout: Duration) -> Self {
        self.eviction_timeout = Some(timeout);
        self
    }

    pub fn is_registered(&self, workload: &WorkloadId) -> bool {
        self.workloads.contains_key(workload)
    }

    pub fn workload_count(&self) -> usize {
        self.workloads.len()
    }

    /// Pods of `workload` currently recorded as being evicted
    pub fn evictions_in_progress(&self, workload: &WorkloadId) -> Vec<PodId> {
        let Some(slot) = self.slot(workload) else {
            return Vec::new();
        };
        let mut pods: Vec<PodId> = lock(&slot).evictions_in_progress.iter().cloned().collect();
        pods.sort();
        pods
    }

    /// Evaluate `pod` and, when permitted, reserve budget for it
    pub fn admit(&self, pod: &Pod) -> AdmissionDecision {
        let Some(slot) = pod.owner.as_ref().and_then(|w| self.slot(w)) else {
            return AdmissionDecision::Denied(DenialReason::UnknownWorkload);
        };

        let mut state = lock(&slot);
        let decision = state.evaluate(&pod.id, pod.is_healthy());
        if decision.is_permitted() {
            state.admitted.insert(pod.id.clone());
        }
        decision
    }

    fn slot(&self, workload: &WorkloadId) -> Option<WorkloadSlot> {
        self.workloads.get(workload).map(|entry| Arc::clone(entry.value()))
    }

    /// Move an admitted pod into the in-progress set
    fn begin_eviction(&self, pod: &Pod) -> Result<InProgressMark, EvictionError> {
        let not_permitted = || EvictionError::NotPermitted {
            pod: pod.id.clone(),
        };
        let slot = pod
            .owner
            .as_ref()
            .and_then(|w| self.slot(w))
            .ok_or_else(not_permitted)?;

        let epoch = {
            let mut state = lock(&slot);
            if !state.admitted.remove(&pod.id) {
                return Err(not_permitted());
            }
            state.evictions_in_progress.insert(pod.id.clone());
            state.epoch
        };

        Ok(InProgressMark::new(slot, pod.id.clone(), epoch))
    }

    async fn call_evictor(&self, pod: &Pod) -> Result<(), EvictionError> {
        match self.eviction_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.evictor.evict_pod(pod)).await {
                    Ok(result) => {
                        result.map_err(|e| EvictionError::external(pod.id.clone(), e))
                    }
                    Err(_) => Err(EvictionError::Timeout {
                        pod: pod.id.clone(),
                        timeout,
                    }),
                }
            }
            None => self
                .evictor
                .evict_pod(pod)
                .await
                .map_err(|e| EvictionError::external(pod.id.clone(), e)),
        }
    }
}

#[async_trait]
impl PodsEvictionRestriction for EvictionAdmissionController {
    fn register_workload(
        &self,
        workload: &WorkloadId,
        total_pods: usize,
        tolerance: f64,
        pods: &[Pod],
    ) {
        let sanitized = sanitize_tolerance(tolerance);
        if sanitized != tolerance {
            warn!(
                workload = %workload,
                tolerance = tolerance,
                "Eviction tolerance out of range, clamped to [0, 1]"
            );
        }

        let slot = Arc::clone(
            self.workloads
                .entry(workload.clone())
                .or_insert_with(|| Arc::new(Mutex::new(WorkloadEvictionState::default())))
                .value(),
        );

        let (healthy, stale) = {
            let mut state = lock(&slot);
            let stale = state.refresh(total_pods, sanitized, pods);
            (state.healthy_listed(), stale)
        };

        self.logger.log_workload_registered(
            workload,
            total_pods,
            healthy,
            sanitized,
            max_disruptable(total_pods, sanitized),
            stale,
        );
        self.metrics.set_workloads_tracked(self.workloads.len() as i64);
    }

    fn retain_workloads(&self, active: &HashSet<WorkloadId>) {
        self.workloads.retain(|id, _| active.contains(id));
        self.metrics.set_workloads_tracked(self.workloads.len() as i64);
    }

    fn can_evict(&self, pod: &Pod) -> bool {
        match self.admit(pod) {
            AdmissionDecision::Permitted => {
                self.metrics.inc_evictions_admitted();
                self.logger.log_admission(&pod.id, true, None);
                true
            }
            AdmissionDecision::Denied(reason) => {
                self.metrics.inc_evictions_denied(reason.as_str());
                self.logger.log_admission(&pod.id, false, Some(reason.as_str()));
                false
            }
        }
    }

    async fn evict(&self, pod: &Pod) -> Result<(), EvictionError> {
        let mark = match self.begin_eviction(pod) {
            Ok(mark) => mark,
            Err(err) => {
                self.metrics.inc_evictions_failed(eviction_failure_kind(&err));
                self.logger.log_eviction_failed(&err);
                return Err(err);
            }
        };

        // The mark is dropped (and rolled back) if this future is cancelled
        match self.call_evictor(pod).await {
            Ok(()) => {
                mark.commit();
                self.metrics.inc_evictions_succeeded();
                self.logger.log_eviction(&pod.id, pod.owner.as_ref());
                Ok(())
            }
            Err(err) => {
                drop(mark);
                self.metrics.inc_evictions_failed(eviction_failure_kind(&err));
                self.logger.log_eviction_failed(&err);
                Err(err)
            }
        }
    }
}
