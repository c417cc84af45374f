//! Eviction admission under a per-workload disruption budget
//!
//! This module provides:
//! - The admission controller that decides which pods may be evicted
//! - Eviction priority ordering for candidates competing for the budget
//! - The seam to the external eviction primitive

mod priority;
mod restriction;

#[cfg(test)]
mod tests;

pub use priority::{eviction_order, sort_by_eviction_priority};
pub use restriction::{
    max_disruptable, AdmissionDecision, DenialReason, EvictionAdmissionController,
    DEFAULT_EVICTION_TOLERANCE,
};

use crate::error::EvictionError;
use crate::models::{Pod, WorkloadId};
use anyhow::Result;
use std::collections::HashSet;

pub use async_trait::async_trait;

/// External primitive that actually removes a pod
///
/// May fail because of API throttling or an admission webhook rejecting
/// the eviction (e.g. a platform pod disruption budget).
#[async_trait]
pub trait PodEvictor: Send + Sync {
    async fn evict_pod(&self, pod: &Pod) -> Result<()>;
}

/// Trait for eviction gatekeepers
#[async_trait]
pub trait PodsEvictionRestriction: Send + Sync {
    /// Establish or refresh the bookkeeping for `workload` for this pass.
    ///
    /// `pods` is the current listing of the workload's pods. In-progress
    /// evictions of pods that are no longer listed are forgotten, and all
    /// admissions from the previous registration are revoked.
    fn register_workload(
        &self,
        workload: &WorkloadId,
        total_pods: usize,
        tolerance: f64,
        pods: &[Pod],
    );

    /// Drop bookkeeping for every workload not in `active`
    fn retain_workloads(&self, active: &HashSet<WorkloadId>);

    /// Decide whether `pod` may be evicted now. A `true` answer reserves
    /// budget for the pod until the next workload registration.
    fn can_evict(&self, pod: &Pod) -> bool;

    /// Evict a previously admitted pod
    async fn evict(&self, pod: &Pod) -> Result<(), EvictionError>;
}
