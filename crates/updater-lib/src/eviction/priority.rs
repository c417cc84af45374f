//! Ordering of eviction candidates
//!
//! When the budget admits fewer evictions than there are candidates, the
//! ones evaluated first win. Candidates are therefore sorted so that pods
//! which are cheapest to lose come first: unhealthy pods, then the oldest,
//! then by name for a stable result.

use crate::models::Pod;
use std::cmp::Ordering;

pub fn eviction_order(a: &Pod, b: &Pod) -> Ordering {
    a.is_healthy()
        .cmp(&b.is_healthy())
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_by_eviction_priority(pods: &mut [Pod]) {
    pods.sort_by(eviction_order);
}
