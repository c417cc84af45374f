//! Recommendation post-processing
//!
//! Turns a raw recommendation into one that respects the administrator's
//! per-container resource policy before any pod is touched.

mod policy;

pub use policy::{validate_container_policy, PolicyBoundsApplier};

use crate::error::PolicyError;
use crate::models::{Pod, PodResourcePolicy, RecommendedPodResources};

/// Trait for recommendation processing implementations
pub trait RecommendationProcessor: Send + Sync {
    /// Produce a new recommendation for `pod` constrained by `policy`.
    ///
    /// Implementations must not modify their inputs.
    fn apply(
        &self,
        recommendation: &RecommendedPodResources,
        policy: Option<&PodResourcePolicy>,
        pod: &Pod,
    ) -> Result<RecommendedPodResources, PolicyError>;
}
