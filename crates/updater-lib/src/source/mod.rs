//! External collaborators the updater consumes
//!
//! The recommender and the cluster object listers live outside this crate.
//! They are reached only through these traits so the core can be driven by
//! stand-in implementations without a live cluster.

use crate::models::{LabelSelector, Pod, RecommendedPodResources, VerticalPodAutoscaler};
use anyhow::Result;

pub use async_trait::async_trait;

/// Source of raw (unbounded) resource recommendations
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Get the current recommendation for the containers of `pod`
    async fn get_recommendation(&self, pod: &Pod) -> Result<RecommendedPodResources>;
}

/// Read access to pods
#[async_trait]
pub trait PodLister: Send + Sync {
    /// List pods in `namespace` whose labels match `selector`
    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>>;

    /// Get a single pod, `None` if it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
}

/// Read access to VerticalPodAutoscaler objects
#[async_trait]
pub trait VpaLister: Send + Sync {
    /// List all autoscaler objects visible to the updater
    async fn list_vpas(&self) -> Result<Vec<VerticalPodAutoscaler>>;

    async fn get_vpa(&self, namespace: &str, name: &str)
        -> Result<Option<VerticalPodAutoscaler>>;
}
