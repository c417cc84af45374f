//! Core data models for the updater
//!
//! These mirror the subset of the Kubernetes pod and VerticalPodAutoscaler
//! objects the updater reads. They serialize with Kubernetes field naming.

use crate::quantity::Quantity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resource name -> amount
pub type ResourceList = BTreeMap<String, Quantity>;

/// Namespaced pod identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodId {
    pub namespace: String,
    pub name: String,
}

impl PodId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identifier of the controller (e.g. a replica set) that owns a group of pods
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl WorkloadId {
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn replica_set(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, "ReplicaSet", name)
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Container spec as seen by the updater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub requests: ResourceList,
}

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Snapshot of a pod handed to the updater by the pod lister
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(flatten)]
    pub id: PodId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<WorkloadId>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<Container>,
    pub phase: PodPhase,
    #[serde(default)]
    pub ready: bool,
    pub created_at: DateTime<Utc>,
}

impl Pod {
    /// A pod counts toward the disruption budget only while running and ready
    pub fn is_healthy(&self) -> bool {
        self.phase == PodPhase::Running && self.ready
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Recommended resources for a single container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedContainerResources {
    pub container_name: String,
    pub target: ResourceList,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lower_bound: ResourceList,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub upper_bound: ResourceList,
}

impl RecommendedContainerResources {
    pub fn new(container_name: impl Into<String>, target: ResourceList) -> Self {
        Self {
            container_name: container_name.into(),
            target,
            lower_bound: ResourceList::new(),
            upper_bound: ResourceList::new(),
        }
    }
}

/// Recommendation for every container of a pod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedPodResources {
    #[serde(default)]
    pub container_recommendations: Vec<RecommendedContainerResources>,
}

impl RecommendedPodResources {
    pub fn for_container(&self, name: &str) -> Option<&RecommendedContainerResources> {
        self.container_recommendations
            .iter()
            .find(|r| r.container_name == name)
    }
}

/// Administrator bounds for one container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResourcePolicy {
    #[serde(default)]
    pub min_allowed: ResourceList,
    #[serde(default)]
    pub max_allowed: ResourceList,
}

/// Container name -> bounds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodResourcePolicy {
    #[serde(default)]
    pub container_policies: BTreeMap<String, ContainerResourcePolicy>,
}

impl PodResourcePolicy {
    pub fn for_container(&self, name: &str) -> Option<&ContainerResourcePolicy> {
        self.container_policies.get(name)
    }
}

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// How the updater may act on pods matched by an autoscaler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Recommendations are computed but never applied
    Off,
    /// Recommendations are applied only at pod creation
    Initial,
    /// Running pods are evicted to apply new recommendations
    #[default]
    Auto,
}

/// VerticalPodAutoscaler object as returned by the VPA lister
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscaler {
    pub namespace: String,
    pub name: String,
    pub selector: LabelSelector,
    #[serde(default)]
    pub update_mode: UpdateMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<PodResourcePolicy>,
}
