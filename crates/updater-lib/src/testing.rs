//! Builders and fake collaborators for tests
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates that drive the updater without a cluster.

use crate::error::{EvictionError, PolicyError};
use crate::eviction::{PodEvictor, PodsEvictionRestriction};
use crate::models::{
    Container, ContainerResourcePolicy, LabelSelector, Pod, PodId, PodPhase, PodResourcePolicy,
    RecommendedContainerResources, RecommendedPodResources, ResourceList, UpdateMode,
    VerticalPodAutoscaler, WorkloadId,
};
use crate::processor::RecommendationProcessor;
use crate::quantity::{Quantity, CPU, MEMORY};
use crate::source::{PodLister, Recommender, VpaLister};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_APP: &str = "web";

fn quantity(value: &str) -> Quantity {
    value
        .parse()
        .unwrap_or_else(|e| panic!("invalid test quantity {:?}: {}", value, e))
}

/// Resource list with the given cpu and memory; empty strings are omitted
pub fn resources(cpu: &str, mem: &str) -> ResourceList {
    let mut result = ResourceList::new();
    if !cpu.is_empty() {
        result.insert(CPU.to_string(), quantity(cpu));
    }
    if !mem.is_empty() {
        result.insert(MEMORY.to_string(), quantity(mem));
    }
    result
}

/// Container requesting the given resources
pub fn build_test_container(name: &str, cpu: &str, mem: &str) -> Container {
    Container {
        name: name.to_string(),
        requests: resources(cpu, mem),
    }
}

/// Policy bounding a single container; empty strings leave that side unbounded
pub fn build_test_policy(
    container_name: &str,
    min_cpu: &str,
    max_cpu: &str,
    min_memory: &str,
    max_memory: &str,
) -> PodResourcePolicy {
    let policy = ContainerResourcePolicy {
        min_allowed: resources(min_cpu, min_memory),
        max_allowed: resources(max_cpu, max_memory),
    };
    PodResourcePolicy {
        container_policies: BTreeMap::from([(container_name.to_string(), policy)]),
    }
}

/// Recommendation targeting the given resources for one container
pub fn build_test_recommendation(container: &str, cpu: &str, mem: &str) -> RecommendedPodResources {
    RecommendedPodResources {
        container_recommendations: vec![RecommendedContainerResources::new(
            container,
            resources(cpu, mem),
        )],
    }
}

/// Autoscaler in update mode `Auto` selecting pods labelled `app=<app>`
pub fn build_test_vpa(
    name: &str,
    app: &str,
    resource_policy: Option<PodResourcePolicy>,
) -> VerticalPodAutoscaler {
    VerticalPodAutoscaler {
        namespace: TEST_NAMESPACE.to_string(),
        name: name.to_string(),
        selector: LabelSelector {
            match_labels: BTreeMap::from([("app".to_string(), app.to_string())]),
        },
        update_mode: UpdateMode::Auto,
        resource_policy,
    }
}

pub fn test_workload(name: &str) -> WorkloadId {
    WorkloadId::replica_set(TEST_NAMESPACE, name)
}

/// Fixed creation time so pod ordering in tests is deterministic
pub fn test_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 4, 18, 17, 35, 5)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Builder for pods owned by a test workload
pub struct TestPodBuilder {
    pod: Pod,
}

impl TestPodBuilder {
    /// Running, ready pod of workload `web` labelled `app=web`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            pod: Pod {
                id: PodId::new(TEST_NAMESPACE, name),
                owner: Some(test_workload(TEST_APP)),
                labels: BTreeMap::from([("app".to_string(), TEST_APP.to_string())]),
                containers: Vec::new(),
                phase: PodPhase::Running,
                ready: true,
                created_at: test_timestamp(),
            },
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.pod.id.namespace = namespace.to_string();
        self
    }

    pub fn owner(mut self, owner: WorkloadId) -> Self {
        self.pod.owner = Some(owner);
        self
    }

    pub fn without_owner(mut self) -> Self {
        self.pod.owner = None;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.pod.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn container(mut self, container: Container) -> Self {
        self.pod.containers.push(container);
        self
    }

    pub fn phase(mut self, phase: PodPhase) -> Self {
        self.pod.phase = phase;
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.pod.ready = false;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.pod.created_at = created_at;
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }
}

/// Processor that returns the recommendation unchanged
#[derive(Debug, Default)]
pub struct FakeRecommendationProcessor;

impl RecommendationProcessor for FakeRecommendationProcessor {
    fn apply(
        &self,
        recommendation: &RecommendedPodResources,
        _policy: Option<&PodResourcePolicy>,
        _pod: &Pod,
    ) -> Result<RecommendedPodResources, PolicyError> {
        Ok(recommendation.clone())
    }
}

/// Recommender serving fixed recommendations
#[derive(Default)]
pub struct StaticRecommender {
    default: Option<RecommendedPodResources>,
    per_pod: HashMap<PodId, RecommendedPodResources>,
    failing: HashSet<PodId>,
}

impl StaticRecommender {
    /// Serve `recommendation` for every pod
    pub fn new(recommendation: RecommendedPodResources) -> Self {
        Self {
            default: Some(recommendation),
            ..Default::default()
        }
    }

    pub fn with_pod(mut self, pod: PodId, recommendation: RecommendedPodResources) -> Self {
        self.per_pod.insert(pod, recommendation);
        self
    }

    pub fn failing_for(mut self, pod: PodId) -> Self {
        self.failing.insert(pod);
        self
    }
}

#[async_trait]
impl Recommender for StaticRecommender {
    async fn get_recommendation(&self, pod: &Pod) -> Result<RecommendedPodResources> {
        if self.failing.contains(&pod.id) {
            bail!("recommender unavailable for pod {}", pod.id);
        }
        self.per_pod
            .get(&pod.id)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| anyhow!("no recommendation for pod {}", pod.id))
    }
}

/// Pod lister over a fixed set of pods
#[derive(Default)]
pub struct StaticPodLister {
    pods: Vec<Pod>,
}

impl StaticPodLister {
    pub fn new(pods: Vec<Pod>) -> Self {
        Self { pods }
    }
}

#[async_trait]
impl PodLister for StaticPodLister {
    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        Ok(self
            .pods
            .iter()
            .filter(|pod| pod.id.namespace == namespace && selector.matches(&pod.labels))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .pods
            .iter()
            .find(|pod| pod.id.namespace == namespace && pod.id.name == name)
            .cloned())
    }
}

/// VPA lister over a fixed set of autoscalers
#[derive(Default)]
pub struct StaticVpaLister {
    vpas: Vec<VerticalPodAutoscaler>,
}

impl StaticVpaLister {
    pub fn new(vpas: Vec<VerticalPodAutoscaler>) -> Self {
        Self { vpas }
    }
}

#[async_trait]
impl VpaLister for StaticVpaLister {
    async fn list_vpas(&self) -> Result<Vec<VerticalPodAutoscaler>> {
        Ok(self.vpas.clone())
    }

    async fn get_vpa(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VerticalPodAutoscaler>> {
        Ok(self
            .vpas
            .iter()
            .find(|vpa| vpa.namespace == namespace && vpa.name == name)
            .cloned())
    }
}

/// Evictor that records evicted pods and can be told to fail or stall
#[derive(Default)]
pub struct RecordingEvictor {
    evicted: Mutex<Vec<PodId>>,
    failing: HashSet<PodId>,
    fail_all: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl RecordingEvictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, pod: PodId) -> Self {
        self.failing.insert(pod);
        self
    }

    pub fn fail_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Pods evicted successfully, in call order
    pub fn evicted(&self) -> Vec<PodId> {
        self.evicted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodEvictor for RecordingEvictor {
    async fn evict_pod(&self, pod: &Pod) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_all || self.failing.contains(&pod.id) {
            bail!("eviction of {} rejected: disruption budget violated", pod.id);
        }
        self.evicted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pod.id.clone());
        Ok(())
    }
}

/// Restriction answering admissions from a script and recording each call
#[derive(Default)]
pub struct ScriptedRestriction {
    deny_all: bool,
    denied: HashSet<PodId>,
    failing: HashSet<PodId>,
    registered: Mutex<Vec<(WorkloadId, usize)>>,
    evicted: Mutex<Vec<PodId>>,
}

impl ScriptedRestriction {
    /// Admits every pod
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_all(mut self) -> Self {
        self.deny_all = true;
        self
    }

    pub fn denying(mut self, pod: PodId) -> Self {
        self.denied.insert(pod);
        self
    }

    pub fn failing_for(mut self, pod: PodId) -> Self {
        self.failing.insert(pod);
        self
    }

    /// Registered workloads still retained, with their total pod count
    pub fn registered(&self) -> Vec<(WorkloadId, usize)> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn evicted(&self) -> Vec<PodId> {
        self.evicted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PodsEvictionRestriction for ScriptedRestriction {
    fn register_workload(
        &self,
        workload: &WorkloadId,
        total_pods: usize,
        _tolerance: f64,
        _pods: &[Pod],
    ) {
        let mut registered = self.registered.lock().unwrap_or_else(PoisonError::into_inner);
        registered.retain(|(id, _)| id != workload);
        registered.push((workload.clone(), total_pods));
    }

    fn retain_workloads(&self, active: &HashSet<WorkloadId>) {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| active.contains(id));
    }

    fn can_evict(&self, pod: &Pod) -> bool {
        !self.deny_all && !self.denied.contains(&pod.id)
    }

    async fn evict(&self, pod: &Pod) -> Result<(), EvictionError> {
        if self.failing.contains(&pod.id) {
            return Err(EvictionError::external(
                pod.id.clone(),
                anyhow!("eviction of {} rejected by script", pod.id),
            ));
        }
        self.evicted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pod.id.clone());
        Ok(())
    }
}
