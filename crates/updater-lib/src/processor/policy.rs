//! Policy bounds applier
//!
//! Clamps every recommended quantity into the `[min_allowed, max_allowed]`
//! range configured for its container. Resources or containers without
//! bounds pass through untouched.

use super::RecommendationProcessor;
use crate::error::PolicyError;
use crate::models::{
    ContainerResourcePolicy, Pod, PodResourcePolicy, RecommendedContainerResources,
    RecommendedPodResources, ResourceList,
};
use crate::quantity::Quantity;
use tracing::trace;

/// Applies per-container min/max bounds to recommendations
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyBoundsApplier;

impl PolicyBoundsApplier {
    pub fn new() -> Self {
        Self
    }

    fn apply_container_policy(
        &self,
        recommendation: &RecommendedContainerResources,
        policy: &ContainerResourcePolicy,
    ) -> Result<RecommendedContainerResources, PolicyError> {
        validate_container_policy(&recommendation.container_name, policy)?;

        Ok(RecommendedContainerResources {
            container_name: recommendation.container_name.clone(),
            target: clamp_list(&recommendation.target, policy),
            lower_bound: clamp_list(&recommendation.lower_bound, policy),
            upper_bound: clamp_list(&recommendation.upper_bound, policy),
        })
    }
}

impl RecommendationProcessor for PolicyBoundsApplier {
    fn apply(
        &self,
        recommendation: &RecommendedPodResources,
        policy: Option<&PodResourcePolicy>,
        pod: &Pod,
    ) -> Result<RecommendedPodResources, PolicyError> {
        let mut container_recommendations =
            Vec::with_capacity(recommendation.container_recommendations.len());

        for container in &recommendation.container_recommendations {
            let bounded = match policy.and_then(|p| p.for_container(&container.container_name)) {
                Some(container_policy) => {
                    self.apply_container_policy(container, container_policy)?
                }
                None => container.clone(),
            };
            container_recommendations.push(bounded);
        }

        trace!(
            pod = %pod.id,
            containers = container_recommendations.len(),
            "Applied resource policy"
        );

        Ok(RecommendedPodResources {
            container_recommendations,
        })
    }
}

/// Reject a container policy whose lower bound exceeds its upper bound
/// for any resource.
pub fn validate_container_policy(
    container: &str,
    policy: &ContainerResourcePolicy,
) -> Result<(), PolicyError> {
    for (resource, min) in &policy.min_allowed {
        if let Some(max) = policy.max_allowed.get(resource) {
            if min > max {
                return Err(PolicyError::InvalidPolicy {
                    container: container.to_string(),
                    resource: resource.clone(),
                    min: *min,
                    max: *max,
                });
            }
        }
    }
    Ok(())
}

fn clamp_list(resources: &ResourceList, policy: &ContainerResourcePolicy) -> ResourceList {
    resources
        .iter()
        .map(|(resource, value)| {
            let bounded = clamp(
                *value,
                policy.min_allowed.get(resource).copied(),
                policy.max_allowed.get(resource).copied(),
            );
            (resource.clone(), bounded)
        })
        .collect()
}

fn clamp(value: Quantity, min: Option<Quantity>, max: Option<Quantity>) -> Quantity {
    let mut bounded = value;
    if let Some(min) = min {
        bounded = bounded.max(min);
    }
    if let Some(max) = max {
        bounded = bounded.min(max);
    }
    bounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceList;
    use crate::quantity::{CPU, MEMORY};
    use crate::testing::{build_test_policy, resources, TestPodBuilder};

    fn recommendation(container: &str, target: ResourceList) -> RecommendedPodResources {
        RecommendedPodResources {
            container_recommendations: vec![RecommendedContainerResources::new(container, target)],
        }
    }

    fn target_of(rec: &RecommendedPodResources, container: &str) -> ResourceList {
        rec.for_container(container).unwrap().target.clone()
    }

    #[test]
    fn test_cpu_clamped_into_bounds() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        let policy = build_test_policy("app", "100m", "1", "", "");

        let low = applier
            .apply(&recommendation("app", resources("50m", "")), Some(&policy), &pod)
            .unwrap();
        assert_eq!(target_of(&low, "app")[CPU].to_string(), "100m");

        let high = applier
            .apply(&recommendation("app", resources("2", "")), Some(&policy), &pod)
            .unwrap();
        assert_eq!(target_of(&high, "app")[CPU].to_string(), "1");

        let within = applier
            .apply(&recommendation("app", resources("500m", "")), Some(&policy), &pod)
            .unwrap();
        assert_eq!(target_of(&within, "app")[CPU].to_string(), "500m");
    }

    #[test]
    fn test_memory_clamped_into_bounds() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        let policy = build_test_policy("app", "", "", "128Mi", "1Gi");

        let bounded = applier
            .apply(&recommendation("app", resources("", "64Mi")), Some(&policy), &pod)
            .unwrap();
        assert_eq!(target_of(&bounded, "app")[MEMORY].to_string(), "128Mi");

        let bounded = applier
            .apply(&recommendation("app", resources("", "4Gi")), Some(&policy), &pod)
            .unwrap();
        assert_eq!(target_of(&bounded, "app")[MEMORY].to_string(), "1Gi");
    }

    #[test]
    fn test_bounding_is_idempotent() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        let policy = build_test_policy("app", "100m", "1", "128Mi", "1Gi");
        let raw = RecommendedPodResources {
            container_recommendations: vec![
                RecommendedContainerResources {
                    container_name: "app".to_string(),
                    target: resources("3", "32Mi"),
                    lower_bound: resources("10m", "16Mi"),
                    upper_bound: resources("8", "8Gi"),
                },
                RecommendedContainerResources::new("sidecar", resources("20m", "10Mi")),
            ],
        };

        let once = applier.apply(&raw, Some(&policy), &pod).unwrap();
        let twice = applier.apply(&once, Some(&policy), &pod).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unpolicied_container_passes_through() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        let policy = build_test_policy("app", "100m", "1", "128Mi", "1Gi");
        let raw = recommendation("sidecar", resources("5", "16Gi"));

        let bounded = applier.apply(&raw, Some(&policy), &pod).unwrap();
        assert_eq!(bounded, raw);

        let without_policy = applier.apply(&raw, None, &pod).unwrap();
        assert_eq!(without_policy, raw);
    }

    #[test]
    fn test_unbounded_resource_passes_through() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        // Only cpu is bounded
        let policy = build_test_policy("app", "100m", "1", "", "");
        let raw = recommendation("app", resources("2", "16Gi"));

        let bounded = applier.apply(&raw, Some(&policy), &pod).unwrap();
        let target = target_of(&bounded, "app");
        assert_eq!(target[CPU].to_string(), "1");
        assert_eq!(target[MEMORY].to_string(), "16Gi");
    }

    #[test]
    fn test_lower_and_upper_bounds_are_clamped() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        let policy = build_test_policy("app", "100m", "1", "", "");
        let raw = RecommendedPodResources {
            container_recommendations: vec![RecommendedContainerResources {
                container_name: "app".to_string(),
                target: resources("500m", ""),
                lower_bound: resources("10m", ""),
                upper_bound: resources("4", ""),
            }],
        };

        let bounded = applier.apply(&raw, Some(&policy), &pod).unwrap();
        let app = bounded.for_container("app").unwrap();
        assert_eq!(app.lower_bound[CPU].to_string(), "100m");
        assert_eq!(app.upper_bound[CPU].to_string(), "1");
    }

    #[test]
    fn test_malformed_policy_rejected() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        let policy = build_test_policy("app", "100m", "1", "2Gi", "1Gi");
        let raw = recommendation("app", resources("500m", "1500Mi"));

        let err = applier.apply(&raw, Some(&policy), &pod).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::InvalidPolicy { ref container, ref resource, .. }
                if container == "app" && resource == MEMORY
        ));
    }

    #[test]
    fn test_malformed_policy_for_absent_container_is_ignored() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        let policy = build_test_policy("other", "2", "1", "", "");
        let raw = recommendation("app", resources("500m", ""));

        assert!(applier.apply(&raw, Some(&policy), &pod).is_ok());
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let applier = PolicyBoundsApplier::new();
        let pod = TestPodBuilder::new("web-0").build();
        let policy = build_test_policy("app", "100m", "1", "128Mi", "1Gi");
        let raw = recommendation("app", resources("5", "10Mi"));
        let raw_before = raw.clone();
        let policy_before = policy.clone();

        let _ = applier.apply(&raw, Some(&policy), &pod).unwrap();
        assert_eq!(raw, raw_before);
        assert_eq!(policy, policy_before);
    }
}
