//! Integration tests for eviction admission
//!
//! These tests verify:
//! - The disruption budget holds under concurrent admission requests
//! - Bookkeeping follows registration epochs
//! - Failed, timed out and cancelled evictions leave no in-progress entry
//!   and keep their admission within the same epoch

use super::*;
use crate::config::UpdaterConfig;
use crate::error::EvictionError;
use crate::models::{Pod, PodPhase, WorkloadId};
use crate::testing::{test_workload, RecordingEvictor, TestPodBuilder};
use std::sync::Arc;
use std::time::Duration;

fn workload_pods(workload: &WorkloadId, count: usize) -> Vec<Pod> {
    (0..count)
        .map(|i| {
            TestPodBuilder::new(format!("{}-{}", workload.name, i))
                .owner(workload.clone())
                .build()
        })
        .collect()
}

mod budget_tests {
    use super::*;

    #[test]
    fn test_concurrent_admissions_respect_budget() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 10);
        controller.register_workload(&workload, 10, 0.2, &pods);

        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = pods
                .iter()
                .map(|pod| {
                    let controller = &controller;
                    scope.spawn(move || controller.can_evict(pod))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|admitted| **admitted).count(), 2);
    }

    #[test]
    fn test_budgets_are_independent_per_workload() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let web = test_workload("web");
        let api = test_workload("api");
        let web_pods = workload_pods(&web, 4);
        let api_pods = workload_pods(&api, 4);
        controller.register_workload(&web, 4, 0.5, &web_pods);
        controller.register_workload(&api, 4, 0.5, &api_pods);

        let web_admitted = web_pods.iter().filter(|p| controller.can_evict(p)).count();
        let api_admitted = api_pods.iter().filter(|p| controller.can_evict(p)).count();

        assert_eq!(web_admitted, 2);
        assert_eq!(api_admitted, 2);
        assert_eq!(controller.workload_count(), 2);
    }

    #[test]
    fn test_singleton_workload_never_evicted() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let workload = test_workload("solo");

        let healthy = workload_pods(&workload, 1);
        controller.register_workload(&workload, 1, 1.0, &healthy);
        assert!(!controller.can_evict(&healthy[0]));

        let unhealthy = vec![TestPodBuilder::new("solo-0")
            .owner(workload.clone())
            .not_ready()
            .build()];
        controller.register_workload(&workload, 1, 1.0, &unhealthy);
        assert_eq!(
            controller.admit(&unhealthy[0]),
            AdmissionDecision::Denied(DenialReason::SingleReplica)
        );
    }

    #[test]
    fn test_unhealthy_pods_bypass_budget() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let workload = test_workload("web");
        let pods = vec![
            TestPodBuilder::new("web-0").owner(workload.clone()).not_ready().build(),
            TestPodBuilder::new("web-1")
                .owner(workload.clone())
                .phase(PodPhase::Pending)
                .build(),
            TestPodBuilder::new("web-2").owner(workload.clone()).build(),
            TestPodBuilder::new("web-3").owner(workload.clone()).build(),
        ];
        controller.register_workload(&workload, 4, 0.25, &pods);

        assert!(controller.can_evict(&pods[0]));
        assert!(controller.can_evict(&pods[1]));
        // Two of four replicas are already down, more than the budget allows
        assert_eq!(
            controller.admit(&pods[2]),
            AdmissionDecision::Denied(DenialReason::BudgetExhausted)
        );
    }

    #[test]
    fn test_unknown_workload_or_pod_denied() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 3);

        assert_eq!(
            controller.admit(&pods[0]),
            AdmissionDecision::Denied(DenialReason::UnknownWorkload)
        );

        controller.register_workload(&workload, 3, 0.5, &pods);
        let orphan = TestPodBuilder::new("orphan").without_owner().build();
        assert!(!controller.can_evict(&orphan));

        let unlisted = TestPodBuilder::new("web-99").owner(workload.clone()).build();
        assert_eq!(
            controller.admit(&unlisted),
            AdmissionDecision::Denied(DenialReason::UnknownPod)
        );
    }

    #[test]
    fn test_repeated_admission_does_not_consume_extra_budget() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        controller.register_workload(&workload, 4, 0.25, &pods);

        assert!(controller.can_evict(&pods[0]));
        assert!(controller.can_evict(&pods[0]));
        assert!(!controller.can_evict(&pods[1]));
    }

    #[test]
    fn test_registered_total_governs_budget() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let workload = test_workload("web");
        // Five replicas configured, only three healthy pods listed
        let pods = workload_pods(&workload, 3);
        controller.register_workload(&workload, 5, 0.4, &pods);

        // max 2 disruptable, 3 must stay alive, 3 alive now
        assert!(!controller.can_evict(&pods[0]));
    }

    #[test]
    fn test_retain_workloads_drops_inactive_state() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let web = test_workload("web");
        let api = test_workload("api");
        controller.register_workload(&web, 2, 0.5, &workload_pods(&web, 2));
        controller.register_workload(&api, 2, 0.5, &workload_pods(&api, 2));

        controller.retain_workloads(&std::collections::HashSet::from([web.clone()]));

        assert!(controller.is_registered(&web));
        assert!(!controller.is_registered(&api));
    }
}

mod eviction_tests {
    use super::*;

    #[tokio::test]
    async fn test_evict_requires_admission() {
        let evictor = Arc::new(RecordingEvictor::new());
        let controller = EvictionAdmissionController::new(evictor.clone());
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        controller.register_workload(&workload, 4, 0.5, &pods);

        let err = controller.evict(&pods[0]).await.unwrap_err();
        assert!(matches!(err, EvictionError::NotPermitted { .. }));
        assert_eq!(evictor.calls(), 0);
        assert!(controller.evictions_in_progress(&workload).is_empty());
    }

    #[tokio::test]
    async fn test_successful_eviction_is_recorded() {
        let evictor = Arc::new(RecordingEvictor::new());
        let controller = EvictionAdmissionController::new(evictor.clone());
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        controller.register_workload(&workload, 4, 0.5, &pods);

        assert!(controller.can_evict(&pods[0]));
        controller.evict(&pods[0]).await.unwrap();

        assert_eq!(evictor.evicted(), vec![pods[0].id.clone()]);
        assert_eq!(controller.evictions_in_progress(&workload), vec![pods[0].id.clone()]);
        assert_eq!(
            controller.admit(&pods[0]),
            AdmissionDecision::Denied(DenialReason::AlreadyEvicting)
        );
        // A second evict for the same admission is refused
        assert!(matches!(
            controller.evict(&pods[0]).await,
            Err(EvictionError::NotPermitted { .. })
        ));
    }

    #[tokio::test]
    async fn test_admission_expires_with_registration_epoch() {
        let evictor = Arc::new(RecordingEvictor::new());
        let controller = EvictionAdmissionController::new(evictor.clone());
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        controller.register_workload(&workload, 4, 0.5, &pods);

        assert!(controller.can_evict(&pods[0]));
        controller.register_workload(&workload, 4, 0.5, &pods);

        let err = controller.evict(&pods[0]).await.unwrap_err();
        assert!(matches!(err, EvictionError::NotPermitted { .. }));
        assert_eq!(evictor.calls(), 0);
    }

    #[tokio::test]
    async fn test_in_progress_evictions_survive_until_pod_disappears() {
        let controller = EvictionAdmissionController::new(Arc::new(RecordingEvictor::new()));
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 3);
        controller.register_workload(&workload, 3, 0.34, &pods);

        assert!(controller.can_evict(&pods[0]));
        controller.evict(&pods[0]).await.unwrap();

        // Evicted pod still listed as healthy: it keeps holding the only slot
        controller.register_workload(&workload, 3, 0.34, &pods);
        assert!(!controller.can_evict(&pods[1]));
        assert_eq!(controller.evictions_in_progress(&workload).len(), 1);

        // Evicted pod gone and replaced: the stale entry is cleared
        let mut next = pods[1..].to_vec();
        next.push(TestPodBuilder::new("web-3").owner(workload.clone()).build());
        controller.register_workload(&workload, 3, 0.34, &next);
        assert!(controller.evictions_in_progress(&workload).is_empty());
        assert!(controller.can_evict(&next[0]));
    }

    #[tokio::test]
    async fn test_failed_eviction_rolls_back() {
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        let evictor = Arc::new(RecordingEvictor::new().failing_for(pods[0].id.clone()));
        let controller = EvictionAdmissionController::new(evictor.clone());
        controller.register_workload(&workload, 4, 0.25, &pods);

        assert!(controller.can_evict(&pods[0]));
        let err = controller.evict(&pods[0]).await.unwrap_err();

        assert!(matches!(err, EvictionError::External { .. }));
        assert!(err.to_string().contains("disruption budget violated"));
        assert!(controller.evictions_in_progress(&workload).is_empty());
        assert!(evictor.evicted().is_empty());

        // The admission is restored: the slot stays held for this pod
        assert!(!controller.can_evict(&pods[1]));
        assert!(controller.can_evict(&pods[0]));
        let retry = controller.evict(&pods[0]).await.unwrap_err();
        assert!(matches!(retry, EvictionError::External { .. }));
    }

    #[tokio::test]
    async fn test_failed_eviction_after_reregistration_drops_admission() {
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        let evictor = Arc::new(
            RecordingEvictor::new()
                .failing_for(pods[0].id.clone())
                .with_delay(Duration::from_millis(200)),
        );
        let controller = Arc::new(EvictionAdmissionController::new(evictor));
        controller.register_workload(&workload, 4, 0.25, &pods);
        assert!(controller.can_evict(&pods[0]));

        let task = {
            let controller = Arc::clone(&controller);
            let pod = pods[0].clone();
            tokio::spawn(async move { controller.evict(&pod).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.register_workload(&workload, 4, 0.25, &pods);

        assert!(task.await.unwrap().is_err());
        let err = controller.evict(&pods[0]).await.unwrap_err();
        assert!(matches!(err, EvictionError::NotPermitted { .. }));
        assert!(controller.can_evict(&pods[1]));
    }

    #[tokio::test]
    async fn test_timed_out_eviction_rolls_back() {
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        let evictor = Arc::new(RecordingEvictor::new().with_delay(Duration::from_millis(500)));
        let controller = EvictionAdmissionController::new(evictor.clone())
            .with_eviction_timeout(Duration::from_millis(20));
        controller.register_workload(&workload, 4, 0.25, &pods);

        assert!(controller.can_evict(&pods[0]));
        let err = controller.evict(&pods[0]).await.unwrap_err();

        assert!(matches!(err, EvictionError::Timeout { .. }));
        assert!(err.is_external());
        assert!(controller.evictions_in_progress(&workload).is_empty());
        assert!(!controller.can_evict(&pods[1]));
        assert!(controller.can_evict(&pods[0]));
    }

    #[tokio::test]
    async fn test_configured_timeout_applies() {
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        let evictor = Arc::new(RecordingEvictor::new().with_delay(Duration::from_secs(5)));
        let config = UpdaterConfig {
            eviction_timeout_secs: 1,
            ..Default::default()
        };
        let controller = EvictionAdmissionController::from_config(evictor, &config);
        controller.register_workload(&workload, 4, 0.25, &pods);

        assert!(controller.can_evict(&pods[0]));
        let err = controller.evict(&pods[0]).await.unwrap_err();
        assert!(matches!(err, EvictionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_eviction_rolls_back() {
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 4);
        let evictor = Arc::new(RecordingEvictor::new().with_delay(Duration::from_secs(5)));
        let controller = EvictionAdmissionController::new(evictor.clone());
        controller.register_workload(&workload, 4, 0.25, &pods);

        assert!(controller.can_evict(&pods[0]));
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), controller.evict(&pods[0])).await;

        assert!(cancelled.is_err());
        assert_eq!(evictor.calls(), 1);
        assert!(controller.evictions_in_progress(&workload).is_empty());
        assert!(controller.can_evict(&pods[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_evict_within_budget() {
        let evictor = Arc::new(RecordingEvictor::new().with_delay(Duration::from_millis(10)));
        let controller = Arc::new(EvictionAdmissionController::new(evictor.clone()));
        let workload = test_workload("web");
        let pods = workload_pods(&workload, 10);
        controller.register_workload(&workload, 10, 0.2, &pods);

        let mut handles = Vec::new();
        for pod in pods {
            let controller = Arc::clone(&controller);
            handles.push(tokio::spawn(async move {
                if controller.can_evict(&pod) {
                    controller.evict(&pod).await.is_ok()
                } else {
                    false
                }
            }));
        }

        let mut evicted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                evicted += 1;
            }
        }

        assert_eq!(evicted, 2);
        assert_eq!(evictor.evicted().len(), 2);
        assert_eq!(controller.evictions_in_progress(&workload).len(), 2);
    }
}
