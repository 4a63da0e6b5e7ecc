use std::collections::BTreeSet;
use std::sync::Arc;

use api_types::CanonicalStatus;
use api_types::WorkloadKind;
use k8s_openapi::api::core::v1::Pod;
use similar_asserts::assert_eq;
use test_log::test;
use trainctl::domain::allocator::NameAllocator;
use trainctl::domain::error::AllocationError;
use trainctl::domain::jobs;
use trainctl::domain::submission::submit;
use trainctl::domain::submission::SubmitOutcome;
use trainctl::domain::submission::SubmitRequest;
use trainctl::infrastructure::k8s::ClusterStore;
use trainctl::infrastructure::tools::ChartSource;
use trainctl::mock::test_context;
use trainctl::mock::MemoryStore;
use trainctl::mock::TEST_NAMESPACE;

fn request(base_name: &str, kind: WorkloadKind) -> SubmitRequest {
    SubmitRequest {
        base_name: base_name.to_string(),
        allow_suffix: true,
        kind,
        chart: ChartSource {
            chart: format!("charts/{}", kind.label()),
            version: None,
        },
        values: serde_yaml::Mapping::new(),
        dry_run: false,
    }
}

async fn submitted(ctx: &trainctl::Context, request: &SubmitRequest) -> String {
    match submit(ctx, request).await.unwrap() {
        SubmitOutcome::Submitted { name } => name,
        other => panic!("unexpected outcome {other:?}"),
    }
}

fn pod(value: serde_json::Value) -> Pod {
    serde_json::from_value(value).unwrap()
}

const ROUNDS: usize = 20;

/// Run `contenders` allocations of `base_name` as separate tasks against a
/// store that yields between listing and creating.
async fn race_allocations(
    store: &Arc<MemoryStore>,
    contenders: usize,
    base_name: &'static str,
    allow_suffix: bool,
) -> Vec<Result<String, AllocationError>> {
    store.interleave(true);
    let dyn_store: Arc<dyn ClusterStore> = store.clone();
    let handles: Vec<_> = (0..contenders)
        .map(|_| {
            let allocator = NameAllocator::new(dyn_store.clone(), TEST_NAMESPACE);
            tokio::spawn(async move {
                allocator
                    .allocate(base_name, allow_suffix, WorkloadKind::PlainJob)
                    .await
                    .map(|record| record.name)
                    .map_err(|report| report.current_context().clone())
            })
        })
        .collect();

    let mut results = Vec::with_capacity(contenders);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn only_one_unsuffixed_allocation_wins() {
    for _ in 0..ROUNDS {
        let store = Arc::new(MemoryStore::new());
        let results = race_allocations(&store, 8, "train", false).await;

        let winners: Vec<String> = results.iter().filter_map(|r| r.clone().ok()).collect();
        assert_eq!(winners, vec!["train".to_string()]);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(
                err,
                &AllocationError::NameTaken {
                    name: "train".to_string()
                }
            );
        }
        assert_eq!(store.record_names(TEST_NAMESPACE), vec!["train"]);
    }
}

#[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_suffixed_allocations_get_distinct_names() {
    let expected: BTreeSet<String> = ["train", "train-1", "train-2", "train-3", "train-4"]
        .into_iter()
        .map(String::from)
        .collect();
    for _ in 0..ROUNDS {
        let store = Arc::new(MemoryStore::new());
        let names: Vec<String> = race_allocations(&store, 5, "train", true)
            .await
            .into_iter()
            .map(|result| result.unwrap())
            .collect();

        let distinct: BTreeSet<String> = names.iter().cloned().collect();
        assert_eq!(distinct.len(), names.len());
        assert_eq!(distinct, expected);
    }
}

#[test(tokio::test)]
async fn deleted_name_is_reused() {
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(store.clone());
    let train = request("train", WorkloadKind::PlainJob);

    assert_eq!(submitted(&ctx, &train).await, "train");
    assert_eq!(submitted(&ctx, &train).await, "train-1");

    jobs::delete_job(&ctx, "train").await.unwrap();
    let kept = store.has_controller(TEST_NAMESPACE, WorkloadKind::PlainJob, "train");
    assert!(!kept);
    assert!(store.record(TEST_NAMESPACE, "train").is_none());

    assert_eq!(submitted(&ctx, &train).await, "train");
    let listed: Vec<String> = jobs::list_jobs(&ctx)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.name)
        .collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&"train".to_string()));
    assert!(listed.contains(&"train-1".to_string()));
}

#[test(tokio::test)]
async fn deleting_unknown_job_is_not_found() {
    let ctx = test_context(Arc::new(MemoryStore::new()));
    let results = jobs::delete_jobs(&ctx, &["ghost".to_string()]).await;
    assert_eq!(results.len(), 1);
    let (name, result) = &results[0];
    assert_eq!(name, "ghost");
    assert!(result.is_err());
}

#[test(tokio::test)]
async fn running_head_with_pending_worker_is_pending() {
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(store.clone());
    let name = submitted(&ctx, &request("dist", WorkloadKind::WorkerGroupJob)).await;

    store.add_pod(
        TEST_NAMESPACE,
        pod(serde_json::json!({
            "metadata": {
                "name": "dist-head",
                "creationTimestamp": "2026-03-01T10:00:00Z",
                "labels": {
                    "release": "dist",
                    "app": "workergroupjob",
                    "trainctl.io/role": "head"
                }
            },
            "status": { "phase": "Running" }
        })),
    );
    store.add_pod(
        TEST_NAMESPACE,
        pod(serde_json::json!({
            "metadata": {
                "name": "dist-worker-0",
                "creationTimestamp": "2026-03-01T10:00:01Z",
                "labels": {
                    "release": "dist",
                    "app": "workergroupjob",
                    "trainctl.io/role": "worker"
                }
            },
            "status": { "phase": "Pending" }
        })),
    );

    let summary = jobs::job_status(&ctx, &name).await.unwrap();
    assert_eq!(summary.status, CanonicalStatus::Pending);
    assert_eq!(summary.chief_pod.as_deref(), Some("dist-head"));
    assert_eq!(summary.pods, 2);
}

#[test(tokio::test)]
async fn scheduler_terminal_status_beats_running_pods() {
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(store.clone());
    let name = submitted(&ctx, &request("batch", WorkloadKind::PlainJob)).await;

    store.add_pod(
        TEST_NAMESPACE,
        pod(serde_json::json!({
            "metadata": {
                "name": "batch-x7k2p",
                "labels": { "release": "batch", "app": "plainjob" },
                "annotations": { "scheduling.trainctl.io/job-status": "Preempted" }
            },
            "status": { "phase": "Running" }
        })),
    );

    let summary = jobs::job_status(&ctx, &name).await.unwrap();
    assert_eq!(summary.status, CanonicalStatus::Preempted);
    assert_eq!(summary.reason, "Preempted");
}

#[test(tokio::test)]
async fn failing_init_container_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let ctx = test_context(store.clone());
    let name = submitted(&ctx, &request("notebook", WorkloadKind::InteractiveJob)).await;

    store.add_pod(
        TEST_NAMESPACE,
        pod(serde_json::json!({
            "metadata": {
                "name": "notebook-0",
                "labels": { "release": "notebook", "app": "interactivejob" }
            },
            "spec": {
                "initContainers": [{ "name": "fetch" }],
                "containers": [{ "name": "main" }]
            },
            "status": {
                "phase": "Pending",
                "initContainerStatuses": [{
                    "name": "fetch",
                    "image": "fetch:1",
                    "imageID": "",
                    "ready": false,
                    "restartCount": 3,
                    "state": { "waiting": { "reason": "CrashLoopBackOff" } }
                }],
                "containerStatuses": [{
                    "name": "main",
                    "image": "main:1",
                    "imageID": "",
                    "ready": false,
                    "restartCount": 0,
                    "state": { "waiting": { "reason": "PodInitializing" } }
                }]
            }
        })),
    );

    let summary = jobs::job_status(&ctx, &name).await.unwrap();
    assert_eq!(summary.reason, "Init:CrashLoopBackOff");
    assert_eq!(summary.restarts, 3);
    assert_eq!(summary.status, CanonicalStatus::Pending);
}
