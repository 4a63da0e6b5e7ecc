//! Pod status string as printed by `kubectl get pods`.

use k8s_openapi::api::core::v1::ContainerStateTerminated;
use k8s_openapi::api::core::v1::Pod;

/// Deletion reason set by the node lifecycle controller for unreachable nodes.
const NODE_UNREACHABLE_REASON: &str = "NodeLost";

/// The STATUS and RESTARTS columns of `kubectl get pods`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatus {
    pub reason: String,
    /// Restarts of the init containers walked, or of the main containers
    /// once initialization is done
    pub restarts: i32,
}

/// Derive the STATUS column `kubectl get pods` would show for `pod`.
pub fn derive_pod_status(pod: &Pod) -> String {
    pod_status(pod).reason
}

/// Derive the STATUS and RESTARTS columns for `pod`.
///
/// Starts from the phase (or `status.reason`). The first init container
/// that has not terminated successfully decides an `Init:*` status and the
/// main containers are then ignored. Otherwise main containers are walked
/// last to first, keeping the most specific waiting or terminated reason
/// and summing their restarts. A deletion timestamp overrides everything.
pub fn pod_status(pod: &Pod) -> PodStatus {
    let status = pod.status.as_ref();
    let mut restarts = 0;
    let mut reason = status
        .and_then(|s| s.reason.clone())
        .filter(|r| !r.is_empty())
        .or_else(|| status.and_then(|s| s.phase.clone()))
        .unwrap_or_default();

    let init_container_count = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.init_containers.as_ref())
        .map_or(0, Vec::len);

    let mut initializing = false;
    let init_statuses = status
        .and_then(|s| s.init_container_statuses.as_deref())
        .unwrap_or_default();
    for (i, container) in init_statuses.iter().enumerate() {
        restarts += container.restart_count;
        let state = container.state.as_ref();
        let terminated = state.and_then(|s| s.terminated.as_ref());
        let waiting_reason = state
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.as_deref())
            .filter(|r| !r.is_empty());

        match (terminated, waiting_reason) {
            (Some(terminated), _) if terminated.exit_code == 0 => continue,
            (Some(terminated), _) => {
                reason = format!("Init:{}", terminated_reason(terminated));
            }
            (None, Some(waiting)) if waiting != "PodInitializing" => {
                reason = format!("Init:{waiting}");
            }
            _ => {
                reason = format!("Init:{i}/{init_container_count}");
            }
        }
        initializing = true;
        break;
    }

    if !initializing {
        restarts = 0;
        let mut has_running = false;
        let statuses = status
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();
        for container in statuses.iter().rev() {
            restarts += container.restart_count;
            let state = container.state.as_ref();
            let waiting_reason = state
                .and_then(|s| s.waiting.as_ref())
                .and_then(|w| w.reason.as_deref())
                .filter(|r| !r.is_empty());
            let terminated = state.and_then(|s| s.terminated.as_ref());
            let running = state.is_some_and(|s| s.running.is_some());

            if let Some(waiting) = waiting_reason {
                reason = waiting.to_string();
            } else if let Some(terminated) = terminated {
                reason = terminated_reason(terminated);
            } else if container.ready && running {
                has_running = true;
            }
        }

        // the printer can observe a completed container while another is
        // still running
        if reason == "Completed" && has_running {
            reason = if has_ready_condition(pod) {
                "Running".to_string()
            } else {
                "NotReady".to_string()
            };
        }
    }

    if pod.metadata.deletion_timestamp.is_some() {
        let deletion_reason = status.and_then(|s| s.reason.as_deref());
        reason = if deletion_reason == Some(NODE_UNREACHABLE_REASON) {
            "Unknown".to_string()
        } else {
            "Terminating".to_string()
        };
    }

    PodStatus { reason, restarts }
}

/// `reason`, else `Signal:N`, else `ExitCode:N`.
fn terminated_reason(terminated: &ContainerStateTerminated) -> String {
    match terminated.reason.as_deref().filter(|r| !r.is_empty()) {
        Some(reason) => reason.to_string(),
        None => match terminated.signal {
            Some(signal) if signal != 0 => format!("Signal:{signal}"),
            _ => format!("ExitCode:{}", terminated.exit_code),
        },
    }
}

fn has_ready_condition(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn phase_is_the_baseline() {
        let p = pod(serde_json::json!({
            "metadata": { "name": "p" },
            "status": { "phase": "Pending" }
        }));
        assert_eq!(derive_pod_status(&p), "Pending");
    }

    #[test]
    fn status_reason_overrides_phase() {
        let p = pod(serde_json::json!({
            "metadata": { "name": "p" },
            "status": { "phase": "Failed", "reason": "Evicted" }
        }));
        assert_eq!(derive_pod_status(&p), "Evicted");
    }

    #[test]
    fn failed_init_container_short_circuits() {
        let p = pod(serde_json::json!({
            "metadata": { "name": "p" },
            "spec": {
                "initContainers": [{ "name": "fetch" }, { "name": "warmup" }],
                "containers": [{ "name": "main" }]
            },
            "status": {
                "phase": "Pending",
                "initContainerStatuses": [
                    { "name": "fetch", "ready": false, "restartCount": 0,
                      "image": "i", "imageID": "",
                      "state": { "terminated": { "exitCode": 1 } } },
                    { "name": "warmup", "ready": false, "restartCount": 0,
                      "image": "i", "imageID": "",
                      "state": { "waiting": { "reason": "ImagePullBackOff" } } }
                ],
                "containerStatuses": [
                    { "name": "main", "ready": false, "restartCount": 0,
                      "image": "i", "imageID": "",
                      "state": { "waiting": { "reason": "CrashLoopBackOff" } } }
                ]
            }
        }));
        assert_eq!(derive_pod_status(&p), "Init:ExitCode:1");
    }

    #[test]
    fn init_progress_and_signals() {
        let progressing = pod(serde_json::json!({
            "metadata": { "name": "p" },
            "spec": {
                "initContainers": [{ "name": "a" }, { "name": "b" }],
                "containers": [{ "name": "main" }]
            },
            "status": {
                "phase": "Pending",
                "initContainerStatuses": [
                    { "name": "a", "ready": false, "restartCount": 0,
                      "image": "i", "imageID": "",
                      "state": { "terminated": { "exitCode": 0, "reason": "Completed" } } },
                    { "name": "b", "ready": false, "restartCount": 0,
                      "image": "i", "imageID": "",
                      "state": { "waiting": { "reason": "PodInitializing" } } }
                ]
            }
        }));
        assert_eq!(derive_pod_status(&progressing), "Init:1/2");

        let signalled = pod(serde_json::json!({
            "metadata": { "name": "p" },
            "spec": { "initContainers": [{ "name": "a" }], "containers": [{ "name": "main" }] },
            "status": {
                "phase": "Pending",
                "initContainerStatuses": [
                    { "name": "a", "ready": false, "restartCount": 0,
                      "image": "i", "imageID": "",
                      "state": { "terminated": { "exitCode": 137, "signal": 9 } } }
                ]
            }
        }));
        assert_eq!(derive_pod_status(&signalled), "Init:Signal:9");
    }

    #[test]
    fn first_main_container_reason_wins() {
        let p = pod(serde_json::json!({
            "metadata": { "name": "p" },
            "spec": { "containers": [{ "name": "trainer" }, { "name": "sidecar" }] },
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    { "name": "trainer", "ready": false, "restartCount": 3,
                      "image": "i", "imageID": "",
                      "state": { "waiting": { "reason": "CrashLoopBackOff" } } },
                    { "name": "sidecar", "ready": false, "restartCount": 0,
                      "image": "i", "imageID": "",
                      "state": { "terminated": { "exitCode": 2 } } }
                ]
            }
        }));
        assert_eq!(derive_pod_status(&p), "CrashLoopBackOff");
    }

    #[test]
    fn restarts_are_summed_over_the_walked_containers() {
        let running = pod(serde_json::json!({
            "metadata": { "name": "p" },
            "spec": {
                "initContainers": [{ "name": "fetch" }],
                "containers": [{ "name": "trainer" }, { "name": "sidecar" }]
            },
            "status": {
                "phase": "Running",
                "initContainerStatuses": [
                    { "name": "fetch", "ready": false, "restartCount": 4,
                      "image": "i", "imageID": "",
                      "state": { "terminated": { "exitCode": 0, "reason": "Completed" } } }
                ],
                "containerStatuses": [
                    { "name": "trainer", "ready": true, "restartCount": 2,
                      "image": "i", "imageID": "",
                      "state": { "running": {} } },
                    { "name": "sidecar", "ready": true, "restartCount": 1,
                      "image": "i", "imageID": "",
                      "state": { "running": {} } }
                ]
            }
        }));
        assert_eq!(
            pod_status(&running),
            PodStatus {
                reason: "Running".to_string(),
                restarts: 3
            }
        );

        let initializing = pod(serde_json::json!({
            "metadata": { "name": "p" },
            "spec": {
                "initContainers": [{ "name": "fetch" }, { "name": "warmup" }],
                "containers": [{ "name": "trainer" }]
            },
            "status": {
                "phase": "Pending",
                "initContainerStatuses": [
                    { "name": "fetch", "ready": false, "restartCount": 1,
                      "image": "i", "imageID": "",
                      "state": { "terminated": { "exitCode": 0, "reason": "Completed" } } },
                    { "name": "warmup", "ready": false, "restartCount": 5,
                      "image": "i", "imageID": "",
                      "state": { "waiting": { "reason": "CrashLoopBackOff" } } }
                ],
                "containerStatuses": [
                    { "name": "trainer", "ready": false, "restartCount": 9,
                      "image": "i", "imageID": "",
                      "state": { "waiting": { "reason": "PodInitializing" } } }
                ]
            }
        }));
        assert_eq!(
            pod_status(&initializing),
            PodStatus {
                reason: "Init:CrashLoopBackOff".to_string(),
                restarts: 6
            }
        );
    }

    #[test]
    fn completed_with_running_sibling_is_corrected() {
        let status = |ready_condition: &str| {
            pod(serde_json::json!({
                "metadata": { "name": "p" },
                "spec": { "containers": [{ "name": "trainer" }, { "name": "logger" }] },
                "status": {
                    "phase": "Running",
                    "conditions": [{ "type": "Ready", "status": ready_condition }],
                    "containerStatuses": [
                        { "name": "trainer", "ready": false, "restartCount": 0,
                          "image": "i", "imageID": "",
                          "state": { "terminated": { "exitCode": 0, "reason": "Completed" } } },
                        { "name": "logger", "ready": true, "restartCount": 0,
                          "image": "i", "imageID": "",
                          "state": { "running": {} } }
                    ]
                }
            }))
        };
        assert_eq!(derive_pod_status(&status("True")), "Running");
        assert_eq!(derive_pod_status(&status("False")), "NotReady");
    }

    #[test]
    fn deletion_overrides_everything() {
        let terminating = pod(serde_json::json!({
            "metadata": { "name": "p", "deletionTimestamp": "2026-01-01T00:00:00Z" },
            "status": { "phase": "Running" }
        }));
        assert_eq!(derive_pod_status(&terminating), "Terminating");

        let lost = pod(serde_json::json!({
            "metadata": { "name": "p", "deletionTimestamp": "2026-01-01T00:00:00Z" },
            "status": { "phase": "Running", "reason": "NodeLost" }
        }));
        assert_eq!(derive_pod_status(&lost), "Unknown");
    }
}
