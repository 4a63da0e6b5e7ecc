//! Canonical status resolution.
//!
//! Signals are consulted in a fixed precedence order, highest first:
//!
//! 1. a terminal status written by the scheduler,
//! 2. the legacy `unschedulable` flag,
//! 3. any other non-empty scheduler status,
//! 4. the status hint cached on the workload,
//! 5. no chief pod: `Unknown`,
//! 6. the chief pod's kubectl-style status.
//!
//! A `Running` result is then downgraded to `Pending` while any pod of the
//! job is still pending. Resolution never fails: missing information
//! degrades to `Unknown`.

mod pod_status;

use api_types::CanonicalStatus;
pub use pod_status::derive_pod_status;
pub use pod_status::pod_status;
pub use pod_status::PodStatus;
use tracing::debug;

use crate::domain::view::pod_phase;
use crate::domain::view::WorkloadView;
use crate::infrastructure::k8s::labels;

/// Outcome of [`resolve`]: the canonical status plus the detail string
/// behind it (a scheduler status, or a pod status such as `Init:ExitCode:1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStatus {
    pub status: CanonicalStatus,
    pub reason: String,
}

impl ResolvedStatus {
    fn new(status: CanonicalStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

pub fn resolve(view: &WorkloadView) -> ResolvedStatus {
    let resolved = resolve_by_precedence(view);
    if resolved.status.is_terminal() {
        return resolved;
    }

    if resolved.status == CanonicalStatus::Running
        && view
            .all_pods()
            .iter()
            .any(|pod| pod_phase(pod) == Some("Pending"))
    {
        debug!(job = %view.name, "Downgrading Running job with pending pods");
        return ResolvedStatus::new(CanonicalStatus::Pending, "Pending");
    }
    resolved
}

fn resolve_by_precedence(view: &WorkloadView) -> ResolvedStatus {
    let scheduler_status = view
        .annotation(labels::SCHEDULER_STATUS)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(reported) = scheduler_status {
        if let Ok(status) = reported.parse::<CanonicalStatus>() {
            if status.is_terminal() {
                return ResolvedStatus::new(status, reported);
            }
        }
    }

    if view.annotation(labels::SCHEDULER_UNSCHEDULABLE) == Some("true") {
        return ResolvedStatus::new(CanonicalStatus::Unschedulable, "Unschedulable");
    }

    if let Some(reported) = scheduler_status {
        return from_annotation(reported);
    }

    if let Some(cached) = view
        .annotation(labels::STATUS_CACHE)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return from_annotation(cached);
    }

    let Some(chief) = view.chief_pod() else {
        return ResolvedStatus::new(CanonicalStatus::Unknown, "NoChiefPod");
    };

    let reason = derive_pod_status(chief);
    let status = canonical_from_pod_status(&reason, pod_phase(chief).unwrap_or_default());
    ResolvedStatus::new(status, reason)
}

/// Statuses written by other components are shown verbatim even when they
/// do not name a canonical status.
fn from_annotation(value: &str) -> ResolvedStatus {
    let status = value.parse().unwrap_or(CanonicalStatus::Unknown);
    ResolvedStatus::new(status, value)
}

fn canonical_from_pod_status(reason: &str, phase: &str) -> CanonicalStatus {
    match reason {
        "Running" => CanonicalStatus::Running,
        "Completed" | "Succeeded" => CanonicalStatus::Succeeded,
        "Terminating" => CanonicalStatus::Terminating,
        "Unknown" => CanonicalStatus::Unknown,
        "DeadlineExceeded" => CanonicalStatus::TimedOut,
        "Error" | "Failed" | "OOMKilled" | "Evicted" | "ContainerCannotRun" => {
            CanonicalStatus::Failed
        }
        r if r.starts_with("ExitCode:") || r.starts_with("Signal:") => CanonicalStatus::Failed,
        _ => match phase {
            "Pending" => CanonicalStatus::Pending,
            "Running" => CanonicalStatus::Running,
            "Succeeded" => CanonicalStatus::Succeeded,
            "Failed" => CanonicalStatus::Failed,
            _ => CanonicalStatus::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use api_types::WorkloadKind;
    use k8s_openapi::api::core::v1::Pod;
    use similar_asserts::assert_eq;

    use super::*;

    fn pod(name: &str, phase: &str) -> Pod {
        serde_json::from_value(serde_json::json!({
            "metadata": { "name": name },
            "status": { "phase": phase }
        }))
        .unwrap()
    }

    fn view(pods: Vec<Pod>, annotations: &[(&str, &str)]) -> WorkloadView {
        let chief = if pods.is_empty() { None } else { Some(0) };
        let mut view =
            WorkloadView::empty("train", "ml", WorkloadKind::WorkerGroupJob).with_pods(pods, chief);
        view.scheduler_annotations = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        view
    }

    #[test]
    fn terminal_scheduler_status_wins_over_pods() {
        let v = view(
            vec![pod("head", "Running")],
            &[(labels::SCHEDULER_STATUS, "Preempted")],
        );
        assert_eq!(v.raw_phase, "Running");
        assert_eq!(
            resolve(&v),
            ResolvedStatus::new(CanonicalStatus::Preempted, "Preempted")
        );
    }

    #[test]
    fn terminal_status_beats_unschedulable_flag() {
        let v = view(
            vec![],
            &[
                (labels::SCHEDULER_STATUS, "Failed"),
                (labels::SCHEDULER_UNSCHEDULABLE, "true"),
            ],
        );
        assert_eq!(resolve(&v).status, CanonicalStatus::Failed);
    }

    #[test]
    fn unschedulable_flag_beats_live_status() {
        let v = view(
            vec![pod("head", "Pending")],
            &[
                (labels::SCHEDULER_STATUS, "Running"),
                (labels::SCHEDULER_UNSCHEDULABLE, "true"),
            ],
        );
        assert_eq!(resolve(&v).status, CanonicalStatus::Unschedulable);
    }

    #[test]
    fn live_scheduler_status_beats_cache_and_pods() {
        let v = view(
            vec![pod("head", "Succeeded")],
            &[
                (labels::SCHEDULER_STATUS, "Pending"),
                (labels::STATUS_CACHE, "Running"),
            ],
        );
        assert_eq!(resolve(&v).status, CanonicalStatus::Pending);

        let unrecognized = view(vec![], &[(labels::SCHEDULER_STATUS, "Queued")]);
        assert_eq!(
            resolve(&unrecognized),
            ResolvedStatus::new(CanonicalStatus::Unknown, "Queued")
        );
    }

    #[test]
    fn cache_is_used_before_pod_state() {
        let v = view(
            vec![pod("head", "Pending")],
            &[(labels::STATUS_CACHE, "Succeeded")],
        );
        assert_eq!(resolve(&v).status, CanonicalStatus::Succeeded);
    }

    #[test]
    fn no_chief_is_unknown() {
        let v = view(vec![], &[]);
        assert_eq!(resolve(&v).status, CanonicalStatus::Unknown);
    }

    #[test]
    fn running_with_pending_pod_is_pending() {
        let pods = vec![pod("head", "Running"), pod("worker-0", "Pending")];
        let v = view(pods, &[]);
        assert_eq!(
            resolve(&v),
            ResolvedStatus::new(CanonicalStatus::Pending, "Pending")
        );

        let reported = view(
            vec![pod("head", "Running"), pod("worker-0", "Pending")],
            &[(labels::SCHEDULER_STATUS, "Running")],
        );
        assert_eq!(resolve(&reported).status, CanonicalStatus::Pending);
    }

    #[test]
    fn terminal_status_is_not_downgraded() {
        let v = view(
            vec![pod("head", "Running"), pod("worker-0", "Pending")],
            &[(labels::SCHEDULER_STATUS, "TimedOut")],
        );
        assert_eq!(resolve(&v).status, CanonicalStatus::TimedOut);
    }

    #[test]
    fn pod_reasons_map_to_canonical() {
        let cases = [
            ("Init:ExitCode:1", "Pending", CanonicalStatus::Pending),
            ("Init:Error", "Failed", CanonicalStatus::Failed),
            ("ExitCode:2", "Running", CanonicalStatus::Failed),
            ("Completed", "Succeeded", CanonicalStatus::Succeeded),
            ("NotReady", "Running", CanonicalStatus::Running),
            ("CrashLoopBackOff", "Running", CanonicalStatus::Running),
            ("Terminating", "Running", CanonicalStatus::Terminating),
            ("", "", CanonicalStatus::Unknown),
        ];
        for (reason, phase, expected) in cases {
            assert_eq!(canonical_from_pod_status(reason, phase), expected);
        }
    }
}
