//! A head pod plus a fixed-size group of worker pods.

use k8s_openapi::api::core::v1::Pod;

use crate::domain::view::pod_phase;
use crate::infrastructure::k8s::labels;

fn is_head(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::ROLE))
        .is_some_and(|role| role == labels::ROLE_HEAD)
}

/// The newest head pod, unless it is still pending while an older head is
/// not. Keeps the chief from flapping to a replacement that has not
/// started yet.
///
/// `pods` must be ordered oldest first.
pub(super) fn chief_index(pods: &[Pod]) -> Option<usize> {
    let heads: Vec<usize> = (0..pods.len()).filter(|&i| is_head(&pods[i])).collect();
    let (&newest, older) = heads.split_last()?;
    if pod_phase(&pods[newest]) != Some("Pending") {
        return Some(newest);
    }
    older
        .iter()
        .rev()
        .copied()
        .find(|&i| pod_phase(&pods[i]) != Some("Pending"))
        .or(Some(newest))
}
