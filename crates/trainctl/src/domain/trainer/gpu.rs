//! GPU accounting shared by all trainers.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::warn;

use crate::domain::view::pod_phase;
use crate::infrastructure::k8s::labels;

/// GPUs requested by a job.
///
/// Fractional shares annotated on pods take precedence and are summed over
/// all pods. Without any, the chief's first container request for whole
/// GPUs is used (its limit when no request is set).
pub fn requested_gpu(pods: &[Pod], chief: Option<&Pod>) -> f64 {
    let fractions: Vec<f64> = pods.iter().filter_map(gpu_fraction).collect();
    if !fractions.is_empty() {
        return fractions.iter().sum();
    }

    let Some(container) = chief
        .and_then(|pod| pod.spec.as_ref())
        .and_then(|spec| spec.containers.first())
    else {
        return 0.0;
    };
    let resources = container.resources.as_ref();
    resources
        .and_then(|r| r.requests.as_ref())
        .and_then(|requests| requests.get(labels::GPU_RESOURCE))
        .or_else(|| {
            resources
                .and_then(|r| r.limits.as_ref())
                .and_then(|limits| limits.get(labels::GPU_RESOURCE))
        })
        .and_then(parse_quantity)
        .unwrap_or(0.0)
}

/// Requested GPUs count as allocated only while the chief is running.
pub fn allocated_gpu(requested: f64, chief: Option<&Pod>) -> f64 {
    match chief.and_then(pod_phase) {
        Some("Running") => requested,
        _ => 0.0,
    }
}

fn gpu_fraction(pod: &Pod) -> Option<f64> {
    let annotations = pod.metadata.annotations.as_ref()?;
    let raw = annotations.get(labels::GPU_FRACTION)?;
    match raw.trim().parse::<f64>() {
        Ok(fraction) if fraction.is_finite() && fraction >= 0.0 => Some(fraction),
        _ => {
            warn!(
                pod = pod.metadata.name.as_deref().unwrap_or_default(),
                value = %raw,
                "Ignoring invalid GPU fraction annotation"
            );
            None
        }
    }
}

/// Plain and milli quantities; GPUs are never expressed with other suffixes.
fn parse_quantity(quantity: &Quantity) -> Option<f64> {
    let value = quantity.0.trim();
    match value.strip_suffix('m') {
        Some(milli) => milli.parse::<f64>().ok().map(|m| m / 1000.0),
        None => value.parse::<f64>().ok(),
    }
}
