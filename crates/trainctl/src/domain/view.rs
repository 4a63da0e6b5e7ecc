use std::collections::BTreeMap;

use api_types::WorkloadKind;
use chrono::DateTime;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;

/// Read-only projection of a job, recomputed on every query.
///
/// `chief_pod` is an index into `all_pods`, so the chief is always one of
/// the job's pods.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadView {
    pub name: String,
    pub namespace: String,
    pub kind: WorkloadKind,
    chief: Option<usize>,
    all_pods: Vec<Pod>,
    /// Phase of the chief pod, empty without one
    pub raw_phase: String,
    /// Controller annotations merged over the chief pod's
    pub scheduler_annotations: BTreeMap<String, String>,
    pub requested_gpu: f64,
    pub allocated_gpu: f64,
    pub creation_time: Option<DateTime<Utc>>,
}

impl WorkloadView {
    /// A view without pods.
    pub fn empty(name: &str, namespace: &str, kind: WorkloadKind) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind,
            chief: None,
            all_pods: Vec::new(),
            raw_phase: String::new(),
            scheduler_annotations: BTreeMap::new(),
            requested_gpu: 0.0,
            allocated_gpu: 0.0,
            creation_time: None,
        }
    }

    /// Attach the job's pods and designate `chief` among them. An
    /// out-of-range chief leaves the view without one.
    pub fn with_pods(mut self, all_pods: Vec<Pod>, chief: Option<usize>) -> Self {
        self.chief = chief.filter(|&i| i < all_pods.len());
        self.raw_phase = self
            .chief
            .and_then(|i| pod_phase(&all_pods[i]))
            .unwrap_or_default()
            .to_string();
        self.all_pods = all_pods;
        self
    }

    pub fn chief_pod(&self) -> Option<&Pod> {
        self.chief.and_then(|i| self.all_pods.get(i))
    }

    pub fn chief_pod_name(&self) -> Option<&str> {
        self.chief_pod()?.metadata.name.as_deref()
    }

    pub fn all_pods(&self) -> &[Pod] {
        &self.all_pods
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.scheduler_annotations.get(key).map(String::as_str)
    }
}

pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

pub fn pod_creation_time(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.metadata.creation_timestamp.as_ref().map(|t| t.0)
}
