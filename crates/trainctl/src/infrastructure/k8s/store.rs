use std::collections::BTreeMap;

use api_types::WorkloadKind;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;

use crate::domain::record::BackingRecord;
use crate::infrastructure::k8s::StoreError;

/// The object that owns a job's pods: a batch Job, a worker-group custom
/// resource or a stateful set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerObject {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub creation_time: Option<DateTime<Utc>>,
    /// Desired replicas (`spec.replicas`, or `spec.parallelism` for batch jobs)
    pub replicas: Option<i64>,
    /// Ready replicas (`status.readyReplicas`, or `status.ready` for batch jobs)
    pub ready_replicas: Option<i64>,
    pub deleting: bool,
}

/// Access to the cluster store.
///
/// `create_record` must be an atomic create-if-absent: exactly one of any
/// number of concurrent creates for the same name succeeds and every other
/// fails with [`StoreError::AlreadyExists`]. Exclusivity is never expressed
/// through in-process locks.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn create_record(
        &self,
        record: &BackingRecord,
    ) -> Result<BackingRecord, Report<StoreError>>;

    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BackingRecord>, Report<StoreError>>;

    /// Records matching an equality-based label selector.
    async fn list_records(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<BackingRecord>, Report<StoreError>>;

    /// Whole-object replacement of an existing record.
    async fn replace_record(
        &self,
        record: &BackingRecord,
    ) -> Result<BackingRecord, Report<StoreError>>;

    async fn delete_record(&self, namespace: &str, name: &str) -> Result<(), Report<StoreError>>;

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, Report<StoreError>>;

    async fn get_controller(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<Option<ControllerObject>, Report<StoreError>>;

    async fn delete_controller(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<(), Report<StoreError>>;
}
