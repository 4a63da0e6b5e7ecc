use std::path::Path;

use api_types::WorkloadKind;
use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::PostParams;
use kube::core::ApiResource;
use kube::core::DynamicObject;
use kube::core::GroupVersionKind;
use kube::Api;
use kube::Client;
use tracing::debug;
use tracing::warn;

use crate::domain::record::BackingRecord;
use crate::infrastructure::k8s::backing_record;
use crate::infrastructure::k8s::ClusterStore;
use crate::infrastructure::k8s::ControllerObject;
use crate::infrastructure::k8s::StoreError;
use crate::infrastructure::kube_client;

/// API group of the worker-group custom resource.
pub const WORKER_GROUP_GROUP: &str = "trainctl.io";
pub const WORKER_GROUP_VERSION: &str = "v1alpha1";
pub const WORKER_GROUP_KIND: &str = "WorkerGroupJob";

/// [`ClusterStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn init(kubeconfig: Option<&Path>) -> Result<Self, Report<StoreError>> {
        Ok(Self::new(kube_client::init_kube_client(kubeconfig).await?))
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn controllers(&self, namespace: &str, kind: WorkloadKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &controller_resource(kind))
    }
}

/// API resource of the object that owns a job's pods.
pub fn controller_resource(kind: WorkloadKind) -> ApiResource {
    match kind {
        WorkloadKind::PlainJob => ApiResource::erase::<Job>(&()),
        WorkloadKind::WorkerGroupJob => ApiResource::from_gvk(&GroupVersionKind::gvk(
            WORKER_GROUP_GROUP,
            WORKER_GROUP_VERSION,
            WORKER_GROUP_KIND,
        )),
        WorkloadKind::InteractiveJob => ApiResource::erase::<StatefulSet>(&()),
    }
}

/// Translate a kube error, keeping "already exists" and "forbidden" distinguishable.
fn map_kube_error(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Report<StoreError> {
    let context = match &err {
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(api_err) if api_err.code == 401 || api_err.code == 403 => {
            StoreError::Forbidden {
                reason: api_err.message.clone(),
            }
        }
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        other => StoreError::Api {
            message: other.to_string(),
        },
    };
    Report::new(context).attach_printable(format!("Kubernetes API error: {err}"))
}

fn controller_object(kind: WorkloadKind, object: DynamicObject) -> ControllerObject {
    let (replicas_field, ready_field) = match kind {
        WorkloadKind::PlainJob => ("parallelism", "ready"),
        WorkloadKind::WorkerGroupJob | WorkloadKind::InteractiveJob => {
            ("replicas", "readyReplicas")
        }
    };
    let metadata = object.metadata;
    ControllerObject {
        name: metadata.name.unwrap_or_default(),
        namespace: metadata.namespace.unwrap_or_default(),
        annotations: metadata.annotations.unwrap_or_default(),
        labels: metadata.labels.unwrap_or_default(),
        creation_time: metadata.creation_timestamp.map(|t| t.0),
        replicas: object.data["spec"][replicas_field].as_i64(),
        ready_replicas: object.data["status"][ready_field].as_i64(),
        deleting: metadata.deletion_timestamp.is_some(),
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn create_record(
        &self,
        record: &BackingRecord,
    ) -> Result<BackingRecord, Report<StoreError>> {
        let config_map = backing_record::to_config_map(record)?;
        let created = self
            .config_maps(&record.namespace)
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(|e| map_kube_error(e, "ConfigMap", &record.namespace, &record.name))?;
        debug!(name = %record.name, namespace = %record.namespace, "Created backing record");
        backing_record::from_config_map(created)
    }

    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BackingRecord>, Report<StoreError>> {
        let config_map = self
            .config_maps(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, "ConfigMap", namespace, name))?;
        config_map.map(backing_record::from_config_map).transpose()
    }

    async fn list_records(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<BackingRecord>, Report<StoreError>> {
        let list = self
            .config_maps(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| map_kube_error(e, "ConfigMap", namespace, label_selector))?;

        let mut records = Vec::with_capacity(list.items.len());
        for config_map in list.items {
            match backing_record::from_config_map(config_map) {
                Ok(record) => records.push(record),
                Err(e) => warn!(namespace = %namespace, "Skipping malformed backing record: {e:?}"),
            }
        }
        Ok(records)
    }

    async fn replace_record(
        &self,
        record: &BackingRecord,
    ) -> Result<BackingRecord, Report<StoreError>> {
        let config_map = backing_record::to_config_map(record)?;
        let replaced = self
            .config_maps(&record.namespace)
            .replace(&record.name, &PostParams::default(), &config_map)
            .await
            .map_err(|e| map_kube_error(e, "ConfigMap", &record.namespace, &record.name))?;
        backing_record::from_config_map(replaced)
    }

    async fn delete_record(&self, namespace: &str, name: &str) -> Result<(), Report<StoreError>> {
        self.config_maps(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, "ConfigMap", namespace, name))?;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, Report<StoreError>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| map_kube_error(e, "Pod", namespace, label_selector))?;
        Ok(list.items)
    }

    async fn get_controller(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<Option<ControllerObject>, Report<StoreError>> {
        let object = self
            .controllers(namespace, kind)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, &kind.to_string(), namespace, name))?;
        Ok(object.map(|object| controller_object(kind, object)))
    }

    async fn delete_controller(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<(), Report<StoreError>> {
        self.controllers(namespace, kind)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| map_kube_error(e, &kind.to_string(), namespace, name))?;
        Ok(())
    }
}
