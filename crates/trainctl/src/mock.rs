//! In-memory adapters for the cluster store and the external tools.
//!
//! Used by unit tests and the integration tests under `tests/`. The store
//! honours the same create-if-absent contract as the API server, and faults
//! can be injected to exercise the error paths.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use api_types::ChartIdentity;
use api_types::ResourceRef;
use api_types::WorkloadKind;
use async_trait::async_trait;
use chrono::Utc;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;

use crate::context::Context;
use crate::domain::record::BackingRecord;
use crate::infrastructure::helm::project_manifest;
use crate::infrastructure::k8s::backing_record;
use crate::infrastructure::k8s::labels;
use crate::infrastructure::k8s::ClusterStore;
use crate::infrastructure::k8s::ControllerObject;
use crate::infrastructure::k8s::StoreError;
use crate::infrastructure::tools::ApplyTool;
use crate::infrastructure::tools::ChartSource;
use crate::infrastructure::tools::ManifestTemplater;
use crate::infrastructure::tools::RenderedManifest;
use crate::infrastructure::tools::ToolError;

/// Namespace used by [`test_context`].
pub const TEST_NAMESPACE: &str = "ml";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Faults {
    deny_creates: Option<String>,
    hide_from_lists: bool,
    fail_replace: bool,
    interleave: bool,
}

type ControllerKey = (String, &'static str, String);

fn controller_key(namespace: &str, kind: WorkloadKind, name: &str) -> ControllerKey {
    (namespace.to_string(), kind.label(), name.to_string())
}

/// Cluster store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<(String, String), BackingRecord>>,
    pods: Mutex<Vec<(String, Pod)>>,
    controllers: Mutex<BTreeMap<ControllerKey, ControllerObject>>,
    faults: Mutex<Faults>,
    create_calls: AtomicUsize,
    versions: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every record creation with `Forbidden`.
    pub fn deny_creates(&self, reason: &str) {
        lock(&self.faults).deny_creates = Some(reason.to_string());
    }

    /// Make record listings come back empty, like a lagging cache.
    pub fn hide_from_lists(&self, hide: bool) {
        lock(&self.faults).hide_from_lists = hide;
    }

    /// Fail every record replacement.
    pub fn fail_replaces(&self, fail: bool) {
        lock(&self.faults).fail_replace = fail;
    }

    /// Yield to the scheduler around every record create and list, so
    /// concurrent allocators interleave between listing and creating.
    pub fn interleave(&self, interleave: bool) {
        lock(&self.faults).interleave = interleave;
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn record(&self, namespace: &str, name: &str) -> Option<BackingRecord> {
        lock(&self.records)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn record_names(&self, namespace: &str) -> Vec<String> {
        lock(&self.records)
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn remove_record(&self, namespace: &str, name: &str) -> Option<BackingRecord> {
        lock(&self.records).remove(&(namespace.to_string(), name.to_string()))
    }

    pub fn add_pod(&self, namespace: &str, pod: Pod) {
        lock(&self.pods).push((namespace.to_string(), pod));
    }

    pub fn add_controller(&self, kind: WorkloadKind, controller: ControllerObject) {
        let key = controller_key(&controller.namespace, kind, &controller.name);
        lock(&self.controllers).insert(key, controller);
    }

    pub fn has_controller(&self, namespace: &str, kind: WorkloadKind, name: &str) -> bool {
        lock(&self.controllers).contains_key(&controller_key(namespace, kind, name))
    }

    fn remove_controller(&self, namespace: &str, kind: WorkloadKind, name: &str) -> bool {
        let removed = lock(&self.controllers)
            .remove(&controller_key(namespace, kind, name))
            .is_some();
        if removed {
            // owned pods are garbage collected with their controller
            let selector = labels::pod_selector(kind, name);
            lock(&self.pods).retain(|(ns, pod)| {
                let pod_labels = pod.metadata.labels.clone().unwrap_or_default();
                ns != namespace || !labels::matches_selector(&pod_labels, &selector)
            });
        }
        removed
    }

    async fn pause(&self) {
        let interleave = lock(&self.faults).interleave;
        if interleave {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Create-if-absent under the records lock.
    fn insert_new(&self, record: &BackingRecord) -> Result<BackingRecord, Report<StoreError>> {
        let deny = lock(&self.faults).deny_creates.clone();
        if let Some(reason) = deny {
            return Err(Report::new(StoreError::Forbidden { reason }));
        }
        // round-trip through the encoding the real store uses
        let mut stored = backing_record::from_config_map(backing_record::to_config_map(record)?)?;
        stored.created = Some(Utc::now());
        stored.resource_version = Some(self.next_version());

        let mut records = lock(&self.records);
        let key = (record.namespace.clone(), record.name.clone());
        if records.contains_key(&key) {
            return Err(Report::new(StoreError::AlreadyExists {
                kind: "ConfigMap".to_string(),
                name: record.name.clone(),
            }));
        }
        records.insert(key, stored.clone());
        Ok(stored)
    }

    fn next_version(&self) -> String {
        (self.versions.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

fn not_found(kind: &str, namespace: &str, name: &str) -> Report<StoreError> {
    Report::new(StoreError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.to_string(),
    })
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn create_record(
        &self,
        record: &BackingRecord,
    ) -> Result<BackingRecord, Report<StoreError>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let created = self.insert_new(record);
        self.pause().await;
        created
    }

    async fn get_record(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BackingRecord>, Report<StoreError>> {
        Ok(self.record(namespace, name))
    }

    async fn list_records(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<BackingRecord>, Report<StoreError>> {
        self.pause().await;
        let hidden = lock(&self.faults).hide_from_lists;
        if hidden {
            return Ok(Vec::new());
        }
        let candidates: Vec<BackingRecord> = lock(&self.records)
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, record)| record.clone())
            .collect();
        self.pause().await;

        let mut matching = Vec::new();
        for record in candidates {
            let config_map = backing_record::to_config_map(&record)?;
            let record_labels = config_map.metadata.labels.unwrap_or_default();
            if labels::matches_selector(&record_labels, label_selector) {
                matching.push(record);
            }
        }
        Ok(matching)
    }

    async fn replace_record(
        &self,
        record: &BackingRecord,
    ) -> Result<BackingRecord, Report<StoreError>> {
        if lock(&self.faults).fail_replace {
            return Err(Report::new(StoreError::Api {
                message: "injected replace failure".to_string(),
            }));
        }
        let mut records = lock(&self.records);
        let key = (record.namespace.clone(), record.name.clone());
        let Some(current) = records.get(&key) else {
            return Err(not_found("ConfigMap", &record.namespace, &record.name));
        };
        if record.resource_version.is_some()
            && record.resource_version != current.resource_version
        {
            return Err(Report::new(StoreError::Api {
                message: format!("conflict replacing {}: stale resource version", record.name),
            }));
        }
        let mut stored = record.clone();
        stored.created = current.created;
        stored.resource_version = Some(self.next_version());
        records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_record(&self, namespace: &str, name: &str) -> Result<(), Report<StoreError>> {
        self.remove_record(namespace, name)
            .map(|_| ())
            .ok_or_else(|| not_found("ConfigMap", namespace, name))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, Report<StoreError>> {
        Ok(lock(&self.pods)
            .iter()
            .filter(|(ns, pod)| {
                ns == namespace
                    && labels::matches_selector(
                        &pod.metadata.labels.clone().unwrap_or_default(),
                        label_selector,
                    )
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_controller(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<Option<ControllerObject>, Report<StoreError>> {
        Ok(lock(&self.controllers)
            .get(&controller_key(namespace, kind, name))
            .cloned())
    }

    async fn delete_controller(
        &self,
        namespace: &str,
        kind: WorkloadKind,
        name: &str,
    ) -> Result<(), Report<StoreError>> {
        if self.remove_controller(namespace, kind, name) {
            Ok(())
        } else {
            Err(not_found(&kind.to_string(), namespace, name))
        }
    }
}

/// Templater that renders a fixed manifest per workload chart.
///
/// The chart reference's last path segment picks the controller kind
/// (`workergroupjob`, `interactivejob`, anything else a batch Job).
#[derive(Default)]
pub struct FakeTemplater {
    fail_render: Mutex<bool>,
    fail_projection: Mutex<bool>,
    renders: Mutex<Vec<String>>,
}

impl FakeTemplater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_render(&self, fail: bool) {
        *lock(&self.fail_render) = fail;
    }

    pub fn fail_projection(&self, fail: bool) {
        *lock(&self.fail_projection) = fail;
    }

    /// Release names rendered so far.
    pub fn renders(&self) -> Vec<String> {
        lock(&self.renders).clone()
    }
}

fn controller_document(kind: WorkloadKind, release: &str, namespace: &str) -> String {
    let (api_version, object_kind) = match kind {
        WorkloadKind::PlainJob => ("batch/v1", "Job"),
        WorkloadKind::WorkerGroupJob => ("trainctl.io/v1alpha1", "WorkerGroupJob"),
        WorkloadKind::InteractiveJob => ("apps/v1", "StatefulSet"),
    };
    format!(
        "apiVersion: {api_version}\nkind: {object_kind}\n\
         metadata:\n  name: {release}\n  namespace: {namespace}\n"
    )
}

#[async_trait]
impl ManifestTemplater for FakeTemplater {
    async fn render(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartSource,
        values: &serde_yaml::Mapping,
    ) -> Result<RenderedManifest, Report<ToolError>> {
        if *lock(&self.fail_render) {
            return Err(Report::new(ToolError::Failed {
                program: "helm".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "template: parse error".to_string(),
            }));
        }
        lock(&self.renders).push(release.to_string());

        let chart_name = chart.chart.rsplit('/').next().unwrap_or_default();
        let kind = WorkloadKind::from_label(chart_name).unwrap_or(WorkloadKind::PlainJob);
        let text = format!(
            "---\n{}---\napiVersion: v1\nkind: ConfigMap\n\
             metadata:\n  name: {release}-values\ndata:\n  entries: \"{}\"\n",
            controller_document(kind, release, namespace),
            values.len(),
        );
        Ok(RenderedManifest {
            text,
            chart: ChartIdentity {
                name: chart_name.to_string(),
                version: chart.version.clone().unwrap_or_else(|| "0.1.0".to_string()),
            },
        })
    }

    async fn project_resources(
        &self,
        manifest: &str,
        namespace: &str,
    ) -> Result<Vec<ResourceRef>, Report<ToolError>> {
        if *lock(&self.fail_projection) {
            return Err(Report::new(ToolError::InvalidOutput {
                program: "helm".to_string(),
                message: "injected projection failure".to_string(),
            }));
        }
        project_manifest(manifest, namespace)
    }
}

/// Apply tool that turns applied controller objects into entries of a
/// [`MemoryStore`].
pub struct FakeApplyTool {
    store: Arc<MemoryStore>,
    fail_apply: Mutex<bool>,
    applied: Mutex<Vec<String>>,
    deleted: Mutex<Vec<ResourceRef>>,
}

impl FakeApplyTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            fail_apply: Mutex::new(false),
            applied: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_apply(&self, fail: bool) {
        *lock(&self.fail_apply) = fail;
    }

    pub fn applied(&self) -> Vec<String> {
        lock(&self.applied).clone()
    }

    pub fn deleted(&self) -> Vec<ResourceRef> {
        lock(&self.deleted).clone()
    }
}

fn controller_kind(resource: &ResourceRef) -> Option<WorkloadKind> {
    match resource.kind.as_str() {
        "Job" => Some(WorkloadKind::PlainJob),
        "WorkerGroupJob" => Some(WorkloadKind::WorkerGroupJob),
        "StatefulSet" => Some(WorkloadKind::InteractiveJob),
        _ => None,
    }
}

#[async_trait]
impl ApplyTool for FakeApplyTool {
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<(), Report<ToolError>> {
        if *lock(&self.fail_apply) {
            return Err(Report::new(ToolError::Failed {
                program: "kubectl".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "admission webhook denied the request".to_string(),
            }));
        }
        for resource in project_manifest(manifest, namespace)? {
            if let Some(kind) = controller_kind(&resource) {
                let owner_namespace = resource.namespace.as_deref().unwrap_or(namespace);
                self.store.add_controller(
                    kind,
                    ControllerObject {
                        name: resource.name.clone(),
                        namespace: owner_namespace.to_string(),
                        creation_time: Some(Utc::now()),
                        ..ControllerObject::default()
                    },
                );
            }
        }
        lock(&self.applied).push(manifest.to_string());
        Ok(())
    }

    async fn delete(
        &self,
        namespace: &str,
        resources: &[ResourceRef],
    ) -> Result<(), Report<ToolError>> {
        for resource in resources {
            if let Some(kind) = controller_kind(resource) {
                let target = resource.namespace.as_deref().unwrap_or(namespace);
                self.store.remove_controller(target, kind, &resource.name);
            }
        }
        lock(&self.deleted).extend(resources.iter().cloned());
        Ok(())
    }
}

/// A [`Context`] in [`TEST_NAMESPACE`] over `store`, with a fresh
/// [`FakeTemplater`] and a [`FakeApplyTool`] writing into the same store.
pub fn test_context(store: Arc<MemoryStore>) -> Context {
    let apply_tool = Arc::new(FakeApplyTool::new(store.clone()));
    Context::new(
        TEST_NAMESPACE,
        store,
        Arc::new(FakeTemplater::new()),
        apply_tool,
    )
}
