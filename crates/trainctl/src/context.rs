//! Per-invocation context.
//!
//! Everything a command needs is reachable from one [`Context`] built in
//! `main` and passed down explicitly: the namespace, the cluster store, the
//! external tools, the cancellation token and the read caches. Nothing is
//! kept in process-wide state.

use std::sync::Arc;

use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use utils::single_flight::KeyedResultCache;

use crate::domain::view::pod_creation_time;
use crate::infrastructure::k8s::ClusterStore;
use crate::infrastructure::k8s::StoreError;
use crate::infrastructure::tools::ApplyTool;
use crate::infrastructure::tools::ManifestTemplater;

/// `(namespace, label selector)`
type PodQuery = (String, String);

pub struct Context {
    namespace: String,
    store: Arc<dyn ClusterStore>,
    templater: Arc<dyn ManifestTemplater>,
    apply_tool: Arc<dyn ApplyTool>,
    cancellation_token: CancellationToken,
    pods: KeyedResultCache<PodQuery, Arc<Vec<Pod>>, StoreError>,
}

impl Context {
    pub fn new(
        namespace: impl Into<String>,
        store: Arc<dyn ClusterStore>,
        templater: Arc<dyn ManifestTemplater>,
        apply_tool: Arc<dyn ApplyTool>,
    ) -> Self {
        let fetch_store = store.clone();
        let pods = KeyedResultCache::new(move |(namespace, selector): PodQuery| {
            let store = fetch_store.clone();
            async move {
                let mut pods = store
                    .list_pods(&namespace, &selector)
                    .await
                    .map_err(|report| {
                        debug!(selector = %selector, "Pod listing failed: {report:?}");
                        report.current_context().clone()
                    })?;
                pods.sort_by(|a, b| {
                    pod_creation_time(a)
                        .cmp(&pod_creation_time(b))
                        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
                });
                Ok::<_, StoreError>(Arc::new(pods))
            }
        });

        Self {
            namespace: namespace.into(),
            store,
            templater,
            apply_tool,
            cancellation_token: CancellationToken::new(),
            pods,
        }
    }

    pub fn with_cancellation_token(mut self, cancellation_token: CancellationToken) -> Self {
        self.cancellation_token = cancellation_token;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    pub fn templater(&self) -> &dyn ManifestTemplater {
        self.templater.as_ref()
    }

    pub fn apply_tool(&self) -> &dyn ApplyTool {
        self.apply_tool.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Pods matching `selector`, oldest first. Concurrent lookups of the
    /// same selector share one listing, and the result is kept until
    /// [`Context::refresh_pods`].
    pub async fn pods(&self, selector: &str) -> Result<Arc<Vec<Pod>>, Report<StoreError>> {
        self.pods
            .get(&(self.namespace.clone(), selector.to_string()))
            .await
            .map_err(Report::new)
    }

    /// Like [`Context::pods`] but always lists again.
    pub async fn refresh_pods(&self, selector: &str) -> Result<Arc<Vec<Pod>>, Report<StoreError>> {
        self.pods
            .refresh(&(self.namespace.clone(), selector.to_string()))
            .await
            .map_err(Report::new)
    }

    /// Forget cached pod listings for `selector`, e.g. after deleting a job.
    pub fn forget_pods(&self, selector: &str) {
        self.pods
            .invalidate(&(self.namespace.clone(), selector.to_string()));
    }
}
