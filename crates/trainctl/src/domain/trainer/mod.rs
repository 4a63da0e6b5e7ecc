//! Workload trainers.
//!
//! A [`Trainer`] knows how one workload kind lays out its pods and
//! controller: which pods belong to a job, which one is the chief, and how
//! GPUs are accounted. Dispatch is a plain `match` on the kind.

pub mod gpu;
mod interactive;
mod plain_job;
mod worker_group;

use api_types::WorkloadKind;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::context::Context;
use crate::domain::view::pod_creation_time;
use crate::domain::view::WorkloadView;
use crate::infrastructure::k8s::labels;
use crate::infrastructure::k8s::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trainer {
    PlainJob,
    WorkerGroup,
    Interactive,
}

impl Trainer {
    pub const fn for_kind(kind: WorkloadKind) -> Self {
        match kind {
            WorkloadKind::PlainJob => Trainer::PlainJob,
            WorkloadKind::WorkerGroupJob => Trainer::WorkerGroup,
            WorkloadKind::InteractiveJob => Trainer::Interactive,
        }
    }

    pub const fn kind(self) -> WorkloadKind {
        match self {
            Trainer::PlainJob => WorkloadKind::PlainJob,
            Trainer::WorkerGroup => WorkloadKind::WorkerGroupJob,
            Trainer::Interactive => WorkloadKind::InteractiveJob,
        }
    }

    /// Label selector for the pods of job `name`.
    pub fn pod_selector(self, name: &str) -> String {
        labels::pod_selector(self.kind(), name)
    }

    /// Index of the chief in `pods`, which must be ordered oldest first.
    pub fn chief_index(self, name: &str, pods: &[Pod]) -> Option<usize> {
        match self {
            Trainer::PlainJob => plain_job::chief_index(pods),
            Trainer::WorkerGroup => worker_group::chief_index(pods),
            Trainer::Interactive => interactive::chief_index(name, pods),
        }
    }

    pub fn chief_pod<'a>(self, view: &'a WorkloadView) -> Option<&'a Pod> {
        view.chief_pod()
    }

    pub fn requested_gpu(self, view: &WorkloadView) -> f64 {
        gpu::requested_gpu(view.all_pods(), view.chief_pod())
    }

    pub fn allocated_gpu(self, view: &WorkloadView) -> f64 {
        gpu::allocated_gpu(self.requested_gpu(view), view.chief_pod())
    }

    /// Build the current view of job `name` from its pods and controller.
    #[tracing::instrument(
        skip(self, ctx),
        fields(kind = %self.kind(), namespace = %ctx.namespace())
    )]
    pub async fn discover(
        self,
        ctx: &Context,
        name: &str,
    ) -> Result<WorkloadView, Report<StoreError>> {
        let pods = ctx.pods(&self.pod_selector(name)).await?;
        let controller = ctx
            .store()
            .get_controller(ctx.namespace(), self.kind(), name)
            .await?;

        let chief = self.chief_index(name, &pods);
        let mut view = WorkloadView::empty(name, ctx.namespace(), self.kind())
            .with_pods(pods.as_ref().clone(), chief);

        if let Some(annotations) = view.chief_pod().and_then(|p| p.metadata.annotations.clone()) {
            view.scheduler_annotations.extend(annotations);
        }
        view.creation_time = view.all_pods().first().and_then(pod_creation_time);
        if let Some(controller) = controller {
            view.scheduler_annotations.extend(controller.annotations);
            view.creation_time = controller.creation_time.or(view.creation_time);
        }

        view.requested_gpu = self.requested_gpu(&view);
        view.allocated_gpu = self.allocated_gpu(&view);
        debug!(
            job = %name,
            pods = view.all_pods().len(),
            chief = view.chief_pod_name().unwrap_or_default(),
            "Discovered workload"
        );
        Ok(view)
    }

    /// Whether a controller for job `name` exists.
    pub async fn recognizes(self, ctx: &Context, name: &str) -> Result<bool, Report<StoreError>> {
        Ok(ctx
            .store()
            .get_controller(ctx.namespace(), self.kind(), name)
            .await?
            .is_some())
    }

    /// Delete the controller of job `name`; its pods go with it.
    pub async fn delete(self, ctx: &Context, name: &str) -> Result<(), Report<StoreError>> {
        ctx.store()
            .delete_controller(ctx.namespace(), self.kind(), name)
            .await?;
        ctx.forget_pods(&self.pod_selector(name));
        Ok(())
    }
}
