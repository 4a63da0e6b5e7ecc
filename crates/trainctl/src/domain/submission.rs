//! The submission pipeline: render, allocate, record, apply.
//!
//! Nothing touches the cluster before the allocator has handed out the
//! final name, so two concurrent submissions can never end up applying to
//! the same live job.

use std::io::Write;
use std::path::PathBuf;

use api_types::WorkloadKind;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;

use crate::context::Context;
use crate::domain::allocator::NameAllocator;
use crate::domain::error::SubmitError;
use crate::infrastructure::tools::ChartSource;

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub base_name: String,
    pub allow_suffix: bool,
    pub kind: WorkloadKind,
    pub chart: ChartSource,
    pub values: serde_yaml::Mapping,
    /// Render only and write the manifest to a file
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { name: String },
    DryRun { manifest_path: PathBuf },
}

#[tracing::instrument(
    skip(ctx, request),
    fields(base_name = %request.base_name, kind = %request.kind, namespace = %ctx.namespace())
)]
pub async fn submit(
    ctx: &Context,
    request: &SubmitRequest,
) -> Result<SubmitOutcome, Report<SubmitError>> {
    let namespace = ctx.namespace();

    let rendered = ctx
        .templater()
        .render(
            &request.base_name,
            namespace,
            &request.chart,
            &request.values,
        )
        .await
        .change_context(SubmitError::Render)?;

    if request.dry_run {
        let manifest_path = write_manifest(&request.base_name, &rendered.text)?;
        info!(path = %manifest_path.display(), "Dry run, manifest written");
        return Ok(SubmitOutcome::DryRun { manifest_path });
    }

    let mut record = NameAllocator::new(ctx.store().clone(), namespace)
        .allocate(&request.base_name, request.allow_suffix, request.kind)
        .await
        .change_context(SubmitError::Allocate)?;
    let name = record.name.clone();
    let record_failed = || SubmitError::Record { name: name.clone() };

    // From here on the name is ours; failures leave the record behind.
    let rendered = if name == request.base_name {
        rendered
    } else {
        ctx.templater()
            .render(&name, namespace, &request.chart, &request.values)
            .await
            .change_context_lazy(record_failed)?
    };

    let recorded = async {
        let resources = ctx
            .templater()
            .project_resources(&rendered.text, namespace)
            .await
            .change_context_lazy(record_failed)?;
        let values = serde_yaml::to_string(&request.values).change_context_lazy(record_failed)?;

        record.rendered_manifest = Some(rendered.text.clone());
        record.applied_resources = Some(resources);
        record.chart = Some(rendered.chart.clone());
        record.values = Some(values);
        ctx.store()
            .replace_record(&record)
            .await
            .change_context_lazy(record_failed)
    }
    .await;
    if let Err(report) = recorded {
        warn!(name = %name, "Backing record left incomplete; delete the job to release the name");
        return Err(report);
    }

    ctx.apply_tool()
        .apply(namespace, &rendered.text)
        .await
        .change_context_lazy(|| SubmitError::PartialSubmission { name: name.clone() })?;

    info!(name = %name, chart = %rendered.chart, "Job submitted");
    Ok(SubmitOutcome::Submitted { name })
}

/// Write `manifest` to a file that outlives the process.
fn write_manifest(base_name: &str, manifest: &str) -> Result<PathBuf, Report<SubmitError>> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("{base_name}-"))
        .suffix(".yaml")
        .tempfile()
        .change_context(SubmitError::DryRunOutput)?;
    file.write_all(manifest.as_bytes())
        .change_context(SubmitError::DryRunOutput)?;
    let (_, path) = file.keep().change_context(SubmitError::DryRunOutput)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::mock::FakeApplyTool;
    use crate::mock::FakeTemplater;
    use crate::mock::MemoryStore;
    use crate::mock::TEST_NAMESPACE;

    struct Harness {
        store: Arc<MemoryStore>,
        templater: Arc<FakeTemplater>,
        apply_tool: Arc<FakeApplyTool>,
        ctx: Context,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let templater = Arc::new(FakeTemplater::new());
        let apply_tool = Arc::new(FakeApplyTool::new(store.clone()));
        let ctx = Context::new(
            TEST_NAMESPACE,
            store.clone(),
            templater.clone(),
            apply_tool.clone(),
        );
        Harness {
            store,
            templater,
            apply_tool,
            ctx,
        }
    }

    fn request(base_name: &str) -> SubmitRequest {
        let mut values = serde_yaml::Mapping::new();
        values.insert("image".into(), "trainer:1.0".into());
        SubmitRequest {
            base_name: base_name.to_string(),
            allow_suffix: true,
            kind: WorkloadKind::PlainJob,
            chart: ChartSource {
                chart: "charts/plainjob".to_string(),
                version: Some("1.2.0".to_string()),
            },
            values,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn submission_records_then_applies() {
        let h = harness();
        let outcome = submit(&h.ctx, &request("train")).await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted {
                name: "train".to_string()
            }
        );

        let record = h.store.record(TEST_NAMESPACE, "train").unwrap();
        assert!(record.is_complete());
        assert_eq!(record.chart.unwrap().to_string(), "plainjob:1.2.0");
        let kinds: Vec<String> = record
            .applied_resources
            .unwrap()
            .into_iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds, vec!["Job", "ConfigMap"]);
        assert_eq!(h.apply_tool.applied().len(), 1);
        assert!(h
            .store
            .has_controller(TEST_NAMESPACE, WorkloadKind::PlainJob, "train"));
    }

    #[tokio::test]
    async fn suffixed_submission_renders_final_name() {
        let h = harness();
        submit(&h.ctx, &request("train")).await.unwrap();
        let outcome = submit(&h.ctx, &request("train")).await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted {
                name: "train-1".to_string()
            }
        );
        assert_eq!(h.templater.renders(), vec!["train", "train", "train-1"]);
        assert!(h.apply_tool.applied()[1].contains("name: train-1\n"));
    }

    #[tokio::test]
    async fn render_failure_has_no_side_effects() {
        let h = harness();
        h.templater.fail_render(true);
        let err = submit(&h.ctx, &request("train")).await.unwrap_err();
        assert_eq!(err.current_context(), &SubmitError::Render);
        assert_eq!(h.store.create_calls(), 0);
        assert!(h.apply_tool.applied().is_empty());
    }

    #[tokio::test]
    async fn allocation_failure_applies_nothing() {
        let h = harness();
        let mut first = request("train");
        first.allow_suffix = false;
        submit(&h.ctx, &first).await.unwrap();

        let err = submit(&h.ctx, &first).await.unwrap_err();
        assert_eq!(err.current_context(), &SubmitError::Allocate);
        assert_eq!(err.current_context().stage(), "allocate");
        assert_eq!(h.apply_tool.applied().len(), 1);
    }

    #[tokio::test]
    async fn record_failure_leaves_incomplete_record() {
        let h = harness();
        h.templater.fail_projection(true);
        let err = submit(&h.ctx, &request("train")).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &SubmitError::Record {
                name: "train".to_string()
            }
        );
        let record = h.store.record(TEST_NAMESPACE, "train").unwrap();
        assert!(!record.is_complete());
        assert!(h.apply_tool.applied().is_empty());
    }

    #[tokio::test]
    async fn apply_failure_keeps_record() {
        let h = harness();
        h.apply_tool.fail_apply(true);
        let err = submit(&h.ctx, &request("train")).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &SubmitError::PartialSubmission {
                name: "train".to_string()
            }
        );
        assert!(h
            .store
            .record(TEST_NAMESPACE, "train")
            .unwrap()
            .is_complete());
    }

    #[tokio::test]
    async fn dry_run_never_touches_the_cluster() {
        let h = harness();
        let mut dry = request("train");
        dry.dry_run = true;
        let outcome = submit(&h.ctx, &dry).await.unwrap();
        let SubmitOutcome::DryRun { manifest_path } = outcome else {
            panic!("expected a dry run outcome");
        };
        let manifest = std::fs::read_to_string(&manifest_path).unwrap();
        assert!(manifest.contains("kind: Job"));
        std::fs::remove_file(manifest_path).unwrap();
        assert_eq!(h.store.create_calls(), 0);
        assert!(h.store.record_names(TEST_NAMESPACE).is_empty());
    }
}
