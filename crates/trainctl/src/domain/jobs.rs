//! Job queries and teardown: listing, status, deletion and readiness waits.

use api_types::CanonicalStatus;
use api_types::JobSummary;
use api_types::WorkloadKind;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use error_stack::ResultExt;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::context::Context;
use crate::domain::error::JobError;
use crate::domain::poll::poll_until;
use crate::domain::poll::PollConfig;
use crate::domain::poll::PollError;
use crate::domain::status::pod_status;
use crate::domain::status::resolve;
use crate::domain::trainer::Trainer;
use crate::domain::view::pod_phase;
use crate::domain::view::WorkloadView;
use crate::infrastructure::k8s::labels;
use crate::infrastructure::k8s::StoreError;

/// Summaries of every complete job in the context namespace, oldest first.
///
/// Discovery is best effort: a job whose pods or controller cannot be read
/// is still listed, with status `Unknown`.
#[tracing::instrument(skip(ctx), fields(namespace = %ctx.namespace()))]
pub async fn list_jobs(ctx: &Context) -> Result<Vec<JobSummary>, Report<JobError>> {
    let records = ctx
        .store()
        .list_records(ctx.namespace(), &labels::managed_records_selector())
        .await
        .change_context(JobError::Store)?;

    let summaries = records
        .into_iter()
        .filter(|record| record.is_complete())
        .map(|record| async move {
            summarize(ctx, &record.name, record.kind, record.created).await
        });
    let mut jobs = join_all(summaries).await;
    jobs.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
    Ok(jobs)
}

/// Summary of one job, found through its backing record or, for jobs
/// created outside trainctl, through the trainer that recognises it.
#[tracing::instrument(skip(ctx), fields(namespace = %ctx.namespace()))]
pub async fn job_status(ctx: &Context, name: &str) -> Result<JobSummary, Report<JobError>> {
    let record = ctx
        .store()
        .get_record(ctx.namespace(), name)
        .await
        .change_context(JobError::Store)?;
    if let Some(record) = record {
        return Ok(summarize(ctx, name, record.kind, record.created).await);
    }

    match find_trainer(ctx, name).await? {
        Some(trainer) => Ok(summarize(ctx, name, trainer.kind(), None).await),
        None => Err(not_found(ctx, name)),
    }
}

/// Current view of one job, for callers that need more than the summary.
pub async fn discover_job(ctx: &Context, name: &str) -> Result<WorkloadView, Report<JobError>> {
    let kind = job_kind(ctx, name).await?;
    Trainer::for_kind(kind)
        .discover(ctx, name)
        .await
        .change_context(JobError::Store)
}

/// Delete job `name`.
///
/// With a backing record, every object it lists is deleted through the
/// apply tool and then the record itself. Without one, the first trainer
/// that recognises the job deletes its controller.
#[tracing::instrument(skip(ctx), fields(namespace = %ctx.namespace()))]
pub async fn delete_job(ctx: &Context, name: &str) -> Result<(), Report<JobError>> {
    let namespace = ctx.namespace();
    let delete_failed = || JobError::Delete {
        name: name.to_string(),
    };

    let record = ctx
        .store()
        .get_record(namespace, name)
        .await
        .change_context(JobError::Store)?;

    let Some(record) = record else {
        let Some(trainer) = find_trainer(ctx, name).await? else {
            return Err(not_found(ctx, name));
        };
        trainer
            .delete(ctx, name)
            .await
            .change_context_lazy(delete_failed)?;
        info!(job = %name, kind = %trainer.kind(), "Deleted job without backing record");
        return Ok(());
    };

    // Incomplete records were never applied, so there is nothing to replay.
    if let Some(resources) = &record.applied_resources {
        ctx.apply_tool()
            .delete(namespace, resources)
            .await
            .change_context_lazy(delete_failed)?;
    }

    match ctx.store().delete_record(namespace, name).await {
        Ok(()) => {}
        Err(report) if matches!(report.current_context(), StoreError::NotFound { .. }) => {
            warn!(job = %name, "Backing record vanished during deletion");
        }
        Err(report) => return Err(report.change_context(delete_failed())),
    }
    ctx.forget_pods(&Trainer::for_kind(record.kind).pod_selector(name));
    info!(job = %name, "Deleted job");
    Ok(())
}

/// Delete each of `names`, continuing past failures.
pub async fn delete_jobs(
    ctx: &Context,
    names: &[String],
) -> Vec<(String, Result<(), Report<JobError>>)> {
    let mut results = Vec::with_capacity(names.len());
    for name in names {
        results.push((name.clone(), delete_job(ctx, name).await));
    }
    results
}

/// Wait until job `name` has at least one pod. Returns the pod count.
pub async fn wait_for_pods_created(
    ctx: &Context,
    kind: WorkloadKind,
    name: &str,
    config: PollConfig,
) -> Result<usize, Report<JobError>> {
    let what = format!("pods of {name}");
    let selector = &Trainer::for_kind(kind).pod_selector(name);
    let created = move || async move {
        let pods = ctx.refresh_pods(selector).await?;
        Ok::<_, Report<StoreError>>((!pods.is_empty()).then_some(pods.len()))
    };
    poll_until(&what, config, ctx.cancellation_token(), created)
        .await
        .map_err(|report| poll_failure(report, &what))
}

/// Wait until the chief pod of job `name` runs (or already finished).
/// Returns the chief's name.
pub async fn wait_for_chief_running(
    ctx: &Context,
    kind: WorkloadKind,
    name: &str,
    config: PollConfig,
) -> Result<String, Report<JobError>> {
    let what = format!("chief pod of {name} to run");
    let trainer = Trainer::for_kind(kind);
    let selector = &trainer.pod_selector(name);
    let running = move || async move {
        let pods = ctx.refresh_pods(selector).await?;
        let chief = trainer
            .chief_index(name, &pods)
            .map(|i| &pods[i])
            .filter(|chief| matches!(pod_phase(chief), Some("Running" | "Succeeded")))
            .and_then(|chief| chief.metadata.name.clone());
        Ok::<_, Report<StoreError>>(chief)
    };
    poll_until(&what, config, ctx.cancellation_token(), running)
        .await
        .map_err(|report| poll_failure(report, &what))
}

/// Wait until the stateful set behind interactive job `name` reports all
/// replicas ready.
pub async fn wait_for_stateful_set_ready(
    ctx: &Context,
    name: &str,
    config: PollConfig,
) -> Result<(), Report<JobError>> {
    let what = format!("stateful set {name} to become ready");
    let ready = move || async move {
        let controller = ctx
            .store()
            .get_controller(ctx.namespace(), WorkloadKind::InteractiveJob, name)
            .await?;
        let ready = controller.is_some_and(|c| {
            let desired = c.replicas.unwrap_or(1);
            c.ready_replicas.unwrap_or(0) >= desired && desired > 0
        });
        Ok::<_, Report<StoreError>>(ready.then_some(()))
    };
    poll_until(&what, config, ctx.cancellation_token(), ready)
        .await
        .map_err(|report| poll_failure(report, &what))
}

/// Wait until job `name` is up: its pods exist, an interactive job's
/// stateful set is ready, and the chief pod runs. `config.timeout` bounds
/// the whole sequence. Returns the chief's name.
#[tracing::instrument(skip(ctx, config), fields(namespace = %ctx.namespace()))]
pub async fn wait_for_job_ready(
    ctx: &Context,
    kind: WorkloadKind,
    name: &str,
    config: PollConfig,
) -> Result<String, Report<JobError>> {
    let deadline = Instant::now() + config.timeout;
    let remaining = || {
        PollConfig::new(
            config.interval,
            deadline.saturating_duration_since(Instant::now()),
        )
    };

    let pods = wait_for_pods_created(ctx, kind, name, remaining()).await?;
    debug!(pods, "Pods created");
    if kind == WorkloadKind::InteractiveJob {
        wait_for_stateful_set_ready(ctx, name, remaining()).await?;
        debug!("Stateful set ready");
    }
    wait_for_chief_running(ctx, kind, name, remaining()).await
}

async fn summarize(
    ctx: &Context,
    name: &str,
    kind: WorkloadKind,
    recorded: Option<DateTime<Utc>>,
) -> JobSummary {
    let created = |time: Option<DateTime<Utc>>| time.map(|t| t.to_rfc3339());
    match Trainer::for_kind(kind).discover(ctx, name).await {
        Ok(view) => {
            let resolved = resolve(&view);
            JobSummary {
                name: name.to_string(),
                namespace: ctx.namespace().to_string(),
                kind,
                status: resolved.status,
                reason: resolved.reason,
                chief_pod: view.chief_pod_name().map(str::to_string),
                pods: view.all_pods().len(),
                restarts: view.chief_pod().map_or(0, |pod| pod_status(pod).restarts),
                requested_gpu: view.requested_gpu,
                allocated_gpu: view.allocated_gpu,
                created: created(recorded.or(view.creation_time)),
            }
        }
        Err(report) => {
            warn!(job = %name, "Discovery failed, reporting Unknown: {report:?}");
            JobSummary {
                name: name.to_string(),
                namespace: ctx.namespace().to_string(),
                kind,
                status: CanonicalStatus::Unknown,
                reason: "DiscoveryFailed".to_string(),
                chief_pod: None,
                pods: 0,
                restarts: 0,
                requested_gpu: 0.0,
                allocated_gpu: 0.0,
                created: created(recorded),
            }
        }
    }
}

async fn job_kind(ctx: &Context, name: &str) -> Result<WorkloadKind, Report<JobError>> {
    let record = ctx
        .store()
        .get_record(ctx.namespace(), name)
        .await
        .change_context(JobError::Store)?;
    if let Some(record) = record {
        return Ok(record.kind);
    }
    match find_trainer(ctx, name).await? {
        Some(trainer) => Ok(trainer.kind()),
        None => Err(not_found(ctx, name)),
    }
}

async fn find_trainer(ctx: &Context, name: &str) -> Result<Option<Trainer>, Report<JobError>> {
    for kind in WorkloadKind::ALL {
        let trainer = Trainer::for_kind(kind);
        if trainer
            .recognizes(ctx, name)
            .await
            .change_context(JobError::Store)?
        {
            return Ok(Some(trainer));
        }
    }
    Ok(None)
}

fn not_found(ctx: &Context, name: &str) -> Report<JobError> {
    Report::new(JobError::NotFound {
        name: name.to_string(),
        namespace: ctx.namespace().to_string(),
    })
}

fn poll_failure(report: Report<PollError>, what: &str) -> Report<JobError> {
    let context = match report.current_context() {
        PollError::Timeout { .. } => JobError::Timeout {
            what: what.to_string(),
        },
        PollError::Cancelled => JobError::Cancelled {
            what: what.to_string(),
        },
        PollError::Aborted => JobError::Store,
    };
    report.change_context(context)
}
