//! Shared API type definitions
//!
//! This crate contains the vocabulary shared between the trainctl library and
//! anything that consumes its output: workload kinds, canonical job statuses,
//! references to cluster objects and the job summary rows printed by the CLI.

use std::str::FromStr;

use derive_more::Display;
use serde::Deserialize;
use serde::Serialize;

/// Workload kinds a job can be submitted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// Bare pods owned by a batch Job
    PlainJob,
    /// A head pod plus a fixed-size group of worker pods
    WorkerGroupJob,
    /// A single long-running pod behind a stateful set
    InteractiveJob,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl WorkloadKind {
    /// Every supported kind, in the order deletion fallbacks try them.
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::PlainJob,
        WorkloadKind::WorkerGroupJob,
        WorkloadKind::InteractiveJob,
    ];

    /// Value of the `app` label carried by pods of this kind.
    pub const fn label(&self) -> &'static str {
        match self {
            WorkloadKind::PlainJob => "plainjob",
            WorkloadKind::WorkerGroupJob => "workergroupjob",
            WorkloadKind::InteractiveJob => "interactivejob",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }
}

/// The single reconciled lifecycle state reported for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unschedulable,
    Terminating,
    Unknown,
    Deleted,
    Preempted,
    TimedOut,
}

impl std::fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl CanonicalStatus {
    /// Terminal statuses reported by the scheduler are never overridden by pod state.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalStatus::Succeeded
                | CanonicalStatus::Failed
                | CanonicalStatus::Deleted
                | CanonicalStatus::Preempted
                | CanonicalStatus::TimedOut
        )
    }
}

/// Returned when a string does not name a [`CanonicalStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("unrecognized job status `{_0}`")]
pub struct UnknownStatus(pub String);

impl std::error::Error for UnknownStatus {}

impl FromStr for CanonicalStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim() {
            "Pending" => CanonicalStatus::Pending,
            "Running" => CanonicalStatus::Running,
            "Succeeded" => CanonicalStatus::Succeeded,
            "Failed" => CanonicalStatus::Failed,
            "Unschedulable" => CanonicalStatus::Unschedulable,
            "Terminating" => CanonicalStatus::Terminating,
            "Unknown" => CanonicalStatus::Unknown,
            "Deleted" => CanonicalStatus::Deleted,
            "Preempted" => CanonicalStatus::Preempted,
            "TimedOut" => CanonicalStatus::TimedOut,
            other => return Err(UnknownStatus(other.to_string())),
        };
        Ok(status)
    }
}

/// Reference to one concrete cluster object produced by a rendered manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind.to_lowercase(), self.name)
    }
}

/// Name and version of the template source a job was rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("{name}:{version}")]
pub struct ChartIdentity {
    pub name: String,
    pub version: String,
}

impl FromStr for ChartIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((name, version)) if !name.is_empty() => Ok(Self {
                name: name.to_string(),
                version: version.to_string(),
            }),
            _ => Err(format!(
                "invalid chart identity `{s}`, expected name:version"
            )),
        }
    }
}

/// One row of job listing output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// Job name
    pub name: String,
    /// Job namespace
    pub namespace: String,
    /// Workload kind
    pub kind: WorkloadKind,
    /// Canonical status
    pub status: CanonicalStatus,
    /// Human readable status reason (e.g. `Init:ExitCode:1`)
    pub reason: String,
    /// Name of the chief pod, when one exists
    pub chief_pod: Option<String>,
    /// Number of pods belonging to the job
    pub pods: usize,
    /// Container restarts of the chief pod
    pub restarts: i32,
    /// Requested GPUs, fractional values allowed
    pub requested_gpu: f64,
    /// GPUs currently allocated
    pub allocated_gpu: f64,
    /// Creation time in RFC 3339 format
    pub created: Option<String>,
}
