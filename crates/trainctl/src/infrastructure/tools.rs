//! Seams to the external collaborators: the manifest templating engine and
//! the cluster apply tool. Both are black boxes driven as child processes.

use core::error::Error;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use api_types::ChartIdentity;
use api_types::ResourceRef;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Errors raised by external tools.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ToolError {
    #[display("Failed to run {program}: {message}")]
    Spawn { program: String, message: String },
    #[display("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[display("Unexpected output from {program}: {message}")]
    InvalidOutput { program: String, message: String },
}

impl Error for ToolError {}

/// Where a workload template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSource {
    /// Chart reference understood by the templating engine (path, repo/name or OCI URL)
    pub chart: String,
    /// Pinned version, if any
    pub version: Option<String>,
}

/// Output of a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedManifest {
    pub text: String,
    pub chart: ChartIdentity,
}

#[async_trait]
pub trait ManifestTemplater: Send + Sync {
    /// Render a concrete manifest for `release` from `chart` and `values`.
    async fn render(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartSource,
        values: &serde_yaml::Mapping,
    ) -> Result<RenderedManifest, Report<ToolError>>;

    /// The objects `manifest` would create, without touching the cluster.
    async fn project_resources(
        &self,
        manifest: &str,
        namespace: &str,
    ) -> Result<Vec<ResourceRef>, Report<ToolError>>;
}

#[async_trait]
pub trait ApplyTool: Send + Sync {
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<(), Report<ToolError>>;

    /// Delete the given objects. Objects that no longer exist are ignored.
    async fn delete(
        &self,
        namespace: &str,
        resources: &[ResourceRef],
    ) -> Result<(), Report<ToolError>>;
}

/// Run `program` to completion, optionally feeding `stdin`, and return stdout.
pub(crate) async fn run_tool<I, S>(
    program: &Path,
    args: I,
    stdin: Option<&str>,
) -> Result<String, Report<ToolError>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program_name = program.display().to_string();
    let spawn_error = || ToolError::Spawn {
        program: program_name.clone(),
        message: "process could not be started".to_string(),
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(command = ?command.as_std(), "Running external tool");

    let mut child = command.spawn().change_context_lazy(spawn_error)?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes())
                .await
                .change_context_lazy(spawn_error)?;
        }
    }

    let output = child
        .wait_with_output()
        .await
        .change_context_lazy(spawn_error)?;

    if !output.status.success() {
        return Err(Report::new(ToolError::Failed {
            program: program_name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }));
    }

    String::from_utf8(output.stdout).change_context(ToolError::InvalidOutput {
        program: program_name,
        message: "stdout is not UTF-8".to_string(),
    })
}
