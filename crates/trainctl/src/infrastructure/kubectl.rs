//! kubectl as the cluster apply tool.

use std::path::PathBuf;

use api_types::ResourceRef;
use async_trait::async_trait;
use error_stack::Report;
use tracing::info;

use crate::infrastructure::tools::run_tool;
use crate::infrastructure::tools::ApplyTool;
use crate::infrastructure::tools::ToolError;

/// Drives the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new(binary: impl Into<PathBuf>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            kubeconfig,
        }
    }

    fn base_args(&self, namespace: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.extend([
                "--kubeconfig".to_string(),
                kubeconfig.display().to_string(),
            ]);
        }
        args.extend(["--namespace".to_string(), namespace.to_string()]);
        args
    }
}

/// `kind.group/name`, the fully qualified form kubectl accepts for any kind.
fn qualified_name(resource: &ResourceRef) -> String {
    let kind = resource.kind.to_lowercase();
    match resource.api_version.split_once('/') {
        Some((group, _version)) => format!("{kind}.{group}/{}", resource.name),
        None => format!("{kind}/{}", resource.name),
    }
}

#[async_trait]
impl ApplyTool for Kubectl {
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<(), Report<ToolError>> {
        let mut args = self.base_args(namespace);
        args.extend(["apply".to_string(), "-f".to_string(), "-".to_string()]);
        let stdout = run_tool(&self.binary, &args, Some(manifest)).await?;
        for line in stdout.lines() {
            info!(namespace = %namespace, "{line}");
        }
        Ok(())
    }

    async fn delete(
        &self,
        namespace: &str,
        resources: &[ResourceRef],
    ) -> Result<(), Report<ToolError>> {
        if resources.is_empty() {
            return Ok(());
        }

        // cluster-scoped and foreign-namespace objects need their own invocation
        let mut by_namespace: Vec<(String, Vec<String>)> = Vec::new();
        for resource in resources {
            let target = resource.namespace.as_deref().unwrap_or(namespace);
            let name = qualified_name(resource);
            match by_namespace.iter_mut().find(|(ns, _)| ns == target) {
                Some((_, names)) => names.push(name),
                None => by_namespace.push((target.to_string(), vec![name])),
            }
        }

        for (target, names) in by_namespace {
            let mut args = self.base_args(&target);
            args.extend(["delete".to_string(), "--ignore-not-found".to_string()]);
            args.extend(names);
            let stdout = run_tool(&self.binary, &args, None).await?;
            for line in stdout.lines() {
                info!(namespace = %target, "{line}");
            }
        }
        Ok(())
    }
}
