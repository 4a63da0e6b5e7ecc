//! Helm as the manifest templating engine.

use std::io::Write;
use std::path::PathBuf;

use api_types::ChartIdentity;
use api_types::ResourceRef;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use tracing::info;

use crate::infrastructure::tools::run_tool;
use crate::infrastructure::tools::ChartSource;
use crate::infrastructure::tools::ManifestTemplater;
use crate::infrastructure::tools::RenderedManifest;
use crate::infrastructure::tools::ToolError;

const PROGRAM: &str = "helm";

/// Drives the `helm` binary.
#[derive(Debug, Clone)]
pub struct Helm {
    binary: PathBuf,
}

impl Helm {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn chart_identity(
        &self,
        chart: &ChartSource,
    ) -> Result<ChartIdentity, Report<ToolError>> {
        #[derive(Deserialize)]
        struct ChartMetadata {
            name: String,
            version: String,
        }

        let mut args = vec!["show".to_string(), "chart".to_string(), chart.chart.clone()];
        if let Some(version) = &chart.version {
            args.extend(["--version".to_string(), version.clone()]);
        }
        let stdout = run_tool(&self.binary, &args, None).await?;
        let metadata: ChartMetadata =
            serde_yaml::from_str(&stdout).change_context(ToolError::InvalidOutput {
                program: PROGRAM.to_string(),
                message: "chart metadata is not valid YAML".to_string(),
            })?;
        Ok(ChartIdentity {
            name: metadata.name,
            version: metadata.version,
        })
    }
}

#[async_trait]
impl ManifestTemplater for Helm {
    #[tracing::instrument(skip(self, values), fields(chart = %chart.chart))]
    async fn render(
        &self,
        release: &str,
        namespace: &str,
        chart: &ChartSource,
        values: &serde_yaml::Mapping,
    ) -> Result<RenderedManifest, Report<ToolError>> {
        let unserializable = ToolError::InvalidOutput {
            program: PROGRAM.to_string(),
            message: "values are not serializable".to_string(),
        };
        let values_yaml = serde_yaml::to_string(values).change_context(unserializable)?;
        let io_error = || ToolError::Spawn {
            program: PROGRAM.to_string(),
            message: "failed to write values file".to_string(),
        };
        let mut values_file = tempfile::Builder::new()
            .prefix("trainctl-values-")
            .suffix(".yaml")
            .tempfile()
            .change_context_lazy(io_error)?;
        values_file
            .write_all(values_yaml.as_bytes())
            .change_context_lazy(io_error)?;

        let mut args = vec![
            "template".to_string(),
            release.to_string(),
            chart.chart.clone(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--values".to_string(),
            values_file.path().display().to_string(),
        ];
        if let Some(version) = &chart.version {
            args.extend(["--version".to_string(), version.clone()]);
        }

        let text = run_tool(&self.binary, &args, None).await?;
        let chart = self.chart_identity(chart).await?;
        info!(release = %release, chart = %chart, "Rendered manifest");
        Ok(RenderedManifest { text, chart })
    }

    async fn project_resources(
        &self,
        manifest: &str,
        namespace: &str,
    ) -> Result<Vec<ResourceRef>, Report<ToolError>> {
        project_manifest(manifest, namespace)
    }
}

/// Enumerate the objects of a multi-document manifest.
///
/// `List` documents are flattened. Objects without a namespace are placed in
/// `default_namespace`, except for kinds that are cluster scoped.
pub fn project_manifest(
    manifest: &str,
    default_namespace: &str,
) -> Result<Vec<ResourceRef>, Report<ToolError>> {
    let invalid = |message: String| ToolError::InvalidOutput {
        program: PROGRAM.to_string(),
        message,
    };

    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document)
            .change_context_lazy(|| invalid("manifest is not valid YAML".to_string()))?;
        if value.is_null() {
            continue;
        }
        collect_resources(value, default_namespace, &mut resources)
            .map_err(|message| Report::new(invalid(message)))?;
    }
    Ok(resources)
}

fn collect_resources(
    value: serde_yaml::Value,
    default_namespace: &str,
    out: &mut Vec<ResourceRef>,
) -> Result<(), String> {
    let field = |v: &serde_yaml::Value, key: &str| {
        v.get(key)
            .and_then(|f| f.as_str())
            .map(str::to_string)
    };

    let kind = field(&value, "kind").ok_or("document has no kind")?;
    if kind == "List" || (kind.ends_with("List") && value.get("items").is_some()) {
        if let Some(items) = value.get("items").and_then(|items| items.as_sequence()) {
            for item in items {
                collect_resources(item.clone(), default_namespace, out)?;
            }
        }
        return Ok(());
    }

    let api_version =
        field(&value, "apiVersion").ok_or_else(|| format!("{kind} has no apiVersion"))?;
    let metadata = value
        .get("metadata")
        .ok_or_else(|| format!("{kind} has no metadata"))?;
    let name = field(metadata, "name").ok_or_else(|| format!("{kind} has no metadata.name"))?;
    let namespace = if is_cluster_scoped(&kind) {
        None
    } else {
        let namespace = field(metadata, "namespace");
        Some(namespace.unwrap_or_else(|| default_namespace.to_string()))
    };

    out.push(ResourceRef {
        api_version,
        kind,
        name,
        namespace,
    });
    Ok(())
}

fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "CustomResourceDefinition"
            | "PersistentVolume"
            | "PriorityClass"
            | "StorageClass"
    )
}
