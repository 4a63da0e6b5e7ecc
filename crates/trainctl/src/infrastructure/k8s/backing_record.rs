//! Encoding of [`BackingRecord`]s as ConfigMaps.
//!
//! Identity lives in labels so records can be listed per base name; the
//! manifest and resource list live in `data` and are opaque to the store.

use std::collections::BTreeMap;

use api_types::ChartIdentity;
use api_types::ResourceRef;
use api_types::WorkloadKind;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::ObjectMeta;

use crate::domain::record::BackingRecord;
use crate::infrastructure::k8s::labels;
use crate::infrastructure::k8s::StoreError;

pub const MANIFEST_KEY: &str = "manifest";
pub const RESOURCES_KEY: &str = "resources";
pub const CHART_KEY: &str = "chart";
pub const VALUES_KEY: &str = "values";

const KIND: &str = "ConfigMap";

pub fn to_config_map(record: &BackingRecord) -> Result<ConfigMap, Report<StoreError>> {
    let record_labels = BTreeMap::from([
        (
            labels::MANAGED_BY.to_string(),
            labels::MANAGED_BY_VALUE.to_string(),
        ),
        (labels::BASE_NAME.to_string(), record.base_name.clone()),
        (labels::INDEX.to_string(), record.index.to_string()),
        (
            labels::WORKLOAD_KIND.to_string(),
            record.kind.label().to_string(),
        ),
    ]);

    let mut data = BTreeMap::new();
    if let Some(manifest) = &record.rendered_manifest {
        data.insert(MANIFEST_KEY.to_string(), manifest.clone());
    }
    if let Some(resources) = &record.applied_resources {
        let encoded = serde_json::to_string(resources).change_context(StoreError::Malformed {
            kind: KIND.to_string(),
            name: record.name.clone(),
            message: "resource list is not serializable".to_string(),
        })?;
        data.insert(RESOURCES_KEY.to_string(), encoded);
    }
    if let Some(chart) = &record.chart {
        data.insert(CHART_KEY.to_string(), chart.to_string());
    }
    if let Some(values) = &record.values {
        data.insert(VALUES_KEY.to_string(), values.clone());
    }

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(record.name.clone()),
            namespace: Some(record.namespace.clone()),
            labels: Some(record_labels),
            resource_version: record.resource_version.clone(),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

pub fn from_config_map(config_map: ConfigMap) -> Result<BackingRecord, Report<StoreError>> {
    let metadata = config_map.metadata;
    let name = metadata.name.unwrap_or_default();
    let malformed = |message: String| StoreError::Malformed {
        kind: KIND.to_string(),
        name: name.clone(),
        message,
    };

    let record_labels = metadata.labels.unwrap_or_default();
    let base_name = record_labels
        .get(labels::BASE_NAME)
        .cloned()
        .ok_or_else(|| Report::new(malformed(format!("missing label {}", labels::BASE_NAME))))?;
    let index = record_labels
        .get(labels::INDEX)
        .ok_or_else(|| Report::new(malformed(format!("missing label {}", labels::INDEX))))?
        .parse::<u32>()
        .change_context_lazy(|| malformed(format!("label {} is not an index", labels::INDEX)))?;
    let kind = record_labels
        .get(labels::WORKLOAD_KIND)
        .and_then(|label| WorkloadKind::from_label(label))
        .ok_or_else(|| {
            Report::new(malformed(format!(
                "missing or unknown label {}",
                labels::WORKLOAD_KIND
            )))
        })?;

    let mut data = config_map.data.unwrap_or_default();
    let applied_resources = data
        .remove(RESOURCES_KEY)
        .map(|encoded| serde_json::from_str::<Vec<ResourceRef>>(&encoded))
        .transpose()
        .change_context_lazy(|| malformed("resource list is not valid JSON".to_string()))?;
    let chart = data
        .remove(CHART_KEY)
        .map(|chart| chart.parse::<ChartIdentity>())
        .transpose()
        .map_err(|message| Report::new(malformed(message)))?;

    Ok(BackingRecord {
        name: name.clone(),
        namespace: metadata.namespace.unwrap_or_default(),
        base_name,
        index,
        kind,
        rendered_manifest: data.remove(MANIFEST_KEY),
        applied_resources,
        chart,
        values: data.remove(VALUES_KEY),
        created: metadata.creation_timestamp.map(|t| t.0),
        resource_version: metadata.resource_version,
    })
}
