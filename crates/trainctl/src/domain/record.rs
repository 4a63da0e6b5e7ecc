//! The backing record: the durable object that *is* a job's identity.

use api_types::ChartIdentity;
use api_types::ResourceRef;
use api_types::WorkloadKind;
use chrono::DateTime;
use chrono::Utc;

/// A uniquely named record claimed by the name allocator and filled in by the
/// submission pipeline.
///
/// For a given `base_name` at most one record has `index == 0`. Indices are
/// never reused while a record holding them exists.
#[derive(Debug, Clone, PartialEq)]
pub struct BackingRecord {
    pub name: String,
    pub namespace: String,
    /// The name the user asked for
    pub base_name: String,
    /// 0 for the unsuffixed allocation, 1..N for `{base_name}-{index}`
    pub index: u32,
    pub kind: WorkloadKind,
    pub rendered_manifest: Option<String>,
    /// Every object the manifest produced, replayed on deletion
    pub applied_resources: Option<Vec<ResourceRef>>,
    pub chart: Option<ChartIdentity>,
    /// Submitted values, as YAML
    pub values: Option<String>,
    pub created: Option<DateTime<Utc>>,
    /// Opaque store version used for whole-object replacement
    pub resource_version: Option<String>,
}

impl BackingRecord {
    /// An empty record claiming `index` for `base_name`.
    pub fn claim(namespace: &str, base_name: &str, index: u32, kind: WorkloadKind) -> Self {
        Self {
            name: allocated_name(base_name, index),
            namespace: namespace.to_string(),
            base_name: base_name.to_string(),
            index,
            kind,
            rendered_manifest: None,
            applied_resources: None,
            chart: None,
            values: None,
            created: None,
            resource_version: None,
        }
    }

    /// A record is complete once the pipeline stored both the manifest and
    /// the resource list. Incomplete records are invisible to listing.
    pub fn is_complete(&self) -> bool {
        self.rendered_manifest.is_some() && self.applied_resources.is_some()
    }
}

/// `base` for index 0, `base-{index}` otherwise.
pub fn allocated_name(base_name: &str, index: u32) -> String {
    if index == 0 {
        base_name.to_string()
    } else {
        format!("{base_name}-{index}")
    }
}
