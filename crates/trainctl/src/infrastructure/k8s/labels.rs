//! Label and annotation keys shared by submission, discovery and status.

use std::collections::BTreeMap;

use api_types::WorkloadKind;

/// Domain prefix for trainctl labels and annotations.
pub const TRAINCTL_DOMAIN: &str = "trainctl.io";

pub const MANAGED_BY: &str = "trainctl.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "trainctl";
pub const BASE_NAME: &str = "trainctl.io/base-name";
pub const INDEX: &str = "trainctl.io/index";
pub const WORKLOAD_KIND: &str = "trainctl.io/workload-kind";

/// Pod labels written by the workload charts.
pub const RELEASE: &str = "release";
pub const APP: &str = "app";
pub const ROLE: &str = "trainctl.io/role";
pub const ROLE_HEAD: &str = "head";
pub const ROLE_WORKER: &str = "worker";

/// Written by the external scheduler controller.
pub const SCHEDULER_STATUS: &str = "scheduling.trainctl.io/job-status";
/// Legacy scheduler flag, `"true"` when the job cannot be placed.
pub const SCHEDULER_UNSCHEDULABLE: &str = "scheduling.trainctl.io/unschedulable";
/// Last status computed by trainctl, used as a hint only.
pub const STATUS_CACHE: &str = "trainctl.io/status-cache";
/// Fractional GPU share requested by a pod, e.g. `"0.25"`.
pub const GPU_FRACTION: &str = "trainctl.io/gpu-fraction";

/// Extended resource name of whole GPUs.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Selects every backing record trainctl manages.
pub fn managed_records_selector() -> String {
    format!("{MANAGED_BY}={MANAGED_BY_VALUE}")
}

/// Selects the backing records allocated for one base name.
pub fn base_name_selector(base_name: &str) -> String {
    format!("{MANAGED_BY}={MANAGED_BY_VALUE},{BASE_NAME}={base_name}")
}

/// Selects the pods of one job.
pub fn pod_selector(kind: WorkloadKind, name: &str) -> String {
    format!("{RELEASE}={name},{APP}={}", kind.label())
}

/// Longest value the API server accepts for a label.
pub const MAX_LABEL_VALUE_LEN: usize = 63;

/// Checks that `value` is a valid label value: at most 63 characters of
/// alphanumerics, `-`, `_` and `.`, starting and ending with an
/// alphanumeric. Returns the reason it is not.
pub fn validate_label_value(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".to_string());
    }
    if value.len() > MAX_LABEL_VALUE_LEN {
        return Err(format!(
            "must be at most {MAX_LABEL_VALUE_LEN} characters, got {}",
            value.len()
        ));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("contains invalid character `{c}`"));
    }
    let alphanumeric_ends = value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric());
    if !alphanumeric_ends {
        return Err("must start and end with [a-zA-Z0-9]".to_string());
    }
    Ok(())
}

/// Evaluates an equality-based label selector (`a=b,c==d,e!=f`).
///
/// Set-based expressions are not supported and never match.
pub fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
            {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else {
                false
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn label_values_are_validated() {
        assert_eq!(validate_label_value("train-1.v2_a"), Ok(()));
        assert_eq!(validate_label_value(&"a".repeat(63)), Ok(()));
        assert_eq!(
            validate_label_value(&"a".repeat(64)),
            Err("must be at most 63 characters, got 64".to_string())
        );
        assert!(validate_label_value("").is_err());
        assert!(validate_label_value("-train").is_err());
        assert!(validate_label_value("train/x").is_err());
    }

    #[test]
    fn selector_matching() {
        let l = labels(&[("release", "train"), ("app", "plainjob")]);
        assert!(matches_selector(&l, "release=train,app=plainjob"));
        assert!(matches_selector(&l, "release==train"));
        assert!(matches_selector(&l, "app!=interactivejob"));
        assert!(!matches_selector(&l, "release=train-1"));
        assert!(!matches_selector(&l, "missing=x"));
        assert!(!matches_selector(&l, "release in (train)"));
        assert!(matches_selector(&l, ""));
    }

    #[test]
    fn pod_selector_uses_kind_label() {
        assert_eq!(
            pod_selector(WorkloadKind::WorkerGroupJob, "train"),
            "release=train,app=workergroupjob"
        );
    }
}
