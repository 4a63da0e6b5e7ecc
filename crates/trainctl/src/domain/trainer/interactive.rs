//! A single long-running pod behind a stateful set.

use k8s_openapi::api::core::v1::Pod;

/// The stateful set's ordinal-0 pod, or the oldest pod if it is gone.
pub(super) fn chief_index(name: &str, pods: &[Pod]) -> Option<usize> {
    let ordinal_zero = format!("{name}-0");
    pods.iter()
        .position(|pod| pod.metadata.name.as_deref() == Some(ordinal_zero.as_str()))
        .or_else(|| (!pods.is_empty()).then_some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str) -> Pod {
        serde_json::from_value(serde_json::json!({ "metadata": { "name": name } })).unwrap()
    }

    #[test]
    fn ordinal_zero_is_chief() {
        assert_eq!(
            chief_index("notebook", &[pod("notebook-1"), pod("notebook-0")]),
            Some(1)
        );
        assert_eq!(chief_index("notebook", &[pod("notebook-1")]), Some(0));
        assert_eq!(chief_index("notebook", &[]), None);
    }
}
