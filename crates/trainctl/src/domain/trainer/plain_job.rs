//! Bare pods owned by a batch Job.

use k8s_openapi::api::core::v1::Pod;

/// The newest pod: a batch Job replaces failed pods, and the latest attempt
/// is the one whose state matters.
pub(super) fn chief_index(pods: &[Pod]) -> Option<usize> {
    pods.len().checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_pod_is_chief() {
        let pod = |name: &str| -> Pod {
            serde_json::from_value(serde_json::json!({ "metadata": { "name": name } })).unwrap()
        };
        assert_eq!(chief_index(&[]), None);
        assert_eq!(chief_index(&[pod("train-a"), pod("train-b")]), Some(1));
    }
}
