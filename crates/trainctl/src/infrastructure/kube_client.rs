//! Kubernetes client construction from an explicit kubeconfig or the
//! ambient one.

use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use tracing::debug;

use crate::infrastructure::k8s::StoreError;

fn connection_failed(message: impl Into<String>) -> StoreError {
    StoreError::ConnectionFailed {
        message: message.into(),
    }
}

/// Client configuration from `kubeconfig`, or inferred from the
/// environment (`KUBECONFIG`, `~/.kube/config`, in-cluster) when absent.
pub async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, Report<StoreError>> {
    let Some(path) = kubeconfig else {
        return Config::infer()
            .await
            .change_context_lazy(|| connection_failed("no usable kubeconfig or in-cluster config"));
    };

    let source = || connection_failed(format!("kubeconfig {}", path.display()));
    let kubeconfig = Kubeconfig::read_from(path)
        .change_context_lazy(source)
        .attach_printable("cannot read file")?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(source)
        .attach_printable("current context cannot be resolved")
}

#[tracing::instrument(skip_all)]
pub async fn init_kube_client(kubeconfig: Option<&Path>) -> Result<Client, Report<StoreError>> {
    let config = load_config(kubeconfig).await?;
    debug!(
        cluster_url = %config.cluster_url,
        default_namespace = %config.default_namespace,
        "Loaded Kubernetes config"
    );
    Client::try_from(config).change_context_lazy(|| connection_failed("cannot build client"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: lab
    cluster:
      server: https://10.0.0.1:6443
contexts:
  - name: lab
    context:
      cluster: lab
      user: dev
      namespace: research
current-context: lab
users:
  - name: dev
    user:
      token: secret
"#;

    #[tokio::test]
    async fn explicit_kubeconfig_selects_current_context() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KUBECONFIG.as_bytes()).unwrap();

        let config = load_config(Some(file.path())).await.unwrap();
        assert_eq!(config.cluster_url.host(), Some("10.0.0.1"));
        assert_eq!(config.cluster_url.port_u16(), Some(6443));
        assert_eq!(config.default_namespace, "research");
    }

    #[tokio::test]
    async fn missing_kubeconfig_is_a_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let err = load_config(Some(&path)).await.unwrap_err();
        match err.current_context() {
            StoreError::ConnectionFailed { message } => {
                assert!(message.contains("absent.yaml"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
