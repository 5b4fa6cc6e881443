use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use tracing::info;

use crate::platform::k8s::KubernetesError;

/// Build a client from `kubeconfig`, or from the in-cluster / `~/.kube/config`
/// environment when no path is given.
///
/// # Errors
///
/// - [`KubernetesError::ConnectionFailed`] if no usable configuration is found
pub async fn init_kube_client(kubeconfig: Option<&Path>) -> Result<Client, Report<KubernetesError>> {
    let config = match kubeconfig {
        Some(path) => config_from_file(path).await?,
        None => Config::infer()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "Failed to infer Kubernetes configuration".to_string(),
            })?,
    };

    info!(cluster_url = %config.cluster_url, "Using Kubernetes API server");

    Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "Failed to create Kubernetes client".to_string(),
    })
}

async fn config_from_file(path: &Path) -> Result<Config, Report<KubernetesError>> {
    let connection_failed = |what: &str| KubernetesError::ConnectionFailed {
        message: format!("{what}: {}", path.display()),
    };

    let kubeconfig = Kubeconfig::read_from(path)
        .change_context_lazy(|| connection_failed("Failed to read kubeconfig file"))?;

    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(|| connection_failed("Failed to create config from kubeconfig"))
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn missing_kubeconfig_file_fails() {
        let Err(err) = init_kube_client(Some(Path::new("/nonexistent/kubeconfig"))).await else {
            panic!("client built from a missing kubeconfig");
        };

        assert!(matches!(
            err.current_context(),
            KubernetesError::ConnectionFailed { message } if message.contains("/nonexistent/kubeconfig")
        ));
    }
}
