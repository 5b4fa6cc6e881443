use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::TryStreamExt;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::WatchStreamExt;
use kube::Api;
use kube::Client;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::domain::pod::InitializingPod;
use crate::domain::reconciler::Reconciler;
use crate::platform::k8s::KubernetesError;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Watches pods and runs the reconciler on every applied snapshot.
///
/// Pods not waiting on this initializer are dropped by the reconciler's gate, so
/// modifications and resync events are harmless.
pub struct PodWatcher {
    client: Client,
    namespace: Option<String>,
    reconciler: Arc<Reconciler>,
    concurrency: usize,
}

impl PodWatcher {
    /// Create a new pod watcher.
    ///
    /// # Arguments
    ///
    /// * `namespace` - Kubernetes namespace to watch (None for all namespaces)
    /// * `concurrency` - Maximum number of pods initialized at the same time
    pub fn new(
        client: Client,
        namespace: Option<String>,
        reconciler: Arc<Reconciler>,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            namespace,
            reconciler,
            concurrency: concurrency.max(1),
        }
    }

    /// Watch pods until `cancellation_token` is cancelled.
    ///
    /// A failing watch stream is restarted after a short delay.
    #[tracing::instrument(skip(self, cancellation_token), fields(namespace = ?self.namespace))]
    pub async fn run(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!(
            initializer = %self.reconciler.config().initializer_name,
            "Starting pod watcher"
        );

        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Pod watcher shutdown requested");
                    break;
                }
                result = self.watch_pods() => {
                    match result {
                        Ok(()) => {
                            warn!("Pod watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Pod watch failed: {e:?}");
                            select! {
                                _ = cancellation_token.cancelled() => break,
                                _ = tokio::time::sleep(RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Watch pods and process events.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::WatchFailed`] if the watch stream fails
    async fn watch_pods(&self) -> Result<(), Report<KubernetesError>> {
        let api: Api<InitializingPod> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };

        watcher(api, Config::default())
            .applied_objects()
            .map_err(|e| {
                Report::new(KubernetesError::WatchFailed {
                    message: format!("Watch stream error: {e}"),
                })
            })
            .try_for_each_concurrent(self.concurrency, |pod| async move {
                self.handle_pod(pod).await;
                Ok(())
            })
            .await
    }

    /// Handle a single pod snapshot. Failures are logged and the pod is left for the
    /// next delivery.
    async fn handle_pod(&self, pod: InitializingPod) {
        if pod.is_terminating() {
            debug!(pod = %pod.pod_ref(), "Pod is terminating, skipping");
            return;
        }

        match self.reconciler.reconcile(&pod).await {
            Ok(outcome) => debug!(pod = %pod.pod_ref(), ?outcome, "Pod event handled"),
            Err(e) => error!("Failed to initialize pod: {e:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::config::InitializerConfig;
    use crate::config::DEFAULT_ANNOTATION;
    use crate::config::DEFAULT_INITIALIZER_NAME;
    use crate::domain::mock::MockNodeRegistry;
    use crate::domain::mock::MockPodGateway;
    use crate::domain::pod::Initializers;

    fn watcher_with_mocks(gateway: Arc<MockPodGateway>) -> PodWatcher {
        let registry = Arc::new(MockNodeRegistry::new().with_node("foo", "arm"));
        let reconciler = Arc::new(Reconciler::new(
            InitializerConfig::default(),
            registry,
            gateway,
        ));
        // no request is sent, handle_pod only talks to the mocks
        let client = Client::try_from(kube::Config::new(
            "http://localhost:8080".parse().expect("valid url"),
        ))
        .expect("client");
        PodWatcher::new(client, None, reconciler, 1)
    }

    fn pending_pod() -> InitializingPod {
        let mut pod = InitializingPod::new(
            "default",
            "web",
            PodSpec {
                node_name: Some("foo".to_string()),
                containers: vec![Container {
                    name: "A".to_string(),
                    image: Some("A".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        pod.metadata.object.annotations = Some(BTreeMap::from([(
            DEFAULT_ANNOTATION.to_string(),
            r#"{"arm":{"A":"arm_A"}}"#.to_string(),
        )]));
        pod.metadata.initializers = Some(Initializers::from_names([DEFAULT_INITIALIZER_NAME]));
        pod
    }

    #[test(tokio::test)]
    async fn handle_pod_initializes_pending_pod() {
        let gateway = Arc::new(MockPodGateway::new());
        let watcher = watcher_with_mocks(gateway.clone());
        let pod = pending_pod();
        gateway.insert(pod.clone());

        watcher.handle_pod(pod.clone()).await;

        let stored = gateway.get(&pod.pod_ref()).expect("stored pod");
        assert_eq!(stored.containers()[0].image.as_deref(), Some("arm_A"));
        assert_eq!(stored.metadata.initializers, None);
    }

    #[test(tokio::test)]
    async fn handle_pod_skips_terminating_pod() {
        let gateway = Arc::new(MockPodGateway::new());
        let watcher = watcher_with_mocks(gateway.clone());
        let mut pod = pending_pod();
        pod.metadata.object.deletion_timestamp = Some(Time(Default::default()));
        gateway.insert(pod.clone());

        watcher.handle_pod(pod).await;

        assert!(gateway.commits().is_empty());
    }

    #[test(tokio::test)]
    async fn handle_pod_survives_reconcile_failure() {
        let gateway = Arc::new(MockPodGateway::new());
        let watcher = watcher_with_mocks(gateway.clone());
        let mut pod = pending_pod();
        pod.metadata.object.annotations = Some(BTreeMap::from([(
            DEFAULT_ANNOTATION.to_string(),
            "{broken".to_string(),
        )]));

        watcher.handle_pod(pod).await;

        assert!(gateway.commits().is_empty());
    }

    #[test(tokio::test)]
    async fn zero_concurrency_is_clamped() {
        let gateway = Arc::new(MockPodGateway::new());
        let watcher = watcher_with_mocks(gateway);
        let watcher = PodWatcher::new(watcher.client, None, watcher.reconciler, 0);
        assert_eq!(watcher.concurrency, 1);
    }
}
