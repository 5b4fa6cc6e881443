use error_stack::Report;
use error_stack::ResultExt;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use serde_json::Value;
use tracing::debug;

use crate::domain::patch::PodPatch;
use crate::domain::pod::InitializingPod;
use crate::domain::pod::PodRef;
use crate::domain::traits::CommitError;
use crate::domain::traits::PodGateway;
use crate::platform::k8s::FIELD_MANAGER;

/// Pod writes against the API server.
#[derive(Clone)]
pub struct KubePodGateway {
    client: Client,
}

impl KubePodGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<InitializingPod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn to_kube_patch(patch: &PodPatch) -> Patch<Value> {
    match patch {
        PodPatch::Strategic(value) => Patch::Strategic(value.clone()),
        PodPatch::Json(operations) => Patch::Json(operations.clone()),
    }
}

#[async_trait::async_trait]
impl PodGateway for KubePodGateway {
    async fn update(&self, pod: &InitializingPod) -> Result<InitializingPod, Report<CommitError>> {
        let pod_ref = pod.pod_ref();
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        self.api(&pod_ref.namespace)
            .replace(&pod_ref.name, &params, pod)
            .await
            .change_context_lazy(|| CommitError::UpdateRejected {
                pod: pod_ref.clone(),
            })
    }

    async fn apply_patch(
        &self,
        pod: &PodRef,
        patch: &PodPatch,
    ) -> Result<InitializingPod, Report<CommitError>> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        debug!(pod = %pod, format = %patch.format(), "Applying patch");

        self.api(&pod.namespace)
            .patch(&pod.name, &params, &to_kube_patch(patch))
            .await
            .change_context_lazy(|| CommitError::PatchRejected { pod: pod.clone() })
    }
}
