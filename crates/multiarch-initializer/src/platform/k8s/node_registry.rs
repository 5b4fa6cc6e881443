use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::Client;

use crate::domain::traits::NodeLookupError;
use crate::domain::traits::NodeRegistry;

/// Node registry reading cluster-scoped `Node` objects.
#[derive(Clone)]
pub struct KubeNodeRegistry {
    api: Api<Node>,
}

impl KubeNodeRegistry {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl NodeRegistry for KubeNodeRegistry {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Report<NodeLookupError>> {
        self.api
            .get_opt(name)
            .await
            .change_context_lazy(|| NodeLookupError::ReadFailed {
                node: name.to_string(),
            })
    }
}
