//! Seams to the cluster: node registry and pod object gateway.

use core::error::Error;

use error_stack::Report;
use k8s_openapi::api::core::v1::Node;

use crate::domain::patch::PodPatch;
use crate::domain::pod::InitializingPod;
use crate::domain::pod::PodRef;

/// Reading a node from the cluster failed.
#[derive(Debug, derive_more::Display)]
pub enum NodeLookupError {
    #[display("Pod is not assigned to a node")]
    Unassigned,
    #[display("Node not found: {node}")]
    NotFound { node: String },
    #[display("Failed to read node {node}")]
    ReadFailed { node: String },
    #[display("Node {node} does not report an architecture")]
    MissingArchitecture { node: String },
}

impl Error for NodeLookupError {}

/// The object gateway rejected a write.
#[derive(Debug, derive_more::Display)]
pub enum CommitError {
    #[display("Failed to update pod {pod}")]
    UpdateRejected { pod: PodRef },
    #[display("Failed to patch pod {pod}")]
    PatchRejected { pod: PodRef },
}

impl Error for CommitError {}

/// Read access to cluster nodes.
#[async_trait::async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Fetch a node by name, `Ok(None)` when it does not exist.
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Report<NodeLookupError>>;
}

/// Write access to pods.
#[async_trait::async_trait]
pub trait PodGateway: Send + Sync {
    /// Replace the whole pod object.
    async fn update(&self, pod: &InitializingPod) -> Result<InitializingPod, Report<CommitError>>;

    /// Apply a partial update to the pod identified by `pod`.
    async fn apply_patch(
        &self,
        pod: &PodRef,
        patch: &PodPatch,
    ) -> Result<InitializingPod, Report<CommitError>>;
}
