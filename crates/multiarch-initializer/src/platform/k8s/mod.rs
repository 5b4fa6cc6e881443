//! Kubernetes integration module.
//!
//! The main components are:
//! - [`PodWatcher`]: watches pods and hands every snapshot to the reconciler
//! - [`KubeNodeRegistry`]: node reads through `Api<Node>`
//! - [`KubePodGateway`]: pod replace and patch through `Api<InitializingPod>`

use core::error::Error;

pub mod node_registry;
pub mod pod_gateway;
pub mod pod_watcher;

pub use node_registry::KubeNodeRegistry;
pub use pod_gateway::KubePodGateway;
pub use pod_watcher::PodWatcher;

/// Name recorded as field manager for writes made by this initializer.
pub const FIELD_MANAGER: &str = "multiarch-initializer";

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to watch pods: {message}")]
    WatchFailed { message: String },
}

impl Error for KubernetesError {}
