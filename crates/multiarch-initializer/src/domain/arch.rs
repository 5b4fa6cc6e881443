use std::sync::Arc;

use error_stack::Report;
use tracing::debug;

use crate::domain::traits::NodeLookupError;
use crate::domain::traits::NodeRegistry;

/// Resolves the instruction-set architecture of the node a pod landed on.
#[derive(Clone)]
pub struct ArchitectureResolver {
    registry: Arc<dyn NodeRegistry>,
}

impl ArchitectureResolver {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Architecture reported in `status.nodeInfo.architecture` of `node`.
    ///
    /// Performs exactly one registry read.
    ///
    /// # Errors
    ///
    /// - [`NodeLookupError::Unassigned`] if `node` is `None`
    /// - [`NodeLookupError::NotFound`] if the node does not exist
    /// - [`NodeLookupError::ReadFailed`] if the registry read fails
    /// - [`NodeLookupError::MissingArchitecture`] if the node has no architecture set
    pub async fn resolve(&self, node: Option<&str>) -> Result<String, Report<NodeLookupError>> {
        let node = node.ok_or_else(|| Report::new(NodeLookupError::Unassigned))?;

        let found = self.registry.get_node(node).await?.ok_or_else(|| {
            Report::new(NodeLookupError::NotFound {
                node: node.to_string(),
            })
        })?;

        let architecture = found
            .status
            .and_then(|status| status.node_info)
            .map(|info| info.architecture)
            .filter(|arch| !arch.is_empty())
            .ok_or_else(|| {
                Report::new(NodeLookupError::MissingArchitecture {
                    node: node.to_string(),
                })
            })?;

        debug!(node = %node, arch = %architecture, "Resolved node architecture");
        Ok(architecture)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::mock::MockNodeRegistry;

    #[test(tokio::test)]
    async fn resolve_known_node() {
        let registry = Arc::new(MockNodeRegistry::new().with_node("foo", "arm"));
        let resolver = ArchitectureResolver::new(registry.clone());

        assert_eq!(resolver.resolve(Some("foo")).await.unwrap(), "arm");
        assert_eq!(registry.reads(), 1);
    }

    #[test(tokio::test)]
    async fn resolve_missing_node() {
        let registry = Arc::new(MockNodeRegistry::new());
        let resolver = ArchitectureResolver::new(registry);

        let err = resolver.resolve(Some("foo")).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            NodeLookupError::NotFound { node } if node == "foo"
        ));
    }

    #[test(tokio::test)]
    async fn resolve_registry_failure() {
        let registry = Arc::new(MockNodeRegistry::new().with_node("foo", "arm"));
        registry.set_error_mode(true);
        let resolver = ArchitectureResolver::new(registry);

        let err = resolver.resolve(Some("foo")).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            NodeLookupError::ReadFailed { .. }
        ));
    }

    #[test(tokio::test)]
    async fn resolve_unassigned_pod_skips_registry() {
        let registry = Arc::new(MockNodeRegistry::new());
        let resolver = ArchitectureResolver::new(registry.clone());

        let err = resolver.resolve(None).await.unwrap_err();
        assert!(matches!(err.current_context(), NodeLookupError::Unassigned));
        assert_eq!(registry.reads(), 0);
    }

    #[test(tokio::test)]
    async fn resolve_node_without_architecture() {
        let registry = Arc::new(MockNodeRegistry::new().with_node("foo", ""));
        let resolver = ArchitectureResolver::new(registry);

        let err = resolver.resolve(Some("foo")).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            NodeLookupError::MissingArchitecture { .. }
        ));
    }
}
