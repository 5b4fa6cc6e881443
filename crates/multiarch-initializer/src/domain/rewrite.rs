use k8s_openapi::api::core::v1::Container;
use tracing::info;

use crate::domain::annotation::AnnotationTable;

/// Why a container kept its original image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum UnresolvedReason {
    #[display("architecture not set in annotation")]
    ArchitectureMissing,
    #[display("image not set in annotation")]
    ContainerMissing,
}

/// A container that had no image mapped for the node architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedImage {
    pub container: String,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteResult {
    pub containers: Vec<Container>,
    pub unresolved: Vec<UnresolvedImage>,
}

/// Swap container images for the ones declared for `architecture`.
///
/// Containers are looked up by name. Unmapped containers keep their image and are reported
/// in [`RewriteResult::unresolved`]. Order and count of containers never change.
pub fn rewrite(
    containers: &[Container],
    architecture: &str,
    table: &AnnotationTable,
) -> RewriteResult {
    let arch_known = table.has_architecture(architecture);
    let mut result = RewriteResult {
        containers: Vec::with_capacity(containers.len()),
        unresolved: Vec::new(),
    };

    for container in containers {
        let mut rewritten = container.clone();
        match table.image_for(architecture, &container.name) {
            Some(image) => rewritten.image = Some(image.to_string()),
            None => {
                let reason = if arch_known {
                    UnresolvedReason::ContainerMissing
                } else {
                    UnresolvedReason::ArchitectureMissing
                };
                info!(
                    container = %container.name,
                    arch = %architecture,
                    "Keeping original image: {reason}"
                );
                result.unresolved.push(UnresolvedImage {
                    container: container.name.clone(),
                    reason,
                });
            }
        }
        result.containers.push(rewritten);
    }

    result
}
