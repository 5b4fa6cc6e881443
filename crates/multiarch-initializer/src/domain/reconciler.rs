//! Per-pod initialization: gate, decode, resolve, rewrite, plan, commit.

use core::error::Error;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::InitializerConfig;
use crate::domain::annotation::AnnotationTable;
use crate::domain::arch::ArchitectureResolver;
use crate::domain::gate;
use crate::domain::patch::PatchPlanner;
use crate::domain::pod::InitializingPod;
use crate::domain::pod::PodRef;
use crate::domain::rewrite;
use crate::domain::rewrite::UnresolvedImage;
use crate::domain::traits::NodeRegistry;
use crate::domain::traits::PodGateway;

/// How a pod event ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// This initializer is not at the head of the pod's queue, nothing was written.
    GatedOut,
    /// Only the initializer was removed from the queue.
    CommittedPassthrough,
    /// Images were rewritten and the initializer removed in one patch.
    CommittedRewritten { unresolved: Vec<UnresolvedImage> },
}

#[derive(Debug, derive_more::Display)]
pub enum ReconcileError {
    #[display("Failed to dequeue initializer from pod {pod}")]
    Dequeue { pod: PodRef },
    #[display("Failed to decode annotation {annotation} on pod {pod}")]
    Decode { pod: PodRef, annotation: String },
    #[display("Failed to resolve node architecture for pod {pod}")]
    NodeLookup { pod: PodRef },
    #[display("Failed to plan patch for pod {pod}")]
    Plan { pod: PodRef },
    #[display("Failed to commit pod {pod}")]
    Commit { pod: PodRef },
}

impl Error for ReconcileError {}

/// Initializes pods this initializer is responsible for.
///
/// Holds no per-pod state, so one instance can serve concurrent events.
pub struct Reconciler {
    config: InitializerConfig,
    resolver: ArchitectureResolver,
    gateway: Arc<dyn PodGateway>,
    planner: PatchPlanner,
}

impl Reconciler {
    pub fn new(
        config: InitializerConfig,
        registry: Arc<dyn NodeRegistry>,
        gateway: Arc<dyn PodGateway>,
    ) -> Self {
        let planner = PatchPlanner::new(config.patch_format);
        Self {
            config,
            resolver: ArchitectureResolver::new(registry),
            gateway,
            planner,
        }
    }

    pub fn config(&self) -> &InitializerConfig {
        &self.config
    }

    /// Handle one pod snapshot.
    ///
    /// Nothing is committed when an error is returned; retrying is up to whoever
    /// delivers the event again.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::Decode`] if the annotation is malformed
    /// - [`ReconcileError::NodeLookup`] if the node architecture cannot be read
    /// - [`ReconcileError::Plan`] if the patch cannot be computed
    /// - [`ReconcileError::Commit`] if the update or patch is rejected
    #[tracing::instrument(skip_all, fields(pod = %pod.pod_ref()))]
    pub async fn reconcile(
        &self,
        pod: &InitializingPod,
    ) -> Result<Outcome, Report<ReconcileError>> {
        let name = self.config.initializer_name.as_str();
        if !gate::is_head_initializer(pod, name) {
            debug!("Not the head initializer, skipping");
            return Ok(Outcome::GatedOut);
        }

        let pod_ref = pod.pod_ref();
        info!("Initializing pod");

        let mut initialized = pod.clone();
        if let Some(queue) = pod.metadata.initializers.as_ref() {
            initialized.metadata.initializers = gate::dequeue(queue, name)
                .change_context_lazy(|| ReconcileError::Dequeue {
                    pod: pod_ref.clone(),
                })?;
        }

        let table = match pod.annotation(&self.config.annotation) {
            None if self.config.require_annotation => {
                info!(
                    annotation = %self.config.annotation,
                    "Required annotation missing, skipping multiarch image rewrite"
                );
                return self.commit_passthrough(&pod_ref, &initialized).await;
            }
            None => AnnotationTable::default(),
            Some(raw) => AnnotationTable::decode(raw).change_context_lazy(|| {
                ReconcileError::Decode {
                    pod: pod_ref.clone(),
                    annotation: self.config.annotation.clone(),
                }
            })?,
        };

        let node = pod.node_name();
        let architecture = self
            .resolver
            .resolve(node)
            .await
            .change_context_lazy(|| ReconcileError::NodeLookup {
                pod: pod_ref.clone(),
            })?;

        if architecture == self.config.baseline_architecture {
            info!(arch = %architecture, "Baseline architecture, keeping manifest images");
            return self.commit_passthrough(&pod_ref, &initialized).await;
        }

        let mut unresolved = Vec::new();
        if let Some(spec) = initialized.spec.as_mut() {
            let containers = rewrite::rewrite(&spec.containers, &architecture, &table);
            spec.containers = containers.containers;
            unresolved.extend(containers.unresolved);

            if let Some(init_containers) = spec.init_containers.as_mut() {
                let rewritten = rewrite::rewrite(init_containers, &architecture, &table);
                *init_containers = rewritten.containers;
                unresolved.extend(rewritten.unresolved);
            }
        }

        let patch = self
            .planner
            .plan(pod, &initialized)
            .change_context_lazy(|| ReconcileError::Plan {
                pod: pod_ref.clone(),
            })?;

        self.gateway
            .apply_patch(&pod_ref, &patch)
            .await
            .change_context_lazy(|| ReconcileError::Commit {
                pod: pod_ref.clone(),
            })?;

        if !unresolved.is_empty() {
            warn!(
                arch = %architecture,
                count = unresolved.len(),
                "Some containers kept their original image"
            );
        }
        info!(node = ?node, arch = %architecture, format = %patch.format(), "Pod initialized");

        Ok(Outcome::CommittedRewritten { unresolved })
    }

    async fn commit_passthrough(
        &self,
        pod_ref: &PodRef,
        initialized: &InitializingPod,
    ) -> Result<Outcome, Report<ReconcileError>> {
        self.gateway
            .update(initialized)
            .await
            .change_context_lazy(|| ReconcileError::Commit {
                pod: pod_ref.clone(),
            })?;

        info!("Pod initialized without image changes");
        Ok(Outcome::CommittedPassthrough)
    }
}
