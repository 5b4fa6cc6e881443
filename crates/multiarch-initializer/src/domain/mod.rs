//! Initialization pipeline.
//!
//! The main components are:
//! - [`gate`]: decides whether this initializer runs and dequeues it
//! - [`AnnotationTable`]: decoded architecture → container → image mapping
//! - [`ArchitectureResolver`]: node architecture lookup
//! - [`rewrite`]: swaps container images for the node architecture
//! - [`PatchPlanner`]: minimal patch between two pod snapshots
//! - [`Reconciler`]: runs the above for one pod event

pub mod annotation;
pub mod arch;
pub mod gate;
pub mod mock;
pub mod patch;
pub mod pod;
pub mod reconciler;
pub mod rewrite;
pub mod traits;

pub use annotation::AnnotationTable;
pub use annotation::DecodeError;
pub use arch::ArchitectureResolver;
pub use patch::PatchFormat;
pub use patch::PatchPlanner;
pub use patch::PodPatch;
pub use pod::Initializer;
pub use pod::Initializers;
pub use pod::InitializingPod;
pub use pod::PodRef;
pub use reconciler::Outcome;
pub use reconciler::ReconcileError;
pub use reconciler::Reconciler;
pub use traits::CommitError;
pub use traits::NodeLookupError;
pub use traits::NodeRegistry;
pub use traits::PodGateway;
