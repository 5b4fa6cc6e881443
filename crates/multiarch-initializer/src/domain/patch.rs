//! Minimal pod patches.
//!
//! A plan only ever carries two kinds of change: container images (matched by container
//! name) and the pending-initializer queue. Anything else that differs between the two
//! snapshots is rejected so a patch never clobbers fields this initializer does not own.

use core::error::Error;

use error_stack::Report;
use error_stack::ResultExt;
use json_patch::AddOperation;
use json_patch::PatchOperation;
use json_patch::RemoveOperation;
use json_patch::ReplaceOperation;
use json_patch::TestOperation;
use k8s_openapi::api::core::v1::Container;
use serde_json::json;
use serde_json::Map;
use serde_json::Value;

use crate::domain::pod::Initializers;
use crate::domain::pod::InitializingPod;

const INITIALIZERS_PATH: &str = "/metadata/initializers";
const PENDING_PATH: &str = "/metadata/initializers/pending";
const CONTAINERS_PATH: &str = "/spec/containers";
const INIT_CONTAINERS_PATH: &str = "/spec/initContainers";

/// Wire format of the generated patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, derive_more::Display)]
pub enum PatchFormat {
    /// Kubernetes strategic merge patch, list entries merged by `name`
    #[default]
    #[display("strategic")]
    Strategic,
    /// RFC 6902 JSON patch with `test` guards on container names
    #[display("json")]
    Json,
}

#[derive(Debug, Clone)]
pub enum PodPatch {
    Strategic(Value),
    Json(json_patch::Patch),
}

impl PodPatch {
    pub fn format(&self) -> PatchFormat {
        match self {
            Self::Strategic(_) => PatchFormat::Strategic,
            Self::Json(_) => PatchFormat::Json,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Strategic(value) => value.as_object().map_or(true, Map::is_empty),
            Self::Json(patch) => patch.0.is_empty(),
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Strategic(value) => Ok(value.clone()),
            Self::Json(patch) => serde_json::to_value(patch),
        }
    }
}

#[derive(Debug, derive_more::Display)]
pub enum PlanError {
    #[display("Failed to serialize pod snapshot")]
    Serialize,
    #[display("Pod changed outside of images and initializers at {path}")]
    UnexpectedChange { path: String },
}

impl Error for PlanError {}

#[derive(Debug, Clone, PartialEq)]
struct ImageChange {
    index: usize,
    name: String,
    previous: Option<String>,
    image: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum QueueChange {
    Unchanged,
    Created(Initializers),
    Cleared {
        head: Option<String>,
    },
    Updated {
        removed: Vec<(usize, String)>,
        added: Vec<String>,
    },
}

impl QueueChange {
    fn between(before: Option<&Initializers>, after: Option<&Initializers>) -> Self {
        match (before, after) {
            (before, after) if before == after => Self::Unchanged,
            (None, Some(after)) => Self::Created(after.clone()),
            (Some(before), None) => Self::Cleared {
                head: before.head().map(str::to_string),
            },
            (Some(before), Some(after)) => {
                let removed = before
                    .names()
                    .enumerate()
                    .filter(|(_, name)| !after.names().any(|n| n == *name))
                    .map(|(index, name)| (index, name.to_string()))
                    .collect();
                let added = after
                    .names()
                    .filter(|name| !before.names().any(|n| n == *name))
                    .map(str::to_string)
                    .collect();
                Self::Updated { removed, added }
            }
            (None, None) => Self::Unchanged,
        }
    }
}

/// Computes the patch turning one pod snapshot into another.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchPlanner {
    format: PatchFormat,
}

impl PatchPlanner {
    pub fn new(format: PatchFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> PatchFormat {
        self.format
    }

    /// Plan the patch from `before` to `after`.
    ///
    /// # Errors
    ///
    /// - [`PlanError::Serialize`] if a snapshot cannot be serialized
    /// - [`PlanError::UnexpectedChange`] if the snapshots differ in anything other than
    ///   container images or the initializer queue
    pub fn plan(
        &self,
        before: &InitializingPod,
        after: &InitializingPod,
    ) -> Result<PodPatch, Report<PlanError>> {
        let before_value = serde_json::to_value(before).change_context(PlanError::Serialize)?;
        let after_value = serde_json::to_value(after).change_context(PlanError::Serialize)?;
        ensure_patchable(&before_value, &after_value)?;

        let containers = image_changes(before.containers(), after.containers());
        let init_containers = image_changes(before.init_containers(), after.init_containers());
        let queue = QueueChange::between(
            before.metadata.initializers.as_ref(),
            after.metadata.initializers.as_ref(),
        );

        Ok(match self.format {
            PatchFormat::Strategic => {
                PodPatch::Strategic(strategic_patch(&containers, &init_containers, &queue))
            }
            PatchFormat::Json => {
                PodPatch::Json(json_operations(&containers, &init_containers, &queue))
            }
        })
    }
}

fn operation_path(op: &PatchOperation) -> &str {
    match op {
        PatchOperation::Add(op) => &op.path,
        PatchOperation::Remove(op) => &op.path,
        PatchOperation::Replace(op) => &op.path,
        PatchOperation::Move(op) => &op.path,
        PatchOperation::Copy(op) => &op.path,
        PatchOperation::Test(op) => &op.path,
    }
}

fn is_image_path(path: &str, list: &str) -> bool {
    path.strip_prefix(list)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_suffix("/image"))
        .is_some_and(|index| index.parse::<usize>().is_ok())
}

fn is_patchable(path: &str) -> bool {
    path == INITIALIZERS_PATH
        || path.starts_with(&format!("{INITIALIZERS_PATH}/"))
        || is_image_path(path, CONTAINERS_PATH)
        || is_image_path(path, INIT_CONTAINERS_PATH)
}

fn ensure_patchable(before: &Value, after: &Value) -> Result<(), Report<PlanError>> {
    let diff = json_patch::diff(before, after);
    match diff.0.iter().map(operation_path).find(|p| !is_patchable(p)) {
        Some(path) => Err(Report::new(PlanError::UnexpectedChange {
            path: path.to_string(),
        })),
        None => Ok(()),
    }
}

fn image_changes(before: &[Container], after: &[Container]) -> Vec<ImageChange> {
    after
        .iter()
        .filter_map(|new| {
            let (index, old) = before
                .iter()
                .enumerate()
                .find(|(_, old)| old.name == new.name)?;
            (old.image != new.image).then(|| ImageChange {
                index,
                name: new.name.clone(),
                previous: old.image.clone(),
                image: new.image.clone(),
            })
        })
        .collect()
}

fn strategic_images(changes: &[ImageChange]) -> Value {
    changes
        .iter()
        .map(|c| json!({ "name": c.name, "image": c.image }))
        .collect()
}

fn strategic_patch(
    containers: &[ImageChange],
    init_containers: &[ImageChange],
    queue: &QueueChange,
) -> Value {
    let mut patch = Map::new();

    let initializers = match queue {
        QueueChange::Unchanged => None,
        QueueChange::Created(initializers) => Some(json!(initializers)),
        // null deletes the field, an empty list would leave it present
        QueueChange::Cleared { .. } => Some(Value::Null),
        QueueChange::Updated { removed, added } => {
            let pending: Vec<Value> = removed
                .iter()
                .map(|(_, name)| json!({ "$patch": "delete", "name": name }))
                .chain(added.iter().map(|name| json!({ "name": name })))
                .collect();
            Some(json!({ "pending": pending }))
        }
    };
    if let Some(initializers) = initializers {
        patch.insert(
            "metadata".to_string(),
            json!({ "initializers": initializers }),
        );
    }

    let mut spec = Map::new();
    if !containers.is_empty() {
        spec.insert("containers".to_string(), strategic_images(containers));
    }
    if !init_containers.is_empty() {
        spec.insert("initContainers".to_string(), strategic_images(init_containers));
    }
    if !spec.is_empty() {
        patch.insert("spec".to_string(), Value::Object(spec));
    }

    Value::Object(patch)
}

fn test_op(path: String, value: &str) -> PatchOperation {
    PatchOperation::Test(TestOperation {
        path,
        value: Value::String(value.to_string()),
    })
}

fn push_image_ops(ops: &mut Vec<PatchOperation>, list: &str, changes: &[ImageChange]) {
    for change in changes {
        ops.push(test_op(format!("{list}/{}/name", change.index), &change.name));

        let path = format!("{list}/{}/image", change.index);
        ops.push(match (&change.previous, &change.image) {
            (Some(_), Some(image)) => PatchOperation::Replace(ReplaceOperation {
                path,
                value: Value::String(image.clone()),
            }),
            (None, Some(image)) => PatchOperation::Add(AddOperation {
                path,
                value: Value::String(image.clone()),
            }),
            (_, None) => PatchOperation::Remove(RemoveOperation { path }),
        });
    }
}

fn json_operations(
    containers: &[ImageChange],
    init_containers: &[ImageChange],
    queue: &QueueChange,
) -> json_patch::Patch {
    let mut ops = Vec::new();
    push_image_ops(&mut ops, CONTAINERS_PATH, containers);
    push_image_ops(&mut ops, INIT_CONTAINERS_PATH, init_containers);

    match queue {
        QueueChange::Unchanged => {}
        QueueChange::Created(initializers) => ops.push(PatchOperation::Add(AddOperation {
            path: INITIALIZERS_PATH.to_string(),
            value: json!(initializers),
        })),
        QueueChange::Cleared { head } => {
            if let Some(head) = head {
                ops.push(test_op(format!("{PENDING_PATH}/0/name"), head));
            }
            ops.push(PatchOperation::Remove(RemoveOperation {
                path: INITIALIZERS_PATH.to_string(),
            }));
        }
        QueueChange::Updated { removed, added } => {
            // highest index first so earlier indices stay valid
            for (index, name) in removed.iter().rev() {
                ops.push(test_op(format!("{PENDING_PATH}/{index}/name"), name));
                ops.push(PatchOperation::Remove(RemoveOperation {
                    path: format!("{PENDING_PATH}/{index}"),
                }));
            }
            for name in added {
                ops.push(PatchOperation::Add(AddOperation {
                    path: format!("{PENDING_PATH}/-"),
                    value: json!({ "name": name }),
                }));
            }
        }
    }

    json_patch::Patch(ops)
}
