//! In-memory node registry and pod gateway
//!
//! Used by unit and integration tests in place of the API server. The gateway applies
//! patches itself so tests can look at the resulting pod.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::NodeStatus;
use k8s_openapi::api::core::v1::NodeSystemInfo;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::domain::patch::PodPatch;
use crate::domain::pod::InitializingPod;
use crate::domain::pod::PodRef;
use crate::domain::traits::CommitError;
use crate::domain::traits::NodeLookupError;
use crate::domain::traits::NodeRegistry;
use crate::domain::traits::PodGateway;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Node registry backed by a map of node name to node.
#[derive(Default)]
pub struct MockNodeRegistry {
    nodes: Mutex<BTreeMap<String, Node>>,
    reads: AtomicUsize,
    error_mode: AtomicBool,
}

impl MockNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node reporting `architecture`; an empty string leaves it unset.
    pub fn with_node(self, name: &str, architecture: &str) -> Self {
        let node_info = (!architecture.is_empty()).then(|| NodeSystemInfo {
            architecture: architecture.to_string(),
            ..Default::default()
        });
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                node_info,
                ..Default::default()
            }),
            ..Default::default()
        };
        lock(&self.nodes).insert(name.to_string(), node);
        self
    }

    /// Enable or disable error mode for testing error handling
    pub fn set_error_mode(&self, enabled: bool) {
        self.error_mode.store(enabled, Ordering::SeqCst);
    }

    /// Number of `get_node` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NodeRegistry for MockNodeRegistry {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Report<NodeLookupError>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.error_mode.load(Ordering::SeqCst) {
            return Err(Report::new(NodeLookupError::ReadFailed {
                node: name.to_string(),
            })
            .attach_printable("mock registry in error mode"));
        }
        Ok(lock(&self.nodes).get(name).cloned())
    }
}

/// A write received by [`MockPodGateway`].
#[derive(Debug, Clone)]
pub enum Commit {
    Update(InitializingPod),
    Patch { pod: PodRef, patch: PodPatch },
}

/// Pod store applying updates and patches in memory.
#[derive(Default)]
pub struct MockPodGateway {
    pods: Mutex<BTreeMap<PodRef, InitializingPod>>,
    commits: Mutex<Vec<Commit>>,
    error_mode: AtomicBool,
}

impl MockPodGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pod: InitializingPod) {
        lock(&self.pods).insert(pod.pod_ref(), pod);
    }

    pub fn get(&self, pod: &PodRef) -> Option<InitializingPod> {
        lock(&self.pods).get(pod).cloned()
    }

    /// Successful writes, oldest first.
    pub fn commits(&self) -> Vec<Commit> {
        lock(&self.commits).clone()
    }

    /// Reject every write while enabled.
    pub fn set_error_mode(&self, enabled: bool) {
        self.error_mode.store(enabled, Ordering::SeqCst);
    }

    fn patched(
        &self,
        pod: &PodRef,
        patch: &PodPatch,
    ) -> Result<InitializingPod, Report<CommitError>> {
        let rejected = || CommitError::PatchRejected { pod: pod.clone() };

        let current = self
            .get(pod)
            .ok_or_else(|| Report::new(rejected()).attach_printable("pod not found"))?;
        let mut doc = serde_json::to_value(&current).change_context_lazy(rejected)?;

        match patch {
            PodPatch::Json(patch) => {
                json_patch::patch(&mut doc, patch).change_context_lazy(rejected)?;
            }
            PodPatch::Strategic(patch) => merge_strategic(&mut doc, patch),
        }

        serde_json::from_value(doc).change_context_lazy(rejected)
    }
}

#[async_trait::async_trait]
impl PodGateway for MockPodGateway {
    async fn update(&self, pod: &InitializingPod) -> Result<InitializingPod, Report<CommitError>> {
        if self.error_mode.load(Ordering::SeqCst) {
            return Err(Report::new(CommitError::UpdateRejected { pod: pod.pod_ref() }));
        }
        self.insert(pod.clone());
        lock(&self.commits).push(Commit::Update(pod.clone()));
        Ok(pod.clone())
    }

    async fn apply_patch(
        &self,
        pod: &PodRef,
        patch: &PodPatch,
    ) -> Result<InitializingPod, Report<CommitError>> {
        if self.error_mode.load(Ordering::SeqCst) {
            return Err(Report::new(CommitError::PatchRejected { pod: pod.clone() }));
        }
        let patched = self.patched(pod, patch)?;
        self.insert(patched.clone());
        lock(&self.commits).push(Commit::Patch {
            pod: pod.clone(),
            patch: patch.clone(),
        });
        Ok(patched)
    }
}

/// Strategic merge of the subset used by pod patches: `null` removes a field, objects
/// merge recursively, lists merge entries by `name` and honour `"$patch": "delete"`.
fn merge_strategic(target: &mut Value, patch: &Value) {
    let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) else {
        return;
    };

    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(_) => {
                let entry = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Default::default()));
                merge_strategic(entry, value);
            }
            Value::Array(items) => {
                let entry = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                merge_named_list(entry, items);
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

fn merge_named_list(target: &mut Value, items: &[Value]) {
    let Some(list) = target.as_array_mut() else {
        return;
    };

    for item in items {
        let position = item
            .get("name")
            .and_then(|name| list.iter().position(|e| e.get("name") == Some(name)));
        let delete = item.get("$patch").and_then(Value::as_str) == Some("delete");

        match (position, delete) {
            (Some(index), true) => {
                list.remove(index);
            }
            (None, true) => {}
            (Some(index), false) => merge_strategic(&mut list[index], item),
            (None, false) => list.push(item.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn strategic_merge_by_name() {
        let mut doc = json!({
            "metadata": { "initializers": { "pending": [{ "name": "a" }, { "name": "b" }] } },
            "spec": { "containers": [
                { "name": "A", "image": "A" },
                { "name": "B", "image": "B" }
            ] }
        });

        merge_strategic(
            &mut doc,
            &json!({
                "metadata": { "initializers": { "pending": [{ "$patch": "delete", "name": "a" }] } },
                "spec": { "containers": [{ "name": "B", "image": "arm_B" }] }
            }),
        );

        assert_eq!(
            doc,
            json!({
                "metadata": { "initializers": { "pending": [{ "name": "b" }] } },
                "spec": { "containers": [
                    { "name": "A", "image": "A" },
                    { "name": "B", "image": "arm_B" }
                ] }
            })
        );
    }

    #[test]
    fn strategic_null_removes_field() {
        let mut doc = json!({ "metadata": { "name": "web", "initializers": { "pending": [] } } });
        merge_strategic(&mut doc, &json!({ "metadata": { "initializers": null } }));
        assert_eq!(doc, json!({ "metadata": { "name": "web" } }));
    }
}
