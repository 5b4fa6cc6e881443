//! Pod representation that keeps the `metadata.initializers` block.
//!
//! `k8s_openapi::api::core::v1::Pod` drops `metadata.initializers` on deserialization, so the
//! initializer works on [`InitializingPod`], which flattens the regular [`ObjectMeta`] next to
//! an optional [`Initializers`] block and otherwise reuses the k8s-openapi pod types.

use std::borrow::Cow;
use std::fmt;

use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use k8s_openapi::NamespaceResourceScope;
use kube::core::TypeMeta;
use kube::Resource;
use serde::Deserialize;
use serde::Serialize;

/// A single pending initializer entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
}

impl Initializer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Ordered queue of initializers that still have to run on an object.
///
/// An object with no initializers left carries no `Initializers` at all; a present block
/// with an empty `pending` list is a different state and is never produced here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Initializers {
    #[serde(default)]
    pub pending: Vec<Initializer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Status>,
}

impl Initializers {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: names.into_iter().map(Initializer::new).collect(),
            result: None,
        }
    }

    pub fn head(&self) -> Option<&str> {
        self.pending.first().map(|i| i.name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|i| i.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodMetadata {
    #[serde(flatten)]
    pub object: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializers: Option<Initializers>,
}

/// A core/v1 pod as seen before initialization has finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializingPod {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,
    #[serde(default)]
    pub metadata: PodMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

impl InitializingPod {
    pub fn new(namespace: &str, name: &str, spec: PodSpec) -> Self {
        Self {
            types: Some(TypeMeta {
                api_version: <Pod as k8s_openapi::Resource>::API_VERSION.to_string(),
                kind: <Pod as k8s_openapi::Resource>::KIND.to_string(),
            }),
            metadata: PodMetadata {
                object: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                initializers: None,
            },
            spec: Some(spec),
            status: None,
        }
    }

    pub fn pod_ref(&self) -> PodRef {
        PodRef {
            namespace: self
                .metadata
                .object
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            name: self
                .metadata
                .object
                .name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Value of annotation `key`, `None` when the key is not set at all.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .object
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn node_name(&self) -> Option<&str> {
        self.spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .filter(|n| !n.is_empty())
    }

    pub fn containers(&self) -> &[Container] {
        self.spec
            .as_ref()
            .map(|s| s.containers.as_slice())
            .unwrap_or_default()
    }

    pub fn init_containers(&self) -> &[Container] {
        self.spec
            .as_ref()
            .and_then(|s| s.init_containers.as_deref())
            .unwrap_or_default()
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.object.deletion_timestamp.is_some()
    }
}

impl Resource for InitializingPod {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(<Pod as k8s_openapi::Resource>::KIND)
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(<Pod as k8s_openapi::Resource>::GROUP)
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(<Pod as k8s_openapi::Resource>::VERSION)
    }

    fn api_version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(<Pod as k8s_openapi::Resource>::API_VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(<Pod as k8s_openapi::Resource>::URL_PATH_SEGMENT)
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata.object
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata.object
    }
}

/// Namespace and name of a pod.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
