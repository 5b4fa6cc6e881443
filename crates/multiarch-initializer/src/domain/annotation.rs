use core::error::Error;
use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use serde::Serialize;

/// Annotation value could not be decoded into an architecture table.
#[derive(Debug, derive_more::Display)]
#[display("Malformed multiarch annotation: {raw}")]
pub struct DecodeError {
    pub raw: String,
}

impl Error for DecodeError {}

/// Architecture-specific images declared on a pod.
///
/// Outer keys are node architectures as reported by the kubelet (`amd64`, `arm`,
/// `arm64`, ...), inner keys are container names, values are image references.
/// Keys are matched exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationTable(BTreeMap<String, BTreeMap<String, String>>);

impl AnnotationTable {
    /// Decode the JSON annotation value, e.g.
    /// `{"arm":{"worker":"myrepo/worker:arm"}}`.
    ///
    /// # Errors
    ///
    /// - [`DecodeError`] if the value is not JSON or not a two-level string map
    pub fn decode(raw: &str) -> Result<Self, Report<DecodeError>> {
        serde_json::from_str(raw).change_context(DecodeError {
            raw: raw.to_string(),
        })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn has_architecture(&self, architecture: &str) -> bool {
        self.0.contains_key(architecture)
    }

    pub fn image_for(&self, architecture: &str, container: &str) -> Option<&str> {
        self.0
            .get(architecture)
            .and_then(|images| images.get(container))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(
        &mut self,
        architecture: impl Into<String>,
        container: impl Into<String>,
        image: impl Into<String>,
    ) {
        self.0
            .entry(architecture.into())
            .or_default()
            .insert(container.into(), image.into());
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn decode_two_level_map() {
        let table = AnnotationTable::decode(
            r#"{"arm":{"worker":"myrepo/worker:arm"},"aarch64":{"worker":"myrepo/worker:aarch64"}}"#,
        )
        .expect("valid annotation");

        assert_eq!(table.image_for("arm", "worker"), Some("myrepo/worker:arm"));
        assert_eq!(
            table.image_for("aarch64", "worker"),
            Some("myrepo/worker:aarch64")
        );
        assert_eq!(table.image_for("arm", "sidecar"), None);
        assert!(!table.has_architecture("amd64"));
    }

    #[test]
    fn decode_is_case_sensitive() {
        let table = AnnotationTable::decode(r#"{"ARM":{"worker":"w:arm"}}"#).unwrap();
        assert!(!table.has_architecture("arm"));
        assert_eq!(table.image_for("arm", "worker"), None);
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let err = AnnotationTable::decode("not json").unwrap_err();
        assert_eq!(err.current_context().raw, "not json");
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        assert!(AnnotationTable::decode(r#"{"arm":"worker:arm"}"#).is_err());
        assert!(AnnotationTable::decode(r#"{"arm":{"worker":1}}"#).is_err());
        assert!(AnnotationTable::decode(r#"["arm"]"#).is_err());
    }

    #[test]
    fn decode_rejects_empty_value() {
        assert!(AnnotationTable::decode("").is_err());
    }

    #[test]
    fn encode_then_decode_is_stable() {
        let mut table = AnnotationTable::default();
        table.insert("arm", "B", "arm_B");
        table.insert("arm", "A", "arm_A");

        let encoded = table.encode().unwrap();
        assert_eq!(encoded, r#"{"arm":{"A":"arm_A","B":"arm_B"}}"#);
        assert_eq!(AnnotationTable::decode(&encoded).unwrap(), table);
    }
}
