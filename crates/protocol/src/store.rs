//! Document-store wire messages.
//!
//! The store is addressed by `collection/id` pairs. REST bodies and realtime
//! frames are plain JSON so any backend that speaks this shape can be used.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentPath {
    pub collection: String,
    pub id: String,
}

impl DocumentPath {
    /// Creates a path, rejecting empty segments and segments containing `/`.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        let id = id.into();
        validate_segment("collection", &collection)?;
        validate_segment("id", &id)?;
        Ok(Self { collection, id })
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

fn validate_segment(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ProtocolError::InvalidPath(format!("{name} is empty")));
    }
    if value.contains('/') {
        return Err(ProtocolError::InvalidPath(format!(
            "{name} contains '/': {value}"
        )));
    }
    Ok(())
}

/// State of a document at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Whether the document exists.
    pub exists: bool,
    /// Document body, absent when the document does not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Store-assigned counter, bumped on every write to the document.
    #[serde(default)]
    pub version: u64,
}

impl DocumentSnapshot {
    /// Snapshot of a document that does not exist.
    pub fn missing(version: u64) -> Self {
        Self {
            exists: false,
            data: None,
            version,
        }
    }

    /// Snapshot of an existing document.
    pub fn present(data: Value, version: u64) -> Self {
        Self {
            exists: true,
            data: Some(data),
            version,
        }
    }

    /// Reads a top-level field of the document body.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(name))
    }
}

/// Frames pushed over a realtime watch connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchMessage {
    /// Current state of the watched document.
    Snapshot(DocumentSnapshot),
    /// The backend reported a problem with the watch.
    Error { message: String },
}

impl WatchMessage {
    /// Parses a text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes to a text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Body of a merge update (`PATCH`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub fields: Map<String, Value>,
}

/// Body of a conditional single-field write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareAndSetRequest {
    pub field: String,
    pub expected: Value,
    pub value: Value,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareAndSetResponse {
    /// `true` when the field held `expected` and was overwritten.
    pub applied: bool,
}

/// Response to a write, carrying the new document version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_path_display() {
        let path = DocumentPath::new("commands", "u1").unwrap();
        assert_eq!(path.to_string(), "commands/u1");
    }

    #[test]
    fn test_document_path_rejects_empty_segments() {
        assert!(matches!(
            DocumentPath::new("", "u1"),
            Err(ProtocolError::InvalidPath(_))
        ));
        assert!(matches!(
            DocumentPath::new("commands", "  "),
            Err(ProtocolError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_document_path_rejects_separator() {
        let err = DocumentPath::new("commands", "a/b").unwrap_err();
        assert!(err.to_string().contains("a/b"));
    }

    #[test]
    fn test_snapshot_wire_format() {
        let msg = WatchMessage::Snapshot(DocumentSnapshot::present(json!({"action": "x"}), 3));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "snapshot", "exists": true, "data": {"action": "x"}, "version": 3})
        );
    }

    #[test]
    fn test_missing_snapshot_omits_data() {
        let msg = WatchMessage::Snapshot(DocumentSnapshot::missing(0));
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "snapshot", "exists": false, "version": 0}));
    }

    #[test]
    fn test_error_frame_parses() {
        let msg = WatchMessage::from_json(r#"{"type":"error","message":"denied"}"#).unwrap();
        assert_eq!(
            msg,
            WatchMessage::Error {
                message: "denied".to_string()
            }
        );
    }

    #[test]
    fn test_garbage_frame_is_deserialization_error() {
        let err = WatchMessage::from_json("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_snapshot_field_lookup() {
        let snap = DocumentSnapshot::present(json!({"action": "switch_camera"}), 1);
        assert_eq!(snap.field("action"), Some(&json!("switch_camera")));
        assert_eq!(snap.field("other"), None);
        assert_eq!(DocumentSnapshot::missing(1).field("action"), None);
    }
}
