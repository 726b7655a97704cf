//! Records exchanged with the remote document store.
//!
//! Two documents are keyed by the user id:
//!
//! - the **presence record**, written while a session is live so a viewer can
//!   discover the broadcast and its file-share URL;
//! - the **command record**, a one-way mailbox a remote controller writes an
//!   `action` into and the agent clears after handling it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Display name used when the host does not provide one.
pub const DEFAULT_DISPLAY_NAME: &str = "Unknown";

/// `file_url` value published when the file server is not running.
pub const UNAVAILABLE_URL: &str = "Unavailable";

/// Wire value of the `switch_camera` action.
pub const ACTION_SWITCH_CAMERA: &str = "switch_camera";

/// Status field of a presence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// The user is currently broadcasting.
    Live,
}

/// "I am live" document published for the duration of a session.
///
/// Field names follow the viewers already deployed against the store, so the
/// display name travels as `email`. `displayName` is accepted on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Human readable name of the broadcaster.
    #[serde(rename = "email", alias = "displayName")]
    pub display_name: String,
    /// Always `live` while the record exists.
    pub status: PresenceStatus,
    /// URL of the file share, or [`UNAVAILABLE_URL`].
    pub file_url: String,
    /// Publication time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl PresenceRecord {
    /// Creates a live presence record.
    pub fn live(display_name: impl Into<String>, file_url: impl Into<String>, timestamp: i64) -> Self {
        Self {
            display_name: display_name.into(),
            status: PresenceStatus::Live,
            file_url: file_url.into(),
            timestamp,
        }
    }

    /// Converts the record into a JSON document body.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parses a record from a JSON document body.
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::deserialize(value).map_err(|e| ProtocolError::InvalidRecord(e.to_string()))
    }
}

/// Mailbox document a remote controller writes actions into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Pending action, empty when there is nothing to do.
    #[serde(default)]
    pub action: String,
}

impl CommandRecord {
    /// Parses a record from a JSON document body.
    ///
    /// A missing `action` field reads as empty.
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::deserialize(value).map_err(|e| ProtocolError::InvalidRecord(e.to_string()))
    }

    /// Returns the pending action, if any.
    pub fn pending(&self) -> Option<Action> {
        Action::parse(&self.action)
    }
}

/// A remote control action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Toggle between the front and rear camera.
    SwitchCamera,
    /// An action this agent does not understand.
    Unknown(String),
}

impl Action {
    /// Parses a wire value. Empty strings mean "no action".
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "" => None,
            ACTION_SWITCH_CAMERA => Some(Action::SwitchCamera),
            other => Some(Action::Unknown(other.to_string())),
        }
    }

    /// Returns the wire value.
    pub fn as_str(&self) -> &str {
        match self {
            Action::SwitchCamera => ACTION_SWITCH_CAMERA,
            Action::Unknown(raw) => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_presence_wire_shape() {
        let record = PresenceRecord::live("Ann", "http://10.0.0.5:8080/", 1_704_067_200_000);
        let value = record.to_value().unwrap();

        assert_eq!(
            value,
            json!({
                "email": "Ann",
                "status": "live",
                "file_url": "http://10.0.0.5:8080/",
                "timestamp": 1_704_067_200_000i64,
            })
        );
    }

    #[test]
    fn test_presence_accepts_display_name_alias() {
        let value = json!({
            "displayName": "Bo",
            "status": "live",
            "file_url": "Unavailable",
            "timestamp": 1,
        });
        let record = PresenceRecord::from_value(&value).unwrap();
        assert_eq!(record.display_name, "Bo");
        assert_eq!(record.file_url, UNAVAILABLE_URL);
    }

    #[test]
    fn test_presence_rejects_unknown_status() {
        let value = json!({
            "email": "Ann",
            "status": "offline",
            "file_url": "x",
            "timestamp": 1,
        });
        let err = PresenceRecord::from_value(&value).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRecord(_)));
    }

    #[test]
    fn test_command_missing_action_is_empty() {
        let record = CommandRecord::from_value(&json!({})).unwrap();
        assert_eq!(record.action, "");
        assert_eq!(record.pending(), None);
    }

    #[test]
    fn test_command_switch_camera() {
        let record = CommandRecord::from_value(&json!({"action": "switch_camera"})).unwrap();
        assert_eq!(record.pending(), Some(Action::SwitchCamera));
    }

    #[test]
    fn test_command_unknown_action_is_preserved() {
        let record = CommandRecord::from_value(&json!({"action": "zoom_in"})).unwrap();
        assert_eq!(record.pending(), Some(Action::Unknown("zoom_in".to_string())));
        assert_eq!(record.pending().unwrap().as_str(), "zoom_in");
    }

    #[test]
    fn test_command_non_string_action_is_invalid() {
        let err = CommandRecord::from_value(&json!({"action": 7})).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRecord(_)));
    }

    #[test]
    fn test_action_parse_is_exact() {
        assert_eq!(Action::parse(""), None);
        assert_eq!(Action::parse("switch_camera"), Some(Action::SwitchCamera));
        assert_eq!(
            Action::parse("SWITCH_CAMERA"),
            Some(Action::Unknown("SWITCH_CAMERA".to_string()))
        );
    }
}
