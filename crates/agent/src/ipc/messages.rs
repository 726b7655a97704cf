//! IPC message types.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostic;
use crate::lifecycle::{SessionInfo, SessionState};

/// Requests sent from the CLI to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the agent is alive.
    Ping,
    /// Get the session state.
    Status,
    /// Stop the session and exit.
    Stop,
    /// Fetch recorded subsystem failures.
    Diagnostics,
}

/// Responses sent from the agent to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    Pong,
    Status {
        state: SessionState,
        /// Seconds since the agent process started.
        uptime_secs: u64,
        session: Option<SessionInfo>,
    },
    /// The agent is stopping and will exit.
    Stopping,
    Diagnostics {
        entries: Vec<Diagnostic>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticKind, Subsystem};

    #[test]
    fn test_unit_requests_serialize_as_strings() {
        for (request, expected) in [
            (IpcRequest::Ping, r#""Ping""#),
            (IpcRequest::Status, r#""Status""#),
            (IpcRequest::Stop, r#""Stop""#),
            (IpcRequest::Diagnostics, r#""Diagnostics""#),
        ] {
            assert_eq!(serde_json::to_string(&request).unwrap(), expected);
        }
    }

    #[test]
    fn test_status_without_session() {
        let response = IpcResponse::Status {
            state: SessionState::Idle,
            uptime_secs: 5,
            session: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""state":"idle""#));

        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_diagnostics_response() {
        let response = IpcResponse::Diagnostics {
            entries: vec![Diagnostic {
                subsystem: Subsystem::FileServer,
                kind: DiagnosticKind::BindFailure,
                message: "address in use".to_string(),
                at_millis: 1_700_000_000_000,
            }],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("bind_failure"));
        assert!(json.contains("file_server"));

        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_error_response() {
        let response = IpcResponse::Error {
            message: "bad request".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"Error":{"message":"bad request"}}"#);
    }
}
