//! Bounded log of subsystem failures.
//!
//! Startup and teardown never abort on a subsystem error; instead the error is
//! recorded here so hosts can see what degraded. Every record is also emitted
//! through `tracing`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Maximum number of entries kept by default.
pub const DEFAULT_CAPACITY: usize = 256;

/// Agent subsystems that can fail independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Identity,
    FileServer,
    Broadcast,
    Presence,
    Commands,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Identity => "identity",
            Subsystem::FileServer => "file_server",
            Subsystem::Broadcast => "broadcast",
            Subsystem::Presence => "presence",
            Subsystem::Commands => "commands",
        };
        f.write_str(name)
    }
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ResolutionFailure,
    BindFailure,
    EngineInitFailure,
    JoinFailure,
    PresenceFailure,
    SubscriptionFailure,
    CommandFailure,
    DuplicateCommandDelivery,
    TeardownFailure,
}

/// A single recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub subsystem: Subsystem,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub at_millis: i64,
}

/// Shared ring buffer of diagnostics. Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    entries: Arc<Mutex<VecDeque<Diagnostic>>>,
    capacity: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates an empty log holding at most [`DEFAULT_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty log holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Records a failure, evicting the oldest entry when full.
    pub fn record(&self, subsystem: Subsystem, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%subsystem, ?kind, "{}", message);

        let entry = Diagnostic {
            subsystem,
            kind,
            message,
            at_millis: now_millis(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Returns all entries, oldest first.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }

    /// Number of entries with the given kind.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().filter(|d| d.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let diags = Diagnostics::new();
        assert!(diags.is_empty());

        diags.record(Subsystem::FileServer, DiagnosticKind::BindFailure, "port in use");
        diags.record(Subsystem::Presence, DiagnosticKind::PresenceFailure, "offline");

        let entries = diags.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].subsystem, Subsystem::FileServer);
        assert_eq!(entries[0].message, "port in use");
        assert_eq!(entries[1].kind, DiagnosticKind::PresenceFailure);
        assert!(entries[0].at_millis > 0);
    }

    #[test]
    fn test_bounded_evicts_oldest() {
        let diags = Diagnostics::with_capacity(3);
        for i in 0..5 {
            diags.record(
                Subsystem::Commands,
                DiagnosticKind::CommandFailure,
                format!("failure {i}"),
            );
        }

        let entries = diags.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "failure 2");
        assert_eq!(entries[2].message, "failure 4");
    }

    #[test]
    fn test_default_capacity() {
        let diags = Diagnostics::default();
        assert_eq!(diags.capacity(), DEFAULT_CAPACITY);
        for _ in 0..(DEFAULT_CAPACITY + 10) {
            diags.record(Subsystem::Identity, DiagnosticKind::ResolutionFailure, "x");
        }
        assert_eq!(diags.len(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_clones_share_entries() {
        let diags = Diagnostics::new();
        let other = diags.clone();
        other.record(Subsystem::Broadcast, DiagnosticKind::JoinFailure, "rejected");
        assert_eq!(diags.count(DiagnosticKind::JoinFailure), 1);
        assert_eq!(diags.count(DiagnosticKind::BindFailure), 0);
    }

    #[test]
    fn test_serialized_shape() {
        let entry = Diagnostic {
            subsystem: Subsystem::FileServer,
            kind: DiagnosticKind::DuplicateCommandDelivery,
            message: "m".to_string(),
            at_millis: 5,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["subsystem"], "file_server");
        assert_eq!(json["kind"], "duplicate_command_delivery");
    }

    #[test]
    fn test_subsystem_display() {
        assert_eq!(Subsystem::FileServer.to_string(), "file_server");
        assert_eq!(Subsystem::Commands.to_string(), "commands");
    }
}
