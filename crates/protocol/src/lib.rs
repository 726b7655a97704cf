//! # LiveShare Protocol Library
//!
//! Wire definitions shared by the LiveShare agent and anything that talks to
//! the same document store (viewers, remote controllers, test backends).
//!
//! ## Overview
//!
//! - **Records**: the presence record a live agent publishes and the command
//!   record a controller writes actions into
//! - **Store messages**: document paths, snapshots, realtime watch frames and
//!   REST request/response bodies
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Action, CommandRecord, PresenceRecord};
//!
//! let presence = PresenceRecord::live("Ann", "http://10.0.0.5:8080/", 0);
//! let body = presence.to_value().unwrap();
//! assert_eq!(body["status"], "live");
//!
//! let command = CommandRecord { action: "switch_camera".into() };
//! assert_eq!(command.pending(), Some(Action::SwitchCamera));
//! ```
//!
//! ## Modules
//!
//! - [`records`]: Presence and command records
//! - [`store`]: Document-store wire messages
//! - [`error`]: Error types

pub mod error;
pub mod records;
pub mod store;

pub use error::{ProtocolError, Result};
pub use records::{
    Action, CommandRecord, PresenceRecord, PresenceStatus, ACTION_SWITCH_CAMERA,
    DEFAULT_DISPLAY_NAME, UNAVAILABLE_URL,
};
pub use store::{
    CompareAndSetRequest, CompareAndSetResponse, DocumentPath, DocumentSnapshot, PatchRequest,
    WatchMessage, WriteResponse,
};
