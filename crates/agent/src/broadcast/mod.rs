//! Broadcast engine adapter.
//!
//! The media engine is an external SDK. [`BroadcastEngine`] is the narrow
//! surface the agent needs from it; [`BroadcastHandle`] wraps one engine with
//! the phase tracking that makes leave/destroy idempotent and camera switches
//! safe to race with teardown.

pub mod adapter;
pub mod headless;

use thiserror::Error;

pub use adapter::{BroadcastHandle, EnginePhase};
pub use headless::{headless_factory, CameraFacing, EngineProbe, EngineState, HeadlessEngine};

/// Error reported by an engine call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors from [`BroadcastHandle`] operations.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("engine initialization failed: {0}")]
    Init(#[source] EngineError),

    #[error("failed to join channel {channel}: {source}")]
    Join {
        channel: String,
        #[source]
        source: EngineError,
    },

    #[error("engine has been destroyed")]
    Destroyed,

    #[error("engine call failed: {0}")]
    Engine(#[source] EngineError),
}

/// The media engine collaborator. Calls are synchronous.
pub trait BroadcastEngine: Send {
    fn initialize(&mut self, app_credential: &str) -> Result<(), EngineError>;
    fn set_broadcaster_role(&mut self) -> Result<(), EngineError>;
    fn enable_video(&mut self) -> Result<(), EngineError>;
    fn enable_audio(&mut self) -> Result<(), EngineError>;
    /// Joins `channel`. `token` is `None` for anonymous joins.
    fn join_channel(&mut self, channel: &str, token: Option<&str>) -> Result<(), EngineError>;
    fn switch_camera(&mut self) -> Result<(), EngineError>;
    fn leave_channel(&mut self) -> Result<(), EngineError>;
    /// Releases the engine. Must not fail.
    fn destroy(&mut self);
}

/// Produces one engine per session.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn BroadcastEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn BroadcastEngine>, EngineError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn BroadcastEngine>, EngineError> {
        self()
    }
}
