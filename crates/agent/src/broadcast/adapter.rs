//! Phase-tracked handle around a [`BroadcastEngine`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::{BroadcastEngine, BroadcastError, EngineError};

/// Where the engine is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Initialized, not in a channel.
    Initialized,
    /// Publishing to a channel.
    Joined,
    /// Left the channel; may join again.
    Left,
    /// Released. Every further call is a no-op.
    Destroyed,
}

struct Inner {
    engine: Option<Box<dyn BroadcastEngine>>,
    phase: EnginePhase,
    channel: Option<String>,
}

/// Shared handle to one engine. Clones refer to the same engine.
#[derive(Clone)]
pub struct BroadcastHandle {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for BroadcastHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("BroadcastHandle")
            .field("phase", &inner.phase)
            .field("channel", &inner.channel)
            .finish()
    }
}

impl BroadcastHandle {
    /// Initializes `engine` with the application credential.
    ///
    /// On failure the engine is destroyed before returning.
    pub fn initialize(
        mut engine: Box<dyn BroadcastEngine>,
        app_credential: &str,
    ) -> Result<Self, BroadcastError> {
        if let Err(e) = engine.initialize(app_credential) {
            engine.destroy();
            return Err(BroadcastError::Init(e));
        }
        debug!("Broadcast engine initialized");

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                engine: Some(engine),
                phase: EnginePhase::Initialized,
                channel: None,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> EnginePhase {
        self.lock().phase
    }

    /// Channel currently joined, if any.
    pub fn channel(&self) -> Option<String> {
        self.lock().channel.clone()
    }

    /// Publishes camera and microphone to `channel_key` as broadcaster.
    ///
    /// Joining the channel already joined is a no-op.
    pub fn join_channel(&self, channel_key: &str) -> Result<(), BroadcastError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match inner.phase {
            EnginePhase::Destroyed => return Err(BroadcastError::Destroyed),
            EnginePhase::Joined if inner.channel.as_deref() == Some(channel_key) => return Ok(()),
            _ => {}
        }
        let rejoin = inner.phase == EnginePhase::Joined;

        let Some(engine) = inner.engine.as_mut() else {
            return Err(BroadcastError::Destroyed);
        };

        let join_err = |source: EngineError| BroadcastError::Join {
            channel: channel_key.to_string(),
            source,
        };

        if rejoin {
            engine.leave_channel().map_err(join_err)?;
        }
        engine.set_broadcaster_role().map_err(join_err)?;
        engine.enable_video().map_err(join_err)?;
        engine.enable_audio().map_err(join_err)?;
        engine.join_channel(channel_key, None).map_err(join_err)?;

        inner.phase = EnginePhase::Joined;
        inner.channel = Some(channel_key.to_string());
        info!(channel = %channel_key, "Joined broadcast channel");
        Ok(())
    }

    /// Toggles front/rear camera. Returns `false` without touching the
    /// engine when not in a channel.
    pub fn switch_camera(&self) -> Result<bool, BroadcastError> {
        let mut inner = self.lock();
        if inner.phase != EnginePhase::Joined {
            debug!(phase = ?inner.phase, "Ignoring camera switch outside a channel");
            return Ok(false);
        }
        let Some(engine) = inner.engine.as_mut() else {
            return Ok(false);
        };
        engine.switch_camera().map_err(BroadcastError::Engine)?;
        info!("Switched camera");
        Ok(true)
    }

    /// Leaves the channel. A no-op unless joined.
    pub fn leave(&self) -> Result<(), BroadcastError> {
        let mut inner = self.lock();
        Self::leave_locked(&mut inner)
    }

    fn leave_locked(inner: &mut Inner) -> Result<(), BroadcastError> {
        if inner.phase != EnginePhase::Joined {
            return Ok(());
        }
        inner.phase = EnginePhase::Left;
        let channel = inner.channel.take();
        let result = match inner.engine.as_mut() {
            Some(engine) => engine.leave_channel().map_err(BroadcastError::Engine),
            None => Ok(()),
        };
        info!(channel = ?channel, "Left broadcast channel");
        result
    }

    /// Leaves if still joined, then releases the engine. Idempotent.
    pub fn destroy(&self) {
        let mut inner = self.lock();
        if inner.phase == EnginePhase::Destroyed {
            return;
        }
        if let Err(e) = Self::leave_locked(&mut inner) {
            warn!("Leave during destroy failed: {}", e);
        }
        if let Some(mut engine) = inner.engine.take() {
            engine.destroy();
        }
        inner.phase = EnginePhase::Destroyed;
        info!("Broadcast engine destroyed");
    }
}
