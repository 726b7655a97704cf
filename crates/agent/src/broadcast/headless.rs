//! Engine that tracks calls without capturing media.
//!
//! Used when no media SDK is linked (desktop runs, CI) and by tests, which
//! inspect it through an [`EngineProbe`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{BroadcastEngine, EngineError, EngineFactory};

/// Which camera is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CameraFacing {
    #[default]
    Front,
    Rear,
}

impl CameraFacing {
    fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Rear,
            Self::Rear => Self::Front,
        }
    }
}

/// Everything the headless engine has been asked to do.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub credential: Option<String>,
    pub broadcaster: bool,
    pub video: bool,
    pub audio: bool,
    pub channel: Option<String>,
    pub join_token: Option<String>,
    pub facing: CameraFacing,
    pub engines_created: u32,
    pub joins: u32,
    pub leaves: u32,
    pub switches: u32,
    pub destroys: u32,
    pub destroyed: bool,
    pub switched_after_destroy: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: EngineState,
    fail_init: Option<String>,
    fail_join: Option<String>,
}

/// Read and fault-injection access to headless engines.
///
/// Every engine created from the same probe reports into it.
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    shared: Arc<Mutex<Shared>>,
}

impl EngineProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> EngineState {
        self.lock().state.clone()
    }

    /// Makes every later `initialize` fail with `message`.
    pub fn fail_init(&self, message: &str) {
        self.lock().fail_init = Some(message.to_string());
    }

    /// Makes every later `join_channel` fail with `message`.
    pub fn fail_join(&self, message: &str) {
        self.lock().fail_join = Some(message.to_string());
    }

    /// Clears injected failures.
    pub fn heal(&self) {
        let mut shared = self.lock();
        shared.fail_init = None;
        shared.fail_join = None;
    }
}

#[derive(Debug)]
pub struct HeadlessEngine {
    probe: EngineProbe,
    destroyed: bool,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::with_probe(EngineProbe::new())
    }

    pub fn with_probe(probe: EngineProbe) -> Self {
        probe.lock().state.engines_created += 1;
        Self {
            probe,
            destroyed: false,
        }
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastEngine for HeadlessEngine {
    fn initialize(&mut self, app_credential: &str) -> Result<(), EngineError> {
        let mut shared = self.probe.lock();
        if let Some(message) = &shared.fail_init {
            return Err(EngineError::new(-1, message.clone()));
        }
        shared.state.credential = Some(app_credential.to_string());
        shared.state.destroyed = false;
        Ok(())
    }

    fn set_broadcaster_role(&mut self) -> Result<(), EngineError> {
        self.probe.lock().state.broadcaster = true;
        Ok(())
    }

    fn enable_video(&mut self) -> Result<(), EngineError> {
        self.probe.lock().state.video = true;
        Ok(())
    }

    fn enable_audio(&mut self) -> Result<(), EngineError> {
        self.probe.lock().state.audio = true;
        Ok(())
    }

    fn join_channel(&mut self, channel: &str, token: Option<&str>) -> Result<(), EngineError> {
        let mut shared = self.probe.lock();
        if let Some(message) = &shared.fail_join {
            return Err(EngineError::new(17, message.clone()));
        }
        shared.state.channel = Some(channel.to_string());
        shared.state.join_token = token.map(str::to_string);
        shared.state.joins += 1;
        debug!(%channel, "Headless engine joined");
        Ok(())
    }

    fn switch_camera(&mut self) -> Result<(), EngineError> {
        let mut shared = self.probe.lock();
        if self.destroyed {
            shared.state.switched_after_destroy = true;
        }
        shared.state.facing = shared.state.facing.flipped();
        shared.state.switches += 1;
        Ok(())
    }

    fn leave_channel(&mut self) -> Result<(), EngineError> {
        let mut shared = self.probe.lock();
        shared.state.channel = None;
        shared.state.leaves += 1;
        Ok(())
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        let mut shared = self.probe.lock();
        shared.state.destroyed = true;
        shared.state.destroys += 1;
    }
}

/// Factory producing headless engines that all report into `probe`.
pub fn headless_factory(probe: EngineProbe) -> impl EngineFactory {
    move || -> Result<Box<dyn BroadcastEngine>, EngineError> {
        Ok(Box::new(HeadlessEngine::with_probe(probe.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_shares_probe() {
        let probe = EngineProbe::new();
        let factory = headless_factory(probe.clone());

        let mut a = factory.create().unwrap();
        let _b = factory.create().unwrap();
        a.initialize("app").unwrap();
        a.join_channel("u1", None).unwrap();

        let state = probe.state();
        assert_eq!(state.engines_created, 2);
        assert_eq!(state.joins, 1);
    }

    #[test]
    fn test_injected_failures_and_heal() {
        let mut engine = HeadlessEngine::new();
        let probe = engine.probe();

        probe.fail_join("nope");
        assert_eq!(
            engine.join_channel("u1", None).unwrap_err().message,
            "nope"
        );
        probe.heal();
        assert!(engine.join_channel("u1", None).is_ok());
    }

    #[test]
    fn test_switch_flips_facing() {
        let mut engine = HeadlessEngine::new();
        engine.switch_camera().unwrap();
        assert_eq!(engine.probe().state().facing, CameraFacing::Rear);
    }
}
