//! Agent lifecycle.
//!
//! [`Agent`] owns at most one session at a time. Starting a session brings up
//! the file server, the broadcast, presence and the command channel in a fixed
//! order; stopping releases them in reverse. Each subsystem may fail on its
//! own, and whether that aborts the session is decided by
//! [`DegradedMode`](crate::config::DegradedMode).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use protocol::{DEFAULT_DISPLAY_NAME, UNAVAILABLE_URL};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::{BroadcastError, BroadcastHandle, EngineFactory};
use crate::commands::{CommandChannel, CommandSubscription};
use crate::config::{AccessMode, Config, DegradedMode};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Subsystem};
use crate::files::{self, generate_access_token, DirectoryBrowser, FileServer};
use crate::identity::{resolve_or_fallback, AddressSource};
use crate::indicator::{ActivityIndicator, ActivityNotice};
use crate::presence::PresencePublisher;
use crate::store::DocumentStore;

const EVENT_CAPACITY: usize = 64;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session has been started yet.
    Idle,
    /// Subsystems are being brought up.
    Starting,
    /// The session is live.
    Running,
    /// Subsystems are being released.
    Stopping,
    /// The last session ended; a new one may start.
    Stopped,
    /// Startup was aborted. Terminal.
    Failed,
}

impl SessionState {
    /// Whether `start` may begin a session from this state.
    pub fn accepts_start(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stopped)
    }

    /// Whether a session currently holds resources.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Public view of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub state: SessionState,
    /// Resolved LAN address, `0.0.0.0` when resolution failed.
    pub local_address: Ipv4Addr,
    /// `http://<address>:<port>` of the file server, if it started.
    pub server_url: Option<String>,
    /// Server URL with the access token, as published in presence.
    pub share_url: Option<String>,
    /// Subsystems that failed to start.
    pub degraded: Vec<Subsystem>,
}

/// Events emitted by the agent.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    StateChanged(SessionState),
    SessionStarted(SessionInfo),
    SubsystemFailed {
        subsystem: Subsystem,
        kind: DiagnosticKind,
        message: String,
    },
    SessionEnded { session_id: Uuid },
}

/// Result of [`Agent::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session began. Its state is `Running`, or `Stopping` when a
    /// stop arrived during startup.
    Started(SessionInfo),
    /// Nothing was done because the agent is not in a startable state.
    AlreadyActive {
        state: SessionState,
        session: Option<SessionInfo>,
    },
}

/// Result of [`Agent::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No session to stop.
    NotRunning,
    /// Startup is in progress; teardown follows it immediately.
    Queued,
    /// Teardown is already underway.
    AlreadyStopping,
    /// Teardown has been started.
    Stopping,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("user id must not be empty")]
    InvalidUserId,

    #[error("startup aborted: {0} failed to start")]
    StartupAborted(Subsystem),
}

/// External collaborators injected by the host.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DocumentStore>,
    pub engines: Arc<dyn EngineFactory>,
    pub addresses: Arc<dyn AddressSource>,
    pub indicator: Arc<dyn ActivityIndicator>,
}

/// Everything a session holds and must release.
struct Resources {
    user_id: String,
    server: Option<FileServer>,
    indicator_shown: bool,
    engine: Option<BroadcastHandle>,
    presence_attempted: bool,
    commands: Option<CommandSubscription>,
}

impl Resources {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            server: None,
            indicator_shown: false,
            engine: None,
            presence_attempted: false,
            commands: None,
        }
    }
}

struct Inner {
    config: Config,
    collaborators: Collaborators,
    presence: PresencePublisher,
    commands: CommandChannel,
    diagnostics: Diagnostics,
    state_tx: watch::Sender<SessionState>,
    event_tx: broadcast::Sender<AgentEvent>,
    session: Mutex<Option<SessionInfo>>,
    resources: Mutex<Option<Resources>>,
    stop_requested: AtomicBool,
    runtime: Mutex<Option<Handle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The background agent. Clones share the same session.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let diagnostics = Diagnostics::new();
        let presence = PresencePublisher::new(
            Arc::clone(&collaborators.store),
            config.store.presence_collection.clone(),
        );
        let commands = CommandChannel::new(
            Arc::clone(&collaborators.store),
            config.store.command_collection.clone(),
            config.commands.delivery,
            diagnostics.clone(),
        );
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                collaborators,
                presence,
                commands,
                diagnostics,
                state_tx,
                event_tx,
                session: Mutex::new(None),
                resources: Mutex::new(None),
                stop_requested: AtomicBool::new(false),
                runtime: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.inner.event_tx.subscribe()
    }

    /// The current session, if one is active.
    pub fn session(&self) -> Option<SessionInfo> {
        let mut info = lock(&self.inner.session).clone()?;
        info.state = self.state();
        Some(info)
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.diagnostics.snapshot()
    }

    /// Starts a session for `user_id`.
    ///
    /// Only one start can win: concurrent or repeated calls while a session
    /// is active return [`StartOutcome::AlreadyActive`] without side effects.
    pub async fn start(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> Result<StartOutcome, AgentError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AgentError::InvalidUserId);
        }

        let mut previous = SessionState::Idle;
        let stop_requested = &self.inner.stop_requested;
        let claimed = self.inner.state_tx.send_if_modified(|state| {
            previous = *state;
            if state.accepts_start() {
                // Cleared under the state lock: any stop that sees Starting lands after this.
                stop_requested.store(false, Ordering::SeqCst);
                *state = SessionState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            debug!(%user_id, state = %previous, "Start ignored");
            return Ok(StartOutcome::AlreadyActive {
                state: previous,
                session: self.session(),
            });
        }

        *lock(&self.inner.runtime) = Some(Handle::current());
        self.emit(AgentEvent::StateChanged(SessionState::Starting));

        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME);
        let fail_fast = self.inner.config.policy.degraded_mode == DegradedMode::FailFast;
        let session_id = Uuid::new_v4();
        info!(%user_id, %session_id, "Starting session");

        let mut res = Resources::new(user_id);
        let mut degraded = Vec::new();

        let (local_address, resolve_err) =
            resolve_or_fallback(self.inner.collaborators.addresses.as_ref());
        if let Some(e) = resolve_err {
            self.report(
                Subsystem::Identity,
                DiagnosticKind::ResolutionFailure,
                format!("{}; using {}", e, local_address),
            );
            degraded.push(Subsystem::Identity);
        }

        let (server_url, share_url) = match self.start_file_server().await {
            Ok((server, addr)) => {
                let url = files::server_url(local_address, addr.port());
                let share = files::share_url(&url, server.token());
                res.server = Some(server);
                (Some(url), Some(share))
            }
            Err(message) => {
                self.report(Subsystem::FileServer, DiagnosticKind::BindFailure, message);
                degraded.push(Subsystem::FileServer);
                (None, None)
            }
        };
        if fail_fast && res.server.is_none() {
            return Err(self.abort_start(res, Subsystem::FileServer).await);
        }

        self.inner.collaborators.indicator.show(&ActivityNotice {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            share_url: share_url.clone(),
        });
        res.indicator_shown = true;

        res.engine = self.start_engine();
        let joined = match &res.engine {
            Some(engine) => match engine.join_channel(user_id) {
                Ok(()) => true,
                Err(e) => {
                    self.report(Subsystem::Broadcast, DiagnosticKind::JoinFailure, e.to_string());
                    false
                }
            },
            None => false,
        };
        if !joined {
            degraded.push(Subsystem::Broadcast);
            if fail_fast {
                return Err(self.abort_start(res, Subsystem::Broadcast).await);
            }
        }

        let file_url = share_url.as_deref().unwrap_or(UNAVAILABLE_URL);
        res.presence_attempted = true;
        if let Err(e) = self
            .inner
            .presence
            .publish(user_id, display_name, file_url)
            .await
        {
            self.report(
                Subsystem::Presence,
                DiagnosticKind::PresenceFailure,
                e.to_string(),
            );
            degraded.push(Subsystem::Presence);
        }

        match self.inner.commands.subscribe(user_id, res.engine.clone()) {
            Ok(subscription) => res.commands = Some(subscription),
            Err(e) => {
                self.report(
                    Subsystem::Commands,
                    DiagnosticKind::SubscriptionFailure,
                    e.to_string(),
                );
                degraded.push(Subsystem::Commands);
            }
        }

        let mut info = SessionInfo {
            session_id,
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            state: SessionState::Running,
            local_address,
            server_url,
            share_url,
            degraded,
        };
        *lock(&self.inner.resources) = Some(res);
        *lock(&self.inner.session) = Some(info.clone());

        // Decided under the state lock so a concurrent stop cannot slip between.
        let mut next = SessionState::Running;
        self.inner.state_tx.send_modify(|state| {
            if self.inner.stop_requested.load(Ordering::SeqCst) {
                next = SessionState::Stopping;
            }
            *state = next;
        });
        info.state = next;
        self.emit(AgentEvent::StateChanged(next));
        self.emit(AgentEvent::SessionStarted(info.clone()));

        if next == SessionState::Stopping {
            info!(%session_id, "Stop requested during startup, tearing down");
            self.spawn_teardown();
        } else if info.degraded.is_empty() {
            info!(%session_id, "Session running");
        } else {
            warn!(%session_id, degraded = ?info.degraded, "Session running degraded");
        }

        Ok(StartOutcome::Started(info))
    }

    /// Requests the session to stop. Never waits for teardown.
    pub fn stop(&self) -> StopOutcome {
        let mut outcome = StopOutcome::NotRunning;
        let stop_requested = &self.inner.stop_requested;
        let changed = self.inner.state_tx.send_if_modified(|state| match *state {
            SessionState::Starting => {
                stop_requested.store(true, Ordering::SeqCst);
                outcome = StopOutcome::Queued;
                false
            }
            SessionState::Stopping => {
                outcome = StopOutcome::AlreadyStopping;
                false
            }
            SessionState::Running => {
                *state = SessionState::Stopping;
                outcome = StopOutcome::Stopping;
                true
            }
            SessionState::Idle | SessionState::Stopped | SessionState::Failed => false,
        });

        if changed {
            info!("Stopping session");
            self.emit(AgentEvent::StateChanged(SessionState::Stopping));
            self.spawn_teardown();
        } else {
            debug!(?outcome, "Stop request");
        }
        outcome
    }

    async fn start_file_server(&self) -> Result<(FileServer, SocketAddr), String> {
        let cfg = &self.inner.config.file_server;
        let ip: IpAddr = cfg
            .bind_address
            .parse()
            .map_err(|_| format!("invalid bind address: {}", cfg.bind_address))?;
        let browser = DirectoryBrowser::new(cfg.root.clone())
            .enforce_containment(cfg.enforce_containment)
            .include_hidden(cfg.include_hidden);
        let token = match cfg.access {
            AccessMode::Token => Some(generate_access_token()),
            AccessMode::Open => None,
        };

        let server = FileServer::new(browser, SocketAddr::new(ip, cfg.port), token)
            .with_grace_period(Duration::from_millis(cfg.shutdown_grace_ms));
        let addr = server.start().await.map_err(|e| e.to_string())?;
        Ok((server, addr))
    }

    fn start_engine(&self) -> Option<BroadcastHandle> {
        let result = self
            .inner
            .collaborators
            .engines
            .create()
            .map_err(BroadcastError::Init)
            .and_then(|engine| {
                BroadcastHandle::initialize(engine, &self.inner.config.broadcast.app_credential)
            });
        match result {
            Ok(handle) => Some(handle),
            Err(e) => {
                self.report(
                    Subsystem::Broadcast,
                    DiagnosticKind::EngineInitFailure,
                    e.to_string(),
                );
                None
            }
        }
    }

    async fn abort_start(&self, res: Resources, subsystem: Subsystem) -> AgentError {
        warn!(%subsystem, "Aborting startup");
        self.release(res).await;
        self.inner.state_tx.send_replace(SessionState::Failed);
        self.emit(AgentEvent::StateChanged(SessionState::Failed));
        AgentError::StartupAborted(subsystem)
    }

    fn spawn_teardown(&self) {
        let agent = self.clone();
        let runtime = Handle::try_current()
            .ok()
            .or_else(|| lock(&self.inner.runtime).clone());
        match runtime {
            Some(handle) => {
                handle.spawn(async move { agent.finish_stop().await });
            }
            None => warn!("No runtime available for teardown"),
        }
    }

    async fn finish_stop(&self) {
        let res = lock(&self.inner.resources).take();
        if let Some(res) = res {
            self.release(res).await;
        }

        let ended = lock(&self.inner.session).take();
        self.inner.state_tx.send_replace(SessionState::Stopped);
        self.emit(AgentEvent::StateChanged(SessionState::Stopped));
        if let Some(info) = ended {
            info!(session_id = %info.session_id, "Session stopped");
            self.emit(AgentEvent::SessionEnded {
                session_id: info.session_id,
            });
        }
    }

    /// Releases session resources in reverse start order. Best-effort.
    async fn release(&self, res: Resources) {
        if let Some(subscription) = res.commands {
            subscription.unsubscribe();
        }

        if let Some(engine) = res.engine {
            if let Err(e) = engine.leave() {
                self.report(
                    Subsystem::Broadcast,
                    DiagnosticKind::TeardownFailure,
                    e.to_string(),
                );
            }
            engine.destroy();
        }

        if let Some(server) = res.server {
            server.stop().await;
        }

        if res.presence_attempted {
            if let Err(e) = self.inner.presence.retract(&res.user_id).await {
                self.report(
                    Subsystem::Presence,
                    DiagnosticKind::TeardownFailure,
                    e.to_string(),
                );
            }
        }

        if res.indicator_shown {
            self.inner.collaborators.indicator.hide();
        }
    }

    fn report(&self, subsystem: Subsystem, kind: DiagnosticKind, message: String) {
        self.inner.diagnostics.record(subsystem, kind, message.clone());
        self.emit(AgentEvent::SubsystemFailed {
            subsystem,
            kind,
            message,
        });
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{headless_factory, EngineProbe};
    use crate::identity::{FixedAddress, ResolveError};
    use crate::store::MemoryStore;
    use protocol::DocumentPath;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingIndicator {
        shown: AtomicUsize,
        hidden: AtomicUsize,
    }

    impl ActivityIndicator for CountingIndicator {
        fn show(&self, _notice: &ActivityNotice) {
            self.shown.fetch_add(1, Ordering::SeqCst);
        }

        fn hide(&self) {
            self.hidden.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Unroutable;

    impl AddressSource for Unroutable {
        fn resolve(&self) -> Result<Ipv4Addr, ResolveError> {
            Err(ResolveError::Unroutable(Ipv4Addr::LOCALHOST))
        }
    }

    struct Harness {
        agent: Agent,
        store: MemoryStore,
        probe: EngineProbe,
        indicator: Arc<CountingIndicator>,
        _root: TempDir,
    }

    fn harness_with(config_fn: impl FnOnce(&mut Config), addresses: Arc<dyn AddressSource>) -> Harness {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.txt"), "hello").unwrap();

        let mut config = Config::default();
        config.file_server.root = root.path().to_path_buf();
        config.file_server.bind_address = "127.0.0.1".to_string();
        config.file_server.port = 0;
        config.broadcast.app_credential = "app".to_string();
        config_fn(&mut config);

        let store = MemoryStore::new();
        let probe = EngineProbe::new();
        let indicator = Arc::new(CountingIndicator::default());
        let agent = Agent::new(
            config,
            Collaborators {
                store: Arc::new(store.clone()),
                engines: Arc::new(headless_factory(probe.clone())),
                addresses,
                indicator: indicator.clone(),
            },
        );
        Harness {
            agent,
            store,
            probe,
            indicator,
            _root: root,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {}, Arc::new(FixedAddress(Ipv4Addr::new(127, 0, 0, 1))))
    }

    async fn wait_for_state(agent: &Agent, target: SessionState) {
        let mut rx = agent.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached in time")
            .unwrap();
    }

    fn presence_path() -> DocumentPath {
        DocumentPath::new("active_cameras", "u1").unwrap()
    }

    fn started(outcome: StartOutcome) -> SessionInfo {
        match outcome {
            StartOutcome::Started(info) => info,
            other => panic!("expected Started, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let h = harness();
        assert_eq!(h.agent.state(), SessionState::Idle);
        assert!(h.agent.session().is_none());
        assert!(h.agent.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn test_empty_user_id_rejected() {
        let h = harness();
        assert_eq!(
            h.agent.start("  ", None).await.unwrap_err(),
            AgentError::InvalidUserId
        );
        assert_eq!(h.agent.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_brings_everything_up() {
        let h = harness();
        let info = started(h.agent.start("u1", Some("a@example.com")).await.unwrap());

        assert_eq!(info.state, SessionState::Running);
        assert_eq!(info.local_address, Ipv4Addr::LOCALHOST);
        assert!(info.degraded.is_empty());
        let server_url = info.server_url.clone().unwrap();
        assert!(server_url.starts_with("http://127.0.0.1:"));
        let share_url = info.share_url.clone().unwrap();
        assert!(share_url.starts_with(&format!("{}/?token=", server_url)));

        let engine = h.probe.state();
        assert_eq!(engine.channel.as_deref(), Some("u1"));
        assert_eq!(engine.joins, 1);
        assert_eq!(h.indicator.shown.load(Ordering::SeqCst), 1);

        let presence = h.store.get(&presence_path()).await.unwrap();
        assert_eq!(
            presence.field("email"),
            Some(&serde_json::json!("a@example.com"))
        );
        assert_eq!(presence.field("file_url"), Some(&serde_json::json!(share_url)));

        assert_eq!(h.agent.session().unwrap().session_id, info.session_id);
        h.agent.stop();
        wait_for_state(&h.agent, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn test_display_name_defaults() {
        let h = harness();
        let info = started(h.agent.start("u1", None).await.unwrap());
        assert_eq!(info.display_name, DEFAULT_DISPLAY_NAME);
        h.agent.stop();
        wait_for_state(&h.agent, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let h = harness();
        let info = started(h.agent.start("u1", None).await.unwrap());

        match h.agent.start("u2", None).await.unwrap() {
            StartOutcome::AlreadyActive { state, session } => {
                assert_eq!(state, SessionState::Running);
                assert_eq!(session.unwrap().session_id, info.session_id);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.probe.state().engines_created, 1);

        h.agent.stop();
        wait_for_state(&h.agent, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn test_stop_tears_down_in_order() {
        let h = harness();
        started(h.agent.start("u1", None).await.unwrap());

        assert_eq!(h.agent.stop(), StopOutcome::Stopping);
        wait_for_state(&h.agent, SessionState::Stopped).await;

        let engine = h.probe.state();
        assert_eq!(engine.leaves, 1);
        assert!(engine.destroyed);
        assert!(!h.store.get(&presence_path()).await.unwrap().exists);
        assert_eq!(h.indicator.hidden.load(Ordering::SeqCst), 1);
        assert!(h.agent.session().is_none());
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let h = harness();
        assert_eq!(h.agent.stop(), StopOutcome::NotRunning);
        assert_eq!(h.agent.stop(), StopOutcome::NotRunning);
        assert_eq!(h.agent.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let h = harness();
        let first = started(h.agent.start("u1", None).await.unwrap());
        h.agent.stop();
        wait_for_state(&h.agent, SessionState::Stopped).await;

        let second = started(h.agent.start("u1", None).await.unwrap());
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(h.probe.state().engines_created, 2);

        h.agent.stop();
        wait_for_state(&h.agent, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn test_resolution_failure_falls_back() {
        let h = harness_with(|_| {}, Arc::new(Unroutable));
        let info = started(h.agent.start("u1", None).await.unwrap());

        assert_eq!(info.local_address, Ipv4Addr::UNSPECIFIED);
        assert!(info.server_url.unwrap().starts_with("http://0.0.0.0:"));
        assert_eq!(info.degraded, vec![Subsystem::Identity]);
        assert_eq!(
            h.agent
                .diagnostics()
                .iter()
                .filter(|d| d.kind == DiagnosticKind::ResolutionFailure)
                .count(),
            1
        );

        h.agent.stop();
        wait_for_state(&h.agent, SessionState::Stopped).await;
    }

    #[tokio::test]
    async fn test_join_failure_continues_by_default() {
        let h = harness();
        h.probe.fail_join("rejected");

        let info = started(h.agent.start("u1", None).await.unwrap());
        assert_eq!(info.state, SessionState::Running);
        assert_eq!(info.degraded, vec![Subsystem::Broadcast]);
        assert!(h.store.get(&presence_path()).await.unwrap().exists);

        h.agent.stop();
        wait_for_state(&h.agent, SessionState::Stopped).await;
        assert!(h.probe.state().destroyed);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_on_engine_failure() {
        let h = harness_with(
            |c| c.policy.degraded_mode = DegradedMode::FailFast,
            Arc::new(FixedAddress(Ipv4Addr::LOCALHOST)),
        );
        h.probe.fail_init("bad credential");

        let err = h.agent.start("u1", None).await.unwrap_err();
        assert_eq!(err, AgentError::StartupAborted(Subsystem::Broadcast));
        assert_eq!(h.agent.state(), SessionState::Failed);
        assert_eq!(h.indicator.hidden.load(Ordering::SeqCst), 1);
        assert!(!h.store.get(&presence_path()).await.unwrap().exists);

        match h.agent.start("u1", None).await.unwrap() {
            StartOutcome::AlreadyActive { state, .. } => assert_eq!(state, SessionState::Failed),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.agent.stop(), StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_events_follow_state_changes() {
        let h = harness();
        let mut events = h.agent.subscribe();

        started(h.agent.start("u1", None).await.unwrap());
        h.agent.stop();
        wait_for_state(&h.agent, SessionState::Stopped).await;

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                SessionState::Starting,
                SessionState::Running,
                SessionState::Stopping,
                SessionState::Stopped,
            ]
        );
    }

    #[test]
    fn test_state_helpers() {
        assert!(SessionState::Idle.accepts_start());
        assert!(SessionState::Stopped.accepts_start());
        assert!(!SessionState::Failed.accepts_start());
        assert!(SessionState::Stopping.is_active());
        assert!(!SessionState::Failed.is_active());
        assert_eq!(SessionState::Running.to_string(), "running");
    }
}
