//! Remote command channel.
//!
//! A controller writes `{action: "..."}` into the user's command document.
//! The agent watches that document, applies known actions to the broadcast
//! engine and clears the field so the action is not applied again.

use std::sync::Arc;

use protocol::{Action, CommandRecord, DocumentPath, DocumentSnapshot, WatchMessage};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::BroadcastHandle;
use crate::config::DeliveryMode;
use crate::diagnostics::{DiagnosticKind, Diagnostics, Subsystem};
use crate::store::{field, DocumentStore, StoreError, Watch};

/// Opens command subscriptions against one collection.
#[derive(Clone)]
pub struct CommandChannel {
    store: Arc<dyn DocumentStore>,
    collection: String,
    delivery: DeliveryMode,
    diagnostics: Diagnostics,
}

impl CommandChannel {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        delivery: DeliveryMode,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            delivery,
            diagnostics,
        }
    }

    /// Starts listening for commands addressed to `user_id`.
    ///
    /// Returns as soon as the watch is registered; snapshots are handled on a
    /// spawned task. Without an engine, actions are still cleared.
    pub fn subscribe(
        &self,
        user_id: &str,
        engine: Option<BroadcastHandle>,
    ) -> Result<CommandSubscription, StoreError> {
        let path = DocumentPath::new(&self.collection, user_id)?;
        let watch = self.store.watch(&path)?;
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher {
            store: self.store.clone(),
            path: path.clone(),
            delivery: self.delivery,
            diagnostics: self.diagnostics.clone(),
            engine,
            last_handled: None,
        };
        let task = tokio::spawn(dispatcher.run(watch, cancel.clone()));

        info!(%path, delivery = ?self.delivery, "Subscribed to commands");
        Ok(CommandSubscription { path, cancel, task })
    }
}

/// A live command subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct CommandSubscription {
    path: DocumentPath,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CommandSubscription {
    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    /// Stops the watch and the dispatch task. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            debug!(path = %self.path, "Unsubscribed from commands");
        }
    }

    /// Whether the dispatch task is still running.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for CommandSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Dispatcher {
    store: Arc<dyn DocumentStore>,
    path: DocumentPath,
    delivery: DeliveryMode,
    diagnostics: Diagnostics,
    engine: Option<BroadcastHandle>,
    /// Version of the last snapshot whose action was applied.
    last_handled: Option<u64>,
}

impl Dispatcher {
    async fn run(mut self, mut watch: Watch, cancel: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = watch.next() => msg,
            };
            match msg {
                Some(WatchMessage::Snapshot(snapshot)) => self.handle(snapshot).await,
                Some(WatchMessage::Error { message }) => {
                    self.diagnostics.record(
                        Subsystem::Commands,
                        DiagnosticKind::CommandFailure,
                        format!("watch error on {}: {}", self.path, message),
                    );
                }
                None => break,
            }
        }
        debug!(path = %self.path, "Command dispatch stopped");
    }

    async fn handle(&mut self, snapshot: DocumentSnapshot) {
        let Some(data) = snapshot.data.as_ref().filter(|_| snapshot.exists) else {
            return;
        };
        let record = match CommandRecord::from_value(data) {
            Ok(record) => record,
            Err(e) => {
                debug!(path = %self.path, "Ignoring malformed command document: {}", e);
                return;
            }
        };

        let action = match record.pending() {
            None => return,
            Some(Action::Unknown(raw)) => {
                debug!(path = %self.path, action = %raw, "Ignoring unknown action");
                return;
            }
            Some(action) => action,
        };

        if self.delivery == DeliveryMode::Deduplicated {
            if let Some(last) = self.last_handled {
                if snapshot.version <= last {
                    self.diagnostics.record(
                        Subsystem::Commands,
                        DiagnosticKind::DuplicateCommandDelivery,
                        format!(
                            "skipped {} at version {} (last handled {})",
                            action.as_str(),
                            snapshot.version,
                            last
                        ),
                    );
                    return;
                }
            }
        }
        self.last_handled = Some(snapshot.version);

        self.apply(&action);
        self.clear(&record.action).await;
    }

    fn apply(&self, action: &Action) {
        match action {
            Action::SwitchCamera => {
                let Some(engine) = &self.engine else {
                    debug!("No broadcast engine, dropping camera switch");
                    return;
                };
                match engine.switch_camera() {
                    Ok(true) => {}
                    Ok(false) => debug!("Engine not in a channel, camera switch ignored"),
                    Err(e) => self.diagnostics.record(
                        Subsystem::Commands,
                        DiagnosticKind::CommandFailure,
                        format!("switch_camera failed: {}", e),
                    ),
                }
            }
            Action::Unknown(_) => {}
        }
    }

    async fn clear(&self, read_action: &str) {
        let result = match self.delivery {
            DeliveryMode::Deduplicated => self
                .store
                .compare_and_set(&self.path, "action", json!(read_action), json!(""))
                .await
                .map(|applied| {
                    if !applied {
                        debug!(path = %self.path, "Action changed before clear, left in place");
                    }
                }),
            DeliveryMode::AtLeastOnce => {
                self.store
                    .update(&self.path, field("action", Value::String(String::new())))
                    .await
            }
        };

        if let Err(e) = result {
            self.diagnostics.record(
                Subsystem::Commands,
                DiagnosticKind::CommandFailure,
                format!("failed to clear action on {}: {}", self.path, e),
            );
        }
    }
}
