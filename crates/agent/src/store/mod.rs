//! Document store clients.
//!
//! Presence and commands are plain documents in a realtime document store.
//! [`DocumentStore`] abstracts the store so the agent can run against an
//! in-process [`MemoryStore`] or a [`RemoteStore`] speaking REST + WebSocket.

pub mod memory;
pub mod remote;

use std::future::Future;
use std::pin::Pin;

use protocol::{DocumentPath, DocumentSnapshot, ProtocolError, WatchMessage};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use memory::MemoryStore;
pub use remote::{RemoteStore, RemoteStoreConfig};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document does not exist.
    #[error("document not found: {0}")]
    NotFound(DocumentPath),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error status.
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Malformed path or payload.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Boxed future returned by [`DocumentStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A realtime document store.
///
/// This trait is dyn-compatible so the lifecycle can hold an
/// `Arc<dyn DocumentStore>` chosen at runtime.
pub trait DocumentStore: Send + Sync {
    /// Creates or replaces a document.
    fn set(&self, path: &DocumentPath, data: Value) -> StoreFuture<'_, ()>;

    /// Reads a document. A missing document is a snapshot with `exists == false`.
    fn get(&self, path: &DocumentPath) -> StoreFuture<'_, DocumentSnapshot>;

    /// Merges top-level fields into an existing document.
    fn update(&self, path: &DocumentPath, fields: Map<String, Value>) -> StoreFuture<'_, ()>;

    /// Deletes a document. Deleting a missing document succeeds.
    fn delete(&self, path: &DocumentPath) -> StoreFuture<'_, ()>;

    /// Sets `field` to `value` only if it currently equals `expected`.
    /// Returns whether the write was applied.
    fn compare_and_set(
        &self,
        path: &DocumentPath,
        field: &str,
        expected: Value,
        value: Value,
    ) -> StoreFuture<'_, bool>;

    /// Starts watching a document. Returns immediately; the first message is
    /// the current snapshot.
    fn watch(&self, path: &DocumentPath) -> Result<Watch, StoreError>;
}

/// Stream of snapshots for one document.
///
/// Dropping or cancelling the watch stops delivery.
#[derive(Debug)]
pub struct Watch {
    rx: mpsc::UnboundedReceiver<WatchMessage>,
    cancel: CancellationToken,
}

impl Watch {
    pub fn new(rx: mpsc::UnboundedReceiver<WatchMessage>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next message, or `None` once the watch is cancelled or the source ends.
    pub async fn next(&mut self) -> Option<WatchMessage> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            msg = self.rx.recv() => msg,
        }
    }

    /// Token that cancels this watch.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wraps a single top-level field in a map for [`DocumentStore::update`].
pub fn field(name: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(name.to_string(), value);
    map
}
