//! In-process document store.
//!
//! Behaves like a realtime backend: every write bumps the document version
//! and pushes a snapshot to all watchers of that document.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use protocol::{DocumentPath, DocumentSnapshot, WatchMessage};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DocumentStore, StoreError, StoreFuture, Watch};

#[derive(Default)]
struct Slot {
    data: Option<Value>,
    version: u64,
    watchers: Vec<mpsc::UnboundedSender<WatchMessage>>,
}

impl Slot {
    fn snapshot(&self) -> DocumentSnapshot {
        match &self.data {
            Some(data) => DocumentSnapshot::present(data.clone(), self.version),
            None => DocumentSnapshot::missing(self.version),
        }
    }

    fn notify(&mut self) {
        let msg = WatchMessage::Snapshot(self.snapshot());
        self.watchers.retain(|tx| tx.send(msg.clone()).is_ok());
    }

    fn bump(&mut self) {
        self.version += 1;
        self.notify();
    }
}

#[derive(Default)]
struct Inner {
    slots: DashMap<DocumentPath, Slot>,
    offline: AtomicBool,
}

/// Document store kept in memory. Clones share the same documents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with [`StoreError::Unavailable`] while set.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Re-sends the current snapshot of `path` to its watchers unchanged, the
    /// way a realtime backend does after a reconnect.
    pub fn replay_latest(&self, path: &DocumentPath) {
        if let Some(mut slot) = self.inner.slots.get_mut(path) {
            slot.notify();
        }
    }

    /// Number of live watchers on `path`.
    pub fn watcher_count(&self, path: &DocumentPath) -> usize {
        self.inner
            .slots
            .get(path)
            .map(|slot| slot.watchers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn set_sync(&self, path: &DocumentPath, data: Value) -> Result<(), StoreError> {
        self.check_online()?;
        let mut slot = self.inner.slots.entry(path.clone()).or_default();
        slot.data = Some(data);
        slot.bump();
        Ok(())
    }

    fn get_sync(&self, path: &DocumentPath) -> Result<DocumentSnapshot, StoreError> {
        self.check_online()?;
        Ok(self
            .inner
            .slots
            .get(path)
            .map(|slot| slot.snapshot())
            .unwrap_or_else(|| DocumentSnapshot::missing(0)))
    }

    fn update_sync(&self, path: &DocumentPath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut slot = self
            .inner
            .slots
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;

        match slot.data.as_mut() {
            Some(Value::Object(existing)) => existing.extend(fields),
            Some(other) => *other = Value::Object(fields),
            None => return Err(StoreError::NotFound(path.clone())),
        }
        slot.bump();
        Ok(())
    }

    fn delete_sync(&self, path: &DocumentPath) -> Result<(), StoreError> {
        self.check_online()?;
        if let Some(mut slot) = self.inner.slots.get_mut(path) {
            if slot.data.take().is_some() {
                slot.bump();
            }
        }
        Ok(())
    }

    fn compare_and_set_sync(
        &self,
        path: &DocumentPath,
        field: &str,
        expected: &Value,
        value: Value,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let Some(mut slot) = self.inner.slots.get_mut(path) else {
            return Ok(false);
        };

        let applied = match slot.data.as_mut() {
            Some(Value::Object(map)) if map.get(field) == Some(expected) => {
                map.insert(field.to_string(), value);
                true
            }
            _ => false,
        };

        if applied {
            slot.bump();
        }
        Ok(applied)
    }
}

impl DocumentStore for MemoryStore {
    fn set(&self, path: &DocumentPath, data: Value) -> StoreFuture<'_, ()> {
        let result = self.set_sync(path, data);
        Box::pin(async move { result })
    }

    fn get(&self, path: &DocumentPath) -> StoreFuture<'_, DocumentSnapshot> {
        let result = self.get_sync(path);
        Box::pin(async move { result })
    }

    fn update(&self, path: &DocumentPath, fields: Map<String, Value>) -> StoreFuture<'_, ()> {
        let result = self.update_sync(path, fields);
        Box::pin(async move { result })
    }

    fn delete(&self, path: &DocumentPath) -> StoreFuture<'_, ()> {
        let result = self.delete_sync(path);
        Box::pin(async move { result })
    }

    fn compare_and_set(
        &self,
        path: &DocumentPath,
        field: &str,
        expected: Value,
        value: Value,
    ) -> StoreFuture<'_, bool> {
        let result = self.compare_and_set_sync(path, field, &expected, value);
        Box::pin(async move { result })
    }

    fn watch(&self, path: &DocumentPath) -> Result<Watch, StoreError> {
        self.check_online()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut slot = self.inner.slots.entry(path.clone()).or_default();
        // Send and register under the same lock so no write slips in between.
        let _ = tx.send(WatchMessage::Snapshot(slot.snapshot()));
        slot.watchers.push(tx);
        debug!(%path, "Memory watch registered");

        Ok(Watch::new(rx, CancellationToken::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::field;
    use serde_json::json;

    fn path(id: &str) -> DocumentPath {
        DocumentPath::new("commands", id).unwrap()
    }

    async fn next_snapshot(watch: &mut Watch) -> DocumentSnapshot {
        match watch.next().await {
            Some(WatchMessage::Snapshot(s)) => s,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set(&path("u1"), json!({"action": "x"})).await.unwrap();

        let snap = store.get(&path("u1")).await.unwrap();
        assert!(snap.exists);
        assert_eq!(snap.data, Some(json!({"action": "x"})));
        assert_eq!(snap.version, 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let snap = store.get(&path("nobody")).await.unwrap();
        assert!(!snap.exists);
        assert_eq!(snap.data, None);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store
            .set(&path("u1"), json!({"action": "x", "other": 1}))
            .await
            .unwrap();
        store
            .update(&path("u1"), field("action", json!("")))
            .await
            .unwrap();

        let snap = store.get(&path("u1")).await.unwrap();
        assert_eq!(snap.data, Some(json!({"action": "", "other": 1})));
        assert_eq!(snap.version, 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update(&path("u1"), field("action", json!("")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.delete(&path("u1")).await.unwrap();

        store.set(&path("u1"), json!({})).await.unwrap();
        store.delete(&path("u1")).await.unwrap();
        store.delete(&path("u1")).await.unwrap();

        let snap = store.get(&path("u1")).await.unwrap();
        assert!(!snap.exists);
        assert_eq!(snap.version, 2);
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryStore::new();
        store
            .set(&path("u1"), json!({"action": "switch_camera"}))
            .await
            .unwrap();

        let applied = store
            .compare_and_set(&path("u1"), "action", json!("other"), json!(""))
            .await
            .unwrap();
        assert!(!applied);

        let applied = store
            .compare_and_set(&path("u1"), "action", json!("switch_camera"), json!(""))
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(
            store.get(&path("u1")).await.unwrap().field("action"),
            Some(&json!(""))
        );

        let applied = store
            .compare_and_set(&path("missing"), "action", json!(""), json!("x"))
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_watch_delivers_initial_and_updates() {
        let store = MemoryStore::new();
        let mut watch = store.watch(&path("u1")).unwrap();

        let initial = next_snapshot(&mut watch).await;
        assert!(!initial.exists);

        store.set(&path("u1"), json!({"action": "a"})).await.unwrap();
        let snap = next_snapshot(&mut watch).await;
        assert_eq!(snap.field("action"), Some(&json!("a")));
        assert_eq!(snap.version, 1);

        store.delete(&path("u1")).await.unwrap();
        let snap = next_snapshot(&mut watch).await;
        assert!(!snap.exists);
        assert_eq!(snap.version, 2);
    }

    #[tokio::test]
    async fn test_replay_latest_resends_same_version() {
        let store = MemoryStore::new();
        store.set(&path("u1"), json!({"action": "a"})).await.unwrap();
        let mut watch = store.watch(&path("u1")).unwrap();

        let first = next_snapshot(&mut watch).await;
        store.replay_latest(&path("u1"));
        let replayed = next_snapshot(&mut watch).await;
        assert_eq!(first, replayed);
    }

    #[tokio::test]
    async fn test_dropped_watch_is_pruned() {
        let store = MemoryStore::new();
        let watch = store.watch(&path("u1")).unwrap();
        assert_eq!(store.watcher_count(&path("u1")), 1);

        drop(watch);
        assert_eq!(store.watcher_count(&path("u1")), 0);
        store.set(&path("u1"), json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let store = MemoryStore::new();
        store.set_offline(true);

        assert!(matches!(
            store.set(&path("u1"), json!({})).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.watch(&path("u1")),
            Err(StoreError::Unavailable(_))
        ));

        store.set_offline(false);
        assert!(store.set(&path("u1"), json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_documents() {
        let store = MemoryStore::new();
        let other = store.clone();
        other.set(&path("u1"), json!({"a": 1})).await.unwrap();
        assert!(store.get(&path("u1")).await.unwrap().exists);
    }
}
