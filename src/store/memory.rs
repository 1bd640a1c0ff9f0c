//! In-memory coordination store
//!
//! Versioned records plus one-shot watches, with the same observable contract
//! as the real store client. Backs the integration tests and the
//! single-process development mode of `satchel-coord`; session expiry is
//! injectable so recovery paths can be exercised.

use super::{MetaStore, SessionEvent, StoreError, StoreResult, Versioned, Watch};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, oneshot};

struct Record {
    data: Vec<u8>,
    version: i64,
}

#[derive(Default)]
struct State {
    records: HashMap<String, Record>,
    watchers: HashMap<String, Vec<oneshot::Sender<()>>>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    session_tx: broadcast::Sender<SessionEvent>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (session_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(State::default()),
            session_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate a session loss; installed watches die with the session.
    pub fn expire_session(&self) {
        self.state.lock().unwrap().watchers.clear();
        let _ = self.session_tx.send(SessionEvent::Expired);
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("session closed".into()));
        }
        Ok(())
    }

    fn fire_watchers(state: &mut State, path: &str) {
        if let Some(watchers) = state.watchers.remove(path) {
            for tx in watchers {
                let _ = tx.send(());
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Versioned> {
        self.check_open()?;
        let state = self.state.lock().unwrap();
        let record = state
            .records
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        Ok(Versioned {
            data: record.data.clone(),
            version: record.version,
        })
    }

    async fn get_watch(&self, path: &str) -> StoreResult<(Versioned, Watch)> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let value = {
            let record = state
                .records
                .get(path)
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            Versioned {
                data: record.data.clone(),
                version: record.version,
            }
        };
        let (tx, rx) = oneshot::channel();
        state.watchers.entry(path.to_string()).or_default().push(tx);
        Ok((value, rx))
    }

    async fn set(&self, path: &str, data: Vec<u8>, version: i64) -> StoreResult<()> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if record.version != version {
            return Err(StoreError::BadVersion);
        }
        record.data = data;
        record.version += 1;
        Self::fire_watchers(&mut state, path);
        Ok(())
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> StoreResult<()> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        if state.records.contains_key(path) {
            return Err(StoreError::NodeExists(path.to_string()));
        }
        state
            .records
            .insert(path.to_string(), Record { data, version: 0 });
        Self::fire_watchers(&mut state, path);
        Ok(())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_tx.subscribe()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state.lock().unwrap().watchers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versioned_set() {
        let store = MemoryStore::new();
        store.create("/r", b"a".to_vec()).await.unwrap();

        let v = store.get("/r").await.unwrap();
        assert_eq!(v.version, 0);
        assert_eq!(v.data, b"a");

        store.set("/r", b"b".to_vec(), 0).await.unwrap();
        assert_eq!(store.get("/r").await.unwrap().version, 1);

        // stale version is rejected
        let err = store.set("/r", b"c".to_vec(), 0).await.unwrap_err();
        assert!(matches!(err, StoreError::BadVersion));
    }

    #[tokio::test]
    async fn test_create_existing() {
        let store = MemoryStore::new();
        store.create("/r", b"a".to_vec()).await.unwrap();
        let err = store.create("/r", b"b".to_vec()).await.unwrap_err();
        assert!(matches!(err, StoreError::NodeExists(_)));
    }

    #[tokio::test]
    async fn test_watch_fires_on_set() {
        let store = MemoryStore::new();
        store.create("/r", b"a".to_vec()).await.unwrap();

        let (_, watch) = store.get_watch("/r").await.unwrap();
        store.set("/r", b"b".to_vec(), 0).await.unwrap();
        watch.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_record_installs_no_watch() {
        let store = MemoryStore::new();
        let err = store.get_watch("/absent").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.state.lock().unwrap().watchers.is_empty());
    }
}
