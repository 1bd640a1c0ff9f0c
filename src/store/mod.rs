//! Coordination-store boundary
//!
//! Cluster topology lives in an external strongly-consistent store exposing
//! versioned records with one-shot change watches (ZooKeeper-style). This
//! module specifies only that boundary: a dyn-safe [`MetaStore`] trait plus
//! the record paths and an in-memory implementation used by tests and the
//! single-process development mode.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

pub use memory::MemoryStore;

/// Record paths used by the coordinator.
pub mod paths {
    pub const SERVERS_MAP: &str = "/servers-map";
    pub const SHARDS_MAP: &str = "/shards-map";
    pub const QUEUE_INFO: &str = "/queue";

    pub fn shard_size(id: &str) -> String {
        format!("/shard-size-{}", id)
    }
}

/// A record value together with its compare-and-swap version token.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub data: Vec<u8>,
    pub version: i64,
}

/// Resolves once, on the next change of the watched record. Watches are not
/// re-armed automatically; re-fetch with [`MetaStore::get_watch`] after each
/// fire.
pub type Watch = oneshot::Receiver<()>;

/// Store session lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is gone and every installed watch with it; the holder must
    /// resynchronize from scratch.
    Expired,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("version conflict")]
    BadVersion,

    #[error("record already exists: {0}")]
    NodeExists(String),

    #[error("connection failed: {0}")]
    Connection(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Client for the external coordination store.
///
/// `set` succeeds only when `version` matches the record's current version.
/// `get_watch` on a missing record fails `NotFound` without installing a
/// watch, mirroring ZooKeeper `get` semantics.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get(&self, path: &str) -> StoreResult<Versioned>;

    /// Fetch a record and atomically install a one-shot change watch on it.
    async fn get_watch(&self, path: &str) -> StoreResult<(Versioned, Watch)>;

    async fn set(&self, path: &str, data: Vec<u8>, version: i64) -> StoreResult<()>;

    async fn create(&self, path: &str, data: Vec<u8>) -> StoreResult<()>;

    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;

    async fn close(&self);
}
