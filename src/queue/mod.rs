//! Replication-repair queue boundary
//!
//! A write lands on one node synchronously; the remaining members of the
//! shard are brought up to the replication factor by repair pushes queued on
//! an external service. Only the coordinator's side of that service is
//! modeled here: the job shape, a client trait, a factory that builds a
//! client from the `/queue` record, and the swap cell that guarantees there
//! is never a moment with two reachable clients or none.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub use memory::{MemoryQueue, MemoryQueueFactory};

/// Contents of the `/queue` record: how to reach the queue backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub servers: Vec<QueueEndpoint>,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEndpoint {
    pub host: String,
    pub port: u16,
}

/// One pending repair: copy `path` from a node that holds it to a shard
/// member that does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairJob {
    pub sources: Vec<String>,
    pub target: String,
    pub path: String,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,

    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("push failed: {0}")]
    Push(String),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Client for the external replication-repair queue.
#[async_trait]
pub trait ReplicationQueue: Send + Sync {
    async fn push(&self, job: RepairJob) -> QueueResult<()>;

    /// Current backlog length.
    async fn len(&self) -> QueueResult<u64>;

    async fn close(&self);
}

/// Builds a queue client from a descriptor. `build` resolves only once the
/// client is ready to accept jobs, so callers can swap clients without an
/// availability gap.
#[async_trait]
pub trait QueueFactory: Send + Sync {
    async fn build(&self, descriptor: &QueueDescriptor) -> QueueResult<Arc<dyn ReplicationQueue>>;
}

/// Shared slot holding the current queue client. The client is swapped,
/// never mutated in place; the previous client is returned to the caller,
/// which closes it once the replacement is in.
#[derive(Clone, Default)]
pub struct QueueSlot {
    inner: Arc<RwLock<Option<Arc<dyn ReplicationQueue>>>>,
}

impl QueueSlot {
    pub fn current(&self) -> Option<Arc<dyn ReplicationQueue>> {
        self.inner.read().unwrap().clone()
    }

    pub fn swap(
        &self,
        next: Option<Arc<dyn ReplicationQueue>>,
    ) -> Option<Arc<dyn ReplicationQueue>> {
        let mut slot = self.inner.write().unwrap();
        std::mem::replace(&mut *slot, next)
    }
}
