//! Error types for satchel

use crate::queue::QueueError;
use crate::store::StoreError;
use thiserror::Error;
use tokio::sync::mpsc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Boundary Errors ===
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    #[error("replication queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("bad record payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // === Placement Errors ===
    #[error("no writable shards found")]
    NoWritableShards,

    #[error("selection walk exhausted without a pick")]
    SelectionInvariant,

    #[error("shard not found: {0}")]
    ShardUnknown(String),

    #[error("node not found: {0}")]
    NodeUnknown(String),

    // === Upload Errors ===
    #[error("node {node} rejected {path} with status {status}")]
    NodeRejected {
        node: String,
        status: u16,
        path: String,
    },

    #[error("could not upload {path} to any node: {}", .nodes.join(", "))]
    UploadFailed { path: String, nodes: Vec<String> },

    #[error("client stream error: {0}")]
    ClientStream(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    // === Size Accounting Errors ===
    #[error("size update for {path} gave up after {attempts} version conflicts")]
    CasExhausted { path: String, attempts: u32 },

    // === Synchronization Events ===
    #[error("waiting for size of shard {0}")]
    SizeMissing(String),

    #[error("shard {0} skipped: size record missing")]
    ShardSkipped(String),

    #[error("coordination session expired; resynchronizing")]
    SessionExpired,

    #[error("replication queue not available yet")]
    QueueUnavailable,

    // === Admin Errors ===
    #[error("cluster not initialized")]
    NotInitialized,

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

/// Non-fatal errors are published here instead of failing the request that
/// observed them. The receiving end is handed out once by
/// [`Coordinator::start`](crate::coordinator::Coordinator::start); every event
/// is also logged, so dropping the receiver loses nothing but the ability to
/// react programmatically.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Error>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish a non-fatal error.
    pub fn report(&self, error: Error) {
        tracing::warn!("{}", error);
        let _ = self.tx.send(error);
    }
}
