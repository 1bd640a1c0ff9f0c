//! Coordinator composition root
//!
//! Owns the store session, the registry mirror, the synchronizer task, the
//! size accounting strategy and the queue-client slot, and hands out
//! per-shard write paths. The coordinator never exits the process on its
//! own: every failure is retried, published on the event stream, or returned
//! as a request-scoped error.

use crate::common::{CoordinatorConfig, Error, EventSink, Result};
use crate::coordinator::registry::ShardRegistry;
use crate::coordinator::shard::{Shard, WriteContext};
use crate::coordinator::sizes::SizeAccounting;
use crate::coordinator::stats::{self, Stats, UploadCounters};
use crate::coordinator::sync::ConfigSynchronizer;
use crate::coordinator::{admin, http};
use crate::queue::{QueueEndpoint, QueueFactory, QueueSlot};
use crate::store::MetaStore;
use bytes::Bytes;
use futures_util::Stream;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub struct Coordinator {
    config: CoordinatorConfig,
    store: Arc<dyn MetaStore>,
    registry: Arc<ShardRegistry>,
    queue: QueueSlot,
    write_ctx: WriteContext,
    events: EventSink,
    counters: UploadCounters,
    started: Instant,
    ready: watch::Receiver<bool>,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Build a coordinator and spawn its configuration synchronizer. Must be
    /// called inside a tokio runtime. The returned receiver carries every
    /// non-fatal error the coordinator observes.
    pub fn start(
        config: CoordinatorConfig,
        store: Arc<dyn MetaStore>,
        queue_factory: Arc<dyn QueueFactory>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Error>) {
        let (events, events_rx) = EventSink::channel();
        let registry = Arc::new(ShardRegistry::new());
        let queue = QueueSlot::default();
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = watch::channel(false);

        let accounting = Arc::new(SizeAccounting::new(
            config.accounting,
            store.clone(),
            config.batch_window(),
            config.cas_attempt_limit,
        ));

        let synchronizer = ConfigSynchronizer::from_config(
            &config,
            store.clone(),
            registry.clone(),
            queue_factory,
            queue.clone(),
            events.clone(),
            ready_tx,
            shutdown.clone(),
        );
        tokio::spawn(synchronizer.run());

        let write_ctx = WriteContext {
            view: registry.view(),
            accounting,
            queue: queue.clone(),
            events: events.clone(),
            http: reqwest::Client::new(),
            spool_dir: config.spool_dir.clone(),
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        };

        let coordinator = Arc::new(Self {
            config,
            store,
            registry,
            queue,
            write_ctx,
            events,
            counters: UploadCounters::default(),
            started: Instant::now(),
            ready: ready_rx,
            shutdown,
        });
        (coordinator, events_rx)
    }

    /// Resolves once the first full synchronization completes. Later
    /// re-synchronizations (session expiry) never un-ready the coordinator.
    pub async fn ready(&self) {
        let mut ready = self.ready.clone();
        let _ = ready.wait_for(|synced| *synced).await;
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.events
    }

    // === Placement ===

    /// Free-space ratio per writable shard.
    pub fn writable_shards(&self) -> HashMap<String, f64> {
        self.registry.writable_shards()
    }

    /// Capacity-weighted pick of a shard for the next write.
    pub fn select_write_shard(&self) -> Result<Arc<Shard>> {
        let id = self.registry.select_write_shard()?;
        self.shard(&id)
    }

    /// Per-id shard handle, cached until the shard's metadata or size record
    /// is refreshed so an in-flight upload keeps a stable node list.
    pub fn shard(&self, id: &str) -> Result<Arc<Shard>> {
        let meta = self
            .registry
            .view()
            .shard_meta(id)
            .ok_or_else(|| Error::ShardUnknown(id.to_string()))?;

        if let Some(shard) = self.registry.cached_handle(id) {
            return Ok(shard);
        }
        let shard = Arc::new(Shard::new(
            id.to_string(),
            meta.nodes,
            self.write_ctx.clone(),
        ));
        self.registry.cache_handle(id, shard.clone());
        Ok(shard)
    }

    // === Uploads ===

    /// Select a shard and run the write path. Returns the shard id that took
    /// the write.
    pub async fn upload<S, E>(&self, path: &str, size: u64, body: S) -> Result<String>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let shard = self.select_write_shard().inspect_err(|_| {
            self.counters.record_failure();
        })?;

        match shard.accept_write(path, size, body).await {
            Ok(()) => {
                self.counters.record_success(size);
                Ok(shard.id.clone())
            }
            Err(e) => {
                self.counters.record_failure();
                Err(e)
            }
        }
    }

    // === Stats ===

    pub async fn stats(&self) -> Result<Stats> {
        let queue = self.queue.current().ok_or(Error::QueueUnavailable)?;
        let backlog = queue.len().await?;
        Ok(stats::gather(
            &self.registry,
            &self.counters,
            self.started,
            backlog,
        ))
    }

    // === Administration ===

    pub async fn add_server(&self, id: &str, host: &str, port: u16) -> Result<()> {
        admin::add_server(&*self.store, id, host, port).await
    }

    pub async fn add_shard(&self, id: &str, nodes: Vec<String>, capacity: u64) -> Result<()> {
        admin::add_shard(&*self.store, id, nodes, capacity).await
    }

    pub async fn enable_shard(&self, id: &str) -> Result<()> {
        admin::enable_shard(&*self.store, id).await
    }

    pub async fn set_queue_info(&self, servers: Vec<QueueEndpoint>, key: &str) -> Result<()> {
        admin::set_queue_info(&*self.store, servers, key).await
    }

    // === Lifecycle ===

    /// Serve the client HTTP API on the configured bind address until the
    /// listener fails or the task is dropped.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let local = listener.local_addr()?;
        tracing::info!("listening on http://{}", local);
        axum::serve(listener, http::router(self)).await?;
        Ok(())
    }

    /// Cancel synchronization, close the store session and the queue client.
    /// No more requests should reach this coordinator afterwards.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.store.close().await;
        if let Some(queue) = self.queue.swap(None) {
            queue.close().await;
        }
    }
}
