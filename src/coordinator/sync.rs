//! Configuration synchronization against the coordination store
//!
//! Each of the three record types (node table, shard table with one size
//! record per shard, queue descriptor) is kept in sync by its own
//! persistent task: fetch the record with a change watch installed, apply it
//! to the registry, wait for the watch to fire, fetch again. Fetch or parse
//! errors are surfaced and retried on a fixed cadence; the tasks never die on
//! their own. Overall readiness is the conjunction of the three first
//! completions and resolves exactly once.
//!
//! Session expiry is the sole recovery path for store disconnection: the
//! running pass is cancelled and the whole sequence re-runs from scratch,
//! size-watch bookkeeping cleared and queue client rebuilt. The sequence is
//! idempotent, so re-running it is always safe.

use crate::common::{CoordinatorConfig, Error, EventSink};
use crate::coordinator::registry::{NodeAddr, ShardMeta, ShardRegistry, ShardSize};
use crate::queue::{QueueDescriptor, QueueFactory, QueueSlot};
use crate::store::{paths, MetaStore, SessionEvent, StoreError, Watch};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;

pub(crate) struct ConfigSynchronizer {
    pub store: Arc<dyn MetaStore>,
    pub registry: Arc<ShardRegistry>,
    pub queue_factory: Arc<dyn QueueFactory>,
    pub queue: QueueSlot,
    pub events: EventSink,
    pub ready: watch::Sender<bool>,
    pub shutdown: CancellationToken,
    pub retry_delay: Duration,
    pub size_retry_limit: u32,
}

/// Shard ids whose size watch is already installed. The set belongs to one
/// synchronization pass; session expiry starts a new pass with a fresh set,
/// which is exactly the "resubscribe to everything" semantic.
type SizesSubscribed = Arc<Mutex<HashSet<String>>>;

impl ConfigSynchronizer {
    pub fn from_config(
        config: &CoordinatorConfig,
        store: Arc<dyn MetaStore>,
        registry: Arc<ShardRegistry>,
        queue_factory: Arc<dyn QueueFactory>,
        queue: QueueSlot,
        events: EventSink,
        ready: watch::Sender<bool>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            queue_factory,
            queue,
            events,
            ready,
            shutdown,
            retry_delay: config.sync_retry(),
            size_retry_limit: config.size_retry_limit,
        })
    }

    /// Synchronize forever: run one pass, restart it from scratch whenever
    /// the store session expires.
    pub async fn run(self: Arc<Self>) {
        let mut session = self.store.session_events();
        loop {
            let pass = self.shutdown.child_token();
            tokio::spawn(self.clone().run_pass(pass.clone()));

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                event = session.recv() => match event {
                    Ok(SessionEvent::Expired) => {
                        self.events.report(Error::SessionExpired);
                        pass.cancel();
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // missed expiry notifications; resync to be safe
                        pass.cancel();
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }

    async fn run_pass(self: Arc<Self>, token: CancellationToken) {
        let (nodes_tx, nodes_rx) = oneshot::channel();
        let (shards_tx, shards_rx) = oneshot::channel();
        let (queue_tx, queue_rx) = oneshot::channel();
        let subscribed: SizesSubscribed = Arc::new(Mutex::new(HashSet::new()));

        tokio::spawn(self.clone().nodes_task(token.clone(), Some(nodes_tx)));
        tokio::spawn(
            self.clone()
                .shards_task(token.clone(), Some(shards_tx), subscribed),
        );
        tokio::spawn(self.clone().queue_task(token.clone(), Some(queue_tx)));

        let (nodes, shards, queue) = tokio::join!(nodes_rx, shards_rx, queue_rx);
        if nodes.is_ok() && shards.is_ok() && queue.is_ok() {
            self.ready.send_replace(true);
            tracing::info!("configuration synchronized");
        }
    }

    async fn sleep_retry(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.retry_delay) => true,
        }
    }

    // === Node table ===

    async fn nodes_task(self: Arc<Self>, token: CancellationToken, mut done: Option<oneshot::Sender<()>>) {
        loop {
            let fetched = tokio::select! {
                _ = token.cancelled() => return,
                result = self.fetch_nodes() => result,
            };
            match fetched {
                Ok(watch_fire) => {
                    if let Some(tx) = done.take() {
                        let _ = tx.send(());
                    }
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = watch_fire => {}
                    }
                }
                Err(e) => {
                    self.events.report(e);
                    if !self.sleep_retry(&token).await {
                        return;
                    }
                }
            }
        }
    }

    async fn fetch_nodes(&self) -> Result<Watch, Error> {
        let (value, watch_fire) = self.store.get_watch(paths::SERVERS_MAP).await?;
        let map: HashMap<String, NodeAddr> = serde_json::from_slice(&value.data)?;
        self.registry.apply_nodes(map);
        Ok(watch_fire)
    }

    // === Shard table ===

    async fn shards_task(
        self: Arc<Self>,
        token: CancellationToken,
        mut done: Option<oneshot::Sender<()>>,
        subscribed: SizesSubscribed,
    ) {
        loop {
            let fetched = tokio::select! {
                _ = token.cancelled() => return,
                result = self.clone().fetch_shards(token.clone(), subscribed.clone()) => result,
            };
            match fetched {
                Ok((watch_fire, first_attempts)) => {
                    if let Some(tx) = done.take() {
                        // readiness waits for one size attempt per known shard
                        tokio::spawn(async move {
                            for attempt in first_attempts {
                                let _ = attempt.await;
                            }
                            let _ = tx.send(());
                        });
                    }
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = watch_fire => {}
                    }
                }
                Err(e) => {
                    self.events.report(e);
                    if !self.sleep_retry(&token).await {
                        return;
                    }
                }
            }
        }
    }

    async fn fetch_shards(
        self: Arc<Self>,
        token: CancellationToken,
        subscribed: SizesSubscribed,
    ) -> Result<(Watch, Vec<oneshot::Receiver<()>>), Error> {
        let (value, watch_fire) = self.store.get_watch(paths::SHARDS_MAP).await?;
        let map: HashMap<String, ShardMeta> = serde_json::from_slice(&value.data)?;
        tracing::debug!("shard table refreshed: {} shards", map.len());

        let mut first_attempts = Vec::new();
        for (id, meta) in map {
            self.registry.apply_shard_meta(id.clone(), meta);

            // one size watch per shard id for the life of the session
            let fresh = subscribed.lock().unwrap().insert(id.clone());
            if fresh {
                let (tx, rx) = oneshot::channel();
                first_attempts.push(rx);
                tokio::spawn(self.clone().shard_size_task(id, token.clone(), Some(tx)));
            }
        }
        Ok((watch_fire, first_attempts))
    }

    // === Per-shard size records ===

    async fn shard_size_task(
        self: Arc<Self>,
        id: String,
        token: CancellationToken,
        mut done: Option<oneshot::Sender<()>>,
    ) {
        let mut missing = 0u32;
        loop {
            let fetched = tokio::select! {
                _ = token.cancelled() => return,
                result = self.fetch_shard_size(&id) => result,
            };
            match fetched {
                Ok(watch_fire) => {
                    missing = 0;
                    if let Some(tx) = done.take() {
                        let _ = tx.send(());
                    }
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = watch_fire => {}
                    }
                }
                // a missing size record may simply not exist yet; give it a
                // bounded grace period before skipping the shard this pass
                Err(Error::Store(StoreError::NotFound(_))) => {
                    missing += 1;
                    if missing >= self.size_retry_limit {
                        self.events.report(Error::ShardSkipped(id.clone()));
                        if let Some(tx) = done.take() {
                            let _ = tx.send(());
                        }
                        return;
                    }
                    self.events.report(Error::SizeMissing(id.clone()));
                    if !self.sleep_retry(&token).await {
                        return;
                    }
                }
                Err(e) => {
                    self.events.report(e);
                    if !self.sleep_retry(&token).await {
                        return;
                    }
                }
            }
        }
    }

    async fn fetch_shard_size(&self, id: &str) -> Result<Watch, Error> {
        let (value, watch_fire) = self.store.get_watch(&paths::shard_size(id)).await?;
        let size: ShardSize = serde_json::from_slice(&value.data)?;
        self.registry.apply_size(id.to_string(), size);
        Ok(watch_fire)
    }

    // === Queue descriptor ===

    async fn queue_task(self: Arc<Self>, token: CancellationToken, mut done: Option<oneshot::Sender<()>>) {
        loop {
            let fetched = tokio::select! {
                _ = token.cancelled() => return,
                result = self.fetch_queue() => result,
            };
            match fetched {
                Ok(watch_fire) => {
                    if let Some(tx) = done.take() {
                        let _ = tx.send(());
                    }
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = watch_fire => {}
                    }
                }
                Err(e) => {
                    self.events.report(e);
                    if !self.sleep_retry(&token).await {
                        return;
                    }
                }
            }
        }
    }

    /// Rebuild the queue client from the current descriptor. The replacement
    /// is swapped in only once it reports ready, and the previous client is
    /// closed only after the swap, so in-flight writers always see exactly
    /// one live client.
    async fn fetch_queue(&self) -> Result<Watch, Error> {
        let (value, watch_fire) = self.store.get_watch(paths::QUEUE_INFO).await?;
        let descriptor: QueueDescriptor = serde_json::from_slice(&value.data)?;

        let fresh = self.queue_factory.build(&descriptor).await?;
        tracing::info!(
            "replication queue client ready ({} backends, key {})",
            descriptor.servers.len(),
            descriptor.key
        );
        if let Some(old) = self.queue.swap(Some(fresh)) {
            old.close().await;
        }
        Ok(watch_fire)
    }
}
