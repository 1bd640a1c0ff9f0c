//! Shard usage accounting against the coordination store
//!
//! Both strategies end in the same read-modify-write: fetch the size record
//! with its version, add the delta, write back conditioned on that version.
//! A version conflict means somebody else got there first; the whole cycle is
//! retried immediately, with no backoff, and is expected to converge under
//! moderate contention. The attempt limit is a safety valve against
//! pathological livelock, set far beyond anything one counter per shard
//! should see.

use crate::common::{AccountingMode, Error, Result};
use crate::coordinator::registry::ShardSize;
use crate::store::{paths, MetaStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub(crate) async fn apply_increment(
    store: &dyn MetaStore,
    path: &str,
    delta: u64,
    attempt_limit: u32,
) -> Result<()> {
    let mut conflicts = 0;
    loop {
        let value = store.get(path).await?;
        let mut size: ShardSize = serde_json::from_slice(&value.data)?;
        size.current += delta;

        match store
            .set(path, serde_json::to_vec(&size)?, value.version)
            .await
        {
            Ok(()) => return Ok(()),
            Err(StoreError::BadVersion) => {
                conflicts += 1;
                if conflicts >= attempt_limit {
                    return Err(Error::CasExhausted {
                        path: path.to_string(),
                        attempts: conflicts,
                    });
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// One compare-and-swap round trip per increment.
pub struct SizeUpdater {
    store: Arc<dyn MetaStore>,
    attempt_limit: u32,
}

impl SizeUpdater {
    pub fn new(store: Arc<dyn MetaStore>, attempt_limit: u32) -> Self {
        Self {
            store,
            attempt_limit,
        }
    }

    pub async fn increment(&self, shard_id: &str, delta: u64) -> Result<()> {
        apply_increment(
            &*self.store,
            &paths::shard_size(shard_id),
            delta,
            self.attempt_limit,
        )
        .await
    }
}

struct BatchState {
    pending: u64,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    armed: bool,
}

/// Coalesces increments for one shard over a fixed window into a single
/// store round trip. A window timer is armed only when none is running;
/// increments arriving while a swept delta is being applied accumulate for
/// the next window. All waiters folded into one flush resolve together, in
/// reverse arrival order, with that flush's outcome.
#[derive(Clone)]
pub struct BatchedIncrementor {
    inner: Arc<BatchInner>,
}

struct BatchInner {
    store: Arc<dyn MetaStore>,
    path: String,
    window: Duration,
    attempt_limit: u32,
    state: Mutex<BatchState>,
    // flushes for one shard never overlap, even if windows do
    flush_gate: tokio::sync::Mutex<()>,
}

impl BatchedIncrementor {
    pub fn new(
        store: Arc<dyn MetaStore>,
        shard_id: &str,
        window: Duration,
        attempt_limit: u32,
    ) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                store,
                path: paths::shard_size(shard_id),
                window,
                attempt_limit,
                state: Mutex::new(BatchState {
                    pending: 0,
                    waiters: Vec::new(),
                    armed: false,
                }),
                flush_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub async fn increment(&self, delta: u64) -> Result<()> {
        match self.enqueue(delta).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Other("size update dropped".into())),
        }
    }

    fn enqueue(&self, delta: u64) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.state.lock().unwrap();
        state.pending += delta;
        state.waiters.push(tx);
        if !state.armed {
            state.armed = true;
            tokio::spawn(self.inner.clone().flush_after_window());
        }
        rx
    }
}

impl BatchInner {
    async fn flush_after_window(self: Arc<Self>) {
        tokio::time::sleep(self.window).await;
        let _serialized = self.flush_gate.lock().await;

        let (delta, waiters) = {
            let mut state = self.state.lock().unwrap();
            state.armed = false;
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.waiters),
            )
        };
        if waiters.is_empty() {
            return;
        }

        let outcome = apply_increment(&*self.store, &self.path, delta, self.attempt_limit).await;
        let failure = outcome.err().map(|e| e.to_string());
        for tx in waiters.into_iter().rev() {
            let result = match &failure {
                None => Ok(()),
                Some(message) => Err(Error::Other(message.clone())),
            };
            let _ = tx.send(result);
        }
    }
}

/// Integrator-selected accounting strategy, shared by every write path.
pub struct SizeAccounting {
    mode: AccountingMode,
    store: Arc<dyn MetaStore>,
    window: Duration,
    attempt_limit: u32,
    direct: SizeUpdater,
    batched: Mutex<HashMap<String, BatchedIncrementor>>,
}

impl SizeAccounting {
    pub fn new(
        mode: AccountingMode,
        store: Arc<dyn MetaStore>,
        window: Duration,
        attempt_limit: u32,
    ) -> Self {
        Self {
            mode,
            direct: SizeUpdater::new(store.clone(), attempt_limit),
            store,
            window,
            attempt_limit,
            batched: Mutex::new(HashMap::new()),
        }
    }

    pub async fn increment(&self, shard_id: &str, delta: u64) -> Result<()> {
        match self.mode {
            AccountingMode::Direct => self.direct.increment(shard_id, delta).await,
            AccountingMode::Batched => {
                let incrementor = self.incrementor(shard_id);
                incrementor.increment(delta).await
            }
        }
    }

    fn incrementor(&self, shard_id: &str) -> BatchedIncrementor {
        let mut batched = self.batched.lock().unwrap();
        batched
            .entry(shard_id.to_string())
            .or_insert_with(|| {
                BatchedIncrementor::new(
                    self.store.clone(),
                    shard_id,
                    self.window,
                    self.attempt_limit,
                )
            })
            .clone()
    }
}
