//! Shared helpers for integration tests: an in-memory cluster boot and stub
//! storage nodes speaking just enough HTTP to accept (or reject) uploads.

#![allow(dead_code)]

use axum::extract::Request;
use axum::http::StatusCode;
use axum::Router;
use satchel::common::{AccountingMode, CoordinatorConfig, Error};
use satchel::coordinator::registry::{NodeAddr, ShardMeta, ShardSize};
use satchel::coordinator::Coordinator;
use satchel::queue::{MemoryQueueFactory, QueueDescriptor};
use satchel::store::{paths, MemoryStore, MetaStore};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct TestCluster {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<MemoryStore>,
    pub factory: Arc<MemoryQueueFactory>,
    pub events: UnboundedReceiver<Error>,
    pub spool_dir: TempDir,
}

/// Node that answers every request with a fixed status.
pub async fn spawn_node(status: StatusCode) -> SocketAddr {
    let app = Router::new().fallback(move || async move { status });
    serve(app).await
}

/// Node that records uploads (path with query, body bytes) and answers 201.
pub async fn spawn_recording_node() -> (SocketAddr, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
    let seen: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback({
        let seen = seen.clone();
        move |request: Request| {
            let seen = seen.clone();
            async move {
                let path = request
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/")
                    .to_string();
                let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                    .await
                    .unwrap();
                seen.lock().unwrap().push((path, body.to_vec()));
                StatusCode::CREATED
            }
        }
    });
    let addr = serve(app).await;
    (addr, seen)
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub struct ShardSpec {
    pub id: &'static str,
    pub nodes: Vec<String>,
    pub capacity: u64,
    pub current: u64,
    pub read_only: bool,
}

/// Seed the store with a complete topology so the first synchronization
/// completes without retries.
pub async fn seed(store: &MemoryStore, servers: &[(String, SocketAddr)], shards: &[ShardSpec]) {
    let server_map: HashMap<String, NodeAddr> = servers
        .iter()
        .map(|(id, addr)| {
            (
                id.clone(),
                NodeAddr {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                },
            )
        })
        .collect();
    store
        .create(paths::SERVERS_MAP, serde_json::to_vec(&server_map).unwrap())
        .await
        .unwrap();

    let shard_map: HashMap<String, ShardMeta> = shards
        .iter()
        .map(|spec| {
            (
                spec.id.to_string(),
                ShardMeta {
                    nodes: spec.nodes.clone(),
                    read_only: spec.read_only,
                },
            )
        })
        .collect();
    store
        .create(paths::SHARDS_MAP, serde_json::to_vec(&shard_map).unwrap())
        .await
        .unwrap();

    for spec in shards {
        let size = ShardSize {
            capacity: spec.capacity,
            current: spec.current,
        };
        store
            .create(
                &paths::shard_size(spec.id),
                serde_json::to_vec(&size).unwrap(),
            )
            .await
            .unwrap();
    }

    let queue = QueueDescriptor {
        servers: vec![],
        key: "repair".into(),
    };
    store
        .create(paths::QUEUE_INFO, serde_json::to_vec(&queue).unwrap())
        .await
        .unwrap();
}

/// Boot a coordinator over a seeded store and wait for readiness. Retry
/// cadences are shortened so missing-record paths resolve in test time.
pub async fn boot(
    store: Arc<MemoryStore>,
    accounting: AccountingMode,
) -> TestCluster {
    let spool_dir = TempDir::new().unwrap();
    let config = CoordinatorConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        accounting,
        spool_dir: Some(spool_dir.path().to_path_buf()),
        sync_retry_ms: 50,
        batch_window_ms: 200,
        ..Default::default()
    };

    let factory = Arc::new(MemoryQueueFactory::new());
    let (coordinator, events) = Coordinator::start(config, store.clone(), factory.clone());
    coordinator.ready().await;

    TestCluster {
        coordinator,
        store,
        factory,
        events,
        spool_dir,
    }
}

/// Poll a condition until it holds, panicking after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Current value of a shard's size record.
pub async fn stored_size(store: &MemoryStore, id: &str) -> ShardSize {
    let value = store.get(&paths::shard_size(id)).await.unwrap();
    serde_json::from_slice(&value.data).unwrap()
}

pub fn body_of(bytes: &'static [u8]) -> impl futures_util::Stream<Item = Result<bytes::Bytes, std::io::Error>> + Unpin {
    futures_util::stream::iter(vec![Ok(bytes::Bytes::from_static(bytes))])
}
