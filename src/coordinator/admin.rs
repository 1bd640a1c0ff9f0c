//! Administrative operations
//!
//! Invoked by operator tooling, not end users. Each operation is a single
//! read-modify-CAS-write cycle against the relevant coordination-store
//! record; a version conflict with concurrent tooling surfaces as an error
//! instead of being retried, since these are one-off manual actions.

use crate::common::{Error, Result};
use crate::coordinator::registry::{NodeAddr, ShardMeta, ShardSize};
use crate::queue::{QueueDescriptor, QueueEndpoint};
use crate::store::{paths, MetaStore, StoreError};
use std::collections::HashMap;

fn not_initialized(error: StoreError) -> Error {
    match error {
        StoreError::NotFound(_) => Error::NotInitialized,
        other => other.into(),
    }
}

/// Add a storage server or update its address.
pub async fn add_server(store: &dyn MetaStore, id: &str, host: &str, port: u16) -> Result<()> {
    let value = store.get(paths::SERVERS_MAP).await.map_err(not_initialized)?;
    let mut map: HashMap<String, NodeAddr> = serde_json::from_slice(&value.data)?;

    map.insert(
        id.to_string(),
        NodeAddr {
            host: host.to_string(),
            port,
        },
    );

    store
        .set(paths::SERVERS_MAP, serde_json::to_vec(&map)?, value.version)
        .await?;
    Ok(())
}

/// Add a shard with its node list and capacity. New shards come up
/// read-only; an existing shard only gets its node list replaced and keeps
/// its size record.
pub async fn add_shard(
    store: &dyn MetaStore,
    id: &str,
    nodes: Vec<String>,
    capacity: u64,
) -> Result<()> {
    let value = store.get(paths::SHARDS_MAP).await.map_err(not_initialized)?;
    let mut map: HashMap<String, ShardMeta> = serde_json::from_slice(&value.data)?;

    let meta = map.entry(id.to_string()).or_insert_with(|| ShardMeta {
        nodes: Vec::new(),
        read_only: true,
    });
    meta.nodes = nodes;

    store
        .set(paths::SHARDS_MAP, serde_json::to_vec(&map)?, value.version)
        .await?;

    let size = ShardSize {
        capacity,
        current: 0,
    };
    match store
        .create(&paths::shard_size(id), serde_json::to_vec(&size)?)
        .await
    {
        Ok(()) | Err(StoreError::NodeExists(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Clear a shard's read-only flag, opening it for writes.
pub async fn enable_shard(store: &dyn MetaStore, id: &str) -> Result<()> {
    let value = store.get(paths::SHARDS_MAP).await.map_err(not_initialized)?;
    let mut map: HashMap<String, ShardMeta> = serde_json::from_slice(&value.data)?;

    let meta = map
        .get_mut(id)
        .ok_or_else(|| Error::ShardUnknown(id.to_string()))?;
    meta.read_only = false;

    store
        .set(paths::SHARDS_MAP, serde_json::to_vec(&map)?, value.version)
        .await?;
    Ok(())
}

/// Replace the replication-queue endpoints and routing key.
pub async fn set_queue_info(
    store: &dyn MetaStore,
    servers: Vec<QueueEndpoint>,
    key: &str,
) -> Result<()> {
    let value = store.get(paths::QUEUE_INFO).await.map_err(not_initialized)?;
    let mut descriptor: QueueDescriptor = serde_json::from_slice(&value.data)?;

    descriptor.servers = servers;
    descriptor.key = key.to_string();

    store
        .set(
            paths::QUEUE_INFO,
            serde_json::to_vec(&descriptor)?,
            value.version,
        )
        .await?;
    Ok(())
}
