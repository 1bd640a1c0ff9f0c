//! Upload distribution and repair scheduling

mod common;

use axum::http::StatusCode;
use common::*;
use satchel::common::{AccountingMode, Error};
use std::sync::Arc;
use satchel::store::MemoryStore;

#[tokio::test]
async fn test_upload_falls_back_until_a_node_accepts() {
    let dead_a = spawn_node(StatusCode::INTERNAL_SERVER_ERROR).await;
    let dead_b = spawn_node(StatusCode::SERVICE_UNAVAILABLE).await;
    let (live_c, seen) = spawn_recording_node().await;

    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        &[
            ("a".to_string(), dead_a),
            ("b".to_string(), dead_b),
            ("c".to_string(), live_c),
        ],
        &[ShardSpec {
            id: "1",
            nodes: vec!["a".into(), "b".into(), "c".into()],
            capacity: 1000,
            current: 0,
            read_only: false,
        }],
    )
    .await;
    let cluster = boot(store, AccountingMode::Direct).await;

    let shard_id = cluster
        .coordinator
        .upload("/photos/1.jpg?v=2", 11, body_of(b"hello world"))
        .await
        .unwrap();
    assert_eq!(shard_id, "1");

    // the payload reached the one live node, path forwarded verbatim
    let uploads = seen.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "/photos/1.jpg?v=2");
    assert_eq!(uploads[0].1, b"hello world".to_vec());

    // exactly two repair pushes, to the nodes that missed the direct write,
    // both sourced from the winner
    let factory = cluster.factory.clone();
    eventually("repair pushes", || {
        let factory = factory.clone();
        async move { factory.latest().map(|q| q.jobs().len() == 2).unwrap_or(false) }
    })
    .await;

    let mut jobs = cluster.factory.latest().unwrap().jobs();
    jobs.sort_by(|x, y| x.target.cmp(&y.target));
    assert_eq!(jobs[0].target, "a");
    assert_eq!(jobs[1].target, "b");
    for job in &jobs {
        assert_eq!(job.sources, vec!["c".to_string()]);
        assert_eq!(job.path, "/photos/1.jpg?v=2");
    }

    // accounting lands asynchronously
    let store = cluster.store.clone();
    eventually("size accounting", || {
        let store = store.clone();
        async move { stored_size(&store, "1").await.current == 11 }
    })
    .await;
}

#[tokio::test]
async fn test_upload_fails_when_every_node_rejects() {
    let dead_a = spawn_node(StatusCode::INTERNAL_SERVER_ERROR).await;
    let dead_b = spawn_node(StatusCode::INTERNAL_SERVER_ERROR).await;

    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        &[("a".to_string(), dead_a), ("b".to_string(), dead_b)],
        &[ShardSpec {
            id: "1",
            nodes: vec!["a".into(), "b".into()],
            capacity: 1000,
            current: 0,
            read_only: false,
        }],
    )
    .await;
    let cluster = boot(store, AccountingMode::Direct).await;

    let err = cluster
        .coordinator
        .upload("/photos/1.jpg", 11, body_of(b"hello world"))
        .await
        .unwrap_err();

    // the terminal error names the shard's node list
    let message = err.to_string();
    assert!(matches!(err, Error::UploadFailed { .. }));
    assert!(message.contains('a') && message.contains('b'));

    // no repair pushes were scheduled
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(cluster.factory.latest().unwrap().jobs().is_empty());

    // the spool file is gone
    let leftovers = std::fs::read_dir(cluster.spool_dir.path()).unwrap().count();
    assert_eq!(leftovers, 0);

    let stats = cluster.coordinator.stats().await.unwrap();
    assert_eq!(stats.failed_uploads, 1);
    assert_eq!(stats.processed_uploads, 0);
}

#[tokio::test]
async fn test_unresolvable_node_is_a_node_failure() {
    let (live, _seen) = spawn_recording_node().await;

    let store = Arc::new(MemoryStore::new());
    // "ghost" is referenced by the shard but absent from the node table
    seed(
        &store,
        &[("c".to_string(), live)],
        &[ShardSpec {
            id: "1",
            nodes: vec!["ghost".into(), "c".into()],
            capacity: 1000,
            current: 0,
            read_only: false,
        }],
    )
    .await;
    let cluster = boot(store, AccountingMode::Direct).await;

    let shard_id = cluster
        .coordinator
        .upload("/blob", 3, body_of(b"abc"))
        .await
        .unwrap();
    assert_eq!(shard_id, "1");

    // the ghost still gets a repair push; the replicator owns that failure
    let factory = cluster.factory.clone();
    eventually("repair push", || {
        let factory = factory.clone();
        async move { factory.latest().map(|q| q.jobs().len() == 1).unwrap_or(false) }
    })
    .await;
    assert_eq!(cluster.factory.latest().unwrap().jobs()[0].target, "ghost");
}

#[tokio::test]
async fn test_batched_accounting_coalesces_uploads() {
    let (live, _seen) = spawn_recording_node().await;

    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        &[("c".to_string(), live)],
        &[ShardSpec {
            id: "1",
            nodes: vec!["c".into()],
            capacity: 10_000,
            current: 0,
            read_only: false,
        }],
    )
    .await;
    let cluster = boot(store, AccountingMode::Batched).await;

    for _ in 0..3 {
        cluster
            .coordinator
            .upload("/blob", 11, body_of(b"hello world"))
            .await
            .unwrap();
    }

    let store = cluster.store.clone();
    eventually("coalesced accounting", || {
        let store = store.clone();
        async move { stored_size(&store, "1").await.current == 33 }
    })
    .await;
}
