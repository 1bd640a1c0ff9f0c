//! # satchel
//!
//! Placement-and-replication coordinator for a sharded blob-storage cluster.
//! Storage is organized as shards, each a set of redundant nodes; satchel
//! answers two questions continuously: which shard takes the next write, and
//! how that write spreads across the shard's nodes despite individual node
//! failures.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────┐      ┌───────────────────┐
//!            │  Coordination store  │      │ Replication queue │
//!            │  (watched records)   │      │  (repair pushes)  │
//!            └──────────┬───────────┘      └─────────┬─────────┘
//!                       │ watch/get/CAS              │ push/len
//!            ┌──────────▼──────────────────────────────────────┐
//!            │                  Coordinator                    │
//!            │  sync ─▶ registry (cluster mirror, selection)   │
//!            │  sizes (CAS usage counters, optional batching)  │
//!            │  shard (spool ▶ account ▶ distribute ▶ repair)  │
//!            └──────────┬──────────────┬─────────────┬─────────┘
//!                       │ PUT          │ PUT         │ PUT
//!                 ┌─────▼────┐   ┌─────▼────┐   ┌────▼─────┐
//!                 │  node a  │   │  node b  │   │  node c  │
//!                 │ (shard 1)│   │ (shard 1)│   │ (shard 1)│
//!                 └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! Cluster topology (node addresses, shard membership, capacities, queue
//! location) lives in an external strongly-consistent store and is pushed to
//! the coordinator through change watches; a shard is writable while it has
//! free space and is not flagged read-only, and writable shards take new
//! uploads with probability proportional to their free-space ratio.
//!
//! ## Usage
//!
//! ```bash
//! # single-process development mode (in-memory store and queue)
//! satchel-coord serve --bind 0.0.0.0:9000
//!
//! # upload a blob
//! curl -X PUT --data-binary @photo.jpg http://localhost:9000/photos/1.jpg
//!
//! # cluster statistics
//! curl http://localhost:9000/stats
//! ```

pub mod common;
pub mod coordinator;
pub mod queue;
pub mod store;

// Re-export commonly used types
pub use common::{AccountingMode, CoordinatorConfig, Error, Result};
pub use coordinator::Coordinator;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
