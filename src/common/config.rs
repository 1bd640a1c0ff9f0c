//! Configuration for the coordinator

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Coordinator configuration. Cluster topology itself (nodes, shards,
/// capacities, queue endpoints) lives in the coordination store and is never
/// configured locally; this covers only the process-local knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the client-facing HTTP API
    pub bind_addr: SocketAddr,

    /// Size accounting strategy
    #[serde(default = "default_accounting")]
    pub accounting: AccountingMode,

    /// Directory for upload spool files (system temp dir when unset)
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,

    /// Delay between synchronization retries
    #[serde(default = "default_sync_retry_ms")]
    pub sync_retry_ms: u64,

    /// Missing-size-record fetches tolerated before a shard is skipped
    /// for the current synchronization pass
    #[serde(default = "default_size_retry_limit")]
    pub size_retry_limit: u32,

    /// Coalescing window for batched size accounting
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Version conflicts tolerated by one size update before giving up
    #[serde(default = "default_cas_attempt_limit")]
    pub cas_attempt_limit: u32,
}

/// How shard usage counters are pushed to the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AccountingMode {
    /// One compare-and-swap round trip per upload
    Direct,
    /// Coalesce increments over a window into a single round trip
    Batched,
}

fn default_accounting() -> AccountingMode {
    AccountingMode::Direct
}
fn default_sync_retry_ms() -> u64 {
    1_000
}
fn default_size_retry_limit() -> u32 {
    3
}
fn default_batch_window_ms() -> u64 {
    3_000
}
fn default_cas_attempt_limit() -> u32 {
    100
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".parse().unwrap(),
            accounting: default_accounting(),
            spool_dir: None,
            sync_retry_ms: default_sync_retry_ms(),
            size_retry_limit: default_size_retry_limit(),
            batch_window_ms: default_batch_window_ms(),
            cas_attempt_limit: default_cas_attempt_limit(),
        }
    }
}

impl CoordinatorConfig {
    pub fn sync_retry(&self) -> Duration {
        Duration::from_millis(self.sync_retry_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}
