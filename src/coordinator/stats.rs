//! Aggregate cluster statistics

use crate::coordinator::registry::ShardRegistry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Cumulative upload counters, bumped by the HTTP surface.
#[derive(Default)]
pub struct UploadCounters {
    processed: AtomicU64,
    bytes: AtomicU64,
    failed: AtomicU64,
}

impl UploadCounters {
    pub fn record_success(&self, size: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot served by `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    /// Milliseconds since the coordinator was created
    pub uptime: u64,
    pub processed_uploads: u64,
    pub processed_bytes: u64,
    pub failed_uploads: u64,
    /// Capacity in bytes, read-only shards included
    pub total_size: u64,
    pub used_size: u64,
    /// used/total rounded up to 4 decimal digits; 1 when capacity is zero
    pub usage_ratio: f64,
    /// Free bytes across writable shards only
    pub available_space: u64,
    pub total_shards: usize,
    pub writable_shards: usize,
    /// Replication-repair backlog, fetched from the queue on demand
    pub queue_length: u64,
}

pub(crate) fn gather(
    registry: &ShardRegistry,
    counters: &UploadCounters,
    started: Instant,
    queue_length: u64,
) -> Stats {
    let totals = registry.totals();

    let usage_ratio = if totals.total_size > 0 {
        let ratio = totals.used_size as f64 / totals.total_size as f64;
        (ratio * 10_000.0).ceil() / 10_000.0
    } else {
        1.0
    };

    Stats {
        uptime: started.elapsed().as_millis() as u64,
        processed_uploads: counters.processed.load(Ordering::Relaxed),
        processed_bytes: counters.bytes.load(Ordering::Relaxed),
        failed_uploads: counters.failed.load(Ordering::Relaxed),
        total_size: totals.total_size,
        used_size: totals.used_size,
        usage_ratio,
        available_space: totals.available_space,
        total_shards: totals.total_shards,
        writable_shards: totals.writable_shards,
        queue_length,
    }
}
