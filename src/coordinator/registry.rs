//! In-memory cluster mirror and write-shard selection
//!
//! The registry owns the coordinator's authoritative view of topology: the
//! node table, the shard table and the per-shard size table, each mirrored
//! from its coordination-store record. Only the configuration synchronizer
//! writes here; everything else reads snapshots. Selection is
//! capacity-weighted random: shards with more free space are proportionally
//! more likely to take the next write, which self-balances utilization across
//! heterogeneous shard sizes without tracking where the last write went.

use crate::common::{format_bytes, Error, Result};
use crate::coordinator::shard::Shard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

// === Wire types ===

/// Node table entry: a storage server address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

/// Shard table entry. `read_only` is absent on the wire when the shard is
/// writable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMeta {
    pub nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
}

/// Size record: capacity and current usage in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSize {
    pub capacity: u64,
    pub current: u64,
}

fn is_false(v: &bool) -> bool {
    !v
}

// === Cluster view ===

/// The in-memory mirror. Fields update independently: the node table is
/// replaced wholesale per fetch, shard and size entries are upserted per
/// record, so readers may observe one table a step behind another but never a
/// torn value. Locks are held only for the copy, never across a suspension
/// point.
#[derive(Default)]
pub struct ClusterView {
    nodes: RwLock<HashMap<String, NodeAddr>>,
    shards: RwLock<HashMap<String, ShardMeta>>,
    sizes: RwLock<HashMap<String, ShardSize>>,
}

impl ClusterView {
    pub fn node(&self, id: &str) -> Option<NodeAddr> {
        self.nodes.read().unwrap().get(id).cloned()
    }

    pub fn shard_meta(&self, id: &str) -> Option<ShardMeta> {
        self.shards.read().unwrap().get(id).cloned()
    }

    pub fn shard_size(&self, id: &str) -> Option<ShardSize> {
        self.sizes.read().unwrap().get(id).copied()
    }

    fn replace_nodes(&self, map: HashMap<String, NodeAddr>) {
        *self.nodes.write().unwrap() = map;
    }

    fn upsert_shard(&self, id: String, meta: ShardMeta) {
        self.shards.write().unwrap().insert(id, meta);
    }

    fn upsert_size(&self, id: String, size: ShardSize) {
        self.sizes.write().unwrap().insert(id, size);
    }
}

/// Cluster-wide capacity roll-up for stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterTotals {
    pub total_size: u64,
    pub used_size: u64,
    pub available_space: u64,
    pub total_shards: usize,
    pub writable_shards: usize,
}

// === Registry ===

pub struct ShardRegistry {
    view: Arc<ClusterView>,
    handles: Mutex<HashMap<String, Arc<Shard>>>,
    rng: Mutex<StdRng>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Registry with a caller-supplied random source, for deterministic
    /// selection in tests.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            view: Arc::new(ClusterView::default()),
            handles: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    pub fn view(&self) -> Arc<ClusterView> {
        self.view.clone()
    }

    // === Synchronizer-facing writes ===

    pub(crate) fn apply_nodes(&self, map: HashMap<String, NodeAddr>) {
        tracing::debug!("node table refreshed: {} nodes", map.len());
        self.view.replace_nodes(map);
    }

    pub(crate) fn apply_shard_meta(&self, id: String, meta: ShardMeta) {
        self.view.upsert_shard(id.clone(), meta);
        self.invalidate(&id);
    }

    pub(crate) fn apply_size(&self, id: String, size: ShardSize) {
        tracing::debug!(
            "shard {} size: {} / {}",
            id,
            format_bytes(size.current),
            format_bytes(size.capacity)
        );
        self.view.upsert_size(id.clone(), size);
        self.invalidate(&id);
    }

    fn invalidate(&self, id: &str) {
        self.handles.lock().unwrap().remove(id);
    }

    // === Shard handles ===

    pub(crate) fn cached_handle(&self, id: &str) -> Option<Arc<Shard>> {
        self.handles.lock().unwrap().get(id).cloned()
    }

    pub(crate) fn cache_handle(&self, id: &str, shard: Arc<Shard>) {
        self.handles.lock().unwrap().insert(id.to_string(), shard);
    }

    // === Selection ===

    /// Free-space ratio per writable shard. A shard is writable iff its
    /// metadata is known, `read_only` is clear and usage is strictly below
    /// capacity; a size record without metadata (or the reverse) is not yet
    /// writable.
    pub fn writable_shards(&self) -> HashMap<String, f64> {
        let shards = self.view.shards.read().unwrap();
        let sizes = self.view.sizes.read().unwrap();

        sizes
            .iter()
            .filter_map(|(id, size)| {
                let meta = shards.get(id)?;
                if meta.read_only || size.current >= size.capacity {
                    return None;
                }
                let free = 1.0 - size.current as f64 / size.capacity as f64;
                Some((id.clone(), free))
            })
            .collect()
    }

    /// Capacity-weighted random pick among writable shards: draw a uniform
    /// value in [0, sum of free ratios) and walk the shards in descending
    /// free-ratio order (ties broken by id, keeping the walk deterministic)
    /// until the running total covers the draw.
    pub fn select_write_shard(&self) -> Result<String> {
        let writable = self.writable_shards();
        if writable.is_empty() {
            return Err(Error::NoWritableShards);
        }

        let mut chances: Vec<(String, f64)> = writable.into_iter().collect();
        chances.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let sum: f64 = chances.iter().map(|(_, free)| free).sum();
        let draw = self.rng.lock().unwrap().gen::<f64>() * sum;

        let mut current = 0.0;
        for (id, free) in chances {
            current += free;
            if draw <= current {
                return Ok(id);
            }
        }

        // only reachable through a floating-point or logic defect
        Err(Error::SelectionInvariant)
    }

    pub(crate) fn totals(&self) -> ClusterTotals {
        let shards = self.view.shards.read().unwrap();
        let sizes = self.view.sizes.read().unwrap();

        let mut totals = ClusterTotals {
            total_shards: shards.len(),
            ..Default::default()
        };

        for (id, size) in sizes.iter() {
            totals.total_size += size.capacity;
            totals.used_size += size.current;

            let writable = shards
                .get(id)
                .map(|meta| !meta.read_only && size.current < size.capacity)
                .unwrap_or(false);
            if writable {
                totals.writable_shards += 1;
                totals.available_space += size.capacity - size.current;
            }
        }

        totals
    }
}

impl Default for ShardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_registry() -> ShardRegistry {
        ShardRegistry::with_rng(StdRng::seed_from_u64(7))
    }

    fn shard(registry: &ShardRegistry, id: &str, capacity: u64, current: u64, read_only: bool) {
        registry.apply_shard_meta(
            id.to_string(),
            ShardMeta {
                nodes: vec![format!("{}-a", id), format!("{}-b", id)],
                read_only,
            },
        );
        registry.apply_size(id.to_string(), ShardSize { capacity, current });
    }

    #[test]
    fn test_empty_size_table() {
        let registry = seeded_registry();
        assert!(registry.writable_shards().is_empty());
        assert!(matches!(
            registry.select_write_shard(),
            Err(Error::NoWritableShards)
        ));
    }

    #[test]
    fn test_read_only_never_selected() {
        let registry = seeded_registry();
        shard(&registry, "1", 1000, 0, true);
        shard(&registry, "2", 1000, 999, false);

        for _ in 0..200 {
            assert_eq!(registry.select_write_shard().unwrap(), "2");
        }
    }

    #[test]
    fn test_full_shard_never_selected() {
        let registry = seeded_registry();
        shard(&registry, "1", 1000, 1000, false);
        shard(&registry, "2", 1000, 100, false);

        for _ in 0..200 {
            assert_eq!(registry.select_write_shard().unwrap(), "2");
        }
    }

    #[test]
    fn test_metadata_without_size_not_writable() {
        let registry = seeded_registry();
        registry.apply_shard_meta(
            "1".to_string(),
            ShardMeta {
                nodes: vec!["a".into()],
                read_only: false,
            },
        );
        assert!(registry.writable_shards().is_empty());
    }

    #[test]
    fn test_zero_capacity_not_writable() {
        let registry = seeded_registry();
        shard(&registry, "1", 0, 0, false);
        assert!(registry.writable_shards().is_empty());
    }

    #[test]
    fn test_free_ratio_values() {
        let registry = seeded_registry();
        shard(&registry, "1", 1000, 250, false);

        let writable = registry.writable_shards();
        assert_eq!(writable.len(), 1);
        assert!((writable["1"] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_selection_tracks_free_ratio() {
        let registry = seeded_registry();
        // free ratios 0.75 : 0.5 : 0.25 => expected shares 1/2 : 1/3 : 1/6
        shard(&registry, "1", 1000, 250, false);
        shard(&registry, "2", 1000, 500, false);
        shard(&registry, "3", 1000, 750, false);

        const DRAWS: usize = 6_000;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..DRAWS {
            *counts
                .entry(registry.select_write_shard().unwrap())
                .or_default() += 1;
        }

        let share = |id: &str| counts[id] as f64 / DRAWS as f64;
        assert!((share("1") - 0.5).abs() < 0.05);
        assert!((share("2") - 1.0 / 3.0).abs() < 0.05);
        assert!((share("3") - 1.0 / 6.0).abs() < 0.05);
    }

    #[test]
    fn test_totals() {
        let registry = seeded_registry();
        shard(&registry, "1", 1000, 250, false);
        shard(&registry, "2", 500, 500, false); // full
        shard(&registry, "3", 200, 0, true); // read-only

        let totals = registry.totals();
        assert_eq!(totals.total_shards, 3);
        assert_eq!(totals.total_size, 1700);
        assert_eq!(totals.used_size, 750);
        assert_eq!(totals.writable_shards, 1);
        assert_eq!(totals.available_space, 750);
    }
}
