//! Shared helpers for kvsync integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::sync::Arc;

use kvsync::config::SyncConfig;
use kvsync::sync::{MemoryShard, MigrationContext, ShardStore, SyncEngine, Topology};
use kvsync_client::SlotRange;

// ============================================================================
// Topology helpers
// ============================================================================

/// A single in-memory node and its topology.
#[allow(dead_code)]
pub fn single(addr: &str) -> (Arc<MemoryShard>, Topology) {
    let shard = Arc::new(MemoryShard::new(addr));
    let topology = Topology::single(shard.clone());
    (shard, topology)
}

/// An in-memory cluster of `n` primaries with the slot space split evenly.
#[allow(dead_code)]
pub fn cluster(prefix: &str, n: u16) -> (Vec<Arc<MemoryShard>>, Topology) {
    let per_shard = kvsync_client::CLUSTER_SLOTS / n;
    let mut shards = Vec::new();
    let mut members: Vec<(Arc<dyn ShardStore>, Vec<SlotRange>)> = Vec::new();
    for i in 0..n {
        let start = i * per_shard;
        let end = if i == n - 1 {
            kvsync_client::CLUSTER_SLOTS - 1
        } else {
            start + per_shard - 1
        };
        let shard = Arc::new(MemoryShard::new(format!("{prefix}:{i}")));
        members.push((
            shard.clone() as Arc<dyn ShardStore>,
            vec![SlotRange::new(start, end)],
        ));
        shards.push(shard);
    }
    (shards, Topology::cluster(members).expect("non-empty cluster"))
}

/// Which shard of `shards` holds `key`, following the topology's routing.
#[allow(dead_code)]
pub fn owner<'a>(topology: &Topology, shards: &'a [Arc<MemoryShard>], key: &str) -> &'a MemoryShard {
    let idx = topology.route(key.as_bytes()).expect("slot is owned");
    &shards[idx]
}

// ============================================================================
// Engine helpers
// ============================================================================

/// Engine over two topologies with the given tuning.
#[allow(dead_code)]
pub fn engine(source: Topology, destination: Topology, options: SyncConfig) -> SyncEngine {
    SyncEngine::new(MigrationContext::new(source, destination, options))
}

/// Default tuning with a small page size so scans span several pages.
#[allow(dead_code)]
pub fn small_pages() -> SyncConfig {
    SyncConfig {
        page_size: 5,
        ..Default::default()
    }
}
