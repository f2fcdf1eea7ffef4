//! Top-level run orchestration.
//!
//! 1. Index the destination (every shard, to completion).
//! 2. Walk the source shards concurrently, or the key file, deciding copy or
//!    skip per key and migrating what differs.
//! 3. Report the totals and per-shard coverage.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{info, warn};

use super::context::MigrationContext;
use super::cursor::ShardScanner;
use super::decision::{decide, Decision};
use super::index::ChecksumIndex;
use super::keyfile;
use super::migrator::Migrator;
use super::report::{RunReport, ShardReport};
use super::store::ShardStore;
use super::topology::Topology;
use crate::error::Result;

/// Runs one incremental copy from source to destination.
pub struct SyncEngine {
    ctx: Arc<MigrationContext>,
}

impl SyncEngine {
    /// Engine over a prepared context.
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Shared run state, for inspecting counters mid-run.
    pub fn context(&self) -> &MigrationContext {
        &self.ctx
    }

    /// Index the destination, then migrate every source key that differs.
    ///
    /// Scan and write failures are absorbed into the report. Only an
    /// unreadable key file fails the run, before the destination is touched.
    pub async fn run(&self) -> Result<RunReport> {
        let started = Instant::now();

        let listed = match &self.ctx.options.key_file {
            Some(path) => {
                let keys = keyfile::read_keys(path).await?;
                info!(keys = keys.len(), path = %path.display(), "migrating keys from file");
                Some(keys)
            }
            None => None,
        };

        let (index, destination_shards) =
            ChecksumIndex::build(&self.ctx.destination, &self.ctx.options).await;

        let source_shards = match listed {
            Some(keys) => {
                self.migrate_listed(&index, keys).await;
                Vec::new()
            }
            None => self.migrate_shards(index.clone()).await,
        };

        let counters = self.ctx.counters.snapshot();
        info!(
            migrated = counters.migrated,
            skipped = counters.skipped,
            failed = counters.failed,
            "Migrated {} keys, Skipped {}",
            counters.migrated,
            counters.skipped
        );

        Ok(RunReport {
            counters,
            failures: self.ctx.failures(),
            indexed_keys: index.len(),
            destination_shards,
            source_shards,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn migrate_shards(&self, index: Arc<ChecksumIndex>) -> Vec<ShardReport> {
        let ctx = self.ctx.clone();
        self.ctx
            .source
            .for_each_shard(self.ctx.options.max_concurrent_shards, |store| {
                migrate_shard(ctx.clone(), index.clone(), store)
            })
            .await
    }

    /// Key-file mode: hash each listed key on the source shard that owns
    /// it, then decide and migrate through a single batch.
    async fn migrate_listed(&self, index: &ChecksumIndex, keys: Vec<Bytes>) {
        let source = &self.ctx.source;
        let mut migrator = Migrator::new(self.ctx.clone());

        for key in keys {
            let Some(idx) = source.route(&key) else {
                self.ctx
                    .record_failure(&key, "no source shard owns key slot");
                continue;
            };
            let store = source.shards()[idx].store();
            match store.content_hash(&key).await {
                Ok(Some(hash)) => match decide(index, &key, &hash) {
                    Decision::Skip => self.ctx.counters.add_skipped(1),
                    Decision::Copy => migrator.migrate(store.as_ref(), key).await,
                },
                Ok(None) => {
                    warn!(key = %String::from_utf8_lossy(&key), "listed key not found in source");
                }
                Err(e) => self.ctx.record_failure(&key, &e.to_string()),
            }
        }

        migrator.finish().await;
    }
}

/// One source shard's scan loop: page, decide, migrate, then flush.
async fn migrate_shard(
    ctx: Arc<MigrationContext>,
    index: Arc<ChecksumIndex>,
    store: Arc<dyn ShardStore>,
) -> ShardReport {
    let mut scanner = ShardScanner::new(
        store.clone(),
        ctx.options.page_size,
        ctx.options.match_pattern(),
    );
    let mut migrator = Migrator::new(ctx.clone());

    while let Some(page) = scanner.next_page().await {
        for (key, hash) in page.into_entries() {
            match decide(&index, &key, &hash) {
                Decision::Skip => ctx.counters.add_skipped(1),
                Decision::Copy => migrator.migrate(store.as_ref(), key).await,
            }
        }
    }
    migrator.finish().await;

    ShardReport::new(store.addr(), scanner.into_outcome())
}

/// Every key on every shard matching `pattern`, in shard order.
///
/// Uses `KEYS`, not the checksum engine.
pub async fn list_keys(topology: &Topology, pattern: &str) -> Result<Vec<Bytes>> {
    let pattern = Arc::new(pattern.to_string());
    let per_shard = topology
        .for_each_shard(topology.len(), |store| {
            let pattern = pattern.clone();
            async move { store.keys(&pattern).await }
        })
        .await;

    let mut keys = Vec::new();
    for shard_keys in per_shard {
        keys.extend(shard_keys?);
    }
    Ok(keys)
}
