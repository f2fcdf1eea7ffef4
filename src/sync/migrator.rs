//! Batched migrator: reads a key from the source and writes it to the
//! destination, directly or through a bounded pipeline batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info};

use super::context::MigrationContext;
use super::store::ShardStore;
use crate::config::WriteMode;

/// Turn a raw `PTTL` reading into a `RESTORE` TTL.
///
/// Negative readings (`-1` no expiry, `-2` missing) become `0`, which
/// `RESTORE` takes as "no expiry".
pub fn normalize_ttl(pttl_ms: i64) -> u64 {
    u64::try_from(pttl_ms).unwrap_or(0)
}

/// One pending destination write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Key name.
    pub key: Bytes,
    /// Serialized value from the source.
    pub payload: Bytes,
    /// TTL to restore with; `0` means no expiry.
    pub ttl_ms: u64,
}

/// Pending writes awaiting one flush. Never holds more than `threshold`.
#[derive(Debug)]
pub struct PipelineBatch {
    records: Vec<MigrationRecord>,
    threshold: usize,
}

impl PipelineBatch {
    /// Empty batch flushed at `threshold` records (at least one).
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            records: Vec::with_capacity(threshold),
            threshold,
        }
    }

    /// Append a record. Returns `true` when the batch is full and must be
    /// flushed before the next push.
    pub fn push(&mut self, record: MigrationRecord) -> bool {
        self.records.push(record);
        self.is_full()
    }

    /// `true` once the threshold is reached.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.threshold
    }

    /// Pending records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take every pending record, leaving the batch empty.
    pub fn take(&mut self) -> Vec<MigrationRecord> {
        std::mem::replace(&mut self.records, Vec::with_capacity(self.threshold))
    }
}

/// Copies keys for one scan loop (one source shard, or one key file).
///
/// Writes count as migrated only once the destination acknowledges them.
/// Anything else is counted as failed; nothing is retried.
pub struct Migrator {
    ctx: Arc<MigrationContext>,
    batch: PipelineBatch,
}

impl Migrator {
    /// Migrator batching at the run's configured threshold.
    pub fn new(ctx: Arc<MigrationContext>) -> Self {
        let batch = PipelineBatch::new(ctx.options.batch_threshold);
        Self { ctx, batch }
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Copy `key` from `source` to the destination.
    pub async fn migrate(&mut self, source: &dyn ShardStore, key: Bytes) {
        let serialized = match source.dump_with_ttl(&key).await {
            Ok(Some(serialized)) => serialized,
            Ok(None) => {
                debug!(key = %String::from_utf8_lossy(&key), "key vanished before DUMP");
                return;
            }
            Err(e) => {
                self.ctx.record_failure(&key, &e.to_string());
                return;
            }
        };

        let record = MigrationRecord {
            key,
            payload: serialized.payload,
            ttl_ms: normalize_ttl(serialized.pttl_ms),
        };

        match self.ctx.options.write_mode {
            WriteMode::Direct => self.write_direct(record).await,
            WriteMode::Batched => {
                if self.batch.push(record) {
                    self.flush().await;
                }
            }
        }
    }

    /// Flush whatever is still pending. Call when the scan loop ends.
    pub async fn finish(mut self) {
        self.flush().await;
    }

    async fn write_direct(&self, record: MigrationRecord) {
        let destination = &self.ctx.destination;
        let Some(idx) = destination.route(&record.key) else {
            self.ctx.record_failure(&record.key, "no destination shard owns key slot");
            return;
        };
        match destination.shards()[idx].store().restore(&record).await {
            Ok(()) => self.ctx.counters.add_migrated(1),
            Err(e) => self.ctx.record_failure(&record.key, &e.to_string()),
        }
    }

    /// Send the pending batch, one pipelined request per destination shard.
    async fn flush(&mut self) {
        let records = self.batch.take();
        if records.is_empty() {
            return;
        }

        let destination = &self.ctx.destination;
        let mut groups: BTreeMap<usize, Vec<MigrationRecord>> = BTreeMap::new();
        for record in records {
            match destination.route(&record.key) {
                Some(idx) => groups.entry(idx).or_default().push(record),
                None => self
                    .ctx
                    .record_failure(&record.key, "no destination shard owns key slot"),
            }
        }

        for (idx, group) in groups {
            let store = destination.shards()[idx].store();
            match store.restore_batch(&group).await {
                Ok(acks) => {
                    let mut acknowledged = 0;
                    for (record, ack) in group.iter().zip(acks) {
                        match ack {
                            Ok(()) => acknowledged += 1,
                            Err(msg) => self.ctx.record_failure(&record.key, &msg),
                        }
                    }
                    self.ctx.counters.add_migrated(acknowledged);
                }
                Err(e) => {
                    error!(
                        shard = store.addr(),
                        keys = group.len(),
                        error = %e,
                        "pipeline flush failed"
                    );
                    for record in &group {
                        self.ctx.record_failure(&record.key, &e.to_string());
                    }
                }
            }
        }

        let totals = self.ctx.counters.snapshot();
        info!(
            migrated = totals.migrated,
            skipped = totals.skipped,
            failed = totals.failed,
            "Migrated {} keys, Skipped {}",
            totals.migrated,
            totals.skipped
        );
    }
}
