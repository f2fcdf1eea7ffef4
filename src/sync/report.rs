//! Final run report.

use std::fmt;

use serde::Serialize;

use super::context::FailureList;
use super::counters::CounterSnapshot;
use super::cursor::ShardOutcome;

/// Scan coverage of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardReport {
    /// Shard address.
    pub addr: String,
    /// How far the scan got.
    #[serde(flatten)]
    pub outcome: ShardOutcome,
}

impl ShardReport {
    /// Report for the shard at `addr`.
    pub fn new(addr: impl Into<String>, outcome: ShardOutcome) -> Self {
        Self {
            addr: addr.into(),
            outcome,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Final totals.
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    /// Keys that could not be migrated (bounded).
    pub failures: FailureList,
    /// Destination keys in the checksum index.
    pub indexed_keys: usize,
    /// Destination pre-scan coverage.
    pub destination_shards: Vec<ShardReport>,
    /// Source scan coverage; empty in key-file mode.
    pub source_shards: Vec<ShardReport>,
    /// Wall-clock duration.
    pub elapsed_ms: u64,
}

impl RunReport {
    /// `true` when every shard scan completed and no key failed.
    pub fn is_complete(&self) -> bool {
        self.counters.failed == 0
            && self
                .destination_shards
                .iter()
                .chain(&self.source_shards)
                .all(|shard| shard.outcome.is_complete())
    }

    /// Shards whose scan did not complete.
    pub fn incomplete_shards(&self) -> impl Iterator<Item = &ShardReport> {
        self.destination_shards
            .iter()
            .chain(&self.source_shards)
            .filter(|shard| !shard.outcome.is_complete())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Migrated {} keys, Skipped {}",
            self.counters.migrated, self.counters.skipped
        )?;
        if self.counters.failed > 0 {
            write!(f, ", Failed {}", self.counters.failed)?;
        }
        Ok(())
    }
}
