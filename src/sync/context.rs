//! Shared state for one run.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use super::counters::RunCounters;
use super::topology::Topology;
use crate::config::SyncConfig;

/// Key names of failed writes, capped at the configured limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureList {
    /// Failed keys, in the order they failed.
    pub keys: Vec<String>,
    /// More keys failed than were kept.
    pub truncated: bool,
}

/// Everything the shard loops share: both topologies, tuning, totals.
///
/// Built once and handed to the engine behind an `Arc`.
pub struct MigrationContext {
    /// Where keys are read from.
    pub source: Topology,
    /// Where keys are written and indexed.
    pub destination: Topology,
    /// Run tuning.
    pub options: SyncConfig,
    /// Live totals.
    pub counters: RunCounters,
    failures: Mutex<FailureList>,
}

impl MigrationContext {
    /// Fresh context with zeroed counters.
    pub fn new(source: Topology, destination: Topology, options: SyncConfig) -> Self {
        Self {
            source,
            destination,
            options,
            counters: RunCounters::new(),
            failures: Mutex::new(FailureList::default()),
        }
    }

    /// Count a failed key and remember its name while under the limit.
    pub fn record_failure(&self, key: &[u8], reason: &str) {
        let key = String::from_utf8_lossy(key).into_owned();
        warn!(key = %key, reason, "key not migrated");
        self.counters.add_failed(1);

        let mut failures = self.failures.lock();
        if failures.keys.len() < self.options.failure_list_limit {
            failures.keys.push(key);
        } else {
            failures.truncated = true;
        }
    }

    /// Copy of the failure list.
    pub fn failures(&self) -> FailureList {
        self.failures.lock().clone()
    }
}
