//! Process-wide run totals.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Migrated, skipped and failed key totals, shared by every shard loop.
#[derive(Debug, Default)]
pub struct RunCounters {
    migrated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`RunCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Keys written and acknowledged by the destination.
    pub migrated: u64,
    /// Keys whose destination content already matched.
    pub skipped: u64,
    /// Keys whose read or write failed.
    pub failed: u64,
}

impl RunCounters {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count acknowledged writes.
    pub fn add_migrated(&self, n: u64) {
        self.migrated.fetch_add(n, Ordering::Relaxed);
    }

    /// Count keys already in sync.
    pub fn add_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }

    /// Count keys that could not be migrated.
    pub fn add_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }

    /// Keys migrated so far.
    pub fn migrated(&self) -> u64 {
        self.migrated.load(Ordering::Relaxed)
    }

    /// Keys skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Keys failed so far.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Read all three totals.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            migrated: self.migrated(),
            skipped: self.skipped(),
            failed: self.failed(),
        }
    }
}
